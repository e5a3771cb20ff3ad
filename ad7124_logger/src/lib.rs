use std::env;
use std::error::Error;
use std::time::Duration;

use ad7124::{
    Ad7124, Cancellation, ConfigError, Gain, InputPin, OperatingMode, Polarity, PowerMode, ReferenceSource,
    RegisterBus, SpiBus,
};
use embedded_hal::delay::DelayNs;
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::{Delay, SpidevDevice};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Logger settings, read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggerConfig {
    pub spi_dev: String,
    /// Differential pin pairs; the position in the list is the channel index.
    pub channels: Vec<(InputPin, InputPin)>,
    pub continuous: bool,
    pub interval: Duration,
}

impl LoggerConfig {
    const DEFAULT_SPI_DEV: &'static str = "/dev/spidev0.0";
    const DEFAULT_CHANNELS: &'static str = "0-1";
    const DEFAULT_INTERVAL_MS: u64 = 1000;

    /// `AD7124_SPI_DEV`, `AD7124_CHANNELS` (e.g. `0-1,2-3,16-17`),
    /// `AD7124_CONTINUOUS` (`1`/`true`) and `AD7124_INTERVAL_MS`.
    pub fn from_env() -> Result<Self, Box<dyn Error>> {
        let spi_dev = env::var("AD7124_SPI_DEV").unwrap_or_else(|_| Self::DEFAULT_SPI_DEV.to_string());
        let channels = parse_channels(&env::var("AD7124_CHANNELS").unwrap_or_else(|_| Self::DEFAULT_CHANNELS.to_string()))?;
        let continuous = env::var("AD7124_CONTINUOUS").is_ok_and(|v| parse_flag(&v));
        let interval_ms = match env::var("AD7124_INTERVAL_MS") {
            Ok(v) => v.parse()?,
            Err(_) => Self::DEFAULT_INTERVAL_MS,
        };
        Ok(Self {
            spi_dev,
            channels,
            continuous,
            interval: Duration::from_millis(interval_ms),
        })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Parse `p-n[,p-n...]` pin number pairs.
pub fn parse_channels(list: &str) -> Result<Vec<(InputPin, InputPin)>, Box<dyn Error>> {
    let mut channels = Vec::new();
    for pair in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (pos, neg) = pair
            .split_once('-')
            .ok_or_else(|| format!("channel `{pair}` is not of the form p-n"))?;
        let pos = InputPin::try_from(pos.trim().parse::<u8>()?)?;
        let neg = InputPin::try_from(neg.trim().parse::<u8>()?)?;
        channels.push((pos, neg));
    }
    if channels.is_empty() {
        return Err(ConfigError::EmptyRequest.into());
    }
    if channels.len() > ad7124::channel::CHANNEL_COUNT {
        return Err(ConfigError::InvalidChannel(ad7124::channel::CHANNEL_COUNT as u8).into());
    }
    Ok(channels)
}

/// Ctrl-C token handed to the driver so a pending wait gives up promptly.
#[derive(Clone, Debug, Default)]
pub struct Shutdown(pub CancellationToken);

impl Cancellation for Shutdown {
    fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// Apply the logger configuration: one bipolar setup on the internal
/// reference shared by every channel.
pub fn configure<B: RegisterBus, D: DelayNs>(
    adc: &mut Ad7124<B, D>,
    config: &LoggerConfig,
) -> Result<Vec<u8>, ad7124::Error<B::Error>> {
    adc.init()?;
    adc.set_config(0, ReferenceSource::Internal, Gain::G1, Polarity::Bipolar)?;
    let mut indices = Vec::with_capacity(config.channels.len());
    for (index, &(pos, neg)) in config.channels.iter().enumerate() {
        let index = index as u8;
        adc.set_channel(index, 0, pos, neg, true)?;
        indices.push(index);
    }
    let mode = if config.continuous { OperatingMode::Continuous } else { OperatingMode::Single };
    adc.set_mode(mode, PowerMode::Full)?;
    Ok(indices)
}

pub async fn ad7124_logger(config: LoggerConfig) -> Result<(), Box<dyn Error>> {
    let cancel = CancellationToken::new();
    let signal = cancel.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received.");
        }
        signal.cancel();
    });

    let mut spi = SpidevDevice::open(&config.spi_dev)?;
    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(1_000_000)
        .mode(SpiModeFlags::SPI_MODE_3)
        .build();
    spi.configure(&options)?;

    let mut adc = Ad7124::new(SpiBus::new(spi), Delay);
    let channels = configure(&mut adc, &config)?;
    info!(spi = %config.spi_dev, ?channels, continuous = config.continuous, "ADC configured.");

    tokio::select! {
        _ = collect_batches(&mut adc, &channels, config.interval, Shutdown(cancel.clone())) => {
            info!("Acquisition stopped.");
        },
        _ = cancel.cancelled() => {
            info!("Received shutdown signal.");
        }
    }

    if let Err(e) = adc.power_down() {
        warn!("Power down failed: {e}");
    }
    info!("Logger stopped.");
    Ok(())
}

async fn collect_batches<B: RegisterBus, D: DelayNs>(
    adc: &mut Ad7124<B, D>,
    channels: &[u8],
    period: Duration,
    shutdown: Shutdown,
) {
    let mut interval = tokio::time::interval(period);
    let mut volts = vec![0.0; channels.len()];

    loop {
        interval.tick().await;
        match adc.read_volts_batch_with_cancel(channels, &mut volts, &shutdown) {
            Ok(()) => info!(?channels, ?volts, "batch"),
            Err(ad7124::Error::Cancelled) => return,
            Err(e) => warn!("Batch read failed: {e}"),
        }
    }
}
