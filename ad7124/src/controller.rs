//! Conversion controller: drives the device's operating-mode state machine
//! and implements the single-shot and continuous batched read protocols.
//!
//! Every wait is a bounded status poll that checks a [`Cancellation`] source
//! on each iteration. The controller owns the bus, so nothing else can slip a
//! register transaction into a batch in progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use tracing::{debug, info, trace, warn};

use crate::bus::RegisterBus;
use crate::channel::{ChannelDef, ChannelTable, IoControl, CHANNEL_COUNT};
use crate::error::{ConfigError, Error};
use crate::registers::{adc_control, Register, Status};
use crate::session::{Calibration, ConversionSession, Observation, OperatingMode, PowerMode, SessionState};

/// CHANNEL_n value used to disable a slot the caller never defined
/// (power-on mapping AIN0/AIN1, setup 0).
const CHANNEL_POWER_ON: u32 = 0x0001;

/// Timing and retry policy for reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Longest wait for data-ready on a single conversion.
    pub ready_timeout: Duration,
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Retries after a timeout or transport error before the error surfaces.
    pub read_retries: u8,
    /// Framing discards tolerated in one batched read before `Desync`.
    pub max_framing_retries: u8,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(1),
            read_retries: 2,
            max_framing_retries: 3,
        }
    }
}

impl ControllerConfig {
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_read_retries(mut self, retries: u8) -> Self {
        self.read_retries = retries;
        self
    }

    pub fn with_max_framing_retries(mut self, retries: u8) -> Self {
        self.max_framing_retries = retries;
        self
    }

    /// Number of status polls that fit in `ready_timeout` (at least one).
    fn max_polls(&self) -> u32 {
        let interval = self.poll_interval.as_micros().max(1);
        let polls = self.ready_timeout.as_micros() / interval;
        polls.clamp(1, u128::from(u32::MAX)) as u32
    }

    fn poll_interval_us(&self) -> u32 {
        self.poll_interval.as_micros().min(u128::from(u32::MAX)) as u32
    }
}

/// Lets a caller abandon a read that is waiting on the device.
pub trait Cancellation {
    fn is_cancelled(&self) -> bool;
}

/// Never cancels; used by the plain read calls.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverCancel;

impl Cancellation for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl Cancellation for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

impl<T: Cancellation + ?Sized> Cancellation for &T {
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}

impl<T: Cancellation + ?Sized> Cancellation for Arc<T> {
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}

/// One conversion result as reported by the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reading {
    /// Channel tag from the status byte.
    pub channel: u8,
    /// Raw 24-bit code.
    pub code: u32,
    /// False when the device raised its error flag for this conversion.
    pub valid: bool,
}

/// What to do with a continuous-mode sample after checking its tag.
enum Framing {
    Store,
    Start,
    Skip,
    Discard,
    DiscardThenStart,
}

pub struct Controller<B, D> {
    bus: B,
    delay: D,
    config: ControllerConfig,
    session: ConversionSession,
    io: IoControl,
    /// Channel enable bits as last written to the device.
    hw_enabled: u16,
}

impl<B: RegisterBus, D: DelayNs> Controller<B, D> {
    pub fn new(bus: B, delay: D, config: ControllerConfig) -> Self {
        Controller {
            bus,
            delay,
            config,
            session: ConversionSession::new(),
            io: IoControl::default(),
            hw_enabled: 1,
        }
    }

    pub fn session(&self) -> &ConversionSession {
        &self.session
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ControllerConfig) {
        self.config = config;
    }

    pub fn io_control(&self) -> &IoControl {
        &self.io
    }

    pub fn release(self) -> (B, D) {
        (self.bus, self.delay)
    }

    pub(crate) fn write(&mut self, reg: Register, value: u32) -> Result<(), Error<B::Error>> {
        trace!(?reg, value, "register write");
        self.bus.write_register(reg, value).map_err(Error::Transport)
    }

    pub(crate) fn read(&mut self, reg: Register) -> Result<u32, Error<B::Error>> {
        let value = self.bus.read_register(reg).map_err(Error::Transport)?;
        trace!(?reg, value, "register read");
        Ok(value)
    }

    /// Serial reset; the device and all local mirrors return to power-on state.
    pub(crate) fn reset(&mut self) -> Result<(), Error<B::Error>> {
        self.bus.reset().map_err(Error::Transport)?;
        // Registers are inaccessible for a short while after reset.
        self.delay.delay_ms(1);
        self.session = ConversionSession::new();
        self.io = IoControl::default();
        self.hw_enabled = 1;
        Ok(())
    }

    pub(crate) fn write_channel(&mut self, index: u8, def: &ChannelDef) -> Result<(), Error<B::Error>> {
        self.write(Register::Channel(index), def.register_value(def.enabled))?;
        if def.enabled {
            self.hw_enabled |= 1 << index;
        } else {
            self.hw_enabled &= !(1 << index);
        }
        Ok(())
    }

    pub(crate) fn set_io_control(&mut self, io: IoControl) -> Result<(), Error<B::Error>> {
        self.write(Register::IoControl1, io.register_value())?;
        self.io = io;
        Ok(())
    }

    fn control_word(&self, mode_bits: u32) -> u32 {
        adc_control::DATA_STATUS
            | if self.session.reference_enable() { adc_control::REF_EN } else { 0 }
            | ((self.session.power() as u32) << adc_control::POWER_MODE_SHIFT)
            | (mode_bits << adc_control::MODE_SHIFT)
    }

    /// Bring the device enable bits in line with `wanted`, touching only the
    /// channels that differ.
    fn apply_enables(&mut self, wanted: u16, table: &ChannelTable) -> Result<(), Error<B::Error>> {
        for index in 0..CHANNEL_COUNT as u8 {
            let bit = 1u16 << index;
            let want = wanted & bit != 0;
            if (self.hw_enabled & bit != 0) == want {
                continue;
            }
            let value = match table.get(index) {
                Ok(def) => def.register_value(want),
                Err(_) if !want => CHANNEL_POWER_ON,
                Err(e) => return Err(e.into()),
            };
            self.write(Register::Channel(index), value)?;
            self.hw_enabled ^= bit;
        }
        Ok(())
    }

    /// Enter `mode`. Continuous mode captures the enabled channels of `table`
    /// as the expected sequence; single mode parks the device in standby until
    /// a read triggers it.
    pub(crate) fn set_mode(
        &mut self,
        mode: OperatingMode,
        power: PowerMode,
        reference_enable: bool,
        table: &ChannelTable,
    ) -> Result<(), Error<B::Error>> {
        let sequence = if mode == OperatingMode::Continuous {
            let sequence = table.enabled();
            if sequence.is_empty() {
                return Err(ConfigError::NoEnabledChannels.into());
            }
            sequence
        } else {
            Vec::new()
        };
        self.session.begin(mode, power, reference_enable, sequence);

        match mode {
            OperatingMode::Continuous => {
                let wanted = table.enabled().iter().fold(0u16, |acc, &c| acc | 1 << c);
                self.apply_enables(wanted, table)?;
                self.write(Register::AdcControl, self.control_word(mode.bits()))?;
                self.session.set_state(SessionState::ContinuousRunning);
            }
            OperatingMode::Single => {
                self.write(Register::AdcControl, self.control_word(OperatingMode::Standby.bits()))?;
            }
            OperatingMode::PowerDown => {
                self.write(Register::AdcControl, self.control_word(mode.bits()))?;
                self.session.set_state(SessionState::PowerDown);
            }
            OperatingMode::Standby | OperatingMode::Idle => {
                self.write(Register::AdcControl, self.control_word(mode.bits()))?;
                self.session.set_state(SessionState::Idle);
            }
        }
        info!(?mode, ?power, sequence = ?self.session.sequence(), "operating mode set");
        Ok(())
    }

    fn wait_ready<C: Cancellation + ?Sized>(&mut self, cancel: &C) -> Result<Status, Error<B::Error>> {
        for _ in 0..self.config.max_polls() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let status = Status(self.read(Register::Status)? as u8);
            if status.ready() {
                return Ok(status);
            }
            self.delay.delay_us(self.config.poll_interval_us());
        }
        Err(Error::Timeout { waited: self.config.ready_timeout })
    }

    fn read_sample(&mut self) -> Result<Reading, Error<B::Error>> {
        let word = self.read(Register::DataWithStatus)?;
        let status = Status((word & 0xFF) as u8);
        Ok(Reading {
            channel: status.channel(),
            code: word >> 8,
            valid: !status.error(),
        })
    }

    /// Collect and drop a conversion left behind by a cancelled or timed-out
    /// single-shot read.
    fn drain_stale(&mut self) -> Result<(), Error<B::Error>> {
        if !self.session.stale_conversion() {
            return Ok(());
        }
        let status = Status(self.read(Register::Status)? as u8);
        if status.ready() {
            let dropped = self.read_sample()?;
            debug!(channel = dropped.channel, "dropped conversion from an abandoned read");
        }
        self.session.mark_stale(false);
        Ok(())
    }

    fn single_shot<C: Cancellation + ?Sized>(
        &mut self,
        channel: u8,
        table: &ChannelTable,
        cancel: &C,
    ) -> Result<Reading, Error<B::Error>> {
        self.drain_stale()?;
        self.apply_enables(1 << channel, table)?;
        self.write(Register::AdcControl, self.control_word(OperatingMode::Single.bits()))?;
        self.session.set_state(SessionState::SingleShotTriggered);
        debug!(channel, "single conversion triggered");

        self.session.set_state(SessionState::SingleShotWaiting);
        let outcome = self.wait_ready(cancel).and_then(|_| self.read_sample());
        self.session.set_state(SessionState::Idle);
        if let Err(Error::Cancelled | Error::Timeout { .. }) = outcome {
            self.session.mark_stale(true);
        }

        let reading = outcome?;
        if reading.channel != channel {
            return Err(Error::Framing { expected: channel, got: reading.channel });
        }
        Ok(reading)
    }

    fn single_with_retries<C: Cancellation + ?Sized>(
        &mut self,
        channel: u8,
        table: &ChannelTable,
        cancel: &C,
    ) -> Result<Reading, Error<B::Error>> {
        let mut failures = 0u8;
        let mut framing = 0u8;
        loop {
            match self.single_shot(channel, table, cancel) {
                Ok(reading) => return Ok(reading),
                Err(Error::Framing { expected, got }) if framing < self.config.max_framing_retries => {
                    framing += 1;
                    self.session.count_discard();
                    warn!(expected, got, "single conversion tagged with the wrong channel, retrying");
                }
                Err(e @ (Error::Timeout { .. } | Error::Transport(_))) if failures < self.config.read_retries => {
                    failures += 1;
                    warn!(channel, attempt = failures, error = ?e, "single conversion failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Single-conversion cadence: trigger, wait and record each requested
    /// channel in turn. `out[i]` always belongs to `channels[i]`.
    pub(crate) fn read_single_batch<C: Cancellation + ?Sized>(
        &mut self,
        channels: &[u8],
        out: &mut [Reading],
        table: &ChannelTable,
        cancel: &C,
    ) -> Result<(), Error<B::Error>> {
        for (slot, &channel) in out.iter_mut().zip(channels) {
            *slot = self.single_with_retries(channel, table, cancel)?;
        }
        Ok(())
    }

    /// Continuous cadence: take samples as the device sequencer produces them
    /// and slot each by its channel tag. A batch is only assembled from one
    /// pass that starts at the first channel of the sequence; anything torn
    /// is thrown away and collection restarts on the next pass.
    pub(crate) fn read_continuous_batch<C: Cancellation + ?Sized>(
        &mut self,
        channels: &[u8],
        out: &mut [Reading],
        cancel: &C,
    ) -> Result<(), Error<B::Error>> {
        let mut filled = 0u32;
        let mut collecting = false;
        let mut discards = 0u32;
        let mut failures = 0u8;
        // Set after a foreign tag; the next in-sequence tag only realigns.
        let mut realigning = false;

        loop {
            let sample = match self.wait_ready(cancel).and_then(|_| self.read_sample()) {
                Ok(sample) => sample,
                Err(e @ (Error::Timeout { .. } | Error::Transport(_))) if failures < self.config.read_retries => {
                    failures += 1;
                    warn!(attempt = failures, error = ?e, "continuous read failed, restarting batch");
                    self.session.lose_alignment();
                    collecting = false;
                    filled = 0;
                    continue;
                }
                Err(e) => {
                    self.session.lose_alignment();
                    return Err(e);
                }
            };

            let expected = self.session.expected_next();
            let observation = self.session.observe(sample.channel);
            let action = match observation {
                Observation::InStep(_) if collecting => Framing::Store,
                Observation::InStep(0) => Framing::Start,
                Observation::InStep(_) => Framing::Skip,
                Observation::Jumped(0) if collecting => Framing::DiscardThenStart,
                Observation::Jumped(0) => Framing::Start,
                Observation::Jumped(_) if realigning => Framing::Skip,
                Observation::Jumped(_) | Observation::Foreign => Framing::Discard,
            };
            realigning = observation == Observation::Foreign;

            match action {
                Framing::Store => {}
                Framing::Start => {
                    collecting = true;
                    filled = 0;
                }
                Framing::Skip => {
                    trace!(tag = sample.channel, "waiting for the start of the next pass");
                    continue;
                }
                Framing::Discard | Framing::DiscardThenStart => {
                    discards += 1;
                    self.session.count_discard();
                    warn!(
                        tag = sample.channel,
                        ?expected,
                        collected = filled.count_ones(),
                        discards,
                        "framing error, discarding partial batch"
                    );
                    if discards > u32::from(self.config.max_framing_retries) {
                        return Err(Error::Desync { discards });
                    }
                    filled = 0;
                    collecting = matches!(action, Framing::DiscardThenStart);
                    if !collecting {
                        continue;
                    }
                }
            }

            if let Some(slot) = channels.iter().position(|&c| c == sample.channel) {
                if filled & (1 << slot) == 0 {
                    out[slot] = sample;
                    filled |= 1 << slot;
                }
            }
            if filled.count_ones() as usize == channels.len() {
                return Ok(());
            }
        }
    }

    /// Run one calibration on `channel`; the device is idle afterwards.
    pub(crate) fn calibrate<C: Cancellation + ?Sized>(
        &mut self,
        channel: u8,
        kind: Calibration,
        table: &ChannelTable,
        cancel: &C,
    ) -> Result<(), Error<B::Error>> {
        self.drain_stale()?;
        self.apply_enables(1 << channel, table)?;
        self.write(Register::AdcControl, self.control_word(kind.bits()))?;
        info!(channel, ?kind, "calibration started");
        let outcome = self.wait_ready(cancel);
        self.session.set_state(SessionState::Idle);
        outcome.map(|_| ())
    }
}
