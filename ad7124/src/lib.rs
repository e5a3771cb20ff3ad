//! AD7124 24-bit sigma-delta ADC driver built on `embedded-hal`.
//!
//! [`Ad7124`] ties together the setup registry, the channel table, the pin
//! bias map and the conversion controller. Configuration calls validate
//! everything locally before a single byte goes out on the bus; read calls
//! return results slotted in the caller's request order.

use embedded_hal::delay::DelayNs;
use tracing::{debug, info};

pub mod bus;
pub mod channel;
pub mod controller;
pub mod error;
pub mod registers;
pub mod scaling;
pub mod session;
pub mod setup;

#[cfg(test)]
mod mock;

pub use bus::{RegisterBus, SpiBus};
pub use channel::{BiasMap, ChannelDef, ChannelTable, CurrentSource, ExcitationCurrent, InputPin, IoControl};
pub use controller::{Cancellation, ControllerConfig, NeverCancel, Reading};
pub use error::{ConfigError, Error, RangeError};
pub use scaling::{FullBridge, ThermocoupleType};
pub use session::{Calibration, ConversionSession, OperatingMode, PowerMode, SessionState};
pub use setup::{Burnout, Filter, FilterType, Gain, Polarity, PostFilter, ReferenceSource, Setup, SetupRegistry};

use controller::Controller;
use registers::Register;

/// Expected contents of the ID register.
pub const DEVICE_ID: u8 = 0x14;

/// AD7124 driver.
pub struct Ad7124<B, D> {
    setups: SetupRegistry,
    channels: ChannelTable,
    bias: BiasMap,
    controller: Controller<B, D>,
}

impl<B: RegisterBus, D: DelayNs> Ad7124<B, D> {
    /// Create a driver with the default timing and retry policy. Nothing is
    /// sent to the device until [`Ad7124::init`] or a configuration call.
    pub fn new(bus: B, delay: D) -> Self {
        Self::with_config(bus, delay, ControllerConfig::default())
    }

    pub fn with_config(bus: B, delay: D, config: ControllerConfig) -> Self {
        Ad7124 {
            setups: SetupRegistry::new(),
            channels: ChannelTable::new(),
            bias: BiasMap::default(),
            controller: Controller::new(bus, delay, config),
        }
    }

    /// Reset the device and forget all local configuration. Returns the ID
    /// register contents.
    pub fn init(&mut self) -> Result<u8, Error<B::Error>> {
        self.controller.reset()?;
        self.setups = SetupRegistry::new();
        self.channels = ChannelTable::new();
        self.bias = BiasMap::default();
        let id = self.device_id()?;
        if id != DEVICE_ID {
            tracing::warn!(id, "unexpected device ID");
        }
        info!(id, "AD7124 initialized");
        Ok(id)
    }

    pub fn device_id(&mut self) -> Result<u8, Error<B::Error>> {
        Ok(self.controller.read(Register::Id)? as u8)
    }

    /// Raw ERROR register.
    pub fn read_error_register(&mut self) -> Result<u32, Error<B::Error>> {
        self.controller.read(Register::Error)
    }

    /// OFFSET_n and GAIN_n calibration coefficients for a setup.
    pub fn read_calibration(&mut self, setup: u8) -> Result<(u32, u32), Error<B::Error>> {
        SetupRegistry::check_index(setup)?;
        let offset = self.controller.read(Register::Offset(setup))?;
        let gain = self.controller.read(Register::Gain(setup))?;
        Ok((offset, gain))
    }

    pub fn setups(&self) -> &SetupRegistry {
        &self.setups
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn bias(&self) -> &BiasMap {
        &self.bias
    }

    pub fn io_control(&self) -> &IoControl {
        self.controller.io_control()
    }

    pub fn session(&self) -> &ConversionSession {
        self.controller.session()
    }

    pub fn controller_config(&self) -> &ControllerConfig {
        self.controller.config()
    }

    pub fn set_controller_config(&mut self, config: ControllerConfig) {
        self.controller.set_config(config);
    }

    fn ensure_not_running(&self) -> Result<(), ConfigError> {
        if self.session().state() == SessionState::ContinuousRunning {
            return Err(ConfigError::Busy);
        }
        Ok(())
    }

    fn write_config_register(&mut self, index: u8) -> Result<(), Error<B::Error>> {
        let value = self.setups.get(index)?.config_register_value();
        self.controller.write(Register::Config(index), value)
    }

    fn write_filter_register(&mut self, index: u8) -> Result<(), Error<B::Error>> {
        let value = self.setups.get(index)?.filter.register_value();
        self.controller.write(Register::Filter(index), value)
    }

    /// Configure setup `index` with a reference, gain and polarity.
    pub fn set_config(
        &mut self,
        index: u8,
        reference: ReferenceSource,
        gain: Gain,
        polarity: Polarity,
    ) -> Result<(), Error<B::Error>> {
        self.ensure_not_running()?;
        self.setups.set_config(index, reference, gain, polarity)?;
        self.write_config_register(index)?;
        self.write_filter_register(index)?;
        debug!(index, ?reference, ?gain, ?polarity, "setup configured");
        Ok(())
    }

    /// Reference voltage used for scaling; overrides the source's nominal value.
    pub fn set_reference_voltage(&mut self, index: u8, volts: f64) -> Result<(), Error<B::Error>> {
        self.setups.set_reference_voltage(index, volts)?;
        Ok(())
    }

    pub fn set_burnout(&mut self, index: u8, burnout: Burnout) -> Result<(), Error<B::Error>> {
        self.ensure_not_running()?;
        self.setups.set_burnout(index, burnout)?;
        self.write_config_register(index)
    }

    pub fn set_buffers(
        &mut self,
        index: u8,
        ain_buffer: (bool, bool),
        ref_buffer: (bool, bool),
    ) -> Result<(), Error<B::Error>> {
        self.ensure_not_running()?;
        self.setups.set_buffers(index, ain_buffer, ref_buffer)?;
        self.write_config_register(index)
    }

    /// Set the filter type and output data rate select (1..=2047).
    pub fn set_filter(&mut self, index: u8, kind: FilterType, select: u16) -> Result<(), Error<B::Error>> {
        self.ensure_not_running()?;
        self.setups.set_filter(index, kind, select)?;
        self.write_filter_register(index)
    }

    pub fn set_filter_options(
        &mut self,
        index: u8,
        post_filter: PostFilter,
        rej60: bool,
        single_cycle: bool,
    ) -> Result<(), Error<B::Error>> {
        self.ensure_not_running()?;
        self.setups.set_filter_options(index, post_filter, rej60, single_cycle)?;
        self.write_filter_register(index)
    }

    /// Define channel `index` as `positive - negative` measured with `setup`.
    pub fn set_channel(
        &mut self,
        index: u8,
        setup: u8,
        positive: InputPin,
        negative: InputPin,
        enabled: bool,
    ) -> Result<(), Error<B::Error>> {
        self.ensure_not_running()?;
        let def = *self.channels.set_channel(&self.setups, index, setup, positive, negative, enabled)?;
        self.controller.write_channel(index, &def)?;
        debug!(index, setup, ?positive, ?negative, enabled, "channel configured");
        Ok(())
    }

    pub fn enable_channel(&mut self, index: u8, enabled: bool) -> Result<(), Error<B::Error>> {
        self.ensure_not_running()?;
        let def = *self.channels.enable(index, enabled)?;
        self.controller.write_channel(index, &def)
    }

    /// Turn the AVDD/2 bias generator on or off for an analog input pin.
    pub fn set_bias(&mut self, pin: InputPin, enabled: bool) -> Result<(), Error<B::Error>> {
        self.bias.set(pin, enabled)?;
        self.controller.write(Register::IoControl2, self.bias.register_value())
    }

    /// Low-side bridge power switch (PSW pin).
    pub fn set_power_switch(&mut self, on: bool) -> Result<(), Error<B::Error>> {
        let mut io = *self.controller.io_control();
        io.power_switch = on;
        self.controller.set_io_control(io)
    }

    pub fn set_excitation_current(
        &mut self,
        source: CurrentSource,
        pin: InputPin,
        current: ExcitationCurrent,
    ) -> Result<(), Error<B::Error>> {
        let mut io = *self.controller.io_control();
        io.set_current(source, pin, current)?;
        self.controller.set_io_control(io)
    }

    /// Enter an operating mode. Continuous mode starts the sequencer over
    /// every enabled channel; single mode waits for reads to trigger
    /// conversions. The internal reference is powered whenever a configured
    /// setup uses it.
    pub fn set_mode(&mut self, mode: OperatingMode, power: PowerMode) -> Result<(), Error<B::Error>> {
        let reference_enable = self.setups.uses_internal_reference();
        self.controller.set_mode(mode, power, reference_enable, &self.channels)
    }

    pub fn power_down(&mut self) -> Result<(), Error<B::Error>> {
        let power = self.session().power();
        self.set_mode(OperatingMode::PowerDown, power)
    }

    /// Run a calibration on `channel`. Not allowed while continuous
    /// conversion is running; the device is idle afterwards.
    pub fn calibrate(&mut self, channel: u8, kind: Calibration) -> Result<(), Error<B::Error>> {
        self.calibrate_with_cancel(channel, kind, &NeverCancel)
    }

    pub fn calibrate_with_cancel<C: Cancellation + ?Sized>(
        &mut self,
        channel: u8,
        kind: Calibration,
        cancel: &C,
    ) -> Result<(), Error<B::Error>> {
        self.ensure_not_running()?;
        self.channels.get(channel)?;
        self.controller.calibrate(channel, kind, &self.channels, cancel)
    }

    /// Check a batched request before any bus traffic.
    fn validate_request(&self, channels: &[u8], slots: usize) -> Result<(), ConfigError> {
        if channels.is_empty() {
            return Err(ConfigError::EmptyRequest);
        }
        if channels.len() != slots {
            return Err(ConfigError::BufferMismatch { channels: channels.len(), slots });
        }
        let mut seen = 0u16;
        for &channel in channels {
            self.channels.get(channel)?;
            if seen & (1 << channel) != 0 {
                return Err(ConfigError::DuplicateChannel(channel));
            }
            seen |= 1 << channel;
        }
        Ok(())
    }

    pub fn read_raw(&mut self, channel: u8) -> Result<Reading, Error<B::Error>> {
        let mut out = [Reading::default()];
        self.read_raw_batch(&[channel], &mut out)?;
        Ok(out[0])
    }

    /// Read every channel in `channels`; `out[i]` receives the result for
    /// `channels[i]`.
    pub fn read_raw_batch(&mut self, channels: &[u8], out: &mut [Reading]) -> Result<(), Error<B::Error>> {
        self.read_raw_batch_with_cancel(channels, out, &NeverCancel)
    }

    #[tracing::instrument(skip(self, out, cancel))]
    pub fn read_raw_batch_with_cancel<C: Cancellation + ?Sized>(
        &mut self,
        channels: &[u8],
        out: &mut [Reading],
        cancel: &C,
    ) -> Result<(), Error<B::Error>> {
        self.validate_request(channels, out.len())?;
        let session = self.controller.session();
        match (session.mode(), session.state()) {
            (_, SessionState::ContinuousRunning) => {
                if let Some(&missing) = channels.iter().find(|c| !session.sequence().contains(c)) {
                    return Err(ConfigError::NotInSequence(missing).into());
                }
                self.controller.read_continuous_batch(channels, out, cancel)
            }
            (Some(OperatingMode::Single), state) if state != SessionState::PowerDown => {
                self.controller.read_single_batch(channels, out, &self.channels, cancel)
            }
            _ => Err(ConfigError::NotAcquiring.into()),
        }
    }

    /// Scale a reading with the setup its channel points at.
    pub fn to_volts(&self, reading: &Reading) -> Result<f64, Error<B::Error>> {
        if !reading.valid {
            return Err(Error::InvalidReading { channel: reading.channel });
        }
        let def = self.channels.get(reading.channel)?;
        let setup = self.setups.get(def.setup)?;
        Ok(setup.code_to_volts(reading.code)?)
    }

    pub fn read_volts(&mut self, channel: u8) -> Result<f64, Error<B::Error>> {
        let reading = self.read_raw(channel)?;
        self.to_volts(&reading)
    }

    pub fn read_volts_batch(&mut self, channels: &[u8], out: &mut [f64]) -> Result<(), Error<B::Error>> {
        self.read_volts_batch_with_cancel(channels, out, &NeverCancel)
    }

    pub fn read_volts_batch_with_cancel<C: Cancellation + ?Sized>(
        &mut self,
        channels: &[u8],
        out: &mut [f64],
        cancel: &C,
    ) -> Result<(), Error<B::Error>> {
        self.validate_request(channels, out.len())?;
        let mut readings = vec![Reading::default(); channels.len()];
        self.read_raw_batch_with_cancel(channels, &mut readings, cancel)?;
        for (volts, reading) in out.iter_mut().zip(&readings) {
            *volts = self.to_volts(reading)?;
        }
        Ok(())
    }

    fn check_temperature_channel(&self, channel: u8) -> Result<(), ConfigError> {
        let def = self.channels.get(channel)?;
        if def.positive != InputPin::Temp || def.negative != InputPin::Avss {
            return Err(ConfigError::NotTemperatureSensor(channel));
        }
        Ok(())
    }

    /// On-die temperature in °C. The channel must measure `Temp` against
    /// `Avss` with a bipolar, gain 1 setup.
    pub fn read_ic_temperature(&mut self, channel: u8) -> Result<f64, Error<B::Error>> {
        self.check_temperature_channel(channel)?;
        let reading = self.read_raw(channel)?;
        if !reading.valid {
            return Err(Error::InvalidReading { channel });
        }
        Ok(scaling::ic_temperature(reading.code)?)
    }

    pub fn read_full_bridge(
        &mut self,
        channel: u8,
        excitation_volts: f64,
        bridge: &FullBridge,
    ) -> Result<f64, Error<B::Error>> {
        let volts = self.read_volts(channel)?;
        Ok(scaling::full_bridge(volts, excitation_volts, bridge)?)
    }

    /// Thermocouple temperature in °C against a known cold-junction temperature.
    pub fn read_thermocouple(
        &mut self,
        channel: u8,
        cold_junction_c: f64,
        kind: ThermocoupleType,
    ) -> Result<f64, Error<B::Error>> {
        let volts = self.read_volts(channel)?;
        Ok(scaling::thermocouple(volts, cold_junction_c, kind)?)
    }

    /// Thermocouple temperature using the on-die sensor on `ic_channel` as the
    /// cold junction. Both channels are read in one batch.
    pub fn read_thermocouple_ic_compensated(
        &mut self,
        channel: u8,
        ic_channel: u8,
        kind: ThermocoupleType,
    ) -> Result<f64, Error<B::Error>> {
        self.check_temperature_channel(ic_channel)?;
        let mut readings = [Reading::default(); 2];
        self.read_raw_batch(&[channel, ic_channel], &mut readings)?;
        if !readings[1].valid {
            return Err(Error::InvalidReading { channel: ic_channel });
        }
        let cold_junction_c = scaling::ic_temperature(readings[1].code)?;
        let volts = self.to_volts(&readings[0])?;
        Ok(scaling::thermocouple(volts, cold_junction_c, kind)?)
    }

    /// Give back the bus and delay.
    pub fn release(self) -> (B, D) {
        self.controller.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{code_for, DeviceState, MockBus, NoDelay};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;
    use test_log::test;

    type Adc = Ad7124<MockBus, NoDelay>;

    fn fast_config() -> ControllerConfig {
        ControllerConfig::default()
            .with_ready_timeout(Duration::from_millis(20))
            .with_poll_interval(Duration::from_millis(1))
    }

    /// Setup 0 bipolar on the internal reference, channels 0..n enabled on AIN pairs.
    fn adc_with_channels(n: u8) -> (Adc, Rc<RefCell<DeviceState>>) {
        let (bus, dev) = MockBus::new();
        let mut adc = Ad7124::with_config(bus, NoDelay, fast_config());
        adc.init().unwrap();
        adc.set_config(0, ReferenceSource::Internal, Gain::G1, Polarity::Bipolar).unwrap();
        for ch in 0..n {
            let pos = InputPin::try_from(ch * 2 % 16).unwrap();
            let neg = InputPin::try_from(ch * 2 % 16 + 1).unwrap();
            adc.set_channel(ch, 0, pos, neg, true).unwrap();
        }
        (adc, dev)
    }

    fn tags(out: &[Reading]) -> Vec<u8> {
        out.iter().map(|r| r.channel).collect()
    }

    #[test]
    fn test_init_reads_id() {
        let (bus, _dev) = MockBus::new();
        let mut adc = Ad7124::new(bus, NoDelay);
        assert_eq!(adc.init().unwrap(), DEVICE_ID);
        assert_eq!(adc.session().state(), SessionState::Idle);
        assert_eq!(adc.session().mode(), None);
    }

    #[test]
    fn test_single_shot_batch_in_request_order() {
        let (mut adc, dev) = adc_with_channels(3);
        adc.set_mode(OperatingMode::Single, PowerMode::Full).unwrap();

        let mut out = [Reading::default(); 3];
        adc.read_raw_batch(&[2, 0, 1], &mut out).unwrap();

        assert_eq!(tags(&out), vec![2, 0, 1]);
        assert_eq!(out[0].code, code_for(2, 0));
        assert_eq!(out[1].code, code_for(0, 0));
        assert!(out.iter().all(|r| r.valid));
        assert_eq!(dev.borrow().triggers, 3);
        assert_eq!(adc.session().state(), SessionState::Idle);
    }

    #[test]
    fn test_single_shot_restricts_enables() {
        let (mut adc, dev) = adc_with_channels(3);
        adc.set_mode(OperatingMode::Single, PowerMode::Low).unwrap();
        adc.read_raw(1).unwrap();

        let dev = dev.borrow();
        let enabled = |n: u8| dev.regs[&Register::Channel(n).address()] & registers::channel::ENABLE != 0;
        assert!(enabled(1));
        assert!(!enabled(0));
        assert!(!enabled(2));
        // The table itself still has all three enabled.
        assert_eq!(adc.channels().enabled(), vec![0, 1, 2]);
    }

    #[test]
    fn test_continuous_batch_in_request_order() {
        let (mut adc, _dev) = adc_with_channels(4);
        adc.set_mode(OperatingMode::Continuous, PowerMode::Full).unwrap();
        assert_eq!(adc.session().state(), SessionState::ContinuousRunning);
        assert_eq!(adc.session().sequence(), &[0, 1, 2, 3]);

        let mut out = [Reading::default(); 2];
        adc.read_raw_batch(&[3, 1], &mut out).unwrap();
        assert_eq!(tags(&out), vec![3, 1]);
        assert_eq!(out[0].code, code_for(3, 0));
        assert_eq!(adc.session().framing_discards(), 0);
    }

    #[test]
    fn test_continuous_mid_pass_start_discards_and_restarts() {
        let (mut adc, dev) = adc_with_channels(3);
        dev.borrow_mut().start_offset = 1;
        adc.set_mode(OperatingMode::Continuous, PowerMode::Full).unwrap();

        let mut out = [Reading::default(); 3];
        adc.read_raw_batch(&[0, 1, 2], &mut out).unwrap();

        assert_eq!(tags(&out), vec![0, 1, 2]);
        // Channel 1's first conversion came from the torn pass.
        assert_eq!(out[1].code, code_for(1, 1));
        assert_eq!(adc.session().framing_discards(), 1);
        assert_eq!(adc.session().expected_next(), Some(0));
    }

    #[test]
    fn test_continuous_persistent_tearing_is_desync() {
        let (mut adc, dev) = adc_with_channels(3);
        dev.borrow_mut().scripted_tags.extend([0, 2, 0, 2, 0, 2, 0, 2, 0, 2]);
        adc.set_mode(OperatingMode::Continuous, PowerMode::Full).unwrap();

        let mut out = [Reading::default(); 3];
        let err = adc.read_raw_batch(&[0, 1, 2], &mut out).unwrap_err();
        assert!(matches!(err, Error::Desync { discards: 4 }), "{err:?}");
        assert_eq!(adc.session().framing_discards(), 4);
    }

    #[test]
    fn test_continuous_foreign_tag_is_discarded() {
        let (mut adc, dev) = adc_with_channels(2);
        dev.borrow_mut().start_offset = 1;
        dev.borrow_mut().scripted_tags.push_back(9);
        adc.set_mode(OperatingMode::Continuous, PowerMode::Full).unwrap();

        let mut out = [Reading::default(); 2];
        adc.read_raw_batch(&[1, 0], &mut out).unwrap();
        assert_eq!(tags(&out), vec![1, 0]);
        assert_eq!(adc.session().framing_discards(), 1);
    }

    #[test]
    fn test_single_timeout_leaves_session_idle() {
        let (mut adc, dev) = adc_with_channels(1);
        adc.set_controller_config(fast_config().with_read_retries(1));
        dev.borrow_mut().never_ready = true;
        adc.set_mode(OperatingMode::Single, PowerMode::Low).unwrap();

        let err = adc.read_raw(0).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "{err:?}");
        assert_eq!(adc.session().state(), SessionState::Idle);
        assert!(adc.session().stale_conversion());
        assert_eq!(dev.borrow().triggers, 2);

        // The device recovers; the next read succeeds.
        dev.borrow_mut().never_ready = false;
        assert_eq!(adc.read_raw(0).unwrap().channel, 0);
    }

    #[test]
    fn test_transient_bus_error_is_retried() {
        let (mut adc, dev) = adc_with_channels(2);
        adc.set_mode(OperatingMode::Single, PowerMode::Low).unwrap();
        dev.borrow_mut().fail_reads = 1;
        assert_eq!(adc.read_raw(1).unwrap().channel, 1);

        adc.set_controller_config(fast_config().with_read_retries(0));
        dev.borrow_mut().fail_reads = 1;
        assert!(matches!(adc.read_raw(1), Err(Error::Transport(_))));
    }

    #[test]
    fn test_single_wrong_tag_is_retried_then_reported() {
        let (mut adc, dev) = adc_with_channels(2);
        adc.set_mode(OperatingMode::Single, PowerMode::Low).unwrap();
        dev.borrow_mut().scripted_single_tags.push_back(1);
        assert_eq!(adc.read_raw(0).unwrap().channel, 0);
        assert_eq!(adc.session().framing_discards(), 1);

        adc.set_controller_config(fast_config().with_max_framing_retries(0));
        dev.borrow_mut().scripted_single_tags.push_back(1);
        assert!(matches!(adc.read_raw(0), Err(Error::Framing { expected: 0, got: 1 })));
    }

    #[test]
    fn test_invalid_config_sends_nothing() {
        let (mut adc, dev) = adc_with_channels(1);
        let before = dev.borrow().transactions;

        assert!(matches!(
            adc.set_channel(1, 8, InputPin::Ain0, InputPin::Ain1, true),
            Err(Error::Config(ConfigError::InvalidSetup(8)))
        ));
        assert!(matches!(
            adc.set_channel(1, 3, InputPin::Ain0, InputPin::Ain1, true),
            Err(Error::Config(ConfigError::SetupNotConfigured(3)))
        ));
        assert!(matches!(
            adc.set_filter(0, FilterType::Sinc3, 0),
            Err(Error::Config(ConfigError::FilterSelectOutOfRange(0)))
        ));
        assert!(matches!(
            adc.set_filter(0, FilterType::Sinc3, 4000),
            Err(Error::Config(ConfigError::FilterSelectOutOfRange(4000)))
        ));
        assert!(matches!(
            adc.set_bias(InputPin::Avss, true),
            Err(Error::Config(ConfigError::BiasUnsupported(InputPin::Avss)))
        ));
        assert_eq!(dev.borrow().transactions, before);
    }

    #[test]
    fn test_bad_requests_send_nothing() {
        let (mut adc, dev) = adc_with_channels(2);
        adc.set_mode(OperatingMode::Single, PowerMode::Low).unwrap();
        let before = dev.borrow().transactions;

        let mut two = [Reading::default(); 2];
        assert!(matches!(
            adc.read_raw_batch(&[], &mut []),
            Err(Error::Config(ConfigError::EmptyRequest))
        ));
        assert!(matches!(
            adc.read_raw_batch(&[0], &mut two),
            Err(Error::Config(ConfigError::BufferMismatch { channels: 1, slots: 2 }))
        ));
        assert!(matches!(
            adc.read_raw_batch(&[1, 1], &mut two),
            Err(Error::Config(ConfigError::DuplicateChannel(1)))
        ));
        assert!(matches!(
            adc.read_raw_batch(&[0, 5], &mut two),
            Err(Error::Config(ConfigError::ChannelNotConfigured(5)))
        ));
        assert_eq!(dev.borrow().transactions, before);
    }

    #[test]
    fn test_reads_need_acquisition_mode() {
        let (mut adc, _dev) = adc_with_channels(1);
        assert!(matches!(adc.read_raw(0), Err(Error::Config(ConfigError::NotAcquiring))));
        adc.set_mode(OperatingMode::Single, PowerMode::Low).unwrap();
        adc.power_down().unwrap();
        assert_eq!(adc.session().state(), SessionState::PowerDown);
        assert!(matches!(adc.read_raw(0), Err(Error::Config(ConfigError::NotAcquiring))));
    }

    #[test]
    fn test_continuous_needs_enabled_channel() {
        let (mut adc, _dev) = adc_with_channels(0);
        assert!(matches!(
            adc.set_mode(OperatingMode::Continuous, PowerMode::Full),
            Err(Error::Config(ConfigError::NoEnabledChannels))
        ));
    }

    #[test]
    fn test_continuous_rejects_channel_outside_sequence() {
        let (mut adc, _dev) = adc_with_channels(3);
        adc.enable_channel(2, false).unwrap();
        adc.set_mode(OperatingMode::Continuous, PowerMode::Full).unwrap();
        let mut out = [Reading::default(); 1];
        assert!(matches!(
            adc.read_raw_batch(&[2], &mut out),
            Err(Error::Config(ConfigError::NotInSequence(2)))
        ));
    }

    #[test]
    fn test_config_is_busy_while_continuous() {
        let (mut adc, _dev) = adc_with_channels(2);
        adc.set_mode(OperatingMode::Continuous, PowerMode::Full).unwrap();
        assert!(matches!(
            adc.set_config(1, ReferenceSource::Avdd, Gain::G2, Polarity::Unipolar),
            Err(Error::Config(ConfigError::Busy))
        ));
        assert!(matches!(adc.enable_channel(0, false), Err(Error::Config(ConfigError::Busy))));
        assert!(matches!(
            adc.calibrate(0, Calibration::InternalOffset),
            Err(Error::Config(ConfigError::Busy))
        ));
        // Pin-level switches stay available.
        adc.set_bias(InputPin::Ain0, true).unwrap();

        adc.set_mode(OperatingMode::Standby, PowerMode::Full).unwrap();
        adc.set_config(1, ReferenceSource::Avdd, Gain::G2, Polarity::Unipolar).unwrap();
    }

    #[test]
    fn test_cancelled_read_drains_stale_conversion() {
        let (mut adc, _dev) = adc_with_channels(1);
        adc.set_mode(OperatingMode::Single, PowerMode::Low).unwrap();

        let cancel = AtomicBool::new(true);
        let mut out = [Reading::default(); 1];
        assert!(matches!(
            adc.read_raw_batch_with_cancel(&[0], &mut out, &cancel),
            Err(Error::Cancelled)
        ));
        assert_eq!(adc.session().state(), SessionState::Idle);
        assert!(adc.session().stale_conversion());

        let reading = adc.read_raw(0).unwrap();
        // Conversion 0 belonged to the cancelled read.
        assert_eq!(reading.code, code_for(0, 1));
        assert!(!adc.session().stale_conversion());
    }

    #[test]
    fn test_bias_follows_pin_through_remap() {
        let (mut adc, dev) = adc_with_channels(1);
        adc.set_channel(0, 0, InputPin::Ain2, InputPin::Ain3, true).unwrap();
        adc.set_bias(InputPin::Ain3, true).unwrap();
        adc.set_channel(0, 0, InputPin::Ain6, InputPin::Ain7, true).unwrap();

        assert!(adc.bias().is_set(InputPin::Ain3));
        assert!(!adc.bias().is_set(InputPin::Ain7));
        assert_eq!(dev.borrow().regs[&Register::IoControl2.address()], 1 << 3);
    }

    #[test]
    fn test_io_control_writes() {
        let (mut adc, dev) = adc_with_channels(1);
        adc.set_power_switch(true).unwrap();
        adc.set_excitation_current(CurrentSource::Iout1, InputPin::Ain5, ExcitationCurrent::Ua250)
            .unwrap();
        assert_eq!(
            dev.borrow().regs[&Register::IoControl1.address()],
            (1 << 15) | (3 << 11) | (5 << 4)
        );
        adc.set_power_switch(false).unwrap();
        assert!(!adc.io_control().power_switch);
        assert_eq!(adc.io_control().iout1, (ExcitationCurrent::Ua250, 5));
    }

    #[test]
    fn test_mode_word_sets_data_status_and_reference() {
        let (mut adc, dev) = adc_with_channels(1);
        adc.set_mode(OperatingMode::Standby, PowerMode::Full).unwrap();
        let control = dev.borrow().regs[&Register::AdcControl.address()];
        assert_eq!(control, (1 << 10) | (1 << 8) | (0b10 << 6) | (2 << 2));
    }

    #[test]
    fn test_read_volts_and_invalid_flag() {
        let (mut adc, dev) = adc_with_channels(2);
        dev.borrow_mut().codes.insert(0, 0xC0_0000);
        adc.set_mode(OperatingMode::Single, PowerMode::Low).unwrap();
        assert!((adc.read_volts(0).unwrap() - 1.25).abs() < 1e-9);

        dev.borrow_mut().codes.insert(1, 0x80_0000);
        let mut volts = [f64::NAN; 2];
        adc.read_volts_batch(&[1, 0], &mut volts).unwrap();
        assert_eq!(volts[0], 0.0);
        assert!((volts[1] - 1.25).abs() < 1e-9);

        dev.borrow_mut().error_flag = true;
        assert!(!adc.read_raw(0).unwrap().valid);
        assert!(matches!(adc.read_volts(0), Err(Error::InvalidReading { channel: 0 })));
    }

    #[test]
    fn test_ic_temperature_and_thermocouple() {
        let (mut adc, dev) = adc_with_channels(1);
        adc.set_channel(1, 0, InputPin::Temp, InputPin::Avss, true).unwrap();
        let room = 0x80_0000 + (297.5 * 13584.0) as u32;
        // Thermocouple at the cold-junction temperature reads 0 V.
        dev.borrow_mut().codes.extend([(1, room), (0, 0x80_0000)]);
        adc.set_mode(OperatingMode::Single, PowerMode::Low).unwrap();

        assert!((adc.read_ic_temperature(1).unwrap() - 25.0).abs() < 1e-3);
        let t = adc.read_thermocouple(0, 25.0, ThermocoupleType::K).unwrap();
        assert!((t - 25.0).abs() < 0.1, "{t}");
        let t = adc
            .read_thermocouple_ic_compensated(0, 1, ThermocoupleType::K)
            .unwrap();
        assert!((t - 25.0).abs() < 0.1, "{t}");
    }

    #[test]
    fn test_ic_temperature_needs_sensor_channel() {
        let (mut adc, dev) = adc_with_channels(2);
        adc.set_mode(OperatingMode::Single, PowerMode::Low).unwrap();
        let before = dev.borrow().transactions;

        assert!(matches!(
            adc.read_ic_temperature(0),
            Err(Error::Config(ConfigError::NotTemperatureSensor(0)))
        ));
        assert!(matches!(
            adc.read_thermocouple_ic_compensated(0, 1, ThermocoupleType::K),
            Err(Error::Config(ConfigError::NotTemperatureSensor(1)))
        ));
        assert_eq!(dev.borrow().transactions, before);
    }

    #[test]
    fn test_continuous_timeout_keeps_running() {
        let (mut adc, dev) = adc_with_channels(3);
        adc.set_mode(OperatingMode::Continuous, PowerMode::Full).unwrap();
        dev.borrow_mut().never_ready = true;

        let mut out = [Reading::default(); 3];
        let err = adc.read_raw_batch(&[0, 1, 2], &mut out).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "{err:?}");
        assert_eq!(adc.session().state(), SessionState::ContinuousRunning);

        dev.borrow_mut().never_ready = false;
        adc.read_raw_batch(&[0, 1, 2], &mut out).unwrap();
        assert_eq!(tags(&out), vec![0, 1, 2]);
    }

    #[test]
    fn test_continuous_bus_error_restarts_batch() {
        let (mut adc, dev) = adc_with_channels(3);
        adc.set_mode(OperatingMode::Continuous, PowerMode::Full).unwrap();
        dev.borrow_mut().fail_reads = 1;

        let mut out = [Reading::default(); 3];
        adc.read_raw_batch(&[2, 0, 1], &mut out).unwrap();
        assert_eq!(tags(&out), vec![2, 0, 1]);
        assert_eq!(adc.session().framing_discards(), 0);
        assert_eq!(adc.session().state(), SessionState::ContinuousRunning);
    }

    #[test]
    fn test_continuous_read_can_be_cancelled() {
        let (mut adc, _dev) = adc_with_channels(2);
        adc.set_mode(OperatingMode::Continuous, PowerMode::Full).unwrap();

        let cancel = AtomicBool::new(true);
        let mut out = [Reading::default(); 2];
        assert!(matches!(
            adc.read_raw_batch_with_cancel(&[0, 1], &mut out, &cancel),
            Err(Error::Cancelled)
        ));
        assert_eq!(adc.session().state(), SessionState::ContinuousRunning);

        adc.read_raw_batch(&[0, 1], &mut out).unwrap();
        assert_eq!(tags(&out), vec![0, 1]);
    }

    #[test]
    fn test_continuous_single_glitch_costs_one_discard() {
        let (mut adc, dev) = adc_with_channels(3);
        // First conversion (channel 0) is reported with a stray tag; the
        // sequencer carries on with channels 1 and 2.
        dev.borrow_mut().scripted_tags.push_back(9);
        adc.set_mode(OperatingMode::Continuous, PowerMode::Full).unwrap();

        let mut out = [Reading::default(); 3];
        adc.read_raw_batch(&[0, 1, 2], &mut out).unwrap();
        assert_eq!(tags(&out), vec![0, 1, 2]);
        assert_eq!(adc.session().framing_discards(), 1);
    }

    #[test]
    fn test_full_bridge_read() {
        let (mut adc, dev) = adc_with_channels(1);
        adc.set_config(0, ReferenceSource::External1, Gain::G128, Polarity::Bipolar).unwrap();
        adc.set_reference_voltage(0, 5.0).unwrap();
        // 5 mV differential at gain 128, 5 V ratiometric reference.
        let code = scaling::volts_to_code(0.005, 24, Polarity::Bipolar, 5.0, 128.0);
        dev.borrow_mut().codes.insert(0, code);
        adc.set_mode(OperatingMode::Single, PowerMode::Full).unwrap();

        let cell = FullBridge { rated_output_mv_per_v: 2.0, capacity: 50.0 };
        let load = adc.read_full_bridge(0, 5.0, &cell).unwrap();
        assert!((load - 25.0).abs() < 1e-3, "{load}");
    }

    #[test]
    fn test_calibration_leaves_device_idle() {
        let (mut adc, dev) = adc_with_channels(2);
        adc.calibrate(1, Calibration::InternalOffset).unwrap();
        assert_eq!(adc.session().state(), SessionState::Idle);
        let control = dev.borrow().regs[&Register::AdcControl.address()];
        assert_eq!((control >> 2) & 0xF, 5);
        assert!(adc.read_calibration(0).is_ok());
        assert!(matches!(adc.read_calibration(9), Err(Error::Config(ConfigError::InvalidSetup(9)))));
    }

    #[test]
    fn test_reconfigure_after_continuous() {
        let (mut adc, _dev) = adc_with_channels(3);
        adc.set_mode(OperatingMode::Continuous, PowerMode::Full).unwrap();
        let mut out = [Reading::default(); 3];
        adc.read_raw_batch(&[0, 1, 2], &mut out).unwrap();

        adc.set_mode(OperatingMode::Single, PowerMode::Full).unwrap();
        assert_eq!(adc.read_raw(2).unwrap().channel, 2);
        adc.set_mode(OperatingMode::Continuous, PowerMode::Full).unwrap();
        adc.read_raw_batch(&[0, 1, 2], &mut out).unwrap();
        assert_eq!(tags(&out), vec![0, 1, 2]);
    }
}
