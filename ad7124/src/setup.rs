//! Setup registry: the eight reusable reference/gain/polarity/filter bundles
//! that channels point at by index.

use crate::error::{ConfigError, RangeError};
use crate::registers::{config, filter};
use crate::scaling;

/// Number of setup slots on the device.
pub const SETUP_COUNT: usize = 8;

/// Filter select bounds for FILTER_n.FS.
pub const FILTER_SELECT_MIN: u16 = 1;
pub const FILTER_SELECT_MAX: u16 = 2047;

/// Reference source selection (REF_SEL).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceSource {
    External1 = 0b00,
    External2 = 0b01,
    Internal = 0b10,
    Avdd = 0b11,
}

impl ReferenceSource {
    /// Nominal reference voltage used until the caller overrides it.
    pub fn default_volts(self) -> f64 {
        match self {
            ReferenceSource::Internal => 2.5,
            ReferenceSource::External1 | ReferenceSource::External2 => 2.5,
            ReferenceSource::Avdd => 3.3,
        }
    }
}

/// PGA gain settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gain {
    G1 = 0,
    G2 = 1,
    G4 = 2,
    G8 = 3,
    G16 = 4,
    G32 = 5,
    G64 = 6,
    G128 = 7,
}

impl Gain {
    pub fn factor(self) -> f64 {
        f64::from(1u8 << (self as u8))
    }
}

impl TryFrom<u8> for Gain {
    type Error = ConfigError;

    /// Accepts the multiplier (1, 2, 4 ... 128), not the register code.
    fn try_from(multiplier: u8) -> Result<Self, ConfigError> {
        Ok(match multiplier {
            1 => Gain::G1,
            2 => Gain::G2,
            4 => Gain::G4,
            8 => Gain::G8,
            16 => Gain::G16,
            32 => Gain::G32,
            64 => Gain::G64,
            128 => Gain::G128,
            other => return Err(ConfigError::InvalidGain(other)),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Polarity {
    Unipolar,
    Bipolar,
}

/// Sensor burnout current sources.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Burnout {
    #[default]
    Off = 0b00,
    Ua0p5 = 0b01,
    Ua2 = 0b10,
    Ua4 = 0b11,
}

/// Digital filter type (FILTER_n.FILTER).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FilterType {
    #[default]
    Sinc4 = 0b000,
    Sinc3 = 0b010,
    FastSinc4 = 0b100,
    FastSinc3 = 0b101,
    PostFilter = 0b111,
}

/// Post filter output rate, only used with [`FilterType::PostFilter`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PostFilter {
    Sps27 = 0b010,
    #[default]
    Sps25 = 0b011,
    Sps20 = 0b101,
    Sps16 = 0b110,
}

/// Filter portion of a setup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Filter {
    pub kind: FilterType,
    /// Output data rate select; smaller is faster and noisier.
    pub select: u16,
    pub post_filter: PostFilter,
    pub rej60: bool,
    pub single_cycle: bool,
}

impl Default for Filter {
    /// Power-on filter: sinc4, FS = 384.
    fn default() -> Self {
        Self {
            kind: FilterType::Sinc4,
            select: 384,
            post_filter: PostFilter::default(),
            rej60: false,
            single_cycle: false,
        }
    }
}

impl Filter {
    /// FILTER_n register value.
    pub fn register_value(&self) -> u32 {
        ((self.kind as u32) << filter::TYPE_SHIFT)
            | if self.rej60 { filter::REJ60 } else { 0 }
            | ((self.post_filter as u32) << filter::POST_FILTER_SHIFT)
            | if self.single_cycle { filter::SINGLE_CYCLE } else { 0 }
            | (u32::from(self.select) & filter::FS_MASK)
    }
}

/// A configured acquisition setup.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Setup {
    pub reference: ReferenceSource,
    pub reference_volts: f64,
    pub gain: Gain,
    pub polarity: Polarity,
    pub burnout: Burnout,
    pub ain_buffer: (bool, bool),
    pub ref_buffer: (bool, bool),
    pub filter: Filter,
}

impl Setup {
    pub fn new(reference: ReferenceSource, gain: Gain, polarity: Polarity) -> Self {
        Self {
            reference,
            reference_volts: reference.default_volts(),
            gain,
            polarity,
            burnout: Burnout::Off,
            ain_buffer: (true, true),
            ref_buffer: (false, false),
            filter: Filter::default(),
        }
    }

    /// CONFIG_n register value.
    pub fn config_register_value(&self) -> u32 {
        let flag = |on: bool, bit: u32| if on { bit } else { 0 };
        flag(self.polarity == Polarity::Bipolar, config::BIPOLAR)
            | ((self.burnout as u32) << config::BURNOUT_SHIFT)
            | flag(self.ref_buffer.0, config::REF_BUFP)
            | flag(self.ref_buffer.1, config::REF_BUFM)
            | flag(self.ain_buffer.0, config::AIN_BUFP)
            | flag(self.ain_buffer.1, config::AIN_BUFM)
            | ((self.reference as u32) << config::REF_SEL_SHIFT)
            | (self.gain as u32)
    }

    /// Scale a 24-bit conversion code taken with this setup to volts.
    pub fn code_to_volts(&self, code: u32) -> Result<f64, RangeError> {
        scaling::code_to_volts(
            code,
            scaling::CODE_BITS,
            self.polarity,
            self.reference_volts,
            self.gain.factor(),
        )
    }
}

/// Holds up to [`SETUP_COUNT`] setups; empty slots are "not configured".
#[derive(Clone, Debug, Default)]
pub struct SetupRegistry {
    slots: [Option<Setup>; SETUP_COUNT],
}

impl SetupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a setup index without requiring the slot to be configured.
    pub fn check_index(index: u8) -> Result<usize, ConfigError> {
        let i = usize::from(index);
        if i < SETUP_COUNT {
            Ok(i)
        } else {
            Err(ConfigError::InvalidSetup(index))
        }
    }

    /// Store (or overwrite) the setup at `index`. The filter is kept if the
    /// slot was already configured, otherwise it starts at the power-on default.
    pub fn set_config(
        &mut self,
        index: u8,
        reference: ReferenceSource,
        gain: Gain,
        polarity: Polarity,
    ) -> Result<&Setup, ConfigError> {
        let i = Self::check_index(index)?;
        let mut setup = Setup::new(reference, gain, polarity);
        if let Some(previous) = &self.slots[i] {
            setup.filter = previous.filter;
            setup.burnout = previous.burnout;
            setup.ain_buffer = previous.ain_buffer;
            setup.ref_buffer = previous.ref_buffer;
            if previous.reference == reference {
                setup.reference_volts = previous.reference_volts;
            }
        }
        Ok(&*self.slots[i].insert(setup))
    }

    /// Set the filter type and select value. Select values outside
    /// `FILTER_SELECT_MIN..=FILTER_SELECT_MAX` are rejected, never clamped.
    pub fn set_filter(&mut self, index: u8, kind: FilterType, select: u16) -> Result<&Setup, ConfigError> {
        if !(FILTER_SELECT_MIN..=FILTER_SELECT_MAX).contains(&select) {
            return Err(ConfigError::FilterSelectOutOfRange(select));
        }
        let setup = self.get_mut(index)?;
        setup.filter.kind = kind;
        setup.filter.select = select;
        Ok(&*setup)
    }

    pub fn set_filter_options(
        &mut self,
        index: u8,
        post_filter: PostFilter,
        rej60: bool,
        single_cycle: bool,
    ) -> Result<&Setup, ConfigError> {
        let setup = self.get_mut(index)?;
        setup.filter.post_filter = post_filter;
        setup.filter.rej60 = rej60;
        setup.filter.single_cycle = single_cycle;
        Ok(&*setup)
    }

    pub fn set_reference_voltage(&mut self, index: u8, volts: f64) -> Result<&Setup, ConfigError> {
        if !volts.is_finite() || volts <= 0.0 {
            return Err(ConfigError::InvalidReferenceVoltage(volts));
        }
        let setup = self.get_mut(index)?;
        setup.reference_volts = volts;
        Ok(&*setup)
    }

    pub fn set_burnout(&mut self, index: u8, burnout: Burnout) -> Result<&Setup, ConfigError> {
        let setup = self.get_mut(index)?;
        setup.burnout = burnout;
        Ok(&*setup)
    }

    pub fn set_buffers(
        &mut self,
        index: u8,
        ain_buffer: (bool, bool),
        ref_buffer: (bool, bool),
    ) -> Result<&Setup, ConfigError> {
        let setup = self.get_mut(index)?;
        setup.ain_buffer = ain_buffer;
        setup.ref_buffer = ref_buffer;
        Ok(&*setup)
    }

    /// The setup at `index`, or `SetupNotConfigured`.
    pub fn get(&self, index: u8) -> Result<&Setup, ConfigError> {
        let i = Self::check_index(index)?;
        self.slots[i].as_ref().ok_or(ConfigError::SetupNotConfigured(index))
    }

    /// Any configured setup references the internal 2.5 V source, so the
    /// reference must be powered.
    pub fn uses_internal_reference(&self) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|setup| setup.reference == ReferenceSource::Internal)
    }

    fn get_mut(&mut self, index: u8) -> Result<&mut Setup, ConfigError> {
        let i = Self::check_index(index)?;
        self.slots[i].as_mut().ok_or(ConfigError::SetupNotConfigured(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_setup_is_an_error() {
        let registry = SetupRegistry::new();
        assert_eq!(registry.get(3), Err(ConfigError::SetupNotConfigured(3)));
        assert_eq!(registry.get(8), Err(ConfigError::InvalidSetup(8)));
    }

    #[test]
    fn filter_select_out_of_range_is_rejected() {
        let mut registry = SetupRegistry::new();
        registry
            .set_config(0, ReferenceSource::Internal, Gain::G1, Polarity::Bipolar)
            .unwrap();

        assert_eq!(
            registry.set_filter(0, FilterType::Sinc3, 0).unwrap_err(),
            ConfigError::FilterSelectOutOfRange(0)
        );
        assert_eq!(
            registry.set_filter(0, FilterType::Sinc3, 2048).unwrap_err(),
            ConfigError::FilterSelectOutOfRange(2048)
        );
        // Rejected calls leave the stored filter untouched.
        assert_eq!(registry.get(0).unwrap().filter, Filter::default());

        let setup = registry.set_filter(0, FilterType::Sinc3, 2047).unwrap();
        assert_eq!(setup.filter.select, 2047);
        assert_eq!(setup.filter.kind, FilterType::Sinc3);
    }

    #[test]
    fn filter_needs_configured_setup() {
        let mut registry = SetupRegistry::new();
        assert_eq!(
            registry.set_filter(2, FilterType::Sinc4, 10).unwrap_err(),
            ConfigError::SetupNotConfigured(2)
        );
    }

    #[test]
    fn reconfiguring_keeps_filter() {
        let mut registry = SetupRegistry::new();
        registry
            .set_config(1, ReferenceSource::Internal, Gain::G1, Polarity::Bipolar)
            .unwrap();
        registry.set_filter(1, FilterType::FastSinc3, 17).unwrap();
        let setup = registry
            .set_config(1, ReferenceSource::Avdd, Gain::G128, Polarity::Unipolar)
            .unwrap();
        assert_eq!(setup.filter.select, 17);
        assert_eq!(setup.reference_volts, 3.3);
    }

    #[test]
    fn register_values() {
        let setup = Setup::new(ReferenceSource::Internal, Gain::G128, Polarity::Bipolar);
        // bipolar, AIN buffers, internal reference, gain code 7
        assert_eq!(setup.config_register_value(), 0x0800 | 0x0060 | 0x0010 | 0x0007);
        // FILTER_n power-on value
        assert_eq!(Filter::default().register_value(), 0x06_0180);
    }

    #[test]
    fn gain_from_multiplier() {
        assert_eq!(Gain::try_from(64), Ok(Gain::G64));
        assert_eq!(Gain::try_from(3), Err(ConfigError::InvalidGain(3)));
        assert_eq!(Gain::G16.factor(), 16.0);
    }

    #[test]
    fn reference_voltage_must_be_positive() {
        let mut registry = SetupRegistry::new();
        registry
            .set_config(0, ReferenceSource::External1, Gain::G1, Polarity::Unipolar)
            .unwrap();
        assert!(registry.set_reference_voltage(0, 0.0).is_err());
        assert!(registry.set_reference_voltage(0, f64::NAN).is_err());
        assert_eq!(registry.set_reference_voltage(0, 4.096).unwrap().reference_volts, 4.096);
    }
}
