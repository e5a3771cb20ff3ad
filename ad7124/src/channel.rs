//! Channel table and pin-level properties (bias voltage, excitation current).
//!
//! Bias and excitation belong to pins, not channels: remapping a channel to
//! different pins never moves or drops a pin's bias state.

use crate::error::ConfigError;
use crate::registers::{channel, io_control};
use crate::setup::SetupRegistry;

/// Number of channel slots on the device.
pub const CHANNEL_COUNT: usize = 16;

/// Analog input multiplexer selections (AINP/AINM fields).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InputPin {
    Ain0 = 0,
    Ain1 = 1,
    Ain2 = 2,
    Ain3 = 3,
    Ain4 = 4,
    Ain5 = 5,
    Ain6 = 6,
    Ain7 = 7,
    Ain8 = 8,
    Ain9 = 9,
    Ain10 = 10,
    Ain11 = 11,
    Ain12 = 12,
    Ain13 = 13,
    Ain14 = 14,
    Ain15 = 15,
    /// On-die temperature sensor.
    Temp = 16,
    Avss = 17,
    /// Internal reference.
    Ref = 18,
    Dgnd = 19,
    Avdd6P = 20,
    Avdd6M = 21,
    Iovdd6P = 22,
    Iovdd6M = 23,
    Aldo6P = 24,
    Aldo6M = 25,
    Dldo6P = 26,
    Dldo6M = 27,
    V20mVP = 28,
    V20mVM = 29,
}

impl InputPin {
    const ALL: [InputPin; 30] = [
        InputPin::Ain0,
        InputPin::Ain1,
        InputPin::Ain2,
        InputPin::Ain3,
        InputPin::Ain4,
        InputPin::Ain5,
        InputPin::Ain6,
        InputPin::Ain7,
        InputPin::Ain8,
        InputPin::Ain9,
        InputPin::Ain10,
        InputPin::Ain11,
        InputPin::Ain12,
        InputPin::Ain13,
        InputPin::Ain14,
        InputPin::Ain15,
        InputPin::Temp,
        InputPin::Avss,
        InputPin::Ref,
        InputPin::Dgnd,
        InputPin::Avdd6P,
        InputPin::Avdd6M,
        InputPin::Iovdd6P,
        InputPin::Iovdd6M,
        InputPin::Aldo6P,
        InputPin::Aldo6M,
        InputPin::Dldo6P,
        InputPin::Dldo6M,
        InputPin::V20mVP,
        InputPin::V20mVM,
    ];

    /// The external analog input number, for `Ain0..Ain15`.
    pub fn analog_input(self) -> Option<u8> {
        let n = self as u8;
        (n < 16).then_some(n)
    }
}

impl TryFrom<u8> for InputPin {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, ConfigError> {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(ConfigError::InvalidPin(value))
    }
}

/// One entry of the channel table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelDef {
    pub enabled: bool,
    pub setup: u8,
    pub positive: InputPin,
    pub negative: InputPin,
}

impl ChannelDef {
    /// CHANNEL_n register value with the enable bit forced to `enabled`.
    pub fn register_value(&self, enabled: bool) -> u32 {
        (if enabled { channel::ENABLE } else { 0 })
            | (u32::from(self.setup) << channel::SETUP_SHIFT)
            | ((self.positive as u32) << channel::AINP_SHIFT)
            | (self.negative as u32)
    }
}

/// Holds up to [`CHANNEL_COUNT`] channel definitions.
#[derive(Clone, Debug, Default)]
pub struct ChannelTable {
    slots: [Option<ChannelDef>; CHANNEL_COUNT],
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_index(index: u8) -> Result<usize, ConfigError> {
        let i = usize::from(index);
        if i < CHANNEL_COUNT {
            Ok(i)
        } else {
            Err(ConfigError::InvalidChannel(index))
        }
    }

    /// Define a channel. The setup must already be configured in `setups`.
    pub fn set_channel(
        &mut self,
        setups: &SetupRegistry,
        index: u8,
        setup: u8,
        positive: InputPin,
        negative: InputPin,
        enabled: bool,
    ) -> Result<&ChannelDef, ConfigError> {
        let i = Self::check_index(index)?;
        setups.get(setup)?;
        Ok(&*self.slots[i].insert(ChannelDef { enabled, setup, positive, negative }))
    }

    pub fn enable(&mut self, index: u8, enabled: bool) -> Result<&ChannelDef, ConfigError> {
        let i = Self::check_index(index)?;
        let def = self.slots[i].as_mut().ok_or(ConfigError::ChannelNotConfigured(index))?;
        def.enabled = enabled;
        Ok(&*def)
    }

    pub fn get(&self, index: u8) -> Result<&ChannelDef, ConfigError> {
        let i = Self::check_index(index)?;
        self.slots[i].as_ref().ok_or(ConfigError::ChannelNotConfigured(index))
    }

    /// Enabled channels in hardware sequence order (ascending index).
    pub fn enabled(&self) -> Vec<u8> {
        self.iter().filter(|(_, def)| def.enabled).map(|(i, _)| i).collect()
    }

    /// Configured channels with their index.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &ChannelDef)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|def| (i as u8, def)))
    }
}

/// VBIAS state for `Ain0..Ain15`, mirrored into IO_CONTROL_2.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BiasMap {
    bits: u16,
}

impl BiasMap {
    pub fn set(&mut self, pin: InputPin, enabled: bool) -> Result<(), ConfigError> {
        let n = pin.analog_input().ok_or(ConfigError::BiasUnsupported(pin))?;
        if enabled {
            self.bits |= 1 << n;
        } else {
            self.bits &= !(1 << n);
        }
        Ok(())
    }

    pub fn is_set(&self, pin: InputPin) -> bool {
        pin.analog_input().is_some_and(|n| self.bits & (1 << n) != 0)
    }

    /// IO_CONTROL_2 register value.
    pub fn register_value(&self) -> u32 {
        u32::from(self.bits)
    }
}

/// Excitation current magnitude for IOUT0/IOUT1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExcitationCurrent {
    #[default]
    Off = 0,
    Ua50 = 1,
    Ua100 = 2,
    Ua250 = 3,
    Ua500 = 4,
    Ua750 = 5,
    Ua1000 = 6,
}

/// Which of the two excitation current sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CurrentSource {
    Iout0,
    Iout1,
}

/// IO_CONTROL_1 contents: excitation currents and the bridge power switch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoControl {
    pub power_switch: bool,
    pub iout0: (ExcitationCurrent, u8),
    pub iout1: (ExcitationCurrent, u8),
}

impl IoControl {
    pub fn set_current(
        &mut self,
        source: CurrentSource,
        pin: InputPin,
        current: ExcitationCurrent,
    ) -> Result<(), ConfigError> {
        let n = pin.analog_input().ok_or(ConfigError::ExcitationUnsupported(pin))?;
        match source {
            CurrentSource::Iout0 => self.iout0 = (current, n),
            CurrentSource::Iout1 => self.iout1 = (current, n),
        }
        Ok(())
    }

    /// IO_CONTROL_1 register value.
    pub fn register_value(&self) -> u32 {
        (if self.power_switch { io_control::PDSW } else { 0 })
            | ((self.iout1.0 as u32) << io_control::IOUT1_SHIFT)
            | ((self.iout0.0 as u32) << io_control::IOUT0_SHIFT)
            | (u32::from(self.iout1.1) << io_control::IOUT1_CH_SHIFT)
            | (u32::from(self.iout0.1) << io_control::IOUT0_CH_SHIFT)
    }
}
