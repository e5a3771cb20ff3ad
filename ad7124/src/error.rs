//! Error types for the AD7124 driver.

use std::time::Duration;
use thiserror::Error;

/// Errors for the AD7124 driver, generic over the bus transport error.
#[derive(Error, Debug)]
pub enum Error<E> {
    #[error("bus transport error: {0:?}")]
    Transport(E),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("data-ready not observed within {waited:?}")]
    Timeout { waited: Duration },
    #[error("conversion result tagged for channel {got}, expected channel {expected}")]
    Framing { expected: u8, got: u8 },
    #[error("continuous acquisition desynchronized after {discards} discarded batches")]
    Desync { discards: u32 },
    #[error("scaling input out of range: {0}")]
    Range(#[from] RangeError),
    #[error("device flagged the conversion on channel {channel} as invalid")]
    InvalidReading { channel: u8 },
    #[error("read cancelled by caller")]
    Cancelled,
}

/// Caller errors detected before any bus transaction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("setup index {0} outside 0..8")]
    InvalidSetup(u8),
    #[error("channel index {0} outside 0..16")]
    InvalidChannel(u8),
    #[error("setup {0} has not been configured")]
    SetupNotConfigured(u8),
    #[error("channel {0} has not been configured")]
    ChannelNotConfigured(u8),
    #[error("gain {0} is not a supported PGA multiplier")]
    InvalidGain(u8),
    #[error("{0} is not a valid analog input")]
    InvalidPin(u8),
    #[error("filter select {0} outside 1..=2047")]
    FilterSelectOutOfRange(u16),
    #[error("reference voltage {0} V is not usable")]
    InvalidReferenceVoltage(f64),
    #[error("pin {0:?} has no bias generator")]
    BiasUnsupported(crate::channel::InputPin),
    #[error("pin {0:?} cannot source excitation current")]
    ExcitationUnsupported(crate::channel::InputPin),
    #[error("channel {0} is not wired to the on-die temperature sensor (Temp/Avss)")]
    NotTemperatureSensor(u8),
    #[error("channel {0} requested more than once")]
    DuplicateChannel(u8),
    #[error("{channels} channels requested but result buffer holds {slots}")]
    BufferMismatch { channels: usize, slots: usize },
    #[error("no channels requested")]
    EmptyRequest,
    #[error("channel {0} is not enabled in the continuous sequence")]
    NotInSequence(u8),
    #[error("continuous conversion needs at least one enabled channel")]
    NoEnabledChannels,
    #[error("configuration cannot change while continuous conversion is running")]
    Busy,
    #[error("no acquisition mode is active")]
    NotAcquiring,
}

/// Scaling inputs outside the characterized domain.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RangeError {
    #[error("code {code:#x} does not fit in {bits} bits")]
    CodeOutOfRange { code: u32, bits: u8 },
    #[error("bridge excitation voltage {0} V")]
    ZeroExcitation(f64),
    #[error("bridge rated output {0} mV/V")]
    InvalidBridge(f64),
    #[error("{quantity} {value} outside the characterized range of type {kind:?}")]
    ThermocoupleOutOfRange {
        kind: crate::scaling::ThermocoupleType,
        quantity: &'static str,
        value: f64,
    },
}
