//! Conversion session: operating mode, controller state and the expected
//! position inside the device's free-running channel sequence.
//!
//! The hardware sequencer cannot be rewound or queried directly, only
//! observed through the channel tag on each conversion result. The session
//! keeps its own expected position and checks every tag against it.

/// Device operating modes selectable through [`crate::Ad7124::set_mode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatingMode {
    Continuous,
    Single,
    Standby,
    PowerDown,
    Idle,
}

impl OperatingMode {
    /// ADC_CONTROL.MODE field.
    pub(crate) fn bits(self) -> u32 {
        match self {
            OperatingMode::Continuous => 0,
            OperatingMode::Single => 1,
            OperatingMode::Standby => 2,
            OperatingMode::PowerDown => 3,
            OperatingMode::Idle => 4,
        }
    }
}

/// Calibration modes; each runs once on a single channel and leaves the device idle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Calibration {
    InternalOffset,
    InternalGain,
    SystemOffset,
    SystemGain,
}

impl Calibration {
    pub(crate) fn bits(self) -> u32 {
        match self {
            Calibration::InternalOffset => 5,
            Calibration::InternalGain => 6,
            Calibration::SystemOffset => 7,
            Calibration::SystemGain => 8,
        }
    }
}

/// ADC_CONTROL.POWER_MODE.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PowerMode {
    #[default]
    Low = 0b00,
    Mid = 0b01,
    Full = 0b10,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    ConfiguringMode,
    SingleShotTriggered,
    SingleShotWaiting,
    ContinuousRunning,
    PowerDown,
}

/// Result of checking one channel tag against the expected sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Observation {
    /// The tag is the one the session expected, at this sequence position.
    InStep(usize),
    /// The tag belongs to the sequence but not where expected; the session
    /// has realigned to this position.
    Jumped(usize),
    /// The tag is not part of the sequence at all.
    Foreign,
}

#[derive(Clone, Debug, Default)]
pub struct ConversionSession {
    mode: Option<OperatingMode>,
    power: PowerMode,
    reference_enable: bool,
    state: SessionState,
    sequence: Vec<u8>,
    position: Option<usize>,
    stale_conversion: bool,
    framing_discards: u32,
}

impl ConversionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Option<OperatingMode> {
        self.mode
    }

    pub fn power(&self) -> PowerMode {
        self.power
    }

    pub fn reference_enable(&self) -> bool {
        self.reference_enable
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Channels the device cycles through in continuous mode, in order.
    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    /// Channel the session expects to see next, once aligned.
    pub fn expected_next(&self) -> Option<u8> {
        self.position.map(|p| self.sequence[p])
    }

    /// A cancelled single-shot conversion is still pending on the device.
    pub fn stale_conversion(&self) -> bool {
        self.stale_conversion
    }

    /// Batches thrown away for framing since the session started.
    pub fn framing_discards(&self) -> u32 {
        self.framing_discards
    }

    /// Start a fresh session; everything from the previous one is dropped.
    pub(crate) fn begin(&mut self, mode: OperatingMode, power: PowerMode, reference_enable: bool, sequence: Vec<u8>) {
        *self = Self {
            mode: Some(mode),
            power,
            reference_enable,
            state: SessionState::ConfiguringMode,
            sequence,
            ..Self::default()
        };
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub(crate) fn mark_stale(&mut self, stale: bool) {
        self.stale_conversion = stale;
    }

    pub(crate) fn count_discard(&mut self) {
        self.framing_discards += 1;
    }

    /// Forget the sequence position, e.g. after a timeout.
    pub(crate) fn lose_alignment(&mut self) {
        self.position = None;
    }

    /// Check a sample's channel tag against the sequence and advance.
    pub(crate) fn observe(&mut self, tag: u8) -> Observation {
        let len = self.sequence.len();
        if let Some(p) = self.position {
            if self.sequence[p] == tag {
                self.position = Some((p + 1) % len);
                return Observation::InStep(p);
            }
        }
        match self.sequence.iter().position(|&c| c == tag) {
            Some(p) => {
                self.position = Some((p + 1) % len);
                Observation::Jumped(p)
            }
            None => {
                self.position = None;
                Observation::Foreign
            }
        }
    }
}
