//! AD7124 register map: addresses, widths and the bit fields the driver touches.

/// On-chip register, addressed through the communications register.
///
/// Indexed registers (`Channel`, `Config`, ...) mask their index to the
/// device range; callers validate indices before building one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Register {
    Status,
    AdcControl,
    Data,
    /// DATA read while `DATA_STATUS` is set: 24-bit code followed by the status byte.
    DataWithStatus,
    IoControl1,
    IoControl2,
    Id,
    Error,
    Channel(u8),
    Config(u8),
    Filter(u8),
    Offset(u8),
    Gain(u8),
}

impl Register {
    /// Register address as placed in the communications byte.
    pub fn address(self) -> u8 {
        match self {
            Register::Status => 0x00,
            Register::AdcControl => 0x01,
            Register::Data | Register::DataWithStatus => 0x02,
            Register::IoControl1 => 0x03,
            Register::IoControl2 => 0x04,
            Register::Id => 0x05,
            Register::Error => 0x06,
            Register::Channel(n) => 0x09 + (n & 0x0F),
            Register::Config(n) => 0x19 + (n & 0x07),
            Register::Filter(n) => 0x21 + (n & 0x07),
            Register::Offset(n) => 0x29 + (n & 0x07),
            Register::Gain(n) => 0x31 + (n & 0x07),
        }
    }

    /// Payload width in bytes.
    pub fn size(self) -> usize {
        match self {
            Register::Status | Register::Id => 1,
            Register::AdcControl
            | Register::IoControl2
            | Register::Channel(_)
            | Register::Config(_) => 2,
            Register::Data
            | Register::IoControl1
            | Register::Error
            | Register::Filter(_)
            | Register::Offset(_)
            | Register::Gain(_) => 3,
            Register::DataWithStatus => 4,
        }
    }
}

/// Communications register: read/write select.
pub const COMMS_READ: u8 = 0b0100_0000;
/// Communications register: address field.
pub const COMMS_ADDR_MASK: u8 = 0b0011_1111;

/// ADC_CONTROL bit fields.
pub mod adc_control {
    pub const DATA_STATUS: u32 = 1 << 10;
    pub const REF_EN: u32 = 1 << 8;
    pub const POWER_MODE_SHIFT: u32 = 6;
    pub const MODE_SHIFT: u32 = 2;
}

/// CHANNEL_n bit fields.
pub mod channel {
    pub const ENABLE: u32 = 1 << 15;
    pub const SETUP_SHIFT: u32 = 12;
    pub const AINP_SHIFT: u32 = 5;
}

/// CONFIG_n bit fields.
pub mod config {
    pub const BIPOLAR: u32 = 1 << 11;
    pub const BURNOUT_SHIFT: u32 = 9;
    pub const REF_BUFP: u32 = 1 << 8;
    pub const REF_BUFM: u32 = 1 << 7;
    pub const AIN_BUFP: u32 = 1 << 6;
    pub const AIN_BUFM: u32 = 1 << 5;
    pub const REF_SEL_SHIFT: u32 = 3;
}

/// FILTER_n bit fields.
pub mod filter {
    pub const TYPE_SHIFT: u32 = 21;
    pub const REJ60: u32 = 1 << 20;
    pub const POST_FILTER_SHIFT: u32 = 17;
    pub const SINGLE_CYCLE: u32 = 1 << 16;
    pub const FS_MASK: u32 = 0x7FF;
}

/// IO_CONTROL_1 bit fields.
pub mod io_control {
    pub const PDSW: u32 = 1 << 15;
    pub const IOUT1_SHIFT: u32 = 11;
    pub const IOUT0_SHIFT: u32 = 8;
    pub const IOUT1_CH_SHIFT: u32 = 4;
    pub const IOUT0_CH_SHIFT: u32 = 0;
}

/// Status byte, as read from STATUS or appended to DATA.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Status(pub u8);

impl Status {
    const NOT_READY: u8 = 0b1000_0000;
    const ERROR_FLAG: u8 = 0b0100_0000;
    const CH_ACTIVE_MASK: u8 = 0b0000_1111;

    /// A new conversion result is waiting in DATA (RDY is active low).
    pub fn ready(self) -> bool {
        self.0 & Self::NOT_READY == 0
    }

    /// The device flagged an error for this conversion (see the ERROR register).
    pub fn error(self) -> bool {
        self.0 & Self::ERROR_FLAG != 0
    }

    /// Channel whose conversion produced the current DATA contents.
    pub fn channel(self) -> u8 {
        self.0 & Self::CH_ACTIVE_MASK
    }
}
