//! Register transport. The controller only ever talks to the device through
//! [`RegisterBus`]; [`SpiBus`] implements it over an `embedded-hal` SPI device.

use embedded_hal::spi::SpiDevice;

use crate::registers::{Register, COMMS_ADDR_MASK, COMMS_READ};

/// Register-level access to the device.
pub trait RegisterBus {
    type Error: core::fmt::Debug;

    /// Write `value` (right-aligned, register width) to `reg`.
    fn write_register(&mut self, reg: Register, value: u32) -> Result<(), Self::Error>;

    /// Read `reg`, right-aligned to its width.
    fn read_register(&mut self, reg: Register) -> Result<u32, Self::Error>;

    /// Serial interface reset: all registers return to their power-on values.
    fn reset(&mut self) -> Result<(), Self::Error>;
}

/// AD7124 over SPI. The device must be in SPI mode 3.
pub struct SpiBus<SPI> {
    spi: SPI,
}

impl<SPI: SpiDevice> SpiBus<SPI> {
    pub fn new(spi: SPI) -> Self {
        spi.into()
    }

    /// Give the SPI device back.
    pub fn release(self) -> SPI {
        self.spi
    }
}

impl<SPI: SpiDevice> From<SPI> for SpiBus<SPI> {
    fn from(spi: SPI) -> Self {
        Self { spi }
    }
}

impl<SPI: SpiDevice> RegisterBus for SpiBus<SPI> {
    type Error = SPI::Error;

    fn write_register(&mut self, reg: Register, value: u32) -> Result<(), Self::Error> {
        let size = reg.size();
        let mut frame = [0u8; 5];
        frame[0] = reg.address() & COMMS_ADDR_MASK;
        frame[1..=size].copy_from_slice(&value.to_be_bytes()[4 - size..]);
        self.spi.write(&frame[..=size])
    }

    fn read_register(&mut self, reg: Register) -> Result<u32, Self::Error> {
        let size = reg.size();
        let mut frame = [0u8; 5];
        frame[0] = COMMS_READ | (reg.address() & COMMS_ADDR_MASK);
        self.spi.transfer_in_place(&mut frame[..=size])?;
        Ok(frame[1..=size]
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
    }

    fn reset(&mut self) -> Result<(), Self::Error> {
        // 64 SCLK cycles with DIN high
        self.spi.write(&[0xFF; 8])
    }
}
