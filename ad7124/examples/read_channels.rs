use ad7124::{
    Ad7124, Gain, InputPin, OperatingMode, Polarity, PowerMode, Reading, ReferenceSource, SpiBus, ThermocoupleType,
};
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::{Delay, SpidevDevice};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut spi = SpidevDevice::open("/dev/spidev0.0")?;
    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(1_000_000)
        .mode(SpiModeFlags::SPI_MODE_3)
        .build();
    spi.configure(&options)?;

    let mut adc = Ad7124::new(SpiBus::new(spi), Delay);
    let id = adc.init()?;
    println!("Device ID: {id:#04x}");

    // Setup 0: thermocouple, setup 1: on-die sensor.
    adc.set_config(0, ReferenceSource::Internal, Gain::G128, Polarity::Bipolar)?;
    adc.set_config(1, ReferenceSource::Internal, Gain::G1, Polarity::Bipolar)?;
    adc.set_channel(0, 0, InputPin::Ain0, InputPin::Ain1, true)?;
    adc.set_channel(1, 1, InputPin::Temp, InputPin::Avss, true)?;
    adc.set_bias(InputPin::Ain1, true)?;

    adc.set_mode(OperatingMode::Single, PowerMode::Full)?;
    let mut readings = [Reading::default(); 2];
    adc.read_raw_batch(&[0, 1], &mut readings)?;
    for reading in &readings {
        println!("Channel {}: {:#08x} (valid: {})", reading.channel, reading.code, reading.valid);
    }

    let temp = adc.read_thermocouple_ic_compensated(0, 1, ThermocoupleType::K)?;
    println!("Thermocouple: {temp:.2} °C");
    Ok(())
}
