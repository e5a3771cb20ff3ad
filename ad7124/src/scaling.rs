//! Scaling engine: pure conversions from raw codes to volts and from volts
//! to physical units. Nothing here touches the bus.

mod thermocouple;

pub use thermocouple::ThermocoupleType;

use crate::error::RangeError;
use crate::setup::Polarity;

/// Conversion result width of the AD7124.
pub const CODE_BITS: u8 = 24;

/// IC temperature sensor: codes per °C and offset, bipolar at gain 1.
const TEMP_CODES_PER_C: f64 = 13584.0;
const TEMP_OFFSET_C: f64 = 272.5;
const TEMP_MID_SCALE: f64 = 8_388_608.0;

fn check_code(code: u32, bits: u8) -> Result<u64, RangeError> {
    let full = 1u64 << bits;
    if u64::from(code) >= full {
        return Err(RangeError::CodeOutOfRange { code, bits });
    }
    Ok(full)
}

/// Convert a raw `bits`-wide code to volts at the ADC input.
///
/// Bipolar codes are offset binary around mid-scale (`2^(bits-1)` is 0 V);
/// unipolar codes span `0..2^bits` from 0 V to full scale.
pub fn code_to_volts(
    code: u32,
    bits: u8,
    polarity: Polarity,
    reference_volts: f64,
    gain: f64,
) -> Result<f64, RangeError> {
    let full = check_code(code, bits)? as f64;
    let code = f64::from(code);
    let volts = match polarity {
        Polarity::Bipolar => {
            let half = full / 2.0;
            (code - half) / half * reference_volts / gain
        }
        Polarity::Unipolar => code / full * reference_volts / gain,
    };
    Ok(volts)
}

/// Inverse of [`code_to_volts`], saturating at the code range like the device does.
pub fn volts_to_code(volts: f64, bits: u8, polarity: Polarity, reference_volts: f64, gain: f64) -> u32 {
    let full = (1u64 << bits) as f64;
    let code = match polarity {
        Polarity::Bipolar => {
            let half = full / 2.0;
            volts * gain / reference_volts * half + half
        }
        Polarity::Unipolar => volts * gain / reference_volts * full,
    };
    code.round().clamp(0.0, full - 1.0) as u32
}

/// On-die temperature sensor reading in °C. Takes the raw code (bipolar,
/// gain 1), not a voltage.
pub fn ic_temperature(code: u32) -> Result<f64, RangeError> {
    check_code(code, CODE_BITS)?;
    Ok((f64::from(code) - TEMP_MID_SCALE) / TEMP_CODES_PER_C - TEMP_OFFSET_C)
}

/// Ratiometric full-bridge sensor (load cell, pressure bridge).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FullBridge {
    /// Rated output at capacity, in mV per V of excitation.
    pub rated_output_mv_per_v: f64,
    /// Physical quantity at rated output (e.g. kg, N).
    pub capacity: f64,
}

/// Convert a differential bridge voltage to the bridge's physical quantity.
pub fn full_bridge(volts: f64, excitation_volts: f64, bridge: &FullBridge) -> Result<f64, RangeError> {
    if !excitation_volts.is_finite() || excitation_volts == 0.0 {
        return Err(RangeError::ZeroExcitation(excitation_volts));
    }
    if !bridge.rated_output_mv_per_v.is_finite() || bridge.rated_output_mv_per_v == 0.0 {
        return Err(RangeError::InvalidBridge(bridge.rated_output_mv_per_v));
    }
    let mv_per_v = volts * 1000.0 / excitation_volts;
    Ok(mv_per_v / bridge.rated_output_mv_per_v * bridge.capacity)
}

/// Cold-junction compensated thermocouple temperature in °C.
///
/// `volts` is the measured junction voltage; `cold_junction_c` is the
/// temperature of the reference junction (usually the IC sensor).
pub fn thermocouple(volts: f64, cold_junction_c: f64, kind: ThermocoupleType) -> Result<f64, RangeError> {
    let cold_mv = kind.millivolts(cold_junction_c)?;
    kind.celsius(volts * 1000.0 + cold_mv)
}
