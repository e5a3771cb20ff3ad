//! NIST ITS-90 thermocouple reference functions.
//!
//! Forward functions map °C to mV, inverse functions map mV to °C. Each band
//! is only valid over its characterized span; nothing is extrapolated.

use crate::error::RangeError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThermocoupleType {
    J,
    K,
    T,
}

struct Band {
    lo: f64,
    hi: f64,
    coeffs: &'static [f64],
}

impl Band {
    fn contains(&self, x: f64) -> bool {
        (self.lo..=self.hi).contains(&x)
    }

    fn eval(&self, x: f64) -> f64 {
        self.coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
    }
}

// Type K, forward (°C -> mV).
static K_FORWARD: [Band; 2] = [
    Band {
        lo: -270.0,
        hi: 0.0,
        coeffs: &[
            0.0,
            3.945_012_802_5e-2,
            2.362_237_359_8e-5,
            -3.285_890_678_4e-7,
            -4.990_482_877_7e-9,
            -6.750_905_917_3e-11,
            -5.741_032_742_8e-13,
            -3.108_887_289_4e-15,
            -1.045_160_936_5e-17,
            -1.988_926_687_8e-20,
            -1.632_269_748_6e-23,
        ],
    },
    Band {
        lo: 0.0,
        hi: 1372.0,
        coeffs: &[
            -1.760_041_368_6e-2,
            3.892_120_497_5e-2,
            1.855_877_003_2e-5,
            -9.945_759_287_4e-8,
            3.184_094_571_9e-10,
            -5.607_284_488_9e-13,
            5.607_505_905_9e-16,
            -3.202_072_000_3e-19,
            9.715_114_715_2e-23,
            -1.210_472_127_5e-26,
        ],
    },
];

// Exponential term of the type K forward function above 0 °C.
const K_A0: f64 = 1.185_976e-1;
const K_A1: f64 = -1.183_432e-4;
const K_A2: f64 = 126.9686;

// Type K, inverse (mV -> °C).
static K_INVERSE: [Band; 3] = [
    Band {
        lo: -5.891,
        hi: 0.0,
        coeffs: &[
            0.0,
            2.517_346_2e1,
            -1.166_287_8,
            -1.083_363_8,
            -8.977_354_0e-1,
            -3.734_237_7e-1,
            -8.663_264_3e-2,
            -1.045_059_8e-2,
            -5.192_057_7e-4,
        ],
    },
    Band {
        lo: 0.0,
        hi: 20.644,
        coeffs: &[
            0.0,
            2.508_355e1,
            7.860_106e-2,
            -2.503_131e-1,
            8.315_270e-2,
            -1.228_034e-2,
            9.804_036e-4,
            -4.413_030e-5,
            1.057_734e-6,
            -1.052_755e-8,
        ],
    },
    Band {
        lo: 20.644,
        hi: 54.886,
        coeffs: &[
            -1.318_058e2,
            4.830_222e1,
            -1.646_031,
            5.464_731e-2,
            -9.650_715e-4,
            8.802_193e-6,
            -3.110_810e-8,
        ],
    },
];

static J_FORWARD: [Band; 1] = [Band {
    lo: -210.0,
    hi: 760.0,
    coeffs: &[
        0.0,
        5.038_118_781_5e-2,
        3.047_583_693_0e-5,
        -8.568_106_572_0e-8,
        1.322_819_529_5e-10,
        -1.705_295_833_7e-13,
        2.094_809_069_7e-16,
        -1.253_839_533_6e-19,
        1.563_172_569_7e-23,
    ],
}];

static J_INVERSE: [Band; 2] = [
    Band {
        lo: -8.095,
        hi: 0.0,
        coeffs: &[
            0.0,
            1.952_826_8e1,
            -1.228_618_5,
            -1.075_217_8,
            -5.908_693_3e-1,
            -1.725_671_3e-1,
            -2.813_151_3e-2,
            -2.396_337_0e-3,
            -8.382_332_1e-5,
        ],
    },
    Band {
        lo: 0.0,
        hi: 42.919,
        coeffs: &[
            0.0,
            1.978_425e1,
            -2.001_204e-1,
            1.036_969e-2,
            -2.549_687e-4,
            3.585_153e-6,
            -5.344_285e-8,
            5.099_890e-10,
        ],
    },
];

static T_FORWARD: [Band; 2] = [
    Band {
        lo: -270.0,
        hi: 0.0,
        coeffs: &[
            0.0,
            3.874_810_636_4e-2,
            4.419_443_434_7e-5,
            1.184_432_310_5e-7,
            2.003_297_355_4e-8,
            9.013_801_955_9e-10,
            2.265_115_659_3e-11,
            3.607_115_420_5e-13,
            3.849_393_988_3e-15,
            2.821_352_192_5e-17,
            1.425_159_477_9e-19,
            4.876_866_228_6e-22,
            1.079_553_927_0e-24,
            1.394_502_706_2e-27,
            7.979_515_392_7e-31,
        ],
    },
    Band {
        lo: 0.0,
        hi: 400.0,
        coeffs: &[
            0.0,
            3.874_810_636_4e-2,
            3.329_222_788_0e-5,
            2.061_824_340_4e-7,
            -2.188_225_684_6e-9,
            1.099_688_092_8e-11,
            -3.081_575_877_2e-14,
            4.547_913_529_0e-17,
            -2.751_290_167_3e-20,
        ],
    },
];

static T_INVERSE: [Band; 2] = [
    Band {
        lo: -5.603,
        hi: 0.0,
        coeffs: &[
            0.0,
            2.594_919_2e1,
            -2.131_696_7e-1,
            7.901_869_2e-1,
            4.252_777_7e-1,
            1.330_447_3e-1,
            2.024_144_6e-2,
            1.266_817_1e-3,
        ],
    },
    Band {
        lo: 0.0,
        hi: 20.872,
        coeffs: &[
            0.0,
            2.592_800e1,
            -7.602_961e-1,
            4.637_791e-2,
            -2.165_394e-3,
            6.048_144e-5,
            -7.293_422e-7,
        ],
    },
];

impl ThermocoupleType {
    fn forward_bands(self) -> &'static [Band] {
        match self {
            ThermocoupleType::J => &J_FORWARD,
            ThermocoupleType::K => &K_FORWARD,
            ThermocoupleType::T => &T_FORWARD,
        }
    }

    fn inverse_bands(self) -> &'static [Band] {
        match self {
            ThermocoupleType::J => &J_INVERSE,
            ThermocoupleType::K => &K_INVERSE,
            ThermocoupleType::T => &T_INVERSE,
        }
    }

    /// Thermoelectric voltage in mV for a junction at `celsius` (0 °C reference).
    pub fn millivolts(self, celsius: f64) -> Result<f64, RangeError> {
        let band = find(self.forward_bands(), celsius).ok_or(RangeError::ThermocoupleOutOfRange {
            kind: self,
            quantity: "temperature °C",
            value: celsius,
        })?;
        let mut mv = band.eval(celsius);
        if self == ThermocoupleType::K && celsius > 0.0 {
            mv += K_A0 * (K_A1 * (celsius - K_A2).powi(2)).exp();
        }
        Ok(mv)
    }

    /// Junction temperature in °C for a thermoelectric voltage in mV (0 °C reference).
    pub fn celsius(self, millivolts: f64) -> Result<f64, RangeError> {
        find(self.inverse_bands(), millivolts)
            .map(|band| band.eval(millivolts))
            .ok_or(RangeError::ThermocoupleOutOfRange {
                kind: self,
                quantity: "EMF mV",
                value: millivolts,
            })
    }
}

fn find(bands: &'static [Band], x: f64) -> Option<&'static Band> {
    bands.iter().find(|band| band.contains(x))
}
