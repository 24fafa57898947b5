//! In-process register bus emulating a converter wired to a pulse sensor
//!
//! The conversion register tracks a square wave between the two nominal
//! levels, with uniform noise and optional read failures. The config
//! register behaves like the real one, so `Ads1115::open` programs it and
//! the selected gain sets the code scale.

use super::ads1115::{encode_left_justified, BusError, Gain, RegisterBus, REG_CONFIG, REG_CONVERSION};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;

/// Power-on value of the config register
const CONFIG_POWER_ON: u16 = 0x8583;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationSettings {
    pub pulse_hz: f64,
    pub low_mv: f64,
    pub high_mv: f64,
    /// Peak uniform noise added to every reading
    pub noise_mv: f64,
    /// Probability that a conversion read fails
    pub failure_rate: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            pulse_hz: 20.0,
            low_mv: 0.0,
            high_mv: 5_000.0,
            noise_mv: 300.0,
            failure_rate: 0.0,
        }
    }
}

pub struct SimulatedBus {
    address: u8,
    config: u16,
    settings: SimulationSettings,
    started: Instant,
    rng: StdRng,
}

impl SimulatedBus {
    pub fn new(address: u8, settings: SimulationSettings) -> Self {
        Self::with_rng(address, settings, StdRng::from_entropy())
    }

    /// Deterministic noise and failures
    pub fn seeded(address: u8, settings: SimulationSettings, seed: u64) -> Self {
        Self::with_rng(address, settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(address: u8, settings: SimulationSettings, rng: StdRng) -> Self {
        Self {
            address,
            config: CONFIG_POWER_ON,
            settings,
            started: Instant::now(),
            rng,
        }
    }

    pub fn config_register(&self) -> u16 {
        self.config
    }

    fn millivolts_per_lsb(&self) -> f64 {
        Gain::from_bits(self.config >> 9)
            .unwrap_or(Gain::Fsr0_256)
            .millivolts_per_lsb()
    }

    /// Line level at `elapsed_secs` into the run, before noise
    pub fn level_at(&self, elapsed_secs: f64) -> f64 {
        if self.settings.pulse_hz <= 0.0 {
            return self.settings.low_mv;
        }
        let phase = (elapsed_secs * self.settings.pulse_hz).fract();
        if phase < 0.5 {
            self.settings.low_mv
        } else {
            self.settings.high_mv
        }
    }

    fn convert(&mut self) -> u16 {
        let mut millivolts = self.level_at(self.started.elapsed().as_secs_f64());
        if self.settings.noise_mv > 0.0 {
            millivolts += self.rng.gen_range(-self.settings.noise_mv..=self.settings.noise_mv);
        }

        let code = (millivolts / self.millivolts_per_lsb()).round();
        let code = code.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        encode_left_justified(code)
    }
}

impl RegisterBus for SimulatedBus {
    fn read_word(&mut self, address: u8, register: u8) -> Result<u16, BusError> {
        if address != self.address {
            return Err(BusError::Read {
                address,
                register,
                reason: "no device at address".to_string(),
            });
        }

        match register {
            REG_CONFIG => Ok(self.config),
            REG_CONVERSION => {
                if self.settings.failure_rate > 0.0 && self.rng.gen_bool(self.settings.failure_rate) {
                    return Err(BusError::Read {
                        address,
                        register,
                        reason: "simulated nack".to_string(),
                    });
                }
                Ok(self.convert())
            }
            _ => Ok(0),
        }
    }

    fn write_word(&mut self, address: u8, register: u8, value: u16) -> Result<(), BusError> {
        if address != self.address {
            return Err(BusError::Write {
                address,
                register,
                reason: "no device at address".to_string(),
            });
        }

        if register == REG_CONFIG {
            self.config = value;
        }
        Ok(())
    }
}
