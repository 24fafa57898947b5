//! ADS1115-style converter driver over a 16-bit register bus
//!
//! Register map used here:
//! - `0x00` conversion register (signed, left-justified 12-bit code)
//! - `0x01` config register
//!   - bits 14..12 input multiplexer
//!   - bits 11..9  programmable gain
//!   - bit  8      mode (0 = continuous)
//!   - bits 7..5   data rate

use super::config::ConfigError;
use super::sampler::{AnalogSource, SourceError};
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_ADDRESS: u8 = 0x48;
pub const REG_CONVERSION: u8 = 0x00;
pub const REG_CONFIG: u8 = 0x01;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus read failed at 0x{address:02x}/0x{register:02x}: {reason}")]
    Read {
        address: u8,
        register: u8,
        reason: String,
    },
    #[error("bus write failed at 0x{address:02x}/0x{register:02x}: {reason}")]
    Write {
        address: u8,
        register: u8,
        reason: String,
    },
    #[error("bus unavailable: {0}")]
    Unavailable(String),
}

/// Word-oriented access to device registers
pub trait RegisterBus: Send {
    fn read_word(&mut self, address: u8, register: u8) -> Result<u16, BusError>;

    fn write_word(&mut self, address: u8, register: u8, value: u16) -> Result<(), BusError>;
}

/// Read-modify-write of a bit field whose most significant bit is `bit_start`
///
/// Bits outside the field keep their current value.
pub fn write_bits<B: RegisterBus + ?Sized>(
    bus: &mut B,
    address: u8,
    register: u8,
    bit_start: u8,
    length: u8,
    value: u16,
) -> Result<(), BusError> {
    debug_assert!(length >= 1 && length <= bit_start + 1 && bit_start < 16);

    let current = bus.read_word(address, register)?;
    let shift = bit_start + 1 - length;
    let mask = (((1u32 << length) - 1) << shift) as u16;

    let updated = (current & !mask) | ((value << shift) & mask);
    bus.write_word(address, register, updated)
}

/// Programmable gain (full-scale range)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gain {
    Fsr6_144,
    Fsr4_096,
    Fsr2_048,
    Fsr1_024,
    Fsr0_512,
    Fsr0_256,
}

impl Gain {
    pub fn bits(&self) -> u16 {
        match self {
            Gain::Fsr6_144 => 0b000,
            Gain::Fsr4_096 => 0b001,
            Gain::Fsr2_048 => 0b010,
            Gain::Fsr1_024 => 0b011,
            Gain::Fsr0_512 => 0b100,
            Gain::Fsr0_256 => 0b101,
        }
    }

    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits & 0b111 {
            0b000 => Some(Gain::Fsr6_144),
            0b001 => Some(Gain::Fsr4_096),
            0b010 => Some(Gain::Fsr2_048),
            0b011 => Some(Gain::Fsr1_024),
            0b100 => Some(Gain::Fsr0_512),
            0b101 => Some(Gain::Fsr0_256),
            _ => None,
        }
    }

    /// Scale of one 12-bit code at this range
    pub fn millivolts_per_lsb(&self) -> f64 {
        match self {
            Gain::Fsr6_144 => 3.0,
            Gain::Fsr4_096 => 2.0,
            Gain::Fsr2_048 => 1.0,
            Gain::Fsr1_024 => 0.5,
            Gain::Fsr0_512 => 0.25,
            Gain::Fsr0_256 => 0.125,
        }
    }
}

impl FromStr for Gain {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "6.144" => Ok(Gain::Fsr6_144),
            "4.096" => Ok(Gain::Fsr4_096),
            "2.048" => Ok(Gain::Fsr2_048),
            "1.024" => Ok(Gain::Fsr1_024),
            "0.512" => Ok(Gain::Fsr0_512),
            "0.256" => Ok(Gain::Fsr0_256),
            other => Err(ConfigError::InvalidValue(format!(
                "ADC gain must be one of 6.144, 4.096, 2.048, 1.024, 0.512, 0.256 (got '{}')",
                other
            ))),
        }
    }
}

/// Input multiplexer selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mux {
    /// AIN0 positive, AIN1 negative
    P0N1,
    P0N3,
    P1N3,
    P2N3,
    P0Gnd,
    P1Gnd,
    P2Gnd,
    P3Gnd,
}

impl Mux {
    pub fn bits(&self) -> u16 {
        match self {
            Mux::P0N1 => 0b000,
            Mux::P0N3 => 0b001,
            Mux::P1N3 => 0b010,
            Mux::P2N3 => 0b011,
            Mux::P0Gnd => 0b100,
            Mux::P1Gnd => 0b101,
            Mux::P2Gnd => 0b110,
            Mux::P3Gnd => 0b111,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcSettings {
    pub address: u8,
    /// Data rate code, 0..=7 (7 = fastest)
    pub data_rate: u16,
    pub gain: Gain,
    pub mux: Mux,
}

impl Default for AdcSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            data_rate: 0x07,
            gain: Gain::Fsr6_144,
            mux: Mux::P0N1,
        }
    }
}

pub struct Ads1115<B: RegisterBus> {
    bus: B,
    settings: AdcSettings,
}

impl<B: RegisterBus> Ads1115<B> {
    /// Program the config register and start continuous conversion
    pub fn open(mut bus: B, settings: AdcSettings) -> Result<Self, BusError> {
        let address = settings.address;

        write_bits(&mut bus, address, REG_CONFIG, 7, 3, settings.data_rate)?;
        write_bits(&mut bus, address, REG_CONFIG, 8, 1, 0)?;
        write_bits(&mut bus, address, REG_CONFIG, 11, 3, settings.gain.bits())?;
        write_bits(&mut bus, address, REG_CONFIG, 14, 3, settings.mux.bits())?;

        log::info!(
            "🔧 Converter configured at 0x{:02x} (rate={}, gain={:?}, mux={:?}, continuous)",
            address,
            settings.data_rate,
            settings.gain,
            settings.mux
        );

        Ok(Self { bus, settings })
    }

    /// Read the latest conversion as a signed 12-bit code
    pub fn read_raw(&mut self) -> Result<i16, BusError> {
        let raw = self.bus.read_word(self.settings.address, REG_CONVERSION)?;
        Ok(decode_left_justified(raw))
    }

    pub fn into_bus(self) -> B {
        self.bus
    }
}

impl<B: RegisterBus> AnalogSource for Ads1115<B> {
    fn read_code(&mut self) -> Result<i16, SourceError> {
        Ok(self.read_raw()?)
    }
}

/// Left-justified 12-bit two's complement to a signed code
pub fn decode_left_justified(raw: u16) -> i16 {
    (raw as i16) >> 4
}

/// Inverse of [`decode_left_justified`], clamping to the 12-bit range
pub fn encode_left_justified(code: i16) -> u16 {
    let clamped = code.clamp(-2048, 2047);
    (clamped << 4) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryBus {
        registers: HashMap<(u8, u8), u16>,
        writes: Vec<(u8, u16)>,
        fail_reads: bool,
    }

    impl RegisterBus for MemoryBus {
        fn read_word(&mut self, address: u8, register: u8) -> Result<u16, BusError> {
            if self.fail_reads {
                return Err(BusError::Read {
                    address,
                    register,
                    reason: "nack".to_string(),
                });
            }
            Ok(*self.registers.get(&(address, register)).unwrap_or(&0))
        }

        fn write_word(&mut self, address: u8, register: u8, value: u16) -> Result<(), BusError> {
            self.registers.insert((address, register), value);
            self.writes.push((register, value));
            Ok(())
        }
    }

    #[test]
    fn test_write_bits_preserves_other_bits() {
        let mut bus = MemoryBus::default();
        bus.registers.insert((0x48, REG_CONFIG), 0xFFFF);

        write_bits(&mut bus, 0x48, REG_CONFIG, 11, 3, 0b010).unwrap();

        assert_eq!(bus.registers[&(0x48, REG_CONFIG)], 0b1111_0101_1111_1111);
    }

    #[test]
    fn test_write_bits_masks_oversized_value() {
        let mut bus = MemoryBus::default();

        write_bits(&mut bus, 0x48, REG_CONFIG, 8, 1, 0b11).unwrap();

        assert_eq!(bus.registers[&(0x48, REG_CONFIG)], 0x0100);
    }

    #[test]
    fn test_open_programs_config_register() {
        let mut bus = MemoryBus::default();
        // Power-on default of the device config register
        bus.registers.insert((0x48, REG_CONFIG), 0x8583);

        let adc = Ads1115::open(bus, AdcSettings::default()).unwrap();
        let bus = adc.into_bus();

        // OS=1, mux=000, gain=000, continuous, rate=111, comparator bits untouched
        assert_eq!(bus.registers[&(0x48, REG_CONFIG)], 0x80E3);
        assert_eq!(bus.writes.len(), 4);
    }

    #[test]
    fn test_open_fails_when_bus_unreadable() {
        let bus = MemoryBus {
            fail_reads: true,
            ..Default::default()
        };

        assert!(matches!(
            Ads1115::open(bus, AdcSettings::default()),
            Err(BusError::Read { .. })
        ));
    }

    #[test]
    fn test_decode_signed_codes() {
        assert_eq!(decode_left_justified(0x0000), 0);
        assert_eq!(decode_left_justified(0x7FF0), 2047);
        assert_eq!(decode_left_justified(0xFFF0), -1);
        assert_eq!(decode_left_justified(0x8000), -2048);
        // Low nibble is not part of the code
        assert_eq!(decode_left_justified(0x068F), 0x68);
    }

    #[test]
    fn test_encode_round_trips_and_clamps() {
        assert_eq!(decode_left_justified(encode_left_justified(1667)), 1667);
        assert_eq!(decode_left_justified(encode_left_justified(-300)), -300);
        assert_eq!(decode_left_justified(encode_left_justified(5000)), 2047);
    }

    #[test]
    fn test_read_code_through_source_trait() {
        let mut bus = MemoryBus::default();
        bus.registers.insert((0x48, REG_CONVERSION), encode_left_justified(1667));
        let mut adc = Ads1115::open(bus, AdcSettings::default()).unwrap();

        let code = adc.read_code().unwrap();
        assert_eq!(code, 1667);
        assert_eq!(code as f64 * Gain::Fsr6_144.millivolts_per_lsb(), 5001.0);
    }

    #[test]
    fn test_gain_parsing() {
        assert_eq!("4.096".parse::<Gain>().unwrap(), Gain::Fsr4_096);
        assert!("3.3".parse::<Gain>().is_err());
    }
}
