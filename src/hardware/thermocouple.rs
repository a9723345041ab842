//! Thermocouple input.
//!
//! The controller only sees [`TemperatureSensor`]. The MAX31855 amplifier
//! used on the roaster board is read as one 32-bit SPI frame:
//!
//! | bits   | meaning                                   |
//! |--------|-------------------------------------------|
//! | 31..18 | thermocouple temperature, signed, 0.25 °C |
//! | 16     | any fault                                 |
//! | 15..4  | cold junction temperature, signed         |
//! | 2      | short to VCC                              |
//! | 1      | short to GND                              |
//! | 0      | open circuit                              |

use embedded_hal::blocking::spi::Transfer;
use log::warn;

pub trait TemperatureSensor {
    fn read_celsius(&mut self) -> Result<f32, SensorError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorError {
    OpenCircuit,
    ShortToGround,
    ShortToVcc,
    InvalidReading,
    BusError(String),
}

impl std::fmt::Display for SensorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorError::OpenCircuit => write!(f, "thermocouple open circuit"),
            SensorError::ShortToGround => write!(f, "thermocouple shorted to GND"),
            SensorError::ShortToVcc => write!(f, "thermocouple shorted to VCC"),
            SensorError::InvalidReading => write!(f, "invalid thermocouple reading"),
            SensorError::BusError(msg) => write!(f, "SPI bus error: {}", msg),
        }
    }
}

impl std::error::Error for SensorError {}

const FAULT_BIT: u32 = 1 << 16;
const FAULT_SCV: u32 = 1 << 2;
const FAULT_SCG: u32 = 1 << 1;
const FAULT_OC: u32 = 1 << 0;

pub fn decode_max31855(frame: u32) -> Result<f32, SensorError> {
    if frame & FAULT_OC != 0 {
        return Err(SensorError::OpenCircuit);
    }
    if frame & FAULT_SCG != 0 {
        return Err(SensorError::ShortToGround);
    }
    if frame & FAULT_SCV != 0 {
        return Err(SensorError::ShortToVcc);
    }
    if frame & FAULT_BIT != 0 {
        return Err(SensorError::InvalidReading);
    }

    // Arithmetic shift keeps the sign of the 14-bit field.
    let raw = (frame as i32) >> 18;
    Ok(raw as f32 * 0.25)
}

pub fn decode_cold_junction(frame: u32) -> f32 {
    let raw = ((frame << 16) as i32) >> 20;
    raw as f32 * 0.0625
}

pub struct Max31855<SPI> {
    spi: SPI,
}

impl<SPI> Max31855<SPI>
where
    SPI: Transfer<u8>,
    SPI::Error: core::fmt::Debug,
{
    /// `spi` is expected to manage chip select itself.
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    pub fn read_frame(&mut self) -> Result<u32, SensorError> {
        let mut buffer = [0u8; 4];
        let data = self
            .spi
            .transfer(&mut buffer)
            .map_err(|e| SensorError::BusError(format!("{:?}", e)))?;
        Ok(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
    }
}

impl<SPI> TemperatureSensor for Max31855<SPI>
where
    SPI: Transfer<u8>,
    SPI::Error: core::fmt::Debug,
{
    fn read_celsius(&mut self) -> Result<f32, SensorError> {
        let frame = self.read_frame()?;
        decode_max31855(frame).map_err(|e| {
            warn!("MAX31855 fault in frame {:08X}: {}", frame, e);
            e
        })
    }
}
