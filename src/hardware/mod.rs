pub mod fan;
pub mod thermocouple;
pub mod triac;

pub use fan::FanController;
pub use thermocouple::{Max31855, SensorError, TemperatureSensor};
pub use triac::BurstOutput;

#[derive(Debug, Clone)]
pub enum HardwareError {
    GpioError(String),
}

impl std::fmt::Display for HardwareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HardwareError::GpioError(msg) => write!(f, "GPIO error: {}", msg),
        }
    }
}

impl std::error::Error for HardwareError {}
