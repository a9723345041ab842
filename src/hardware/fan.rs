use super::HardwareError;
use embedded_hal::digital::v2::OutputPin;
use log::info;

/// On/off cooling fan. No PWM, the pin is either fully on or off.
pub struct FanController<P: OutputPin> {
    gpio_pin: P,
    current_state: bool,
}

impl<P> FanController<P>
where
    P: OutputPin,
    P::Error: core::fmt::Debug,
{
    pub fn new(mut pin: P) -> Result<Self, HardwareError> {
        pin.set_low().map_err(|e| {
            HardwareError::GpioError(format!("Failed to set initial low state: {:?}", e))
        })?;

        info!("Fan controller initialized (active high)");

        Ok(Self {
            gpio_pin: pin,
            current_state: false,
        })
    }

    pub fn turn_on(&mut self) -> Result<(), HardwareError> {
        if self.current_state {
            return Ok(()); // Already on
        }

        self.gpio_pin
            .set_high()
            .map_err(|e| HardwareError::GpioError(format!("Failed to set fan GPIO high: {:?}", e)))?;

        self.current_state = true;
        info!("Fan turned ON");
        Ok(())
    }

    pub fn turn_off(&mut self) -> Result<(), HardwareError> {
        if !self.current_state {
            return Ok(()); // Already off
        }

        self.gpio_pin
            .set_low()
            .map_err(|e| HardwareError::GpioError(format!("Failed to set fan GPIO low: {:?}", e)))?;

        self.current_state = false;
        info!("Fan turned OFF");
        Ok(())
    }

    /// Write LOW regardless of the remembered level.
    pub fn force_off(&mut self) -> Result<(), HardwareError> {
        self.current_state = false;
        self.gpio_pin
            .set_low()
            .map_err(|e| HardwareError::GpioError(format!("Force OFF failed: {:?}", e)))
    }

    pub fn is_on(&self) -> bool {
        self.current_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockPin;

    #[test]
    fn test_fan_follows_commands() {
        let pin = MockPin::new();
        let mut fan = FanController::new(pin.clone()).unwrap();
        assert!(!pin.is_high());

        fan.turn_on().unwrap();
        assert!(pin.is_high());
        assert!(fan.is_on());

        fan.turn_off().unwrap();
        assert!(!pin.is_high());
        assert!(!fan.is_on());
    }

    #[test]
    fn test_failed_write_keeps_last_level() {
        let pin = MockPin::new();
        let mut fan = FanController::new(pin.clone()).unwrap();
        pin.break_pin();
        assert!(fan.turn_on().is_err());
        assert!(!fan.is_on());
    }
}
