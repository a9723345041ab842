//! Burst-fired triac output.
//!
//! The element is switched fully on for the first `duty_cycle` percent of
//! every period and fully off for the rest. Nothing here counts edges: each
//! call to [`BurstOutput::process`] works out the position inside the
//! current period from the clock, so calling it late only shortens the on
//! window, it never stretches it.

use super::HardwareError;
use crate::types::{OUTPUT_MAX, OUTPUT_MIN};
use embassy_time::{Duration, Instant};
use embedded_hal::digital::v2::OutputPin;
use log::{error, info};

pub struct BurstOutput<P: OutputPin> {
    gpio_pin: P,
    duty_cycle: f32,
    enabled: bool,
    period: Duration,
    period_start: Instant,
    level: bool,
}

impl<P> BurstOutput<P>
where
    P: OutputPin,
    P::Error: core::fmt::Debug,
{
    pub fn new(mut pin: P, period: Duration) -> Result<Self, HardwareError> {
        // Element must start de-energised.
        pin.set_low().map_err(|e| {
            HardwareError::GpioError(format!("Failed to set initial low state: {:?}", e))
        })?;

        info!("Triac burst output initialized ({}ms period)", period.as_millis());

        Ok(Self {
            gpio_pin: pin,
            duty_cycle: 0.0,
            enabled: false,
            period,
            period_start: Instant::from_ticks(0),
            level: false,
        })
    }

    pub fn set_duty_cycle(&mut self, duty_cycle: f32) {
        self.duty_cycle = if duty_cycle.is_nan() {
            OUTPUT_MIN
        } else {
            duty_cycle.clamp(OUTPUT_MIN, OUTPUT_MAX)
        };
    }

    pub fn duty_cycle(&self) -> f32 {
        self.duty_cycle
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Last level written to the pin.
    pub fn is_on(&self) -> bool {
        self.level
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start firing. A new period begins at `now`; the pin stays low until
    /// the next [`process`](Self::process) evaluates the duty window.
    pub fn enable(&mut self, now: Instant) -> Result<(), HardwareError> {
        if self.enabled {
            return Ok(());
        }
        self.drive(false)?;
        self.enabled = true;
        self.period_start = now;
        info!("Triac output enabled");
        Ok(())
    }

    pub fn disable(&mut self) -> Result<(), HardwareError> {
        if !self.enabled && !self.level {
            return Ok(());
        }
        self.enabled = false;
        self.drive(false)?;
        info!("Triac output disabled");
        Ok(())
    }

    /// Advance the waveform. Must run much more often than the period.
    pub fn process(&mut self, now: Instant) -> Result<(), HardwareError> {
        if !self.enabled {
            return self.drive(false);
        }

        if now < self.period_start {
            self.period_start = now;
        }
        if now - self.period_start >= self.period {
            self.period_start = now;
        }

        let elapsed_ms = (now - self.period_start).as_millis() as f32;
        let on_window_ms = self.period.as_millis() as f32 * (self.duty_cycle / 100.0);
        self.drive(elapsed_ms < on_window_ms)
    }

    fn drive(&mut self, high: bool) -> Result<(), HardwareError> {
        let result = if high {
            self.gpio_pin.set_high()
        } else {
            self.gpio_pin.set_low()
        };

        match result {
            Ok(()) => {
                self.level = high;
                Ok(())
            }
            Err(e) => {
                error!("Failed to drive triac pin {}: {:?}", if high { "HIGH" } else { "LOW" }, e);
                Err(HardwareError::GpioError(format!("Failed to drive triac pin: {:?}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockPin;

    fn output(pin: &MockPin) -> BurstOutput<MockPin> {
        BurstOutput::new(pin.clone(), Duration::from_millis(500)).unwrap()
    }

    #[test]
    fn test_forty_percent_waveform_over_three_periods() {
        let pin = MockPin::new();
        let mut triac = output(&pin);
        triac.set_duty_cycle(40.0);
        triac.enable(Instant::from_millis(0)).unwrap();
        assert!(!pin.is_high());

        for ms in (0..1500).step_by(50) {
            triac.process(Instant::from_millis(ms)).unwrap();
            let within_period = ms % 500;
            assert_eq!(pin.is_high(), within_period < 200, "at {}ms", ms);
        }
    }

    #[test]
    fn test_disabled_output_stays_low() {
        let pin = MockPin::new();
        let mut triac = output(&pin);
        triac.set_duty_cycle(100.0);
        for ms in (0..1000).step_by(50) {
            triac.process(Instant::from_millis(ms)).unwrap();
            assert!(!pin.is_high());
        }
    }

    #[test]
    fn test_disable_forces_low_immediately() {
        let pin = MockPin::new();
        let mut triac = output(&pin);
        triac.set_duty_cycle(100.0);
        triac.enable(Instant::from_millis(0)).unwrap();
        triac.process(Instant::from_millis(10)).unwrap();
        assert!(pin.is_high());

        triac.disable().unwrap();
        assert!(!pin.is_high());
        assert!(!triac.is_enabled());
        triac.disable().unwrap();
    }

    #[test]
    fn test_enable_is_idempotent() {
        let pin = MockPin::new();
        let mut triac = output(&pin);
        triac.set_duty_cycle(50.0);
        triac.enable(Instant::from_millis(0)).unwrap();
        triac.process(Instant::from_millis(300)).unwrap();
        assert!(!pin.is_high());

        // A second enable must not restart the period.
        triac.enable(Instant::from_millis(300)).unwrap();
        triac.process(Instant::from_millis(320)).unwrap();
        assert!(!pin.is_high());
        triac.process(Instant::from_millis(510)).unwrap();
        assert!(pin.is_high());
    }

    #[test]
    fn test_sparse_processing_never_exceeds_duty() {
        let pin = MockPin::new();
        let mut triac = output(&pin);
        triac.set_duty_cycle(20.0);
        triac.enable(Instant::from_millis(0)).unwrap();

        triac.process(Instant::from_millis(0)).unwrap();
        assert!(pin.is_high());
        // Late call lands outside the 100ms window.
        triac.process(Instant::from_millis(150)).unwrap();
        assert!(!pin.is_high());
    }

    #[test]
    fn test_duty_cycle_clamped() {
        let pin = MockPin::new();
        let mut triac = output(&pin);
        triac.set_duty_cycle(140.0);
        assert_eq!(triac.duty_cycle(), 100.0);
        triac.set_duty_cycle(-3.0);
        assert_eq!(triac.duty_cycle(), 0.0);
        triac.set_duty_cycle(f32::NAN);
        assert_eq!(triac.duty_cycle(), 0.0);
    }

    #[test]
    fn test_gpio_failure_reported() {
        let pin = MockPin::new();
        let mut triac = output(&pin);
        pin.break_pin();
        assert!(triac.enable(Instant::from_millis(0)).is_err());
    }
}
