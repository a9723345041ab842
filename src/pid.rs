//! PID compute engine.
//!
//! The integral accumulator stores `ki * error * dt` rather than the raw
//! error sum, so retuning `ki` mid-roast does not rescale the history.

use crate::types::{DerivativeMode, PidGains, OUTPUT_MAX, OUTPUT_MIN};
use embassy_time::Instant;
use log::debug;

pub struct PidController {
    kp: f32,
    ki: f32,
    kd: f32,
    setpoint: f32,
    out_min: f32,
    out_max: f32,
    derivative_mode: DerivativeMode,

    integral: f32,
    last_error: f32,
    last_input: f32,
    last_output: f32,
    last_time: Option<Instant>,
}

impl PidController {
    pub fn new(gains: PidGains, derivative_mode: DerivativeMode) -> Self {
        let mut pid = Self {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            setpoint: 0.0,
            out_min: OUTPUT_MIN,
            out_max: OUTPUT_MAX,
            derivative_mode,
            integral: 0.0,
            last_error: 0.0,
            last_input: 0.0,
            last_output: 0.0,
            last_time: None,
        };
        pid.set_tunings(gains);
        pid
    }

    /// Compute a new output for the measured `input` at `now`.
    ///
    /// The first call after construction or [`reset`](Self::reset) only
    /// records the operating point and returns 0, since no elapsed time is
    /// defined yet.
    pub fn compute(&mut self, input: f32, now: Instant) -> f32 {
        let error = self.setpoint - input;

        let Some(last_time) = self.last_time else {
            self.last_error = error;
            self.last_input = input;
            self.last_time = Some(now);
            self.last_output = 0.0;
            return 0.0;
        };

        if now <= last_time {
            return self.last_output;
        }
        let dt = (now - last_time).as_millis() as f32 / 1000.0;

        self.integral += self.ki * error * dt;

        let derivative = match self.derivative_mode {
            DerivativeMode::OnMeasurement => -self.kd * (input - self.last_input) / dt,
            DerivativeMode::OnError => self.kd * (error - self.last_error) / dt,
        };

        let mut output = self.kp * error + self.integral + derivative;

        // Back the clamped excess out of the integral so it cannot wind up.
        // With integral action off the accumulator stays at zero.
        let clamped = output.clamp(self.out_min, self.out_max);
        if self.ki > 0.0 {
            self.integral -= output - clamped;
        }
        output = clamped;

        debug!(
            "PID: error={:.2}, integral={:.3}, derivative={:.3}, dt={:.3}s, output={:.2}",
            error, self.integral, derivative, dt, output
        );

        self.last_error = error;
        self.last_input = input;
        self.last_time = Some(now);
        self.last_output = output;
        output
    }

    pub fn set_tunings(&mut self, gains: PidGains) {
        self.set_p(gains.kp);
        self.set_i(gains.ki);
        self.set_d(gains.kd);
    }

    pub fn set_p(&mut self, kp: f32) {
        self.kp = if kp < 0.0 { 0.0 } else { kp };
    }

    pub fn set_i(&mut self, ki: f32) {
        if ki <= 0.0 {
            // Disabling integral action drops the accumulated term too.
            self.ki = 0.0;
            self.integral = 0.0;
        } else {
            self.ki = ki;
        }
    }

    pub fn set_d(&mut self, kd: f32) {
        self.kd = if kd < 0.0 { 0.0 } else { kd };
    }

    pub fn gains(&self) -> PidGains {
        PidGains {
            kp: self.kp,
            ki: self.ki,
            kd: self.kd,
        }
    }

    pub fn set_setpoint(&mut self, setpoint: f32) {
        self.setpoint = setpoint;
    }

    pub fn setpoint(&self) -> f32 {
        self.setpoint
    }

    /// Ignored when `min > max`.
    pub fn set_output_limits(&mut self, min: f32, max: f32) {
        if min > max {
            return;
        }
        self.out_min = min;
        self.out_max = max;
    }

    pub fn output_limits(&self) -> (f32, f32) {
        (self.out_min, self.out_max)
    }

    pub fn set_derivative_mode(&mut self, mode: DerivativeMode) {
        self.derivative_mode = mode;
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = 0.0;
        self.last_input = 0.0;
        self.last_output = 0.0;
        self.last_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> Instant {
        Instant::from_millis(secs * 1000)
    }

    fn pid(kp: f32, ki: f32, kd: f32) -> PidController {
        PidController::new(PidGains { kp, ki, kd }, DerivativeMode::OnMeasurement)
    }

    #[test]
    fn test_first_compute_returns_zero() {
        let mut pid = pid(5.0, 1.0, 1.0);
        pid.set_setpoint(200.0);
        assert_eq!(pid.compute(20.0, at(10)), 0.0);
        assert_eq!(pid.integral(), 0.0);

        pid.reset();
        assert_eq!(pid.compute(50.0, at(11)), 0.0);
    }

    #[test]
    fn test_roast_scenario_outputs() {
        let mut pid = pid(0.4, 0.03, 0.02);
        pid.set_setpoint(200.0);

        let inputs = [20.0, 20.0, 25.0, 40.0];
        let outputs: Vec<f32> = inputs
            .iter()
            .enumerate()
            .map(|(t, &input)| pid.compute(input, at(t as u64)))
            .collect();

        assert_eq!(outputs[0], 0.0);
        for out in &outputs {
            assert!((0.0..=100.0).contains(out));
        }
        // 72 + 5.4
        assert!((outputs[1] - 77.4).abs() < 1e-3);
        // 70 + 10.65 - 0.1
        assert!((outputs[2] - 80.55).abs() < 1e-3);
        // 64 + 15.45 - 0.3
        assert!((outputs[3] - 79.15).abs() < 1e-3);
        // Proportional share shrinks as the beans heat up.
        assert!(outputs[3] < outputs[2]);
    }

    #[test]
    fn test_output_clamped_with_anti_windup() {
        let mut pid = pid(2.0, 0.5, 0.0);
        pid.set_setpoint(200.0);
        pid.compute(20.0, at(0));

        let integral_before = pid.integral();
        let error = 200.0 - 20.0;
        let unclamped = 2.0 * error + integral_before + 0.5 * error * 1.0;
        let output = pid.compute(20.0, at(1));

        assert_eq!(output, 100.0);
        let correction = (integral_before + 0.5 * error * 1.0) - pid.integral();
        assert!((unclamped - output - correction).abs() < 1e-3);
    }

    #[test]
    fn test_output_clamped_low() {
        let mut pid = pid(1.0, 0.1, 0.0);
        pid.set_setpoint(100.0);
        pid.compute(300.0, at(0));
        let output = pid.compute(300.0, at(1));
        assert_eq!(output, 0.0);
        // integral accumulated -20, then +220 back-corrected
        assert!(pid.integral() > 0.0);
    }

    #[test]
    fn test_zero_ki_resets_integral_mid_session() {
        let mut pid = pid(0.1, 0.2, 0.0);
        pid.set_setpoint(100.0);
        pid.compute(90.0, at(0));
        pid.compute(90.0, at(1));
        assert!(pid.integral() > 0.0);

        pid.set_i(0.0);
        assert_eq!(pid.integral(), 0.0);

        pid.set_i(-3.0);
        assert_eq!(pid.gains().ki, 0.0);
    }

    #[test]
    fn test_proportional_only_saturation_leaves_no_integral() {
        let mut pid = pid(10.0, 0.0, 0.0);
        pid.set_setpoint(200.0);
        pid.compute(30.0, at(0));
        assert_eq!(pid.compute(30.0, at(2)), 100.0);
        assert_eq!(pid.integral(), 0.0);

        // Saturated low as well.
        assert_eq!(pid.compute(250.0, at(4)), 0.0);
        assert_eq!(pid.integral(), 0.0);

        // Back inside the band the output is plain kp * error.
        let output = pid.compute(196.0, at(6));
        assert!((output - 40.0).abs() < 1e-3);
        assert_eq!(pid.integral(), 0.0);
    }

    #[test]
    fn test_negative_gains_are_floored() {
        let mut pid = pid(-1.0, -1.0, -1.0);
        assert_eq!(
            pid.gains(),
            PidGains {
                kp: 0.0,
                ki: 0.0,
                kd: 0.0
            }
        );
        pid.set_p(3.0);
        assert_eq!(pid.gains().kp, 3.0);
    }

    #[test]
    fn test_derivative_on_measurement_ignores_setpoint_step() {
        let mut pid = pid(0.0, 0.0, 1.0);
        pid.set_setpoint(50.0);
        pid.compute(40.0, at(0));
        pid.set_setpoint(90.0);
        // Input unchanged, so no derivative kick.
        assert_eq!(pid.compute(40.0, at(1)), 0.0);

        let mut on_error = PidController::new(
            PidGains {
                kp: 0.0,
                ki: 0.0,
                kd: 1.0,
            },
            DerivativeMode::OnError,
        );
        on_error.set_setpoint(50.0);
        on_error.compute(40.0, at(0));
        on_error.set_setpoint(90.0);
        assert_eq!(on_error.compute(40.0, at(1)), 40.0);
    }

    #[test]
    fn test_invalid_output_limits_ignored() {
        let mut pid = pid(1.0, 0.0, 0.0);
        pid.set_output_limits(10.0, 5.0);
        assert_eq!(pid.output_limits(), (0.0, 100.0));
        pid.set_output_limits(-10.0, 10.0);
        assert_eq!(pid.output_limits(), (-10.0, 10.0));
    }

    #[test]
    fn test_repeated_timestamp_returns_last_output() {
        let mut pid = pid(0.5, 0.0, 0.0);
        pid.set_setpoint(100.0);
        pid.compute(80.0, at(0));
        let first = pid.compute(80.0, at(1));
        assert_eq!(pid.compute(10.0, at(1)), first);
    }
}
