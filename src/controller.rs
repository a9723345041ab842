use crate::{
    hardware::{BurstOutput, FanController, HardwareError, TemperatureSensor},
    pid::PidController,
    roast_states::{RoastStateMachine, RoastStateTransition},
    status::StatusSnapshot,
    types::{
        DerivativeMode, Fault, PidGains, ProfileParameters, RoastMode, RoastState,
        TelemetrySample, MAX_SENSOR_FAULTS, OUTPUT_MAX, OUTPUT_MIN,
    },
};
use embassy_time::{Duration, Instant};
use embedded_hal::digital::v2::OutputPin;
use log::{debug, error, info, warn};

/// Result of one sampling tick, handed to the boundary layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub mode: RoastMode,
    pub state: RoastState,
    pub temperature: f32,
    pub duty_cycle: f32,
    pub sample: Option<TelemetrySample>,
    pub transition: Option<RoastStateTransition>,
    pub fault: Option<Fault>,
}

pub struct RoastController<S, T, F>
where
    S: TemperatureSensor,
    T: OutputPin,
    F: OutputPin,
{
    mode: RoastMode,
    state_machine: RoastStateMachine,
    profile: ProfileParameters,
    setpoint: f32,
    pid: PidController,

    sensor: S,
    triac: BurstOutput<T>,
    fan: FanController<F>,

    temperature: f32,
    output: f32,
    consecutive_sensor_failures: u32,
    max_sensor_faults: u32,

    session_started_at: Option<Instant>,
    log_reset_requested: bool,
}

impl<S, T, F> RoastController<S, T, F>
where
    S: TemperatureSensor,
    T: OutputPin,
    T::Error: core::fmt::Debug,
    F: OutputPin,
    F::Error: core::fmt::Debug,
{
    pub fn new(
        sensor: S,
        triac: BurstOutput<T>,
        fan: FanController<F>,
        gains: PidGains,
        derivative_mode: DerivativeMode,
    ) -> Self {
        let mut pid = PidController::new(gains, derivative_mode);
        pid.set_output_limits(OUTPUT_MIN, OUTPUT_MAX);

        Self {
            mode: RoastMode::Simple,
            state_machine: RoastStateMachine::new(),
            profile: ProfileParameters::default(),
            setpoint: 0.0,
            pid,
            sensor,
            triac,
            fan,
            temperature: 0.0,
            output: 0.0,
            consecutive_sensor_failures: 0,
            max_sensor_faults: MAX_SENSOR_FAULTS,
            session_started_at: None,
            log_reset_requested: false,
        }
    }

    pub fn with_max_sensor_faults(mut self, max_sensor_faults: u32) -> Self {
        self.max_sensor_faults = max_sensor_faults.max(1);
        self
    }

    pub fn with_output_limits(mut self, min: f32, max: f32) -> Self {
        self.pid.set_output_limits(min, max);
        self
    }

    pub fn with_profile(mut self, profile: ProfileParameters) -> Self {
        self.profile = profile;
        self
    }

    // === Commands ===

    pub fn set_mode(&mut self, mode: RoastMode) {
        if self.mode == mode {
            return;
        }
        info!("Roast mode changed: {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        self.state_machine.force(RoastState::Off);
        self.de_energise(false);
        if mode == RoastMode::Simple {
            self.log_reset_requested = true;
        }
    }

    /// Switch mode by its client-facing name. Unknown names are a fault and
    /// put the controller back into its safe default.
    pub fn set_mode_by_name(&mut self, name: &str) -> Result<(), Fault> {
        match RoastMode::from_name(name) {
            Some(mode) => {
                self.set_mode(mode);
                Ok(())
            }
            None => {
                let fault = Fault::UnknownMode(name.to_string());
                self.fail(&fault);
                Err(fault)
            }
        }
    }

    pub fn start(&mut self) {
        match self.mode {
            RoastMode::Simple => {
                if self.state_machine.get_state() != RoastState::Hold {
                    info!("Starting simple roast at {:.1}C", self.setpoint);
                    self.begin_session();
                    self.log_reset_requested = true;
                    self.pid.set_setpoint(self.setpoint);
                    self.state_machine.force(RoastState::Hold);
                }
            }
            RoastMode::Program => {
                if self.state_machine.get_state() == RoastState::Off {
                    info!(
                        "Starting roast program: preheat {:.1}C, hold {:.1}C for {:.0}s",
                        self.profile.preheat_temperature,
                        self.profile.hold_temperature,
                        self.profile.hold_duration
                    );
                    self.begin_session();
                    self.state_machine.force(RoastState::Preheating);
                } else {
                    debug!("Start ignored, program already running");
                }
            }
        }
    }

    pub fn stop(&mut self) {
        let state = self.state_machine.get_state();
        match self.mode {
            RoastMode::Simple => {
                if state != RoastState::Off {
                    info!("Stopping simple roast");
                    self.state_machine.force(RoastState::Off);
                    self.de_energise(false);
                }
            }
            RoastMode::Program => {
                // Never cut the element without a monitored cool-down.
                if state != RoastState::Off && state != RoastState::Cooling {
                    info!("Stopping roast program from {:?}, cooling down", state);
                    self.state_machine.force(RoastState::Cooling);
                    self.de_energise(true);
                }
            }
        }
    }

    /// `stop()` followed immediately by `start()`. In program mode the start
    /// finds the roaster cooling and does nothing.
    pub fn restart(&mut self) {
        self.stop();
        self.start();
    }

    /// Operator signal that the beans are charged: leaves Preheat for Ramping.
    pub fn advance(&mut self) -> bool {
        if self.mode == RoastMode::Program && self.state_machine.get_state() == RoastState::Preheat {
            info!("Beans charged, ramping towards {:.1}C", self.profile.hold_temperature);
            self.state_machine.force(RoastState::Ramping);
            true
        } else {
            debug!("Advance ignored in {:?}/{:?}", self.mode, self.state_machine.get_state());
            false
        }
    }

    /// Put everything back to the power-on default in place: element and fan
    /// off, simple mode, state off, PID history cleared. Gains and profile
    /// are kept.
    pub fn reset_to_safe_state(&mut self) {
        warn!("Resetting roast controller to safe state");
        self.de_energise(false);
        self.mode = RoastMode::Simple;
        self.state_machine.force(RoastState::Off);
        self.pid.reset();
        self.output = 0.0;
        self.consecutive_sensor_failures = 0;
        self.session_started_at = None;
    }

    // === Parameters ===

    pub fn set_p(&mut self, kp: f32) {
        self.pid.set_p(kp);
    }

    pub fn set_i(&mut self, ki: f32) {
        self.pid.set_i(ki);
    }

    pub fn set_d(&mut self, kd: f32) {
        self.pid.set_d(kd);
    }

    pub fn set_gains(&mut self, gains: PidGains) {
        self.pid.set_tunings(gains);
    }

    pub fn gains(&self) -> PidGains {
        self.pid.gains()
    }

    pub fn set_derivative_mode(&mut self, mode: DerivativeMode) {
        self.pid.set_derivative_mode(mode);
    }

    /// Operator setpoint used by simple mode.
    pub fn set_setpoint(&mut self, setpoint: f32) {
        self.setpoint = setpoint;
        if self.mode == RoastMode::Simple {
            self.pid.set_setpoint(setpoint);
        }
    }

    pub fn update_profile<U>(&mut self, update_fn: U)
    where
        U: FnOnce(&mut ProfileParameters),
    {
        update_fn(&mut self.profile);
    }

    pub fn profile(&self) -> &ProfileParameters {
        &self.profile
    }

    pub fn mode(&self) -> RoastMode {
        self.mode
    }

    pub fn state(&self) -> RoastState {
        self.state_machine.get_state()
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn duty_cycle(&self) -> f32 {
        self.triac.duty_cycle()
    }

    pub fn is_fan_on(&self) -> bool {
        self.fan.is_on()
    }

    pub fn is_element_enabled(&self) -> bool {
        self.triac.is_enabled()
    }

    /// True once after `start()` or a switch to simple mode asked for a
    /// fresh session log.
    pub fn take_log_reset(&mut self) -> bool {
        std::mem::take(&mut self.log_reset_requested)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let gains = self.pid.gains();
        StatusSnapshot {
            p: gains.kp,
            i: gains.ki,
            d: gains.kd,
            setpoint: match self.mode {
                RoastMode::Simple => self.setpoint,
                RoastMode::Program => self.pid.setpoint(),
            },
            ramp_rate: self.profile.ramp_rate,
            temperature: self.temperature,
            mode: self.mode,
            state: self.state_machine.get_state(),
            duty_cycle: self.triac.duty_cycle(),
            profile: self.profile,
        }
    }

    // === Ticks ===

    /// Fast tick: keep the burst waveform moving.
    pub fn process_output(&mut self, now: Instant) {
        if let Err(e) = self.triac.process(now) {
            error!("Triac waveform update failed: {} - disabling element", e);
            if let Err(e) = self.triac.disable() {
                error!("CRITICAL: Failed to disable triac: {}", e);
            }
        }
    }

    /// Sampling tick: read, evaluate, actuate, report.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        if let Some(fault) = self.measure_temperature() {
            self.fail(&fault);
            return self.report(None, None, Some(fault));
        }

        let transition = match self.mode {
            RoastMode::Program => self.state_machine.update(self.temperature, now, &self.profile),
            RoastMode::Simple => None,
        };
        if let Some(transition) = transition {
            if transition.to == RoastState::Off {
                info!("Roast session finished");
                self.session_started_at = None;
            }
        }

        let state = self.state_machine.get_state();
        if !state.is_reachable(self.mode) {
            let fault = Fault::InvalidState {
                mode: self.mode,
                state,
            };
            self.fail(&fault);
            return self.report(None, transition, Some(fault));
        }

        let result = if state.is_heating(self.mode) {
            self.drive_heating(now).map(Some)
        } else {
            self.output = 0.0;
            self.triac.set_duty_cycle(0.0);
            let fan_on = state == RoastState::Cooling;
            self.apply_idle_outputs(fan_on).map(|_| None)
        };

        match result {
            Ok(sample) => self.report(sample, transition, None),
            Err(e) => {
                let fault = Fault::ActuatorFailure(e.to_string());
                self.fail(&fault);
                self.report(None, transition, Some(fault))
            }
        }
    }

    fn measure_temperature(&mut self) -> Option<Fault> {
        match self.sensor.read_celsius() {
            Ok(reading) if reading.is_finite() => {
                if self.consecutive_sensor_failures > 0 {
                    info!(
                        "Thermocouple recovered after {} failed reads",
                        self.consecutive_sensor_failures
                    );
                }
                self.consecutive_sensor_failures = 0;
                self.temperature = reading;
                None
            }
            other => {
                self.consecutive_sensor_failures += 1;
                match other {
                    Err(e) => warn!(
                        "Thermocouple read failed ({}/{}): {} - holding {:.1}C",
                        self.consecutive_sensor_failures, self.max_sensor_faults, e, self.temperature
                    ),
                    Ok(value) => warn!(
                        "Thermocouple returned {} ({}/{}) - holding {:.1}C",
                        value, self.consecutive_sensor_failures, self.max_sensor_faults, self.temperature
                    ),
                }
                if self.consecutive_sensor_failures >= self.max_sensor_faults {
                    Some(Fault::SensorFailure {
                        consecutive: self.consecutive_sensor_failures,
                    })
                } else {
                    None
                }
            }
        }
    }

    fn drive_heating(&mut self, now: Instant) -> Result<TelemetrySample, HardwareError> {
        let setpoint = match self.mode {
            RoastMode::Simple => self.setpoint,
            RoastMode::Program => self
                .state_machine
                .setpoint(now, &self.profile)
                .unwrap_or(self.profile.hold_temperature),
        };
        self.pid.set_setpoint(setpoint);
        self.output = self.pid.compute(self.temperature, now);

        self.triac.set_duty_cycle(self.output);
        self.triac.enable(now)?;
        self.fan.turn_on()?;

        let started_at = *self.session_started_at.get_or_insert(now);
        let elapsed = if now > started_at {
            now - started_at
        } else {
            Duration::from_ticks(0)
        };

        debug!(
            "Tick: {:.1}C -> setpoint {:.1}C, output {:.1}%",
            self.temperature, setpoint, self.output
        );

        Ok(TelemetrySample {
            timestamp: elapsed.as_millis() as f32 / 1000.0,
            setpoint,
            output: self.output,
            temperature: self.temperature,
        })
    }

    fn apply_idle_outputs(&mut self, fan_on: bool) -> Result<(), HardwareError> {
        self.triac.disable()?;
        if fan_on {
            self.fan.turn_on()
        } else {
            self.fan.turn_off()
        }
    }

    /// Cut the element now rather than at the next sampling tick.
    fn de_energise(&mut self, fan_on: bool) {
        self.output = 0.0;
        self.triac.set_duty_cycle(0.0);
        if let Err(e) = self.apply_idle_outputs(fan_on) {
            error!("Failed to de-energise outputs: {}", e);
        }
    }

    fn begin_session(&mut self) {
        self.pid.reset();
        self.session_started_at = None;
    }

    fn fail(&mut self, fault: &Fault) {
        error!("ROAST FAULT: {}", fault);
        self.reset_to_safe_state();
        // Retry the pin writes directly in case the remembered levels lie.
        if let Err(e) = self.fan.force_off() {
            error!("CRITICAL: Failed to force fan off: {}", e);
        }
    }

    fn report(
        &self,
        sample: Option<TelemetrySample>,
        transition: Option<RoastStateTransition>,
        fault: Option<Fault>,
    ) -> TickReport {
        TickReport {
            mode: self.mode,
            state: self.state_machine.get_state(),
            temperature: self.temperature,
            duty_cycle: self.triac.duty_cycle(),
            sample,
            transition,
            fault,
        }
    }
}
