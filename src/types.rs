use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoastMode {
    Simple,
    Program,
}

impl RoastMode {
    /// Parse the mode names used by the web client ("SIMPLE" / "PROGRAM").
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("simple") {
            Some(RoastMode::Simple)
        } else if name.eq_ignore_ascii_case("program") {
            Some(RoastMode::Program)
        } else {
            None
        }
    }

    pub fn as_index(self) -> f32 {
        match self {
            RoastMode::Simple => 0.0,
            RoastMode::Program => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoastState {
    Off,
    Preheating,
    Preheat,
    Ramping,
    Hold,
    Cooling,
}

impl RoastState {
    /// Numeric encoding reported to clients, in declaration order.
    pub fn as_index(self) -> f32 {
        match self {
            RoastState::Off => 0.0,
            RoastState::Preheating => 1.0,
            RoastState::Preheat => 2.0,
            RoastState::Ramping => 3.0,
            RoastState::Hold => 4.0,
            RoastState::Cooling => 5.0,
        }
    }

    /// States in which the element is driven by the PID output.
    pub fn is_heating(self, mode: RoastMode) -> bool {
        match mode {
            RoastMode::Simple => self == RoastState::Hold,
            RoastMode::Program => matches!(
                self,
                RoastState::Preheating | RoastState::Preheat | RoastState::Ramping | RoastState::Hold
            ),
        }
    }

    /// Whether `self` can legitimately be reached in `mode`.
    pub fn is_reachable(self, mode: RoastMode) -> bool {
        match mode {
            RoastMode::Simple => matches!(self, RoastState::Off | RoastState::Hold),
            RoastMode::Program => true,
        }
    }
}

/// Roast profile, supplied by the operator and evaluated on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileParameters {
    pub preheat_temperature: f32,
    /// Degrees per minute while ramping towards the hold temperature.
    pub ramp_rate: f32,
    pub hold_temperature: f32,
    /// Seconds
    pub hold_duration: f32,
    /// Seconds
    pub max_preheat_duration: f32,
    pub safe_temperature: f32,
}

impl Default for ProfileParameters {
    fn default() -> Self {
        Self {
            preheat_temperature: 0.0,
            ramp_rate: 0.0,
            hold_temperature: 0.0,
            hold_duration: 0.0,
            max_preheat_duration: MAX_PREHEAT_DURATION_S,
            safe_temperature: SAFE_TEMPERATURE_C,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 10.0,
            ki: 0.0,
            kd: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DerivativeMode {
    /// Differentiate the measured input. Setpoint steps cause no output kick.
    OnMeasurement,
    OnError,
}

impl Default for DerivativeMode {
    fn default() -> Self {
        DerivativeMode::OnMeasurement
    }
}

/// One point of the roast curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    /// Seconds since the session started.
    pub timestamp: f32,
    pub setpoint: f32,
    pub output: f32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    InvalidState { mode: RoastMode, state: RoastState },
    UnknownMode(String),
    SensorFailure { consecutive: u32 },
    ActuatorFailure(String),
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::InvalidState { mode, state } => {
                write!(f, "invalid state {:?} reached in {:?} mode", state, mode)
            }
            Fault::UnknownMode(name) => write!(f, "unknown mode '{}'", name),
            Fault::SensorFailure { consecutive } => {
                write!(f, "thermocouple failed {} consecutive reads", consecutive)
            }
            Fault::ActuatorFailure(msg) => write!(f, "actuator failure: {}", msg),
        }
    }
}

pub const MAX_PREHEAT_DURATION_S: f32 = 120.0;
pub const SAFE_TEMPERATURE_C: f32 = 30.0;
/// How far past a temperature threshold the loop aims so it actually crosses it.
pub const TRANSITION_MARGIN_C: f32 = 5.0;
pub const SAMPLE_PERIOD_MS: u64 = 2000;
pub const FAST_TICK_MS: u64 = 20;
pub const TRIAC_PERIOD_MS: u64 = 500;
pub const OUTPUT_MIN: f32 = 0.0;
pub const OUTPUT_MAX: f32 = 100.0;
pub const MAX_SENSOR_FAULTS: u32 = 3;
pub const SESSION_LOG_HEADER: &str = "Time,Setpoint,Output,Temperature";
