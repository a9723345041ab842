//! Roaster configuration

use crate::types::{
    DerivativeMode, PidGains, ProfileParameters, FAST_TICK_MS, MAX_SENSOR_FAULTS, OUTPUT_MAX,
    OUTPUT_MIN, SAMPLE_PERIOD_MS, TRIAC_PERIOD_MS,
};
use embassy_time::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoasterConfig {
    pub sample_period_ms: u64,
    pub fast_tick_ms: u64,
    pub triac_period_ms: u64,
    pub output_min: f32,
    pub output_max: f32,
    pub default_gains: PidGains,
    pub derivative_mode: DerivativeMode,
    pub max_sensor_faults: u32,
    pub profile: ProfileParameters,
    pub gains_path: String,
    pub session_log_path: String,
    pub http_port: u16,
    pub ap_ssid: String,
    pub ap_password: String,
}

impl Default for RoasterConfig {
    fn default() -> Self {
        Self {
            sample_period_ms: SAMPLE_PERIOD_MS,
            fast_tick_ms: FAST_TICK_MS,
            triac_period_ms: TRIAC_PERIOD_MS,
            output_min: OUTPUT_MIN,
            output_max: OUTPUT_MAX,
            default_gains: PidGains::default(),
            derivative_mode: DerivativeMode::default(),
            max_sensor_faults: MAX_SENSOR_FAULTS,
            profile: ProfileParameters::default(),
            gains_path: "/spiffs/config.json".to_string(),
            session_log_path: "/spiffs/temp.csv".to_string(),
            http_port: 80,
            ap_ssid: "CoffeeRoaster".to_string(),
            ap_password: "password".to_string(),
        }
    }
}

impl RoasterConfig {
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms.max(1))
    }

    pub fn fast_tick(&self) -> Duration {
        Duration::from_millis(self.fast_tick_ms.max(1))
    }

    pub fn triac_period(&self) -> Duration {
        Duration::from_millis(self.triac_period_ms.max(1))
    }

    /// Overlay a JSON document onto the defaults. Missing keys keep their
    /// default value.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
