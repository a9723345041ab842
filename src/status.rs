use crate::types::{ProfileParameters, RoastMode, RoastState};

/// Names sent in a full status message, in this order.
pub const STATUS_PARAMETERS: [&str; 9] = [
    "p",
    "i",
    "d",
    "setpoint",
    "ramp_rate",
    "temperature",
    "programMode",
    "state",
    "duty_cycle",
];

/// Controller values copied out at command time. Clients never see the
/// controller itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusSnapshot {
    pub p: f32,
    pub i: f32,
    pub d: f32,
    pub setpoint: f32,
    pub ramp_rate: f32,
    pub temperature: f32,
    pub mode: RoastMode,
    pub state: RoastState,
    pub duty_cycle: f32,
    pub profile: ProfileParameters,
}

impl StatusSnapshot {
    pub fn get(&self, name: &str) -> Option<f32> {
        let value = match name {
            "p" => self.p,
            "i" => self.i,
            "d" => self.d,
            "setpoint" => self.setpoint,
            "ramp_rate" => self.ramp_rate,
            "temperature" => self.temperature,
            "programMode" => self.mode.as_index(),
            "state" => self.state.as_index(),
            "duty_cycle" => self.duty_cycle,
            "preheat_temperature" => self.profile.preheat_temperature,
            "hold_temperature" => self.profile.hold_temperature,
            "hold_duration" => self.profile.hold_duration,
            "max_preheat_duration" => self.profile.max_preheat_duration,
            "safe_temperature" => self.profile.safe_temperature,
            _ => return None,
        };
        Some(value)
    }

    /// `(name, value)` pairs for every entry of [`STATUS_PARAMETERS`].
    pub fn entries(&self) -> heapless::Vec<(&'static str, f32), 9> {
        STATUS_PARAMETERS
            .iter()
            .filter_map(|&name| self.get(name).map(|value| (name, value)))
            .collect()
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            p: 0.0,
            i: 0.0,
            d: 0.0,
            setpoint: 0.0,
            ramp_rate: 0.0,
            temperature: 0.0,
            mode: RoastMode::Simple,
            state: RoastState::Off,
            duty_cycle: 0.0,
            profile: ProfileParameters::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_and_unknown() {
        let snapshot = StatusSnapshot {
            p: 10.0,
            state: RoastState::Hold,
            mode: RoastMode::Program,
            ..Default::default()
        };
        assert_eq!(snapshot.get("p"), Some(10.0));
        assert_eq!(snapshot.get("state"), Some(4.0));
        assert_eq!(snapshot.get("programMode"), Some(1.0));
        assert_eq!(snapshot.get("safe_temperature"), Some(30.0));
        assert_eq!(snapshot.get("filename"), None);
    }

    #[test]
    fn test_entries_cover_all_status_parameters() {
        let entries = StatusSnapshot::default().entries();
        assert_eq!(entries.len(), STATUS_PARAMETERS.len());
        assert_eq!(entries[0].0, "p");
        assert_eq!(entries[8].0, "duty_cycle");
    }
}
