use crate::types::{ProfileParameters, RoastState, TRANSITION_MARGIN_C};
use embassy_time::Instant;
use log::{debug, info};

/// Program-mode roast sequencing.
///
/// Entry timestamps are stamped by the first [`update`](Self::update) made
/// in a state, so states entered from a command (which carries no clock)
/// and states entered from a tick are timed the same way. Between a
/// [`force`](Self::force) and the next sampling tick `entered_at` is `None`;
/// nothing is timed against it in that window since only `update` reads it.
///
/// Preheating aims [`TRANSITION_MARGIN_C`] above its exit threshold and the
/// ramp is not capped at the hold temperature. A loop that settles exactly
/// on its setpoint would otherwise never cross either threshold.
pub struct RoastStateMachine {
    state: RoastState,
    entered_at: Option<Instant>,
    ramp_origin: Option<f32>,
}

impl RoastStateMachine {
    pub fn new() -> Self {
        Self {
            state: RoastState::Off,
            entered_at: None,
            ramp_origin: None,
        }
    }

    pub fn update(
        &mut self,
        temperature: f32,
        now: Instant,
        profile: &ProfileParameters,
    ) -> Option<RoastStateTransition> {
        let previous_state = self.state;
        let entered_at = *self.entered_at.get_or_insert(now);
        if self.state == RoastState::Ramping && self.ramp_origin.is_none() {
            self.ramp_origin = Some(temperature);
        }
        let in_state_s = seconds_between(entered_at, now);

        let next = match self.state {
            RoastState::Off => None,
            RoastState::Preheating => self.handle_preheating(temperature, in_state_s, profile),
            RoastState::Preheat => {
                if in_state_s > profile.max_preheat_duration {
                    info!("Preheat held for {:.0}s without charge, cooling down", in_state_s);
                    Some(RoastState::Cooling)
                } else {
                    None
                }
            }
            RoastState::Ramping => {
                if temperature > profile.hold_temperature {
                    Some(RoastState::Hold)
                } else {
                    None
                }
            }
            RoastState::Hold => {
                if in_state_s > profile.hold_duration {
                    info!("Hold time of {:.0}s elapsed", profile.hold_duration);
                    Some(RoastState::Cooling)
                } else {
                    None
                }
            }
            RoastState::Cooling => {
                if temperature < profile.safe_temperature {
                    Some(RoastState::Off)
                } else {
                    None
                }
            }
        }?;

        self.state = next;
        self.entered_at = Some(now);
        self.ramp_origin = None;
        info!("RoastState transition: {:?} -> {:?} at {:.1}C", previous_state, next, temperature);
        Some(RoastStateTransition {
            from: previous_state,
            to: next,
        })
    }

    fn handle_preheating(
        &self,
        temperature: f32,
        in_state_s: f32,
        profile: &ProfileParameters,
    ) -> Option<RoastState> {
        if temperature > profile.preheat_temperature {
            Some(RoastState::Preheat)
        } else if in_state_s > profile.max_preheat_duration {
            info!(
                "Preheat temperature {:.1}C not reached within {:.0}s, cooling down",
                profile.preheat_temperature, profile.max_preheat_duration
            );
            Some(RoastState::Cooling)
        } else {
            None
        }
    }

    /// Target temperature for the current program state, if it heats.
    pub fn setpoint(&self, now: Instant, profile: &ProfileParameters) -> Option<f32> {
        match self.state {
            RoastState::Preheating => Some(profile.preheat_temperature + TRANSITION_MARGIN_C),
            RoastState::Preheat => Some(profile.preheat_temperature),
            // Not capped at the hold temperature: the ramp keeps climbing
            // until the Ramping -> Hold transition fires.
            RoastState::Ramping => {
                let fallback = profile.hold_temperature + TRANSITION_MARGIN_C;
                let (Some(origin), Some(entered_at)) = (self.ramp_origin, self.entered_at) else {
                    return Some(fallback);
                };
                if profile.ramp_rate <= 0.0 {
                    return Some(fallback);
                }
                let minutes = seconds_between(entered_at, now) / 60.0;
                let target = origin + profile.ramp_rate * minutes;
                debug!("Ramp setpoint {:.1}C ({:.2} min from {:.1}C)", target, minutes, origin);
                Some(target)
            }
            RoastState::Hold => Some(profile.hold_temperature),
            RoastState::Off | RoastState::Cooling => None,
        }
    }

    pub fn get_state(&self) -> RoastState {
        self.state
    }

    pub fn entered_at(&self) -> Option<Instant> {
        self.entered_at
    }

    /// Jump to `state`. Its entry time stays `None` until the next
    /// [`update`](Self::update), so a state entered from a command is timed
    /// from the first sampling tick after it, up to one sample period late.
    pub fn force(&mut self, state: RoastState) {
        if self.state != state {
            info!("Forcing roast state {:?} -> {:?}", self.state, state);
        }
        self.state = state;
        self.entered_at = None;
        self.ramp_origin = None;
    }
}

fn seconds_between(earlier: Instant, later: Instant) -> f32 {
    if later <= earlier {
        return 0.0;
    }
    (later - earlier).as_millis() as f32 / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoastStateTransition {
    pub from: RoastState,
    pub to: RoastState,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ProfileParameters {
        ProfileParameters {
            preheat_temperature: 150.0,
            ramp_rate: 10.0,
            hold_temperature: 220.0,
            hold_duration: 60.0,
            max_preheat_duration: 120.0,
            safe_temperature: 30.0,
        }
    }

    fn at(secs: u64) -> Instant {
        Instant::from_millis(secs * 1000)
    }

    #[test]
    fn test_off_is_terminal() {
        let mut machine = RoastStateMachine::new();
        assert_eq!(machine.update(500.0, at(0), &profile()), None);
        assert_eq!(machine.update(0.0, at(1000), &profile()), None);
        assert_eq!(machine.get_state(), RoastState::Off);
    }

    #[test]
    fn test_full_program_path() {
        let profile = profile();
        let mut machine = RoastStateMachine::new();
        machine.force(RoastState::Preheating);

        assert_eq!(machine.update(100.0, at(0), &profile), None);
        let t = machine.update(151.0, at(2), &profile).unwrap();
        assert_eq!((t.from, t.to), (RoastState::Preheating, RoastState::Preheat));
        assert_eq!(machine.entered_at(), Some(at(2)));

        machine.force(RoastState::Ramping);
        assert_eq!(machine.update(150.0, at(10), &profile), None);
        let t = machine.update(221.0, at(20), &profile).unwrap();
        assert_eq!(t.to, RoastState::Hold);

        assert_eq!(machine.update(220.0, at(80), &profile), None);
        let t = machine.update(220.0, at(81), &profile).unwrap();
        assert_eq!(t.to, RoastState::Cooling);

        assert_eq!(machine.update(31.0, at(200), &profile), None);
        let t = machine.update(29.0, at(210), &profile).unwrap();
        assert_eq!(t.to, RoastState::Off);
    }

    #[test]
    fn test_preheat_times_out_to_cooling() {
        let profile = profile();
        let mut machine = RoastStateMachine::new();
        machine.force(RoastState::Preheating);
        machine.update(160.0, at(0), &profile);
        assert_eq!(machine.get_state(), RoastState::Preheat);

        assert_eq!(machine.update(160.0, at(120), &profile), None);
        let t = machine.update(160.0, at(121), &profile).unwrap();
        assert_eq!((t.from, t.to), (RoastState::Preheat, RoastState::Cooling));
    }

    #[test]
    fn test_preheating_that_never_reaches_temperature_cools() {
        let profile = profile();
        let mut machine = RoastStateMachine::new();
        machine.force(RoastState::Preheating);
        assert_eq!(machine.update(50.0, at(5), &profile), None);
        assert_eq!(machine.update(80.0, at(125), &profile), None);
        let t = machine.update(90.0, at(126), &profile).unwrap();
        assert_eq!(t.to, RoastState::Cooling);
    }

    #[test]
    fn test_ramp_setpoint_climbs_past_hold() {
        let profile = profile();
        let mut machine = RoastStateMachine::new();
        machine.force(RoastState::Ramping);
        machine.update(160.0, at(0), &profile);

        assert_eq!(machine.setpoint(at(0), &profile), Some(160.0));
        assert_eq!(machine.setpoint(at(60), &profile), Some(170.0));
        assert_eq!(machine.setpoint(at(420), &profile), Some(230.0));
        // Still Ramping below the hold temperature, so the target keeps rising.
        assert_eq!(machine.update(219.0, at(420), &profile), None);
        assert!(machine.setpoint(at(480), &profile).unwrap() > 220.0);
        assert!(machine.update(220.5, at(480), &profile).is_some());
        assert_eq!(machine.get_state(), RoastState::Hold);
    }

    #[test]
    fn test_forced_state_is_stamped_by_next_update() {
        let profile = profile();
        let mut machine = RoastStateMachine::new();
        machine.force(RoastState::Cooling);
        assert_eq!(machine.entered_at(), None);
        machine.update(200.0, at(7), &profile);
        assert_eq!(machine.entered_at(), Some(at(7)));

        machine.force(RoastState::Ramping);
        assert_eq!(machine.entered_at(), None);
        assert_eq!(machine.setpoint(at(8), &profile), Some(225.0));
        machine.update(180.0, at(9), &profile);
        assert_eq!(machine.entered_at(), Some(at(9)));
        assert_eq!(machine.setpoint(at(9), &profile), Some(180.0));
    }

    #[test]
    fn test_setpoint_per_state() {
        let profile = profile();
        let mut machine = RoastStateMachine::new();
        assert_eq!(machine.setpoint(at(0), &profile), None);
        machine.force(RoastState::Preheating);
        assert_eq!(machine.setpoint(at(0), &profile), Some(155.0));
        machine.force(RoastState::Preheat);
        assert_eq!(machine.setpoint(at(0), &profile), Some(150.0));
        machine.force(RoastState::Hold);
        assert_eq!(machine.setpoint(at(0), &profile), Some(220.0));
        machine.force(RoastState::Cooling);
        assert_eq!(machine.setpoint(at(0), &profile), None);
    }
}
