use crate::{
    config::RoasterConfig,
    controller::RoastController,
    hardware::TemperatureSensor,
    protocol::{Command, InboundMessage, Outbound, Parameter},
    scheduler::Scheduler,
    session_log::SessionLog,
    status::StatusSnapshot,
    storage::{restore_gains, GainRecord, GainStore},
    types::{RoastMode, RoastState},
};
use embassy_time::Instant;
use embedded_hal::digital::v2::OutputPin;
use log::{debug, info, warn};

/// Enough for one tick: fault, state change, data, temperature, duty cycle.
pub const MAX_TICK_MESSAGES: usize = 6;

/// Fault lines and the closing status for one client message.
pub const MAX_REPLY_MESSAGES: usize = 1 + crate::protocol::MAX_PARAMETERS + crate::protocol::MAX_COMMANDS;

/// Owns the controller together with its boundary collaborators. Lives in
/// the control task; clients only ever see snapshots and outbound messages.
pub struct Roaster<S, T, F, G>
where
    S: TemperatureSensor,
    T: OutputPin,
    F: OutputPin,
    G: GainStore,
{
    controller: RoastController<S, T, F>,
    scheduler: Scheduler,
    session_log: Option<SessionLog>,
    gain_store: G,
}

impl<S, T, F, G> Roaster<S, T, F, G>
where
    S: TemperatureSensor,
    T: OutputPin,
    T::Error: core::fmt::Debug,
    F: OutputPin,
    F::Error: core::fmt::Debug,
    G: GainStore,
{
    pub fn new(
        controller: RoastController<S, T, F>,
        config: &RoasterConfig,
        session_log: Option<SessionLog>,
        gain_store: G,
    ) -> Self {
        Self {
            controller,
            scheduler: Scheduler::new(config.sample_period()),
            session_log,
            gain_store,
        }
    }

    pub fn controller(&self) -> &RoastController<S, T, F> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut RoastController<S, T, F> {
        &mut self.controller
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.controller.snapshot()
    }

    pub fn handle(&mut self, command: Command) -> StatusSnapshot {
        info!("Running command {:?}", command);
        match command {
            Command::Start => self.controller.start(),
            Command::Stop => self.controller.stop(),
            Command::Restart => self.controller.restart(),
            Command::Advance => {
                self.controller.advance();
            }
            Command::SaveConfig => self.save_config(),
            Command::LoadConfig => self.load_config(),
            Command::SimpleMode => self.controller.set_mode(RoastMode::Simple),
            Command::ProgramMode => self.controller.set_mode(RoastMode::Program),
        }
        self.sync_session_log();
        self.controller.snapshot()
    }

    /// Apply one parameter. Only a mode change can fail.
    pub fn apply(&mut self, parameter: &Parameter) -> Result<(), crate::types::Fault> {
        debug!("Setting {:?}", parameter);
        match parameter {
            Parameter::P(value) => self.controller.set_p(*value),
            Parameter::I(value) => self.controller.set_i(*value),
            Parameter::D(value) => self.controller.set_d(*value),
            Parameter::Setpoint(value) => self.controller.set_setpoint(*value),
            Parameter::RampRate(value) => self.controller.update_profile(|p| p.ramp_rate = *value),
            Parameter::PreheatTemperature(value) => {
                self.controller.update_profile(|p| p.preheat_temperature = *value)
            }
            Parameter::HoldTemperature(value) => {
                self.controller.update_profile(|p| p.hold_temperature = *value)
            }
            Parameter::HoldDuration(value) => {
                self.controller.update_profile(|p| p.hold_duration = value.max(0.0))
            }
            Parameter::MaxPreheatDuration(value) => {
                self.controller.update_profile(|p| p.max_preheat_duration = value.max(0.0))
            }
            Parameter::SafeTemperature(value) => {
                self.controller.update_profile(|p| p.safe_temperature = *value)
            }
            Parameter::Mode(name) => {
                let result = self.controller.set_mode_by_name(name);
                self.sync_session_log();
                return result;
            }
        }
        Ok(())
    }

    /// Parameters first, then commands in order. Replies with any fault
    /// lines followed by the resulting status.
    pub fn apply_message(
        &mut self,
        message: &InboundMessage,
    ) -> heapless::Vec<Outbound, MAX_REPLY_MESSAGES> {
        let mut replies = heapless::Vec::new();
        for parameter in &message.parameters {
            if let Err(fault) = self.apply(parameter) {
                let _ = replies.push(Outbound::Log(fault.to_string()));
            }
        }
        for command in &message.commands {
            self.handle(*command);
        }
        let _ = replies.push(Outbound::Status(self.controller.snapshot()));
        replies
    }

    pub fn save_config(&mut self) {
        let record = GainRecord::from(self.controller.gains());
        if let Err(e) = self.gain_store.save(&record) {
            warn!("Failed to save gains: {}", e);
        }
    }

    pub fn load_config(&mut self) {
        let gains = restore_gains(&mut self.gain_store, self.controller.gains());
        info!(
            "Gains now p={:.3} i={:.3} d={:.3}",
            gains.kp, gains.ki, gains.kd
        );
        self.controller.set_gains(gains);
    }

    /// Drive the loop. Call at least once per fast tick.
    pub fn poll(&mut self, now: Instant) -> heapless::Vec<Outbound, MAX_TICK_MESSAGES> {
        let mut messages = heapless::Vec::new();
        let tick = self.scheduler.poll(now);
        if tick.fast {
            self.controller.process_output(now);
        }
        if !tick.sample {
            return messages;
        }

        let report = self.controller.tick(now);
        if let Some(fault) = &report.fault {
            let _ = messages.push(Outbound::Log(fault.to_string()));
        }
        if let Some(transition) = &report.transition {
            info!("Roast state {:?} -> {:?}", transition.from, transition.to);
            let _ = messages.push(Outbound::Value("state", transition.to.as_index()));
        }
        if let Some(sample) = report.sample {
            if report.mode == RoastMode::Simple && report.state == RoastState::Hold {
                if let Some(log) = &self.session_log {
                    if let Err(e) = log.append(&sample) {
                        warn!("Failed to append to {}: {}", log.path().display(), e);
                    }
                }
            }
            let _ = messages.push(Outbound::Data(sample));
        }
        let _ = messages.push(Outbound::Value("temperature", report.temperature));
        let _ = messages.push(Outbound::Value("duty_cycle", report.duty_cycle));
        messages
    }

    pub fn until_next_sample(&self, now: Instant) -> embassy_time::Duration {
        self.scheduler.until_next_sample(now)
    }

    fn sync_session_log(&mut self) {
        if !self.controller.take_log_reset() {
            return;
        }
        if let Some(log) = &self.session_log {
            match log.reset() {
                Ok(()) => info!("Session log reset at {}", log.path().display()),
                Err(e) => warn!("Failed to reset session log {}: {}", log.path().display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{
        mock::{MockPin, ScriptedSensor},
        BurstOutput, FanController,
    };
    use crate::protocol::parse_message;
    use crate::storage::{FileGainStore, MemoryGainStore};
    use crate::types::{DerivativeMode, PidGains};
    use embassy_time::Duration;
    use std::path::PathBuf;

    fn controller(sensor: &ScriptedSensor) -> RoastController<ScriptedSensor, MockPin, MockPin> {
        RoastController::new(
            sensor.clone(),
            BurstOutput::new(MockPin::new(), Duration::from_millis(500)).unwrap(),
            FanController::new(MockPin::new()).unwrap(),
            PidGains::default(),
            DerivativeMode::OnMeasurement,
        )
    }

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("roaster-rs-runtime-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn test_save_load_roundtrip_on_fresh_roaster() {
        let path = temp_path("gains.json");
        let config = RoasterConfig::default();
        let sensor = ScriptedSensor::new(20.0);

        let mut first = Roaster::new(controller(&sensor), &config, None, FileGainStore::new(&path));
        let message = parse_message(r#"{"parameters": {"p": 0.4, "i": 0.03, "d": 0.02}, "commands": ["saveConfig"]}"#)
            .unwrap();
        first.apply_message(&message);

        let mut fresh = Roaster::new(controller(&sensor), &config, None, FileGainStore::new(&path));
        assert_eq!(fresh.snapshot().p, 10.0);
        let status = fresh.handle(Command::LoadConfig);
        assert!((status.p - 0.4).abs() < 1e-6);
        assert!((status.i - 0.03).abs() < 1e-6);
        assert!((status.d - 0.02).abs() < 1e-6);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_with_nothing_saved_keeps_gains() {
        let sensor = ScriptedSensor::new(20.0);
        let mut roaster = Roaster::new(
            controller(&sensor),
            &RoasterConfig::default(),
            None,
            MemoryGainStore::default(),
        );
        roaster.apply(&Parameter::I(0.5)).unwrap();
        let status = roaster.handle(Command::LoadConfig);
        assert_eq!(status.p, 10.0);
        assert_eq!(status.i, 0.5);
    }

    #[test]
    fn test_simple_session_is_logged() {
        let log_path = temp_path("temp.csv");
        let sensor = ScriptedSensor::new(20.0);
        let mut roaster = Roaster::new(
            controller(&sensor),
            &RoasterConfig::default(),
            Some(SessionLog::new(&log_path)),
            MemoryGainStore::default(),
        );

        let message = parse_message(r#"{"parameters": {"setpoint": 200}, "commands": ["start"]}"#).unwrap();
        let replies = roaster.apply_message(&message);
        assert!(matches!(replies.last(), Some(Outbound::Status(s)) if s.state == RoastState::Hold));

        let mut data = 0;
        for ms in (0..=4000).step_by(20) {
            for message in roaster.poll(Instant::from_millis(ms)) {
                if let Outbound::Data(_) = message {
                    data += 1;
                }
            }
        }
        assert_eq!(data, 3);

        let contents = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Time,Setpoint,Output,Temperature");
        assert_eq!(lines[1], "0,200,0,20");
        let _ = std::fs::remove_file(&log_path);
    }

    #[test]
    fn test_idle_poll_reports_temperature_and_duty() {
        let sensor = ScriptedSensor::new(31.5);
        let mut roaster = Roaster::new(
            controller(&sensor),
            &RoasterConfig::default(),
            None,
            MemoryGainStore::default(),
        );
        let messages = roaster.poll(Instant::from_millis(0));
        assert_eq!(
            messages.as_slice(),
            &[
                Outbound::Value("temperature", 31.5),
                Outbound::Value("duty_cycle", 0.0)
            ]
        );
        assert!(roaster.poll(Instant::from_millis(20)).is_empty());
    }

    #[test]
    fn test_unknown_mode_reported_to_clients() {
        let sensor = ScriptedSensor::new(20.0);
        let mut roaster = Roaster::new(
            controller(&sensor),
            &RoasterConfig::default(),
            None,
            MemoryGainStore::default(),
        );
        let message = parse_message(r#"{"parameters": {"mode": "TURBO", "setpoint": 150}}"#).unwrap();
        let replies = roaster.apply_message(&message);
        assert_eq!(replies.len(), 2);
        assert!(matches!(&replies[0], Outbound::Log(line) if line.contains("TURBO")));
        assert_eq!(roaster.snapshot().setpoint, 150.0);
        assert_eq!(roaster.snapshot().mode, RoastMode::Simple);
    }

    #[test]
    fn test_program_commands_change_state() {
        let sensor = ScriptedSensor::new(20.0);
        let mut roaster = Roaster::new(
            controller(&sensor),
            &RoasterConfig::default(),
            None,
            MemoryGainStore::default(),
        );
        let status = roaster.handle(Command::ProgramMode);
        assert_eq!(status.mode, RoastMode::Program);
        let status = roaster.handle(Command::Start);
        assert_eq!(status.state, RoastState::Preheating);
        let status = roaster.handle(Command::Stop);
        assert_eq!(status.state, RoastState::Cooling);
    }
}
