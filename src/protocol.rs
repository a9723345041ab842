//! JSON messages exchanged with the web client over the WebSocket.
//!
//! Inbound: `{"parameters": {"p": 1.5, ...}, "commands": ["start", ...]}`
//! Outbound: `{"type": "status" | "data" | "log", "data": ...}`

use crate::session_log::format_row;
use crate::status::StatusSnapshot;
use crate::types::TelemetrySample;
use log::{debug, warn};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::Value;

pub const MAX_PARAMETERS: usize = 16;
pub const MAX_COMMANDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Restart,
    /// Beans charged, leave Preheat.
    Advance,
    SaveConfig,
    LoadConfig,
    SimpleMode,
    ProgramMode,
}

impl Command {
    pub fn from_name(name: &str) -> Option<Self> {
        let command = match name {
            "start" => Command::Start,
            "stop" => Command::Stop,
            "restart" => Command::Restart,
            "advance" => Command::Advance,
            "saveConfig" => Command::SaveConfig,
            "loadConfig" => Command::LoadConfig,
            "simple_mode" => Command::SimpleMode,
            "program_mode" => Command::ProgramMode,
            _ => return None,
        };
        Some(command)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    P(f32),
    I(f32),
    D(f32),
    Setpoint(f32),
    RampRate(f32),
    PreheatTemperature(f32),
    HoldTemperature(f32),
    HoldDuration(f32),
    MaxPreheatDuration(f32),
    SafeTemperature(f32),
    /// Mode name as sent by the client. Unknown names fault the controller.
    Mode(String),
}

impl Parameter {
    fn parse(name: &str, value: &Value) -> Option<Self> {
        if name == "mode" {
            return match value {
                Value::String(mode) => Some(Parameter::Mode(mode.clone())),
                Value::Number(n) => match n.as_u64() {
                    Some(0) => Some(Parameter::Mode("SIMPLE".to_string())),
                    Some(1) => Some(Parameter::Mode("PROGRAM".to_string())),
                    _ => Some(Parameter::Mode(n.to_string())),
                },
                _ => None,
            };
        }

        let value = value.as_f64().map(|v| v as f32).filter(|v| v.is_finite())?;
        let parameter = match name {
            "p" => Parameter::P(value),
            "i" => Parameter::I(value),
            "d" => Parameter::D(value),
            "setpoint" => Parameter::Setpoint(value),
            "ramp_rate" => Parameter::RampRate(value),
            "preheat_temperature" => Parameter::PreheatTemperature(value),
            "hold_temperature" => Parameter::HoldTemperature(value),
            "hold_duration" => Parameter::HoldDuration(value),
            "max_preheat_duration" => Parameter::MaxPreheatDuration(value),
            "safe_temperature" => Parameter::SafeTemperature(value),
            _ => return None,
        };
        Some(parameter)
    }
}

/// A decoded client message. Entries that failed validation are counted in
/// `rejected` and otherwise ignored.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InboundMessage {
    pub parameters: heapless::Vec<Parameter, MAX_PARAMETERS>,
    pub commands: heapless::Vec<Command, MAX_COMMANDS>,
    pub rejected: usize,
}

#[derive(Debug)]
pub enum ProtocolError {
    Json(serde_json::Error),
    NotAnObject,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Json(e) => write!(f, "malformed JSON: {}", e),
            ProtocolError::NotAnObject => write!(f, "message is not a JSON object"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Json(e)
    }
}

pub fn parse_message(payload: &str) -> Result<InboundMessage, ProtocolError> {
    let root: Value = serde_json::from_str(payload)?;
    let root = root.as_object().ok_or(ProtocolError::NotAnObject)?;
    let mut message = InboundMessage::default();

    match root.get("parameters") {
        Some(Value::Object(parameters)) => {
            for (name, value) in parameters {
                match Parameter::parse(name, value) {
                    Some(parameter) => {
                        if message.parameters.push(parameter).is_err() {
                            warn!("Too many parameters in one message, dropping '{}'", name);
                            message.rejected += 1;
                        }
                    }
                    None => {
                        warn!("Rejected parameter '{}' = {}", name, value);
                        message.rejected += 1;
                    }
                }
            }
        }
        Some(other) => {
            warn!("'parameters' must be an object, got {}", other);
            message.rejected += 1;
        }
        None => {}
    }

    match root.get("commands") {
        Some(Value::Array(commands)) => {
            for entry in commands {
                match entry.as_str().and_then(Command::from_name) {
                    Some(command) => {
                        if message.commands.push(command).is_err() {
                            warn!("Too many commands in one message, dropping {}", entry);
                            message.rejected += 1;
                        }
                    }
                    None => {
                        warn!("Unknown command: {}", entry);
                        message.rejected += 1;
                    }
                }
            }
        }
        Some(other) => {
            warn!("'commands' must be an array, got {}", other);
            message.rejected += 1;
        }
        None => {}
    }

    debug!(
        "Parsed message: {} parameters, {} commands, {} rejected",
        message.parameters.len(),
        message.commands.len(),
        message.rejected
    );
    Ok(message)
}

/// Messages pushed to every connected client.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// One telemetry tuple, sent while heating.
    Data(TelemetrySample),
    /// Full status after a client message or on connect.
    Status(StatusSnapshot),
    /// A single status entry, e.g. `temperature` on every tick.
    Value(&'static str, f32),
    Log(String),
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: T,
}

struct Pairs<'a>(&'a [(&'static str, f32)]);

impl Serialize for Pairs<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl Outbound {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Outbound::Data(sample) => serde_json::to_string(&Envelope {
                kind: "data",
                data: format_row(sample),
            }),
            Outbound::Status(snapshot) => serde_json::to_string(&Envelope {
                kind: "status",
                data: Pairs(&snapshot.entries()),
            }),
            Outbound::Value(name, value) => serde_json::to_string(&Envelope {
                kind: "status",
                data: Pairs(&[(*name, *value)]),
            }),
            Outbound::Log(line) => serde_json::to_string(&Envelope {
                kind: "log",
                data: line,
            }),
        }
    }
}
