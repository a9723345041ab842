pub mod config;
pub mod controller;
pub mod hardware;
pub mod pid;
pub mod protocol;
pub mod roast_states;
pub mod runtime;
pub mod scheduler;
pub mod session_log;
pub mod status;
pub mod storage;
pub mod types;

#[cfg(target_os = "espidf")]
pub mod firmware;

pub use types::*;
pub use controller::*;
pub use runtime::Roaster;
