// author: kodeholic

pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod room;
pub mod session;
pub mod signaling;
pub mod utils;

pub use error::{CallError, CallResult};
pub use session::{CallConfig, CallSession, CallStatus};
