//! Per-client session tracking

pub mod state;

pub use state::{CloseReason, SessionPhase, SessionState};
