//! The capture session: state machine, countdown, recorder collaborator,
//! and attempt history.

pub mod history;
pub mod machine;
pub mod recorder;
pub mod status;

pub use history::{AttemptRecord, History};
pub use machine::{CaptureMachine, CaptureOptions};
pub use recorder::{CommandRecorder, FinalizeEvent, Recorder};
pub use status::{Session, SessionHandle, SessionState, TickOutcome};
