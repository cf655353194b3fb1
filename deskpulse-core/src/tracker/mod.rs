//! Activity tracking
//!
//! Raw focus events come in one at a time from the platform event source
//! (an external collaborator). [`SessionBuilder`] coalesces them into timed
//! sessions and [`SessionRecorder`] writes those to the session log without
//! ever dropping one on a failed write.

mod builder;
mod recorder;

pub use builder::SessionBuilder;
pub use recorder::{RecordOutcome, SessionRecorder};
