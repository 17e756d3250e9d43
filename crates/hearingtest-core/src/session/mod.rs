//! Session control
//!
//! - [`procedure`]: per-test stimulus planning and response scoring
//! - [`sequencer`]: drives a procedure trial by trial
//! - [`input`]: subject responses and where they come from
//! - [`trial`]: append-only trial log
//! - [`result`]: terminal session records and sinks

pub mod input;
pub mod procedure;
pub mod result;
pub mod sequencer;
pub mod trial;

pub use input::{ChannelResponses, InputEvent, Response, ResponseSource, ScriptedResponses};
pub use procedure::{procedure_for, Procedure, TestKind};
pub use result::{JsonSink, MemorySink, ResultSink, SessionRecord};
pub use sequencer::{Sequencer, TrialPhase};
pub use trial::{Trial, TrialLog};
