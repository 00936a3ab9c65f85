//! Human-in-the-loop tagging of newly seen source channels.

pub mod action;
pub mod session;
pub mod workflow;

pub use action::{CallbackAction, TagAction};
pub use session::{PendingChannel, SessionStore, spawn_expiry_task};
pub use workflow::{Button, Decision, Prompt, TaggingWorkflow, WorkflowState};
