//! The document review workflow.
//!
//! ```text
//! initial --upload--> uploaded --approve [long]--> processing --processed--> approved
//!                        |    \--approve [!long]-----------------------------^
//!                        \--reject--> rejected
//! ```
//!
//! Long documents are summarized (and the original archived when leaving
//! `processing`) before approval; short ones are approved directly.

use crate::definition::{MachineDefinition, StateDefinition, TransitionDefinition};
use crate::error::CoreError;
use crate::instance::Instance;
use serde_json::Value;

pub const NAME: &str = "document_review";

/// Whether the submitted document counts as long.
///
/// Reads the `long` flag of the approval payload. Deployments that decide
/// this differently should build their own table around another predicate.
pub fn is_long(_instance: &Instance, payload: &Value) -> bool {
    payload
        .get("long")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

pub fn definition() -> Result<MachineDefinition, CoreError> {
    MachineDefinition::builder(NAME)
        .initial("initial")
        .state(StateDefinition::new("initial"))
        .state(StateDefinition::new("uploaded").on_entry(["notifyReviewer"]))
        .state(
            StateDefinition::new("processing")
                .on_entry(["summarize"])
                .on_exit(["archive"]),
        )
        .state(StateDefinition::new("approved").on_entry(["notifyUploader"]))
        .state(StateDefinition::new("rejected").on_entry(["delete", "notifyUploader"]))
        .transition(TransitionDefinition::new("upload", "initial", "uploaded"))
        .transition(TransitionDefinition::new("approve", "uploaded", "processing").guard(is_long))
        .transition(TransitionDefinition::new("approve", "uploaded", "approved").unless(is_long))
        .transition(TransitionDefinition::new("processed", "processing", "approved"))
        .transition(TransitionDefinition::new("reject", "uploaded", "rejected"))
        .build()
}
