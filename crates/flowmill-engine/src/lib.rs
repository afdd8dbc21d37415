// Flowmill engine: workflow use cases
//
// Submit persists a definition and seeds hot state; trigger publishes the
// root tasks; orchestrate reacts to completions until the run is terminal.
// Cancel/status/results round out the lifecycle for the submission surface.

pub mod cancel;
pub mod dag_cache;
pub mod orchestrate;
pub mod results;
pub mod status;
pub mod submit;
pub mod trigger;

pub use cancel::CancelWorkflow;
pub use dag_cache::DagCache;
pub use orchestrate::{Orchestrator, OrchestratorConfig};
pub use results::{ExecutionResultsView, GetWorkflowResults};
pub use status::{ExecutionStatusView, GetWorkflowStatus};
pub use submit::SubmitWorkflow;
pub use trigger::TriggerExecution;
