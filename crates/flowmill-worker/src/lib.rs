// Flowmill worker runtime
//
// A pool of identical workers, each with a unique consumer name, joins the
// task stream's consumer group, executes handlers, and reports completions.

pub mod handlers;
pub mod runner;

pub use handlers::builtin_registry;
pub use runner::WorkerRunner;
