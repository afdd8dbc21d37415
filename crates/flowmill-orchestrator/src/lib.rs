// Flowmill orchestrator process

pub mod runner;

pub use runner::OrchestratorRunner;
