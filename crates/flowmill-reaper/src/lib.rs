// Flowmill reaper process

pub mod runner;

pub use runner::Reaper;
