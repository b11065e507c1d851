pub mod completion;
pub mod config;
pub mod engine;
pub mod task;
