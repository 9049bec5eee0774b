//! Core pipeline: discovery, evaluation, stack views, artifact paths.

pub mod artifact;
pub mod config;
pub mod discovery;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod process;
pub mod secrets;
pub mod stacks;
pub mod tree;
pub mod types;
