//! stx: CUE-driven CloudFormation pipelines.
//!
//! Discovers CUE configuration units, evaluates them concurrently, filters
//! their `Stacks`, and exports templates, saves outputs or reports status.

pub mod auth;
pub mod cli;
pub mod core;
pub mod transport;
