//! Side-effecting adapters: files, environment, child processes and the remote platform.

pub mod actions;
pub mod artifacts;
pub mod client;
pub mod config;
pub mod env;
pub mod outputs;
pub mod process;
pub mod remote;
pub mod tfc_api;
pub mod tfci;
