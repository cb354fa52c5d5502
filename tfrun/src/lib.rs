//! Terraform Cloud/Enterprise run orchestration for CI pipelines.
//!
//! A flow configures a workspace, uploads variables and a configuration version, creates a
//! run and drives it to a terminal or blocked state, rendering a summary of every phase it
//! observes. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (status mapping, the decision gate, variable
//!   parsing, change counting). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (environment, child processes, the HTTP API,
//!   the `tfci` tool, pipeline outputs). Behind the [`io::remote::RemoteClient`] seam so
//!   flows can be tested against a scripted platform.
//!
//! Orchestration modules ([`prepare`], [`poll`], [`plan`], [`apply`]) coordinate core
//! logic with I/O to implement the CLI commands.

pub mod apply;
pub mod cicd;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod outcome;
pub mod plan;
pub mod poll;
pub mod prepare;
pub mod settings;
pub mod summary;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
