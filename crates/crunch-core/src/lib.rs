//! Submission runner for time-series competitions.
//!
//! This crate drives a participant's code against a held-out dataset:
//!
//! - Data release resolution and staging downloads ([`adapter`])
//! - User code loading through an explicit entrypoint contract ([`loader`])
//! - Typed parameter binding by well-known name ([`binder`])
//! - The moon-indexed train/infer loop with embargo slicing ([`driver`])
//! - Prediction collection and structural checks ([`collector`], [`checks`])
//! - The sandboxed cloud variant: state file, launcher, child, control plane
//!   ([`sandbox`])
//!
//! # Quick Start
//!
//! ```no_run
//! use crunch_core::runner::{LocalRun, LocalRunInputs};
//!
//! # async fn example(inputs: LocalRunInputs) -> Result<(), crunch_core::RunnerError> {
//! let summary = LocalRun::new(inputs).execute().await?;
//! println!("prediction written to {}", summary.prediction_path.display());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `API_BASE_URL` | API base URL (default: `https://api.hub.crunchdao.com/`) |
//! | `WEB_BASE_URL` | Web base URL (default: `https://hub.crunchdao.com/`) |
//! | `API_KEY` | API key, takes precedence over the project push token |
//! | `DEBUG` | Enables debug logging in the binary |
//! | `COMPETITIONS_REPOSITORY` | Repository hosting competition resources |
//! | `COMPETITIONS_BRANCH` | Branch of that repository |
//! | `COMPETITIONS_DIRECTORY_PATH` | Local checkout overriding the repository |

pub mod adapter;
pub mod binder;
pub mod checks;
pub mod collector;
pub mod config;
pub mod driver;
pub mod errors;
pub mod loader;
pub mod model;
pub mod runner;
pub mod sandbox;
pub mod table;

pub use errors::{RunnerError, RunnerResult};
pub use table::{Cell, Column, ColumnData, DataType, Table};
