#![forbid(unsafe_code)]

//! Core library of the dosetrack dose journal.
//!
//! This crate provides:
//! - Domain types (info rows, log rows, user settings, name types)
//! - Transactional storage with deadlines and cancellation
//! - Name resolution and unit conversion
//! - The info table and fetching from an external source
//! - Log appends, queries and mutations, progression and cost totals
//! - Concurrent request dispatch and CSV export

pub mod types;
pub mod error;
pub mod context;
pub mod config;
pub mod logging;
pub mod store;
pub mod names;
pub mod convert;
pub mod info;
pub mod fetch;
pub mod journal;
pub mod logs;
pub mod settings;
pub mod progression;
pub mod costs;
pub mod dispatch;
pub mod export;

// Re-export commonly used types
pub use error::{Action, Error, ErrorKind, Result};
pub use types::*;
pub use context::Context;
pub use config::Config;
pub use store::{DbDriver, Store, StoreLocation};
pub use names::{NamesConfig, Resolver};
pub use fetch::{FetchOutcome, InfoSource, JsonDirSource};
pub use journal::Journal;
pub use logs::{LogQuery, NewDose};
pub use progression::compute_time_till;
pub use dispatch::{submit, Outcome, Request, Response};
pub use export::format_timestamp;
