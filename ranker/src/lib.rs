//! # Quickplay Ranker
//!
//! Periodically pulls the community server directory, decides which servers
//! are eligible for quickplay, scores the survivors and publishes the ranked
//! list.
//!
//! ## Tick
//!
//! Every poll runs the same steps on a single task:
//!
//! 1. Refresh the item schema when its overview moved or the month changed
//!    ([`schema`]).
//! 2. Re-read the operator tables ([`store`]).
//! 3. Fetch the directory, falling back to re-probing the previous tick's
//!    servers when the fetch fails ([`directory`]).
//! 4. Evaluate every candidate concurrently: filter chain ([`classifier`]),
//!    live probe check and geolocation ([`pipeline`], [`geo`]), then
//!    scoring ([`scoring`]).
//! 5. Apply the deferred trend and jitter updates ([`cache`]).
//! 6. Sort, write the snapshot artifact and post it downstream
//!    ([`publisher`]).
//!
//! Failures inside a tick are logged and the next tick starts on schedule
//! ([`runner`]).
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use clap::Parser;
//! use ranker::config::Config;
//!
//! let config = Config::parse();
//! config.validate().expect("invalid configuration");
//! ```

pub mod cache;
pub mod classifier;
pub mod config;
pub mod directory;
pub mod error;
pub mod geo;
pub mod pipeline;
pub mod publisher;
pub mod runner;
pub mod schema;
pub mod scoring;
pub mod store;
pub mod tags;
pub mod utils;
pub mod vdf;

pub use error::{Error, Result};
