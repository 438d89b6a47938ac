//! Media Crawler Core Library
//!
//! Crawls social-media sites (notes, comments, creators) and persists what
//! it finds idempotently on disk, optionally mirrored into a database.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`crawler`] - error taxonomy, risk hints, requests/results and the
//!   bounded `for_each_limit` dispatcher
//! - [`fetch`] - HTTP client with retry, proxy rotation and body caps
//! - [`proxy`] - proxy leases, providers and the rotating pool
//! - [`logging`] - `tracing` setup plus the log ring and broadcast bus
//! - [`store`] - append-unique files, workbooks and database mirrors
//! - [`download`] - media downloader
//! - [`platform`] - runner trait, registry and site runners
//! - [`supervisor`] - single-slot job supervisor
//! - [`server`] - axum control plane
//! - [`config`] - TOML configuration and per-job overrides

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod crawler;
pub mod download;
pub mod fetch;
pub mod logging;
pub mod platform;
pub mod proxy;
pub mod server;
pub mod store;
pub mod supervisor;

// Re-export commonly used types
pub use config::{Config, ConfigError, Overrides};
pub use crawler::{CrawlResult, CrawlerError, ErrorKind, Mode, Request, RiskHint, RunOutcome};
pub use fetch::FetchClient;
pub use platform::{Registry, Runner, RunnerContext, builtin_registry};
pub use store::{Store, StoreError, StoreOptions};
pub use supervisor::{RunRequest, SupervisorError, TaskState, TaskStatus, TaskSupervisor};
