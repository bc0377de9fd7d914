//! Crossover is a reverse proxy that sits in front of an API and adds two
//! request middlewares.
//!
//! Activity tracking extracts an identifier from every request path, counts
//! the logical sub-requests in the body (JSON batch arrays count per
//! element), and ships `{request_id, count}` entries to a collector in
//! batches, off the request path. Rate limiting derives a user id from the
//! path, admits requests while the user's usage is below their plan limit,
//! and answers `429` otherwise.
//!
//! # Architecture
//!
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (run, init, validate, health).
//! - [`config`] -- Configuration model, validation and file sources.
//! - [`error`] -- Crate error types using `thiserror`.
//! - [`middleware`] -- The activity and rate-limit middleware and their parts
//!   (path extraction, body interception, sub-request counting).
//! - [`telemetry`] -- Bounded queue, batching aggregator and HTTP collector.
//! - [`usage`] -- Per-user usage cache, plan-limit lookups and refresh loop.
//! - [`buffer_pool`] -- Reusable byte buffers for bodies and batch encoding.
//! - [`outbound`] -- Timed request/response exchange over the shared client.
//! - [`proxy`] -- Upstream forwarding and header construction.
//! - [`health`] -- `GET /health` handler.
//! - [`logging`] -- Structured tracing setup with JSON and pretty output.
//! - [`server`] -- Router assembly, shared state, HTTP client and shutdown.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `yaml` | YAML config file support _(enabled by default)_ |
//! | `json` | JSON config file support |
//! | `toml` | TOML config file support |
//! | `file-backends` | All file formats |
//! | `full` | All features |

// Binary crate: public functions are internal, not consumed by external users.
#![allow(clippy::missing_errors_doc)]

pub mod buffer_pool;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod outbound;
pub mod proxy;
pub mod server;
pub mod telemetry;
pub mod usage;
