//! AEI Relay
//!
//! Moves AEI train files from a reader's FTP upload directory to an external
//! HTTP API, one JSON record per request, with every step tracked in
//! PostgreSQL.
//!
//! # Pipeline
//!
//! ```text
//! FTP uploads/ --> Coordinator --> queue --> DeliveryWorker --> external API
//!                      |                          |
//!                      +------ file_records ------+---- api_call_records
//! ```
//!
//! - [`coordinator`]: scheduled discovery, download, parse and enqueue
//! - [`worker`]: per-message delivery with persisted attempts
//! - [`parser`]: AEI segment parser
//! - [`store`]: status store (PostgreSQL or in-memory)
//! - [`transfer`]: FTP transfer client (or in-memory)
//! - [`queue`]: apalis-backed message queue (or in-memory)
//! - [`notifier`]: SendGrid failure emails
//! - [`api`]: read-only status API

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod api;
pub mod api_client;
pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod features;
pub mod middleware;
pub mod notifier;
pub mod parser;
pub mod queue;
pub mod runtime;
pub mod store;
pub mod transfer;
pub mod worker;

pub use coordinator::{Coordinator, RunSummary};
pub use worker::{DeliveryError, DeliveryWorker};
