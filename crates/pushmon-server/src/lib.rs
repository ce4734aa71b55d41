//! Collector server for pushmon agents.
//!
//! Agents POST batches to `/v1/metrics/batch`; the server merges them into
//! one authoritative [`StorageController`](pushmon_storage::StorageController)
//! and serves current totals over a small JSON API.

pub mod api;
pub mod app;
pub mod config;
pub mod logging;
pub mod state;
