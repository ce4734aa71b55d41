//! The pushmon agent: samples metrics into a local [`StorageController`],
//! reports them to the collector on a fixed interval, and puts undelivered
//! batches back without double counting.
//!
//! [`StorageController`]: pushmon_storage::StorageController

pub mod config;
pub mod orchestrator;
pub mod shutdown;
pub mod transport;
