//! # hidock-client
//!
//! Host-side protocol engine for HiDock recorders.
//!
//! This crate provides:
//! - A command queue that keeps exactly one command in flight
//! - A receive pipeline reassembling fragmented USB transfers
//! - Streaming accumulators for file listings and downloads
//! - A typed async API over the device command set

pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod model;
pub mod registry;
pub mod streaming;
pub mod transport;

pub use config::{ClientConfig, ConfigError};
pub use connection::{Command, Connection, ConnectionEvent, ConnectionPhase};
pub use device::Device;
pub use error::ClientError;
pub use model::{DeviceIdentity, DeviceModel, Feature};
pub use registry::Reply;
pub use streaming::{Step, StreamingOperation, TransferOutcome};
pub use transport::Transport;
