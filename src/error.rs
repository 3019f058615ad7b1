//! Crate-level error aggregation.
//!
//! Subsystems keep their own typed errors; this enum exists for callers
//! (mainly the binary) that need to bubble any of them upward.

use thiserror::Error;

use crate::bus::BusError;
use crate::config::ConfigError;
use crate::context::ContextStoreError;
use crate::database::DatabaseError;
use crate::gateway::{GatewayError, SupervisorError};
use crate::memory::MemoryError;
use crate::relay::RelayError;

/// Any switchboard subsystem error.
#[derive(Debug, Error)]
pub enum SwitchboardError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    ContextStore(#[from] ContextStoreError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
