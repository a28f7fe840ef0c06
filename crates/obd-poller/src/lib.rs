//! OBD-II Poller
//!
//! Startup queries over a fresh connection ([`Session`]) and the long-lived
//! watch loop ([`Poller`]) that routes every arriving response into the
//! reading store.

mod poller;
mod session;
mod shutdown;

pub use poller::{Poller, PollerConfig, UpdateOutcome, WatchBinding};
pub use session::Session;
pub use shutdown::ShutdownHandle;

use obd_protocol::{ObdError, RegistryError};
use reading_store::StoreError;
use thiserror::Error;

/// Poller errors
#[derive(Debug, Error)]
pub enum PollerError {
    #[error(transparent)]
    Obd(#[from] ObdError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Command names split by whether the vehicle answers them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportReport {
    pub supported: Vec<String>,
    pub unsupported: Vec<String>,
}

impl SupportReport {
    pub fn is_supported(&self, name: &str) -> bool {
        self.supported.iter().any(|n| n == name)
    }
}
