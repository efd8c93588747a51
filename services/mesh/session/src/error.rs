//! Session error types.

use crate::host::HostError;
use mesh_registry::{LookupFailure, ModelError};
use thiserror::Error;

/// Errors raised by the attach driver and the command worker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Malformed or missing operator command arguments
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operator command references something that is not registered
    #[error("lookup failed: {0}")]
    Lookup(#[from] LookupFailure),

    /// A model handler rejected the command
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Host configured an element the application never registered
    #[error("protocol violation: host configured element {index}, registered elements are {known:?}")]
    ProtocolViolation {
        /// Element index sent by the host
        index: u8,
        /// Indexes registered locally
        known: Vec<u8>,
    },

    /// Attach was rejected; the session cannot continue
    #[error("failed to register application: {0}")]
    AttachFailure(String),

    /// A host call other than attach failed
    #[error("remote call failed: {0}")]
    RemoteCall(#[from] HostError),
}
