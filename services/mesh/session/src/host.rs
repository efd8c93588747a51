//! Interface of the remote mesh host service.
//!
//! The host daemon is reached over an IPC transport this crate does not
//! implement; everything it offers is consumed through [`MeshHost`].

use async_trait::async_trait;
use bytes::Bytes;
use mesh_registry::{Address, KeyIndex, ManagedObjects, ModelConfig, Publication};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors reported by host calls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The host answered the call with an error
    #[error("{0}")]
    Remote(String),
    /// The connection to the host is gone
    #[error("host connection closed")]
    Closed,
}

/// Handle to the node the application is attached as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    path: String,
}

impl NodeHandle {
    /// Create a handle for the node object at `path`
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Node object path
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Host configuration for one element
#[derive(Debug, Clone, PartialEq)]
pub struct ElementConfig {
    /// Element index as known to the host
    pub element_index: u8,
    /// Per-model configuration
    pub models: Vec<ModelConfig>,
}

/// Successful attach result
#[derive(Debug, Clone, PartialEq)]
pub struct AttachReply {
    /// Object path of the attached node
    pub node_path: String,
    /// Configuration for every element the host knows about
    pub configs: Vec<ElementConfig>,
}

/// Notifications pushed by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Interfaces of an object were removed
    InterfacesRemoved {
        /// Object path
        path: String,
    },
    /// A message arrived for one of our elements
    MessageReceived {
        /// Path of the addressed element
        element_path: String,
        /// Destination address
        destination: Address,
        /// Source address
        source: Address,
        /// Application key index
        key_index: KeyIndex,
        /// Opcode-prefixed payload
        data: Bytes,
    },
}

/// Remote mesh host operations
#[async_trait]
pub trait MeshHost: Send + Sync + fmt::Debug {
    /// Attach the application at `app_path`.
    ///
    /// `objects` is the application's introspection snapshot.
    async fn attach(
        &self,
        app_path: &str,
        objects: ManagedObjects,
        token: u64,
    ) -> Result<AttachReply, HostError>;

    /// Send a message from one of the node's elements
    async fn send(&self, node: &NodeHandle, publication: &Publication) -> Result<(), HostError>;

    /// Subscribe to host notifications
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<HostEvent>, HostError>;
}
