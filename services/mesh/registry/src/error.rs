//! Registry, lookup and model error types.

use mesh_wire::{Opcode, WireError};
use thiserror::Error;

/// Errors raised while building the element/model registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Another element already uses this index
    #[error("duplicate element index {0}")]
    DuplicateIndex(u8),

    /// Another model in the element already uses this numeric id
    #[error("element {element} already has a model with id {id:#06x}")]
    DuplicateModel {
        /// Element index
        element: u8,
        /// Colliding model id
        id: u16,
    },

    /// Element was created under another application path
    #[error("element path {path} is not under the application path (expected {expected})")]
    ForeignElement {
        /// Path of the rejected element
        path: String,
        /// Path derived from the application path and the element index
        expected: String,
    },

    /// Model is already bound to a different element path
    #[error("model already bound to {bound}, refusing {requested}")]
    AlreadyBound {
        /// Path the model is bound to
        bound: String,
        /// Path that was requested
        requested: String,
    },
}

/// Operator command resolution failures, listing the valid alternatives
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupFailure {
    /// No element with this index
    #[error("no element index = {index}, available element indexes = {available:?}")]
    Element {
        /// Requested index
        index: u64,
        /// Registered indexes
        available: Vec<u8>,
    },

    /// No model with this id in the element
    #[error(
        "no model with id = {id:#x}, available models id = [{}], available vnd models id = [{}]",
        hex_list(.models),
        hex_list(.vendor_models)
    )]
    Model {
        /// Requested id
        id: u16,
        /// Standard model ids in the element
        models: Vec<u16>,
        /// Vendor model ids in the element
        vendor_models: Vec<u16>,
    },

    /// The model has no handler for this opcode
    #[error("no op = {opcode}, available ops = [{}]", opcode_list(.available))]
    Opcode {
        /// Requested opcode
        opcode: Opcode,
        /// Opcodes the model handles
        available: Vec<Opcode>,
    },
}

/// Error returned by the outbound send primitive
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("publish failed: {0}")]
pub struct PublishError(pub String);

/// Errors raised by model handlers and inbound processing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Missing or malformed command arguments
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Payload could not be encoded or decoded
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Outbound send could not be queued
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Model has not been added to an element yet
    #[error("model is not bound to an element")]
    NotBound,

    /// Opcode is not in the model's command table
    #[error("unsupported opcode {0}")]
    UnsupportedOpcode(Opcode),
}

fn hex_list(ids: &[u16]) -> String {
    ids.iter()
        .map(|id| format!("{:#x}", id))
        .collect::<Vec<_>>()
        .join(", ")
}

fn opcode_list(ops: &[Opcode]) -> String {
    ops.iter()
        .map(|op| op.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
