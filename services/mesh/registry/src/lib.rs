//! Element and model registry, opcode dispatch, and introspection for the mesh application.
//!
//! An [`Application`] owns [`Element`]s, each owning an ordered list of
//! [`Model`]s. Inbound messages are broadcast to every model of the
//! addressed element; outbound operator commands resolve
//! element index → model id → opcode and run the model's typed handler.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod application;
pub mod args;
pub mod element;
pub mod error;
pub mod model;
pub mod text;

pub use application::{
    AppIdentity, Application, InterfaceMap, ManagedObjects, Resolved, APPLICATION_INTERFACE,
};
pub use args::{parse_address, parse_int, parse_key_index};
pub use element::{element_path, Element, Properties, ELEMENT_INTERFACE};
pub use error::{LookupFailure, ModelError, PublishError, RegistryError};
pub use model::{
    dispatch_command, Address, CommandHandler, CommandTable, KeyIndex, Model, ModelConfig, ModelId,
    ModelSettings, ModelState, Publication, Publisher,
};
pub use text::{
    TextCommand, TextMessage, VendorTextClient, HELLO_OPCODE, INBOX_CAPACITY, PATIENT_OPCODE,
};
