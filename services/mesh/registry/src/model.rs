//! Model abstraction: identifiers, host configuration, command tables and the
//! `Model` trait implemented by every behavior attached to an element.

use crate::error::{ModelError, PublishError, RegistryError};
use async_trait::async_trait;
use bytes::Bytes;
use mesh_wire::Opcode;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::RwLock;
use tracing::debug;

/// Unicast, group or virtual mesh address
pub type Address = u16;

/// Application key index
pub type KeyIndex = u16;

/// Host configuration key for the publication period
pub const PUBLICATION_PERIOD_KEY: &str = "PublicationPeriod";
/// Host configuration key for bound application keys
pub const BINDINGS_KEY: &str = "Bindings";
/// Host configuration key for subscription addresses
pub const SUBSCRIPTIONS_KEY: &str = "Subscriptions";

/// Identifier of a model: either a standard model id or a vendor model id
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelId {
    /// Standard (SIG) model
    Standard(u16),
    /// Vendor-scoped model
    Vendor(u16),
}

impl ModelId {
    /// Standard model id, if this is a standard model
    pub fn model_id(self) -> Option<u16> {
        match self {
            Self::Standard(id) => Some(id),
            Self::Vendor(_) => None,
        }
    }

    /// Vendor model id, if this is a vendor model
    pub fn vendor_id(self) -> Option<u16> {
        match self {
            Self::Vendor(id) => Some(id),
            Self::Standard(_) => None,
        }
    }

    /// Numeric id regardless of space
    pub fn value(self) -> u16 {
        match self {
            Self::Standard(id) | Self::Vendor(id) => id,
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard(id) => write!(f, "model {:#06x}", id),
            Self::Vendor(id) => write!(f, "vendor model {:#06x}", id),
        }
    }
}

/// Raw configuration the host delivers for one model on attach
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Numeric model id as known to the host
    pub model_id: u16,
    /// Configuration dictionary, kept verbatim
    pub options: Map<String, Value>,
}

impl ModelConfig {
    /// Create a configuration entry
    pub fn new(model_id: u16, options: Map<String, Value>) -> Self {
        Self { model_id, options }
    }

    /// Publication period in milliseconds, if present
    pub fn publication_period(&self) -> Option<u32> {
        self.options
            .get(PUBLICATION_PERIOD_KEY)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    /// Bound key indexes, if present
    pub fn bindings(&self) -> Option<Vec<KeyIndex>> {
        self.options.get(BINDINGS_KEY).map(u16_list)
    }

    /// Subscribed addresses, if present. Virtual labels are skipped.
    pub fn subscriptions(&self) -> Option<Vec<Address>> {
        self.options.get(SUBSCRIPTIONS_KEY).map(u16_list)
    }
}

fn u16_list(value: &Value) -> Vec<u16> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_u64)
                .filter_map(|v| u16::try_from(v).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Publication, binding and subscription state of a model
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelSettings {
    /// Publication period in milliseconds
    pub publication_period: Option<u32>,
    /// Bound application key indexes
    pub bindings: Vec<KeyIndex>,
    /// Subscribed addresses
    pub subscriptions: Vec<Address>,
}

/// Outbound message handed to the send primitive
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publication {
    /// Path of the sending element
    pub element_path: String,
    /// Destination address
    pub destination: Address,
    /// Application key index
    pub key_index: KeyIndex,
    /// Opcode-prefixed payload
    pub payload: Bytes,
}

/// Outbound send primitive.
///
/// Implementations queue the publication and return immediately; delivery is
/// reported asynchronously.
pub trait Publisher: Send + Sync {
    /// Queue a publication for sending
    fn publish(&self, publication: Publication) -> Result<(), PublishError>;
}

/// Command handler signature for a model of type `M`
pub type CommandHandler<M> = fn(&M, &dyn Publisher, &[String]) -> Result<(), ModelError>;

/// Sparse opcode to handler table
pub type CommandTable<M> = BTreeMap<Opcode, CommandHandler<M>>;

/// Look up and run a handler from a command table
pub fn dispatch_command<M>(
    model: &M,
    table: &CommandTable<M>,
    opcode: Opcode,
    publisher: &dyn Publisher,
    args: &[String],
) -> Result<(), ModelError> {
    let handler = table
        .get(&opcode)
        .ok_or(ModelError::UnsupportedOpcode(opcode))?;
    handler(model, publisher, args)
}

/// State shared by every model implementation
#[derive(Debug)]
pub struct ModelState {
    id: ModelId,
    path: OnceCell<String>,
    settings: RwLock<ModelSettings>,
}

impl ModelState {
    /// Create state for a model with the given identifier
    pub fn new(id: ModelId) -> Self {
        Self {
            id,
            path: OnceCell::new(),
            settings: RwLock::new(ModelSettings::default()),
        }
    }

    /// Model identifier
    pub fn id(&self) -> ModelId {
        self.id
    }

    /// Element path the model is bound to
    pub fn path(&self) -> Option<&str> {
        self.path.get().map(String::as_str)
    }

    /// Bind to an element path. Rebinding to the same path is a no-op.
    pub fn bind_path(&self, path: &str) -> Result<(), RegistryError> {
        let bound = self.path.get_or_init(|| path.to_string());
        if bound == path {
            Ok(())
        } else {
            Err(RegistryError::AlreadyBound {
                bound: bound.clone(),
                requested: path.to_string(),
            })
        }
    }

    /// Apply the fields that are present
    pub async fn configure(
        &self,
        publication: Option<u32>,
        bindings: Option<Vec<KeyIndex>>,
        subscriptions: Option<Vec<Address>>,
    ) {
        let mut settings = self.settings.write().await;
        if let Some(period) = publication {
            settings.publication_period = Some(period);
        }
        if let Some(bindings) = bindings {
            settings.bindings = bindings;
        }
        if let Some(subscriptions) = subscriptions {
            settings.subscriptions = subscriptions;
        }
        debug!("Configured {}: {:?}", self.id, *settings);
    }

    /// Current settings
    pub async fn settings(&self) -> ModelSettings {
        self.settings.read().await.clone()
    }
}

/// Behavior attached to an element
#[async_trait]
pub trait Model: Send + Sync + fmt::Debug {
    /// Shared model state
    fn state(&self) -> &ModelState;

    /// Opcodes this model can send, in ascending order
    fn opcodes(&self) -> Vec<Opcode>;

    /// Run the command handler registered for `opcode`
    fn invoke(
        &self,
        opcode: Opcode,
        publisher: &dyn Publisher,
        args: &[String],
    ) -> Result<(), ModelError>;

    /// Handle an inbound message addressed to the owning element.
    ///
    /// Unknown opcodes are ignored.
    async fn process_message(
        &self,
        source: Address,
        key_index: KeyIndex,
        data: &[u8],
    ) -> Result<(), ModelError> {
        let (opcode, rest) = mesh_wire::decode(data)?;
        debug!(
            "{} ignoring opcode {} from {:#06x} (key {}, {} bytes)",
            self.identifier(),
            opcode,
            source,
            key_index,
            rest.len()
        );
        Ok(())
    }

    /// Model identifier
    fn identifier(&self) -> ModelId {
        self.state().id()
    }

    /// Element path the model is bound to
    fn path(&self) -> Option<&str> {
        self.state().path()
    }

    /// Bind the model to an element path (write-once)
    fn bind_path(&self, path: &str) -> Result<(), RegistryError> {
        self.state().bind_path(path)
    }

    /// Partially update publication, bindings and subscriptions
    async fn configure(
        &self,
        publication: Option<u32>,
        bindings: Option<Vec<KeyIndex>>,
        subscriptions: Option<Vec<Address>>,
    ) {
        self.state()
            .configure(publication, bindings, subscriptions)
            .await
    }

    /// Current publication, bindings and subscriptions
    async fn settings(&self) -> ModelSettings {
        self.state().settings().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_model_id_spaces() {
        let std_id = ModelId::Standard(0x1000);
        assert_eq!(std_id.model_id(), Some(0x1000));
        assert_eq!(std_id.vendor_id(), None);

        let vnd_id = ModelId::Vendor(0x0000);
        assert_eq!(vnd_id.model_id(), None);
        assert_eq!(vnd_id.vendor_id(), Some(0));
        assert_eq!(vnd_id.to_string(), "vendor model 0x0000");
    }

    #[test]
    fn test_bind_path_write_once() {
        let state = ModelState::new(ModelId::Vendor(0));
        assert_eq!(state.path(), None);

        state.bind_path("/example/ele00").unwrap();
        state.bind_path("/example/ele00").unwrap();
        assert_eq!(state.path(), Some("/example/ele00"));

        let err = state.bind_path("/example/ele01").unwrap_err();
        assert_eq!(
            err,
            RegistryError::AlreadyBound {
                bound: "/example/ele00".to_string(),
                requested: "/example/ele01".to_string(),
            }
        );
        assert_eq!(state.path(), Some("/example/ele00"));
    }

    #[tokio::test]
    async fn test_configure_partial_update() {
        let state = ModelState::new(ModelId::Standard(0x1000));
        state.configure(Some(1000), Some(vec![0, 1]), Some(vec![0xc000])).await;

        // Only bindings present: the other fields are kept
        state.configure(None, Some(vec![2]), None).await;

        let settings = state.settings().await;
        assert_eq!(settings.publication_period, Some(1000));
        assert_eq!(settings.bindings, vec![2]);
        assert_eq!(settings.subscriptions, vec![0xc000]);
    }

    #[test]
    fn test_model_config_fields() {
        let options = json!({
            "Bindings": [0, 1],
            "PublicationPeriod": 5000,
            "Subscriptions": [49152, [1, 2, 3]],
            "Vendor": 0x05f1
        });
        let config = ModelConfig::new(0, options.as_object().cloned().unwrap());

        assert_eq!(config.bindings(), Some(vec![0, 1]));
        assert_eq!(config.publication_period(), Some(5000));
        assert_eq!(config.subscriptions(), Some(vec![49152]));

        let empty = ModelConfig::new(0, Map::new());
        assert_eq!(empty.bindings(), None);
        assert_eq!(empty.publication_period(), None);
        assert_eq!(empty.subscriptions(), None);
    }
}
