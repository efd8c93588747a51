//! Elements: addressable containers of models.

use crate::error::{LookupFailure, RegistryError};
use crate::model::{Address, KeyIndex, Model, ModelConfig, ModelId};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Interface name under which element properties are exposed
pub const ELEMENT_INTERFACE: &str = "org.bluez.mesh.Element1";

/// Property name to value map of one interface
pub type Properties = BTreeMap<String, Value>;

/// Derive an element path from the application base path
pub fn element_path(base_path: &str, index: u8) -> String {
    format!("{}/ele{:02x}", base_path, index)
}

/// Addressable endpoint owning an ordered list of models
#[derive(Debug)]
pub struct Element {
    index: u8,
    path: String,
    models: Vec<Arc<dyn Model>>,
    config: RwLock<Vec<ModelConfig>>,
}

impl Element {
    /// Create an element under `base_path`
    pub fn new(base_path: &str, index: u8) -> Self {
        let path = element_path(base_path, index);
        debug!("Created element {}", path);
        Self {
            index,
            path,
            models: Vec::new(),
            config: RwLock::new(Vec::new()),
        }
    }

    /// Element index
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Element object path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Models in registration order
    pub fn models(&self) -> &[Arc<dyn Model>] {
        &self.models
    }

    /// Bind a model to this element and append it
    pub fn add_model(&mut self, model: Arc<dyn Model>) -> Result<(), RegistryError> {
        let id = model.identifier().value();
        if self.models.iter().any(|m| m.identifier().value() == id) {
            return Err(RegistryError::DuplicateModel {
                element: self.index,
                id,
            });
        }

        model.bind_path(&self.path)?;
        debug!("Added {} to element {}", model.identifier(), self.index);
        self.models.push(model);
        Ok(())
    }

    /// Standard model ids in registration order
    pub fn model_ids(&self) -> Vec<u16> {
        self.models
            .iter()
            .filter_map(|m| m.identifier().model_id())
            .collect()
    }

    /// Vendor model ids in registration order
    pub fn vendor_model_ids(&self) -> Vec<u16> {
        self.models
            .iter()
            .filter_map(|m| m.identifier().vendor_id())
            .collect()
    }

    /// Find a model by numeric id, standard ids first, then vendor ids
    pub fn find_model(&self, id: u16) -> Result<&Arc<dyn Model>, LookupFailure> {
        self.models
            .iter()
            .find(|m| m.identifier() == ModelId::Standard(id))
            .or_else(|| {
                self.models
                    .iter()
                    .find(|m| m.identifier() == ModelId::Vendor(id))
            })
            .ok_or_else(|| LookupFailure::Model {
                id,
                models: self.model_ids(),
                vendor_models: self.vendor_model_ids(),
            })
    }

    /// Deliver an inbound message to every model of the element.
    ///
    /// Returns the number of models that processed it without error.
    pub async fn receive(
        &self,
        destination: Address,
        source: Address,
        key_index: KeyIndex,
        data: &[u8],
    ) -> usize {
        debug!(
            "Received message: dest = {:#06x}, source = {:#06x}, key = {}, data = {:02x?}",
            destination, source, key_index, data
        );

        let mut handled = 0;
        for model in &self.models {
            match model.process_message(source, key_index, data).await {
                Ok(()) => handled += 1,
                Err(e) => warn!(
                    "{} on element {} dropped message from {:#06x}: {}",
                    model.identifier(),
                    self.index,
                    source,
                    e
                ),
            }
        }
        handled
    }

    /// Store the host configuration and apply it to matching models
    pub async fn apply_config(&self, configs: Vec<ModelConfig>) {
        info!(
            "Set element {} models config ({} entries)",
            self.index,
            configs.len()
        );

        for config in &configs {
            match self
                .models
                .iter()
                .find(|m| m.identifier().value() == config.model_id)
            {
                Some(model) => {
                    model
                        .configure(
                            config.publication_period(),
                            config.bindings(),
                            config.subscriptions(),
                        )
                        .await
                }
                None => warn!(
                    "Element {} has no model {:#06x} for host configuration",
                    self.index, config.model_id
                ),
            }
        }

        *self.config.write().await = configs;
    }

    /// Host configuration as last delivered
    pub async fn config(&self) -> Vec<ModelConfig> {
        self.config.read().await.clone()
    }

    /// Properties exposed under the element interface
    pub fn properties(&self) -> Properties {
        let mut props = Properties::new();
        props.insert("Index".to_string(), json!(self.index));
        props.insert("Models".to_string(), json!(self.model_ids()));
        props.insert("VendorModels".to_string(), json!(self.vendor_model_ids()));
        props
    }
}
