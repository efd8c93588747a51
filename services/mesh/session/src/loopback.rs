//! In-process mesh host for standalone runs and tests.
//!
//! Attach answers from the application's introspection snapshot, binding every
//! model to the configured key indexes. Sends are recorded instead of
//! transmitted, and inbound traffic or removal notifications can be injected.

use crate::host::{AttachReply, ElementConfig, HostError, HostEvent, MeshHost, NodeHandle};
use async_trait::async_trait;
use bytes::Bytes;
use mesh_registry::{
    Address, KeyIndex, ManagedObjects, ModelConfig, Publication, ELEMENT_INTERFACE,
};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};

/// Message recorded by the loopback host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Node the message was sent from
    pub node_path: String,
    /// The publication as handed to the host
    pub publication: Publication,
}

/// In-memory mesh host
#[derive(Debug)]
pub struct LoopbackHost {
    /// Bindings reported for every model on attach
    bindings: Vec<KeyIndex>,
    /// Extra element configurations appended to the attach reply
    extra_configs: Vec<ElementConfig>,
    /// Reject attach with this reason
    attach_failure: Option<String>,
    /// Delay before answering attach
    attach_delay: Duration,
    /// Reject every send with this reason
    send_failure: Option<String>,
    /// Node path once attached
    node: RwLock<Option<String>>,
    /// Snapshot received on attach
    objects: RwLock<Option<ManagedObjects>>,
    /// Messages sent through the host
    sent: Mutex<Vec<SentMessage>>,
    /// Event channel towards the subscriber
    events_tx: mpsc::UnboundedSender<HostEvent>,
    /// Receiver handed out on subscribe
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<HostEvent>>>,
}

impl LoopbackHost {
    /// Create a host that accepts attach and binds every model to key index 0
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            bindings: vec![0],
            extra_configs: Vec::new(),
            attach_failure: None,
            attach_delay: Duration::ZERO,
            send_failure: None,
            node: RwLock::new(None),
            objects: RwLock::new(None),
            sent: Mutex::new(Vec::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Key indexes reported as bound for every model
    pub fn with_bindings(mut self, bindings: Vec<KeyIndex>) -> Self {
        self.bindings = bindings;
        self
    }

    /// Reject attach with `reason`
    pub fn with_attach_failure(mut self, reason: impl Into<String>) -> Self {
        self.attach_failure = Some(reason.into());
        self
    }

    /// Answer attach only after `delay`
    pub fn with_attach_delay(mut self, delay: Duration) -> Self {
        self.attach_delay = delay;
        self
    }

    /// Reject every send with `reason`
    pub fn with_send_failure(mut self, reason: impl Into<String>) -> Self {
        self.send_failure = Some(reason.into());
        self
    }

    /// Append a configuration for an element the application may not have
    pub fn with_extra_config(mut self, config: ElementConfig) -> Self {
        self.extra_configs.push(config);
        self
    }

    /// Node path assigned on attach
    pub async fn attached_node(&self) -> Option<String> {
        self.node.read().await.clone()
    }

    /// Introspection snapshot received on attach
    pub async fn attached_objects(&self) -> Option<ManagedObjects> {
        self.objects.read().await.clone()
    }

    /// Messages sent so far, in send order
    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    /// Deliver an inbound message to an element
    pub fn inject_message(
        &self,
        element_path: impl Into<String>,
        destination: Address,
        source: Address,
        key_index: KeyIndex,
        data: Bytes,
    ) -> Result<(), HostError> {
        self.emit(HostEvent::MessageReceived {
            element_path: element_path.into(),
            destination,
            source,
            key_index,
            data,
        })
    }

    /// Notify that the interfaces of `path` were removed
    pub fn remove_interfaces(&self, path: impl Into<String>) -> Result<(), HostError> {
        self.emit(HostEvent::InterfacesRemoved { path: path.into() })
    }

    fn emit(&self, event: HostEvent) -> Result<(), HostError> {
        self.events_tx.send(event).map_err(|_| HostError::Closed)
    }

    /// Build per-element configuration from the introspection snapshot
    fn configs_from_objects(&self, objects: &ManagedObjects) -> Vec<ElementConfig> {
        let mut configs = Vec::new();

        for (path, interfaces) in objects {
            let Some(props) = interfaces.get(ELEMENT_INTERFACE) else {
                continue;
            };
            let Some(index) = props
                .get("Index")
                .and_then(Value::as_u64)
                .and_then(|v| u8::try_from(v).ok())
            else {
                debug!("Skipping element {} without index", path);
                continue;
            };

            let ids = ["Models", "VendorModels"]
                .iter()
                .filter_map(|key| props.get(*key).and_then(Value::as_array))
                .flatten()
                .filter_map(Value::as_u64)
                .filter_map(|v| u16::try_from(v).ok());

            let models = ids
                .map(|id| {
                    let mut options = Map::new();
                    options.insert("Bindings".to_string(), json!(self.bindings));
                    ModelConfig::new(id, options)
                })
                .collect();

            configs.push(ElementConfig {
                element_index: index,
                models,
            });
        }

        configs.extend(self.extra_configs.iter().cloned());
        configs
    }
}

impl Default for LoopbackHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MeshHost for LoopbackHost {
    async fn attach(
        &self,
        app_path: &str,
        objects: ManagedObjects,
        token: u64,
    ) -> Result<AttachReply, HostError> {
        if !self.attach_delay.is_zero() {
            tokio::time::sleep(self.attach_delay).await;
        }

        if let Some(reason) = &self.attach_failure {
            return Err(HostError::Remote(reason.clone()));
        }

        let node_path = format!("/org/bluez/mesh/node{:016x}", token);
        let configs = self.configs_from_objects(&objects);
        info!(
            "Loopback attached {} as {} ({} element configs)",
            app_path,
            node_path,
            configs.len()
        );

        *self.node.write().await = Some(node_path.clone());
        *self.objects.write().await = Some(objects);

        Ok(AttachReply { node_path, configs })
    }

    async fn send(&self, node: &NodeHandle, publication: &Publication) -> Result<(), HostError> {
        if let Some(reason) = &self.send_failure {
            return Err(HostError::Remote(reason.clone()));
        }

        match self.node.read().await.as_deref() {
            Some(path) if path == node.path() => {}
            _ => {
                return Err(HostError::Remote(format!(
                    "node {} is not attached",
                    node.path()
                )))
            }
        }

        debug!(
            "Loopback send from {} to {:#06x}: {:02x?}",
            publication.element_path,
            publication.destination,
            publication.payload.as_ref()
        );

        self.sent.lock().await.push(SentMessage {
            node_path: node.path().to_string(),
            publication: publication.clone(),
        });
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<HostEvent>, HostError> {
        self.events_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| HostError::Remote("already subscribed".to_string()))
    }
}
