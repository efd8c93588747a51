//! Application root: the element set exposed to the mesh host.

use crate::element::{element_path, Element, Properties, ELEMENT_INTERFACE};
use crate::error::{LookupFailure, RegistryError};
use crate::model::Model;
use mesh_wire::Opcode;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Interface name under which application properties are exposed
pub const APPLICATION_INTERFACE: &str = "org.bluez.mesh.Application1";

/// Interface name to properties map of one object
pub type InterfaceMap = BTreeMap<String, Properties>;

/// Introspection snapshot: object path to interfaces
pub type ManagedObjects = BTreeMap<String, InterfaceMap>;

/// Product identification reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppIdentity {
    /// Company identifier
    pub company_id: u16,
    /// Product identifier
    pub product_id: u16,
    /// Product version identifier
    pub version_id: u16,
}

/// Result of resolving an operator command against the registry
#[derive(Debug)]
pub struct Resolved<'a> {
    /// Target element
    pub element: &'a Element,
    /// Target model
    pub model: &'a Arc<dyn Model>,
    /// Opcode supported by the model
    pub opcode: Opcode,
}

/// Root object owning every element
#[derive(Debug)]
pub struct Application {
    path: String,
    identity: AppIdentity,
    elements: Vec<Element>,
}

impl Application {
    /// Create an application rooted at `path`
    pub fn new(path: impl Into<String>, identity: AppIdentity) -> Self {
        Self {
            path: path.into(),
            identity,
            elements: Vec::new(),
        }
    }

    /// Application object path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Product identification
    pub fn identity(&self) -> AppIdentity {
        self.identity
    }

    /// Create an element whose path derives from this application's path
    pub fn create_element(&self, index: u8) -> Element {
        Element::new(&self.path, index)
    }

    /// Append an element; the index must be unused and the path must derive
    /// from this application's path
    pub fn add_element(&mut self, element: Element) -> Result<(), RegistryError> {
        let expected = element_path(&self.path, element.index());
        if element.path() != expected {
            return Err(RegistryError::ForeignElement {
                path: element.path().to_string(),
                expected,
            });
        }
        if self.find_element(element.index()).is_some() {
            return Err(RegistryError::DuplicateIndex(element.index()));
        }

        debug!("Added element {} at {}", element.index(), element.path());
        self.elements.push(element);
        Ok(())
    }

    /// Elements in registration order
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Element indexes in registration order
    pub fn element_indexes(&self) -> Vec<u8> {
        self.elements.iter().map(Element::index).collect()
    }

    /// Find an element by its index (not its position)
    pub fn find_element(&self, index: u8) -> Option<&Element> {
        self.elements.iter().find(|e| e.index() == index)
    }

    /// Find an element by its object path
    pub fn find_element_by_path(&self, path: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.path() == path)
    }

    /// Resolve element index, model id and opcode of an operator command
    pub fn resolve(
        &self,
        element_index: u64,
        model_id: u16,
        opcode: Opcode,
    ) -> Result<Resolved<'_>, LookupFailure> {
        let element = u8::try_from(element_index)
            .ok()
            .and_then(|index| self.find_element(index))
            .ok_or_else(|| LookupFailure::Element {
                index: element_index,
                available: self.element_indexes(),
            })?;

        let model = element.find_model(model_id)?;

        let available = model.opcodes();
        if !available.contains(&opcode) {
            return Err(LookupFailure::Opcode { opcode, available });
        }

        Ok(Resolved {
            element,
            model,
            opcode,
        })
    }

    /// Properties exposed under the application interface
    pub fn properties(&self) -> Properties {
        let mut props = Properties::new();
        props.insert("CompanyID".to_string(), json!(self.identity.company_id));
        props.insert("ProductID".to_string(), json!(self.identity.product_id));
        props.insert("VersionID".to_string(), json!(self.identity.version_id));
        props
    }

    /// Snapshot of every object the host may introspect
    pub fn managed_objects(&self) -> ManagedObjects {
        info!("GetManagedObjects ({} elements)", self.elements.len());

        let mut objects = ManagedObjects::new();

        let mut app = InterfaceMap::new();
        app.insert(APPLICATION_INTERFACE.to_string(), self.properties());
        objects.insert(self.path.clone(), app);

        for element in &self.elements {
            let mut interfaces = InterfaceMap::new();
            interfaces.insert(ELEMENT_INTERFACE.to_string(), element.properties());
            objects.insert(element.path().to_string(), interfaces);
        }

        objects
    }
}
