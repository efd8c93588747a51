//! Vendor text client: sends and receives short NUL-terminated ASCII
//! messages under two vendor opcodes.

use crate::args::{parse_address, parse_key_index};
use crate::error::ModelError;
use crate::model::{
    dispatch_command, Address, CommandHandler, CommandTable, KeyIndex, Model, ModelId, ModelState,
    Publication, Publisher,
};
use async_trait::async_trait;
use mesh_wire::{decode, decode_text, encode_text, Opcode};
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Greeting text opcode
pub const HELLO_OPCODE: Opcode = Opcode::from_u24(0xfbf105);

/// Patient status text opcode
pub const PATIENT_OPCODE: Opcode = Opcode::from_u24(0xfd05f1);

/// Received texts kept per client; older ones are dropped first
pub const INBOX_CAPACITY: usize = 64;

/// Usage shown when a text command is missing arguments
pub const TEXT_USAGE: &str = "dst_addr key_index text (example: 29537 0 Participant)";

/// Text message received from the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    /// Source address
    pub source: Address,
    /// Key index the message was encrypted with
    pub key_index: KeyIndex,
    /// Opcode the text arrived under
    pub opcode: Opcode,
    /// Decoded text
    pub text: String,
}

/// Arguments of an outbound text command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextCommand {
    /// Destination address
    pub destination: Address,
    /// Application key index
    pub key_index: KeyIndex,
    /// Text to send; remaining tokens joined by single spaces
    pub text: String,
}

impl TextCommand {
    /// Parse `dst_addr key_index [text...]`
    pub fn parse(args: &[String]) -> Result<Self, ModelError> {
        let (dst, key, text) = match args {
            [dst, key, text @ ..] => (dst, key, text),
            _ => {
                return Err(ModelError::InvalidArgument(format!(
                    "expected {}",
                    TEXT_USAGE
                )))
            }
        };

        Ok(Self {
            destination: parse_address(dst)?,
            key_index: parse_key_index(key)?,
            text: text.join(" "),
        })
    }
}

/// Vendor model exchanging text messages
pub struct VendorTextClient {
    state: ModelState,
    commands: CommandTable<Self>,
    inbox: RwLock<VecDeque<TextMessage>>,
}

impl VendorTextClient {
    /// Create a text client with the given vendor model id
    pub fn new(vendor_id: u16) -> Self {
        let mut commands: CommandTable<Self> = CommandTable::new();
        commands.insert(HELLO_OPCODE, Self::hello_text as CommandHandler<Self>);
        commands.insert(PATIENT_OPCODE, Self::patient_text as CommandHandler<Self>);

        Self {
            state: ModelState::new(ModelId::Vendor(vendor_id)),
            commands,
            inbox: RwLock::new(VecDeque::with_capacity(INBOX_CAPACITY)),
        }
    }

    /// Send a greeting text
    pub fn hello_text(&self, publisher: &dyn Publisher, args: &[String]) -> Result<(), ModelError> {
        self.send_text(HELLO_OPCODE, publisher, args)
    }

    /// Send a patient status text
    pub fn patient_text(
        &self,
        publisher: &dyn Publisher,
        args: &[String],
    ) -> Result<(), ModelError> {
        self.send_text(PATIENT_OPCODE, publisher, args)
    }

    /// Text messages received so far, oldest first
    pub async fn inbox(&self) -> Vec<TextMessage> {
        self.inbox.read().await.iter().cloned().collect()
    }

    /// Remove and return the received texts, oldest first
    pub async fn take_inbox(&self) -> Vec<TextMessage> {
        self.inbox.write().await.drain(..).collect()
    }

    fn send_text(
        &self,
        opcode: Opcode,
        publisher: &dyn Publisher,
        args: &[String],
    ) -> Result<(), ModelError> {
        let command = TextCommand::parse(args)?;
        let element_path = self.state.path().ok_or(ModelError::NotBound)?;
        let payload = encode_text(opcode, &command.text)?;

        debug!(
            "Text {} to {:#06x} (key {}): {:?}",
            opcode, command.destination, command.key_index, command.text
        );

        publisher.publish(Publication {
            element_path: element_path.to_string(),
            destination: command.destination,
            key_index: command.key_index,
            payload,
        })?;
        Ok(())
    }
}

impl fmt::Debug for VendorTextClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorTextClient")
            .field("state", &self.state)
            .field("opcodes", &self.commands.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Model for VendorTextClient {
    fn state(&self) -> &ModelState {
        &self.state
    }

    fn opcodes(&self) -> Vec<Opcode> {
        self.commands.keys().copied().collect()
    }

    fn invoke(
        &self,
        opcode: Opcode,
        publisher: &dyn Publisher,
        args: &[String],
    ) -> Result<(), ModelError> {
        dispatch_command(self, &self.commands, opcode, publisher, args)
    }

    async fn process_message(
        &self,
        source: Address,
        key_index: KeyIndex,
        data: &[u8],
    ) -> Result<(), ModelError> {
        let (opcode, rest) = decode(data)?;
        if !self.commands.contains_key(&opcode) {
            debug!("Text client ignoring opcode {} from {:#06x}", opcode, source);
            return Ok(());
        }

        let text = decode_text(rest)?.to_string();
        info!(
            "Text {} from {:#06x} (key {}): {:?}",
            opcode, source, key_index, text
        );

        let mut inbox = self.inbox.write().await;
        if inbox.len() == INBOX_CAPACITY {
            inbox.pop_front();
        }
        inbox.push_back(TextMessage {
            source,
            key_index,
            opcode,
            text,
        });
        Ok(())
    }
}
