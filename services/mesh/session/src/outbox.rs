//! Outbound send queue between model handlers and the event loop.
//!
//! Handlers never talk to the host directly: they enqueue publications here
//! and the event loop, which owns the node handle, performs the send.

use mesh_registry::{Publication, PublishError, Publisher};
use tokio::sync::mpsc;

/// Publication tagged with the command that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Operator command id, if any
    pub command_id: Option<u64>,
    /// Message to send
    pub publication: Publication,
}

/// `Publisher` feeding the event loop's send queue
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Envelope>,
    command_id: Option<u64>,
}

impl Outbox {
    /// Create an untagged outbox
    pub fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            tx,
            command_id: None,
        }
    }

    /// Outbox tagging every publication with `command_id`
    pub fn for_command(&self, command_id: u64) -> Self {
        Self {
            tx: self.tx.clone(),
            command_id: Some(command_id),
        }
    }
}

impl Publisher for Outbox {
    fn publish(&self, publication: Publication) -> Result<(), PublishError> {
        self.tx
            .send(Envelope {
                command_id: self.command_id,
                publication,
            })
            .map_err(|_| PublishError("event loop is gone".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn publication() -> Publication {
        Publication {
            element_path: "/example/ele00".to_string(),
            destination: 29537,
            key_index: 0,
            payload: Bytes::from_static(b"\xfb\xf1\x05\x00"),
        }
    }

    #[test]
    fn test_tagged_publication() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbox = Outbox::new(tx);

        outbox.publish(publication()).unwrap();
        outbox.for_command(7).publish(publication()).unwrap();

        assert_eq!(rx.try_recv().unwrap().command_id, None);
        assert_eq!(rx.try_recv().unwrap().command_id, Some(7));
    }

    #[test]
    fn test_closed_queue() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let err = Outbox::new(tx).publish(publication()).unwrap_err();
        assert_eq!(err, PublishError("event loop is gone".to_string()));
    }
}
