//! Host attach, event loop, send queue and command worker for the mesh application.
//!
//! A [`Session`] attaches an [`Application`](mesh_registry::Application) to a
//! [`MeshHost`], applies the configuration the host hands back, and then
//! serves host events while a [`CommandRunner`] feeds operator commands
//! through the registry.
//!
//! ## Features
//!
//! - **Attach**: one attach per run, failure is terminal
//! - **Event loop**: inbound message routing and node removal detection
//! - **Send queue**: model handlers enqueue, the event loop sends
//! - **Command worker**: starts after attach, repeats each command per [`RetryPolicy`]
//! - **Loopback host**: in-process host for standalone runs and tests
//!
//! ## Example
//!
//! ```rust,no_run
//! use mesh_registry::{AppIdentity, Application, VendorTextClient};
//! use mesh_session::{LoopbackHost, Session, SessionConfig};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut app = Application::new("/example", AppIdentity::default());
//! let mut element = app.create_element(0);
//! element.add_model(Arc::new(VendorTextClient::new(0x0000)))?;
//! app.add_element(element)?;
//!
//! let (tx, rx) = mpsc::unbounded_channel();
//! tx.send("0 0x0 0xfbf105 29537 0 Participant".to_string())?;
//! drop(tx);
//!
//! let config = SessionConfig {
//!     exit_when_done: true,
//!     ..SessionConfig::default()
//! };
//! let session = Session::new(config, Arc::new(LoopbackHost::new()), Arc::new(app));
//! let report = session.run(rx).await?;
//! println!("{} messages sent", report.sends_ok);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod error;
pub mod host;
pub mod loopback;
pub mod outbox;
pub mod retry;
pub mod runner;
pub mod session;

// Re-export main types
pub use command::{ModelCommand, MODEL_VERB, USAGE};
pub use error::SessionError;
pub use host::{AttachReply, ElementConfig, HostError, HostEvent, MeshHost, NodeHandle};
pub use loopback::{LoopbackHost, SentMessage};
pub use outbox::{Envelope, Outbox};
pub use retry::{RetryPolicy, PUBLISH_REPEAT};
pub use runner::{CommandOutcome, CommandRunner, RunnerReport};
pub use session::{
    AttachState, Session, SessionConfig, SessionEnd, SessionReport, DEFAULT_TOKEN,
};
