//! Attach driver and event loop for a mesh application session.
//!
//! The event loop owns every host interaction: it attaches, applies the
//! configuration the host returns, performs sends queued by model handlers,
//! and routes inbound messages to elements. Operator commands run on a
//! separate worker that only starts once attach has completed.

use crate::error::SessionError;
use crate::host::{HostEvent, MeshHost, NodeHandle};
use crate::outbox::{Envelope, Outbox};
use crate::retry::RetryPolicy;
use crate::runner::{CommandRunner, RunnerReport};
use dashmap::DashMap;
use mesh_registry::Application;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Token identifying this application instance to the host
pub const DEFAULT_TOKEN: u64 = 0x76bd_4f23_7247_7600;

/// Configuration for a mesh session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Application token presented on attach
    pub token: u64,
    /// Retry policy for operator commands
    pub retry: RetryPolicy,
    /// Extra pause after attach before the first command
    pub settle_delay: Duration,
    /// End the session once the command worker is done and no send is pending
    pub exit_when_done: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token: DEFAULT_TOKEN,
            retry: RetryPolicy::default(),
            settle_delay: Duration::ZERO,
            exit_when_done: false,
        }
    }
}

/// Attach progress, observed by the command worker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachState {
    /// Attach not started
    Idle,
    /// Attach call in flight
    Attaching,
    /// Node handle available
    Attached,
    /// Attach rejected (terminal)
    AttachFailed,
}

/// Why a session ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The host removed the attached node
    ServiceRemoved,
    /// One-shot mode: commands done and every send completed
    CommandsComplete,
    /// The host event stream closed
    HostClosed,
}

/// Summary returned when a session ends
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionReport {
    /// Why the session ended
    pub end: SessionEnd,
    /// Path of the attached node
    pub node_path: String,
    /// Element indexes the host configured but the application lacks
    pub protocol_violations: Vec<u8>,
    /// Sends acknowledged by the host
    pub sends_ok: u64,
    /// Sends the host rejected
    pub sends_failed: u64,
    /// Command worker summary, if it finished before the session ended
    pub commands: Option<RunnerReport>,
}

/// Session context shared by the event loop and the command worker
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    host: Arc<dyn MeshHost>,
    app: Arc<Application>,
    state_tx: watch::Sender<AttachState>,
    node: Option<NodeHandle>,
    outbox_tx: mpsc::UnboundedSender<Envelope>,
    outbox_rx: mpsc::UnboundedReceiver<Envelope>,
    acks: Arc<DashMap<u64, u32>>,
}

impl Session {
    /// Create a session for `app` against `host`
    pub fn new(config: SessionConfig, host: Arc<dyn MeshHost>, app: Arc<Application>) -> Self {
        let (state_tx, _) = watch::channel(AttachState::Idle);
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        Self {
            config,
            host,
            app,
            state_tx,
            node: None,
            outbox_tx,
            outbox_rx,
            acks: Arc::new(DashMap::new()),
        }
    }

    /// Watch attach progress
    pub fn attach_state(&self) -> watch::Receiver<AttachState> {
        self.state_tx.subscribe()
    }

    /// Publisher feeding this session's send queue
    pub fn outbox(&self) -> Outbox {
        Outbox::new(self.outbox_tx.clone())
    }

    fn set_state(&self, state: AttachState) {
        debug!("Attach state -> {:?}", state);
        self.state_tx.send_replace(state);
    }

    /// Attach, then serve host events and operator commands until the
    /// session ends.
    ///
    /// Attach failure is fatal and returned as [`SessionError::AttachFailure`].
    pub async fn run(
        mut self,
        commands: mpsc::UnboundedReceiver<String>,
    ) -> Result<SessionReport, SessionError> {
        let mut events = self.host.subscribe().await?;

        let runner = CommandRunner::new(
            self.app.clone(),
            self.outbox(),
            self.acks.clone(),
            self.attach_state(),
            self.config.retry.clone(),
            self.config.settle_delay,
        );
        let mut worker = tokio::spawn(runner.run(commands));

        self.set_state(AttachState::Attaching);
        info!("Attach to meshnet as {}", self.app.path());

        let reply = match self
            .host
            .attach(self.app.path(), self.app.managed_objects(), self.config.token)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                error!("Failed to register application: {}", e);
                self.set_state(AttachState::AttachFailed);
                worker.abort();
                return Err(SessionError::AttachFailure(e.to_string()));
            }
        };

        info!("Mesh application registered as {}", reply.node_path);

        let mut protocol_violations = Vec::new();
        for config in reply.configs {
            match self.app.find_element(config.element_index) {
                Some(element) => element.apply_config(config.models).await,
                None => {
                    let violation = SessionError::ProtocolViolation {
                        index: config.element_index,
                        known: self.app.element_indexes(),
                    };
                    error!("{}", violation);
                    protocol_violations.push(config.element_index);
                }
            }
        }

        let node = NodeHandle::new(reply.node_path);
        self.node = Some(node.clone());
        self.set_state(AttachState::Attached);

        let mut sends = JoinSet::new();
        let mut commands_report = None;
        let mut worker_done = false;
        let mut sends_ok = 0u64;
        let mut sends_failed = 0u64;

        let end = loop {
            tokio::select! {
                biased;

                Some(envelope) = self.outbox_rx.recv() => {
                    let host = self.host.clone();
                    let node = node.clone();
                    sends.spawn(async move {
                        let result = host.send(&node, &envelope.publication).await;
                        (envelope, result)
                    });
                }

                Some(joined) = sends.join_next(), if !sends.is_empty() => {
                    match joined {
                        Ok((envelope, Ok(()))) => {
                            sends_ok += 1;
                            debug!(
                                "Send to {:#06x} done",
                                envelope.publication.destination
                            );
                            if let Some(id) = envelope.command_id {
                                if let Some(mut acked) = self.acks.get_mut(&id) {
                                    *acked += 1;
                                }
                            }
                        }
                        Ok((envelope, Err(e))) => {
                            sends_failed += 1;
                            warn!("{}", SessionError::RemoteCall(e));
                            debug!(
                                "Failed send was to {:#06x} from {}",
                                envelope.publication.destination,
                                envelope.publication.element_path
                            );
                        }
                        Err(e) => {
                            sends_failed += 1;
                            error!("Send task failed: {}", e);
                        }
                    }

                    if self.config.exit_when_done && worker_done && sends.is_empty() {
                        break SessionEnd::CommandsComplete;
                    }
                }

                joined = &mut worker, if !worker_done => {
                    worker_done = true;
                    match joined {
                        Ok(report) => commands_report = Some(report),
                        Err(e) => error!("Command worker failed: {}", e),
                    }

                    if self.config.exit_when_done && sends.is_empty() {
                        break SessionEnd::CommandsComplete;
                    }
                }

                event = events.recv() => {
                    match event {
                        None => {
                            warn!("Host event stream closed");
                            break SessionEnd::HostClosed;
                        }
                        Some(HostEvent::InterfacesRemoved { path }) => {
                            if path == node.path() {
                                info!("Service was removed");
                                break SessionEnd::ServiceRemoved;
                            }
                            debug!("Ignoring removal of {}", path);
                        }
                        Some(HostEvent::MessageReceived {
                            element_path,
                            destination,
                            source,
                            key_index,
                            data,
                        }) => match self.app.find_element_by_path(&element_path) {
                            Some(element) => {
                                element.receive(destination, source, key_index, &data).await;
                            }
                            None => warn!("Message for unknown element {}", element_path),
                        },
                    }
                }
            }
        };

        if !worker_done {
            worker.abort();
        }

        info!(
            "Session ended ({:?}): {} sends ok, {} failed",
            end, sends_ok, sends_failed
        );

        Ok(SessionReport {
            end,
            node_path: node.path().to_string(),
            protocol_violations,
            sends_ok,
            sends_failed,
            commands: commands_report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ElementConfig;
    use crate::loopback::LoopbackHost;
    use bytes::Bytes;
    use mesh_registry::{
        AppIdentity, LookupFailure, Model, ModelError, VendorTextClient, HELLO_OPCODE,
        PATIENT_OPCODE,
    };

    const PARTICIPANT: &str = "0 0x0 0xfbf105 29537 0 Participant";

    fn text_app() -> (Arc<Application>, Arc<VendorTextClient>) {
        let mut app = Application::new("/example", AppIdentity::default());
        let text = Arc::new(VendorTextClient::new(0x0000));
        let mut element = app.create_element(0);
        element.add_model(text.clone()).unwrap();
        app.add_element(element).unwrap();
        (Arc::new(app), text)
    }

    fn one_shot() -> SessionConfig {
        SessionConfig {
            exit_when_done: true,
            ..SessionConfig::default()
        }
    }

    fn command_channel(lines: &[&str]) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        for line in lines {
            tx.send(line.to_string()).unwrap();
        }
        rx
    }

    async fn wait_for_attach(host: &LoopbackHost) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while host.attached_node().await.is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_command_published_five_times() {
        let (app, _) = text_app();
        let host = Arc::new(LoopbackHost::new());
        let session = Session::new(one_shot(), host.clone(), app);

        let report = session.run(command_channel(&[PARTICIPANT])).await.unwrap();

        assert_eq!(report.end, SessionEnd::CommandsComplete);
        assert_eq!(report.node_path, "/org/bluez/mesh/node76bd4f2372477600");
        assert_eq!(report.sends_ok, 5);
        assert_eq!(report.sends_failed, 0);

        let sent = host.sent().await;
        assert_eq!(sent.len(), 5);
        for message in &sent {
            assert_eq!(message.node_path, "/org/bluez/mesh/node76bd4f2372477600");
            assert_eq!(message.publication.element_path, "/example/ele00");
            assert_eq!(message.publication.destination, 29537);
            assert_eq!(message.publication.key_index, 0);
            assert_eq!(
                message.publication.payload.as_ref(),
                b"\xfb\xf1\x05Participant\x00"
            );
        }

        let commands = report.commands.unwrap();
        assert!(commands.attached);
        assert_eq!(
            commands.outcomes,
            vec![Ok(crate::runner::CommandOutcome {
                attempts: 5,
                succeeded: 5,
                failed: 0,
                acknowledged: false,
            })]
        );
    }

    #[tokio::test]
    async fn test_unknown_element_sends_nothing() {
        let (app, _) = text_app();
        let host = Arc::new(LoopbackHost::new());
        let session = Session::new(one_shot(), host.clone(), app);

        let report = session
            .run(command_channel(&["3 0x0 0xfbf105 29537 0 Participant"]))
            .await
            .unwrap();

        assert!(host.sent().await.is_empty());
        assert_eq!(
            report.commands.unwrap().outcomes,
            vec![Err(SessionError::Lookup(LookupFailure::Element {
                index: 3,
                available: vec![0],
            }))]
        );
    }

    #[tokio::test]
    async fn test_out_of_range_element_is_lookup_failure() {
        let (app, _) = text_app();
        let host = Arc::new(LoopbackHost::new());
        let session = Session::new(one_shot(), host.clone(), app);

        let report = session
            .run(command_channel(&["300 0x0 0xfbf105 29537 0 Participant"]))
            .await
            .unwrap();

        assert!(host.sent().await.is_empty());
        assert_eq!(
            report.commands.unwrap().outcomes,
            vec![Err(SessionError::Lookup(LookupFailure::Element {
                index: 300,
                available: vec![0],
            }))]
        );
    }

    #[tokio::test]
    async fn test_unknown_model_and_opcode_send_nothing() {
        let (app, _) = text_app();
        let host = Arc::new(LoopbackHost::new());
        let session = Session::new(one_shot(), host.clone(), app);

        let report = session
            .run(command_channel(&[
                "0 0x1000 0xfbf105 29537 0 Participant",
                "0 0x0 0x8204 29537 0 Participant",
            ]))
            .await
            .unwrap();

        assert!(host.sent().await.is_empty());
        let outcomes = report.commands.unwrap().outcomes;
        assert!(matches!(
            outcomes[0],
            Err(SessionError::Lookup(LookupFailure::Model { id: 0x1000, .. }))
        ));
        assert!(matches!(
            outcomes[1],
            Err(SessionError::Lookup(LookupFailure::Opcode { .. }))
        ));
    }

    #[tokio::test]
    async fn test_short_command_rejected_and_session_continues() {
        let (app, _) = text_app();
        let host = Arc::new(LoopbackHost::new());
        let session = Session::new(one_shot(), host.clone(), app);

        let report = session
            .run(command_channel(&["0 0x0 0xfbf105", PARTICIPANT]))
            .await
            .unwrap();

        let outcomes = report.commands.unwrap().outcomes;
        assert!(matches!(outcomes[0], Err(SessionError::InvalidArgument(_))));
        assert!(outcomes[1].is_ok());
        // Only the valid command reached the host
        assert_eq!(host.sent().await.len(), 5);
    }

    #[tokio::test]
    async fn test_short_command_keeps_session_live() {
        let (app, _) = text_app();
        let host = Arc::new(LoopbackHost::new());
        let session = Session::new(SessionConfig::default(), host.clone(), app);

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("0 0x0".to_string()).unwrap();
        let handle = tokio::spawn(session.run(rx));

        wait_for_attach(&host).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!handle.is_finished());
        assert!(host.sent().await.is_empty());

        let node = host.attached_node().await.unwrap();
        host.remove_interfaces(node).unwrap();

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.end, SessionEnd::ServiceRemoved);
        assert_eq!(report.sends_ok, 0);
    }

    #[tokio::test]
    async fn test_handler_argument_failure_reported_per_attempt() {
        let (app, _) = text_app();
        let host = Arc::new(LoopbackHost::new());
        let session = Session::new(one_shot(), host.clone(), app);

        // Four tokens pass parsing but the handler needs a key index
        let report = session
            .run(command_channel(&["0 0x0 0xfbf105 29537"]))
            .await
            .unwrap();

        assert!(host.sent().await.is_empty());
        assert!(matches!(
            report.commands.unwrap().outcomes[0],
            Err(SessionError::Model(ModelError::InvalidArgument(_)))
        ));
    }

    #[tokio::test]
    async fn test_attach_failure_terminates_once() {
        let (app, _) = text_app();
        let host =
            Arc::new(LoopbackHost::new().with_attach_failure("org.bluez.mesh.Error.NotFound"));
        let session = Session::new(one_shot(), host.clone(), app);
        let state = session.attach_state();

        let err = session.run(command_channel(&[PARTICIPANT])).await.unwrap_err();

        assert_eq!(
            err,
            SessionError::AttachFailure("org.bluez.mesh.Error.NotFound".to_string())
        );
        assert_eq!(*state.borrow(), AttachState::AttachFailed);
        assert!(host.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_attach_applies_host_config() {
        let (app, text) = text_app();
        let host = Arc::new(LoopbackHost::new().with_bindings(vec![0, 2]));
        let session = Session::new(one_shot(), host.clone(), app.clone());

        session.run(command_channel(&[])).await.unwrap();

        assert_eq!(text.settings().await.bindings, vec![0, 2]);
        let stored = app.find_element(0).unwrap().config().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].model_id, 0);

        let objects = host.attached_objects().await.unwrap();
        assert!(objects.contains_key("/example/ele00"));
    }

    #[tokio::test]
    async fn test_unknown_configured_element_is_protocol_violation() {
        let (app, _) = text_app();
        let host = Arc::new(LoopbackHost::new().with_extra_config(ElementConfig {
            element_index: 3,
            models: Vec::new(),
        }));
        let session = Session::new(one_shot(), host.clone(), app);

        let report = session.run(command_channel(&[PARTICIPANT])).await.unwrap();

        assert_eq!(report.protocol_violations, vec![3]);
        // The known element was still configured and commands still ran
        assert_eq!(host.sent().await.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_wait_for_slow_attach() {
        let (app, _) = text_app();
        let host = Arc::new(LoopbackHost::new().with_attach_delay(Duration::from_secs(3)));
        let session = Session::new(one_shot(), host.clone(), app);
        let mut state = session.attach_state();

        // The command line is queued long before the host answers attach
        let handle = tokio::spawn(session.run(command_channel(&[PARTICIPANT])));

        state
            .wait_for(|s| *s == AttachState::Attaching)
            .await
            .unwrap();
        assert!(host.sent().await.is_empty());

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.sends_ok, 5);
        assert_eq!(report.sends_failed, 0);
        assert_eq!(host.sent().await.len(), 5);
    }

    #[tokio::test]
    async fn test_send_failures_are_not_fatal() {
        let (app, _) = text_app();
        let host = Arc::new(LoopbackHost::new().with_send_failure("org.bluez.mesh.Error.Failed"));
        let session = Session::new(one_shot(), host.clone(), app);

        let report = session.run(command_channel(&[PARTICIPANT])).await.unwrap();

        assert_eq!(report.end, SessionEnd::CommandsComplete);
        assert_eq!(report.sends_ok, 0);
        assert_eq!(report.sends_failed, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_on_ack() {
        let (app, _) = text_app();
        let host = Arc::new(LoopbackHost::new());
        let config = SessionConfig {
            retry: RetryPolicy::default()
                .with_backoff(Duration::from_millis(100))
                .with_stop_on_ack(true),
            ..one_shot()
        };
        let session = Session::new(config, host.clone(), app);

        let report = session.run(command_channel(&[PARTICIPANT])).await.unwrap();

        assert_eq!(host.sent().await.len(), 1);
        let outcome = report.commands.unwrap().outcomes[0].clone().unwrap();
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.acknowledged);
    }

    #[tokio::test]
    async fn test_inbound_message_routed_to_element() {
        let (app, text) = text_app();
        let host = Arc::new(LoopbackHost::new());
        let session = Session::new(SessionConfig::default(), host.clone(), app);

        let (_tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(session.run(rx));
        wait_for_attach(&host).await;

        let payload = mesh_wire::encode_text(PATIENT_OPCODE, "00x0001S11").unwrap();
        host.inject_message("/example/ele00", 0x00aa, 0x0001, 0, payload)
            .unwrap();
        // Malformed and foreign traffic is dropped without ending the session
        host.inject_message("/example/ele00", 0x00aa, 0x0001, 0, Bytes::from_static(&[0xfd]))
            .unwrap();
        host.inject_message("/example/ele07", 0x00aa, 0x0001, 0, Bytes::new())
            .unwrap();
        host.inject_message(
            "/example/ele00",
            0x00aa,
            0x0002,
            0,
            mesh_wire::encode_text(HELLO_OPCODE, "hi").unwrap(),
        )
        .unwrap();
        // Removal of some other object is ignored
        host.remove_interfaces("/org/bluez/mesh/node0000000000000001")
            .unwrap();

        let node = host.attached_node().await.unwrap();
        host.remove_interfaces(node).unwrap();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.end, SessionEnd::ServiceRemoved);

        let inbox = text.inbox().await;
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].text, "00x0001S11");
        assert_eq!(inbox[0].opcode, PATIENT_OPCODE);
        assert_eq!(inbox[1].source, 0x0002);
        assert_eq!(text.identifier().vendor_id(), Some(0));
    }
}
