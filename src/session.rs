use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{LinkError, Result},
    resolver::resolve,
    sequencer::{CommandSequencer, SequenceTarget},
    transport::{CentralEvent, CentralTransport},
    types::{
        CharacteristicNode, CharacteristicRef, DeviceAddress, DiscoveredTopology, LinkConfig,
        SequencerConfig, SessionState,
    },
};

struct SessionInner {
    peer: Option<DeviceAddress>,
    state: SessionState,
    topology: DiscoveredTopology,
    target: Option<CharacteristicRef>,
    sequence: Option<CancellationToken>,
}

/// Central-role connection state machine
///
/// Owns the single outbound link of the process: connect, discover, resolve
/// the target characteristic, read and subscribe to it, then hand the link to
/// the [`CommandSequencer`]. All transitions and the sequencer's timed steps
/// are serialized through one async mutex, so the session can be driven from
/// any task that receives transport events.
///
/// State changes are published on a [`watch`] channel; link failures surface
/// there as a transition to [`SessionState::Terminated`].
pub struct CentralSession<T> {
    inner: Arc<Mutex<SessionInner>>,
    transport: Arc<T>,
    state_tx: Arc<watch::Sender<SessionState>>,
    sequencer: Arc<CommandSequencer>,
    target: CharacteristicRef,
}

impl<T> Clone for CentralSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            transport: self.transport.clone(),
            state_tx: self.state_tx.clone(),
            sequencer: self.sequencer.clone(),
            target: self.target,
        }
    }
}

impl<T: CentralTransport + 'static> CentralSession<T> {
    /// Create an idle session targeting the characteristic named in `config`
    pub fn new(transport: Arc<T>, config: &LinkConfig, sequencer: &SequencerConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                peer: None,
                state: SessionState::Idle,
                topology: DiscoveredTopology::default(),
                target: None,
                sequence: None,
            })),
            transport,
            state_tx: Arc::new(state_tx),
            sequencer: Arc::new(CommandSequencer::new(sequencer)),
            target: config.target(),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Subscribe to state-change notifications
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Address of the current or last peer
    pub async fn peer(&self) -> Option<DeviceAddress> {
        self.inner.lock().await.peer.clone()
    }

    /// Topology from the last discovery
    pub async fn topology(&self) -> DiscoveredTopology {
        self.inner.lock().await.topology.clone()
    }

    /// Resolved target characteristic, if any
    pub async fn target_characteristic(&self) -> Option<CharacteristicRef> {
        self.inner.lock().await.target
    }

    /// Last known value of the resolved target characteristic
    pub async fn target_value(&self) -> Option<Bytes> {
        let mut inner = self.inner.lock().await;
        let target = inner.target?;
        inner
            .topology
            .characteristic_mut(&target)
            .map(|node| node.value.clone())
    }

    /// Start connecting to `address`
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::PreconditionFailed`] if a session is already
    /// live; the existing session is left untouched. A transport error
    /// terminates the new session and is returned as-is.
    pub async fn connect(&self, address: &DeviceAddress) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if !inner.state.accepts_connect() {
            let error = LinkError::precondition(format!(
                "connect to {address} refused while {}",
                inner.state
            ));
            warn!("{}", error);
            return Err(error);
        }

        info!("Connecting to {}", address);
        inner.peer = Some(address.clone());
        inner.topology = DiscoveredTopology::default();
        inner.target = None;
        self.transition(&mut inner, SessionState::Connecting);

        if let Err(e) = self.transport.request_connect(address).await {
            error!("Connect request to {} failed: {}", address, e);
            self.transition(&mut inner, SessionState::Terminated);
            return Err(e);
        }

        Ok(())
    }

    /// Tear the link down
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::PreconditionFailed`] if there is no live session.
    pub async fn disconnect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if !inner.state.is_live() {
            let error =
                LinkError::precondition(format!("disconnect requested while {}", inner.state));
            warn!("{}", error);
            return Err(error);
        }

        self.begin_disconnect(&mut inner).await
    }

    /// Write the resolved target characteristic
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::PreconditionFailed`] outside [`SessionState::Ready`]
    /// or when no target was resolved.
    pub async fn write(&self, value: Bytes) -> Result<()> {
        let inner = self.inner.lock().await;
        let target = Self::ready_target(&inner, "write")?;
        self.transport.request_write(&target, value).await
    }

    /// Read the resolved target characteristic
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::PreconditionFailed`] outside [`SessionState::Ready`]
    /// or when no target was resolved.
    pub async fn read(&self) -> Result<()> {
        let inner = self.inner.lock().await;
        let target = Self::ready_target(&inner, "read")?;
        self.transport.request_read(&target).await
    }

    /// Apply a transport event
    ///
    /// Events that are impossible in the current state are ignored.
    /// Advertisement and restart events are not session events and are
    /// ignored here.
    ///
    /// # Errors
    ///
    /// Returns the transport error if a follow-up request could not be
    /// issued; the session has already moved to [`SessionState::Terminated`].
    pub async fn handle_event(&self, event: CentralEvent) -> Result<()> {
        match event {
            CentralEvent::LinkConnected(address) => self.on_link_connected(&address).await,
            CentralEvent::LinkDisconnected(address) => {
                self.on_link_disconnected(&address).await;
                Ok(())
            }
            CentralEvent::ConnectionFailed { address, reason } => {
                self.on_connection_failed(&address, &reason).await;
                Ok(())
            }
            CentralEvent::ServicesDiscovered(topology) => {
                self.on_services_discovered(topology).await;
                Ok(())
            }
            CentralEvent::CharacteristicValue {
                characteristic,
                value,
            } => {
                self.on_characteristic_value(&characteristic, value).await;
                Ok(())
            }
            CentralEvent::Advertisement(_)
            | CentralEvent::AdvertisementBatch(_)
            | CentralEvent::Restarted => {
                debug!("Session ignoring non-link event");
                Ok(())
            }
        }
    }

    async fn on_link_connected(&self, address: &DeviceAddress) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if inner.state != SessionState::Connecting || inner.peer.as_ref() != Some(address) {
            debug!("Ignoring link-connected for {} while {}", address, inner.state);
            return Ok(());
        }

        self.transition(&mut inner, SessionState::Discovering);

        if let Err(e) = self.transport.request_service_discovery().await {
            error!("Service discovery request failed: {}", e);
            if let Err(e) = self.transport.request_disconnect().await {
                warn!("Disconnect after failed discovery request failed: {}", e);
            }
            self.transition(&mut inner, SessionState::Terminated);
            return Err(e);
        }

        Ok(())
    }

    async fn on_link_disconnected(&self, address: &DeviceAddress) {
        let mut inner = self.inner.lock().await;

        if let Some(peer) = &inner.peer {
            if peer != address {
                debug!("Ignoring link-disconnected for foreign device {}", address);
                return;
            }
        }

        if inner.state == SessionState::Ready {
            info!("Peer {} dropped the link", address);
        }
        self.transition(&mut inner, SessionState::Terminated);
    }

    async fn on_connection_failed(&self, address: &DeviceAddress, reason: &str) {
        let mut inner = self.inner.lock().await;

        if inner.state != SessionState::Connecting || inner.peer.as_ref() != Some(address) {
            debug!("Ignoring connection failure for {} while {}", address, inner.state);
            return;
        }

        warn!(
            "{}",
            LinkError::LinkFailure(format!("connection to {address} failed: {reason}"))
        );
        self.transition(&mut inner, SessionState::Terminated);
    }

    async fn on_services_discovered(&self, topology: DiscoveredTopology) {
        let mut inner = self.inner.lock().await;

        if inner.state != SessionState::Discovering {
            warn!("Ignoring services-discovered while {}", inner.state);
            return;
        }

        let resolved = resolve(&topology, &self.target).map(CharacteristicNode::reference);
        inner.topology = topology;
        inner.target = resolved;

        let Some(target) = inner.target else {
            warn!(
                "{}",
                LinkError::precondition(format!(
                    "target {} not found, skipping read/subscribe",
                    self.target
                ))
            );
            self.transition(&mut inner, SessionState::Ready);
            return;
        };

        info!("Resolved target characteristic {}", target);
        if let Err(e) = self.transport.request_read(&target).await {
            warn!("Read request for {} failed: {}", target, e);
        }
        if let Err(e) = self.transport.request_subscribe(&target, true).await {
            warn!("Subscribe request for {} failed: {}", target, e);
        }

        self.transition(&mut inner, SessionState::Ready);

        let token = CancellationToken::new();
        inner.sequence = Some(token.clone());
        self.sequencer.activate(self.clone(), token);
    }

    async fn on_characteristic_value(&self, characteristic: &CharacteristicRef, value: Bytes) {
        let mut inner = self.inner.lock().await;

        if inner.state != SessionState::Ready || inner.target.as_ref() != Some(characteristic) {
            debug!("Ignoring value for {} while {}", characteristic, inner.state);
            return;
        }

        debug!("Value of {} is now {:02X?}", characteristic, &value[..]);
        if let Some(node) = inner.topology.characteristic_mut(characteristic) {
            node.value = value;
        }
    }

    async fn begin_disconnect(&self, inner: &mut SessionInner) -> Result<()> {
        self.transition(inner, SessionState::Disconnecting);

        if let Err(e) = self.transport.request_disconnect().await {
            error!("Disconnect request failed: {}", e);
            self.transition(inner, SessionState::Terminated);
            return Err(e);
        }

        Ok(())
    }

    fn ready_target(inner: &SessionInner, operation: &str) -> Result<CharacteristicRef> {
        if inner.state != SessionState::Ready {
            let error =
                LinkError::precondition(format!("{operation} requested while {}", inner.state));
            warn!("{}", error);
            return Err(error);
        }

        inner.target.ok_or_else(|| {
            let error = LinkError::precondition(format!(
                "{operation} requested but no target characteristic was resolved"
            ));
            warn!("{}", error);
            error
        })
    }

    fn transition(&self, inner: &mut SessionInner, next: SessionState) {
        let previous = inner.state;
        if previous == next {
            return;
        }

        inner.state = next;
        if previous == SessionState::Ready {
            if let Some(token) = inner.sequence.take() {
                debug!("Cancelling pending command sequence");
                token.cancel();
            }
        }

        info!("Session {} -> {}", previous, next);
        self.state_tx.send_replace(next);
    }
}

#[async_trait]
impl<T: CentralTransport + 'static> SequenceTarget for CentralSession<T> {
    async fn write_value(&self, value: Bytes) -> Result<()> {
        self.write(value).await
    }

    async fn disconnect_if_connected(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Ready {
            return Ok(false);
        }

        self.begin_disconnect(&mut inner).await.map(|()| true)
    }
}
