//! Connection, funding and settlement collaborator of a [crate::node::Node].
//!
//! [LocalNetwork] connects nodes living in the same process. Every node gets
//! its own [LocalEndpoint] on the shared hub.

use crate::{
    channel::{
        Allocation, ChannelUpdate, LocalChannel, Params, PaymentChannel, State, UpdateHandler,
        UpdateResponder,
    },
    types::{Address, Hash},
};
use log::{debug, warn};
use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError, Weak},
    thread,
    time::Duration,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("address {0} already in use")]
    AddrInUse(String),
    #[error("not listening")]
    NotListening,
    #[error("connection to {0} refused")]
    ConnectionRefused(String),
    #[error("expected {expected:?} at {addr} but found {found:?}")]
    UnexpectedPeer {
        addr: String,
        expected: Address,
        found: Address,
    },
    #[error("not connected to {0:?}")]
    NotConnected(Address),
    #[error("peer {0:?} is gone")]
    PeerGone(Address),
    #[error("channel proposal rejected")]
    ProposalRejected,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("only final states can be settled")]
    NotFinal,
    #[error("persistence is not supported")]
    PersistenceUnsupported,
}

/// Proposal for a two-party channel, participant 0 is the proposer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelProposal {
    pub params: Params,
    pub init_bals: Allocation,
}

impl ChannelProposal {
    pub fn proposer(&self) -> Option<&Address> {
        self.params.participants.first()
    }
}

/// Callbacks a network makes into the node owning it.
pub trait NodeHandler<C>: Send + Sync {
    /// Decides on an incoming channel proposal. May block.
    fn handle_proposal(&self, proposal: &ChannelProposal) -> bool;

    /// A proposal accepted by [NodeHandler::handle_proposal] was funded.
    fn on_new_channel(&self, channel: C);

    /// The counterparty settled the channel.
    fn on_channel_closed(&self, channel: Hash);

    /// The counterparty proposes an update of `channel`.
    fn handle_update(
        &self,
        channel: Hash,
        old: &State,
        update: ChannelUpdate,
        responder: &mut dyn UpdateResponder,
    );
}

pub trait Network: Send + Sync {
    type Channel: PaymentChannel + 'static;

    /// Accepts connections at `addr` as participant `id`.
    fn listen(
        &self,
        addr: &str,
        id: Address,
        handler: Weak<dyn NodeHandler<Self::Channel>>,
    ) -> Result<(), NetError>;

    /// Connects to participant `peer` at `addr`.
    fn dial(&self, peer: Address, addr: &str, timeout: Duration) -> Result<(), NetError>;

    /// Proposes and funds a channel, returns our endpoint of it.
    fn propose_channel(
        &self,
        proposal: ChannelProposal,
        timeout: Duration,
    ) -> Result<Self::Channel, NetError>;

    /// Concludes a channel in its final state.
    fn settle(&self, channel: &Self::Channel, timeout: Duration) -> Result<(), NetError>;

    /// Restores channels persisted at `path` and reconnects them.
    fn restore(&self, path: &Path, timeout: Duration) -> Result<(), NetError>;

    fn close(&self) -> Result<(), NetError>;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Forwards channel updates to the node listening on an endpoint.
struct Forward(Weak<dyn NodeHandler<LocalChannel>>);

impl UpdateHandler for Forward {
    fn handle_update(
        &self,
        channel: Hash,
        old: &State,
        update: ChannelUpdate,
        responder: &mut dyn UpdateResponder,
    ) {
        match self.0.upgrade() {
            Some(node) => node.handle_update(channel, old, update, responder),
            None => debug!("channel={}: Dropping update for stopped node", channel),
        }
    }
}

struct Listener {
    id: Address,
    node: Weak<dyn NodeHandler<LocalChannel>>,
    updates: Arc<dyn UpdateHandler>,
    /// Participants this node may propose channels to.
    connected: Mutex<HashSet<Address>>,
}

#[derive(Default)]
struct Hub {
    /// By listen address.
    listeners: HashMap<String, Arc<Listener>>,
}

impl Hub {
    fn by_id(&self, id: &Address) -> Option<Arc<Listener>> {
        self.listeners.values().find(|l| l.id == *id).cloned()
    }
}

/// In-process network all [LocalEndpoint]s of one process share.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new, not yet listening endpoint.
    pub fn endpoint(&self) -> LocalEndpoint {
        LocalEndpoint {
            hub: self.hub.clone(),
            me: Mutex::new(None),
        }
    }
}

/// One node's access to a [LocalNetwork].
pub struct LocalEndpoint {
    hub: Arc<Mutex<Hub>>,
    /// Listen address and listener once listening.
    me: Mutex<Option<(String, Arc<Listener>)>>,
}

impl LocalEndpoint {
    fn me(&self) -> Result<Arc<Listener>, NetError> {
        lock(&self.me)
            .as_ref()
            .map(|(_, l)| l.clone())
            .ok_or(NetError::NotListening)
    }

    fn listener(&self, id: &Address) -> Result<Arc<Listener>, NetError> {
        lock(&self.hub).by_id(id).ok_or(NetError::PeerGone(*id))
    }

    fn node(listener: &Listener) -> Result<Arc<dyn NodeHandler<LocalChannel>>, NetError> {
        listener.node.upgrade().ok_or(NetError::PeerGone(listener.id))
    }
}

impl Network for LocalEndpoint {
    type Channel = LocalChannel;

    fn listen(
        &self,
        addr: &str,
        id: Address,
        handler: Weak<dyn NodeHandler<LocalChannel>>,
    ) -> Result<(), NetError> {
        let mut hub = lock(&self.hub);
        if hub.listeners.contains_key(addr) {
            return Err(NetError::AddrInUse(addr.to_string()));
        }
        let listener = Arc::new(Listener {
            id,
            updates: Arc::new(Forward(handler.clone())),
            node: handler,
            connected: Mutex::new(HashSet::new()),
        });
        hub.listeners.insert(addr.to_string(), listener.clone());
        *lock(&self.me) = Some((addr.to_string(), listener));
        debug!("Listening on {} as {:?}", addr, id);
        Ok(())
    }

    fn dial(&self, peer: Address, addr: &str, timeout: Duration) -> Result<(), NetError> {
        debug!("Dialing {:?} at {} (timeout {:?})", peer, addr, timeout);
        let me = self.me()?;
        let found = lock(&self.hub)
            .listeners
            .get(addr)
            .map(|l| l.id)
            .ok_or_else(|| NetError::ConnectionRefused(addr.to_string()))?;
        if found != peer {
            return Err(NetError::UnexpectedPeer {
                addr: addr.to_string(),
                expected: peer,
                found,
            });
        }
        lock(&me.connected).insert(peer);
        Ok(())
    }

    fn propose_channel(
        &self,
        proposal: ChannelProposal,
        timeout: Duration,
    ) -> Result<LocalChannel, NetError> {
        let me = self.me()?;
        let peer_id = proposal
            .params
            .participants
            .get(1)
            .copied()
            .ok_or(NetError::ProposalRejected)?;
        if !lock(&me.connected).contains(&peer_id) {
            return Err(NetError::NotConnected(peer_id));
        }
        let peer = self.listener(&peer_id)?;
        let peer_node = Self::node(&peer)?;

        // The counterparty may ask its user, which must not stall us past
        // the timeout.
        let (tx, rx) = mpsc::channel();
        let asked = proposal.clone();
        let asked_node = peer_node.clone();
        thread::spawn(move || {
            let _ = tx.send(asked_node.handle_proposal(&asked));
        });
        match rx.recv_timeout(timeout) {
            Ok(true) => {}
            Ok(false) => return Err(NetError::ProposalRejected),
            Err(mpsc::RecvTimeoutError::Timeout) => return Err(NetError::Timeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => return Err(NetError::PeerGone(peer_id)),
        }

        let init = State::new(&proposal.params, proposal.init_bals);
        let (ours, theirs) = LocalChannel::pair(proposal.params, init);
        ours.set_update_handler(&me.updates);
        theirs.set_update_handler(&peer.updates);
        debug!("channel={}: Funded", ours.channel_id());
        lock(&peer.connected).insert(me.id);
        peer_node.on_new_channel(theirs);
        Ok(ours)
    }

    fn settle(&self, channel: &LocalChannel, timeout: Duration) -> Result<(), NetError> {
        if channel.is_closed() {
            return Ok(());
        }
        if !channel.state().is_final {
            return Err(NetError::NotFinal);
        }
        let id = channel.channel_id();
        debug!("channel={}: Settling (timeout {:?})", id, timeout);
        channel.mark_closed();

        let peer_idx = 1 - channel.part_idx();
        let peer_id = channel.params().participants[peer_idx];
        match self.listener(&peer_id).and_then(|l| Self::node(&l)) {
            Ok(node) => node.on_channel_closed(id),
            Err(e) => warn!("channel={}: Could not notify peer about settlement: {}", id, e),
        }
        Ok(())
    }

    fn restore(&self, path: &Path, timeout: Duration) -> Result<(), NetError> {
        debug!(
            "Restoring from {} (timeout {:?})",
            path.display(),
            timeout
        );
        Err(NetError::PersistenceUnsupported)
    }

    fn close(&self) -> Result<(), NetError> {
        let (addr, _) = lock(&self.me).take().ok_or(NetError::NotListening)?;
        lock(&self.hub).listeners.remove(&addr);
        debug!("Stopped listening on {}", addr);
        Ok(())
    }
}
