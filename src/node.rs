//! The command backend: peers, their channels and the network.

use crate::{
    bench::{self, Target},
    channel::{
        other_idx, Allocation, Asset, Balances, ChannelUpdate, Params, PaymentChannel, State,
        UpdateResponder,
    },
    command::Backend,
    config::Config,
    console::Console,
    net::{ChannelProposal, Network, NodeHandler},
    print_async, print_line,
    router::PromptSlot,
    session::ChannelSession,
    types::{Address, Hash, U256},
    units::Dot,
};
use anyhow::{bail, Context};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use log::{debug, info, warn};
use std::{
    collections::BTreeMap,
    sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError, Weak},
};

/// How incoming channel proposals are decided.
pub enum ProposalPolicy {
    /// Ask the user through the prompt slot.
    Prompt(Arc<PromptSlot>),
    /// Accept every proposal of a known peer.
    AutoAccept,
}

struct Peer<C> {
    id: Address,
    session: Option<Arc<ChannelSession<C>>>,
}

pub struct Node<N: Network> {
    cfg: Config,
    network: N,
    console: Arc<dyn Console>,
    policy: ProposalPolicy,
    /// Connected peers by alias.
    peers: Mutex<BTreeMap<String, Peer<N::Channel>>>,
    /// Serialises the commands that update channels.
    ops: Mutex<()>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<N: Network + 'static> Node<N> {
    /// Starts listening and restores persisted channels if enabled.
    ///
    /// A failed restore is logged and otherwise ignored.
    pub fn start(
        cfg: Config,
        network: N,
        console: Arc<dyn Console>,
        policy: ProposalPolicy,
    ) -> anyhow::Result<Arc<Self>> {
        let node = Arc::new(Self {
            cfg,
            network,
            console,
            policy,
            peers: Mutex::new(BTreeMap::new()),
            ops: Mutex::new(()),
        });
        let handler: Weak<dyn NodeHandler<N::Channel>> = Arc::downgrade(&node) as _;
        let addr = node.cfg.node.listen_addr();
        node.network
            .listen(&addr, node.cfg.perun_id, handler)
            .with_context(|| format!("listening on {}", addr))?;
        info!("{} listening on {}", node.cfg.alias, addr);

        if node.cfg.node.persistence_enabled {
            if let Err(e) = node.network.restore(
                &node.cfg.node.persistence_path,
                node.cfg.node.reconnect_timeout,
            ) {
                warn!("Could not restore persisted channels: {}", e);
            }
        }
        Ok(node)
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    fn alias_of(&self, id: &Address) -> Option<&str> {
        self.cfg
            .remote_peers()
            .find(|(_, p)| p.perun_id == *id)
            .map(|(alias, _)| alias.as_str())
    }

    /// Channel session with `alias`, if any.
    pub fn session(&self, alias: &str) -> Option<Arc<ChannelSession<N::Channel>>> {
        lock(&self.peers).get(alias).and_then(|p| p.session.clone())
    }

    fn open_session(&self, alias: &str) -> anyhow::Result<Arc<ChannelSession<N::Channel>>> {
        match lock(&self.peers).get(alias) {
            None => bail!("Peer not found"),
            Some(Peer { session: None, .. }) => bail!("Open a state channel first"),
            Some(Peer {
                session: Some(s), ..
            }) => Ok(s.clone()),
        }
    }

    fn by_channel(&self, id: &Hash) -> Option<(String, Arc<ChannelSession<N::Channel>>)> {
        lock(&self.peers).iter().find_map(|(alias, p)| {
            p.session
                .as_ref()
                .filter(|s| s.channel_id() == *id)
                .map(|s| (alias.clone(), s.clone()))
        })
    }

    /// Shows the proposal to the user and waits for the answer.
    fn ask(&self, slot: &PromptSlot, alias: &str, ours: Dot, theirs: Dot) -> bool {
        let (tx, rx) = mpsc::channel();
        // Taken by whoever comes first, the answer or the timeout.
        let reply = Arc::new(Mutex::new(Some(tx)));
        let answer_to = reply.clone();
        let msg = format!(
            "🔁 Incoming channel proposal from {} with funding [My: {}, Peer: {}].\nAccept (y/n)? ",
            alias, ours, theirs
        );
        slot.register(&msg, move |answer| match lock(&answer_to).take() {
            Some(tx) => {
                if tx.send(answer.trim() == "y").is_err() {
                    warn!("Answer to channel proposal got lost");
                }
                None
            }
            // Expired, the line was meant as command.
            None => Some(answer),
        });
        match rx.recv_timeout(self.cfg.node.handle_timeout) {
            Ok(accepted) => accepted,
            // Answered right after the timeout.
            Err(_) if lock(&reply).take().is_none() => rx.try_recv().unwrap_or(false),
            Err(_) => {
                warn!("Proposal from {} was not answered in time", alias);
                print_async!(
                    self.console,
                    "⌛ Channel proposal from {} expired and was rejected",
                    alias
                );
                false
            }
        }
    }

    fn print_balances_table(&self) {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Peer", "Channel", "My Balance", "Peer Balance"]);
        for (alias, peer) in lock(&self.peers).iter() {
            match &peer.session {
                Some(s) => {
                    let (my, other) = s.balances();
                    table.add_row(vec![
                        alias.clone(),
                        format!("{:?}", s.channel_id()),
                        Dot(my).to_string(),
                        Dot(other).to_string(),
                    ]);
                }
                None => {
                    table.add_row(vec![alias.clone(), "-".into(), "-".into(), "-".into()]);
                }
            }
        }
        print_line!(self.console, "{}", table);
    }
}

impl<N: Network + 'static> Backend for Node<N> {
    fn is_known_alias(&self, alias: &str) -> bool {
        self.cfg.remote_peers().any(|(a, _)| a == alias)
    }

    fn exists_peer(&self, alias: &str) -> bool {
        lock(&self.peers).contains_key(alias)
    }

    fn connect(&self, alias: &str) -> anyhow::Result<()> {
        if self.exists_peer(alias) {
            bail!("already connected to {}", alias);
        }
        let peer = self
            .cfg
            .peers
            .get(alias)
            .with_context(|| format!("unknown alias {}", alias))?;
        self.network
            .dial(peer.perun_id, &peer.addr(), self.cfg.node.dial_timeout)
            .with_context(|| format!("connecting to {}", alias))?;
        lock(&self.peers)
            .entry(alias.to_string())
            .or_insert(Peer {
                id: peer.perun_id,
                session: None,
            });
        print_line!(self.console, "🔗 Connected to {}", alias);
        Ok(())
    }

    fn open(&self, alias: &str, ours: Dot, theirs: Dot) -> anyhow::Result<()> {
        let _ops = lock(&self.ops);
        let peer_id = match lock(&self.peers).get(alias) {
            None => bail!("Peer not found"),
            Some(Peer {
                session: Some(_), ..
            }) => bail!("channel with {} already open", alias),
            Some(p) => p.id,
        };

        let params = Params {
            challenge_duration: self.cfg.channel.challenge_duration,
            nonce: rand::random::<U256>(),
            participants: vec![self.cfg.perun_id, peer_id],
            ledger_channel: true,
        };
        let init_bals = Allocation::new(
            vec![Asset::default()],
            Balances(vec![vec![ours.planks(), theirs.planks()].into()]),
        );
        let channel = self
            .network
            .propose_channel(ChannelProposal { params, init_bals }, self.cfg.channel.fund_timeout)
            .context("proposing channel")?;

        let session = Arc::new(ChannelSession::new(
            channel,
            self.cfg.channel.timeout,
            self.console.clone(),
        ));
        let (my, other) = session.balances();
        debug!("channel={}: Opened with {}", session.channel_id(), alias);
        if let Some(p) = lock(&self.peers).get_mut(alias) {
            p.session = Some(session);
        }
        print_line!(
            self.console,
            "🆕 Channel established with {}. Initial balance: [My: {}, Peer: {}]",
            alias,
            Dot(my),
            Dot(other)
        );
        Ok(())
    }

    fn send(&self, alias: &str, amount: Dot) -> anyhow::Result<()> {
        let _ops = lock(&self.ops);
        let session = self.open_session(alias)?;
        session
            .send_payment(amount.planks())
            .with_context(|| format!("sending {} to {}", amount, alias))
    }

    fn close(&self, alias: &str) -> anyhow::Result<()> {
        let _ops = lock(&self.ops);
        let session = self.open_session(alias)?;
        session.send_final().context("finalizing channel")?;
        self.network
            .settle(session.channel(), self.cfg.channel.settle_timeout)
            .context("settling channel")?;
        if let Some(p) = lock(&self.peers).get_mut(alias) {
            p.session = None;
        }
        print_line!(self.console, "❎ Channel closed");
        Ok(())
    }

    fn print_config(&self) -> anyhow::Result<()> {
        print_line!(self.console, "{}", self.cfg);
        Ok(())
    }

    fn info(&self) -> anyhow::Result<()> {
        self.print_balances_table();
        Ok(())
    }

    fn benchmark(&self, alias: &str, amount: u64, count: u64) -> anyhow::Result<()> {
        let _ops = lock(&self.ops);
        let total = Dot::from_whole(amount)?;
        let entry = lock(&self.peers).get(alias).map(|p| p.session.clone());
        let target = match &entry {
            None => Target::Unknown,
            Some(None) => Target::NotOpen,
            Some(Some(s)) => Target::Open(&**s),
        };
        let summary = bench::run(target, total.planks(), count)?;
        print_line!(self.console, "{}", summary);
        Ok(())
    }

    fn exit(&self) -> anyhow::Result<()> {
        self.network.close().context("closing network")
    }
}

impl<N: Network + 'static> NodeHandler<N::Channel> for Node<N> {
    fn handle_proposal(&self, proposal: &ChannelProposal) -> bool {
        let alias = match proposal.proposer().and_then(|id| self.alias_of(id)) {
            Some(alias) => alias.to_string(),
            None => {
                warn!("Rejecting channel proposal from unknown participant");
                return false;
            }
        };
        if self.session(&alias).is_some() {
            warn!("Rejecting second channel proposal from {}", alias);
            return false;
        }
        let bals = proposal.init_bals.balances.asset(0);
        let (theirs, ours) = match bals.map(|b| b.0.as_slice()) {
            Some([theirs, ours]) => (Dot(*theirs), Dot(*ours)),
            _ => {
                warn!("Rejecting malformed channel proposal from {}", alias);
                return false;
            }
        };

        match &self.policy {
            ProposalPolicy::AutoAccept => true,
            ProposalPolicy::Prompt(slot) => self.ask(slot, &alias, ours, theirs),
        }
    }

    fn on_new_channel(&self, channel: N::Channel) {
        let peer_id = channel
            .params()
            .participants
            .get(other_idx(channel.part_idx()))
            .copied();
        let Some((alias, id)) =
            peer_id.and_then(|id| self.alias_of(&id).map(|alias| (alias.to_string(), id)))
        else {
            warn!("channel={}: No peer for new channel", channel.channel_id());
            return;
        };

        let session = Arc::new(ChannelSession::new(
            channel,
            self.cfg.channel.timeout,
            self.console.clone(),
        ));
        let (my, other) = session.balances();
        lock(&self.peers).insert(
            alias.clone(),
            Peer {
                id,
                session: Some(session),
            },
        );
        print_async!(
            self.console,
            "🆕 Channel established with {}. Initial balance: [My: {}, Peer: {}]",
            alias,
            Dot(my),
            Dot(other)
        );
    }

    fn on_channel_closed(&self, channel: Hash) {
        let Some((alias, _)) = self.by_channel(&channel) else {
            debug!("channel={}: Closed channel is unknown", channel);
            return;
        };
        if let Some(p) = lock(&self.peers).get_mut(&alias) {
            p.session = None;
        }
        print_async!(self.console, "❎ Channel with {} closed", alias);
    }

    fn handle_update(
        &self,
        channel: Hash,
        old: &State,
        update: ChannelUpdate,
        responder: &mut dyn UpdateResponder,
    ) {
        match self.by_channel(&channel) {
            Some((_, session)) => session.handle_incoming_update(old, &update, responder),
            None => {
                warn!("channel={}: Update for unknown channel", channel);
                if let Err(e) = responder.reject(self.cfg.channel.timeout, "unknown channel") {
                    warn!("channel={}: Could not reject update: {}", channel, e);
                }
            }
        }
    }
}
