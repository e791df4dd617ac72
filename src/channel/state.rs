//! Rust representations of the channel state with a participant and asset
//! count fixed per channel but only known at runtime.

use super::{Asset, PartIdx};
use crate::types::{Address, Hash, U256};
use sha3::{Digest, Keccak256};

/// Parameters for this channel, exchanged during channel proposal and fixed
/// for the channel's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Params {
    pub challenge_duration: u64,
    pub nonce: U256,
    pub participants: Vec<Address>,
    pub ledger_channel: bool,
}

impl Params {
    /// The channel id is the Keccak256 hash over all parameters, thus two
    /// channels between the same participants differ by their nonce.
    pub fn channel_id(&self) -> Hash {
        let mut hasher = Keccak256::new();
        hasher.update(self.challenge_duration.to_be_bytes());
        hasher.update(self.nonce.to_be_bytes());
        hasher.update((self.participants.len() as u64).to_be_bytes());
        for p in &self.participants {
            hasher.update(p.0);
        }
        hasher.update([self.ledger_channel as u8]);
        Hash(hasher.finalize().into())
    }

    pub fn num_parts(&self) -> usize {
        self.participants.len()
    }
}

/// Application specific payload of a state.
///
/// Payment channels never carry one, anything other than [AppData::NoData]
/// means the counterparty tries to run an app we don't understand.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AppData {
    #[default]
    NoData,
    Opaque(Vec<u8>),
}

impl AppData {
    pub fn is_no_data(&self) -> bool {
        matches!(self, AppData::NoData)
    }
}

/// Stores the complete state of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    id: Hash,
    version: u64,
    pub outcome: Allocation,
    pub app_data: AppData,
    pub is_final: bool,
}

impl State {
    pub fn new(params: &Params, init_bals: Allocation) -> Self {
        State {
            id: params.channel_id(),
            version: 0,
            outcome: init_bals,
            app_data: AppData::NoData,
            is_final: false,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn channel_id(&self) -> Hash {
        self.id
    }

    /// Create a new state that will replace this state.
    ///
    /// Having id and version as private fields forces the caller to not
    /// accidentally write garbage to one of those fields.
    pub fn make_next_state(&self) -> Self {
        State {
            id: self.id,
            version: self.version + 1,
            outcome: self.outcome.clone(),
            app_data: self.app_data.clone(),
            is_final: self.is_final,
        }
    }

    /// Balance of `part` in the first asset, the one payments are made in.
    pub fn balance_of(&self, part: PartIdx) -> Option<U256> {
        self.outcome
            .balances
            .asset(0)
            .and_then(|bals| bals.0.get(part).copied())
    }
}

/// Balances per asset, in the same order as [Allocation::assets].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Balances(pub Vec<ParticipantBalances>);

impl Balances {
    pub fn asset(&self, asset: usize) -> Option<&ParticipantBalances> {
        self.0.get(asset)
    }

    pub fn asset_mut(&mut self, asset: usize) -> Option<&mut ParticipantBalances> {
        self.0.get_mut(asset)
    }

    pub fn num_assets(&self) -> usize {
        self.0.len()
    }

    /// Sum per asset, `None` if any of them overflows.
    pub fn totals(&self) -> Option<Vec<U256>> {
        self.0.iter().map(ParticipantBalances::total).collect()
    }
}

/// Balance of each participant for a single asset, indexed by [PartIdx].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParticipantBalances(pub Vec<U256>);

impl ParticipantBalances {
    pub fn total(&self) -> Option<U256> {
        self.0
            .iter()
            .try_fold(U256::zero(), |acc, b| acc.checked_add(*b))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<U256>> for ParticipantBalances {
    fn from(v: Vec<U256>) -> Self {
        Self(v)
    }
}

/// Stores which participant has how much of each asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub assets: Vec<Asset>,
    pub balances: Balances,
}

impl Allocation {
    pub fn new(assets: Vec<Asset>, balances: Balances) -> Self {
        Self { assets, balances }
    }

    /// One balance vector per asset, each with one entry per participant.
    pub fn is_well_formed(&self, num_parts: usize) -> bool {
        self.assets.len() == self.balances.num_assets()
            && self.balances.0.iter().all(|b| b.len() == num_parts)
    }
}
