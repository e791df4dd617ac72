//! Contract of the channel-update primitive a [crate::session::ChannelSession]
//! is built on.
//!
//! Signing and exchanging the signatures of a new state is the job of the
//! implementation, this layer only decides which states to propose and which
//! proposals to accept.

use super::{
    ledger::TransferError,
    state::{Params, State},
    PartIdx,
};
use crate::types::Hash;
use std::time::Duration;
use thiserror::Error;

/// Incoming proposal to move the channel to `state`, made by `actor_idx`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUpdate {
    pub state: State,
    pub actor_idx: PartIdx,
}

/// Local checks done before a proposal is sent out.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidUpdate {
    #[error("invalid version number: expected {expected}, got {got}")]
    InvalidVersionNumber { expected: u64, got: u64 },
    #[error("current state is final")]
    CurrentStateIsFinal,
    #[error("assets changed")]
    AssetsMismatch,
    #[error("allocation does not match the participants")]
    MalformedAllocation,
    #[error("total allocation amount changed")]
    TotalAllocationAmountMismatch,
}

/// Errors of a submission (propose, accept or reject).
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("update rejected by peer: {0}")]
    Rejected(String),
    #[error("peer did not respond")]
    NoResponse,
    #[error("another update is in progress")]
    Busy,
    #[error("channel is closed")]
    Closed,
    #[error("update already answered")]
    AlreadyAnswered,
    #[error("proposer stopped waiting for an answer")]
    Abandoned,
    #[error("building update")]
    Transfer(#[from] TransferError),
    #[error("invalid update")]
    InvalidUpdate(#[from] InvalidUpdate),
}

/// Read and update access to one channel.
///
/// Implementations serialise locally initiated updates and deliver incoming
/// ones through their own handler mechanism.
pub trait PaymentChannel: Send + Sync {
    fn channel_id(&self) -> Hash;

    fn params(&self) -> &Params;

    /// Our index in the channel.
    fn part_idx(&self) -> PartIdx;

    /// Authoritative current state.
    fn state(&self) -> State;

    /// Proposes the state produced by `update`, applied to a copy of the next
    /// state (version already incremented). Blocks until all participants
    /// accepted, one rejected or `timeout` elapsed.
    fn update_by<F>(&self, timeout: Duration, update: F) -> Result<State, UpdateError>
    where
        F: FnOnce(&mut State) -> Result<(), UpdateError>;
}

/// Answers a single incoming [ChannelUpdate].
pub trait UpdateResponder {
    fn accept(&mut self, timeout: Duration) -> Result<(), UpdateError>;
    fn reject(&mut self, timeout: Duration, reason: &str) -> Result<(), UpdateError>;
}

/// Receives the updates proposed by the other participants of a channel.
///
/// Called on a background thread of the channel implementation, at most one
/// call per channel endpoint at a time.
pub trait UpdateHandler: Send + Sync {
    fn handle_update(
        &self,
        channel: Hash,
        old: &State,
        update: ChannelUpdate,
        responder: &mut dyn UpdateResponder,
    );
}
