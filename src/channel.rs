pub mod ledger;
pub mod local;
pub mod state;
pub mod update;
pub mod validator;

use crate::types::{Address, U256};

pub use ledger::{other_idx, transfer_balance, TransferError};
pub use local::LocalChannel;
pub use state::{Allocation, AppData, Balances, Params, ParticipantBalances, State};
pub use update::{
    ChannelUpdate, InvalidUpdate, PaymentChannel, UpdateError, UpdateHandler, UpdateResponder,
};
pub use validator::{validate, InvalidTransition};

/// Index of a participant in the channel.
///
/// `0` is the proposer of the channel.
pub type PartIdx = usize;

/// Uniquely identifies an Asset by blockchain + AssetHolder.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Asset {
    pub chain_id: U256,
    pub holder: Address,
}
