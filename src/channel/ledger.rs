//! Balance transfers between the two participants of a payment channel.

use super::{state::ParticipantBalances, PartIdx};
use crate::types::U256;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("insufficient balance: participant[{payer}] has {balance} but pays {amount}")]
    Underflow {
        payer: PartIdx,
        balance: U256,
        amount: U256,
    },
    #[error("balance of participant[{0}] overflows")]
    Overflow(PartIdx),
    #[error("participant[{0}] is not part of the channel")]
    UnknownParticipant(PartIdx),
    #[error("channel has no asset {0}")]
    MissingAsset(usize),
}

/// The counterparty in a two-party channel.
pub fn other_idx(idx: PartIdx) -> PartIdx {
    idx ^ 1
}

/// Moves `amount` from `payer` to the other participant.
///
/// `bals` must be a copy of the current balances, the authoritative state is
/// only changed by the channel after both sides agreed. Nothing is modified
/// if an error is returned.
pub fn transfer_balance(
    bals: &mut ParticipantBalances,
    payer: PartIdx,
    amount: U256,
) -> Result<(), TransferError> {
    let payee = other_idx(payer);
    let (Some(&payer_bal), Some(&payee_bal)) = (bals.0.get(payer), bals.0.get(payee)) else {
        return Err(TransferError::UnknownParticipant(payer.max(payee)));
    };

    let new_payer_bal = payer_bal
        .checked_sub(amount)
        .ok_or(TransferError::Underflow {
            payer,
            balance: payer_bal,
            amount,
        })?;
    let new_payee_bal = payee_bal
        .checked_add(amount)
        .ok_or(TransferError::Overflow(payee))?;

    bals.0[payer] = new_payer_bal;
    bals.0[payee] = new_payee_bal;
    Ok(())
}
