//! Checks that an incoming transition only moves funds away from the actor.

use super::{state::State, PartIdx};
use crate::types::U256;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidTransition {
    #[error("channel must not have app data")]
    UnexpectedAppData,
    #[error("payer[{actor}] steals asset {asset}, so {from} < {to}")]
    PayerSelfIncrease {
        actor: PartIdx,
        asset: usize,
        from: U256,
        to: U256,
    },
    #[error("payer[{actor}] reduces participant[{participant}]'s asset {asset}")]
    PayeeDecreased {
        actor: PartIdx,
        participant: PartIdx,
        asset: usize,
    },
    #[error("actor[{actor}] is not one of the {parts} participants")]
    UnknownActor { actor: PartIdx, parts: usize },
    #[error("number of assets changed from {from} to {to}")]
    AssetCountMismatch { from: usize, to: usize },
    #[error("number of participants of asset {asset} changed from {from} to {to}")]
    ParticipantCountMismatch { asset: usize, from: usize, to: usize },
}

/// Validates the transition `from -> to` proposed by `actor`.
///
/// For every asset the actor's balance must not increase and no other
/// participant's balance must decrease. With two participants this is
/// equivalent to conservation of funds, for more participants total value is
/// not checked.
pub fn validate(from: &State, to: &State, actor: PartIdx) -> Result<(), InvalidTransition> {
    if !to.app_data.is_no_data() {
        return Err(InvalidTransition::UnexpectedAppData);
    }

    let from_bals = &from.outcome.balances.0;
    let to_bals = &to.outcome.balances.0;
    if from_bals.len() != to_bals.len() {
        return Err(InvalidTransition::AssetCountMismatch {
            from: from_bals.len(),
            to: to_bals.len(),
        });
    }

    for (asset, (old, new)) in from_bals.iter().zip(to_bals).enumerate() {
        if old.len() != new.len() {
            return Err(InvalidTransition::ParticipantCountMismatch {
                asset,
                from: old.len(),
                to: new.len(),
            });
        }
        if actor >= old.len() {
            return Err(InvalidTransition::UnknownActor {
                actor,
                parts: old.len(),
            });
        }

        for (part, (&before, &after)) in old.0.iter().zip(&new.0).enumerate() {
            if part == actor && before < after {
                return Err(InvalidTransition::PayerSelfIncrease {
                    actor,
                    asset,
                    from: before,
                    to: after,
                });
            } else if part != actor && before > after {
                return Err(InvalidTransition::PayeeDecreased {
                    actor,
                    participant: part,
                    asset,
                });
            }
        }
    }
    Ok(())
}
