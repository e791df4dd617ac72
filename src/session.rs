//! Payment logic on top of a single channel.

use crate::{
    channel::{
        other_idx, transfer_balance, validate, ChannelUpdate, PaymentChannel, State,
        TransferError, UpdateError, UpdateResponder,
    },
    console::Console,
    print_async, print_line,
    types::{Hash, U256},
    units::Dot,
};
use log::{debug, error, warn};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use thiserror::Error;

/// Reason sent to the peer when its proposal fails validation.
pub const REJECT_REASON: &str = "invalid transition";

/// A locally initiated update failed.
#[derive(Debug, Error)]
#[error("sending update '{desc}'")]
pub struct SessionError {
    pub desc: &'static str,
    #[source]
    pub source: UpdateError,
}

/// Owns one channel with a counterparty: sends payments and decides on the
/// counterparty's proposals.
///
/// Callers must not start two updates concurrently, see [crate::node::Node]
/// for how the CLI serialises them.
pub struct ChannelSession<C> {
    channel: C,
    timeout: Duration,
    console: Arc<dyn Console>,
    /// Last state seen by this session, only used to tell whether balances
    /// changed. The channel's state is authoritative.
    observed: Mutex<State>,
}

impl<C: PaymentChannel> ChannelSession<C> {
    pub fn new(channel: C, timeout: Duration, console: Arc<dyn Console>) -> Self {
        let observed = Mutex::new(channel.state());
        Self {
            channel,
            timeout,
            console,
            observed,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_id(&self) -> Hash {
        self.channel.channel_id()
    }

    pub fn last_observed(&self) -> State {
        self.observed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn observe(&self, state: State) {
        *self.observed.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Pays `amount` base units to the counterparty.
    pub fn send_payment(&self, amount: U256) -> Result<(), SessionError> {
        let idx = self.channel.part_idx();
        self.send_update(
            move |state| {
                let bals = state
                    .outcome
                    .balances
                    .asset_mut(0)
                    .ok_or(TransferError::MissingAsset(0))?;
                transfer_balance(bals, idx, amount)?;
                Ok(())
            },
            "send payment",
        )
    }

    /// Marks the current balances as final, the last update before settling.
    pub fn send_final(&self) -> Result<(), SessionError> {
        debug!("channel={}: Sending final state", self.channel_id());
        self.send_update(
            |state| {
                state.is_final = true;
                Ok(())
            },
            "final",
        )
    }

    fn send_update<F>(&self, update: F, desc: &'static str) -> Result<(), SessionError>
    where
        F: FnOnce(&mut State) -> Result<(), UpdateError>,
    {
        let id = self.channel_id();
        debug!("channel={}: Sending update: {}", id, desc);

        let before = self.channel.state();
        self.observe(before.clone());
        let res = self.channel.update_by(self.timeout, update);
        debug!("channel={}: Sent update: {}, err: {:?}", id, desc, res.as_ref().err());

        let after = self.channel.state();
        let idx = self.channel.part_idx();
        if before.balance_of(idx) != after.balance_of(idx) {
            let (my, peer) = split_balances(&after, idx);
            print_line!(
                self.console,
                "💰 Sent payment. New balance: [My: {}, Peer: {}]",
                Dot(my),
                Dot(peer)
            );
        }
        self.observe(after);

        res.map(|_| ()).map_err(|source| SessionError { desc, source })
    }

    /// Accepts `update` if it only moves funds from its actor to us, rejects
    /// it otherwise.
    ///
    /// Failing to deliver the answer is only logged, the proposer will time
    /// out.
    pub fn handle_incoming_update(
        &self,
        old: &State,
        update: &ChannelUpdate,
        responder: &mut dyn UpdateResponder,
    ) {
        let id = self.channel_id();
        let idx = self.channel.part_idx();
        let bal_changed = old.balance_of(idx) != update.state.balance_of(idx);

        if let Err(e) = validate(old, &update.state, update.actor_idx) {
            warn!("channel={}: Rejecting update: {}", id, e);
            if let Err(e) = responder.reject(self.timeout, REJECT_REASON) {
                error!("channel={}: Could not reject channel update: {}", id, e);
            }
            return;
        }

        if let Err(e) = responder.accept(self.timeout) {
            error!("channel={}: handling payment update: {}", id, e);
            return;
        }
        self.observe(update.state.clone());

        if bal_changed {
            let (my, peer) = split_balances(&update.state, idx);
            print_async!(
                self.console,
                "💰 Received payment. New balance: [My: {}, Peer: {}]",
                Dot(my),
                Dot(peer)
            );
        }
    }

    /// Own and counterparty balance of the payment asset.
    pub fn balances(&self) -> (U256, U256) {
        split_balances(&self.channel.state(), self.channel.part_idx())
    }
}

/// `(ours, theirs)` in the first asset, zero unless it is a two-party channel.
fn split_balances(state: &State, idx: usize) -> (U256, U256) {
    match state.outcome.balances.asset(0) {
        Some(bals) if bals.len() == 2 => (
            bals.0.get(idx).copied().unwrap_or_default(),
            bals.0.get(other_idx(idx)).copied().unwrap_or_default(),
        ),
        _ => (U256::zero(), U256::zero()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{AppData, Balances},
        console::Recorder,
        testutil::{two_party_state, Answer, MockChannel, MockResponder},
        units::plank_per_dot,
    };

    fn session(channel: MockChannel) -> (ChannelSession<MockChannel>, Arc<Recorder>) {
        let console = Arc::new(Recorder::new());
        let session = ChannelSession::new(channel, Duration::from_secs(1), console.clone());
        (session, console)
    }

    fn dots(n: u64) -> u64 {
        (plank_per_dot() * n).as_u64()
    }

    #[test]
    fn send_payment_moves_funds_and_notifies() {
        let (s, console) = session(MockChannel::new(0, two_party_state(dots(10), dots(10))));
        s.send_payment(plank_per_dot() * 3u64).unwrap();

        assert_eq!(s.balances(), (U256::from(dots(7)), U256::from(dots(13))));
        assert_eq!(
            console.lines(),
            vec!["💰 Sent payment. New balance: [My: 7 DOT, Peer: 13 DOT]"]
        );
        assert_eq!(s.last_observed(), s.channel().state());
    }

    #[test]
    fn send_payment_as_second_participant() {
        let (s, _) = session(MockChannel::new(1, two_party_state(5, 5)));
        s.send_payment(U256::from(2)).unwrap();
        assert_eq!(s.balances(), (U256::from(3), U256::from(7)));
        assert_eq!(s.channel().state().balance_of(0), Some(U256::from(7)));
    }

    #[test]
    fn failed_payment_returns_error_without_notice() {
        let (s, console) = session(MockChannel::new(0, two_party_state(5, 5)).failing_on(1));
        let err = s.send_payment(U256::from(2)).unwrap_err();
        assert_eq!(err.desc, "send payment");
        assert!(matches!(err.source, UpdateError::Rejected(_)));
        assert_eq!(s.balances(), (U256::from(5), U256::from(5)));
        assert!(console.lines().is_empty());
    }

    #[test]
    fn overspend_is_refused_locally() {
        let (s, _) = session(MockChannel::new(0, two_party_state(5, 5)));
        let err = s.send_payment(U256::from(6)).unwrap_err();
        assert!(matches!(
            err.source,
            UpdateError::Transfer(TransferError::Underflow { .. })
        ));
        assert!(s.channel().proposals().is_empty());
    }

    #[test]
    fn send_final_sets_flag_only() {
        let (s, console) = session(MockChannel::new(0, two_party_state(5, 5)));
        s.send_final().unwrap();
        let state = s.channel().state();
        assert!(state.is_final);
        assert_eq!(state.outcome, two_party_state(5, 5).outcome);
        assert!(console.lines().is_empty());
    }

    fn incoming(old: &State, actor: usize, bals: [u64; 2]) -> ChannelUpdate {
        let mut state = old.make_next_state();
        state.outcome.balances = Balances(vec![vec![U256::from(bals[0]), U256::from(bals[1])].into()]);
        ChannelUpdate {
            state,
            actor_idx: actor,
        }
    }

    #[test]
    fn valid_incoming_payment_is_accepted() {
        let old = two_party_state(dots(10), dots(10));
        let (s, console) = session(MockChannel::new(1, old.clone()));
        let update = incoming(&old, 0, [dots(8), dots(12)]);

        let mut responder = MockResponder::default();
        s.handle_incoming_update(&old, &update, &mut responder);

        assert_eq!(responder.answers, vec![Answer::Accepted]);
        assert_eq!(
            console.events(),
            vec!["💰 Received payment. New balance: [My: 12 DOT, Peer: 8 DOT]"]
        );
        assert_eq!(s.last_observed(), update.state);
    }

    #[test]
    fn app_data_is_rejected_with_fixed_reason() {
        let old = two_party_state(10, 10);
        let (s, console) = session(MockChannel::new(1, old.clone()));
        let mut update = incoming(&old, 0, [8, 12]);
        update.state.app_data = AppData::Opaque(vec![0xff]);

        let mut responder = MockResponder::default();
        s.handle_incoming_update(&old, &update, &mut responder);

        assert_eq!(
            responder.answers,
            vec![Answer::Rejected(REJECT_REASON.to_string())]
        );
        assert!(console.events().is_empty());
    }

    #[test]
    fn stealing_is_rejected() {
        let old = two_party_state(10, 10);
        let (s, _) = session(MockChannel::new(1, old.clone()));
        let update = incoming(&old, 0, [12, 8]);

        let mut responder = MockResponder::default();
        s.handle_incoming_update(&old, &update, &mut responder);
        assert_eq!(
            responder.answers,
            vec![Answer::Rejected(REJECT_REASON.to_string())]
        );
    }

    #[test]
    fn failed_reject_does_not_fall_back_to_accept() {
        let old = two_party_state(10, 10);
        let (s, console) = session(MockChannel::new(1, old.clone()));
        let update = incoming(&old, 0, [12, 8]);

        let mut responder = MockResponder::failing();
        s.handle_incoming_update(&old, &update, &mut responder);
        assert_eq!(
            responder.answers,
            vec![Answer::Rejected(REJECT_REASON.to_string())]
        );
        assert!(console.events().is_empty());
    }

    #[test]
    fn failed_accept_is_not_announced() {
        let old = two_party_state(10, 10);
        let (s, console) = session(MockChannel::new(1, old.clone()));
        let update = incoming(&old, 0, [8, 12]);

        let mut responder = MockResponder::failing();
        s.handle_incoming_update(&old, &update, &mut responder);
        assert_eq!(responder.answers, vec![Answer::Accepted]);
        assert!(console.events().is_empty());
        assert_eq!(s.last_observed(), old);
    }

    #[test]
    fn final_update_without_payment_is_silent() {
        let old = two_party_state(10, 10);
        let (s, console) = session(MockChannel::new(1, old.clone()));
        let mut update = incoming(&old, 0, [10, 10]);
        update.state.is_final = true;

        let mut responder = MockResponder::default();
        s.handle_incoming_update(&old, &update, &mut responder);
        assert_eq!(responder.answers, vec![Answer::Accepted]);
        assert!(console.events().is_empty());
    }

    #[test]
    fn balances_of_non_two_party_channel_are_zero() {
        let mut state = two_party_state(1, 2);
        state.outcome.balances = Balances(vec![vec![U256::from(1), U256::from(2), U256::from(3)].into()]);
        let (s, _) = session(MockChannel::new(0, state));
        assert_eq!(s.balances(), (U256::zero(), U256::zero()));
    }
}
