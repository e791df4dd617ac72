//! In-process two-party channel.
//!
//! Both endpoints share one authoritative state. A proposal is handed to the
//! counterparty's [UpdateHandler] on a separate thread and installed by its
//! accept, the same contract a networked channel offers. Once accept returned
//! both endpoints see the new state.

use super::{
    state::{Params, State},
    update::{
        ChannelUpdate, InvalidUpdate, PaymentChannel, UpdateError, UpdateHandler,
        UpdateResponder,
    },
    PartIdx,
};
use crate::types::Hash;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak,
    },
    thread,
    time::Duration,
};

const PARTICIPANTS: usize = 2;

enum Response {
    Accept,
    Reject(String),
}

/// Progress of one proposal, decides between a late answer and the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting,
    Answered,
    Abandoned,
}

#[derive(Debug)]
struct Shared {
    params: Params,
    state: Mutex<State>,
    /// Held for the whole duration of a locally initiated update.
    updating: Mutex<()>,
    /// Serialises incoming deliveries per endpoint.
    deliveries: [Mutex<()>; PARTICIPANTS],
    handlers: Mutex<[Option<Weak<dyn UpdateHandler>>; PARTICIPANTS]>,
    closed: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One participant's view of an in-process channel.
#[derive(Debug, Clone)]
pub struct LocalChannel {
    shared: Arc<Shared>,
    part_idx: PartIdx,
}

impl LocalChannel {
    /// Creates both endpoints of a channel, index 0 is the proposer.
    pub fn pair(params: Params, init_state: State) -> (LocalChannel, LocalChannel) {
        debug_assert_eq!(params.num_parts(), PARTICIPANTS);
        let shared = Arc::new(Shared {
            params,
            state: Mutex::new(init_state),
            updating: Mutex::new(()),
            deliveries: [Mutex::new(()), Mutex::new(())],
            handlers: Mutex::new([None, None]),
            closed: AtomicBool::new(false),
        });
        (
            LocalChannel {
                shared: shared.clone(),
                part_idx: 0,
            },
            LocalChannel {
                shared,
                part_idx: 1,
            },
        )
    }

    /// Registers where updates proposed by the counterparty are delivered to.
    ///
    /// Only a weak reference is kept, the handler usually owns this channel.
    pub fn set_update_handler(&self, handler: &Arc<dyn UpdateHandler>) {
        lock(&self.shared.handlers)[self.part_idx] = Some(Arc::downgrade(handler));
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_closed(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    fn peer_idx(&self) -> PartIdx {
        1 - self.part_idx
    }

    fn peer_handler(&self) -> Option<Arc<dyn UpdateHandler>> {
        lock(&self.shared.handlers)[self.peer_idx()]
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn check_valid_transition(&self, current: &State, next: &State) -> Result<(), InvalidUpdate> {
        if current.is_final {
            Err(InvalidUpdate::CurrentStateIsFinal)
        } else if next.version() != current.version() + 1 {
            Err(InvalidUpdate::InvalidVersionNumber {
                expected: current.version() + 1,
                got: next.version(),
            })
        } else if next.outcome.assets != current.outcome.assets {
            Err(InvalidUpdate::AssetsMismatch)
        } else if !next.outcome.is_well_formed(self.shared.params.num_parts()) {
            Err(InvalidUpdate::MalformedAllocation)
        } else if next.outcome.balances.totals() != current.outcome.balances.totals() {
            Err(InvalidUpdate::TotalAllocationAmountMismatch)
        } else {
            Ok(())
        }
    }

    /// Hands the proposal to the counterparty on its own thread.
    fn deliver(
        &self,
        handler: Arc<dyn UpdateHandler>,
        old: State,
        update: ChannelUpdate,
        phase: Arc<Mutex<Phase>>,
        tx: mpsc::Sender<Response>,
    ) {
        let shared = self.shared.clone();
        let peer = self.peer_idx();
        thread::spawn(move || {
            let _delivery = lock(&shared.deliveries[peer]);
            let mut responder = LocalResponder {
                shared: shared.clone(),
                next: update.state.clone(),
                phase,
                tx: Some(tx),
            };
            handler.handle_update(old.channel_id(), &old, update, &mut responder);
        });
    }
}

impl PaymentChannel for LocalChannel {
    fn channel_id(&self) -> Hash {
        lock(&self.shared.state).channel_id()
    }

    fn params(&self) -> &Params {
        &self.shared.params
    }

    fn part_idx(&self) -> PartIdx {
        self.part_idx
    }

    fn state(&self) -> State {
        lock(&self.shared.state).clone()
    }

    fn update_by<F>(&self, timeout: Duration, update: F) -> Result<State, UpdateError>
    where
        F: FnOnce(&mut State) -> Result<(), UpdateError>,
    {
        let _updating = match self.shared.updating.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(UpdateError::Busy),
        };
        if self.is_closed() {
            return Err(UpdateError::Closed);
        }

        let current = self.state();
        let mut next = current.make_next_state();
        update(&mut next)?;
        self.check_valid_transition(&current, &next)?;

        let handler = self.peer_handler().ok_or(UpdateError::NoResponse)?;
        let (tx, rx) = mpsc::channel();
        let phase = Arc::new(Mutex::new(Phase::Waiting));
        self.deliver(
            handler,
            current,
            ChannelUpdate {
                state: next.clone(),
                actor_idx: self.part_idx,
            },
            phase.clone(),
            tx,
        );

        let response = match rx.recv_timeout(timeout) {
            Ok(response) => response,
            Err(RecvTimeoutError::Timeout) => {
                let mut phase = lock(&phase);
                if *phase == Phase::Waiting {
                    *phase = Phase::Abandoned;
                    return Err(UpdateError::Timeout(timeout));
                }
                // Answered right after the timeout, the response is queued.
                drop(phase);
                rx.try_recv().map_err(|_| UpdateError::NoResponse)?
            }
            Err(RecvTimeoutError::Disconnected) => return Err(UpdateError::NoResponse),
        };
        match response {
            Response::Accept => Ok(next),
            Response::Reject(reason) => Err(UpdateError::Rejected(reason)),
        }
    }
}

/// Answer handle passed to the counterparty's [UpdateHandler].
///
/// Dropping it without answering makes the proposer fail with
/// [UpdateError::NoResponse].
struct LocalResponder {
    shared: Arc<Shared>,
    next: State,
    phase: Arc<Mutex<Phase>>,
    tx: Option<mpsc::Sender<Response>>,
}

impl LocalResponder {
    fn answer(&mut self, response: Response) -> Result<(), UpdateError> {
        let tx = self.tx.take().ok_or(UpdateError::AlreadyAnswered)?;
        let mut phase = lock(&self.phase);
        if *phase == Phase::Abandoned {
            return Err(UpdateError::Abandoned);
        }
        if let Response::Accept = response {
            *lock(&self.shared.state) = self.next.clone();
        }
        *phase = Phase::Answered;
        // The proposer keeps the receiver until it saw the answer.
        tx.send(response).map_err(|_| UpdateError::Abandoned)
    }
}

impl UpdateResponder for LocalResponder {
    fn accept(&mut self, _timeout: Duration) -> Result<(), UpdateError> {
        self.answer(Response::Accept)
    }

    fn reject(&mut self, _timeout: Duration, reason: &str) -> Result<(), UpdateError> {
        self.answer(Response::Reject(reason.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{
            ledger::transfer_balance,
            state::{Allocation, Balances},
            Asset,
        },
        types::{Address, U256},
    };

    const TIMEOUT: Duration = Duration::from_secs(5);

    enum Behaviour {
        Accept,
        Reject,
        Ignore,
        AcceptAfter(Duration),
    }

    struct TestHandler {
        behaviour: Behaviour,
        results: Mutex<mpsc::Sender<Result<(), UpdateError>>>,
    }

    impl UpdateHandler for TestHandler {
        fn handle_update(
            &self,
            _channel: Hash,
            _old: &State,
            _update: ChannelUpdate,
            responder: &mut dyn UpdateResponder,
        ) {
            let res = match self.behaviour {
                Behaviour::Accept => responder.accept(TIMEOUT),
                Behaviour::Reject => responder.reject(TIMEOUT, "no thanks"),
                Behaviour::Ignore => return,
                Behaviour::AcceptAfter(d) => {
                    thread::sleep(d);
                    responder.accept(TIMEOUT)
                }
            };
            self.results.lock().unwrap().send(res).unwrap();
        }
    }

    fn setup(
        behaviour: Behaviour,
    ) -> (
        LocalChannel,
        LocalChannel,
        Arc<dyn UpdateHandler>,
        mpsc::Receiver<Result<(), UpdateError>>,
    ) {
        let params = Params {
            challenge_duration: 60,
            nonce: 42.into(),
            participants: vec![Address([1; 20]), Address([2; 20])],
            ledger_channel: true,
        };
        let init = State::new(
            &params,
            Allocation::new(
                vec![Asset::default()],
                Balances(vec![vec![U256::from(10), U256::from(10)].into()]),
            ),
        );
        let (a, b) = LocalChannel::pair(params, init);
        let (tx, rx) = mpsc::channel();
        let handler: Arc<dyn UpdateHandler> = Arc::new(TestHandler {
            behaviour,
            results: Mutex::new(tx),
        });
        b.set_update_handler(&handler);
        (a, b, handler, rx)
    }

    fn pay(amount: u64) -> impl FnOnce(&mut State) -> Result<(), UpdateError> {
        move |s: &mut State| {
            let bals = s.outcome.balances.asset_mut(0).unwrap();
            transfer_balance(bals, 0, amount.into())?;
            Ok(())
        }
    }

    #[test]
    fn accepted_update_is_installed_for_both() {
        let (a, b, _h, results) = setup(Behaviour::Accept);
        let new = a.update_by(TIMEOUT, pay(3)).unwrap();
        assert_eq!(new.version(), 1);
        assert_eq!(results.recv().unwrap().ok(), Some(()));
        assert_eq!(a.state(), new);
        assert_eq!(b.state().balance_of(1), Some(13.into()));
    }

    #[test]
    fn rejected_update_is_dropped() {
        let (a, _b, _h, _results) = setup(Behaviour::Reject);
        let err = a.update_by(TIMEOUT, pay(3)).unwrap_err();
        assert!(matches!(err, UpdateError::Rejected(reason) if reason == "no thanks"));
        assert_eq!(a.state().version(), 0);
    }

    #[test]
    fn unanswered_update_fails() {
        let (a, _b, _h, _results) = setup(Behaviour::Ignore);
        assert!(matches!(
            a.update_by(TIMEOUT, pay(3)),
            Err(UpdateError::NoResponse)
        ));
    }

    #[test]
    fn late_answer_times_out_and_fails_responder() {
        let (a, _b, _h, results) = setup(Behaviour::AcceptAfter(Duration::from_millis(200)));
        let timeout = Duration::from_millis(20);
        assert!(matches!(
            a.update_by(timeout, pay(3)),
            Err(UpdateError::Timeout(t)) if t == timeout
        ));
        assert!(matches!(results.recv().unwrap(), Err(UpdateError::Abandoned)));
        assert_eq!(a.state().version(), 0);
    }

    /// Reads its own endpoint right after accepting.
    struct ReadAfterAccept {
        channel: LocalChannel,
        seen: Mutex<mpsc::Sender<(Result<(), UpdateError>, u64)>>,
    }

    impl UpdateHandler for ReadAfterAccept {
        fn handle_update(
            &self,
            _channel: Hash,
            _old: &State,
            _update: ChannelUpdate,
            responder: &mut dyn UpdateResponder,
        ) {
            let res = responder.accept(TIMEOUT);
            let version = self.channel.state().version();
            self.seen.lock().unwrap().send((res, version)).unwrap();
        }
    }

    #[test]
    fn accepted_state_is_visible_when_accept_returns() {
        let (a, b, _h, _results) = setup(Behaviour::Ignore);
        let (tx, seen) = mpsc::channel();
        let handler: Arc<dyn UpdateHandler> = Arc::new(ReadAfterAccept {
            channel: b.clone(),
            seen: Mutex::new(tx),
        });
        b.set_update_handler(&handler);

        let proposer = thread::spawn(move || a.update_by(TIMEOUT, pay(3)).map(|s| s.version()));
        let (res, version) = seen.recv().unwrap();
        assert!(res.is_ok());
        assert_eq!(version, 1);
        assert_eq!(proposer.join().unwrap().unwrap(), 1);
    }

    #[test]
    fn late_answer_installs_nothing() {
        let (a, b, _h, results) = setup(Behaviour::AcceptAfter(Duration::from_millis(100)));
        assert!(a.update_by(Duration::from_millis(10), pay(3)).is_err());
        assert!(matches!(results.recv().unwrap(), Err(UpdateError::Abandoned)));
        assert_eq!(b.state().version(), 0);
        assert_eq!(b.state().balance_of(1), Some(10.into()));
    }

    #[test]
    fn overspend_never_reaches_peer() {
        let (a, _b, _h, results) = setup(Behaviour::Accept);
        assert!(matches!(
            a.update_by(TIMEOUT, pay(11)),
            Err(UpdateError::Transfer(_))
        ));
        assert!(results.try_recv().is_err());
    }

    #[test]
    fn final_state_is_last() {
        let (a, _b, _h, _results) = setup(Behaviour::Accept);
        a.update_by(TIMEOUT, |s| {
            s.is_final = true;
            Ok(())
        })
        .unwrap();
        assert!(matches!(
            a.update_by(TIMEOUT, pay(1)),
            Err(UpdateError::InvalidUpdate(InvalidUpdate::CurrentStateIsFinal))
        ));
    }

    #[test]
    fn total_must_be_kept() {
        let (a, _b, _h, _results) = setup(Behaviour::Accept);
        let res = a.update_by(TIMEOUT, |s| {
            s.outcome.balances.0[0].0[0] = 100.into();
            Ok(())
        });
        assert!(matches!(
            res,
            Err(UpdateError::InvalidUpdate(
                InvalidUpdate::TotalAllocationAmountMismatch
            ))
        ));
    }

    #[test]
    fn closed_channel_refuses_updates() {
        let (a, b, _h, _results) = setup(Behaviour::Accept);
        b.mark_closed();
        assert!(matches!(a.update_by(TIMEOUT, pay(1)), Err(UpdateError::Closed)));
    }

    #[test]
    fn missing_handler_means_no_response() {
        let (a, _b, handler, _results) = setup(Behaviour::Accept);
        drop(handler);
        assert!(matches!(
            a.update_by(TIMEOUT, pay(1)),
            Err(UpdateError::NoResponse)
        ));
    }
}
