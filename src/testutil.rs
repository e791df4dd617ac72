//! Scripted channel and responder used by the unit tests.

use crate::{
    channel::{
        Allocation, Asset, Balances, Params, PartIdx, PaymentChannel, State, UpdateError,
        UpdateResponder,
    },
    types::{Address, Hash, U256},
};
use std::{sync::Mutex, time::Duration};

pub fn params() -> Params {
    Params {
        challenge_duration: 60,
        nonce: 7.into(),
        participants: vec![Address([0xa; 20]), Address([0xb; 20])],
        ledger_channel: true,
    }
}

pub fn two_party_state(a: u64, b: u64) -> State {
    State::new(
        &params(),
        Allocation::new(
            vec![Asset::default()],
            Balances(vec![vec![U256::from(a), U256::from(b)].into()]),
        ),
    )
}

/// Channel that accepts every proposal unless told to fail on a given call.
#[derive(Debug)]
pub struct MockChannel {
    params: Params,
    part_idx: PartIdx,
    state: Mutex<State>,
    fail_on_call: Option<usize>,
    proposals: Mutex<Vec<State>>,
}

impl MockChannel {
    pub fn new(part_idx: PartIdx, state: State) -> Self {
        Self {
            params: params(),
            part_idx,
            state: Mutex::new(state),
            fail_on_call: None,
            proposals: Mutex::new(Vec::new()),
        }
    }

    /// The `n`th proposal (starting at 1) is rejected by the peer.
    pub fn failing_on(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    pub fn proposals(&self) -> Vec<State> {
        self.proposals.lock().unwrap().clone()
    }
}

impl PaymentChannel for MockChannel {
    fn channel_id(&self) -> Hash {
        self.state.lock().unwrap().channel_id()
    }

    fn params(&self) -> &Params {
        &self.params
    }

    fn part_idx(&self) -> PartIdx {
        self.part_idx
    }

    fn state(&self) -> State {
        self.state.lock().unwrap().clone()
    }

    fn update_by<F>(&self, _timeout: Duration, update: F) -> Result<State, UpdateError>
    where
        F: FnOnce(&mut State) -> Result<(), UpdateError>,
    {
        let mut next = self.state().make_next_state();
        update(&mut next)?;
        let mut proposals = self.proposals.lock().unwrap();
        proposals.push(next.clone());
        if self.fail_on_call == Some(proposals.len()) {
            return Err(UpdateError::Rejected("scripted failure".into()));
        }
        *self.state.lock().unwrap() = next.clone();
        Ok(next)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Accepted,
    Rejected(String),
}

/// Records how it was answered, optionally failing like a broken transport.
#[derive(Debug, Default)]
pub struct MockResponder {
    pub answers: Vec<Answer>,
    pub fail: bool,
}

impl MockResponder {
    pub fn failing() -> Self {
        Self {
            answers: Vec::new(),
            fail: true,
        }
    }
}

impl UpdateResponder for MockResponder {
    fn accept(&mut self, _timeout: Duration) -> Result<(), UpdateError> {
        self.answers.push(Answer::Accepted);
        if self.fail {
            return Err(UpdateError::NoResponse);
        }
        Ok(())
    }

    fn reject(&mut self, _timeout: Duration, reason: &str) -> Result<(), UpdateError> {
        self.answers.push(Answer::Rejected(reason.to_string()));
        if self.fail {
            return Err(UpdateError::NoResponse);
        }
        Ok(())
    }
}
