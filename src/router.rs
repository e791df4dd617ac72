//! Decides for every input line whether it answers a pending prompt or is a
//! command.

use crate::{
    command::Commands,
    console::{Console, WARNING},
    print_line,
};
use std::{
    ops::ControlFlow,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
};

/// Receives the answer to a prompt. Returns the line if the prompt no longer
/// wants it, the line is then run as command.
type Continuation = Box<dyn FnOnce(String) -> Option<String> + Send>;

/// Holds at most one continuation waiting for the next input line.
pub struct PromptSlot {
    console: Arc<dyn Console>,
    pending: Mutex<Option<Continuation>>,
    freed: Condvar,
}

impl PromptSlot {
    pub fn new(console: Arc<dyn Console>) -> Self {
        Self {
            console,
            pending: Mutex::new(None),
            freed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Continuation>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shows `message` and passes the next input line to `continuation`.
    ///
    /// Blocks while another prompt is pending, there is no queue. The message
    /// is only shown once this prompt owns the slot.
    pub fn register<F>(&self, message: &str, continuation: F)
    where
        F: FnOnce(String) -> Option<String> + Send + 'static,
    {
        let mut pending = self
            .freed
            .wait_while(self.lock(), |p| p.is_some())
            .unwrap_or_else(PoisonError::into_inner);
        self.console.print_question(format_args!("{}", message));
        *pending = Some(Box::new(continuation));
    }

    /// Removes the pending continuation, if any.
    pub fn take(&self) -> Option<Continuation> {
        let taken = self.lock().take();
        if taken.is_some() {
            self.freed.notify_one();
        }
        taken
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }
}

/// Consumer of all user input.
pub struct InputRouter<B> {
    slot: Arc<PromptSlot>,
    commands: Commands<B>,
    backend: Arc<B>,
    console: Arc<dyn Console>,
}

impl<B> InputRouter<B> {
    pub fn new(
        slot: Arc<PromptSlot>,
        commands: Commands<B>,
        backend: Arc<B>,
        console: Arc<dyn Console>,
    ) -> Self {
        Self {
            slot,
            commands,
            backend,
            console,
        }
    }

    pub fn slot(&self) -> &Arc<PromptSlot> {
        &self.slot
    }

    /// Feeds one line to the pending prompt or runs it as command.
    ///
    /// Command errors are printed, never returned. Breaks if the input loop
    /// should end.
    pub fn route(&self, line: &str) -> ControlFlow<()> {
        let returned = match self.slot.take() {
            Some(continuation) => match continuation(line.to_string()) {
                Some(line) => line,
                None => return ControlFlow::Continue(()),
            },
            None => line.to_string(),
        };

        match self.commands.execute(&*self.backend, &*self.console, &returned) {
            Ok(flow) => flow,
            Err(e) => {
                print_line!(self.console, "{} {:#}", WARNING, e);
                ControlFlow::Continue(())
            }
        }
    }
}
