//! User facing output.
//!
//! Everything the user is meant to read goes through a [Console], logging is
//! separate and may be redirected to a file.

use log::info;
use std::{
    fmt,
    io::{self, Write},
    sync::{Mutex, PoisonError},
};

/// Marker printed in front of errors.
pub const WARNING: &str = "\x1b[0;33m⚡\x1b[0m";

/// The prompt shown while waiting for input.
pub const PROMPT: &str = "> ";

pub trait Console: Send + Sync {
    /// Prints a line as part of the current command's output.
    fn print(&self, args: fmt::Arguments<'_>);

    /// Prints a line for an event that happened outside the command/response
    /// cycle, e.g. an incoming payment.
    ///
    /// Overwrites the prompt that is currently shown and re-displays it
    /// afterwards. Safe to call while another thread waits for input.
    fn print_async(&self, args: fmt::Arguments<'_>);

    /// Like [Console::print_async] for a question, the answer is typed on the
    /// same line.
    fn print_question(&self, args: fmt::Arguments<'_>) {
        self.print_async(args)
    }
}

/// Formats its arguments and prints them on a [Console] as event.
#[macro_export]
macro_rules! print_async {
    ($console:expr, $($arg:tt)*) => {
        $crate::console::Console::print_async(&*$console, format_args!($($arg)*))
    };
}

/// Formats its arguments and prints them on a [Console].
#[macro_export]
macro_rules! print_line {
    ($console:expr, $($arg:tt)*) => {
        $crate::console::Console::print(&*$console, format_args!($($arg)*))
    };
}

/// Prints to stdout.
#[derive(Debug, Default)]
pub struct Stdout {
    // Keeps lines from different threads from interleaving.
    out: Mutex<()>,
}

impl Stdout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shows the input prompt without a line break.
    pub fn prompt(&self) {
        self.write(format_args!("{}", PROMPT));
    }

    fn write(&self, s: fmt::Arguments<'_>) {
        let _guard = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = io::stdout().lock();
        // Nothing sensible can be done if stdout is gone.
        let _ = out.write_fmt(s);
        let _ = out.flush();
    }
}

impl Console for Stdout {
    fn print(&self, args: fmt::Arguments<'_>) {
        self.write(format_args!("{}\n", args));
    }

    fn print_async(&self, args: fmt::Arguments<'_>) {
        self.write(format_args!("{}", event_text(args)));
    }

    fn print_question(&self, args: fmt::Arguments<'_>) {
        self.write(format_args!("{}", question_text(args)));
    }
}

/// Replaces the shown prompt by `msg` and shows the prompt again below.
fn event_text(msg: fmt::Arguments<'_>) -> String {
    format!("\r{}\n{}", msg, PROMPT)
}

fn question_text(msg: fmt::Arguments<'_>) -> String {
    format!("\r{}{}", msg, PROMPT)
}

/// Sends everything to the log, for nodes nobody watches.
#[derive(Debug)]
pub struct Logged {
    name: String,
}

impl Logged {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Console for Logged {
    fn print(&self, args: fmt::Arguments<'_>) {
        info!("[{}] {}", self.name, args);
    }

    fn print_async(&self, args: fmt::Arguments<'_>) {
        info!("[{}] {}", self.name, args);
    }
}

/// Stores everything printed, used in tests.
#[derive(Debug, Default)]
pub struct Recorder {
    lines: Mutex<Vec<String>>,
    events: Mutex<Vec<String>>,
    questions: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines printed with [Console::print].
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Lines printed with [Console::print_async].
    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Lines printed with [Console::print_question].
    pub fn questions(&self) -> Vec<String> {
        self.questions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Console for Recorder {
    fn print(&self, args: fmt::Arguments<'_>) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(args.to_string());
    }

    fn print_async(&self, args: fmt::Arguments<'_>) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(args.to_string());
    }

    fn print_question(&self, args: fmt::Arguments<'_>) {
        self.questions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(args.to_string());
    }
}
