pub mod bench;
pub mod channel;
pub mod command;
pub mod config;
pub mod console;
pub mod logging;
pub mod net;
pub mod node;
pub mod router;
pub mod session;
pub mod types;
pub mod units;

#[cfg(test)]
mod testutil;

pub use types::{Address, Hash, U256};
