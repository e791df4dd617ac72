//! Command table of the interactive client.
//!
//! Each command declares its arguments together with a validator. A line is
//! only handed to the command's handler once every argument parsed, so
//! handlers work on typed values.

use crate::{
    console::Console,
    print_line,
    units::{Dot, ParseAmountError},
};
use log::trace;
use std::ops::ControlFlow;
use thiserror::Error;

/// What the commands operate on, implemented by [crate::node::Node].
pub trait Backend: Send + Sync {
    /// `alias` is listed in the network configuration.
    fn is_known_alias(&self, alias: &str) -> bool;
    /// We are connected to the peer called `alias`.
    fn exists_peer(&self, alias: &str) -> bool;

    fn connect(&self, alias: &str) -> anyhow::Result<()>;
    fn open(&self, alias: &str, ours: Dot, theirs: Dot) -> anyhow::Result<()>;
    fn send(&self, alias: &str, amount: Dot) -> anyhow::Result<()>;
    fn close(&self, alias: &str) -> anyhow::Result<()>;
    fn print_config(&self) -> anyhow::Result<()>;
    fn info(&self) -> anyhow::Result<()>;
    /// Sends `amount` whole Dots to `alias` split into `count` payments.
    fn benchmark(&self, alias: &str, amount: u64, count: u64) -> anyhow::Result<()>;
    fn exit(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum ArgError {
    #[error("Invalid integer")]
    InvalidInteger,
    #[error("Value must not be negative")]
    Negative,
    #[error("parsing amount")]
    Amount(#[from] ParseAmountError),
    #[error("Unknown peer, use 'info' to see connected")]
    UnknownPeer,
    #[error("Unknown alias, use 'config' to see available")]
    UnknownAlias,
    #[error("argument {0} has an unexpected type")]
    Mismatch(usize),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Invalid number of arguments, expected {expected} but got {got}")]
    Arity { expected: usize, got: usize },
    #[error("'{name}' argument invalid for '{command}': {value}")]
    InvalidArgument {
        name: &'static str,
        command: &'static str,
        value: String,
        #[source]
        source: ArgError,
    },
    #[error("Unknown command: {0}. Enter \"help\" for a list of commands.")]
    Unknown(String),
}

/// A parsed argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Alias(String),
    Amount(Dot),
    Count(u64),
}

/// Arguments of one invocation, in declaration order.
#[derive(Debug, Default)]
pub struct Args(Vec<ArgValue>);

impl Args {
    pub fn alias(&self, idx: usize) -> Result<&str, ArgError> {
        match self.0.get(idx) {
            Some(ArgValue::Alias(a)) => Ok(a),
            _ => Err(ArgError::Mismatch(idx)),
        }
    }

    pub fn amount(&self, idx: usize) -> Result<Dot, ArgError> {
        match self.0.get(idx) {
            Some(ArgValue::Amount(a)) => Ok(*a),
            _ => Err(ArgError::Mismatch(idx)),
        }
    }

    pub fn count(&self, idx: usize) -> Result<u64, ArgError> {
        match self.0.get(idx) {
            Some(ArgValue::Count(n)) => Ok(*n),
            _ => Err(ArgError::Mismatch(idx)),
        }
    }
}

pub type Validator<B> = fn(&B, &str) -> Result<ArgValue, ArgError>;

pub struct Arg<B> {
    pub name: &'static str,
    pub validator: Validator<B>,
}

/// Everything a handler may use.
pub struct Context<'a, B> {
    pub backend: &'a B,
    pub console: &'a dyn Console,
    pub commands: &'a Commands<B>,
}

pub type Handler<B> = fn(&Context<'_, B>, &Args) -> anyhow::Result<ControlFlow<()>>;

pub struct Command<B> {
    pub name: &'static str,
    pub args: Vec<Arg<B>>,
    pub help: &'static str,
    pub handler: Handler<B>,
}

pub fn val_uint<B>(_: &B, input: &str) -> Result<ArgValue, ArgError> {
    let n: i64 = input.parse().map_err(|_| ArgError::InvalidInteger)?;
    u64::try_from(n)
        .map(ArgValue::Count)
        .map_err(|_| ArgError::Negative)
}

pub fn val_bal<B>(_: &B, input: &str) -> Result<ArgValue, ArgError> {
    Ok(ArgValue::Amount(input.parse()?))
}

pub fn val_peer<B: Backend>(backend: &B, input: &str) -> Result<ArgValue, ArgError> {
    if !backend.exists_peer(input) {
        return Err(ArgError::UnknownPeer);
    }
    Ok(ArgValue::Alias(input.to_string()))
}

pub fn val_alias<B: Backend>(backend: &B, input: &str) -> Result<ArgValue, ArgError> {
    if !backend.is_known_alias(input) {
        return Err(ArgError::UnknownAlias);
    }
    Ok(ArgValue::Alias(input.to_string()))
}

fn arg<B>(name: &'static str, validator: Validator<B>) -> Arg<B> {
    Arg { name, validator }
}

fn done(res: anyhow::Result<()>) -> anyhow::Result<ControlFlow<()>> {
    res.map(ControlFlow::Continue)
}

/// Ordered command table.
pub struct Commands<B> {
    commands: Vec<Command<B>>,
}

impl<B> Commands<B> {
    pub fn new(commands: Vec<Command<B>>) -> Self {
        Self { commands }
    }

    pub fn find(&self, name: &str) -> Option<&Command<B>> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// Parses and runs one line of input. An empty line does nothing.
    ///
    /// Returns [ControlFlow::Break] if the program should end.
    pub fn execute(
        &self,
        backend: &B,
        console: &dyn Console,
        line: &str,
    ) -> anyhow::Result<ControlFlow<()>> {
        let mut words = line.trim().split(' ');
        let name = words.next().unwrap_or_default();
        let raw: Vec<&str> = words.collect();
        trace!("Reading command '{}'", name);

        let cmd = match self.find(name) {
            Some(cmd) => cmd,
            None if name.is_empty() => return Ok(ControlFlow::Continue(())),
            None => return Err(CommandError::Unknown(name.to_string()).into()),
        };
        if raw.len() != cmd.args.len() {
            return Err(CommandError::Arity {
                expected: cmd.args.len(),
                got: raw.len(),
            }
            .into());
        }

        let mut args = Args::default();
        for (arg, value) in cmd.args.iter().zip(raw) {
            let parsed =
                (arg.validator)(backend, value).map_err(|source| CommandError::InvalidArgument {
                    name: arg.name,
                    command: cmd.name,
                    value: value.to_string(),
                    source,
                })?;
            args.0.push(parsed);
        }

        let ctx = Context {
            backend,
            console,
            commands: self,
        };
        (cmd.handler)(&ctx, &args)
    }

    /// Lists every command with its arguments and help text.
    pub fn print_help(&self, console: &dyn Console) {
        for cmd in &self.commands {
            let args: String = cmd.args.iter().map(|a| format!(" <{}>", a.name)).collect();
            print_line!(
                console,
                "{}{}\n\t{}\n",
                cmd.name,
                args,
                cmd.help.replace('\n', "\n\t")
            );
        }
    }
}

impl<B: Backend> Commands<B> {
    /// The commands of the demo client.
    pub fn demo() -> Self {
        Self::new(vec![
            Command {
                name: "connect",
                args: vec![arg("Peer", val_alias)],
                help: "Connect to a peer by their alias. The connection allows payment channels to be opened with the given peer.\nExample: connect bob",
                handler: |ctx, args| done(ctx.backend.connect(args.alias(0)?)),
            },
            Command {
                name: "open",
                args: vec![
                    arg("Peer", val_peer),
                    arg("Our Balance", val_bal),
                    arg("Their Balance", val_bal),
                ],
                help: "Open a payment channel with the given peer and balances. The first value is the own balance and the second value is the peers balance. It is only possible to open one channel per peer.\nExample: open alice 10 10",
                handler: |ctx, args| {
                    done(ctx.backend.open(args.alias(0)?, args.amount(1)?, args.amount(2)?))
                },
            },
            Command {
                name: "send",
                args: vec![arg("Peer", val_peer), arg("Amount", val_bal)],
                help: "Send a payment with amount to a given peer over the established channel.\nExample: send alice 5",
                handler: |ctx, args| done(ctx.backend.send(args.alias(0)?, args.amount(1)?)),
            },
            Command {
                name: "close",
                args: vec![arg("Peer", val_peer)],
                help: "Close the channel with the given peer. This settles the latest state.\nExample: close alice",
                handler: |ctx, args| done(ctx.backend.close(args.alias(0)?)),
            },
            Command {
                name: "config",
                args: vec![],
                help: "Print the current configuration and known peers.",
                handler: |ctx, _| done(ctx.backend.print_config()),
            },
            Command {
                name: "info",
                args: vec![],
                help: "Print information about funds, peers, and channels.",
                handler: |ctx, _| done(ctx.backend.info()),
            },
            Command {
                name: "benchmark",
                args: vec![
                    arg("Peer", val_peer),
                    arg("amount", val_uint),
                    arg("txCount", val_uint),
                ],
                help: "Performs a benchmark with the given peer by sending amount Dot in txCount micro transactions. Must have an open channel with the peer.",
                handler: |ctx, args| {
                    done(ctx.backend.benchmark(args.alias(0)?, args.count(1)?, args.count(2)?))
                },
            },
            Command {
                name: "help",
                args: vec![],
                help: "Prints all possible commands.",
                handler: |ctx, _| {
                    ctx.commands.print_help(ctx.console);
                    Ok(ControlFlow::Continue(()))
                },
            },
            Command {
                name: "exit",
                args: vec![],
                help: "Exits the program.",
                handler: |ctx, _| {
                    if let Err(e) = ctx.backend.exit() {
                        log::error!("err while exiting: {:#}", e);
                    }
                    Ok(ControlFlow::Break(()))
                },
            },
        ])
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::console::Recorder;
    use std::sync::Mutex;

    /// Backend that records the calls it receives.
    #[derive(Default)]
    pub struct FakeBackend {
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeBackend {
        fn record(&self, call: String) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(call);
            Ok(())
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Backend for FakeBackend {
        fn is_known_alias(&self, alias: &str) -> bool {
            alias == "bob" || alias == "carol"
        }
        fn exists_peer(&self, alias: &str) -> bool {
            alias == "bob"
        }
        fn connect(&self, alias: &str) -> anyhow::Result<()> {
            self.record(format!("connect {}", alias))
        }
        fn open(&self, alias: &str, ours: Dot, theirs: Dot) -> anyhow::Result<()> {
            self.record(format!("open {} {} {}", alias, ours, theirs))
        }
        fn send(&self, alias: &str, amount: Dot) -> anyhow::Result<()> {
            self.record(format!("send {} {}", alias, amount))
        }
        fn close(&self, alias: &str) -> anyhow::Result<()> {
            self.record(format!("close {}", alias))
        }
        fn print_config(&self) -> anyhow::Result<()> {
            self.record("config".into())
        }
        fn info(&self) -> anyhow::Result<()> {
            anyhow::bail!("no info")
        }
        fn benchmark(&self, alias: &str, amount: u64, count: u64) -> anyhow::Result<()> {
            self.record(format!("benchmark {} {} {}", alias, amount, count))
        }
        fn exit(&self) -> anyhow::Result<()> {
            self.record("exit".into())
        }
    }

    fn run(line: &str) -> (anyhow::Result<ControlFlow<()>>, FakeBackend) {
        let backend = FakeBackend::default();
        let res = Commands::demo().execute(&backend, &Recorder::new(), line);
        (res, backend)
    }

    #[test]
    fn uint_validator() {
        let b = FakeBackend::default();
        assert!(matches!(val_uint(&b, "-1"), Err(ArgError::Negative)));
        assert_eq!(val_uint(&b, "0").unwrap(), ArgValue::Count(0));
        assert_eq!(val_uint(&b, "42").unwrap(), ArgValue::Count(42));
        assert!(matches!(val_uint(&b, "4.2"), Err(ArgError::InvalidInteger)));
        assert!(matches!(val_uint(&b, "x"), Err(ArgError::InvalidInteger)));
    }

    #[test]
    fn balance_validator() {
        let b = FakeBackend::default();
        assert!(matches!(val_bal(&b, "abc"), Err(ArgError::Amount(_))));
        assert_eq!(
            val_bal(&b, "1.5").unwrap(),
            ArgValue::Amount("1.5".parse().unwrap())
        );
    }

    #[test]
    fn peer_and_alias_validators() {
        let b = FakeBackend::default();
        assert!(val_peer(&b, "bob").is_ok());
        assert!(matches!(val_peer(&b, "carol"), Err(ArgError::UnknownPeer)));
        assert!(val_alias(&b, "carol").is_ok());
        assert!(matches!(val_alias(&b, "dave"), Err(ArgError::UnknownAlias)));
    }

    #[test]
    fn dispatches_with_typed_args() {
        let (res, b) = run("  send bob 2.5 \n");
        assert_eq!(res.unwrap(), ControlFlow::Continue(()));
        assert_eq!(b.calls(), vec!["send bob 2.5 DOT"]);

        let (res, b) = run("benchmark bob 10 100");
        assert!(res.is_ok());
        assert_eq!(b.calls(), vec!["benchmark bob 10 100"]);
    }

    #[test]
    fn arity_mismatch_skips_handler() {
        let (res, b) = run("send bob");
        assert_eq!(
            res.unwrap_err().to_string(),
            "Invalid number of arguments, expected 2 but got 1"
        );
        assert!(b.calls().is_empty());
    }

    #[test]
    fn invalid_argument_skips_handler() {
        let (res, b) = run("send bob abc");
        assert_eq!(
            format!("{:#}", res.unwrap_err()),
            "'Amount' argument invalid for 'send': abc: parsing amount: invalid character 'a' in amount"
        );
        assert!(b.calls().is_empty());

        let (res, b) = run("benchmark bob 10 -1");
        assert!(res.is_err());
        assert!(b.calls().is_empty());
    }

    #[test]
    fn unknown_and_empty_commands() {
        let (res, _) = run("Send bob 1");
        assert_eq!(
            res.unwrap_err().to_string(),
            "Unknown command: Send. Enter \"help\" for a list of commands."
        );
        let (res, b) = run("   ");
        assert_eq!(res.unwrap(), ControlFlow::Continue(()));
        assert!(b.calls().is_empty());
    }

    #[test]
    fn handler_errors_are_returned() {
        let (res, _) = run("info");
        assert_eq!(res.unwrap_err().to_string(), "no info");
    }

    #[test]
    fn exit_breaks() {
        let (res, b) = run("exit");
        assert_eq!(res.unwrap(), ControlFlow::Break(()));
        assert_eq!(b.calls(), vec!["exit"]);
    }

    #[test]
    fn help_lists_commands_in_order() {
        let console = Recorder::new();
        Commands::<FakeBackend>::demo().print_help(&console);
        let lines = console.lines();
        assert_eq!(lines.len(), 9);
        assert!(lines[0].starts_with("connect <Peer>\n\tConnect to a peer"));
        assert!(lines[0].contains("\n\tExample: connect bob"));
        assert!(lines[1].starts_with("open <Peer> <Our Balance> <Their Balance>\n"));
        assert!(lines[8].starts_with("exit\n"));
    }
}
