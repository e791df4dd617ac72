use anyhow::Context;
use clap::{Parser, Subcommand};
use log::error;
use perun_demo::{
    command::{Backend, Commands},
    config::{Config, NodeConfig, Peer},
    console::{Console, Logged, Stdout},
    logging,
    net::LocalNetwork,
    node::{Node, ProposalPolicy},
    router::{InputRouter, PromptSlot},
};
use std::{io, ops::ControlFlow, path::PathBuf, sync::Arc};

#[derive(Parser)]
#[command(name = "perun-demo")]
#[command(about = "Interactive client for two-party payment channels", long_about = None)]
struct Cli {
    /// One of trace, debug, info, warn, error, off
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the interactive demo node.
    /// The peers from the network file run in-process and accept every channel.
    Demo {
        /// General configuration
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,

        /// Known peers
        #[arg(long, default_value = "network.toml")]
        network: PathBuf,

        /// Restore channels from the persistence path on startup
        #[arg(long)]
        persistence: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_file.as_deref())?;

    match cli.command {
        Cmd::Demo {
            config,
            network,
            persistence,
        } => {
            let mut cfg = Config::load(&config, &network).context("loading configuration")?;
            cfg.node.persistence_enabled |= persistence;
            demo(cfg)
        }
    }
}

/// Configuration of the in-process node playing `alias`.
fn peer_config(own: &Config, alias: &str, peer: &Peer) -> Config {
    let mut peers = own.peers.clone();
    peers.entry(own.alias.clone()).or_insert_with(|| Peer {
        perun_id: own.perun_id,
        hostname: own.node.ip.clone(),
        port: own.node.port,
    });
    Config {
        alias: alias.to_string(),
        perun_id: peer.perun_id,
        channel: own.channel.clone(),
        node: NodeConfig {
            ip: peer.hostname.clone(),
            port: peer.port,
            persistence_enabled: false,
            ..own.node.clone()
        },
        peers,
    }
}

fn demo(cfg: Config) -> anyhow::Result<()> {
    let net = LocalNetwork::new();
    let headless = cfg
        .remote_peers()
        .map(|(alias, peer)| {
            Node::start(
                peer_config(&cfg, alias, peer),
                net.endpoint(),
                Arc::new(Logged::new(alias.as_str())),
                ProposalPolicy::AutoAccept,
            )
            .with_context(|| format!("starting peer {}", alias))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let stdout = Arc::new(Stdout::new());
    let console: Arc<dyn Console> = stdout.clone();
    let slot = Arc::new(PromptSlot::new(console.clone()));
    let node = Node::start(
        cfg,
        net.endpoint(),
        console.clone(),
        ProposalPolicy::Prompt(slot.clone()),
    )?;
    node.print_config()?;

    let router = InputRouter::new(slot, Commands::demo(), node.clone(), console);
    let mut line = String::new();
    loop {
        stdout.prompt();
        line.clear();
        if io::stdin().read_line(&mut line).context("reading input")? == 0 {
            if let Err(e) = node.exit() {
                error!("err while exiting: {:#}", e);
            }
            break;
        }
        if let ControlFlow::Break(()) = router.route(line.trim_end_matches(&['\r', '\n'][..])) {
            break;
        }
    }

    for peer in headless {
        if let Err(e) = peer.exit() {
            error!("stopping {}: {:#}", peer.config().alias, e);
        }
    }
    Ok(())
}
