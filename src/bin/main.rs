use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{stdin, stdout};
use tokio_util::sync::CancellationToken;

use nakadachi::bridge::{AckResponder, CorrelationBridge, MatchPolicy, PendingTable, ReplyMatcher};
use nakadachi::config::{BridgeSettings, load_settings};
use nakadachi::logging;
use nakadachi::server::QueryServer;
use nakadachi::transport::{PeerAddress, PeerCommand, ProcessTransport, spawn_inbound_dispatcher};

/// Forward synchronous queries to asynchronous chat peers and wait for their replies
#[derive(Parser)]
#[command(name = "nakadachi")]
#[command(version)]
#[command(
    about = "Forward synchronous queries to asynchronous chat peers and wait for their replies"
)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/nakadachi/nakadachi.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Seconds to wait for a reply
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// How to match replies without a reply reference: strict or sender-scoped
    #[arg(long, global = true)]
    match_policy: Option<MatchPolicy>,

    /// Peer definition NAME=COMMAND, repeatable (COMMAND is split on whitespace)
    #[arg(long = "peer", value_name = "NAME=COMMAND", global = true, value_parser = parse_peer)]
    peers: Vec<(PeerAddress, PeerCommand)>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON-RPC queries on stdin/stdout (default)
    Serve,
    /// Forward one query and print the result as JSON
    Query {
        /// Peer address to send the query to
        target: String,
        /// Query text
        text: String,
        /// Request id echoed back in the result
        #[arg(long, default_value = "cli")]
        request_id: String,
    },
}

fn parse_peer(arg: &str) -> Result<(PeerAddress, PeerCommand), String> {
    let (name, command) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=COMMAND, got {:?}", arg))?;
    let command = PeerCommand::new(command.split_whitespace());
    if name.is_empty() || command.program().is_empty() {
        return Err(format!("expected NAME=COMMAND, got {:?}", arg));
    }
    Ok((PeerAddress::from(name), command))
}

fn settings(cli: &Cli) -> Result<BridgeSettings, String> {
    let mut settings = load_settings(cli.config.as_deref()).map_err(|e| e.to_string())?;
    if let Some(timeout_secs) = cli.timeout_secs {
        settings.timeout_secs = timeout_secs;
    }
    if let Some(policy) = cli.match_policy {
        settings.match_policy = policy;
    }
    settings.peers.extend(cli.peers.iter().cloned());
    settings.validate().map_err(|e| e.to_string())?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(settings.log_level.as_deref());

    let (transport, inbound_rx) = ProcessTransport::new(settings.peers.clone());
    let transport = Arc::new(transport);
    let table = Arc::new(PendingTable::new());
    let bridge = Arc::new(
        CorrelationBridge::new(Arc::clone(&table), transport.clone())
            .with_default_timeout(settings.timeout()),
    );
    let matcher = ReplyMatcher::new(
        table,
        AckResponder::new(transport.clone()),
        settings.match_policy,
    );
    let _dispatcher = spawn_inbound_dispatcher(inbound_rx, Arc::new(matcher));

    log::info!(
        target: "nakadachi",
        "Bridge ready: peers {:?}, timeout {}s, {:?} matching",
        transport.configured_peers(),
        settings.timeout_secs,
        settings.match_policy
    );

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let server = QueryServer::new(bridge);
            let code = match server
                .serve(stdin(), stdout(), CancellationToken::new())
                .await
            {
                Ok(()) => 0,
                Err(e) => {
                    log::error!(target: "nakadachi", "Listener stopped: {}", e);
                    1
                }
            };
            // The blocking stdin reader cannot be cancelled, so dropping the
            // runtime could hang after `exit`. Peers see EOF on their stdin.
            std::process::exit(code);
        }
        Commands::Query {
            target,
            text,
            request_id,
        } => {
            let result = bridge
                .forward(
                    &PeerAddress::from(target),
                    &text,
                    &request_id,
                    bridge.default_timeout(),
                )
                .await;
            match serde_json::to_string(&result) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
            if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
