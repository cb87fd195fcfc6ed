//! URB Node - one process of a broadcast run
//!
//! Reads the hosts file and run config, starts the selected layer over UDP,
//! sends its messages, then waits for SIGINT/SIGTERM and writes the event log.

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use urb::{
    BestEffortBroadcast, Broadcast, BroadcastConfig, FifoBroadcast, Message, PerfectLink,
    ProcessId, Transport, UdpTransport, UniformBroadcast,
};
use urb_cli::{display_link_stats, signal, EventLog, Hosts, RunConfig, Tuning};

/// Poll period of the shutdown flag
const WAIT_POLL: Duration = Duration::from_millis(100);

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Point-to-point perfect link
    Link,
    /// Best-effort broadcast
    Beb,
    /// Uniform reliable broadcast
    Urb,
    /// FIFO uniform reliable broadcast
    Fifo,
}

#[derive(Parser, Debug)]
#[command(name = "urb-node")]
#[command(about = "Reliable link and uniform broadcast node", long_about = None)]
struct Args {
    /// Id of this process in the hosts file
    #[arg(long)]
    id: ProcessId,

    /// Hosts file, one `<id> <host> <port>` per line
    #[arg(long)]
    hosts: PathBuf,

    /// Event log output file
    #[arg(long)]
    output: PathBuf,

    /// Layer to run (default: link for `<m> <receiver>` configs, fifo otherwise)
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// TOML file overriding link and broadcast defaults
    #[arg(long)]
    tuning: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Run config file
    config: PathBuf,
}

/// The running layer
enum Node {
    Link {
        link: PerfectLink,
        receiver: ProcessId,
    },
    Beb(BestEffortBroadcast),
    Urb(UniformBroadcast),
    Fifo(FifoBroadcast),
}

impl Node {
    fn link(&self) -> &PerfectLink {
        match self {
            Node::Link { link, .. } => link,
            Node::Beb(beb) => beb.link(),
            Node::Urb(urb) => urb.link(),
            Node::Fifo(fifo) => fifo.link(),
        }
    }

    fn broadcaster(&self) -> Option<&dyn Broadcast> {
        match self {
            Node::Link { .. } => None,
            Node::Beb(beb) => Some(beb),
            Node::Urb(urb) => Some(urb),
            Node::Fifo(fifo) => Some(fifo),
        }
    }

    fn close(&self) -> anyhow::Result<()> {
        match self.broadcaster() {
            Some(broadcast) => broadcast.close()?,
            None => self.link().close()?,
        }
        Ok(())
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Sequence number carried by a delivered payload, falling back to its id
fn sequence_of(message: &Message) -> u32 {
    std::str::from_utf8(&message.payload)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(message.id)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    signal::install();

    let hosts = Hosts::from_file(&args.hosts)
        .with_context(|| format!("reading hosts file {}", args.hosts.display()))?;
    let run = RunConfig::from_file(&args.config)
        .with_context(|| format!("reading run config {}", args.config.display()))?;

    let tuning = match &args.tuning {
        Some(path) => Tuning::from_file(path)
            .with_context(|| format!("reading tuning file {}", path.display()))?,
        None => Tuning::default(),
    };
    let mut config = BroadcastConfig::default();
    tuning.apply(&mut config);

    let membership = hosts.membership(args.id)?;
    let Some(local_addr) = hosts.addr(args.id) else {
        anyhow::bail!("process {} missing from hosts file", args.id);
    };

    let mode = match (args.mode, run) {
        (Some(mode), _) => mode,
        (None, RunConfig::Link { .. }) => Mode::Link,
        (None, RunConfig::Broadcast { .. }) => Mode::Fifo,
    };

    tracing::info!(
        "Process {} starting on {} ({:?}, {} processes)",
        args.id,
        local_addr,
        mode,
        hosts.len()
    );

    let udp = UdpTransport::bind(local_addr, hosts.peers())?;
    tuning.apply_socket(&udp)?;
    let transport: Arc<dyn Transport> = Arc::new(udp);
    let log = Arc::new(EventLog::new());

    let deliveries = log.clone();
    let on_deliver = move |message: Message| {
        deliveries.log_delivery(message.source, sequence_of(&message));
    };

    let node = match mode {
        Mode::Link => {
            let RunConfig::Link { receiver, .. } = run else {
                anyhow::bail!("link mode needs a `<messages> <receiver id>` run config");
            };
            if !membership.contains(receiver) {
                anyhow::bail!("receiver {} missing from hosts file", receiver);
            }
            let link = PerfectLink::start(membership, transport, config.link, on_deliver)?;
            Node::Link { link, receiver }
        }
        Mode::Beb => Node::Beb(BestEffortBroadcast::start(
            membership,
            transport,
            config.link,
            on_deliver,
        )?),
        Mode::Urb => Node::Urb(UniformBroadcast::start(
            membership, transport, config, on_deliver,
        )?),
        Mode::Fifo => Node::Fifo(FifoBroadcast::start(
            membership, transport, config, on_deliver,
        )?),
    };

    let start_time = Instant::now();
    let messages = run.messages();
    let sent: anyhow::Result<u32> = if let Some(broadcast) = node.broadcaster() {
        tracing::info!("Broadcasting {} messages ({:?})", messages, mode);
        log.send_logged(messages, signal::requested, |seq| {
            broadcast.broadcast(Bytes::from(seq.to_string()))
        })
        .map_err(Into::into)
    } else if let Node::Link { link, receiver } = &node {
        if *receiver == args.id {
            tracing::info!("Receiving only");
            Ok(0)
        } else {
            tracing::info!("Sending {} messages to process {}", messages, receiver);
            log.send_logged(messages, signal::requested, |seq| {
                link.send(Bytes::from(seq.to_string()), *receiver).map(drop)
            })
            .map_err(Into::into)
        }
    } else {
        Ok(0)
    };

    match &sent {
        Ok(count) => {
            tracing::info!("{} messages handed off, waiting for shutdown signal", count);
            while !signal::requested() && !node.link().is_failed() {
                thread::sleep(WAIT_POLL);
            }
        }
        Err(e) => tracing::error!("Sending stopped: {:#}", e),
    }

    tracing::info!("Shutting down");
    tracing::info!(
        "{}",
        display_link_stats(&node.link().stats(), start_time.elapsed())
    );
    let closed = node.close();

    log.write_to_file(&args.output)
        .with_context(|| format!("writing output {}", args.output.display()))?;
    tracing::info!("Event log written to {}", args.output.display());

    sent?;
    closed
}
