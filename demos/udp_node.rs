//! Runs a single sender or receiver endpoint on a UDP socket.
//!
//! ```text
//! cargo run --example udp_node -- receiver 2 127.0.0.1:9802 --peer 127.0.0.1:9801
//! cargo run --example udp_node -- sender 1 127.0.0.1:9801 --peer 127.0.0.1:9802
//! ```
//!
//! The sender reads lines of the form `<destination id> <message>` from stdin.

use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::anyhow;
use bytes::Bytes;
use clap::Parser;
use clap_derive::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, Level};
use sliding_window_arq::config::ArqConfig;
use sliding_window_arq::end_point::{spawn_receiver, spawn_sender};
use sliding_window_arq::frame::EndpointId;
use sliding_window_arq::transport::{udp_receive_loop, FrameSink, UdpTransport};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Role {
    Sender,
    Receiver,
}

#[derive(Parser)]
struct Args {
    #[clap(value_enum)]
    role: Role,
    id: u16,
    bind_address: String,

    #[clap(long)]
    peer: Vec<String>,

    #[clap(long, default_value_t = 8)]
    window_size: u16,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.peer.is_empty() {
        return Err(anyhow!("missing peers"));
    }

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let mut peers = Vec::new();
    for p in args.peer {
        let peer: SocketAddr = p.parse()?;
        peers.push(peer);
    }

    let config = ArqConfig {
        max_seq: args.window_size.saturating_mul(4),
        send_window_size: args.window_size,
        receive_window_size: args.window_size,
        ..ArqConfig::default()
    };
    let frame_len = config.codec().frame_len();

    let transport = Arc::new(UdpTransport::bind(args.bind_address, peers).await?);
    let socket = transport.socket();
    let id = EndpointId(args.id);

    match args.role {
        Role::Receiver => {
            let (delivery, mut deliveries) = mpsc::unbounded_channel();
            let (handle, _join_handle) = spawn_receiver(id, config, transport, Box::new(delivery))?;
            tokio::spawn(udp_receive_loop(socket, frame_len, Arc::new(handle) as Arc<dyn FrameSink>));

            // the engine prints every delivered payload as `<RECV_id>: [...]`
            while deliveries.recv().await.is_some() {}
        }
        Role::Sender => {
            let (handle, _join_handle) = spawn_sender(id, config, transport)?;
            tokio::spawn(udp_receive_loop(socket, frame_len, Arc::new(handle.clone()) as Arc<dyn FrameSink>));

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let Some((dst, message)) = line.split_once(' ') else {
                    error!("expected '<destination id> <message>'");
                    continue;
                };
                let dst = match dst.parse() {
                    Ok(dst) => EndpointId(dst),
                    Err(e) => {
                        error!("invalid destination id {:?}: {}", dst, e);
                        continue;
                    }
                };

                if let Err(e) = handle.submit(dst, Bytes::copy_from_slice(message.as_bytes())) {
                    error!("message not sent: {}", e);
                }
            }
            info!("end of input");
        }
    }

    Ok(())
}
