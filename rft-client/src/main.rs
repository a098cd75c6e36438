//! Client binary: negotiates a transfer over the control channel, then drives
//! the matching sender/receiver state machine from `rft-core` over the
//! ephemeral data port the server hands back.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::UdpSocket;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rft_core::control::{CcMode, Request, Response};
use rft_core::digest::{file_md5_hex, verify};
use rft_core::framing::Packet;
use rft_core::receiver::{run_gbn_receiver, run_sr_receiver};
use rft_core::sender::{chunk_bytes, run_gbn_sender, run_sr_sender, ArqMode};
use rft_core::transport::{Transport, UdpTransport};

const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Server hostname or IP
    #[arg(short, long)]
    server: String,

    /// Server control port
    #[arg(short = 'p', long, default_value_t = 9000)]
    control_port: u16,

    /// ARQ scheme
    #[arg(long, value_enum, default_value_t = ArqMode::Gbn)]
    arq: ArqMode,

    /// Congestion control scheme
    #[arg(long, value_enum, default_value_t = CcMode::Reno)]
    cc: CcMode,

    /// Payload bytes per packet
    #[arg(long, default_value_t = rft_core::control::DEFAULT_PKT_SIZE)]
    pkt_size: usize,

    /// Maximum sliding window size
    #[arg(long, default_value_t = rft_core::control::DEFAULT_MAX_WIN)]
    max_win: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a local file to the server
    Upload { local_path: PathBuf, remote_name: String },
    /// Fetch a file from the server
    Download { remote_name: String, local_path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let server_control: SocketAddr = format!("{}:{}", args.server, args.control_port)
        .parse()
        .or_else(|_| resolve_host(&args.server, args.control_port))
        .with_context(|| format!("resolving server address {}:{}", args.server, args.control_port))?;

    let control = UdpSocket::bind("0.0.0.0:0").await.context("binding control socket")?;

    match args.command {
        Command::Upload { local_path, remote_name } => {
            upload(&control, server_control, &args, &local_path, &remote_name).await
        }
        Command::Download { remote_name, local_path } => {
            download(&control, server_control, &args, &remote_name, &local_path).await
        }
    }
}

fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use std::net::ToSocketAddrs;
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses found"))
}

async fn negotiate(control: &UdpSocket, server_control: SocketAddr, req: &Request) -> Result<u16> {
    let json = serde_json::to_vec(req)?;
    control.send_to(&json, server_control).await?;

    let mut buf = vec![0u8; 4096];
    let (n, _) = tokio::time::timeout(CONTROL_TIMEOUT, control.recv_from(&mut buf))
        .await
        .context("timed out waiting for server's response")??;
    let resp: Response = serde_json::from_slice(&buf[..n])?;
    match resp {
        Response::Ok { data_port } => Ok(data_port),
        Response::Error { why } => bail!("server rejected request: {why}"),
        Response::Done { .. } => bail!("unexpected done response before transfer started"),
    }
}

async fn await_done(control: &UdpSocket) -> Result<String> {
    let mut buf = vec![0u8; 4096];
    let (n, _) = tokio::time::timeout(CONTROL_TIMEOUT, control.recv_from(&mut buf))
        .await
        .context("timed out waiting for the server's final digest")??;
    match serde_json::from_slice(&buf[..n])? {
        Response::Done { md5 } => Ok(md5),
        Response::Error { why } => bail!("server reported an error: {why}"),
        Response::Ok { .. } => bail!("unexpected ok response after transfer finished"),
    }
}

async fn upload(
    control: &UdpSocket,
    server_control: SocketAddr,
    args: &Args,
    local_path: &PathBuf,
    remote_name: &str,
) -> Result<()> {
    let req = Request {
        cmd: format!("upload {remote_name}"),
        arq: args.arq,
        cc: args.cc,
        remote_name: remote_name.to_string(),
        pkt_size: args.pkt_size,
        max_win: args.max_win,
    };
    let data_port = negotiate(control, server_control, &req).await?;

    let data = tokio::fs::read(local_path)
        .await
        .with_context(|| format!("reading {}", local_path.display()))?;
    let local_md5 = file_md5_hex(local_path)?;
    let chunks = chunk_bytes(&data, args.pkt_size);

    let data_socket = UdpSocket::bind("0.0.0.0:0").await?;
    let server_data_addr = SocketAddr::new(server_control.ip(), data_port);
    let transport = UdpTransport::with_peer(data_socket, server_data_addr);
    let cc = args.cc.build();

    let stats = match args.arq {
        ArqMode::Gbn => run_gbn_sender(&transport, chunks, cc, args.max_win).await?,
        ArqMode::Sr => run_sr_sender(&transport, chunks, cc, args.max_win).await?,
    };
    info!(
        goodput_mbps = stats.goodput_mbps(),
        utilization = stats.utilization(),
        "upload data transfer complete"
    );

    let server_md5 = await_done(control).await?;
    info!(%local_md5, %server_md5, "comparing digests");
    if verify(&local_md5, &server_md5).is_err() {
        eprintln!("upload failed: local md5 {local_md5} != server md5 {server_md5}");
        std::process::exit(1);
    }
    println!("upload complete: {remote_name}");
    Ok(())
}

async fn download(
    control: &UdpSocket,
    server_control: SocketAddr,
    args: &Args,
    remote_name: &str,
    local_path: &PathBuf,
) -> Result<()> {
    let req = Request {
        cmd: format!("download {remote_name}"),
        arq: args.arq,
        cc: args.cc,
        remote_name: remote_name.to_string(),
        pkt_size: args.pkt_size,
        max_win: args.max_win,
    };
    let data_port = negotiate(control, server_control, &req).await?;

    let data_socket = UdpSocket::bind("0.0.0.0:0").await?;
    let server_data_addr = SocketAddr::new(server_control.ip(), data_port);
    let transport = UdpTransport::with_peer(data_socket, server_data_addr);

    // The server doesn't learn our ephemeral data port from the control
    // handshake, so we announce ourselves before it starts sending.
    let hello = Packet::ack(0, 0.0);
    transport.send(&hello.encode()).await?;

    let mut out = Vec::new();
    match args.arq {
        ArqMode::Gbn => run_gbn_receiver(&transport, &mut out).await?,
        ArqMode::Sr => run_sr_receiver(&transport, &mut out).await?,
    }

    if let Some(parent) = local_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(local_path, &out)
        .await
        .with_context(|| format!("writing {}", local_path.display()))?;
    let local_md5 = file_md5_hex(local_path)?;

    let server_md5 = await_done(control).await?;
    info!(%local_md5, %server_md5, "comparing digests");
    if verify(&local_md5, &server_md5).is_err() {
        eprintln!("download failed: local md5 {local_md5} != server md5 {server_md5}");
        std::process::exit(1);
    }
    println!("download complete: {remote_name}");
    Ok(())
}
