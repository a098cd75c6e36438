//! Server binary: listens on a control port for upload/download requests,
//! hands each one an ephemeral data port, and drives the matching
//! sender/receiver state machine from `rft-core`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::UdpSocket;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rft_core::control::{Request, Response};
use rft_core::digest::file_md5_hex;
use rft_core::receiver::{run_gbn_receiver, run_sr_receiver};
use rft_core::sender::{chunk_bytes, run_gbn_sender, run_sr_sender, ArqMode};
use rft_core::transport::{Transport, UdpTransport};

/// How long the server waits, per attempt, for the client to start sending
/// on the data socket before it can learn the client's address.
const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(2);
const RENDEZVOUS_ATTEMPTS: u32 = 5;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to bind the control socket to
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Control port clients send requests to
    #[arg(short, long, default_value_t = 9000)]
    port: u16,

    /// Directory files are uploaded into and downloaded from
    #[arg(short, long, default_value = "./storage")]
    storage: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    std::fs::create_dir_all(&args.storage)
        .with_context(|| format!("creating storage directory {}", args.storage.display()))?;

    let control_addr = format!("{}:{}", args.bind, args.port);
    let control = Arc::new(UdpSocket::bind(&control_addr).await.context("binding control socket")?);
    info!(addr = %control_addr, storage = %args.storage.display(), "rft-server listening");

    let mut buf = vec![0u8; 2048];
    loop {
        let (n, client_addr) = control.recv_from(&mut buf).await.context("control socket recv")?;
        let req: Request = match serde_json::from_slice(&buf[..n]) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "dropping malformed control request");
                continue;
            }
        };
        info!(cmd = %req.cmd, arq = ?req.arq, remote = %req.remote_name, %client_addr, "accepted request");

        let control = Arc::clone(&control);
        let storage = args.storage.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_request(control, client_addr, storage, req).await {
                warn!(error = %e, "request handling failed");
            }
        });
    }
}

/// Rejects remote names that would escape `storage` via `..` components or
/// an absolute path.
fn resolve_remote_path(storage: &Path, remote_name: &str) -> Option<PathBuf> {
    let candidate = Path::new(remote_name);
    if candidate.is_absolute() {
        return None;
    }
    if candidate.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return None;
    }
    Some(storage.join(candidate))
}

async fn send_response(control: &UdpSocket, addr: SocketAddr, resp: &Response) -> Result<()> {
    let json = serde_json::to_vec(resp)?;
    control.send_to(&json, addr).await?;
    Ok(())
}

async fn handle_request(
    control: Arc<UdpSocket>,
    client_addr: SocketAddr,
    storage: PathBuf,
    req: Request,
) -> Result<()> {
    let Some(path) = resolve_remote_path(&storage, &req.remote_name) else {
        warn!(remote = %req.remote_name, "rejected path-traversal attempt");
        send_response(&control, client_addr, &Response::Error {
            why: "invalid remote name".to_string(),
        })
        .await?;
        return Ok(());
    };

    if req.is_upload() {
        handle_upload(&control, client_addr, &path, req).await
    } else if req.is_download() {
        handle_download(&control, client_addr, &path, req).await
    } else {
        send_response(&control, client_addr, &Response::Error {
            why: "unknown command".to_string(),
        })
        .await?;
        Ok(())
    }
}

async fn handle_upload(
    control: &UdpSocket,
    client_addr: SocketAddr,
    path: &Path,
    req: Request,
) -> Result<()> {
    let data_socket = UdpSocket::bind("0.0.0.0:0").await.context("binding data socket")?;
    let data_port = data_socket.local_addr()?.port();
    send_response(control, client_addr, &Response::Ok { data_port }).await?;

    let transport = UdpTransport::unbound(data_socket);
    let mut out = Vec::new();
    match req.arq {
        ArqMode::Gbn => run_gbn_receiver(&transport, &mut out).await?,
        ArqMode::Sr => run_sr_receiver(&transport, &mut out).await?,
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, &out).await.with_context(|| format!("writing {}", path.display()))?;
    let md5 = file_md5_hex(path)?;
    info!(remote = %req.remote_name, %md5, bytes = out.len(), "upload finished");
    send_response(control, client_addr, &Response::Done { md5 }).await?;
    Ok(())
}

async fn handle_download(
    control: &UdpSocket,
    client_addr: SocketAddr,
    path: &Path,
    req: Request,
) -> Result<()> {
    if !path.exists() {
        send_response(control, client_addr, &Response::Error {
            why: "file not exist".to_string(),
        })
        .await?;
        return Ok(());
    }

    let data_socket = UdpSocket::bind("0.0.0.0:0").await.context("binding data socket")?;
    let data_port = data_socket.local_addr()?.port();
    send_response(control, client_addr, &Response::Ok { data_port }).await?;

    let transport = UdpTransport::unbound(data_socket);
    learn_peer(&transport).await?;

    let data = tokio::fs::read(path).await.with_context(|| format!("reading {}", path.display()))?;
    let chunks = chunk_bytes(&data, req.pkt_size);
    let cc = req.cc.build();
    let stats = match req.arq {
        ArqMode::Gbn => run_gbn_sender(&transport, chunks, cc, req.max_win).await?,
        ArqMode::Sr => run_sr_sender(&transport, chunks, cc, req.max_win).await?,
    };

    let md5 = file_md5_hex(path)?;
    info!(
        remote = %req.remote_name,
        %md5,
        goodput_mbps = stats.goodput_mbps(),
        utilization = stats.utilization(),
        "download finished"
    );
    send_response(control, client_addr, &Response::Done { md5 }).await?;
    Ok(())
}

/// Blocks until the client's data socket address is learned, by waiting for
/// the rendezvous datagram it sends as soon as it has the data port.
async fn learn_peer(transport: &UdpTransport) -> Result<()> {
    for _ in 0..RENDEZVOUS_ATTEMPTS {
        if transport.recv_timeout(RENDEZVOUS_TIMEOUT).await?.is_some() {
            return Ok(());
        }
    }
    bail!("client never began the data stream")
}
