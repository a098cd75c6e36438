//! Receiver state machines: Cumulative and Selective.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::{trace, warn};

use crate::framing::Packet;
use crate::transport::Transport;

fn now_epoch_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Runs the Cumulative receiver until FIN, appending delivered bytes to `out`
/// in strict increasing index order.
pub async fn run_gbn_receiver(
    transport: &dyn Transport,
    out: &mut Vec<u8>,
) -> std::io::Result<()> {
    let mut expect: u64 = 0;

    loop {
        let raw = match transport.recv_timeout(std::time::Duration::from_secs(60)).await? {
            Some(raw) => raw,
            None => continue,
        };
        let pkt = match Packet::decode(&raw) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "malformed datagram, ignoring");
                continue;
            }
        };

        if !pkt.is_fin() && pkt.seq == expect {
            out.extend_from_slice(&pkt.payload);
            expect += 1;
            trace!(expect, "GBN receiver advanced");
        }

        let ack = Packet::ack(expect, now_epoch_secs());
        transport.send(&ack.encode()).await?;

        if pkt.is_fin() {
            let ack = Packet::ack(expect, now_epoch_secs());
            transport.send(&ack.encode()).await?;
            return Ok(());
        }
    }
}

/// Runs the Selective receiver until FIN, reassembling out-of-order payloads
/// in a keyed buffer before writing them in order.
pub async fn run_sr_receiver(
    transport: &dyn Transport,
    out: &mut Vec<u8>,
) -> std::io::Result<()> {
    let mut expect: u64 = 0;
    let mut buffer: HashMap<u64, Bytes> = HashMap::new();

    loop {
        let raw = match transport.recv_timeout(std::time::Duration::from_secs(60)).await? {
            Some(raw) => raw,
            None => continue,
        };
        let pkt = match Packet::decode(&raw) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "malformed datagram, ignoring");
                continue;
            }
        };

        if !pkt.is_fin() {
            let ack = Packet::ack(pkt.seq + 1, now_epoch_secs());
            transport.send(&ack.encode()).await?;

            if pkt.seq >= expect {
                buffer.insert(pkt.seq, pkt.payload.clone());
                while let Some(chunk) = buffer.remove(&expect) {
                    out.extend_from_slice(&chunk);
                    expect += 1;
                }
            }
        } else {
            let ack = Packet::ack(expect, now_epoch_secs());
            transport.send(&ack.encode()).await?;
            return Ok(());
        }
    }
}
