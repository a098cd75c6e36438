//! Sender state machines: Cumulative (Go-Back-N) and Selective (SR). Both
//! read from the same chunked payload and the same pluggable
//! `CongestionController`, and are driven by one cooperative loop that
//! interleaves sending new data with ACK intake on a single task, rather
//! than splitting those into two tasks sharing a mutex for a state machine
//! this size.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::congestion::{effective_window, CongestionController, INITIAL_CWND};
use crate::framing::Packet;
use crate::transport::Transport;

/// Fixed retransmission timeout, never adapted from RTT samples.
pub const T_RTO: Duration = Duration::from_millis(500);

/// Bound on each end-of-transfer receive attempt.
const FIN_WAIT_DEADLINE: Duration = Duration::from_secs(2);

/// How many bounded FIN-ACK wait attempts the sender makes before declaring
/// the transfer complete anyway. Five attempts (~10s worst case) prevents an
/// unbounded hang while giving the receiver several chances to get the final
/// ACK through. See DESIGN.md.
const FIN_WAIT_ATTEMPTS: u32 = 5;

/// How long a single progress-loop iteration blocks on `recv_timeout` before
/// looping back to check window/timer state. Short enough that the sender
/// still reacts to window growth promptly; this is the "cooperative
/// interleave" granularity mentioned above.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ArqMode {
    Gbn,
    Sr,
}

#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    pub unique_payload: usize,
    pub total_sent: usize,
    pub elapsed: Duration,
    /// `cwnd` immediately after each `on_ack`/`on_timeout`/`on_dup_ack` call,
    /// in call order. For plotting cwnd evolution over a transfer.
    pub cwnd_samples: Vec<f64>,
}

impl TransferStats {
    pub fn goodput_mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64().max(1e-9);
        8.0 * self.unique_payload as f64 / secs / 1e6
    }

    pub fn utilization(&self) -> f64 {
        if self.total_sent == 0 {
            1.0
        } else {
            self.unique_payload as f64 / self.total_sent as f64
        }
    }
}

fn now_epoch_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// `rtt = now - ack.timestamp` when the ACK carried a non-zero timestamp.
/// The ACK packet stamps its own send time, not the original data packet's.
fn rtt_from_ack(ack: &Packet) -> Option<Duration> {
    if ack.timestamp <= 0.0 {
        return None;
    }
    let now = now_epoch_secs();
    let delta = now - ack.timestamp;
    if delta.is_finite() && delta >= 0.0 {
        Some(Duration::from_secs_f64(delta))
    } else {
        None
    }
}

async fn send_fin_and_wait(
    transport: &dyn Transport,
    n: u64,
) -> std::io::Result<bool> {
    for attempt in 0..FIN_WAIT_ATTEMPTS {
        let fin = Packet::fin(n, now_epoch_secs());
        transport.send(&fin.encode()).await?;
        trace!(attempt, n, "sent FIN, waiting for FIN-ACK");

        let deadline = Instant::now() + FIN_WAIT_DEADLINE;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match transport.recv_timeout(remaining).await? {
                Some(raw) => {
                    if let Ok(pkt) = Packet::decode(&raw) {
                        if pkt.is_ack() && pkt.ack >= n {
                            return Ok(true);
                        }
                    }
                }
                None => break,
            }
        }
    }
    warn!("gave up waiting for FIN-ACK after {} attempts; all data was acked, declaring transfer complete", FIN_WAIT_ATTEMPTS);
    Ok(false)
}

/// Runs the Cumulative (Go-Back-N) sender to completion over `chunks`.
pub async fn run_gbn_sender(
    transport: &dyn Transport,
    chunks: Vec<Bytes>,
    mut cc: Box<dyn CongestionController>,
    max_win: usize,
) -> std::io::Result<TransferStats> {
    let n = chunks.len() as u64;
    let t0 = Instant::now();

    let mut base: u64 = 0;
    let mut next: u64 = 0;
    let mut cwnd = INITIAL_CWND;
    let mut dup_count: u32 = 0;
    let mut deadline: Option<Instant> = None;
    let mut unique_payload = 0usize;
    let mut total_sent = 0usize;
    let mut cwnd_samples = Vec::new();

    while base < n {
        let w = effective_window(cwnd, max_win) as u64;

        while next < n.min(base + w) {
            let idx = next as usize;
            let pkt = Packet::data(next, chunks[idx].clone(), now_epoch_secs());
            transport.send(&pkt.encode()).await?;
            total_sent += chunks[idx].len();
            unique_payload += chunks[idx].len();
            if base == next {
                deadline = Some(Instant::now());
            }
            next += 1;
        }

        if let Some(d) = deadline {
            if d.elapsed() > T_RTO {
                cwnd = cc.on_timeout(cwnd);
                cwnd_samples.push(cwnd);
                debug!(cwnd, base, next, "GBN timeout, retransmitting window");
                for p in base..n.min(next, base + w) {
                    let idx = p as usize;
                    let pkt = Packet::data(p, chunks[idx].clone(), now_epoch_secs());
                    transport.send(&pkt.encode()).await?;
                    total_sent += chunks[idx].len();
                }
                deadline = Some(Instant::now());
            }
        }

        if let Some(raw) = transport.recv_timeout(POLL_INTERVAL).await? {
            let pkt = match Packet::decode(&raw) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "malformed datagram, ignoring");
                    continue;
                }
            };
            if !pkt.is_ack() {
                continue;
            }
            let rtt = rtt_from_ack(&pkt);
            if pkt.ack > base {
                base = pkt.ack;
                cwnd = cc.on_ack(pkt.ack, cwnd, rtt);
                cwnd_samples.push(cwnd);
                dup_count = 0;
                deadline = if base != next { Some(Instant::now()) } else { None };
            } else {
                dup_count += 1;
                if dup_count >= 3 {
                    cwnd = cc.on_dup_ack(cwnd);
                    cwnd_samples.push(cwnd);
                    dup_count = 0;
                    if base < n {
                        let idx = base as usize;
                        let pkt = Packet::data(base, chunks[idx].clone(), now_epoch_secs());
                        transport.send(&pkt.encode()).await?;
                        total_sent += chunks[idx].len();
                        deadline = Some(Instant::now());
                    }
                }
            }
        }
    }

    send_fin_and_wait(transport, n).await?;

    Ok(TransferStats {
        unique_payload,
        total_sent,
        elapsed: t0.elapsed(),
        cwnd_samples,
    })
}

/// Runs the Selective-Repeat sender to completion over `chunks`.
pub async fn run_sr_sender(
    transport: &dyn Transport,
    chunks: Vec<Bytes>,
    mut cc: Box<dyn CongestionController>,
    max_win: usize,
) -> std::io::Result<TransferStats> {
    let n = chunks.len() as u64;
    let t0 = Instant::now();

    let mut base: u64 = 0;
    let mut next_idx: u64 = 0;
    let mut cwnd = INITIAL_CWND;
    let mut sent_at: HashMap<u64, Instant> = HashMap::new();
    let mut acked: HashSet<u64> = HashSet::new();
    let mut unique_payload = 0usize;
    let mut total_sent = 0usize;
    let mut cwnd_samples = Vec::new();

    while base < n {
        let w = effective_window(cwnd, max_win) as u64;

        while next_idx < n && next_idx < base + w {
            let idx = next_idx as usize;
            let pkt = Packet::data(next_idx, chunks[idx].clone(), now_epoch_secs());
            transport.send(&pkt.encode()).await?;
            total_sent += chunks[idx].len();
            unique_payload += chunks[idx].len();
            sent_at.insert(next_idx, Instant::now());
            next_idx += 1;
        }

        sent_at.retain(|idx, _| !acked.contains(idx));

        let now = Instant::now();
        let timed_out: Vec<u64> = sent_at
            .iter()
            .filter(|(idx, t0)| !acked.contains(idx) && now.duration_since(**t0) > T_RTO)
            .map(|(idx, _)| *idx)
            .collect();
        for idx in timed_out {
            cwnd = cc.on_timeout(cwnd);
            cwnd_samples.push(cwnd);
            let i = idx as usize;
            let pkt = Packet::data(idx, chunks[i].clone(), now_epoch_secs());
            transport.send(&pkt.encode()).await?;
            total_sent += chunks[i].len();
            sent_at.insert(idx, Instant::now());
        }

        if let Some(raw) = transport.recv_timeout(POLL_INTERVAL).await? {
            let pkt = match Packet::decode(&raw) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "malformed datagram, ignoring");
                    continue;
                }
            };
            if !pkt.is_ack() || pkt.ack == 0 {
                continue;
            }
            let idx = pkt.ack - 1;
            if idx < n {
                let rtt = rtt_from_ack(&pkt);
                acked.insert(idx);
                cwnd = cc.on_ack(pkt.ack, cwnd, rtt);
                cwnd_samples.push(cwnd);
                while acked.contains(&base) {
                    base += 1;
                }
            }
        }
    }

    send_fin_and_wait(transport, n).await?;

    Ok(TransferStats {
        unique_payload,
        total_sent,
        elapsed: t0.elapsed(),
        cwnd_samples,
    })
}

/// Splits file bytes into fixed-size chunks; the last chunk may be short.
pub fn chunk_bytes(data: &[u8], pkt_size: usize) -> Vec<Bytes> {
    data.chunks(pkt_size.max(1))
        .map(Bytes::copy_from_slice)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::Reno;
    use crate::receiver::{run_gbn_receiver, run_sr_receiver};
    use crate::transport::test_support::channel_pair;

    fn make_chunks(n: usize, size: usize) -> Vec<Bytes> {
        (0..n)
            .map(|i| Bytes::from(vec![i as u8; size]))
            .collect()
    }

    #[tokio::test]
    async fn gbn_sender_and_receiver_transfer_without_loss() {
        let chunks = make_chunks(3, 1000);
        let expected: Vec<u8> = chunks.iter().flat_map(|c| c.to_vec()).collect();
        let (sender_side, receiver_side) = channel_pair(vec![], vec![]);

        let mut out = Vec::new();
        let send_fut = run_gbn_sender(&sender_side, chunks, Box::new(Reno::new()), 4);
        let recv_fut = run_gbn_receiver(&receiver_side, &mut out);

        let (stats, _) = tokio::join!(send_fut, recv_fut);
        let stats = stats.unwrap();
        assert_eq!(out, expected);
        assert_eq!(stats.unique_payload, 3000);
        assert_eq!(stats.utilization(), 1.0);
    }

    #[tokio::test]
    async fn sr_sender_retransmits_a_single_dropped_packet() {
        let chunks = make_chunks(3, 1000);
        let expected: Vec<u8> = chunks.iter().flat_map(|c| c.to_vec()).collect();
        // Drop the second data send from sender -> receiver exactly once
        // (index 1 in send order); the retransmit (a later send) goes through.
        let (sender_side, receiver_side) = channel_pair(vec![1], vec![]);

        let mut out = Vec::new();
        let send_fut = run_sr_sender(&sender_side, chunks, Box::new(Reno::new()), 4);
        let recv_fut = run_sr_receiver(&receiver_side, &mut out);

        let (stats, _) = tokio::join!(send_fut, recv_fut);
        let stats = stats.unwrap();
        assert_eq!(out, expected);
        assert!(stats.total_sent > stats.unique_payload);
    }

    #[test]
    fn chunking_splits_into_fixed_size_pieces_with_short_tail() {
        let data = vec![0u8; 2500];
        let chunks = chunk_bytes(&data, 1000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1000);
        assert_eq!(chunks[1].len(), 1000);
        assert_eq!(chunks[2].len(), 500);
    }
}
