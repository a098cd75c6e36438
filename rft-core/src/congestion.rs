//! Congestion control: a small trait with two concrete strategies, in place
//! of a single hard-coded exponential-growth/halve-on-loss window.

use std::time::Duration;

/// A pluggable congestion-window strategy. Every hook returns the updated
/// `cwnd`; implementations are pure functions of their inputs plus whatever
/// scalar state they keep internally (ssthresh, minRTT, ...).
pub trait CongestionController: Send {
    /// Called once per advancing ACK. `rtt` is `None` when the acknowledged
    /// packet's timestamp was `0` ("do not sample").
    fn on_ack(&mut self, ack: u64, cwnd: f64, rtt: Option<Duration>) -> f64;

    /// Called when the retransmission timer fires.
    fn on_timeout(&mut self, cwnd: f64) -> f64;

    /// Called after the third consecutive duplicate ACK.
    fn on_dup_ack(&mut self, cwnd: f64) -> f64;
}

/// Initial `cwnd` a freshly created sender starts with.
pub const INITIAL_CWND: f64 = 1.0;

/// TCP-Reno-style slow start + congestion avoidance, with fast-recovery entry
/// on triple duplicate ACK.
#[derive(Debug, Clone)]
pub struct Reno {
    ssthresh: f64,
}

impl Reno {
    pub fn new() -> Self {
        Self { ssthresh: 16.0 }
    }
}

impl Default for Reno {
    fn default() -> Self {
        Self::new()
    }
}

impl CongestionController for Reno {
    fn on_ack(&mut self, _ack: u64, cwnd: f64, _rtt: Option<Duration>) -> f64 {
        if cwnd < self.ssthresh {
            cwnd + 1.0
        } else {
            cwnd + 1.0 / cwnd
        }
    }

    fn on_timeout(&mut self, cwnd: f64) -> f64 {
        self.ssthresh = cwnd / 2.0;
        1.0
    }

    fn on_dup_ack(&mut self, cwnd: f64) -> f64 {
        self.ssthresh = cwnd / 2.0;
        self.ssthresh
    }
}

/// TCP-Vegas-style delay-based control: grow while the observed throughput
/// tracks the minimum-RTT throughput, back off once the gap gets too wide.
#[derive(Debug, Clone)]
pub struct Vegas {
    alpha: f64,
    beta: f64,
    min_rtt: Option<Duration>,
}

impl Vegas {
    pub fn new() -> Self {
        Self {
            alpha: 1.0,
            beta: 3.0,
            min_rtt: None,
        }
    }
}

impl Default for Vegas {
    fn default() -> Self {
        Self::new()
    }
}

impl CongestionController for Vegas {
    fn on_ack(&mut self, _ack: u64, cwnd: f64, rtt: Option<Duration>) -> f64 {
        let rtt = match rtt {
            None => return cwnd + 0.5,
            Some(rtt) => rtt,
        };
        let min_rtt = match self.min_rtt {
            None => {
                self.min_rtt = Some(rtt);
                rtt
            }
            Some(prev) => {
                let next = prev.min(rtt);
                self.min_rtt = Some(next);
                next
            }
        };

        let expected = cwnd / min_rtt.as_secs_f64();
        let actual = cwnd / rtt.as_secs_f64();
        let diff = expected - actual;

        if diff < self.alpha {
            cwnd + 1.0
        } else if diff > self.beta {
            (cwnd - 1.0).max(1.0)
        } else {
            cwnd
        }
    }

    fn on_timeout(&mut self, cwnd: f64) -> f64 {
        cwnd / 2.0
    }

    fn on_dup_ack(&mut self, cwnd: f64) -> f64 {
        (cwnd - 1.0).max(1.0)
    }
}

/// Collapses `cwnd` to the integer effective window: `⌊min(max_win, max(1, ⌊cwnd⌋))⌋`.
pub fn effective_window(cwnd: f64, max_win: usize) -> usize {
    let floored = cwnd.floor().max(1.0) as usize;
    floored.min(max_win).max(1)
}
