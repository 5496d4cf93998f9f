//! Per-source sliding windows
//!
//! One record per observed source IP, created lazily on first packet.
//! Every mutating operation prunes entries older than its window before
//! appending, so a list never holds anything outside the detector's
//! horizon. Lists are cleared after they trigger so one detection does
//! not immediately re-fire on the same data.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;

/// Sliding-window state for a single source IP
#[derive(Debug, Default)]
pub struct SourceWindows {
    /// dport -> arrival timestamps within the short window
    requests_per_port: HashMap<u16, VecDeque<DateTime<Utc>>>,
    /// (dport, timestamp) access log for the scan heuristic
    port_access_log: VecDeque<(u16, DateTime<Utc>)>,
    syn_timestamps: VecDeque<DateTime<Utc>>,
    ack_timestamps: VecDeque<DateTime<Utc>>,
    sqli_hits: VecDeque<DateTime<Utc>>,
    xss_hits: VecDeque<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
}

fn prune(queue: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) {
    let cutoff = now - window;
    while let Some(front) = queue.front() {
        if *front <= cutoff {
            queue.pop_front();
        } else {
            break;
        }
    }
}

impl SourceWindows {
    /// Record an arrival on a destination port; returns the in-window
    /// count including this arrival.
    pub fn record_request(&mut self, port: u16, now: DateTime<Utc>, window: Duration) -> usize {
        self.last_seen = Some(now);
        let queue = self.requests_per_port.entry(port).or_default();
        prune(queue, now, window);
        queue.push_back(now);
        queue.len()
    }

    pub fn clear_requests(&mut self, port: u16) {
        if let Some(queue) = self.requests_per_port.get_mut(&port) {
            queue.clear();
        }
    }

    /// Record a port access; returns (unique ports, total accesses) over
    /// the window including this access.
    pub fn record_port(
        &mut self,
        port: u16,
        now: DateTime<Utc>,
        window: Duration,
    ) -> (Vec<u16>, usize) {
        self.last_seen = Some(now);
        let cutoff = now - window;
        while let Some((_, ts)) = self.port_access_log.front() {
            if *ts <= cutoff {
                self.port_access_log.pop_front();
            } else {
                break;
            }
        }
        self.port_access_log.push_back((port, now));

        let unique: HashSet<u16> = self.port_access_log.iter().map(|(p, _)| *p).collect();
        let mut unique: Vec<u16> = unique.into_iter().collect();
        unique.sort_unstable();
        (unique, self.port_access_log.len())
    }

    pub fn clear_ports(&mut self) {
        self.port_access_log.clear();
    }

    pub fn record_syn(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        self.last_seen = Some(now);
        prune(&mut self.syn_timestamps, now, window);
        self.syn_timestamps.push_back(now);
        self.syn_timestamps.len()
    }

    pub fn record_ack(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        self.last_seen = Some(now);
        prune(&mut self.ack_timestamps, now, window);
        self.ack_timestamps.push_back(now);
        self.ack_timestamps.len()
    }

    pub fn syn_count(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        prune(&mut self.syn_timestamps, now, window);
        self.syn_timestamps.len()
    }

    pub fn ack_count(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        prune(&mut self.ack_timestamps, now, window);
        self.ack_timestamps.len()
    }

    pub fn clear_syn_ack(&mut self) {
        self.syn_timestamps.clear();
        self.ack_timestamps.clear();
    }

    pub fn record_sqli_hit(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        self.last_seen = Some(now);
        prune(&mut self.sqli_hits, now, window);
        self.sqli_hits.push_back(now);
        self.sqli_hits.len()
    }

    pub fn sqli_count(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        prune(&mut self.sqli_hits, now, window);
        self.sqli_hits.len()
    }

    pub fn clear_sqli(&mut self) {
        self.sqli_hits.clear();
    }

    pub fn record_xss_hit(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        self.last_seen = Some(now);
        prune(&mut self.xss_hits, now, window);
        self.xss_hits.push_back(now);
        self.xss_hits.len()
    }

    pub fn xss_count(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        prune(&mut self.xss_hits, now, window);
        self.xss_hits.len()
    }

    pub fn clear_xss(&mut self) {
        self.xss_hits.clear();
    }

    /// True when every list is empty and nothing has been recorded for
    /// longer than the horizon; such entries are reclaimed by the sweep.
    fn evictable(&self, now: DateTime<Utc>, horizon: Duration) -> bool {
        let idle = match self.last_seen {
            Some(seen) => now - seen > horizon,
            None => true,
        };
        idle && self.port_access_log.is_empty()
            && self.syn_timestamps.is_empty()
            && self.ack_timestamps.is_empty()
            && self.sqli_hits.is_empty()
            && self.xss_hits.is_empty()
            && self.requests_per_port.values().all(|q| q.is_empty())
    }
}

/// Top-level ip -> state table, owned by the detection engine
#[derive(Debug, Default)]
pub struct SourceTable {
    sources: HashMap<IpAddr, SourceWindows>,
}

impl SourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, ip: IpAddr) -> &mut SourceWindows {
        self.sources.entry(ip).or_default()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Drop sources whose windows are all empty and idle beyond the
    /// horizon. Entries with live window data always survive, so a sweep
    /// can never lose evidence.
    pub fn sweep(&mut self, now: DateTime<Utc>, horizon: Duration) -> usize {
        let before = self.sources.len();
        self.sources.retain(|_, state| !state.evictable(now, horizon));
        before - self.sources.len()
    }
}
