//! Packet acquisition and decoding
//!
//! Supports live capture on an interface, pcap file replay, and an
//! in-memory channel source for tests. Frames are decoded with
//! etherparse into a flat [`PacketRecord`] carrying exactly the fields
//! the detection engine consumes; anything malformed is dropped at this
//! boundary.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use etherparse::{InternetSlice, SlicedPacket, TransportSlice};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Transport layer of a decoded packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp { sport: u16, dport: u16, flags: u8 },
    Udp { sport: u16, dport: u16 },
    Other,
}

/// A decoded packet as seen by the detection engine
#[derive(Debug, Clone)]
pub struct PacketRecord {
    pub timestamp: DateTime<Utc>,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub transport: Transport,
    pub ttl: u8,
    /// IP total length
    pub length: usize,
    /// Transport payload; may be empty
    pub payload: Vec<u8>,
}

impl PacketRecord {
    pub fn tcp(
        timestamp: DateTime<Utc>,
        src_ip: IpAddr,
        dst_ip: IpAddr,
        sport: u16,
        dport: u16,
        flags: u8,
    ) -> Self {
        Self {
            timestamp,
            src_ip,
            dst_ip,
            transport: Transport::Tcp { sport, dport, flags },
            ttl: 64,
            length: 40,
            payload: Vec::new(),
        }
    }

    pub fn udp(
        timestamp: DateTime<Utc>,
        src_ip: IpAddr,
        dst_ip: IpAddr,
        sport: u16,
        dport: u16,
    ) -> Self {
        Self {
            timestamp,
            src_ip,
            dst_ip,
            transport: Transport::Udp { sport, dport },
            ttl: 64,
            length: 28,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        let payload = payload.into();
        self.length += payload.len();
        self.payload = payload;
        self
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self.transport, Transport::Tcp { .. })
    }

    pub fn dport(&self) -> Option<u16> {
        match self.transport {
            Transport::Tcp { dport, .. } | Transport::Udp { dport, .. } => Some(dport),
            Transport::Other => None,
        }
    }

    pub fn tcp_flags(&self) -> Option<u8> {
        match self.transport {
            Transport::Tcp { flags, .. } => Some(flags),
            _ => None,
        }
    }

    /// True when the TCP payload starts like an HTTP request
    pub fn has_http_request(&self) -> bool {
        self.is_tcp() && is_http_request(&self.payload)
    }
}

// HTTP method prefixes for request sniffing, checked without allocation
static HTTP_METHODS: &[&[u8]] = &[
    b"GET ",
    b"POST ",
    b"PUT ",
    b"DELETE ",
    b"HEAD ",
    b"OPTIONS ",
    b"PATCH ",
    b"CONNECT ",
    b"TRACE ",
];

pub fn is_http_request(data: &[u8]) -> bool {
    HTTP_METHODS
        .iter()
        .any(|m| data.len() >= m.len() && &data[..m.len()] == *m)
}

/// TCP flag bits in wire order (FIN..CWR)
pub mod tcp_flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
}

/// Decode an Ethernet frame into a [`PacketRecord`]. Returns `None` for
/// anything that is not IPv4 or fails to parse.
pub fn decode_frame(data: &[u8], timestamp: DateTime<Utc>) -> Option<PacketRecord> {
    let sliced = SlicedPacket::from_ethernet(data).ok()?;

    let (src_ip, dst_ip, ttl, length) = match sliced.ip {
        Some(InternetSlice::Ipv4(header, _)) => (
            IpAddr::V4(header.source_addr()),
            IpAddr::V4(header.destination_addr()),
            header.ttl(),
            header.total_len() as usize,
        ),
        _ => return None,
    };

    let transport = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            let mut flags = 0u8;
            if tcp.fin() {
                flags |= tcp_flags::FIN;
            }
            if tcp.syn() {
                flags |= tcp_flags::SYN;
            }
            if tcp.rst() {
                flags |= tcp_flags::RST;
            }
            if tcp.psh() {
                flags |= tcp_flags::PSH;
            }
            if tcp.ack() {
                flags |= tcp_flags::ACK;
            }
            if tcp.urg() {
                flags |= tcp_flags::URG;
            }
            Transport::Tcp {
                sport: tcp.source_port(),
                dport: tcp.destination_port(),
                flags,
            }
        }
        Some(TransportSlice::Udp(udp)) => Transport::Udp {
            sport: udp.source_port(),
            dport: udp.destination_port(),
        },
        _ => Transport::Other,
    };

    Some(PacketRecord {
        timestamp,
        src_ip,
        dst_ip,
        transport,
        ttl,
        length,
        payload: sliced.payload.to_vec(),
    })
}

/// One poll of a capture source
pub enum CapturePoll {
    Packet(PacketRecord),
    /// Nothing available right now; caller may re-check shutdown
    Idle,
    /// Source exhausted (end of file, device closed)
    Eof,
}

/// A source of decoded packets
pub trait PacketSource: Send {
    fn poll_next(&mut self) -> Result<CapturePoll>;
}

/// Live capture on a network interface
pub struct LiveCapture {
    cap: pcap::Capture<pcap::Active>,
}

impl LiveCapture {
    pub fn open(interface: &str) -> Result<Self> {
        let cap = pcap::Capture::from_device(interface)
            .with_context(|| format!("Cannot open interface '{}'", interface))?
            .promisc(true)
            .timeout(200)
            .open()
            .with_context(|| format!("Cannot start capture on '{}'", interface))?;
        info!("Live capture started on {}", interface);
        Ok(Self { cap })
    }
}

impl PacketSource for LiveCapture {
    fn poll_next(&mut self) -> Result<CapturePoll> {
        match self.cap.next_packet() {
            Ok(pkt) => Ok(match decode_frame(pkt.data, Utc::now()) {
                Some(record) => CapturePoll::Packet(record),
                None => CapturePoll::Idle,
            }),
            Err(pcap::Error::TimeoutExpired) => Ok(CapturePoll::Idle),
            Err(e) => Err(e).context("Live capture failed"),
        }
    }
}

/// Offline pcap file replay
pub struct FileCapture {
    cap: pcap::Capture<pcap::Offline>,
}

impl FileCapture {
    pub fn open(path: &str) -> Result<Self> {
        let cap = pcap::Capture::from_file(path)
            .with_context(|| format!("Failed to open pcap file '{}'", path))?;
        info!("Replaying capture file {}", path);
        Ok(Self { cap })
    }
}

impl PacketSource for FileCapture {
    fn poll_next(&mut self) -> Result<CapturePoll> {
        match self.cap.next_packet() {
            Ok(pkt) => Ok(match decode_frame(pkt.data, Utc::now()) {
                Some(record) => CapturePoll::Packet(record),
                None => CapturePoll::Idle,
            }),
            Err(_) => Ok(CapturePoll::Eof),
        }
    }
}

/// Drain a capture source into the engine channel until shutdown or EOF.
/// Runs on a dedicated thread; the capture library blocks, the rest of
/// the pipeline does not.
pub fn run_capture(
    mut source: Box<dyn PacketSource>,
    tx: mpsc::Sender<PacketRecord>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match source.poll_next() {
            Ok(CapturePoll::Packet(record)) => {
                if tx.blocking_send(record).is_err() {
                    debug!("Engine channel closed, stopping capture");
                    return;
                }
            }
            Ok(CapturePoll::Idle) => continue,
            Ok(CapturePoll::Eof) => {
                info!("Capture source exhausted");
                return;
            }
            Err(e) => {
                warn!("Capture failed: {:#}", e);
                return;
            }
        }
    }
    info!("Capture stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_request_sniffing() {
        assert!(is_http_request(b"GET / HTTP/1.1\r\n"));
        assert!(is_http_request(b"POST /login HTTP/1.1\r\n"));
        assert!(!is_http_request(b"SSH-2.0-OpenSSH_9.6"));
        assert!(!is_http_request(b"GE"));
        assert!(!is_http_request(b""));
    }

    #[test]
    fn test_record_accessors() {
        let ts = Utc::now();
        let src: IpAddr = "203.0.113.7".parse().unwrap();
        let dst: IpAddr = "10.0.0.1".parse().unwrap();

        let pkt = PacketRecord::tcp(ts, src, dst, 50000, 80, tcp_flags::SYN);
        assert!(pkt.is_tcp());
        assert_eq!(pkt.dport(), Some(80));
        assert_eq!(pkt.tcp_flags(), Some(tcp_flags::SYN));
        assert!(!pkt.has_http_request());

        let http = PacketRecord::tcp(ts, src, dst, 50000, 80, tcp_flags::ACK | tcp_flags::PSH)
            .with_payload(&b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n"[..]);
        assert!(http.has_http_request());

        let udp = PacketRecord::udp(ts, src, dst, 50000, 53);
        assert_eq!(udp.dport(), Some(53));
        assert_eq!(udp.tcp_flags(), None);
    }
}
