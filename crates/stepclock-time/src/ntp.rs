//! Network time over SNTP (RFC 4330)

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;

use stepclock_core::{StepClockError, StepClockResult};

pub const NTP_PORT: u16 = 123;

/// SNTP packet size without extensions
pub const PACKET_LEN: usize = 48;

/// Seconds between 1900-01-01 (NTP epoch) and 1970-01-01
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Pause between attempts inside one fetch
const RETRY_PAUSE: Duration = Duration::from_millis(250);

/// Source of network UTC time
pub trait NetworkTime {
    /// Obtain UTC from `server`, giving up after `timeout`
    fn fetch(&mut self, server: &str, timeout: Duration) -> StepClockResult<DateTime<Utc>>;
}

/// Failure of a single SNTP exchange
#[derive(Error, Debug)]
pub enum NtpError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot resolve {0}")]
    Unresolved(String),

    #[error("deadline passed")]
    Deadline,

    #[error("short packet ({0} bytes)")]
    ShortPacket(usize),

    #[error("unexpected mode {0}")]
    NotServer(u8),

    #[error("kiss-o'-death from server")]
    KissOfDeath,

    #[error("transmit timestamp out of range")]
    BadTimestamp,
}

/// Client request: LI 0, version 4, mode 3
pub fn request_packet() -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = 0x23;
    packet
}

/// Extract the transmit timestamp of a server reply
pub fn decode_response(packet: &[u8]) -> Result<DateTime<Utc>, NtpError> {
    if packet.len() < PACKET_LEN {
        return Err(NtpError::ShortPacket(packet.len()));
    }
    let mode = packet[0] & 0x07;
    if mode != 4 {
        return Err(NtpError::NotServer(mode));
    }
    if packet[1] == 0 {
        return Err(NtpError::KissOfDeath);
    }

    let secs = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]) as u64;
    let frac = u32::from_be_bytes([packet[44], packet[45], packet[46], packet[47]]) as u64;
    if secs == 0 && frac == 0 {
        return Err(NtpError::BadTimestamp);
    }

    // Era 1 starts in 2036; small values belong to it
    let secs = if secs < NTP_UNIX_OFFSET {
        secs + (1u64 << 32)
    } else {
        secs
    };
    let nanos = ((frac * 1_000_000_000) >> 32) as u32;
    DateTime::from_timestamp((secs - NTP_UNIX_OFFSET) as i64, nanos).ok_or(NtpError::BadTimestamp)
}

/// Blocking SNTP client
#[derive(Clone, Debug, Default)]
pub struct SntpClient {
    attempts: u64,
}

impl SntpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exchanges attempted so far
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Resolve `server` within `within`.
    ///
    /// The lookup runs on a helper thread so a hung resolver cannot hold the
    /// caller past its deadline.
    fn resolve(server: &str, within: Duration) -> Result<SocketAddr, NtpError> {
        if let Ok(addr) = server.parse::<SocketAddr>() {
            return Ok(addr);
        }
        let (tx, rx) = mpsc::channel();
        let host = server.to_string();
        thread::spawn(move || {
            let found = (host.as_str(), NTP_PORT)
                .to_socket_addrs()
                .map(|mut addrs| addrs.next());
            let _ = tx.send(found);
        });
        match rx.recv_timeout(within) {
            Ok(Ok(Some(addr))) => Ok(addr),
            Ok(Ok(None)) => Err(NtpError::Unresolved(server.to_string())),
            Ok(Err(e)) => Err(NtpError::Io(e)),
            Err(_) => Err(NtpError::Deadline),
        }
    }

    /// One request/reply exchange; every wait is cut to `deadline`
    fn exchange(&mut self, target: SocketAddr, deadline: Instant) -> Result<DateTime<Utc>, NtpError> {
        self.attempts += 1;
        let bind: SocketAddr = if target.is_ipv4() {
            ([0u8; 4], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        socket.send_to(&request_packet(), target)?;

        let mut buf = [0u8; 64];
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(NtpError::Deadline);
            }
            socket.set_read_timeout(Some(left))?;
            let (len, from) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Err(NtpError::Deadline)
                }
                Err(e) => return Err(e.into()),
            };
            // Ignore stray datagrams
            if from == target {
                return decode_response(&buf[..len]);
            }
        }
    }
}

impl NetworkTime for SntpClient {
    fn fetch(&mut self, server: &str, timeout: Duration) -> StepClockResult<DateTime<Utc>> {
        let deadline = Instant::now() + timeout;
        let mut target = None;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(StepClockError::TimeFetchTimeout(timeout));
            }
            let known = target;
            let attempt = match known {
                Some(addr) => self.exchange(addr, deadline),
                None => Self::resolve(server, remaining).and_then(|addr| {
                    target = Some(addr);
                    self.exchange(addr, deadline)
                }),
            };
            match attempt {
                Ok(utc) => return Ok(utc),
                Err(NtpError::Deadline) => return Err(StepClockError::TimeFetchTimeout(timeout)),
                Err(e) => {
                    tracing::debug!(server, error = %e, "sntp exchange failed");
                    let pause = RETRY_PAUSE.min(deadline.saturating_duration_since(Instant::now()));
                    thread::sleep(pause);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(secs: u32, frac: u32) -> [u8; PACKET_LEN] {
        let mut packet = [0u8; PACKET_LEN];
        packet[0] = 0x24; // LI 0, VN 4, mode 4
        packet[1] = 2;
        packet[40..44].copy_from_slice(&secs.to_be_bytes());
        packet[44..48].copy_from_slice(&frac.to_be_bytes());
        packet
    }

    #[test]
    fn test_request_packet_header() {
        let packet = request_packet();
        assert_eq!(packet[0], 0x23);
        assert!(packet[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_decode_transmit_timestamp() {
        // 2026-03-29T01:00:00Z
        let unix = 1_774_746_000u64;
        let utc = decode_response(&reply((unix + NTP_UNIX_OFFSET) as u32, 1 << 31)).unwrap();
        assert_eq!(utc.timestamp() as u64, unix);
        assert_eq!(utc.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_decode_rejects_bad_replies() {
        assert!(matches!(decode_response(&[0u8; 20]), Err(NtpError::ShortPacket(20))));

        let mut client_mode = reply(3_900_000_000, 0);
        client_mode[0] = 0x23;
        assert!(matches!(decode_response(&client_mode), Err(NtpError::NotServer(3))));

        let mut kod = reply(3_900_000_000, 0);
        kod[1] = 0;
        assert!(matches!(decode_response(&kod), Err(NtpError::KissOfDeath)));

        assert!(matches!(decode_response(&reply(0, 0)), Err(NtpError::BadTimestamp)));
    }

    #[test]
    fn test_fetch_from_local_server() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        let unix = 1_780_000_000u64;
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 64];
            let (_, from) = server.recv_from(&mut buf).unwrap();
            server
                .send_to(&reply((unix + NTP_UNIX_OFFSET) as u32, 0), from)
                .unwrap();
        });

        let mut client = SntpClient::new();
        let utc = client
            .fetch(&addr.to_string(), Duration::from_secs(2))
            .unwrap();
        handle.join().unwrap();
        assert_eq!(utc.timestamp() as u64, unix);
    }

    #[test]
    fn test_fetch_times_out() {
        // Bound but silent server
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = silent.local_addr().unwrap();

        let mut client = SntpClient::new();
        let err = client
            .fetch(&addr.to_string(), Duration::from_millis(300))
            .unwrap_err();
        assert_eq!(err, StepClockError::TimeFetchTimeout(Duration::from_millis(300)));
        assert!(client.attempts() >= 1);
    }

    #[test]
    fn test_stray_datagrams_do_not_extend_the_wait() {
        // Server never answers itself; a neighbour keeps sending junk
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 64];
            let (_, client) = server.recv_from(&mut buf).unwrap();
            let neighbour = UdpSocket::bind("127.0.0.1:0").unwrap();
            let junk = reply(3_900_000_000, 0);
            for _ in 0..40 {
                let _ = neighbour.send_to(&junk, client);
                std::thread::sleep(Duration::from_millis(50));
            }
        });

        let started = Instant::now();
        let mut client = SntpClient::new();
        let err = client
            .fetch(&addr.to_string(), Duration::from_millis(600))
            .unwrap_err();
        let took = started.elapsed();

        assert_eq!(err, StepClockError::TimeFetchTimeout(Duration::from_millis(600)));
        assert!(took < Duration::from_millis(1200), "fetch took {took:?}");
        handle.join().unwrap();
    }
}
