//! ICMP echo probe with native sockets and a `ping` command fallback.
//!
//! Native probes use blocking sockets inside `spawn_blocking` so the measured
//! round-trip time is not skewed by the async scheduler.

use std::io::ErrorKind;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::ProbeError;

/// ICMP capability state
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    /// Native ICMP sockets are available
    Native,
    /// Only command fallback is available
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

/// Sequence counter shared by all echo requests of this process.
static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Per-family constants of an echo exchange.
struct EchoKind {
    domain: Domain,
    protocol: Protocol,
    request_type: u8,
    reply_type: u8,
    /// ICMPv6 checksums are filled in by the kernel.
    needs_checksum: bool,
}

const ECHO_V4: EchoKind = EchoKind {
    domain: Domain::IPV4,
    protocol: Protocol::ICMPV4,
    request_type: 8,
    reply_type: 0,
    needs_checksum: true,
};

const ECHO_V6: EchoKind = EchoKind {
    domain: Domain::IPV6,
    protocol: Protocol::ICMPV6,
    request_type: 128,
    reply_type: 129,
    needs_checksum: false,
};

fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (RAW socket, privileged)");
        return IcmpCapability::Native;
    }

    // Unprivileged on Linux with ping_group_range set, or macOS
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (DGRAM socket, unprivileged)");
        return IcmpCapability::Native;
    }

    tracing::info!("Ping probe: native ICMP unavailable, using command fallback");
    IcmpCapability::CommandOnly
}

/// Send one echo request to `address` and wait up to `timeout` for the reply.
///
/// Returns the round-trip time.
pub async fn run_ping_probe(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    if address.starts_with('-') {
        return Err(ProbeError::Config(format!("invalid address: {}", address)));
    }

    let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);
    if capability == IcmpCapability::CommandOnly {
        return run_ping_command(address, timeout).await;
    }

    let ip = resolve_address(address).await?;
    let result = tokio::task::spawn_blocking(move || run_blocking_ping(ip, timeout))
        .await
        .map_err(|e| ProbeError::Worker(format!("spawn_blocking failed: {}", e)))?;

    match result {
        Err(ProbeError::Permission(msg)) => {
            tracing::warn!(
                "Native ping to {} was denied, falling back to command: {}",
                address,
                msg
            );
            run_ping_command(address, timeout).await
        }
        other => other,
    }
}

async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed for {}: {}", address, e)))?
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("no addresses found for {}", address)))
}

fn io_error(context: &str, e: std::io::Error) -> ProbeError {
    if e.kind() == ErrorKind::PermissionDenied {
        ProbeError::Permission(format!("{}: {}", context, e))
    } else {
        ProbeError::Network(format!("{}: {}", context, e))
    }
}

/// Blocking echo exchange. Runs on a dedicated thread.
fn run_blocking_ping(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let kind = match ip {
        IpAddr::V4(_) => &ECHO_V4,
        IpAddr::V6(_) => &ECHO_V6,
    };

    // RAW first (privileged), then DGRAM (unprivileged)
    let (socket, raw) = match Socket::new(kind.domain, Type::RAW, Some(kind.protocol)) {
        Ok(s) => (s, true),
        Err(_) => {
            let s = Socket::new(kind.domain, Type::DGRAM, Some(kind.protocol))
                .map_err(|e| io_error("failed to create ICMP socket", e))?;
            (s, false)
        }
    };

    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| io_error("failed to set timeout", e))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| io_error("failed to connect", e))?;

    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let packet = build_echo_request(kind, identifier, sequence);

    let start = Instant::now();
    socket.send(&packet).map_err(|e| io_error("failed to send", e))?;

    // Datagram ICMP sockets rewrite the identifier and already filter replies
    // by it, so only raw sockets can check it.
    let expected_id = raw.then_some(identifier);
    let mut buf = [MaybeUninit::<u8>::uninit(); 1500];

    loop {
        let remaining = timeout
            .checked_sub(start.elapsed())
            .filter(|d| !d.is_zero())
            .ok_or(ProbeError::Timeout(timeout))?;
        socket
            .set_read_timeout(Some(remaining))
            .map_err(|e| io_error("failed to set timeout", e))?;

        let len = socket.recv(&mut buf).map_err(|e| match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => ProbeError::Timeout(timeout),
            _ => io_error("failed to receive", e),
        })?;
        let elapsed = start.elapsed();

        // SAFETY: recv initialized the first `len` bytes
        let reply: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        if is_echo_reply(kind, reply, expected_id, sequence) {
            return Ok(elapsed);
        }
    }
}

/// Check whether `reply` is the echo reply to our request. IPv4 raw sockets
/// deliver the IP header too; it is skipped using its IHL field.
fn is_echo_reply(kind: &EchoKind, reply: &[u8], identifier: Option<u16>, sequence: u16) -> bool {
    let offset = if kind.domain == Domain::IPV4 && reply.first().map(|b| b >> 4) == Some(4) {
        usize::from(reply[0] & 0x0F) * 4
    } else {
        0
    };

    let Some(icmp) = reply.get(offset..offset + 8) else {
        return false;
    };

    let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
    let reply_seq = u16::from_be_bytes([icmp[6], icmp[7]]);

    icmp[0] == kind.reply_type
        && reply_seq == sequence
        && identifier.map_or(true, |id| id == reply_id)
}

/// Build an echo request: 8 byte header and a 56 byte payload starting with
/// a timestamp.
fn build_echo_request(kind: &EchoKind, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];

    packet[0] = kind.request_type;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    packet[8..16].copy_from_slice(&timestamp.to_be_bytes());

    if kind.needs_checksum {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// Internet checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut chunks = data.chunks_exact(2);
    let mut sum: u32 = chunks
        .by_ref()
        .map(|pair| u32::from(u16::from_be_bytes([pair[0], pair[1]])))
        .sum();

    if let [odd] = chunks.remainder() {
        sum += u32::from(*odd) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Run ping via command execution (fallback).
async fn run_ping_command(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1);

    let child = Command::new("ping")
        .args(["-c", "1", "-W", &timeout_secs.to_string(), address])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    // ping enforces -W itself; the outer bound only guards against a hung process
    let output = tokio::time::timeout(timeout + Duration::from_secs(1), child)
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("timeout")
            || stdout.contains("100% packet loss")
            || stdout.contains("100.0% packet loss")
        {
            return Err(ProbeError::Timeout(timeout));
        }
        return Err(ProbeError::Command(format!("ping failed: {}{}", stdout.trim(), stderr.trim())));
    }

    parse_ping_output(&stdout)
}

/// Extract the round-trip time from `ping` output.
fn parse_ping_output(output: &str) -> Result<Duration, ProbeError> {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            // Per-packet "time=12.3 ms" (Linux, macOS)
            Regex::new(r"time[=<](?P<ms>[0-9.]+)\s*ms").expect("valid regex"),
            // Summary "rtt min/avg/max/mdev = ..." (Linux) or
            // "round-trip min/avg/max/stddev = ..." (macOS); uses the average
            Regex::new(r"(?:rtt|round-trip)\s+min/avg/max/(?:mdev|stddev)\s*=\s*[0-9.]+/(?P<ms>[0-9.]+)/")
                .expect("valid regex"),
        ]
    });

    patterns
        .iter()
        .filter_map(|re| re.captures(output))
        .filter_map(|caps| caps.name("ms")?.as_str().parse::<f64>().ok())
        .find(|ms| ms.is_finite() && *ms >= 0.0)
        .map(|ms| Duration::from_nanos((ms * 1_000_000.0).round() as u64))
        .ok_or_else(|| ProbeError::Command(format!("failed to parse ping output: {}", output)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icmp_checksum_verifies() {
        let packet = build_echo_request(&ECHO_V4, 0x1234, 0x0001);
        // Summing a packet that carries its own checksum folds to zero
        assert_eq!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_icmp_checksum_odd_length() {
        assert_eq!(icmp_checksum(&[0x01]), !0x0100u16);
    }

    #[test]
    fn test_build_echo_request_v4() {
        let packet = build_echo_request(&ECHO_V4, 0x1234, 0x0001);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);
        assert_eq!(packet[4..6], [0x12, 0x34]);
        assert_eq!(packet[6..8], [0x00, 0x01]);
    }

    #[test]
    fn test_build_echo_request_v6_leaves_checksum_to_kernel() {
        let packet = build_echo_request(&ECHO_V6, 0xBEEF, 7);
        assert_eq!(packet[0], 128);
        assert_eq!(packet[2..4], [0, 0]);
    }

    #[test]
    fn test_is_echo_reply_with_ip_header() {
        let mut reply = vec![0u8; 20 + 8];
        reply[0] = 0x45; // IPv4, IHL 5
        reply[20] = 0; // echo reply
        reply[24..26].copy_from_slice(&0x1234u16.to_be_bytes());
        reply[26..28].copy_from_slice(&9u16.to_be_bytes());

        assert!(is_echo_reply(&ECHO_V4, &reply, Some(0x1234), 9));
        assert!(!is_echo_reply(&ECHO_V4, &reply, Some(0x4321), 9));
        assert!(!is_echo_reply(&ECHO_V4, &reply, Some(0x1234), 10));
    }

    #[test]
    fn test_is_echo_reply_datagram_ignores_identifier() {
        let mut reply = vec![0u8; 8];
        reply[0] = 129;
        reply[4..6].copy_from_slice(&0x9999u16.to_be_bytes());
        reply[6..8].copy_from_slice(&3u16.to_be_bytes());

        assert!(is_echo_reply(&ECHO_V6, &reply, None, 3));
        assert!(!is_echo_reply(&ECHO_V6, &reply[..6], None, 3));
    }

    #[test]
    fn test_is_echo_reply_rejects_echo_request() {
        let packet = build_echo_request(&ECHO_V4, 1, 1);
        // Our own request looped back is type 8, not a reply
        assert!(!is_echo_reply(&ECHO_V4, &packet, Some(1), 1));
    }

    #[test]
    fn test_parse_ping_output_linux() {
        let output = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.345 ms";
        let rtt = parse_ping_output(output).unwrap();
        assert_eq!(rtt.as_micros(), 12_345);
    }

    #[test]
    fn test_parse_ping_output_macos_summary() {
        let output = r#"PING google.com (142.250.69.174): 56 data bytes

--- google.com ping statistics ---
1 packets transmitted, 1 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 17.906/17.906/17.906/0.000 ms"#;
        let rtt = parse_ping_output(output).unwrap();
        assert_eq!(rtt.as_micros(), 17_906);
    }

    #[test]
    fn test_parse_ping_output_linux_summary_prefers_packet_time() {
        let output = r#"PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.
64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.3 ms

--- 8.8.8.8 ping statistics ---
1 packets transmitted, 1 received, 0% packet loss, time 0ms
rtt min/avg/max/mdev = 12.500/12.500/12.500/0.000 ms"#;
        let rtt = parse_ping_output(output).unwrap();
        assert_eq!(rtt.as_micros(), 12_300);
    }

    #[test]
    fn test_parse_ping_output_garbage() {
        assert!(matches!(parse_ping_output("no reply"), Err(ProbeError::Command(_))));
    }

    #[tokio::test]
    async fn test_ping_rejects_option_like_address() {
        let result = run_ping_probe("-f", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ProbeError::Config(_))));
    }
}
