//! Optional PROXY protocol v1/v2 header consumption (spec §4.1, §6
//! `useProxyProtocol`). A small self-contained parser that, when enabled,
//! reads the header exactly once at the start of a connection before the
//! frame codec ever sees a byte — matching the spec's framing-layer
//! placement for this concern.

use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::net::TcpStream;

const V2_SIGNATURE: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];

#[derive(Debug, thiserror::Error)]
pub enum ProxyProtocolError {
    #[error("io error reading PROXY header: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed PROXY protocol header")]
    Malformed,
}

/// If `use_proxy_protocol` is enabled, consumes a v1 or v2 PROXY header from
/// the stream and returns the real client address it carries, if any.
/// Connections without a recognised header are left untouched and the
/// caller's own peer address is used instead — the header is optional even
/// when the feature is enabled, matching permissive proxy deployments.
pub async fn consume_if_present(
    read_half: &mut ReadHalf<TcpStream>,
) -> Result<Option<std::net::SocketAddr>, ProxyProtocolError> {
    // The v2 signature and a v1 minimal line ("PROXY UNKNOWN\r\n") are both
    // at least 12 bytes, so one fixed-size read safely identifies which (if
    // either) header is present without over-reading past the v2 header.
    let mut probe = [0u8; 12];
    let n = read_exact_or_eof(read_half, &mut probe).await?;
    if n == 12 && probe == V2_SIGNATURE {
        return parse_v2(read_half).await;
    }
    if n >= 5 && &probe[..5] == b"PROXY" {
        return parse_v1(read_half, &probe[..n]).await;
    }
    Ok(None)
}

async fn read_exact_or_eof(
    read_half: &mut ReadHalf<TcpStream>,
    buf: &mut [u8; 12],
) -> Result<usize, ProxyProtocolError> {
    let mut filled = 0;
    while filled < buf.len() {
        match read_half.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

async fn parse_v1(
    read_half: &mut ReadHalf<TcpStream>,
    already_read: &[u8],
) -> Result<Option<std::net::SocketAddr>, ProxyProtocolError> {
    // Continue the line already started by `already_read`, terminated by
    // CRLF, capped at the v1 spec's 107-byte max.
    let mut line = already_read.to_vec();
    let mut byte = [0u8; 1];
    while !line.ends_with(b"\n") {
        if line.len() > 107 {
            return Err(ProxyProtocolError::Malformed);
        }
        read_half.read_exact(&mut byte).await?;
        line.push(byte[0]);
    }
    let text = String::from_utf8_lossy(&line);
    let parts: Vec<&str> = text.trim_end_matches('\r').split_whitespace().collect();
    // parts: ["TCP4"|"TCP6"|"UNKNOWN", src_ip, dst_ip, src_port, dst_port]
    if parts.len() < 2 {
        return Ok(None);
    }
    if parts[0] == "UNKNOWN" {
        return Ok(None);
    }
    let Some(src_ip) = parts.get(1) else {
        return Ok(None);
    };
    let src_port: u16 = parts.get(3).and_then(|p| p.parse().ok()).unwrap_or(0);
    let ip: std::net::IpAddr = src_ip.parse().map_err(|_| ProxyProtocolError::Malformed)?;
    Ok(Some(std::net::SocketAddr::new(ip, src_port)))
}

async fn parse_v2(read_half: &mut ReadHalf<TcpStream>) -> Result<Option<std::net::SocketAddr>, ProxyProtocolError> {
    let mut header = [0u8; 4];
    read_half.read_exact(&mut header).await?;
    let version_command = header[0];
    let family_protocol = header[1];
    let len = u16::from_be_bytes([header[2], header[3]]) as usize;

    let mut addr_bytes = vec![0u8; len];
    read_half.read_exact(&mut addr_bytes).await?;

    if version_command >> 4 != 2 {
        return Err(ProxyProtocolError::Malformed);
    }
    // LOCAL command: no address carried, health-check style connection.
    if version_command & 0x0F == 0 {
        return Ok(None);
    }
    match family_protocol >> 4 {
        1 if addr_bytes.len() >= 12 => {
            let src = std::net::Ipv4Addr::new(addr_bytes[0], addr_bytes[1], addr_bytes[2], addr_bytes[3]);
            let src_port = u16::from_be_bytes([addr_bytes[8], addr_bytes[9]]);
            Ok(Some(std::net::SocketAddr::new(src.into(), src_port)))
        }
        2 if addr_bytes.len() >= 36 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&addr_bytes[..16]);
            let src = std::net::Ipv6Addr::from(octets);
            let src_port = u16::from_be_bytes([addr_bytes[32], addr_bytes[33]]);
            Ok(Some(std::net::SocketAddr::new(src.into(), src_port)))
        }
        _ => Ok(None),
    }
}
