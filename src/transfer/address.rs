//! Module `address`
//!
//! The `h1,h2,h3,h4,p1,p2` host/port tuple carried by PORT commands and
//! 227 replies.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

use crate::error::FtpError;
use crate::protocol::Reply;

/// An IPv4 address and port as exchanged in a data-channel handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostPort {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl HostPort {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Builds a tuple for a local socket address.
    ///
    /// Only a concrete IPv4 address (or an IPv4-mapped IPv6 one) is usable.
    pub fn from_socket_addr(addr: SocketAddr) -> Result<Self, FtpError> {
        let ip = first_usable_ipv4(&[addr.ip()])?;
        Ok(Self::new(ip, addr.port()))
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }

    /// Encodes as `h1,h2,h3,h4,p1,p2` with `port == p1 * 256 + p2`.
    pub fn encode(&self) -> String {
        let [h1, h2, h3, h4] = self.ip.octets();
        format!(
            "{},{},{},{},{},{}",
            h1,
            h2,
            h3,
            h4,
            self.port >> 8,
            self.port & 0xff
        )
    }

    /// Decodes a tuple, tolerating one delimiter character on either side
    /// (as in `(127,0,0,1,200,0)`).
    pub fn decode(raw: &str) -> Result<Self, FtpError> {
        let mut tuple = raw.trim();
        if tuple.starts_with(|c: char| !c.is_ascii_digit()) {
            tuple = &tuple[tuple.chars().next().map_or(0, char::len_utf8)..];
        }
        if tuple.ends_with(|c: char| !c.is_ascii_digit()) {
            tuple = &tuple[..tuple.len() - tuple.chars().last().map_or(0, char::len_utf8)];
        }

        let tokens: Vec<&str> = tuple.split(',').map(str::trim).collect();
        if tokens.len() != 6 {
            return Err(FtpError::MalformedAddressTuple(format!(
                "expected 6 components in {:?}, found {}",
                raw,
                tokens.len()
            )));
        }

        let mut values = [0u8; 6];
        for (value, token) in values.iter_mut().zip(&tokens) {
            *value = parse_component(token).ok_or_else(|| {
                FtpError::MalformedAddressTuple(format!(
                    "component {:?} in {:?} is not a number in 0..=255",
                    token, raw
                ))
            })?;
        }

        let ip = Ipv4Addr::new(values[0], values[1], values[2], values[3]);
        let port = u16::from(values[4]) * 256 + u16::from(values[5]);
        Ok(Self::new(ip, port))
    }

    /// Locates and decodes the tuple in a `227` reply text.
    pub fn from_passive_reply(reply: &Reply) -> Result<Self, FtpError> {
        let text = reply.text();
        if let Some(open) = text.find('(') {
            if let Some(len) = text[open..].find(')') {
                return Self::decode(&text[open..=open + len]);
            }
        }

        let start = text.find(|c: char| c.is_ascii_digit()).ok_or_else(|| {
            FtpError::MalformedAddressTuple(format!("no address tuple in {:?}", text))
        })?;
        let end = text[start..]
            .find(|c: char| !(c.is_ascii_digit() || c == ','))
            .map_or(text.len(), |offset| start + offset);
        Self::decode(&text[start..end])
    }
}

fn parse_component(token: &str) -> Option<u8> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse::<u16>().ok().and_then(|v| u8::try_from(v).ok())
}

/// Picks the first concrete IPv4 address among `candidates`.
pub fn first_usable_ipv4(candidates: &[IpAddr]) -> Result<Ipv4Addr, FtpError> {
    candidates
        .iter()
        .filter_map(|ip| match ip {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(v6) => v6.to_ipv4_mapped(),
        })
        .find(|v4| !v4.is_unspecified() && !v4.is_broadcast())
        .ok_or_else(|| {
            FtpError::MalformedAddressTuple(format!(
                "no usable IPv4 address among {:?}",
                candidates
            ))
        })
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for HostPort {
    type Err = FtpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}
