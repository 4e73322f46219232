//! Peer network addresses as carried in `version` and `addr` packets.

use bytes::BufMut;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::encoding::{DecodeResult, WireReader};

/// Service bits advertised in `version` and `addr`.
pub mod services {
    pub const NETWORK: u64 = 1 << 0;
    pub const GETUTXO: u64 = 1 << 1;
    pub const BLOOM: u64 = 1 << 2;
    pub const WITNESS: u64 = 1 << 3;
}

/// A peer address with advertised services and last-seen time.
///
/// The cached `hostname` (`ip:port` or `[ipv6]:port`) is kept in sync by
/// [`NetAddress::set_host`] and [`NetAddress::set_port`].
#[derive(Clone, PartialEq, Eq)]
pub struct NetAddress {
    host: IpAddr,
    port: u16,
    pub services: u64,
    pub ts: u32,
    hostname: String,
}

impl NetAddress {
    /// Wire size without the timestamp (inside `version`).
    pub const SIZE: usize = 26;
    /// Wire size with the timestamp (inside `addr`).
    pub const FULL_SIZE: usize = 30;

    pub fn new(host: IpAddr, port: u16, services: u64, ts: u32) -> Self {
        let host = normalize(host);
        Self {
            host,
            port,
            services,
            ts,
            hostname: SocketAddr::new(host, port).to_string(),
        }
    }

    pub fn from_socket(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port(), 0, 0)
    }

    /// Parse `ip`, `ip:port`, or `[ipv6]:port`, filling in `default_port`.
    pub fn parse(s: &str, default_port: u16) -> Option<Self> {
        let s = s.trim();
        if let Ok(sock) = s.parse::<SocketAddr>() {
            return Some(Self::from_socket(sock));
        }
        let bare = s.trim_start_matches('[').trim_end_matches(']');
        let ip = bare.parse::<IpAddr>().ok()?;
        Some(Self::new(ip, default_port, 0, 0))
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn set_host(&mut self, host: IpAddr) {
        self.host = normalize(host);
        self.hostname = self.socket_addr().to_string();
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
        self.hostname = self.socket_addr().to_string();
    }

    pub fn is_ipv4(&self) -> bool {
        self.host.is_ipv4()
    }

    pub fn is_null(&self) -> bool {
        self.host.is_unspecified()
    }

    pub fn is_valid(&self) -> bool {
        !self.is_null() && self.port != 0
    }

    pub fn is_routable(&self) -> bool {
        if !self.is_valid() {
            return false;
        }
        match self.host {
            IpAddr::V4(ip) => {
                !(ip.is_private()
                    || ip.is_loopback()
                    || ip.is_link_local()
                    || ip.is_broadcast()
                    || ip.is_documentation()
                    || ip.is_multicast()
                    || ip.octets()[0] == 0)
            }
            IpAddr::V6(ip) => {
                let seg = ip.segments();
                !(ip.is_loopback()
                    || ip.is_multicast()
                    || (seg[0] & 0xfe00) == 0xfc00
                    || (seg[0] & 0xffc0) == 0xfe80
                    || (seg[0] == 0x2001 && seg[1] == 0x0db8))
            }
        }
    }

    pub fn has_services(&self, mask: u64) -> bool {
        self.services & mask == mask
    }

    pub fn encode_into<B: BufMut>(&self, buf: &mut B, full: bool) {
        if full {
            buf.put_u32_le(self.ts);
        }
        buf.put_u64_le(self.services);
        let v6 = match self.host {
            IpAddr::V4(ip) => ip.to_ipv6_mapped(),
            IpAddr::V6(ip) => ip,
        };
        buf.put_slice(&v6.octets());
        buf.put_u16(self.port);
    }

    pub fn decode_from(r: &mut WireReader<'_>, full: bool) -> DecodeResult<Self> {
        let ts = if full { r.read_u32()? } else { 0 };
        let services = r.read_u64()?;
        let octets: [u8; 16] = r.read_array()?;
        let port = r.read_u16_be()?;
        Ok(Self::new(IpAddr::V6(Ipv6Addr::from(octets)), port, services, ts))
    }

    pub fn wire_size(full: bool) -> usize {
        if full {
            Self::FULL_SIZE
        } else {
            Self::SIZE
        }
    }
}

impl Default for NetAddress {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0, 0, 0)
    }
}

impl fmt::Debug for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetAddress")
            .field("hostname", &self.hostname)
            .field("services", &format_args!("{:#x}", self.services))
            .field("ts", &self.ts)
            .finish()
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hostname)
    }
}

fn normalize(host: IpAddr) -> IpAddr {
    match host {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}
