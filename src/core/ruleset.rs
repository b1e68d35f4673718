//! Kernel object model: tables, sets and set elements as read from nftables.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// nftables table family.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TableFamily {
    Ip,
    Ip6,
    Inet,
    Arp,
    Bridge,
    Netdev,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub family: TableFamily,
    pub name: String,
    /// Kernel handle; `None` for tables not read back from the kernel
    pub handle: Option<u64>,
}

impl Table {
    pub fn new(family: TableFamily, name: impl Into<String>) -> Self {
        Self {
            family,
            name: name.into(),
            handle: None,
        }
    }
}

/// Element type of a set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyType {
    Ipv4Addr,
    Ipv6Addr,
    /// Any other nft type, kept verbatim (e.g. `inet_service`, concatenations)
    Other(String),
}

impl KeyType {
    pub fn parse(s: &str) -> Self {
        match s {
            "ipv4_addr" => KeyType::Ipv4Addr,
            "ipv6_addr" => KeyType::Ipv6Addr,
            other => KeyType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            KeyType::Ipv4Addr => "ipv4_addr",
            KeyType::Ipv6Addr => "ipv6_addr",
            KeyType::Other(s) => s,
        }
    }

    /// Byte width of keys of this type, when it is an address type.
    pub const fn key_len(&self) -> Option<usize> {
        match self {
            KeyType::Ipv4Addr => Some(4),
            KeyType::Ipv6Addr => Some(16),
            KeyType::Other(_) => None,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Set {
    pub table: Table,
    pub name: String,
    pub key_type: KeyType,
    pub flags: Vec<String>,
    /// Kernel handle; `None` while the set only exists in a pending transaction
    pub handle: Option<u64>,
}

impl Set {
    /// A set that has not been committed yet.
    pub fn staged(table: Table, name: impl Into<String>, key_type: KeyType) -> Self {
        Self {
            table,
            name: name.into(),
            key_type,
            flags: Vec::new(),
            handle: None,
        }
    }

    pub fn is_staged(&self) -> bool {
        self.handle.is_none()
    }
}

/// One set element, identified by its raw key bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Element {
    pub key: Vec<u8>,
}

impl Element {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    pub fn from_ip(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Self::new(v4.octets()),
            IpAddr::V6(v6) => Self::new(v6.octets()),
        }
    }
}

/// 4-byte keys become IPv4, 16-byte keys IPv6; anything else has no address form.
pub fn key_to_ip(key: &[u8]) -> Option<IpAddr> {
    if let Ok(octets) = <[u8; 4]>::try_from(key) {
        return Some(IpAddr::V4(Ipv4Addr::from(octets)));
    }
    if let Ok(octets) = <[u8; 16]>::try_from(key) {
        return Some(IpAddr::V6(Ipv6Addr::from(octets)));
    }
    None
}
