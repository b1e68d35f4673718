//! Address classification
//!
//! Turns request text into the raw key bytes stored in a set, together with
//! the address family that selects which set (`<prefix>4` / `<prefix>6`)
//! receives it.

use crate::core::error::{Error, Result};
use crate::core::ruleset::KeyType;
use std::net::IpAddr;

/// Address family of a set element.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::AsRefStr,
)]
pub enum Family {
    #[strum(serialize = "ipv4")]
    Ipv4,
    #[strum(serialize = "ipv6")]
    Ipv6,
}

impl Family {
    /// Suffix appended to a set prefix to name the per-family set.
    pub const fn suffix(self) -> &'static str {
        match self {
            Family::Ipv4 => "4",
            Family::Ipv6 => "6",
        }
    }

    /// Width in bytes of an element key.
    pub const fn key_len(self) -> usize {
        match self {
            Family::Ipv4 => 4,
            Family::Ipv6 => 16,
        }
    }

    /// nftables element type for sets holding this family.
    pub fn key_type(self) -> KeyType {
        match self {
            Family::Ipv4 => KeyType::Ipv4Addr,
            Family::Ipv6 => KeyType::Ipv6Addr,
        }
    }

    /// Full set name for `prefix`, e.g. `myset` + ipv4 → `myset4`.
    pub fn set_name(self, prefix: &str) -> String {
        format!("{prefix}{}", self.suffix())
    }

    /// Family implied by a fully-qualified set name's suffix.
    pub fn from_set_name(name: &str) -> Option<Self> {
        if name.len() < 2 {
            return None;
        }
        match name.as_bytes().last() {
            Some(b'4') => Some(Family::Ipv4),
            Some(b'6') => Some(Family::Ipv6),
            _ => None,
        }
    }
}

/// A classified address: raw key bytes and family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub ip: IpAddr,
    pub family: Family,
    pub key: Vec<u8>,
}

/// Parses `text` as an IP literal and determines its family.
///
/// The parser's own family tag decides; the separator scan only has to agree
/// with it. A literal that parses but shows neither `.` nor `:` yields
/// `UnknownFamily`.
pub fn classify(text: &str) -> Result<Address> {
    let ip: IpAddr = text
        .parse()
        .map_err(|_| Error::InvalidAddress(text.to_string()))?;

    let family = match (ip, separator_family(text)) {
        (IpAddr::V4(_), Some(Family::Ipv4)) => Family::Ipv4,
        // IPv4-mapped and -compatible forms (::ffff:1.2.3.4) contain both
        // separators; the parser is authoritative
        (IpAddr::V6(_), Some(_)) => Family::Ipv6,
        _ => return Err(Error::UnknownFamily(text.to_string())),
    };

    let key = match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    };

    Ok(Address { ip, family, key })
}

/// Family from the first separator character in the literal.
fn separator_family(text: &str) -> Option<Family> {
    text.chars().find_map(|c| match c {
        '.' => Some(Family::Ipv4),
        ':' => Some(Family::Ipv6),
        _ => None,
    })
}
