//! Simple CIDR block representation

// SPDX-License-Identifier: AGPL-3.0-or-later

#![allow(clippy::module_name_repetitions)]

use crate::capability::Afi;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Errors from parsing the `address/length` text form
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseCidrError {
    #[error("missing '/' separator")]
    MissingSlash,
    #[error("invalid address")]
    Address,
    #[error("invalid prefix length")]
    Length,
    #[error("prefix length {0} exceeds address width")]
    Overlong(u8),
}

/// A IPv4 CIDR block
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "impl-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cidr4 {
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
}

impl fmt::Display for Cidr4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl Cidr4 {
    #[must_use]
    pub const fn new(addr: Ipv4Addr, prefix_len: u8) -> Self {
        Self { addr, prefix_len }
    }

    /// Zero the host bits beyond the prefix length
    #[must_use]
    pub fn masked(self) -> Self {
        let mask = if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix_len))
        };
        Self::new(Ipv4Addr::from(u32::from(self.addr) & mask), self.prefix_len)
    }
}

/// A IPv6 CIDR block
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "impl-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cidr6 {
    pub addr: Ipv6Addr,
    pub prefix_len: u8,
}

impl fmt::Display for Cidr6 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl Cidr6 {
    #[must_use]
    pub const fn new(addr: Ipv6Addr, prefix_len: u8) -> Self {
        Self { addr, prefix_len }
    }

    /// Zero the host bits beyond the prefix length
    #[must_use]
    pub fn masked(self) -> Self {
        let mask = if self.prefix_len == 0 {
            0
        } else {
            u128::MAX << (128 - u32::from(self.prefix_len))
        };
        Self::new(Ipv6Addr::from(u128::from(self.addr) & mask), self.prefix_len)
    }
}

/// A CIDR block
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "impl-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Cidr {
    V4(Cidr4),
    V6(Cidr6),
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4(cidr) => write!(f, "{cidr}"),
            Self::V6(cidr) => write!(f, "{cidr}"),
        }
    }
}

impl Cidr {
    #[must_use]
    pub const fn into_parts(self) -> (IpAddr, u8) {
        match self {
            Self::V4(cidr) => (IpAddr::V4(cidr.addr), cidr.prefix_len),
            Self::V6(cidr) => (IpAddr::V6(cidr.addr), cidr.prefix_len),
        }
    }

    /// Address family of the block
    #[must_use]
    pub const fn family(&self) -> Afi {
        match self {
            Self::V4(_) => Afi::Ipv4,
            Self::V6(_) => Afi::Ipv6,
        }
    }

    /// Zero the host bits beyond the prefix length
    #[must_use]
    pub fn masked(self) -> Self {
        match self {
            Self::V4(cidr) => Self::V4(cidr.masked()),
            Self::V6(cidr) => Self::V6(cidr.masked()),
        }
    }
}

impl FromStr for Cidr {
    type Err = ParseCidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s.split_once('/').ok_or(ParseCidrError::MissingSlash)?;
        let prefix_len: u8 = len.parse().map_err(|_| ParseCidrError::Length)?;
        let addr: IpAddr = addr.parse().map_err(|_| ParseCidrError::Address)?;
        match addr {
            IpAddr::V4(_) if prefix_len > 32 => Err(ParseCidrError::Overlong(prefix_len)),
            IpAddr::V6(_) if prefix_len > 128 => Err(ParseCidrError::Overlong(prefix_len)),
            IpAddr::V4(addr) => Ok(Self::V4(Cidr4::new(addr, prefix_len))),
            IpAddr::V6(addr) => Ok(Self::V6(Cidr6::new(addr, prefix_len))),
        }
    }
}

impl From<Cidr4> for Cidr {
    fn from(cidr: Cidr4) -> Self {
        Self::V4(cidr)
    }
}

impl From<Cidr6> for Cidr {
    fn from(cidr: Cidr6) -> Self {
        Self::V6(cidr)
    }
}
