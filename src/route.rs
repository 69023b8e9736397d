//! BGP route NLRI and the route records handed to the application
//!
//! The wire structures do not contain information about the address family of
//! the route as they correspond to BGP's NLRI fields. To determine the address
//! family, the caller must know the context (BGP.nlri, MP_REACH_NLRI, etc).

// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::capability::Afi;
use crate::cidr::{Cidr, Cidr4, Cidr6};
use crate::endec::Component;
use crate::ensure_len;
use crate::path::{AsPath, Origin};
use bytes::{Buf, BufMut, Bytes};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::ops::Deref;

/// Compute the number of prefix octets from the prefix length
fn n_prefix_octets(prefix_len: u8) -> usize {
    #[allow(clippy::verbose_bit_mask)]
    let result = if prefix_len & 0x07 == 0 {
        prefix_len >> 3
    } else {
        (prefix_len >> 3) + 1
    };
    usize::from(result)
}

/// BGP route CIDR blocks
///
/// Corresponding to a compact representation of a u8 prefix length and the
/// minimum number of octets to represent the prefix.
#[derive(Clone, Debug, PartialEq)]
pub struct Value {
    pub prefix_len: u8,
    pub prefix: Bytes,
}

impl Value {
    /// Interpret the block in the address family given by the surrounding
    /// message context, zeroing any host bits the peer left set.
    pub fn to_cidr(&self, afi: Afi) -> Result<Cidr, crate::Error> {
        match afi {
            Afi::Ipv4 => {
                if self.prefix_len > 32 {
                    return Err(crate::Error::OverlongPrefix(self.prefix_len));
                }
                let mut octets = [0u8; 4];
                octets[..self.prefix.len()].copy_from_slice(&self.prefix);
                Ok(Cidr4::new(Ipv4Addr::from(octets), self.prefix_len).masked().into())
            }
            Afi::Ipv6 => {
                if self.prefix_len > 128 {
                    return Err(crate::Error::OverlongPrefix(self.prefix_len));
                }
                let mut octets = [0u8; 16];
                octets[..self.prefix.len()].copy_from_slice(&self.prefix);
                Ok(Cidr6::new(Ipv6Addr::from(octets), self.prefix_len).masked().into())
            }
        }
    }
}

/// BGP routes
///
/// Corresponding to a compact list of CIDR blocks without a length field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Routes(pub Vec<Value>);

impl Component for Routes {
    fn from_bytes(src: &mut bytes::Bytes) -> Result<Self, crate::Error> {
        let mut routes = Vec::new();
        while src.has_remaining() {
            let prefix_len = src.get_u8();
            if prefix_len > 128 {
                return Err(crate::Error::OverlongPrefix(prefix_len));
            }
            let n_prefix_octets = n_prefix_octets(prefix_len);
            ensure_len!(src, n_prefix_octets, "NLRI prefix");
            let prefix = src.split_to(n_prefix_octets);
            routes.push(Value { prefix_len, prefix });
        }
        Ok(Self(routes))
    }

    fn to_bytes(self, dst: &mut bytes::BytesMut) -> usize {
        let mut len = 0;
        for route in self.0 {
            dst.put_u8(route.prefix_len);
            dst.put_slice(&route.prefix);
            len += 1 + route.prefix.len();
        }
        len
    }

    fn encoded_len(&self) -> usize {
        self.0.iter().map(|r| 1 + r.prefix.len()).sum()
    }
}

impl Deref for Routes {
    type Target = Vec<Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<I, T> From<I> for Routes
where
    I: IntoIterator<Item = T>,
    T: Into<Value>,
{
    fn from(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl From<Cidr4> for Value {
    fn from(cidr: Cidr4) -> Self {
        let prefix_len = cidr.prefix_len;
        let n_prefix_octets = n_prefix_octets(prefix_len);
        let prefix = Bytes::copy_from_slice(&cidr.addr.octets()[..n_prefix_octets]);
        Self { prefix_len, prefix }
    }
}

impl From<Cidr6> for Value {
    fn from(cidr: Cidr6) -> Self {
        let prefix_len = cidr.prefix_len;
        let n_prefix_octets = n_prefix_octets(prefix_len);
        let prefix = Bytes::copy_from_slice(&cidr.addr.octets()[..n_prefix_octets]);
        Self { prefix_len, prefix }
    }
}

impl From<Cidr> for Value {
    fn from(cidr: Cidr) -> Self {
        match cidr {
            Cidr::V4(cidr) => cidr.into(),
            Cidr::V6(cidr) => cidr.into(),
        }
    }
}

/// A route learned or advertised, with the attributes that accompany it
#[derive(Clone, Debug, PartialEq)]
pub struct RouteAddition {
    pub prefix: Cidr,
    pub next_hop: IpAddr,
    pub as_path: AsPath,
    pub origin: Origin,
}

impl fmt::Display for RouteAddition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} via {} ({:?}) {:?}",
            self.prefix, self.next_hop, self.as_path, self.origin
        )
    }
}

/// A route the peer no longer reaches
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RouteRemoval {
    pub prefix: Cidr,
}

impl fmt::Display for RouteRemoval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix)
    }
}

/// What the session hands to the route consumer
#[derive(Clone, Debug, PartialEq)]
pub enum RouteUpdate {
    Addition(RouteAddition),
    Removal(RouteRemoval),
}
