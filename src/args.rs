//! Command line arguments parsing.

// SPDX-License-Identifier: AGPL-3.0-or-later

use clap::Parser;
use minibgp::cidr::Cidr;
use std::net::{IpAddr, Ipv4Addr};

#[derive(Parser, Debug)]
#[command(name = "minibgpd", version, about)]
pub struct MiniBgpd {
    /// Our AS number
    pub local_as: u16,
    /// AS number the neighbor is expected to announce
    pub peer_as: u16,
    /// Our BGP router ID
    pub router_id: Ipv4Addr,
    /// Local address of the session; selects the advertised address family
    pub local_addr: IpAddr,
    /// Neighbor address, same family as the local address
    pub neighbor: IpAddr,
    /// Hold time in seconds; the keepalive interval is a third of it
    #[arg(long, default_value = "240")]
    pub hold_time: u16,
    /// BGP session listen address
    #[arg(short = 'l', long, default_value = "::")]
    pub listen_addr: IpAddr,
    /// BGP session listen port
    #[arg(short = 'p', long, default_value = "179")]
    pub listen_port: u16,
    /// Prefix to advertise once the session is established (repeatable)
    ///
    /// Advertised with the local address as the next hop, our AS as the
    /// path, and origin IGP.
    #[arg(short = 'a', long = "advertise")]
    pub advertise: Vec<Cidr>,
    /// Verbose mode
    #[arg(short = 'v', long)]
    pub verbose: bool,
}
