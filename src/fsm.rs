//! Per-peer BGP session state machine
//!
//! The machine is single-threaded: the driver delivers one event at a time
//! together with a monotonic tick in seconds, and every mutation happens
//! inside [`Fsm::event`]. Messages for the peer and route updates for the
//! application leave through two bounded queues; the only suspension points
//! are the sends into those queues.

// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::capability::{Afi, CapabilitiesBuilder, OptionalParameterValue, OptionalParameters, Safi};
use crate::path::{self, AsPath, Flags, MpReachNlri, MpUnreachNlri, Origin, PathAttributes};
use crate::route::{RouteAddition, RouteRemoval, RouteUpdate, Routes};
use crate::{
    Message, Notification, NotificationErrorCode, Open, Update, UpdateMessageErrorSubcode,
};
use bytes::Bytes;
use std::net::{IpAddr, Ipv4Addr};
use tokio::sync::mpsc;

/// RFC 4271 suggests 90 seconds; BIRD and friends commonly run 240
pub const DEFAULT_HOLD_TIME: u16 = 240;

/// Depth of the output message and route update queues
const QUEUE_DEPTH: usize = 64;

/// Errors from session parameters that can never form a valid session
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("local address and neighbor are different address families")]
    FamilyMismatch,
}

/// Construction parameters for one peer session
#[derive(Clone, Debug)]
pub struct PeerConfig {
    pub local_as: u16,
    pub peer_as: u16,
    pub router_id: Ipv4Addr,
    pub local_addr: IpAddr,
    pub neighbor: IpAddr,
    pub hold_time: u16,
}

/// Session states
///
/// The machine starts in `Active` (the transport is already connected when it
/// is created) and `Idle` is terminal: an idle machine ignores every event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Active,
    OpenConfirm,
    Established,
    Idle,
}

/// What the driver feeds the machine
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Message(Message),
    TimerExpired,
    Shutdown,
}

/// The per-peer session state machine
#[derive(Debug)]
pub struct Fsm {
    local_as: u16,
    peer_as: u16,
    router_id: Ipv4Addr,
    local_addr: IpAddr,
    neighbor: IpAddr,
    hold_time: u16,
    keepalive_time: u16,
    hold: Option<u64>,
    keepalive: Option<u64>,
    routes_to_advertise: Vec<RouteAddition>,
    state: State,
    output_messages: mpsc::Sender<Message>,
    route_updates: mpsc::Sender<RouteUpdate>,
}

impl Fsm {
    /// Create a machine for a connected transport.
    ///
    /// Returns the machine together with the consuming halves of its two
    /// queues: messages to encode for the peer, and route updates for the
    /// application.
    pub fn new(
        config: PeerConfig,
    ) -> Result<(Self, mpsc::Receiver<Message>, mpsc::Receiver<RouteUpdate>), ConfigError> {
        if config.local_addr.is_ipv4() != config.neighbor.is_ipv4() {
            return Err(ConfigError::FamilyMismatch);
        }
        let (output_messages, output_rx) = mpsc::channel(QUEUE_DEPTH);
        let (route_updates, route_rx) = mpsc::channel(QUEUE_DEPTH);
        Ok((
            Self {
                local_as: config.local_as,
                peer_as: config.peer_as,
                router_id: config.router_id,
                local_addr: config.local_addr,
                neighbor: config.neighbor,
                hold_time: config.hold_time,
                keepalive_time: config.hold_time / 3,
                hold: None,
                keepalive: None,
                routes_to_advertise: Vec::new(),
                state: State::Active,
                output_messages,
                route_updates,
            },
            output_rx,
            route_rx,
        ))
    }

    /// Queue a route for advertisement once the session establishes.
    ///
    /// Must happen before the first event; later additions are not announced.
    pub fn advertise(&mut self, route: RouteAddition) {
        self.routes_to_advertise.push(route);
    }

    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub const fn neighbor(&self) -> IpAddr {
        self.neighbor
    }

    /// Deliver one event to the machine.
    ///
    /// `tick` is a monotonic second count; events must arrive in tick order.
    pub async fn event(&mut self, event: Event, tick: u64) {
        if self.state == State::Idle {
            return;
        }
        match event {
            Event::TimerExpired => self.handle_timers(tick).await,
            Event::Message(message) => self.handle_message(message, tick).await,
            Event::Shutdown => self.handle_shutdown().await,
        }
    }

    async fn handle_shutdown(&mut self) {
        if matches!(self.state, State::OpenConfirm | State::Established) {
            self.notify(NotificationErrorCode::Cease, 0).await;
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        log::info!("session with {} is now idle", self.neighbor);
        self.state = State::Idle;
    }

    async fn handle_timers(&mut self, tick: u64) {
        if !matches!(self.state, State::OpenConfirm | State::Established) {
            return;
        }
        match (self.hold, self.keepalive) {
            (Some(hold), _) if hold + u64::from(self.hold_time) <= tick => {
                log::warn!("hold timer expired for {}", self.neighbor);
                self.notify(NotificationErrorCode::HoldTimerExpired, 0).await;
                self.shutdown();
            }
            (_, Some(keepalive)) if keepalive + u64::from(self.keepalive_time) <= tick => {
                self.keepalive = Some(tick);
                self.emit(Message::Keepalive).await;
            }
            _ => {}
        }
    }

    async fn handle_message(&mut self, message: Message, tick: u64) {
        match self.state {
            State::Active => self.on_message_active(message, tick).await,
            State::OpenConfirm => self.on_message_open_confirm(message, tick).await,
            State::Established => self.on_message_established(message, tick).await,
            State::Idle => {}
        }
    }

    async fn on_message_active(&mut self, message: Message, tick: u64) {
        if let Message::Open(open) = message {
            log::info!(
                "received OPEN from {} (ASN {}, BGP ID {})",
                self.neighbor,
                open.asn,
                open.bgp_id
            );
            if open.asn != self.peer_as {
                log::warn!(
                    "peer announced ASN {} but {} is configured",
                    open.asn,
                    self.peer_as
                );
            }
            self.check_peer_capabilities(&open.opt_params);
            let capabilities = CapabilitiesBuilder::new()
                .multi_protocol(self.local_afi(), Safi::Unicast)
                .build();
            let open = Open::new(self.local_as, self.hold_time, self.router_id, capabilities);
            self.emit(Message::Open(open)).await;
            self.emit(Message::Keepalive).await;
            self.hold = Some(tick);
            self.keepalive = Some(tick);
            self.state = State::OpenConfirm;
        } else {
            // The session was never confirmed, so no NOTIFICATION is owed
            log::warn!("expected OPEN from {}, tearing down", self.neighbor);
            self.shutdown();
        }
    }

    async fn on_message_open_confirm(&mut self, message: Message, tick: u64) {
        match message {
            Message::Keepalive => {
                for update in self.build_updates() {
                    self.emit(Message::Update(update)).await;
                }
                self.hold = Some(tick);
                self.state = State::Established;
                log::info!("session with {} established", self.neighbor);
            }
            Message::Notification(notification) => {
                log::warn!(
                    "received NOTIFICATION from {}: {:?}({})",
                    self.neighbor,
                    notification.error_code,
                    notification.error_subcode
                );
                self.shutdown();
            }
            Message::Open(_) => {
                self.notify(NotificationErrorCode::Cease, 0).await;
                self.shutdown();
            }
            Message::Update(_) => {
                self.notify(NotificationErrorCode::FiniteStateMachineError, 0)
                    .await;
                self.shutdown();
            }
        }
    }

    async fn on_message_established(&mut self, message: Message, tick: u64) {
        match message {
            Message::Update(update) => {
                // RFC 4271 4.4: any message from the peer proves liveness
                self.hold = Some(tick);
                self.process_route_update(update).await;
            }
            Message::Keepalive => {
                self.hold = Some(tick);
            }
            Message::Notification(notification) => {
                log::warn!(
                    "received NOTIFICATION from {}: {:?}({})",
                    self.neighbor,
                    notification.error_code,
                    notification.error_subcode
                );
                self.shutdown();
            }
            Message::Open(_) => {
                self.notify(NotificationErrorCode::Cease, 0).await;
                self.shutdown();
            }
        }
    }

    async fn process_route_update(&mut self, update: Update) {
        match Self::route_events(update) {
            Ok(events) => {
                for event in events {
                    if self.route_updates.send(event).await.is_err() {
                        log::debug!("route update queue closed, dropping update");
                        return;
                    }
                }
            }
            Err(e) => {
                log::warn!("malformed UPDATE from {}: {e}", self.neighbor);
                self.notify(
                    NotificationErrorCode::UpdateMessageError,
                    UpdateMessageErrorSubcode::MissingWellKnownAttribute as u8,
                )
                .await;
                self.shutdown();
            }
        }
    }

    /// Turn one received UPDATE into ordered route events: plain additions,
    /// MP additions, plain withdrawals, MP withdrawals.
    fn route_events(update: Update) -> Result<Vec<RouteUpdate>, crate::Error> {
        let mut origin = None;
        let mut as_path = None;
        let mut next_hop = None;
        let mut mp_reach: Option<MpReachNlri> = None;
        let mut mp_unreach: Option<MpUnreachNlri> = None;
        for attribute in update.path_attributes.0 {
            match attribute.data {
                path::Data::Origin(value) => origin = Some(value),
                path::Data::AsPath(value) => as_path = Some(value),
                path::Data::NextHop(value) => next_hop = Some(value),
                path::Data::MpReachNlri(value) => mp_reach = Some(value),
                path::Data::MpUnreachNlri(value) => mp_unreach = Some(value),
                path::Data::Unsupported(type_, _) => {
                    log::trace!("ignoring path attribute of type {type_}");
                }
            }
        }
        let mut events = Vec::new();
        if !update.nlri.is_empty() {
            let origin = origin.ok_or(crate::Error::MissingAttribute("ORIGIN"))?;
            let as_path = as_path
                .clone()
                .ok_or(crate::Error::MissingAttribute("AS_PATH"))?;
            let next_hop = next_hop.ok_or(crate::Error::MissingAttribute("NEXT_HOP"))?;
            for value in &update.nlri.0 {
                events.push(RouteUpdate::Addition(RouteAddition {
                    prefix: value.to_cidr(Afi::Ipv4)?,
                    next_hop: IpAddr::V4(next_hop),
                    as_path: as_path.clone(),
                    origin,
                }));
            }
        }
        if let Some(mp_reach) = mp_reach {
            let origin = origin.ok_or(crate::Error::MissingAttribute("ORIGIN"))?;
            let as_path = as_path.ok_or(crate::Error::MissingAttribute("AS_PATH"))?;
            for value in &mp_reach.nlri.0 {
                events.push(RouteUpdate::Addition(RouteAddition {
                    prefix: value.to_cidr(mp_reach.afi)?,
                    next_hop: mp_reach.next_hop.addr(),
                    as_path: as_path.clone(),
                    origin,
                }));
            }
        }
        for value in &update.withdrawn_routes.0 {
            events.push(RouteUpdate::Removal(RouteRemoval {
                prefix: value.to_cidr(Afi::Ipv4)?,
            }));
        }
        if let Some(mp_unreach) = mp_unreach {
            for value in &mp_unreach.withdrawn_routes.0 {
                events.push(RouteUpdate::Removal(RouteRemoval {
                    prefix: value.to_cidr(mp_unreach.afi)?,
                }));
            }
        }
        Ok(events)
    }

    /// Pack the queued advertisements into UPDATE messages, one per distinct
    /// (next hop, AS path, origin) tuple. Only IPv4 additions are announced.
    fn build_updates(&self) -> Vec<Update> {
        let mut keys: Vec<(Ipv4Addr, AsPath, Origin)> = Vec::new();
        let mut groups: Vec<Routes> = Vec::new();
        for route in &self.routes_to_advertise {
            let (crate::cidr::Cidr::V4(prefix), IpAddr::V4(next_hop)) =
                (route.prefix, route.next_hop)
            else {
                log::warn!("not announcing non-IPv4 route {}", route.prefix);
                continue;
            };
            let key = (next_hop, route.as_path.clone(), route.origin);
            let index = match keys.iter().position(|k| *k == key) {
                Some(index) => index,
                None => {
                    keys.push(key);
                    groups.push(Routes::default());
                    keys.len() - 1
                }
            };
            groups[index].0.push(prefix.into());
        }
        keys.into_iter()
            .zip(groups)
            .map(|((next_hop, as_path, origin), nlri)| Update {
                withdrawn_routes: Routes::default(),
                path_attributes: PathAttributes(vec![
                    path::Value {
                        flags: Flags::WELL_KNOWN_COMPLETE,
                        data: path::Data::Origin(origin),
                    },
                    path::Value {
                        flags: Flags::WELL_KNOWN_COMPLETE,
                        data: path::Data::AsPath(as_path),
                    },
                    path::Value {
                        flags: Flags::WELL_KNOWN_COMPLETE,
                        data: path::Data::NextHop(next_hop),
                    },
                ]),
                nlri,
            })
            .collect()
    }

    fn check_peer_capabilities(&self, opt_params: &OptionalParameters) {
        let wanted = self.local_afi();
        let supported = opt_params.iter().any(|param| {
            if let OptionalParameterValue::Capabilities(caps) = param {
                log::debug!("peer advertised capabilities: {caps:?}");
                match wanted {
                    Afi::Ipv4 => caps.has_mp_ipv4_unicast(),
                    Afi::Ipv6 => caps.has_mp_ipv6_unicast(),
                }
            } else {
                false
            }
        });
        if !supported {
            log::warn!(
                "peer did not advertise the multiprotocol capability for {wanted:?} unicast"
            );
        }
    }

    const fn local_afi(&self) -> Afi {
        match self.local_addr {
            IpAddr::V4(_) => Afi::Ipv4,
            IpAddr::V6(_) => Afi::Ipv6,
        }
    }

    async fn notify(&mut self, error_code: NotificationErrorCode, error_subcode: u8) {
        self.emit(Message::Notification(Notification::new(
            error_code,
            error_subcode,
            Bytes::new(),
        )))
        .await;
    }

    async fn emit(&mut self, message: Message) {
        if self.output_messages.send(message).await.is_err() {
            log::debug!("output queue closed, dropping message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cidr::Cidr;
    use crate::path::MpNextHop;
    use crate::route::Value as RouteValue;

    fn config() -> PeerConfig {
        PeerConfig {
            local_as: 65001,
            peer_as: 65002,
            router_id: Ipv4Addr::new(1, 1, 1, 1),
            local_addr: "10.0.0.1".parse().unwrap(),
            neighbor: "10.0.0.2".parse().unwrap(),
            hold_time: DEFAULT_HOLD_TIME,
        }
    }

    fn peer_open() -> Message {
        Message::Open(Open::new(
            65002,
            240,
            Ipv4Addr::new(2, 2, 2, 2),
            CapabilitiesBuilder::new().mp_ipv4_unicast().build(),
        ))
    }

    fn addition(prefix: &str) -> RouteAddition {
        RouteAddition {
            prefix: prefix.parse().unwrap(),
            next_hop: "10.0.0.1".parse().unwrap(),
            as_path: AsPath::sequence(vec![65001]),
            origin: Origin::Igp,
        }
    }

    /// ORIGIN + AS_PATH + NEXT_HOP, the mandatory trio for plain NLRI
    fn mandatory_attrs(next_hop: Ipv4Addr, asns: Vec<u16>, origin: Origin) -> PathAttributes {
        PathAttributes(vec![
            path::Value {
                flags: Flags::WELL_KNOWN_COMPLETE,
                data: path::Data::Origin(origin),
            },
            path::Value {
                flags: Flags::WELL_KNOWN_COMPLETE,
                data: path::Data::AsPath(AsPath::sequence(asns)),
            },
            path::Value {
                flags: Flags::WELL_KNOWN_COMPLETE,
                data: path::Data::NextHop(next_hop),
            },
        ])
    }

    fn nlri(prefixes: &[&str]) -> Routes {
        Routes(
            prefixes
                .iter()
                .map(|p| RouteValue::from(p.parse::<Cidr>().unwrap()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_active_open_to_open_confirm() {
        let (mut fsm, mut out, _routes) = Fsm::new(config()).unwrap();
        fsm.event(Event::Message(peer_open()), 0).await;
        assert_eq!(fsm.state(), State::OpenConfirm);
        assert_eq!(fsm.hold, Some(0));
        assert_eq!(fsm.keepalive, Some(0));
        let Message::Open(open) = out.try_recv().unwrap() else {
            panic!("expected OPEN first");
        };
        assert_eq!(open.version, crate::BGP_VERSION);
        assert_eq!(open.asn, 65001);
        assert_eq!(open.hold_time, 240);
        assert_eq!(open.bgp_id, Ipv4Addr::new(1, 1, 1, 1));
        let OptionalParameterValue::Capabilities(caps) = &open.opt_params.0[0] else {
            panic!("expected a capabilities parameter");
        };
        assert!(caps.has_mp_ipv4_unicast());
        assert!(!caps.has_mp_ipv6_unicast());
        assert_eq!(out.try_recv().unwrap(), Message::Keepalive);
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_v6_session_advertises_v6_capability() {
        let mut config = config();
        config.local_addr = "2001:db8::1".parse().unwrap();
        config.neighbor = "2001:db8::2".parse().unwrap();
        let (mut fsm, mut out, _routes) = Fsm::new(config).unwrap();
        fsm.event(Event::Message(peer_open()), 0).await;
        let Message::Open(open) = out.try_recv().unwrap() else {
            panic!("expected OPEN first");
        };
        let OptionalParameterValue::Capabilities(caps) = &open.opt_params.0[0] else {
            panic!("expected a capabilities parameter");
        };
        assert!(caps.has_mp_ipv6_unicast());
    }

    #[tokio::test]
    async fn test_family_mismatch_rejected() {
        let mut config = config();
        config.neighbor = "2001:db8::2".parse().unwrap();
        assert_eq!(Fsm::new(config).unwrap_err(), ConfigError::FamilyMismatch);
    }

    #[tokio::test]
    async fn test_non_open_in_active_is_fatal_without_notification() {
        let (mut fsm, mut out, _routes) = Fsm::new(config()).unwrap();
        fsm.event(Event::Message(Message::Keepalive), 0).await;
        assert_eq!(fsm.state(), State::Idle);
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_keepalive_establishes_and_advertises() {
        let (mut fsm, mut out, _routes) = Fsm::new(config()).unwrap();
        fsm.advertise(addition("10.1.0.0/16"));
        fsm.advertise(addition("10.2.0.0/16"));
        fsm.event(Event::Message(peer_open()), 0).await;
        out.try_recv().unwrap(); // OPEN
        out.try_recv().unwrap(); // KEEPALIVE
        fsm.event(Event::Message(Message::Keepalive), 5).await;
        assert_eq!(fsm.state(), State::Established);
        assert_eq!(fsm.hold, Some(5));
        let Message::Update(update) = out.try_recv().unwrap() else {
            panic!("expected an UPDATE");
        };
        assert_eq!(
            update.path_attributes,
            mandatory_attrs(Ipv4Addr::new(10, 0, 0, 1), vec![65001], Origin::Igp)
        );
        assert_eq!(update.nlri, nlri(&["10.1.0.0/16", "10.2.0.0/16"]));
        assert!(update.withdrawn_routes.is_empty());
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_advertisements_group_by_path() {
        let (mut fsm, mut out, _routes) = Fsm::new(config()).unwrap();
        fsm.advertise(addition("10.1.0.0/16"));
        let mut other = addition("10.9.0.0/16");
        other.origin = Origin::Incomplete;
        fsm.advertise(other);
        fsm.advertise(addition("10.2.0.0/16"));
        fsm.event(Event::Message(peer_open()), 0).await;
        out.try_recv().unwrap();
        out.try_recv().unwrap();
        fsm.event(Event::Message(Message::Keepalive), 1).await;
        let Message::Update(first) = out.try_recv().unwrap() else {
            panic!("expected an UPDATE");
        };
        let Message::Update(second) = out.try_recv().unwrap() else {
            panic!("expected a second UPDATE");
        };
        assert_eq!(first.nlri, nlri(&["10.1.0.0/16", "10.2.0.0/16"]));
        assert_eq!(second.nlri, nlri(&["10.9.0.0/16"]));
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_hold_timer_expiry() {
        let (mut fsm, mut out, _routes) = Fsm::new(config()).unwrap();
        fsm.event(Event::Message(peer_open()), 0).await;
        fsm.event(Event::Message(Message::Keepalive), 5).await;
        out.try_recv().unwrap();
        out.try_recv().unwrap();
        fsm.event(Event::TimerExpired, 246).await;
        assert_eq!(fsm.state(), State::Idle);
        let Message::Notification(notification) = out.try_recv().unwrap() else {
            panic!("expected a NOTIFICATION");
        };
        assert_eq!(
            notification.error_code,
            NotificationErrorCode::HoldTimerExpired
        );
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_keepalive_timer_fires() {
        let (mut fsm, mut out, _routes) = Fsm::new(config()).unwrap();
        fsm.event(Event::Message(peer_open()), 0).await;
        fsm.event(Event::Message(Message::Keepalive), 0).await;
        out.try_recv().unwrap();
        out.try_recv().unwrap();
        fsm.hold = Some(100);
        fsm.keepalive = Some(100);
        // keepalive_time = 240 / 3 = 80, so 181 is due; hold is not
        fsm.event(Event::TimerExpired, 181).await;
        assert_eq!(fsm.state(), State::Established);
        assert_eq!(fsm.keepalive, Some(181));
        assert_eq!(out.try_recv().unwrap(), Message::Keepalive);
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_timer_noop_in_active() {
        let (mut fsm, mut out, _routes) = Fsm::new(config()).unwrap();
        fsm.event(Event::TimerExpired, 1000).await;
        assert_eq!(fsm.state(), State::Active);
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_open_in_established_ceases() {
        let (mut fsm, mut out, _routes) = Fsm::new(config()).unwrap();
        fsm.event(Event::Message(peer_open()), 0).await;
        fsm.event(Event::Message(Message::Keepalive), 1).await;
        out.try_recv().unwrap();
        out.try_recv().unwrap();
        fsm.event(Event::Message(peer_open()), 2).await;
        assert_eq!(fsm.state(), State::Idle);
        let Message::Notification(notification) = out.try_recv().unwrap() else {
            panic!("expected a NOTIFICATION");
        };
        assert_eq!(notification.error_code, NotificationErrorCode::Cease);
    }

    #[tokio::test]
    async fn test_update_in_open_confirm_is_fsm_error() {
        let (mut fsm, mut out, _routes) = Fsm::new(config()).unwrap();
        fsm.event(Event::Message(peer_open()), 0).await;
        out.try_recv().unwrap();
        out.try_recv().unwrap();
        fsm.event(Event::Message(Message::Update(Update::default())), 1)
            .await;
        assert_eq!(fsm.state(), State::Idle);
        let Message::Notification(notification) = out.try_recv().unwrap() else {
            panic!("expected a NOTIFICATION");
        };
        assert_eq!(
            notification.error_code,
            NotificationErrorCode::FiniteStateMachineError
        );
    }

    #[tokio::test]
    async fn test_route_ingest_plain_and_withdraw() {
        let (mut fsm, _out, mut routes) = Fsm::new(config()).unwrap();
        fsm.event(Event::Message(peer_open()), 0).await;
        fsm.event(Event::Message(Message::Keepalive), 1).await;
        let update = Update {
            withdrawn_routes: nlri(&["192.0.2.0/24"]),
            path_attributes: mandatory_attrs(
                Ipv4Addr::new(10, 0, 0, 2),
                vec![65002, 65010],
                Origin::Egp,
            ),
            nlri: nlri(&["10.5.0.0/16", "10.6.0.0/16"]),
        };
        fsm.event(Event::Message(Message::Update(update)), 2).await;
        assert_eq!(fsm.state(), State::Established);
        // Additions first, then withdrawals
        let RouteUpdate::Addition(first) = routes.try_recv().unwrap() else {
            panic!("expected an addition");
        };
        assert_eq!(first.prefix, "10.5.0.0/16".parse().unwrap());
        assert_eq!(first.next_hop, "10.0.0.2".parse::<IpAddr>().unwrap());
        assert_eq!(first.as_path, AsPath::sequence(vec![65002, 65010]));
        assert_eq!(first.origin, Origin::Egp);
        let RouteUpdate::Addition(second) = routes.try_recv().unwrap() else {
            panic!("expected an addition");
        };
        assert_eq!(second.prefix, "10.6.0.0/16".parse().unwrap());
        let RouteUpdate::Removal(removal) = routes.try_recv().unwrap() else {
            panic!("expected a removal");
        };
        assert_eq!(removal.prefix, "192.0.2.0/24".parse().unwrap());
        assert!(routes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_route_ingest_mp_reach() {
        let (mut fsm, _out, mut routes) = Fsm::new(config()).unwrap();
        fsm.event(Event::Message(peer_open()), 0).await;
        fsm.event(Event::Message(Message::Keepalive), 1).await;
        let update = Update {
            withdrawn_routes: Routes::default(),
            path_attributes: PathAttributes(vec![
                path::Value {
                    flags: Flags::WELL_KNOWN_COMPLETE,
                    data: path::Data::Origin(Origin::Igp),
                },
                path::Value {
                    flags: Flags::WELL_KNOWN_COMPLETE,
                    data: path::Data::AsPath(AsPath::sequence(vec![65002])),
                },
                path::Value {
                    flags: Flags::OPTIONAL_TRANSITIVE_EXTENDED,
                    data: path::Data::MpReachNlri(MpReachNlri {
                        afi: Afi::Ipv6,
                        safi: Safi::Unicast,
                        next_hop: MpNextHop::Single("2001:db8::1".parse().unwrap()),
                        nlri: nlri(&["2001:db8:1::/48"]),
                    }),
                },
            ]),
            nlri: Routes::default(),
        };
        fsm.event(Event::Message(Message::Update(update)), 2).await;
        let RouteUpdate::Addition(addition) = routes.try_recv().unwrap() else {
            panic!("expected an addition");
        };
        assert_eq!(addition.prefix, "2001:db8:1::/48".parse().unwrap());
        assert_eq!(
            addition.next_hop,
            "2001:db8::1".parse::<IpAddr>().unwrap()
        );
        assert_eq!(addition.as_path, AsPath::sequence(vec![65002]));
        assert_eq!(addition.origin, Origin::Igp);
        assert!(routes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_update_resets_hold_timer() {
        let (mut fsm, _out, _routes) = Fsm::new(config()).unwrap();
        fsm.event(Event::Message(peer_open()), 0).await;
        fsm.event(Event::Message(Message::Keepalive), 1).await;
        fsm.event(Event::Message(Message::Update(Update::default())), 7)
            .await;
        assert_eq!(fsm.state(), State::Established);
        assert_eq!(fsm.hold, Some(7));
    }

    #[tokio::test]
    async fn test_empty_update_produces_no_route_events() {
        let (mut fsm, _out, mut routes) = Fsm::new(config()).unwrap();
        fsm.event(Event::Message(peer_open()), 0).await;
        fsm.event(Event::Message(Message::Keepalive), 1).await;
        fsm.event(Event::Message(Message::Update(Update::default())), 2)
            .await;
        assert_eq!(fsm.state(), State::Established);
        assert!(routes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_update_missing_next_hop() {
        let (mut fsm, mut out, mut routes) = Fsm::new(config()).unwrap();
        fsm.event(Event::Message(peer_open()), 0).await;
        fsm.event(Event::Message(Message::Keepalive), 1).await;
        out.try_recv().unwrap();
        out.try_recv().unwrap();
        let update = Update {
            withdrawn_routes: Routes::default(),
            path_attributes: PathAttributes(vec![path::Value {
                flags: Flags::WELL_KNOWN_COMPLETE,
                data: path::Data::Origin(Origin::Igp),
            }]),
            nlri: nlri(&["10.5.0.0/16"]),
        };
        fsm.event(Event::Message(Message::Update(update)), 2).await;
        assert_eq!(fsm.state(), State::Idle);
        let Message::Notification(notification) = out.try_recv().unwrap() else {
            panic!("expected a NOTIFICATION");
        };
        assert_eq!(
            notification.error_code,
            NotificationErrorCode::UpdateMessageError
        );
        assert_eq!(
            notification.error_subcode,
            UpdateMessageErrorSubcode::MissingWellKnownAttribute as u8
        );
        assert!(routes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_in_active_is_quiet() {
        let (mut fsm, mut out, _routes) = Fsm::new(config()).unwrap();
        fsm.event(Event::Shutdown, 0).await;
        assert_eq!(fsm.state(), State::Idle);
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_when_established_ceases_once() {
        let (mut fsm, mut out, _routes) = Fsm::new(config()).unwrap();
        fsm.event(Event::Message(peer_open()), 0).await;
        fsm.event(Event::Message(Message::Keepalive), 1).await;
        out.try_recv().unwrap();
        out.try_recv().unwrap();
        fsm.event(Event::Shutdown, 2).await;
        assert_eq!(fsm.state(), State::Idle);
        let Message::Notification(notification) = out.try_recv().unwrap() else {
            panic!("expected a NOTIFICATION");
        };
        assert_eq!(notification.error_code, NotificationErrorCode::Cease);
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_idle_is_terminal() {
        let (mut fsm, mut out, mut routes) = Fsm::new(config()).unwrap();
        fsm.event(Event::Shutdown, 0).await;
        assert_eq!(fsm.state(), State::Idle);
        // No later event may touch state or queues
        fsm.event(Event::Message(peer_open()), 1).await;
        fsm.event(Event::TimerExpired, 1000).await;
        fsm.event(Event::Shutdown, 1001).await;
        assert_eq!(fsm.state(), State::Idle);
        assert!(out.try_recv().is_err());
        assert!(routes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notification_in_open_confirm_is_quiet_teardown() {
        let (mut fsm, mut out, _routes) = Fsm::new(config()).unwrap();
        fsm.event(Event::Message(peer_open()), 0).await;
        out.try_recv().unwrap();
        out.try_recv().unwrap();
        let notification = Message::Notification(Notification::new(
            NotificationErrorCode::Cease,
            0,
            Bytes::new(),
        ));
        fsm.event(Event::Message(notification), 1).await;
        assert_eq!(fsm.state(), State::Idle);
        assert!(out.try_recv().is_err());
    }
}
