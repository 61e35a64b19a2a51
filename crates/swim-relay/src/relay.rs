//! Parent-routed delivery and parent maintenance.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::SeedableRng;
use swim_types::{
    Envelope, Header, NatMessage, NodeAddr, ParentSet, Payload, PeerAddress, PingNr, Route,
    Sample, SourceHeader, SwimMessage, TimerId, TimerTable,
};
use tracing::{debug, trace};

use crate::config::RelayConfig;
use crate::error::{Error, Result};

/// Something the caller must do on the relay's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEffect {
    /// Put the envelope on the wire towards `envelope.next_hop()`.
    Transmit(Envelope),
    Schedule { timer: TimerId, after: Duration },
    Cancel { timer: TimerId },
    /// Our parent set changed.
    NewParents(ParentSet),
}

/// What a relay timer means when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayTimer {
    Heartbeat,
    HeartbeatTimeout { ping_nr: PingNr, parent: NodeAddr },
}

/// A protocol message addressed to this node.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// The original sender, even when the message was relayed.
    pub source: PeerAddress,
    pub message: SwimMessage,
}

/// The NAT relay layer of one node.
///
/// Open nodes send directly and relay for their NAT'd children. NAT'd nodes
/// heartbeat their parents and replace the ones that stop answering.
#[derive(Debug)]
pub struct NatRelay {
    config: RelayConfig,
    self_address: PeerAddress,
    rng: StdRng,
    next_ping_nr: PingNr,
    /// Heartbeats sent but not yet answered.
    heartbeats: BTreeMap<PingNr, NodeAddr>,
    sample: Vec<PeerAddress>,
    dead_parents: BTreeSet<NodeAddr>,
    timers: TimerTable<RelayTimer>,
    running: bool,
    effects: Vec<RelayEffect>,
}

impl NatRelay {
    pub fn new(self_address: PeerAddress, config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            self_address,
            rng,
            next_ping_nr: 0,
            heartbeats: BTreeMap::new(),
            sample: Vec::new(),
            dead_parents: BTreeSet::new(),
            timers: TimerTable::new(),
            running: false,
            effects: Vec::new(),
        })
    }

    /// Start heartbeating parents (NAT'd nodes only).
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        if !self.self_address.is_open() {
            self.schedule(RelayTimer::Heartbeat, self.config.heartbeat_interval);
        }
    }

    /// Cancel every timer.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        for timer in self.timers.drain() {
            self.effects.push(RelayEffect::Cancel { timer });
        }
        self.heartbeats.clear();
    }

    pub fn self_address(&self) -> &PeerAddress {
        &self.self_address
    }

    fn self_id(&self) -> NodeAddr {
        self.self_address.id()
    }

    /// Current parents, `None` for open nodes.
    pub fn parents(&self) -> Option<&ParentSet> {
        self.self_address.parents()
    }

    pub fn dead_parents(&self) -> &BTreeSet<NodeAddr> {
        &self.dead_parents
    }

    pub fn timer_event(&self, timer: TimerId) -> Option<RelayTimer> {
        self.timers.get(timer).copied()
    }

    /// Drain pending effects.
    pub fn take_effects(&mut self) -> Vec<RelayEffect> {
        std::mem::take(&mut self.effects)
    }

    /// Send `message` to `destination`, through one of its parents if it is
    /// NAT'd.
    pub fn send(&mut self, destination: &PeerAddress, message: impl Into<Payload>) -> Result<()> {
        let header = Header::new(self.self_address.clone(), destination.clone());
        let payload = message.into();

        let route = match destination.parents() {
            None => Route::Direct(header),
            Some(parents) => {
                let parent = parents
                    .iter()
                    .copied()
                    .choose(&mut self.rng)
                    .ok_or(Error::Orphan {
                        destination: destination.id(),
                    })?;
                trace!(node = %self.self_id(), to = %destination.id(), via = %parent, "sending through parent");
                Route::Source(SourceHeader {
                    inner: header,
                    parent,
                })
            }
        };
        self.effects
            .push(RelayEffect::Transmit(Envelope { route, payload }));
        Ok(())
    }

    /// Handle an inbound envelope.
    ///
    /// Returns the unwrapped message if it is for this node's failure
    /// detector. Relay requests and heartbeats are handled here.
    pub fn receive(&mut self, envelope: Envelope) -> Result<Option<Delivery>> {
        let Envelope { route, payload } = envelope;
        match route {
            Route::Direct(header) => Ok(self.deliver(header, payload)),
            Route::Source(source) => {
                if !self.self_address.is_open() {
                    return Err(Error::SourceHeaderAtNatedNode {
                        node: self.self_id(),
                    });
                }
                self.forward(source, payload);
                Ok(None)
            }
            Route::Relay(relay) => {
                if self.self_address.is_open() {
                    return Err(Error::RelayHeaderAtOpenNode {
                        node: self.self_id(),
                    });
                }
                Ok(self.deliver(relay.inner, payload))
            }
        }
    }

    fn forward(&mut self, source: SourceHeader, payload: Payload) {
        let me = self.self_id();
        let destination = &source.inner.destination;
        let listed = destination
            .parents()
            .is_some_and(|parents| parents.contains(&me));

        if !listed {
            debug!(
                node = %me,
                destination = %destination.id(),
                from = %source.inner.source.id(),
                "dropping stale relay request"
            );
            return;
        }

        trace!(node = %me, from = %source.inner.source.id(), to = %destination.id(), "relaying");
        self.effects.push(RelayEffect::Transmit(Envelope {
            route: Route::Relay(source.into_relay()),
            payload,
        }));
    }

    fn deliver(&mut self, header: Header, payload: Payload) -> Option<Delivery> {
        match payload {
            Payload::Swim(message) => Some(Delivery {
                source: header.source,
                message,
            }),
            Payload::Nat(NatMessage::NatPing { ping_nr }) => {
                // Replies go straight to the child, never through a parent.
                let reply = Envelope::direct(
                    self.self_address.clone(),
                    header.source,
                    NatMessage::NatPong { ping_nr },
                );
                self.effects.push(RelayEffect::Transmit(reply));
                None
            }
            Payload::Nat(NatMessage::NatPong { ping_nr }) => {
                if self.heartbeats.remove(&ping_nr).is_some() {
                    self.cancel_timeouts(|nr, _| nr == ping_nr);
                }
                None
            }
        }
    }

    /// Handle a fired timer. Unknown or cancelled ids are ignored.
    pub fn handle_timer(&mut self, timer: TimerId) {
        let Some(event) = self.timers.take(timer) else {
            return;
        };
        match event {
            RelayTimer::Heartbeat => self.on_heartbeat(),
            RelayTimer::HeartbeatTimeout { ping_nr, parent } => {
                if self.heartbeats.remove(&ping_nr).is_some() {
                    self.on_parent_dead(parent);
                }
            }
        }
    }

    /// A fresh peer sample: remember it and top the parent set up.
    pub fn on_sample(&mut self, sample: Sample) {
        if self.self_address.is_open() {
            return;
        }
        self.sample = sample.peers;
        self.refresh_parents();
    }

    fn on_heartbeat(&mut self) {
        self.schedule(RelayTimer::Heartbeat, self.config.heartbeat_interval);
        let parents: Vec<NodeAddr> = self
            .self_address
            .parents()
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        for parent in parents {
            let ping_nr = self.next_ping_nr;
            self.next_ping_nr += 1;
            self.heartbeats.insert(ping_nr, parent);
            self.effects.push(RelayEffect::Transmit(Envelope::direct(
                self.self_address.clone(),
                PeerAddress::open(parent),
                NatMessage::NatPing { ping_nr },
            )));
            self.schedule(
                RelayTimer::HeartbeatTimeout { ping_nr, parent },
                self.config.ping_timeout,
            );
        }
    }

    fn on_parent_dead(&mut self, parent: NodeAddr) {
        debug!(node = %self.self_id(), %parent, "parent missed heartbeat");
        self.dead_parents.insert(parent);
        self.heartbeats.retain(|_, p| *p != parent);
        self.cancel_timeouts(|_, p| p == parent);
        self.refresh_parents();
    }

    /// Drop dead parents and refill from the latest sample. Emits
    /// `NewParents` only when the set changed.
    fn refresh_parents(&mut self) {
        let me = self.self_id();
        let Some(current) = self.self_address.parents() else {
            return;
        };

        let mut parents: BTreeSet<NodeAddr> = current
            .iter()
            .copied()
            .filter(|p| !self.dead_parents.contains(p))
            .collect();

        let mut candidates: Vec<NodeAddr> = self
            .sample
            .iter()
            .filter(|peer| peer.is_open())
            .map(PeerAddress::id)
            .filter(|id| *id != me && !self.dead_parents.contains(id) && !parents.contains(id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        candidates.shuffle(&mut self.rng);

        for candidate in candidates {
            if parents.len() >= self.config.parent_count {
                break;
            }
            parents.insert(candidate);
        }

        let Some(current) = self.self_address.parents_mut() else {
            return;
        };
        if current.replace(parents) {
            debug!(
                node = %me,
                version = current.version(),
                parents = ?current.members(),
                "parent set changed"
            );
            let update = current.clone();
            self.effects.push(RelayEffect::NewParents(update));
        }
    }

    fn schedule(&mut self, event: RelayTimer, after: Duration) {
        let timer = self.timers.insert(event);
        self.effects.push(RelayEffect::Schedule { timer, after });
    }

    fn cancel_timeouts(&mut self, mut pred: impl FnMut(PingNr, NodeAddr) -> bool) {
        let ids = self.timers.find(|event| match *event {
            RelayTimer::HeartbeatTimeout { ping_nr, parent } => pred(ping_nr, parent),
            RelayTimer::Heartbeat => false,
        });
        for timer in ids {
            self.timers.take(timer);
            self.effects.push(RelayEffect::Cancel { timer });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(id: u32) -> NodeAddr {
        NodeAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 12345, id)
    }

    fn open(id: u32) -> PeerAddress {
        PeerAddress::open(addr(id))
    }

    fn nated(id: u32, parents: &[u32]) -> PeerAddress {
        PeerAddress::nated(addr(id), ParentSet::new(parents.iter().map(|p| addr(*p))))
    }

    fn relay(address: PeerAddress, parent_count: usize) -> NatRelay {
        let config = RelayConfig::default().with_parent_count(parent_count);
        let mut relay = NatRelay::new(address, config).unwrap();
        relay.start();
        relay.take_effects();
        relay
    }

    fn ping() -> SwimMessage {
        SwimMessage::Ping {
            ping_nr: 5,
            incarnation: 0,
        }
    }

    fn transmitted(effects: &[RelayEffect]) -> Vec<Envelope> {
        effects
            .iter()
            .filter_map(|e| match e {
                RelayEffect::Transmit(envelope) => Some(envelope.clone()),
                _ => None,
            })
            .collect()
    }

    fn new_parents(effects: &[RelayEffect]) -> Vec<ParentSet> {
        effects
            .iter()
            .filter_map(|e| match e {
                RelayEffect::NewParents(parents) => Some(parents.clone()),
                _ => None,
            })
            .collect()
    }

    fn fire(relay: &mut NatRelay, pred: impl Fn(&RelayTimer) -> bool) -> Vec<RelayEffect> {
        for timer in relay.timers.find(|e| pred(e)) {
            relay.handle_timer(timer);
        }
        relay.take_effects()
    }

    #[test]
    fn open_destination_is_sent_directly() {
        let mut node = relay(open(1), 3);
        node.send(&open(2), ping()).unwrap();
        let out = transmitted(&node.take_effects());
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].route, Route::Direct(_)));
        assert_eq!(out[0].next_hop(), addr(2));
    }

    #[test]
    fn nated_destination_goes_through_a_parent() {
        let mut node = relay(open(1), 3);
        let dst = nated(9, &[2, 3]);
        for _ in 0..10 {
            node.send(&dst, ping()).unwrap();
        }
        for envelope in transmitted(&node.take_effects()) {
            let Route::Source(source) = &envelope.route else {
                panic!("expected source header");
            };
            assert!(source.parent == addr(2) || source.parent == addr(3));
            assert_eq!(source.inner.destination, dst);
            assert_eq!(envelope.next_hop(), source.parent);
        }
    }

    #[test]
    fn orphan_destination_is_an_error() {
        let mut node = relay(open(1), 3);
        let err = node.send(&nated(9, &[]), ping()).unwrap_err();
        assert_eq!(err, Error::Orphan { destination: addr(9) });
        assert!(!err.is_fatal());
        assert!(node.take_effects().is_empty());
    }

    #[test]
    fn relay_forwards_and_child_sees_original_header() {
        let sender = open(1);
        let mut parent = relay(open(2), 3);
        let mut child = relay(nated(9, &[2]), 3);

        let mut origin = relay(sender.clone(), 3);
        origin.send(child.self_address(), ping()).unwrap();
        let request = transmitted(&origin.take_effects()).remove(0);
        assert_eq!(request.next_hop(), addr(2));

        assert_eq!(parent.receive(request).unwrap(), None);
        let relayed = transmitted(&parent.take_effects()).remove(0);
        let Route::Relay(header) = &relayed.route else {
            panic!("expected relay header");
        };
        assert_eq!(header.actual_source, sender);
        assert_eq!(relayed.next_hop(), addr(9));

        let delivery = child.receive(relayed).unwrap().unwrap();
        assert_eq!(delivery.source, sender);
        assert_eq!(delivery.message, ping());
    }

    #[test]
    fn stale_relay_request_is_dropped() {
        let mut parent = relay(open(2), 3);
        let envelope = Envelope {
            route: Route::Source(SourceHeader {
                inner: Header::new(open(1), nated(9, &[3])),
                parent: addr(2),
            }),
            payload: ping().into(),
        };
        assert_eq!(parent.receive(envelope).unwrap(), None);
        assert!(parent.take_effects().is_empty());
    }

    #[test]
    fn header_violations_are_fatal() {
        let mut child = relay(nated(9, &[2]), 3);
        let source = SourceHeader {
            inner: Header::new(open(1), nated(8, &[9])),
            parent: addr(9),
        };
        let err = child
            .receive(Envelope {
                route: Route::Source(source.clone()),
                payload: ping().into(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::SourceHeaderAtNatedNode { .. }));
        assert!(err.is_fatal());

        let mut open_node = relay(open(2), 3);
        let err = open_node
            .receive(Envelope {
                route: Route::Relay(source.into_relay()),
                payload: ping().into(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::RelayHeaderAtOpenNode { .. }));
    }

    #[test]
    fn open_node_answers_heartbeat_directly() {
        let mut parent = relay(open(2), 3);
        let heartbeat = Envelope::direct(nated(9, &[2]), open(2), NatMessage::NatPing { ping_nr: 7 });
        assert_eq!(parent.receive(heartbeat).unwrap(), None);

        let out = transmitted(&parent.take_effects());
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].route, Route::Direct(_)));
        assert_eq!(out[0].next_hop(), addr(9));
        assert_eq!(out[0].payload, Payload::Nat(NatMessage::NatPong { ping_nr: 7 }));
    }

    #[test]
    fn open_node_does_not_heartbeat() {
        let mut node = NatRelay::new(open(1), RelayConfig::default()).unwrap();
        node.start();
        assert!(node.take_effects().is_empty());
        node.on_sample(Sample::new(vec![open(2)]));
        assert!(node.take_effects().is_empty());
    }

    #[test]
    fn silent_parent_is_replaced_once() {
        let mut child = relay(nated(9, &[1, 2]), 2);
        child.on_sample(Sample::new(vec![open(3), nated(4, &[1]), nated(9, &[1, 2])]));
        assert!(child.take_effects().is_empty());

        let effects = fire(&mut child, |e| *e == RelayTimer::Heartbeat);
        let pings = transmitted(&effects);
        assert_eq!(pings.len(), 2);

        // Only P2 answers.
        let from_p2 = pings.iter().find(|e| e.next_hop() == addr(2)).unwrap();
        let Payload::Nat(NatMessage::NatPing { ping_nr }) = from_p2.payload else {
            panic!("expected heartbeat");
        };
        let pong = Envelope::direct(open(2), child.self_address().clone(), NatMessage::NatPong { ping_nr });
        assert_eq!(child.receive(pong).unwrap(), None);
        child.take_effects();

        let effects = fire(&mut child, |e| matches!(e, RelayTimer::HeartbeatTimeout { .. }));
        let updates = new_parents(&effects);
        assert_eq!(updates.len(), 1);
        let expected: BTreeSet<_> = [addr(2), addr(3)].into_iter().collect();
        assert_eq!(updates[0].members(), &expected);
        assert_eq!(updates[0].version(), 1);
        assert!(child.dead_parents().contains(&addr(1)));
        assert_eq!(child.parents(), Some(&updates[0]));
    }

    #[test]
    fn sample_tops_up_and_never_revives_dead_parents() {
        let mut child = relay(nated(9, &[1]), 3);
        child.dead_parents.insert(addr(5));

        child.on_sample(Sample::new(vec![open(2), open(5), open(9)]));
        let updates = new_parents(&child.take_effects());
        assert_eq!(updates.len(), 1);
        let expected: BTreeSet<_> = [addr(1), addr(2)].into_iter().collect();
        assert_eq!(updates[0].members(), &expected);

        // Nothing new to add: no notification.
        child.on_sample(Sample::new(vec![open(2), open(5)]));
        assert!(new_parents(&child.take_effects()).is_empty());
    }

    #[test]
    fn stop_cancels_heartbeats() {
        let mut child = relay(nated(9, &[1, 2]), 2);
        fire(&mut child, |e| *e == RelayTimer::Heartbeat);
        child.stop();
        let cancels = child
            .take_effects()
            .into_iter()
            .filter(|e| matches!(e, RelayEffect::Cancel { .. }))
            .count();
        // Next heartbeat plus two timeouts.
        assert_eq!(cancels, 3);
    }
}
