//! The failure detector state machine.
//!
//! [`FailureDetector`] is sans-IO. Callers feed it inbound messages with
//! [`handle_message`](FailureDetector::handle_message) and fired timers with
//! [`handle_timer`](FailureDetector::handle_timer), then drain
//! [`take_effects`](FailureDetector::take_effects) for messages to send,
//! timers to arm or cancel, status reports and dead notifications.
//!
//! # Probe ladder
//!
//! ```text
//! probe ──ping──▶ target
//!   │ ping_timeout, no pong
//!   ▼
//! Suspected ──KPing──▶ K helpers
//!   │ suspected_timeout
//!   ▼
//! dead timer armed
//!   │ dead_timeout, still outstanding
//!   ▼
//! Dead
//! ```
//!
//! Every step is keyed by the probe's ping number. A pong or KPong removes the
//! ping number from the outstanding set, and every later timer for it becomes
//! a no-op.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use swim_membership::{Directory, Evidence, MemberStatus};
use swim_types::{
    Incarnation, NodeAddr, ParentSet, PeerAddress, PingNr, Pong, Status, SwimMessage, TimerId,
    TimerTable,
};
use tracing::{debug, info, trace};

use crate::config::DetectorConfig;
use crate::error::Result;

/// Something the caller must do on the detector's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a protocol message.
    Send { to: PeerAddress, message: SwimMessage },
    /// Fire `timer` after `after` by calling `handle_timer`.
    Schedule { timer: TimerId, after: Duration },
    /// The timer is no longer needed.
    Cancel { timer: TimerId },
    /// Periodic snapshot for the status reporter.
    Report(Status),
    /// A probed peer was declared dead by this node.
    PeerDead { peer: PeerAddress, incarnation: Incarnation },
}

/// What a scheduled timer means when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Probe,
    Status,
    PongTimeout { ping_nr: PingNr },
    SuspectedTimeout { ping_nr: PingNr },
    DeadTimeout { ping_nr: PingNr },
    /// Forget a K-ping proxied for another node.
    IndirectExpiry { ping_nr: PingNr },
}

impl TimerEvent {
    fn ping_nr(&self) -> Option<PingNr> {
        match *self {
            TimerEvent::Probe | TimerEvent::Status => None,
            TimerEvent::PongTimeout { ping_nr }
            | TimerEvent::SuspectedTimeout { ping_nr }
            | TimerEvent::DeadTimeout { ping_nr }
            | TimerEvent::IndirectExpiry { ping_nr } => Some(ping_nr),
        }
    }
}

/// An outstanding direct probe.
#[derive(Debug, Clone)]
pub struct ProbeRecord {
    pub target: PeerAddress,
    /// Probe round in which the ping went out.
    pub sent_at: u64,
}

/// A ping sent on behalf of another node.
#[derive(Debug, Clone)]
pub struct IndirectProbe {
    pub requester: PeerAddress,
    pub outer_ping_nr: PingNr,
}

/// Protocol counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Pings sent, including the ones proxied for K-pings.
    pub sent_pings: u64,
    pub received_pings: u64,
    /// Status reports emitted so far.
    pub status_nr: u64,
}

/// SWIM failure detector for one node.
#[derive(Debug)]
pub struct FailureDetector {
    config: DetectorConfig,
    directory: Directory,
    incarnation: Incarnation,
    next_ping_nr: PingNr,
    probe_round: u64,
    probes: BTreeMap<PingNr, ProbeRecord>,
    indirect: HashMap<PingNr, IndirectProbe>,
    timers: TimerTable<TimerEvent>,
    counters: Counters,
    running: bool,
    effects: Vec<Effect>,
}

impl FailureDetector {
    /// Create a detector seeded with `bootstrap` peers (alive at incarnation 0).
    pub fn new(
        self_address: PeerAddress,
        bootstrap: impl IntoIterator<Item = PeerAddress>,
        config: DetectorConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mut directory = Directory::new(self_address, config.directory());
        for peer in bootstrap {
            directory.record_alive(&peer, 0, Evidence::Gossip);
        }

        debug!(
            node = %directory.self_address(),
            bootstrap = directory.live_count(),
            k = config.k,
            "Created failure detector"
        );

        Ok(Self {
            config,
            directory,
            incarnation: 0,
            next_ping_nr: 0,
            probe_round: 0,
            probes: BTreeMap::new(),
            indirect: HashMap::new(),
            timers: TimerTable::new(),
            counters: Counters::default(),
            running: false,
            effects: Vec::new(),
        })
    }

    /// Arm the periodic probe and status timers.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        info!(node = %self.self_id(), "starting failure detector");
        self.schedule(TimerEvent::Probe, self.config.probe_interval);
        self.schedule(TimerEvent::Status, self.config.status_interval);
    }

    /// Cancel every timer and forget outstanding probes.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        info!(node = %self.self_id(), "stopping failure detector");
        for timer in self.timers.drain() {
            self.effects.push(Effect::Cancel { timer });
        }
        self.probes.clear();
        self.indirect.clear();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Handle a protocol message from `from`.
    pub fn handle_message(&mut self, from: PeerAddress, message: SwimMessage) {
        if !self.running {
            return;
        }
        trace!(node = %self.self_id(), from = %from.id(), kind = message.kind(), "received");

        match message {
            SwimMessage::Ping {
                ping_nr,
                incarnation,
            } => self.on_ping(from, ping_nr, incarnation),
            SwimMessage::Pong(pong) => self.on_pong(from, pong),
            SwimMessage::Alive { incarnation } => {
                self.directory
                    .record_alive(&from, incarnation, Evidence::Gossip);
            }
            SwimMessage::KPing {
                target,
                outer_ping_nr,
            } => self.on_kping(from, target, outer_ping_nr),
            SwimMessage::KPong {
                subject,
                incarnation,
                outer_ping_nr,
            } => self.on_kpong(subject, incarnation, outer_ping_nr),
        }
    }

    /// Handle a fired timer. Unknown or cancelled ids are ignored.
    pub fn handle_timer(&mut self, timer: TimerId) {
        let Some(event) = self.timers.take(timer) else {
            trace!(node = %self.self_id(), %timer, "stale timer ignored");
            return;
        };

        match event {
            TimerEvent::Probe => self.on_probe(),
            TimerEvent::Status => self.on_status(),
            TimerEvent::PongTimeout { ping_nr } => self.on_pong_timeout(ping_nr),
            TimerEvent::SuspectedTimeout { ping_nr } => {
                if self.probes.contains_key(&ping_nr) {
                    self.schedule(TimerEvent::DeadTimeout { ping_nr }, self.config.dead_timeout);
                }
            }
            TimerEvent::DeadTimeout { ping_nr } => self.on_dead_timeout(ping_nr),
            TimerEvent::IndirectExpiry { ping_nr } => {
                self.indirect.remove(&ping_nr);
            }
        }
    }

    /// Our parent set changed: adopt it, bump the incarnation and gossip
    /// the new address.
    pub fn set_parents(&mut self, parents: ParentSet) {
        let id = self.self_id();
        self.incarnation += 1;
        debug!(
            node = %id,
            incarnation = self.incarnation,
            parents = ?parents.members(),
            "new parents"
        );
        self.directory
            .set_self_address(PeerAddress::nated(id, parents));
        self.directory.announce_self(self.incarnation);
    }

    /// Drain pending effects.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn self_address(&self) -> &PeerAddress {
        self.directory.self_address()
    }

    fn self_id(&self) -> NodeAddr {
        self.directory.self_address().id()
    }

    pub fn incarnation(&self) -> Incarnation {
        self.incarnation
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Outstanding direct probe for `ping_nr`, if any.
    pub fn probe(&self, ping_nr: PingNr) -> Option<&ProbeRecord> {
        self.probes.get(&ping_nr)
    }

    pub fn outstanding_probes(&self) -> usize {
        self.probes.len()
    }

    /// Event behind a scheduled timer.
    pub fn timer_event(&self, timer: TimerId) -> Option<TimerEvent> {
        self.timers.get(timer).copied()
    }

    /// Snapshot for the status reporter.
    pub fn status(&self) -> Status {
        Status {
            status_nr: self.counters.status_nr,
            received_pings: self.counters.received_pings,
            sent_pings: self.counters.sent_pings,
            alive: self.directory.alive(),
            suspected: self.directory.suspected(),
            dead: self.directory.dead(),
        }
    }

    fn on_ping(&mut self, from: PeerAddress, ping_nr: PingNr, incarnation: Incarnation) {
        self.counters.received_pings += 1;
        self.directory
            .record_alive(&from, incarnation, Evidence::Direct);
        let pong = self.directory.build_piggyback(ping_nr, self.incarnation);
        self.send(from, SwimMessage::Pong(pong));
    }

    fn on_pong(&mut self, from: PeerAddress, pong: Pong) {
        if self.probes.remove(&pong.ping_nr).is_some() {
            self.cancel_timers_for(pong.ping_nr);
            self.merge_gossip(&pong);
            self.directory
                .record_alive(&from, pong.incarnation, Evidence::Direct);

            if pong.suspects(&self.self_id()) {
                self.refute(&from);
            }
        } else if let Some(indirect) = self.indirect.remove(&pong.ping_nr) {
            self.cancel_timers_for(pong.ping_nr);
            trace!(
                node = %self.self_id(),
                subject = %from.id(),
                requester = %indirect.requester.id(),
                "forwarding indirect probe result"
            );
            self.send(
                indirect.requester,
                SwimMessage::KPong {
                    subject: from,
                    incarnation: pong.incarnation,
                    outer_ping_nr: indirect.outer_ping_nr,
                },
            );
        } else {
            trace!(node = %self.self_id(), ping_nr = pong.ping_nr, "late pong ignored");
        }
    }

    fn merge_gossip(&mut self, pong: &Pong) {
        for rumor in &pong.new_nodes {
            self.directory
                .record_alive(&rumor.peer, rumor.incarnation, Evidence::Gossip);
        }
        for rumor in &pong.suspected_nodes {
            self.directory
                .record_suspected(&rumor.peer, Some(rumor.incarnation));
        }
        for rumor in &pong.dead_nodes {
            if self.directory.record_dead(&rumor.peer, Some(rumor.incarnation)) {
                debug!(node = %self.self_id(), peer = %rumor.peer.id(), "learned dead member from gossip");
            }
        }
    }

    fn refute(&mut self, reporter: &PeerAddress) {
        self.incarnation += 1;
        info!(
            node = %self.self_id(),
            reporter = %reporter.id(),
            incarnation = self.incarnation,
            "refuting suspicion"
        );
        self.directory.announce_self(self.incarnation);
        let incarnation = self.incarnation;
        for peer in self.directory.live_members() {
            self.send(peer, SwimMessage::Alive { incarnation });
        }
    }

    fn on_kping(&mut self, requester: PeerAddress, target: PeerAddress, outer_ping_nr: PingNr) {
        let ping_nr = self.next_ping_nr();
        trace!(
            node = %self.self_id(),
            target = %target.id(),
            requester = %requester.id(),
            ping_nr,
            "probing on behalf of requester"
        );
        self.counters.sent_pings += 1;
        self.send(
            target,
            SwimMessage::Ping {
                ping_nr,
                incarnation: self.incarnation,
            },
        );
        self.indirect.insert(
            ping_nr,
            IndirectProbe {
                requester,
                outer_ping_nr,
            },
        );
        let expiry = self.config.suspected_timeout + self.config.dead_timeout;
        self.schedule(TimerEvent::IndirectExpiry { ping_nr }, expiry);
    }

    fn on_kpong(&mut self, subject: PeerAddress, incarnation: Incarnation, outer_ping_nr: PingNr) {
        self.directory
            .record_alive(&subject, incarnation, Evidence::Direct);
        if self.probes.remove(&outer_ping_nr).is_some() {
            self.cancel_timers_for(outer_ping_nr);
            debug!(
                node = %self.self_id(),
                subject = %subject.id(),
                ping_nr = outer_ping_nr,
                "indirect probe succeeded"
            );
        }
    }

    fn on_probe(&mut self) {
        self.schedule(TimerEvent::Probe, self.config.probe_interval);
        self.probe_round += 1;

        let Some(target) = self.directory.select_probe_target() else {
            return;
        };
        let ping_nr = self.next_ping_nr();
        self.counters.sent_pings += 1;
        trace!(node = %self.self_id(), target = %target.id(), ping_nr, "probing");

        self.send(
            target.clone(),
            SwimMessage::Ping {
                ping_nr,
                incarnation: self.incarnation,
            },
        );
        self.probes.insert(
            ping_nr,
            ProbeRecord {
                target,
                sent_at: self.probe_round,
            },
        );
        self.schedule(TimerEvent::PongTimeout { ping_nr }, self.config.ping_timeout);
    }

    fn on_status(&mut self) {
        self.schedule(TimerEvent::Status, self.config.status_interval);
        let status = self.status();
        self.counters.status_nr += 1;
        self.effects.push(Effect::Report(status));
    }

    fn on_pong_timeout(&mut self, ping_nr: PingNr) {
        let Some(record) = self.probes.get(&ping_nr) else {
            return;
        };
        let target = record.target.clone();

        if self.directory.status_of(&target.id()) == Some(MemberStatus::Dead) {
            trace!(
                node = %self.self_id(),
                peer = %target.id(),
                ping_nr,
                "probe target already dead"
            );
            self.probes.remove(&ping_nr);
            return;
        }

        if self.directory.record_suspected(&target, None) {
            debug!(node = %self.self_id(), peer = %target.id(), ping_nr, "no pong, suspecting");
        }

        let helpers = self.directory.random_alive(self.config.k, &target.id());
        for helper in helpers {
            self.send(
                helper,
                SwimMessage::KPing {
                    target: target.clone(),
                    outer_ping_nr: ping_nr,
                },
            );
        }
        self.schedule(
            TimerEvent::SuspectedTimeout { ping_nr },
            self.config.suspected_timeout,
        );
    }

    fn on_dead_timeout(&mut self, ping_nr: PingNr) {
        let Some(record) = self.probes.remove(&ping_nr) else {
            return;
        };
        if self.directory.record_dead(&record.target, None) {
            let incarnation = self
                .directory
                .get(&record.target.id())
                .map_or(0, |entry| entry.incarnation);
            info!(
                node = %self.self_id(),
                peer = %record.target.id(),
                ping_nr,
                "declared dead"
            );
            self.effects.push(Effect::PeerDead {
                peer: record.target,
                incarnation,
            });
        }
    }

    fn next_ping_nr(&mut self) -> PingNr {
        let ping_nr = self.next_ping_nr;
        self.next_ping_nr += 1;
        ping_nr
    }

    fn send(&mut self, to: PeerAddress, message: SwimMessage) {
        self.effects.push(Effect::Send { to, message });
    }

    fn schedule(&mut self, event: TimerEvent, after: Duration) {
        let timer = self.timers.insert(event);
        self.effects.push(Effect::Schedule { timer, after });
    }

    fn cancel_timers_for(&mut self, ping_nr: PingNr) {
        for timer in self.timers.find(|event| event.ping_nr() == Some(ping_nr)) {
            self.timers.take(timer);
            self.effects.push(Effect::Cancel { timer });
        }
    }
}
