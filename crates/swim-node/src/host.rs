//! Host composition: failure detector over relay.
//!
//! A [`Host`] wires one [`FailureDetector`] on top of one [`NatRelay`]:
//!
//! ```text
//! inbound Envelope ─▶ NatRelay::receive ─▶ FailureDetector::handle_message
//!                                                   │
//! outbound Envelope ◀─ NatRelay::send ◀──── Effect::Send
//!                      NatRelay NewParents ─▶ FailureDetector::set_parents
//! ```
//!
//! Like the protocol engines it is sans-IO: drivers (the UDP runtime or the
//! simulator) feed it envelopes, timers and samples and drain [`HostEffect`]s.

use std::time::Duration;

use swim_detector::{DetectorConfig, Effect, FailureDetector};
use swim_relay::{NatRelay, RelayConfig, RelayEffect};
use swim_types::{
    Envelope, Incarnation, NodeAddr, ParentSet, PeerAddress, Sample, Status, TimerId,
};
use tracing::{debug, error, info};

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::transport::rumor_capacity;

/// Consumer of periodic status snapshots.
pub trait StatusReporter {
    fn submit(&mut self, from: NodeAddr, status: Status);
}

/// Reporter that writes every snapshot to the log.
#[derive(Debug, Default)]
pub struct LogReporter;

impl StatusReporter for LogReporter {
    fn submit(&mut self, from: NodeAddr, status: Status) {
        info!(
            node = %from,
            status_nr = status.status_nr,
            sent_pings = status.sent_pings,
            received_pings = status.received_pings,
            alive = status.alive.len(),
            suspected = status.suspected.len(),
            dead = status.dead.len(),
            "status"
        );
    }
}

/// A timer owned by one of the two engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HostTimer {
    Detector(TimerId),
    Relay(TimerId),
}

/// Something the driver must do on the host's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEffect {
    /// Send to `envelope.next_hop()`.
    Transmit(Envelope),
    Schedule { timer: HostTimer, after: Duration },
    Cancel { timer: HostTimer },
    /// Hand to the status reporter.
    Report(Status),
    PeerDead { peer: PeerAddress, incarnation: Incarnation },
    ParentsChanged(ParentSet),
}

/// One SWIM node: failure detector plus NAT relay.
#[derive(Debug)]
pub struct Host {
    detector: FailureDetector,
    relay: NatRelay,
    effects: Vec<HostEffect>,
}

impl Host {
    pub fn new(
        self_address: PeerAddress,
        bootstrap: impl IntoIterator<Item = PeerAddress>,
        detector: DetectorConfig,
        relay: RelayConfig,
    ) -> Result<Self> {
        let detector = FailureDetector::new(self_address.clone(), bootstrap, detector)?;
        let relay = NatRelay::new(self_address, relay)?;
        Ok(Self {
            detector,
            relay,
            effects: Vec::new(),
        })
    }

    /// Build from a node configuration once the socket address is known.
    ///
    /// The piggyback size is capped so that every pong fits in one datagram.
    pub fn from_config(config: &NodeConfig, self_address: PeerAddress) -> Result<Self> {
        let capacity = rumor_capacity(config.relay.parent_count)?;
        let max_message_size = config.detector.max_message_size.min(capacity);
        if max_message_size < config.detector.max_message_size {
            debug!(
                requested = config.detector.max_message_size,
                max_message_size, "capping piggyback to one datagram"
            );
        }

        Self::new(
            self_address,
            config.bootstrap.iter().cloned(),
            config
                .detector
                .clone()
                .with_max_message_size(max_message_size),
            config.relay.clone(),
        )
    }

    pub fn id(&self) -> NodeAddr {
        self.relay.self_address().id()
    }

    /// Current address, including the latest parent set.
    pub fn self_address(&self) -> &PeerAddress {
        self.relay.self_address()
    }

    pub fn detector(&self) -> &FailureDetector {
        &self.detector
    }

    pub fn relay(&self) -> &NatRelay {
        &self.relay
    }

    pub fn start(&mut self) -> Result<()> {
        debug!(node = %self.id(), open = self.self_address().is_open(), "starting host");
        self.detector.start();
        self.relay.start();
        self.pump()
    }

    /// Stop both engines; the resulting effects cancel every timer.
    pub fn stop(&mut self) -> Result<()> {
        self.detector.stop();
        self.relay.stop();
        self.pump()
    }

    /// Handle an inbound envelope.
    ///
    /// A relay header violation is returned as a fatal error and nothing else
    /// is processed.
    pub fn receive(&mut self, envelope: Envelope) -> Result<()> {
        match self.relay.receive(envelope) {
            Ok(Some(delivery)) => self
                .detector
                .handle_message(delivery.source, delivery.message),
            Ok(None) => {}
            Err(e) => {
                error!(node = %self.id(), error = %e, "relay invariant violated");
                return Err(e.into());
            }
        }
        self.pump()
    }

    /// Handle a fired timer.
    pub fn fire(&mut self, timer: HostTimer) -> Result<()> {
        match timer {
            HostTimer::Detector(id) => self.detector.handle_timer(id),
            HostTimer::Relay(id) => self.relay.handle_timer(id),
        }
        self.pump()
    }

    /// Deliver a peer sample to the relay.
    pub fn on_sample(&mut self, sample: Sample) -> Result<()> {
        self.relay.on_sample(sample);
        self.pump()
    }

    /// Open live members from this node's own view, for drivers without a
    /// dedicated sampling service.
    pub fn local_sample(&self) -> Sample {
        let peers = self
            .detector
            .directory()
            .live_members()
            .into_iter()
            .filter(PeerAddress::is_open)
            .collect();
        Sample::new(peers)
    }

    /// Drain pending effects.
    pub fn take_effects(&mut self) -> Vec<HostEffect> {
        std::mem::take(&mut self.effects)
    }

    /// Route engine effects until both outboxes are empty.
    ///
    /// An unroutable send is logged and skipped; the first such error is
    /// returned after everything else has been processed.
    fn pump(&mut self) -> Result<()> {
        let mut failed: Option<Error> = None;
        loop {
            let detector_effects = self.detector.take_effects();
            let relay_effects = self.relay.take_effects();
            if detector_effects.is_empty() && relay_effects.is_empty() {
                break;
            }

            for effect in detector_effects {
                match effect {
                    Effect::Send { to, message } => {
                        if let Err(e) = self.relay.send(&to, message) {
                            error!(node = %self.id(), to = %to.id(), error = %e, "cannot route message");
                            if failed.is_none() {
                                failed = Some(e.into());
                            }
                        }
                    }
                    Effect::Schedule { timer, after } => self.effects.push(HostEffect::Schedule {
                        timer: HostTimer::Detector(timer),
                        after,
                    }),
                    Effect::Cancel { timer } => self.effects.push(HostEffect::Cancel {
                        timer: HostTimer::Detector(timer),
                    }),
                    Effect::Report(status) => self.effects.push(HostEffect::Report(status)),
                    Effect::PeerDead { peer, incarnation } => {
                        self.effects.push(HostEffect::PeerDead { peer, incarnation })
                    }
                }
            }

            for effect in relay_effects {
                match effect {
                    RelayEffect::Transmit(envelope) => {
                        self.effects.push(HostEffect::Transmit(envelope))
                    }
                    RelayEffect::Schedule { timer, after } => {
                        self.effects.push(HostEffect::Schedule {
                            timer: HostTimer::Relay(timer),
                            after,
                        })
                    }
                    RelayEffect::Cancel { timer } => self.effects.push(HostEffect::Cancel {
                        timer: HostTimer::Relay(timer),
                    }),
                    RelayEffect::NewParents(parents) => {
                        self.detector.set_parents(parents.clone());
                        self.effects.push(HostEffect::ParentsChanged(parents));
                    }
                }
            }
        }
        failed.map_or(Ok(()), Err)
    }
}
