//! Tokio event loop driving one [`Host`] over UDP.
//!
//! Everything runs on a single task: datagrams, fired timers and sample ticks
//! are handled one at a time, to completion. Timers are spawned sleep tasks
//! that report back over a channel and are aborted on cancel.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use swim_types::PeerAddress;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::host::{Host, HostEffect, HostTimer, LogReporter, StatusReporter};
use crate::transport::{Transport, MAX_DATAGRAM};

/// A bound node ready to run.
pub struct NodeRuntime {
    host: Host,
    transport: Transport,
    sample_interval: Duration,
    reporter: Box<dyn StatusReporter + Send>,
}

impl NodeRuntime {
    /// Bind the socket and build the host. The node's address uses the
    /// actually bound port, so `bind` may use port 0.
    pub async fn bind(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let transport = Transport::bind(config.bind, config.sndbuf, config.rcvbuf).await?;
        let self_address = config.self_address(transport.local_addr()?);
        let host = Host::from_config(&config, self_address)?;

        Ok(Self {
            host,
            transport,
            sample_interval: config.sample_interval,
            reporter: Box::new(LogReporter),
        })
    }

    /// Replace the default log reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: impl StatusReporter + Send + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn self_address(&self) -> &PeerAddress {
        self.host.self_address()
    }

    /// Run until `shutdown` resolves or a fatal error occurs.
    ///
    /// Returns the stopped host so callers can inspect the final view.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> Result<Host> {
        let (timer_tx, mut timer_rx) = mpsc::unbounded_channel();
        let mut timers: HashMap<HostTimer, JoinHandle<()>> = HashMap::new();
        let mut sample = tokio::time::interval(self.sample_interval);
        let mut buf = vec![0u8; MAX_DATAGRAM];
        tokio::pin!(shutdown);

        info!(node = %self.host.id(), "node running");
        let started = self.host.start();
        self.settle(started, &mut timers, &timer_tx).await?;

        loop {
            let outcome = tokio::select! {
                _ = &mut shutdown => break,
                Some(timer) = timer_rx.recv() => {
                    timers.remove(&timer);
                    self.host.fire(timer)
                }
                received = self.transport.recv(&mut buf) => match received {
                    Ok((envelope, _)) => self.host.receive(envelope),
                    Err(Error::Codec(e)) => {
                        warn!(error = %e, "dropping undecodable datagram");
                        Ok(())
                    }
                    Err(e) => {
                        debug!(error = %e, "receive failed");
                        Ok(())
                    }
                },
                _ = sample.tick() => {
                    let sample = self.host.local_sample();
                    self.host.on_sample(sample)
                }
            };
            self.settle(outcome, &mut timers, &timer_tx).await?;
        }

        info!(node = %self.host.id(), "shutting down");
        let stopped = self.host.stop();
        self.settle(stopped, &mut timers, &timer_tx).await?;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        Ok(self.host)
    }

    /// Act on a handler outcome and the effects it produced.
    async fn settle(
        &mut self,
        outcome: Result<()>,
        timers: &mut HashMap<HostTimer, JoinHandle<()>>,
        timer_tx: &mpsc::UnboundedSender<HostTimer>,
    ) -> Result<()> {
        if let Err(e) = outcome {
            if e.is_fatal() {
                error!(node = %self.host.id(), error = %e, "fatal error, stopping node");
                for (_, handle) in timers.drain() {
                    handle.abort();
                }
                return Err(e);
            }
        }

        for effect in self.host.take_effects() {
            match effect {
                HostEffect::Transmit(envelope) => {
                    if let Err(e) = self.transport.send(&envelope).await {
                        warn!(to = %envelope.next_hop(), error = %e, "send failed");
                    }
                }
                HostEffect::Schedule { timer, after } => {
                    let tx = timer_tx.clone();
                    let handle = tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = tx.send(timer);
                    });
                    timers.insert(timer, handle);
                }
                HostEffect::Cancel { timer } => {
                    if let Some(handle) = timers.remove(&timer) {
                        handle.abort();
                    }
                }
                HostEffect::Report(status) => self.reporter.submit(self.host.id(), status),
                HostEffect::PeerDead { peer, incarnation } => {
                    debug!(node = %self.host.id(), peer = %peer.id(), incarnation, "peer dead");
                }
                HostEffect::ParentsChanged(parents) => {
                    debug!(node = %self.host.id(), parents = ?parents.members(), "parents changed");
                }
            }
        }
        Ok(())
    }
}
