//! SWIM node - failure detector over NAT relay, on UDP
//!
//! Composes the sans-IO protocol engines into a runnable node.
//!
//! # Architecture
//!
//! - **Host**: wires a `FailureDetector` on top of a `NatRelay`
//! - **Transport**: socket2-tuned UDP socket, one bincode envelope per datagram
//! - **Runtime**: tokio event loop for timers, datagrams and peer samples
//! - **Config**: `SWIM_*` environment variables
//!
//! # Example
//!
//! ```no_run
//! use swim_node::{NodeConfig, NodeRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::from_env()?;
//!     let runtime = NodeRuntime::bind(config).await?;
//!     runtime
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod runtime;
pub mod transport;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use host::{Host, HostEffect, HostTimer, LogReporter, StatusReporter};
pub use runtime::NodeRuntime;
pub use transport::{rumor_capacity, Transport, MAX_DATAGRAM};
