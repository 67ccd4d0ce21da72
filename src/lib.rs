//! Wire codec, lease manager, security gate and orchestrator for a DHCPv4
//! server core.
//!
//! This crate implements the protocol and policy logic of a standalone
//! DHCPv4 daemon: parsing and building BOOTP/DHCP datagrams, allocating and
//! tracking leases, enforcing an ordered security pipeline, and driving the
//! worker threads that tie it all together. It does not parse a
//! configuration file, open a PID file, or install a logging backend —
//! those are a caller's job; this crate consumes an already-built
//! [`config::Config`] and emits log records through the [`log`] facade.

pub mod addr;
pub mod config;
pub mod error;
pub mod event;
pub mod lease;
pub mod options;
pub mod persist;
pub mod security;
pub mod server;
pub mod stats;
pub mod transport;
pub mod wire;

pub use addr::Mac;
pub use config::Config;
pub use error::{ConfigError, Error, LeaseError, SecurityError, WireError};
pub use event::{EventSink, LeaseEvent, NullSink};
pub use lease::{Lease, LeaseState, LeaseType};
pub use security::{SecurityEvent, Severity, Stage};
pub use server::Server;
pub use stats::StatisticsSnapshot;
pub use wire::{DhcpMessage, MessageType, RawOption};
