//! Error taxonomy for the DHCP core, grouped by the component that raises
//! each variant.
//!
//! Wire- and protocol-level errors are non-fatal: the orchestrator converts
//! them into a NAK or a silent drop. Only a bind failure during
//! [`crate::server::Server::initialize`] is fatal to the process.

use crate::addr::Mac;
use std::net::Ipv4Addr;

/// Errors raised while parsing or serializing a wire-format DHCP datagram.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("datagram too short: {len} bytes, need at least 240")]
    ShortDatagram { len: usize },
    #[error("magic cookie missing or incorrect")]
    BadMagic,
    #[error("option {code} overflows the datagram (claimed len {len} at offset {offset})")]
    OptionOverflow { code: u8, len: usize, offset: usize },
    #[error("option 53 (message type) is missing")]
    MissingMessageType,
    #[error("option 53 carries an unrecognized message type value {0}")]
    InvalidMessageType(u8),
    #[error("hlen {0} exceeds the 16-byte chaddr field")]
    InvalidHlen(u8),
    #[error("option {0} body exceeds 255 bytes")]
    OptionTooLarge(u8),
    #[error("output buffer is too small to hold the serialized message")]
    BufferTooSmall,
    #[error("BOOTP option overload (option 52) is not supported")]
    OptionOverload,
}

/// Errors raised by the lease store.
#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("no address available in subnet {subnet} pool")]
    PoolExhausted { subnet: String },
    #[error("no lease on file for mac {mac} matching ip {ip}")]
    NoSuchLease { mac: Mac, ip: Ipv4Addr },
    #[error("request is not well-formed: {0}")]
    InvalidRequest(String),
    #[error("no subnet matches this request")]
    NoMatchingSubnet,
    #[error("failed to persist lease database: {0}")]
    WriteFailed(String),
    #[error("failed to load lease database: {0}")]
    LoadFailed(String),
    #[error("live lease count would exceed max_leases ({0})")]
    CapacityExceeded(u32),
}

/// Errors raised by the security gate. The concrete stage is never
/// surfaced to the network peer — a rejected client just gets silence or a
/// NAK — only logged and carried in a [`crate::security::SecurityEvent`].
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("denied by stage {stage:?}: {reason}")]
    Denied {
        stage: crate::security::Stage,
        reason: String,
    },
}

/// Errors surfaced to a caller of the control surface (`initialize`, `reload`).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to bind listen address {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Umbrella error type returned by the small number of operations that can
/// fail across component boundaries (mainly `initialize`/`reload`). Most
/// internal call sites use the narrower per-component error types above.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Lease(#[from] LeaseError),
    #[error(transparent)]
    Security(#[from] SecurityError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
