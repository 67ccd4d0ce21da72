//! Event-sink boundary: security and lease callbacks are a trait the
//! orchestrator depends on, with a default no-op implementation; the real
//! sink is injected at `initialize`.

use crate::lease::Lease;
use crate::security::SecurityEvent;

#[derive(Clone, Debug)]
pub enum LeaseEvent {
    Allocated(Lease),
    Renewed(Lease),
    Released { mac: crate::addr::Mac, ip: std::net::Ipv4Addr },
    Declined { ip: std::net::Ipv4Addr },
    Expired { mac: crate::addr::Mac, ip: std::net::Ipv4Addr },
    Conflict { ip: std::net::Ipv4Addr, evicted_mac: crate::addr::Mac },
}

/// Injected observer for security and lease lifecycle events. The core
/// never owns a concrete sink implementation; callers provide one (or rely
/// on [`NullSink`]) at [`crate::server::Server::initialize`].
pub trait EventSink: Send + Sync {
    fn on_security_event(&self, _event: &SecurityEvent) {}
    fn on_lease_event(&self, _event: &LeaseEvent) {}
}

/// Default no-op sink.
#[derive(Default)]
pub struct NullSink;

impl EventSink for NullSink {}
