//! Lease store: the dual-indexed, mutex-guarded lease table plus static
//! reservations, conflict arbitration and the declined-IP quarantine.
//!
//! Leases live in one arena keyed by a small [`LeaseId`] handle rather than
//! being passed around by shared pointer; `by_mac` and `by_ip` are both
//! plain maps onto that handle so a reader of one index never needs the
//! other to complete its lookup, and both are kept in lockstep by the
//! same critical section.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use crate::addr::Mac;
use crate::config::{ConflictStrategy, Subnet};
use crate::error::LeaseError;
use crate::event::{EventSink, LeaseEvent};
use crate::wire::RawOption;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct LeaseId(u64);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LeaseType {
    Dynamic,
    Static,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LeaseState {
    Offered,
    Active,
    Expired,
    Released,
    Declined,
}

#[derive(Clone, Debug)]
pub struct Lease {
    pub mac: Mac,
    pub ip: Ipv4Addr,
    pub subnet_name: String,
    pub client_id: Option<Vec<u8>>,
    pub hostname: Option<String>,
    pub allocated_at: SystemTime,
    pub expires_at: SystemTime,
    pub original_allocated_at: SystemTime,
    pub lease_type: LeaseType,
    pub state: LeaseState,
    pub options: Vec<RawOption>,
}

impl Lease {
    pub fn renewal_at(&self) -> SystemTime {
        let total = self
            .expires_at
            .duration_since(self.allocated_at)
            .unwrap_or(Duration::ZERO);
        self.allocated_at + total / 2
    }

    pub fn rebinding_at(&self) -> SystemTime {
        let total = self
            .expires_at
            .duration_since(self.allocated_at)
            .unwrap_or(Duration::ZERO);
        self.allocated_at + (total / 8) * 7
    }

    pub fn within_renewal_window(&self, now: SystemTime) -> bool {
        now < self.renewal_at()
    }
}

#[derive(Clone, Debug)]
pub struct DeclinedEntry {
    pub ip: Ipv4Addr,
    pub declined_at: SystemTime,
    pub quarantine_until: SystemTime,
}

struct Inner {
    arena: HashMap<LeaseId, Lease>,
    by_mac: HashMap<(String, Mac), LeaseId>,
    by_ip: HashMap<(String, Ipv4Addr), LeaseId>,
    declined: HashMap<Ipv4Addr, DeclinedEntry>,
    next_id: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            arena: HashMap::new(),
            by_mac: HashMap::new(),
            by_ip: HashMap::new(),
            declined: HashMap::new(),
            next_id: 0,
        }
    }

    fn fresh_id(&mut self) -> LeaseId {
        let id = LeaseId(self.next_id);
        self.next_id += 1;
        id
    }

    fn insert(&mut self, lease: Lease) -> LeaseId {
        let key_mac = (lease.subnet_name.clone(), lease.mac);
        let key_ip = (lease.subnet_name.clone(), lease.ip);

        self.evict_by_mac(&key_mac);
        self.evict_by_ip(&key_ip);

        let id = self.fresh_id();
        self.by_mac.insert(key_mac, id);
        self.by_ip.insert(key_ip, id);
        self.arena.insert(id, lease);
        id
    }

    fn evict_by_mac(&mut self, key: &(String, Mac)) {
        if let Some(id) = self.by_mac.remove(key) {
            if let Some(lease) = self.arena.remove(&id) {
                self.by_ip.remove(&(lease.subnet_name.clone(), lease.ip));
            }
        }
    }

    fn evict_by_ip(&mut self, key: &(String, Ipv4Addr)) -> Option<Lease> {
        if let Some(id) = self.by_ip.remove(key) {
            if let Some(lease) = self.arena.remove(&id) {
                self.by_mac.remove(&(lease.subnet_name.clone(), lease.mac));
                return Some(lease);
            }
        }
        None
    }

    fn get_by_mac(&self, subnet: &str, mac: &Mac) -> Option<&Lease> {
        self.by_mac
            .get(&(subnet.to_string(), *mac))
            .and_then(|id| self.arena.get(id))
    }

    fn get_by_ip(&self, subnet: &str, ip: Ipv4Addr) -> Option<&Lease> {
        self.by_ip
            .get(&(subnet.to_string(), ip))
            .and_then(|id| self.arena.get(id))
    }

    fn remove_by_mac(&mut self, subnet: &str, mac: &Mac) -> Option<Lease> {
        let key = (subnet.to_string(), *mac);
        if let Some(id) = self.by_mac.remove(&key) {
            if let Some(lease) = self.arena.remove(&id) {
                self.by_ip.remove(&(lease.subnet_name.clone(), lease.ip));
                return Some(lease);
            }
        }
        None
    }

    fn is_quarantined(&self, ip: Ipv4Addr, now: SystemTime) -> bool {
        self.declined
            .get(&ip)
            .map(|e| now < e.quarantine_until)
            .unwrap_or(false)
    }
}

/// Owns all lease state; every mutating operation is serialized by a single
/// mutex. Critical sections never perform I/O — callers drive persistence
/// from the snapshot returned by [`LeaseStore::snapshot`].
pub struct LeaseStore {
    inner: Mutex<Inner>,
    dirty: AtomicBool,
    max_leases: Option<u32>,
    sink: Arc<dyn EventSink>,
}

impl LeaseStore {
    pub fn new(max_leases: Option<u32>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            dirty: AtomicBool::new(false),
            max_leases,
            sink,
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::Relaxed)
    }

    /// Allocates a lease for `mac`, preferring a static reservation, then an
    /// idempotent re-offer, then the client's requested address, then the
    /// lowest free address in the pool.
    pub fn allocate(
        &self,
        mac: &Mac,
        requested_ip: Option<Ipv4Addr>,
        subnet: &Subnet,
        now: SystemTime,
    ) -> Result<Lease, LeaseError> {
        let mut inner = self.inner.lock().unwrap();

        // Step 1: a static reservation always wins.
        if let Some(reservation) = subnet.reservation_for(mac) {
            let conflict_key = (subnet.name.clone(), reservation.ip);
            if let Some(existing) = inner.by_ip.get(&conflict_key).copied() {
                let holder = inner.arena.get(&existing).cloned();
                if let Some(holder) = holder {
                    if holder.mac != *mac {
                        apply_conflict_policy(&mut inner, subnet, &holder, &self.sink)?;
                    }
                }
            }

            let lease = Lease {
                mac: *mac,
                ip: reservation.ip,
                subnet_name: subnet.name.clone(),
                client_id: None,
                hostname: reservation.hostname.clone(),
                allocated_at: now,
                expires_at: now + subnet.lease_time,
                original_allocated_at: now,
                lease_type: LeaseType::Static,
                state: LeaseState::Offered,
                options: reservation.options.clone(),
            };
            inner.insert(lease.clone());
            drop(inner);
            self.mark_dirty();
            return Ok(lease);
        }

        // Step 2: idempotent re-offer within the renewal window.
        if let Some(existing) = inner.get_by_mac(&subnet.name, mac) {
            if existing.within_renewal_window(now) {
                return Ok(existing.clone());
            }
        }

        if let Some(max) = self.max_leases {
            if inner.arena.len() as u32 >= max {
                return Err(LeaseError::CapacityExceeded(max));
            }
        }

        // Step 3: honor a requested IP when eligible.
        if let Some(req) = requested_ip {
            if req != Ipv4Addr::UNSPECIFIED
                && subnet.in_dynamic_pool(req)
                && !subnet.is_excluded(req)
                && !inner.is_quarantined(req, now)
            {
                let holder = inner.get_by_ip(&subnet.name, req).cloned();
                let eligible = match &holder {
                    None => true,
                    Some(lease) => lease.mac == *mac,
                };
                if eligible {
                    let lease = self.build_dynamic_lease(*mac, req, subnet, now);
                    inner.insert(lease.clone());
                    drop(inner);
                    self.mark_dirty();
                    return Ok(lease);
                }
            }
        }

        // Step 4: linear scan, lowest IP wins.
        for ip in crate::addr::iter_range(subnet.range_start, subnet.range_end) {
            if subnet.is_excluded(ip) {
                continue;
            }
            if inner.is_quarantined(ip, now) {
                continue;
            }
            if subnet
                .reservations
                .iter()
                .any(|r| r.ip == ip && r.mac != *mac)
            {
                continue;
            }
            if let Some(holder) = inner.get_by_ip(&subnet.name, ip) {
                if holder.mac != *mac && matches!(holder.state, LeaseState::Active | LeaseState::Offered)
                {
                    continue;
                }
            }

            let lease = self.build_dynamic_lease(*mac, ip, subnet, now);
            inner.insert(lease.clone());
            drop(inner);
            self.mark_dirty();
            return Ok(lease);
        }

        Err(LeaseError::PoolExhausted {
            subnet: subnet.name.clone(),
        })
    }

    fn build_dynamic_lease(&self, mac: Mac, ip: Ipv4Addr, subnet: &Subnet, now: SystemTime) -> Lease {
        Lease {
            mac,
            ip,
            subnet_name: subnet.name.clone(),
            client_id: None,
            hostname: None,
            allocated_at: now,
            expires_at: now + subnet.lease_time,
            original_allocated_at: now,
            lease_type: LeaseType::Dynamic,
            state: LeaseState::Offered,
            options: vec![],
        }
    }

    /// Promotes an OFFERED lease to ACTIVE on the matching REQUEST.
    pub fn commit(&self, mac: &Mac, ip: Ipv4Addr, subnet_name: &str) -> Result<Lease, LeaseError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (subnet_name.to_string(), *mac);
        let id = *inner
            .by_mac
            .get(&key)
            .ok_or(LeaseError::NoSuchLease { mac: *mac, ip })?;
        let lease = inner.arena.get_mut(&id).ok_or(LeaseError::NoSuchLease { mac: *mac, ip })?;
        if lease.ip != ip {
            return Err(LeaseError::NoSuchLease { mac: *mac, ip });
        }
        lease.state = LeaseState::Active;
        let result = lease.clone();
        drop(inner);
        self.mark_dirty();
        Ok(result)
    }

    /// Renews an existing lease, capping `expires_at` at
    /// `original_allocated_at + max_lease_time` regardless of how many
    /// renewals led up to this one.
    pub fn renew(
        &self,
        mac: &Mac,
        ip: Ipv4Addr,
        subnet: &Subnet,
        now: SystemTime,
    ) -> Result<Lease, LeaseError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (subnet.name.clone(), *mac);
        let id = *inner
            .by_mac
            .get(&key)
            .ok_or(LeaseError::NoSuchLease { mac: *mac, ip })?;
        let lease = inner
            .arena
            .get_mut(&id)
            .ok_or(LeaseError::NoSuchLease { mac: *mac, ip })?;

        if lease.ip != ip {
            return Err(LeaseError::NoSuchLease { mac: *mac, ip });
        }

        let cap = lease.original_allocated_at + subnet.max_lease_time;
        let desired = now + subnet.lease_time;
        lease.expires_at = desired.min(cap);
        lease.state = LeaseState::Active;

        let old_ip = lease.ip;
        let result = lease.clone();

        // Re-key by_ip in case renewal is called after an IP-preserving
        // rename (not currently possible, kept for index-consistency
        // robustness under future changes).
        if old_ip != ip {
            inner.by_ip.remove(&(subnet.name.clone(), old_ip));
            inner.by_ip.insert((subnet.name.clone(), ip), id);
        }

        drop(inner);
        self.mark_dirty();
        Ok(result)
    }

    /// RELEASE: mark state RELEASED, clear both indexes, free the IP.
    pub fn release(&self, mac: &Mac, subnet_name: &str) -> Result<(), LeaseError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .remove_by_mac(subnet_name, mac)
            .ok_or(LeaseError::NoSuchLease {
                mac: *mac,
                ip: Ipv4Addr::UNSPECIFIED,
            })?;
        drop(inner);
        self.mark_dirty();
        Ok(())
    }

    /// DECLINE: remove the lease and quarantine the IP.
    pub fn decline(
        &self,
        mac: &Mac,
        ip: Ipv4Addr,
        subnet_name: &str,
        quarantine: Duration,
        now: SystemTime,
    ) -> Result<(), LeaseError> {
        let mut inner = self.inner.lock().unwrap();
        inner.remove_by_mac(subnet_name, mac);
        inner.declined.insert(
            ip,
            DeclinedEntry {
                ip,
                declined_at: now,
                quarantine_until: now + quarantine,
            },
        );
        drop(inner);
        self.mark_dirty();
        Ok(())
    }

    /// Transitions expired ACTIVE/OFFERED leases to EXPIRED and frees
    /// their IPs; also expires quarantine entries. Returns the number of
    /// leases reaped.
    pub fn sweep(&self, now: SystemTime) -> usize {
        let mut inner = self.inner.lock().unwrap();

        let expired: Vec<(String, Mac, Ipv4Addr)> = inner
            .arena
            .values()
            .filter(|l| {
                matches!(l.state, LeaseState::Active | LeaseState::Offered) && l.expires_at < now
            })
            .map(|l| (l.subnet_name.clone(), l.mac, l.ip))
            .collect();

        let count = expired.len();
        for (subnet_name, mac, ip) in &expired {
            inner.remove_by_mac(subnet_name, mac);
            self.sink.on_lease_event(&LeaseEvent::Expired { mac: *mac, ip: *ip });
        }

        inner.declined.retain(|_, e| e.quarantine_until >= now);

        if count > 0 {
            drop(inner);
            self.mark_dirty();
        }

        count
    }

    pub fn get_active_leases(&self) -> Vec<Lease> {
        self.inner
            .lock()
            .unwrap()
            .arena
            .values()
            .filter(|l| matches!(l.state, LeaseState::Active | LeaseState::Offered))
            .cloned()
            .collect()
    }

    pub fn lease_for_mac(&self, subnet_name: &str, mac: &Mac) -> Option<Lease> {
        self.inner.lock().unwrap().get_by_mac(subnet_name, mac).cloned()
    }

    pub fn lease_for_ip(&self, subnet_name: &str, ip: Ipv4Addr) -> Option<Lease> {
        self.inner.lock().unwrap().get_by_ip(subnet_name, ip).cloned()
    }

    pub fn live_lease_count(&self) -> usize {
        self.inner.lock().unwrap().arena.len()
    }

    /// Restores state loaded from the persistence file at startup,
    /// dropping any record already expired.
    pub fn restore(&self, leases: Vec<Lease>, declined: Vec<DeclinedEntry>, now: SystemTime) {
        let mut inner = self.inner.lock().unwrap();
        for lease in leases {
            if lease.expires_at >= now {
                inner.insert(lease);
            }
        }
        for entry in declined {
            if entry.quarantine_until >= now {
                inner.declined.insert(entry.ip, entry);
            }
        }
    }

    /// A consistent point-in-time copy for the persistence writer thread to
    /// serialize without holding the lock during I/O.
    pub fn snapshot(&self) -> (Vec<Lease>, Vec<DeclinedEntry>) {
        let inner = self.inner.lock().unwrap();
        (
            inner.arena.values().cloned().collect(),
            inner.declined.values().cloned().collect(),
        )
    }
}

fn apply_conflict_policy(
    inner: &mut Inner,
    subnet: &Subnet,
    holder: &Lease,
    sink: &Arc<dyn EventSink>,
) -> Result<(), LeaseError> {
    match subnet.conflict_strategy {
        ConflictStrategy::Reject => Err(LeaseError::InvalidRequest(format!(
            "ip {} is held by {} and conflict_strategy is REJECT",
            holder.ip, holder.mac
        ))),
        // EXTEND and NEGOTIATE both assume a peer server to hand the
        // evicted client off to, which this single-server core doesn't
        // have; without one, reclaiming the IP immediately is the only
        // option, so both behave like REPLACE here (see DESIGN.md).
        ConflictStrategy::Replace | ConflictStrategy::Extend | ConflictStrategy::Negotiate => {
            inner.remove_by_mac(&subnet.name, &holder.mac);
            sink.on_lease_event(&LeaseEvent::Conflict {
                ip: holder.ip,
                evicted_mac: holder.mac,
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Reservation;
    use crate::event::NullSink;
    use std::time::Duration;

    fn subnet() -> Subnet {
        Subnet {
            name: "lan".into(),
            network: Ipv4Addr::new(192, 168, 1, 0),
            prefix_length: 24,
            range_start: Ipv4Addr::new(192, 168, 1, 100),
            range_end: Ipv4Addr::new(192, 168, 1, 102),
            gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
            dns_servers: vec![],
            domain_name: None,
            lease_time: Duration::from_secs(3600),
            max_lease_time: Duration::from_secs(7200),
            options: vec![],
            reservations: vec![],
            exclusions: vec![],
            conflict_strategy: ConflictStrategy::Replace,
        }
    }

    fn mac(last: u8) -> Mac {
        Mac([0xaa, 0xbb, 0xcc, 0xdd, 0xee, last])
    }

    #[test]
    fn allocate_respects_max_leases_cap() {
        let store = LeaseStore::new(Some(1), Arc::new(NullSink));
        let now = SystemTime::now();
        store.allocate(&mac(1), None, &subnet(), now).unwrap();
        let err = store.allocate(&mac(2), None, &subnet(), now).unwrap_err();
        assert!(matches!(err, LeaseError::CapacityExceeded(1)));
    }

    #[test]
    fn allocate_picks_lowest_free_ip() {
        let store = LeaseStore::new(None, Arc::new(NullSink));
        let now = SystemTime::now();
        let lease = store.allocate(&mac(1), None, &subnet(), now).unwrap();
        assert_eq!(lease.ip, Ipv4Addr::new(192, 168, 1, 100));
    }

    #[test]
    fn allocate_is_idempotent_within_renewal_window() {
        let store = LeaseStore::new(None, Arc::new(NullSink));
        let now = SystemTime::now();
        let first = store.allocate(&mac(1), None, &subnet(), now).unwrap();
        let second = store.allocate(&mac(1), None, &subnet(), now).unwrap();
        assert_eq!(first.ip, second.ip);
    }

    #[test]
    fn pool_exhaustion_is_reported() {
        let store = LeaseStore::new(None, Arc::new(NullSink));
        let now = SystemTime::now();
        store.allocate(&mac(1), None, &subnet(), now).unwrap();
        store.allocate(&mac(2), None, &subnet(), now).unwrap();
        store.allocate(&mac(3), None, &subnet(), now).unwrap();
        let err = store.allocate(&mac(4), None, &subnet(), now).unwrap_err();
        assert!(matches!(err, LeaseError::PoolExhausted { .. }));
    }

    #[test]
    fn decline_quarantines_the_ip() {
        let store = LeaseStore::new(None, Arc::new(NullSink));
        let now = SystemTime::now();
        let lease = store.allocate(&mac(1), None, &subnet(), now).unwrap();
        store
            .decline(&mac(1), lease.ip, "lan", Duration::from_secs(600), now)
            .unwrap();

        let second = store.allocate(&mac(2), None, &subnet(), now).unwrap();
        assert_ne!(second.ip, lease.ip);

        let later = now + Duration::from_secs(601);
        let third = store.allocate(&mac(3), Some(lease.ip), &subnet(), later).unwrap();
        assert_eq!(third.ip, lease.ip);
    }

    #[test]
    fn static_reservation_dominates_and_evicts() {
        let mut s = subnet();
        s.reservations.push(Reservation {
            mac: mac(9),
            ip: Ipv4Addr::new(192, 168, 1, 100),
            hostname: None,
            options: vec![],
        });
        let store = LeaseStore::new(None, Arc::new(NullSink));
        let now = SystemTime::now();

        let dynamic = store.allocate(&mac(1), Some(Ipv4Addr::new(192, 168, 1, 100)), &s, now);
        assert!(dynamic.is_ok());

        let reserved = store.allocate(&mac(9), None, &s, now).unwrap();
        assert_eq!(reserved.ip, Ipv4Addr::new(192, 168, 1, 100));
        assert!(store.lease_for_mac("lan", &mac(1)).is_none());
    }

    #[test]
    fn renew_never_exceeds_max_lease_time() {
        let store = LeaseStore::new(None, Arc::new(NullSink));
        let now = SystemTime::now();
        let lease = store.allocate(&mac(1), None, &subnet(), now).unwrap();
        store.commit(&mac(1), lease.ip, "lan").unwrap();

        let much_later = now + Duration::from_secs(3600 * 100);
        let renewed = store.renew(&mac(1), lease.ip, &subnet(), much_later).unwrap();
        let cap = lease.original_allocated_at + subnet().max_lease_time;
        assert!(renewed.expires_at <= cap);
    }

    #[test]
    fn sweep_frees_expired_leases() {
        let store = LeaseStore::new(None, Arc::new(NullSink));
        let now = SystemTime::now();
        let lease = store.allocate(&mac(1), None, &subnet(), now).unwrap();
        let later = lease.expires_at + Duration::from_secs(1);
        let reaped = store.sweep(later);
        assert_eq!(reaped, 1);
        assert!(store.lease_for_mac("lan", &mac(1)).is_none());
    }

    #[test]
    fn index_consistency_after_mixed_operations() {
        let store = LeaseStore::new(None, Arc::new(NullSink));
        let now = SystemTime::now();
        let l1 = store.allocate(&mac(1), None, &subnet(), now).unwrap();
        store.commit(&mac(1), l1.ip, "lan").unwrap();
        store.renew(&mac(1), l1.ip, &subnet(), now).unwrap();

        let by_mac = store.lease_for_mac("lan", &mac(1)).unwrap();
        let by_ip = store.lease_for_ip("lan", l1.ip).unwrap();
        assert_eq!(by_mac.ip, by_ip.ip);
        assert_eq!(by_mac.mac, by_ip.mac);
    }
}
