//! Configuration value types consumed by the core.
//!
//! Parsing a config file (JSON/YAML/INI) is out of scope here; this module
//! only defines the shape of the already-built value the caller hands to
//! [`crate::server::Server::initialize`].

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::addr::Mac;
use crate::error::ConfigError;
use crate::wire::RawOption;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConflictStrategy {
    Reject,
    Replace,
    Extend,
    Negotiate,
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        ConflictStrategy::Replace
    }
}

/// A single static reservation: `mac -> ip` plus optional per-reservation
/// option overrides.
#[derive(Clone, Debug)]
pub struct Reservation {
    pub mac: Mac,
    pub ip: Ipv4Addr,
    pub hostname: Option<String>,
    pub options: Vec<RawOption>,
}

/// A routable network served by this daemon.
#[derive(Clone, Debug)]
pub struct Subnet {
    pub name: String,
    pub network: Ipv4Addr,
    pub prefix_length: u8,
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub domain_name: Option<String>,
    pub lease_time: Duration,
    pub max_lease_time: Duration,
    pub options: Vec<RawOption>,
    pub reservations: Vec<Reservation>,
    pub exclusions: Vec<(Ipv4Addr, Ipv4Addr)>,
    pub conflict_strategy: ConflictStrategy,
}

impl Subnet {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if crate::addr::network(self.range_start, self.prefix_length) != self.network {
            return Err(ConfigError::Invalid(format!(
                "subnet {}: range_start is not within network/{}",
                self.name, self.prefix_length
            )));
        }
        if crate::addr::network(self.range_end, self.prefix_length) != self.network {
            return Err(ConfigError::Invalid(format!(
                "subnet {}: range_end is not within network/{}",
                self.name, self.prefix_length
            )));
        }
        if u32::from(self.range_start) > u32::from(self.range_end) {
            return Err(ConfigError::Invalid(format!(
                "subnet {}: range_start must be <= range_end",
                self.name
            )));
        }
        for r in &self.reservations {
            if !crate::addr::in_subnet(r.ip, self.network, self.prefix_length) {
                return Err(ConfigError::Invalid(format!(
                    "subnet {}: reservation for {} has ip {} outside the subnet",
                    self.name, r.mac, r.ip
                )));
            }
        }
        for (a, b) in &self.exclusions {
            if u32::from(*a) > u32::from(*b) {
                return Err(ConfigError::Invalid(format!(
                    "subnet {}: exclusion range {}-{} is inverted",
                    self.name, a, b
                )));
            }
        }
        Ok(())
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        crate::addr::in_subnet(ip, self.network, self.prefix_length)
    }

    pub fn in_dynamic_pool(&self, ip: Ipv4Addr) -> bool {
        crate::addr::in_range(ip, self.range_start, self.range_end)
    }

    pub fn is_excluded(&self, ip: Ipv4Addr) -> bool {
        self.exclusions
            .iter()
            .any(|(a, b)| crate::addr::in_range(ip, *a, *b))
    }

    pub fn reservation_for(&self, mac: &Mac) -> Option<&Reservation> {
        self.reservations.iter().find(|r| &r.mac == mac)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterMode {
    Allow,
    Deny,
    AllowListOnly,
}

#[derive(Clone, Debug)]
pub struct MacFilterRule {
    pub pattern: String,
    pub allow: bool,
    pub expires: Option<std::time::SystemTime>,
}

#[derive(Clone, Debug)]
pub struct IpFilterRule {
    pub ip: Ipv4Addr,
    pub mask: u32,
    pub allow: bool,
    pub expires: Option<std::time::SystemTime>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitIdentifierType {
    Mac,
    Ip,
    Interface,
}

#[derive(Clone, Debug)]
pub struct RateLimitRule {
    pub identifier: Option<String>,
    pub identifier_type: RateLimitIdentifierType,
    pub max_requests: u32,
    pub window: Duration,
    pub block_duration: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct MacFilterConfig {
    pub mode: Option<FilterMode>,
    pub rules: Vec<MacFilterRule>,
}

#[derive(Clone, Debug, Default)]
pub struct IpFilterConfig {
    pub rules: Vec<IpFilterRule>,
}

#[derive(Clone, Debug, Default)]
pub struct SnoopingConfig {
    pub enabled: bool,
    pub trusted_interfaces: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct RateLimitConfig {
    pub rules: Vec<RateLimitRule>,
}

#[derive(Clone, Debug, Default)]
pub struct Option82Config {
    pub enabled: bool,
    pub required_interfaces: Vec<String>,
    /// Trusted `(circuit_id, remote_id)` pairs. Empty means all present
    /// agents are trusted.
    pub trusted_agents: Vec<(Vec<u8>, Vec<u8>)>,
}

#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub key: Vec<u8>,
    /// Per-client HMAC keys, keyed by MAC; falls back to `key` when absent.
    pub client_credentials: Vec<(Mac, Vec<u8>)>,
}

#[derive(Clone, Debug, Default)]
pub struct SecurityConfig {
    pub enabled: bool,
    pub dhcp_snooping: SnoopingConfig,
    pub mac_filter: MacFilterConfig,
    pub ip_filter: IpFilterConfig,
    pub rate_limit: RateLimitConfig,
    pub option82: Option82Config,
    pub authentication: AuthConfig,
}

#[derive(Clone, Debug)]
pub struct LeaseConfig {
    pub conflict_strategy: ConflictStrategy,
    pub quarantine: Duration,
    pub offer_timeout: Duration,
    pub auto_save_interval: Duration,
    pub sweep_interval: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            conflict_strategy: ConflictStrategy::Replace,
            quarantine: Duration::from_secs(600),
            offer_timeout: Duration::from_secs(60),
            auto_save_interval: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Top-level configuration value consumed by [`crate::server::Server`].
#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addresses: Vec<std::net::SocketAddrV4>,
    pub subnets: Vec<Subnet>,
    pub global_options: Vec<RawOption>,
    pub max_leases: Option<u32>,
    pub lease_file: Option<std::path::PathBuf>,
    pub enable_security: bool,
    pub security: SecurityConfig,
    pub lease: LeaseConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addresses.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one listen_address is required".into(),
            ));
        }
        for subnet in &self.subnets {
            subnet.validate()?;
        }
        if matches!(
            self.lease.conflict_strategy,
            ConflictStrategy::Extend | ConflictStrategy::Negotiate
        ) {
            // EXTEND/NEGOTIATE reclaim the conflicting lease immediately,
            // same as REPLACE (see DESIGN.md), but still require a subnet
            // with room to extend towards.
            for subnet in &self.subnets {
                if subnet.max_lease_time < subnet.lease_time {
                    return Err(ConfigError::Invalid(format!(
                        "subnet {}: max_lease_time must be >= lease_time to use {:?}",
                        subnet.name, self.lease.conflict_strategy
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn subnet_for_giaddr(&self, giaddr: Ipv4Addr) -> Option<&Subnet> {
        self.subnets.iter().find(|s| s.contains(giaddr))
    }

    pub fn subnet_by_name(&self, name: &str) -> Option<&Subnet> {
        self.subnets.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet() -> Subnet {
        Subnet {
            name: "lan".into(),
            network: Ipv4Addr::new(192, 168, 1, 0),
            prefix_length: 24,
            range_start: Ipv4Addr::new(192, 168, 1, 100),
            range_end: Ipv4Addr::new(192, 168, 1, 200),
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

    #[test]
    fn valid_subnet_passes() {
        assert!(subnet().validate().is_ok());
    }

    #[test]
    fn range_outside_network_is_rejected() {
        let mut s = subnet();
        s.range_end = Ipv4Addr::new(192, 168, 2, 200);
        assert!(s.validate().is_err());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let mut s = subnet();
        std::mem::swap(&mut s.range_start, &mut s.range_end);
        assert!(s.validate().is_err());
    }

    #[test]
    fn reservation_outside_subnet_is_rejected() {
        let mut s = subnet();
        s.reservations.push(Reservation {
            mac: "aa:bb:cc:dd:ee:01".parse().unwrap(),
            ip: Ipv4Addr::new(10, 0, 0, 5),
            hostname: None,
            options: vec![],
        });
        assert!(s.validate().is_err());
    }
}
