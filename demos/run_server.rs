//! Minimal standalone wiring: binds the server to a single subnet and runs
//! it until Ctrl-C. Run with `sudo` since binding to UDP port 67 requires
//! root on most systems.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use dhcpd_core::config::{Config, LeaseConfig, SecurityConfig, Subnet};
use dhcpd_core::Server;

fn main() {
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    let subnet = Subnet {
        name: "lan".into(),
        network: Ipv4Addr::new(192, 168, 0, 0),
        prefix_length: 24,
        range_start: Ipv4Addr::new(192, 168, 0, 50),
        range_end: Ipv4Addr::new(192, 168, 0, 200),
        gateway: Some(Ipv4Addr::new(192, 168, 0, 1)),
        dns_servers: vec![Ipv4Addr::new(1, 1, 1, 1)],
        domain_name: None,
        lease_time: Duration::from_secs(3600),
        max_lease_time: Duration::from_secs(86400),
        options: vec![],
        reservations: vec![],
        exclusions: vec![],
        conflict_strategy: Default::default(),
    };

    let config = Config {
        listen_addresses: vec![SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 67)],
        subnets: vec![subnet],
        global_options: vec![],
        max_leases: None,
        lease_file: Some("/tmp/dhcpd-core-demo.leases".into()),
        enable_security: false,
        security: SecurityConfig::default(),
        lease: LeaseConfig::default(),
    };

    let server = Arc::new(Server::initialize(config, None).expect("failed to initialize server"));
    server.start();

    log::info!("dhcpd-core demo server running; press Ctrl-C to stop");
    loop {
        std::thread::sleep(Duration::from_secs(1));
    }
}
