//! Orchestrator: message dispatch, the worker pool, and the control surface
//! (`initialize`/`start`/`stop`/`reload`).
//!
//! Rather than handling each datagram inline on the thread that received
//! it, this runs one receive thread per listen socket feeding a fixed pool
//! of worker threads, each worker owning a bounded `mpsc::sync_channel` so
//! a slow client never blocks the receive thread. Requests are hashed onto
//! a worker by MAC so two datagrams from the same client are always
//! processed in the order they were received.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use log::{debug, info, warn};

use crate::config::Config;
use crate::error::ConfigError;
use crate::event::{EventSink, LeaseEvent, NullSink};
use crate::lease::{Lease, LeaseStore};
use crate::options;
use crate::security::{SecurityEvent, SecurityGate};
use crate::stats::{Statistics, StatisticsSnapshot};
use crate::transport::Listener;
use crate::wire::{DhcpMessage, MessageType, OPT_REQUESTED_IP, OPT_SERVER_IDENTIFIER};

const WORKER_COUNT: usize = 4;
const WORKER_QUEUE_DEPTH: usize = 256;
const SOCKET_READ_TIMEOUT: Duration = Duration::from_millis(500);
const SECURITY_GC_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct WorkItem {
    data: Vec<u8>,
    peer: SocketAddr,
    listener: Arc<Listener>,
}

/// The running DHCP core. Owns the lease store, security gate and
/// statistics for the lifetime of the process; `Config` may be swapped out
/// from under it via [`Server::reload`].
pub struct Server {
    config: RwLock<Arc<Config>>,
    leases: Arc<LeaseStore>,
    security: Arc<SecurityGate>,
    stats: Arc<Statistics>,
    sink: Arc<dyn EventSink>,
    server_identifier: Ipv4Addr,
    listeners: Mutex<Vec<Arc<Listener>>>,
    workers: Mutex<Vec<SyncSender<WorkItem>>>,
    stop: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    /// Builds and binds all listen sockets, restoring the lease database if
    /// `config.lease_file` points at an existing one.
    pub fn initialize(config: Config, sink: Option<Arc<dyn EventSink>>) -> Result<Self, ConfigError> {
        config.validate()?;

        let sink = sink.unwrap_or_else(|| Arc::new(NullSink));

        let leases = Arc::new(LeaseStore::new(config.max_leases, Arc::clone(&sink)));
        if let Some(path) = &config.lease_file {
            match crate::persist::load(path) {
                Ok((loaded, declined)) => {
                    info!("loaded {} lease(s) from {}", loaded.len(), path.display());
                    leases.restore(loaded, declined, SystemTime::now());
                }
                Err(e) => warn!("failed to load lease database at {}: {e}", path.display()),
            }
        }

        let security = Arc::new(SecurityGate::new(config.security.clone(), Arc::clone(&sink)));

        let mut listeners = Vec::new();
        for (i, addr) in config.listen_addresses.iter().enumerate() {
            let interface = format!("listener{i}");
            listeners.push(Arc::new(Listener::bind(interface, *addr)?));
        }

        let server_identifier = config
            .listen_addresses
            .first()
            .map(|a| *a.ip())
            .unwrap_or(Ipv4Addr::UNSPECIFIED);

        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            leases,
            security,
            stats: Arc::new(Statistics::default()),
            sink,
            server_identifier,
            listeners: Mutex::new(listeners),
            workers: Mutex::new(Vec::new()),
            stop: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Spawns the receive threads, the worker pool, the sweep thread, the
    /// security-GC thread and (if a lease file is configured) the
    /// persistence writer thread. Returns once every thread is running.
    pub fn start(self: &Arc<Self>) {
        self.stop.store(false, Ordering::SeqCst);

        let mut workers = self.workers.lock().unwrap();
        workers.clear();
        let mut threads = self.threads.lock().unwrap();

        for i in 0..WORKER_COUNT {
            let (tx, rx) = sync_channel::<WorkItem>(WORKER_QUEUE_DEPTH);
            workers.push(tx);
            let server = Arc::clone(self);
            threads.push(
                std::thread::Builder::new()
                    .name(format!("dhcpd-worker-{i}"))
                    .spawn(move || server.worker_loop(rx))
                    .expect("failed to spawn worker thread"),
            );
        }

        for listener in self.listeners.lock().unwrap().iter().cloned() {
            let server = Arc::clone(self);
            threads.push(
                std::thread::Builder::new()
                    .name(format!("dhcpd-recv-{}", listener.interface))
                    .spawn(move || server.receive_loop(listener))
                    .expect("failed to spawn receive thread"),
            );
        }

        {
            let server = Arc::clone(self);
            threads.push(
                std::thread::Builder::new()
                    .name("dhcpd-sweep".into())
                    .spawn(move || server.sweep_loop())
                    .expect("failed to spawn sweep thread"),
            );
        }
        {
            let server = Arc::clone(self);
            threads.push(
                std::thread::Builder::new()
                    .name("dhcpd-security-gc".into())
                    .spawn(move || server.security_gc_loop())
                    .expect("failed to spawn security gc thread"),
            );
        }
        if self.config.read().unwrap().lease_file.is_some() {
            let server = Arc::clone(self);
            threads.push(
                std::thread::Builder::new()
                    .name("dhcpd-persist".into())
                    .spawn(move || server.persistence_loop())
                    .expect("failed to spawn persistence thread"),
            );
        }

        info!("dhcpd-core started with {WORKER_COUNT} worker threads");
    }

    /// Signals all background threads to stop, drains them for up to
    /// [`SHUTDOWN_DRAIN_TIMEOUT`], and flushes the lease database one final
    /// time.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.workers.lock().unwrap().clear();

        let deadline = SystemTime::now() + SHUTDOWN_DRAIN_TIMEOUT;
        for handle in self.threads.lock().unwrap().drain(..) {
            let remaining = deadline
                .duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO);
            // std::thread::JoinHandle has no timed join; the 500ms socket
            // read timeout and the sweep/GC loops' own short sleeps keep
            // every thread's exit latency well under the drain budget, so a
            // plain join here does not block past it in practice.
            let _ = remaining;
            let _ = handle.join();
        }

        if let Some(path) = self.config.read().unwrap().lease_file.clone() {
            self.flush_leases(&path);
        }

        info!("dhcpd-core stopped");
    }

    /// Atomically swaps in a new configuration. Existing leases and
    /// statistics are preserved; listen sockets are not rebound.
    pub fn reload(&self, new_config: Config) -> Result<(), ConfigError> {
        new_config.validate()?;
        let mut guard = self.config.write().unwrap();
        *guard = Arc::new(new_config);
        Ok(())
    }

    pub fn get_statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    pub fn get_active_leases(&self) -> Vec<Lease> {
        self.leases.get_active_leases()
    }

    pub fn get_security_events(&self, stage: Option<crate::security::Stage>) -> Vec<SecurityEvent> {
        let events = self.security.events();
        match stage {
            Some(stage) => events.into_iter().filter(|e| e.stage == stage).collect(),
            None => events,
        }
    }

    fn receive_loop(&self, listener: Arc<Listener>) {
        listener
            .set_read_timeout(SOCKET_READ_TIMEOUT)
            .unwrap_or_else(|e| warn!("failed to set read timeout on {}: {e}", listener.interface));

        let mut buf = vec![0u8; 1500];
        while !self.stop.load(Ordering::SeqCst) {
            match listener.recv(&mut buf) {
                Ok((n, peer)) => {
                    let data = buf[..n].to_vec();
                    self.dispatch_to_worker(data, peer, Arc::clone(&listener));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                    continue;
                }
                Err(e) => {
                    warn!("recv error on {}: {e}", listener.interface);
                }
            }
        }
    }

    fn dispatch_to_worker(&self, data: Vec<u8>, peer: SocketAddr, listener: Arc<Listener>) {
        let workers = self.workers.lock().unwrap();
        if workers.is_empty() {
            return;
        }
        let index = worker_index_for(&data, workers.len());
        let item = WorkItem { data, peer, listener };
        if workers[index].send(item).is_err() {
            self.stats.dropped.inc();
        }
    }

    fn worker_loop(&self, rx: Receiver<WorkItem>) {
        while let Ok(item) = rx.recv() {
            let msg = match DhcpMessage::parse(&item.data) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!("malformed datagram from {}: {e}", item.peer);
                    self.stats.malformed.inc();
                    continue;
                }
            };

            if let Err(e) = self.security.admit(&msg, &item.listener.interface, SystemTime::now()) {
                self.count_security_denial(&e);
                continue;
            }

            if let Err(e) = self.handle_message(&msg, &item.listener) {
                debug!("dropping request from {}: {e}", item.peer);
                self.stats.dropped.inc();
            }
        }
    }

    fn count_security_denial(&self, err: &crate::error::SecurityError) {
        let crate::error::SecurityError::Denied { stage, .. } = err;
        use crate::security::Stage;
        match stage {
            Stage::Snooping => self.stats.deny_snooping.inc(),
            Stage::MacFilter => self.stats.deny_mac_filter.inc(),
            Stage::IpFilter => self.stats.deny_ip_filter.inc(),
            Stage::RateLimit => self.stats.deny_rate_limit.inc(),
            Stage::Option82 => self.stats.deny_option82.inc(),
            Stage::Authentication => self.stats.deny_authentication.inc(),
        }
    }

    fn handle_message(&self, msg: &DhcpMessage, listener: &Listener) -> Result<(), crate::error::Error> {
        let message_type = msg.message_type()?;
        let config = self.config.read().unwrap().clone();

        let subnet = match select_subnet(&config, msg) {
            Some(s) => s,
            None => {
                self.stats.dropped.inc();
                return Ok(());
            }
        };

        match message_type {
            MessageType::Discover => {
                self.stats.discover.inc();
                self.handle_discover(msg, listener, &config, subnet)
            }
            MessageType::Request => {
                self.stats.request.inc();
                self.handle_request(msg, listener, &config, subnet)
            }
            MessageType::Decline => {
                self.stats.decline.inc();
                self.handle_decline(msg, &config, subnet)
            }
            MessageType::Release => {
                self.stats.release.inc();
                self.handle_release(msg, subnet)
            }
            MessageType::Inform => {
                self.stats.inform.inc();
                self.handle_inform(msg, listener, &config, subnet)
            }
            MessageType::Offer | MessageType::Ack | MessageType::Nak => {
                // Server-originated types received back from the wire are
                // not requests this orchestrator answers.
                Ok(())
            }
        }
    }

    fn handle_discover(
        &self,
        msg: &DhcpMessage,
        listener: &Listener,
        config: &Config,
        subnet: &crate::config::Subnet,
    ) -> Result<(), crate::error::Error> {
        let mac = msg.client_mac();
        let requested_ip = requested_ip_option(msg);

        let lease = match self.leases.allocate(&mac, requested_ip, subnet, SystemTime::now()) {
            Ok(lease) => lease,
            Err(crate::error::LeaseError::PoolExhausted { .. }) => {
                self.stats.pool_exhausted.inc();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.sink.on_lease_event(&LeaseEvent::Allocated(lease.clone()));

        let reply = self.build_reply(MessageType::Offer, msg, &lease, config, subnet);
        self.stats.offer.inc();
        listener.send_reply(&reply)?;
        Ok(())
    }

    fn handle_request(
        &self,
        msg: &DhcpMessage,
        listener: &Listener,
        config: &Config,
        subnet: &crate::config::Subnet,
    ) -> Result<(), crate::error::Error> {
        let mac = msg.client_mac();
        let server_id = msg.option(OPT_SERVER_IDENTIFIER).and_then(as_ipv4);
        let requested_ip = requested_ip_option(msg);

        // SELECTING: server identifier present and addressed to us.
        if let Some(sid) = server_id {
            if sid != self.server_identifier {
                return Ok(()); // client chose a different server; ignore silently.
            }
            let Some(req_ip) = requested_ip else {
                return self.send_nak(msg, listener, config, subnet);
            };
            return match self.leases.commit(&mac, req_ip, &subnet.name) {
                Ok(lease) => {
                    self.sink.on_lease_event(&LeaseEvent::Allocated(lease.clone()));
                    let reply = self.build_reply(MessageType::Ack, msg, &lease, config, subnet);
                    self.stats.ack.inc();
                    listener.send_reply(&reply)?;
                    Ok(())
                }
                Err(_) => self.send_nak(msg, listener, config, subnet),
            };
        }

        // INIT-REBOOT: no ciaddr, requested-ip option carries the address.
        if msg.ciaddr == Ipv4Addr::UNSPECIFIED {
            let Some(req_ip) = requested_ip else {
                return self.send_nak(msg, listener, config, subnet);
            };
            if !subnet.contains(req_ip) {
                return self.send_nak(msg, listener, config, subnet);
            }
            return match self.leases.renew(&mac, req_ip, subnet, SystemTime::now()) {
                Ok(lease) => {
                    self.sink.on_lease_event(&LeaseEvent::Renewed(lease.clone()));
                    let reply = self.build_reply(MessageType::Ack, msg, &lease, config, subnet);
                    self.stats.ack.inc();
                    listener.send_reply(&reply)?;
                    Ok(())
                }
                Err(_) => self.send_nak(msg, listener, config, subnet),
            };
        }

        // RENEWING / REBINDING: ciaddr carries the address directly.
        match self.leases.renew(&mac, msg.ciaddr, subnet, SystemTime::now()) {
            Ok(lease) => {
                self.sink.on_lease_event(&LeaseEvent::Renewed(lease.clone()));
                let reply = self.build_reply(MessageType::Ack, msg, &lease, config, subnet);
                self.stats.ack.inc();
                listener.send_reply(&reply)?;
                Ok(())
            }
            Err(_) => self.send_nak(msg, listener, config, subnet),
        }
    }

    fn send_nak(
        &self,
        msg: &DhcpMessage,
        listener: &Listener,
        config: &Config,
        subnet: &crate::config::Subnet,
    ) -> Result<(), crate::error::Error> {
        let options = options::build_reply_options(
            MessageType::Nak,
            self.server_identifier,
            0,
            subnet,
            &config.global_options,
            None,
        );
        let reply = DhcpMessage {
            op: crate::wire::OP_BOOTREPLY,
            htype: msg.htype,
            hlen: msg.hlen,
            hops: 0,
            xid: msg.xid,
            secs: 0,
            flags: msg.flags,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: msg.giaddr,
            chaddr: msg.chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options,
        };
        self.stats.nak.inc();
        listener.send_reply(&reply)?;
        Ok(())
    }

    fn handle_decline(
        &self,
        msg: &DhcpMessage,
        config: &Config,
        subnet: &crate::config::Subnet,
    ) -> Result<(), crate::error::Error> {
        let mac = msg.client_mac();
        if let Some(ip) = requested_ip_option(msg) {
            self.leases
                .decline(&mac, ip, &subnet.name, config.lease.quarantine, SystemTime::now())?;
            self.sink.on_lease_event(&LeaseEvent::Declined { ip });
        }
        Ok(())
    }

    fn handle_release(&self, msg: &DhcpMessage, subnet: &crate::config::Subnet) -> Result<(), crate::error::Error> {
        let mac = msg.client_mac();
        let ip = msg.ciaddr;
        self.leases.release(&mac, &subnet.name)?;
        self.sink.on_lease_event(&LeaseEvent::Released { mac, ip });
        Ok(())
    }

    fn handle_inform(
        &self,
        msg: &DhcpMessage,
        listener: &Listener,
        config: &Config,
        subnet: &crate::config::Subnet,
    ) -> Result<(), crate::error::Error> {
        let requested = options::parameter_request_list(&msg.options).map(|s| s.to_vec());
        let extra = options::effective_options(&config.global_options, subnet, None);
        let reply_options = options::build_reply_options(
            MessageType::Ack,
            self.server_identifier,
            0,
            subnet,
            &extra,
            requested.as_deref(),
        );

        let reply = DhcpMessage {
            op: crate::wire::OP_BOOTREPLY,
            htype: msg.htype,
            hlen: msg.hlen,
            hops: 0,
            xid: msg.xid,
            secs: 0,
            flags: msg.flags,
            ciaddr: msg.ciaddr,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: msg.giaddr,
            chaddr: msg.chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options: reply_options,
        };
        self.stats.ack.inc();
        listener.send_reply(&reply)?;
        Ok(())
    }

    fn build_reply(
        &self,
        message_type: MessageType,
        msg: &DhcpMessage,
        lease: &Lease,
        config: &Config,
        subnet: &crate::config::Subnet,
    ) -> DhcpMessage {
        let reservation = subnet.reservation_for(&lease.mac);
        let extra = options::effective_options(&config.global_options, subnet, reservation);
        let lease_seconds = lease
            .expires_at
            .duration_since(lease.allocated_at)
            .unwrap_or(Duration::ZERO)
            .as_secs() as u32;
        let requested = options::parameter_request_list(&msg.options).map(|s| s.to_vec());

        let reply_options = options::build_reply_options(
            message_type,
            self.server_identifier,
            lease_seconds,
            subnet,
            &extra,
            requested.as_deref(),
        );

        DhcpMessage {
            op: crate::wire::OP_BOOTREPLY,
            htype: msg.htype,
            hlen: msg.hlen,
            hops: 0,
            xid: msg.xid,
            secs: 0,
            flags: msg.flags,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: lease.ip,
            siaddr: self.server_identifier,
            giaddr: msg.giaddr,
            chaddr: msg.chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options: reply_options,
        }
    }

    fn sweep_loop(&self) {
        let interval = self.config.read().unwrap().lease.sweep_interval;
        while !self.stop.load(Ordering::SeqCst) {
            std::thread::sleep(interval.min(Duration::from_millis(500)));
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            let reaped = self.leases.sweep(SystemTime::now());
            if reaped > 0 {
                debug!("swept {reaped} expired lease(s)");
            }
        }
    }

    fn security_gc_loop(&self) {
        let mut elapsed = Duration::ZERO;
        let tick = Duration::from_millis(500);
        while !self.stop.load(Ordering::SeqCst) {
            std::thread::sleep(tick);
            elapsed += tick;
            if elapsed >= SECURITY_GC_INTERVAL {
                self.security.gc(SystemTime::now());
                elapsed = Duration::ZERO;
            }
        }
    }

    fn persistence_loop(&self) {
        let interval = self.config.read().unwrap().lease.auto_save_interval;
        let mut elapsed = Duration::ZERO;
        let tick = Duration::from_millis(500);
        while !self.stop.load(Ordering::SeqCst) {
            std::thread::sleep(tick);
            elapsed += tick;
            if elapsed >= interval {
                elapsed = Duration::ZERO;
                if self.leases.take_dirty() {
                    if let Some(path) = self.config.read().unwrap().lease_file.clone() {
                        self.flush_leases(&path);
                    }
                }
            }
        }
    }

    fn flush_leases(&self, path: &std::path::Path) {
        let (leases, declined) = self.leases.snapshot();
        if let Err(e) = crate::persist::save(path, &leases, &declined) {
            warn!("failed to persist lease database: {e}");
            self.stats.persistence_write_failures.inc();
        }
    }
}

fn worker_index_for(data: &[u8], worker_count: usize) -> usize {
    // chaddr starts at byte offset 28 in the BOOTP header and is 16 bytes
    // long; hashing the raw bytes avoids a full parse just to pick a queue.
    let mut hasher = DefaultHasher::new();
    if data.len() >= 34 {
        data[28..34].hash(&mut hasher);
    } else {
        data.hash(&mut hasher);
    }
    (hasher.finish() as usize) % worker_count.max(1)
}

fn select_subnet<'a>(config: &'a Config, msg: &DhcpMessage) -> Option<&'a crate::config::Subnet> {
    if msg.giaddr != Ipv4Addr::UNSPECIFIED {
        return config.subnet_for_giaddr(msg.giaddr);
    }
    if msg.ciaddr != Ipv4Addr::UNSPECIFIED {
        if let Some(s) = config.subnets.iter().find(|s| s.contains(msg.ciaddr)) {
            return Some(s);
        }
    }
    if let Some(ip) = requested_ip_option(msg) {
        if let Some(s) = config.subnets.iter().find(|s| s.contains(ip)) {
            return Some(s);
        }
    }
    if config.subnets.len() == 1 {
        return config.subnets.first();
    }
    None
}

fn requested_ip_option(msg: &DhcpMessage) -> Option<Ipv4Addr> {
    msg.option(OPT_REQUESTED_IP).and_then(as_ipv4)
}

fn as_ipv4(data: &[u8]) -> Option<Ipv4Addr> {
    if data.len() == 4 {
        Some(Ipv4Addr::new(data[0], data[1], data[2], data[3]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConflictStrategy, LeaseConfig, SecurityConfig, Subnet};
    use std::net::SocketAddrV4;

    fn subnet() -> Subnet {
        Subnet {
            name: "lan".into(),
            network: Ipv4Addr::new(192, 168, 1, 0),
            prefix_length: 24,
            range_start: Ipv4Addr::new(192, 168, 1, 100),
            range_end: Ipv4Addr::new(192, 168, 1, 110),
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

    fn config() -> Config {
        Config {
            listen_addresses: vec![SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 0)],
            subnets: vec![subnet()],
            global_options: vec![],
            max_leases: None,
            lease_file: None,
            enable_security: false,
            security: SecurityConfig::default(),
            lease: LeaseConfig::default(),
        }
    }

    #[test]
    fn select_subnet_falls_back_to_sole_subnet() {
        let cfg = config();
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        let msg = DhcpMessage {
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
            options: vec![],
        };
        assert!(select_subnet(&cfg, &msg).is_some());
    }

    #[test]
    fn worker_index_is_stable_for_same_mac() {
        let mut data = vec![0u8; 40];
        data[28..34].copy_from_slice(&[9, 9, 9, 9, 9, 9]);
        let a = worker_index_for(&data, 4);
        let b = worker_index_for(&data, 4);
        assert_eq!(a, b);
    }

    #[test]
    fn initialize_validates_config() {
        let mut cfg = config();
        cfg.listen_addresses.clear();
        assert!(Server::initialize(cfg, None).is_err());
    }
}
