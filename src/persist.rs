//! Lease database persistence.
//!
//! The on-disk format is a line-oriented `key=value` text file, one record
//! per line, with blank lines and `#`-prefixed lines ignored — small and
//! textual rather than a binary blob, and diffable and hand-editable for
//! operators. Writes are atomic: the new content is written to a sibling
//! temp file and then renamed over the target, so a crash mid-write never
//! corrupts the previously-committed database.

use std::fs;
use std::io::Write as _;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::addr::Mac;
use crate::error::LeaseError;
use crate::lease::{DeclinedEntry, Lease, LeaseType};

const RECORD_SEP: char = '\t';

fn to_unix(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs()
}

fn from_unix(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

fn encode_lease(lease: &Lease) -> String {
    let kind = match lease.lease_type {
        LeaseType::Dynamic => "dynamic",
        LeaseType::Static => "static",
    };
    format!(
        "lease{sep}mac={mac}{sep}ip={ip}{sep}subnet={subnet}{sep}allocated_at={allocated}{sep}expires_at={expires}{sep}original_allocated_at={original}{sep}type={kind}{sep}hostname={hostname}",
        sep = RECORD_SEP,
        mac = lease.mac,
        ip = lease.ip,
        subnet = lease.subnet_name,
        allocated = to_unix(lease.allocated_at),
        expires = to_unix(lease.expires_at),
        original = to_unix(lease.original_allocated_at),
        kind = kind,
        hostname = lease.hostname.as_deref().unwrap_or(""),
    )
}

fn encode_declined(entry: &DeclinedEntry) -> String {
    format!(
        "declined{sep}ip={ip}{sep}declined_at={declined}{sep}quarantine_until={quarantine}",
        sep = RECORD_SEP,
        ip = entry.ip,
        declined = to_unix(entry.declined_at),
        quarantine = to_unix(entry.quarantine_until),
    )
}

fn fields(line: &str) -> std::collections::HashMap<&str, &str> {
    line.split(RECORD_SEP)
        .skip(1)
        .filter_map(|kv| kv.split_once('='))
        .collect()
}

fn decode_lease(line: &str) -> Option<Lease> {
    let f = fields(line);
    let mac: Mac = f.get("mac")?.parse().ok()?;
    let ip: Ipv4Addr = f.get("ip")?.parse().ok()?;
    let subnet_name = (*f.get("subnet")?).to_string();
    let allocated_at = from_unix(f.get("allocated_at")?.parse().ok()?);
    let expires_at = from_unix(f.get("expires_at")?.parse().ok()?);
    let original_allocated_at = f
        .get("original_allocated_at")
        .and_then(|v| v.parse().ok())
        .map(from_unix)
        .unwrap_or(allocated_at);
    let lease_type = match f.get("type").copied() {
        Some("static") => LeaseType::Static,
        _ => LeaseType::Dynamic,
    };
    let hostname = f
        .get("hostname")
        .filter(|h| !h.is_empty())
        .map(|h| h.to_string());

    Some(Lease {
        mac,
        ip,
        subnet_name,
        client_id: None,
        hostname,
        allocated_at,
        expires_at,
        original_allocated_at,
        lease_type,
        state: crate::lease::LeaseState::Active,
        options: vec![],
    })
}

fn decode_declined(line: &str) -> Option<DeclinedEntry> {
    let f = fields(line);
    let ip: Ipv4Addr = f.get("ip")?.parse().ok()?;
    let declined_at = from_unix(f.get("declined_at")?.parse().ok()?);
    let quarantine_until = from_unix(f.get("quarantine_until")?.parse().ok()?);
    Some(DeclinedEntry {
        ip,
        declined_at,
        quarantine_until,
    })
}

/// Serializes `leases` and `declined` and atomically replaces the file at
/// `path` (write to `path.tmp`, `fsync`, then `rename`).
pub fn save(path: &Path, leases: &[Lease], declined: &[DeclinedEntry]) -> Result<(), LeaseError> {
    let mut buf = String::new();
    buf.push_str("# dhcpd-core lease database. Do not edit by hand while the server is running.\n");
    for lease in leases {
        buf.push_str(&encode_lease(lease));
        buf.push('\n');
    }
    for entry in declined {
        buf.push_str(&encode_declined(entry));
        buf.push('\n');
    }

    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)
        .map_err(|e| LeaseError::WriteFailed(format!("creating {}: {e}", tmp_path.display())))?;
    file.write_all(buf.as_bytes())
        .map_err(|e| LeaseError::WriteFailed(format!("writing {}: {e}", tmp_path.display())))?;
    file.sync_all()
        .map_err(|e| LeaseError::WriteFailed(format!("syncing {}: {e}", tmp_path.display())))?;
    fs::rename(&tmp_path, path)
        .map_err(|e| LeaseError::WriteFailed(format!("renaming into {}: {e}", path.display())))?;

    Ok(())
}

/// Loads a previously saved database. A missing file is not an error (first
/// run); malformed individual lines are skipped rather than failing the
/// whole load, since a partially-corrupt database is still worth salvaging.
pub fn load(path: &Path) -> Result<(Vec<Lease>, Vec<DeclinedEntry>), LeaseError> {
    if !path.exists() {
        return Ok((Vec::new(), Vec::new()));
    }

    let content = fs::read_to_string(path)
        .map_err(|e| LeaseError::LoadFailed(format!("reading {}: {e}", path.display())))?;

    let mut leases = Vec::new();
    let mut declined = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("lease") {
            if let Some(lease) = decode_lease(&format!("lease{rest}")) {
                leases.push(lease);
            }
        } else if let Some(rest) = line.strip_prefix("declined") {
            if let Some(entry) = decode_declined(&format!("declined{rest}")) {
                declined.push(entry);
            }
        }
    }

    Ok((leases, declined))
}

/// Copies the current database file to `backup_path`. Exposed for callers
/// that want a snapshot on disk before a risky operation of their own; the
/// core itself never calls this.
pub fn backup(path: &Path, backup_path: &Path) -> Result<(), LeaseError> {
    if !path.exists() {
        return Ok(());
    }
    fs::copy(path, backup_path)
        .map_err(|e| LeaseError::WriteFailed(format!("backing up to {}: {e}", backup_path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::LeaseState;
    use std::time::Duration;

    fn sample_lease() -> Lease {
        let now = SystemTime::now();
        Lease {
            mac: "aa:bb:cc:dd:ee:01".parse().unwrap(),
            ip: Ipv4Addr::new(192, 168, 1, 100),
            subnet_name: "lan".into(),
            client_id: None,
            hostname: Some("workstation".into()),
            allocated_at: now,
            expires_at: now + Duration::from_secs(3600),
            original_allocated_at: now,
            lease_type: LeaseType::Dynamic,
            state: LeaseState::Active,
            options: vec![],
        }
    }

    #[test]
    fn round_trips_leases_and_declined_entries() {
        let dir = std::env::temp_dir().join(format!("dhcpd-core-test-{:?}", std::thread::current().id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("leases.db");

        let lease = sample_lease();
        let now = SystemTime::now();
        let declined = DeclinedEntry {
            ip: Ipv4Addr::new(192, 168, 1, 150),
            declined_at: now,
            quarantine_until: now + Duration::from_secs(600),
        };

        save(&path, std::slice::from_ref(&lease), std::slice::from_ref(&declined)).unwrap();
        let (loaded_leases, loaded_declined) = load(&path).unwrap();

        assert_eq!(loaded_leases.len(), 1);
        assert_eq!(loaded_leases[0].mac, lease.mac);
        assert_eq!(loaded_leases[0].ip, lease.ip);
        assert_eq!(loaded_leases[0].hostname, lease.hostname);

        assert_eq!(loaded_declined.len(), 1);
        assert_eq!(loaded_declined[0].ip, declined.ip);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let path = std::env::temp_dir().join("dhcpd-core-test-missing-does-not-exist.db");
        let (leases, declined) = load(&path).unwrap();
        assert!(leases.is_empty());
        assert!(declined.is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = std::env::temp_dir().join(format!("dhcpd-core-test-malformed-{:?}", std::thread::current().id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("leases.db");
        fs::write(&path, "lease\tmac=not-a-mac\tip=bad\n# comment\n\n").unwrap();

        let (leases, declined) = load(&path).unwrap();
        assert!(leases.is_empty());
        assert!(declined.is_empty());

        fs::remove_dir_all(&dir).ok();
    }
}
