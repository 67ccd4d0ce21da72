//! Options manager: inheritance merge, parameter-request-list filtering,
//! and the Option 82 sub-option codec.

use std::net::Ipv4Addr;

use crate::config::{Reservation, Subnet};
use crate::wire::{
    RawOption, OPT_DOMAIN_NAME_SERVER, OPT_IP_LEASE_TIME, OPT_PARAMETER_REQUEST_LIST,
    OPT_REBINDING_TIME, OPT_RENEWAL_TIME, OPT_ROUTER, OPT_SERVER_IDENTIFIER, OPT_SUBNET_MASK,
};

/// Options the server always includes regardless of the client's parameter
/// request list.
pub const SERVER_REQUIRED: &[u8] = &[1, 3, 51, 53, 54, 58, 59];

/// Merges `global -> subnet -> pool -> reservation` options, later sources
/// overriding earlier ones for the same code. There is no separate "pool"
/// scope below subnet here (a `Subnet` has no sub-pool type beyond
/// `exclusions`), so pool-scope options coincide with subnet-scope options;
/// the merge order is preserved for when a caller's `Subnet` later grows
/// pool-level suboptions.
pub fn effective_options(
    global: &[RawOption],
    subnet: &Subnet,
    reservation: Option<&Reservation>,
) -> Vec<RawOption> {
    let mut merged: Vec<RawOption> = Vec::new();

    for source in [
        global,
        subnet.options.as_slice(),
        reservation.map(|r| r.options.as_slice()).unwrap_or(&[]),
    ] {
        for opt in source {
            if let Some(existing) = merged.iter_mut().find(|o| o.code == opt.code) {
                existing.data = opt.data.clone();
            } else {
                merged.push(opt.clone());
            }
        }
    }

    merged
}

/// Builds the reply option set for `mt`, honoring the client's parameter
/// request list (option 55) when present.
#[allow(clippy::too_many_arguments)]
pub fn build_reply_options(
    message_type: crate::wire::MessageType,
    server_ip: Ipv4Addr,
    lease_seconds: u32,
    subnet: &Subnet,
    extra: &[RawOption],
    requested_params: Option<&[u8]>,
) -> Vec<RawOption> {
    let mut out: Vec<RawOption> = Vec::new();
    out.push(RawOption {
        code: crate::wire::OPT_MESSAGE_TYPE,
        data: vec![message_type as u8],
    });
    out.push(RawOption {
        code: OPT_SERVER_IDENTIFIER,
        data: server_ip.octets().to_vec(),
    });

    if !matches!(message_type, crate::wire::MessageType::Nak) {
        out.push(RawOption {
            code: OPT_IP_LEASE_TIME,
            data: lease_seconds.to_be_bytes().to_vec(),
        });
        out.push(RawOption {
            code: OPT_RENEWAL_TIME,
            data: (lease_seconds / 2).to_be_bytes().to_vec(),
        });
        out.push(RawOption {
            code: OPT_REBINDING_TIME,
            data: (lease_seconds * 7 / 8).to_be_bytes().to_vec(),
        });

        let mut candidates = extra.to_vec();
        candidates.push(RawOption {
            code: OPT_SUBNET_MASK,
            data: crate::addr::mask(subnet.prefix_length).to_be_bytes().to_vec(),
        });
        if let Some(gw) = subnet.gateway {
            candidates.push(RawOption {
                code: OPT_ROUTER,
                data: gw.octets().to_vec(),
            });
        }
        if !subnet.dns_servers.is_empty() {
            let mut data = Vec::new();
            for dns in &subnet.dns_servers {
                data.extend_from_slice(&dns.octets());
            }
            candidates.push(RawOption {
                code: OPT_DOMAIN_NAME_SERVER,
                data,
            });
        }

        for c in candidates {
            if !out.iter().any(|o| o.code == c.code) {
                out.push(c);
            }
        }

        if let Some(requested) = requested_params {
            out = filter_by_parameter_request_list(out, requested);
        }
    }

    out
}

/// Intersects `options` with `(options ∪ SERVER_REQUIRED) ∩ requested`, in
/// the client's requested order.
fn filter_by_parameter_request_list(options: Vec<RawOption>, requested: &[u8]) -> Vec<RawOption> {
    let mut ordered = Vec::new();

    for code in requested {
        if SERVER_REQUIRED.contains(code) || options.iter().any(|o| &o.code == code) {
            if let Some(opt) = options.iter().find(|o| &o.code == code) {
                ordered.push(opt.clone());
            }
        }
    }

    // Server-required options always ship even if absent from the PRL,
    // appended after the client's requested order.
    for code in SERVER_REQUIRED {
        if !ordered.iter().any(|o| &o.code == code) {
            if let Some(opt) = options.iter().find(|o| &o.code == code) {
                ordered.push(opt.clone());
            }
        }
    }

    ordered
}

pub fn parameter_request_list(options: &[RawOption]) -> Option<&[u8]> {
    options
        .iter()
        .find(|o| o.code == OPT_PARAMETER_REQUEST_LIST)
        .map(|o| o.data.as_slice())
}

/// Relay Agent Information (RFC 3046, option 82) sub-option codec.
/// Sub-options are `type(1) || len(1) || value(len)` concatenated inside
/// the option 82 body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelayAgentInfo {
    pub circuit_id: Option<Vec<u8>>,
    pub remote_id: Option<Vec<u8>>,
    pub unrecognized: Vec<(u8, Vec<u8>)>,
}

const SUBOPT_CIRCUIT_ID: u8 = 1;
const SUBOPT_REMOTE_ID: u8 = 2;

impl RelayAgentInfo {
    pub fn decode(body: &[u8]) -> Self {
        let mut info = RelayAgentInfo::default();
        let mut offset = 0;

        while offset + 2 <= body.len() {
            let sub_type = body[offset];
            let len = body[offset + 1] as usize;
            offset += 2;
            if offset + len > body.len() {
                break;
            }
            let value = body[offset..offset + len].to_vec();
            offset += len;

            match sub_type {
                SUBOPT_CIRCUIT_ID => info.circuit_id = Some(value),
                SUBOPT_REMOTE_ID => info.remote_id = Some(value),
                other => info.unrecognized.push((other, value)),
            }
        }

        info
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(circuit) = &self.circuit_id {
            out.push(SUBOPT_CIRCUIT_ID);
            out.push(circuit.len() as u8);
            out.extend_from_slice(circuit);
        }
        if let Some(remote) = &self.remote_id {
            out.push(SUBOPT_REMOTE_ID);
            out.push(remote.len() as u8);
            out.extend_from_slice(remote);
        }
        for (code, value) in &self.unrecognized {
            out.push(*code);
            out.push(value.len() as u8);
            out.extend_from_slice(value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn subnet() -> Subnet {
        Subnet {
            name: "lan".into(),
            network: Ipv4Addr::new(192, 168, 1, 0),
            prefix_length: 24,
            range_start: Ipv4Addr::new(192, 168, 1, 100),
            range_end: Ipv4Addr::new(192, 168, 1, 200),
            gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
            dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8)],
            domain_name: None,
            lease_time: Duration::from_secs(3600),
            max_lease_time: Duration::from_secs(7200),
            options: vec![],
            reservations: vec![],
            exclusions: vec![],
            conflict_strategy: crate::config::ConflictStrategy::Replace,
        }
    }

    #[test]
    fn relay_agent_info_round_trips() {
        let info = RelayAgentInfo {
            circuit_id: Some(vec![1, 2, 3]),
            remote_id: Some(vec![9, 9]),
            unrecognized: vec![],
        };
        let encoded = info.encode();
        let decoded = RelayAgentInfo::decode(&encoded);
        assert_eq!(decoded, info);
    }

    #[test]
    fn reply_options_include_lease_and_renewal_times() {
        let opts = build_reply_options(
            crate::wire::MessageType::Offer,
            Ipv4Addr::new(192, 168, 1, 1),
            3600,
            &subnet(),
            &[],
            None,
        );
        let lease = opts.iter().find(|o| o.code == OPT_IP_LEASE_TIME).unwrap();
        assert_eq!(u32::from_be_bytes(lease.data.clone().try_into().unwrap()), 3600);
        let renew = opts.iter().find(|o| o.code == OPT_RENEWAL_TIME).unwrap();
        assert_eq!(u32::from_be_bytes(renew.data.clone().try_into().unwrap()), 1800);
        let rebind = opts.iter().find(|o| o.code == OPT_REBINDING_TIME).unwrap();
        assert_eq!(u32::from_be_bytes(rebind.data.clone().try_into().unwrap()), 3150);
    }

    #[test]
    fn nak_carries_no_lease_options() {
        let opts = build_reply_options(
            crate::wire::MessageType::Nak,
            Ipv4Addr::new(192, 168, 1, 1),
            3600,
            &subnet(),
            &[],
            None,
        );
        assert!(!opts.iter().any(|o| o.code == OPT_IP_LEASE_TIME));
    }

    #[test]
    fn parameter_request_list_filters_and_orders() {
        let opts = build_reply_options(
            crate::wire::MessageType::Offer,
            Ipv4Addr::new(192, 168, 1, 1),
            3600,
            &subnet(),
            &[],
            Some(&[OPT_ROUTER, OPT_DOMAIN_NAME_SERVER]),
        );
        let codes: Vec<u8> = opts.iter().map(|o| o.code).collect();
        let router_pos = codes.iter().position(|c| *c == OPT_ROUTER).unwrap();
        let dns_pos = codes.iter().position(|c| *c == OPT_DOMAIN_NAME_SERVER).unwrap();
        assert!(router_pos < dns_pos);
    }
}
