//! Turns address expressions into the ordered list of targets a scan probes.
//!
//! Three forms are understood:
//!
//! - an octet range such as `192.168.1.10-192.168.1.20`, enumerating the
//!   last octet while the first three stay fixed,
//! - a CIDR block such as `192.168.1.0/24`,
//! - a single IP literal or host name.
//!
//! Every address is crossed with every port, address-major and port-minor.
//! That position is how results are matched back to their targets.
//!
//! ```rust
//! # use netsweep::address::expand;
//! # use netsweep::input::Protocol;
//! let targets = expand("10.0.0.1-10.0.0.3", &[80], Protocol::Tcp, false).unwrap();
//! assert_eq!(targets.len(), 3);
//! assert_eq!(targets[2].address, "10.0.0.3");
//! ```
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use cidr_utils::cidr::{IpCidr, IpInet};
use itertools::Itertools;

use crate::device::Target;
use crate::error::ScanError;
use crate::input::Protocol;

/// Largest number of addresses a single CIDR block may expand to.
pub const MAX_BLOCK_ADDRESSES: usize = 1 << 20;

/// Expands one address expression into targets.
///
/// With `expand_entire_block` unset a CIDR block is reduced to its host part,
/// so `192.168.1.7/24` probes `192.168.1.7` only.
pub fn expand(
    input: &str,
    ports: &[u16],
    protocol: Protocol,
    expand_entire_block: bool,
) -> Result<Vec<Target>, ScanError> {
    let input = input.trim();
    let addresses = parse_addresses(input, expand_entire_block)?;

    Ok(cross(addresses, ports, protocol))
}

/// Expands several address expressions, concatenating their targets in
/// input order.
pub fn expand_addresses<S: AsRef<str>>(
    inputs: &[S],
    ports: &[u16],
    protocol: Protocol,
    expand_entire_block: bool,
) -> Result<Vec<Target>, ScanError> {
    let mut targets = Vec::new();
    for input in inputs {
        targets.extend(expand(input.as_ref(), ports, protocol, expand_entire_block)?);
    }
    Ok(targets)
}

fn parse_addresses(input: &str, expand_entire_block: bool) -> Result<Vec<String>, ScanError> {
    if input.is_empty() {
        return Err(ScanError::range(input, "empty address expression"));
    }

    if input.contains('/') {
        if expand_entire_block {
            return parse_block(input).map(|ips| ips.into_iter().map(|ip| ip.to_string()).collect());
        }
        let (host, _) = input.split_once('/').unwrap_or((input, ""));
        if host.is_empty() {
            return Err(ScanError::range(input, "missing address before '/'"));
        }
        return Ok(vec![host.to_owned()]);
    }

    if looks_like_range(input) {
        return parse_range(input).map(|ips| ips.into_iter().map(|ip| ip.to_string()).collect());
    }

    Ok(vec![input.to_owned()])
}

/// Host names may contain `-` too, so an expression only counts as a range
/// when every bound starts with a dotted three-octet prefix of digits.
fn looks_like_range(input: &str) -> bool {
    input.contains('-')
        && input.split('-').all(|bound| {
            bound.trim().rsplit_once('.').is_some_and(|(prefix, _)| {
                let parts: Vec<&str> = prefix.split('.').collect();
                parts.len() == 3
                    && parts
                        .iter()
                        .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
            })
        })
}

/// Parses `A.B.C.start-A.B.C.end` into every address from start to end
/// inclusive. The first three octets are taken from the start bound.
pub fn parse_range(input: &str) -> Result<Vec<Ipv4Addr>, ScanError> {
    let Some((start, end)) = input.split('-').map(str::trim).collect_tuple() else {
        return Err(ScanError::range(input, "expected exactly one '-' between two addresses"));
    };

    let (prefix, first) = split_last_octet(input, start)?;
    let (_, last) = split_last_octet(input, end)?;

    if first > last {
        return Err(ScanError::range(
            input,
            format!("start octet {first} is greater than end octet {last}"),
        ));
    }

    let base = Ipv4Addr::from_str(&format!("{prefix}.0"))
        .map_err(|_| ScanError::range(input, format!("'{prefix}' is not an IPv4 prefix")))?;
    let [a, b, c, _] = base.octets();

    Ok((first..=last).map(|d| Ipv4Addr::new(a, b, c, d)).collect())
}

fn split_last_octet<'a>(input: &str, bound: &'a str) -> Result<(&'a str, u8), ScanError> {
    let Some((prefix, octet)) = bound.rsplit_once('.') else {
        return Err(ScanError::range(input, format!("'{bound}' is not dot-delimited")));
    };
    let octet = octet
        .parse::<u8>()
        .map_err(|_| ScanError::range(input, format!("'{octet}' is not a valid octet")))?;

    Ok((prefix, octet))
}

/// Enumerates the usable addresses of a CIDR block.
///
/// Host bits in the expression are ignored, so `192.168.1.7/24` covers the
/// same block as `192.168.1.0/24`. IPv4 blocks wider than /31 skip their
/// network and broadcast addresses.
pub fn parse_block(input: &str) -> Result<Vec<IpAddr>, ScanError> {
    let cidr = IpInet::from_str(input)
        .map_err(|e| ScanError::range(input, format!("not a CIDR block: {e}")))?
        .network();

    let mut addresses = cidr
        .iter()
        .map(|inet| inet.address())
        .take(MAX_BLOCK_ADDRESSES + 1)
        .collect::<Vec<_>>();

    if addresses.len() > MAX_BLOCK_ADDRESSES {
        return Err(ScanError::BlockTooLarge {
            input: input.to_owned(),
            limit: MAX_BLOCK_ADDRESSES,
        });
    }

    if matches!(cidr, IpCidr::V4(_)) && addresses.len() > 2 {
        addresses.pop();
        addresses.remove(0);
    }

    Ok(addresses)
}

fn cross(addresses: Vec<String>, ports: &[u16], protocol: Protocol) -> Vec<Target> {
    addresses
        .into_iter()
        .cartesian_product(ports.iter().copied())
        .map(|(address, port)| Target::new(address, port, protocol))
        .collect()
}
