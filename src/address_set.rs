//! The immutable, ordered set of allocatable IPv4 addresses.
//!
//! The set is stored as sorted, merged, inclusive ranges. Iteration always
//! yields addresses in ascending numeric order, which is what makes the
//! allocation scan deterministic on every replica.

use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::str::FromStr;

use snafu::OptionExt;
use snafu::ResultExt;

use crate::error::AddressSetError;
use crate::error::InvalidAddressSnafu;
use crate::error::InvalidPrefixSnafu;

/// Ordered collection of allocatable IPv4 addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSet {
    /// Sorted, non-overlapping, non-adjacent inclusive ranges as raw u32 values.
    ranges: Vec<(u32, u32)>,
}

impl AddressSet {
    /// Build a set from inclusive address ranges.
    ///
    /// Ranges may overlap or arrive unsorted; they are normalized. Ranges whose
    /// start is after their end are ignored.
    pub fn from_ranges<I>(ranges: I) -> Self
    where I: IntoIterator<Item = RangeInclusive<Ipv4Addr>> {
        let mut raw: Vec<(u32, u32)> = ranges
            .into_iter()
            .map(|r| (u32::from(*r.start()), u32::from(*r.end())))
            .filter(|(start, end)| start <= end)
            .collect();
        raw.sort_unstable();

        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(raw.len());
        for (start, end) in raw {
            match merged.last_mut() {
                // Overlapping or directly adjacent: extend the previous range.
                Some((_, last_end)) if u64::from(start) <= u64::from(*last_end) + 1 => {
                    *last_end = (*last_end).max(end);
                }
                _ => merged.push((start, end)),
            }
        }
        Self { ranges: merged }
    }

    /// Build a set from individual addresses.
    pub fn from_addrs<I>(addrs: I) -> Self
    where I: IntoIterator<Item = Ipv4Addr> {
        Self::from_ranges(addrs.into_iter().map(|a| a..=a))
    }

    /// Build a set covering a CIDR prefix such as `100.64.0.0/24`.
    pub fn from_cidr(cidr: &str) -> Result<Self, AddressSetError> {
        let (start, end) = parse_cidr(cidr)?;
        Ok(Self::from_ranges([Ipv4Addr::from(start)..=Ipv4Addr::from(end)]))
    }

    /// Number of addresses in the set.
    pub fn len(&self) -> u64 {
        self.ranges.iter().map(|(start, end)| u64::from(end - start) + 1).sum()
    }

    /// Whether the set holds no addresses.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Whether `addr` belongs to the set.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let value = u32::from(addr);
        self.ranges.iter().any(|(start, end)| *start <= value && value <= *end)
    }

    /// The normalized ranges, ascending.
    pub fn ranges(&self) -> impl Iterator<Item = RangeInclusive<Ipv4Addr>> + '_ {
        self.ranges.iter().map(|(start, end)| Ipv4Addr::from(*start)..=Ipv4Addr::from(*end))
    }

    /// Every address in the set, ascending.
    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.ranges.iter().flat_map(|(start, end)| (*start..=*end).map(Ipv4Addr::from))
    }
}

/// Parses a comma-separated list of CIDR prefixes, `a-b` ranges and single addresses.
///
/// ```ignore
/// let set: AddressSet = "100.64.0.0/30, 100.64.1.10-100.64.1.12, 100.64.2.1".parse()?;
/// assert_eq!(set.len(), 8);
/// ```
impl FromStr for AddressSet {
    type Err = AddressSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ranges = Vec::new();
        for item in s.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            if item.contains('/') {
                let (start, end) = parse_cidr(item)?;
                ranges.push(Ipv4Addr::from(start)..=Ipv4Addr::from(end));
            } else if let Some((from, to)) = item.split_once('-') {
                ranges.push(parse_addr(from.trim())?..=parse_addr(to.trim())?);
            } else {
                let addr = parse_addr(item)?;
                ranges.push(addr..=addr);
            }
        }
        Ok(Self::from_ranges(ranges))
    }
}

fn parse_addr(input: &str) -> Result<Ipv4Addr, AddressSetError> {
    input.parse::<Ipv4Addr>().context(InvalidAddressSnafu { input })
}

fn parse_cidr(cidr: &str) -> Result<(u32, u32), AddressSetError> {
    let (addr, prefix) = cidr.trim().split_once('/').context(InvalidPrefixSnafu { input: cidr })?;
    let addr = u32::from(parse_addr(addr)?);
    let prefix_len: u32 =
        prefix.parse().ok().filter(|len| *len <= 32).context(InvalidPrefixSnafu { input: cidr })?;
    let mask = if prefix_len == 0 { 0 } else { u32::MAX << (32 - prefix_len) };
    let start = addr & mask;
    Ok((start, start | !mask))
}
