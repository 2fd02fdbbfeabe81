use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::riveradmin::{Error, Result};

/// A set of global transaction identifiers, as reported by gtid_executed / gtid_purged.
/// Text form: `uuid:1-5:7,uuid2:1-3`. Each source uuid maps to sorted, disjoint,
/// non-adjacent inclusive intervals.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GtidSet {
    sets: BTreeMap<String, Vec<(u64, u64)>>,
}

impl GtidSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Add the inclusive interval start..=end for uuid.
    pub fn add(&mut self, uuid: &str, start: u64, end: u64) {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        let intervals = self.sets.entry(uuid.to_ascii_lowercase()).or_default();
        intervals.push((start, end));
        normalize(intervals);
    }

    /// Returns the transactions in self that are not in other.
    pub fn subtract(&self, other: &GtidSet) -> GtidSet {
        let mut result = GtidSet::new();
        for (uuid, intervals) in &self.sets {
            let remaining = match other.sets.get(uuid) {
                Some(others) => subtract_intervals(intervals, others),
                None => intervals.clone(),
            };
            if !remaining.is_empty() {
                result.sets.insert(uuid.clone(), remaining);
            }
        }
        result
    }

    pub fn is_subset(&self, other: &GtidSet) -> bool {
        self.subtract(other).is_empty()
    }

    /// Total number of transactions in the set.
    pub fn count(&self) -> u64 {
        self.sets.values().flatten().map(|(s, e)| e - s + 1).sum()
    }
}

fn normalize(intervals: &mut Vec<(u64, u64)>) {
    intervals.sort_unstable();
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(intervals.len());
    for &(s, e) in intervals.iter() {
        match merged.last_mut() {
            Some(last) if s <= last.1.saturating_add(1) => last.1 = last.1.max(e),
            _ => merged.push((s, e)),
        }
    }
    *intervals = merged;
}

fn subtract_intervals(from: &[(u64, u64)], remove: &[(u64, u64)]) -> Vec<(u64, u64)> {
    let mut out = Vec::new();
    for &(mut s, e) in from {
        for &(rs, re) in remove {
            if re < s || rs > e {
                continue;
            }
            if rs > s {
                out.push((s, rs - 1));
            }
            if re >= e {
                s = e.saturating_add(1);
                break;
            }
            s = re + 1;
        }
        if s <= e {
            out.push((s, e));
        }
    }
    out
}

impl FromStr for GtidSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut set = GtidSet::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let mut it = part.split(':');
            let uuid = it.next().unwrap_or("").trim();
            if uuid.len() != 36 || !uuid.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
                return Err(Error::invalid_argument(format!("invalid GTID source uuid {:?}", uuid)));
            }
            let mut any = false;
            for interval in it {
                let (start, end) = match interval.split_once('-') {
                    Some((a, b)) => (parse_gno(a, part)?, parse_gno(b, part)?),
                    None => {
                        let n = parse_gno(interval, part)?;
                        (n, n)
                    }
                };
                set.add(uuid, start, end);
                any = true;
            }
            if !any {
                return Err(Error::invalid_argument(format!("GTID set entry {:?} has no intervals", part)));
            }
        }
        Ok(set)
    }
}

fn parse_gno(s: &str, whole: &str) -> Result<u64> {
    match s.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(Error::invalid_argument(format!("invalid transaction number in GTID set entry {:?}", whole))),
        Ok(n) => Ok(n),
    }
}

impl Display for GtidSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (uuid, intervals) in &self.sets {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            f.write_str(uuid)?;
            for (s, e) in intervals {
                if s == e {
                    write!(f, ":{}", s)?;
                } else {
                    write!(f, ":{}-{}", s, e)?;
                }
            }
        }
        Ok(())
    }
}
