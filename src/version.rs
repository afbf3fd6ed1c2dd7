//! Version algebra: versions, arity-aware bounds, ranges, and constraint specs.
//!
//! A [`VersionSpec`] is a canonical, sorted list of disjoint [`VersionRange`]s.
//! Bounds carry an arity: the bound `1.2` is distinct from `1.2.0` — as a lower
//! bound it admits everything from `1.2.0`, as an upper bound it admits the
//! whole `1.2.x` series.
//!
//! # Examples
//!
//! ```
//! use carton::version::{Version, VersionSpec};
//!
//! let spec = VersionSpec::parse("^1.2, 0.4 - 0.6").unwrap();
//! assert!(spec.contains(&Version::new(1, 9, 0)));
//! assert!(spec.contains(&Version::new(0, 5, 3)));
//! assert!(!spec.contains(&Version::new(2, 0, 0)));
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors produced by the version and constraint parsers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version: `{0}`")]
    InvalidVersion(String),

    #[error("invalid version specifier: `{0}`")]
    InvalidSpecifier(String),

    #[error("incomplete version expression: `{0}`")]
    IncompleteVersion(String),

    #[error("incomplete hyphen range: `{0}`")]
    IncompleteHyphen(String),
}

/// A concrete semantic version, totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse `1`, `1.2` or `1.2.3`, padding missing components with zeros.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        let s = s.strip_prefix('v').unwrap_or(s);
        let parts = parse_vernum(s)?;
        Ok(Self::from_parts(&parts))
    }

    fn from_parts(parts: &[u64]) -> Self {
        Self {
            major: parts.first().copied().unwrap_or(0),
            minor: parts.get(1).copied().unwrap_or(0),
            patch: parts.get(2).copied().unwrap_or(0),
        }
    }

    fn component(&self, i: usize) -> u64 {
        match i {
            0 => self.major,
            1 => self.minor,
            _ => self.patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, VersionError> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// An interval endpoint with an arity `n` in `0..=3`.
///
/// Arity 0 is unbounded. Comparison against a [`Version`] is prefix
/// comparison over the first `n` components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionBound {
    t: [u64; 3],
    n: usize,
}

impl VersionBound {
    pub const fn unbounded() -> Self {
        Self { t: [0; 3], n: 0 }
    }

    /// Build from 0 to 3 leading components.
    pub fn from_parts(parts: &[u64]) -> Self {
        debug_assert!(parts.len() <= 3);
        let mut t = [0u64; 3];
        t[..parts.len()].copy_from_slice(parts);
        Self { t, n: parts.len() }
    }

    pub fn arity(&self) -> usize {
        self.n
    }

    pub fn components(&self) -> &[u64] {
        &self.t[..self.n]
    }

    /// As a lower bound: does `v` lie at or above this bound?
    pub fn admits_lower(&self, v: &Version) -> bool {
        for i in 0..self.n {
            match v.component(i).cmp(&self.t[i]) {
                Ordering::Greater => return true,
                Ordering::Less => return false,
                Ordering::Equal => {}
            }
        }
        true
    }

    /// As an upper bound: does `v` lie at or below this bound?
    pub fn admits_upper(&self, v: &Version) -> bool {
        for i in 0..self.n {
            match v.component(i).cmp(&self.t[i]) {
                Ordering::Less => return true,
                Ordering::Greater => return false,
                Ordering::Equal => {}
            }
        }
        true
    }

    /// Lower-bound order: shorter is smaller when the common prefix ties.
    pub fn cmp_ll(&self, other: &Self) -> Ordering {
        for i in 0..self.n.min(other.n) {
            match self.t[i].cmp(&other.t[i]) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        self.n.cmp(&other.n)
    }

    /// Upper-bound order: shorter is larger when the common prefix ties.
    pub fn cmp_uu(&self, other: &Self) -> Ordering {
        for i in 0..self.n.min(other.n) {
            match self.t[i].cmp(&other.t[i]) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        other.n.cmp(&self.n)
    }

    /// The smallest concrete version admitted when used as a lower bound.
    pub(crate) fn padded_version(&self) -> Version {
        Version::from_parts(self.components())
    }

    /// The successor of the largest version admitted when used as an upper
    /// bound, or `None` when unbounded.
    pub(crate) fn exclusive_upper(&self) -> Option<Version> {
        match self.n {
            0 => None,
            1 => Some(Version::new(self.t[0] + 1, 0, 0)),
            2 => Some(Version::new(self.t[0], self.t[1] + 1, 0)),
            _ => Some(Version::new(self.t[0], self.t[1], self.t[2] + 1)),
        }
    }

    fn fmt_parts(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.components().iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl From<Version> for VersionBound {
    fn from(v: Version) -> Self {
        Self::from_parts(&[v.major, v.minor, v.patch])
    }
}

impl FromStr for VersionBound {
    type Err = VersionError;

    /// Parse `*` or a 1-3 component version number.
    fn from_str(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        if s == "*" {
            return Ok(Self::unbounded());
        }
        let s = s.strip_prefix('v').unwrap_or(s);
        Ok(Self::from_parts(&parse_vernum(s)?))
    }
}

impl fmt::Display for VersionBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.n == 0 {
            f.write_str("*")
        } else {
            self.fmt_parts(f)
        }
    }
}

/// A closed interval `[lower, upper]` between two bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionRange {
    lower: VersionBound,
    upper: VersionBound,
}

impl VersionRange {
    pub fn new(mut lower: VersionBound, upper: VersionBound) -> Self {
        // Equal padded components: adopt the more precise arity.
        if lower.t == upper.t {
            lower = upper;
        }
        Self { lower, upper }
    }

    pub const fn full() -> Self {
        Self {
            lower: VersionBound::unbounded(),
            upper: VersionBound::unbounded(),
        }
    }

    /// The range containing exactly one concrete version.
    pub fn single(v: Version) -> Self {
        let b = VersionBound::from(v);
        Self { lower: b, upper: b }
    }

    pub fn lower(&self) -> &VersionBound {
        &self.lower
    }

    pub fn upper(&self) -> &VersionBound {
        &self.upper
    }

    pub fn is_empty(&self) -> bool {
        for i in 0..self.lower.n.min(self.upper.n) {
            match self.lower.t[i].cmp(&self.upper.t[i]) {
                Ordering::Greater => return true,
                Ordering::Less => return false,
                Ordering::Equal => {}
            }
        }
        false
    }

    pub fn contains(&self, v: &Version) -> bool {
        self.lower.admits_lower(v) && self.upper.admits_upper(v)
    }

    pub fn intersect(&self, other: &Self) -> Self {
        let lower = if self.lower.cmp_ll(&other.lower) == Ordering::Less {
            other.lower
        } else {
            self.lower
        };
        let upper = if self.upper.cmp_uu(&other.upper) == Ordering::Greater {
            other.upper
        } else {
            self.upper
        };
        Self::new(lower, upper)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.lower.n, self.upper.n) {
            (0, 0) => f.write_str("*"),
            (0, _) => write!(f, "0 - {}", self.upper),
            (_, 0) => write!(f, "\u{2265}{}", self.lower),
            _ if self.lower == self.upper => write!(f, "={}", self.lower),
            _ => write!(f, "{} - {}", self.lower, self.upper),
        }
    }
}

/// Can a range ending at `upper` absorb one starting at `lower`?
///
/// Equal-arity bounds join when they overlap or are adjacent in the last
/// component; unequal arities join when neither prefix dominates the other.
fn joinable(upper: &VersionBound, lower: &VersionBound) -> bool {
    if upper.n == 0 || lower.n == 0 {
        return true;
    }
    let m = upper.n.min(lower.n);
    let prefix = if upper.n == lower.n { m - 1 } else { m };
    for i in 0..prefix {
        match upper.t[i].cmp(&lower.t[i]) {
            Ordering::Greater => return true,
            Ordering::Less => return false,
            Ordering::Equal => {}
        }
    }
    if upper.n == lower.n {
        upper.t[m - 1] + 1 >= lower.t[m - 1]
    } else {
        true
    }
}

/// A set of versions: sorted, disjoint, pairwise non-joinable ranges.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionSpec {
    ranges: Vec<VersionRange>,
}

impl VersionSpec {
    /// The canonical "no version".
    pub fn none() -> Self {
        Self { ranges: Vec::new() }
    }

    /// The full spec admitting every version.
    pub fn any() -> Self {
        Self {
            ranges: vec![VersionRange::full()],
        }
    }

    pub fn from_ranges(ranges: Vec<VersionRange>) -> Self {
        let mut spec = Self { ranges };
        spec.normalize();
        spec
    }

    pub fn ranges(&self) -> &[VersionRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn is_any(&self) -> bool {
        self.ranges.len() == 1 && self.ranges[0] == VersionRange::full()
    }

    pub fn contains(&self, v: &Version) -> bool {
        self.ranges.iter().any(|r| r.contains(v))
    }

    pub fn intersect(&self, other: &Self) -> Self {
        let mut out = Vec::new();
        for a in &self.ranges {
            for b in &other.ranges {
                out.push(a.intersect(b));
            }
        }
        Self::from_ranges(out)
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut out = self.ranges.clone();
        out.extend_from_slice(&other.ranges);
        Self::from_ranges(out)
    }

    /// Sort by lower bound, then fold: drop empties, absorb joinable
    /// neighbors keeping the widest upper. Idempotent.
    fn normalize(&mut self) {
        self.ranges.retain(|r| !r.is_empty());
        self.ranges.sort_by(|a, b| {
            a.lower
                .cmp_ll(&b.lower)
                .then_with(|| a.upper.cmp_uu(&b.upper))
        });
        let mut folded: Vec<VersionRange> = Vec::with_capacity(self.ranges.len());
        for r in self.ranges.drain(..) {
            match folded.last_mut() {
                Some(prev) if joinable(&prev.upper, &r.lower) => {
                    if prev.upper.cmp_uu(&r.upper) == Ordering::Less {
                        *prev = VersionRange::new(prev.lower, r.upper);
                    }
                }
                _ => folded.push(r),
            }
        }
        self.ranges = folded;
    }

    /// Parse a comma-separated list of constraint atoms.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let mut ranges = Vec::new();
        for atom in s.split(',') {
            let atom = atom.trim();
            if atom.is_empty() {
                return Err(VersionError::IncompleteVersion(s.trim().to_string()));
            }
            ranges.push(parse_atom(atom)?);
        }
        Ok(Self::from_ranges(ranges))
    }
}

impl FromStr for VersionSpec {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, VersionError> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ranges.is_empty() {
            return f.write_str("\u{2205}");
        }
        for (i, r) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{r}")?;
        }
        Ok(())
    }
}

impl Serialize for VersionSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VersionSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

fn parse_vernum(s: &str) -> Result<Vec<u64>, VersionError> {
    if s.is_empty() {
        return Err(VersionError::IncompleteVersion(s.to_string()));
    }
    let mut parts = Vec::with_capacity(3);
    for piece in s.split('.') {
        if piece.is_empty() {
            return Err(VersionError::IncompleteVersion(s.to_string()));
        }
        if !piece.bytes().all(|b| b.is_ascii_digit()) {
            return Err(VersionError::InvalidVersion(s.to_string()));
        }
        let value: u64 = piece
            .parse()
            .map_err(|_| VersionError::InvalidVersion(s.to_string()))?;
        parts.push(value);
    }
    if parts.len() > 3 {
        return Err(VersionError::InvalidVersion(s.to_string()));
    }
    Ok(parts)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Specifier {
    Caret,
    Tilde,
    Equal,
    LessEq,
    Less,
    GreaterEq,
    Greater,
}

fn split_specifier(atom: &str) -> (Option<Specifier>, &str) {
    for (token, spec) in [
        ("<=", Specifier::LessEq),
        (">=", Specifier::GreaterEq),
        ("\u{2264}", Specifier::LessEq),
        ("\u{2265}", Specifier::GreaterEq),
        ("^", Specifier::Caret),
        ("~", Specifier::Tilde),
        ("=", Specifier::Equal),
        ("<", Specifier::Less),
        (">", Specifier::Greater),
    ] {
        if let Some(rest) = atom.strip_prefix(token) {
            return (Some(spec), rest.trim_start());
        }
    }
    (None, atom)
}

fn parse_atom(atom: &str) -> Result<VersionRange, VersionError> {
    if atom == "*" {
        return Ok(VersionRange::full());
    }

    if atom.contains('-') {
        return parse_hyphen(atom);
    }

    let (specifier, rest) = split_specifier(atom);
    let rest = rest.strip_prefix('v').unwrap_or(rest);
    if rest.is_empty() {
        return Err(VersionError::IncompleteVersion(atom.to_string()));
    }
    if !rest.bytes().next().is_some_and(|b| b.is_ascii_digit()) {
        return Err(VersionError::InvalidSpecifier(atom.to_string()));
    }
    let parts = parse_vernum(rest)?;

    match specifier.unwrap_or(Specifier::Caret) {
        Specifier::Caret => {
            if parts.len() == 3 && parts.iter().all(|&c| c == 0) {
                return Err(VersionError::InvalidVersion(atom.to_string()));
            }
            Ok(caret_range(&parts))
        }
        Specifier::Tilde => {
            let upper = if parts.len() == 1 {
                VersionBound::from_parts(&parts[..1])
            } else {
                VersionBound::from_parts(&parts[..2])
            };
            Ok(VersionRange::new(VersionBound::from_parts(&parts), upper))
        }
        Specifier::Equal => {
            let b = VersionBound::from_parts(&parts);
            Ok(VersionRange::new(b, b))
        }
        Specifier::LessEq => Ok(VersionRange::new(
            VersionBound::from_parts(&[0]),
            VersionBound::from_parts(&parts),
        )),
        Specifier::Less => {
            // Decrement the least significant non-zero component and
            // truncate the bound there.
            let Some(i) = parts.iter().rposition(|&c| c != 0) else {
                return Err(VersionError::InvalidVersion(atom.to_string()));
            };
            let mut t = parts[..=i].to_vec();
            t[i] -= 1;
            Ok(VersionRange::new(
                VersionBound::from_parts(&[0]),
                VersionBound::from_parts(&t),
            ))
        }
        Specifier::GreaterEq => Ok(VersionRange::new(
            VersionBound::from_parts(&parts),
            VersionBound::unbounded(),
        )),
        Specifier::Greater => {
            // Increment the least significant specified component.
            let mut t = parts.clone();
            if let Some(last) = t.last_mut() {
                *last += 1;
            }
            Ok(VersionRange::new(
                VersionBound::from_parts(&t),
                VersionBound::unbounded(),
            ))
        }
    }
}

fn caret_range(parts: &[u64]) -> VersionRange {
    let lower = VersionBound::from_parts(parts);
    let upper = if parts[0] != 0 {
        VersionBound::from_parts(&parts[..1])
    } else if parts.len() >= 2 && parts[1] != 0 {
        VersionBound::from_parts(&parts[..2])
    } else if parts.len() == 3 && parts[2] != 0 {
        VersionBound::from_parts(&parts[..3])
    } else {
        // Every specified component is zero: the caret pins the given arity.
        lower
    };
    VersionRange::new(lower, upper)
}

fn parse_hyphen(atom: &str) -> Result<VersionRange, VersionError> {
    // The hyphen form requires spaces on both sides.
    let Some((lo, hi)) = atom.split_once(" - ") else {
        return Err(VersionError::IncompleteHyphen(atom.to_string()));
    };
    let (lo, hi) = (lo.trim(), hi.trim());
    if lo.is_empty() || hi.is_empty() || lo.contains('-') || hi.contains('-') {
        return Err(VersionError::IncompleteHyphen(atom.to_string()));
    }
    let lo = lo.strip_prefix('v').unwrap_or(lo);
    let hi = hi.strip_prefix('v').unwrap_or(hi);
    Ok(VersionRange::new(
        VersionBound::from_parts(&parse_vernum(lo)?),
        VersionBound::from_parts(&parse_vernum(hi)?),
    ))
}
