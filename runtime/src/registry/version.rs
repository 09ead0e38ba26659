//! Semantic versions and constraints (`spec.md` §3, §4.5).

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch, prerelease: None, build: None }
    }

    /// Parse `major[.minor[.patch]][-prerelease][+build]`. Missing minor/patch
    /// components default to zero so that constraint operands like `^1` or
    /// `~1.2` parse with the same routine as full versions.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let s = raw.trim();
        if s.is_empty() {
            return Err("version string is empty".to_string());
        }

        let (core_and_pre, build) = match s.split_once('+') {
            Some((a, b)) => (a, Some(b.to_string())),
            None => (s, None),
        };
        let (core, prerelease) = match core_and_pre.split_once('-') {
            Some((a, b)) => (a, Some(b.to_string())),
            None => (core_and_pre, None),
        };

        let mut parts = core.split('.');
        let major = parse_component(parts.next(), s)?;
        let minor = match parts.next() {
            Some(p) => parse_component(Some(p), s)?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => parse_component(Some(p), s)?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(format!("too many version components: {s}"));
        }

        Ok(Self { major, minor, patch, prerelease, build })
    }
}

fn parse_component(part: Option<&str>, whole: &str) -> Result<u64, String> {
    part.ok_or_else(|| format!("missing version component: {whole}"))?
        .parse::<u64>()
        .map_err(|_| format!("invalid version component in: {whole}"))
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{build}")?;
        }
        Ok(())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                // No prerelease has higher precedence than any prerelease.
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            })
        // Build metadata never participates in ordering.
    }
}

fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut ai = a.split('.');
    let mut bi = b.split('.');
    loop {
        return match (ai.next(), bi.next()) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(xn), Ok(yn)) => xn.cmp(&yn),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if ord == Ordering::Equal {
                    continue;
                }
                ord
            }
        };
    }
}

/// A version constraint (`spec.md` §3, §4.5).
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Empty string, `latest`, or `*` — matches every version.
    Any,
    Eq(Version),
    Ne(Version),
    Gt(Version),
    Ge(Version),
    Lt(Version),
    Le(Version),
    /// `^X.Y.Z`. `X > 0` locks the major; `X == 0, Y > 0` locks `0.Y.*`;
    /// `X == 0, Y == 0` locks `0.0.Z` exactly.
    Caret(Version),
    /// `~X.Y.Z` locks `X.Y.*`.
    Tilde(Version),
    Range { min: Version, max: Version, max_inclusive: bool },
}

impl Constraint {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let s = raw.trim();
        if s.is_empty() || s == "latest" || s == "*" {
            return Ok(Constraint::Any);
        }
        if let Some(rest) = s.strip_prefix(">=") {
            if let Some(space_idx) = rest.find(|c: char| c.is_whitespace()) {
                let (min_part, rest2) = rest.split_at(space_idx);
                let max_part = rest2.trim_start();
                return parse_range(min_part, max_part);
            }
            return Ok(Constraint::Ge(Version::parse(rest)?));
        }
        if let Some(rest) = s.strip_prefix("<=") {
            return Ok(Constraint::Le(Version::parse(rest)?));
        }
        if let Some(rest) = s.strip_prefix("!=") {
            return Ok(Constraint::Ne(Version::parse(rest)?));
        }
        if let Some(rest) = s.strip_prefix('=') {
            return Ok(Constraint::Eq(Version::parse(rest)?));
        }
        if let Some(rest) = s.strip_prefix('>') {
            return Ok(Constraint::Gt(Version::parse(rest)?));
        }
        if let Some(rest) = s.strip_prefix('<') {
            return Ok(Constraint::Lt(Version::parse(rest)?));
        }
        if let Some(rest) = s.strip_prefix('^') {
            return Ok(Constraint::Caret(Version::parse(rest)?));
        }
        if let Some(rest) = s.strip_prefix('~') {
            return Ok(Constraint::Tilde(Version::parse(rest)?));
        }
        Ok(Constraint::Eq(Version::parse(s)?))
    }

    pub fn matches(&self, v: &Version) -> bool {
        match self {
            Constraint::Any => true,
            Constraint::Eq(x) => v == x,
            Constraint::Ne(x) => v != x,
            Constraint::Gt(x) => v > x,
            Constraint::Ge(x) => v >= x,
            Constraint::Lt(x) => v < x,
            Constraint::Le(x) => v <= x,
            Constraint::Caret(base) => caret_matches(base, v),
            Constraint::Tilde(base) => tilde_matches(base, v),
            Constraint::Range { min, max, max_inclusive } => {
                v >= min && if *max_inclusive { v <= max } else { v < max }
            }
        }
    }
}

fn parse_range(min_part: &str, max_part: &str) -> Result<Constraint, String> {
    let (max_raw, max_inclusive) = match max_part.strip_prefix("<=") {
        Some(rest) => (rest, true),
        None => (
            max_part
                .strip_prefix('<')
                .ok_or_else(|| format!("invalid range upper bound: {max_part}"))?,
            false,
        ),
    };
    Ok(Constraint::Range {
        min: Version::parse(min_part)?,
        max: Version::parse(max_raw)?,
        max_inclusive,
    })
}

fn caret_matches(base: &Version, v: &Version) -> bool {
    if base.major > 0 {
        v.major == base.major && v >= base && v < &Version::new(base.major + 1, 0, 0)
    } else if base.minor > 0 {
        v.major == 0 && v.minor == base.minor && v >= base && v < &Version::new(0, base.minor + 1, 0)
    } else {
        v.major == 0 && v.minor == 0 && v.patch == base.patch
    }
}

fn tilde_matches(base: &Version, v: &Version) -> bool {
    v.major == base.major && v.minor == base.minor && v >= base && v < &Version::new(base.major, base.minor + 1, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_and_partial_versions() {
        assert_eq!(Version::parse("1.2.3").unwrap(), Version::new(1, 2, 3));
        assert_eq!(Version::parse("1.2").unwrap(), Version::new(1, 2, 0));
        assert_eq!(Version::parse("1").unwrap(), Version::new(1, 0, 0));
    }

    #[test]
    fn prerelease_sorts_below_release() {
        let pre = Version::parse("1.0.0-alpha").unwrap();
        let release = Version::parse("1.0.0").unwrap();
        assert!(pre < release);
    }

    #[test]
    fn build_metadata_is_ignored_for_ordering() {
        let a = Version::parse("1.0.0+001").unwrap();
        let b = Version::parse("1.0.0+002").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn caret_on_major_locks_to_major_series() {
        let c = Constraint::parse("^1.2.3").unwrap();
        assert!(c.matches(&Version::new(1, 2, 3)));
        assert!(c.matches(&Version::new(1, 9, 0)));
        assert!(!c.matches(&Version::new(2, 0, 0)));
        assert!(!c.matches(&Version::new(1, 2, 2)));
    }

    #[test]
    fn caret_on_zero_minor_locks_to_minor_series() {
        let c = Constraint::parse("^0.2.3").unwrap();
        assert!(c.matches(&Version::new(0, 2, 9)));
        assert!(!c.matches(&Version::new(0, 3, 0)));
    }

    #[test]
    fn caret_on_zero_zero_locks_exactly() {
        let c = Constraint::parse("^0.0.3").unwrap();
        assert!(c.matches(&Version::new(0, 0, 3)));
        assert!(!c.matches(&Version::new(0, 0, 4)));
    }

    #[test]
    fn tilde_locks_to_minor_series() {
        let c = Constraint::parse("~1.2.3").unwrap();
        assert!(c.matches(&Version::new(1, 2, 9)));
        assert!(!c.matches(&Version::new(1, 3, 0)));
    }

    #[test]
    fn empty_latest_and_star_match_everything() {
        for s in ["", "latest", "*"] {
            let c = Constraint::parse(s).unwrap();
            assert!(c.matches(&Version::new(0, 0, 1)));
            assert!(c.matches(&Version::new(9, 9, 9)));
        }
    }

    #[test]
    fn range_is_min_inclusive_max_exclusive_by_default() {
        let c = Constraint::parse(">=1.0.0 <2.0.0").unwrap();
        assert!(c.matches(&Version::new(1, 5, 0)));
        assert!(!c.matches(&Version::new(2, 0, 0)));
    }

    #[test]
    fn range_max_inclusive_when_explicit() {
        let c = Constraint::parse(">=1.0.0 <=2.0.0").unwrap();
        assert!(c.matches(&Version::new(2, 0, 0)));
    }

    #[test]
    fn bare_version_is_treated_as_exact() {
        let c = Constraint::parse("1.2.3").unwrap();
        assert!(c.matches(&Version::new(1, 2, 3)));
        assert!(!c.matches(&Version::new(1, 2, 4)));
    }
}
