//! Release tag versions
//!
//! Tags are compared as `vMAJOR[.MINOR[.PATCH]][-PRERELEASE][+BUILD]`; missing
//! minor/patch components count as zero. Bare tags like `1.2.0` are
//! normalized to `v1.2.0` first.

use serde::Serialize;
use std::cmp::Ordering;

/// A remote tag and its normalized version string
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryTag {
    pub name: String,
    pub version: String,
}

impl RepositoryTag {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let version = normalize(&name);
        Self { name, version }
    }

    pub fn parsed(&self) -> Option<TagVersion> {
        TagVersion::parse(&self.version)
    }
}

/// Prefix a leading `v` when absent
pub fn normalize(tag: &str) -> String {
    if tag.starts_with('v') {
        tag.to_string()
    } else {
        format!("v{}", tag)
    }
}

/// Parsed version; build metadata is ignored for ordering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre_release: Vec<String>,
}

impl TagVersion {
    /// Parse a `v`-prefixed version string; `None` when it is not valid
    pub fn parse(version: &str) -> Option<Self> {
        let rest = version.strip_prefix('v')?;
        let (rest, build) = match rest.split_once('+') {
            Some((rest, build)) => (rest, Some(build)),
            None => (rest, None),
        };
        if build.is_some_and(|b| !valid_identifiers(b)) {
            return None;
        }
        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (rest, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() > 3 {
            return None;
        }
        // Shorthand forms cannot carry pre-release or build data
        if parts.len() < 3 && (pre.is_some() || build.is_some()) {
            return None;
        }
        let mut numbers = [0u64; 3];
        for (i, part) in parts.iter().enumerate() {
            numbers[i] = parse_numeric(part)?;
        }

        let pre_release = match pre {
            Some(pre) if valid_identifiers(pre) => pre.split('.').map(str::to_string).collect(),
            Some(_) => return None,
            None => Vec::new(),
        };

        Some(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            pre_release,
        })
    }
}

impl Ord for TagVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| compare_pre_release(&self.pre_release, &other.pre_release))
    }
}

impl PartialOrd for TagVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Non-negative integer without leading zeros
fn parse_numeric(part: &str) -> Option<u64> {
    if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if part.len() > 1 && part.starts_with('0') {
        return None;
    }
    part.parse().ok()
}

fn valid_identifiers(s: &str) -> bool {
    !s.is_empty()
        && s.split('.')
            .all(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
}

/// A release sorts after any of its pre-releases
fn compare_pre_release(a: &[String], b: &[String]) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (false, false) => {}
    }
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Usable for upgrade comparison: valid and not a release candidate
fn is_candidate(tag: &RepositoryTag) -> bool {
    tag.parsed().is_some() && !tag.version.contains("rc")
}

/// Highest valid, non-`rc` tag whose major version is `major`
pub fn latest_tag_within_major(tags: &[RepositoryTag], major: u64) -> Option<&RepositoryTag> {
    let mut candidates: Vec<(TagVersion, &RepositoryTag)> = tags
        .iter()
        .filter(|t| is_candidate(t))
        .filter_map(|t| t.parsed().map(|v| (v, t)))
        .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    candidates
        .into_iter()
        .find(|(v, _)| v.major == major)
        .map(|(_, t)| t)
}
