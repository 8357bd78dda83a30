//! Package version ordering
//!
//! Versions are `(epoch, version, release)` triples ordered the way rpm orders
//! them: epoch numerically, then version and release with the segment
//! comparison implemented by [`compare_segments`].

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An rpm `[epoch:]version-release` triple
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub epoch: u32,
    pub version: String,
    pub release: String,
}

impl Version {
    pub fn new(epoch: u32, version: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            epoch,
            version: version.into(),
            release: release.into(),
        }
    }

    /// Parse `[E:]V[-R]`. A missing epoch is 0, a missing release is empty.
    ///
    /// Never fails: anything that does not look like an epoch prefix is
    /// treated as part of the version.
    pub fn parse(s: &str) -> Self {
        let (epoch, rest) = match s.split_once(':') {
            Some((e, rest)) if !e.is_empty() && e.bytes().all(|b| b.is_ascii_digit()) => {
                (e.parse().unwrap_or(0), rest)
            }
            _ => (0, s),
        };

        match rest.rsplit_once('-') {
            Some((version, release)) => Self::new(epoch, version, release),
            None => Self::new(epoch, rest, ""),
        }
    }

    /// `[E:]V-R`, with the epoch omitted when it is zero
    pub fn evr(&self) -> String {
        if self.epoch > 0 {
            format!("{}:{}-{}", self.epoch, self.version, self.release)
        } else {
            format!("{}-{}", self.version, self.release)
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.evr())
    }
}

/// Compare two versions: epoch, then version, then release
pub fn compare(a: &Version, b: &Version) -> Ordering {
    a.epoch
        .cmp(&b.epoch)
        .then_with(|| compare_segments(&a.version, &b.version))
        .then_with(|| compare_segments(&a.release, &b.release))
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Equality follows the ordering, so "1.0" and "1.00" are the same version.
impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

/// rpm segment comparison of a single version or release string.
///
/// The strings are split into maximal runs of ASCII digits or ASCII letters;
/// everything else separates runs. Numeric runs compare numerically and beat
/// alphabetic runs. `~` sorts before anything (even the end of the string),
/// `^` sorts after the end of the string but before any further run.
pub fn compare_segments(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let one = a.as_bytes();
    let two = b.as_bytes();
    let (mut i, mut j) = (0usize, 0usize);

    let is_sep = |c: u8| !c.is_ascii_alphanumeric() && c != b'~' && c != b'^';

    while i < one.len() || j < two.len() {
        while i < one.len() && is_sep(one[i]) {
            i += 1;
        }
        while j < two.len() && is_sep(two[j]) {
            j += 1;
        }

        let c1 = one.get(i).copied();
        let c2 = two.get(j).copied();

        if c1 == Some(b'~') || c2 == Some(b'~') {
            if c1 != Some(b'~') {
                return Ordering::Greater;
            }
            if c2 != Some(b'~') {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }

        if c1 == Some(b'^') || c2 == Some(b'^') {
            if c1.is_none() {
                return Ordering::Less;
            }
            if c2.is_none() {
                return Ordering::Greater;
            }
            if c1 != Some(b'^') {
                return Ordering::Greater;
            }
            if c2 != Some(b'^') {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }

        if c1.is_none() || c2.is_none() {
            break;
        }

        let (start1, start2) = (i, j);
        let numeric = one[i].is_ascii_digit();
        if numeric {
            while i < one.len() && one[i].is_ascii_digit() {
                i += 1;
            }
            while j < two.len() && two[j].is_ascii_digit() {
                j += 1;
            }
        } else {
            while i < one.len() && one[i].is_ascii_alphabetic() {
                i += 1;
            }
            while j < two.len() && two[j].is_ascii_alphabetic() {
                j += 1;
            }
        }

        // The other side had a run of the other kind here
        if j == start2 {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let mut seg1 = &one[start1..i];
        let mut seg2 = &two[start2..j];

        if numeric {
            while seg1.len() > 1 && seg1[0] == b'0' {
                seg1 = &seg1[1..];
            }
            while seg2.len() > 1 && seg2[0] == b'0' {
                seg2 = &seg2[1..];
            }
            match seg1.len().cmp(&seg2.len()) {
                Ordering::Equal => {}
                other => return other,
            }
        }

        match seg1.cmp(seg2) {
            Ordering::Equal => {}
            other => return other,
        }
    }

    match (i < one.len(), j < two.len()) {
        (false, false) => Ordering::Equal,
        (true, _) => Ordering::Greater,
        (false, true) => Ordering::Less,
    }
}
