//! Namespace keys
//!
//! A `Url` addresses one node of a tracked namespace as a list of path
//! segments. Segment names are kept byte-exact: backends that do not normalize
//! names (Linux) must get back the name they listed. It is backend-agnostic: the local disk backend maps it under
//! a root directory, the memory backend uses it directly as a map key.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Separator placed before every segment in the storage key encoding.
pub(crate) const KEY_SEPARATOR: u8 = 0x00;
/// Escape byte for `0x00` and `0x01` inside a segment.
const KEY_ESCAPE: u8 = 0x01;

/// Hierarchical namespace key with structural equality.
///
/// Ordering is segment-wise, so a parent always sorts before its descendants.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Url {
    segments: Vec<String>,
}

impl Url {
    /// The namespace root (`/`).
    pub fn root() -> Self {
        Url {
            segments: Vec::new(),
        }
    }

    /// Parse a `/`-separated path. Empty and `.` segments are dropped, `..`
    /// pops the previous segment, other names are kept as given.
    pub fn parse(path: &str) -> Self {
        let mut url = Url::root();
        url.push_path(path);
        url
    }

    fn push_path(&mut self, path: &str) {
        for raw in path.split('/') {
            match raw {
                "" | "." => {}
                ".." => {
                    self.segments.pop();
                }
                name => self.segments.push(name.to_string()),
            }
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments below the root.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }

    /// Last segment, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Parent key, `None` for the root.
    pub fn parent(&self) -> Option<Url> {
        if self.is_root() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Url { segments })
    }

    /// Append a child name (or relative path) to this key.
    pub fn join(&self, name: &str) -> Url {
        let mut url = self.clone();
        url.push_path(name);
        url
    }

    /// True when `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &Url) -> bool {
        other.segments.len() > self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// `self` or a descendant of `base`.
    pub fn is_within(&self, base: &Url) -> bool {
        self == base || base.is_ancestor_of(self)
    }

    /// Every prefix of this key from the root down to (and including) `self`.
    pub fn lineage(&self) -> Vec<Url> {
        (0..=self.segments.len())
            .map(|len| Url {
                segments: self.segments[..len].to_vec(),
            })
            .collect()
    }

    /// Materialized-path encoding used by the persisted index.
    ///
    /// Each segment is prefixed with `0x00`, the root encodes as the empty key.
    /// Inside a segment `0x00` becomes `01 01` and `0x01` becomes `01 02`, so a
    /// separator never appears within a segment and byte order is kept.
    /// Lexicographic byte order of keys is pre-order over the tree, and the
    /// descendants of a key are exactly the keys that start with
    /// `key + 0x00`.
    pub fn storage_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.segments.iter().map(|s| s.len() + 1).sum());
        for segment in &self.segments {
            key.push(KEY_SEPARATOR);
            for &byte in segment.as_bytes() {
                match byte {
                    KEY_SEPARATOR => key.extend_from_slice(&[KEY_ESCAPE, 0x01]),
                    KEY_ESCAPE => key.extend_from_slice(&[KEY_ESCAPE, 0x02]),
                    byte => key.push(byte),
                }
            }
        }
        key
    }

    /// Prefix shared by the storage keys of all descendants.
    pub fn descendant_prefix(&self) -> Vec<u8> {
        let mut key = self.storage_key();
        key.push(KEY_SEPARATOR);
        key
    }

    /// Inverse of [`Url::storage_key`].
    pub fn from_storage_key(key: &[u8]) -> Option<Url> {
        if key.is_empty() {
            return Some(Url::root());
        }
        if key[0] != KEY_SEPARATOR {
            return None;
        }
        let segments = key[1..]
            .split(|b| *b == KEY_SEPARATOR)
            .map(|raw| String::from_utf8(unescape_segment(raw)?).ok())
            .collect::<Option<Vec<_>>>()?;
        Some(Url { segments })
    }
}

fn unescape_segment(raw: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut bytes = raw.iter();
    while let Some(&byte) = bytes.next() {
        if byte != KEY_ESCAPE {
            out.push(byte);
            continue;
        }
        match bytes.next() {
            Some(0x01) => out.push(KEY_SEPARATOR),
            Some(0x02) => out.push(KEY_ESCAPE),
            _ => return None,
        }
    }
    Some(out)
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Url({})", self)
    }
}

impl FromStr for Url {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Url::parse(s))
    }
}

impl From<&str> for Url {
    fn from(s: &str) -> Self {
        Url::parse(s)
    }
}

impl Serialize for Url {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Url {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Url::parse(&raw))
    }
}
