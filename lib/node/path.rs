//! Remote path keys and their ordering.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::Hasher as _;
use std::sync::Arc;

use rustc_hash::FxHasher;

use super::error::NodeCacheError;

/// Compare two remote paths without assuming either is terminated.
///
/// The common prefix decides first; if it matches, the shorter path sorts first. This is the
/// same order `strcmp` would give for terminated strings.
#[must_use]
pub fn compare_paths(a: &[u8], b: &[u8]) -> Ordering {
    let common = a.len().min(b.len());
    match a[..common].cmp(&b[..common]) {
        Ordering::Equal => a.len().cmp(&b.len()),
        unequal => unequal,
    }
}

/// The separators a mount uses when naming children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Separators {
    /// Separator between a directory and its children.
    pub path: u8,
    /// Separator between a file and its extended-attribute directory.
    pub xattr: u8,
}

impl Separators {
    /// Whether `byte` marks a path boundary under this mount.
    #[must_use]
    pub fn contains(self, byte: u8) -> bool {
        byte == self.path || byte == self.xattr
    }
}

impl Default for Separators {
    fn default() -> Self {
        Self {
            path: b'/',
            xattr: b':',
        }
    }
}

/// An immutable remote path, shared between a node and its index entry.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct RemotePath(Arc<[u8]>);

impl RemotePath {
    /// Build `dir + sep? + name`, reserving the buffer fallibly.
    pub(crate) fn join(dir: &[u8], sep: Option<u8>, name: &[u8]) -> Result<Self, NodeCacheError> {
        let len = dir.len() + usize::from(sep.is_some()) + name.len();
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| NodeCacheError::Exhausted {
                what: "path buffer",
            })?;
        buf.extend_from_slice(dir);
        if let Some(sep) = sep {
            buf.push(sep);
        }
        buf.extend_from_slice(name);
        debug_assert_eq!(buf.len(), len);
        Ok(Self(Arc::from(buf)))
    }

    /// The raw path bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the path in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the mount root's (empty) path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether this path lies strictly below `ancestor`: it starts with `ancestor` and the next
    /// byte is a separator.
    #[must_use]
    pub fn is_below(&self, ancestor: &[u8], separators: Separators) -> bool {
        self.0.starts_with(ancestor)
            && self
                .0
                .get(ancestor.len())
                .is_some_and(|&b| separators.contains(b))
    }

    /// Stand-in inode number derived from the path bytes.
    #[must_use]
    pub fn synthetic_id(&self) -> u64 {
        let mut hasher = FxHasher::default();
        hasher.write(&self.0);
        hasher.finish()
    }
}

impl Ord for RemotePath {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_paths(&self.0, &other.0)
    }
}

impl PartialOrd for RemotePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Borrow<[u8]> for RemotePath {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}
