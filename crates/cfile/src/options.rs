use serde::{Deserialize, Serialize};

/// Options for [`CFileReader`](crate::CFileReader).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Verify the checksum of every block as it is read.
    pub verify_checksums: bool,

    /// Maximum depth of an index tree.  Deeper trees are reported as
    /// corruption, since a reasonably sized file cannot need one.
    pub max_index_depth: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            max_index_depth: 64,
        }
    }
}
