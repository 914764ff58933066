//! Selection predicate applied to listing results.

use super::blob::BlobEntry;
use serde::{Deserialize, Serialize};

/// How to select entries from a listing.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchPolicy {
    /// Concrete objects only.
    Files,
    /// Directory groupings only.
    Directories,
    #[default]
    All,
}

impl SearchPolicy {
    pub fn matches(self, entry: &BlobEntry) -> bool {
        match self {
            SearchPolicy::Files => !entry.is_directory,
            SearchPolicy::Directories => entry.is_directory,
            SearchPolicy::All => true,
        }
    }
}
