// crates/recall-server/src/util/mod.rs

pub mod canonical;

pub use canonical::{canonical_json, content_hash};

use std::path::Path;

/// Convert a path to a String for connection strings and log fields.
pub fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
