//! Storage-key normalization.
//!
//! Catalog data spans several generations of upload tooling, so the
//! same object may be recorded as `image/foo.jpg`, `foo.jpg`, or plain
//! `foo`. Matching therefore tests all three representations of a
//! catalog key against the storage listing instead of trusting any
//! single convention.

use std::collections::HashSet;

/// Prefix historically prepended to scene storage keys.
pub const KEY_PREFIX: &str = "image/";

/// Extension historically carried by scene storage keys.
pub const KEY_EXTENSION: &str = ".jpg";

/// The three representations under which a catalog key may appear in a
/// storage listing: fully normalized (prefix and extension stripped),
/// raw, and prefix-stripped.
pub fn candidates(key: &str) -> [&str; 3] {
    let stripped = key.strip_prefix(KEY_PREFIX).unwrap_or(key);
    let normalized = stripped.strip_suffix(KEY_EXTENSION).unwrap_or(stripped);
    [normalized, key, stripped]
}

/// Whether any representation of `key` is present in the listing.
///
/// Each check is a set membership test; callers pass the whole listing
/// as a `HashSet` so reconciliation stays linear in the asset count.
pub fn is_present(storage_keys: &HashSet<String>, key: &str) -> bool {
    candidates(key)
        .iter()
        .any(|candidate| storage_keys.contains(*candidate))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
