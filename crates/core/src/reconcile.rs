//! Reconciliation of catalog assets against a storage listing.

use std::collections::HashSet;

use crate::keys;
use crate::types::AssetReference;

/// Object keys present under the storage prefix at reconciliation time,
/// already stripped of that prefix by the object store adapter.
pub type StorageKeySet = HashSet<String>;

/// Select the catalog assets whose backing object exists in storage.
///
/// Pure function of its two inputs. A reference whose storage key is
/// empty is skipped, not an error. Duplicates by underlying scene are
/// passed through unchanged.
pub fn match_assets(assets: &[AssetReference], storage_keys: &StorageKeySet) -> Vec<AssetReference> {
    assets
        .iter()
        .filter(|asset| {
            !asset.storage_key.is_empty() && keys::is_present(storage_keys, &asset.storage_key)
        })
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(scene_id: &str, storage_key: &str) -> AssetReference {
        AssetReference {
            tour_id: "tour-1".into(),
            scene_id: scene_id.into(),
            name: scene_id.into(),
            storage_key: storage_key.into(),
            audio_key: None,
            thumbnail_key: None,
        }
    }

    fn listing(keys: &[&str]) -> StorageKeySet {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn matches_prefix_stripped_upload() {
        let assets = vec![asset("s1", "image/foo.jpg")];
        let matched = match_assets(&assets, &listing(&["foo.jpg"]));
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].scene_id, "s1");
    }

    #[test]
    fn skips_unmatched_assets() {
        let assets = vec![asset("s1", "image/foo.jpg"), asset("s2", "image/bar.jpg")];
        let matched = match_assets(&assets, &listing(&["bar.jpg"]));
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].scene_id, "s2");
    }

    #[test]
    fn skips_assets_without_storage_key() {
        let assets = vec![asset("s1", ""), asset("s2", "image/bar.jpg")];
        let matched = match_assets(&assets, &listing(&["bar.jpg"]));
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].scene_id, "s2");
    }

    #[test]
    fn empty_listing_matches_nothing() {
        let assets = vec![asset("s1", "image/foo.jpg")];
        assert!(match_assets(&assets, &StorageKeySet::new()).is_empty());
    }

    #[test]
    fn duplicates_are_preserved() {
        let assets = vec![asset("s1", "image/foo.jpg"), asset("s1", "image/foo.jpg")];
        let matched = match_assets(&assets, &listing(&["foo.jpg"]));
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn identical_inputs_yield_identical_matches() {
        let assets = vec![
            asset("s1", "image/foo.jpg"),
            asset("s2", "bar.jpg"),
            asset("s3", "image/baz"),
        ];
        let keys = listing(&["foo.jpg", "bar", "baz"]);

        let mut first = match_assets(&assets, &keys);
        let mut second = match_assets(&assets, &keys);
        first.sort_by(|a, b| a.scene_id.cmp(&b.scene_id));
        second.sort_by(|a, b| a.scene_id.cmp(&b.scene_id));
        assert_eq!(first, second);
    }
}
