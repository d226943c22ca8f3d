//! Read-side projection of the tour catalog.

use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::Database;
use tourbuild_core::types::AssetReference;

use crate::connection::CatalogError;
use crate::models::TourDoc;

/// Name of the tour collection.
const COLLECTION: &str = "tours";

/// Provides read operations over tour documents.
pub struct TourRepo;

impl TourRepo {
    /// Project every scene that carries a storage key into an
    /// [`AssetReference`].
    ///
    /// Scenes without a key (under either field name) are skipped. The
    /// scene id falls back to the scene name when the document has no
    /// embedded id.
    pub async fn list_asset_refs(db: &Database) -> Result<Vec<AssetReference>, CatalogError> {
        let collection = db.collection::<TourDoc>(COLLECTION);

        let mut cursor = collection
            .find(doc! {})
            .await
            .map_err(|e| CatalogError::Query(e.to_string()))?;

        let mut refs = Vec::new();
        let mut tour_count = 0usize;

        while let Some(tour) = cursor
            .try_next()
            .await
            .map_err(|e| CatalogError::Query(e.to_string()))?
        {
            tour_count += 1;
            let tour_id = tour.id.to_hex();
            let tour_name = tour.name.clone().unwrap_or_default();

            for scene in &tour.scenes {
                let Some(key) = scene.storage_key() else {
                    continue;
                };

                let scene_name = scene.name.clone().unwrap_or_else(|| tour_name.clone());
                let scene_id = scene
                    .id
                    .map(|id| id.to_hex())
                    .unwrap_or_else(|| scene_name.clone());

                refs.push(AssetReference {
                    tour_id: tour_id.clone(),
                    scene_id,
                    name: scene_name,
                    storage_key: key.to_string(),
                    audio_key: scene.audio_key.clone(),
                    thumbnail_key: scene.thumbnail_key.clone(),
                });
            }
        }

        tracing::info!(
            tours = tour_count,
            assets = refs.len(),
            "Projected asset references from catalog",
        );
        Ok(refs)
    }
}
