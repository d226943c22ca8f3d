//! Catalog document models.
//!
//! Tours embed their scenes; a scene's panorama storage key appears
//! under one of two historical field names. [`SceneDoc::storage_key`]
//! is the single accessor that resolves the split so business logic
//! never branches on field names.

use mongodb::bson;
use mongodb::bson::oid::ObjectId;
use serde::Deserialize;

/// One tour document from the `tours` collection.
#[derive(Debug, Clone, Deserialize)]
pub struct TourDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub scenes: Vec<SceneDoc>,

    #[serde(rename = "createdAt", default)]
    pub created_at: Option<bson::DateTime>,

    #[serde(rename = "updatedAt", default)]
    pub updated_at: Option<bson::DateTime>,
}

/// One scene embedded in a tour.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SceneDoc {
    #[serde(rename = "_id", default)]
    pub id: Option<ObjectId>,

    #[serde(default)]
    pub name: Option<String>,

    /// Current field name for the panorama storage key.
    #[serde(rename = "imageKey", default)]
    image_key: Option<String>,

    /// Legacy field name, still present on older tours.
    #[serde(rename = "image", default)]
    image: Option<String>,

    #[serde(rename = "audioKey", default)]
    pub audio_key: Option<String>,

    #[serde(rename = "thumbnailKey", default)]
    pub thumbnail_key: Option<String>,
}

impl SceneDoc {
    /// The scene's storage key under either naming convention,
    /// preferring the current `imageKey` field. Empty strings count as
    /// absent.
    pub fn storage_key(&self) -> Option<&str> {
        non_empty(&self.image_key).or_else(|| non_empty(&self.image))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
