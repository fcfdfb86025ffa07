//! Song catalog contract.
//!
//! The core never talks to the catalog's storage directly; it consumes a
//! single read operation through [`CatalogAdapter`]. Deployments back it
//! with a database; tests and demos use [`StaticCatalog`].

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A song as exposed by the catalog.
///
/// `valence` is on `[-1, 1]`, `energy` on the catalog's native scale
/// (typically `[-1, 1]` to match arousal), `popularity` on `[0, 100]`.
/// The mood label is an opaque string; multi-mood catalogs may use
/// comma-separated labels, which the substring matcher handles as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSong {
    pub song_id: i64,
    pub name: String,
    pub artist: String,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    pub valence: f64,
    pub energy: f64,
    pub tempo: f64,
    pub popularity: f64,
    /// Optional engagement counter; 0 when the catalog does not track it.
    #[serde(default)]
    pub like_count: u64,
}

/// Read access to the song catalog.
///
/// `fetch_candidates` returns roughly `approx_limit` songs. When a target
/// mood is given, the catalog returns songs whose mood label contains the
/// target (case-insensitive substring) or songs with no mood label at all.
#[async_trait]
pub trait CatalogAdapter: Send + Sync {
    async fn fetch_candidates(
        &self,
        target_mood: Option<&str>,
        approx_limit: usize,
    ) -> Result<Vec<CatalogSong>>;
}

/// In-memory catalog for tests and demos.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    songs: Vec<CatalogSong>,
}

impl StaticCatalog {
    /// Build a catalog from a fixed song list.
    #[must_use]
    pub fn new(songs: Vec<CatalogSong>) -> Self {
        Self { songs }
    }

    /// Number of songs held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.songs.len()
    }

    /// True when the catalog holds no songs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }
}

#[async_trait]
impl CatalogAdapter for StaticCatalog {
    async fn fetch_candidates(
        &self,
        target_mood: Option<&str>,
        approx_limit: usize,
    ) -> Result<Vec<CatalogSong>> {
        let matches = |song: &CatalogSong| match (target_mood, &song.mood) {
            (Some(target), Some(mood)) => mood.to_lowercase().contains(&target.to_lowercase()),
            (Some(_), None) => true,
            (None, _) => true,
        };
        Ok(self
            .songs
            .iter()
            .filter(|s| matches(s))
            .take(approx_limit)
            .cloned()
            .collect())
    }
}
