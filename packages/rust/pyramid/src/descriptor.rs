//! Pyramid descriptor model.
//!
//! A pyramid is described by a JSON document at `<root>/<name>.json`. Tile
//! pixel dimensions are denormalized into each level block so that working
//! with a pyramid never requires a tile-matrix-set registry.

use serde::{Deserialize, Serialize};
use tracing::debug;

use pyramerge_shared::{PyramergeError, Result, SlabIdentity, SlabKind, TileLimits};
use pyramerge_storage::{Store, uri};

use crate::list::SlabList;
use crate::slab;

// ---------------------------------------------------------------------------
// Descriptor document
// ---------------------------------------------------------------------------

/// One level block of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSpec {
    /// Numeric level identifier (larger id = higher resolution).
    pub id: u32,
    /// Tile width in pixels.
    pub tile_width: u32,
    /// Tile height in pixels.
    pub tile_height: u32,
    /// Slab width in tiles.
    pub slab_width: u32,
    /// Slab height in tiles.
    pub slab_height: u32,
    /// Tile-coordinate envelope actually covered by the level.
    pub tile_limits: TileLimits,
}

/// Pixel-level parameters passed to the converter processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterSpecifications {
    pub channels: u32,
    pub nodata: String,
    pub photometric: String,
    pub interpolation: String,
}

/// The JSON descriptor document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    /// Tile-matrix-set name shared by all compatible pyramids.
    pub tile_matrix_set: String,
    /// Format string, e.g. `TIFF_PNG_UINT8`: container, compression,
    /// sample format and bit depth.
    pub format: String,
    /// Number of channels.
    pub channels: u32,
    /// Converter parameters.
    pub raster_specifications: RasterSpecifications,
    /// Whether the pyramid carries mask slabs.
    #[serde(default)]
    pub mask: bool,
    /// Level blocks, any order.
    pub levels: Vec<LevelSpec>,
}

// ---------------------------------------------------------------------------
// RasterFormat
// ---------------------------------------------------------------------------

/// Converter flags extracted from a descriptor format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterFormat {
    /// Slab compression (`png`, `jpg`, `zip`, ...), lowercase.
    pub compression: String,
    /// Sample format flag: `uint` or `float`.
    pub sample_format: String,
    /// Bit depth flag: `8` or `32`.
    pub bit_depth: String,
}

impl RasterFormat {
    /// Parse a format string like `TIFF_PNG_UINT8` or `TIFF_ZIP_FLOAT32`.
    pub fn parse(format: &str) -> Result<Self> {
        let mut tokens = format.split('_');
        let _container = tokens.next();
        let compression = tokens.next().ok_or_else(|| {
            PyramergeError::pyramid(format!("format string has no compression: {format}"))
        })?;

        let sample_format = if format.contains("UINT") {
            "uint"
        } else if format.contains("FLOAT") {
            "float"
        } else {
            return Err(PyramergeError::pyramid(format!(
                "format string has no sample format: {format}"
            )));
        };

        let bit_depth = if format.ends_with("32") {
            "32"
        } else if format.ends_with('8') {
            "8"
        } else {
            return Err(PyramergeError::pyramid(format!(
                "format string has no bit depth: {format}"
            )));
        };

        Ok(Self {
            compression: compression.to_lowercase(),
            sample_format: sample_format.to_string(),
            bit_depth: bit_depth.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Pyramid
// ---------------------------------------------------------------------------

/// A pyramid: a named, rooted descriptor.
#[derive(Debug, Clone)]
pub struct Pyramid {
    name: String,
    root: String,
    descriptor: Descriptor,
}

impl Pyramid {
    /// Load a pyramid from its descriptor location (`<root>/<name>.json`).
    pub async fn from_descriptor(store: &Store, location: &str) -> Result<Self> {
        let text = store.get_text(location).await.map_err(|e| {
            PyramergeError::pyramid(format!("cannot load pyramid descriptor {location}: {e}"))
        })?;
        let descriptor: Descriptor = serde_json::from_str(&text).map_err(|e| {
            PyramergeError::pyramid(format!("invalid pyramid descriptor {location}: {e}"))
        })?;

        let (root, base) = uri::split_tray(location);
        let name = base.strip_suffix(".json").ok_or_else(|| {
            PyramergeError::pyramid(format!(
                "descriptor location must end in .json: {location}"
            ))
        })?;

        debug!(name, root, levels = descriptor.levels.len(), "descriptor loaded");
        Ok(Self {
            name: name.to_string(),
            root: root.to_string(),
            descriptor,
        })
    }

    /// Derive a new pyramid from an existing one: same tile matrix set,
    /// format and levels, new name and root. `mask` overrides whether the
    /// new pyramid carries mask slabs.
    pub fn from_other(other: &Pyramid, name: &str, root: &str, mask: Option<bool>) -> Self {
        let mut descriptor = other.descriptor.clone();
        if let Some(mask) = mask {
            descriptor.mask = mask;
        }
        Self {
            name: name.to_string(),
            root: root.to_string(),
            descriptor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Root of the pyramid's own tree: `<root>/<name>`. Slab paths and the
    /// slab list header are relative to this.
    pub fn base(&self) -> String {
        uri::join(&self.root, &self.name)
    }

    /// Location of the descriptor document.
    pub fn descriptor_path(&self) -> String {
        uri::join(&self.root, &format!("{}.json", self.name))
    }

    /// Location of the slab list.
    pub fn list_path(&self) -> String {
        uri::join(&self.root, &format!("{}.list", self.name))
    }

    /// Cluster host embedded in the root, if any (`bucket@cluster` notation).
    pub fn storage_cluster(&self) -> Option<String> {
        uri::cluster(&self.root)
    }

    /// Whether the pyramid lives on object storage (anything but `file://`
    /// or bare paths).
    pub fn object_storage(&self) -> bool {
        uri::scheme(&self.root).is_some_and(|s| s != "file")
    }

    /// Write the descriptor document to its final location.
    pub async fn write_descriptor(&self, store: &Store) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.descriptor)
            .map_err(|e| PyramergeError::pyramid(e.to_string()))?;
        store.put_text(&self.descriptor_path(), &text).await
    }

    /// Read the pyramid's slab list.
    pub async fn load_list(&self, store: &Store) -> Result<SlabList> {
        let text = store.get_text(&self.list_path()).await.map_err(|e| {
            PyramergeError::pyramid(format!("cannot read slab list of {}: {e}", self.name))
        })?;
        SlabList::parse(&text)
    }

    // -- levels -------------------------------------------------------------

    /// The level block with the given id, if present.
    pub fn level(&self, id: u32) -> Option<&LevelSpec> {
        self.descriptor.levels.iter().find(|l| l.id == id)
    }

    /// All level ids between `bottom` and `top` inclusively, ascending.
    /// Errors if any level in the range is absent. Endpoint order does not
    /// matter.
    pub fn levels_between(&self, bottom: u32, top: u32) -> Result<Vec<&LevelSpec>> {
        let (lo, hi) = if top <= bottom { (top, bottom) } else { (bottom, top) };
        (lo..=hi)
            .map(|id| {
                self.level(id).ok_or_else(|| {
                    PyramergeError::pyramid(format!(
                        "all levels between {bottom} -> {top} are not in {}",
                        self.name
                    ))
                })
            })
            .collect()
    }

    /// Add or replace a level block.
    pub fn add_level(&mut self, level: LevelSpec) {
        self.remove_level(level.id);
        self.descriptor.levels.push(level);
        self.descriptor.levels.sort_by_key(|l| l.id);
    }

    /// Remove a level block. Absence is ignored.
    pub fn remove_level(&mut self, id: u32) {
        self.descriptor.levels.retain(|l| l.id != id);
    }

    // -- slab paths ----------------------------------------------------------

    /// Slab path relative to [`Pyramid::base`], in the layout matching the
    /// pyramid's storage backend.
    pub fn slab_path(&self, kind: SlabKind, level: u32, column: u64, row: u64) -> String {
        let identity = SlabIdentity::new(kind, level, column, row);
        if self.object_storage() {
            slab::object_path(&identity)
        } else {
            slab::file_path(&identity)
        }
    }

    /// Absolute slab path, rooted at [`Pyramid::base`].
    pub fn slab_full_path(&self, kind: SlabKind, level: u32, column: u64, row: u64) -> String {
        uri::join(&self.base(), &self.slab_path(kind, level, column, row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_descriptor() -> String {
        serde_json::json!({
            "tile_matrix_set": "PM",
            "format": "TIFF_PNG_UINT8",
            "channels": 3,
            "raster_specifications": {
                "channels": 3,
                "nodata": "255,255,255",
                "photometric": "rgb",
                "interpolation": "bicubic"
            },
            "mask": false,
            "levels": [
                { "id": 11, "tile_width": 256, "tile_height": 256,
                  "slab_width": 16, "slab_height": 16,
                  "tile_limits": { "min_col": 0, "min_row": 0, "max_col": 50, "max_row": 50 } },
                { "id": 12, "tile_width": 256, "tile_height": 256,
                  "slab_width": 16, "slab_height": 16,
                  "tile_limits": { "min_col": 0, "min_row": 0, "max_col": 100, "max_row": 100 } }
            ]
        })
        .to_string()
    }

    async fn sample_pyramid(store: &Store) -> Pyramid {
        store
            .put_text("file:///data/pyramids/ortho.json", &sample_descriptor())
            .await
            .unwrap();
        Pyramid::from_descriptor(store, "file:///data/pyramids/ortho.json")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn descriptor_load_derives_name_and_root() {
        let store = Store::memory();
        let pyramid = sample_pyramid(&store).await;
        assert_eq!(pyramid.name(), "ortho");
        assert_eq!(pyramid.base(), "file:///data/pyramids/ortho");
        assert_eq!(pyramid.list_path(), "file:///data/pyramids/ortho.list");
        assert!(pyramid.storage_cluster().is_none());
        assert!(!pyramid.object_storage());
    }

    #[tokio::test]
    async fn levels_between_accepts_either_endpoint_order() {
        let store = Store::memory();
        let pyramid = sample_pyramid(&store).await;

        let levels = pyramid.levels_between(12, 11).unwrap();
        assert_eq!(levels.iter().map(|l| l.id).collect::<Vec<_>>(), vec![11, 12]);
        let levels = pyramid.levels_between(11, 12).unwrap();
        assert_eq!(levels.len(), 2);

        let err = pyramid.levels_between(13, 11).unwrap_err();
        assert!(err.to_string().contains("are not in ortho"));
    }

    #[tokio::test]
    async fn from_other_overrides_mask_and_location() {
        let store = Store::memory();
        let pyramid = sample_pyramid(&store).await;

        let copy = Pyramid::from_other(&pyramid, "merged", "file:///out", Some(true));
        assert_eq!(copy.base(), "file:///out/merged");
        assert!(copy.descriptor().mask);
        // Source is untouched
        assert!(!pyramid.descriptor().mask);
    }

    #[tokio::test]
    async fn add_level_replaces_and_remove_ignores_absence() {
        let store = Store::memory();
        let mut pyramid = sample_pyramid(&store).await;

        pyramid.remove_level(42); // no-op
        let mut spec = pyramid.level(12).unwrap().clone();
        spec.tile_limits.max_col = 999;
        pyramid.add_level(spec);
        assert_eq!(pyramid.level(12).unwrap().tile_limits.max_col, 999);
        assert_eq!(pyramid.descriptor().levels.len(), 2);
    }

    #[tokio::test]
    async fn slab_paths_follow_storage_backend() {
        let store = Store::memory();
        let pyramid = sample_pyramid(&store).await;
        assert_eq!(
            pyramid.slab_full_path(SlabKind::Data, 12, 18, 17),
            "file:///data/pyramids/ortho/DATA/12/00/00/IH.tif"
        );

        let object = Pyramid::from_other(&pyramid, "ortho", "s3://bucket", None);
        assert_eq!(
            object.slab_full_path(SlabKind::Data, 12, 18, 17),
            "s3://bucket/ortho/DATA_12_18_17"
        );
    }

    #[test]
    fn raster_format_parsing() {
        let f = RasterFormat::parse("TIFF_PNG_UINT8").unwrap();
        assert_eq!(f.compression, "png");
        assert_eq!(f.sample_format, "uint");
        assert_eq!(f.bit_depth, "8");

        let f = RasterFormat::parse("TIFF_ZIP_FLOAT32").unwrap();
        assert_eq!(f.compression, "zip");
        assert_eq!(f.sample_format, "float");
        assert_eq!(f.bit_depth, "32");

        assert!(RasterFormat::parse("TIFF_PNG").is_err());
    }
}
