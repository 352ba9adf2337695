//! Datasource resolution: load and cross-validate the source pyramids of a
//! level range.

use tracing::debug;

use pyramerge_pyramid::{LevelSpec, Pyramid};
use pyramerge_shared::{DatasourceConfig, PyramergeError, Result, TileLimits};
use pyramerge_storage::Store;

/// Destination geometry of one level, computed across a datasource's
/// members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelPlanInfo {
    /// Slab width in tiles (identical across members).
    pub slab_width: u32,
    /// Slab height in tiles (identical across members).
    pub slab_height: u32,
    /// Union of the members' tile envelopes.
    pub tile_limits: TileLimits,
}

/// A resolved datasource: a level range and its ordered, compatible source
/// pyramids.
#[derive(Debug)]
pub struct Datasource {
    /// Bottom (largest id) level of the range.
    pub bottom: u32,
    /// Top (smallest id) level of the range.
    pub top: u32,
    pyramids: Vec<Pyramid>,
}

impl Datasource {
    /// Load every descriptor of the datasource and fail fast on any
    /// incompatibility: tile-matrix-set name, format, channel count, a
    /// missing level in range, per-level slab dimensions, or a cluster host
    /// embedded in a root.
    pub async fn resolve(config: &DatasourceConfig, store: &Store) -> Result<Self> {
        let mut pyramids: Vec<Pyramid> = Vec::with_capacity(config.source.descriptors.len());

        for location in &config.source.descriptors {
            let pyramid = Pyramid::from_descriptor(store, location).await?;

            if let Some(cluster) = pyramid.storage_cluster() {
                return Err(PyramergeError::plan(format!(
                    "do not set a cluster host into a source root ({location}): \
                     only one cluster can be used, found {cluster}"
                )));
            }

            if let Some(first) = pyramids.first() {
                let (a, b) = (first.descriptor(), pyramid.descriptor());
                if a.tile_matrix_set != b.tile_matrix_set {
                    return Err(PyramergeError::plan(format!(
                        "sources pyramids cannot have two different tile matrix sets: {} and {}",
                        a.tile_matrix_set, b.tile_matrix_set
                    )));
                }
                if a.format != b.format {
                    return Err(PyramergeError::plan(format!(
                        "sources pyramids cannot have two different formats: {} and {}",
                        a.format, b.format
                    )));
                }
                if a.channels != b.channels {
                    return Err(PyramergeError::plan(format!(
                        "sources pyramids cannot have two different numbers of channels: {} and {}",
                        a.channels, b.channels
                    )));
                }
            }

            // Every level in range must exist in every member.
            let levels = pyramid.levels_between(config.bottom, config.top)?;

            // Slab dimensions must agree with the first member, level by level.
            if let Some(first) = pyramids.first() {
                for level in &levels {
                    let reference = first.level(level.id).ok_or_else(|| {
                        PyramergeError::plan(format!(
                            "all levels between {} -> {} are not in {}",
                            config.bottom,
                            config.top,
                            first.name()
                        ))
                    })?;
                    if reference.slab_width != level.slab_width
                        || reference.slab_height != level.slab_height
                    {
                        return Err(PyramergeError::plan(format!(
                            "the number of tiles by slab is different between {} and {} at level {}",
                            pyramid.name(),
                            first.name(),
                            level.id
                        )));
                    }
                }
            }

            pyramids.push(pyramid);
        }

        if pyramids.is_empty() {
            return Err(PyramergeError::config(
                "datasource has no source descriptors",
            ));
        }

        debug!(
            bottom = config.bottom,
            top = config.top,
            members = pyramids.len(),
            "datasource resolved"
        );

        Ok(Self {
            bottom: config.bottom,
            top: config.top,
            pyramids,
        })
    }

    /// The member pyramids, in precedence order.
    pub fn pyramids(&self) -> &[Pyramid] {
        &self.pyramids
    }

    /// Level ids covered by the datasource, ascending.
    pub fn levels(&self) -> std::ops::RangeInclusive<u32> {
        self.top..=self.bottom
    }

    /// Geometry of one level: first member authoritative for slab
    /// dimensions, union of tile limits across members.
    pub fn info_level(&self, id: u32) -> Result<LevelPlanInfo> {
        let mut info: Option<LevelPlanInfo> = None;
        for pyramid in &self.pyramids {
            let level = pyramid.level(id).ok_or_else(|| {
                PyramergeError::plan(format!("level {id} is not in {}", pyramid.name()))
            })?;
            info = Some(match info {
                None => LevelPlanInfo {
                    slab_width: level.slab_width,
                    slab_height: level.slab_height,
                    tile_limits: level.tile_limits,
                },
                Some(current) => {
                    if current.slab_width != level.slab_width
                        || current.slab_height != level.slab_height
                    {
                        return Err(PyramergeError::plan(format!(
                            "the number of tiles by slab is different between {} and {} at level {id}",
                            pyramid.name(),
                            self.pyramids[0].name()
                        )));
                    }
                    LevelPlanInfo {
                        tile_limits: current.tile_limits.union(&level.tile_limits),
                        ..current
                    }
                }
            });
        }
        info.ok_or_else(|| PyramergeError::plan("datasource has no pyramids".to_string()))
    }

    /// Destination level block for `id`: geometry from [`Self::info_level`],
    /// tile pixel dimensions from the first member.
    pub fn destination_level(&self, id: u32) -> Result<LevelSpec> {
        let info = self.info_level(id)?;
        let reference = self.pyramids[0].level(id).ok_or_else(|| {
            PyramergeError::plan(format!("level {id} is not in {}", self.pyramids[0].name()))
        })?;
        Ok(LevelSpec {
            id,
            tile_width: reference.tile_width,
            tile_height: reference.tile_height,
            slab_width: info.slab_width,
            slab_height: info.slab_height,
            tile_limits: info.tile_limits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use pyramerge_shared::{DatasourceConfig, SourceConfig};

    fn config(bottom: u32, top: u32, descriptors: &[&str]) -> DatasourceConfig {
        DatasourceConfig {
            bottom,
            top,
            source: SourceConfig {
                descriptors: descriptors.iter().map(|d| d.to_string()).collect(),
            },
        }
    }

    #[tokio::test]
    async fn resolves_compatible_members() {
        let store = Store::memory();
        let a = testutil::put_pyramid(&store, "file:///p", "a", &[11, 12], &[]).await;
        let b = testutil::put_pyramid(&store, "file:///p", "b", &[11, 12], &[]).await;

        let ds = Datasource::resolve(&config(12, 11, &[&a, &b]), &store)
            .await
            .unwrap();
        assert_eq!(ds.pyramids().len(), 2);
        assert_eq!(ds.levels().collect::<Vec<_>>(), vec![11, 12]);
    }

    #[tokio::test]
    async fn missing_level_fails_fast() {
        let store = Store::memory();
        let a = testutil::put_pyramid(&store, "file:///p", "a", &[11, 12], &[]).await;
        let b = testutil::put_pyramid(&store, "file:///p", "b", &[12], &[]).await;

        let err = Datasource::resolve(&config(12, 11, &[&a, &b]), &store)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("are not in b"));
    }

    #[tokio::test]
    async fn format_mismatch_fails_fast() {
        let store = Store::memory();
        let a = testutil::put_pyramid(&store, "file:///p", "a", &[12], &[]).await;
        store
            .put_text(
                "file:///p/b.json",
                &testutil::descriptor_json_with(&[12], false, "TIFF_JPG_UINT8", 3),
            )
            .await
            .unwrap();

        let err = Datasource::resolve(&config(12, 12, &[&a, "file:///p/b.json"]), &store)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("two different formats"));
    }

    #[tokio::test]
    async fn channel_mismatch_fails_fast() {
        let store = Store::memory();
        let a = testutil::put_pyramid(&store, "file:///p", "a", &[12], &[]).await;
        store
            .put_text(
                "file:///p/b.json",
                &testutil::descriptor_json_with(&[12], false, "TIFF_PNG_UINT8", 4),
            )
            .await
            .unwrap();

        let err = Datasource::resolve(&config(12, 12, &[&a, "file:///p/b.json"]), &store)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("numbers of channels"));
    }

    #[tokio::test]
    async fn clustered_source_root_rejected() {
        let store = Store::memory();
        store
            .put_text(
                "s3://bucket@cluster/a.json",
                &testutil::descriptor_json(&[12], false),
            )
            .await
            .unwrap();

        let err = Datasource::resolve(&config(12, 12, &["s3://bucket@cluster/a.json"]), &store)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cluster host"));
    }

    #[tokio::test]
    async fn info_level_unions_tile_limits() {
        let store = Store::memory();
        let a = testutil::put_pyramid_with_limits(&store, "file:///p", "a", &[12], (0, 0, 50, 60))
            .await;
        let b =
            testutil::put_pyramid_with_limits(&store, "file:///p", "b", &[12], (10, 5, 90, 40))
                .await;

        let ds = Datasource::resolve(&config(12, 12, &[&a, &b]), &store)
            .await
            .unwrap();
        let info = ds.info_level(12).unwrap();
        assert_eq!(info.tile_limits.min_col, 0);
        assert_eq!(info.tile_limits.min_row, 0);
        assert_eq!(info.tile_limits.max_col, 90);
        assert_eq!(info.tile_limits.max_row, 60);
        assert_eq!(info.slab_width, 16);

        let spec = ds.destination_level(12).unwrap();
        assert_eq!(spec.tile_width, 256);
        assert_eq!(spec.tile_limits.max_col, 90);
    }
}
