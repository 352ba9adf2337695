//! Result finisher: consolidate shard outputs into the canonical pyramid.
//!
//! Runs once, after every executor has completed. Writes the destination
//! descriptor first, then the canonical slab list: a header of
//! `<index>=<root>` lines (0 is the destination root, the rest come from
//! the root registry), a `#` separator, and one line per slab with its path
//! rewritten relative to its root. Finally removes the todo lists and the
//! registry from the work directory.

use tracing::{info, instrument};

use pyramerge_pyramid::Pyramid;
use pyramerge_shared::{JobConfig, JobKind, PyramergeError, Result};
use pyramerge_storage::Store;

use crate::datasource::Datasource;
use crate::instruction::{UnitReader, WorkUnit};
use crate::layout;
use crate::progress::Progress;
use crate::roots::RootRegistry;

/// What finishing produced.
#[derive(Debug)]
pub struct FinishSummary {
    /// Slabs recorded in the canonical list.
    pub slabs: usize,
    /// Location the list was written to.
    pub list_path: String,
}

/// Finish a job: write the destination descriptor and canonical slab list,
/// then clean up the work directory.
#[instrument(skip_all, fields(directory = %config.process.directory))]
pub async fn finish(
    config: &JobConfig,
    store: &Store,
    progress: &dyn Progress,
) -> Result<FinishSummary> {
    match config.kind()? {
        JobKind::Merge => finish_merge(config, store, progress).await,
        JobKind::Transfer => finish_transfer(config, store, progress).await,
    }
}

async fn finish_merge(
    config: &JobConfig,
    store: &Store,
    progress: &dyn Progress,
) -> Result<FinishSummary> {
    let process = &config.process;
    let pyramid_cfg = config
        .pyramid
        .as_ref()
        .ok_or_else(|| PyramergeError::config("merge job requires a pyramid block"))?;

    // Rebuild the destination pyramid from the datasources, the same way
    // the planner derived it, and write its descriptor before the list.
    progress.phase("Writing destination descriptor");
    let mut datasources = Vec::with_capacity(config.datasources.len());
    for ds_config in &config.datasources {
        datasources.push(Datasource::resolve(ds_config, store).await?);
    }
    let mut to_pyramid = Pyramid::from_other(
        &datasources[0].pyramids()[0],
        &pyramid_cfg.name,
        &pyramid_cfg.root,
        Some(pyramid_cfg.mask),
    );
    let inherited: Vec<u32> = to_pyramid.descriptor().levels.iter().map(|l| l.id).collect();
    for id in inherited {
        to_pyramid.remove_level(id);
    }
    for ds in &datasources {
        for id in ds.levels() {
            to_pyramid.add_level(ds.destination_level(id)?);
        }
    }
    to_pyramid.write_descriptor(store).await?;

    progress.phase("Consolidating shard outputs");
    let registry_path = layout::finisher_list_path(&process.directory);
    let registry = RootRegistry::parse(&store.get_text(&registry_path).await?)?;

    let base = to_pyramid.base();
    let mut list = format!("0={base}\n");
    for (index, root) in registry.iter() {
        list.push_str(&format!("{index}={root}\n"));
    }
    list.push('#');
    list.push('\n');

    let mut slabs = 0usize;
    for split in 1..=process.parallelization {
        let shard = store
            .get_text(&layout::todo_list_path(&process.directory, split))
            .await?;
        let mut reader = UnitReader::new(&shard);
        while let Some(unit) = reader.next_unit()? {
            match &unit {
                WorkUnit::Copy { dst, .. } => {
                    list.push_str(&format!("0/{}\n", relative_to(dst, &base)?));
                    slabs += 1;
                }
                WorkUnit::Link {
                    src, root_index, ..
                } => {
                    let root = registry.root_of(*root_index).ok_or_else(|| {
                        PyramergeError::protocol(format!(
                            "link references unknown root index {root_index}"
                        ))
                    })?;
                    list.push_str(&format!("{root_index}/{}\n", relative_to(src, root)?));
                    slabs += 1;
                }
                WorkUnit::Merge(tx) => {
                    for dst in &tx.outputs {
                        list.push_str(&format!("0/{}\n", relative_to(dst, &base)?));
                        slabs += 1;
                    }
                }
            }
            progress.item(unit.destination(), slabs);
        }
    }

    let list_path = to_pyramid.list_path();
    store.put_text(&list_path, &list).await?;

    cleanup(process.parallelization, &process.directory, store).await?;
    store.remove(&registry_path).await?;
    progress.done();

    info!(slabs, list = %list_path, "merge finished");
    Ok(FinishSummary { slabs, list_path })
}

async fn finish_transfer(
    config: &JobConfig,
    store: &Store,
    progress: &dyn Progress,
) -> Result<FinishSummary> {
    let process = &config.process;
    let from_cfg = config
        .from
        .as_ref()
        .ok_or_else(|| PyramergeError::config("transfer job requires a from block"))?;
    let to_cfg = config
        .to
        .as_ref()
        .ok_or_else(|| PyramergeError::config("transfer job requires a to block"))?;

    progress.phase("Writing destination descriptor");
    let from_pyramid = Pyramid::from_descriptor(store, &from_cfg.descriptor).await?;
    let to_pyramid = Pyramid::from_other(&from_pyramid, &to_cfg.name, &to_cfg.root, None);
    to_pyramid.write_descriptor(store).await?;

    progress.phase("Consolidating shard outputs");
    let base = to_pyramid.base();
    let mut list = format!("0={base}\n#\n");
    let mut slabs = 0usize;

    for split in 1..=process.parallelization {
        let shard = store
            .get_text(&layout::todo_list_path(&process.directory, split))
            .await?;
        let mut reader = UnitReader::new(&shard);
        while let Some(unit) = reader.next_unit()? {
            let WorkUnit::Copy { dst, md5, .. } = &unit else {
                return Err(PyramergeError::protocol(format!(
                    "non-copy unit in a transfer shard: {unit}"
                )));
            };
            list.push_str(&format!("0/{}", relative_to(dst, &base)?));
            if let Some(md5) = md5 {
                list.push(' ');
                list.push_str(md5);
            }
            list.push('\n');
            slabs += 1;
            progress.item(dst, slabs);
        }
    }

    let list_path = to_pyramid.list_path();
    store.put_text(&list_path, &list).await?;

    cleanup(process.parallelization, &process.directory, store).await?;
    progress.done();

    info!(slabs, list = %list_path, "transfer finished");
    Ok(FinishSummary { slabs, list_path })
}

/// Path of `path` relative to `base`, which must be a prefix of it.
fn relative_to<'a>(path: &'a str, base: &str) -> Result<&'a str> {
    let base = base.trim_end_matches('/');
    path.strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| PyramergeError::protocol(format!("{path} is not under {base}")))
}

async fn cleanup(parallelization: usize, directory: &str, store: &Store) -> Result<()> {
    for split in 1..=parallelization {
        store
            .remove(&layout::todo_list_path(directory, split))
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan;
    use crate::progress::SilentProgress;
    use crate::testutil::{self, slab};
    use pyramerge_pyramid::SlabList;

    #[tokio::test]
    async fn merge_finish_writes_descriptor_then_canonical_list() {
        let store = Store::memory();
        let a = testutil::put_pyramid(
            &store,
            "file:///p",
            "a",
            &[12],
            &[slab(12, 0, 0), slab(12, 1, 0)],
        )
        .await;
        let b =
            testutil::put_pyramid(&store, "file:///p", "b", &[12], &[slab(12, 0, 0)]).await;

        let config = testutil::merge_config(&[(12, 12, vec![a, b])], "file:///work", 1);
        plan(&config, &store, &SilentProgress).await.unwrap();

        let summary = finish(&config, &store, &SilentProgress).await.unwrap();
        assert_eq!(summary.slabs, 2);
        assert_eq!(summary.list_path, "file:///out/merged.list");

        let descriptor = store.get_text("file:///out/merged.json").await.unwrap();
        let pyramid = Pyramid::from_descriptor(&store, "file:///out/merged.json")
            .await
            .unwrap();
        assert!(descriptor.contains("TIFF_PNG_UINT8"));
        assert_eq!(pyramid.descriptor().levels.len(), 1);
        assert_eq!(pyramid.level(12).unwrap().slab_width, 16);

        let list = store.get_text("file:///out/merged.list").await.unwrap();
        assert_eq!(
            list,
            "0=file:///out/merged\n\
             1=file:///p/a\n\
             #\n\
             0/DATA/12/00/00/00.tif\n\
             1/DATA/12/00/00/10.tif\n"
        );
        // The canonical list parses back with resolved roots.
        let parsed = SlabList::parse(&list).unwrap();
        assert_eq!(parsed.entries.len(), 2);
        assert!(parsed.entries[1].is_link);
        assert_eq!(parsed.entries[1].root, "file:///p/a");
    }

    #[tokio::test]
    async fn merge_finish_cleans_up_work_directory() {
        let store = Store::memory();
        let a =
            testutil::put_pyramid(&store, "file:///p", "a", &[12], &[slab(12, 0, 0)]).await;

        let config = testutil::merge_config(&[(12, 12, vec![a])], "file:///work", 2);
        plan(&config, &store, &SilentProgress).await.unwrap();
        assert!(store.exists("file:///work/todo.1.list").await.unwrap());
        assert!(store.exists("file:///work/todo.2.list").await.unwrap());

        finish(&config, &store, &SilentProgress).await.unwrap();
        assert!(!store.exists("file:///work/todo.1.list").await.unwrap());
        assert!(!store.exists("file:///work/todo.2.list").await.unwrap());
        assert!(
            !store
                .exists("file:///work/todo.finisher.list")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn merge_finish_records_mask_outputs() {
        let store = Store::memory();
        let a = testutil::put_pyramid(
            &store,
            "file:///p",
            "a",
            &[12],
            &[slab(12, 0, 0), testutil::mask_slab(12, 0, 0)],
        )
        .await;
        let b =
            testutil::put_pyramid(&store, "file:///p", "b", &[12], &[slab(12, 0, 0)]).await;

        let mut config = testutil::merge_config(&[(12, 12, vec![a, b])], "file:///work", 1);
        config.process.mask = true;
        config.pyramid.as_mut().unwrap().mask = true;

        plan(&config, &store, &SilentProgress).await.unwrap();
        let summary = finish(&config, &store, &SilentProgress).await.unwrap();
        assert_eq!(summary.slabs, 2);

        let list = store.get_text("file:///out/merged.list").await.unwrap();
        assert!(list.contains("0/DATA/12/00/00/00.tif\n"));
        assert!(list.contains("0/MASK/12/00/00/00.tif\n"));
    }

    #[tokio::test]
    async fn transfer_finish_writes_single_root_list() {
        let store = Store::memory();
        let location = testutil::put_transfer_source(&store).await;

        let config = testutil::transfer_config(&location, "file:///work", 1);
        plan(&config, &store, &SilentProgress).await.unwrap();

        let summary = finish(&config, &store, &SilentProgress).await.unwrap();
        assert_eq!(summary.slabs, 2);

        let descriptor = store.get_text("file:///out/copy.json").await.unwrap();
        assert!(descriptor.contains("TIFF_PNG_UINT8"));

        let list = store.get_text("file:///out/copy.list").await.unwrap();
        assert_eq!(
            list,
            "0=file:///out/copy\n\
             #\n\
             0/DATA/12/00/00/00.tif\n\
             0/DATA/12/00/00/01.tif 9e107d9d372bb6826bd81d3542a419d6\n"
        );
        assert!(!store.exists("file:///work/todo.1.list").await.unwrap());
    }
}
