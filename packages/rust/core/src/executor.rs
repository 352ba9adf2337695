//! Shard executor: resumable, sequential interpreter of one todo list.
//!
//! An agent owns exactly one shard. It replays the shard's work units in
//! file order, persisting the destination of each completed unit as its
//! checkpoint before moving on. On re-invocation after a crash it skips
//! forward, at work-unit granularity, until it finds the unit recorded in
//! the checkpoint, then executes everything after it. Reaching the end of
//! the shard while still skipping means the shard was already complete.
//!
//! There is no in-process retry or backoff: a converter failure or
//! malformed line aborts the shard, and recovery is solely re-invocation.

use std::path::PathBuf;

use tracing::{debug, info, instrument};

use pyramerge_pyramid::{LevelSpec, Pyramid, RasterFormat, RasterSpecifications, slab};
use pyramerge_shared::{JobConfig, JobKind, PyramergeError, Result, SlabKind};
use pyramerge_storage::{Store, uri};

use crate::convert::{Converter, EncodeJob, OverlayJob, OverlayLayer, temp_work_path};
use crate::instruction::{MergeTransaction, UnitReader, WorkUnit};
use crate::layout;
use crate::progress::Progress;

/// What one executor run did.
#[derive(Debug, Default)]
pub struct ExecuteSummary {
    /// Units executed this run.
    pub executed: usize,
    /// Units skipped while resuming.
    pub skipped: usize,
    /// The whole shard had already been completed by a previous run.
    pub already_complete: bool,
}

/// Execute shard `split` (1-based) of the planned job.
#[instrument(skip_all, fields(directory = %config.process.directory, split))]
pub async fn execute(
    config: &JobConfig,
    split: usize,
    store: &Store,
    converter: &dyn Converter,
    progress: &dyn Progress,
) -> Result<ExecuteSummary> {
    let process = &config.process;
    if split == 0 || split > process.parallelization {
        return Err(PyramergeError::config(format!(
            "split {split} is out of range: parallelization is {}",
            process.parallelization
        )));
    }

    // Merge shards need the source raster parameters to drive the
    // converters; transfer shards only ever copy bytes.
    let context = match config.kind()? {
        JobKind::Merge => Some(MergeContext::load(config, store).await?),
        JobKind::Transfer => None,
    };

    let shard_path = layout::todo_list_path(&process.directory, split);
    let text = store.get_text(&shard_path).await?;

    let checkpoint_path = layout::checkpoint_path(&process.directory, split);
    let mut resume_target = if store.exists(&checkpoint_path).await? {
        let recorded = store.get_text(&checkpoint_path).await?;
        info!(checkpoint = %recorded.trim(), "resuming from checkpoint");
        Some(recorded.trim().to_string())
    } else {
        None
    };

    progress.phase("Executing work units");
    let mut reader = UnitReader::new(&text);
    let mut summary = ExecuteSummary::default();

    while let Some(unit) = reader.next_unit()? {
        if let Some(target) = &resume_target {
            summary.skipped += 1;
            if unit.destination() == target {
                // The recorded unit is the last one that completed.
                resume_target = None;
            }
            continue;
        }

        run_unit(&unit, store, converter, context.as_ref()).await?;
        store
            .put_text(&checkpoint_path, unit.destination())
            .await?;
        summary.executed += 1;
        progress.item(unit.destination(), summary.executed);
    }

    if resume_target.is_some() {
        info!("checkpoint points past every unit, shard already complete");
        summary.already_complete = true;
    }

    store.remove(&checkpoint_path).await?;
    progress.done();

    info!(
        executed = summary.executed,
        skipped = summary.skipped,
        "shard done"
    );
    Ok(summary)
}

async fn run_unit(
    unit: &WorkUnit,
    store: &Store,
    converter: &dyn Converter,
    context: Option<&MergeContext>,
) -> Result<()> {
    match unit {
        WorkUnit::Copy { src, dst, md5 } => {
            debug!(src, dst, "copying slab");
            store.copy(src, dst, md5.as_deref()).await
        }
        WorkUnit::Link {
            dst,
            src,
            root_index,
        } => {
            debug!(src, dst, root_index, "linking slab");
            store.link(src, dst).await
        }
        WorkUnit::Merge(tx) => {
            let context = context.ok_or_else(|| {
                PyramergeError::protocol("merge transaction in a transfer shard")
            })?;
            run_merge(tx, store, converter, context).await
        }
    }
}

// ---------------------------------------------------------------------------
// Merge transactions
// ---------------------------------------------------------------------------

/// Source raster parameters a merge shard needs to drive the converters:
/// the first pyramid of each configured datasource. Levels are looked up
/// across all of them, since a level can be absent from the first
/// datasource's pyramids.
struct MergeContext {
    references: Vec<Pyramid>,
    format: RasterFormat,
}

impl MergeContext {
    async fn load(config: &JobConfig, store: &Store) -> Result<Self> {
        let mut references = Vec::with_capacity(config.datasources.len());
        for ds in &config.datasources {
            let location = ds.source.descriptors.first().ok_or_else(|| {
                PyramergeError::config("datasource has no source descriptors")
            })?;
            references.push(Pyramid::from_descriptor(store, location).await?);
        }
        let first = references
            .first()
            .ok_or_else(|| PyramergeError::config("merge job requires datasources"))?;
        let format = RasterFormat::parse(&first.descriptor().format)?;
        Ok(Self { references, format })
    }

    fn level(&self, id: u32) -> Result<&LevelSpec> {
        self.references
            .iter()
            .find_map(|p| p.level(id))
            .ok_or_else(|| {
                PyramergeError::plan(format!("level {id} is not in any source pyramid"))
            })
    }

    fn specifications(&self) -> &RasterSpecifications {
        &self.references[0].descriptor().raster_specifications
    }
}

async fn run_merge(
    tx: &MergeTransaction,
    store: &Store,
    converter: &dyn Converter,
    context: &MergeContext,
) -> Result<()> {
    let mut temps: Vec<PathBuf> = Vec::new();
    let result = run_merge_steps(tx, store, converter, context, &mut temps).await;
    for temp in &temps {
        let _ = std::fs::remove_file(temp);
    }
    result
}

async fn run_merge_steps(
    tx: &MergeTransaction,
    store: &Store,
    converter: &dyn Converter,
    context: &MergeContext,
    temps: &mut Vec<PathBuf>,
) -> Result<()> {
    // Decode every input to work format. A MASK input attaches to the DATA
    // layer emitted just before it.
    let mut layers: Vec<OverlayLayer> = Vec::new();
    for src in &tx.inputs {
        let identity = slab::parse(src)?;
        let work = temp_work_path("tif");
        converter.slab_to_work(uri::local_path(src), &work)?;
        temps.push(work.clone());
        match identity.kind {
            SlabKind::Data => layers.push(OverlayLayer {
                image: work,
                mask: None,
            }),
            SlabKind::Mask => {
                let layer = layers.last_mut().ok_or_else(|| {
                    PyramergeError::protocol(format!("mask input before any data input: {src}"))
                })?;
                layer.mask = Some(work);
            }
        }
    }

    let dst = &tx.outputs[0];
    let dst_mask = tx.outputs.get(1);
    let identity = slab::parse(dst)?;
    let level = context.level(identity.level)?;
    let specs = context.specifications();

    let overlay_out = temp_work_path("tif");
    temps.push(overlay_out.clone());
    let overlay_mask = dst_mask.map(|_| temp_work_path("tif"));
    if let Some(mask) = &overlay_mask {
        temps.push(mask.clone());
    }

    debug!(layers = layers.len(), dst, "overlaying");
    converter.overlay(&OverlayJob {
        layers,
        output: overlay_out.clone(),
        output_mask: overlay_mask.clone(),
        nodata: specs.nodata.clone(),
        channels: specs.channels,
        photometric: specs.photometric.clone(),
    })?;

    store.ensure_parent(dst).await?;
    converter.work_to_slab(&EncodeJob {
        work: overlay_out,
        slab: uri::local_path(dst).to_string(),
        compression: context.format.compression.clone(),
        tile_width: level.tile_width,
        tile_height: level.tile_height,
        sample_format: context.format.sample_format.clone(),
        bit_depth: context.format.bit_depth.clone(),
        channels: specs.channels,
    })?;

    if let (Some(dst_mask), Some(mask_work)) = (dst_mask, overlay_mask) {
        store.ensure_parent(dst_mask).await?;
        converter.work_to_slab(&EncodeJob {
            work: mask_work,
            slab: uri::local_path(dst_mask).to_string(),
            // Masks are always zip-compressed single-channel uint8.
            compression: "zip".to_string(),
            tile_width: level.tile_width,
            tile_height: level.tile_height,
            sample_format: "uint".to_string(),
            bit_depth: "8".to_string(),
            channels: 1,
        })?;
    }

    Ok(())
}
