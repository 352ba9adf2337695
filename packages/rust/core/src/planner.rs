//! Work planner: turn a job configuration into P instruction shards and a
//! root registry.
//!
//! Planning is single-threaded, synchronous, and all-or-nothing: every
//! shard is built in memory and nothing is written to the work directory
//! until the whole plan has succeeded. Work units are assigned to shards
//! round-robin, so shard sizes differ by at most one unit, and no shard's
//! work depends on another shard's output.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, instrument};

use pyramerge_pyramid::{ListEntry, Pyramid, SlabList};
use pyramerge_shared::{
    JobConfig, JobKind, PyramergeError, Result, SlabIdentity, SlabKind,
};
use pyramerge_storage::{Store, uri};

use crate::datasource::Datasource;
use crate::instruction::{MergeTransaction, WorkUnit};
use crate::layout;
use crate::progress::Progress;
use crate::roots::RootRegistry;

/// What planning produced.
#[derive(Debug, Default)]
pub struct PlanSummary {
    /// Number of shard files written.
    pub shards: usize,
    /// Total work units emitted.
    pub units: usize,
    /// `link` units.
    pub links: usize,
    /// Merge transactions.
    pub merges: usize,
    /// `cp` units (transfer jobs).
    pub copies: usize,
}

/// Plan a job: write `todo.<N>.list` shards (and, for merge jobs, the root
/// registry) into the work directory.
#[instrument(skip_all, fields(directory = %config.process.directory))]
pub async fn plan(
    config: &JobConfig,
    store: &Store,
    progress: &dyn Progress,
) -> Result<PlanSummary> {
    match config.kind()? {
        JobKind::Merge => plan_merge(config, store, progress).await,
        JobKind::Transfer => plan_transfer(config, store, progress).await,
    }
}

// ---------------------------------------------------------------------------
// Shard buffers
// ---------------------------------------------------------------------------

/// Fixed array of in-memory shard buffers with a round-robin cursor.
struct ShardBuffers {
    buffers: Vec<String>,
    next: usize,
    units: usize,
}

impl ShardBuffers {
    fn new(parallelization: usize) -> Self {
        Self {
            buffers: vec![String::new(); parallelization],
            next: 0,
            units: 0,
        }
    }

    /// Append one work unit to the next shard in rotation.
    fn emit(&mut self, unit: &WorkUnit) {
        self.buffers[self.next].push_str(&unit.to_string());
        self.next = (self.next + 1) % self.buffers.len();
        self.units += 1;
    }

    /// Write every shard to the work directory.
    async fn persist(&self, directory: &str, store: &Store) -> Result<()> {
        for (i, content) in self.buffers.iter().enumerate() {
            store
                .put_text(&layout::todo_list_path(directory, i + 1), content)
                .await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Merge planning
// ---------------------------------------------------------------------------

/// One member pyramid's slab list, with an identity lookup built once per
/// planning run.
struct MemberIndex {
    list: SlabList,
    lookup: HashMap<SlabIdentity, usize>,
}

impl MemberIndex {
    async fn load(pyramid: &Pyramid, store: &Store) -> Result<Self> {
        let list = pyramid.load_list(store).await?;
        let mut lookup = HashMap::with_capacity(list.entries.len());
        for (i, entry) in list.entries.iter().enumerate() {
            // First occurrence wins on duplicate identities within one list.
            lookup.entry(entry.identity).or_insert(i);
        }
        Ok(Self { list, lookup })
    }

    fn get(&self, identity: SlabIdentity) -> Option<&ListEntry> {
        self.lookup.get(&identity).map(|&i| &self.list.entries[i])
    }
}

async fn plan_merge(
    config: &JobConfig,
    store: &Store,
    progress: &dyn Progress,
) -> Result<PlanSummary> {
    let process = &config.process;
    let pyramid_cfg = config
        .pyramid
        .as_ref()
        .ok_or_else(|| PyramergeError::config("merge job requires a pyramid block"))?;

    if let Some(cluster) = uri::cluster(&pyramid_cfg.root) {
        return Err(PyramergeError::plan(format!(
            "do not set a cluster host into the destination root ({}): \
             only one cluster can be used, found {cluster}",
            pyramid_cfg.root
        )));
    }

    progress.phase("Resolving datasources");
    let mut datasources = Vec::with_capacity(config.datasources.len());
    for ds_config in &config.datasources {
        datasources.push(Datasource::resolve(ds_config, store).await?);
    }

    // Compatibility also holds across datasources, not just within one.
    let reference = &datasources[0].pyramids()[0];
    for ds in &datasources[1..] {
        let (a, b) = (reference.descriptor(), ds.pyramids()[0].descriptor());
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

    let mut to_pyramid = Pyramid::from_other(
        reference,
        &pyramid_cfg.name,
        &pyramid_cfg.root,
        Some(pyramid_cfg.mask),
    );

    progress.phase("Indexing source slab lists");
    let mut indexes: Vec<Vec<MemberIndex>> = Vec::with_capacity(datasources.len());
    for ds in &datasources {
        let mut members = Vec::with_capacity(ds.pyramids().len());
        for pyramid in ds.pyramids() {
            members.push(MemberIndex::load(pyramid, store).await?);
        }
        indexes.push(members);
    }

    progress.phase("Planning work units");
    let mut shards = ShardBuffers::new(process.parallelization);
    let mut registry = RootRegistry::new();
    let mut finished: HashSet<SlabIdentity> = HashSet::new();
    let mut claimed_levels: HashSet<u32> = HashSet::new();
    let mut summary = PlanSummary::default();

    for (ds, members) in datasources.iter().zip(&indexes) {
        for id in ds.levels() {
            if !claimed_levels.insert(id) {
                return Err(PyramergeError::plan(format!(
                    "different datasources cannot define the same level: {id}"
                )));
            }
            to_pyramid.add_level(ds.destination_level(id)?);

            for (i, member) in members.iter().enumerate() {
                for entry in member.list.level_entries(id) {
                    if entry.identity.kind != SlabKind::Data {
                        continue;
                    }
                    if !finished.insert(entry.identity) {
                        // First-pyramid-wins: an earlier member already
                        // claimed this slab.
                        continue;
                    }

                    let mask_identity = entry.identity.as_kind(SlabKind::Mask);
                    let mut contributors: Vec<(&ListEntry, Option<&ListEntry>)> = Vec::new();
                    let member_mask = if process.mask {
                        member.get(mask_identity)
                    } else {
                        None
                    };
                    contributors.push((entry, member_mask));

                    if !process.only_links {
                        for other in &members[i + 1..] {
                            if let Some(duplicate) = other.get(entry.identity) {
                                let other_mask = if process.mask {
                                    other.get(mask_identity)
                                } else {
                                    None
                                };
                                contributors.push((duplicate, other_mask));
                            }
                        }
                    }

                    emit_slab(
                        &to_pyramid,
                        pyramid_cfg.mask,
                        entry.identity,
                        &contributors,
                        &mut registry,
                        &mut shards,
                        &mut summary,
                    );
                    progress.item(&entry.identity.to_string(), shards.units);
                }
            }
        }
    }

    summary.units = shards.units;
    summary.shards = process.parallelization;

    progress.phase("Writing todo lists");
    shards.persist(&process.directory, store).await?;
    store
        .put_text(
            &layout::finisher_list_path(&process.directory),
            &registry.serialize(),
        )
        .await?;
    progress.done();

    info!(
        units = summary.units,
        links = summary.links,
        merges = summary.merges,
        shards = summary.shards,
        source_roots = registry.len(),
        "merge plan written"
    );
    Ok(summary)
}

/// Emit the work unit(s) for one slab: a link (plus a mask link) for a
/// single contributor, one atomic merge transaction otherwise.
fn emit_slab(
    to_pyramid: &Pyramid,
    destination_mask: bool,
    identity: SlabIdentity,
    contributors: &[(&ListEntry, Option<&ListEntry>)],
    registry: &mut RootRegistry,
    shards: &mut ShardBuffers,
    summary: &mut PlanSummary,
) {
    let dst = to_pyramid.slab_full_path(
        SlabKind::Data,
        identity.level,
        identity.column,
        identity.row,
    );
    let dst_mask = || {
        to_pyramid.slab_full_path(
            SlabKind::Mask,
            identity.level,
            identity.column,
            identity.row,
        )
    };

    if contributors.len() == 1 {
        let (data, mask) = contributors[0];
        let root_index = registry.index_of(&data.root);
        shards.emit(&WorkUnit::Link {
            dst,
            src: data.full_path(),
            root_index,
        });
        summary.links += 1;

        if destination_mask {
            if let Some(mask) = mask {
                shards.emit(&WorkUnit::Link {
                    dst: dst_mask(),
                    src: mask.full_path(),
                    root_index,
                });
                summary.links += 1;
            }
        }
        return;
    }

    let mut inputs = Vec::new();
    for (data, mask) in contributors {
        inputs.push(data.full_path());
        if let Some(mask) = mask {
            inputs.push(mask.full_path());
        }
    }
    let mut outputs = vec![dst];
    if destination_mask {
        outputs.push(dst_mask());
    }

    debug!(%identity, contributors = contributors.len(), "slab overlaps, merging");
    shards.emit(&WorkUnit::Merge(MergeTransaction { inputs, outputs }));
    summary.merges += 1;
}

// ---------------------------------------------------------------------------
// Transfer planning
// ---------------------------------------------------------------------------

async fn plan_transfer(
    config: &JobConfig,
    store: &Store,
    progress: &dyn Progress,
) -> Result<PlanSummary> {
    let process = &config.process;
    let from_cfg = config
        .from
        .as_ref()
        .ok_or_else(|| PyramergeError::config("transfer job requires a from block"))?;
    let to_cfg = config
        .to
        .as_ref()
        .ok_or_else(|| PyramergeError::config("transfer job requires a to block"))?;

    progress.phase("Loading source pyramid");
    let from_pyramid = Pyramid::from_descriptor(store, &from_cfg.descriptor).await?;
    let to_pyramid = Pyramid::from_other(&from_pyramid, &to_cfg.name, &to_cfg.root, None);
    let list = from_pyramid.load_list(store).await?;

    progress.phase("Planning copies");
    let mut shards = ShardBuffers::new(process.parallelization);
    let mut summary = PlanSummary::default();

    for entry in &list.entries {
        if entry.is_link && !process.follow_links {
            continue;
        }
        let src = entry.full_path();
        if process.slab_limit != 0 && store.size(&src).await? < process.slab_limit {
            debug!(slab = %src, "slab too small, skip it");
            continue;
        }

        let identity = entry.identity;
        shards.emit(&WorkUnit::Copy {
            src,
            dst: to_pyramid.slab_full_path(
                identity.kind,
                identity.level,
                identity.column,
                identity.row,
            ),
            md5: entry.md5.clone(),
        });
        summary.copies += 1;
        progress.item(&identity.to_string(), shards.units);
    }

    summary.units = shards.units;
    summary.shards = process.parallelization;

    progress.phase("Writing todo lists");
    shards.persist(&process.directory, store).await?;
    progress.done();

    info!(
        units = summary.units,
        shards = summary.shards,
        "transfer plan written"
    );
    Ok(summary)
}
