//! Test fixtures: in-memory pyramids, lists, and job configurations.

use pyramerge_shared::{
    DatasourceConfig, JobConfig, ProcessConfig, PyramidConfig, SlabIdentity, SlabKind,
    SourceConfig, TransferFromConfig, TransferToConfig,
};
use pyramerge_storage::Store;

pub(crate) fn slab(level: u32, column: u64, row: u64) -> SlabIdentity {
    SlabIdentity::new(SlabKind::Data, level, column, row)
}

pub(crate) fn mask_slab(level: u32, column: u64, row: u64) -> SlabIdentity {
    SlabIdentity::new(SlabKind::Mask, level, column, row)
}

pub(crate) fn descriptor_json(levels: &[u32], mask: bool) -> String {
    descriptor_json_with(levels, mask, "TIFF_PNG_UINT8", 3)
}

pub(crate) fn descriptor_json_with(
    levels: &[u32],
    mask: bool,
    format: &str,
    channels: u32,
) -> String {
    descriptor_json_full(levels, mask, format, channels, (0, 0, 100, 100))
}

fn descriptor_json_full(
    levels: &[u32],
    mask: bool,
    format: &str,
    channels: u32,
    limits: (u64, u64, u64, u64),
) -> String {
    let levels: Vec<serde_json::Value> = levels
        .iter()
        .map(|id| {
            serde_json::json!({
                "id": id,
                "tile_width": 256,
                "tile_height": 256,
                "slab_width": 16,
                "slab_height": 16,
                "tile_limits": {
                    "min_col": limits.0,
                    "min_row": limits.1,
                    "max_col": limits.2,
                    "max_row": limits.3
                }
            })
        })
        .collect();

    serde_json::json!({
        "tile_matrix_set": "PM",
        "format": format,
        "channels": channels,
        "raster_specifications": {
            "channels": channels,
            "nodata": "255,255,255",
            "photometric": "rgb",
            "interpolation": "bicubic"
        },
        "mask": mask,
        "levels": levels
    })
    .to_string()
}

/// Write a pyramid descriptor and a slab list whose entries all live under
/// the pyramid's own root. Returns the descriptor location.
pub(crate) async fn put_pyramid(
    store: &Store,
    root: &str,
    name: &str,
    levels: &[u32],
    slabs: &[SlabIdentity],
) -> String {
    let location = format!("{root}/{name}.json");
    store
        .put_text(&location, &descriptor_json(levels, false))
        .await
        .unwrap();

    let mut list = format!("0={root}/{name}\n#\n");
    for identity in slabs {
        list.push_str(&format!(
            "0/{}\n",
            pyramerge_pyramid::slab::file_path(identity)
        ));
    }
    store
        .put_text(&format!("{root}/{name}.list"), &list)
        .await
        .unwrap();
    location
}

/// Like [`put_pyramid`] but with explicit tile limits and no slabs.
pub(crate) async fn put_pyramid_with_limits(
    store: &Store,
    root: &str,
    name: &str,
    levels: &[u32],
    limits: (u64, u64, u64, u64),
) -> String {
    let location = format!("{root}/{name}.json");
    store
        .put_text(
            &location,
            &descriptor_json_full(levels, false, "TIFF_PNG_UINT8", 3, limits),
        )
        .await
        .unwrap();
    store
        .put_text(&format!("{root}/{name}.list"), &format!("0={root}/{name}\n#\n"))
        .await
        .unwrap();
    location
}

/// A merge job over the given `(bottom, top, descriptors)` datasources,
/// writing `merged` under `file:///out`.
pub(crate) fn merge_config(
    datasources: &[(u32, u32, Vec<String>)],
    directory: &str,
    parallelization: usize,
) -> JobConfig {
    JobConfig {
        datasources: datasources
            .iter()
            .map(|(bottom, top, descriptors)| DatasourceConfig {
                bottom: *bottom,
                top: *top,
                source: SourceConfig {
                    descriptors: descriptors.clone(),
                },
            })
            .collect(),
        pyramid: Some(PyramidConfig {
            name: "merged".to_string(),
            root: "file:///out".to_string(),
            mask: false,
        }),
        from: None,
        to: None,
        process: process_config(directory, parallelization),
    }
}

/// A transfer job copying `descriptor` to `copy` under `file:///out`.
pub(crate) fn transfer_config(
    descriptor: &str,
    directory: &str,
    parallelization: usize,
) -> JobConfig {
    JobConfig {
        datasources: Vec::new(),
        pyramid: None,
        from: Some(TransferFromConfig {
            descriptor: descriptor.to_string(),
        }),
        to: Some(TransferToConfig {
            name: "copy".to_string(),
            root: "file:///out".to_string(),
        }),
        process: process_config(directory, parallelization),
    }
}

fn process_config(directory: &str, parallelization: usize) -> ProcessConfig {
    ProcessConfig {
        directory: directory.to_string(),
        parallelization,
        mask: false,
        only_links: false,
        follow_links: false,
        slab_limit: 0,
    }
}

/// A transfer source pyramid `src` under `file:///p` with three list
/// entries: a plain slab, a slab with an md5, and a link into another
/// pyramid. Returns the descriptor location.
pub(crate) async fn put_transfer_source(store: &Store) -> String {
    let location = "file:///p/src.json".to_string();
    store
        .put_text(&location, &descriptor_json(&[12], false))
        .await
        .unwrap();
    store
        .put_text(
            "file:///p/src.list",
            "0=file:///p/src\n\
             1=file:///p/older\n\
             #\n\
             0/DATA/12/00/00/00.tif\n\
             0/DATA/12/00/00/01.tif 9e107d9d372bb6826bd81d3542a419d6\n\
             1/DATA/12/00/00/02.tif\n",
        )
        .await
        .unwrap();
    location
}
