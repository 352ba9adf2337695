//! Job configuration for pyramerge.
//!
//! A job is described by one JSON file. Its shape selects the job kind:
//! `datasources` + `pyramid` describe a merge job, `from` + `to` describe a
//! copy-only transfer job. Both share the `process` block (work directory,
//! parallelization level). The file is fetched through the storage layer so
//! it can live on any backend.

use serde::{Deserialize, Serialize};

use crate::error::{PyramergeError, Result};

// ---------------------------------------------------------------------------
// Job config structs (matching the JSON job file)
// ---------------------------------------------------------------------------

/// Top-level job configuration, deserialized from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Ordered datasources of a merge job.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datasources: Vec<DatasourceConfig>,

    /// Destination pyramid of a merge job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pyramid: Option<PyramidConfig>,

    /// Source pyramid of a transfer job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<TransferFromConfig>,

    /// Destination pyramid of a transfer job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<TransferToConfig>,

    /// Processing parameters, shared by both job kinds.
    pub process: ProcessConfig,
}

/// One merge datasource: a level range bound to ordered source descriptors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasourceConfig {
    /// Bottom (highest-resolution, largest id) level of the range.
    pub bottom: u32,
    /// Top (lowest-resolution, smallest id) level of the range.
    pub top: u32,
    /// Source descriptor locations, in precedence order.
    pub source: SourceConfig,
}

/// `source` block of a datasource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Pyramid descriptor locations (earlier entries win on duplicates).
    pub descriptors: Vec<String>,
}

/// Destination pyramid of a merge job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PyramidConfig {
    /// Pyramid name (descriptor and list are written as `<root>/<name>.json|.list`).
    pub name: String,
    /// Storage root under which the pyramid is written.
    pub root: String,
    /// Whether the destination pyramid carries mask slabs.
    #[serde(default)]
    pub mask: bool,
}

/// `from` block of a transfer job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferFromConfig {
    /// Source pyramid descriptor location.
    pub descriptor: String,
}

/// `to` block of a transfer job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferToConfig {
    /// Destination pyramid name.
    pub name: String,
    /// Destination storage root.
    pub root: String,
}

/// `process` block: work-sharing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Shared work directory holding todo lists and checkpoints.
    pub directory: String,

    /// Number of shards / independently runnable agents.
    #[serde(default = "default_parallelization")]
    pub parallelization: usize,

    /// Merge job: process mask slabs alongside data slabs.
    #[serde(default)]
    pub mask: bool,

    /// Merge job: never merge, link the first contributor only.
    #[serde(default)]
    pub only_links: bool,

    /// Transfer job: copy slabs that are links in the source list.
    #[serde(default)]
    pub follow_links: bool,

    /// Transfer job: skip slabs smaller than this many bytes (0 = keep all).
    #[serde(default)]
    pub slab_limit: u64,
}

fn default_parallelization() -> usize {
    1
}

/// The two job kinds a configuration can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Merge N compatible source pyramids into one (`datasources` + `pyramid`).
    Merge,
    /// Copy one pyramid to a new name/root (`from` + `to`).
    Transfer,
}

impl JobConfig {
    /// Parse a job configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: JobConfig = serde_json::from_str(text)
            .map_err(|e| PyramergeError::config(format!("invalid job file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Determine the job kind from the configuration shape.
    pub fn kind(&self) -> Result<JobKind> {
        let merge = !self.datasources.is_empty() || self.pyramid.is_some();
        let transfer = self.from.is_some() || self.to.is_some();
        match (merge, transfer) {
            (true, false) => Ok(JobKind::Merge),
            (false, true) => Ok(JobKind::Transfer),
            (true, true) => Err(PyramergeError::config(
                "job file mixes merge keys (datasources/pyramid) with transfer keys (from/to)",
            )),
            (false, false) => Err(PyramergeError::config(
                "job file defines neither a merge job (datasources + pyramid) nor a transfer job (from + to)",
            )),
        }
    }

    /// Check cross-field consistency. Called by [`JobConfig::from_json`].
    pub fn validate(&self) -> Result<()> {
        match self.kind()? {
            JobKind::Merge => {
                if self.datasources.is_empty() {
                    return Err(PyramergeError::config("merge job requires datasources"));
                }
                if self.pyramid.is_none() {
                    return Err(PyramergeError::config("merge job requires a pyramid block"));
                }
                for (i, ds) in self.datasources.iter().enumerate() {
                    if ds.source.descriptors.is_empty() {
                        return Err(PyramergeError::config(format!(
                            "datasource #{i} has no source descriptors"
                        )));
                    }
                    if ds.top > ds.bottom {
                        return Err(PyramergeError::config(format!(
                            "datasource #{i}: top level {} is below bottom level {}",
                            ds.top, ds.bottom
                        )));
                    }
                }
                let pyramid_mask = self.pyramid.as_ref().is_some_and(|p| p.mask);
                if pyramid_mask && !self.process.mask {
                    return Err(PyramergeError::config(
                        "the new pyramid cannot have masks if masks are not used during the process",
                    ));
                }
            }
            JobKind::Transfer => {
                if self.from.is_none() || self.to.is_none() {
                    return Err(PyramergeError::config(
                        "transfer job requires both from and to blocks",
                    ));
                }
            }
        }

        if self.process.parallelization == 0 {
            return Err(PyramergeError::config(
                "process.parallelization must be at least 1",
            ));
        }
        if self.process.directory.is_empty() {
            return Err(PyramergeError::config("process.directory must not be empty"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reference job files
// ---------------------------------------------------------------------------

/// Reference merge job file, printed by `pyramerge example`.
pub const EXAMPLE_MERGE_JOB: &str = r#"{
  "datasources": [
    {
      "bottom": 16,
      "top": 11,
      "source": {
        "descriptors": [
          "file:///data/pyramids/ortho-2023.json",
          "file:///data/pyramids/ortho-2021.json"
        ]
      }
    }
  ],
  "pyramid": {
    "name": "ortho-merged",
    "root": "file:///data/pyramids",
    "mask": false
  },
  "process": {
    "directory": "file:///data/work/ortho-merged",
    "parallelization": 4,
    "mask": false,
    "only_links": false
  }
}
"#;

/// Reference transfer job file, printed by `pyramerge example --transfer`.
pub const EXAMPLE_TRANSFER_JOB: &str = r#"{
  "from": {
    "descriptor": "file:///data/pyramids/ortho-2023.json"
  },
  "to": {
    "name": "ortho-copy",
    "root": "file:///archive/pyramids"
  },
  "process": {
    "directory": "file:///data/work/ortho-copy",
    "parallelization": 2,
    "follow_links": false,
    "slab_limit": 0
  }
}
"#;
