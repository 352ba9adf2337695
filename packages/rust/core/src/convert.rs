//! External converter processes.
//!
//! Three fixed-CLI tools do all pixel-level work; pyramerge only drives
//! them and judges them by exit status:
//! - `cache2work` decodes a slab to the working TIFF format;
//! - `overlayNtiff` composites N work images top-down, honoring optional
//!   per-image masks;
//! - `work2cache` re-encodes a work image into a slab.
//!
//! The [`Converter`] trait is the seam: the executor is written against it
//! and tests substitute a recording fake.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;
use uuid::Uuid;

use pyramerge_shared::{PyramergeError, Result};

/// One input of an overlay: a work image and its optional mask.
#[derive(Debug, Clone)]
pub struct OverlayLayer {
    pub image: PathBuf,
    pub mask: Option<PathBuf>,
}

/// An N-way overlay request. Layers are listed in contribution order
/// (earlier pyramids first); the compositor is fed them in reverse so the
/// first contributor ends up on top.
#[derive(Debug, Clone)]
pub struct OverlayJob {
    pub layers: Vec<OverlayLayer>,
    pub output: PathBuf,
    pub output_mask: Option<PathBuf>,
    pub nodata: String,
    pub channels: u32,
    pub photometric: String,
}

/// A work-to-slab re-encode request.
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub work: PathBuf,
    pub slab: String,
    pub compression: String,
    pub tile_width: u32,
    pub tile_height: u32,
    pub sample_format: String,
    pub bit_depth: String,
    pub channels: u32,
}

/// Seam over the three converter processes.
pub trait Converter: Send + Sync {
    /// Decode a slab into a work image (`cache2work`).
    fn slab_to_work(&self, slab: &str, work: &Path) -> Result<()>;
    /// Composite the layers (`overlayNtiff`).
    fn overlay(&self, job: &OverlayJob) -> Result<()>;
    /// Re-encode a work image into a slab (`work2cache`).
    fn work_to_slab(&self, job: &EncodeJob) -> Result<()>;
}

/// A unique work-file path under the system temp directory.
pub fn temp_work_path(extension: &str) -> PathBuf {
    std::env::temp_dir().join(format!("pyramerge-{}.{extension}", Uuid::now_v7()))
}

// ---------------------------------------------------------------------------
// ProcessConverter
// ---------------------------------------------------------------------------

/// Drives the real converter binaries via subprocesses.
pub struct ProcessConverter;

impl ProcessConverter {
    fn run(mut command: Command) -> Result<()> {
        let program = command.get_program().to_string_lossy().into_owned();
        debug!(command = ?command, "running converter");

        let status = command
            .status()
            .map_err(|e| PyramergeError::Convert(format!("cannot spawn {program}: {e}")))?;
        if !status.success() {
            return Err(PyramergeError::Convert(format!(
                "{program} exited with status {}",
                status.code().unwrap_or(-1)
            )));
        }
        Ok(())
    }
}

impl Converter for ProcessConverter {
    fn slab_to_work(&self, slab: &str, work: &Path) -> Result<()> {
        let mut command = Command::new("cache2work");
        command.args(["-c", "zip", slab]).arg(work);
        Self::run(command)
    }

    fn overlay(&self, job: &OverlayJob) -> Result<()> {
        // overlayNtiff reads its file list from a config file: first the
        // output line, then one line per input, top layer first.
        let mut lines = String::new();
        lines.push_str(&job.output.to_string_lossy());
        if let Some(mask) = &job.output_mask {
            lines.push(' ');
            lines.push_str(&mask.to_string_lossy());
        }
        lines.push('\n');
        for layer in job.layers.iter().rev() {
            lines.push_str(&layer.image.to_string_lossy());
            if let Some(mask) = &layer.mask {
                lines.push(' ');
                lines.push_str(&mask.to_string_lossy());
            }
            lines.push('\n');
        }

        let config_path = temp_work_path("txt");
        std::fs::write(&config_path, lines)
            .map_err(|e| PyramergeError::io(&config_path, e))?;

        let mut command = Command::new("overlayNtiff");
        command
            .arg("-f")
            .arg(&config_path)
            .args(["-m", "TOP"])
            .args(["-b", &job.nodata])
            .args(["-c", "zip"])
            .args(["-s", &job.channels.to_string()])
            .args(["-p", &job.photometric]);
        let result = Self::run(command);

        let _ = std::fs::remove_file(&config_path);
        result
    }

    fn work_to_slab(&self, job: &EncodeJob) -> Result<()> {
        let mut command = Command::new("work2cache");
        command
            .args(["-c", &job.compression])
            .args([
                "-t",
                &job.tile_width.to_string(),
                &job.tile_height.to_string(),
            ])
            .args(["-a", &job.sample_format])
            .args(["-b", &job.bit_depth])
            .args(["-s", &job.channels.to_string()])
            .arg(&job.work)
            .arg(&job.slab);
        Self::run(command)
    }
}
