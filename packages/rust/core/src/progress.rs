//! Progress reporting seam between core pipelines and their caller.

/// Progress callback implemented by the CLI (spinner) and by tests (silent).
pub trait Progress: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called per processed item (planned unit, executed unit, listed slab).
    fn item(&self, detail: &str, current: usize);
    /// Called when the pipeline completes.
    fn done(&self);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl Progress for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item(&self, _detail: &str, _current: usize) {}
    fn done(&self) {}
}
