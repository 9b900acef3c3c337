//! Writes received frames to disk.

use std::path::{Path, PathBuf};

use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, trace};

use camrelay_core::{CamError, Frame, FrameSink};

/// Keeps `latest.<ext>` in a directory pointing at the newest frame, and
/// optionally every frame as `frame-<seq>.<ext>`.
///
/// `latest` is replaced by rename, so a reader never sees half a file.
/// On a multi-threaded runtime the writes run under `block_in_place`, so
/// the worker's other tasks move to another thread meanwhile.
pub struct DirectorySink {
    dir: PathBuf,
    keep_history: bool,
    written: u64,
}

impl DirectorySink {
    /// Create the directory if needed.
    pub fn create(dir: &Path, keep_history: bool) -> Result<Self, CamError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| CamError::Sink(format!("cannot create {}: {e}", dir.display())))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            keep_history,
            written: 0,
        })
    }

    /// Frames written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn latest_path(&self, frame: &Frame) -> PathBuf {
        self.dir.join(format!("latest.{}", frame.format.extension()))
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), CamError> {
        let tmp = path.with_extension("part");
        std::fs::write(&tmp, data)
            .and_then(|()| std::fs::rename(&tmp, path))
            .map_err(|e| CamError::Sink(format!("cannot write {}: {e}", path.display())))
    }
}

/// Run blocking work without stalling the current worker thread.
///
/// `block_in_place` panics on a current-thread runtime; there, and outside
/// any runtime, the work runs inline.
fn off_reactor<T>(work: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

impl FrameSink for DirectorySink {
    fn display(&mut self, frame: Frame) -> Result<(), CamError> {
        off_reactor(|| {
            if self.keep_history {
                let path = self
                    .dir
                    .join(format!("frame-{:08}.{}", frame.seq, frame.format.extension()));
                self.write_atomic(&path, &frame.data)?;
            }
            self.write_atomic(&self.latest_path(&frame), &frame.data)
        })?;
        self.written += 1;

        trace!(seq = frame.seq, size = frame.data.len(), "frame written");
        if self.written % 100 == 0 {
            debug!(written = self.written, "frames saved");
        }
        Ok(())
    }
}
