//! Frame sources that work without a camera.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use camrelay_core::{CamError, CapturedImage, FrameFormat, FrameSource};

use crate::config::{ServerConfig, SourceKind};

/// Build the source named in the configuration.
pub fn from_config(config: &ServerConfig) -> Box<dyn FrameSource> {
    match config.source.kind {
        SourceKind::Pattern => Box::new(PatternSource::new(
            config.source.width,
            config.source.height,
        )),
        SourceKind::Directory => Box::new(DirectorySource::new(&config.source.directory)),
    }
}

// ── PatternSource ────────────────────────────────────────────────

/// A colour gradient with a bright bar that moves one step per capture.
/// Emitted as binary PPM.
pub struct PatternSource {
    width: u32,
    height: u32,
    tick: u32,
}

impl PatternSource {
    /// Dimensions are clamped to 1..=4096.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.clamp(1, 4096),
            height: height.clamp(1, 4096),
            tick: 0,
        }
    }

    fn render(&self) -> Vec<u8> {
        let header = format!("P6\n{} {}\n255\n", self.width, self.height);
        let pixels = self.width as usize * self.height as usize;
        let mut data = Vec::with_capacity(header.len() + pixels * 3);
        data.extend_from_slice(header.as_bytes());

        let bar = self.tick % self.width;
        for y in 0..self.height {
            for x in 0..self.width {
                if x == bar {
                    data.extend_from_slice(&[255, 255, 255]);
                } else {
                    let r = (x * 255 / self.width) as u8;
                    let g = (y * 255 / self.height) as u8;
                    let b = (self.tick.wrapping_mul(8) % 256) as u8;
                    data.extend_from_slice(&[r, g, b]);
                }
            }
        }
        data
    }
}

impl FrameSource for PatternSource {
    fn open(&mut self) -> Result<(), CamError> {
        self.tick = 0;
        info!(width = self.width, height = self.height, "test pattern source opened");
        Ok(())
    }

    fn capture(&mut self) -> Result<Option<CapturedImage>, CamError> {
        let data = self.render();
        self.tick = self.tick.wrapping_add(1);
        Ok(Some(CapturedImage {
            width: self.width,
            height: self.height,
            format: FrameFormat::Ppm,
            data,
        }))
    }

    fn close(&mut self) {
        debug!("test pattern source closed");
    }
}

// ── DirectorySource ──────────────────────────────────────────────

/// Replays the image files of a directory in name order, looping.
///
/// Only files whose extension maps to a [`FrameFormat`] are used. The list
/// is taken when the source opens.
pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<(PathBuf, FrameFormat)>,
    next: usize,
}

impl DirectorySource {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            files: Vec::new(),
            next: 0,
        }
    }

    fn scan(&self) -> Result<Vec<(PathBuf, FrameFormat)>, CamError> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| CamError::Source(format!("cannot read {}: {e}", self.dir.display())))?;

        let mut files: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter_map(|path| {
                let format = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .and_then(FrameFormat::from_extension)?;
                Some((path, format))
            })
            .collect();
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }
}

impl FrameSource for DirectorySource {
    fn open(&mut self) -> Result<(), CamError> {
        self.files = self.scan()?;
        self.next = 0;
        if self.files.is_empty() {
            return Err(CamError::Source(format!(
                "no image files in {}",
                self.dir.display()
            )));
        }
        info!(
            dir = %self.dir.display(),
            files = self.files.len(),
            "directory source opened"
        );
        Ok(())
    }

    fn capture(&mut self) -> Result<Option<CapturedImage>, CamError> {
        let Some((path, format)) = self.files.get(self.next) else {
            return Ok(None);
        };
        self.next = (self.next + 1) % self.files.len();

        let data = std::fs::read(path)
            .map_err(|e| CamError::Source(format!("cannot read {}: {e}", path.display())))?;
        Ok(Some(CapturedImage {
            width: 0,
            height: 0,
            format: *format,
            data,
        }))
    }

    fn close(&mut self) {
        self.files.clear();
        debug!(dir = %self.dir.display(), "directory source closed");
    }
}
