//! Server-side frame capture.
//!
//! A [`FrameSource`] yields images; the [`FrameProducer`] drives it on a
//! blocking thread, stamps and serialises each image once, and publishes
//! the result into a [`FrameSlot`] for every relay to read.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::CamError;

use super::{Frame, FrameFormat, FrameSlot, SharedFrame};

/// Longest single sleep while pacing, so a stop is noticed promptly.
const PACE_STEP: Duration = Duration::from_millis(50);

// ── FrameSource ──────────────────────────────────────────────────

/// One image as produced by a source, before the producer stamps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub data: Vec<u8>,
}

/// A camera or anything standing in for one.
///
/// All methods are called from a blocking thread and may block.
pub trait FrameSource: Send + 'static {
    /// Acquire the device. Called once per producer start.
    fn open(&mut self) -> Result<(), CamError>;

    /// Grab one image. `Ok(None)` means nothing new is available yet.
    fn capture(&mut self) -> Result<Option<CapturedImage>, CamError>;

    /// Release the device. Called once per producer stop.
    fn close(&mut self);
}

// ── ProducerConfig ───────────────────────────────────────────────

/// Configuration for [`FrameProducer`].
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Target time between captures.
    pub interval: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(700),
        }
    }
}

// ── FrameProducer ────────────────────────────────────────────────

/// Runs a [`FrameSource`] in the background and keeps a [`FrameSlot`]
/// filled with its latest image.
///
/// # Lifetime
///
/// [`start`](Self::start) opens the source and spawns the capture loop;
/// [`stop`](Self::stop) ends the loop, waits for it and closes the source.
/// A stopped producer can be started again.
pub struct FrameProducer {
    source: Option<Box<dyn FrameSource>>,
    slot: FrameSlot,
    config: ProducerConfig,
    shutdown: CancellationToken,
    task: Option<JoinHandle<Box<dyn FrameSource>>>,
}

impl FrameProducer {
    pub fn new(source: Box<dyn FrameSource>, slot: FrameSlot, config: ProducerConfig) -> Self {
        Self {
            source: Some(source),
            slot,
            config,
            shutdown: CancellationToken::new(),
            task: None,
        }
    }

    /// Open the source and launch the capture loop.
    ///
    /// Must be called from within a Tokio runtime. If the source fails to
    /// open, the producer stays stopped and the error is returned.
    pub fn start(&mut self) -> Result<(), CamError> {
        if self.task.is_some() {
            return Err(CamError::AlreadyRunning);
        }
        let Some(mut source) = self.source.take() else {
            return Err(CamError::Source("frame source was lost".into()));
        };

        if let Err(e) = source.open() {
            self.source = Some(source);
            return Err(e);
        }

        self.shutdown = CancellationToken::new();
        let slot = self.slot.clone();
        let interval = self.config.interval;
        let token = self.shutdown.clone();
        self.task = Some(tokio::task::spawn_blocking(move || {
            capture_loop(source, slot, interval, token)
        }));

        info!(interval_ms = interval.as_millis() as u64, "frame producer started");
        Ok(())
    }

    /// Stop the capture loop and close the source. Idempotent.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();

        let Some(task) = self.task.take() else {
            return;
        };
        match task.await {
            Ok(mut source) => {
                source.close();
                self.source = Some(source);
            }
            // The source went down with the panicking thread.
            Err(e) => warn!("capture loop ended abnormally: {e}"),
        }
        info!("frame producer stopped");
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// The most recently published frame.
    pub fn latest_frame(&self) -> Option<SharedFrame> {
        self.slot.latest()
    }
}

impl Drop for FrameProducer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ── Capture loop ─────────────────────────────────────────────────

fn capture_loop(
    mut source: Box<dyn FrameSource>,
    slot: FrameSlot,
    interval: Duration,
    shutdown: CancellationToken,
) -> Box<dyn FrameSource> {
    let mut seq: u64 = 0;

    while !shutdown.is_cancelled() {
        let loop_start = Instant::now();

        match source.capture() {
            Ok(Some(image)) => {
                let frame = Frame {
                    seq,
                    captured_at_ms: unix_millis(),
                    width: image.width,
                    height: image.height,
                    format: image.format,
                    data: image.data,
                };
                match SharedFrame::try_from(&frame) {
                    Ok(shared) => {
                        let size = shared.len();
                        if slot.publish(shared) {
                            trace!(seq, size, "published frame");
                        }
                        seq += 1;
                    }
                    Err(e) => warn!(seq, "could not serialise frame: {e}"),
                }
            }
            Ok(None) => trace!("no frame available"),
            Err(e) => warn!("capture failed: {e}"),
        }

        pace(loop_start, interval, &shutdown);
    }

    debug!(captured = seq, "capture loop exited");
    source
}

/// Sleep out the rest of the interval in short steps, waking early on stop.
fn pace(loop_start: Instant, interval: Duration, shutdown: &CancellationToken) {
    loop {
        let elapsed = loop_start.elapsed();
        if elapsed >= interval || shutdown.is_cancelled() {
            return;
        }
        std::thread::sleep((interval - elapsed).min(PACE_STEP));
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays a fixed script of capture results, then reports nothing.
    struct Scripted {
        script: VecDeque<Result<Option<CapturedImage>, CamError>>,
        fail_open: bool,
        closes: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(script: Vec<Result<Option<CapturedImage>, CamError>>) -> Self {
            Self {
                script: script.into(),
                fail_open: false,
                closes: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl FrameSource for Scripted {
        fn open(&mut self) -> Result<(), CamError> {
            if self.fail_open {
                Err(CamError::Source("no camera".into()))
            } else {
                Ok(())
            }
        }

        fn capture(&mut self) -> Result<Option<CapturedImage>, CamError> {
            self.script.pop_front().unwrap_or(Ok(None))
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn image(byte: u8) -> CapturedImage {
        CapturedImage {
            width: 1,
            height: 1,
            format: FrameFormat::Raw,
            data: vec![byte],
        }
    }

    fn fast() -> ProducerConfig {
        ProducerConfig {
            interval: Duration::from_millis(10),
        }
    }

    async fn wait_for_seq(slot: &FrameSlot, seq: u64) -> Frame {
        for _ in 0..200 {
            if let Some(shared) = slot.latest() {
                let frame = Frame::from_bytes(shared.as_bytes()).unwrap();
                if frame.seq >= seq {
                    return frame;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("frame {seq} never published");
    }

    #[tokio::test]
    async fn publishes_stamped_frames_and_skips_capture_errors() {
        let source = Scripted::new(vec![
            Ok(Some(image(1))),
            Err(CamError::Source("glitch".into())),
            Ok(None),
            Ok(Some(image(2))),
        ]);
        let closes = Arc::clone(&source.closes);
        let slot = FrameSlot::new();
        let mut producer = FrameProducer::new(Box::new(source), slot.clone(), fast());

        producer.start().unwrap();
        assert!(producer.is_running());

        let frame = wait_for_seq(&slot, 1).await;
        assert_eq!(frame.data, vec![2]);
        assert!(frame.captured_at_ms > 0);
        assert!(producer.latest_frame().is_some());

        producer.stop().await;
        assert!(!producer.is_running());
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // Idempotent.
        producer.stop().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_open_leaves_the_producer_stopped() {
        let mut source = Scripted::new(Vec::new());
        source.fail_open = true;
        let mut producer = FrameProducer::new(Box::new(source), FrameSlot::new(), fast());

        assert!(matches!(producer.start(), Err(CamError::Source(_))));
        assert!(!producer.is_running());
        assert!(producer.latest_frame().is_none());
    }

    #[tokio::test]
    async fn start_twice_is_rejected_and_restart_works() {
        let source = Scripted::new(vec![Ok(Some(image(9)))]);
        let mut producer = FrameProducer::new(Box::new(source), FrameSlot::new(), fast());

        producer.start().unwrap();
        assert!(matches!(producer.start(), Err(CamError::AlreadyRunning)));
        producer.stop().await;

        producer.start().unwrap();
        producer.stop().await;
    }

    #[tokio::test]
    async fn stop_does_not_wait_out_a_long_interval() {
        let source = Scripted::new(vec![Ok(Some(image(1)))]);
        let config = ProducerConfig {
            interval: Duration::from_secs(30),
        };
        let mut producer = FrameProducer::new(Box::new(source), FrameSlot::new(), config);
        producer.start().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let begun = Instant::now();
        producer.stop().await;
        assert!(begun.elapsed() < Duration::from_secs(1));
    }
}
