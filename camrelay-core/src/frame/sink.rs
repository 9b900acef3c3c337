use crate::error::CamError;

use super::Frame;

/// Where received frames end up (a window, a file, a test buffer).
///
/// An error from [`display`](Self::display) is reported by the caller but
/// does not end the stream.
pub trait FrameSink: Send {
    /// Called on the streaming task between receives, so it must return
    /// quickly. Slow or blocking work belongs on another thread (see
    /// `tokio::task::block_in_place` or `spawn_blocking`); while it runs the
    /// next frame waits and the receive timeout is not running.
    fn display(&mut self, frame: Frame) -> Result<(), CamError>;
}

impl<F> FrameSink for F
where
    F: FnMut(Frame) -> Result<(), CamError> + Send,
{
    fn display(&mut self, frame: Frame) -> Result<(), CamError> {
        self(frame)
    }
}
