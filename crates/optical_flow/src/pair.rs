// pair.rs - Pairing consecutive frames for flow computation
use crate::error::FlowError;
use common_io::VideoBuffer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairState {
    /// No previous frame held.
    Idle,
    /// A private copy of the previous frame is held.
    Armed,
}

/// Two-state machine that retains the previous frame.
///
/// The retained frame is always a private copy of the pixels, never a second
/// handle on the incoming buffer, so the buffer that continues downstream
/// stays uniquely owned and writable.
#[derive(Debug, Default)]
pub struct FramePairState {
    previous: Option<VideoBuffer>,
}

impl FramePairState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PairState {
        if self.previous.is_some() {
            PairState::Armed
        } else {
            PairState::Idle
        }
    }

    pub fn is_armed(&self) -> bool {
        self.previous.is_some()
    }

    pub fn previous(&self) -> Option<&VideoBuffer> {
        self.previous.as_ref()
    }

    /// Feed the next frame.
    ///
    /// When armed, `pair` runs on (previous, current) and its result is
    /// returned. In both states the retained frame is then replaced with a
    /// copy of `current`.
    pub fn advance<T, F>(&mut self, current: &VideoBuffer, pair: F) -> Result<Option<T>, FlowError>
    where
        F: FnOnce(&VideoBuffer, &VideoBuffer) -> Result<T, FlowError>,
    {
        let paired = match self.previous.take() {
            Some(previous) => Some(pair(&previous, current)),
            None => None,
        };
        self.retain(current);
        paired.transpose()
    }

    /// Replace the retained frame with a copy of `current` without pairing.
    ///
    /// If the copy fails the machine falls back to idle and the next frame
    /// re-arms it, so a frame is never paired across a dropped one.
    pub fn retain(&mut self, current: &VideoBuffer) {
        self.previous = None;
        match current.copy_frame() {
            Ok(copy) => self.previous = Some(copy),
            Err(e) => {
                tracing::warn!(
                    frame = current.meta.frame_idx,
                    error = %e,
                    "could not retain frame, pairing restarts on the next frame"
                );
            }
        }
    }

    /// Drop the retained frame and return to idle.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}
