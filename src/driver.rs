//! PlaybackDriver: the seam between the engine and whatever shows pixels.
//!
//! The engine hands the driver one item at a time and listens for two
//! events: the first frame being shown, and the item finishing. Every
//! dispatch carries a generation number; events echo it back so the
//! engine can ignore late events from a session it already replaced.
//!
//! `TimedDriver` is the headless implementation used by the binary: it
//! holds each item for its display time without decoding anything.

use crate::media::{DEFAULT_IMAGE_DURATION, MediaKind};
use crate::queue::FinishReason;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

// ── Requests & Events ────────────────────────────────────────────────────────

/// One dispatch to the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayRequest {
    pub generation: u64,
    pub path: PathBuf,
    pub kind: Option<MediaKind>,
    /// Duration override; `None` plays the media for its natural length.
    pub duration: Option<Duration>,
    /// Output size in pixels (width, height).
    pub target_size: (u32, u32),
}

/// Events emitted by a driver back to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    FrameReady {
        generation: u64,
    },
    Finished {
        generation: u64,
        /// Zero means the media could not be decoded at all.
        frames_shown: u64,
        reason: FinishReason,
    },
}

impl PlaybackEvent {
    pub fn generation(&self) -> u64 {
        match self {
            PlaybackEvent::FrameReady { generation } => *generation,
            PlaybackEvent::Finished { generation, .. } => *generation,
        }
    }
}

// ── Driver trait ─────────────────────────────────────────────────────────────

pub trait PlaybackDriver: Send {
    /// Begin showing an item. Any previous session has already been stopped.
    fn start_item(&mut self, request: PlayRequest);

    /// Tear down the current session. Must be safe to call when idle.
    fn stop_item(&mut self);
}

/// Driver that drops every request. Used when editing state offline.
pub struct NullDriver;

impl PlaybackDriver for NullDriver {
    fn start_item(&mut self, request: PlayRequest) {
        debug!(path = %request.path.display(), "null driver: request dropped");
    }

    fn stop_item(&mut self) {}
}

// ── TimedDriver ──────────────────────────────────────────────────────────────

/// Nominal frame rate used to report `frames_shown`.
const NOMINAL_FPS: u64 = 25;

/// Headless driver: "shows" each item for its display time.
///
/// Items with a duration override are held that long and finish with
/// `DurationElapsed`. Videos without one are held for `video_fallback` and
/// finish with `EndOfMedia`. A missing file finishes at once with zero frames.
pub struct TimedDriver {
    events: UnboundedSender<PlaybackEvent>,
    video_fallback: Duration,
    session: Option<JoinHandle<()>>,
}

impl TimedDriver {
    pub fn new(events: UnboundedSender<PlaybackEvent>, video_fallback: Duration) -> Self {
        TimedDriver {
            events,
            video_fallback,
            session: None,
        }
    }

    fn hold_for(&self, request: &PlayRequest) -> (Duration, FinishReason) {
        match (request.duration, request.kind) {
            (Some(d), _) => (d, FinishReason::DurationElapsed),
            (None, Some(MediaKind::Image)) => (DEFAULT_IMAGE_DURATION, FinishReason::EndOfMedia),
            (None, _) => (self.video_fallback, FinishReason::EndOfMedia),
        }
    }
}

impl PlaybackDriver for TimedDriver {
    fn start_item(&mut self, request: PlayRequest) {
        self.stop_item();
        let generation = request.generation;

        if !request.path.is_file() || request.kind.is_none() {
            warn!(path = %request.path.display(), "cannot open media");
            let _ = self.events.send(PlaybackEvent::Finished {
                generation,
                frames_shown: 0,
                reason: FinishReason::EndOfMedia,
            });
            return;
        }

        let (hold, reason) = self.hold_for(&request);
        let frames_shown = (hold.as_millis() as u64 * NOMINAL_FPS / 1000).max(1);
        debug!(
            path = %request.path.display(),
            generation,
            hold_ms = hold.as_millis() as u64,
            "session started"
        );

        let events = self.events.clone();
        self.session = Some(tokio::spawn(async move {
            let _ = events.send(PlaybackEvent::FrameReady { generation });
            tokio::time::sleep(hold).await;
            let _ = events.send(PlaybackEvent::Finished {
                generation,
                frames_shown,
                reason,
            });
        }));
    }

    fn stop_item(&mut self) {
        if let Some(session) = self.session.take() {
            session.abort();
        }
    }
}

impl Drop for TimedDriver {
    fn drop(&mut self) {
        self.stop_item();
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn request(generation: u64, path: PathBuf, duration: Option<Duration>) -> PlayRequest {
        PlayRequest {
            generation,
            kind: MediaKind::from_path(&path),
            path,
            duration,
            target_size: (864, 432),
        }
    }

    #[test]
    fn driver_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<TimedDriver>();
        assert_send::<Box<dyn PlaybackDriver>>();
    }

    #[test]
    fn event_generation_accessor() {
        let ev = PlaybackEvent::Finished {
            generation: 9,
            frames_shown: 3,
            reason: FinishReason::EndOfMedia,
        };
        assert_eq!(ev.generation(), 9);
        assert_eq!(PlaybackEvent::FrameReady { generation: 4 }.generation(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_file_finishes_with_zero_frames() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = TimedDriver::new(tx, Duration::from_secs(30));
        driver.start_item(request(1, "__missing__.mp4".into(), None));
        assert_eq!(
            rx.recv().await,
            Some(PlaybackEvent::Finished {
                generation: 1,
                frames_shown: 0,
                reason: FinishReason::EndOfMedia,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn override_finishes_with_duration_elapsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poster.png");
        std::fs::write(&path, b"x").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = TimedDriver::new(tx, Duration::from_secs(30));
        driver.start_item(request(2, path, Some(Duration::from_secs(3))));

        assert_eq!(rx.recv().await, Some(PlaybackEvent::FrameReady { generation: 2 }));
        match rx.recv().await {
            Some(PlaybackEvent::Finished {
                generation,
                frames_shown,
                reason,
            }) => {
                assert_eq!(generation, 2);
                assert_eq!(frames_shown, 75);
                assert_eq!(reason, FinishReason::DurationElapsed);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_item_cancels_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"x").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = TimedDriver::new(tx, Duration::from_secs(30));
        driver.start_item(request(3, path, None));
        assert_eq!(rx.recv().await, Some(PlaybackEvent::FrameReady { generation: 3 }));
        driver.stop_item();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }
}
