//! Exclusively owned media handles with idempotent release
//!
//! A `MediaHandle` stands for an open capture (or remote playback) resource.
//! The call session owns its handles exclusively and must release them on
//! every exit path; release is an atomic swap, so a second call is a no-op
//! rather than an error.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use unitynets_signaling_core::MediaKind;
use uuid::Uuid;

struct HandleShared {
    label: String,
    kind: MediaKind,
    released: AtomicBool,
    release_calls: AtomicUsize,
    audio_enabled: AtomicBool,
    video_enabled: AtomicBool,
    on_release: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// An open media resource (local capture or remote track set).
///
/// Not `Clone`: the session is the single owner. Observers that need to
/// assert on lifecycle (tests, diagnostics) take a [`MediaHandleProbe`]
/// before handing the handle over.
pub struct MediaHandle {
    shared: Arc<HandleShared>,
}

impl MediaHandle {
    /// Create a handle for an already-open resource.
    pub fn new(label: impl Into<String>, kind: MediaKind) -> Self {
        Self::with_release_hook(label, kind, || {})
    }

    /// Create a handle whose first release runs `hook` (device close,
    /// track stop, etc.).
    pub fn with_release_hook(
        label: impl Into<String>,
        kind: MediaKind,
        hook: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(HandleShared {
                label: format!("{}-{}", label.into(), Uuid::new_v4()),
                kind,
                released: AtomicBool::new(false),
                release_calls: AtomicUsize::new(0),
                audio_enabled: AtomicBool::new(true),
                video_enabled: AtomicBool::new(true),
                on_release: Mutex::new(Some(Box::new(hook))),
            }),
        }
    }

    /// Release the underlying resource. Returns `true` only for the call
    /// that actually performed the release; later calls are no-ops.
    pub fn release(&self) -> bool {
        self.shared.release_calls.fetch_add(1, Ordering::Relaxed);
        let first = self
            .shared
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            if let Some(hook) = self.shared.on_release.lock().take() {
                hook();
            }
            debug!(handle = %self.shared.label, "media handle released");
        }
        first
    }

    /// Whether the resource has been released.
    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    /// Enable or disable the audio track (media-level mute).
    pub fn set_audio_enabled(&self, enabled: bool) {
        self.shared.audio_enabled.store(enabled, Ordering::Release);
    }

    /// Whether the audio track is enabled.
    pub fn audio_enabled(&self) -> bool {
        self.shared.audio_enabled.load(Ordering::Acquire)
    }

    /// Enable or disable the video track.
    pub fn set_video_enabled(&self, enabled: bool) {
        self.shared.video_enabled.store(enabled, Ordering::Release);
    }

    /// Whether the video track is enabled.
    pub fn video_enabled(&self) -> bool {
        self.shared.video_enabled.load(Ordering::Acquire)
    }

    /// Media kind this handle carries.
    pub fn kind(&self) -> MediaKind {
        self.shared.kind
    }

    /// Diagnostic label, unique per handle.
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Take a read-only probe observing this handle's lifecycle.
    pub fn probe(&self) -> MediaHandleProbe {
        MediaHandleProbe {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaHandle")
            .field("label", &self.shared.label)
            .field("kind", &self.shared.kind)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Read-only observer of a handle's lifecycle, usable after the handle
/// itself has been moved into a session.
#[derive(Clone)]
pub struct MediaHandleProbe {
    shared: Arc<HandleShared>,
}

impl MediaHandleProbe {
    /// Whether the observed handle has been released.
    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    /// How many times `release` was called (effective or not).
    pub fn release_calls(&self) -> usize {
        self.shared.release_calls.load(Ordering::Relaxed)
    }

    /// Whether the observed handle's audio track is enabled.
    pub fn audio_enabled(&self) -> bool {
        self.shared.audio_enabled.load(Ordering::Acquire)
    }

    /// Whether the observed handle's video track is enabled.
    pub fn video_enabled(&self) -> bool {
        self.shared.video_enabled.load(Ordering::Acquire)
    }
}

impl fmt::Debug for MediaHandleProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaHandleProbe")
            .field("label", &self.shared.label)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn release_is_idempotent() {
        let closes = Arc::new(AtomicUsize::new(0));
        let hook_closes = Arc::clone(&closes);
        let handle = MediaHandle::with_release_hook("mic", MediaKind::Voice, move || {
            hook_closes.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!handle.is_released());
        assert!(handle.release());
        assert!(!handle.release());
        assert!(handle.is_released());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn probe_observes_release_after_handle_moves() {
        let handle = MediaHandle::new("cam", MediaKind::Video);
        let probe = handle.probe();

        let moved = handle;
        assert!(!probe.is_released());
        moved.release();
        assert!(probe.is_released());
        assert_eq!(probe.release_calls(), 1);
    }

    #[test]
    fn track_toggles_are_visible_through_probe() {
        let handle = MediaHandle::new("cam", MediaKind::Video);
        let probe = handle.probe();

        handle.set_audio_enabled(false);
        handle.set_video_enabled(false);
        assert!(!probe.audio_enabled());
        assert!(!probe.video_enabled());
    }
}
