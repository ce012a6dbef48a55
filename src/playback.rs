//! The flag shared with the video player. See [`PlaybackFlag`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set while a video is playing on the robot's display. The link worker slows its polling down
/// while the flag is set. Cloning returns another handle to the same flag.
#[derive(Clone, Debug, Default)]
pub struct PlaybackFlag(Arc<AtomicBool>);

impl PlaybackFlag {
    pub fn new() -> Self {
        PlaybackFlag::default()
    }

    pub fn set_active(&self, active: bool) {
        self.0.store(active, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
