/// Playback lifecycle states.
///
/// `Stopped` is both initial and terminal-per-session; `Disposed` is
/// reachable from every state and final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Loading,
    Playing,
    Disposed,
}

/// Tracks what the caller wants (`desired`) separately from what is
/// actually happening (`current`).
///
/// The split exists because the speech provider initializes
/// asynchronously: a play request before init completes only raises
/// `desired`, and actual playback resumes once the provider is ready.
#[derive(Debug)]
pub struct StateTracker {
    desired: PlaybackState,
    current: PlaybackState,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            desired: PlaybackState::Stopped,
            current: PlaybackState::Stopped,
        }
    }

    pub fn desired(&self) -> PlaybackState {
        self.desired
    }

    pub fn current(&self) -> PlaybackState {
        self.current
    }

    pub fn is_disposed(&self) -> bool {
        self.current == PlaybackState::Disposed
    }

    pub fn request(&mut self, state: PlaybackState) {
        if self.desired != state {
            tracing::debug!("Desired state: {:?} -> {:?}", self.desired, state);
            self.desired = state;
        }
    }

    /// Applies an actual state transition. Invalid transitions are logged
    /// and ignored rather than propagated; the engine treats them as
    /// stale requests.
    pub fn set_current(&mut self, state: PlaybackState) -> bool {
        use PlaybackState::*;
        if self.current == state {
            return false;
        }
        let valid = matches!(
            (self.current, state),
            (Stopped, Loading)
                | (Stopped, Playing)
                | (Loading, Playing)
                | (Loading, Stopped)
                | (Playing, Loading)
                | (Playing, Stopped)
                | (_, Disposed)
        );
        if !valid {
            tracing::warn!(
                "Ignoring invalid state transition: {:?} -> {:?}",
                self.current,
                state
            );
            return false;
        }
        tracing::info!("State transition: {:?} -> {:?}", self.current, state);
        self.current = state;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_stopped() {
        let s = StateTracker::new();
        assert_eq!(s.desired(), PlaybackState::Stopped);
        assert_eq!(s.current(), PlaybackState::Stopped);
    }

    #[test]
    fn rejects_invalid_transition() {
        let mut s = StateTracker::new();
        assert!(s.set_current(PlaybackState::Playing));
        s.set_current(PlaybackState::Disposed);
        // Nothing leaves Disposed.
        assert!(!s.set_current(PlaybackState::Playing));
        assert_eq!(s.current(), PlaybackState::Disposed);
    }

    #[test]
    fn desired_tracks_independently() {
        let mut s = StateTracker::new();
        s.request(PlaybackState::Playing);
        assert_eq!(s.desired(), PlaybackState::Playing);
        assert_eq!(s.current(), PlaybackState::Stopped);
    }
}
