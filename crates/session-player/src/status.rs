use std::sync::{Arc, Mutex};

use playback_types::SessionStatus;

/// Shared session status, written by the control thread and read from anywhere.
#[derive(Clone, Debug, Default)]
pub struct StatusHandle(Arc<Mutex<SessionStatus>>);

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the latest published status.
    pub fn snapshot(&self) -> SessionStatus {
        self.0.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub(crate) fn publish(&self, status: SessionStatus) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playback_types::PlayerState;

    #[test]
    fn snapshot_sees_published_status_from_clones() {
        let handle = StatusHandle::new();
        let reader = handle.clone();
        assert_eq!(reader.snapshot().current_state, PlayerState::Idle);

        handle.publish(SessionStatus {
            session_id: Some(4),
            current_state: PlayerState::Playing,
            buffer_percent: 80,
            ..SessionStatus::default()
        });

        let snap = reader.snapshot();
        assert_eq!(snap.session_id, Some(4));
        assert_eq!(snap.current_state, PlayerState::Playing);
        assert_eq!(snap.buffer_percent, 80);
    }
}
