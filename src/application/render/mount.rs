use std::sync::{Arc, Mutex};

use crate::infra::lock::mutex_lock;

use super::types::SessionId;

const LOCK_TARGET: &str = "application::render::mount";

#[derive(Debug, Default)]
struct MountState {
    html: String,
    session: Option<SessionId>,
}

/// Caller-owned display surface the pipeline renders into.
///
/// Cloning yields another handle to the same surface. Writes made on behalf
/// of a session only land while that session is still the mounted one.
#[derive(Debug, Clone, Default)]
pub struct PreviewMount {
    inner: Arc<Mutex<MountState>>,
}

impl PreviewMount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current markup on the surface.
    pub fn snapshot(&self) -> String {
        mutex_lock(&self.inner, LOCK_TARGET, "snapshot").html.clone()
    }

    /// Session whose output currently owns the surface, if any.
    pub fn session(&self) -> Option<SessionId> {
        mutex_lock(&self.inner, LOCK_TARGET, "session").session
    }

    pub(crate) fn mount(&self, session: SessionId, html: String) {
        let mut state = mutex_lock(&self.inner, LOCK_TARGET, "mount");
        state.html = html;
        state.session = Some(session);
    }

    pub(crate) fn read_if_current(&self, session: SessionId) -> Option<String> {
        let state = mutex_lock(&self.inner, LOCK_TARGET, "read_if_current");
        (state.session == Some(session)).then(|| state.html.clone())
    }

    /// Replace the surface markup if `session` still owns it.
    pub(crate) fn apply_if_current(&self, session: SessionId, html: String) -> bool {
        let mut state = mutex_lock(&self.inner, LOCK_TARGET, "apply_if_current");
        if state.session != Some(session) {
            return false;
        }
        state.html = html;
        true
    }

    /// Detach the owning session; the last markup stays visible.
    pub(crate) fn detach(&self, session: SessionId) {
        let mut state = mutex_lock(&self.inner, LOCK_TARGET, "detach");
        if state.session == Some(session) {
            state.session = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_session_cannot_write() {
        let mount = PreviewMount::new();
        mount.mount(SessionId(1), "<p>one</p>".to_string());
        mount.mount(SessionId(2), "<p>two</p>".to_string());

        assert!(!mount.apply_if_current(SessionId(1), "<p>late</p>".to_string()));
        assert!(mount.read_if_current(SessionId(1)).is_none());
        assert_eq!(mount.snapshot(), "<p>two</p>");
        assert!(mount.apply_if_current(SessionId(2), "<p>two!</p>".to_string()));
        assert_eq!(mount.snapshot(), "<p>two!</p>");
    }

    #[test]
    fn detach_keeps_markup_and_blocks_writes() {
        let mount = PreviewMount::new();
        mount.mount(SessionId(3), "<p>kept</p>".to_string());
        mount.detach(SessionId(3));

        assert_eq!(mount.session(), None);
        assert_eq!(mount.snapshot(), "<p>kept</p>");
        assert!(!mount.apply_if_current(SessionId(3), String::new()));
    }
}
