//! Bookkeeping for removing several listeners at once.

use super::FeedbackHandle;

/// A set of feedback handles removed together.
///
/// Purely local: adding or removing handles never talks to the device.
#[derive(Debug, Default)]
pub struct FeedbackGroup {
    handles: Vec<FeedbackHandle>,
}

impl FeedbackGroup {
    /// Create a group from existing handles.
    pub fn new(handles: impl IntoIterator<Item = FeedbackHandle>) -> Self {
        Self {
            handles: handles.into_iter().collect(),
        }
    }

    /// Track another handle.
    pub fn add(&mut self, handle: FeedbackHandle) -> &mut Self {
        self.handles.push(handle);
        self
    }

    /// Stop tracking a handle without removing its listener.
    pub fn remove(&mut self, handle: &FeedbackHandle) -> &mut Self {
        self.handles.retain(|h| h != handle);
        self
    }

    /// Remove every tracked listener and empty the group.
    pub fn off(&mut self) {
        for handle in self.handles.drain(..) {
            handle.off();
        }
    }

    /// Number of tracked handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// True if no handles are tracked.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::super::{FeedbackEngine, Requester};
    use super::*;
    use crate::error::Result;
    use crate::handler::BoxFuture;
    use serde_json::{json, Map, Value};
    use std::sync::Arc;

    struct NullRequester;

    impl Requester for NullRequester {
        fn request(&self, _method: &str, _params: Map<String, Value>) -> BoxFuture<'static, Result<Value>> {
            Box::pin(async { Ok(json!({"Id": 1})) })
        }
    }

    #[tokio::test]
    async fn test_group_off_removes_all() {
        let engine = FeedbackEngine::new(Arc::new(NullRequester));
        let a = engine.on("Status Audio Volume", |_, _| {});
        let b = engine.on("Status Standby State", |_, _| {});
        let c = engine.on("Status Audio Mute", |_, _| {});

        let mut group = engine.group([a.clone(), b.clone()]);
        group.add(c.clone());
        assert_eq!(group.len(), 3);

        group.remove(&b);
        assert_eq!(group.len(), 2);

        group.off();
        assert!(group.is_empty());
        assert!(!a.is_active());
        assert!(b.is_active());
        assert!(!c.is_active());
        assert_eq!(engine.listener_count(), 1);
    }
}
