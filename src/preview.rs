//! Live preview of unsaved settings edits.
//!
//! An editor publishes partial settings as a draft; every open view sees the
//! draft merged over the committed settings, without anything reaching the
//! remote store. Saving is a separate, explicit write through the
//! coordinator.
//!
//! ## Design
//! - The draft lives in a `tokio::sync::watch` channel, so async views can
//!   await changes and late subscribers see the current draft immediately
//! - Synchronous callbacks can register too; the returned
//!   [`ListenerHandle`] unregisters on drop
//! - Successive drafts accumulate (deep merge) until cleared; a draft that
//!   would not decode as settings is refused, never stored

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;

use crate::model::{deep_merge, SiteSettings};

type Callback = Arc<dyn Fn(Option<&Value>) + Send + Sync>;
type Registry = Mutex<Vec<(u64, Callback)>>;

/// Ephemeral draft overlay shared between views.
pub struct PreviewChannel {
    draft: watch::Sender<Option<Value>>,
    listeners: Arc<Registry>,
    next_listener: AtomicU64,
}

impl Default for PreviewChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewChannel {
    pub fn new() -> Self {
        let (draft, _) = watch::channel(None);
        Self {
            draft,
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener: AtomicU64::new(0),
        }
    }

    /// Merge a partial internal-form settings object into the draft and
    /// notify every listener. Empty or non-object input is ignored, as is a
    /// partial that would leave the draft outside the settings shape; the
    /// previous draft then stays in place.
    ///
    /// Returns whether the draft was updated.
    pub fn publish_draft(&self, partial: &Value) -> bool {
        match partial.as_object() {
            Some(object) if !object.is_empty() => {}
            _ => {
                tracing::debug!("Ignoring empty preview draft");
                return false;
            }
        }

        let mut merged = self
            .draft
            .borrow()
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()));
        deep_merge(&mut merged, partial);
        if let Err(e) = SiteSettings::default().with_patch(&merged) {
            tracing::debug!("Ignoring preview draft that does not fit settings: {e}");
            return false;
        }
        self.draft.send_replace(Some(merged.clone()));
        self.fire(Some(&merged));
        true
    }

    /// Publish a serialized draft as received from another view.
    pub fn publish_raw(&self, payload: &str) -> bool {
        match serde_json::from_str::<Value>(payload) {
            Ok(partial) => self.publish_draft(&partial),
            Err(e) => {
                tracing::debug!("Ignoring unparsable preview payload: {e}");
                false
            }
        }
    }

    /// Drop the draft overlay.
    pub fn clear_draft(&self) {
        if self.draft.send_replace(None).is_some() {
            self.fire(None);
        }
    }

    pub fn current_draft(&self) -> Option<Value> {
        self.draft.borrow().clone()
    }

    /// Watch the draft; the receiver sees the current value immediately.
    pub fn subscribe(&self) -> watch::Receiver<Option<Value>> {
        self.draft.subscribe()
    }

    /// Register a callback run on every draft change (`None` when cleared).
    pub fn on_draft_change(
        &self,
        callback: impl Fn(Option<&Value>) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(callback)));
        ListenerHandle {
            id,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    /// Settings as a preview consumer should render them: the draft merged
    /// over `committed`, field by field. A draft that does not fit the
    /// settings shape is ignored.
    pub fn preview(&self, committed: &SiteSettings) -> SiteSettings {
        let Some(draft) = self.current_draft() else {
            return committed.clone();
        };
        committed.with_patch(&draft).unwrap_or_else(|e| {
            tracing::warn!("Preview draft does not fit settings, showing committed: {e}");
            committed.clone()
        })
    }

    fn fire(&self, draft: Option<&Value>) {
        // Callbacks run outside the lock so they may register or drop handles.
        let callbacks: Vec<Callback> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(draft);
        }
    }
}

/// Keeps a draft listener registered while alive.
pub struct ListenerHandle {
    id: u64,
    registry: Weak<Registry>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn draft_overlays_committed_settings() {
        let channel = PreviewChannel::new();
        let committed = SiteSettings::default();
        assert!(channel.publish_draft(&json!({"colors": {"primary": "#000000"}})));

        let shown = channel.preview(&committed);
        assert_eq!(shown.colors.primary, "#000000");
        assert_eq!(shown.colors.secondary, committed.colors.secondary);
        assert_eq!(shown.site_name, committed.site_name);
    }

    #[test]
    fn drafts_accumulate_until_cleared() {
        let channel = PreviewChannel::new();
        channel.publish_draft(&json!({"siteName": "Draft"}));
        channel.publish_draft(&json!({"colors": {"accent": "#123456"}}));
        assert_eq!(
            channel.current_draft(),
            Some(json!({"siteName": "Draft", "colors": {"accent": "#123456"}}))
        );

        channel.clear_draft();
        assert!(channel.current_draft().is_none());
        let committed = SiteSettings::default();
        assert_eq!(channel.preview(&committed), committed);
    }

    #[test]
    fn empty_and_unparsable_payloads_are_ignored() {
        let channel = PreviewChannel::new();
        assert!(!channel.publish_draft(&json!({})));
        assert!(!channel.publish_draft(&json!("text")));
        assert!(!channel.publish_raw("{not json"));
        assert!(channel.publish_raw(r#"{"tagline": "New"}"#));
        assert_eq!(channel.current_draft(), Some(json!({"tagline": "New"})));
    }

    #[test]
    fn listeners_fire_until_dropped() {
        let channel = PreviewChannel::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let handle = channel.on_draft_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        channel.publish_draft(&json!({"logo": "B"}));
        channel.clear_draft();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        drop(handle);
        channel.publish_draft(&json!({"logo": "C"}));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn watchers_see_drafts() {
        let channel = PreviewChannel::new();
        let mut rx = channel.subscribe();
        channel.publish_draft(&json!({"tagline": "Soon"}));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().clone(), Some(json!({"tagline": "Soon"})));
    }

    #[test]
    fn ill_typed_draft_is_refused_and_later_edits_still_show() {
        let channel = PreviewChannel::new();
        assert!(channel.publish_draft(&json!({"siteName": "Draft"})));
        assert!(!channel.publish_draft(&json!({"colors": "red"})));
        assert_eq!(channel.current_draft(), Some(json!({"siteName": "Draft"})));

        assert!(channel.publish_draft(&json!({"tagline": "Draft line"})));
        let shown = channel.preview(&SiteSettings::default());
        assert_eq!(shown.site_name, "Draft");
        assert_eq!(shown.tagline, "Draft line");
    }
}
