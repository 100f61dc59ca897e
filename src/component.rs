//! Path-scoped views of the device tree.
//!
//! Each component joins its root segment with the caller's path, so
//! `client.status().get("Audio Volume")` reads `Status/Audio/Volume`.
//!
//! | Component  | Root            | get | set | on / once |
//! |------------|-----------------|-----|-----|-----------|
//! | [`Config`] | `Configuration` | yes | yes | yes       |
//! | [`Status`] | `Status`        | yes | no  | yes       |
//! | [`Event`]  | `Event`         | no  | no  | yes       |

use serde_json::Value;

use crate::client::{Client, PendingCall};
use crate::error::{Result, XapiError};
use crate::feedback::FeedbackHandle;
use crate::path::{normalize, IntoPath, NormalizedPath};

/// Client handle plus a root path. Shared by every component.
#[derive(Clone)]
struct Scope {
    client: Client,
    root: NormalizedPath,
}

impl Scope {
    fn new(client: Client, root: &str) -> Self {
        Self {
            client,
            root: normalize(root),
        }
    }

    fn path(&self, path: impl IntoPath) -> NormalizedPath {
        self.root.join(&normalize(path))
    }

    fn get(&self, path: impl IntoPath) -> PendingCall {
        self.client.get(self.path(path))
    }

    fn set(&self, path: impl IntoPath, value: Value) -> PendingCall {
        self.client.set(self.path(path), value)
    }

    fn on<F>(&self, path: impl IntoPath, listener: F) -> FeedbackHandle
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.client.on(self.path(path), listener)
    }

    fn once<F>(&self, path: impl IntoPath, listener: F) -> FeedbackHandle
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.client.once(self.path(path), listener)
    }
}

fn legacy_off() -> Result<()> {
    Err(XapiError::Deprecated(
        "bulk off() was removed, call off() on the handle returned by on()/once()",
    ))
}

/// The `Configuration` subtree.
#[derive(Clone)]
pub struct Config {
    scope: Scope,
}

impl Config {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            scope: Scope::new(client, "Configuration"),
        }
    }

    /// Read a configuration value.
    pub fn get(&self, path: impl IntoPath) -> PendingCall {
        self.scope.get(path)
    }

    /// Write a configuration value.
    pub fn set(&self, path: impl IntoPath, value: impl Into<Value>) -> PendingCall {
        self.scope.set(path, value.into())
    }

    /// Listen for configuration changes.
    pub fn on<F>(&self, path: impl IntoPath, listener: F) -> FeedbackHandle
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.scope.on(path, listener)
    }

    /// Listen for the next configuration change.
    pub fn once<F>(&self, path: impl IntoPath, listener: F) -> FeedbackHandle
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.scope.once(path, listener)
    }

    /// Always fails; use the handle returned by `on`/`once`.
    pub fn off(&self) -> Result<()> {
        legacy_off()
    }
}

/// The `Status` subtree. Read-only.
#[derive(Clone)]
pub struct Status {
    scope: Scope,
}

impl Status {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            scope: Scope::new(client, "Status"),
        }
    }

    /// Read a status value.
    pub fn get(&self, path: impl IntoPath) -> PendingCall {
        self.scope.get(path)
    }

    /// Listen for status changes.
    pub fn on<F>(&self, path: impl IntoPath, listener: F) -> FeedbackHandle
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.scope.on(path, listener)
    }

    /// Listen for the next status change.
    pub fn once<F>(&self, path: impl IntoPath, listener: F) -> FeedbackHandle
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.scope.once(path, listener)
    }

    /// Always fails; use the handle returned by `on`/`once`.
    pub fn off(&self) -> Result<()> {
        legacy_off()
    }
}

/// The `Event` subtree.
#[derive(Clone)]
pub struct Event {
    scope: Scope,
}

impl Event {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            scope: Scope::new(client, "Event"),
        }
    }

    /// Listen for events.
    pub fn on<F>(&self, path: impl IntoPath, listener: F) -> FeedbackHandle
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.scope.on(path, listener)
    }

    /// Listen for the next event.
    pub fn once<F>(&self, path: impl IntoPath, listener: F) -> FeedbackHandle
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.scope.once(path, listener)
    }

    /// Always fails; use the handle returned by `on`/`once`.
    pub fn off(&self) -> Result<()> {
        legacy_off()
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::EnvelopeBackend;
    use crate::error::XapiError;
    use crate::Client;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    struct Wire {
        outbound: mpsc::Receiver<String>,
        inbound: mpsc::Sender<String>,
    }

    impl Wire {
        async fn next(&mut self) -> Value {
            let text = self.outbound.recv().await.unwrap();
            serde_json::from_str(&text).unwrap()
        }
    }

    fn connect() -> (Client, Wire) {
        let (out_tx, out_rx) = mpsc::channel(16);
        let (in_tx, in_rx) = mpsc::channel(16);
        let client = Client::new(EnvelopeBackend::new(out_tx, in_rx)).unwrap();
        (
            client,
            Wire {
                outbound: out_rx,
                inbound: in_tx,
            },
        )
    }

    #[tokio::test]
    async fn test_config_set_prefixes_root() {
        let (client, mut wire) = connect();

        let call = client.config().set("audio defaultvolume", 40);
        let sent = wire.next().await;
        assert_eq!(sent["method"], "xSet");
        assert_eq!(sent["params"]["Path"], json!(["Configuration", "Audio", "Defaultvolume"]));
        assert_eq!(sent["params"]["Value"], 40);

        wire.inbound
            .send(json!({"jsonrpc": "2.0", "id": sent["id"], "result": null}).to_string())
            .await
            .unwrap();
        assert_eq!(call.await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_status_get_prefixes_root() {
        let (client, mut wire) = connect();

        let call = client.status().get(["Call", "3", "Status"]);
        let sent = wire.next().await;
        assert_eq!(sent["params"]["Path"], json!(["Status", "Call", 3, "Status"]));

        wire.inbound
            .send(json!({"jsonrpc": "2.0", "id": sent["id"], "result": "Connected"}).to_string())
            .await
            .unwrap();
        assert_eq!(call.await.unwrap(), "Connected");
    }

    #[tokio::test]
    async fn test_event_on_subscribes_under_event_root() {
        let (client, mut wire) = connect();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _handle = client.event().on("UserInterface Extensions Event Clicked", move |v, _| {
            let _ = tx.send(v.clone());
        });

        let sent = wire.next().await;
        assert_eq!(sent["method"], "xFeedback/Subscribe");
        assert_eq!(
            sent["params"]["Query"],
            json!(["Event", "UserInterface", "Extensions", "Event", "Clicked"])
        );

        let payload = json!({"Event": {"UserInterface": {"Extensions": {"Event": {
            "Clicked": {"Signal": "button:pressed"}
        }}}}});
        wire.inbound
            .send(json!({"jsonrpc": "2.0", "method": "xFeedback/Event", "params": payload}).to_string())
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(json!({"Signal": "button:pressed"})));
    }

    #[tokio::test]
    async fn test_component_off_is_deprecated() {
        let (client, _wire) = connect();
        assert!(matches!(client.config().off(), Err(XapiError::Deprecated(_))));
        assert!(matches!(client.status().off(), Err(XapiError::Deprecated(_))));
        assert!(matches!(client.event().off(), Err(XapiError::Deprecated(_))));
    }
}
