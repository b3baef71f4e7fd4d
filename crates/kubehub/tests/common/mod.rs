#![allow(dead_code)]

use std::sync::Mutex;

use futures::StreamExt;
use kube::core::{DynamicObject, WatchEvent};
use stitch_core::{Error, ResourceKind, Result, Selector};
use stitch_kubehub::{EventStream, ListerWatcher, RawList};
use tokio::sync::mpsc;

pub type Tx = mpsc::UnboundedSender<Result<WatchEvent<DynamicObject>>>;

/// In-memory transport: list serves fixed objects filtered by selector, watch hands
/// out a channel the test feeds.
pub struct FakeListerWatcher {
    objects: Option<Vec<DynamicObject>>,
    version: Option<String>,
    events: Mutex<Option<mpsc::UnboundedReceiver<Result<WatchEvent<DynamicObject>>>>>,
    pub watched_from: Mutex<Vec<String>>,
    pub listed: Mutex<Vec<Selector>>,
    pub watched: Mutex<Vec<Selector>>,
}

impl FakeListerWatcher {
    pub fn new(objects: Vec<DynamicObject>, version: Option<&str>) -> (Self, Tx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let me = Self {
            objects: Some(objects),
            version: version.map(str::to_string),
            events: Mutex::new(Some(rx)),
            watched_from: Mutex::new(Vec::new()),
            listed: Mutex::new(Vec::new()),
            watched: Mutex::new(Vec::new()),
        };
        (me, tx)
    }

    /// A transport whose list call fails as if the API server were unreachable.
    pub fn unreachable() -> Self {
        Self {
            objects: None,
            version: None,
            events: Mutex::new(None),
            watched_from: Mutex::new(Vec::new()),
            listed: Mutex::new(Vec::new()),
            watched: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl ListerWatcher for FakeListerWatcher {
    async fn list(&self, selector: &Selector) -> Result<RawList> {
        self.listed.lock().unwrap().push(selector.clone());
        let objects = self.objects.as_ref().ok_or_else(|| Error::transport("connection refused"))?;
        let items = objects
            .iter()
            .filter(|o| match stitch_kubehub::decode(ResourceKind::Pod, (*o).clone()) {
                Ok(item) => selector.matches(&item),
                Err(_) => true,
            })
            .cloned()
            .collect();
        Ok(RawList { items, resource_version: self.version.clone() })
    }

    async fn watch(&self, selector: &Selector, version: &str) -> Result<EventStream> {
        self.watched.lock().unwrap().push(selector.clone());
        self.watched_from.lock().unwrap().push(version.to_string());
        let rx = self.events.lock().unwrap().take().ok_or_else(|| Error::transport("watch refused"))?;
        let stream = futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|ev| (ev, rx)) });
        Ok(stream.boxed())
    }
}

/// Transport whose watch stream is produced by an arbitrary stream.
pub struct StreamListerWatcher<F>(pub F);

#[async_trait::async_trait]
impl<F> ListerWatcher for StreamListerWatcher<F>
where
    F: Fn() -> EventStream + Send + Sync,
{
    async fn list(&self, _selector: &Selector) -> Result<RawList> {
        Ok(RawList { items: Vec::new(), resource_version: Some("1".into()) })
    }

    async fn watch(&self, _selector: &Selector, _version: &str) -> Result<EventStream> { Ok((self.0)()) }
}

pub fn pod(ns: &str, name: &str, rv: &str) -> DynamicObject {
    serde_json::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "namespace": ns, "name": name, "resourceVersion": rv },
    }))
    .expect("pod")
}

pub fn list_pod(ns: &str, name: &str, rv: &str) -> DynamicObject {
    serde_json::from_value(serde_json::json!({
        "metadata": { "namespace": ns, "name": name, "resourceVersion": rv },
    }))
    .expect("pod")
}

pub fn malformed_pod(ns: &str, name: &str, rv: &str) -> DynamicObject {
    serde_json::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "namespace": ns, "name": name, "resourceVersion": rv },
        "spec": { "containers": 42 },
    }))
    .expect("pod")
}

pub fn bookmark(rv: &str) -> WatchEvent<DynamicObject> {
    serde_json::from_value(serde_json::json!({
        "type": "BOOKMARK",
        "object": { "apiVersion": "v1", "kind": "Pod", "metadata": { "resourceVersion": rv } },
    }))
    .expect("bookmark")
}

pub fn error_event(code: u16, message: &str) -> WatchEvent<DynamicObject> {
    serde_json::from_value(serde_json::json!({
        "type": "ERROR",
        "object": { "status": "Failure", "message": message, "reason": "Expired", "code": code },
    }))
    .expect("error event")
}
