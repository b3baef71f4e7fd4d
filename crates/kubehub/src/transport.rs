use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use kube::{
    api::{Api, ApiResource, DynamicObject, ListParams, WatchEvent, WatchParams},
    Client,
};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use stitch_core::{Error, ResourceKind, Result, Selector};
use tracing::debug;

/// Raw watch events. Payloads stay untyped until the subscriber decodes them.
pub type EventStream = BoxStream<'static, Result<WatchEvent<DynamicObject>>>;

/// Undecoded list response.
#[derive(Debug, Clone, Default)]
pub struct RawList {
    pub items: Vec<DynamicObject>,
    pub resource_version: Option<String>,
}

/// Authenticated List/Watch transport for one resource collection.
#[async_trait]
pub trait ListerWatcher: Send + Sync {
    async fn list(&self, selector: &Selector) -> Result<RawList>;

    /// Open a watch that delivers every change at or after `version`.
    async fn watch(&self, selector: &Selector, version: &str) -> Result<EventStream>;
}

fn api_resource(kind: ResourceKind) -> ApiResource {
    match kind {
        ResourceKind::Pod => ApiResource::erase::<Pod>(&()),
        ResourceKind::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
        ResourceKind::Service => ApiResource::erase::<Service>(&()),
    }
}

/// [`ListerWatcher`] backed by a kube [`Client`].
///
/// Objects are fetched as [`DynamicObject`] so a malformed payload surfaces as a
/// per-event decode failure instead of breaking the HTTP stream.
#[derive(Clone)]
pub struct KubeListerWatcher {
    client: Client,
    kind: ResourceKind,
    resource: ApiResource,
    watch_timeout: Option<u32>,
    bookmarks: bool,
}

impl KubeListerWatcher {
    pub fn new(client: Client, kind: ResourceKind) -> Self {
        Self { client, kind, resource: api_resource(kind), watch_timeout: None, bookmarks: true }
    }

    /// Build from the ambient kubeconfig or in-cluster environment.
    pub async fn try_default(kind: ResourceKind) -> Result<Self> {
        let client = Client::try_default().await.map_err(Error::transport)?;
        Ok(Self::new(client, kind))
    }

    #[must_use]
    pub fn with_watch_timeout(mut self, secs: Option<u32>) -> Self {
        self.watch_timeout = secs;
        self
    }

    #[must_use]
    pub fn with_bookmarks(mut self, enabled: bool) -> Self {
        self.bookmarks = enabled;
        self
    }

    fn api(&self, selector: &Selector) -> Api<DynamicObject> {
        match selector.namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &self.resource),
            None => Api::all_with(self.client.clone(), &self.resource),
        }
    }

    fn list_params(selector: &Selector) -> ListParams {
        let mut lp = ListParams::default();
        if let Some(f) = selector.field_selector.as_deref() {
            lp = lp.fields(f);
        }
        if let Some(l) = selector.label_selector.as_deref() {
            lp = lp.labels(l);
        }
        lp
    }

    fn watch_params(selector: &Selector, timeout: Option<u32>, bookmarks: bool) -> WatchParams {
        let mut wp = WatchParams::default();
        if let Some(f) = selector.field_selector.as_deref() {
            wp = wp.fields(f);
        }
        if let Some(l) = selector.label_selector.as_deref() {
            wp = wp.labels(l);
        }
        if let Some(t) = timeout {
            wp = wp.timeout(t);
        }
        wp.bookmarks = bookmarks;
        wp
    }
}

/// Map a kube client error onto the stitch taxonomy.
///
/// A watch line that does not deserialize arrives as `SerdeError` while the
/// stream stays open, so it is a decode failure of that one event. A 410 status
/// (on open or as an in-stream status line) means the version has expired.
fn classify(kind: ResourceKind, err: kube::Error) -> Error {
    match err {
        kube::Error::SerdeError(e) => Error::decode(kind, e.to_string()),
        kube::Error::Api(e) if e.code == 410 => Error::Expired(e.message),
        other => Error::transport(other),
    }
}

#[async_trait]
impl ListerWatcher for KubeListerWatcher {
    async fn list(&self, selector: &Selector) -> Result<RawList> {
        let list = self.api(selector).list(&Self::list_params(selector)).await.map_err(|e| classify(self.kind, e))?;
        debug!(kind = %self.resource.kind, ns = ?selector.namespace, count = list.items.len(), "list returned");
        Ok(RawList { items: list.items, resource_version: list.metadata.resource_version })
    }

    async fn watch(&self, selector: &Selector, version: &str) -> Result<EventStream> {
        let wp = Self::watch_params(selector, self.watch_timeout, self.bookmarks);
        let kind = self.kind;
        let stream = self.api(selector).watch(&wp, version).await.map_err(|e| classify(kind, e))?;
        debug!(kind = %self.resource.kind, ns = ?selector.namespace, version, "watch opened");
        Ok(stream.map_err(move |e| classify(kind, e)).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_resource_matches_kind() {
        let ar = api_resource(ResourceKind::ConfigMap);
        assert_eq!(ar.kind, "ConfigMap");
        assert_eq!(ar.plural, "configmaps");
        assert_eq!(ar.api_version, "v1");
        assert_eq!(api_resource(ResourceKind::Pod).plural, ResourceKind::Pod.plural());
    }

    #[test]
    fn selectors_pass_through_to_params() {
        let sel = Selector::namespaced("default").fields("status.phase=Running").labels("app=web");
        let lp = KubeListerWatcher::list_params(&sel);
        assert_eq!(lp.field_selector.as_deref(), Some("status.phase=Running"));
        assert_eq!(lp.label_selector.as_deref(), Some("app=web"));

        let wp = KubeListerWatcher::watch_params(&sel, Some(60), false);
        assert_eq!(wp.field_selector.as_deref(), Some("status.phase=Running"));
        assert_eq!(wp.label_selector.as_deref(), Some("app=web"));
        assert_eq!(wp.timeout, Some(60));
        assert!(!wp.bookmarks);

        let wp = KubeListerWatcher::watch_params(&Selector::all(), None, true);
        assert_eq!(wp.field_selector, None);
        assert_eq!(wp.timeout, None);
        assert!(wp.bookmarks);
    }

    fn status(code: u16, message: &str) -> kube::core::ErrorResponse {
        serde_json::from_value(serde_json::json!({ "status": "Failure", "message": message, "reason": "", "code": code }))
            .expect("status")
    }

    #[test]
    fn kube_errors_map_onto_taxonomy() {
        let serde = serde_json::from_str::<DynamicObject>("[1,2,3]").expect_err("not an object");
        let e = classify(ResourceKind::Pod, kube::Error::SerdeError(serde));
        assert!(matches!(e, Error::Decode { .. }), "{e:?}");

        let e = classify(ResourceKind::Pod, kube::Error::Api(status(410, "too old resource version: 1 (5)")));
        assert!(e.is_expired(), "{e:?}");
        assert!(e.to_string().contains("too old resource version"));

        let e = classify(ResourceKind::Pod, kube::Error::Api(status(500, "etcd unavailable")));
        assert!(matches!(e, Error::Transport(_)), "{e:?}");
    }
}
