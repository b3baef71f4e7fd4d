//! Stitch core types: resources, change events, selectors and watch outcomes.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

mod error;
mod selector;

pub use error::{BoxError, Error, Result};
pub use selector::{FieldOp, FieldRequirement, Selector};

pub mod prelude {
    pub use super::{
        ChangeEvent, ChangeKind, DecodePolicy, Error, EventSink, KubeObject, ObjectRef, ResourceItem, ResourceKind,
        Selector, Snapshot, SubscriberState, Termination, WatchConfig, WatchSummary,
    };
}

/// Resource collections the watcher knows how to decode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    #[default]
    Pod,
    ConfigMap,
    Service,
}

impl ResourceKind {
    pub fn api_version(&self) -> &'static str { "v1" }

    pub fn kind(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "Pod",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Service => "Service",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "pods",
            ResourceKind::ConfigMap => "configmaps",
            ResourceKind::Service => "services",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.kind()) }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pod" | "pods" | "po" => Ok(ResourceKind::Pod),
            "configmap" | "configmaps" | "cm" => Ok(ResourceKind::ConfigMap),
            "service" | "services" | "svc" => Ok(ResourceKind::Service),
            other => Err(Error::Config(format!("unsupported resource kind: {other:?} (expect pod, configmap or service)"))),
        }
    }
}

/// Typed payload of a [`ResourceItem`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum KubeObject {
    Pod(Pod),
    ConfigMap(ConfigMap),
    Service(Service),
}

impl KubeObject {
    pub fn kind(&self) -> ResourceKind {
        match self {
            KubeObject::Pod(_) => ResourceKind::Pod,
            KubeObject::ConfigMap(_) => ResourceKind::ConfigMap,
            KubeObject::Service(_) => ResourceKind::Service,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            KubeObject::Pod(o) => &o.metadata,
            KubeObject::ConfigMap(o) => &o.metadata,
            KubeObject::Service(o) => &o.metadata,
        }
    }

    /// Deserialize a JSON payload as the typed object for `kind`.
    pub fn from_json(kind: ResourceKind, raw: serde_json::Value) -> Result<Self> {
        let decoded = match kind {
            ResourceKind::Pod => serde_json::from_value(raw).map(KubeObject::Pod),
            ResourceKind::ConfigMap => serde_json::from_value(raw).map(KubeObject::ConfigMap),
            ResourceKind::Service => serde_json::from_value(raw).map(KubeObject::Service),
        };
        decoded.map_err(|e| Error::decode(kind, e.to_string()))
    }
}

/// Identity of a resource within its collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self { namespace: namespace.map(str::to_string), name: name.to_string() }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A decoded resource together with the metadata the list-watch protocol relies on.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceItem {
    pub namespace: Option<String>,
    pub name: String,
    /// `metadata.resourceVersion` of this object at the time it was observed.
    pub resource_version: String,
    pub object: KubeObject,
}

impl ResourceItem {
    /// Extract identity and version marker; objects without a name or resourceVersion are rejected.
    pub fn from_object(object: KubeObject) -> Result<Self> {
        let kind = object.kind();
        let meta = object.metadata();
        let name = match meta.name.as_deref() {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => return Err(Error::decode(kind, "object missing metadata.name")),
        };
        let resource_version = match meta.resource_version.as_deref() {
            Some(rv) if !rv.is_empty() => rv.to_string(),
            _ => return Err(Error::decode(kind, format!("{name}: object missing metadata.resourceVersion"))),
        };
        let namespace = meta.namespace.clone();
        Ok(Self { namespace, name, resource_version, object })
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef { namespace: self.namespace.clone(), name: self.name.clone() }
    }

    pub fn kind(&self) -> ResourceKind { self.object.kind() }
}

/// Point-in-time listing plus the collection version it was taken at.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub items: Vec<ResourceItem>,
    /// Opaque token; hand it unchanged to the subscriber.
    pub version: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "ADDED",
            ChangeKind::Modified => "MODIFIED",
            ChangeKind::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub item: ResourceItem,
}

/// Consumer of dispatched change events. Called once per event, in receive order.
pub trait EventSink {
    fn dispatch(&mut self, event: ChangeEvent);
}

impl<F> EventSink for F
where
    F: FnMut(ChangeEvent),
{
    fn dispatch(&mut self, event: ChangeEvent) { self(event) }
}

/// What the subscriber does with an event whose payload fails to decode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    /// End the subscription with `Termination::Errored`.
    #[default]
    Terminate,
    /// Log, count and continue with the next event.
    Skip,
}

impl FromStr for DecodePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "terminate" => Ok(DecodePolicy::Terminate),
            "skip" => Ok(DecodePolicy::Skip),
            other => Err(Error::Config(format!("unknown decode policy: {other:?} (expect terminate or skip)"))),
        }
    }
}

/// Upper bound (exclusive) the API server accepts for `timeoutSeconds` on a watch.
pub const MAX_WATCH_TIMEOUT_SECS: u32 = 295;

/// Options recognized by the list-watch entry points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    pub selector: Selector,
    pub kind: ResourceKind,
    pub decode_policy: DecodePolicy,
    /// Server-side watch timeout in seconds. The server ends the stream when it elapses.
    pub watch_timeout: Option<u32>,
    /// Ask the server for bookmark events.
    pub bookmarks: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            selector: Selector::namespaced("default"),
            kind: ResourceKind::Pod,
            decode_policy: DecodePolicy::Terminate,
            watch_timeout: None,
            bookmarks: true,
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> Result<()> {
        self.selector.validate()?;
        if let Some(t) = self.watch_timeout {
            if t == 0 || t >= MAX_WATCH_TIMEOUT_SECS {
                return Err(Error::Config(format!("watch timeout must be within 1..{MAX_WATCH_TIMEOUT_SECS}s (got {t})")));
            }
        }
        Ok(())
    }
}

/// Lifecycle of a single subscription.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SubscriberState {
    #[default]
    Idle,
    Subscribing,
    Streaming,
    Cancelled,
    StreamClosed,
    Errored,
}

impl SubscriberState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriberState::Cancelled | SubscriberState::StreamClosed | SubscriberState::Errored)
    }
}

/// Why a subscription ended.
#[derive(Debug)]
pub enum Termination {
    /// Cancellation signal observed.
    Cancelled,
    /// Transport ended the event stream.
    StreamClosed,
    /// Malformed payload, server error event or transport fault.
    Errored(Error),
}

impl Termination {
    pub fn state(&self) -> SubscriberState {
        match self {
            Termination::Cancelled => SubscriberState::Cancelled,
            Termination::StreamClosed => SubscriberState::StreamClosed,
            Termination::Errored(_) => SubscriberState::Errored,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Cancelled => "cancelled",
            Termination::StreamClosed => "stream_closed",
            Termination::Errored(_) => "errored",
        }
    }

    /// Graceful endings leave the process free to continue.
    pub fn is_graceful(&self) -> bool { !matches!(self, Termination::Errored(_)) }
}

/// Outcome of `Subscriber::run`, kept apart from event dispatch.
#[derive(Debug)]
pub struct WatchSummary {
    pub termination: Termination,
    /// Newest version observed (start token, dispatched items, bookmarks); resume from here.
    pub resume_version: String,
    pub dispatched: u64,
    pub skipped: u64,
}
