use kube::core::DynamicObject;
use stitch_core::{Error, KubeObject, ResourceItem, ResourceKind, Result};

/// Turn an untyped payload into a typed [`ResourceItem`] of the expected kind.
///
/// Type metadata is checked when present; list items usually omit it.
pub fn decode(kind: ResourceKind, obj: DynamicObject) -> Result<ResourceItem> {
    if let Some(types) = obj.types.as_ref() {
        if types.kind != kind.kind() || types.api_version != kind.api_version() {
            return Err(Error::decode(kind, format!("unexpected payload type {}/{}", types.api_version, types.kind)));
        }
    }
    let raw = serde_json::to_value(obj).map_err(|e| Error::decode(kind, e.to_string()))?;
    ResourceItem::from_object(KubeObject::from_json(kind, raw)?)
}
