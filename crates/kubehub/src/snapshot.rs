use std::collections::HashSet;

use metrics::counter;
use stitch_core::{Error, ResourceKind, Result, Selector, Snapshot};
use tracing::debug;

use crate::{decode, ListerWatcher};

/// List every object matching `selector` and the collection version the listing reflects.
///
/// Any transport or decode failure fails the whole call; no partial snapshot is returned.
pub async fn list_snapshot<L>(lw: &L, selector: &Selector, kind: ResourceKind) -> Result<Snapshot>
where
    L: ListerWatcher + ?Sized,
{
    selector.validate()?;
    let raw = lw.list(selector).await?;
    let version = match raw.resource_version {
        Some(v) if !v.is_empty() => v,
        _ => return Err(Error::decode(kind, "list response carries no resourceVersion")),
    };

    let mut seen = HashSet::with_capacity(raw.items.len());
    let mut items = Vec::with_capacity(raw.items.len());
    for obj in raw.items {
        let item = decode(kind, obj)?;
        if !seen.insert(item.object_ref()) {
            return Err(Error::decode(kind, format!("duplicate object {} in list response", item.object_ref())));
        }
        items.push(item);
    }

    counter!("stitch_list_total", 1u64, "kind" => kind.plural());
    debug!(%kind, ns = ?selector.namespace, count = items.len(), version = %version, "snapshot listed");
    Ok(Snapshot { items, version })
}
