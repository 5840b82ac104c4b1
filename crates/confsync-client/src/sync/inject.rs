use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::registry::Registry;
use crate::snapshot::SnapshotStore;
use crate::value::{FlatMap, Value, flatten_json};

/// The single side effect of a successful remote refresh: classify and
/// flatten the payload, replace the registry entry, persist the
/// snapshot, fire the change callback.
///
/// A snapshot write failure is logged and swallowed; by the time a
/// payload reaches this point it must not fail the session.
pub async fn apply_refresh(
    registry: &Registry,
    snapshots: &SnapshotStore,
    name: &str,
    payload: &FlatMap,
) {
    let values = flatten_json(payload);
    let object = registry.install(name, values);
    info!(
        "configuration refreshed: name={}, entries={}",
        name,
        object.len()
    );

    if let Err(err) = snapshots.save(name, payload).await {
        warn!("snapshot write failed: name={}, error={}", name, err);
    }

    registry.notify(&object);
}

/// Injection path for local sources (file loader, snapshot recovery):
/// same registry replacement and callback, no snapshot write.
pub fn apply_local(
    registry: &Registry,
    name: &str,
    values: BTreeMap<String, Value>,
) {
    let object = registry.install(name, values);
    info!(
        "configuration loaded: name={}, entries={}",
        name,
        object.len()
    );
    registry.notify(&object);
}
