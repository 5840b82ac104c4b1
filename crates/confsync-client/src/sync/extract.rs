use crate::value::FlatMap;

/// Normalizes the center's `configs` list into a flat key/value map.
///
/// Only items shaped `{"config": {"key": <string>, "value": <any>}}`
/// contribute; anything else is skipped silently. Duplicate keys keep
/// the last occurrence in server order.
pub fn extract_kv(configs: &[serde_json::Value]) -> FlatMap {
    let mut out = FlatMap::new();
    for item in configs {
        let Some(config) =
            item.get("config").and_then(serde_json::Value::as_object)
        else {
            continue;
        };
        let Some(key) =
            config.get("key").and_then(serde_json::Value::as_str)
        else {
            continue;
        };
        let Some(value) = config.get("value") else {
            continue;
        };
        out.insert(key.to_string(), value.clone());
    }
    out
}
