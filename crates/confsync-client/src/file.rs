use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::env::Environment;
use crate::error::SyncError;
use crate::value::{Value, flatten};

/// Loads and flattens the TOML file behind a logical name.
///
/// Dots in the name are path separators: `comm.app` resolves to
/// `<conf_root>/comm/app.toml`.
pub fn load(
    env: &Environment,
    name: &str,
) -> Result<BTreeMap<String, Value>, SyncError> {
    let path = file_path(env, name);
    let raw = std::fs::read_to_string(&path)
        .map_err(|source| SyncError::FileRead { path: path.clone(), source })?;
    let table: toml::Table = toml::from_str(&raw)
        .map_err(|source| SyncError::FileParse { path, source })?;

    let tree: BTreeMap<String, Value> = table
        .iter()
        .map(|(key, value)| (key.clone(), Value::from_toml(value)))
        .collect();
    Ok(flatten(&tree))
}

fn file_path(
    env: &Environment,
    name: &str,
) -> PathBuf {
    let mut path = env.conf_root().to_path_buf();
    for segment in name.split('.').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    path.set_extension("toml");
    path
}

#[cfg(test)]
mod tests {
    use super::{file_path, load};
    use crate::env::Environment;
    use crate::error::SyncError;
    use crate::value::Value;

    const FIXTURE: &str = r#"
title = "TOML Example"

[base]
int = 1
float = 1.1
bool = true
dob = 2018-05-27T07:32:00Z

[servers.alpha]
ip = "10.0.0.1"

[clients]
data = [["gamma", "delta"], [1, 2]]
"#;

    #[test]
    fn loads_and_flattens_fixture() {
        let root = crate::testutil::temp_dir("confsync-file");
        std::fs::create_dir_all(root.join("dev").join("comm")).unwrap();
        std::fs::write(
            root.join("dev").join("comm").join("app.toml"),
            FIXTURE,
        )
        .unwrap();
        let env = Environment::at(&root, "dev").unwrap();

        let flat = load(&env, "comm.app").expect("load");
        assert_eq!(
            flat["title"],
            Value::String("TOML Example".to_string())
        );
        assert_eq!(flat["base.int"], Value::Int(1));
        assert_eq!(flat["base.float"], Value::Float(1.1));
        assert_eq!(flat["base.bool"], Value::Bool(true));
        assert!(matches!(flat["base.dob"], Value::Time(_)));
        assert_eq!(
            flat["servers.alpha.ip"],
            Value::String("10.0.0.1".to_string())
        );
        assert!(matches!(flat["clients.data"], Value::Array(_)));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_file_is_an_error() {
        let root = crate::testutil::temp_dir("confsync-file");
        std::fs::create_dir_all(root.join("dev")).unwrap();
        let env = Environment::at(&root, "dev").unwrap();

        match load(&env, "comm.absent") {
            Err(SyncError::FileRead { .. }) => {}
            other => panic!("expected read error, got {other:?}"),
        }

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn name_maps_dots_to_path_segments() {
        let root = crate::testutil::temp_dir("confsync-file");
        std::fs::create_dir_all(root.join("dev")).unwrap();
        let env = Environment::at(&root, "dev").unwrap();

        assert_eq!(
            file_path(&env, "comm.app"),
            root.join("dev").join("comm").join("app.toml")
        );
        assert_eq!(
            file_path(&env, "app"),
            root.join("dev").join("app.toml")
        );

        let _ = std::fs::remove_dir_all(&root);
    }
}
