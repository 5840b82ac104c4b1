use std::env;
use std::path::{Path, PathBuf};

use crate::error::SyncError;

/// Profile selector, e.g. `dev`, `test`, `product`.
pub const ENV_PROFILE: &str = "CONFIG_ENV";
/// Root directory holding one subdirectory per profile.
pub const ENV_CONF_PATH: &str = "CONFIG_PATH";

const DEFAULT_PROFILE: &str = "dev";

/// Resolved process environment: which profile is active and where its
/// configuration tree lives. Read-only after construction.
#[derive(Debug, Clone)]
pub struct Environment {
    profile: String,
    conf_root: PathBuf,
}

impl Environment {
    /// Builds the environment from `CONFIG_ENV` and `CONFIG_PATH`.
    ///
    /// The configuration root must already exist; a missing tree is a
    /// startup failure the caller is expected to treat as fatal.
    pub fn from_env() -> Result<Self, SyncError> {
        let profile =
            non_empty_env(ENV_PROFILE).unwrap_or_else(|| DEFAULT_PROFILE.to_string());
        let root = non_empty_env(ENV_CONF_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(default_conf_path);
        Self::at(root, &profile)
    }

    /// Builds the environment against an explicit root, validating that
    /// `<root>/<profile>` is a directory.
    pub fn at(
        root: impl Into<PathBuf>,
        profile: &str,
    ) -> Result<Self, SyncError> {
        let root = root.into();
        let conf_root = root.join(profile);
        if !conf_root.is_dir() {
            return Err(SyncError::Env(format!(
                "{} is not a directory",
                conf_root.display()
            )));
        }
        Ok(Self { profile: profile.to_string(), conf_root })
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Profile-scoped configuration root, `<CONFIG_PATH>/<profile>`.
    pub fn conf_root(&self) -> &Path {
        &self.conf_root
    }
}

fn default_conf_path() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("C:/confsync")
    } else {
        PathBuf::from("/var/confsync")
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
    })
}

#[cfg(test)]
mod tests {
    use super::Environment;
    use crate::error::SyncError;

    #[test]
    fn at_rejects_missing_profile_dir() {
        let missing = std::env::temp_dir().join("confsync-no-such-root");
        match Environment::at(missing, "dev") {
            Err(SyncError::Env(_)) => {}
            other => panic!("expected env error, got {other:?}"),
        }
    }

    #[test]
    fn at_resolves_profile_subdirectory() {
        let root = crate::testutil::temp_dir("confsync-env");
        std::fs::create_dir_all(root.join("test")).unwrap();

        let env = Environment::at(&root, "test").expect("environment");
        assert_eq!(env.profile(), "test");
        assert_eq!(env.conf_root(), root.join("test"));

        let _ = std::fs::remove_dir_all(&root);
    }
}
