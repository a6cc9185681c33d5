use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::CourierConfig};

const CONFIG_FILENAME: &str = "courier.toml";

/// Load config from an explicit path.
pub fn load_config(path: &Path) -> anyhow::Result<CourierConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./courier.toml` (project-local)
/// 2. `~/.config/courier/courier.toml` (user-global)
///
/// Returns `CourierConfig::default()` if no config file is found or the
/// found file fails to parse.
pub fn discover_and_load() -> CourierConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return CourierConfig::default();
    };
    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            CourierConfig::default()
        },
    }
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }

    if let Some(dirs) = directories::ProjectDirs::from("", "", "courier") {
        let global = dirs.config_dir().join(CONFIG_FILENAME);
        if global.exists() {
            return Some(global);
        }
    }

    None
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::io::Write, tempfile::TempDir};

    fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("courier.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_full_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
            [api]
            token = "1:abc"
            poll_timeout_secs = 10

            [pipeline]
            max_workers = 3
            batch_threshold = 10

            [storage]
            data_dir = "/tmp/courier-test"
            "#,
        );

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.api.poll_timeout_secs, 10);
        assert_eq!(cfg.pipeline.max_workers, 3);
        assert_eq!(
            cfg.storage.data_dir.as_deref(),
            Some(Path::new("/tmp/courier-test"))
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(load_config(&dir.path().join("courier.toml")).is_err());
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "not [valid");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn unresolved_placeholder_stays_literal() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
            [api]
            endpoint = "${COURIER_LOADER_TEST_UNSET}"
            "#,
        );

        let cfg = load_config(&path).unwrap();
        assert_eq!(
            cfg.api.endpoint.as_deref(),
            Some("${COURIER_LOADER_TEST_UNSET}")
        );
    }
}
