//! Configuration loading, saving, and environment overrides.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::schema::ChatConfig;
use crate::utils::helpers::get_data_path;

/// Default configuration file path (`~/.chatling/config.json`).
pub fn get_config_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".chatling").join("config.json")
}

/// The chatling data directory (delegates to `utils::helpers::get_data_path`).
pub fn get_data_dir() -> PathBuf {
    get_data_path()
}

/// Load configuration from a file, or return a default [`ChatConfig`] if the
/// file does not exist or cannot be parsed.
///
/// If `config_path` is `None`, the default path (`~/.chatling/config.json`)
/// is used.
pub fn load_config(config_path: Option<&Path>) -> ChatConfig {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => get_config_path(),
    };

    if path.exists() {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<ChatConfig>(&contents) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        "Failed to parse config from {}: {}. Using default configuration.",
                        path.display(),
                        e
                    );
                }
            },
            Err(e) => {
                warn!(
                    "Failed to read config from {}: {}. Using default configuration.",
                    path.display(),
                    e
                );
            }
        }
    }

    ChatConfig::default()
}

/// Save configuration to a JSON file.
///
/// If `config_path` is `None`, the default path (`~/.chatling/config.json`)
/// is used. Parent directories are created if they don't exist.
pub fn save_config(config: &ChatConfig, config_path: Option<&Path>) {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => get_config_path(),
    };

    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    match serde_json::to_string_pretty(config) {
        Ok(json) => {
            if let Err(e) = fs::write(&path, json) {
                warn!("Failed to write config to {}: {}", path.display(), e);
            }
        }
        Err(e) => {
            warn!("Failed to serialize config: {}", e);
        }
    }
}

/// Apply `CHATLING_*` environment variable overrides on top of a loaded
/// config.
///
/// The variable-to-field mapping is a fixed, explicit table. Malformed
/// numeric values warn and keep the previous value.
pub fn apply_env_overrides(config: &mut ChatConfig) {
    apply_env_from(config, |name| std::env::var(name).ok());
}

fn apply_env_from(config: &mut ChatConfig, get: impl Fn(&str) -> Option<String>) {
    if let Some(v) = get("CHATLING_API_KEY") {
        config.api_key = v;
    }
    if let Some(v) = get("CHATLING_API_BASE") {
        config.api_base = Some(v);
    }
    if let Some(v) = get("CHATLING_MODEL") {
        config.model = v;
    }
    if let Some(v) = get("CHATLING_INSTRUCTIONS") {
        config.system_prompt = v;
    }
    if let Some(v) = get("CHATLING_USER") {
        config.user = Some(v);
    }
    if let Some(v) = get("CHATLING_TOOLS") {
        config.tools = v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Some(v) = get("CHATLING_TEMP") {
        match v.parse::<f64>() {
            Ok(t) => config.temperature = t,
            Err(_) => warn!("Ignoring malformed CHATLING_TEMP: {:?}", v),
        }
    }
    if let Some(v) = get("CHATLING_MAX_TOKENS") {
        match v.parse::<u32>() {
            Ok(n) => config.max_tokens = n,
            Err(_) => warn!("Ignoring malformed CHATLING_MAX_TOKENS: {:?}", v),
        }
    }
    if let Some(v) = get("CHATLING_MAX_ITERATIONS") {
        match v.parse::<u32>() {
            Ok(n) => config.max_iterations = n,
            Err(_) => warn!("Ignoring malformed CHATLING_MAX_ITERATIONS: {:?}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let path = Path::new("/tmp/chatling_test_does_not_exist_987654.json");
        let cfg = load_config(Some(path));
        assert_eq!(cfg.model, "gpt-4o-mini");
        assert_eq!(cfg.max_iterations, 10);
    }

    #[test]
    fn test_load_and_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut cfg = ChatConfig::default();
        cfg.api_key = "sk-roundtrip".to_string();
        cfg.max_iterations = 7;
        save_config(&cfg, Some(&path));

        let loaded = load_config(Some(&path));
        assert_eq!(loaded.api_key, "sk-roundtrip");
        assert_eq!(loaded.max_iterations, 7);
    }

    #[test]
    fn test_load_unparsable_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ nope").unwrap();

        let cfg = load_config(Some(&path));
        assert_eq!(cfg.model, "gpt-4o-mini");
    }

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_env_overrides_applied() {
        let vars = env(&[
            ("CHATLING_API_KEY", "sk-env"),
            ("CHATLING_MODEL", "m-env"),
            ("CHATLING_TEMP", "0.5"),
            ("CHATLING_MAX_ITERATIONS", "2"),
            ("CHATLING_TOOLS", "shell, repo,"),
        ]);

        let mut cfg = ChatConfig::default();
        apply_env_from(&mut cfg, |name| vars.get(name).cloned());

        assert_eq!(cfg.api_key, "sk-env");
        assert_eq!(cfg.model, "m-env");
        assert_eq!(cfg.temperature, 0.5);
        assert_eq!(cfg.max_iterations, 2);
        assert_eq!(cfg.tools, ["shell", "repo"]);
    }

    #[test]
    fn test_env_malformed_numbers_keep_previous() {
        let vars = env(&[
            ("CHATLING_TEMP", "warm"),
            ("CHATLING_MAX_TOKENS", "lots"),
        ]);

        let mut cfg = ChatConfig::default();
        cfg.temperature = 0.7;
        apply_env_from(&mut cfg, |name| vars.get(name).cloned());

        assert_eq!(cfg.temperature, 0.7);
        assert_eq!(cfg.max_tokens, 4096);
    }

    #[test]
    fn test_env_unset_leaves_config_untouched() {
        let mut cfg = ChatConfig::default();
        cfg.api_key = "sk-file".to_string();
        apply_env_from(&mut cfg, |_| None);
        assert_eq!(cfg.api_key, "sk-file");
    }
}
