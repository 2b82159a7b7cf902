use crate::Config;
use anyhow::{Context, Result};
use jsonc_parser::{parse_to_serde_value, ParseOptions};
use regex::Regex;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

const PROJECT_FILES: [&str; 4] = [
    "gatesync.jsonc",
    "gatesync.json",
    ".gatesync/gatesync.jsonc",
    ".gatesync/gatesync.json",
];

static ENV_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{env:([^}]+)\}").expect("env substitution pattern is a valid regex")
});

/// Merges config layers; each load call wins over the ones before it. The
/// usual order, lowest precedence first:
/// 1. Global config (`<config_dir>/gatesync/gatesync.json{c,}`)
/// 2. Project config (`gatesync.json{c,}`, `.gatesync/gatesync.json{c,}`)
/// 3. Custom config file (`GATESYNC_CONFIG`)
/// 4. Environment overrides (`GATESYNC_GATEWAY_URL`, `GATESYNC_LOG_LEVEL`)
/// 5. In-memory layers such as command-line flags
pub struct ConfigLoader {
    config: Config,
    config_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            config_paths: Vec::new(),
        }
    }

    pub fn load_from_str(&mut self, content: &str) -> Result<()> {
        let config = parse_jsonc(content).with_context(|| "Failed to parse config content")?;
        self.config.merge(config);
        Ok(())
    }

    /// Merges an in-memory layer, e.g. command-line flags.
    pub fn merge_layer(&mut self, layer: Config) {
        self.config.merge(layer);
    }

    /// Merges one JSONC file. A missing file is not an error.
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let content = substitute_env_vars(&content);

        let config = parse_jsonc(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        tracing::debug!(path = %path.display(), "loaded config file");
        self.config.merge(config);
        self.config_paths.push(path.to_path_buf());
        Ok(())
    }

    pub fn load_global(&mut self) -> Result<()> {
        let global_config_path = get_global_config_path();

        for ext in &["jsonc", "json"] {
            let path = global_config_path.with_extension(ext);
            if path.exists() {
                self.load_from_file(&path)?;
                break;
            }
        }

        Ok(())
    }

    pub fn load_project<P: AsRef<Path>>(&mut self, project_dir: P) -> Result<()> {
        let project_dir = project_dir.as_ref();
        for target in PROJECT_FILES {
            self.load_from_file(project_dir.join(target))?;
        }
        Ok(())
    }

    pub fn load_from_env(&mut self) -> Result<()> {
        if let Ok(config_path) = env::var("GATESYNC_CONFIG") {
            self.load_from_file(&config_path)?;
        }

        Ok(())
    }

    /// Applies single-value overrides through `lookup` (normally the process
    /// environment).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = non_empty("GATESYNC_GATEWAY_URL") {
            self.config.gateway_url = Some(url.trim().to_string());
        }
        if let Some(level) = non_empty("GATESYNC_LOG_LEVEL") {
            self.config.log_level = Some(level.trim().to_string());
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_paths(&self) -> &[PathBuf] {
        &self.config_paths
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn get_global_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("gatesync/gatesync")
}

/// Substitute `{env:VAR}` patterns with environment variable values.
/// Works on the raw JSONC text before parsing.
fn substitute_env_vars(text: &str) -> String {
    ENV_PATTERN
        .replace_all(text, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .to_string()
}

fn parse_jsonc(content: &str) -> Result<Config> {
    let parse_options = ParseOptions {
        allow_trailing_commas: true,
        ..Default::default()
    };
    let parsed = parse_to_serde_value(content, &parse_options)
        .with_context(|| "Failed to parse JSONC")?
        .context("Config content is empty")?;
    serde_json::from_value(parsed).with_context(|| "Failed to parse config JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn test_load_from_str_accepts_comments_and_trailing_commas() {
        let mut loader = ConfigLoader::new();
        loader
            .load_from_str(
                r#"{
                    // local gateway
                    "gatewayUrl": "ws://localhost:9000/ws",
                    "reconnectDelayMs": 1500,
                }"#,
            )
            .unwrap();

        assert_eq!(
            loader.config().gateway_url.as_deref(),
            Some("ws://localhost:9000/ws")
        );
        assert_eq!(loader.config().reconnect_delay_ms, Some(1500));
    }

    #[test]
    fn test_load_from_str_rejects_empty_content() {
        let mut loader = ConfigLoader::new();
        assert!(loader.load_from_str("").is_err());
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = ConfigLoader::new();
        loader.load_from_file(dir.path().join("absent.json")).unwrap();
        assert!(loader.config_paths().is_empty());
        assert_eq!(loader.config(), &Config::default());
    }

    #[test]
    fn test_project_files_merge_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("gatesync.jsonc"),
            r#"{ "gatewayUrl": "ws://first/ws", "heartbeatIntervalMs": 2000 }"#,
        )
        .unwrap();
        fs::create_dir_all(dir.path().join(".gatesync")).unwrap();
        fs::write(
            dir.path().join(".gatesync/gatesync.json"),
            r#"{ "gatewayUrl": "ws://second/ws" }"#,
        )
        .unwrap();

        let mut loader = ConfigLoader::new();
        loader.load_project(dir.path()).unwrap();

        assert_eq!(loader.config_paths().len(), 2);
        let resolved = loader.config().resolve().unwrap();
        assert_eq!(resolved.gateway_url, "ws://second/ws");
        assert_eq!(resolved.heartbeat_interval, Duration::from_millis(2000));
    }

    #[test]
    fn test_malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gatesync.json");
        fs::write(&path, "{ \"gatewayUrl\": ").unwrap();

        let mut loader = ConfigLoader::new();
        let err = loader.load_from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("gatesync.json"));
    }

    #[test]
    fn test_overrides_win_and_ignore_blank_values() {
        let mut loader = ConfigLoader::new();
        loader
            .load_from_str(r#"{ "gatewayUrl": "ws://file/ws", "logLevel": "warn" }"#)
            .unwrap();

        let env: HashMap<&str, &str> = [
            ("GATESYNC_GATEWAY_URL", " wss://env/ws "),
            ("GATESYNC_LOG_LEVEL", "   "),
        ]
        .into_iter()
        .collect();
        loader.apply_overrides(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(loader.config().gateway_url.as_deref(), Some("wss://env/ws"));
        assert_eq!(loader.config().log_level.as_deref(), Some("warn"));
    }

    #[test]
    fn test_merge_layer_wins_over_files() {
        let mut loader = ConfigLoader::new();
        loader
            .load_from_str(r#"{ "gatewayUrl": "ws://file/ws" }"#)
            .unwrap();
        loader.merge_layer(Config {
            gateway_url: Some("ws://flag/ws".to_string()),
            ..Config::default()
        });
        assert_eq!(loader.config().gateway_url.as_deref(), Some("ws://flag/ws"));
    }

    #[test]
    fn test_substitute_env_vars_blanks_unknown_variables() {
        let text = r#"{ "gatewayUrl": "{env:GATESYNC_TEST_SURELY_UNSET_VAR}" }"#;
        assert_eq!(substitute_env_vars(text), r#"{ "gatewayUrl": "" }"#);
    }
}
