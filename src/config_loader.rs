use serde::{Deserialize, Deserializer, Serialize};
use std::fs::File;
use serde_yaml;
use anyhow::{anyhow, Result};
use dotenvy::dotenv;
use std::env;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "math_assist.yaml";

// -------------------- Serial (sensor) config --------------------

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SerialSettings {
    pub baud_rate: u32,
    // Sent with a trailing newline right after the port opens
    pub start_command: String,
    pub ack_reply: String,
    pub read_delay_ms: u64,
    // Poll timeout of the port; timeouts are retried so reads still block until data arrives
    pub read_timeout_ms: u64,
    pub label_queue_depth: usize,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            start_command: "STREAM".to_string(),
            ack_reply: "OK".to_string(),
            read_delay_ms: 10,
            read_timeout_ms: 500,
            label_queue_depth: 16,
        }
    }
}

// -------------------- Chat-completion service config --------------------

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServiceSettings {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            request_timeout_secs: 180,
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ModelSettings {
    pub model: String,
    pub reasoning_effort: Option<String>,
    pub store: bool,
}

/// A `reasoner:` or `hint:` section as written in the file; absent keys fall back to
/// that section's own defaults
#[derive(Debug, Deserialize, Default)]
struct ModelSection {
    model: Option<String>,
    // An empty string turns the reasoning effort off
    reasoning_effort: Option<String>,
    store: Option<bool>,
}

impl ModelSection {
    fn over(self, defaults: ModelSettings) -> ModelSettings {
        let reasoning_effort = match self.reasoning_effort {
            Some(effort) if effort.trim().is_empty() => None,
            Some(effort) => Some(effort),
            None => defaults.reasoning_effort,
        };
        ModelSettings {
            model: self.model.unwrap_or(defaults.model),
            reasoning_effort,
            store: self.store.unwrap_or(defaults.store),
        }
    }
}

fn reasoner_section<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<ModelSettings, D::Error> {
    let section = Option::<ModelSection>::deserialize(deserializer)?.unwrap_or_default();
    Ok(section.over(ModelSettings::reasoner_default()))
}

fn hint_section<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<ModelSettings, D::Error> {
    let section = Option::<ModelSection>::deserialize(deserializer)?.unwrap_or_default();
    Ok(section.over(ModelSettings::hint_default()))
}

impl ModelSettings {
    pub fn reasoner_default() -> Self {
        Self {
            model: "o3-mini".to_string(),
            reasoning_effort: Some("medium".to_string()),
            store: false,
        }
    }

    pub fn hint_default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            reasoning_effort: None,
            store: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default = "ModelSettings::reasoner_default", deserialize_with = "reasoner_section")]
    pub reasoner: ModelSettings,
    #[serde(default = "ModelSettings::hint_default", deserialize_with = "hint_section")]
    pub hint: ModelSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            service: ServiceSettings::default(),
            reasoner: ModelSettings::reasoner_default(),
            hint: ModelSettings::hint_default(),
        }
    }
}

/// Default location: math_assist.yaml next to Cargo.toml, unless MATH_ASSIST_CONFIG points elsewhere
pub fn default_config_path() -> PathBuf {
    let _ = dotenv();
    match env::var("MATH_ASSIST_CONFIG") {
        Ok(p) if !p.trim().is_empty() => PathBuf::from(p.trim()),
        _ => PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(CONFIG_FILE_NAME),
    }
}

/// Load config from an explicit path. A missing file is an error here.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let file = File::open(path)
        .map_err(|e| anyhow!("Missing required {:?}: {}", path, e))?;
    let config: AppConfig = serde_yaml::from_reader(file)
        .map_err(|e| anyhow!("Invalid config in {:?}: {}", path, e))?;
    validate(&config)?;
    log::info!(target: "config_loader", "Loaded {:?}: baud={}, reasoner={}, hint={}",
               path, config.serial.baud_rate, config.reasoner.model, config.hint.model);
    Ok(config)
}

/// Load the config named on the command line, or the default file.
/// Only the default file may be absent, in which case built-in defaults apply.
pub fn load_config_or_default(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    let path = default_config_path();
    if path.exists() {
        load_config(&path)
    } else {
        log::info!(target: "config_loader", "No {:?}; using built-in defaults", path);
        Ok(AppConfig::default())
    }
}

fn validate(config: &AppConfig) -> Result<()> {
    if config.serial.baud_rate == 0 {
        return Err(anyhow!("serial.baud_rate must be greater than zero"));
    }
    if config.serial.label_queue_depth == 0 {
        return Err(anyhow!("serial.label_queue_depth must be at least 1"));
    }
    if config.serial.start_command.trim().is_empty() {
        return Err(anyhow!("serial.start_command must not be empty"));
    }
    if config.reasoner.model.trim().is_empty() || config.hint.model.trim().is_empty() {
        return Err(anyhow!("reasoner.model and hint.model must not be empty"));
    }
    Ok(())
}

// -------------------- Environment pre-fill --------------------

/// Values read from the environment (or .env) to pre-fill operator fields
#[derive(Debug, Clone, Default)]
pub struct EnvDefaults {
    pub api_key: Option<String>,
    pub port: Option<String>,
}

impl EnvDefaults {
    pub fn from_env() -> Self {
        // Ensure .env is loaded once here so all env-based config is centralized
        let _ = dotenv();

        let api_key = env::var("OPENAI_API_KEY").ok().filter(|s| !s.trim().is_empty());
        let port = env::var("MATH_ASSIST_PORT").ok().filter(|s| !s.trim().is_empty());

        log::debug!(target: "config_loader", "EnvDefaults: api_key={}, port={:?}",
                    if api_key.is_some() { "set" } else { "unset" }, port);

        Self { api_key, port }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_yaml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_yaml("serial:\n  read_delay_ms: 25\nhint:\n  model: gpt-4o\n");
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.serial.read_delay_ms, 25);
        assert_eq!(cfg.serial.baud_rate, 115200);
        assert_eq!(cfg.serial.start_command, "STREAM");
        assert_eq!(cfg.hint.model, "gpt-4o");
        assert!(cfg.hint.store);
        assert_eq!(cfg.hint.reasoning_effort, None);
        assert_eq!(cfg.reasoner, ModelSettings::reasoner_default());
    }

    #[test]
    fn test_partial_model_sections_keep_their_own_defaults() {
        let file = write_yaml("hint:\n  model: gpt-4o\nreasoner:\n  model: o1\n");
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.reasoner.model, "o1");
        assert_eq!(cfg.reasoner.reasoning_effort.as_deref(), Some("medium"));
        assert!(!cfg.reasoner.store);
        assert_eq!(cfg.hint.model, "gpt-4o");
        assert!(cfg.hint.store);
    }

    #[test]
    fn test_model_section_without_model_keeps_default_model() {
        let file = write_yaml("hint:\n  store: false\nreasoner:\n  reasoning_effort: \"\"\n");
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.hint.model, "gpt-4o-mini");
        assert!(!cfg.hint.store);
        assert_eq!(cfg.reasoner.model, "o3-mini");
        assert_eq!(cfg.reasoner.reasoning_effort, None);
    }

    #[test]
    fn test_empty_model_section_is_all_defaults() {
        let file = write_yaml("hint:\nreasoner:\n");
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.hint, ModelSettings::hint_default());
        assert_eq!(cfg.reasoner, ModelSettings::reasoner_default());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(load_config_or_default(Some(&missing)).is_err());
    }

    #[test]
    fn test_zero_baud_rejected() {
        let file = write_yaml("serial:\n  baud_rate: 0\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_shipped_config_parses() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(CONFIG_FILE_NAME);
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.serial.baud_rate, 115200);
        assert_eq!(cfg.reasoner.reasoning_effort.as_deref(), Some("medium"));
        assert!(cfg.hint.store);
    }
}
