use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    api: ApiConfig,
    storage: StorageConfig,
    generation: GenerationConfig,
    output: OutputConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ApiConfig {
    key: Option<String>,
    url: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct StorageConfig {
    backend: String,
    data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            data_dir: "data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct GenerationConfig {
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct OutputConfig {
    dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "output".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Checked only when a request is sent, so history commands work without it.
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub model: Option<String>,
    pub storage_backend: String,
    pub data_dir: PathBuf,
    pub generation_timeout: Option<Duration>,
    pub output_dir: PathBuf,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config_file: ConfigFile =
            toml::from_str(&content).context("Failed to parse config file")?;

        Ok(Self::resolve(config_file, std::env::var(API_KEY_ENV).ok()))
    }

    fn resolve(config_file: ConfigFile, env_key: Option<String>) -> Self {
        let present = |k: &String| !k.trim().is_empty();
        let api_key = env_key
            .filter(present)
            .or(config_file.api.key.filter(present));

        Self {
            api_key,
            api_url: config_file.api.url,
            model: config_file.api.model,
            storage_backend: config_file.storage.backend,
            data_dir: config_file.storage.data_dir.into(),
            generation_timeout: config_file
                .generation
                .timeout_secs
                .map(Duration::from_secs),
            output_dir: config_file.output.dir.into(),
        }
    }

    /// An explicit path must exist; the implicit `config.toml` may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::resolve(
                        ConfigFile::default(),
                        std::env::var(API_KEY_ENV).ok(),
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> ConfigFile {
        toml::from_str(toml_text).unwrap()
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config = Config::resolve(parse("[api]\nkey = \"abc\"\n"), None);
        assert_eq!(config.api_key.as_deref(), Some("abc"));
        assert_eq!(config.storage_backend, "sqlite");
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.generation_timeout, None);
        assert_eq!(config.model, None);
    }

    #[test]
    fn env_key_wins_over_file() {
        let file = parse(
            "[api]\nkey = \"from-file\"\nmodel = \"m\"\n[generation]\ntimeout_secs = 90\n[storage]\nbackend = \"memory\"\n",
        );
        let config = Config::resolve(file, Some("from-env".into()));
        assert_eq!(config.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.model.as_deref(), Some("m"));
        assert_eq!(config.generation_timeout, Some(Duration::from_secs(90)));
        assert_eq!(config.storage_backend, "memory");
    }

    #[test]
    fn missing_key_still_loads() {
        assert_eq!(Config::resolve(ConfigFile::default(), None).api_key, None);
        let blank_env = Config::resolve(parse("[api]\nkey = \"file\"\n"), Some("  ".into()));
        assert_eq!(blank_env.api_key.as_deref(), Some("file"));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("typo.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn explicit_path_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[output]\ndir = \"renders\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("renders"));
    }
}
