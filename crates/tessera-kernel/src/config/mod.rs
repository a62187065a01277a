//! Configuration file support
//!
//! Loads settings from YAML, TOML, JSON, INI, RON or JSON5 files and writes
//! them back as TOML, JSON or YAML.
//!
//! ## Features
//!
//! - Auto-detection of format from file extension
//! - Environment variable substitution (`${VAR}` and `$VAR` syntax)
//! - Layering a file on top of in-memory defaults

use config::{Config as Cfg, File};
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::LazyLock;

pub use config::FileFormat;

static BRACED_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("braced env var pattern is valid")
});

static SIMPLE_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").expect("simple env var pattern is valid")
});

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

fn extension_of(path: &Path) -> ConfigResult<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))
}

/// Detect configuration format from file extension
///
/// # Supported Extensions
///
/// - YAML: `.yaml`, `.yml`
/// - TOML: `.toml`
/// - JSON: `.json`
/// - INI: `.ini`
/// - RON: `.ron`
/// - JSON5: `.json5`
pub fn detect_format<P: AsRef<Path>>(path: P) -> ConfigResult<FileFormat> {
    let ext = extension_of(path.as_ref())?;

    match ext.as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(ConfigError::UnsupportedFormat(ext)),
    }
}

/// Substitute environment variables in a string
///
/// Supports both `${VAR_NAME}` and `$VAR_NAME`. Unknown variables are left as written.
pub fn substitute_env_vars(content: &str) -> String {
    let result = BRACED_VAR.replace_all(content, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    });

    SIMPLE_VAR
        .replace_all(&result, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

/// Load configuration from a file
///
/// Detects the format from the file extension and substitutes environment
/// variables before parsing.
pub fn load_config<T, P>(path: P) -> ConfigResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    from_str(&content, format)
}

/// Load configuration from a string with explicit format
pub fn from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let substituted_content = substitute_env_vars(content);

    let config = Cfg::builder()
        .add_source(File::from_str(&substituted_content, format))
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

/// Load a file layered over existing values
///
/// Keys present in the file override `defaults`; everything else keeps its
/// current value.
pub fn load_over<T, P>(defaults: &T, path: P) -> ConfigResult<T>
where
    T: Serialize + DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let substituted = substitute_env_vars(&content);

    let base = serde_json::to_string(defaults)
        .map_err(|e| ConfigError::Serialization(e.to_string()))?;

    let config = Cfg::builder()
        .add_source(File::from_str(&base, FileFormat::Json))
        .add_source(File::from_str(&substituted, format))
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

/// Save configuration to a file
///
/// The output format follows the extension: `.toml`, `.json`, `.yaml`/`.yml`.
pub fn save_config<T, P>(value: &T, path: P) -> ConfigResult<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let ext = extension_of(path)?;

    let content = match ext.as_str() {
        "toml" => {
            toml::to_string_pretty(value).map_err(|e| ConfigError::Serialization(e.to_string()))?
        }
        "json" => serde_json::to_string_pretty(value)
            .map_err(|e| ConfigError::Serialization(e.to_string()))?,
        "yaml" | "yml" => {
            serde_yaml::to_string(value).map_err(|e| ConfigError::Serialization(e.to_string()))?
        }
        _ => return Err(ConfigError::UnsupportedFormat(ext)),
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(path, content)?;
    tracing::debug!("Saved configuration to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Settings {
        directory: String,
        watch: bool,
        retries: u32,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                directory: "adapters".to_string(),
                watch: true,
                retries: 3,
            }
        }
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format("config.yaml").unwrap(), FileFormat::Yaml);
        assert_eq!(detect_format("config.yml").unwrap(), FileFormat::Yaml);
        assert_eq!(detect_format("config.toml").unwrap(), FileFormat::Toml);
        assert_eq!(detect_format("config.json").unwrap(), FileFormat::Json);
        assert_eq!(detect_format("config.ini").unwrap(), FileFormat::Ini);
        assert_eq!(detect_format("config.ron").unwrap(), FileFormat::Ron);
        assert_eq!(detect_format("config.json5").unwrap(), FileFormat::Json5);
        assert!(detect_format("config.txt").is_err());
        assert!(detect_format("config").is_err());
    }

    #[test]
    fn test_from_str_toml() {
        let toml = r#"
directory = "/opt/adapters"
watch = false
retries = 5
"#;

        let settings: Settings = from_str(toml, FileFormat::Toml).unwrap();
        assert_eq!(settings.directory, "/opt/adapters");
        assert!(!settings.watch);
        assert_eq!(settings.retries, 5);
    }

    #[test]
    fn test_substitute_env_vars() {
        unsafe {
            std::env::set_var("TESSERA_TEST_ADAPTER_DIR", "/srv/adapters");
        }

        assert_eq!(
            substitute_env_vars("dir: ${TESSERA_TEST_ADAPTER_DIR}/bin"),
            "dir: /srv/adapters/bin"
        );
        assert_eq!(
            substitute_env_vars("dir: $TESSERA_TEST_ADAPTER_DIR"),
            "dir: /srv/adapters"
        );
        assert_eq!(
            substitute_env_vars("dir: ${TESSERA_TEST_UNSET_VARIABLE}"),
            "dir: ${TESSERA_TEST_UNSET_VARIABLE}"
        );
    }

    #[test]
    fn test_load_over_keeps_unset_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "watch: false\n").unwrap();

        let merged: Settings = load_over(&Settings::default(), &path).unwrap();
        assert_eq!(merged.directory, "adapters");
        assert!(!merged.watch);
        assert_eq!(merged.retries, 3);
    }

    #[test]
    fn test_save_and_load_each_format() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            directory: "/var/lib/adapters".to_string(),
            watch: false,
            retries: 7,
        };

        for name in ["settings.toml", "settings.json", "settings.yaml"] {
            let path = dir.path().join(name);
            save_config(&settings, &path).unwrap();
            let loaded: Settings = load_config(&path).unwrap();
            assert_eq!(loaded, settings, "format {}", name);
        }
    }

    #[test]
    fn test_save_unsupported_format() {
        let dir = TempDir::new().unwrap();
        let err = save_config(&Settings::default(), dir.path().join("settings.ini")).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(ext) if ext == "ini"));
    }
}
