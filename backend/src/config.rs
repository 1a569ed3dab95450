//! Runtime configuration read from the environment.
//!
//! A `.env` file in the working directory is loaded first (if present).
//!
//! | Variable                          | Default                     |
//! |-----------------------------------|-----------------------------|
//! | `CHARTFORGE_DATA_DIR`             | `.chartforge`               |
//! | `CHARTFORGE_UPLOAD_DIR`           | `<data dir>/uploads`        |
//! | `CHARTFORGE_EXPORT_DIR`           | `exports`                   |
//! | `CHARTFORGE_FETCH_TIMEOUT_SECS`   | `15`                        |
//! | `CHARTFORGE_RENDER_TIMEOUT_SECS`  | `30`                        |
//! | `CHARTFORGE_CHROME_PATH`          | auto-detected               |
//! | `CHARTFORGE_DOWNLOAD_PREFIX`      | `/api/v1/exports/download`  |
//! | `CHARTFORGE_CSV_QUOTING`          | `legacy` (or `rfc4180`)     |
//! | `CHARTFORGE_MAX_UPLOAD_MB`        | `25`                        |
//! | `PORT`                            | `3000`                      |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// How CSV exports quote values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CsvQuoting {
    /// Every value JSON-encoded and comma-joined. Embedded quotes are
    /// backslash-escaped, which RFC 4180 readers do not understand.
    #[default]
    Legacy,
    /// Standard quoting through the `csv` writer.
    Rfc4180,
}

impl FromStr for CsvQuoting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(Self::Legacy),
            "rfc4180" | "rfc-4180" => Ok(Self::Rfc4180),
            other => Err(format!("unknown CSV quoting mode '{}'", other)),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub export_dir: PathBuf,
    pub fetch_timeout: Duration,
    pub render_timeout: Duration,
    pub chrome_path: Option<PathBuf>,
    pub download_prefix: String,
    pub csv_quoting: CsvQuoting,
    pub max_upload_bytes: usize,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from(".chartforge");
        Self {
            upload_dir: data_dir.join("uploads"),
            data_dir,
            export_dir: PathBuf::from("exports"),
            fetch_timeout: Duration::from_secs(15),
            render_timeout: Duration::from_secs(30),
            chrome_path: None,
            download_prefix: "/api/v1/exports/download".to_string(),
            csv_quoting: CsvQuoting::Legacy,
            max_upload_bytes: 25 * 1024 * 1024,
            port: 3000,
        }
    }
}

impl AppConfig {
    /// Load `.env` then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Unset and blank values fall
    /// back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let data_dir = get("CHARTFORGE_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir);
        let upload_dir = get("CHARTFORGE_UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("uploads"));

        Ok(Self {
            upload_dir,
            export_dir: get("CHARTFORGE_EXPORT_DIR").map(PathBuf::from).unwrap_or(defaults.export_dir),
            fetch_timeout: parse_secs(&get, "CHARTFORGE_FETCH_TIMEOUT_SECS", defaults.fetch_timeout)?,
            render_timeout: parse_secs(&get, "CHARTFORGE_RENDER_TIMEOUT_SECS", defaults.render_timeout)?,
            chrome_path: get("CHARTFORGE_CHROME_PATH").map(PathBuf::from),
            download_prefix: get("CHARTFORGE_DOWNLOAD_PREFIX")
                .map(|p| p.trim_end_matches('/').to_string())
                .unwrap_or(defaults.download_prefix),
            csv_quoting: parse_var(&get, "CHARTFORGE_CSV_QUOTING")?.unwrap_or(defaults.csv_quoting),
            max_upload_bytes: parse_var::<usize>(&get, "CHARTFORGE_MAX_UPLOAD_MB")?
                .map(|mb| mb.saturating_mul(1024 * 1024))
                .unwrap_or(defaults.max_upload_bytes),
            port: parse_var(&get, "PORT")?.unwrap_or(defaults.port),
            data_dir,
        })
    }

    pub fn datasource_dir(&self) -> PathBuf {
        self.data_dir.join("datasources")
    }

    pub fn visualization_dir(&self) -> PathBuf {
        self.data_dir.join("visualizations")
    }

    pub fn export_record_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }
}

fn parse_var<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match get(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
    }
}

fn parse_secs(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match parse_var::<u64>(get, key)? {
        Some(0) => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: "0".to_string(),
        }),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_map(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.render_timeout, Duration::from_secs(30));
        assert_eq!(config.upload_dir, PathBuf::from(".chartforge/uploads"));
        assert_eq!(config.csv_quoting, CsvQuoting::Legacy);
        assert_eq!(config.max_upload_bytes, 25 * 1024 * 1024);
    }

    #[test]
    fn test_overrides() {
        let config = from_map(&[
            ("CHARTFORGE_DATA_DIR", "/srv/cf"),
            ("CHARTFORGE_RENDER_TIMEOUT_SECS", "5"),
            ("CHARTFORGE_CSV_QUOTING", "RFC4180"),
            ("CHARTFORGE_DOWNLOAD_PREFIX", "/files/"),
            ("PORT", "8080"),
        ])
        .unwrap();
        assert_eq!(config.upload_dir, PathBuf::from("/srv/cf/uploads"));
        assert_eq!(config.datasource_dir(), PathBuf::from("/srv/cf/datasources"));
        assert_eq!(config.render_timeout, Duration::from_secs(5));
        assert_eq!(config.csv_quoting, CsvQuoting::Rfc4180);
        assert_eq!(config.download_prefix, "/files");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = from_map(&[("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));

        assert!(from_map(&[("CHARTFORGE_RENDER_TIMEOUT_SECS", "0")]).is_err());
        assert!(from_map(&[("CHARTFORGE_CSV_QUOTING", "fancy")]).is_err());
    }
}
