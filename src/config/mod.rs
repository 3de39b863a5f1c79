use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::common::error::ConfigError;
use crate::common::error::GResult;

/// Per-host backend alias: `{backend, url, credentials:{accessKey, secretKey}}` (EXTERNAL
/// INTERFACES, Configuration).
#[derive(Deserialize, Debug, Clone)]
pub struct HostAlias {
  pub backend: String,
  pub url: String,
  #[serde(rename = "accessKey", alias = "access_key")]
  pub access_key: String,
  #[serde(rename = "secretKey", alias = "secret_key")]
  pub secret_key: String,
}

fn default_free_memory_limit() -> u64 { 256 * (1 << 20) }
fn default_max_object_size() -> u64 { 5 * (1 << 40) }
fn default_max_file_size_for_memory() -> u64 { 50 * (1 << 20) }
fn default_timeout_secs() -> u64 { 30 }
fn default_cache_location() -> String { std::env::temp_dir().to_string_lossy().into_owned() }

#[derive(Deserialize, Debug, Clone)]
pub struct StoreConfig {
  #[serde(default)]
  pub hosts: HashMap<String, HostAlias>,

  #[serde(default = "default_cache_location")]
  pub cache_location: String,

  #[serde(default = "default_free_memory_limit", deserialize_with = "deserialize_size")]
  pub free_memory_limit: u64,

  #[serde(default = "default_max_object_size", deserialize_with = "deserialize_size")]
  pub max_object_size: u64,

  #[serde(default = "default_max_file_size_for_memory", deserialize_with = "deserialize_size")]
  pub max_file_size_for_memory: u64,

  #[serde(default = "default_timeout_secs")]
  pub read_timeout: u64,

  #[serde(default = "default_timeout_secs")]
  pub connect_timeout: u64,
}

impl Default for StoreConfig {
  fn default() -> Self {
    StoreConfig {
      hosts: HashMap::new(),
      cache_location: default_cache_location(),
      free_memory_limit: default_free_memory_limit(),
      max_object_size: default_max_object_size(),
      max_file_size_for_memory: default_max_file_size_for_memory(),
      read_timeout: default_timeout_secs(),
      connect_timeout: default_timeout_secs(),
    }
  }
}

impl StoreConfig {
  pub fn from_toml_str(raw: &str) -> GResult<StoreConfig> {
    toml::from_str(raw).map_err(|e| ConfigError::boxed(e.to_string()))
  }

  pub fn from_path(path: impl AsRef<std::path::Path>) -> GResult<StoreConfig> {
    let raw = std::fs::read_to_string(path.as_ref())
      .map_err(|e| ConfigError::boxed(format!("{}: {}", path.as_ref().display(), e)))?;
    StoreConfig::from_toml_str(&raw)
  }

  pub fn has_alias(&self, scheme: &str) -> bool {
    self.hosts.contains_key(scheme)
  }

  pub fn alias(&self, scheme: &str) -> Option<&HostAlias> {
    self.hosts.get(scheme)
  }

  pub fn read_timeout(&self) -> Duration {
    Duration::from_secs(self.read_timeout)
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_secs(self.connect_timeout)
  }
}

fn deserialize_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where D: serde::Deserializer<'de> {
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum SizeOrString {
    Size(u64),
    Text(String),
  }
  match SizeOrString::deserialize(deserializer)? {
    SizeOrString::Size(n) => Ok(n),
    SizeOrString::Text(s) => parse_size(&s).map_err(serde::de::Error::custom),
  }
}

/// Parses a decimal-power size suffix `B|kB|MB|GB|TB|PB|EB|ZB|YB` (EXTERNAL INTERFACES,
/// Configuration). Unlike binary `KiB`-style units, these use powers of 10.
pub fn parse_size(raw: &str) -> GResult<u64> {
  const UNITS: [(&str, f64); 9] = [
    ("YB", 1_000_000_000_000_000_000_000_000.0),
    ("ZB", 1_000_000_000_000_000_000_000.0),
    ("EB", 1_000_000_000_000_000_000.0),
    ("PB", 1_000_000_000_000_000.0),
    ("TB", 1_000_000_000_000.0),
    ("GB", 1_000_000_000.0),
    ("MB", 1_000_000.0),
    ("kB", 1_000.0),
    ("B", 1.0),
  ];
  let trimmed = raw.trim();
  for (suffix, scale) in UNITS {
    if let Some(number) = trimmed.strip_suffix(suffix) {
      let number = number.trim();
      let value: f64 = number.parse()
        .map_err(|_| ConfigError::boxed(format!("invalid size {:?}", raw)))?;
      return Ok((value * scale as f64) as u64);
    }
  }
  Err(ConfigError::boxed(format!("unrecognized size suffix in {:?}", raw)))
}
