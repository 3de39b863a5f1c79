use std::path::PathBuf;
use url::Url;

use crate::common::error::GResult;
use crate::common::error::LocatorError;
use crate::common::error::UrlParseFilePathError;
use crate::config::StoreConfig;

/// A parsed backing-object identifier: either a remote `scheme://host[:port]/bucket/key…`
/// or a plain filesystem path, per EXTERNAL INTERFACES.
#[derive(Debug, Clone)]
pub enum Locator {
  Local {
    path: String,
  },
  Remote {
    alias: String,
    bucket: String,
    key: String,
    url: Url,
  },
}

impl Locator {
  pub fn parse(raw: &str, config: &StoreConfig) -> GResult<Locator> {
    match Url::parse(raw) {
      Ok(url) if config.has_alias(url.scheme()) => {
        let mut segments = url.path_segments()
          .ok_or_else(|| LocatorError::boxed(raw, "remote locator requires a bucket segment"))?;
        let bucket = segments.next()
          .ok_or_else(|| LocatorError::boxed(raw, "remote locator requires a bucket segment"))?
          .to_string();
        let key = itertools::Itertools::intersperse(segments, "/").collect::<String>();
        Ok(Locator::Remote { alias: url.scheme().to_string(), bucket, key, url })
      }
      Ok(url) if url.scheme() == "file" => {
        Ok(Locator::Local { path: url.path().to_string() })
      }
      // unrecognized scheme without a matching alias: fall back to treating it as local,
      // per "everything else is treated as local" (EXTERNAL INTERFACES, Locator syntax).
      _ => Ok(Locator::Local { path: raw.to_string() }),
    }
  }

  pub fn is_remote(&self) -> bool {
    matches!(self, Locator::Remote { .. })
  }

  /// The `Url` addressing the dataset's top-level container itself.
  pub fn container_url(&self) -> GResult<Url> {
    match self {
      Locator::Local { path } => Url::from_file_path(path).map_err(|_| Box::new(UrlParseFilePathError) as crate::common::error::GenericError),
      Locator::Remote { url, .. } => Ok(url.clone()),
    }
  }

  /// Basename used to derive deterministic partition file names (§4.1 Partition naming).
  pub fn basename(&self) -> String {
    let raw = match self {
      Locator::Local { path } => path.clone(),
      Locator::Remote { key, .. } => key.clone(),
    };
    PathBuf::from(&raw).file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or(raw)
  }

  /// A `Url` for a path relative to this locator's parent directory (or bucket, for remote).
  pub fn sibling(&self, relative: &str) -> GResult<Url> {
    match self {
      Locator::Local { path } => {
        let parent = PathBuf::from(path).parent().map(|p| p.to_path_buf()).unwrap_or_else(|| PathBuf::from("."));
        Url::from_file_path(parent.join(relative)).map_err(|_| Box::new(UrlParseFilePathError) as crate::common::error::GenericError)
      }
      Locator::Remote { bucket, url, .. } => {
        let mut sibling_url = url.clone();
        sibling_url.set_path(&format!("/{}/{}", bucket, relative));
        Ok(sibling_url)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::HostAlias;
  use std::collections::HashMap;

  fn config_with_alias(alias: &str) -> StoreConfig {
    let mut hosts = HashMap::new();
    hosts.insert(alias.to_string(), HostAlias {
      backend: "s3".to_string(),
      url: "http://localhost:9000".to_string(),
      access_key: "k".to_string(),
      secret_key: "s".to_string(),
    });
    StoreConfig { hosts, ..StoreConfig::default() }
  }

  #[test]
  fn plain_path_is_local() -> GResult<()> {
    let config = StoreConfig::default();
    let locator = Locator::parse("/data/foo.nc", &config)?;
    assert!(!locator.is_remote());
    Ok(())
  }

  #[test]
  fn file_scheme_is_local() -> GResult<()> {
    let config = StoreConfig::default();
    let locator = Locator::parse("file:///data/foo.nc", &config)?;
    assert!(!locator.is_remote());
    Ok(())
  }

  #[test]
  fn aliased_scheme_is_remote() -> GResult<()> {
    let config = config_with_alias("myminio");
    let locator = Locator::parse("myminio://host/bucket/key/path.nc", &config)?;
    match locator {
      Locator::Remote { alias, bucket, key, .. } => {
        assert_eq!(alias, "myminio");
        assert_eq!(bucket, "bucket");
        assert_eq!(key, "key/path.nc");
      }
      Locator::Local { .. } => panic!("expected remote locator"),
    }
    Ok(())
  }

  #[test]
  fn unrecognized_scheme_falls_back_to_local() -> GResult<()> {
    let config = StoreConfig::default();
    let locator = Locator::parse("unknownscheme://host/bucket/key", &config)?;
    assert!(!locator.is_remote());
    Ok(())
  }

  #[test]
  fn basename_strips_directory_and_extension() -> GResult<()> {
    let config = StoreConfig::default();
    let locator = Locator::parse("/data/weather.nc", &config)?;
    assert_eq!(locator.basename(), "weather");
    Ok(())
  }

  #[test]
  fn sibling_local_joins_parent_directory() -> GResult<()> {
    let config = StoreConfig::default();
    let locator = Locator::parse("/data/weather.nc", &config)?;
    let sibling = locator.sibling("weather/weather.x.0.nc")?;
    assert!(sibling.path().ends_with("/data/weather/weather.x.0.nc"));
    Ok(())
  }

  #[test]
  fn sibling_remote_preserves_bucket() -> GResult<()> {
    let config = config_with_alias("myminio");
    let locator = Locator::parse("myminio://host/bucket/key/path.nc", &config)?;
    let sibling = locator.sibling("weather/weather.x.0.nc")?;
    assert_eq!(sibling.path(), "/bucket/weather/weather.x.0.nc");
    Ok(())
  }
}
