use derive_more::Display;
use std::error::Error;

pub type GenericError = Box<dyn Error + Send + Sync>;
pub type GResult<T> = Result<T, GenericError>;


/* Locator / URL parsing */

#[derive(Display, Debug, Clone)]
pub struct UrlParseFilePathError;
impl Error for UrlParseFilePathError {}
unsafe impl Send for UrlParseFilePathError {}
unsafe impl Sync for UrlParseFilePathError {}

#[derive(Display, Debug, Clone)]
#[display(fmt = "Failed to parse locator {}: {}", locator, reason)]
pub struct LocatorError {
  locator: String,
  reason: String,
}
impl LocatorError {
  pub fn boxed(locator: impl Into<String>, reason: impl Into<String>) -> GenericError {
    Box::new(LocatorError { locator: locator.into(), reason: reason.into() })
  }
}
impl Error for LocatorError {}
unsafe impl Send for LocatorError {}
unsafe impl Sync for LocatorError {}


/* Configuration */

#[derive(Display, Debug, Clone)]
#[display(fmt = "Invalid configuration: {}", reason)]
pub struct ConfigError {
  reason: String,
}
impl ConfigError {
  pub fn boxed(reason: impl Into<String>) -> GenericError {
    Box::new(ConfigError { reason: reason.into() })
  }
}
impl Error for ConfigError {}
unsafe impl Send for ConfigError {}
unsafe impl Sync for ConfigError {}


/* Backend errors */

#[derive(Display, Debug, Clone)]
#[display(fmt = "I/O failure at {}: {}", locator, reason)]
pub struct BackendIOError {
  pub locator: String,
  reason: String,
}
impl BackendIOError {
  pub fn boxed(locator: impl Into<String>, reason: impl Into<String>) -> GenericError {
    Box::new(BackendIOError { locator: locator.into(), reason: reason.into() })
  }
}
impl Error for BackendIOError {}
unsafe impl Send for BackendIOError {}
unsafe impl Sync for BackendIOError {}

/// True if `e` is a retryable `BackendIOError`, per the propagation policy in ERROR HANDLING DESIGN.
pub fn is_retryable(e: &GenericError) -> bool {
  e.downcast_ref::<BackendIOError>().is_some()
}

#[derive(Display, Debug, Clone)]
#[display(fmt = "Authentication failure at {}: {}", locator, reason)]
pub struct BackendAuthError {
  locator: String,
  reason: String,
}
impl BackendAuthError {
  pub fn boxed(locator: impl Into<String>, reason: impl Into<String>) -> GenericError {
    Box::new(BackendAuthError { locator: locator.into(), reason: reason.into() })
  }
}
impl Error for BackendAuthError {}
unsafe impl Send for BackendAuthError {}
unsafe impl Sync for BackendAuthError {}

#[derive(Display, Debug, Clone)]
#[display(fmt = "Requested scheme {}, only {:?} registered", scheme, registered)]
pub struct UnavailableBackendScheme {
  scheme: String,
  registered: Vec<String>,
}
impl UnavailableBackendScheme {
  pub fn boxed(scheme: impl Into<String>, registered: Vec<String>) -> GenericError {
    Box::new(UnavailableBackendScheme { scheme: scheme.into(), registered })
  }
}
impl Error for UnavailableBackendScheme {}
unsafe impl Send for UnavailableBackendScheme {}
unsafe impl Sync for UnavailableBackendScheme {}

#[derive(Display, Debug, Clone)]
#[display(fmt = "Scheme {} already registered", scheme)]
pub struct ConflictingBackendScheme {
  scheme: String,
}
impl ConflictingBackendScheme {
  pub fn boxed(scheme: impl Into<String>) -> GenericError {
    Box::new(ConflictingBackendScheme { scheme: scheme.into() })
  }
}
impl Error for ConflictingBackendScheme {}
unsafe impl Send for ConflictingBackendScheme {}
unsafe impl Sync for ConflictingBackendScheme {}


/* Container / manifest format */

#[derive(Display, Debug, Clone)]
#[display(fmt = "Unrecognized container format at {}", locator)]
pub struct UnknownFormat {
  locator: String,
}
impl UnknownFormat {
  pub fn boxed(locator: impl Into<String>) -> GenericError {
    Box::new(UnknownFormat { locator: locator.into() })
  }
}
impl Error for UnknownFormat {}
unsafe impl Send for UnknownFormat {}
unsafe impl Sync for UnknownFormat {}

#[derive(Display, Debug, Clone)]
#[display(fmt = "Failed to parse manifest at {}: {}", locator, reason)]
pub struct ManifestParseError {
  locator: String,
  reason: String,
}
impl ManifestParseError {
  pub fn boxed(locator: impl Into<String>, reason: impl Into<String>) -> GenericError {
    Box::new(ManifestParseError { locator: locator.into(), reason: reason.into() })
  }
}
impl Error for ManifestParseError {}
unsafe impl Send for ManifestParseError {}
unsafe impl Sync for ManifestParseError {}


/* Manifest model mutation */

#[derive(Display, Debug, Clone)]
#[display(fmt = "{} named {:?} already exists", kind, name)]
pub struct NameCollision {
  kind: String,
  name: String,
}
impl NameCollision {
  pub fn boxed(kind: impl Into<String>, name: impl Into<String>) -> GenericError {
    Box::new(NameCollision { kind: kind.into(), name: name.into() })
  }
}
impl Error for NameCollision {}
unsafe impl Send for NameCollision {}
unsafe impl Sync for NameCollision {}

#[derive(Display, Debug, Clone)]
#[display(fmt = "{} named {:?} not found", kind, name)]
pub struct MissingEntity {
  kind: String,
  name: String,
}
impl MissingEntity {
  pub fn boxed(kind: impl Into<String>, name: impl Into<String>) -> GenericError {
    Box::new(MissingEntity { kind: kind.into(), name: name.into() })
  }
}
impl Error for MissingEntity {}
unsafe impl Send for MissingEntity {}
unsafe impl Sync for MissingEntity {}


/* Indexing / shape */

#[derive(Display, Debug, Clone)]
#[display(fmt = "Index out of range: {}", reason)]
pub struct IndexOutOfRange {
  reason: String,
}
impl IndexOutOfRange {
  pub fn boxed(reason: impl Into<String>) -> GenericError {
    Box::new(IndexOutOfRange { reason: reason.into() })
  }
}
impl Error for IndexOutOfRange {}
unsafe impl Send for IndexOutOfRange {}
unsafe impl Sync for IndexOutOfRange {}

#[derive(Display, Debug, Clone)]
#[display(fmt = "Dimension mismatch: {}", reason)]
pub struct DimensionMismatch {
  reason: String,
}
impl DimensionMismatch {
  pub fn boxed(reason: impl Into<String>) -> GenericError {
    Box::new(DimensionMismatch { reason: reason.into() })
  }
}
impl Error for DimensionMismatch {}
unsafe impl Send for DimensionMismatch {}
unsafe impl Sync for DimensionMismatch {}


/* Unsupported */

#[derive(Display, Debug, Clone)]
#[display(fmt = "Unsupported operation: {}", reason)]
pub struct UnsupportedOperation {
  reason: String,
}
impl UnsupportedOperation {
  pub fn boxed(reason: impl Into<String>) -> GenericError {
    Box::new(UnsupportedOperation { reason: reason.into() })
  }
}
impl Error for UnsupportedOperation {}
unsafe impl Send for UnsupportedOperation {}
unsafe impl Sync for UnsupportedOperation {}


/* Resource manager budgets */

#[derive(Display, Debug, Clone)]
#[display(fmt = "Out of file handles: {} already open, soft limit {}", open, limit)]
pub struct OutOfFileHandles {
  open: usize,
  limit: usize,
}
impl OutOfFileHandles {
  pub fn boxed(open: usize, limit: usize) -> GenericError {
    Box::new(OutOfFileHandles { open, limit })
  }
}
impl Error for OutOfFileHandles {}
unsafe impl Send for OutOfFileHandles {}
unsafe impl Sync for OutOfFileHandles {}

#[derive(Display, Debug, Clone)]
#[display(fmt = "Out of memory: requested {} bytes, {} available", requested, available)]
pub struct OutOfMemory {
  requested: usize,
  available: usize,
}
impl OutOfMemory {
  pub fn boxed(requested: usize, available: usize) -> GenericError {
    Box::new(OutOfMemory { requested, available })
  }
}
impl Error for OutOfMemory {}
unsafe impl Send for OutOfMemory {}
unsafe impl Sync for OutOfMemory {}
