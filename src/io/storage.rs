use bytes::Bytes;
use itertools::Itertools;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::path::PathBuf;
use std::rc::Rc;
use tokio::runtime::Runtime;
use url::Url;

use crate::common::error::BackendAuthError;
use crate::common::error::BackendIOError;
use crate::common::error::GResult;
use crate::common::error::UrlParseFilePathError;
use crate::common::error::UnknownFormat;
use crate::common::SharedBytes;

/* Data structs */

#[derive(Debug)]
pub struct Range {
  pub offset: usize,
  pub length: usize,
}

pub enum ReadRequest {
  All {
    url: Url,
  },
  Range {
    url: Url,
    range: Range,
  },
}

/* Adaptor */

pub trait Adaptor: std::fmt::Debug {
  // read whole object at url
  fn read_all(&self, url: &Url) -> GResult<SharedBytes>;
  // read range starting at offset for length bytes
  fn read_range(&self, url: &Url, range: &Range) -> GResult<SharedBytes>;
  // read range starting at offset for length bytes into caller-owned buffer
  fn read_in_place(&self, url: &Url, range: &Range, buffer: &mut [u8]) -> GResult<()>;
  // generic read for supported request type
  fn read(&self, request: &ReadRequest) -> GResult<SharedBytes> {
    match request {
      ReadRequest::All { url } => self.read_all(url),
      ReadRequest::Range { url, range } => self.read_range(url, range),
    }
  }

  // create empty object at url, truncating if already present
  fn create(&self, url: &Url) -> GResult<()>;
  // write whole byte array, replacing any prior content at url
  fn write_all(&self, url: &Url, buf: &[u8]) -> GResult<()>;
  // remove object at url
  fn remove(&self, url: &Url) -> GResult<()>;
}


/* Local filesystem */

fn open_rfile(url: &Url) -> GResult<File> {
  assert_eq!(url.scheme(), "file");
  OpenOptions::new().read(true).open(url.path())
    .map_err(|e| BackendIOError::boxed(url.to_string(), e.to_string()))
}

#[derive(Debug)]
pub struct LocalAdaptor {
  rfile_dict: Rc<RefCell<HashMap<Url, Rc<RefCell<File>>>>>,
}

impl Default for LocalAdaptor {
  fn default() -> Self {
    Self::new()
  }
}

impl LocalAdaptor {
  pub fn new() -> LocalAdaptor {
    LocalAdaptor { rfile_dict: Rc::new(RefCell::new(HashMap::new())) }
  }

  fn read_range_from_file(f: &File, range: &Range, buf: &mut [u8]) -> GResult<()> {
    // File::read_at might return fewer bytes than requested; loop until buffer is filled
    // or the file runs out, in which case the truncated prefix is returned.
    assert_eq!(buf.len(), range.length);
    let mut buf_offset = 0;
    while buf_offset < range.length {
      let read_bytes = f.read_at(&mut buf[buf_offset..], (buf_offset + range.offset).try_into().unwrap())
        .map_err(|e| BackendIOError::boxed("", e.to_string()))?;
      buf_offset += read_bytes;
      if read_bytes == 0 {
        log::debug!("Stopped filling buffer of {} bytes with only {} bytes", range.length, buf_offset);
        break;
      }
    }
    Ok(())
  }

  fn create_directory(&self, path: &Path) -> GResult<()> {
    std::fs::create_dir_all(path).map_err(|e| BackendIOError::boxed(path.display().to_string(), e.to_string()))
  }

  fn open(&self, url: &Url) -> GResult<Rc<RefCell<File>>> {
    // or_insert_with_key with fallible insertion
    Ok(match self.rfile_dict.borrow_mut().entry(url.clone()) {
      Entry::Occupied(entry) => entry.get().clone(),
      Entry::Vacant(entry) => entry.insert(Rc::new(RefCell::new(open_rfile(url)?))).clone(),
    })
  }
}

impl Adaptor for LocalAdaptor {
  fn read_all(&self, url: &Url) -> GResult<SharedBytes> {
    let f = self.open(url)?;
    let mut buffer = Vec::new();
    f.borrow_mut().read_to_end(&mut buffer).map_err(|e| BackendIOError::boxed(url.to_string(), e.to_string()))?;
    Ok(SharedBytes::from(buffer))
  }

  fn read_range(&self, url: &Url, range: &Range) -> GResult<SharedBytes> {
    let f = self.open(url)?;
    let mut buffer = vec![0u8; range.length];
    LocalAdaptor::read_range_from_file(&f.borrow(), range, &mut buffer)?;
    Ok(SharedBytes::from(buffer))
  }

  fn read_in_place(&self, url: &Url, range: &Range, buffer: &mut [u8]) -> GResult<()> {
    let f = self.open(url)?;
    let borrowed = f.borrow();
    LocalAdaptor::read_range_from_file(&borrowed, range, buffer)
  }

  fn create(&self, url: &Url) -> GResult<()> {
    assert_eq!(url.scheme(), "file");
    self.create_directory(PathBuf::from(url.path()).parent().unwrap())?;
    std::fs::File::create(url.path()).map_err(|e| BackendIOError::boxed(url.to_string(), e.to_string()))?;
    Ok(())
  }

  fn write_all(&self, url: &Url, buf: &[u8]) -> GResult<()> {
    assert_eq!(url.scheme(), "file");
    let url_path = url.path();
    self.create_directory(PathBuf::from(url_path).parent().unwrap())?;
    self.rfile_dict.borrow_mut().remove(url);
    let mut f = OpenOptions::new()
      .write(true)
      .create(true)
      .truncate(true)
      .open(url_path)
      .map_err(|e| BackendIOError::boxed(url.to_string(), e.to_string()))?;
    f.write_all(buf).map_err(|e| BackendIOError::boxed(url.to_string(), e.to_string()))
  }

  fn remove(&self, url: &Url) -> GResult<()> {
    assert_eq!(url.scheme(), "file");
    self.rfile_dict.borrow_mut().remove(url);
    std::fs::remove_file(Path::new(url.path())).map_err(|e| BackendIOError::boxed(url.to_string(), e.to_string()))
  }
}

pub fn url_from_dir_path(path: &Path) -> GResult<Url> {
  url_from_dir_str(path.to_str().expect("Unable to stringify path"))
}

pub fn url_from_dir_str(path: &str) -> GResult<Url> {
  Url::from_directory_path(path).map_err(|_| Box::new(UrlParseFilePathError) as crate::common::error::GenericError)
}


/* S3-data-model object store adaptor (per bucket/host alias) */

pub struct ObjectStoreAdaptor {
  store: Box<dyn ObjectStore>,
  rt: Runtime,
}

impl std::fmt::Debug for ObjectStoreAdaptor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ObjectStoreAdaptor").finish()
  }
}

impl ObjectStoreAdaptor {
  pub fn new_s3(endpoint: &str, bucket: &str, access_key: &str, secret_key: &str) -> GResult<ObjectStoreAdaptor> {
    let store = AmazonS3Builder::new()
      .with_endpoint(endpoint)
      .with_bucket_name(bucket)
      .with_access_key_id(access_key)
      .with_secret_access_key(secret_key)
      .with_allow_http(true)
      .build()
      .map_err(|e| BackendAuthError::boxed(endpoint.to_string(), e.to_string()))?;
    Ok(ObjectStoreAdaptor {
      store: Box::new(store),
      rt: Runtime::new().expect("Failed to initialize tokio runtime"),
    })
  }

  fn object_path(url: &Url) -> ObjectPath {
    let segments: Vec<&str> = url.path_segments().map(|it| it.collect()).unwrap_or_default();
    // first segment names the bucket/host alias, consumed by the store client itself;
    // the remainder is the object key.
    ObjectPath::from(Itertools::intersperse(segments.into_iter().skip(1), "/").collect::<String>())
  }

  #[tracing::instrument(level = "trace", skip(self))]
  async fn read_all_async(&self, url: &Url) -> GResult<SharedBytes> {
    let path = Self::object_path(url);
    let result = self.store.get(&path).await
      .map_err(|e| BackendIOError::boxed(url.to_string(), e.to_string()))?;
    let bytes = result.bytes().await.map_err(|e| BackendIOError::boxed(url.to_string(), e.to_string()))?;
    Ok(SharedBytes::from(bytes.to_vec()))
  }

  #[tracing::instrument(level = "trace", skip(self))]
  async fn read_range_async(&self, url: &Url, range: &Range) -> GResult<SharedBytes> {
    let path = Self::object_path(url);
    let bytes = self.store.get_range(&path, range.offset..(range.offset + range.length)).await
      .map_err(|e| BackendIOError::boxed(url.to_string(), e.to_string()))?;
    Ok(SharedBytes::from(bytes.to_vec()))
  }

  #[tracing::instrument(level = "trace", skip(self, buf))]
  async fn write_all_async(&self, url: &Url, buf: &[u8]) -> GResult<()> {
    let path = Self::object_path(url);
    self.store.put(&path, Bytes::copy_from_slice(buf).into()).await
      .map_err(|e| BackendIOError::boxed(url.to_string(), e.to_string()))?;
    Ok(())
  }

  #[tracing::instrument(level = "trace", skip(self))]
  async fn remove_async(&self, url: &Url) -> GResult<()> {
    let path = Self::object_path(url);
    self.store.delete(&path).await
      .map_err(|e| BackendIOError::boxed(url.to_string(), e.to_string()))?;
    Ok(())
  }
}

impl Adaptor for ObjectStoreAdaptor {
  fn read_all(&self, url: &Url) -> GResult<SharedBytes> {
    self.rt.block_on(self.read_all_async(url))
  }

  fn read_range(&self, url: &Url, range: &Range) -> GResult<SharedBytes> {
    self.rt.block_on(self.read_range_async(url, range))
  }

  fn read_in_place(&self, url: &Url, range: &Range, buffer: &mut [u8]) -> GResult<()> {
    let read_bytes = self.rt.block_on(self.read_range_async(url, range))?;
    buffer.clone_from_slice(&read_bytes[..]);
    Ok(())
  }

  fn create(&self, _url: &Url) -> GResult<()> {
    Ok(())  // object stores create hierarchy implicitly on first put
  }

  fn write_all(&self, url: &Url, buf: &[u8]) -> GResult<()> {
    if buf.len() > crate::io::multipart::DEFAULT_PART_SIZE {
      let span = tracing::trace_span!("multipart_put", url = %url, size = buf.len());
      let _enter = span.enter();
      let path = Self::object_path(url);
      self.rt.block_on(crate::io::multipart::put_multipart(self.store.as_ref(), &path, buf))
        .map_err(|e| BackendIOError::boxed(url.to_string(), e.to_string()))
    } else {
      self.rt.block_on(self.write_all_async(url, buf))
    }
  }

  fn remove(&self, url: &Url) -> GResult<()> {
    self.rt.block_on(self.remove_async(url))
  }
}


/* Dummy adaptor with no-op, used for planner-only and resource-manager unit tests */

#[derive(Default, Debug)]
pub struct DummyAdaptor;

impl Adaptor for DummyAdaptor {
  fn read_all(&self, _url: &Url) -> GResult<SharedBytes> {
    Ok(SharedBytes::from(Vec::new()))
  }

  fn read_range(&self, _url: &Url, _range: &Range) -> GResult<SharedBytes> {
    Ok(SharedBytes::from(Vec::new()))
  }

  fn read_in_place(&self, _url: &Url, _range: &Range, _buffer: &mut [u8]) -> GResult<()> {
    Ok(())
  }

  fn create(&self, _url: &Url) -> GResult<()> {
    Ok(())
  }

  fn write_all(&self, _url: &Url, _buf: &[u8]) -> GResult<()> {
    Ok(())
  }

  fn remove(&self, _url: &Url) -> GResult<()> {
    Ok(())
  }
}


/* Container format sniff, from the leading 6 bytes only (EXTERNAL INTERFACES, magic-number sniff) */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
  ModernV5,
  ModernV4,
  CdfClassic,
  Cdf64BitOffset,
  Cdf64BitData,
}

const MODERN_V4_MAGIC: [u8; 4] = [0o016, 0o003, 0o023, 0o001];

pub fn sniff_container_format(locator: &str, head: &[u8]) -> GResult<ContainerFormat> {
  if head.len() >= 4 && &head[1..4] == b"HDF" {
    return Ok(ContainerFormat::ModernV5);
  }
  if head.len() >= 4 && head[0..4] == MODERN_V4_MAGIC {
    return Ok(ContainerFormat::ModernV4);
  }
  if head.len() >= 4 && &head[0..3] == b"CDF" {
    return match head[3] {
      1 => Ok(ContainerFormat::CdfClassic),
      2 => Ok(ContainerFormat::Cdf64BitOffset),
      5 => Ok(ContainerFormat::Cdf64BitData),
      _ => Err(UnknownFormat::boxed(locator)),
    };
  }
  Err(UnknownFormat::boxed(locator))
}

impl ContainerFormat {
  /// Whether this container generation supports structured sub-containers,
  /// required for manifest schema v5 (DATA MODEL, Dataset invariant).
  pub fn supports_structured_subcontainers(&self) -> bool {
    matches!(self, ContainerFormat::ModernV5)
  }
}


#[cfg(test)]
pub mod adaptor_test {
  use super::*;
  use rand::Rng;
  use rand;
  use tempfile::TempDir;

  /* generic Adaptor unit tests, shared across backends */

  pub fn write_all_zero_ok(adaptor: impl Adaptor, base_url: &Url) -> GResult<()> {
    let test_path = base_url.join("test.bin")?;
    let test_data = [0u8; 256];
    adaptor.write_all(&test_path, &test_data)?;
    Ok(())
  }

  pub fn write_all_inside_dir_ok(adaptor: impl Adaptor, base_url: &Url) -> GResult<()> {
    let test_path = base_url.join("test_dir/test.bin")?;
    let test_data = [0u8; 256];
    adaptor.write_all(&test_path, &test_data)?;
    Ok(())
  }

  pub fn write_read_all_zero_ok(adaptor: impl Adaptor, base_url: &Url) -> GResult<()> {
    let test_path = base_url.join("test.bin")?;
    let test_data = [0u8; 256];
    adaptor.write_all(&test_path, &test_data)?;

    let test_data_reread = adaptor.read_all(&test_path)?;
    assert_eq!(&test_data[..], &test_data_reread[..], "Reread data not matched with original one");
    Ok(())
  }

  pub fn write_read_all_random_ok(adaptor: impl Adaptor, base_url: &Url) -> GResult<()> {
    let test_path = base_url.join("test.bin")?;
    let mut test_data = [0u8; 256];
    rand::thread_rng().fill(&mut test_data[..]);
    adaptor.write_all(&test_path, &test_data)?;

    let test_data_reread = adaptor.read_all(&test_path)?;
    assert_eq!(&test_data[..], &test_data_reread[..], "Reread data not matched with original one");
    Ok(())
  }

  pub fn write_twice_read_all_random_ok(adaptor: impl Adaptor, base_url: &Url) -> GResult<()> {
    let test_path = base_url.join("test.bin")?;
    let test_data_old = [1u8; 256];
    adaptor.write_all(&test_path, &test_data_old)?;

    let test_data_actual = [2u8; 128];
    adaptor.write_all(&test_path, &test_data_actual)?;

    let test_data_reread = adaptor.read_all(&test_path)?;
    assert_ne!(&test_data_old[..], &test_data_reread[..], "Old data should be removed");
    assert_eq!(
      &test_data_actual[..],
      &test_data_reread[..],
      "Reread data not matched with original one, possibly containing old data");
    Ok(())
  }

  pub fn write_read_range_random_ok(adaptor: impl Adaptor, base_url: &Url) -> GResult<()> {
    let test_path = base_url.join("test.bin")?;
    let mut test_data = [0u8; 256];
    rand::thread_rng().fill(&mut test_data[..]);
    adaptor.write_all(&test_path, &test_data)?;

    let mut rng = rand::thread_rng();
    for _ in 0..100 {
      let offset = rng.gen_range(0..test_data.len() - 1);
      let length = rng.gen_range(0..test_data.len() - offset);
      let test_data_range = adaptor.read_range(&test_path, &Range{ offset, length })?;
      let test_data_expected = &test_data[offset..offset+length];
      assert_eq!(test_data_expected, &test_data_range[..], "Reread data not matched with original one");
    }
    Ok(())
  }

  pub fn write_read_generic_random_ok(adaptor: impl Adaptor, base_url: &Url) -> GResult<()> {
    let test_path = base_url.join("test.bin")?;
    let mut test_data = [0u8; 256];
    rand::thread_rng().fill(&mut test_data[..]);
    adaptor.write_all(&test_path, &test_data)?;

    let test_data_reread = adaptor.read(&ReadRequest::All { url: test_path.clone() })?;
    assert_eq!(&test_data[..], &test_data_reread[..], "Reread data not matched with original one");

    let mut rng = rand::thread_rng();
    for _ in 0..100 {
      let offset = rng.gen_range(0..test_data.len() - 1);
      let length = rng.gen_range(0..test_data.len() - offset);
      let test_data_reread = adaptor.read(&ReadRequest::Range {
          url: test_path.clone(),
          range: Range{ offset, length },
      })?;
      let test_data_expected = &test_data[offset..offset+length];
      assert_eq!(test_data_expected, &test_data_reread[..], "Reread data not matched with original one");
    }
    Ok(())
  }

  pub fn fsa_tempdir_setup() -> GResult<(TempDir, LocalAdaptor)> {
    let temp_dir = TempDir::new()?;
    let fsa = LocalAdaptor::new();
    Ok((temp_dir, fsa))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use crate::io::storage::adaptor_test::fsa_tempdir_setup;
  use crate::io::storage::adaptor_test::write_all_inside_dir_ok;
  use crate::io::storage::adaptor_test::write_all_zero_ok;
  use crate::io::storage::adaptor_test::write_read_all_random_ok;
  use crate::io::storage::adaptor_test::write_read_all_zero_ok;
  use crate::io::storage::adaptor_test::write_read_generic_random_ok;
  use crate::io::storage::adaptor_test::write_read_range_random_ok;
  use crate::io::storage::adaptor_test::write_twice_read_all_random_ok;

  #[test]
  fn local_write_all_zero_ok() -> GResult<()> {
    let (temp_dir, fsa) = fsa_tempdir_setup()?;
    write_all_zero_ok(fsa, &url_from_dir_path(temp_dir.path())?)
  }

  #[test]
  fn local_write_all_inside_dir_ok() -> GResult<()> {
    let (temp_dir, fsa) = fsa_tempdir_setup()?;
    write_all_inside_dir_ok(fsa, &url_from_dir_path(temp_dir.path())?)
  }

  #[test]
  fn local_write_read_all_zero_ok() -> GResult<()> {
    let (temp_dir, fsa) = fsa_tempdir_setup()?;
    write_read_all_zero_ok(fsa, &url_from_dir_path(temp_dir.path())?)
  }

  #[test]
  fn local_write_read_all_random_ok() -> GResult<()> {
    let (temp_dir, fsa) = fsa_tempdir_setup()?;
    write_read_all_random_ok(fsa, &url_from_dir_path(temp_dir.path())?)
  }

  #[test]
  fn local_write_twice_read_all_random_ok() -> GResult<()> {
    let (temp_dir, fsa) = fsa_tempdir_setup()?;
    write_twice_read_all_random_ok(fsa, &url_from_dir_path(temp_dir.path())?)
  }

  #[test]
  fn local_write_read_range_random_ok() -> GResult<()> {
    let (temp_dir, fsa) = fsa_tempdir_setup()?;
    write_read_range_random_ok(fsa, &url_from_dir_path(temp_dir.path())?)
  }

  #[test]
  fn local_write_read_generic_random_ok() -> GResult<()> {
    let (temp_dir, fsa) = fsa_tempdir_setup()?;
    write_read_generic_random_ok(fsa, &url_from_dir_path(temp_dir.path())?)
  }

  #[test]
  fn sniff_modern_v5_ok() -> GResult<()> {
    let head = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'];
    assert_eq!(sniff_container_format("t", &head)?, ContainerFormat::ModernV5);
    Ok(())
  }

  #[test]
  fn sniff_modern_v4_ok() -> GResult<()> {
    let head = [0o016u8, 0o003, 0o023, 0o001];
    assert_eq!(sniff_container_format("t", &head)?, ContainerFormat::ModernV4);
    Ok(())
  }

  #[test]
  fn sniff_cdf_variants_ok() -> GResult<()> {
    assert_eq!(sniff_container_format("t", b"CDF\x01")?, ContainerFormat::CdfClassic);
    assert_eq!(sniff_container_format("t", b"CDF\x02")?, ContainerFormat::Cdf64BitOffset);
    assert_eq!(sniff_container_format("t", b"CDF\x05")?, ContainerFormat::Cdf64BitData);
    Ok(())
  }

  #[test]
  fn sniff_unknown_errs() {
    assert!(sniff_container_format("t", b"\x00\x00\x00\x00").is_err());
  }
}
