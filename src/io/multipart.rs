use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;

use crate::common::error::BackendIOError;
use crate::common::error::GResult;

/// Default part size for multipart uploads, per the S3-data-model write path: 50 MiB.
pub const DEFAULT_PART_SIZE: usize = 50 * (1 << 20);
/// Minimum part size accepted by the backend for any part but the last.
pub const MIN_PART_SIZE: usize = 5 * (1 << 20);

/// Tracks a single multipart session: a session id assigned by the backend and 1-based
/// part numbers for logging. Per-part completion bookkeeping (part id, final assembly
/// order) is the `object_store::MultipartUpload` implementation's own internal state;
/// `complete` takes no arguments and reassembles from whatever parts it was given.
pub struct MultipartSession<'a> {
  store: &'a dyn ObjectStore,
  path: ObjectPath,
  upload: Box<dyn object_store::MultipartUpload>,
  part_number: usize,
}

impl<'a> MultipartSession<'a> {
  pub async fn open(store: &'a dyn ObjectStore, path: &ObjectPath) -> GResult<MultipartSession<'a>> {
    let upload = store.put_multipart(path).await
      .map_err(|e| BackendIOError::boxed(path.to_string(), e.to_string()))?;
    Ok(MultipartSession {
      store,
      path: path.clone(),
      upload,
      part_number: 0,
    })
  }

  pub async fn put_part(&mut self, part: Vec<u8>) -> GResult<()> {
    self.part_number += 1;
    self.upload.put_part(part.into()).await
      .map_err(|e| BackendIOError::boxed(self.path.to_string(), e.to_string()))?;
    Ok(())
  }

  pub async fn complete(mut self) -> GResult<()> {
    self.upload.complete().await
      .map_err(|e| BackendIOError::boxed(self.path.to_string(), e.to_string()))?;
    Ok(())
  }

  pub async fn abort(mut self) -> GResult<()> {
    self.upload.abort().await
      .map_err(|e| BackendIOError::boxed(self.path.to_string(), e.to_string()))
  }
}

/// Splits `buf` into parts of `DEFAULT_PART_SIZE` (the final part may be shorter, down
/// to `MIN_PART_SIZE` unless it is also the only part) and uploads them as one session.
pub async fn put_multipart(store: &dyn ObjectStore, path: &ObjectPath, buf: &[u8]) -> GResult<()> {
  let mut session = MultipartSession::open(store, path).await?;
  let mut offset = 0;
  while offset < buf.len() {
    let end = std::cmp::min(offset + DEFAULT_PART_SIZE, buf.len());
    if let Err(e) = session.put_part(buf[offset..end].to_vec()).await {
      session.abort().await.ok();
      return Err(e);
    }
    offset = end;
  }
  session.complete().await
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn part_size_defaults_hold_ordering() {
    assert!(MIN_PART_SIZE < DEFAULT_PART_SIZE);
  }
}
