use serde::{Serialize, Deserialize};
use std::ops::Index;
use std::sync::Arc;

/* SharedBytes: shared immutable contiguous byte array, handed out by reads without copying. */

#[derive(Serialize, Deserialize)]
pub struct SharedBytes {
  buffer: Arc<Vec<u8>>,
}

impl SharedBytes {
  pub fn len(&self) -> usize {
    self.buffer.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buffer.is_empty()
  }
}

impl Clone for SharedBytes {
  fn clone(&self) -> Self {
    SharedBytes { buffer: Arc::clone(&self.buffer) }
  }
}

impl<Idx: std::slice::SliceIndex<[u8]>> Index<Idx> for SharedBytes {
  type Output = Idx::Output;

  fn index(&self, index: Idx) -> &Self::Output {
    &self.buffer[index]
  }
}

impl From<Arc<Vec<u8>>> for SharedBytes {
  fn from(buffer: Arc<Vec<u8>>) -> Self {
    SharedBytes { buffer }
  }
}

impl From<Vec<u8>> for SharedBytes {
  fn from(buffer: Vec<u8>) -> Self {
    SharedBytes { buffer: Arc::new(buffer) }
  }
}

pub mod error;
