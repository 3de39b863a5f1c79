//! Bounded pool of open backend handles and in-memory budget, multiplexed across many
//! concurrently held subarrays (COMPONENT DESIGN §4.3).

use rand::Rng;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

use crate::common::error::GResult;
use crate::common::error::OutOfFileHandles;
use crate::common::error::OutOfMemory;
use crate::config::StoreConfig;
use crate::io::storage::Adaptor;

/// Small safety slack kept below the handle soft limit for auxiliary opens (§4.3 Admission).
const HANDLE_SLACK: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenState {
  DoesNotExist,
  OpenNewInMemory,
  OpenExistsInMemory,
  KnownExistsOnStorage,
  OpenNewOnDisk,
  OpenExistsOnDisk,
  KnownExistsOnDisk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
  Read,
  Write, // covers both `w` and `a`; the two are mode-equivalent for reconciliation purposes.
}

#[derive(Debug)]
struct OpenFileRecord {
  locator: String,
  size_hint: usize,
  state: OpenState,
  mode: OpenMode,
  locked: bool,
  last_access: Instant,
  remote: bool,
}

impl OpenFileRecord {
  fn touch(&mut self) {
    self.last_access = Instant::now();
  }
}

/// Multiplexes a bounded pool of open file handles and a bounded memory budget across
/// many concurrently held subarrays, mirroring the teacher's `io::internal::ExternalStorage`
/// registry but keyed on lifecycle state rather than page contents.
///
/// This manager tracks admission and the open-state machine only; it never holds the bytes
/// of an open subarray itself. Byte I/O runs through the shared `Adaptor` directly at the
/// call site (the dataset façade), which already knows which partition file it's touching and
/// reads/writes it in one call. That keeps `evict()` a pure bookkeeping transition — dropping a
/// record never needs to write anything back, because this manager never had the bytes to lose.
pub struct ResourceManager {
  adaptor: Rc<dyn Adaptor>,
  config: StoreConfig,
  handle_soft_limit: usize,
  records: RefCell<HashMap<String, OpenFileRecord>>,
  memory_in_use: RefCell<usize>,
  disk_handles_open: RefCell<usize>,
}

impl std::fmt::Debug for ResourceManager {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ResourceManager")
      .field("handle_soft_limit", &self.handle_soft_limit)
      .field("memory_in_use", &self.memory_in_use)
      .field("disk_handles_open", &self.disk_handles_open)
      .finish()
  }
}

impl ResourceManager {
  pub fn new(adaptor: Rc<dyn Adaptor>, config: StoreConfig, handle_soft_limit: usize) -> ResourceManager {
    ResourceManager {
      adaptor,
      config,
      handle_soft_limit,
      records: RefCell::new(HashMap::new()),
      memory_in_use: RefCell::new(0),
      disk_handles_open: RefCell::new(0),
    }
  }

  fn handle_budget(&self) -> usize {
    self.handle_soft_limit.saturating_sub(HANDLE_SLACK)
  }

  /// The shared backend adaptor, for callers (the dataset façade) that need to perform
  /// I/O outside the lifecycle tracked by this manager (e.g. manifest persistence).
  pub fn adaptor(&self) -> Rc<dyn Adaptor> {
    self.adaptor.clone()
  }

  /// Evicts LRU unlocked `OpenExistsOnDisk` records until `*disk_handles_open < budget`,
  /// or fails with `OutOfFileHandles` if no unlocked victims remain (§4.3 Admission policy).
  fn admit_disk_handle(&self) -> GResult<()> {
    let budget = self.handle_budget();
    loop {
      if *self.disk_handles_open.borrow() < budget {
        return Ok(());
      }
      let victim = self.records.borrow().iter()
        .filter(|(_, r)| !r.locked && r.state == OpenState::OpenExistsOnDisk)
        .min_by_key(|(_, r)| r.last_access)
        .map(|(k, _)| k.clone());
      match victim {
        Some(key) => self.evict(&key)?,
        None => return Err(OutOfFileHandles::boxed(*self.disk_handles_open.borrow(), budget)),
      }
    }
  }

  /// Evicts LRU unlocked `OpenExistsInMemory` records until `requested` bytes fit within
  /// the configured memory reserve, or fails with `OutOfMemory`.
  fn admit_memory(&self, requested: usize) -> GResult<()> {
    let budget = self.config.free_memory_limit as usize;
    loop {
      if *self.memory_in_use.borrow() + requested <= budget {
        return Ok(());
      }
      let victim = self.records.borrow().iter()
        .filter(|(_, r)| !r.locked && r.state == OpenState::OpenExistsInMemory)
        .min_by_key(|(_, r)| r.last_access)
        .map(|(k, _)| k.clone());
      match victim {
        Some(key) => self.evict(&key)?,
        None => return Err(OutOfMemory::boxed(requested, budget.saturating_sub(*self.memory_in_use.borrow()))),
      }
    }
  }

  /// Drops a record to the appropriate `KnownExists*` state (§4.3 Open states, eviction
  /// transition). No write-back happens here: this manager never buffers a subarray's bytes
  /// (see the struct doc), so a caller holding a `Write`-mode record is expected to have
  /// already committed its bytes via the adaptor before calling `free_file`/triggering
  /// eviction pressure on that key.
  fn evict(&self, key: &str) -> GResult<()> {
    let mut records = self.records.borrow_mut();
    if let Some(record) = records.get_mut(key) {
      match record.state {
        OpenState::OpenExistsInMemory => {
          *self.memory_in_use.borrow_mut() -= record.size_hint;
          record.state = OpenState::KnownExistsOnStorage;
        }
        OpenState::OpenExistsOnDisk => {
          *self.disk_handles_open.borrow_mut() -= 1;
          record.state = OpenState::KnownExistsOnDisk;
        }
        _ => {}
      }
      log::debug!("Evicted resource record for {}", key);
    }
    Ok(())
  }

  /// Opens (or reuses) a backend handle for `locator`, running admission and eviction as
  /// needed. `remote` selects the `InMemory` vs `OnDisk` branch of the open-state machine.
  pub fn request(&self, locator: &str, mode: OpenMode, remote: bool, size_hint: usize) -> GResult<()> {
    {
      let records = self.records.borrow();
      if let Some(record) = records.get(locator) {
        if record.mode == mode {
          drop(records);
          self.records.borrow_mut().get_mut(locator).unwrap().touch();
          return Ok(());
        }
      }
    }
    self.reconcile_mode(locator, mode, remote, size_hint)
  }

  /// Mode reconciliation: closes a differently-moded record before reopening in the
  /// requested mode (§4.3 Mode reconciliation). The record that comes back out of a
  /// `KnownExists*` state is marked `OpenExists*` directly rather than `OpenNew*`, so callers
  /// can tell a reconciled reopen apart from a first-ever open of that locator — but, per the
  /// struct doc, no bytes move through this manager either way; the caller still reads/writes
  /// the backend itself. The write-then-write-to-a-different-mode "duplicate the container"
  /// case described for remote containers in §4.3 is not modeled here: it only matters for a
  /// container-level codec this crate doesn't implement (see EXTERNAL INTERFACES), and no
  /// caller in this crate holds a record open across a mode flip to exercise it.
  fn reconcile_mode(&self, locator: &str, mode: OpenMode, remote: bool, size_hint: usize) -> GResult<()> {
    let existing_state = self.records.borrow().get(locator).map(|r| r.state);
    if let Some(state) = existing_state {
      if !matches!(state, OpenState::DoesNotExist) {
        self.evict(locator)?;
      }
    }

    if remote {
      self.admit_memory(size_hint)?;
      *self.memory_in_use.borrow_mut() += size_hint;
      let open_state = match existing_state {
        Some(OpenState::KnownExistsOnStorage) => OpenState::OpenExistsInMemory,
        _ => OpenState::OpenNewInMemory,
      };
      self.records.borrow_mut().insert(locator.to_string(), OpenFileRecord {
        locator: locator.to_string(),
        size_hint,
        state: open_state,
        mode,
        locked: false,
        last_access: Instant::now(),
        remote,
      });
    } else {
      self.admit_disk_handle()?;
      *self.disk_handles_open.borrow_mut() += 1;
      let open_state = match existing_state {
        Some(OpenState::KnownExistsOnDisk) => OpenState::OpenExistsOnDisk,
        _ => OpenState::OpenNewOnDisk,
      };
      self.records.borrow_mut().insert(locator.to_string(), OpenFileRecord {
        locator: locator.to_string(),
        size_hint,
        state: open_state,
        mode,
        locked: false,
        last_access: Instant::now(),
        remote,
      });
    }
    Ok(())
  }

  /// Marks a decode as complete: `OpenNew* -> OpenExists*` (§4.3 Open states).
  pub fn mark_decoded(&self, locator: &str) {
    if let Some(record) = self.records.borrow_mut().get_mut(locator) {
      record.state = match record.state {
        OpenState::OpenNewInMemory => OpenState::OpenExistsInMemory,
        OpenState::OpenNewOnDisk => OpenState::OpenExistsOnDisk,
        other => other,
      };
    }
  }

  pub fn set_locked(&self, locator: &str, locked: bool) {
    if let Some(record) = self.records.borrow_mut().get_mut(locator) {
      record.locked = locked;
    }
  }

  pub fn state_of(&self, locator: &str) -> OpenState {
    self.records.borrow().get(locator).map(|r| r.state).unwrap_or(OpenState::DoesNotExist)
  }

  pub fn open_disk_handle_count(&self) -> usize {
    *self.disk_handles_open.borrow()
  }

  pub fn memory_in_use(&self) -> usize {
    *self.memory_in_use.borrow()
  }

  /// `free_file`: transitions to `DoesNotExist` when `keep_reference=false`, else to the
  /// appropriate `KnownExists*` after flushing (§4.3 Open states).
  pub fn free_file(&self, locator: &str, keep_reference: bool) -> GResult<()> {
    if keep_reference {
      self.evict(locator)?;
    } else {
      let mut records = self.records.borrow_mut();
      if let Some(record) = records.remove(locator) {
        match record.state {
          OpenState::OpenExistsInMemory | OpenState::OpenNewInMemory => {
            *self.memory_in_use.borrow_mut() -= record.size_hint;
          }
          OpenState::OpenExistsOnDisk | OpenState::OpenNewOnDisk => {
            *self.disk_handles_open.borrow_mut() -= 1;
          }
          _ => {}
        }
      }
    }
    Ok(())
  }

  /// Allocates a result buffer for a hyperslab read. When `requested_bytes` exceeds the
  /// configured in-memory ceiling, the buffer is backed by a memory-mapped file in the
  /// configured cache directory named from `dataset_basename` plus a random suffix
  /// (§4.3 Target-buffer allocation).
  pub fn allocate_target_buffer(&self, dataset_basename: &str, requested_bytes: usize) -> GResult<TargetBuffer> {
    if requested_bytes as u64 <= self.config.max_file_size_for_memory {
      return Ok(TargetBuffer::InMemory(vec![0u8; requested_bytes]));
    }
    let suffix: u64 = rand::thread_rng().gen();
    let path = PathBuf::from(&self.config.cache_location)
      .join(format!("{}-{:016x}.tmp", dataset_basename, suffix));
    let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&path)
      .map_err(|e| crate::common::error::BackendIOError::boxed(path.display().to_string(), e.to_string()))?;
    file.set_len(requested_bytes as u64)
      .map_err(|e| crate::common::error::BackendIOError::boxed(path.display().to_string(), e.to_string()))?;
    let mmap = unsafe {
      memmap2::MmapMut::map_mut(&file)
        .map_err(|e| crate::common::error::BackendIOError::boxed(path.display().to_string(), e.to_string()))?
    };
    Ok(TargetBuffer::DiskBacked { mmap, path })
  }
}

/// A hyperslab result buffer, transparently addressable regardless of backing (§4.3).
pub enum TargetBuffer {
  InMemory(Vec<u8>),
  DiskBacked { mmap: memmap2::MmapMut, path: PathBuf },
}

impl TargetBuffer {
  pub fn as_mut_slice(&mut self) -> &mut [u8] {
    match self {
      TargetBuffer::InMemory(v) => v.as_mut_slice(),
      TargetBuffer::DiskBacked { mmap, .. } => &mut mmap[..],
    }
  }

  pub fn len(&self) -> usize {
    match self {
      TargetBuffer::InMemory(v) => v.len(),
      TargetBuffer::DiskBacked { mmap, .. } => mmap.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl Drop for TargetBuffer {
  fn drop(&mut self) {
    if let TargetBuffer::DiskBacked { path, .. } = self {
      let _ = std::fs::remove_file(path);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::io::storage::DummyAdaptor;

  fn manager(handle_soft_limit: usize) -> ResourceManager {
    let mut config = StoreConfig::default();
    config.free_memory_limit = 1_000_000;
    ResourceManager::new(Rc::new(DummyAdaptor), config, handle_soft_limit)
  }

  #[test]
  fn request_transitions_to_open_new_on_disk() -> GResult<()> {
    let manager = manager(16);
    manager.request("a.nc", OpenMode::Read, false, 100)?;
    assert_eq!(manager.state_of("a.nc"), OpenState::OpenNewOnDisk);
    Ok(())
  }

  #[test]
  fn request_transitions_to_open_new_in_memory_when_remote() -> GResult<()> {
    let manager = manager(16);
    manager.request("s3://b/k", OpenMode::Read, true, 100)?;
    assert_eq!(manager.state_of("s3://b/k"), OpenState::OpenNewInMemory);
    Ok(())
  }

  #[test]
  fn mark_decoded_moves_to_exists_state() -> GResult<()> {
    let manager = manager(16);
    manager.request("a.nc", OpenMode::Read, false, 100)?;
    manager.mark_decoded("a.nc");
    assert_eq!(manager.state_of("a.nc"), OpenState::OpenExistsOnDisk);
    Ok(())
  }

  #[test]
  fn eviction_keeps_handle_count_under_budget() -> GResult<()> {
    // file-handle soft limit L=16; opening L+10 distinct unlocked subarrays serially
    // never fails, and the final open-handle count stays <= L-4 (§8 Eviction).
    let handle_soft_limit = 16;
    let manager = manager(handle_soft_limit);
    for i in 0..(handle_soft_limit + 10) {
      let locator = format!("part-{}.nc", i);
      manager.request(&locator, OpenMode::Read, false, 10)?;
      manager.mark_decoded(&locator);
    }
    assert!(manager.open_disk_handle_count() <= handle_soft_limit - HANDLE_SLACK);
    Ok(())
  }

  #[test]
  fn locked_records_are_never_evicted() -> GResult<()> {
    let handle_soft_limit = 8;
    let manager = manager(handle_soft_limit);
    manager.request("locked.nc", OpenMode::Read, false, 10)?;
    manager.mark_decoded("locked.nc");
    manager.set_locked("locked.nc", true);
    for i in 0..handle_soft_limit {
      let locator = format!("other-{}.nc", i);
      manager.request(&locator, OpenMode::Read, false, 10)?;
      manager.mark_decoded(&locator);
    }
    assert_eq!(manager.state_of("locked.nc"), OpenState::OpenExistsOnDisk);
    Ok(())
  }

  #[test]
  fn memory_admission_evicts_lru_unlocked_record() -> GResult<()> {
    let manager = manager(16);
    manager.request("r1", OpenMode::Read, true, 600_000)?;
    manager.mark_decoded("r1");
    manager.request("r2", OpenMode::Read, true, 600_000)?;
    manager.mark_decoded("r2");
    // r1 should have been evicted to make room for r2 under the 1MB budget.
    assert_eq!(manager.state_of("r1"), OpenState::KnownExistsOnStorage);
    assert_eq!(manager.state_of("r2"), OpenState::OpenExistsInMemory);
    Ok(())
  }

  #[test]
  fn allocate_target_buffer_stays_in_memory_under_ceiling() -> GResult<()> {
    let manager = manager(16);
    let buf = manager.allocate_target_buffer("ds", 1024)?;
    assert!(matches!(buf, TargetBuffer::InMemory(_)));
    Ok(())
  }

  #[test]
  fn allocate_target_buffer_spills_to_disk_above_ceiling() -> GResult<()> {
    let mut config = StoreConfig::default();
    config.max_file_size_for_memory = 1024;
    config.cache_location = std::env::temp_dir().to_string_lossy().into_owned();
    let manager = ResourceManager::new(Rc::new(DummyAdaptor), config, 16);
    let mut buf = manager.allocate_target_buffer("ds", 4096)?;
    assert_eq!(buf.len(), 4096);
    buf.as_mut_slice()[0] = 7;
    assert!(matches!(buf, TargetBuffer::DiskBacked { .. }));
    Ok(())
  }
}
