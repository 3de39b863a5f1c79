use serde::{Deserialize, Serialize};

use crate::common::error::GResult;
use crate::common::error::IndexOutOfRange;
use crate::io::storage::ContainerFormat;

/// Backing container for one partition: shape, variable name within the file, locator,
/// and container-format tag (DATA MODEL, Subarray).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subarray {
  pub ncvar: String,
  pub file: String,
  pub format: String,
  pub shape: Vec<usize>,
}

impl Subarray {
  /// A partition record is undefined when its file string is empty (MANIFEST MODEL).
  pub fn is_defined(&self) -> bool {
    !self.file.is_empty()
  }

  pub fn undefined(ncvar: impl Into<String>, shape: Vec<usize>) -> Subarray {
    Subarray { ncvar: ncvar.into(), file: String::new(), format: String::new(), shape }
  }

  pub fn container_format(&self) -> Option<ContainerFormat> {
    match self.format.as_str() {
      "modern_v5" => Some(ContainerFormat::ModernV5),
      "modern_v4" => Some(ContainerFormat::ModernV4),
      "cdf_classic" => Some(ContainerFormat::CdfClassic),
      "cdf_64bit_offset" => Some(ContainerFormat::Cdf64BitOffset),
      "cdf_64bit_data" => Some(ContainerFormat::Cdf64BitData),
      _ => None,
    }
  }
}

/// Inclusive location of a partition within the master array's index space, and its
/// integer index vector in the partition-matrix grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionRecord {
  pub index: Vec<usize>,
  pub location: Vec<(usize, usize)>,  // inclusive [start, end] per axis
  pub subarray: Subarray,
}

/// Dense row-major table over a variable's partition-matrix grid, mirroring the
/// teacher's `KeyPositionCollection` dense-array pattern for O(1) index lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionTable {
  pm_shape: Vec<usize>,
  records: Vec<Option<PartitionRecord>>,
}

impl PartitionTable {
  pub fn new(pm_shape: Vec<usize>) -> PartitionTable {
    let total = pm_shape.iter().product();
    PartitionTable { pm_shape, records: vec![None; total] }
  }

  pub fn pm_shape(&self) -> &[usize] {
    &self.pm_shape
  }

  fn flatten(&self, index: &[usize]) -> GResult<usize> {
    if index.len() != self.pm_shape.len() {
      return Err(IndexOutOfRange::boxed(format!(
        "index rank {} does not match partition-matrix rank {}", index.len(), self.pm_shape.len())));
    }
    let mut flat = 0;
    for (axis, (&i, &dim)) in index.iter().zip(self.pm_shape.iter()).enumerate() {
      if i >= dim {
        return Err(IndexOutOfRange::boxed(format!(
          "partition index {} out of range on axis {} (pm_shape {})", i, axis, dim)));
      }
      flat = flat * dim + i;
    }
    Ok(flat)
  }

  pub fn get(&self, index: &[usize]) -> GResult<Option<&PartitionRecord>> {
    Ok(self.records[self.flatten(index)?].as_ref())
  }

  pub fn set(&mut self, record: PartitionRecord) -> GResult<()> {
    let flat = self.flatten(&record.index)?;
    self.records[flat] = Some(record);
    Ok(())
  }

  /// Iterates only the defined (written) partitions, for serialization (§4.2).
  pub fn defined_iter(&self) -> impl Iterator<Item = &PartitionRecord> {
    self.records.iter().filter_map(|r| r.as_ref()).filter(|r| r.subarray.is_defined())
  }

  pub fn defined_count(&self) -> usize {
    self.defined_iter().count()
  }
}

impl FromIterator<PartitionRecord> for PartitionTable {
  fn from_iter<I: IntoIterator<Item = PartitionRecord>>(iter: I) -> Self {
    let records: Vec<PartitionRecord> = iter.into_iter().collect();
    let pm_shape = records.iter()
      .fold(Vec::new(), |mut acc: Vec<usize>, r| {
        if acc.is_empty() {
          acc = vec![0; r.index.len()];
        }
        for (axis, &i) in r.index.iter().enumerate() {
          acc[axis] = acc[axis].max(i + 1);
        }
        acc
      });
    let mut table = PartitionTable::new(pm_shape);
    for record in records {
      table.set(record).expect("partition index within inferred pm_shape");
    }
    table
  }
}
