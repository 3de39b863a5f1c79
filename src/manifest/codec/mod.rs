pub mod v4;
pub mod v5;

use crate::manifest::partition::PartitionTable;

/// Decoded partitioning pulled back out of a wire attribute blob (§4.2, §6).
pub struct DecodedPartitioning {
  pub pm_shape: Vec<usize>,
  pub pm_dimensions: Vec<String>,
  pub partitions: PartitionTable,
}

pub(crate) fn join_dimensions(dims: &[String]) -> String {
  dims.join(" ")
}

pub(crate) fn split_dimensions(joined: &str) -> Vec<String> {
  joined.split_whitespace().map(|s| s.to_string()).collect()
}
