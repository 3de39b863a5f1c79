use serde_json::json;
use serde_json::Value;

use crate::common::error::GResult;
use crate::common::error::ManifestParseError;
use crate::manifest::codec::split_dimensions;
use crate::manifest::codec::DecodedPartitioning;
use crate::manifest::partition::PartitionRecord;
use crate::manifest::partition::PartitionTable;
use crate::manifest::partition::Subarray;

/// v4 (compact): the variable carries a single JSON document in the reserved `cfa_array`
/// attribute, with top-level keys `pmshape`, `pmdimensions`, `Partitions` (§4.2, §6).
pub fn encode(pm_shape: &[usize], pm_dimensions: &[String], partitions: &PartitionTable) -> Value {
  let parts: Vec<Value> = partitions.defined_iter().map(|record| {
    json!({
      "index": record.index,
      "location": record.location.iter().map(|(s, e)| json!([s, e])).collect::<Vec<_>>(),
      "subarray": {
        "ncvar": record.subarray.ncvar,
        "file": record.subarray.file,
        "format": record.subarray.format,
        "shape": record.subarray.shape,
      },
    })
  }).collect();
  json!({
    "pmshape": pm_shape,
    "pmdimensions": pm_dimensions.join(" "),
    "Partitions": parts,
  })
}

pub fn decode(blob: &Value, locator: &str) -> GResult<DecodedPartitioning> {
  let pm_shape: Vec<usize> = blob.get("pmshape")
    .ok_or_else(|| ManifestParseError::boxed(locator, "missing required key pmshape"))?
    .as_array()
    .ok_or_else(|| ManifestParseError::boxed(locator, "pmshape must be an array"))?
    .iter()
    .map(|v| v.as_u64().map(|n| n as usize))
    .collect::<Option<Vec<usize>>>()
    .ok_or_else(|| ManifestParseError::boxed(locator, "pmshape entries must be integers"))?;

  // pmdimensions is allowed to be absent per base-optional tolerance in §4.2; default empty.
  let pm_dimensions = blob.get("pmdimensions")
    .and_then(|v| v.as_str())
    .map(split_dimensions)
    .unwrap_or_default();

  let parts = blob.get("Partitions")
    .ok_or_else(|| ManifestParseError::boxed(locator, "missing required key Partitions"))?
    .as_array()
    .ok_or_else(|| ManifestParseError::boxed(locator, "Partitions must be an array"))?;

  let mut table = PartitionTable::new(pm_shape.clone());
  for part in parts {
    let index: Vec<usize> = part.get("index")
      .ok_or_else(|| ManifestParseError::boxed(locator, "partition missing index"))?
      .as_array().ok_or_else(|| ManifestParseError::boxed(locator, "index must be an array"))?
      .iter().map(|v| v.as_u64().map(|n| n as usize))
      .collect::<Option<Vec<usize>>>()
      .ok_or_else(|| ManifestParseError::boxed(locator, "index entries must be integers"))?;

    let location: Vec<(usize, usize)> = part.get("location")
      .ok_or_else(|| ManifestParseError::boxed(locator, "partition missing location"))?
      .as_array().ok_or_else(|| ManifestParseError::boxed(locator, "location must be an array"))?
      .iter().map(|pair| {
        let pair = pair.as_array()?;
        Some((pair.first()?.as_u64()? as usize, pair.get(1)?.as_u64()? as usize))
      })
      .collect::<Option<Vec<(usize, usize)>>>()
      .ok_or_else(|| ManifestParseError::boxed(locator, "location entries must be [start, end] pairs"))?;

    let subarray_blob = part.get("subarray")
      .ok_or_else(|| ManifestParseError::boxed(locator, "partition missing subarray"))?;
    let shape: Vec<usize> = subarray_blob.get("shape")
      .ok_or_else(|| ManifestParseError::boxed(locator, "subarray missing required key shape"))?
      .as_array().ok_or_else(|| ManifestParseError::boxed(locator, "shape must be an array"))?
      .iter().map(|v| v.as_u64().map(|n| n as usize))
      .collect::<Option<Vec<usize>>>()
      .ok_or_else(|| ManifestParseError::boxed(locator, "shape entries must be integers"))?;

    let subarray = Subarray {
      ncvar: subarray_blob.get("ncvar").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
      file: subarray_blob.get("file").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
      format: subarray_blob.get("format").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
      shape,
    };

    table.set(PartitionRecord { index, location, subarray })
      .map_err(|_| ManifestParseError::boxed(locator, "partition index outside declared pmshape"))?;
  }

  Ok(DecodedPartitioning { pm_shape, pm_dimensions, partitions: table })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_table() -> PartitionTable {
    let mut table = PartitionTable::new(vec![2]);
    table.set(PartitionRecord {
      index: vec![0],
      location: vec![(0, 9)],
      subarray: Subarray { ncvar: "x".into(), file: "a.0.nc".into(), format: "cdf_classic".into(), shape: vec![10] },
    }).unwrap();
    table
  }

  #[test]
  fn round_trips_defined_partitions() -> GResult<()> {
    let table = sample_table();
    let blob = encode(&[2], &["t".to_string()], &table);
    let decoded = decode(&blob, "loc")?;
    assert_eq!(decoded.pm_shape, vec![2]);
    assert_eq!(decoded.pm_dimensions, vec!["t".to_string()]);
    let record = decoded.partitions.get(&[0])?.expect("partition present");
    assert_eq!(record.subarray.file, "a.0.nc");
    assert!(decoded.partitions.get(&[1])?.is_none());
    Ok(())
  }

  #[test]
  fn missing_partitions_key_is_parse_error() {
    let blob = json!({ "pmshape": [2] });
    assert!(decode(&blob, "loc").is_err());
  }

  #[test]
  fn missing_pmdimensions_tolerated() -> GResult<()> {
    let blob = json!({ "pmshape": [1], "Partitions": [] });
    let decoded = decode(&blob, "loc")?;
    assert!(decoded.pm_dimensions.is_empty());
    Ok(())
  }

  #[test]
  fn missing_shape_within_subarray_is_parse_error() {
    let blob = json!({
      "pmshape": [1],
      "Partitions": [{
        "index": [0], "location": [[0, 9]],
        "subarray": { "ncvar": "x", "file": "a.nc", "format": "cdf_classic" }
      }]
    });
    assert!(decode(&blob, "loc").is_err());
  }
}
