use serde_json::json;
use serde_json::Value;

use crate::common::error::GResult;
use crate::common::error::ManifestParseError;
use crate::manifest::codec::split_dimensions;
use crate::manifest::codec::DecodedPartitioning;
use crate::manifest::partition::PartitionRecord;
use crate::manifest::partition::PartitionTable;
use crate::manifest::partition::Subarray;

/// Name of the sub-container a field variable's v5 partitioning is stored under.
pub fn subcontainer_name(variable_name: &str) -> String {
  format!("cfa_{}", variable_name)
}

/// v5 (structured): parallel arrays `pmshape[rank]`, `pmdimensions`, `index[...,X]`,
/// `location[...,X,2]`, `ncvar[...]`, `file[...]`, `format[...]`, `shape[...,X]` where
/// `X = rank` (§4.2, §6). Only defined partitions are serialized.
pub fn encode(pm_shape: &[usize], pm_dimensions: &[String], partitions: &PartitionTable) -> Value {
  let defined: Vec<_> = partitions.defined_iter().collect();
  json!({
    "pmshape": pm_shape,
    "pmdimensions": pm_dimensions.join(" "),
    "index": defined.iter().map(|r| r.index.clone()).collect::<Vec<_>>(),
    "location": defined.iter()
      .map(|r| r.location.iter().map(|(s, e)| json!([s, e])).collect::<Vec<_>>())
      .collect::<Vec<_>>(),
    "ncvar": defined.iter().map(|r| r.subarray.ncvar.clone()).collect::<Vec<_>>(),
    "file": defined.iter().map(|r| r.subarray.file.clone()).collect::<Vec<_>>(),
    "format": defined.iter().map(|r| r.subarray.format.clone()).collect::<Vec<_>>(),
    "shape": defined.iter().map(|r| r.subarray.shape.clone()).collect::<Vec<_>>(),
  })
}

fn required_str_array<'a>(blob: &'a Value, key: &str, locator: &str) -> GResult<&'a Vec<Value>> {
  blob.get(key)
    .ok_or_else(|| ManifestParseError::boxed(locator, format!("missing required key {}", key)))?
    .as_array()
    .ok_or_else(|| ManifestParseError::boxed(locator, format!("{} must be an array", key)))
}

pub fn decode(blob: &Value, locator: &str) -> GResult<DecodedPartitioning> {
  let pm_shape: Vec<usize> = required_str_array(blob, "pmshape", locator)?
    .iter()
    .map(|v| v.as_u64().map(|n| n as usize))
    .collect::<Option<Vec<usize>>>()
    .ok_or_else(|| ManifestParseError::boxed(locator, "pmshape entries must be integers"))?;

  let pm_dimensions = blob.get("pmdimensions")
    .and_then(|v| v.as_str())
    .map(split_dimensions)
    .unwrap_or_default();

  let index_rows = required_str_array(blob, "index", locator)?;
  let location_rows = required_str_array(blob, "location", locator)?;
  let ncvar_rows = required_str_array(blob, "ncvar", locator)?;
  let file_rows = required_str_array(blob, "file", locator)?;
  let format_rows = required_str_array(blob, "format", locator)?;
  let shape_rows = blob.get("shape")
    .ok_or_else(|| ManifestParseError::boxed(locator, "missing required key shape"))?
    .as_array()
    .ok_or_else(|| ManifestParseError::boxed(locator, "shape must be an array"))?;

  let n = index_rows.len();
  if [location_rows.len(), ncvar_rows.len(), file_rows.len(), format_rows.len(), shape_rows.len()]
    .iter().any(|&len| len != n) {
    return Err(ManifestParseError::boxed(locator, "parallel partition arrays have mismatched lengths"));
  }

  let mut table = PartitionTable::new(pm_shape.clone());
  for i in 0..n {
    let index: Vec<usize> = index_rows[i].as_array()
      .ok_or_else(|| ManifestParseError::boxed(locator, "index row must be an array"))?
      .iter().map(|v| v.as_u64().map(|n| n as usize))
      .collect::<Option<Vec<usize>>>()
      .ok_or_else(|| ManifestParseError::boxed(locator, "index entries must be integers"))?;

    let location: Vec<(usize, usize)> = location_rows[i].as_array()
      .ok_or_else(|| ManifestParseError::boxed(locator, "location row must be an array"))?
      .iter().map(|pair| {
        let pair = pair.as_array()?;
        Some((pair.first()?.as_u64()? as usize, pair.get(1)?.as_u64()? as usize))
      })
      .collect::<Option<Vec<(usize, usize)>>>()
      .ok_or_else(|| ManifestParseError::boxed(locator, "location entries must be [start, end] pairs"))?;

    let shape: Vec<usize> = shape_rows[i].as_array()
      .ok_or_else(|| ManifestParseError::boxed(locator, "shape row must be an array"))?
      .iter().map(|v| v.as_u64().map(|n| n as usize))
      .collect::<Option<Vec<usize>>>()
      .ok_or_else(|| ManifestParseError::boxed(locator, "shape entries must be integers"))?;

    // fixed-width character arrays truncate on the first null byte when decoded (§6).
    let truncate_null = |s: &str| s.split('\0').next().unwrap_or("").to_string();
    let subarray = Subarray {
      ncvar: truncate_null(ncvar_rows[i].as_str().unwrap_or_default()),
      file: truncate_null(file_rows[i].as_str().unwrap_or_default()),
      format: truncate_null(format_rows[i].as_str().unwrap_or_default()),
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
      index: vec![1],
      location: vec![(10, 19)],
      subarray: Subarray { ncvar: "x".into(), file: "a.1.nc".into(), format: "modern_v5".into(), shape: vec![10] },
    }).unwrap();
    table
  }

  #[test]
  fn subcontainer_name_follows_convention() {
    assert_eq!(subcontainer_name("temperature"), "cfa_temperature");
  }

  #[test]
  fn round_trips_defined_partitions() -> GResult<()> {
    let table = sample_table();
    let blob = encode(&[2], &["t".to_string()], &table);
    let decoded = decode(&blob, "loc")?;
    let record = decoded.partitions.get(&[1])?.expect("partition present");
    assert_eq!(record.subarray.file, "a.1.nc");
    assert!(decoded.partitions.get(&[0])?.is_none());
    Ok(())
  }

  #[test]
  fn truncates_fixed_width_strings_on_null() -> GResult<()> {
    let blob = json!({
      "pmshape": [1], "pmdimensions": "t",
      "index": [[0]], "location": [[[0, 9]]],
      "ncvar": ["x\0\0\0"], "file": ["a.nc\0\0"], "format": ["modern_v5\0"],
      "shape": [[10]],
    });
    let decoded = decode(&blob, "loc")?;
    let record = decoded.partitions.get(&[0])?.unwrap();
    assert_eq!(record.subarray.ncvar, "x");
    assert_eq!(record.subarray.file, "a.nc");
    Ok(())
  }

  #[test]
  fn mismatched_array_lengths_is_parse_error() {
    let blob = json!({
      "pmshape": [1],
      "index": [[0]], "location": [[[0, 9]]],
      "ncvar": ["x"], "file": [], "format": ["modern_v5"],
      "shape": [[10]],
    });
    assert!(decode(&blob, "loc").is_err());
  }
}
