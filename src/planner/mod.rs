//! Subarray-shape selection and hyperslab-to-partition mapping (COMPONENT DESIGN §4.1).

use crate::common::error::GResult;
use crate::common::error::IndexOutOfRange;
use crate::manifest::AxisClass;

/// One axis of a hyperslab request: `[start, stop_inclusive, step]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisSlab {
  pub start: usize,
  pub stop_inclusive: usize,
  pub step: usize,
}

impl AxisSlab {
  pub fn full(len: usize) -> AxisSlab {
    AxisSlab { start: 0, stop_inclusive: len.saturating_sub(1), step: 1 }
  }
}

/// Inclusive span `[start, end]`.
pub type Span = (usize, usize);

/// One partition touched by a hyperslab request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchedPartition {
  pub index: Vec<usize>,
  pub location: Vec<Span>,
  /// Per-axis inclusive slice into the caller's result buffer.
  pub target_slice: Vec<Span>,
  /// Per-axis inclusive slice into the subarray itself.
  pub source_slice: Vec<Span>,
}

/// Infers an axis class for a dimension name/metadata when the caller does not supply one
/// explicitly (§4.1 Axis-class inference).
pub fn infer_axis_class(name: &str, explicit: Option<&str>) -> AxisClass {
  if let Some(tag) = explicit {
    match tag {
      "T" => return AxisClass::T,
      "Z" => return AxisClass::Z,
      "Y" => return AxisClass::Y,
      "X" => return AxisClass::X,
      "N" => return AxisClass::N,
      _ => {}
    }
  }
  let lower = name.to_lowercase();
  if lower == "t" || lower.contains("time") {
    AxisClass::T
  } else if lower == "z" || lower.contains("level") {
    AxisClass::Z
  } else if lower == "y" || lower.contains("lat") {
    AxisClass::Y
  } else if lower == "x" || lower.contains("lon") {
    AxisClass::X
  } else {
    AxisClass::N
  }
}

/// Rank-based default axis classes when every dimension inferred to `N` (§4.1).
pub fn default_axis_classes(rank: usize) -> Vec<AxisClass> {
  match rank {
    1 => vec![AxisClass::T],
    2 => vec![AxisClass::Y, AxisClass::X],
    3 => vec![AxisClass::T, AxisClass::Y, AxisClass::X],
    4 => vec![AxisClass::T, AxisClass::Z, AxisClass::Y, AxisClass::X],
    _ => vec![AxisClass::N; rank],
  }
}

fn axis_of_class<'a>(classes: &'a [AxisClass], wanted: &[AxisClass]) -> Option<usize> {
  classes.iter().position(|c| wanted.contains(c))
}

/// Chooses a subarray shape `U` with `U[i] <= S[i]` and `prod(U) * elem_size <= max_bytes`
/// (§4.1 Subarray-shape selection).
pub fn select_subarray_shape(shape: &[usize], axis_classes: &[AxisClass], elem_size: usize, max_bytes: usize) -> Vec<usize> {
  assert_eq!(shape.len(), axis_classes.len());
  let n = shape.len();
  if n == 0 {
    return Vec::new();
  }
  let mut d = vec![1usize; n];

  let division_bytes = |d: &[usize]| -> usize {
    shape.iter().zip(d.iter())
      .map(|(&s, &di)| s.div_ceil(di))
      .product::<usize>()
      .saturating_mul(elem_size)
  };

  let linear_axis = axis_of_class(axis_classes, &[AxisClass::T])
    .or_else(|| axis_of_class(axis_classes, &[AxisClass::Z]))
    .or_else(|| axis_of_class(axis_classes, &[AxisClass::N]));
  let field_axes: Vec<usize> = (0..n).filter(|&i| matches!(axis_classes[i], AxisClass::X | AxisClass::Y)).collect();

  while division_bytes(&d) > max_bytes {
    let linear_ops = linear_axis.map(|t| d[t] as i64).unwrap_or(-1);
    let field_ops: i64 = if field_axes.is_empty() {
      -1
    } else {
      field_axes.iter().map(|&i| d[i] as i64).product()
    };

    let candidate_set: Vec<usize> = if field_ops != -1 && (linear_ops == -1 || field_ops <= linear_ops) {
      field_axes.clone()
    } else {
      linear_axis.into_iter().collect()
    };

    let pick = candidate_set.iter()
      .filter(|&&i| d[i] < shape[i])
      .min_by_key(|&&i| d[i]);

    let pick = match pick {
      Some(&i) => i,
      // chosen axis family is saturated or empty; fall back to any axis with room.
      None => match (0..n).filter(|&i| d[i] < shape[i]).min_by_key(|&i| d[i]) {
        Some(i) => i,
        None => break,
      },
    };
    d[pick] += 1;
  }

  shape.iter().zip(d.iter()).map(|(&s, &di)| s.div_ceil(di)).collect()
}

/// Maps a per-axis hyperslab request onto the partitions it touches, with per-axis
/// target/source slices (§4.1 Hyperslab -> partitions).
pub fn plan_read(master_shape: &[usize], subarray_shape: &[usize], pm_shape: &[usize], request: &[AxisSlab]) -> GResult<Vec<TouchedPartition>> {
  let n = master_shape.len();
  if subarray_shape.len() != n || pm_shape.len() != n || request.len() != n {
    return Err(IndexOutOfRange::boxed("hyperslab request rank does not match variable rank"));
  }
  for (i, slab) in request.iter().enumerate() {
    if slab.stop_inclusive >= master_shape[i] || slab.start > slab.stop_inclusive {
      return Err(IndexOutOfRange::boxed(format!("axis {} slab [{}..{}] out of range (len {})", i, slab.start, slab.stop_inclusive, master_shape[i])));
    }
  }

  let partition_ranges: Vec<(usize, usize)> = (0..n)
    .map(|i| (request[i].start / subarray_shape[i], request[i].stop_inclusive / subarray_shape[i]))
    .collect();

  let mut combos: Vec<Vec<usize>> = vec![Vec::new()];
  for &(lo, hi) in &partition_ranges {
    let mut next = Vec::new();
    for combo in &combos {
      for k in lo..=hi {
        let mut extended = combo.clone();
        extended.push(k);
        next.push(extended);
      }
    }
    combos = next;
  }

  let mut touched = Vec::with_capacity(combos.len());
  for index in combos {
    let mut location = Vec::with_capacity(n);
    let mut target_slice = Vec::with_capacity(n);
    let mut source_slice = Vec::with_capacity(n);
    for i in 0..n {
      let k = index[i];
      let loc_start = k * subarray_shape[i];
      let loc_end = (loc_start + subarray_shape[i] - 1).min(master_shape[i] - 1);
      location.push((loc_start, loc_end));

      let start = request[i].start;
      let stop = request[i].stop_inclusive;
      target_slice.push((loc_start.max(start) - start, loc_end.min(stop) - start));
      source_slice.push((start.saturating_sub(loc_start), stop.min(loc_end) - loc_start));
    }
    let _ = pm_shape;
    touched.push(TouchedPartition { index, location, target_slice, source_slice });
  }
  Ok(touched)
}

/// `<dataset-basename>/<dataset-basename>[.<group>].<variable>.<k[0]>.<k[1]>....<container-ext>`
/// (§4.1 Partition naming).
pub fn partition_file_name(dataset_basename: &str, group: Option<&str>, variable: &str, index: &[usize], container_ext: &str) -> String {
  let mut stem = dataset_basename.to_string();
  if let Some(g) = group {
    if g != "root" {
      stem.push('.');
      stem.push_str(g);
    }
  }
  stem.push('.');
  stem.push_str(variable);
  for k in index {
    stem.push('.');
    stem.push_str(&k.to_string());
  }
  stem.push('.');
  stem.push_str(container_ext);
  format!("{}/{}", dataset_basename, stem)
}
