//! Wires the partition planner, manifest model, and resource manager into the small public
//! surface for create / open / read-slice / write-slice / close (COMPONENT DESIGN §4.4).

use std::rc::Rc;

use crate::common::error::GResult;
use crate::common::error::ManifestParseError;
use crate::common::error::UnsupportedOperation;
use crate::config::StoreConfig;
use crate::io::storage::sniff_container_format;
use crate::io::storage::Adaptor;
use crate::io::storage::ContainerFormat;
use crate::io::storage::LocalAdaptor;
use crate::io::storage::ObjectStoreAdaptor;
use crate::locator::Locator;
use crate::manifest::codec::v4;
use crate::manifest::codec::v5;
use crate::manifest::partition::PartitionRecord;
use crate::manifest::partition::PartitionTable;
use crate::manifest::partition::Subarray;
use crate::manifest::AxisClass;
use crate::manifest::Dataset as ManifestDataset;
use crate::manifest::ElementType;
use crate::manifest::SchemaVersion;
use crate::manifest::VariableRole;
use crate::planner;
use crate::planner::AxisSlab;
use crate::resource::OpenMode;
use crate::resource::ResourceManager;

/// Open modes for the façade (§4.4). Append is local-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  Read,
  Write,
  Append,
}

pub struct CreateOptions {
  pub container_format: ContainerFormat,
  pub schema_version: SchemaVersion,
  pub handle_soft_limit: usize,
}

impl Default for CreateOptions {
  fn default() -> Self {
    CreateOptions { container_format: ContainerFormat::ModernV5, schema_version: SchemaVersion::V5, handle_soft_limit: 256 }
  }
}

pub struct VariableOptions {
  pub subarray_shape: Option<Vec<usize>>,
  pub max_subarray_size: Option<usize>,
  pub axis_classes: Option<Vec<AxisClass>>,
}

impl Default for VariableOptions {
  fn default() -> Self {
    VariableOptions { subarray_shape: None, max_subarray_size: None, axis_classes: None }
  }
}

/// Byte-level magic stamped on a freshly written container, so a later `open` can sniff the
/// format the same way it would sniff a real HDF5/netCDF file (EXTERNAL INTERFACES, magic
/// sniff). The manifest JSON follows on the next line.
fn magic_for(format: ContainerFormat) -> &'static [u8] {
  match format {
    ContainerFormat::ModernV5 => b"\x89HDF\r\n\x1a\n",
    ContainerFormat::ModernV4 => &[0o016, 0o003, 0o023, 0o001],
    ContainerFormat::CdfClassic => b"CDF\x01",
    ContainerFormat::Cdf64BitOffset => b"CDF\x02",
    ContainerFormat::Cdf64BitData => b"CDF\x05",
  }
}

fn container_ext(format: ContainerFormat) -> &'static str {
  match format {
    ContainerFormat::ModernV5 | ContainerFormat::ModernV4 => "nc",
    ContainerFormat::CdfClassic | ContainerFormat::Cdf64BitOffset | ContainerFormat::Cdf64BitData => "cdf",
  }
}

fn format_to_tag(format: ContainerFormat) -> &'static str {
  match format {
    ContainerFormat::ModernV5 => "modern_v5",
    ContainerFormat::ModernV4 => "modern_v4",
    ContainerFormat::CdfClassic => "cdf_classic",
    ContainerFormat::Cdf64BitOffset => "cdf_64bit_offset",
    ContainerFormat::Cdf64BitData => "cdf_64bit_data",
  }
}

fn strides(shape: &[usize]) -> Vec<usize> {
  let mut strides = vec![1usize; shape.len()];
  for i in (0..shape.len().saturating_sub(1)).rev() {
    strides[i] = strides[i + 1] * shape[i + 1];
  }
  strides
}

/// Copies the element block `block_shape` starting at `src_start` within `src_shape` into
/// `dst` at `dst_start` within `dst_shape`, row-major, one contiguous run per innermost axis.
fn copy_block(elem_size: usize, src: &[u8], src_shape: &[usize], src_start: &[usize], dst: &mut [u8], dst_shape: &[usize], dst_start: &[usize], block_shape: &[usize]) {
  let n = block_shape.len();
  if n == 0 || block_shape.iter().any(|&e| e == 0) {
    return;
  }
  let src_strides = strides(src_shape);
  let dst_strides = strides(dst_shape);
  let last = n - 1;
  let row_elems = block_shape[last];

  let mut combos: Vec<Vec<usize>> = vec![Vec::new()];
  for &extent in &block_shape[..last] {
    let mut next = Vec::with_capacity(combos.len() * extent);
    for combo in &combos {
      for k in 0..extent {
        let mut e = combo.clone();
        e.push(k);
        next.push(e);
      }
    }
    combos = next;
  }

  for combo in combos {
    let src_index: Vec<usize> = combo.iter().zip(src_start).map(|(&c, &s)| c + s).chain(std::iter::once(src_start[last])).collect();
    let dst_index: Vec<usize> = combo.iter().zip(dst_start).map(|(&c, &s)| c + s).chain(std::iter::once(dst_start[last])).collect();
    let src_off = src_index.iter().zip(&src_strides).map(|(&i, &s)| i * s).sum::<usize>() * elem_size;
    let dst_off = dst_index.iter().zip(&dst_strides).map(|(&i, &s)| i * s).sum::<usize>() * elem_size;
    let run = row_elems * elem_size;
    dst[dst_off..dst_off + run].copy_from_slice(&src[src_off..src_off + run]);
  }
}

/// Fills `block_shape` at `dst_start` with a repeating single-element pattern (§8 Fill-on-absent).
fn fill_block(elem_size: usize, dst: &mut [u8], dst_shape: &[usize], dst_start: &[usize], block_shape: &[usize], fill_bytes: &[u8]) {
  if block_shape.is_empty() {
    return;
  }
  let stretched: Vec<u8> = fill_bytes.repeat(block_shape.iter().product());
  let zeros = vec![0usize; block_shape.len()];
  copy_block(elem_size, &stretched, block_shape, &zeros, dst, dst_shape, dst_start, block_shape);
}

/// Stamps each field variable's partitioning into the reserved `cfa_array` attribute, the
/// way a real CFA-aggregation reader would find it (§4.2, §6). Runs right before the
/// manifest blob is written out.
fn stamp_cfa_attributes(manifest: &mut ManifestDataset) {
  let schema_version = manifest.schema_version;
  for group in manifest.groups.values_mut() {
    for variable in group.variables.values_mut() {
      let blob = match &variable.role {
        VariableRole::Field { dims, pm_shape, partitions, .. } => Some(match schema_version {
          SchemaVersion::V4 => v4::encode(pm_shape, dims, partitions),
          SchemaVersion::V5 => v5::encode(pm_shape, dims, partitions),
        }),
        VariableRole::Coordinate { .. } => None,
      };
      if let Some(blob) = blob {
        variable.metadata.insert("cfa_array".to_string(), blob);
      }
    }
  }
}

/// Decodes each field variable's `cfa_array` attribute and checks it still agrees with the
/// live partition table, catching a manifest blob that was hand-edited or corrupted in transit.
fn verify_cfa_attributes(manifest: &ManifestDataset, locator: &str) -> GResult<()> {
  let schema_version = manifest.schema_version;
  for group in manifest.groups.values() {
    for variable in group.variables.values() {
      if let VariableRole::Field { pm_shape, .. } = &variable.role {
        if let Some(blob) = variable.metadata.get("cfa_array") {
          let decoded = match schema_version {
            SchemaVersion::V4 => v4::decode(blob, locator)?,
            SchemaVersion::V5 => v5::decode(blob, locator)?,
          };
          if &decoded.pm_shape != pm_shape {
            return Err(ManifestParseError::boxed(locator, format!("cfa_array pm_shape mismatch for variable {}", variable.name)));
          }
        }
      }
    }
  }
  Ok(())
}

/// The open dataset façade (§4.4 Dataset Façade).
pub struct Dataset {
  manifest: ManifestDataset,
  locator: Locator,
  adaptor: Rc<dyn Adaptor>,
  resource_manager: ResourceManager,
  mode: Mode,
}

impl Dataset {
  fn build_adaptor(locator: &Locator, config: &StoreConfig) -> GResult<Rc<dyn Adaptor>> {
    match locator {
      Locator::Local { .. } => Ok(Rc::new(LocalAdaptor::new())),
      Locator::Remote { alias, bucket, .. } => {
        let host = config.alias(alias).ok_or_else(|| UnsupportedOperation::boxed(format!("no host alias configured for {}", alias)))?;
        Ok(Rc::new(ObjectStoreAdaptor::new_s3(&host.url, bucket, &host.access_key, &host.secret_key)?))
      }
    }
  }

  /// `open(locator, mode, options)` (§4.4). Magic-bytes detection selects the container
  /// format on read/append; on write the caller's `CreateOptions` wins.
  pub fn open(raw_locator: &str, mode: Mode, config: &StoreConfig, create_options: CreateOptions) -> GResult<Dataset> {
    let locator = Locator::parse(raw_locator, config)?;
    if mode == Mode::Append && locator.is_remote() {
      return Err(UnsupportedOperation::boxed("append mode is local-only"));
    }
    let adaptor = Self::build_adaptor(&locator, config)?;
    let container_url = locator.container_url()?;

    let manifest = match mode {
      Mode::Write => {
        let mut manifest = ManifestDataset::new(locator.basename(), create_options.container_format, create_options.schema_version)?;
        stamp_cfa_attributes(&mut manifest);
        Self::persist(&adaptor, &container_url, create_options.container_format, &manifest)?;
        manifest
      }
      Mode::Read | Mode::Append => {
        let bytes = adaptor.read_all(&container_url)?;
        let head_len = bytes.len().min(8);
        let head: Vec<u8> = bytes[0..head_len].to_vec();
        let format = sniff_container_format(raw_locator, &head)?;
        let manifest = Self::load(&bytes, format)?;
        verify_cfa_attributes(&manifest, raw_locator)?;
        manifest
      }
    };

    let resource_manager = ResourceManager::new(adaptor.clone(), config.clone(), create_options.handle_soft_limit);
    Ok(Dataset { manifest, locator, adaptor, resource_manager, mode })
  }

  fn persist(adaptor: &Rc<dyn Adaptor>, url: &url::Url, format: ContainerFormat, manifest: &ManifestDataset) -> GResult<()> {
    let mut blob = magic_for(format).to_vec();
    blob.push(b'\n');
    blob.extend_from_slice(serde_json::to_string(manifest)?.as_bytes());
    adaptor.create(url)?;
    adaptor.write_all(url, &blob)
  }

  fn load(bytes: &crate::common::SharedBytes, format: ContainerFormat) -> GResult<ManifestDataset> {
    let all: Vec<u8> = bytes[0..bytes.len()].to_vec();
    let newline = all.iter().position(|&b| b == b'\n').unwrap_or(all.len());
    let _ = format; // the magic bytes only gate the sniff; the JSON body is self-describing.
    let json = &all[(newline + 1).min(all.len())..];
    Ok(serde_json::from_slice(json)?)
  }

  pub fn manifest(&self) -> &ManifestDataset {
    &self.manifest
  }

  pub fn create_group(&mut self, name: &str) -> GResult<()> {
    self.manifest.create_group(name)
  }

  pub fn create_dimension(&mut self, group: &str, name: &str, length: Option<usize>, axis_class: AxisClass, elem_type: ElementType) -> GResult<()> {
    self.manifest.get_group_mut(group)?.create_dimension(name, length, axis_class, elem_type)
  }

  fn resolve_master_shape(&self, group: &str, dims: &[String]) -> GResult<Vec<usize>> {
    let g = self.manifest.get_group(group)?;
    dims.iter().map(|d| g.get_dimension(d).map(|dim| dim.length.unwrap_or(0))).collect()
  }

  /// `create_variable(name, elem_type, dims, options)` (§4.4). Runs the planner when
  /// `options.subarray_shape` is not supplied explicitly.
  pub fn create_variable(&mut self, group: &str, name: &str, elem_type: ElementType, dims: Vec<String>, options: VariableOptions) -> GResult<()> {
    let master_shape = self.resolve_master_shape(group, &dims)?;
    let axis_classes = options.axis_classes.unwrap_or_else(|| {
      let inferred: Vec<AxisClass> = dims.iter().map(|d| planner::infer_axis_class(d, None)).collect();
      if inferred.iter().all(|c| *c == AxisClass::N) {
        planner::default_axis_classes(master_shape.len())
      } else {
        inferred
      }
    });
    let max_bytes = options.max_subarray_size.unwrap_or(50 * (1 << 20));
    let subarray_shape = options.subarray_shape.unwrap_or_else(|| {
      planner::select_subarray_shape(&master_shape, &axis_classes, elem_type.size_bytes(), max_bytes)
    });
    let pm_shape: Vec<usize> = master_shape.iter().zip(&subarray_shape).map(|(&s, &u)| s.div_ceil(u)).collect();

    self.manifest.get_group_mut(group)?.create_variable(name, elem_type, VariableRole::Field {
      dims,
      pm_shape: pm_shape.clone(),
      subarray_shape,
      partitions: PartitionTable::new(pm_shape),
      base_path_hint: None,
    })
  }

  fn container_format(&self) -> ContainerFormat {
    match self.manifest.container_format.as_str() {
      "ModernV5" => ContainerFormat::ModernV5,
      "ModernV4" => ContainerFormat::ModernV4,
      "CdfClassic" => ContainerFormat::CdfClassic,
      "Cdf64BitOffset" => ContainerFormat::Cdf64BitOffset,
      _ => ContainerFormat::Cdf64BitData,
    }
  }

  /// `variable[slab] = buffer` (§4.4, §5 Ordering guarantees): each touched partition's
  /// subarray file is written durably before the manifest's in-memory partition table is
  /// updated, so a crash mid-write never leaves the manifest pointing at a missing file.
  pub fn write_slab(&mut self, group: &str, variable: &str, request: &[AxisSlab], buffer: &[u8]) -> GResult<()> {
    if self.mode == Mode::Read {
      return Err(UnsupportedOperation::boxed("dataset opened read-only"));
    }
    let format = self.container_format();
    let basename = self.locator.basename();
    let elem_size = self.manifest.get_group(group)?.get_variable(variable)?.elem_type.size_bytes();
    let (dims, pm_shape, subarray_shape, _) = self.manifest.get_group(group)?.get_variable(variable)?.as_field()?;
    let dims = dims.clone();
    let pm_shape = pm_shape.clone();
    let subarray_shape = subarray_shape.clone();
    let master_shape = self.resolve_master_shape(group, &dims)?;
    let touched = planner::plan_read(&master_shape, &subarray_shape, &pm_shape, request)?;

    let request_shape: Vec<usize> = request.iter().map(|r| r.stop_inclusive - r.start + 1).collect();

    for partition in &touched {
      let subarray_shape_actual: Vec<usize> = partition.location.iter().map(|&(s, e)| e - s + 1).collect();
      let byte_len: usize = subarray_shape_actual.iter().product::<usize>() * elem_size;
      let file_name = planner::partition_file_name(&basename, Some(group), variable, &partition.index, container_ext(format));
      let url = self.locator.sibling(&file_name)?;

      self.resource_manager.request(&file_name, OpenMode::Write, self.locator.is_remote(), byte_len)?;
      let mut data = self.adaptor.read_all(&url).map(|b| b[0..b.len()].to_vec()).unwrap_or_else(|_| vec![0u8; byte_len]);
      if data.len() != byte_len {
        data = vec![0u8; byte_len];
      }
      self.resource_manager.mark_decoded(&file_name);

      let target_start: Vec<usize> = partition.target_slice.iter().map(|&(s, _)| s).collect();
      let source_start: Vec<usize> = partition.source_slice.iter().map(|&(s, _)| s).collect();
      let block_shape: Vec<usize> = (0..request.len()).map(|i| partition.target_slice[i].1 - partition.target_slice[i].0 + 1).collect();

      copy_block(elem_size, buffer, &request_shape, &target_start, &mut data, &subarray_shape_actual, &source_start, &block_shape);

      self.adaptor.create(&url)?;
      self.adaptor.write_all(&url, &data)?;
      self.resource_manager.free_file(&file_name, false)?;

      let record = PartitionRecord {
        index: partition.index.clone(),
        location: partition.location.clone(),
        subarray: Subarray {
          ncvar: variable.to_string(),
          file: file_name.clone(),
          format: format_to_tag(format).to_string(),
          shape: subarray_shape_actual,
        },
      };
      self.manifest.get_group_mut(group)?.get_variable_mut(variable)?.as_field_mut()?.set(record)?;
    }
    Ok(())
  }

  /// `buffer = variable[slab]` (§4.4). Undefined partitions are filled with the variable's
  /// fill value (§8 Fill-on-absent).
  pub fn read_slab(&self, group: &str, variable: &str, request: &[AxisSlab]) -> GResult<Vec<u8>> {
    let format = self.container_format();
    let basename = self.locator.basename();
    let var = self.manifest.get_group(group)?.get_variable(variable)?;
    let elem_size = var.elem_type.size_bytes();
    let fill_value_bytes = fill_value_bytes(&var.fill_value(), var.elem_type, elem_size);
    let (dims, pm_shape, subarray_shape, partitions) = var.as_field()?;
    let master_shape = self.resolve_master_shape(group, dims)?;
    let touched = planner::plan_read(&master_shape, subarray_shape, pm_shape, request)?;

    let request_shape: Vec<usize> = request.iter().map(|r| r.stop_inclusive - r.start + 1).collect();
    let result_elems: usize = request_shape.iter().product();
    let mut result = vec![0u8; result_elems * elem_size];

    for partition in &touched {
      let target_start: Vec<usize> = partition.target_slice.iter().map(|&(s, _)| s).collect();
      let source_start: Vec<usize> = partition.source_slice.iter().map(|&(s, _)| s).collect();
      let block_shape: Vec<usize> = (0..request.len()).map(|i| partition.target_slice[i].1 - partition.target_slice[i].0 + 1).collect();

      match partitions.get(&partition.index)? {
        Some(record) if record.subarray.is_defined() => {
          let file_name = planner::partition_file_name(&basename, Some(group), variable, &partition.index, container_ext(format));
          let url = self.locator.sibling(&file_name)?;
          self.resource_manager.request(&file_name, OpenMode::Read, self.locator.is_remote(), record.subarray.shape.iter().product::<usize>() * elem_size)?;
          let data = self.adaptor.read_all(&url)?;
          self.resource_manager.mark_decoded(&file_name);
          let buf: Vec<u8> = data[0..data.len()].to_vec();
          self.resource_manager.free_file(&file_name, false)?;
          copy_block(elem_size, &buf, &record.subarray.shape, &source_start, &mut result, &request_shape, &target_start, &block_shape);
        }
        _ => {
          fill_block(elem_size, &mut result, &request_shape, &target_start, &block_shape, &fill_value_bytes);
        }
      }
    }
    Ok(result)
  }

  /// Flushes the manifest (each subarray was already made durable by `write_slab`) and
  /// consumes the façade (§4.4 close, §5 ordering: manifest is always the last thing
  /// written, so a reader never sees a partition reference before its bytes exist).
  pub fn close(mut self) -> GResult<()> {
    if self.mode == Mode::Read {
      return Ok(());
    }
    self.manifest.stamp_conventions();
    stamp_cfa_attributes(&mut self.manifest);
    let format = self.container_format();
    let url = self.locator.container_url()?;
    Self::persist(&self.adaptor, &url, format, &self.manifest)
  }
}

fn fill_value_bytes(value: &serde_json::Value, elem_type: ElementType, elem_size: usize) -> Vec<u8> {
  if elem_type == ElementType::Str {
    return value.as_str().unwrap_or("").as_bytes().to_vec();
  }
  let n = value.as_f64().unwrap_or(0.0);
  let raw: Vec<u8> = match elem_type {
    ElementType::F32 => (n as f32).to_le_bytes().to_vec(),
    ElementType::F64 => n.to_le_bytes().to_vec(),
    ElementType::I8 => vec![n as i8 as u8],
    ElementType::I16 => (n as i16).to_le_bytes().to_vec(),
    ElementType::I32 => (n as i32).to_le_bytes().to_vec(),
    ElementType::I64 => (n as i64).to_le_bytes().to_vec(),
    ElementType::U8 => vec![n as u8],
    ElementType::U16 => (n as u16).to_le_bytes().to_vec(),
    ElementType::U32 => (n as u32).to_le_bytes().to_vec(),
    ElementType::U64 => (n as u64).to_le_bytes().to_vec(),
    ElementType::Str => unreachable!(),
  };
  raw.into_iter().chain(std::iter::repeat(0u8)).take(elem_size).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn dataset_path(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
  }

  fn full(len: usize) -> AxisSlab {
    AxisSlab::full(len)
  }

  #[test]
  fn scenario_small_1d_write_read() -> GResult<()> {
    let dir = TempDir::new()?;
    let path = dataset_path(&dir, "series.nc");
    let config = StoreConfig::default();
    let mut ds = Dataset::open(&path, Mode::Write, &config, CreateOptions::default())?;
    ds.create_dimension("root", "t", Some(100), AxisClass::T, ElementType::F32)?;
    ds.create_variable("root", "x", ElementType::F32, vec!["t".to_string()], VariableOptions {
      max_subarray_size: Some(4096),
      ..Default::default()
    })?;

    let values: Vec<f32> = (0..100).map(|i| i as f32).collect();
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    ds.write_slab("root", "x", &[full(100)], &bytes)?;

    let var = ds.manifest().get_group("root")?.get_variable("x")?;
    let (_, pm_shape, _, partitions) = var.as_field()?;
    assert_eq!(pm_shape, &vec![1]);
    let record = partitions.get(&[0])?.expect("partition written");
    assert!(record.subarray.file.ends_with(".x.0.nc"));

    let read_back = ds.read_slab("root", "x", &[full(100)])?;
    assert_eq!(read_back, bytes);
    ds.close()?;
    Ok(())
  }

  #[test]
  fn scenario_2d_planner_balance_and_cross_partition_read() -> GResult<()> {
    let dir = TempDir::new()?;
    let path = dataset_path(&dir, "field.nc");
    let config = StoreConfig::default();
    let mut ds = Dataset::open(&path, Mode::Write, &config, CreateOptions::default())?;
    ds.create_dimension("root", "y", Some(200), AxisClass::Y, ElementType::F32)?;
    ds.create_dimension("root", "x", Some(200), AxisClass::X, ElementType::F32)?;
    ds.create_variable("root", "f", ElementType::F32, vec!["y".to_string(), "x".to_string()], VariableOptions {
      max_subarray_size: Some(40000),
      ..Default::default()
    })?;

    {
      let var = ds.manifest().get_group("root")?.get_variable("f")?;
      let (_, pm_shape, subarray_shape, _) = var.as_field()?;
      assert_eq!(subarray_shape, &vec![100, 100]);
      assert_eq!(pm_shape, &vec![2, 2]);
    }

    let mut ramp = vec![0f32; 200 * 200];
    for i in 0..200 {
      for j in 0..200 {
        ramp[i * 200 + j] = (i * 200 + j) as f32;
      }
    }
    let bytes: Vec<u8> = ramp.iter().flat_map(|v| v.to_le_bytes()).collect();
    ds.write_slab("root", "f", &[full(200), full(200)], &bytes)?;

    // scenario 3: cross-partition slab [0..199, 150..160] touches exactly 2 partitions
    // (spans partition rows 0 and 1 on axis 0, stays in partition column 1 on axis 1).
    let slab = vec![
      AxisSlab { start: 0, stop_inclusive: 199, step: 1 },
      AxisSlab { start: 150, stop_inclusive: 160, step: 1 },
    ];
    let result = ds.read_slab("root", "f", &slab)?;
    assert_eq!(result.len(), 200 * 11 * 4);
    for i in 0..200usize {
      for j in 150..=160usize {
        let expected = (i * 200 + j) as f32;
        let off = (i * 11 + (j - 150)) * 4;
        let got = f32::from_le_bytes(result[off..off + 4].try_into().unwrap());
        assert_eq!(got, expected);
      }
    }
    ds.close()?;
    Ok(())
  }

  #[test]
  fn scenario_undefined_partition_fill() -> GResult<()> {
    let dir = TempDir::new()?;
    let path = dataset_path(&dir, "fillme.nc");
    let config = StoreConfig::default();
    let mut ds = Dataset::open(&path, Mode::Write, &config, CreateOptions::default())?;
    ds.create_dimension("root", "y", Some(200), AxisClass::Y, ElementType::F32)?;
    ds.create_dimension("root", "x", Some(200), AxisClass::X, ElementType::F32)?;
    ds.create_variable("root", "f", ElementType::F32, vec!["y".to_string(), "x".to_string()], VariableOptions {
      max_subarray_size: Some(40000),
      ..Default::default()
    })?;
    ds.manifest.get_group_mut("root")?.get_variable_mut("f")?.metadata.insert(
      "_FillValue".to_string(), serde_json::json!(-9));

    // write only partition (0,0): the top-left 100x100 block.
    let block: Vec<f32> = vec![1.0; 100 * 100];
    let bytes: Vec<u8> = block.iter().flat_map(|v| v.to_le_bytes()).collect();
    ds.write_slab("root", "f", &[
      AxisSlab { start: 0, stop_inclusive: 99, step: 1 },
      AxisSlab { start: 0, stop_inclusive: 99, step: 1 },
    ], &bytes)?;

    let result = ds.read_slab("root", "f", &[full(200), full(200)])?;
    for i in 0..200usize {
      for j in 0..200usize {
        let off = (i * 200 + j) * 4;
        let got = f32::from_le_bytes(result[off..off + 4].try_into().unwrap());
        let expected = if i < 100 && j < 100 { 1.0 } else { -9.0 };
        assert_eq!(got, expected, "mismatch at ({}, {})", i, j);
      }
    }
    ds.close()?;
    Ok(())
  }

  #[test]
  fn reopen_after_close_preserves_partitions() -> GResult<()> {
    let dir = TempDir::new()?;
    let path = dataset_path(&dir, "reopen.nc");
    let config = StoreConfig::default();
    let mut ds = Dataset::open(&path, Mode::Write, &config, CreateOptions::default())?;
    ds.create_dimension("root", "t", Some(10), AxisClass::T, ElementType::F32)?;
    ds.create_variable("root", "x", ElementType::F32, vec!["t".to_string()], VariableOptions::default())?;
    let values: Vec<f32> = (0..10).map(|i| i as f32).collect();
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    ds.write_slab("root", "x", &[full(10)], &bytes)?;
    ds.close()?;

    let reopened = Dataset::open(&path, Mode::Read, &config, CreateOptions::default())?;
    let read_back = reopened.read_slab("root", "x", &[full(10)])?;
    assert_eq!(read_back, bytes);
    Ok(())
  }

  #[test]
  fn write_rejected_on_read_only_dataset() -> GResult<()> {
    let dir = TempDir::new()?;
    let path = dataset_path(&dir, "ro.nc");
    let config = StoreConfig::default();
    let mut ds = Dataset::open(&path, Mode::Write, &config, CreateOptions::default())?;
    ds.create_dimension("root", "t", Some(10), AxisClass::T, ElementType::F32)?;
    ds.create_variable("root", "x", ElementType::F32, vec!["t".to_string()], VariableOptions::default())?;
    ds.close()?;

    let mut reopened = Dataset::open(&path, Mode::Read, &config, CreateOptions::default())?;
    let bytes = vec![0u8; 40];
    assert!(reopened.write_slab("root", "x", &[full(10)], &bytes).is_err());
    Ok(())
  }

  #[test]
  fn append_on_remote_locator_is_unsupported() {
    let mut hosts = std::collections::HashMap::new();
    hosts.insert("myminio".to_string(), crate::config::HostAlias {
      backend: "s3".to_string(), url: "http://localhost:9000".to_string(),
      access_key: "k".to_string(), secret_key: "s".to_string(),
    });
    let config = StoreConfig { hosts, ..StoreConfig::default() };
    let result = Dataset::open("myminio://host/bucket/key.nc", Mode::Append, &config, CreateOptions::default());
    assert!(result.is_err());
  }
}
