pub mod codec;
pub mod partition;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::common::error::GResult;
use crate::common::error::MissingEntity;
use crate::common::error::NameCollision;
use crate::common::error::UnsupportedOperation;
use crate::io::storage::ContainerFormat;
use crate::manifest::partition::PartitionTable;

/// Reserved-attribute prefix hidden from the user-visible metadata surface (MANIFEST MODEL).
pub const RESERVED_PREFIX: &str = "cfa_";

pub fn is_reserved_key(key: &str) -> bool {
  key.starts_with(RESERVED_PREFIX) || key == "cf_role" || key == "Conventions"
}

pub type Metadata = HashMap<String, serde_json::Value>;

/// Returns only the non-reserved entries of `metadata`, the view users see (§4.2).
pub fn user_metadata(metadata: &Metadata) -> Metadata {
  metadata.iter()
    .filter(|(k, _)| !is_reserved_key(k))
    .map(|(k, v)| (k.clone(), v.clone()))
    .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaVersion {
  V4,
  V5,
}

impl SchemaVersion {
  pub fn conventions_suffix(&self) -> &'static str {
    match self {
      SchemaVersion::V4 => "CFA-0.4",
      SchemaVersion::V5 => "CFA-0.5",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxisClass {
  T,
  Z,
  Y,
  X,
  N,
  U,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
  F32,
  F64,
  I8,
  I16,
  I32,
  I64,
  U8,
  U16,
  U32,
  U64,
  Str,
}

impl ElementType {
  pub fn size_bytes(&self) -> usize {
    match self {
      ElementType::F32 | ElementType::I32 | ElementType::U32 => 4,
      ElementType::F64 | ElementType::I64 | ElementType::U64 => 8,
      ElementType::I8 | ElementType::U8 => 1,
      ElementType::I16 | ElementType::U16 => 2,
      ElementType::Str => 0,  // variable-width; caller supplies an explicit byte budget
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dimension {
  pub name: String,
  pub length: Option<usize>,  // None = unlimited
  pub axis_class: AxisClass,
  pub metadata: Metadata,
  pub elem_type: ElementType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VariableRole {
  Coordinate {
    values: Vec<u8>,  // raw element bytes, interpreted per elem_type
  },
  Field {
    dims: Vec<String>,
    pm_shape: Vec<usize>,
    subarray_shape: Vec<usize>,
    partitions: PartitionTable,
    base_path_hint: Option<String>,
  },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
  pub name: String,
  pub elem_type: ElementType,
  pub metadata: Metadata,
  pub role: VariableRole,
}

impl Variable {
  pub fn is_field(&self) -> bool {
    matches!(self.role, VariableRole::Field { .. })
  }

  pub fn as_field(&self) -> GResult<(&Vec<String>, &Vec<usize>, &Vec<usize>, &PartitionTable)> {
    match &self.role {
      VariableRole::Field { dims, pm_shape, subarray_shape, partitions, .. } =>
        Ok((dims, pm_shape, subarray_shape, partitions)),
      VariableRole::Coordinate { .. } =>
        Err(UnsupportedOperation::boxed(format!("{} is a coordinate variable, not a field variable", self.name))),
    }
  }

  pub fn as_field_mut(&mut self) -> GResult<&mut PartitionTable> {
    match &mut self.role {
      VariableRole::Field { partitions, .. } => Ok(partitions),
      VariableRole::Coordinate { .. } =>
        Err(UnsupportedOperation::boxed(format!("{} is a coordinate variable, not a field variable", self.name))),
    }
  }

  /// Declared fill value, or the per-type default when absent (§4.4, §8 Fill-on-absent).
  pub fn fill_value(&self) -> serde_json::Value {
    self.metadata.get("_FillValue").cloned().unwrap_or_else(|| {
      if self.elem_type == ElementType::Str {
        serde_json::Value::String(String::new())
      } else {
        serde_json::Value::from(0)
      }
    })
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
  pub name: String,
  pub dimensions: HashMap<String, Dimension>,
  pub variables: HashMap<String, Variable>,
  pub metadata: Metadata,
}

impl Group {
  pub fn new(name: impl Into<String>) -> Group {
    Group { name: name.into(), dimensions: HashMap::new(), variables: HashMap::new(), metadata: HashMap::new() }
  }

  pub fn create_dimension(&mut self, name: &str, length: Option<usize>, axis_class: AxisClass, elem_type: ElementType) -> GResult<()> {
    if self.dimensions.contains_key(name) {
      return Err(NameCollision::boxed("dimension", name));
    }
    self.dimensions.insert(name.to_string(), Dimension {
      name: name.to_string(), length, axis_class, metadata: HashMap::new(), elem_type,
    });
    Ok(())
  }

  pub fn get_dimension(&self, name: &str) -> GResult<&Dimension> {
    self.dimensions.get(name).ok_or_else(|| MissingEntity::boxed("dimension", name))
  }

  pub fn rename_dimension(&mut self, old: &str, new: &str) -> GResult<()> {
    if self.dimensions.contains_key(new) {
      return Err(NameCollision::boxed("dimension", new));
    }
    let mut dim = self.dimensions.remove(old).ok_or_else(|| MissingEntity::boxed("dimension", old))?;
    dim.name = new.to_string();
    self.dimensions.insert(new.to_string(), dim);
    Ok(())
  }

  pub fn list_dimensions(&self) -> Vec<&str> {
    self.dimensions.keys().map(|s| s.as_str()).collect()
  }

  pub fn create_variable(&mut self, name: &str, elem_type: ElementType, role: VariableRole) -> GResult<()> {
    if self.variables.contains_key(name) {
      return Err(NameCollision::boxed("variable", name));
    }
    if let VariableRole::Field { dims, .. } = &role {
      for dim_name in dims {
        self.get_dimension(dim_name)?;
      }
    }
    self.variables.insert(name.to_string(), Variable {
      name: name.to_string(), elem_type, metadata: HashMap::new(), role,
    });
    Ok(())
  }

  pub fn get_variable(&self, name: &str) -> GResult<&Variable> {
    self.variables.get(name).ok_or_else(|| MissingEntity::boxed("variable", name))
  }

  pub fn get_variable_mut(&mut self, name: &str) -> GResult<&mut Variable> {
    self.variables.get_mut(name).ok_or_else(|| MissingEntity::boxed("variable", name))
  }

  pub fn rename_variable(&mut self, old: &str, new: &str) -> GResult<()> {
    if self.variables.contains_key(new) {
      return Err(NameCollision::boxed("variable", new));
    }
    let mut var = self.variables.remove(old).ok_or_else(|| MissingEntity::boxed("variable", old))?;
    var.name = new.to_string();
    self.variables.insert(new.to_string(), var);
    Ok(())
  }

  pub fn list_variables(&self) -> Vec<&str> {
    self.variables.keys().map(|s| s.as_str()).collect()
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
  pub name: String,
  pub container_format: String,  // serialized tag, see io::storage::ContainerFormat
  pub schema_version: SchemaVersion,
  pub metadata: Metadata,
  pub groups: HashMap<String, Group>,
}

impl Dataset {
  pub const ROOT_GROUP: &'static str = "root";

  pub fn new(name: impl Into<String>, container_format: ContainerFormat, schema_version: SchemaVersion) -> GResult<Dataset> {
    if schema_version == SchemaVersion::V5 && !container_format.supports_structured_subcontainers() {
      return Err(UnsupportedOperation::boxed(
        "schema v5 requires a container format with structured sub-containers"));
    }
    let mut groups = HashMap::new();
    groups.insert(Dataset::ROOT_GROUP.to_string(), Group::new(Dataset::ROOT_GROUP));
    Ok(Dataset {
      name: name.into(),
      container_format: format!("{:?}", container_format),
      schema_version,
      metadata: HashMap::new(),
      groups,
    })
  }

  pub fn create_group(&mut self, name: &str) -> GResult<()> {
    if self.groups.contains_key(name) {
      return Err(NameCollision::boxed("group", name));
    }
    self.groups.insert(name.to_string(), Group::new(name));
    Ok(())
  }

  pub fn get_group(&self, name: &str) -> GResult<&Group> {
    self.groups.get(name).ok_or_else(|| MissingEntity::boxed("group", name))
  }

  pub fn get_group_mut(&mut self, name: &str) -> GResult<&mut Group> {
    self.groups.get_mut(name).ok_or_else(|| MissingEntity::boxed("group", name))
  }

  pub fn rename_group(&mut self, old: &str, new: &str) -> GResult<()> {
    if old == Dataset::ROOT_GROUP {
      return Err(UnsupportedOperation::boxed("the root group cannot be renamed"));
    }
    if self.groups.contains_key(new) {
      return Err(NameCollision::boxed("group", new));
    }
    let mut group = self.groups.remove(old).ok_or_else(|| MissingEntity::boxed("group", old))?;
    group.name = new.to_string();
    self.groups.insert(new.to_string(), group);
    Ok(())
  }

  pub fn list_groups(&self) -> Vec<&str> {
    self.groups.keys().map(|s| s.as_str()).collect()
  }

  pub fn root(&self) -> &Group {
    self.groups.get(Dataset::ROOT_GROUP).expect("root group always present")
  }

  pub fn root_mut(&mut self) -> &mut Group {
    self.groups.get_mut(Dataset::ROOT_GROUP).expect("root group always present")
  }

  /// Appends this dataset's CFA conventions tag to any pre-existing `Conventions` value
  /// (EXTERNAL INTERFACES, Conventions attribute).
  pub fn stamp_conventions(&mut self) {
    let suffix = self.schema_version.conventions_suffix();
    let entry = self.metadata.entry("Conventions".to_string())
      .or_insert_with(|| serde_json::Value::String(String::new()));
    if let serde_json::Value::String(existing) = entry {
      if !existing.contains("CFA") {
        if existing.is_empty() {
          *existing = suffix.to_string();
        } else {
          existing.push(' ');
          existing.push_str(suffix);
        }
      }
    }
  }

  pub fn is_cfa_recognized(&self) -> bool {
    matches!(self.metadata.get("Conventions"), Some(serde_json::Value::String(s)) if s.contains("CFA"))
  }
}
