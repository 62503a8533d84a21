//! Managed collections and the value model for definition metadata.
//!
//! Constructor arguments and property values are held as [`Value`]s until
//! instantiation time, so they can carry unresolved references to other
//! services. The managed container kinds additionally carry type hints and
//! parent-merge semantics.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::Instance;

/// A metadata-level value: either already concrete, or something to resolve
/// when the owning definition is instantiated.
#[derive(Clone)]
pub enum Value {
  /// An intentionally absent value.
  Null,
  /// A plain string literal.
  Str(String),
  /// A string literal carrying a target-type hint for conversion.
  TypedStr { value: String, type_name: String },
  /// A runtime reference to another service by name. `parent` routes the
  /// lookup to the parent container.
  Ref { service: String, parent: bool },
  /// An already-resolved instance.
  Direct(Instance),
  List(ManagedList),
  Set(ManagedSet),
  Map(ManagedMap),
  Props(ManagedProps),
  Array(ManagedArray),
}

impl Value {
  pub fn string(value: impl Into<String>) -> Self {
    Value::Str(value.into())
  }

  pub fn reference(service: impl Into<String>) -> Self {
    Value::Ref {
      service: service.into(),
      parent: false,
    }
  }

  pub fn parent_reference(service: impl Into<String>) -> Self {
    Value::Ref {
      service: service.into(),
      parent: true,
    }
  }

  fn kind(&self) -> &'static str {
    match self {
      Value::Null => "null",
      Value::Str(_) => "string",
      Value::TypedStr { .. } => "typed string",
      Value::Ref { .. } => "reference",
      Value::Direct(_) => "instance",
      Value::List(_) => "list",
      Value::Set(_) => "set",
      Value::Map(_) => "map",
      Value::Props(_) => "props",
      Value::Array(_) => "array",
    }
  }

  /// Whether this value is a managed container that can merge with a parent
  /// value of the same kind.
  pub fn is_mergeable(&self) -> bool {
    matches!(
      self,
      Value::List(_) | Value::Set(_) | Value::Map(_) | Value::Props(_) | Value::Array(_)
    )
  }

  /// Whether merging is enabled on this (managed) value.
  pub fn merge_enabled(&self) -> bool {
    match self {
      Value::List(v) => v.merge_enabled,
      Value::Set(v) => v.merge_enabled,
      Value::Map(v) => v.merge_enabled,
      Value::Props(v) => v.merge_enabled,
      Value::Array(v) => v.merge_enabled,
      _ => false,
    }
  }

  /// Merges this (child) value with a parent value of the same kind:
  /// parent entries first, followed by (or overridden by) this value's
  /// entries. Fails if merging is disabled here or the parent is of an
  /// incompatible kind.
  pub fn merge(&self, parent: &Value) -> Result<Value> {
    if !self.is_mergeable() {
      return Err(Error::configuration(
        self.kind(),
        "value is not a managed container and cannot merge",
      ));
    }
    if !self.merge_enabled() {
      return Err(Error::configuration(
        self.kind(),
        "merging is not enabled for this container",
      ));
    }
    match (self, parent) {
      (Value::List(child), Value::List(parent)) => Ok(Value::List(child.merged_with(parent))),
      (Value::Set(child), Value::Set(parent)) => Ok(Value::Set(child.merged_with(parent))),
      (Value::Map(child), Value::Map(parent)) => Ok(Value::Map(child.merged_with(parent))),
      (Value::Props(child), Value::Props(parent)) => Ok(Value::Props(child.merged_with(parent))),
      (Value::Array(child), Value::Array(parent)) => Ok(Value::Array(child.merged_with(parent))),
      (child, parent) => Err(Error::configuration(
        child.kind(),
        format!(
          "cannot merge a {} with a parent {}",
          child.kind(),
          parent.kind()
        ),
      )),
    }
  }
}

// Structural equality; `Direct` values compare by identity since arbitrary
// instances carry no equality of their own.
impl PartialEq for Value {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Value::Null, Value::Null) => true,
      (Value::Str(a), Value::Str(b)) => a == b,
      (
        Value::TypedStr {
          value: av,
          type_name: at,
        },
        Value::TypedStr {
          value: bv,
          type_name: bt,
        },
      ) => av == bv && at == bt,
      (
        Value::Ref {
          service: a,
          parent: ap,
        },
        Value::Ref {
          service: b,
          parent: bp,
        },
      ) => a == b && ap == bp,
      (Value::Direct(a), Value::Direct(b)) => Arc::ptr_eq(a, b),
      (Value::List(a), Value::List(b)) => a.elements == b.elements,
      (Value::Set(a), Value::Set(b)) => a.elements == b.elements,
      (Value::Map(a), Value::Map(b)) => a.entries == b.entries,
      (Value::Props(a), Value::Props(b)) => a.entries == b.entries,
      (Value::Array(a), Value::Array(b)) => a.elements == b.elements,
      _ => false,
    }
  }
}

impl fmt::Debug for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Null => f.write_str("Null"),
      Value::Str(s) => write!(f, "Str({:?})", s),
      Value::TypedStr { value, type_name } => write!(f, "TypedStr({:?}: {})", value, type_name),
      Value::Ref { service, parent } => {
        if *parent {
          write!(f, "Ref(parent:{})", service)
        } else {
          write!(f, "Ref({})", service)
        }
      }
      Value::Direct(_) => f.write_str("Direct(..)"),
      Value::List(l) => f.debug_tuple("List").field(&l.elements).finish(),
      Value::Set(s) => f.debug_tuple("Set").field(&s.elements).finish(),
      Value::Map(m) => f.debug_tuple("Map").field(&m.entries).finish(),
      Value::Props(p) => f.debug_tuple("Props").field(&p.entries).finish(),
      Value::Array(a) => f.debug_tuple("Array").field(&a.elements).finish(),
    }
  }
}

/// An ordered list of element values.
#[derive(Clone, Debug, Default)]
pub struct ManagedList {
  pub elements: Vec<Value>,
  pub element_type: Option<String>,
  pub merge_enabled: bool,
}

impl ManagedList {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_element(mut self, value: Value) -> Self {
    self.elements.push(value);
    self
  }

  pub fn with_element_type(mut self, type_name: impl Into<String>) -> Self {
    self.element_type = Some(type_name.into());
    self
  }

  pub fn mergeable(mut self) -> Self {
    self.merge_enabled = true;
    self
  }

  fn merged_with(&self, parent: &ManagedList) -> ManagedList {
    let mut merged = parent.clone();
    merged.merge_enabled = self.merge_enabled;
    if self.element_type.is_some() {
      merged.element_type = self.element_type.clone();
    }
    merged.elements.extend(self.elements.iter().cloned());
    merged
  }
}

/// An ordered set: duplicates (by value equality) keep their first
/// occurrence.
#[derive(Clone, Debug, Default)]
pub struct ManagedSet {
  pub elements: Vec<Value>,
  pub element_type: Option<String>,
  pub merge_enabled: bool,
}

impl ManagedSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_element(mut self, value: Value) -> Self {
    if !self.elements.contains(&value) {
      self.elements.push(value);
    }
    self
  }

  pub fn with_element_type(mut self, type_name: impl Into<String>) -> Self {
    self.element_type = Some(type_name.into());
    self
  }

  pub fn mergeable(mut self) -> Self {
    self.merge_enabled = true;
    self
  }

  fn merged_with(&self, parent: &ManagedSet) -> ManagedSet {
    let mut merged = parent.clone();
    merged.merge_enabled = self.merge_enabled;
    if self.element_type.is_some() {
      merged.element_type = self.element_type.clone();
    }
    for element in &self.elements {
      if !merged.elements.contains(element) {
        merged.elements.push(element.clone());
      }
    }
    merged
  }
}

/// An insertion-ordered map with value-typed keys. Child entries override
/// parent entries with an equal key on merge.
#[derive(Clone, Debug, Default)]
pub struct ManagedMap {
  pub entries: Vec<(Value, Value)>,
  pub key_type: Option<String>,
  pub value_type: Option<String>,
  pub merge_enabled: bool,
}

impl ManagedMap {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_entry(mut self, key: Value, value: Value) -> Self {
    self.insert(key, value);
    self
  }

  pub fn with_key_type(mut self, type_name: impl Into<String>) -> Self {
    self.key_type = Some(type_name.into());
    self
  }

  pub fn with_value_type(mut self, type_name: impl Into<String>) -> Self {
    self.value_type = Some(type_name.into());
    self
  }

  pub fn mergeable(mut self) -> Self {
    self.merge_enabled = true;
    self
  }

  fn insert(&mut self, key: Value, value: Value) {
    if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
      entry.1 = value;
    } else {
      self.entries.push((key, value));
    }
  }

  fn merged_with(&self, parent: &ManagedMap) -> ManagedMap {
    let mut merged = parent.clone();
    merged.merge_enabled = self.merge_enabled;
    if self.key_type.is_some() {
      merged.key_type = self.key_type.clone();
    }
    if self.value_type.is_some() {
      merged.value_type = self.value_type.clone();
    }
    for (key, value) in &self.entries {
      merged.insert(key.clone(), value.clone());
    }
    merged
  }
}

/// A string-keyed, string-valued property bag.
#[derive(Clone, Debug, Default)]
pub struct ManagedProps {
  pub entries: Vec<(String, String)>,
  pub merge_enabled: bool,
}

impl ManagedProps {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.insert(key.into(), value.into());
    self
  }

  pub fn mergeable(mut self) -> Self {
    self.merge_enabled = true;
    self
  }

  fn insert(&mut self, key: String, value: String) {
    if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
      entry.1 = value;
    } else {
      self.entries.push((key, value));
    }
  }

  fn merged_with(&self, parent: &ManagedProps) -> ManagedProps {
    let mut merged = parent.clone();
    merged.merge_enabled = self.merge_enabled;
    for (key, value) in &self.entries {
      merged.insert(key.clone(), value.clone());
    }
    merged
  }
}

/// A fixed-element-type array; behaves like a list with a mandatory element
/// type hint.
#[derive(Clone, Debug)]
pub struct ManagedArray {
  pub elements: Vec<Value>,
  pub element_type: String,
  pub merge_enabled: bool,
}

impl ManagedArray {
  pub fn new(element_type: impl Into<String>) -> Self {
    Self {
      elements: Vec::new(),
      element_type: element_type.into(),
      merge_enabled: false,
    }
  }

  pub fn with_element(mut self, value: Value) -> Self {
    self.elements.push(value);
    self
  }

  pub fn mergeable(mut self) -> Self {
    self.merge_enabled = true;
    self
  }

  fn merged_with(&self, parent: &ManagedArray) -> ManagedArray {
    let mut merged = parent.clone();
    merged.merge_enabled = self.merge_enabled;
    merged.element_type = self.element_type.clone();
    merged.elements.extend(self.elements.iter().cloned());
    merged
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn list_merge_appends_child_after_parent() {
    let parent = ManagedList::new()
      .with_element(Value::string("1"))
      .with_element(Value::string("2"));
    let child = ManagedList::new().with_element(Value::string("3")).mergeable();

    let merged = Value::List(child)
      .merge(&Value::List(parent))
      .expect("merge-enabled lists merge");
    let Value::List(list) = merged else {
      panic!("expected list")
    };
    let strings: Vec<_> = list
      .elements
      .iter()
      .map(|v| match v {
        Value::Str(s) => s.as_str(),
        _ => "?",
      })
      .collect();
    assert_eq!(strings, ["1", "2", "3"]);
  }

  #[test]
  fn disabled_merge_is_rejected() {
    let parent = Value::List(ManagedList::new().with_element(Value::string("1")));
    let child = Value::List(ManagedList::new().with_element(Value::string("2")));
    assert!(child.merge(&parent).is_err());
  }

  #[test]
  fn kind_mismatch_is_rejected() {
    let parent = Value::Set(ManagedSet::new());
    let child = Value::List(ManagedList::new().mergeable());
    assert!(child.merge(&parent).is_err());
  }

  #[test]
  fn map_merge_overrides_by_key() {
    let parent = ManagedMap::new()
      .with_entry(Value::string("a"), Value::string("old"))
      .with_entry(Value::string("b"), Value::string("keep"));
    let child = ManagedMap::new()
      .with_entry(Value::string("a"), Value::string("new"))
      .mergeable();

    let merged = Value::Map(child).merge(&Value::Map(parent)).unwrap();
    let Value::Map(map) = merged else {
      panic!("expected map")
    };
    assert_eq!(map.entries.len(), 2);
    assert_eq!(map.entries[0], (Value::string("a"), Value::string("new")));
    assert_eq!(map.entries[1], (Value::string("b"), Value::string("keep")));
  }
}
