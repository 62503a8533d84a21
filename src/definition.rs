//! The declarative description of how to construct and configure one
//! managed service.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::collections::Value;
use crate::overrides::MethodOverrides;

/// Lifetime policy for a definition's instances.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Scope {
  /// At most one instance for the container's lifetime.
  #[default]
  Singleton,
  /// A fresh instance for every request.
  Prototype,
  /// Delegated to a registered scope handler by name.
  Custom(String),
}

impl Scope {
  pub fn is_singleton(&self) -> bool {
    matches!(self, Scope::Singleton)
  }

  pub fn is_prototype(&self) -> bool {
    matches!(self, Scope::Prototype)
  }
}

/// How unset collaborators of this definition are discovered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AutowireMode {
  #[default]
  None,
  ByName,
  ByType,
  Constructor,
}

/// How strictly configured dependencies are checked after population.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DependencyCheck {
  #[default]
  None,
  /// Primitive/simple properties only.
  Simple,
  /// Object references only.
  Objects,
  All,
}

static NEXT_DEFINITION_TOKEN: AtomicU64 = AtomicU64::new(0);

/// Constructor argument values: explicitly indexed slots plus a positional
/// queue filling the remaining parameters in order.
#[derive(Clone, Debug, Default)]
pub struct ConstructorArgs {
  indexed: BTreeMap<usize, Value>,
  positional: Vec<Value>,
}

impl ConstructorArgs {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, value: Value) {
    self.positional.push(value);
  }

  pub fn add_indexed(&mut self, index: usize, value: Value) {
    self.indexed.insert(index, value);
  }

  pub fn indexed(&self) -> &BTreeMap<usize, Value> {
    &self.indexed
  }

  pub fn positional(&self) -> &[Value] {
    &self.positional
  }

  pub fn is_empty(&self) -> bool {
    self.indexed.is_empty() && self.positional.is_empty()
  }

  pub fn len(&self) -> usize {
    let highest_index = self.indexed.keys().next_back().map(|i| i + 1).unwrap_or(0);
    let unindexed_slots = highest_index.saturating_sub(self.indexed.len());
    highest_index + (self.positional.len().saturating_sub(unindexed_slots))
  }

  /// Lays the values out in call order: indexed slots at their index,
  /// positional values filling the gaps and the tail.
  pub fn assemble(&self) -> Vec<Value> {
    let mut positional = self.positional.iter();
    let mut out = Vec::with_capacity(self.len());
    for slot in 0..self.len() {
      match self.indexed.get(&slot) {
        Some(value) => out.push(value.clone()),
        None => match positional.next() {
          Some(value) => out.push(value.clone()),
          None => break,
        },
      }
    }
    out
  }
}

/// One named property value.
#[derive(Clone, Debug)]
pub struct PropertyValue {
  pub name: String,
  pub value: Value,
}

/// Ordered, name-keyed property values.
#[derive(Clone, Debug, Default)]
pub struct PropertyValues {
  values: Vec<PropertyValue>,
}

impl PropertyValues {
  pub fn new() -> Self {
    Self::default()
  }

  /// Replaces the value under `name`, or appends it.
  pub fn set(&mut self, name: impl Into<String>, value: Value) {
    let name = name.into();
    if let Some(existing) = self.values.iter_mut().find(|pv| pv.name == name) {
      existing.value = value;
    } else {
      self.values.push(PropertyValue { name, value });
    }
  }

  pub fn get(&self, name: &str) -> Option<&Value> {
    self
      .values
      .iter()
      .find(|pv| pv.name == name)
      .map(|pv| &pv.value)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.get(name).is_some()
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &PropertyValue> {
    self.values.iter()
  }
}

/// Declarative description of one managed service: target type, inheritance
/// link, scope, construction inputs, lifecycle hooks and method overrides.
///
/// A definition with no parent and a concrete class is a root; definitions
/// form a tree via `parent_name` and are flattened by the merger before use.
#[derive(Clone)]
pub struct ServiceDefinition {
  pub class_name: Option<String>,
  pub parent_name: Option<String>,
  pub scope: Scope,
  pub lazy_init: bool,
  pub autowire: AutowireMode,
  pub dependency_check: DependencyCheck,
  pub depends_on: Vec<String>,
  /// Whether this definition may satisfy autowired dependency slots.
  pub autowire_candidate: bool,
  /// Preferred among multiple eligible candidates.
  pub primary: bool,
  pub constructor_args: ConstructorArgs,
  pub property_values: PropertyValues,
  pub method_overrides: MethodOverrides,
  /// Name of the service whose factory method produces this one.
  pub factory_service: Option<String>,
  pub factory_method: Option<String>,
  pub init_method: Option<String>,
  pub destroy_method: Option<String>,
  /// Where this definition came from, for diagnostics.
  pub resource_description: Option<String>,
  pub(crate) token: u64,
}

impl ServiceDefinition {
  pub fn new() -> Self {
    Self {
      class_name: None,
      parent_name: None,
      scope: Scope::default(),
      lazy_init: false,
      autowire: AutowireMode::default(),
      dependency_check: DependencyCheck::default(),
      depends_on: Vec::new(),
      autowire_candidate: true,
      primary: false,
      constructor_args: ConstructorArgs::new(),
      property_values: PropertyValues::new(),
      method_overrides: MethodOverrides::new(),
      factory_service: None,
      factory_method: None,
      init_method: None,
      destroy_method: None,
      resource_description: None,
      token: NEXT_DEFINITION_TOKEN.fetch_add(1, Ordering::Relaxed),
    }
  }

  pub fn of_class(class_name: impl Into<String>) -> Self {
    let mut def = Self::new();
    def.class_name = Some(class_name.into());
    def
  }

  pub fn child_of(parent_name: impl Into<String>) -> Self {
    let mut def = Self::new();
    def.parent_name = Some(parent_name.into());
    def
  }

  /// Per-instance identity token, used for nested name generation.
  pub fn token(&self) -> u64 {
    self.token
  }

  pub fn with_scope(mut self, scope: Scope) -> Self {
    self.scope = scope;
    self
  }

  pub fn with_lazy_init(mut self, lazy: bool) -> Self {
    self.lazy_init = lazy;
    self
  }

  pub fn with_autowire(mut self, mode: AutowireMode) -> Self {
    self.autowire = mode;
    self
  }

  pub fn with_dependency_check(mut self, check: DependencyCheck) -> Self {
    self.dependency_check = check;
    self
  }

  pub fn with_depends_on(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
    self.depends_on = names.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_autowire_candidate(mut self, eligible: bool) -> Self {
    self.autowire_candidate = eligible;
    self
  }

  pub fn with_primary(mut self, primary: bool) -> Self {
    self.primary = primary;
    self
  }

  pub fn with_constructor_arg(mut self, value: Value) -> Self {
    self.constructor_args.add(value);
    self
  }

  pub fn with_indexed_constructor_arg(mut self, index: usize, value: Value) -> Self {
    self.constructor_args.add_indexed(index, value);
    self
  }

  pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
    self.property_values.set(name, value);
    self
  }

  pub fn with_override(mut self, method_override: crate::overrides::MethodOverride) -> Self {
    self.method_overrides.add(method_override);
    self
  }

  /// Produced by a factory method on another (named) service.
  pub fn with_factory(
    mut self,
    factory_service: impl Into<String>,
    factory_method: impl Into<String>,
  ) -> Self {
    self.factory_service = Some(factory_service.into());
    self.factory_method = Some(factory_method.into());
    self
  }

  /// Produced by a static factory method on the definition's own class.
  pub fn with_factory_method(mut self, factory_method: impl Into<String>) -> Self {
    self.factory_method = Some(factory_method.into());
    self
  }

  pub fn with_init_method(mut self, name: impl Into<String>) -> Self {
    self.init_method = Some(name.into());
    self
  }

  pub fn with_destroy_method(mut self, name: impl Into<String>) -> Self {
    self.destroy_method = Some(name.into());
    self
  }

  pub fn with_resource_description(mut self, description: impl Into<String>) -> Self {
    self.resource_description = Some(description.into());
    self
  }
}

impl Default for ServiceDefinition {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for ServiceDefinition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ServiceDefinition")
      .field("class_name", &self.class_name)
      .field("parent_name", &self.parent_name)
      .field("scope", &self.scope)
      .field("lazy_init", &self.lazy_init)
      .field("autowire", &self.autowire)
      .field("factory_service", &self.factory_service)
      .field("factory_method", &self.factory_method)
      .field("resource_description", &self.resource_description)
      .finish()
  }
}
