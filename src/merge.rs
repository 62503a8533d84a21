//! Parent/child definition merging.
//!
//! A registered definition may inherit from a parent definition by name. The
//! merger flattens the chain into one definition per registered name, caches
//! the result, and owns the mutable resolved-type/resolved-executable slots
//! so the definition value objects themselves stay plain data.

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::{debug, trace};

use crate::definition::{ConstructorArgs, ServiceDefinition};
use crate::error::{Error, Result};
use crate::registry::DefinitionRegistry;
use crate::types::{ConstructorSpec, MethodSpec, TypeSpec};

/// The resolved constructor or factory method for a merged definition.
#[derive(Clone)]
pub enum ResolvedExecutable {
  Constructor(Arc<ConstructorSpec>),
  FactoryMethod(Arc<MethodSpec>),
}

/// A materialized, parent-resolved definition associated 1:1 with a
/// registered name at a point in time.
///
/// Carries set-once cells for the resolved target type and resolved
/// executable; the cells live and die with the merged view, so invalidating
/// the merged definition also discards everything derived from the source
/// definition.
pub struct MergedDefinition {
  name: String,
  definition: ServiceDefinition,
  target_type: OnceCell<TypeSpec>,
  executable: OnceCell<ResolvedExecutable>,
}

impl MergedDefinition {
  fn new(name: String, definition: ServiceDefinition) -> Self {
    Self {
      name,
      definition,
      target_type: OnceCell::new(),
      executable: OnceCell::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn definition(&self) -> &ServiceDefinition {
    &self.definition
  }

  pub fn target_type(&self) -> Option<TypeSpec> {
    self.target_type.get().cloned()
  }

  /// Caches the determined target type. Racing determinations agree on the
  /// source definition, so the first write wins and later ones are dropped.
  pub fn set_target_type(&self, target: TypeSpec) {
    let _ = self.target_type.set(target);
  }

  pub fn resolved_executable(&self) -> Option<ResolvedExecutable> {
    self.executable.get().cloned()
  }

  pub fn set_resolved_executable(&self, executable: ResolvedExecutable) {
    let _ = self.executable.set(executable);
  }
}

impl Deref for MergedDefinition {
  type Target = ServiceDefinition;

  fn deref(&self) -> &Self::Target {
    &self.definition
  }
}

impl std::fmt::Debug for MergedDefinition {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MergedDefinition")
      .field("name", &self.name)
      .field("target_type", &self.target_type.get())
      .field("executable_resolved", &self.executable.get().is_some())
      .finish()
  }
}

/// The merged-definition cache over a registry.
pub struct MergedDefinitions {
  registry: Arc<DefinitionRegistry>,
  merged: DashMap<String, Arc<MergedDefinition>>,
}

impl MergedDefinitions {
  pub fn new(registry: Arc<DefinitionRegistry>) -> Self {
    Self {
      registry,
      merged: DashMap::new(),
    }
  }

  pub fn registry(&self) -> &Arc<DefinitionRegistry> {
    &self.registry
  }

  /// Registers a definition and invalidates any stale merged view for its
  /// name.
  pub fn register(&self, name: &str, definition: ServiceDefinition) -> Result<()> {
    self.registry.register(name, definition)?;
    self.invalidate(name);
    Ok(())
  }

  /// Removes a definition along with its merged view.
  pub fn remove(&self, name: &str) -> Result<Arc<ServiceDefinition>> {
    let removed = self.registry.remove(name)?;
    self.invalidate(name);
    Ok(removed)
  }

  /// The flattened, validated view of the named definition, served from
  /// cache when possible.
  pub fn merged_for(&self, name: &str) -> Result<Arc<MergedDefinition>> {
    let canonical = self.registry.canonical_name(name);
    if let Some(merged) = self.merged.get(&canonical) {
      return Ok(merged.value().clone());
    }

    let definition = self
      .registry
      .get(&canonical)
      .ok_or_else(|| Error::NoSuchDefinition {
        name: canonical.clone(),
      })?;

    let mut visiting = HashSet::new();
    let flattened = self.flatten(&canonical, &definition, &mut visiting)?;
    Self::validate(&canonical, &flattened)?;

    let merged = Arc::new(MergedDefinition::new(canonical.clone(), flattened));
    trace!(name = %canonical, "cached merged definition");
    // A concurrent recomputation for the same name is benign; last insert
    // wins and both views were flattened from the same source.
    self.merged.insert(canonical, merged.clone());
    Ok(merged)
  }

  /// Drops the cached merged view for `name`. Must be called whenever the
  /// underlying definition mutates or is removed.
  pub fn invalidate(&self, name: &str) {
    let canonical = self.registry.canonical_name(name);
    if self.merged.remove(&canonical).is_some() {
      trace!(name = %canonical, "invalidated merged definition");
    }
  }

  pub fn clear(&self) {
    self.merged.clear();
    trace!("cleared merged definition cache");
  }

  fn flatten(
    &self,
    name: &str,
    definition: &Arc<ServiceDefinition>,
    visiting: &mut HashSet<String>,
  ) -> Result<ServiceDefinition> {
    if !visiting.insert(name.to_string()) {
      return Err(Error::configuration(
        name,
        "definition is its own ancestor in the parent chain",
      ));
    }
    let Some(parent_ref) = &definition.parent_name else {
      return Ok(definition.as_ref().clone());
    };

    let parent_name = self.registry.canonical_name(parent_ref);
    let parent = self
      .registry
      .get(&parent_name)
      .ok_or_else(|| Error::configuration(name, format!("parent '{parent_name}' is not registered")))?;
    let parent_flat = self.flatten(&parent_name, &parent, visiting)?;
    debug!(name, parent = %parent_name, "merging definition over parent");
    Self::overlay(parent_flat, definition)
  }

  /// Child-over-parent overlay: every explicitly set property on the child
  /// overrides the parent's, container-typed values merge instead of
  /// replacing, and scope/lazy-init/depends-on/autowire settings always come
  /// from the child.
  fn overlay(parent_flat: ServiceDefinition, child: &ServiceDefinition) -> Result<ServiceDefinition> {
    let mut merged = parent_flat;
    merged.parent_name = None;
    merged.token = child.token;

    if child.class_name.is_some() {
      merged.class_name = child.class_name.clone();
    }
    if child.factory_service.is_some() {
      merged.factory_service = child.factory_service.clone();
    }
    if child.factory_method.is_some() {
      merged.factory_method = child.factory_method.clone();
    }
    if child.init_method.is_some() {
      merged.init_method = child.init_method.clone();
    }
    if child.destroy_method.is_some() {
      merged.destroy_method = child.destroy_method.clone();
    }
    if child.resource_description.is_some() {
      merged.resource_description = child.resource_description.clone();
    }

    // Never inherited positionally.
    merged.scope = child.scope.clone();
    merged.lazy_init = child.lazy_init;
    merged.autowire = child.autowire;
    merged.dependency_check = child.dependency_check;
    merged.depends_on = child.depends_on.clone();
    merged.autowire_candidate = child.autowire_candidate;
    merged.primary = child.primary;

    merged.constructor_args =
      Self::overlay_constructor_args(&merged.constructor_args, &child.constructor_args)?;

    for property in child.property_values.iter() {
      let value = match merged.property_values.get(&property.name) {
        Some(existing) if property.value.is_mergeable() && property.value.merge_enabled() => {
          property.value.merge(existing)?
        }
        _ => property.value.clone(),
      };
      merged.property_values.set(property.name.clone(), value);
    }

    merged.method_overrides.add_all(child.method_overrides.clone());
    Ok(merged)
  }

  fn overlay_constructor_args(
    parent: &ConstructorArgs,
    child: &ConstructorArgs,
  ) -> Result<ConstructorArgs> {
    let mut merged = parent.clone();
    for (index, value) in child.indexed() {
      let value = match parent.indexed().get(index) {
        Some(existing) if value.is_mergeable() && value.merge_enabled() => value.merge(existing)?,
        _ => value.clone(),
      };
      merged.add_indexed(*index, value);
    }
    for value in child.positional() {
      merged.add(value.clone());
    }
    Ok(merged)
  }

  /// Fails fast on definitions that cannot possibly be instantiated. The
  /// definition's resource description, when present, rides on the error.
  fn validate(name: &str, definition: &ServiceDefinition) -> Result<()> {
    if definition.class_name.is_none()
      && definition.factory_service.is_none()
      && definition.factory_method.is_none()
    {
      return Err(Self::invalid(
        name,
        definition,
        "definition has neither a resolvable class, parent nor factory reference",
      ));
    }
    if !definition.method_overrides.is_empty() && definition.factory_method.is_some() {
      return Err(Self::invalid(
        name,
        definition,
        "method overrides cannot be combined with a factory method",
      ));
    }
    Ok(())
  }

  fn invalid(name: &str, definition: &ServiceDefinition, message: &str) -> Error {
    match &definition.resource_description {
      Some(resource) => Error::configuration(name, format!("{message} (defined in {resource})")),
      None => Error::configuration(name, message),
    }
  }
}
