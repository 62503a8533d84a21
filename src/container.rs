//! The owning facade the core components plug into.
//!
//! `Assembly` wires the registry, merger, singleton cache, type catalog,
//! instantiation strategy and candidate resolver together and exposes the
//! live queries the resolver and the override machinery consume. Container
//! lifecycle events, definition-format parsing and placeholder resolution
//! stay collaborator concerns.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::collections::Value;
use crate::definition::{DependencyCheck, Scope, ServiceDefinition};
use crate::error::{Error, Result};
use crate::factory::{
  as_factory, is_factory_reference, strip_factory_prefix, ProductPostProcessor,
};
use crate::instantiate::{
  DispatchingInstantiationStrategy, InstantiationStrategy, InterceptedInstance, InvocationContext,
};
use crate::merge::{MergedDefinition, MergedDefinitions, ResolvedExecutable};
use crate::registry::DefinitionRegistry;
use crate::resolver::{Candidate, CandidateResolver, DependencyDescriptor, GenericCandidateResolver};
use crate::sentinel::NullSentinel;
use crate::singleton::SingletonCache;
use crate::types::{CallScope, ClassSpec, Instance, TypeCatalog, TypeSpec};

/// A custom scope handler: decides where instances for its scope live and
/// when the creation callback runs.
pub trait CustomScope: Send + Sync {
  fn get(&self, name: &str, create: &mut dyn FnMut() -> Result<Instance>) -> Result<Instance>;
}

/// The live-container surface consumed by the candidate resolver and the
/// method-override machinery.
pub trait ContainerHandle: Send + Sync {
  /// Best known produced type for the name, without constructing anything.
  fn resolve_type(&self, name: &str) -> Option<TypeSpec>;

  fn get_instance(&self, name: &str) -> Result<Instance>;

  /// The unique eligible instance for the given dependency type, preferring
  /// a definition marked primary when several are eligible.
  fn get_instance_of(&self, dependency_type: &TypeSpec) -> Result<Instance>;

  fn is_currently_in_creation(&self, name: &str) -> bool;
}

/// The assembled container core.
pub struct Assembly {
  registry: Arc<DefinitionRegistry>,
  merged: MergedDefinitions,
  singletons: SingletonCache,
  catalog: Arc<TypeCatalog>,
  strategy: Arc<dyn InstantiationStrategy>,
  resolver: RwLock<Arc<dyn CandidateResolver>>,
  scopes: DashMap<String, Arc<dyn CustomScope>>,
  post_processor: RwLock<Option<Arc<dyn ProductPostProcessor>>>,
  parent: RwLock<Option<Arc<Assembly>>>,
}

impl Assembly {
  /// Builds an assembly with the default strategy (override-capable) and
  /// the generic-aware candidate resolver bound to it.
  pub fn new(catalog: Arc<TypeCatalog>) -> Arc<Self> {
    let strategy: Arc<dyn InstantiationStrategy> =
      Arc::new(DispatchingInstantiationStrategy::new(catalog.clone()));
    Self::with_strategy(catalog, strategy)
  }

  pub fn with_strategy(
    catalog: Arc<TypeCatalog>,
    strategy: Arc<dyn InstantiationStrategy>,
  ) -> Arc<Self> {
    let registry = Arc::new(DefinitionRegistry::new());
    Arc::new_cyclic(|weak: &Weak<Assembly>| {
      let resolver = GenericCandidateResolver::new(catalog.clone());
      let weak_handle: Weak<dyn ContainerHandle> = weak.clone();
      resolver.bind_owner(weak_handle);
      Assembly {
        registry: registry.clone(),
        merged: MergedDefinitions::new(registry),
        singletons: SingletonCache::new(),
        catalog,
        strategy,
        resolver: RwLock::new(Arc::new(resolver)),
        scopes: DashMap::new(),
        post_processor: RwLock::new(None),
        parent: RwLock::new(None),
      }
    })
  }

  pub fn registry(&self) -> &Arc<DefinitionRegistry> {
    &self.registry
  }

  pub fn merged_definitions(&self) -> &MergedDefinitions {
    &self.merged
  }

  pub fn singleton_cache(&self) -> &SingletonCache {
    &self.singletons
  }

  pub fn catalog(&self) -> &Arc<TypeCatalog> {
    &self.catalog
  }

  pub fn set_parent(&self, parent: Arc<Assembly>) {
    *self.parent.write() = Some(parent);
  }

  pub fn register_scope(&self, scope_name: impl Into<String>, handler: Arc<dyn CustomScope>) {
    self.scopes.insert(scope_name.into(), handler);
  }

  pub fn set_product_post_processor(&self, post_processor: Arc<dyn ProductPostProcessor>) {
    *self.post_processor.write() = Some(post_processor);
  }

  /// Installs a resolver (typically a [`CandidateResolver::clone_for_owner`]
  /// clone from another container), binding it to this assembly.
  pub fn adopt_resolver(self: &Arc<Self>, resolver: Box<dyn CandidateResolver>) {
    let weak_self: Weak<Assembly> = Arc::downgrade(self);
    let weak_handle: Weak<dyn ContainerHandle> = weak_self;
    resolver.bind_owner(weak_handle);
    *self.resolver.write() = Arc::from(resolver);
  }

  /// A policy-preserving, owner-free duplicate of the current resolver, for
  /// handing to an independent container.
  pub fn clone_resolver(&self) -> Box<dyn CandidateResolver> {
    self.resolver.read().clone_for_owner()
  }

  /// Registers a definition and invalidates any stale merged view.
  pub fn register(&self, name: &str, definition: ServiceDefinition) -> Result<()> {
    self.merged.register(name, definition)
  }

  /// Registers an anonymous definition under a generated name.
  pub fn register_anonymous(&self, definition: ServiceDefinition) -> Result<String> {
    let name = self.registry.generate_name(&definition, false)?;
    self.register(&name, definition)?;
    Ok(name)
  }

  pub fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
    self.registry.register_alias(name, alias)
  }

  /// Removes a definition together with its merged view and singleton state.
  pub fn remove(&self, name: &str) -> Result<()> {
    self.merged.remove(name)?;
    self.singletons.remove_singleton(name);
    Ok(())
  }

  /// Resolves the externally-visible object for `name`, honoring scope and
  /// the factory-object indirection. `&name` returns the factory object
  /// itself.
  pub fn get_service(&self, name: &str) -> Result<Instance> {
    let wants_factory = is_factory_reference(name);
    let plain_name = strip_factory_prefix(name);
    let canonical = self.registry.canonical_name(plain_name);
    let merged = self.merged.merged_for(&canonical)?;

    let raw = match &merged.definition().scope {
      Scope::Singleton => self
        .singletons
        .get_or_create(&canonical, || self.create_instance(&canonical, &merged))?,
      Scope::Prototype => self.create_instance(&canonical, &merged)?,
      Scope::Custom(scope_name) => {
        let handler = self
          .scopes
          .get(scope_name)
          .map(|h| h.value().clone())
          .ok_or_else(|| Error::ScopeUnavailable {
            scope: scope_name.clone(),
            name: canonical.clone(),
          })?;
        handler.get(&canonical, &mut || self.create_instance(&canonical, &merged))?
      }
    };

    if let Some(factory) = as_factory(&raw) {
      if wants_factory {
        return Ok(raw);
      }
      let post = self.post_processor.read().clone();
      return self
        .singletons
        .product_for(factory.as_ref(), &canonical, post.as_deref());
    }
    if wants_factory {
      return Err(Error::construction(
        canonical,
        "'&' requested the factory object, but the service is not a factory indirection",
      ));
    }
    Ok(raw)
  }

  fn create_instance(&self, name: &str, merged: &Arc<MergedDefinition>) -> Result<Instance> {
    debug!(name, "creating instance");
    let definition = merged.definition();
    for dependency in &definition.depends_on {
      self.get_service(dependency)?;
    }

    let context = InvocationContext::new();
    let instance = if let Some(factory_method) = &definition.factory_method {
      let (factory_instance, declaring_class) = match &definition.factory_service {
        Some(factory_service) => {
          let instance = self.get_service(factory_service)?;
          let class_name = self
            .resolve_type(factory_service)
            .and_then(|t| t.raw_name().map(str::to_string))
            .ok_or_else(|| {
              Error::configuration(
                name,
                format!("cannot determine the class of factory service '{factory_service}'"),
              )
            })?;
          let class = self.catalog.class(&class_name).ok_or_else(|| {
            Error::configuration(name, format!("unknown factory class '{class_name}'"))
          })?;
          (Some(instance), class)
        }
        None => (None, self.strategy.actual_class_of(merged)?),
      };
      let args = self.resolve_args(name, merged)?;
      let method = match merged.resolved_executable() {
        Some(ResolvedExecutable::FactoryMethod(cached)) => cached,
        _ => {
          let method = declaring_class
            .methods_named(factory_method)
            .find(|m| m.params.len() == args.len())
            .cloned()
            .ok_or_else(|| {
              Error::configuration(
                name,
                format!(
                  "class '{}' declares no factory method '{factory_method}' taking {} argument(s)",
                  declaring_class.name,
                  args.len()
                ),
              )
            })?;
          merged.set_resolved_executable(ResolvedExecutable::FactoryMethod(method.clone()));
          method
        }
      };
      self.strategy.instantiate_with_factory(
        &context,
        merged,
        name,
        self,
        factory_instance.as_ref(),
        &method,
        &args,
      )?
    } else if !definition.constructor_args.is_empty() {
      let args = self.resolve_args(name, merged)?;
      let constructor = match merged.resolved_executable() {
        Some(ResolvedExecutable::Constructor(cached)) => cached,
        _ => {
          let class = self.strategy.actual_class_of(merged)?;
          let constructor = class.constructor_for(args.len()).cloned().ok_or_else(|| {
            Error::configuration(
              name,
              format!(
                "class '{}' declares no constructor taking {} argument(s)",
                class.name,
                args.len()
              ),
            )
          })?;
          merged.set_resolved_executable(ResolvedExecutable::Constructor(constructor.clone()));
          constructor
        }
      };
      self
        .strategy
        .instantiate_with_constructor(merged, name, self, &constructor, &args)?
    } else {
      self.strategy.instantiate(merged, name, self)?
    };

    self.apply_properties(name, merged, &instance)?;
    if let Some(init_method) = &definition.init_method {
      self
        .dispatch_call(merged, &instance, init_method, &[])
        .map_err(|err| match err {
          Error::Construction { .. } => err,
          other => Error::construction_caused(name, "init method failed", other),
        })?;
    }
    Ok(instance)
  }

  fn resolve_args(&self, name: &str, merged: &Arc<MergedDefinition>) -> Result<Vec<Instance>> {
    merged
      .definition()
      .constructor_args
      .assemble()
      .iter()
      .map(|value| self.resolve_value(name, value))
      .collect()
  }

  /// Resolves a metadata value into a runtime instance.
  pub fn resolve_value(&self, name: &str, value: &Value) -> Result<Instance> {
    match value {
      Value::Null => Ok(Arc::new(NullSentinel::new())),
      Value::Str(s) => Ok(Arc::new(s.clone())),
      // Type conversion is a collaborator concern; the hint rides along
      // until then.
      Value::TypedStr { value, .. } => Ok(Arc::new(value.clone())),
      Value::Ref { service, parent } => {
        if *parent {
          let parent_assembly = self.parent.read().clone().ok_or_else(|| {
            Error::configuration(
              name,
              format!("value references '{service}' in a parent container, but none is set"),
            )
          })?;
          parent_assembly.get_service(service)
        } else {
          self.get_service(service)
        }
      }
      Value::Direct(instance) => Ok(instance.clone()),
      Value::List(list) => self.resolve_elements(name, &list.elements),
      Value::Set(set) => self.resolve_elements(name, &set.elements),
      Value::Array(array) => self.resolve_elements(name, &array.elements),
      Value::Map(map) => {
        let mut entries: Vec<(Instance, Instance)> = Vec::with_capacity(map.entries.len());
        for (key, val) in &map.entries {
          entries.push((self.resolve_value(name, key)?, self.resolve_value(name, val)?));
        }
        Ok(Arc::new(entries))
      }
      Value::Props(props) => Ok(Arc::new(props.entries.clone())),
    }
  }

  fn resolve_elements(&self, name: &str, elements: &[Value]) -> Result<Instance> {
    let resolved = elements
      .iter()
      .map(|element| self.resolve_value(name, element))
      .collect::<Result<Vec<Instance>>>()?;
    Ok(Arc::new(resolved))
  }

  /// Applies configured property values through declared `set_*` methods.
  fn apply_properties(
    &self,
    name: &str,
    merged: &Arc<MergedDefinition>,
    instance: &Instance,
  ) -> Result<()> {
    let definition = merged.definition();
    if definition.property_values.is_empty() {
      return Ok(());
    }
    let class = self.class_of_instance(merged, instance)?;
    for property in definition.property_values.iter() {
      let setter = format!("set_{}", property.name);
      if class.method_with_arity(&setter, 1).is_none() {
        if definition.dependency_check == DependencyCheck::None {
          trace!(name, property = %property.name, "no setter declared; skipping property");
          continue;
        }
        return Err(Error::construction(
          name,
          format!("no setter for configured property '{}'", property.name),
        ));
      }
      let value = self.resolve_value(name, &property.value)?;
      self.dispatch_call(merged, instance, &setter, &[value])?;
    }
    Ok(())
  }

  fn class_of_instance(
    &self,
    merged: &Arc<MergedDefinition>,
    instance: &Instance,
  ) -> Result<Arc<ClassSpec>> {
    match InterceptedInstance::from_instance(instance) {
      Some(intercepted) => Ok(intercepted.class().clone()),
      None => self.strategy.actual_class_of(merged),
    }
  }

  /// Invokes a named method on an instance, routing through the override
  /// dispatch when the instance is intercepted.
  fn dispatch_call(
    &self,
    merged: &Arc<MergedDefinition>,
    instance: &Instance,
    method_name: &str,
    args: &[Instance],
  ) -> Result<Option<Instance>> {
    if let Some(intercepted) = InterceptedInstance::from_instance(instance) {
      return intercepted.call(self, method_name, args);
    }
    let class = self.strategy.actual_class_of(merged)?;
    let method = class
      .method_with_arity(method_name, args.len())
      .ok_or_else(|| {
        Error::configuration(
          merged.name(),
          format!(
            "class '{}' declares no method '{method_name}' taking {} argument(s)",
            class.name,
            args.len()
          ),
        )
      })?;
    method
      .invoke(CallScope {
        invocation: None,
        target: Some(instance),
        args,
      })
      .map_err(|err| {
        Error::construction(
          merged.name(),
          format!("method '{method_name}' failed: {err}"),
        )
      })
  }

  /// Names of all definitions eligible for the given dependency, in
  /// registration order.
  ///
  /// Raw-type matching runs first; the candidate resolver only judges
  /// definitions whose predicted type is assignable to the dependency's raw
  /// type.
  pub fn find_candidates(&self, descriptor: &DependencyDescriptor) -> Vec<String> {
    let resolver = self.resolver.read().clone();
    let dependency_raw = descriptor.dependency_type.raw_name();
    self
      .registry
      .names()
      .into_iter()
      .filter(|name| {
        let type_matches = match dependency_raw {
          None => true,
          Some(raw) => self
            .resolve_type(name)
            .and_then(|t| t.raw_name().map(|r| self.catalog.is_assignable_raw(raw, r)))
            .unwrap_or(false),
        };
        if !type_matches {
          return false;
        }
        self
          .merged
          .merged_for(name)
          .map(|merged| resolver.is_eligible(&Candidate::new(name.clone(), merged), descriptor))
          .unwrap_or(false)
      })
      .collect()
  }

  /// Runs declared destroy methods in reverse registration order, then
  /// clears the singleton cache.
  pub fn destroy_singletons(&self) {
    let mut names = self.registry.names();
    names.reverse();
    for name in names {
      let Some(instance) = self.singletons.get_singleton(&name) else {
        continue;
      };
      let Ok(merged) = self.merged.merged_for(&name) else {
        continue;
      };
      if let Some(destroy_method) = merged.definition().destroy_method.clone() {
        if let Err(err) = self.dispatch_call(&merged, &instance, &destroy_method, &[]) {
          warn!(name = %name, error = %err, "destroy method failed");
        }
      }
    }
    self.singletons.clear();
  }
}

impl ContainerHandle for Assembly {
  fn resolve_type(&self, name: &str) -> Option<TypeSpec> {
    let canonical = self.registry.canonical_name(strip_factory_prefix(name));
    let merged = self.merged.merged_for(&canonical).ok()?;
    if let Some(cached) = merged.target_type() {
      return Some(cached);
    }
    let definition = merged.definition();

    // An already-built factory object can tell us its product type without
    // any construction.
    if let Some(instance) = self.singletons.get_singleton(&canonical) {
      if let Some(factory) = as_factory(&instance) {
        if let Some(produced) = factory.produced_type() {
          return Some(produced);
        }
      }
    }

    if let Some(factory_method) = &definition.factory_method {
      let declaring_class = match &definition.factory_service {
        Some(factory_service) => self
          .resolve_type(factory_service)
          .and_then(|t| t.raw_name().map(str::to_string)),
        None => definition.class_name.clone(),
      };
      if let Some(class) = declaring_class.and_then(|c| self.catalog.class(&c)) {
        if let Some(returns) = class
          .methods_named(factory_method)
          .find_map(|m| m.returns.clone())
        {
          return Some(returns);
        }
      }
    }

    definition.class_name.as_deref().map(TypeSpec::raw)
  }

  fn get_instance(&self, name: &str) -> Result<Instance> {
    self.get_service(name)
  }

  fn get_instance_of(&self, dependency_type: &TypeSpec) -> Result<Instance> {
    let descriptor = DependencyDescriptor::of(dependency_type.clone());
    let mut candidates = self.find_candidates(&descriptor);
    if candidates.len() > 1 {
      let primaries: Vec<String> = candidates
        .iter()
        .filter(|name| {
          self
            .merged
            .merged_for(name)
            .map(|m| m.definition().primary)
            .unwrap_or(false)
        })
        .cloned()
        .collect();
      if primaries.len() == 1 {
        candidates = primaries;
      } else {
        return Err(Error::construction(
          dependency_type.to_string(),
          format!("{} candidates match and none is uniquely primary", candidates.len()),
        ));
      }
    }
    let name = candidates.pop().ok_or_else(|| Error::NoSuchDefinition {
      name: dependency_type.to_string(),
    })?;
    self.get_service(&name)
  }

  fn is_currently_in_creation(&self, name: &str) -> bool {
    let canonical = self.registry.canonical_name(strip_factory_prefix(name));
    self.singletons.is_in_creation(&canonical)
  }
}
