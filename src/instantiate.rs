//! Instantiation strategies.
//!
//! Three construction entry points: default constructor, explicit
//! constructor with arguments, factory method with arguments. The simple
//! strategy constructs directly and rejects definitions carrying method
//! overrides; the dispatching strategy layers over it and realizes overrides
//! as an explicit delegation wrapper around the raw instance.

use std::cell::RefCell;
use std::sync::Arc;

use tracing::debug;

use crate::container::ContainerHandle;
use crate::error::{Error, InvokeError, Result};
use crate::merge::{MergedDefinition, ResolvedExecutable};
use crate::overrides::{as_replacer, MethodOverride, MethodOverrides};
use crate::sentinel::NullSentinel;
use crate::types::{CallScope, ClassSpec, ConstructorSpec, Instance, MethodSpec, TypeCatalog};

/// Call-scoped context for factory-method invocation.
///
/// The strategy sets the currently invoked factory method before the call
/// and restores the prior value afterwards, also on failure, so nested and
/// re-entrant factory-method invocations see a consistent view. The context
/// is created per construction call chain and never crosses threads.
#[derive(Default)]
pub struct InvocationContext {
  current: RefCell<Option<Arc<MethodSpec>>>,
}

impl InvocationContext {
  pub fn new() -> Self {
    Self::default()
  }

  /// The factory method the container is invoking right now, if any. A
  /// factory-method body can use this to tell container-driven invocation
  /// apart from an ordinary call.
  pub fn currently_invoked(&self) -> Option<Arc<MethodSpec>> {
    self.current.borrow().clone()
  }

  fn swap(&self, next: Option<Arc<MethodSpec>>) -> Option<Arc<MethodSpec>> {
    std::mem::replace(&mut *self.current.borrow_mut(), next)
  }
}

/// Builds raw instances for merged definitions.
pub trait InstantiationStrategy: Send + Sync {
  /// Constructs via the default constructor.
  fn instantiate(
    &self,
    merged: &Arc<MergedDefinition>,
    name: &str,
    owner: &dyn ContainerHandle,
  ) -> Result<Instance>;

  /// Constructs via an explicit constructor with resolved argument values.
  fn instantiate_with_constructor(
    &self,
    merged: &Arc<MergedDefinition>,
    name: &str,
    owner: &dyn ContainerHandle,
    constructor: &Arc<ConstructorSpec>,
    args: &[Instance],
  ) -> Result<Instance>;

  /// Constructs via a factory method, with the invocation context exposed to
  /// the method body for the duration of the call.
  fn instantiate_with_factory(
    &self,
    context: &InvocationContext,
    merged: &Arc<MergedDefinition>,
    name: &str,
    owner: &dyn ContainerHandle,
    factory_instance: Option<&Instance>,
    method: &Arc<MethodSpec>,
    args: &[Instance],
  ) -> Result<Instance>;

  /// The concrete class the definition resolves to.
  fn actual_class_of(&self, merged: &Arc<MergedDefinition>) -> Result<Arc<ClassSpec>>;
}

fn invoke_failure(name: &str, what: &str, err: InvokeError) -> Error {
  match err {
    InvokeError::BadArguments(message) => {
      Error::construction(name, format!("illegal arguments to {what}: {message}"))
    }
    InvokeError::Inaccessible(message) => {
      Error::construction(name, format!("{what} is not accessible: {message}"))
    }
    InvokeError::Raised(source) => Error::Construction {
      name: name.to_string(),
      message: format!("{what} raised an error"),
      source: Some(source),
    },
  }
}

/// Direct construction; signals unsupported for method overrides.
pub struct SimpleInstantiationStrategy {
  catalog: Arc<TypeCatalog>,
}

impl SimpleInstantiationStrategy {
  pub fn new(catalog: Arc<TypeCatalog>) -> Self {
    Self { catalog }
  }

  fn resolve_class(&self, merged: &Arc<MergedDefinition>) -> Result<Arc<ClassSpec>> {
    let class_name = merged
      .definition()
      .class_name
      .as_deref()
      .ok_or_else(|| Error::configuration(merged.name(), "definition declares no class"))?;
    self
      .catalog
      .class(class_name)
      .ok_or_else(|| Error::configuration(merged.name(), format!("unknown class '{class_name}'")))
  }

  fn reject_overrides(merged: &Arc<MergedDefinition>, name: &str) -> Result<()> {
    if merged.definition().method_overrides.is_empty() {
      Ok(())
    } else {
      Err(Error::construction(
        name,
        "definition carries method overrides, which this instantiation strategy does not support",
      ))
    }
  }

  fn default_constructor_of(
    &self,
    merged: &Arc<MergedDefinition>,
    name: &str,
  ) -> Result<Arc<ConstructorSpec>> {
    if let Some(ResolvedExecutable::Constructor(cached)) = merged.resolved_executable() {
      return Ok(cached);
    }
    let class = self.resolve_class(merged)?;
    let constructor = class
      .default_constructor()
      .cloned()
      .ok_or_else(|| Error::construction(name, "class declares no default constructor"))?;
    merged.set_resolved_executable(ResolvedExecutable::Constructor(constructor.clone()));
    Ok(constructor)
  }
}

impl InstantiationStrategy for SimpleInstantiationStrategy {
  fn instantiate(
    &self,
    merged: &Arc<MergedDefinition>,
    name: &str,
    _owner: &dyn ContainerHandle,
  ) -> Result<Instance> {
    Self::reject_overrides(merged, name)?;
    let constructor = self.default_constructor_of(merged, name)?;
    constructor
      .invoke(&[])
      .map_err(|err| invoke_failure(name, "default constructor", err))
  }

  fn instantiate_with_constructor(
    &self,
    merged: &Arc<MergedDefinition>,
    name: &str,
    _owner: &dyn ContainerHandle,
    constructor: &Arc<ConstructorSpec>,
    args: &[Instance],
  ) -> Result<Instance> {
    Self::reject_overrides(merged, name)?;
    constructor
      .invoke(args)
      .map_err(|err| invoke_failure(name, "constructor", err))
  }

  fn instantiate_with_factory(
    &self,
    context: &InvocationContext,
    merged: &Arc<MergedDefinition>,
    name: &str,
    owner: &dyn ContainerHandle,
    factory_instance: Option<&Instance>,
    method: &Arc<MethodSpec>,
    args: &[Instance],
  ) -> Result<Instance> {
    let prior = context.swap(Some(method.clone()));
    let outcome = method.invoke(CallScope {
      invocation: Some(context),
      target: factory_instance,
      args,
    });
    // Restore before propagating any failure, to keep nested invocations
    // consistent.
    context.swap(prior);

    match outcome {
      Ok(produced) => Ok(NullSentinel::erase(produced)),
      Err(InvokeError::Raised(source)) => {
        let mut message = format!("factory method '{}' raised an error", method.name);
        if let Some(factory_service) = &merged.definition().factory_service {
          if owner.is_currently_in_creation(factory_service) {
            message.push_str(&format!(
              "; circular reference through containing service '{factory_service}', which is \
               still in creation. Consider a factory method independent of its containing \
               instance"
            ));
          }
        }
        Err(Error::Construction {
          name: name.to_string(),
          message,
          source: Some(source),
        })
      }
      Err(err) => Err(invoke_failure(
        name,
        &format!("factory method '{}'", method.name),
        err,
      )),
    }
  }

  fn actual_class_of(&self, merged: &Arc<MergedDefinition>) -> Result<Arc<ClassSpec>> {
    self.resolve_class(merged)
  }
}

/// A raw instance wrapped so that calls to overridden methods are redirected
/// to their override's resolution logic.
///
/// This is the delegation-wrapper backend of the override contract: the
/// wrapper is the constructed instance, callers route method calls through
/// [`call`](Self::call), and non-overridden methods fall through to the
/// original bodies against the wrapped target.
pub struct InterceptedInstance {
  service_name: String,
  target: Instance,
  class: Arc<ClassSpec>,
  overrides: MethodOverrides,
}

impl InterceptedInstance {
  pub fn target(&self) -> &Instance {
    &self.target
  }

  pub fn class(&self) -> &Arc<ClassSpec> {
    &self.class
  }

  /// Recovers the wrapper from a resolved service instance, if it is one.
  pub fn from_instance(instance: &Instance) -> Option<&InterceptedInstance> {
    instance.downcast_ref::<InterceptedInstance>()
  }

  /// Dispatches a method call, applying any matching override.
  pub fn call(
    &self,
    owner: &dyn ContainerHandle,
    method_name: &str,
    args: &[Instance],
  ) -> Result<Option<Instance>> {
    let method = self
      .class
      .method_with_arity(method_name, args.len())
      .or_else(|| self.class.methods_named(method_name).next())
      .ok_or_else(|| {
        Error::construction(
          self.service_name.clone(),
          format!("class '{}' declares no method '{method_name}'", self.class.name),
        )
      })?
      .clone();

    match self.overrides.override_for(&method) {
      Some(MethodOverride::Lookup { service, .. }) => {
        let looked_up = match service {
          Some(service_name) => owner.get_instance(service_name)?,
          None => {
            let return_type = method.returns.clone().ok_or_else(|| {
              Error::construction(
                self.service_name.clone(),
                format!(
                  "lookup override on '{}' needs a service name or a method return type",
                  method.name
                ),
              )
            })?;
            owner.get_instance_of(&return_type)?
          }
        };
        Ok(Some(looked_up))
      }
      Some(MethodOverride::Replace { replacer, .. }) => {
        let replacer_instance = owner.get_instance(replacer)?;
        let replacer = as_replacer(&replacer_instance).ok_or_else(|| {
          Error::construction(
            self.service_name.clone(),
            format!("service '{replacer}' is not a method replacer"),
          )
        })?;
        replacer.reimplement(&self.target, &method, args)
      }
      None => method
        .invoke(CallScope {
          invocation: None,
          target: Some(&self.target),
          args,
        })
        .map_err(|err| {
          invoke_failure(&self.service_name, &format!("method '{}'", method.name), err)
        }),
    }
  }
}

/// Layers override support on top of [`SimpleInstantiationStrategy`].
pub struct DispatchingInstantiationStrategy {
  simple: SimpleInstantiationStrategy,
}

impl DispatchingInstantiationStrategy {
  pub fn new(catalog: Arc<TypeCatalog>) -> Self {
    Self {
      simple: SimpleInstantiationStrategy::new(catalog),
    }
  }

  fn wrap(
    &self,
    merged: &Arc<MergedDefinition>,
    name: &str,
    target: Instance,
  ) -> Result<Instance> {
    let class = self.simple.resolve_class(merged)?;
    let mut overrides = merged.definition().method_overrides.clone();
    overrides.prepare(&class)?;
    debug!(name, count = overrides.len(), "wrapping instance for method overrides");
    Ok(Arc::new(InterceptedInstance {
      service_name: name.to_string(),
      target,
      class,
      overrides,
    }))
  }
}

impl InstantiationStrategy for DispatchingInstantiationStrategy {
  fn instantiate(
    &self,
    merged: &Arc<MergedDefinition>,
    name: &str,
    owner: &dyn ContainerHandle,
  ) -> Result<Instance> {
    if merged.definition().method_overrides.is_empty() {
      return self.simple.instantiate(merged, name, owner);
    }
    let constructor = self.simple.default_constructor_of(merged, name)?;
    let target = constructor
      .invoke(&[])
      .map_err(|err| invoke_failure(name, "default constructor", err))?;
    self.wrap(merged, name, target)
  }

  fn instantiate_with_constructor(
    &self,
    merged: &Arc<MergedDefinition>,
    name: &str,
    owner: &dyn ContainerHandle,
    constructor: &Arc<ConstructorSpec>,
    args: &[Instance],
  ) -> Result<Instance> {
    if merged.definition().method_overrides.is_empty() {
      return self
        .simple
        .instantiate_with_constructor(merged, name, owner, constructor, args);
    }
    let target = constructor
      .invoke(args)
      .map_err(|err| invoke_failure(name, "constructor", err))?;
    self.wrap(merged, name, target)
  }

  fn instantiate_with_factory(
    &self,
    context: &InvocationContext,
    merged: &Arc<MergedDefinition>,
    name: &str,
    owner: &dyn ContainerHandle,
    factory_instance: Option<&Instance>,
    method: &Arc<MethodSpec>,
    args: &[Instance],
  ) -> Result<Instance> {
    // Overrides cannot be combined with factory methods; the merger rejects
    // that combination before this point.
    self.simple.instantiate_with_factory(
      context,
      merged,
      name,
      owner,
      factory_instance,
      method,
      args,
    )
  }

  fn actual_class_of(&self, merged: &Arc<MergedDefinition>) -> Result<Arc<ClassSpec>> {
    self.simple.actual_class_of(merged)
  }
}
