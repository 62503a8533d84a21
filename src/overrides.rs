//! Method-level behavioral overrides.
//!
//! A definition may declare that specific instance methods are supplied by
//! the container instead of the original type body: lookup-style overrides
//! return another managed service, replace-style overrides delegate to a
//! registered [`MethodReplacer`]. The matching rules here are backend
//! independent; an override-capable instantiation strategy decides how the
//! interception itself is realized.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{ClassSpec, Instance, MethodSpec};

/// A per-definition declaration that one method's behavior comes from the
/// container.
#[derive(Clone, Debug)]
pub enum MethodOverride {
  /// The overridden method returns a managed service: the named one, or,
  /// when no name is given, the unique candidate for the method's return
  /// type.
  Lookup {
    method: String,
    service: Option<String>,
    overloaded: bool,
  },
  /// The overridden method delegates to the named [`MethodReplacer`]
  /// service. `arg_type_hints` disambiguate overloads by parameter type
  /// name fragments, in order.
  Replace {
    method: String,
    replacer: String,
    arg_type_hints: Vec<String>,
    overloaded: bool,
  },
}

impl MethodOverride {
  pub fn lookup(method: impl Into<String>, service: Option<String>) -> Self {
    MethodOverride::Lookup {
      method: method.into(),
      service,
      overloaded: true,
    }
  }

  pub fn replace(method: impl Into<String>, replacer: impl Into<String>) -> Self {
    MethodOverride::Replace {
      method: method.into(),
      replacer: replacer.into(),
      arg_type_hints: Vec::new(),
      overloaded: true,
    }
  }

  /// Adds an overload-disambiguation hint (replace-style only; a no-op for
  /// lookup overrides, which disambiguate by arity/abstractness alone).
  pub fn with_arg_type_hint(mut self, hint: impl Into<String>) -> Self {
    if let MethodOverride::Replace { arg_type_hints, .. } = &mut self {
      arg_type_hints.push(hint.into());
    }
    self
  }

  pub fn method_name(&self) -> &str {
    match self {
      MethodOverride::Lookup { method, .. } | MethodOverride::Replace { method, .. } => method,
    }
  }

  fn set_overloaded(&mut self, value: bool) {
    match self {
      MethodOverride::Lookup { overloaded, .. } | MethodOverride::Replace { overloaded, .. } => {
        *overloaded = value
      }
    }
  }

  /// Whether this override applies to the given concrete method.
  ///
  /// Without an explicit parameter signature, only zero-argument or abstract
  /// methods match while the override is still considered overloaded;
  /// preparation against the class marks single-occurrence names
  /// non-overloaded, which lifts that restriction.
  pub fn matches(&self, method: &MethodSpec) -> bool {
    if self.method_name() != method.name {
      return false;
    }
    match self {
      MethodOverride::Lookup { overloaded, .. } => {
        !overloaded || method.is_abstract || method.params.is_empty()
      }
      MethodOverride::Replace {
        arg_type_hints,
        overloaded,
        ..
      } => {
        if !overloaded {
          return true;
        }
        if arg_type_hints.is_empty() {
          return method.is_abstract || method.params.is_empty();
        }
        if arg_type_hints.len() != method.params.len() {
          return false;
        }
        arg_type_hints.iter().zip(&method.params).all(|(hint, param)| {
          param
            .raw_name()
            .map(|raw| raw.contains(hint.as_str()))
            .unwrap_or(false)
        })
      }
    }
  }
}

/// The set of overrides attached to one definition.
#[derive(Clone, Debug, Default)]
pub struct MethodOverrides {
  overrides: Vec<MethodOverride>,
}

impl MethodOverrides {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, method_override: MethodOverride) {
    self.overrides.push(method_override);
  }

  pub fn add_all(&mut self, other: MethodOverrides) {
    self.overrides.extend(other.overrides);
  }

  pub fn is_empty(&self) -> bool {
    self.overrides.is_empty()
  }

  pub fn len(&self) -> usize {
    self.overrides.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &MethodOverride> {
    self.overrides.iter()
  }

  /// The override governing the given method, if any. The last matching
  /// declaration wins.
  pub fn override_for(&self, method: &MethodSpec) -> Option<&MethodOverride> {
    self.overrides.iter().rev().find(|ov| ov.matches(method))
  }

  /// Validates the set against the target class and marks overrides whose
  /// method name occurs exactly once as non-overloaded, so later matching
  /// can skip arity checks.
  pub fn prepare(&mut self, class: &ClassSpec) -> Result<()> {
    for method_override in &mut self.overrides {
      let occurrences = class.methods_named(method_override.method_name()).count();
      match occurrences {
        0 => {
          return Err(Error::configuration(
            class.name.clone(),
            format!(
              "override references method '{}' which the class does not declare",
              method_override.method_name()
            ),
          ));
        }
        1 => method_override.set_overloaded(false),
        _ => {}
      }
    }
    Ok(())
  }
}

/// Supplies the replacement behavior for replace-style overrides.
///
/// Replacer services are registered as `Arc<dyn MethodReplacer>` instances;
/// see [`erase_replacer`].
pub trait MethodReplacer: Send + Sync {
  fn reimplement(
    &self,
    target: &Instance,
    method: &MethodSpec,
    args: &[Instance],
  ) -> Result<Option<Instance>>;
}

/// Type-erases a replacer for registration as a service instance.
pub fn erase_replacer(replacer: Arc<dyn MethodReplacer>) -> Instance {
  Arc::new(replacer)
}

/// Recovers a replacer from a resolved service instance.
pub fn as_replacer(instance: &Instance) -> Option<Arc<dyn MethodReplacer>> {
  instance.downcast_ref::<Arc<dyn MethodReplacer>>().cloned()
}
