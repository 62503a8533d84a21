//! Candidate resolution for autowiring.
//!
//! Resolvers are a capability set layered by delegation: the simple resolver
//! applies the baseline autowire-candidate policy, the generic resolver
//! calls into it first and then checks full generic-type compatibility
//! between the dependency's declared type and the candidate's most specific
//! known produced type.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::collections::Value;
use crate::container::ContainerHandle;
use crate::merge::MergedDefinition;
use crate::types::{TypeCatalog, TypeSpec};

/// One dependency slot to be satisfied.
#[derive(Clone, Debug)]
pub struct DependencyDescriptor {
  pub dependency_type: TypeSpec,
  pub required: bool,
  pub eager: bool,
  /// Allows the soft fallback match for raw collection-like candidates.
  pub fallback_allowed: bool,
}

impl DependencyDescriptor {
  pub fn of(dependency_type: TypeSpec) -> Self {
    Self {
      dependency_type,
      required: true,
      eager: true,
      fallback_allowed: false,
    }
  }

  pub fn optional(mut self) -> Self {
    self.required = false;
    self
  }

  pub fn lazy(mut self) -> Self {
    self.eager = false;
    self
  }

  pub fn with_fallback(mut self) -> Self {
    self.fallback_allowed = true;
    self
  }
}

/// A definition under consideration for a dependency slot, possibly
/// decorating another definition.
pub struct Candidate {
  pub name: String,
  pub merged: Arc<MergedDefinition>,
  pub decorated: Option<Box<Candidate>>,
}

impl Candidate {
  pub fn new(name: impl Into<String>, merged: Arc<MergedDefinition>) -> Self {
    Self {
      name: name.into(),
      merged,
      decorated: None,
    }
  }

  pub fn with_decorated(mut self, decorated: Candidate) -> Self {
    self.decorated = Some(Box::new(decorated));
    self
  }
}

/// The policy component deciding whether a definition may satisfy a given
/// dependency slot.
///
/// Implementations carry at most an owner back-reference besides their
/// locally configured policy; `clone_for_owner` duplicates the policy while
/// dropping the back-reference, and `bind_owner` rebinds the clone.
pub trait CandidateResolver: Send + Sync {
  fn is_eligible(&self, candidate: &Candidate, descriptor: &DependencyDescriptor) -> bool;

  fn is_required(&self, descriptor: &DependencyDescriptor) -> bool {
    descriptor.required
  }

  fn has_qualifier(&self, _descriptor: &DependencyDescriptor) -> bool {
    false
  }

  /// A value to use instead of resolving the dependency, if the policy
  /// supplies one.
  fn suggested_value(&self, _descriptor: &DependencyDescriptor) -> Option<Value> {
    None
  }

  fn clone_for_owner(&self) -> Box<dyn CandidateResolver>;

  fn bind_owner(&self, _owner: Weak<dyn ContainerHandle>) {}
}

/// Baseline policy: a definition is eligible unless explicitly flagged
/// not-autowirable.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimpleCandidateResolver;

impl CandidateResolver for SimpleCandidateResolver {
  fn is_eligible(&self, candidate: &Candidate, _descriptor: &DependencyDescriptor) -> bool {
    candidate.merged.definition().autowire_candidate
  }

  fn clone_for_owner(&self) -> Box<dyn CandidateResolver> {
    Box::new(*self)
  }
}

/// Generic-type-aware policy, layered over [`SimpleCandidateResolver`].
pub struct GenericCandidateResolver {
  inner: SimpleCandidateResolver,
  catalog: Arc<TypeCatalog>,
  owner: RwLock<Option<Weak<dyn ContainerHandle>>>,
}

impl GenericCandidateResolver {
  pub fn new(catalog: Arc<TypeCatalog>) -> Self {
    Self {
      inner: SimpleCandidateResolver,
      catalog,
      owner: RwLock::new(None),
    }
  }

  fn owner(&self) -> Option<Arc<dyn ContainerHandle>> {
    self.owner.read().as_ref().and_then(Weak::upgrade)
  }

  /// Full generic compatibility check between the dependency's declared type
  /// and the candidate's most specific known produced type.
  fn check_generic_type_match(
    &self,
    candidate: &Candidate,
    descriptor: &DependencyDescriptor,
  ) -> bool {
    let dependency = &descriptor.dependency_type;
    let Some(dependency_raw) = dependency.raw_name() else {
      return true;
    };
    if !dependency.has_generics() {
      // No generic parameters declared on the dependency; baseline
      // eligibility is sufficient.
      return true;
    }

    let freshly_determined = candidate.merged.target_type().is_none();
    let Some(mut target) = self.determine_target_type(candidate, dependency_raw) else {
      // Nothing known about the produced type: stay optimistic.
      return true;
    };
    if freshly_determined {
      candidate.merged.set_target_type(target.clone());
    }

    // A producer's own generic parameter must not be compared against what
    // it produces: unwrap one factory-indirection layer unless the
    // dependency itself asks for the factory type or is a supertype of the
    // wrapper.
    if let Some(target_raw) = target.raw_name() {
      if self.catalog.is_factory_type(target_raw)
        && !self.catalog.is_factory_type(dependency_raw)
        && !self.catalog.is_assignable_raw(dependency_raw, target_raw)
      {
        if let Some(element) = target.arg(0) {
          target = element.clone();
        }
      }
    }

    if self.catalog.is_assignable(dependency, &target) {
      return true;
    }

    // Pragmatic exceptions: an untyped/raw collection-like candidate is
    // accepted under a soft match when its generics are unresolved or it is
    // a generic string-keyed property bag.
    descriptor.fallback_allowed
      && (self.catalog.has_unresolved_generics(&target)
        || target
          .raw_name()
          .is_some_and(|raw| self.catalog.is_property_bag(raw)))
  }

  /// The candidate's most specific known produced type, determined in
  /// documented priority order.
  fn determine_target_type(
    &self,
    candidate: &Candidate,
    dependency_raw: &str,
  ) -> Option<TypeSpec> {
    // (1) Previously cached on the merged definition.
    if let Some(cached) = candidate.merged.target_type() {
      return Some(cached);
    }
    // (2) Factory-method return type, if informative for this dependency.
    if let Some(from_factory) = self.factory_return_type(candidate, dependency_raw) {
      return Some(from_factory);
    }
    // (3) A decorated definition's resolved type.
    if let Some(decorated) = &candidate.decorated {
      if let Some(from_decorated) = self.determine_target_type(decorated, dependency_raw) {
        return Some(from_decorated);
      }
    }
    // (4) Live type query against the running container.
    if let Some(live) = self
      .owner()
      .and_then(|owner| owner.resolve_type(&candidate.name))
    {
      return Some(live);
    }
    // (5) The declared class, unless it is itself a factory indirection.
    candidate
      .merged
      .definition()
      .class_name
      .as_deref()
      .filter(|class_name| !self.catalog.is_factory_type(class_name))
      .map(TypeSpec::raw)
  }

  /// The return type of the candidate's factory method, discarded as
  /// uninformative unless it is assignable to the dependency's raw type.
  fn factory_return_type(&self, candidate: &Candidate, dependency_raw: &str) -> Option<TypeSpec> {
    let definition = candidate.merged.definition();
    let method_name = definition.factory_method.as_deref()?;
    let declaring_class = match &definition.factory_service {
      Some(factory_service) => self
        .owner()
        .and_then(|owner| owner.resolve_type(factory_service))
        .and_then(|t| t.raw_name().map(str::to_string))?,
      None => definition.class_name.clone()?,
    };
    let class = self.catalog.class(&declaring_class)?;
    let return_type = class
      .methods_named(method_name)
      .find_map(|method| method.returns.clone())?;
    let return_raw = return_type.raw_name()?;
    if self.catalog.is_assignable_raw(dependency_raw, return_raw) {
      Some(return_type)
    } else {
      None
    }
  }
}

impl CandidateResolver for GenericCandidateResolver {
  fn is_eligible(&self, candidate: &Candidate, descriptor: &DependencyDescriptor) -> bool {
    if !self.inner.is_eligible(candidate, descriptor) {
      return false;
    }
    self.check_generic_type_match(candidate, descriptor)
  }

  fn clone_for_owner(&self) -> Box<dyn CandidateResolver> {
    Box::new(Self {
      inner: self.inner,
      catalog: self.catalog.clone(),
      owner: RwLock::new(None),
    })
  }

  fn bind_owner(&self, owner: Weak<dyn ContainerHandle>) {
    *self.owner.write() = Some(owner);
  }
}
