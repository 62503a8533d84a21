//! The factory-object indirection: a managed service whose sole purpose is
//! to produce another object.

use std::sync::Arc;

use crate::error::Result;
use crate::types::{Instance, TypeSpec};

/// Requesting `&name` returns the factory object itself instead of its
/// product.
pub const FACTORY_REF_PREFIX: char = '&';

pub fn is_factory_reference(name: &str) -> bool {
  name.starts_with(FACTORY_REF_PREFIX)
}

pub fn strip_factory_prefix(name: &str) -> &str {
  name.trim_start_matches(FACTORY_REF_PREFIX)
}

/// A managed object that produces the externally-visible object for its
/// name. The produced object gets its own cache layer on top of the raw
/// factory instance.
pub trait ServiceFactory: Send + Sync {
  /// Produces the object. `Ok(None)` is a legal "intentionally absent"
  /// result outside of creation; the cache substitutes a null sentinel for
  /// it. Raising [`Error::FactoryNotInitialized`](crate::Error) signals that
  /// the factory's own collaborators are not wired yet and is translated by
  /// the cache into a currently-in-creation condition.
  fn produce(&self) -> Result<Option<Instance>>;

  /// The type of the produced object, when the factory can tell without
  /// producing it.
  fn produced_type(&self) -> Option<TypeSpec> {
    None
  }

  /// Whether the produced object is a singleton with respect to this
  /// factory. Non-singleton products are recomputed on every request.
  fn is_singleton(&self) -> bool {
    true
  }
}

/// Runs after a factory product is obtained and before it is published.
pub trait ProductPostProcessor: Send + Sync {
  fn post_process(&self, product: Instance, name: &str) -> Result<Instance>;
}

/// Type-erases a factory for registration as a service instance. The
/// container recognizes instances of this shape as factory indirections.
pub fn erase_factory(factory: Arc<dyn ServiceFactory>) -> Instance {
  Arc::new(factory)
}

/// Recovers the factory from a resolved service instance, if it is one.
pub fn as_factory(instance: &Instance) -> Option<Arc<dyn ServiceFactory>> {
  instance.downcast_ref::<Arc<dyn ServiceFactory>>().cloned()
}
