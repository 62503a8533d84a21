//! Singleton and factory-product caching.
//!
//! Two layers share one guard: the raw singleton layer (one instance per
//! name) and the product layer for names whose externally-visible object is
//! obtained through a factory-object indirection. Every singleton-affecting
//! operation for a container serializes through the guard, which is what
//! makes the double-check-after-create pattern below correct. The guard is
//! reentrant: constructing a service's dependencies re-enters the cache on
//! the same thread.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::ReentrantMutex;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::factory::{ProductPostProcessor, ServiceFactory};
use crate::sentinel::NullSentinel;
use crate::types::Instance;

/// An RAII mark for a name that is currently being constructed.
///
/// Acquiring the mark for a name that is already marked means the
/// construction path has looped back onto itself in a way the cache cannot
/// satisfy, and fails with `CurrentlyInCreation`. Dropping the mark always
/// clears it, including on error paths.
struct CreationMark<'a> {
  cache: &'a SingletonCache,
  name: String,
}

impl<'a> CreationMark<'a> {
  fn acquire(cache: &'a SingletonCache, name: &str) -> Result<Self> {
    if cache.in_creation.insert(name.to_string(), ()).is_some() {
      return Err(Error::CurrentlyInCreation {
        name: name.to_string(),
        message: "requested again while its own construction is still running".to_string(),
      });
    }
    Ok(Self {
      cache,
      name: name.to_string(),
    })
  }
}

impl Drop for CreationMark<'_> {
  fn drop(&mut self) {
    self.cache.in_creation.remove(&self.name);
  }
}

/// The per-container singleton subsystem.
pub struct SingletonCache {
  /// Raw singleton instances.
  singletons: DashMap<String, Instance>,
  /// Objects produced through a factory-object indirection.
  products: DashMap<String, Instance>,
  /// Names currently being constructed.
  in_creation: DashMap<String, ()>,
  /// The one guard all singleton-affecting operations serialize through.
  guard: ReentrantMutex<()>,
}

impl SingletonCache {
  pub fn new() -> Self {
    Self {
      singletons: DashMap::new(),
      products: DashMap::new(),
      in_creation: DashMap::new(),
      guard: ReentrantMutex::new(()),
    }
  }

  /// Registers an externally constructed singleton. Fails if the name is
  /// already bound.
  pub fn register_singleton(&self, name: &str, instance: Instance) -> Result<()> {
    let _lock = self.guard.lock();
    if self.singletons.contains_key(name) {
      return Err(Error::configuration(
        name,
        "a singleton instance is already registered under this name",
      ));
    }
    self.singletons.insert(name.to_string(), instance);
    Ok(())
  }

  /// Non-blocking read of the raw singleton layer.
  pub fn get_singleton(&self, name: &str) -> Option<Instance> {
    self.singletons.get(name).map(|i| i.value().clone())
  }

  pub fn contains_singleton(&self, name: &str) -> bool {
    self.singletons.contains_key(name)
  }

  /// Whether the name is currently being constructed (on any thread).
  pub fn is_in_creation(&self, name: &str) -> bool {
    self.in_creation.contains_key(name)
  }

  /// Returns the singleton for `name`, constructing it at most once.
  ///
  /// Concurrent callers serialize on the subsystem guard; all of them
  /// observe the instance the winning caller constructed. A same-thread
  /// re-entry for a name already in creation is a circular reference the
  /// cache cannot satisfy and fails instead of deadlocking.
  pub fn get_or_create(
    &self,
    name: &str,
    create: impl FnOnce() -> Result<Instance>,
  ) -> Result<Instance> {
    if let Some(existing) = self.get_singleton(name) {
      return Ok(existing);
    }
    let _lock = self.guard.lock();
    // Another thread may have finished while we waited for the guard.
    if let Some(existing) = self.get_singleton(name) {
      return Ok(existing);
    }
    let _mark = CreationMark::acquire(self, name)?;
    debug!(name, "creating singleton");
    let instance = create()?;
    self.singletons.insert(name.to_string(), instance.clone());
    Ok(instance)
  }

  /// Non-blocking read of the factory-product layer.
  pub fn get_cached_product(&self, name: &str) -> Option<Instance> {
    self.products.get(name).map(|i| i.value().clone())
  }

  /// The externally-visible object for a name whose raw instance is a
  /// factory-object indirection.
  ///
  /// For singleton-scoped products of a live raw singleton: under the
  /// subsystem guard, re-check the product cache, produce, then re-check
  /// once more (producing the object may itself have triggered resolution
  /// of the very name being computed, an allowed circular pattern), then
  /// post-process while the name is marked in creation, and publish only if
  /// the raw layer still considers the name a live singleton. Everything
  /// else is recomputed per call, with post-processing but no caching.
  pub fn product_for(
    &self,
    factory: &dyn ServiceFactory,
    name: &str,
    post_processor: Option<&dyn ProductPostProcessor>,
  ) -> Result<Instance> {
    if factory.is_singleton() && self.contains_singleton(name) {
      let _lock = self.guard.lock();
      if let Some(existing) = self.get_cached_product(name) {
        return Ok(existing);
      }
      let mut product = self.produce(factory, name)?;
      if let Some(appeared) = self.get_cached_product(name) {
        // Producing the object resolved this very name as a side effect;
        // the published result wins.
        product = appeared;
      } else {
        if let Some(post) = post_processor {
          let _mark = CreationMark::acquire(self, name)?;
          product = post.post_process(product, name).map_err(|source| {
            Error::construction_caused(name, "post-processing of the factory product failed", source)
          })?;
        }
        if self.contains_singleton(name) {
          trace!(name, "caching factory product");
          self.products.insert(name.to_string(), product.clone());
        }
      }
      Ok(product)
    } else {
      let mut product = self.produce(factory, name)?;
      if let Some(post) = post_processor {
        product = post.post_process(product, name).map_err(|source| {
          Error::construction_caused(name, "post-processing of the factory product failed", source)
        })?;
      }
      Ok(product)
    }
  }

  /// Invokes the factory and normalizes its outcome.
  fn produce(&self, factory: &dyn ServiceFactory, name: &str) -> Result<Instance> {
    match factory.produce() {
      Ok(Some(product)) => Ok(product),
      Ok(None) => {
        if self.is_in_creation(name) {
          // An absent result from a factory that is itself mid-creation is
          // an unsatisfiable cycle, not an intentional absence.
          Err(Error::CurrentlyInCreation {
            name: name.to_string(),
            message: "factory returned no object while the requested service is in creation"
              .to_string(),
          })
        } else {
          Ok(Arc::new(NullSentinel::new()))
        }
      }
      Err(Error::FactoryNotInitialized { .. }) => Err(Error::CurrentlyInCreation {
        name: name.to_string(),
        message: "factory signalled that it is not initialized yet".to_string(),
      }),
      Err(err @ Error::CurrentlyInCreation { .. }) => Err(err),
      Err(source) => Err(Error::construction_caused(
        name,
        "factory object failed to produce",
        source,
      )),
    }
  }

  /// Removes the raw singleton and, atomically under the same guard, any
  /// cached factory product for the name.
  pub fn remove_singleton(&self, name: &str) {
    let _lock = self.guard.lock();
    let removed = self.singletons.remove(name).is_some();
    let removed_product = self.products.remove(name).is_some();
    if removed || removed_product {
      trace!(name, removed, removed_product, "evicted singleton state");
    }
  }

  /// Clears both layers in one guarded step.
  pub fn clear(&self) {
    let _lock = self.guard.lock();
    self.singletons.clear();
    self.products.clear();
    self.in_creation.clear();
    debug!("cleared singleton cache");
  }

  pub fn singleton_count(&self) -> usize {
    self.singletons.len()
  }
}

impl Default for SingletonCache {
  fn default() -> Self {
    Self::new()
  }
}
