use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use fibre_weave::factory::erase_factory;
use fibre_weave::{
  Error, Instance, NullSentinel, ProductPostProcessor, Result, ServiceFactory, SingletonCache,
  TypeSpec,
};

// --- Test Fixtures ---

struct Widget {
  id: u32,
}

/// A factory that counts how often it produces.
struct CountingFactory {
  produced: AtomicUsize,
  outcome: Mutex<Box<dyn Fn() -> Result<Option<Instance>> + Send>>,
}

impl CountingFactory {
  fn returning_widget(id: u32) -> Self {
    Self::with_outcome(move || Ok(Some(Arc::new(Widget { id }) as Instance)))
  }

  fn returning_none() -> Self {
    Self::with_outcome(|| Ok(None))
  }

  fn with_outcome(outcome: impl Fn() -> Result<Option<Instance>> + Send + 'static) -> Self {
    Self {
      produced: AtomicUsize::new(0),
      outcome: Mutex::new(Box::new(outcome)),
    }
  }

  fn produce_count(&self) -> usize {
    self.produced.load(Ordering::SeqCst)
  }
}

impl ServiceFactory for CountingFactory {
  fn produce(&self) -> Result<Option<Instance>> {
    self.produced.fetch_add(1, Ordering::SeqCst);
    (self.outcome.lock().unwrap())()
  }

  fn produced_type(&self) -> Option<TypeSpec> {
    Some(TypeSpec::raw("Widget"))
  }
}

// --- Raw singleton layer ---

#[test]
fn get_or_create_constructs_exactly_once_under_concurrency() {
  static CONSTRUCTIONS: AtomicUsize = AtomicUsize::new(0);

  let cache = SingletonCache::new();
  let results: Mutex<Vec<Instance>> = Mutex::new(Vec::new());

  thread::scope(|s| {
    for _ in 0..16 {
      s.spawn(|| {
        let instance = cache
          .get_or_create("widget", || {
            CONSTRUCTIONS.fetch_add(1, Ordering::SeqCst);
            // Widen the race window.
            thread::sleep(Duration::from_millis(20));
            Ok(Arc::new(Widget { id: 7 }) as Instance)
          })
          .unwrap();
        results.lock().unwrap().push(instance);
      });
    }
  });

  assert_eq!(CONSTRUCTIONS.load(Ordering::SeqCst), 1);
  let results = results.lock().unwrap();
  assert_eq!(results.len(), 16);
  for instance in results.iter() {
    assert!(Arc::ptr_eq(instance, &results[0]));
  }
}

#[test]
fn same_thread_reentry_for_a_name_in_creation_fails_instead_of_deadlocking() {
  let cache = SingletonCache::new();
  let result = cache.get_or_create("cyclic", || {
    cache.get_or_create("cyclic", || Ok(Arc::new(Widget { id: 1 }) as Instance))
  });
  assert!(matches!(result, Err(Error::CurrentlyInCreation { .. })));
  // The creation mark is released on the error path.
  assert!(!cache.is_in_creation("cyclic"));
  // A later attempt succeeds normally.
  assert!(cache
    .get_or_create("cyclic", || Ok(Arc::new(Widget { id: 2 }) as Instance))
    .is_ok());
}

#[test]
fn failed_creation_leaves_no_singleton_behind() {
  let cache = SingletonCache::new();
  let result: Result<Instance> =
    cache.get_or_create("broken", || Err(Error::NoSuchDefinition { name: "dep".into() }));
  assert!(result.is_err());
  assert!(cache.get_singleton("broken").is_none());
  assert!(!cache.is_in_creation("broken"));
}

// --- Factory-product layer ---

fn cache_with_registered_factory(factory: &Arc<CountingFactory>) -> SingletonCache {
  let cache = SingletonCache::new();
  cache
    .register_singleton(
      "widget",
      erase_factory(factory.clone() as Arc<dyn ServiceFactory>),
    )
    .unwrap();
  cache
}

#[test]
fn singleton_products_are_produced_once_and_cached() {
  let factory = Arc::new(CountingFactory::returning_widget(42));
  let cache = cache_with_registered_factory(&factory);

  assert!(cache.get_cached_product("widget").is_none());

  let first = cache.product_for(factory.as_ref(), "widget", None).unwrap();
  let second = cache.product_for(factory.as_ref(), "widget", None).unwrap();

  assert_eq!(factory.produce_count(), 1);
  assert!(Arc::ptr_eq(&first, &second));
  assert!(cache.get_cached_product("widget").is_some());
  assert_eq!(first.downcast_ref::<Widget>().unwrap().id, 42);
}

#[test]
fn concurrent_product_requests_observe_one_construction() {
  let factory = Arc::new(CountingFactory::returning_widget(9));
  let cache = cache_with_registered_factory(&factory);
  let results: Mutex<Vec<Instance>> = Mutex::new(Vec::new());

  thread::scope(|s| {
    for _ in 0..16 {
      s.spawn(|| {
        let product = cache.product_for(factory.as_ref(), "widget", None).unwrap();
        results.lock().unwrap().push(product);
      });
    }
  });

  assert_eq!(factory.produce_count(), 1);
  let results = results.lock().unwrap();
  for product in results.iter() {
    assert!(Arc::ptr_eq(product, &results[0]));
  }
}

#[test]
fn products_of_unregistered_names_are_recomputed_per_call() {
  let factory = Arc::new(CountingFactory::returning_widget(1));
  let cache = SingletonCache::new();

  // No raw singleton registered under the name: no caching.
  cache.product_for(factory.as_ref(), "loose", None).unwrap();
  cache.product_for(factory.as_ref(), "loose", None).unwrap();
  assert_eq!(factory.produce_count(), 2);
  assert!(cache.get_cached_product("loose").is_none());
}

#[test]
fn absent_product_outside_creation_becomes_a_distinct_sentinel() {
  let factory = Arc::new(CountingFactory::returning_none());
  let other_factory = Arc::new(CountingFactory::returning_none());

  let cache = cache_with_registered_factory(&factory);
  cache
    .register_singleton(
      "other",
      erase_factory(other_factory.clone() as Arc<dyn ServiceFactory>),
    )
    .unwrap();

  let absent = cache.product_for(factory.as_ref(), "widget", None).unwrap();
  assert!(NullSentinel::holds(&absent));
  assert!(NullSentinel::reveal(absent.clone()).is_none());

  // Cached: the same sentinel identity comes back for the same name.
  let again = cache.product_for(factory.as_ref(), "widget", None).unwrap();
  assert!(Arc::ptr_eq(&absent, &again));

  // But every other absence is reference-distinct.
  let other_absent = cache
    .product_for(other_factory.as_ref(), "other", None)
    .unwrap();
  assert!(NullSentinel::holds(&other_absent));
  assert!(!Arc::ptr_eq(&absent, &other_absent));
}

#[test]
fn absent_product_while_in_creation_is_a_circular_reference_error() {
  let factory = Arc::new(CountingFactory::returning_none());
  let cache = SingletonCache::new();

  // The raw creation of "widget" marks it in creation; an absent factory
  // result during that window is unsatisfiable.
  let result = cache.get_or_create("widget", || cache.product_for(factory.as_ref(), "widget", None));
  assert!(matches!(result, Err(Error::CurrentlyInCreation { .. })));
}

#[test]
fn not_initialized_signal_is_translated_to_in_creation() {
  let factory = Arc::new(CountingFactory::with_outcome(|| {
    Err(Error::FactoryNotInitialized {
      name: "widget".to_string(),
    })
  }));
  let cache = cache_with_registered_factory(&factory);

  let result = cache.product_for(factory.as_ref(), "widget", None);
  assert!(matches!(result, Err(Error::CurrentlyInCreation { .. })));
}

#[test]
fn factory_failures_are_wrapped_as_construction_errors() {
  let factory = Arc::new(CountingFactory::with_outcome(|| {
    Err(Error::NoSuchDefinition {
      name: "collaborator".to_string(),
    })
  }));
  let cache = cache_with_registered_factory(&factory);

  let result = cache.product_for(factory.as_ref(), "widget", None);
  assert!(matches!(result, Err(Error::Construction { .. })));
}

// --- Post-processing ---

struct MarkAssertingPostProcessor {
  cache: Arc<SingletonCache>,
  ran: AtomicUsize,
}

impl ProductPostProcessor for MarkAssertingPostProcessor {
  fn post_process(&self, product: Instance, name: &str) -> Result<Instance> {
    // The name is marked in creation for the duration of post-processing,
    // which is what enables cycle detection elsewhere.
    assert!(self.cache.is_in_creation(name));
    self.ran.fetch_add(1, Ordering::SeqCst);
    Ok(product)
  }
}

#[test]
fn post_processing_runs_inside_the_creation_mark() {
  let factory = Arc::new(CountingFactory::returning_widget(3));
  let cache = Arc::new(SingletonCache::new());
  cache
    .register_singleton(
      "widget",
      erase_factory(factory.clone() as Arc<dyn ServiceFactory>),
    )
    .unwrap();

  let post = MarkAssertingPostProcessor {
    cache: cache.clone(),
    ran: AtomicUsize::new(0),
  };
  let product = cache
    .product_for(factory.as_ref(), "widget", Some(&post as &dyn ProductPostProcessor))
    .unwrap();

  assert_eq!(post.ran.load(Ordering::SeqCst), 1);
  assert!(!cache.is_in_creation("widget"));
  assert_eq!(product.downcast_ref::<Widget>().unwrap().id, 3);

  // Cached: no second post-processing round.
  cache
    .product_for(factory.as_ref(), "widget", Some(&post as &dyn ProductPostProcessor))
    .unwrap();
  assert_eq!(post.ran.load(Ordering::SeqCst), 1);
}

// --- Eviction ---

#[test]
fn evicting_a_name_clears_both_layers() {
  let factory = Arc::new(CountingFactory::returning_widget(5));
  let cache = cache_with_registered_factory(&factory);
  cache.product_for(factory.as_ref(), "widget", None).unwrap();
  assert!(cache.get_cached_product("widget").is_some());

  cache.remove_singleton("widget");

  assert!(cache.get_singleton("widget").is_none());
  assert!(cache.get_cached_product("widget").is_none());
}

#[test]
fn clear_empties_both_layers_in_one_step() {
  let factory = Arc::new(CountingFactory::returning_widget(5));
  let cache = cache_with_registered_factory(&factory);
  cache.product_for(factory.as_ref(), "widget", None).unwrap();

  cache.clear();

  assert_eq!(cache.singleton_count(), 0);
  assert!(cache.get_cached_product("widget").is_none());
}
