//! # Fibre Weave
//!
//! A thread-safe, metadata-driven object construction and dependency
//! resolution core for Inversion of Control containers.
//!
//! Where `fibre_ioc` wires services from closures registered at runtime,
//! Fibre Weave works from declarative *service definitions*: value objects
//! describing how to build an object (class, constructor arguments, property
//! values, scope, lifecycle hooks, method overrides). Definitions can
//! inherit from each other, are flattened into merged views, and are turned
//! into singleton-cached, circular-reference-protected instances on demand.
//!
//! ## Core Concepts
//!
//! - **Service definition**: a declarative description of one managed
//!   object, registered by name in the [`DefinitionRegistry`].
//! - **Merged definition**: the flattened, parent-resolved view of a
//!   definition, cached per name and invalidated when its source changes.
//! - **Singleton cache**: guards at-most-once construction per name,
//!   including the second cache layer for factory-object indirections.
//! - **Candidate resolver**: decides whether a definition may satisfy a
//!   dependency slot, with full generic-type compatibility checking.
//! - **Instantiation strategy**: builds raw instances and realizes
//!   method-level behavioral overrides.
//! - **Assembly**: the owning facade that wires the above together.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use fibre_weave::{
//!   Assembly, ClassSpec, ConstructorSpec, Instance, ServiceDefinition, TypeCatalog,
//! };
//!
//! struct Greeter {
//!   message: String,
//! }
//!
//! // Describe the constructible types the container may use.
//! let catalog = Arc::new(TypeCatalog::new());
//! catalog.register(ClassSpec::new("Greeter").with_constructor(ConstructorSpec::new(
//!   vec![],
//!   |_args| {
//!     Ok(Arc::new(Greeter {
//!       message: String::from("Hello, World!"),
//!     }) as Instance)
//!   },
//! )));
//!
//! // Register a definition and resolve it.
//! let assembly = Assembly::new(catalog);
//! assembly
//!   .register("greeter", ServiceDefinition::of_class("Greeter"))
//!   .unwrap();
//!
//! let instance = assembly.get_service("greeter").unwrap();
//! let greeter = instance.downcast_ref::<Greeter>().unwrap();
//! assert_eq!(greeter.message, "Hello, World!");
//! ```

pub mod collections;
pub mod container;
pub mod definition;
pub mod error;
pub mod factory;
pub mod instantiate;
pub mod merge;
pub mod overrides;
pub mod registry;
pub mod resolver;
pub mod sentinel;
pub mod singleton;
pub mod types;

pub use collections::{ManagedArray, ManagedList, ManagedMap, ManagedProps, ManagedSet, Value};
pub use container::{Assembly, ContainerHandle, CustomScope};
pub use definition::{
  AutowireMode, ConstructorArgs, DependencyCheck, PropertyValue, PropertyValues, Scope,
  ServiceDefinition,
};
pub use error::{Error, InvokeError, Result};
pub use factory::{ProductPostProcessor, ServiceFactory, FACTORY_REF_PREFIX};
pub use instantiate::{
  DispatchingInstantiationStrategy, InstantiationStrategy, InterceptedInstance, InvocationContext,
  SimpleInstantiationStrategy,
};
pub use merge::{MergedDefinition, MergedDefinitions, ResolvedExecutable};
pub use overrides::{MethodOverride, MethodOverrides, MethodReplacer};
pub use registry::DefinitionRegistry;
pub use resolver::{
  Candidate, CandidateResolver, DependencyDescriptor, GenericCandidateResolver,
  SimpleCandidateResolver,
};
pub use sentinel::NullSentinel;
pub use singleton::SingletonCache;
pub use types::{
  CallScope, ClassSpec, ConstructorSpec, Instance, MethodSpec, TypeCatalog, TypeSpec,
};
