use std::sync::Arc;

use thiserror::Error;

use crate::definition::ServiceDefinition;

/// The main error type for the `fibre_weave` library.
#[derive(Debug, Error)]
pub enum Error {
  /// The definition is invalid or incomplete (missing class/parent/factory
  /// reference, cyclic parent chain, override naming a missing method, ...).
  /// Always raised before construction is attempted.
  #[error("invalid definition '{name}': {message}")]
  Configuration { name: String, message: String },

  /// A definition is already bound under this name and the registry's
  /// override policy disallows replacement. Carries both colliding
  /// definitions for diagnostics.
  #[error("a definition named '{name}' is already registered and overriding is not allowed")]
  RegistrationConflict {
    name: String,
    existing: Arc<ServiceDefinition>,
    incoming: Arc<ServiceDefinition>,
  },

  /// Constructor or factory invocation for the named service failed.
  #[error("construction of '{name}' failed: {message}")]
  Construction {
    name: String,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
  },

  /// The named service is currently being constructed and has been
  /// re-requested in a way the cache cannot satisfy. Recoverable by the
  /// singleton cache's concurrent-creation protocol when the cycle passes
  /// through a factory-object indirection; fatal otherwise.
  #[error("'{name}' is currently in creation: {message}")]
  CurrentlyInCreation { name: String, message: String },

  /// Signal raised by a factory object whose own collaborators are not wired
  /// yet. The singleton cache translates this into `CurrentlyInCreation`
  /// instead of surfacing it raw.
  #[error("factory object for '{name}' is not fully initialized yet")]
  FactoryNotInitialized { name: String },

  /// The definition names a scope for which no handler is active.
  /// Distinguishable from generic construction failure so callers can offer
  /// a proxy-based remedy.
  #[error("scope '{scope}' requested by '{name}' has no active context")]
  ScopeUnavailable { scope: String, name: String },

  /// No definition is registered under the requested name.
  #[error("no definition registered under '{name}'")]
  NoSuchDefinition { name: String },
}

impl Error {
  pub(crate) fn configuration(name: impl Into<String>, message: impl Into<String>) -> Self {
    Error::Configuration {
      name: name.into(),
      message: message.into(),
    }
  }

  pub(crate) fn construction(name: impl Into<String>, message: impl Into<String>) -> Self {
    Error::Construction {
      name: name.into(),
      message: message.into(),
      source: None,
    }
  }

  pub(crate) fn construction_caused(
    name: impl Into<String>,
    message: impl Into<String>,
    source: impl std::error::Error + Send + Sync + 'static,
  ) -> Self {
    Error::Construction {
      name: name.into(),
      message: message.into(),
      source: Some(Box::new(source)),
    }
  }

  /// The service name the error is attached to, for callers that report
  /// failures per target identity.
  pub fn service_name(&self) -> &str {
    match self {
      Error::Configuration { name, .. }
      | Error::RegistrationConflict { name, .. }
      | Error::Construction { name, .. }
      | Error::CurrentlyInCreation { name, .. }
      | Error::FactoryNotInitialized { name }
      | Error::ScopeUnavailable { name, .. }
      | Error::NoSuchDefinition { name } => name,
    }
  }
}

/// A specialized `Result` type for `fibre_weave` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Outcome of invoking a registered constructor, method or factory method.
///
/// The three variants let construction failures stay distinguishable the way
/// the instantiation contract requires: bad arguments, an inaccessible
/// target, and a target that ran but raised.
#[derive(Debug, Error)]
pub enum InvokeError {
  #[error("illegal arguments: {0}")]
  BadArguments(String),

  #[error("target not accessible: {0}")]
  Inaccessible(String),

  #[error("target raised: {0}")]
  Raised(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl InvokeError {
  pub fn raised(source: impl std::error::Error + Send + Sync + 'static) -> Self {
    InvokeError::Raised(Box::new(source))
  }

  pub fn raised_msg(message: impl Into<String>) -> Self {
    InvokeError::Raised(message.into().into())
  }
}
