//! The type model the container core works against.
//!
//! Rust has no runtime reflection, so the "reflection-equivalent facility"
//! the resolution algorithms consume is supplied explicitly: registered
//! [`ClassSpec`]s carry invoke closures for their constructors and methods,
//! and [`TypeSpec`] is a symbolic generic type supporting the assignability
//! and generic-parameter queries the candidate resolver needs.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::InvokeError;
use crate::instantiate::InvocationContext;

/// A constructed, type-erased service instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// A symbolic generic type: a raw type name plus zero or more type
/// arguments, or an unbound type variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSpec {
  /// An unresolved type variable or wildcard.
  Unresolved,
  /// A named type with (possibly empty) type arguments.
  Concrete { raw: String, args: Vec<TypeSpec> },
}

impl TypeSpec {
  pub fn raw(name: impl Into<String>) -> Self {
    TypeSpec::Concrete {
      raw: name.into(),
      args: Vec::new(),
    }
  }

  pub fn generic(name: impl Into<String>, args: Vec<TypeSpec>) -> Self {
    TypeSpec::Concrete {
      raw: name.into(),
      args,
    }
  }

  /// The raw type name, if this is not an unbound variable.
  pub fn raw_name(&self) -> Option<&str> {
    match self {
      TypeSpec::Unresolved => None,
      TypeSpec::Concrete { raw, .. } => Some(raw),
    }
  }

  pub fn args(&self) -> &[TypeSpec] {
    match self {
      TypeSpec::Unresolved => &[],
      TypeSpec::Concrete { args, .. } => args,
    }
  }

  pub fn arg(&self, index: usize) -> Option<&TypeSpec> {
    self.args().get(index)
  }

  /// Whether the declared type carries any generic parameters.
  pub fn has_generics(&self) -> bool {
    !self.args().is_empty()
  }

  /// Whether any argument (recursively) is an unbound variable.
  pub fn contains_unresolved(&self) -> bool {
    match self {
      TypeSpec::Unresolved => true,
      TypeSpec::Concrete { args, .. } => args.iter().any(TypeSpec::contains_unresolved),
    }
  }
}

impl fmt::Display for TypeSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TypeSpec::Unresolved => f.write_str("?"),
      TypeSpec::Concrete { raw, args } => {
        f.write_str(raw)?;
        if !args.is_empty() {
          f.write_str("<")?;
          for (i, a) in args.iter().enumerate() {
            if i > 0 {
              f.write_str(", ")?;
            }
            write!(f, "{}", a)?;
          }
          f.write_str(">")?;
        }
        Ok(())
      }
    }
  }
}

/// Everything a method body gets to see when the container drives a call.
pub struct CallScope<'a> {
  /// The instantiation strategy's call-scoped context, present only when the
  /// call is a container-driven factory-method invocation. A factory-method
  /// body can use this to tell container-driven invocation apart from an
  /// ordinary call.
  pub invocation: Option<&'a InvocationContext>,
  /// The receiver, absent for static methods.
  pub target: Option<&'a Instance>,
  pub args: &'a [Instance],
}

pub type MethodBody =
  Arc<dyn Fn(CallScope<'_>) -> std::result::Result<Option<Instance>, InvokeError> + Send + Sync>;

pub type ConstructorBody =
  Arc<dyn Fn(&[Instance]) -> std::result::Result<Instance, InvokeError> + Send + Sync>;

/// A registered constructor: parameter types plus the invoke closure.
pub struct ConstructorSpec {
  pub params: Vec<TypeSpec>,
  body: ConstructorBody,
}

impl ConstructorSpec {
  pub fn new(
    params: Vec<TypeSpec>,
    body: impl Fn(&[Instance]) -> std::result::Result<Instance, InvokeError> + Send + Sync + 'static,
  ) -> Self {
    Self {
      params,
      body: Arc::new(body),
    }
  }

  pub fn invoke(&self, args: &[Instance]) -> std::result::Result<Instance, InvokeError> {
    if args.len() != self.params.len() {
      return Err(InvokeError::BadArguments(format!(
        "expected {} argument(s), got {}",
        self.params.len(),
        args.len()
      )));
    }
    (self.body)(args)
  }
}

impl fmt::Debug for ConstructorSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ConstructorSpec")
      .field("params", &self.params)
      .finish()
  }
}

/// A registered method: signature plus an optional body closure.
///
/// Abstract methods have no body; invoking one is an error unless an
/// override supplies the behavior.
pub struct MethodSpec {
  pub name: String,
  pub params: Vec<TypeSpec>,
  pub returns: Option<TypeSpec>,
  pub is_abstract: bool,
  pub is_static: bool,
  body: Option<MethodBody>,
}

impl MethodSpec {
  pub fn new(name: impl Into<String>, params: Vec<TypeSpec>, returns: Option<TypeSpec>) -> Self {
    Self {
      name: name.into(),
      params,
      returns,
      is_abstract: false,
      is_static: false,
      body: None,
    }
  }

  pub fn with_body(
    mut self,
    body: impl Fn(CallScope<'_>) -> std::result::Result<Option<Instance>, InvokeError>
      + Send
      + Sync
      + 'static,
  ) -> Self {
    self.body = Some(Arc::new(body));
    self
  }

  pub fn marked_abstract(mut self) -> Self {
    self.is_abstract = true;
    self
  }

  pub fn marked_static(mut self) -> Self {
    self.is_static = true;
    self
  }

  pub fn has_body(&self) -> bool {
    self.body.is_some()
  }

  pub fn invoke(&self, scope: CallScope<'_>) -> std::result::Result<Option<Instance>, InvokeError> {
    match &self.body {
      Some(body) => body(scope),
      None => Err(InvokeError::Inaccessible(format!(
        "method '{}' has no body",
        self.name
      ))),
    }
  }
}

impl fmt::Debug for MethodSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MethodSpec")
      .field("name", &self.name)
      .field("params", &self.params)
      .field("returns", &self.returns)
      .field("is_abstract", &self.is_abstract)
      .field("is_static", &self.is_static)
      .finish()
  }
}

/// A registered constructible type.
#[derive(Debug)]
pub struct ClassSpec {
  pub name: String,
  /// Number of declared type parameters. A `TypeSpec` naming this class with
  /// no arguments while this is non-zero is a raw (unresolved) use.
  pub type_params: usize,
  pub supertypes: Vec<String>,
  pub is_abstract: bool,
  constructors: Vec<Arc<ConstructorSpec>>,
  methods: Vec<Arc<MethodSpec>>,
}

impl ClassSpec {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      type_params: 0,
      supertypes: Vec::new(),
      is_abstract: false,
      constructors: Vec::new(),
      methods: Vec::new(),
    }
  }

  pub fn with_type_params(mut self, count: usize) -> Self {
    self.type_params = count;
    self
  }

  pub fn with_supertype(mut self, name: impl Into<String>) -> Self {
    self.supertypes.push(name.into());
    self
  }

  pub fn marked_abstract(mut self) -> Self {
    self.is_abstract = true;
    self
  }

  pub fn with_constructor(mut self, ctor: ConstructorSpec) -> Self {
    self.constructors.push(Arc::new(ctor));
    self
  }

  pub fn with_method(mut self, method: MethodSpec) -> Self {
    self.methods.push(Arc::new(method));
    self
  }

  pub fn default_constructor(&self) -> Option<&Arc<ConstructorSpec>> {
    self.constructors.iter().find(|c| c.params.is_empty())
  }

  pub fn constructor_for(&self, arity: usize) -> Option<&Arc<ConstructorSpec>> {
    self.constructors.iter().find(|c| c.params.len() == arity)
  }

  pub fn methods(&self) -> &[Arc<MethodSpec>] {
    &self.methods
  }

  pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Arc<MethodSpec>> {
    self.methods.iter().filter(move |m| m.name == name)
  }

  pub fn method_with_arity(&self, name: &str, arity: usize) -> Option<&Arc<MethodSpec>> {
    self
      .methods
      .iter()
      .find(|m| m.name == name && m.params.len() == arity)
  }
}

/// Name-keyed store of registered classes plus the marker sets the candidate
/// resolver consults, with an assignability oracle over declared supertypes.
#[derive(Debug, Default)]
pub struct TypeCatalog {
  classes: DashMap<String, Arc<ClassSpec>>,
  factory_raws: DashMap<String, ()>,
  property_bag_raws: DashMap<String, ()>,
}

impl TypeCatalog {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&self, class: ClassSpec) -> Arc<ClassSpec> {
    let class = Arc::new(class);
    self.classes.insert(class.name.clone(), class.clone());
    class
  }

  pub fn class(&self, name: &str) -> Option<Arc<ClassSpec>> {
    self.classes.get(name).map(|c| c.value().clone())
  }

  /// Marks a raw type as a factory-object indirection wrapper (a producer
  /// whose generic argument is what it produces).
  pub fn mark_factory_type(&self, raw: impl Into<String>) {
    self.factory_raws.insert(raw.into(), ());
  }

  pub fn is_factory_type(&self, raw: &str) -> bool {
    self.factory_raws.contains_key(raw)
  }

  /// Marks a raw type as a generic string-keyed property bag (accepted under
  /// fallback matching regardless of parameterization).
  pub fn mark_property_bag(&self, raw: impl Into<String>) {
    self.property_bag_raws.insert(raw.into(), ());
  }

  pub fn is_property_bag(&self, raw: &str) -> bool {
    self.property_bag_raws.contains_key(raw)
  }

  /// Reflexive-transitive assignability over declared supertypes:
  /// `from` is assignable to `to`.
  pub fn is_assignable_raw(&self, to: &str, from: &str) -> bool {
    if to == from {
      return true;
    }
    let mut visited: HashSet<String> = HashSet::new();
    let mut pending = vec![from.to_string()];
    while let Some(current) = pending.pop() {
      if !visited.insert(current.clone()) {
        continue;
      }
      if let Some(class) = self.class(&current) {
        for superty in &class.supertypes {
          if superty == to {
            return true;
          }
          pending.push(superty.clone());
        }
      }
    }
    false
  }

  /// Full generic assignability: can a value of type `target` satisfy a slot
  /// declared as `dep`?
  ///
  /// An unresolved dependency argument accepts anything; an unresolved
  /// target argument fails the strict check (the resolver's fallback-match
  /// exceptions re-admit it); raw-on-raw positions recurse through declared
  /// supertypes. Parameter lists must agree in arity when both are present.
  pub fn is_assignable(&self, dep: &TypeSpec, target: &TypeSpec) -> bool {
    match (dep, target) {
      (TypeSpec::Unresolved, _) => true,
      (_, TypeSpec::Unresolved) => false,
      (
        TypeSpec::Concrete {
          raw: dep_raw,
          args: dep_args,
        },
        TypeSpec::Concrete {
          raw: target_raw,
          args: target_args,
        },
      ) => {
        if !self.is_assignable_raw(dep_raw, target_raw) {
          return false;
        }
        if dep_args.is_empty() {
          // A raw dependency slot accepts any parameterization.
          return true;
        }
        if target_args.len() != dep_args.len() {
          return false;
        }
        dep_args
          .iter()
          .zip(target_args)
          .all(|(d, t)| self.is_assignable(d, t))
      }
    }
  }

  /// Whether the type has generic parameters it does not bind: a raw use of
  /// a class that declares type parameters, or an unbound variable anywhere
  /// in its arguments.
  pub fn has_unresolved_generics(&self, spec: &TypeSpec) -> bool {
    match spec {
      TypeSpec::Unresolved => true,
      TypeSpec::Concrete { raw, args } => {
        if args.is_empty() {
          self
            .class(raw)
            .map(|c| c.type_params > 0)
            .unwrap_or(false)
        } else {
          args.iter().any(TypeSpec::contains_unresolved)
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn catalog() -> TypeCatalog {
    let catalog = TypeCatalog::new();
    catalog.register(ClassSpec::new("Repo").with_type_params(1));
    catalog.register(
      ClassSpec::new("UserRepo")
        .with_type_params(1)
        .with_supertype("Repo"),
    );
    catalog.register(ClassSpec::new("User"));
    catalog.register(ClassSpec::new("Admin").with_supertype("User"));
    catalog
  }

  #[test]
  fn raw_assignability_follows_supertype_closure() {
    let c = catalog();
    assert!(c.is_assignable_raw("Repo", "UserRepo"));
    assert!(c.is_assignable_raw("User", "Admin"));
    assert!(!c.is_assignable_raw("Admin", "User"));
  }

  #[test]
  fn generic_arguments_must_be_compatible() {
    let c = catalog();
    let dep = TypeSpec::generic("Repo", vec![TypeSpec::raw("User")]);

    let covariant = TypeSpec::generic("UserRepo", vec![TypeSpec::raw("Admin")]);
    assert!(c.is_assignable(&dep, &covariant));

    let mismatched = TypeSpec::generic("UserRepo", vec![TypeSpec::raw("Repo")]);
    assert!(!c.is_assignable(&dep, &mismatched));

    // A raw target cannot prove a generic dependency strictly.
    assert!(!c.is_assignable(&dep, &TypeSpec::raw("UserRepo")));
    // But a raw dependency accepts any parameterization.
    assert!(c.is_assignable(&TypeSpec::raw("Repo"), &covariant));
  }

  #[test]
  fn unresolved_generics_are_detected() {
    let c = catalog();
    assert!(c.has_unresolved_generics(&TypeSpec::raw("Repo")));
    assert!(!c.has_unresolved_generics(&TypeSpec::raw("User")));
    assert!(c.has_unresolved_generics(&TypeSpec::generic("Repo", vec![TypeSpec::Unresolved])));
    assert!(!c.has_unresolved_generics(&TypeSpec::generic("Repo", vec![TypeSpec::raw("User")])));
  }
}
