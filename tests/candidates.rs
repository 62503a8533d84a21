use std::sync::Arc;

use fibre_weave::{
  Assembly, Candidate, CandidateResolver, ClassSpec, ConstructorSpec, DefinitionRegistry,
  DependencyDescriptor, GenericCandidateResolver, Instance, MergedDefinitions, MethodSpec,
  ServiceDefinition, TypeCatalog, TypeSpec,
};

// --- Test Fixtures ---
//
// A small type universe: Repo<T> with UserRepo<T> beneath it, User with
// Admin beneath it, a Provider<T> factory indirection, and a string-keyed
// Bag.

fn catalog() -> Arc<TypeCatalog> {
  let catalog = TypeCatalog::new();
  catalog.register(ClassSpec::new("Repo").with_type_params(1));
  catalog.register(
    ClassSpec::new("UserRepo")
      .with_type_params(1)
      .with_supertype("Repo")
      .with_constructor(ConstructorSpec::new(vec![], |_| {
        Ok(Arc::new(()) as Instance)
      })),
  );
  catalog.register(ClassSpec::new("User"));
  catalog.register(ClassSpec::new("Admin").with_supertype("User"));
  catalog.register(ClassSpec::new("Provider").with_type_params(1));
  catalog.mark_factory_type("Provider");
  catalog.register(ClassSpec::new("Bag"));
  catalog.mark_property_bag("Bag");
  catalog.register(
    ClassSpec::new("Widgets").with_method(MethodSpec::new(
      "make_repo",
      vec![],
      Some(TypeSpec::generic("UserRepo", vec![TypeSpec::raw("User")])),
    )),
  );
  Arc::new(catalog)
}

fn merger() -> MergedDefinitions {
  MergedDefinitions::new(Arc::new(DefinitionRegistry::new()))
}

fn candidate_for(merger: &MergedDefinitions, name: &str, definition: ServiceDefinition) -> Candidate {
  merger.register(name, definition).unwrap();
  Candidate::new(name, merger.merged_for(name).unwrap())
}

fn repo_of(user_type: &str) -> DependencyDescriptor {
  DependencyDescriptor::of(TypeSpec::generic("Repo", vec![TypeSpec::raw(user_type)]))
}

// --- Baseline policy ---

#[test]
fn non_candidates_are_never_eligible() {
  let resolver = GenericCandidateResolver::new(catalog());
  let merger = merger();
  let candidate = candidate_for(
    &merger,
    "repo",
    ServiceDefinition::of_class("UserRepo").with_autowire_candidate(false),
  );
  let descriptor = DependencyDescriptor::of(TypeSpec::raw("Repo"));
  assert!(!resolver.is_eligible(&candidate, &descriptor));
}

#[test]
fn raw_dependency_accepts_any_assignable_candidate() {
  let resolver = GenericCandidateResolver::new(catalog());
  let merger = merger();
  let candidate = candidate_for(&merger, "repo", ServiceDefinition::of_class("UserRepo"));
  // No generic parameters on the dependency: baseline eligibility suffices.
  let descriptor = DependencyDescriptor::of(TypeSpec::raw("Repo"));
  assert!(resolver.is_eligible(&candidate, &descriptor));
}

// --- Generic matching against a known target type ---

#[test]
fn compatible_generic_parameters_are_accepted() {
  let resolver = GenericCandidateResolver::new(catalog());
  let merger = merger();
  let candidate = candidate_for(&merger, "repo", ServiceDefinition::of_class("UserRepo"));
  candidate
    .merged
    .set_target_type(TypeSpec::generic("UserRepo", vec![TypeSpec::raw("Admin")]));

  // Repo<User> accepts UserRepo<Admin>: raw and argument both compatible.
  assert!(resolver.is_eligible(&candidate, &repo_of("User")));
}

#[test]
fn incompatible_generic_parameters_are_rejected() {
  let resolver = GenericCandidateResolver::new(catalog());
  let merger = merger();
  let candidate = candidate_for(&merger, "repo", ServiceDefinition::of_class("UserRepo"));
  candidate
    .merged
    .set_target_type(TypeSpec::generic("UserRepo", vec![TypeSpec::raw("User")]));

  // Repo<Admin> rejects UserRepo<User>.
  assert!(!resolver.is_eligible(&candidate, &repo_of("Admin")));
}

#[test]
fn declared_class_is_the_last_resort_target_type() {
  let resolver = GenericCandidateResolver::new(catalog());
  let merger = merger();
  let candidate = candidate_for(&merger, "repo", ServiceDefinition::of_class("UserRepo"));

  // The declared class is raw UserRepo; it cannot strictly prove Repo<User>.
  assert!(!resolver.is_eligible(&candidate, &repo_of("User")));
  // The determination is cached on the merged definition either way.
  assert_eq!(candidate.merged.target_type(), Some(TypeSpec::raw("UserRepo")));
}

#[test]
fn unresolved_generics_pass_only_under_fallback() {
  let resolver = GenericCandidateResolver::new(catalog());
  let merger = merger();
  let candidate = candidate_for(&merger, "repo", ServiceDefinition::of_class("UserRepo"));

  assert!(!resolver.is_eligible(&candidate, &repo_of("User")));
  assert!(resolver.is_eligible(&candidate, &repo_of("User").with_fallback()));
}

#[test]
fn property_bags_pass_only_under_fallback() {
  let resolver = GenericCandidateResolver::new(catalog());
  let merger = merger();
  let candidate = candidate_for(&merger, "bag", ServiceDefinition::of_class("Bag"));

  assert!(!resolver.is_eligible(&candidate, &repo_of("User")));
  assert!(resolver.is_eligible(&candidate, &repo_of("User").with_fallback()));
}

#[test]
fn unknown_target_type_stays_optimistic() {
  let resolver = GenericCandidateResolver::new(catalog());
  let merger = merger();
  // The declared class is a factory indirection, which step (5) refuses to
  // use; with no other source the resolver stays optimistic.
  let candidate = candidate_for(&merger, "provider", ServiceDefinition::of_class("Provider"));
  assert!(resolver.is_eligible(&candidate, &repo_of("User")));
  assert!(candidate.merged.target_type().is_none());
}

// --- Factory-method return types ---

#[test]
fn factory_method_return_type_is_used_when_informative() {
  let resolver = GenericCandidateResolver::new(catalog());
  let merger = merger();
  let candidate = candidate_for(
    &merger,
    "made",
    ServiceDefinition::of_class("Widgets").with_factory_method("make_repo"),
  );

  // make_repo returns UserRepo<User>, which is assignable to Repo.
  assert!(resolver.is_eligible(&candidate, &repo_of("User")));
  assert!(!resolver.is_eligible(&candidate, &repo_of("Admin")));
}

#[test]
fn uninformative_return_type_falls_back_to_the_declared_class() {
  let resolver = GenericCandidateResolver::new(catalog());
  let merger = merger();
  let candidate = candidate_for(
    &merger,
    "made",
    ServiceDefinition::of_class("Widgets").with_factory_method("make_repo"),
  );

  // For a dependency on User the return type UserRepo is not raw-assignable
  // and is discarded; the declared class Widgets then fails the match.
  let descriptor =
    DependencyDescriptor::of(TypeSpec::generic("User", vec![TypeSpec::raw("User")]));
  assert!(!resolver.is_eligible(&candidate, &descriptor));
}

// --- Factory-indirection unwrapping ---

#[test]
fn producer_wrappers_are_unwrapped_one_layer() {
  let resolver = GenericCandidateResolver::new(catalog());
  let merger = merger();
  let candidate = candidate_for(&merger, "provided", ServiceDefinition::of_class("UserRepo"));
  candidate.merged.set_target_type(TypeSpec::generic(
    "Provider",
    vec![TypeSpec::generic("UserRepo", vec![TypeSpec::raw("User")])],
  ));

  // Repo<User> is not a Provider; the wrapped element type is compared.
  assert!(resolver.is_eligible(&candidate, &repo_of("User")));
  assert!(!resolver.is_eligible(&candidate, &repo_of("Admin")));
}

#[test]
fn factory_typed_dependencies_compare_against_the_wrapper_itself() {
  let resolver = GenericCandidateResolver::new(catalog());
  let merger = merger();
  let candidate = candidate_for(&merger, "provided", ServiceDefinition::of_class("UserRepo"));
  candidate.merged.set_target_type(TypeSpec::generic(
    "Provider",
    vec![TypeSpec::generic("UserRepo", vec![TypeSpec::raw("User")])],
  ));

  let provider_dep = DependencyDescriptor::of(TypeSpec::generic(
    "Provider",
    vec![TypeSpec::generic("Repo", vec![TypeSpec::raw("User")])],
  ));
  assert!(resolver.is_eligible(&candidate, &provider_dep));
}

// --- Decorated definitions ---

#[test]
fn decorated_definitions_contribute_their_resolved_type() {
  let resolver = GenericCandidateResolver::new(catalog());
  let merger = merger();

  let decorated = candidate_for(&merger, "inner", ServiceDefinition::of_class("UserRepo"));
  decorated
    .merged
    .set_target_type(TypeSpec::generic("UserRepo", vec![TypeSpec::raw("User")]));

  // The outer definition on its own says nothing useful: its class is a
  // factory indirection.
  let outer = candidate_for(&merger, "outer", ServiceDefinition::of_class("Provider"))
    .with_decorated(decorated);

  assert!(resolver.is_eligible(&outer, &repo_of("User")));
  assert!(!resolver.is_eligible(&outer, &repo_of("Admin")));
}

// --- Cloning and rebinding ---

#[test]
fn clones_drop_the_owner_but_keep_working() {
  let resolver = GenericCandidateResolver::new(catalog());
  let clone = resolver.clone_for_owner();

  let merger = merger();
  let candidate = candidate_for(&merger, "repo", ServiceDefinition::of_class("UserRepo"));
  candidate
    .merged
    .set_target_type(TypeSpec::generic("UserRepo", vec![TypeSpec::raw("User")]));

  assert!(clone.is_eligible(&candidate, &repo_of("User")));
  assert!(!clone.is_eligible(&candidate, &repo_of("Admin")));
}

#[test]
fn clones_are_rebindable_to_a_new_owner() {
  let catalog = catalog();
  let first = Assembly::new(catalog.clone());
  let second = Assembly::new(catalog);

  second
    .register("repo", ServiceDefinition::of_class("UserRepo"))
    .unwrap();

  // Hand the first assembly's resolver policy to the second container.
  second.adopt_resolver(first.clone_resolver());

  let eligible = second.find_candidates(&DependencyDescriptor::of(TypeSpec::raw("Repo")));
  assert_eq!(eligible, vec!["repo".to_string()]);
}
