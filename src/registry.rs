//! The name-keyed definition store: aliases, override policy and name
//! generation.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::definition::ServiceDefinition;
use crate::error::{Error, Result};

/// Separator between a generated base name and its disambiguating suffix.
pub const GENERATED_NAME_SEPARATOR: char = '#';
/// Base-name suffix for anonymous children of a named parent definition.
pub const CHILD_SUFFIX: &str = "$child";
/// Base-name suffix for anonymous definitions produced by a named factory.
pub const CREATED_SUFFIX: &str = "$created";

/// Concurrent name → definition store with alias support.
///
/// Reads never block each other; writes serialize per entry. A name is never
/// simultaneously a primary name and an alias.
pub struct DefinitionRegistry {
  definitions: DashMap<String, Arc<ServiceDefinition>>,
  /// Registration order, for deterministic enumeration and reverse-order
  /// teardown.
  order: RwLock<Vec<String>>,
  /// alias → canonical name.
  aliases: DashMap<String, String>,
  allow_overriding: bool,
}

impl DefinitionRegistry {
  pub fn new() -> Self {
    Self::with_override_policy(true)
  }

  /// `allow_overriding: false` turns re-registration of a bound name into a
  /// [`Error::RegistrationConflict`].
  pub fn with_override_policy(allow_overriding: bool) -> Self {
    Self {
      definitions: DashMap::new(),
      order: RwLock::new(Vec::new()),
      aliases: DashMap::new(),
      allow_overriding,
    }
  }

  pub fn allows_overriding(&self) -> bool {
    self.allow_overriding
  }

  /// Stores or replaces the definition under `name`.
  pub fn register(&self, name: &str, definition: ServiceDefinition) -> Result<()> {
    if self.aliases.contains_key(name) {
      return Err(Error::configuration(
        name,
        "name is already registered as an alias",
      ));
    }
    let incoming = Arc::new(definition);
    if let Some(existing) = self.get(name) {
      if !self.allow_overriding {
        return Err(Error::RegistrationConflict {
          name: name.to_string(),
          existing,
          incoming,
        });
      }
      warn!(name, "overriding existing definition");
      self.definitions.insert(name.to_string(), incoming);
    } else {
      self.definitions.insert(name.to_string(), incoming);
      self.order.write().push(name.to_string());
      debug!(name, "registered definition");
    }
    Ok(())
  }

  /// Removes and returns the definition under `name`.
  pub fn remove(&self, name: &str) -> Result<Arc<ServiceDefinition>> {
    match self.definitions.remove(name) {
      Some((_, definition)) => {
        self.order.write().retain(|n| n != name);
        debug!(name, "removed definition");
        Ok(definition)
      }
      None => Err(Error::NoSuchDefinition {
        name: name.to_string(),
      }),
    }
  }

  pub fn get(&self, name: &str) -> Option<Arc<ServiceDefinition>> {
    self.definitions.get(name).map(|d| d.value().clone())
  }

  pub fn contains(&self, name: &str) -> bool {
    self.definitions.contains_key(name)
  }

  pub fn count(&self) -> usize {
    self.definitions.len()
  }

  /// All primary names, in registration order.
  pub fn names(&self) -> Vec<String> {
    self.order.read().clone()
  }

  /// Whether `name` is in use as a primary name or as an alias.
  pub fn is_name_in_use(&self, name: &str) -> bool {
    self.contains(name) || self.aliases.contains_key(name)
  }

  /// Binds `alias` to `name`. An alias may not shadow a primary name, and
  /// rebinding an alias to a different target requires the override policy
  /// to allow it.
  pub fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
    if alias == name {
      self.aliases.remove(alias);
      return Ok(());
    }
    if self.contains(alias) {
      return Err(Error::configuration(
        alias,
        format!("cannot alias '{alias}' over an existing primary name"),
      ));
    }
    if let Some(existing) = self.aliases.get(alias).map(|t| t.value().clone()) {
      if existing == name {
        return Ok(());
      }
      if !self.allow_overriding {
        return Err(Error::configuration(
          alias,
          format!("alias is already bound to '{existing}' and overriding is not allowed"),
        ));
      }
    }
    // Reject a chain that would lead back to the alias itself.
    if self.canonical_name(name) == alias {
      return Err(Error::configuration(
        alias,
        "alias would form a cycle with its target",
      ));
    }
    self.aliases.insert(alias.to_string(), name.to_string());
    Ok(())
  }

  pub fn remove_alias(&self, alias: &str) -> bool {
    self.aliases.remove(alias).is_some()
  }

  /// All aliases currently bound (directly) to `name`.
  pub fn aliases_of(&self, name: &str) -> Vec<String> {
    self
      .aliases
      .iter()
      .filter(|entry| entry.value() == name)
      .map(|entry| entry.key().clone())
      .collect()
  }

  /// Follows the alias chain to the primary name.
  pub fn canonical_name(&self, name: &str) -> String {
    let mut current = name.to_string();
    loop {
      match self.aliases.get(&current) {
        Some(target) => {
          let target = target.value().clone();
          if target == name {
            // Defensive stop on a cycle that slipped in.
            return current;
          }
          current = target;
        }
        None => return current,
      }
    }
  }

  /// Derives a unique name for an anonymous definition.
  ///
  /// The base name comes from the class name, else `<parent>$child`, else
  /// `<factory>$created`. Top-level definitions take the bare base when it
  /// is free and a `#0`, `#1`, ... counter suffix otherwise; nested
  /// definitions take the definition's identity token as suffix, since only
  /// local uniqueness matters for them.
  pub fn generate_name(&self, definition: &ServiceDefinition, nested: bool) -> Result<String> {
    let base = definition
      .class_name
      .clone()
      .or_else(|| {
        definition
          .parent_name
          .as_ref()
          .map(|p| format!("{p}{CHILD_SUFFIX}"))
      })
      .or_else(|| {
        definition
          .factory_service
          .as_ref()
          .map(|f| format!("{f}{CREATED_SUFFIX}"))
      })
      .ok_or_else(|| {
        Error::configuration(
          "<anonymous>",
          "definition has neither class, parent nor factory reference to derive a name from",
        )
      })?;

    if nested {
      return Ok(format!(
        "{base}{GENERATED_NAME_SEPARATOR}{:x}",
        definition.token()
      ));
    }

    if !self.is_name_in_use(&base) {
      return Ok(base);
    }
    let mut counter = 0usize;
    loop {
      let candidate = format!("{base}{GENERATED_NAME_SEPARATOR}{counter}");
      if !self.is_name_in_use(&candidate) {
        return Ok(candidate);
      }
      counter += 1;
    }
  }
}

impl Default for DefinitionRegistry {
  fn default() -> Self {
    Self::new()
  }
}
