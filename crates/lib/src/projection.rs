//! Narrowed, read-only views of resource outputs.
//!
//! A deployed unit only ever sees the plain-string entries of its runtime
//! record. Secrets, structured values and scalars of other kinds are dropped
//! here, at runtime, by value kind.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::value::{Outputs, Value};

/// Plain-string environment handed to a deployed unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Env(BTreeMap<String, String>);

impl Env {
  pub fn get(&self, key: &str) -> Option<&str> {
    self.0.get(key).map(String::as_str)
  }

  pub fn contains_key(&self, key: &str) -> bool {
    self.0.contains_key(key)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.0.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// Keep only the entries of `record` whose value is a plain string.
pub fn project(record: &Outputs) -> Env {
  Env(
    record
      .iter()
      .filter_map(|(key, value)| match value {
        Value::String(s) => Some((key.clone(), s.clone())),
        _ => None,
      })
      .collect(),
  )
}
