//! Classifying declarations against prior state.
//!
//! Each declaration is compared with the resource of the same logical name
//! in the last persisted document:
//!
//! - absent before → create
//! - present with an equal resolved config → unchanged, no provider call
//! - present with a different config → update
//!
//! Names present before but not declared in this run are orphans.

use std::collections::{BTreeMap, BTreeSet};

use crate::value::{Config, Outputs};

use super::types::Change;

/// A resource from the prior document, secrets decrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorResource {
  pub kind: String,
  pub config: Config,
  pub outputs: Outputs,
  pub depends_on: Vec<String>,
}

/// Result of planning one declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
  Apply(Change),
  /// Same logical name, different kind.
  KindChanged { previous: String },
}

pub fn plan_declaration(prior: Option<&PriorResource>, kind: &str, desired: &Config) -> Plan {
  match prior {
    None => Plan::Apply(Change::Create),
    Some(prior) if prior.kind != kind => Plan::KindChanged {
      previous: prior.kind.clone(),
    },
    Some(prior) if prior.config == *desired => Plan::Apply(Change::Unchanged),
    Some(_) => Plan::Apply(Change::Update),
  }
}

/// Prior names that were not declared in this run, in name order.
pub fn orphans(prior: &BTreeMap<String, PriorResource>, declared: &BTreeSet<String>) -> Vec<String> {
  prior
    .keys()
    .filter(|name| !declared.contains(*name))
    .cloned()
    .collect()
}
