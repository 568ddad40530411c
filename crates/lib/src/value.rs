//! The value model for resource configuration and outputs.
//!
//! [`Value`] is what declarations and providers work with in memory. It can
//! hold secrets in plain form, so it is deliberately not serializable.
//! [`StoredValue`] is the persisted form, where every secret has been sealed
//! by a [`StateCipher`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::secret::{Secret, SecretError, StateCipher};

/// Resource configuration keyed by field name.
pub type Config = BTreeMap<String, Value>;

/// Resource outputs keyed by output name.
pub type Outputs = BTreeMap<String, Value>;

/// A reference to an output of another resource declared in the same scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputRef {
  pub resource: String,
  pub output: String,
}

impl OutputRef {
  pub fn new(resource: impl Into<String>, output: impl Into<String>) -> Self {
    Self {
      resource: resource.into(),
      output: output.into(),
    }
  }
}

impl fmt::Display for OutputRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.resource, self.output)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  String(String),
  Integer(i64),
  Bool(bool),
  Secret(Secret),
  Ref(OutputRef),
  List(Vec<Value>),
  Map(BTreeMap<String, Value>),
}

impl Value {
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_integer(&self) -> Option<i64> {
    match self {
      Value::Integer(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_secret(&self) -> Option<&Secret> {
    match self {
      Value::Secret(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
    match self {
      Value::Map(m) => Some(m),
      _ => None,
    }
  }

  /// Collect every output reference in this value, depth first.
  pub fn refs(&self) -> Vec<&OutputRef> {
    let mut found = Vec::new();
    self.collect_refs(&mut found);
    found
  }

  fn collect_refs<'a>(&'a self, found: &mut Vec<&'a OutputRef>) {
    match self {
      Value::Ref(r) => found.push(r),
      Value::List(items) => items.iter().for_each(|v| v.collect_refs(found)),
      Value::Map(map) => map.values().for_each(|v| v.collect_refs(found)),
      Value::String(_) | Value::Integer(_) | Value::Bool(_) | Value::Secret(_) => {}
    }
  }

  /// Replace every reference with the value `lookup` returns for it.
  pub fn resolve<E>(&self, lookup: &impl Fn(&OutputRef) -> Result<Value, E>) -> Result<Value, E> {
    Ok(match self {
      Value::Ref(r) => lookup(r)?,
      Value::List(items) => Value::List(items.iter().map(|v| v.resolve(lookup)).collect::<Result<_, _>>()?),
      Value::Map(map) => Value::Map(
        map
          .iter()
          .map(|(k, v)| Ok((k.clone(), v.resolve(lookup)?)))
          .collect::<Result<_, E>>()?,
      ),
      other => other.clone(),
    })
  }

  /// Convert to the persisted form, sealing secrets.
  pub fn seal(&self, cipher: &StateCipher) -> Result<StoredValue, SecretError> {
    Ok(match self {
      Value::String(s) => StoredValue::String(s.clone()),
      Value::Integer(n) => StoredValue::Integer(*n),
      Value::Bool(b) => StoredValue::Bool(*b),
      Value::Secret(s) => StoredValue::Secret {
        ciphertext: cipher.encrypt(s)?,
      },
      Value::Ref(r) => StoredValue::Ref(r.clone()),
      Value::List(items) => StoredValue::List(items.iter().map(|v| v.seal(cipher)).collect::<Result<_, _>>()?),
      Value::Map(map) => StoredValue::Map(seal_map(map, cipher)?),
    })
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::String(s) => write!(f, "{:?}", s),
      Value::Integer(n) => write!(f, "{}", n),
      Value::Bool(b) => write!(f, "{}", b),
      Value::Secret(s) => write!(f, "{}", s),
      Value::Ref(r) => write!(f, "${{{}}}", r),
      Value::List(items) => {
        f.write_str("[")?;
        for (i, item) in items.iter().enumerate() {
          if i > 0 {
            f.write_str(", ")?;
          }
          write!(f, "{}", item)?;
        }
        f.write_str("]")
      }
      Value::Map(map) => {
        f.write_str("{")?;
        for (i, (k, v)) in map.iter().enumerate() {
          if i > 0 {
            f.write_str(", ")?;
          }
          write!(f, "{}: {}", k, v)?;
        }
        f.write_str("}")
      }
    }
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::String(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::String(s)
  }
}

impl From<i64> for Value {
  fn from(n: i64) -> Self {
    Value::Integer(n)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Bool(b)
  }
}

impl From<Secret> for Value {
  fn from(s: Secret) -> Self {
    Value::Secret(s)
  }
}

impl From<OutputRef> for Value {
  fn from(r: OutputRef) -> Self {
    Value::Ref(r)
  }
}

/// Persisted form of a [`Value`]. Secrets only appear sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredValue {
  String(String),
  Integer(i64),
  Bool(bool),
  Secret { ciphertext: String },
  Ref(OutputRef),
  List(Vec<StoredValue>),
  Map(BTreeMap<String, StoredValue>),
}

impl StoredValue {
  /// Convert back to a [`Value`], decrypting sealed secrets.
  pub fn unseal(&self, cipher: &StateCipher) -> Result<Value, SecretError> {
    Ok(match self {
      StoredValue::String(s) => Value::String(s.clone()),
      StoredValue::Integer(n) => Value::Integer(*n),
      StoredValue::Bool(b) => Value::Bool(*b),
      StoredValue::Secret { ciphertext } => Value::Secret(cipher.decrypt(ciphertext)?),
      StoredValue::Ref(r) => Value::Ref(r.clone()),
      StoredValue::List(items) => Value::List(items.iter().map(|v| v.unseal(cipher)).collect::<Result<_, _>>()?),
      StoredValue::Map(map) => Value::Map(unseal_map(map, cipher)?),
    })
  }
}

pub fn seal_map(map: &BTreeMap<String, Value>, cipher: &StateCipher) -> Result<BTreeMap<String, StoredValue>, SecretError> {
  map.iter().map(|(k, v)| Ok((k.clone(), v.seal(cipher)?))).collect()
}

pub fn unseal_map(
  map: &BTreeMap<String, StoredValue>,
  cipher: &StateCipher,
) -> Result<BTreeMap<String, Value>, SecretError> {
  map.iter().map(|(k, v)| Ok((k.clone(), v.unseal(cipher)?))).collect()
}
