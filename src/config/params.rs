//! Key→value parameter store.
//!
//! Keys are hierarchical (`Section/name`) and values are one of three scalar
//! kinds, mirroring what a parameter file can express. The store is consumed
//! through the [`ConfigStore`] trait so any front end (YAML, command line,
//! tests) can feed the pipeline.

use crate::halo_error::HaloError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A raw parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

/// Conversion from a [`ParamValue`] into a typed value.
pub trait FromParam: Sized {
    /// Human-readable type name used in error messages.
    const EXPECTED: &'static str;
    fn from_param(value: &ParamValue) -> Option<Self>;
}

impl FromParam for i64 {
    const EXPECTED: &'static str = "an integer";
    fn from_param(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromParam for usize {
    const EXPECTED: &'static str = "a non-negative integer";
    fn from_param(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Int(v) => usize::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl FromParam for u32 {
    const EXPECTED: &'static str = "a non-negative integer";
    fn from_param(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Int(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }
}

// Integers are accepted wherever a float is expected (`host_overdensity: 200`).
impl FromParam for f64 {
    const EXPECTED: &'static str = "a number";
    fn from_param(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Str(_) => None,
        }
    }
}

/// Flags are stored as integers; any non-zero value is `true`.
impl FromParam for bool {
    const EXPECTED: &'static str = "an integer flag";
    fn from_param(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }
}

impl FromParam for String {
    const EXPECTED: &'static str = "a string";
    fn from_param(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// Read access to a hierarchical parameter store.
pub trait ConfigStore {
    /// Raw lookup.
    fn get_value(&self, key: &str) -> Option<&ParamValue>;

    /// Typed lookup falling back to `default` when the key is absent.
    fn get<T: FromParam>(&self, key: &str, default: T) -> Result<T, HaloError> {
        match self.get_value(key) {
            None => Ok(default),
            Some(v) => T::from_param(v).ok_or_else(|| HaloError::ParameterType {
                key: key.to_owned(),
                expected: T::EXPECTED,
            }),
        }
    }

    /// Typed lookup of a key that must be present.
    fn get_required<T: FromParam>(&self, key: &str) -> Result<T, HaloError> {
        let v = self
            .get_value(key)
            .ok_or_else(|| HaloError::MissingParameter(key.to_owned()))?;
        T::from_param(v).ok_or_else(|| HaloError::ParameterType {
            key: key.to_owned(),
            expected: T::EXPECTED,
        })
    }
}

/// In-memory parameter store with deterministic (sorted) key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamMap {
    params: BTreeMap<String, ParamValue>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a parameter.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Builder-style [`ParamMap::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl ConfigStore for ParamMap {
    fn get_value(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for ParamMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = ParamMap::new();
        for (k, v) in iter {
            map.set(k, v);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_types() {
        let p = ParamMap::new()
            .with("Halos/part_threshold", 32)
            .with("Halos/host_overdensity", 200)
            .with("Simulation/run_name", "L100");
        assert_eq!(p.get("Halos/part_threshold", 20usize), Ok(32));
        assert_eq!(p.get("Halos/min_part_threshold", 10usize), Ok(10));
        assert_eq!(p.get("Halos/host_overdensity", 0.0f64), Ok(200.0));
        assert_eq!(
            p.get("Simulation/run_name", String::new()),
            Ok("L100".to_string())
        );
    }

    #[test]
    fn wrong_type_is_an_error() {
        let p = ParamMap::new().with("SpatialSearch/llcoeff", "short");
        assert!(matches!(
            p.get("SpatialSearch/llcoeff", 0.2f64),
            Err(HaloError::ParameterType { .. })
        ));
        let p = ParamMap::new().with("Halos/part_threshold", -4);
        assert!(p.get("Halos/part_threshold", 20usize).is_err());
    }

    #[test]
    fn required_key_missing() {
        let p = ParamMap::new();
        assert_eq!(
            p.get_required::<f64>("Gravity/comoving_DM_softening"),
            Err(HaloError::MissingParameter(
                "Gravity/comoving_DM_softening".into()
            ))
        );
    }
}
