//! Generator configuration: raw properties and their validated form.
//!
//! Configuration enters as untyped string properties (the same key/value
//! surface a deployment descriptor or environment loader would produce) and
//! is normalized into an immutable [`GeneratorConfig`] before the first
//! registry interaction. Every validation rule fails independently with an
//! [`Error::InvalidConfiguration`] naming the offending property.

use crate::{Error, Result};
use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

/// Property key for the coordination backend endpoint list.
pub const PROP_SERVER_LIST: &str = "serverList";
/// Property key for the first value handed out for a fresh leaf key.
pub const PROP_INITIAL_VALUE: &str = "initialValue";
/// Property key for the segment size leased per refill.
pub const PROP_STEP: &str = "step";
/// Property key for the `username:password` backend credential.
pub const PROP_DIGEST: &str = "digest";
/// Property key naming the ID sequence to dispense from.
pub const PROP_LEAF_KEY: &str = "leafKey";
/// Property key selecting the coordination backend implementation.
pub const PROP_REGISTRY_CENTER_TYPE: &str = "registryCenterType";

const DEFAULT_STEP: i64 = 1;
const DEFAULT_INITIAL_VALUE: i64 = 0;

/// Untyped string properties configuring a [`LeafSegmentGenerator`].
///
/// Unknown keys are retained but ignored by validation, so a larger
/// deployment descriptor can be passed through unfiltered.
///
/// # Example
///
/// ```
/// use segkey::{GeneratorProperties, PROP_LEAF_KEY, PROP_SERVER_LIST};
///
/// let mut props = GeneratorProperties::new();
/// props.set(PROP_SERVER_LIST, "127.0.0.1:2181");
/// props.set(PROP_LEAF_KEY, "order_id");
/// assert_eq!(props.get(PROP_SERVER_LIST), Some("127.0.0.1:2181"));
/// ```
///
/// [`LeafSegmentGenerator`]: crate::LeafSegmentGenerator
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GeneratorProperties {
    entries: BTreeMap<String, String>,
}

impl GeneratorProperties {
    /// Creates an empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property, replacing any previous value for the key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Returns the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Removes a property, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Returns `true` if no properties have been set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of properties set.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn get_trimmed(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for GeneratorProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Self::new();
        props.extend(iter);
        props
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for GeneratorProperties {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.set(key, value);
        }
    }
}

/// Identifier of a recognized coordination backend implementation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RegistryCenterType {
    /// A ZooKeeper ensemble (the conventional deployment target).
    #[default]
    Zookeeper,
    /// The embedded in-process backend shipped with this crate.
    Memory,
}

impl FromStr for RegistryCenterType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "zookeeper" => Ok(Self::Zookeeper),
            "memory" => Ok(Self::Memory),
            other => Err(Error::InvalidConfiguration {
                reason: format!("unrecognized registry center type '{other}'"),
            }),
        }
    }
}

impl fmt::Display for RegistryCenterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zookeeper => f.write_str("zookeeper"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

/// Validated, immutable generator configuration.
///
/// Produced by [`GeneratorConfig::from_properties`]; construction is the only
/// validation point, so holding a value of this type implies every bound in
/// the property table has been checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratorConfig {
    server_list: String,
    initial_value: i64,
    step: i64,
    digest: Option<String>,
    leaf_key: String,
    center_type: RegistryCenterType,
}

impl GeneratorConfig {
    /// Validates raw properties into a [`GeneratorConfig`].
    ///
    /// Defaults applied for absent keys: `step = 1`, `initialValue = 0`,
    /// `registryCenterType = zookeeper`, `digest` empty (anonymous).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if any rule is violated:
    /// - `serverList` missing or empty
    /// - `step` not an integer in `(0, i64::MAX)`
    /// - `initialValue` not an integer in `[0, i64::MAX)`
    /// - `leafKey` missing, empty, or starting with `/`
    /// - `registryCenterType` unrecognized
    /// - `digest` non-empty but not of `username:password` shape
    pub fn from_properties(props: &GeneratorProperties) -> Result<Self> {
        let server_list = props
            .get_trimmed(PROP_SERVER_LIST)
            .ok_or_else(|| invalid(PROP_SERVER_LIST, "must be a non-empty endpoint list"))?
            .to_owned();

        let step = match props.get_trimmed(PROP_STEP) {
            None => DEFAULT_STEP,
            Some(raw) => parse_i64(PROP_STEP, raw)?,
        };
        if step <= 0 || step == i64::MAX {
            return Err(invalid(PROP_STEP, "must be in (0, i64::MAX)"));
        }

        let initial_value = match props.get_trimmed(PROP_INITIAL_VALUE) {
            None => DEFAULT_INITIAL_VALUE,
            Some(raw) => parse_i64(PROP_INITIAL_VALUE, raw)?,
        };
        if initial_value < 0 || initial_value == i64::MAX {
            return Err(invalid(PROP_INITIAL_VALUE, "must be in [0, i64::MAX)"));
        }

        let leaf_key = props
            .get_trimmed(PROP_LEAF_KEY)
            .ok_or_else(|| invalid(PROP_LEAF_KEY, "must be a non-empty key name"))?;
        if leaf_key.starts_with('/') {
            return Err(invalid(PROP_LEAF_KEY, "must not start with '/'"));
        }
        let leaf_key = leaf_key.to_owned();

        let center_type = match props.get_trimmed(PROP_REGISTRY_CENTER_TYPE) {
            None => RegistryCenterType::default(),
            Some(raw) => raw.parse()?,
        };

        let digest = match props.get_trimmed(PROP_DIGEST) {
            None => None,
            Some(raw) => {
                if !raw.contains(':') || raw.starts_with(':') {
                    return Err(invalid(PROP_DIGEST, "must be of the form username:password"));
                }
                Some(raw.to_owned())
            }
        };

        Ok(Self {
            server_list,
            initial_value,
            step,
            digest,
            leaf_key,
            center_type,
        })
    }

    /// Endpoint list of the coordination backend.
    pub fn server_list(&self) -> &str {
        &self.server_list
    }

    /// First value dispensed for a previously-unseen leaf key.
    pub fn initial_value(&self) -> i64 {
        self.initial_value
    }

    /// Segment size leased from the registry per refill.
    pub fn step(&self) -> i64 {
        self.step
    }

    /// Backend credential, or `None` for anonymous access.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Name of the ID sequence this generator dispenses from.
    pub fn leaf_key(&self) -> &str {
        &self.leaf_key
    }

    /// Selected coordination backend implementation.
    pub fn center_type(&self) -> RegistryCenterType {
        self.center_type
    }
}

fn invalid(key: &str, requirement: &str) -> Error {
    Error::InvalidConfiguration {
        reason: format!("property '{key}' {requirement}"),
    }
}

fn parse_i64(key: &str, raw: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| invalid(key, &format!("is not a valid integer: '{raw}'")))
}
