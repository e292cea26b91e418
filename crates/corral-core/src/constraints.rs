//! Machine constraints
//!
//! A constraints [`Value`] is a partial description of the compute shape a
//! machine should have. Values are written as whitespace separated
//! `key=value` words, e.g. `mem=4G cpu-cores=4`.
//!
//! Providers describe which attributes they understand with a
//! [`Validator`], which is also responsible for merging the
//! environment-level constraints with the bootstrap constraints.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const ARCH: &str = "arch";
pub const CONTAINER: &str = "container";
pub const CPU_CORES: &str = "cpu-cores";
pub const CPU_POWER: &str = "cpu-power";
pub const INSTANCE_TYPE: &str = "instance-type";
pub const MEM: &str = "mem";
pub const ROOT_DISK: &str = "root-disk";
pub const TAGS: &str = "tags";

/// All attribute names, in display order
pub const ATTRIBUTES: &[&str] = &[
    ARCH,
    CONTAINER,
    CPU_CORES,
    CPU_POWER,
    INSTANCE_TYPE,
    MEM,
    ROOT_DISK,
    TAGS,
];

/// A set of machine constraints. Sizes are in MiB.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Value {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_power: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_disk: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl Value {
    pub fn is_empty(&self) -> bool {
        self.attributes().is_empty()
    }

    /// Names of the attributes that are set
    pub fn attributes(&self) -> Vec<&'static str> {
        ATTRIBUTES
            .iter()
            .copied()
            .filter(|attr| self.has(attr))
            .collect()
    }

    pub fn has(&self, attr: &str) -> bool {
        match attr {
            ARCH => self.arch.is_some(),
            CONTAINER => self.container.is_some(),
            CPU_CORES => self.cpu_cores.is_some(),
            CPU_POWER => self.cpu_power.is_some(),
            INSTANCE_TYPE => self.instance_type.is_some(),
            MEM => self.mem.is_some(),
            ROOT_DISK => self.root_disk.is_some(),
            TAGS => self.tags.is_some(),
            _ => false,
        }
    }

    /// The attribute rendered as it would be written, if set
    fn attribute_string(&self, attr: &str) -> Option<String> {
        match attr {
            ARCH => self.arch.clone(),
            CONTAINER => self.container.clone(),
            CPU_CORES => self.cpu_cores.map(|v| v.to_string()),
            CPU_POWER => self.cpu_power.map(|v| v.to_string()),
            INSTANCE_TYPE => self.instance_type.clone(),
            MEM => self.mem.map(format_size),
            ROOT_DISK => self.root_disk.map(format_size),
            TAGS => self.tags.as_ref().map(|t| t.join(",")),
            _ => None,
        }
    }

    /// A copy of `self` with every attribute set in `other` replaced.
    pub fn override_with(&self, other: &Value) -> Value {
        Value {
            arch: other.arch.clone().or_else(|| self.arch.clone()),
            container: other.container.clone().or_else(|| self.container.clone()),
            cpu_cores: other.cpu_cores.or(self.cpu_cores),
            cpu_power: other.cpu_power.or(self.cpu_power),
            instance_type: other
                .instance_type
                .clone()
                .or_else(|| self.instance_type.clone()),
            mem: other.mem.or(self.mem),
            root_disk: other.root_disk.or(self.root_disk),
            tags: other.tags.clone().or_else(|| self.tags.clone()),
        }
    }

    fn set(&mut self, attr: &str, raw: &str) -> Result<()> {
        let bad = |reason: &str| CoreError::BadConstraintValue {
            attr: attr.to_string(),
            reason: reason.to_string(),
        };
        if self.has(attr) {
            return Err(bad("already set"));
        }
        match attr {
            ARCH => self.arch = Some(raw.to_string()),
            CONTAINER => self.container = Some(raw.to_string()),
            CPU_CORES => {
                self.cpu_cores = Some(raw.parse().map_err(|_| bad("must be a non-negative integer"))?)
            }
            CPU_POWER => {
                self.cpu_power = Some(raw.parse().map_err(|_| bad("must be a non-negative integer"))?)
            }
            INSTANCE_TYPE => self.instance_type = Some(raw.to_string()),
            MEM => self.mem = Some(parse_size(raw).ok_or_else(|| bad("must be a non-negative float with optional M/G/T/P suffix"))?),
            ROOT_DISK => {
                self.root_disk = Some(parse_size(raw).ok_or_else(|| bad("must be a non-negative float with optional M/G/T/P suffix"))?)
            }
            TAGS => {
                self.tags = Some(
                    raw.split(',')
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect(),
                )
            }
            other => return Err(CoreError::UnknownConstraint(other.to_string())),
        }
        Ok(())
    }
}

/// Parse a size such as `512M`, `4G` or `1.5T` into MiB.
fn parse_size(raw: &str) -> Option<u64> {
    let (digits, multiplier) = match raw.chars().last()? {
        'M' | 'm' => (&raw[..raw.len() - 1], 1.0),
        'G' | 'g' => (&raw[..raw.len() - 1], 1024.0),
        'T' | 't' => (&raw[..raw.len() - 1], 1024.0 * 1024.0),
        'P' | 'p' => (&raw[..raw.len() - 1], 1024.0 * 1024.0 * 1024.0),
        _ => (raw, 1.0),
    };
    let value: f64 = digits.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).ceil() as u64)
}

fn format_size(mib: u64) -> String {
    if mib != 0 && mib % (1024 * 1024) == 0 {
        format!("{}T", mib / (1024 * 1024))
    } else if mib != 0 && mib % 1024 == 0 {
        format!("{}G", mib / 1024)
    } else {
        format!("{}M", mib)
    }
}

impl FromStr for Value {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let mut value = Value::default();
        for word in s.split_whitespace() {
            let (attr, raw) = word
                .split_once('=')
                .ok_or_else(|| CoreError::MalformedConstraint(word.to_string()))?;
            if !ATTRIBUTES.contains(&attr) {
                return Err(CoreError::UnknownConstraint(attr.to_string()));
            }
            if raw.is_empty() {
                continue;
            }
            value.set(attr, raw)?;
        }
        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words: Vec<String> = ATTRIBUTES
            .iter()
            .filter_map(|attr| self.attribute_string(attr).map(|v| format!("{}={}", attr, v)))
            .collect();
        write!(f, "{}", words.join(" "))
    }
}

/// Provider-specific rules for constraint values
#[derive(Debug, Clone, Default)]
pub struct Validator {
    conflicts: Vec<(Vec<&'static str>, Vec<&'static str>)>,
    unsupported: Vec<&'static str>,
    vocabularies: BTreeMap<&'static str, Vec<String>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that no attribute in `reds` may be combined with any in `blues`.
    pub fn register_conflicts(&mut self, reds: &[&'static str], blues: &[&'static str]) {
        self.conflicts.push((reds.to_vec(), blues.to_vec()));
    }

    /// Declare attributes the provider ignores.
    pub fn register_unsupported(&mut self, attrs: &[&'static str]) {
        self.unsupported.extend_from_slice(attrs);
    }

    /// Restrict an attribute to a fixed set of values.
    pub fn register_vocabulary<I, S>(&mut self, attr: &'static str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vocabularies
            .insert(attr, values.into_iter().map(Into::into).collect());
    }

    /// Check `cons` against the provider's rules.
    ///
    /// Returns the names of set attributes that the provider does not
    /// support; those are ignored rather than rejected.
    pub fn validate(&self, cons: &Value) -> Result<Vec<String>> {
        self.check_conflicts(cons, cons)?;
        for (attr, valid) in &self.vocabularies {
            if let Some(value) = cons.attribute_string(attr) {
                if !valid.iter().any(|v| *v == value) {
                    return Err(CoreError::InvalidConstraintValue {
                        attr: attr.to_string(),
                        value,
                        valid: valid.clone(),
                    });
                }
            }
        }
        Ok(self
            .unsupported
            .iter()
            .filter(|attr| cons.has(attr))
            .map(|attr| attr.to_string())
            .collect())
    }

    /// Merge environment constraints with bootstrap constraints.
    ///
    /// Attributes set on both sides take the bootstrap value. An attribute
    /// on one side that conflicts with a different attribute on the other
    /// side makes the result ambiguous.
    pub fn merge(&self, env: &Value, bootstrap: &Value) -> Result<Value> {
        self.validate(env)?;
        self.validate(bootstrap)?;
        self.check_conflicts(env, bootstrap)?;
        self.check_conflicts(bootstrap, env)?;
        Ok(env.override_with(bootstrap))
    }

    fn check_conflicts(&self, a: &Value, b: &Value) -> Result<()> {
        for (reds, blues) in &self.conflicts {
            for red in reds {
                for blue in blues {
                    if (a.has(red) && b.has(blue)) || (a.has(blue) && b.has(red)) {
                        return Err(CoreError::AmbiguousConstraints(
                            red.to_string(),
                            blue.to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
