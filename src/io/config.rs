//! Quality control configuration.
//!
//! The textual format is owned by whoever loads it; this module only holds the parsed
//! `(section, key) -> value` table and answers typed lookups, with the same leniency as an
//! INI reader (integers 0/1 read as booleans, integers read as floats).

use crate::core::rule_table;
use crate::types::{ProductVariant, QcError, QcResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single configured value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Float(value)
    }
}

/// Read-only rule configuration, one section per product variant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QcConfiguration {
    sections: BTreeMap<String, BTreeMap<String, ConfigValue>>,
}

impl QcConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration accepting every pixel: all enumerated and flag keys `true`, angle bounds
    /// at the physical domain of each angle
    pub fn permissive() -> Self {
        let mut config = Self::new();
        for variant in ProductVariant::ALL {
            for layout in rule_table::layouts(variant) {
                match layout.kind.angle_domain() {
                    Some((min, max)) => {
                        let id = layout.kind.id();
                        config.set(variant.section(), &format!("{}_min", id), min);
                        config.set(variant.section(), &format!("{}_max", id), max);
                    }
                    None => {
                        for key in layout.keys() {
                            config.set(variant.section(), &key, true);
                        }
                    }
                }
            }
        }
        config
    }

    /// Insert or replace a value
    pub fn set<V: Into<ConfigValue>>(&mut self, section: &str, key: &str, value: V) -> &mut Self {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
        self
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    /// Keys of a section in sorted order
    pub fn keys(&self, section: &str) -> Vec<&str> {
        self.sections
            .get(section)
            .map(|values| values.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, section: &str, key: &str) -> QcResult<ConfigValue> {
        let values = self.sections.get(section).ok_or_else(|| {
            QcError::Configuration(format!("Missing section [{}]", section))
        })?;
        values.get(key).copied().ok_or_else(|| {
            QcError::Configuration(format!("Missing key '{}' in section [{}]", key, section))
        })
    }

    pub fn get_bool(&self, section: &str, key: &str) -> QcResult<bool> {
        match self.get(section, key)? {
            ConfigValue::Bool(value) => Ok(value),
            ConfigValue::Int(0) => Ok(false),
            ConfigValue::Int(1) => Ok(true),
            other => Err(QcError::Configuration(format!(
                "[{}] {} = {:?} is not a boolean",
                section, key, other
            ))),
        }
    }

    pub fn get_int(&self, section: &str, key: &str) -> QcResult<i64> {
        match self.get(section, key)? {
            ConfigValue::Int(value) => Ok(value),
            other => Err(QcError::Configuration(format!(
                "[{}] {} = {:?} is not an integer",
                section, key, other
            ))),
        }
    }

    pub fn get_float(&self, section: &str, key: &str) -> QcResult<f64> {
        match self.get(section, key)? {
            ConfigValue::Float(value) => Ok(value),
            ConfigValue::Int(value) => Ok(value as f64),
            other => Err(QcError::Configuration(format!(
                "[{}] {} = {:?} is not a number",
                section, key, other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_lookups() {
        let mut config = QcConfiguration::new();
        config
            .set("MXD09Q1", "sf_cloud_state_00", true)
            .set("MXD09Q1", "sf_salt_pan_1", 0i64)
            .set("MXD09A1", "sza_max", 80i64)
            .set("MXD09A1", "sza_min", 0.5);

        assert!(config.get_bool("MXD09Q1", "sf_cloud_state_00").unwrap());
        assert!(!config.get_bool("MXD09Q1", "sf_salt_pan_1").unwrap());
        assert_eq!(config.get_int("MXD09A1", "sza_max").unwrap(), 80);
        assert_eq!(config.get_float("MXD09A1", "sza_max").unwrap(), 80.0);
        assert_eq!(config.get_float("MXD09A1", "sza_min").unwrap(), 0.5);
        assert!(config.get_int("MXD09A1", "sza_min").is_err());
        assert!(config.get_bool("MXD09A1", "sza_min").is_err());
    }

    #[test]
    fn test_missing_keys_are_configuration_errors() {
        let config = QcConfiguration::new();
        assert!(matches!(
            config.get_bool("MXD09GA", "rbq_atcorr_0"),
            Err(QcError::Configuration(_))
        ));
        let config = QcConfiguration::permissive();
        assert!(config.get_bool("MXD09GA", "rbq_no_such_rule").is_err());
    }

    #[test]
    fn test_permissive_covers_every_variant() {
        let config = QcConfiguration::permissive();
        for variant in ProductVariant::ALL {
            assert!(config.has_section(variant.section()));
        }
        assert!(config.get_bool("MXD09GA", "rbq_data_quality_1111").unwrap());
        assert_eq!(config.get_float("MXD09A1", "rza_min").unwrap(), -180.0);
        assert_eq!(config.get_float("MXD09GQ", "vza_max").unwrap(), 180.0);
        assert!(config.keys("MXD09Q1").contains(&"rbq_difforbit_1"));
    }
}
