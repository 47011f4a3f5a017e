//! Core traits and data types shared by the PREVAC drivers.
//!
//! The host application drives every instrument through the same
//! capability interface, [`Device`]. The call order is fixed:
//!
//! ```text
//! gui_parameters -> apply_gui_parameters -> connect -> initialize -> configure -> call*
//!                                                                   -> unconfigure -> disconnect
//! ```
//!
//! Each method runs to completion on the caller's thread. Drivers own their
//! transport exclusively and never spawn background work.

use crate::error::{AppResult, DaqError};
use crate::measurement::{Sample, Variable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// =============================================================================
// GUI parameters
// =============================================================================

/// Value of a host GUI parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    /// Check box.
    Bool(bool),
    /// Whole number.
    Int(i64),
    /// Number.
    Float(f64),
    /// Text or drop-down selection.
    String(String),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bool(b) => write!(f, "{}", b),
            ParameterValue::Int(i) => write!(f, "{}", i),
            ParameterValue::Float(fl) => write!(f, "{}", fl),
            ParameterValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl ParameterValue {
    /// Extract value as a string, parsing from various types
    pub fn as_string(&self) -> String {
        self.to_string()
    }

    /// Extract value as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParameterValue::Float(f) => Some(*f),
            ParameterValue::Int(i) => Some(*i as f64),
            ParameterValue::String(s) => s.trim().parse().ok(),
            ParameterValue::Bool(_) => None,
        }
    }

    /// Extract value as i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParameterValue::Int(i) => Some(*i),
            ParameterValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            ParameterValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Extract value as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Bool(b) => Some(*b),
            ParameterValue::Int(i) => Some(*i != 0),
            ParameterValue::String(s) => s.trim().to_ascii_lowercase().parse().ok(),
            ParameterValue::Float(_) => None,
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        ParameterValue::Bool(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::Int(value)
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        ParameterValue::Float(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::String(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::String(value)
    }
}

/// How the host renders one GUI parameter.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParameterSpec {
    /// Drop-down list; the first option is the default.
    Choice(Vec<ParameterValue>),
    /// Free entry with a default.
    Value(ParameterValue),
}

/// One entry of a driver's GUI schema.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GuiField {
    /// Field label, also the key in [`GuiParameters`].
    pub name: &'static str,
    /// How the field is rendered.
    pub spec: ParameterSpec,
}

impl GuiField {
    /// Drop-down field defaulting to the first of `options`.
    pub fn choice<V: Into<ParameterValue>>(name: &'static str, options: Vec<V>) -> Self {
        Self {
            name,
            spec: ParameterSpec::Choice(options.into_iter().map(Into::into).collect()),
        }
    }

    /// Free entry field.
    pub fn value(name: &'static str, default: impl Into<ParameterValue>) -> Self {
        Self {
            name,
            spec: ParameterSpec::Value(default.into()),
        }
    }

    /// Value the host shows before the user touches the field.
    pub fn default_value(&self) -> Option<&ParameterValue> {
        match &self.spec {
            ParameterSpec::Choice(options) => options.first(),
            ParameterSpec::Value(value) => Some(value),
        }
    }
}

/// Parameter values handed over by the host, keyed by field name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GuiParameters(HashMap<String, ParameterValue>);

impl GuiParameters {
    /// No values set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults of every field in `schema`.
    pub fn defaults(schema: &[GuiField]) -> Self {
        let mut parameters = Self::new();
        for field in schema {
            if let Some(value) = field.default_value() {
                parameters.insert(field.name, value.clone());
            }
        }
        parameters
    }

    /// Set `name` to `value`, replacing any previous value.
    pub fn insert(&mut self, name: &str, value: impl Into<ParameterValue>) -> &mut Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    /// Raw value of `name`.
    pub fn get(&self, name: &str) -> AppResult<&ParameterValue> {
        self.0
            .get(name)
            .ok_or_else(|| DaqError::Configuration(format!("Missing GUI parameter '{}'", name)))
    }

    /// `name` as text.
    pub fn string(&self, name: &str) -> AppResult<String> {
        self.get(name).map(ParameterValue::as_string)
    }

    /// `name` as a number.
    pub fn f64(&self, name: &str) -> AppResult<f64> {
        let value = self.get(name)?;
        value.as_f64().ok_or_else(|| {
            DaqError::Configuration(format!("GUI parameter '{}' is not a number: {}", name, value))
        })
    }

    /// `name` as a whole number.
    pub fn i64(&self, name: &str) -> AppResult<i64> {
        let value = self.get(name)?;
        value.as_i64().ok_or_else(|| {
            DaqError::Configuration(format!("GUI parameter '{}' is not an integer: {}", name, value))
        })
    }

    /// `name` as a flag.
    pub fn bool(&self, name: &str) -> AppResult<bool> {
        let value = self.get(name)?;
        value.as_bool().ok_or_else(|| {
            DaqError::Configuration(format!("GUI parameter '{}' is not a flag: {}", name, value))
        })
    }
}

// =============================================================================
// Device capability
// =============================================================================

/// Instrument lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentState {
    /// Created, remote control not established
    Disconnected,
    /// Remote control established
    Connected,
    /// Static device data read (frequency window, baseline)
    Initialized,
    /// Calibration written, ready for `call`
    Configured,
}

/// Capability interface the host drives.
///
/// Only `call` is expected to run repeatedly. Every other method runs once
/// per measurement sequence, in the order given in the module docs.
pub trait Device {
    /// Short name shown by the host.
    fn id(&self) -> &str;

    fn state(&self) -> InstrumentState;

    /// GUI schema (`set_GUIparameter`).
    fn gui_parameters(&self) -> Vec<GuiField>;

    /// Ingest GUI values (`get_GUIparameter`). Runs before any device I/O
    /// and rejects invalid values eagerly.
    fn apply_gui_parameters(&mut self, parameters: &GuiParameters) -> AppResult<()>;

    /// Names and units of the values returned by [`Device::call`].
    fn variables(&self) -> Vec<Variable>;

    /// Extra operations the host may trigger between calls.
    fn actions(&self) -> &'static [&'static str] {
        &[]
    }

    fn run_action(&mut self, action: &str) -> AppResult<()> {
        Err(DaqError::UnknownAction(action.to_string()))
    }

    fn connect(&mut self) -> AppResult<()>;

    fn disconnect(&mut self) -> AppResult<()> {
        Ok(())
    }

    fn initialize(&mut self) -> AppResult<()> {
        Ok(())
    }

    fn configure(&mut self) -> AppResult<()> {
        Ok(())
    }

    fn unconfigure(&mut self) -> AppResult<()> {
        Ok(())
    }

    /// Set the swept value (switch-type drivers).
    fn apply(&mut self, _value: &ParameterValue) -> AppResult<()> {
        Ok(())
    }

    /// Read one sample.
    fn call(&mut self) -> AppResult<Sample>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_conversions() {
        assert_eq!(ParameterValue::from("100.0").as_f64(), Some(100.0));
        assert_eq!(ParameterValue::from("3").as_i64(), Some(3));
        assert_eq!(ParameterValue::Float(0.5).as_i64(), None);
        assert_eq!(ParameterValue::from("True").as_bool(), Some(true));
        assert_eq!(ParameterValue::Int(0).as_bool(), Some(false));
        assert_eq!(ParameterValue::Float(0.5).to_string(), "0.5");
    }

    #[test]
    fn test_defaults_from_schema() {
        let schema = vec![
            GuiField::choice("Channel", vec!["1", "2"]),
            GuiField::value("Reset thickness", false),
        ];
        let parameters = GuiParameters::defaults(&schema);
        assert_eq!(parameters.string("Channel").unwrap(), "1");
        assert!(!parameters.bool("Reset thickness").unwrap());
    }

    #[test]
    fn test_missing_parameter_is_configuration_error() {
        let parameters = GuiParameters::new();
        assert!(matches!(
            parameters.f64("Density in g/cm^3"),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn test_untagged_deserialization() {
        let parameters: GuiParameters =
            serde_json::from_str(r#"{"Channel": "2", "Set Tooling": true, "Tooling in %": 90.5}"#)
                .unwrap();
        assert_eq!(parameters.i64("Channel").unwrap(), 2);
        assert!(parameters.bool("Set Tooling").unwrap());
        assert_eq!(parameters.f64("Tooling in %").unwrap(), 90.5);
    }
}
