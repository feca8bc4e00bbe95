//! Camera controls and static camera properties.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CameraError;

/// Tunable capture parameters understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ControlId {
    /// Analogue sensor gain.
    AnalogueGain,
    /// Exposure time in microseconds.
    ExposureTime,
    /// Exposure compensation.
    ExposureValue,
    /// Image brightness.
    Brightness,
    /// Image contrast.
    Contrast,
    /// Colour saturation.
    Saturation,
}

impl ControlId {
    /// All known controls.
    pub const ALL: [Self; 6] = [
        Self::AnalogueGain,
        Self::ExposureTime,
        Self::ExposureValue,
        Self::Brightness,
        Self::Contrast,
        Self::Saturation,
    ];

    /// Canonical control name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::AnalogueGain => "AnalogueGain",
            Self::ExposureTime => "ExposureTime",
            Self::ExposureValue => "ExposureValue",
            Self::Brightness => "Brightness",
            Self::Contrast => "Contrast",
            Self::Saturation => "Saturation",
        }
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ControlId {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CameraError::Config(format!("unknown control '{s}'")))
    }
}

/// Value carried by a control.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlValue {
    /// Boolean control.
    Bool(bool),
    /// Integer control.
    Int(i64),
    /// Floating point control.
    Float(f32),
}

impl ControlValue {
    /// Integer view of the value. Floats are rounded.
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Bool(value) => i64::from(value),
            Self::Int(value) => value,
            Self::Float(value) => value.round() as i64,
        }
    }
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value:.2}"),
        }
    }
}

impl FromStr for ControlValue {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(value) = s.parse::<bool>() {
            return Ok(Self::Bool(value));
        }
        if let Ok(value) = s.parse::<i64>() {
            return Ok(Self::Int(value));
        }
        s.parse::<f32>()
            .map(Self::Float)
            .map_err(|_| CameraError::Config(format!("invalid control value '{s}'")))
    }
}

/// Range and default of a control as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlInfo {
    /// Minimum accepted value.
    pub min: ControlValue,
    /// Maximum accepted value.
    pub max: ControlValue,
    /// Value in effect after reset.
    pub default: ControlValue,
}

impl ControlInfo {
    /// Integer control info.
    pub const fn int(min: i64, max: i64, default: i64) -> Self {
        Self {
            min: ControlValue::Int(min),
            max: ControlValue::Int(max),
            default: ControlValue::Int(default),
        }
    }

    /// Clamp a value into the supported range, as an integer.
    pub fn clamp(&self, value: ControlValue) -> i64 {
        let (min, max) = (self.min.as_i64(), self.max.as_i64());
        value.as_i64().clamp(min.min(max), max.max(min))
    }
}

impl fmt::Display for ControlInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{}]", self.min, self.max)
    }
}

/// Ordered set of control values attached to a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlList {
    values: BTreeMap<ControlId, ControlValue>,
}

impl ControlList {
    /// Create an empty control list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a control, replacing any previous value.
    pub fn set(&mut self, id: ControlId, value: ControlValue) {
        self.values.insert(id, value);
    }

    /// Get the value of a control.
    pub fn get(&self, id: ControlId) -> Option<ControlValue> {
        self.values.get(&id).copied()
    }

    /// Whether the control is set.
    pub fn contains(&self, id: ControlId) -> bool {
        self.values.contains_key(&id)
    }

    /// Remove every control.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Number of controls set.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no control is set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over the controls in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ControlId, ControlValue)> + '_ {
        self.values.iter().map(|(id, value)| (*id, *value))
    }

    /// Merge every control of `other` into this list.
    pub fn extend(&mut self, other: &Self) {
        for (id, value) in other.iter() {
            self.set(id, value);
        }
    }
}

/// Parse a `Name=Value` control assignment.
pub fn parse_assignment(text: &str) -> Result<(ControlId, ControlValue), CameraError> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| CameraError::Config(format!("expected NAME=VALUE, got '{text}'")))?;
    Ok((name.trim().parse()?, value.parse()?))
}

/// Where a camera is mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraLocation {
    /// Facing the user.
    Front,
    /// Facing away from the user.
    Back,
    /// Externally attached, e.g. over USB.
    External,
}

impl fmt::Display for CameraLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Front => "Front",
            Self::Back => "Back",
            Self::External => "External",
        };
        f.write_str(name)
    }
}

/// Static properties of a camera.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    /// Mounting location, when known.
    pub location: Option<CameraLocation>,
    /// Model name, when known.
    pub model: Option<String>,
    /// Backend specific properties.
    pub extra: BTreeMap<String, String>,
}

impl Properties {
    /// All properties as printable key/value pairs.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries = Vec::with_capacity(self.extra.len() + 2);
        if let Some(location) = self.location {
            entries.push(("Location".to_owned(), location.to_string()));
        }
        if let Some(model) = &self.model {
            entries.push(("Model".to_owned(), model.clone()));
        }
        entries.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_id_parse_is_case_insensitive() {
        let id: ControlId = "exposuretime".parse().expect("parse failed");
        assert_eq!(id, ControlId::ExposureTime);
        assert!("Zoom".parse::<ControlId>().is_err());
    }

    #[test]
    fn test_control_value_parse() {
        assert_eq!("true".parse::<ControlValue>().ok(), Some(ControlValue::Bool(true)));
        assert_eq!("42".parse::<ControlValue>().ok(), Some(ControlValue::Int(42)));
        assert_eq!("1.5".parse::<ControlValue>().ok(), Some(ControlValue::Float(1.5)));
        assert!("abc".parse::<ControlValue>().is_err());
    }

    #[test]
    fn test_parse_assignment() {
        let (id, value) = parse_assignment("AnalogueGain = 8").expect("parse failed");
        assert_eq!(id, ControlId::AnalogueGain);
        assert_eq!(value, ControlValue::Int(8));
        assert!(parse_assignment("AnalogueGain").is_err());
    }

    #[test]
    fn test_control_info_clamp() {
        let info = ControlInfo::int(0, 255, 128);
        assert_eq!(info.clamp(ControlValue::Int(100_000)), 255);
        assert_eq!(info.clamp(ControlValue::Int(-4)), 0);
        assert_eq!(info.clamp(ControlValue::Float(12.6)), 13);
        assert_eq!(info.to_string(), "[0..255]");
    }

    #[test]
    fn test_control_list_set_and_replace() {
        let mut list = ControlList::new();
        list.set(ControlId::Contrast, ControlValue::Int(1));
        list.set(ControlId::AnalogueGain, ControlValue::Int(2));
        list.set(ControlId::Contrast, ControlValue::Int(3));

        assert_eq!(list.len(), 2);
        assert_eq!(list.get(ControlId::Contrast), Some(ControlValue::Int(3)));
        let ids: Vec<ControlId> = list.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![ControlId::AnalogueGain, ControlId::Contrast]);

        list.clear();
        assert!(list.is_empty());
    }

    #[test]
    fn test_properties_entries() {
        let mut props = Properties {
            location: Some(CameraLocation::External),
            model: Some("Cam".to_owned()),
            ..Properties::default()
        };
        props.extra.insert("Driver".to_owned(), "uvcvideo".to_owned());

        let entries = props.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries.first().map(|(k, _)| k.as_str()), Some("Location"));
    }
}
