use alloc::string::String;
use alloc::vec::Vec;

use serde::Serialize;

/// Version stamped on records produced by actuators.
pub const ACTUATOR_VERSION: f64 = 0.5;

/// The value carried by a [`SenmlRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum SenmlValue {
    /// Numeric value, transmitted as `v`.
    Number(f64),
    /// Boolean value, transmitted as `vb`.
    Bool(bool),
    /// String value, transmitted as `vs`.
    String(String),
}

/// A single measurement record.
///
/// Absent fields are omitted from the encoded document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct SenmlRecord {
    /// Base name.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "deserialize", serde(default))]
    pub bn: Option<String>,
    /// Base time.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "deserialize", serde(default))]
    pub bt: Option<u64>,
    /// Base version.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "deserialize", serde(default))]
    pub bver: Option<f64>,
    /// Name.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "deserialize", serde(default))]
    pub n: Option<String>,
    /// Unit.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "deserialize", serde(default))]
    pub u: Option<String>,
    /// Numeric value.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "deserialize", serde(default))]
    pub v: Option<f64>,
    /// Boolean value.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "deserialize", serde(default))]
    pub vb: Option<bool>,
    /// String value.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "deserialize", serde(default))]
    pub vs: Option<String>,
    /// Time, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "deserialize", serde(default))]
    pub t: Option<u64>,
}

impl SenmlRecord {
    /// Creates a [`SenmlRecord`] carrying the given value.
    #[must_use]
    pub fn with_value(value: SenmlValue) -> Self {
        let mut record = Self::default();
        match value {
            SenmlValue::Number(v) => record.v = Some(v),
            SenmlValue::Bool(vb) => record.vb = Some(vb),
            SenmlValue::String(vs) => record.vs = Some(vs),
        }
        record
    }

    /// Sets the base name.
    #[must_use]
    #[inline]
    pub fn base_name(mut self, bn: impl Into<String>) -> Self {
        self.bn = Some(bn.into());
        self
    }

    /// Sets the base version.
    #[must_use]
    #[inline]
    pub const fn base_version(mut self, bver: f64) -> Self {
        self.bver = Some(bver);
        self
    }

    /// Sets the name.
    #[must_use]
    #[inline]
    pub fn name(mut self, n: impl Into<String>) -> Self {
        self.n = Some(n.into());
        self
    }

    /// Sets the unit.
    #[must_use]
    #[inline]
    pub fn unit(mut self, u: impl Into<String>) -> Self {
        self.u = Some(u.into());
        self
    }

    /// Sets the time, in milliseconds.
    #[must_use]
    #[inline]
    pub const fn time(mut self, t: u64) -> Self {
        self.t = Some(t);
        self
    }

    /// Returns the value carried by the record.
    ///
    /// When more than one value field is present, the numeric one wins,
    /// then the boolean one.
    #[must_use]
    pub fn value(&self) -> Option<SenmlValue> {
        if let Some(v) = self.v {
            Some(SenmlValue::Number(v))
        } else if let Some(vb) = self.vb {
            Some(SenmlValue::Bool(vb))
        } else {
            self.vs.clone().map(SenmlValue::String)
        }
    }
}

/// A `SenML`-like document: an ordered sequence of [`SenmlRecord`]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(transparent)]
pub struct SenmlPack(Vec<SenmlRecord>);

impl SenmlPack {
    /// Creates an empty [`SenmlPack`].
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds a [`SenmlRecord`] to the pack.
    #[must_use]
    #[inline]
    pub fn record(mut self, record: SenmlRecord) -> Self {
        self.0.push(record);
        self
    }

    /// Returns the records.
    #[must_use]
    #[inline]
    pub fn records(&self) -> &[SenmlRecord] {
        &self.0
    }

    /// Returns the value of the first record carrying one.
    #[must_use]
    pub fn first_value(&self) -> Option<SenmlValue> {
        self.0.iter().find_map(SenmlRecord::value)
    }

    /// Encodes the pack as a `JSON` string.
    ///
    /// # Errors
    ///
    /// Fails when a numeric field is not finite.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a pack from a `JSON` string.
    ///
    /// # Errors
    ///
    /// Fails when the text is not a valid `SenML`-like document.
    #[cfg(feature = "deserialize")]
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
