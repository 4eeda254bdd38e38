use alloc::string::{String, ToString};

use crate::senml::SenmlValue;

// A fake trait to name the type of a resource value.
mod private {
    #[doc(hidden)]
    pub trait TypeName {
        const TYPE: &'static str;
    }
}

/// A value carried by a raw resource.
///
/// Each value type knows how it is transmitted as a `SenML` field, how it is
/// rendered and parsed as plain text, and whether it can be toggled.
pub trait ResourceValue:
    Clone + PartialEq + core::fmt::Debug + Send + Sync + 'static + private::TypeName
{
    /// Returns the value type name.
    #[must_use]
    fn type_name() -> &'static str {
        Self::TYPE
    }

    /// Converts the value into a `SenML` field.
    fn to_senml(&self) -> SenmlValue;

    /// Extracts a value from a `SenML` field.
    ///
    /// The return value is [`None`] when the field has a different type.
    fn from_senml(value: &SenmlValue) -> Option<Self>;

    /// Renders the value as plain text.
    fn to_text(&self) -> String;

    /// Parses a value from plain text.
    fn parse_text(text: &str) -> Option<Self>;

    /// Returns the opposite value, if the type can be toggled.
    fn toggled(&self) -> Option<Self> {
        None
    }
}

impl private::TypeName for bool {
    const TYPE: &'static str = "bool";
}

impl ResourceValue for bool {
    fn to_senml(&self) -> SenmlValue {
        SenmlValue::Bool(*self)
    }

    fn from_senml(value: &SenmlValue) -> Option<Self> {
        match value {
            SenmlValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    fn to_text(&self) -> String {
        self.to_string()
    }

    fn parse_text(text: &str) -> Option<Self> {
        match text.trim() {
            t if t.eq_ignore_ascii_case("true") => Some(true),
            t if t.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    fn toggled(&self) -> Option<Self> {
        Some(!*self)
    }
}

impl private::TypeName for u32 {
    const TYPE: &'static str = "u32";
}

impl ResourceValue for u32 {
    fn to_senml(&self) -> SenmlValue {
        SenmlValue::Number(f64::from(*self))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn from_senml(value: &SenmlValue) -> Option<Self> {
        match value {
            SenmlValue::Number(n) if *n >= 0. && *n <= f64::from(u32::MAX) && n.fract() == 0. => {
                Some(*n as u32)
            }
            _ => None,
        }
    }

    fn to_text(&self) -> String {
        self.to_string()
    }

    fn parse_text(text: &str) -> Option<Self> {
        text.trim().parse().ok()
    }
}

impl private::TypeName for f64 {
    const TYPE: &'static str = "f64";
}

impl ResourceValue for f64 {
    fn to_senml(&self) -> SenmlValue {
        SenmlValue::Number(*self)
    }

    fn from_senml(value: &SenmlValue) -> Option<Self> {
        match value {
            SenmlValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn to_text(&self) -> String {
        self.to_string()
    }

    fn parse_text(text: &str) -> Option<Self> {
        text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

impl private::TypeName for String {
    const TYPE: &'static str = "string";
}

impl ResourceValue for String {
    fn to_senml(&self) -> SenmlValue {
        SenmlValue::String(self.clone())
    }

    fn from_senml(value: &SenmlValue) -> Option<Self> {
        match value {
            SenmlValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn to_text(&self) -> String {
        self.clone()
    }

    fn parse_text(text: &str) -> Option<Self> {
        Some(text.into())
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::String;

    use super::{ResourceValue, SenmlValue};

    #[test]
    fn test_bool_value() {
        assert_eq!(bool::parse_text(" TRUE "), Some(true));
        assert_eq!(bool::parse_text("false"), Some(false));
        assert_eq!(bool::parse_text("on"), None);
        assert_eq!(true.toggled(), Some(false));
        assert_eq!(bool::from_senml(&SenmlValue::Number(1.)), None);
        assert_eq!(bool::type_name(), "bool");
    }

    #[test]
    fn test_count_value() {
        assert_eq!(u32::parse_text("12"), Some(12));
        assert_eq!(u32::parse_text("-3"), None);
        assert_eq!(12u32.toggled(), None);
        assert_eq!(u32::from_senml(&SenmlValue::Number(5.)), Some(5));
        assert_eq!(u32::from_senml(&SenmlValue::Number(5.5)), None);
        assert_eq!(u32::from_senml(&SenmlValue::Number(-1.)), None);
    }

    #[test]
    fn test_temperature_value() {
        assert_eq!(f64::parse_text("21.5"), Some(21.5));
        assert_eq!(f64::parse_text("NaN"), None);
        assert_eq!(21.5f64.to_text(), "21.5");
        assert_eq!(f64::from_senml(&SenmlValue::Bool(true)), None);
    }

    #[test]
    fn test_string_value() {
        let name = String::from("floor1");
        assert_eq!(String::parse_text("floor1"), Some(name.clone()));
        assert_eq!(name.to_senml(), SenmlValue::String(name.clone()));
        assert_eq!(name.toggled(), None);
    }
}
