use alloc::vec::Vec;

use hashbrown::DefaultHashBuilder;

use indexmap::set::{IndexSet, IntoIter, Iter};

use serde::Serialize;

use crate::macros::set;

/// All [`ContentFormat`]s.
pub const ALL_CONTENT_FORMATS: &[ContentFormat] = &[
    ContentFormat::TextPlain,
    ContentFormat::LinkFormat,
    ContentFormat::Json,
    ContentFormat::SenmlJson,
];

/// The encodings a resource representation can be transmitted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum ContentFormat {
    /// Bare value as text.
    #[serde(rename = "text/plain")]
    TextPlain,
    /// Link-format document listing resources and their attributes.
    #[serde(rename = "application/link-format")]
    LinkFormat,
    /// Generic `JSON` document.
    #[serde(rename = "application/json")]
    Json,
    /// `SenML`-like `JSON` measurement document.
    #[serde(rename = "application/senml+json")]
    SenmlJson,
}

impl core::fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.mime().fmt(f)
    }
}

impl ContentFormat {
    /// Returns the numeric content-format identifier.
    #[must_use]
    pub const fn id(self) -> u16 {
        match self {
            Self::TextPlain => 0,
            Self::LinkFormat => 40,
            Self::Json => 50,
            Self::SenmlJson => 110,
        }
    }

    /// Returns the [`ContentFormat`] associated with the given identifier.
    ///
    /// The return value is [`None`] when the identifier is unknown.
    #[must_use]
    pub const fn from_id(id: u16) -> Option<Self> {
        match id {
            0 => Some(Self::TextPlain),
            40 => Some(Self::LinkFormat),
            50 => Some(Self::Json),
            110 => Some(Self::SenmlJson),
            _ => None,
        }
    }

    /// Returns the media type.
    #[must_use]
    pub const fn mime(self) -> &'static str {
        match self {
            Self::TextPlain => "text/plain",
            Self::LinkFormat => "application/link-format",
            Self::Json => "application/json",
            Self::SenmlJson => "application/senml+json",
        }
    }

    /// Returns the [`ContentFormat`] associated with a media type.
    ///
    /// Media type parameters, such as `; charset=utf-8`, are ignored.
    #[must_use]
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.split(';').next().unwrap_or(mime).trim();
        ALL_CONTENT_FORMATS
            .iter()
            .find(|format| format.mime().eq_ignore_ascii_case(mime))
            .copied()
    }
}

set! {
  /// A collection of [`ContentFormat`]s, ordered by preference.
  #[derive(Debug, Clone, PartialEq, Serialize)]
  #[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
  pub struct ContentFormats(IndexSet<ContentFormat, DefaultHashBuilder>);
}

impl ContentFormats {
    /// Constructs [`ContentFormats`] from an array of [`ContentFormat`]s.
    #[must_use]
    #[inline]
    pub fn init_from_formats<const N: usize>(input_elements: [ContentFormat; N]) -> Self {
        let mut elements = Self::new();
        for element in input_elements {
            elements.add(element);
        }
        elements
    }
}

/// The encodings accepted by a requester.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum Accept {
    /// Any encoding is accepted.
    Any,
    /// Only the listed encodings are accepted, in order of preference.
    Formats(Vec<ContentFormat>),
}

impl Default for Accept {
    fn default() -> Self {
        Self::Any
    }
}

impl Accept {
    /// Accepts a single [`ContentFormat`].
    #[must_use]
    #[inline]
    pub fn only(format: ContentFormat) -> Self {
        Self::Formats(alloc::vec![format])
    }

    /// Parses the value of an `Accept` header.
    ///
    /// A wildcard entry accepts any encoding. Unknown media types are
    /// skipped, so a header listing only unknown media types accepts nothing.
    #[must_use]
    pub fn parse(header: &str) -> Self {
        let mut formats = Vec::new();
        for entry in header.split(',') {
            let mime = entry.split(';').next().unwrap_or(entry).trim();
            if mime == "*/*" || mime.is_empty() {
                return Self::Any;
            }
            if let Some(format) = ContentFormat::from_mime(mime)
                && !formats.contains(&format)
            {
                formats.push(format);
            }
        }
        Self::Formats(formats)
    }

    /// Picks the encoding of a representation.
    ///
    /// The structured `SenML` encoding wins whenever both sides support it.
    /// Otherwise, the first accepted encoding supported by the resource is
    /// chosen. [`Accept::Any`] picks the resource preferred encoding.
    ///
    /// The return value is [`None`] when no encoding is mutually supported.
    #[must_use]
    pub fn negotiate(&self, supported: &ContentFormats) -> Option<ContentFormat> {
        match self {
            Self::Any => supported.first().copied(),
            Self::Formats(formats) => {
                if formats.contains(&ContentFormat::SenmlJson)
                    && supported.contains(&ContentFormat::SenmlJson)
                {
                    return Some(ContentFormat::SenmlJson);
                }
                formats
                    .iter()
                    .find(|format| supported.contains(format))
                    .copied()
            }
        }
    }
}

#[cfg(test)]
#[cfg(feature = "deserialize")]
mod tests {
    use alloc::vec;

    use crate::{deserialize, serialize};

    use super::{ALL_CONTENT_FORMATS, Accept, ContentFormat, ContentFormats};

    fn sensor_formats() -> ContentFormats {
        ContentFormats::init_from_formats([ContentFormat::SenmlJson, ContentFormat::TextPlain])
    }

    #[test]
    fn test_content_format() {
        // 1000 is never a valid identifier.
        assert_eq!(ContentFormat::from_id(1000), None);

        for format in ALL_CONTENT_FORMATS {
            assert_eq!(ContentFormat::from_id(format.id()), Some(*format));
            assert_eq!(ContentFormat::from_mime(format.mime()), Some(*format));
            assert_eq!(deserialize::<ContentFormat>(serialize(format)), *format);
        }

        assert_eq!(
            ContentFormat::from_mime("Text/Plain; charset=utf-8"),
            Some(ContentFormat::TextPlain)
        );
    }

    #[test]
    fn test_accept_parse() {
        assert_eq!(Accept::parse("*/*"), Accept::Any);
        assert_eq!(Accept::parse("text/plain, */*;q=0.1"), Accept::Any);
        assert_eq!(
            Accept::parse("application/senml+json, text/plain"),
            Accept::Formats(vec![ContentFormat::SenmlJson, ContentFormat::TextPlain])
        );
        assert_eq!(Accept::parse("image/png"), Accept::Formats(vec![]));
    }

    #[test]
    fn test_negotiation() {
        let supported = sensor_formats();

        // Structured encoding is preferred even when listed last.
        let accept = Accept::Formats(vec![ContentFormat::TextPlain, ContentFormat::SenmlJson]);
        assert_eq!(accept.negotiate(&supported), Some(ContentFormat::SenmlJson));

        // Plain text fallback.
        let accept = Accept::Formats(vec![ContentFormat::Json, ContentFormat::TextPlain]);
        assert_eq!(accept.negotiate(&supported), Some(ContentFormat::TextPlain));

        // No mutually supported encoding.
        let accept = Accept::only(ContentFormat::LinkFormat);
        assert_eq!(accept.negotiate(&supported), None);
        assert_eq!(Accept::Formats(vec![]).negotiate(&supported), None);

        // Anything goes.
        assert_eq!(
            Accept::Any.negotiate(&supported),
            Some(ContentFormat::SenmlJson)
        );
    }
}
