//! Path normalization.
//!
//! Every path entering the crate passes through [`normalize`] exactly once.
//! Paths can be given as a string (`"status audio volume"`,
//! `"Status/Call[42]/Status"`) or as explicit segments; the result is a
//! [`NormalizedPath`] of capitalized names and integer indices.
//!
//! ```
//! use xapi_client::path::{normalize, Segment};
//!
//! let path = normalize("status/call[3] status");
//! assert_eq!(
//!     path.segments(),
//!     &[
//!         Segment::Name("Status".into()),
//!         Segment::Name("Call".into()),
//!         Segment::Index(3),
//!         Segment::Name("Status".into()),
//!     ]
//! );
//! assert_eq!(path.key(), "status/call/3/status");
//! assert_eq!(path.query(), "/Status/Call[3]/Status");
//! ```

use std::fmt;

use serde_json::Value;

/// One element of a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A named node, first character uppercased after normalization.
    Name(String),
    /// An array index (matched against an element's `id` attribute).
    Index(u64),
}

impl Segment {
    fn normalized(self) -> Self {
        match self {
            Segment::Name(name) => match name.parse::<u64>() {
                Ok(index) if is_digits(&name) => Segment::Index(index),
                _ => Segment::Name(capitalize(&name)),
            },
            index => index,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Segment::Name(name) => Value::String(name.clone()),
            Segment::Index(index) => Value::from(*index),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Name(name) => f.write_str(name),
            Segment::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Segment::Name(s.to_string())
    }
}

impl From<String> for Segment {
    fn from(s: String) -> Self {
        Segment::Name(s)
    }
}

impl From<u64> for Segment {
    fn from(index: u64) -> Self {
        Segment::Index(index)
    }
}

/// A canonical path: capitalized names and integer indices.
///
/// Only produced by [`normalize`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NormalizedPath(Vec<Segment>);

impl NormalizedPath {
    /// The empty path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Path elements in order.
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the empty path.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Concatenate two paths.
    pub fn join(&self, other: &NormalizedPath) -> NormalizedPath {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        NormalizedPath(segments)
    }

    /// Listener registration key: lowercase, slash-joined.
    pub fn key(&self) -> String {
        self.0
            .iter()
            .map(|s| s.to_string().to_lowercase())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Feedback query form: `/Name` for names, `[N]` for indices.
    pub fn query(&self) -> String {
        self.0
            .iter()
            .map(|s| match s {
                Segment::Name(name) => format!("/{name}"),
                Segment::Index(index) => format!("[{index}]"),
            })
            .collect()
    }

    /// Space-delimited tokens as used on the shell command line.
    pub fn tokens(&self) -> String {
        self.0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// JSON array of names and numbers, as carried in request params.
    pub fn to_json(&self) -> Value {
        Value::Array(self.0.iter().map(Segment::to_json).collect())
    }

    /// Parse a JSON array of names and numbers back into a path.
    ///
    /// Returns `None` for anything that is not an array of strings and
    /// non-negative integers.
    pub fn from_json(value: &Value) -> Option<NormalizedPath> {
        let items = value.as_array()?;
        let segments = items
            .iter()
            .map(|item| match item {
                Value::String(s) => Some(Segment::Name(s.clone())),
                Value::Number(n) => n.as_u64().map(Segment::Index),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        Some(normalize(segments))
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(
            &self
                .0
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("/"),
        )
    }
}

/// Anything that can be normalized into a path.
pub trait IntoPath {
    /// Normalize into a [`NormalizedPath`].
    fn into_path(self) -> NormalizedPath;
}

impl IntoPath for NormalizedPath {
    fn into_path(self) -> NormalizedPath {
        self
    }
}

impl IntoPath for &NormalizedPath {
    fn into_path(self) -> NormalizedPath {
        self.clone()
    }
}

impl IntoPath for &str {
    fn into_path(self) -> NormalizedPath {
        let segments = split_words(self).map(Segment::from).collect::<Vec<_>>();
        normalize_segments(segments)
    }
}

impl IntoPath for String {
    fn into_path(self) -> NormalizedPath {
        self.as_str().into_path()
    }
}

impl IntoPath for &String {
    fn into_path(self) -> NormalizedPath {
        self.as_str().into_path()
    }
}

impl IntoPath for Vec<Segment> {
    fn into_path(self) -> NormalizedPath {
        normalize_segments(self)
    }
}

impl IntoPath for &[Segment] {
    fn into_path(self) -> NormalizedPath {
        normalize_segments(self.to_vec())
    }
}

impl<const N: usize> IntoPath for [Segment; N] {
    fn into_path(self) -> NormalizedPath {
        normalize_segments(self.into())
    }
}

impl IntoPath for &[&str] {
    fn into_path(self) -> NormalizedPath {
        normalize_segments(self.iter().map(|s| Segment::from(*s)).collect())
    }
}

impl<const N: usize> IntoPath for [&str; N] {
    fn into_path(self) -> NormalizedPath {
        self.as_slice().into_path()
    }
}

/// Canonicalize a path.
///
/// Strings are split into maximal runs of word characters; separators never
/// produce empty segments. Segment lists are taken element by element.
/// Names get their first character uppercased, all-digit names become indices.
pub fn normalize(path: impl IntoPath) -> NormalizedPath {
    path.into_path()
}

fn normalize_segments(segments: Vec<Segment>) -> NormalizedPath {
    NormalizedPath(segments.into_iter().map(Segment::normalized).collect())
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn split_words(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !is_word_char(c)).filter(|w| !w.is_empty())
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Segment {
        Segment::Name(s.to_string())
    }

    #[test]
    fn test_string_separators_are_discarded() {
        let path = normalize("  status//audio . volume ");
        assert_eq!(path.segments(), &[name("Status"), name("Audio"), name("Volume")]);
    }

    #[test]
    fn test_numeric_segments_become_indices() {
        let path = normalize("Status/Call/42/Status");
        assert_eq!(
            path.segments(),
            &[name("Status"), name("Call"), Segment::Index(42), name("Status")]
        );
    }

    #[test]
    fn test_bracket_index_matches_slash_index() {
        assert_eq!(normalize("Status/Call[42]/Status"), normalize("Status/Call/42/Status"));
        assert_eq!(normalize("Status/Call[]/Status"), normalize("Status/Call/Status"));
    }

    #[test]
    fn test_mixed_segment_array() {
        let path = normalize(vec![name("status"), name("call"), Segment::Index(3), name("7")]);
        assert_eq!(
            path.segments(),
            &[name("Status"), name("Call"), Segment::Index(3), Segment::Index(7)]
        );
    }

    #[test]
    fn test_array_segments_are_not_split() {
        let path = normalize(["audio volume"]);
        assert_eq!(path.segments(), &[name("Audio volume")]);
    }

    #[test]
    fn test_empty_input() {
        assert!(normalize("").is_empty());
        assert!(normalize(" / ").is_empty());
        assert!(normalize(Vec::<Segment>::new()).is_empty());
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for input in ["status audio volume", "Status/Call[42]/Status", "x_y 12 z", ""] {
            let once = normalize(input);
            let twice = normalize(once.clone());
            assert_eq!(once, twice);
            assert_eq!(normalize(once.to_string()), once);
            assert_eq!(normalize(once.segments()), once);
        }
    }

    #[test]
    fn test_renderings() {
        let path = normalize("Status/Call[42]/Status");
        assert_eq!(path.key(), "status/call/42/status");
        assert_eq!(path.query(), "/Status/Call[42]/Status");
        assert_eq!(path.tokens(), "Status Call 42 Status");
        assert_eq!(path.to_string(), "Status/Call/42/Status");
        assert_eq!(path.to_json(), serde_json::json!(["Status", "Call", 42, "Status"]));
    }

    #[test]
    fn test_json_roundtrip() {
        let path = normalize("Configuration Audio DefaultVolume");
        assert_eq!(NormalizedPath::from_json(&path.to_json()), Some(path));
        assert_eq!(NormalizedPath::from_json(&serde_json::json!([true])), None);
        assert_eq!(NormalizedPath::from_json(&serde_json::json!("Status")), None);
    }

    #[test]
    fn test_join() {
        let root = normalize("Status");
        let full = root.join(&normalize("audio volume"));
        assert_eq!(full.key(), "status/audio/volume");
    }
}
