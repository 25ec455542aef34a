//! Channel names and channel patterns.
//!
//! A channel name is a `/`-separated sequence of non-empty segments, for
//! example `/chat/lobby`. Besides concrete names, a [`ChannelId`] can be a
//! pattern of exactly one of these forms:
//!
//! - `/chat/*` matches exactly one trailing segment (`/chat/lobby`)
//! - `/chat/**` matches one or more trailing segments (`/chat/lobby/bob`)
//! - `/chat/{room}` is a template whose `room` parameter binds to the
//!   segment found at the same position in a concrete channel
//!
//! ```rust
//! use vesper_core::ChannelId;
//!
//! let template = ChannelId::parse("/chat/{room}").unwrap();
//! let concrete = ChannelId::parse("/chat/lobby").unwrap();
//! let bindings = template.bind(&concrete);
//! assert_eq!(bindings.get("room").map(String::as_str), Some("lobby"));
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
    sync::Arc,
};

use crate::error::{Error, Result};

/// Segment separator.
pub const SEPARATOR: char = '/';
/// Single-level wildcard segment.
pub const WILD: &str = "*";
/// Deep (one or more levels) wildcard segment.
pub const DEEP_WILD: &str = "**";
/// Prefix of meta channels used by the protocol itself.
pub const META_PREFIX: &str = "/meta/";
/// Prefix of service channels, used for point-to-point messaging.
pub const SERVICE_PREFIX: &str = "/service/";

/// Parameter bindings produced by [`ChannelId::bind`].
pub type Bindings = HashMap<String, String>;

/// The form of a channel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// A concrete channel such as `/chat/lobby`
    Exact,
    /// A pattern ending in `*`
    Wild,
    /// A pattern ending in `**`
    DeepWild,
    /// A pattern with trailing `{name}` parameters
    Template,
}

#[derive(Debug)]
struct Parsed {
    name: String,
    segments: Vec<String>,
    kind: ChannelKind,
    parameters: Vec<String>,
}

/// A parsed, validated channel name or channel pattern.
///
/// Cloning is cheap: the parsed representation is shared.
#[derive(Clone)]
pub struct ChannelId {
    inner: Arc<Parsed>,
}

impl ChannelId {
    /// Parse a channel name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidChannelName`] if the name is empty, does not
    /// start with `/`, contains empty segments, places a wildcard anywhere but
    /// the last segment, mixes wildcards with template parameters, or has
    /// template parameters followed by literal segments.
    pub fn parse(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref();
        if name.is_empty() {
            return Err(Error::invalid_channel(name, "channel name is empty"));
        }
        let Some(body) = name.strip_prefix(SEPARATOR) else {
            return Err(Error::invalid_channel(name, "channel name must start with '/'"));
        };

        let segments: Vec<String> = body.split(SEPARATOR).map(str::to_owned).collect();
        let last = segments.len() - 1;
        let mut kind = ChannelKind::Exact;
        let mut parameters: Vec<String> = Vec::new();

        for (position, segment) in segments.iter().enumerate() {
            if segment.trim().is_empty() {
                return Err(Error::invalid_channel(
                    name,
                    format!("segment {position} is empty"),
                ));
            }

            if segment == WILD || segment == DEEP_WILD {
                if position != last {
                    return Err(Error::invalid_channel(
                        name,
                        "wildcards are only allowed in the last segment",
                    ));
                }
                if !parameters.is_empty() {
                    return Err(Error::invalid_channel(
                        name,
                        "templates cannot contain wildcards",
                    ));
                }
                kind = if segment == WILD { ChannelKind::Wild } else { ChannelKind::DeepWild };
                continue;
            }

            if let Some(parameter) = template_parameter(segment) {
                if parameters.iter().any(|p| p == parameter) {
                    return Err(Error::invalid_channel(
                        name,
                        format!("duplicate template parameter '{parameter}'"),
                    ));
                }
                parameters.push(parameter.to_owned());
                kind = ChannelKind::Template;
                continue;
            }

            if segment.contains(['*', '{', '}']) {
                return Err(Error::invalid_channel(
                    name,
                    format!("segment '{segment}' contains reserved characters"),
                ));
            }
            if !parameters.is_empty() {
                return Err(Error::invalid_channel(
                    name,
                    "template parameters must be the trailing segments",
                ));
            }
        }

        Ok(Self {
            inner: Arc::new(Parsed { name: name.to_owned(), segments, kind, parameters }),
        })
    }

    fn from_segments(segments: Vec<String>, kind: ChannelKind) -> Self {
        let mut name = String::new();
        for segment in &segments {
            name.push(SEPARATOR);
            name.push_str(segment);
        }
        Self { inner: Arc::new(Parsed { name, segments, kind, parameters: Vec::new() }) }
    }

    /// The channel name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.inner.name
    }

    /// The form of this channel.
    pub fn kind(&self) -> ChannelKind {
        self.inner.kind
    }

    /// The segments of this channel, wildcards and `{name}` segments included.
    pub fn segments(&self) -> &[String] {
        &self.inner.segments
    }

    /// The segment at `index`, if any.
    pub fn segment(&self, index: usize) -> Option<&str> {
        self.inner.segments.get(index).map(String::as_str)
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.inner.segments.len()
    }

    /// Whether this is a concrete channel.
    pub fn is_exact(&self) -> bool {
        self.inner.kind == ChannelKind::Exact
    }

    /// Whether this is a `*` or `**` pattern.
    pub fn is_wild(&self) -> bool {
        matches!(self.inner.kind, ChannelKind::Wild | ChannelKind::DeepWild)
    }

    /// Whether this is a `**` pattern.
    pub fn is_deep_wild(&self) -> bool {
        self.inner.kind == ChannelKind::DeepWild
    }

    /// Whether this is a template with `{name}` parameters.
    pub fn is_template(&self) -> bool {
        self.inner.kind == ChannelKind::Template
    }

    /// Template parameter names, left to right. Empty for non-templates.
    pub fn parameters(&self) -> &[String] {
        &self.inner.parameters
    }

    /// Whether this is a `/meta/...` channel.
    pub fn is_meta(&self) -> bool {
        self.inner.name.starts_with(META_PREFIX)
    }

    /// Whether this is a `/service/...` channel.
    pub fn is_service(&self) -> bool {
        self.inner.name.starts_with(SERVICE_PREFIX)
    }

    /// Whether this is neither a meta nor a service channel.
    pub fn is_broadcast(&self) -> bool {
        !self.is_meta() && !self.is_service()
    }

    /// The parent channel, or `None` for single-segment channels.
    pub fn parent(&self) -> Option<Self> {
        let depth = self.depth();
        if depth < 2 {
            return None;
        }
        Some(Self::from_segments(self.inner.segments[..depth - 1].to_vec(), ChannelKind::Exact))
    }

    /// The literal prefix of this channel.
    ///
    /// For wildcards this is the parent channel name, for templates the
    /// segments before the first parameter (possibly the empty string), and
    /// for concrete channels the whole name.
    pub fn regular_part(&self) -> String {
        let literal = match self.inner.kind {
            ChannelKind::Exact => return self.inner.name.clone(),
            ChannelKind::Wild | ChannelKind::DeepWild => self.depth() - 1,
            ChannelKind::Template => self.depth() - self.inner.parameters.len(),
        };
        self.inner.segments[..literal].iter().fold(String::new(), |mut acc, segment| {
            acc.push(SEPARATOR);
            acc.push_str(segment);
            acc
        })
    }

    /// Whether `other` is a direct child of this channel.
    pub fn is_parent_of(&self, other: &Self) -> bool {
        self.is_exact() && other.depth() == self.depth() + 1 && self.is_prefix_of(other)
    }

    /// Whether `other` is a descendant of this channel.
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.is_exact() && other.depth() > self.depth() && self.is_prefix_of(other)
    }

    fn is_prefix_of(&self, other: &Self) -> bool {
        self.inner.segments.iter().zip(other.segments()).all(|(a, b)| a == b)
    }

    fn literal_prefix_matches(&self, concrete: &Self, literal: usize) -> bool {
        self.inner.segments[..literal]
            .iter()
            .zip(concrete.segments())
            .all(|(a, b)| a == b)
    }

    /// Whether this channel, possibly a pattern, matches the concrete channel.
    pub fn matches(&self, concrete: &Self) -> bool {
        if !concrete.is_exact() {
            return self == concrete;
        }
        let depth = self.depth();
        match self.inner.kind {
            ChannelKind::Exact => self == concrete,
            ChannelKind::Wild => {
                concrete.depth() == depth && self.literal_prefix_matches(concrete, depth - 1)
            },
            ChannelKind::DeepWild => {
                concrete.depth() >= depth && self.literal_prefix_matches(concrete, depth - 1)
            },
            ChannelKind::Template => {
                let literal = depth - self.inner.parameters.len();
                concrete.depth() == depth && self.literal_prefix_matches(concrete, literal)
            },
        }
    }

    /// The wildcard patterns that match this concrete channel, nearest first.
    ///
    /// For `/a/b/c` these are `/a/b/*`, `/a/b/**`, `/a/**` and `/**`.
    /// Patterns have no wilds.
    pub fn wilds(&self) -> Vec<Self> {
        if !self.is_exact() {
            return Vec::new();
        }
        let depth = self.depth();
        let mut wilds = Vec::with_capacity(depth + 1);
        let prefix = &self.inner.segments[..depth - 1];

        let mut single = prefix.to_vec();
        single.push(WILD.to_owned());
        wilds.push(Self::from_segments(single, ChannelKind::Wild));

        for literal in (0..depth).rev() {
            let mut deep = self.inner.segments[..literal].to_vec();
            deep.push(DEEP_WILD.to_owned());
            wilds.push(Self::from_segments(deep, ChannelKind::DeepWild));
        }
        wilds
    }

    /// Bind this pattern against a concrete channel.
    ///
    /// Template parameters bind to the segment at the same position, `*`
    /// binds the last segment under the key `"*"` and `**` binds the
    /// remaining segments, joined with `/`, under the key `"**"`.
    ///
    /// A mismatch yields an empty map. Callers tell "no match" from "match
    /// without parameters" by comparing against [`ChannelId::parameters`].
    pub fn bind(&self, concrete: &Self) -> Bindings {
        let mut bindings = Bindings::new();
        if !concrete.is_exact() || !self.matches(concrete) {
            return bindings;
        }
        let depth = self.depth();
        match self.inner.kind {
            ChannelKind::Exact => {},
            ChannelKind::Wild => {
                bindings.insert(WILD.to_owned(), concrete.segments()[depth - 1].clone());
            },
            ChannelKind::DeepWild => {
                bindings.insert(DEEP_WILD.to_owned(), concrete.segments()[depth - 1..].join("/"));
            },
            ChannelKind::Template => {
                let literal = depth - self.inner.parameters.len();
                for (parameter, value) in
                    self.inner.parameters.iter().zip(&concrete.segments()[literal..])
                {
                    bindings.insert(parameter.clone(), value.clone());
                }
            },
        }
        bindings
    }

    /// The channel a registration for this channel must listen on.
    ///
    /// For templates, `declared` must name the template parameters in order;
    /// the result is the regular part followed by `*` when there is a single
    /// parameter, or `**` when there are two or more. Other channels listen
    /// on themselves and accept no declared parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParameterCountMismatch`] if `declared` differs from
    /// the template parameters.
    pub fn listening_channel<S: AsRef<str>>(&self, declared: &[S]) -> Result<Self> {
        let expected = self.parameters();
        let matching = declared.len() == expected.len()
            && declared.iter().zip(expected).all(|(d, e)| d.as_ref() == e);
        if !matching {
            return Err(Error::ParameterCountMismatch {
                channel: self.inner.name.clone(),
                declared: declared.iter().map(|d| d.as_ref().to_owned()).collect(),
                expected: expected.to_vec(),
            });
        }
        if !self.is_template() {
            return Ok(self.clone());
        }

        let wild = if expected.len() < 2 { WILD } else { DEEP_WILD };
        Self::parse(format!("{}{SEPARATOR}{wild}", self.regular_part()))
    }
}

fn template_parameter(segment: &str) -> Option<&str> {
    let name = segment.strip_prefix('{')?.strip_suffix('}')?;
    let valid = !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
    valid.then_some(name)
}

impl PartialEq for ChannelId {
    fn eq(&self, other: &Self) -> bool {
        self.inner.name == other.inner.name
    }
}

impl Eq for ChannelId {}

impl Hash for ChannelId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.name.hash(state);
    }
}

impl PartialOrd for ChannelId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChannelId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.inner.name.cmp(&other.inner.name)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.inner.name)
    }
}

impl AsRef<str> for ChannelId {
    fn as_ref(&self) -> &str {
        &self.inner.name
    }
}

impl FromStr for ChannelId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for ChannelId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<String> for ChannelId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl Serialize for ChannelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.inner.name)
    }
}

impl<'de> Deserialize<'de> for ChannelId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Self::parse(name).map_err(serde::de::Error::custom)
    }
}
