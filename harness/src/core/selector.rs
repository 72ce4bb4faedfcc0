//! Minimal selector syntax for scenario targets.
//!
//! Supported forms: `#id`, `.class`, `tag`, `[attr]`, `[attr="value"]`.
//! Compound and descendant selectors are not supported.

use std::fmt;
use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\[([A-Za-z_][\w-]*)(?:="([^"]*)")?\]$"#).unwrap()
});

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_][\w-]*$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    Id(String),
    Class(String),
    Tag(String),
    Attr { name: String, value: Option<String> },
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if let Some(rest) = input.strip_prefix('#') {
            if !NAME_RE.is_match(rest) {
                bail!("invalid id selector '{input}'");
            }
            return Ok(Selector::Id(rest.to_string()));
        }
        if let Some(rest) = input.strip_prefix('.') {
            if !NAME_RE.is_match(rest) {
                bail!("invalid class selector '{input}'");
            }
            return Ok(Selector::Class(rest.to_string()));
        }
        if let Some(caps) = ATTR_RE.captures(input) {
            return Ok(Selector::Attr {
                name: caps[1].to_string(),
                value: caps.get(2).map(|m| m.as_str().to_string()),
            });
        }
        if NAME_RE.is_match(input) {
            return Ok(Selector::Tag(input.to_ascii_lowercase()));
        }
        bail!("unsupported selector '{input}'")
    }

    pub fn attr(name: &str, value: &str) -> Self {
        Selector::Attr {
            name: name.to_string(),
            value: Some(value.to_string()),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Id(id) => write!(f, "#{id}"),
            Selector::Class(class) => write!(f, ".{class}"),
            Selector::Tag(tag) => write!(f, "{tag}"),
            Selector::Attr { name, value: None } => write!(f, "[{name}]"),
            Selector::Attr {
                name,
                value: Some(value),
            } => write!(f, "[{name}=\"{value}\"]"),
        }
    }
}
