//! Checkpoint configuration
//!
//! A checkpoint request carries three optional settings:
//!
//! - `target`: tables to checkpoint; empty means "every table"
//! - `name`: checkpoint name; absent or empty means the internal name
//! - `drop`: checkpoints to delete, each a bare name, `from=<name>`,
//!   `to=<name>` or `from=all`
//!
//! The configuration can be built three ways: with the builder methods, from
//! the engine's configuration-string grammar, or from TOML.
//!
//! ```text
//! target=("table:orders","table:users"),name=daily,drop=(old,from=v1)
//! ```
//!
//! ```toml
//! target = ["table:orders"]
//! name = "daily"
//! drop = ["old", { from = "v1" }, { to = "v2" }]
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

/// One entry of the `target` list
///
/// `trailing` holds any content that followed the identifier, which is
/// almost always an unquoted URI that the parser split at `=`. The
/// coordinator rejects such entries before touching any table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TargetEntry {
    /// Table identifier
    pub uri: String,
    /// Unexpected content after the identifier
    pub trailing: Option<String>,
}

impl TargetEntry {
    /// Create a well-formed target
    pub fn new(uri: impl Into<String>) -> Self {
        TargetEntry {
            uri: uri.into(),
            trailing: None,
        }
    }
}

impl From<String> for TargetEntry {
    fn from(raw: String) -> Self {
        match raw.split_once('=') {
            Some((uri, rest)) => TargetEntry {
                uri: uri.to_string(),
                trailing: Some(rest.to_string()),
            },
            None => TargetEntry {
                uri: raw,
                trailing: None,
            },
        }
    }
}

impl From<TargetEntry> for String {
    fn from(entry: TargetEntry) -> Self {
        entry.to_string()
    }
}

impl fmt::Display for TargetEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.trailing {
            Some(rest) => write!(f, "{}={}", self.uri, rest),
            None => write!(f, "{}", self.uri),
        }
    }
}

/// One entry of the `drop` clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DropSpec {
    /// Drop every checkpoint with this name
    Named(String),
    /// Drop from the first checkpoint with this name to the end (`all` drops everything)
    From {
        /// Start of the range
        from: String,
    },
    /// Drop from the start through the last checkpoint with this name
    To {
        /// End of the range
        to: String,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDropSpec {
    Named(String),
    Keyed(BTreeMap<String, String>),
}

// A keyed entry carries exactly one of `from` or `to`
impl<'de> Deserialize<'de> for DropSpec {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error as _;

        let keyed = match RawDropSpec::deserialize(deserializer)? {
            RawDropSpec::Named(name) => return Ok(DropSpec::Named(name)),
            RawDropSpec::Keyed(keyed) => keyed,
        };
        if keyed.len() == 1 {
            if let Some(from) = keyed.get("from") {
                return Ok(DropSpec::From { from: from.clone() });
            }
            if let Some(to) = keyed.get("to") {
                return Ok(DropSpec::To { to: to.clone() });
            }
        }
        let keys: Vec<&str> = keyed.keys().map(String::as_str).collect();
        Err(D::Error::custom(format!(
            "unexpected value for checkpoint key: drop {{{}}}",
            keys.join(", ")
        )))
    }
}

impl DropSpec {
    /// The checkpoint name this entry refers to
    pub fn name(&self) -> &str {
        match self {
            DropSpec::Named(name) => name,
            DropSpec::From { from } => from,
            DropSpec::To { to } => to,
        }
    }
}

/// Configuration for a single checkpoint request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointConfig {
    /// Explicit targets; empty means every table
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target: Vec<TargetEntry>,
    /// Checkpoint name; `None` or empty means the internal name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Checkpoints to delete
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drop: Vec<DropSpec>,
}

impl CheckpointConfig {
    /// Create an empty configuration (unnamed checkpoint of every open table)
    pub fn new() -> Self {
        CheckpointConfig::default()
    }

    /// Set the checkpoint name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add an explicit target
    pub fn with_target(mut self, uri: impl Into<String>) -> Self {
        self.target.push(TargetEntry::new(uri));
        self
    }

    /// Drop every checkpoint with this name
    pub fn drop_named(mut self, name: impl Into<String>) -> Self {
        self.drop.push(DropSpec::Named(name.into()));
        self
    }

    /// Drop from the first checkpoint with this name to the end
    pub fn drop_from(mut self, name: impl Into<String>) -> Self {
        self.drop.push(DropSpec::From { from: name.into() });
        self
    }

    /// Drop from the start through the last checkpoint with this name
    pub fn drop_to(mut self, name: impl Into<String>) -> Self {
        self.drop.push(DropSpec::To { to: name.into() });
        self
    }

    /// The explicit checkpoint name, if one was supplied
    pub fn checkpoint_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }

    /// True if the request includes a `drop` clause
    pub fn has_drop(&self) -> bool {
        !self.drop.is_empty()
    }

    /// True if the request must also reach tables that are not open
    ///
    /// Naming or dropping checkpoints has to be durable for every table, not
    /// just the ones currently in memory.
    pub fn reaches_closed_tables(&self) -> bool {
        self.checkpoint_name().is_some() || self.has_drop()
    }

    /// Parse a configuration string
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for syntax errors, unknown keys and
    /// unknown `drop` entries.
    pub fn parse(input: &str) -> Result<Self> {
        let items = Parser::new(input).parse_all()?;
        let mut config = CheckpointConfig::default();

        for item in items {
            match item.key.as_str() {
                "target" => match item.value {
                    Some(ConfigValue::List(entries)) => {
                        for entry in entries {
                            config.target.push(TargetEntry {
                                uri: entry.key,
                                trailing: entry.value.map(|v| v.to_string()),
                            });
                        }
                    }
                    Some(ConfigValue::Scalar(s)) if s.is_empty() => {}
                    Some(ConfigValue::Scalar(s)) => config.target.push(TargetEntry::new(s)),
                    None => {}
                },
                "name" => match item.value {
                    Some(ConfigValue::Scalar(s)) => config.name = Some(s),
                    Some(ConfigValue::List(_)) => {
                        return Err(Error::invalid_input(
                            "checkpoint name must be a string",
                        ))
                    }
                    None => {}
                },
                "drop" => {
                    let entries = match item.value {
                        Some(ConfigValue::List(entries)) => entries,
                        Some(ConfigValue::Scalar(s)) if s.is_empty() => Vec::new(),
                        Some(ConfigValue::Scalar(s)) => vec![ConfigItem {
                            key: s,
                            value: None,
                        }],
                        None => Vec::new(),
                    };
                    for entry in entries {
                        config.drop.push(parse_drop_entry(entry)?);
                    }
                }
                other => {
                    return Err(Error::invalid_input(format!(
                        "unknown checkpoint configuration key: {}",
                        other
                    )))
                }
            }
        }

        Ok(config)
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            Error::invalid_input(format!("Failed to parse checkpoint configuration: {}", e))
        })
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::internal(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| {
            Error::invalid_input(format!("config file '{}': {}", path.display(), e))
        })
    }
}

fn parse_drop_entry(entry: ConfigItem) -> Result<DropSpec> {
    match entry.value {
        None => Ok(DropSpec::Named(entry.key)),
        Some(ConfigValue::Scalar(v)) if entry.key == "from" => Ok(DropSpec::From { from: v }),
        Some(ConfigValue::Scalar(v)) if entry.key == "to" => Ok(DropSpec::To { to: v }),
        Some(_) => Err(Error::invalid_input(format!(
            "unexpected value for checkpoint key: {}",
            entry.key
        ))),
    }
}

// ============================================================================
// Configuration-string grammar
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConfigValue {
    Scalar(String),
    List(Vec<ConfigItem>),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Scalar(s) => write!(f, "{}", s),
            ConfigValue::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item.key)?;
                    if let Some(v) = &item.value {
                        write!(f, "={}", v)?;
                    }
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ConfigItem {
    key: String,
    value: Option<ConfigValue>,
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser { input, pos: 0 }
    }

    fn parse_all(mut self) -> Result<Vec<ConfigItem>> {
        let items = self.parse_items()?;
        self.skip_ws();
        if let Some(c) = self.peek() {
            return Err(self.error(format!("unexpected '{}'", c)));
        }
        Ok(items)
    }

    fn parse_items(&mut self) -> Result<Vec<ConfigItem>> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None | Some(')') => break,
                Some(',') => {
                    self.pos += 1;
                    continue;
                }
                _ => {}
            }

            let (key, quoted) = self.parse_atom()?;
            let mut value = None;

            // A quoted key followed directly by more text keeps that text as
            // the value so callers can report it.
            if quoted {
                let (rest, _) = self.parse_bare();
                if !rest.is_empty() {
                    value = Some(ConfigValue::Scalar(rest));
                }
            }

            self.skip_ws();
            if value.is_none() && self.peek() == Some('=') {
                self.pos += 1;
                self.skip_ws();
                if self.peek() == Some('(') {
                    self.pos += 1;
                    let nested = self.parse_items()?;
                    self.skip_ws();
                    if self.peek() != Some(')') {
                        return Err(self.error("unbalanced parentheses".to_string()));
                    }
                    self.pos += 1;
                    value = Some(ConfigValue::List(nested));
                } else {
                    let (v, _) = self.parse_atom()?;
                    value = Some(ConfigValue::Scalar(v));
                }
            }

            items.push(ConfigItem { key, value });

            self.skip_ws();
            match self.peek() {
                None | Some(')') => break,
                Some(',') => self.pos += 1,
                Some(c) => return Err(self.error(format!("unexpected '{}'", c))),
            }
        }
        Ok(items)
    }

    /// Returns the atom and whether it was quoted
    fn parse_atom(&mut self) -> Result<(String, bool)> {
        if self.peek() == Some('"') {
            self.pos += 1;
            let start = self.pos;
            match self.input[start..].find('"') {
                Some(len) => {
                    self.pos = start + len + 1;
                    Ok((self.input[start..start + len].to_string(), true))
                }
                None => Err(self.error("unterminated string".to_string())),
            }
        } else {
            Ok(self.parse_bare())
        }
    }

    fn parse_bare(&mut self) -> (String, bool) {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, ',' | '=' | '(' | ')' | '"') || c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
        (self.input[start..self.pos].to_string(), false)
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn error(&self, msg: String) -> Error {
        Error::invalid_input(format!(
            "invalid configuration string at offset {}: {}",
            self.pos, msg
        ))
    }
}
