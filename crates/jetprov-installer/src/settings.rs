use anyhow::{anyhow, Context, Result};
use std::fmt;

use crate::command::{CommandRunner, Invocation, RunAs};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Bool(bool),
    Str(String),
    StrList(Vec<String>),
}

/// Where a setting lives: a key of an installed GSettings schema, or a raw
/// dconf path for relocatable schemas such as terminal profiles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SettingKey {
    Schema { schema: String, key: String },
    Path(String),
}

impl SettingKey {
    pub fn schema(schema: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Schema {
            schema: schema.into(),
            key: key.into(),
        }
    }

    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema { schema, key } => write!(f, "{schema} {key}"),
            Self::Path(path) => f.write_str(path),
        }
    }
}

pub trait SettingsStore {
    fn has_schema(&mut self, schema: &str) -> Result<bool>;
    /// `None` when the key holds no value.
    fn get(&mut self, key: &SettingKey) -> Result<Option<SettingValue>>;
    fn set(&mut self, key: &SettingKey, value: &SettingValue) -> Result<()>;
}

/// `gsettings` for schema keys and `dconf` for raw paths.
pub struct DesktopSettingsStore<R: CommandRunner> {
    runner: R,
    run_as: RunAs,
}

impl<R: CommandRunner> DesktopSettingsStore<R> {
    pub fn new(runner: R, run_as: RunAs) -> Self {
        Self { runner, run_as }
    }

    fn capture(&mut self, invocation: Invocation) -> Result<String> {
        self.runner.capture(&invocation.run_as(self.run_as.clone()))
    }
}

impl<R: CommandRunner> SettingsStore for DesktopSettingsStore<R> {
    fn has_schema(&mut self, schema: &str) -> Result<bool> {
        let listed = self.capture(Invocation::new("gsettings").arg("list-schemas"))?;
        Ok(listed.lines().any(|line| line.trim() == schema))
    }

    fn get(&mut self, key: &SettingKey) -> Result<Option<SettingValue>> {
        let raw = match key {
            SettingKey::Schema { schema, key } => self.capture(
                Invocation::new("gsettings")
                    .arg("get")
                    .arg(schema)
                    .arg(key),
            )?,
            SettingKey::Path(path) => {
                self.capture(Invocation::new("dconf").arg("read").arg(path))?
            }
        };
        parse_gvariant(&raw).with_context(|| format!("unexpected value for {key}: {}", raw.trim()))
    }

    fn set(&mut self, key: &SettingKey, value: &SettingValue) -> Result<()> {
        let encoded = format_gvariant(value);
        let invocation = match key {
            SettingKey::Schema { schema, key } => Invocation::new("gsettings")
                .arg("set")
                .arg(schema)
                .arg(key)
                .arg(encoded),
            SettingKey::Path(path) => Invocation::new("dconf")
                .arg("write")
                .arg(path)
                .arg(encoded),
        };
        self.runner.run(&invocation.run_as(self.run_as.clone()))
    }
}

/// Encodes a value in GVariant text format.
pub fn format_gvariant(value: &SettingValue) -> String {
    match value {
        SettingValue::Bool(value) => value.to_string(),
        SettingValue::Str(value) => quote_gvariant_string(value),
        SettingValue::StrList(values) if values.is_empty() => "@as []".to_string(),
        SettingValue::StrList(values) => format!(
            "[{}]",
            values
                .iter()
                .map(|value| quote_gvariant_string(value))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn quote_gvariant_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' || ch == '\\' {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('\'');
    quoted
}

/// Decodes the GVariant text printed by `gsettings get` / `dconf read`.
/// Only booleans, strings and string arrays are understood.
pub fn parse_gvariant(raw: &str) -> Result<Option<SettingValue>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match trimmed {
        "true" => return Ok(Some(SettingValue::Bool(true))),
        "false" => return Ok(Some(SettingValue::Bool(false))),
        _ => {}
    }

    let untyped = trimmed.strip_prefix("@as").map(str::trim_start).unwrap_or(trimmed);
    let mut parser = GvariantParser {
        chars: untyped.chars().collect(),
        position: 0,
    };
    let value = match parser.peek() {
        Some('[') => SettingValue::StrList(parser.string_list()?),
        Some('\'') | Some('"') => SettingValue::Str(parser.string()?),
        _ => return Err(anyhow!("unsupported GVariant value: {trimmed}")),
    };
    parser.skip_whitespace();
    if parser.peek().is_some() {
        return Err(anyhow!("trailing characters in GVariant value: {trimmed}"));
    }
    Ok(Some(value))
}

struct GvariantParser {
    chars: Vec<char>,
    position: usize,
}

impl GvariantParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.position += 1;
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.position += 1;
        }
    }

    fn string(&mut self) -> Result<String> {
        let quote = self
            .bump()
            .filter(|ch| *ch == '\'' || *ch == '"')
            .ok_or_else(|| anyhow!("expected a quoted string"))?;
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(anyhow!("unterminated string")),
                Some('\\') => {
                    let escaped = self
                        .bump()
                        .ok_or_else(|| anyhow!("unterminated escape sequence"))?;
                    value.push(escaped);
                }
                Some(ch) if ch == quote => return Ok(value),
                Some(ch) => value.push(ch),
            }
        }
    }

    fn string_list(&mut self) -> Result<Vec<String>> {
        self.bump();
        let mut values = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(']') {
            self.bump();
            return Ok(values);
        }
        loop {
            self.skip_whitespace();
            values.push(self.string()?);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some(']') => return Ok(values),
                _ => return Err(anyhow!("expected ',' or ']' in string array")),
            }
        }
    }
}
