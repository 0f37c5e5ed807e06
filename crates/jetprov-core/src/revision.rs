use std::fmt;

/// A snap revision number, kept as text because snapd treats it as an
/// opaque identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision(String);

impl Revision {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accepts only `^[0-9]+$`. Usable directly as a clap `value_parser`.
pub fn parse_revision(input: &str) -> Result<Revision, String> {
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("revision must be a positive integer, got '{input}'"));
    }
    Ok(Revision(input.to_string()))
}

/// Accepts a Pango font description ending in a point size, e.g.
/// `Monospace 12` or `Ubuntu Mono 13.5`.
pub fn parse_font_spec(input: &str) -> Result<String, String> {
    let trimmed = input.trim();
    let Some((family, size)) = trimmed.rsplit_once(' ') else {
        return Err(format!(
            "font must be '<family> <size>', e.g. 'Monospace 12', got '{input}'"
        ));
    };
    if family.trim().is_empty() {
        return Err(format!("font family must not be empty, got '{input}'"));
    }
    let valid_size = size
        .parse::<f32>()
        .is_ok_and(|value| value.is_finite() && value > 0.0)
        && size.bytes().all(|b| b.is_ascii_digit() || b == b'.');
    if !valid_size {
        return Err(format!("font size must be a positive number, got '{size}'"));
    }
    if trimmed.contains('\'') {
        return Err(format!("font must not contain single quotes, got '{input}'"));
    }
    Ok(trimmed.to_string())
}
