use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// A prebuilt wheel pinned by URL, cached under the target user's cache dir.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WheelArtifact {
    /// Distribution name as pip knows it, used for the pre-install uninstall.
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub sha256: Option<String>,
    /// Overrides the cache file name derived from the URL.
    #[serde(default)]
    pub file_name: Option<String>,
}

impl WheelArtifact {
    pub fn cache_file_name(&self) -> Result<String> {
        if let Some(name) = self.file_name.as_deref() {
            return Ok(name.to_string());
        }
        file_name_from_url(&self.url)
            .ok_or_else(|| anyhow!("cannot derive a file name from wheel url: {}", self.url))
    }
}

fn file_name_from_url(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment
        .split('?')
        .next()
        .unwrap_or(without_fragment);
    let last = without_query.rsplit('/').next().unwrap_or("");
    if last.is_empty() {
        return None;
    }
    Some(percent_decode(last))
}

// Wheel names carry local version tags such as `+nv24.05`, which hosts
// serve as `%2B`.
fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' && index + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[index + 1..index + 3]).ok();
            if let Some(byte) = hex.and_then(|hex| u8::from_str_radix(hex, 16).ok()) {
                decoded.push(byte);
                index += 3;
                continue;
            }
        }
        decoded.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}
