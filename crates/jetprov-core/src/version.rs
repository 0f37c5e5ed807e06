use anyhow::{anyhow, Result};
use semver::Version;

/// Parses the leading `major[.minor[.patch]]` of a Python-style version,
/// ignoring suffixes like `a0+07cecf4168.nv24.05` or `.post1`.
pub fn leading_version(input: &str) -> Result<Version> {
    let mut parts = [0_u64; 3];
    let mut parsed = 0;
    for (slot, component) in input.trim().split('.').take(3).enumerate() {
        let digits = component
            .bytes()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits == 0 {
            break;
        }
        parts[slot] = component[..digits]
            .parse()
            .map_err(|_| anyhow!("version component out of range in '{input}'"))?;
        parsed += 1;
        if digits != component.len() {
            break;
        }
    }

    if parsed == 0 {
        return Err(anyhow!("not a version string: '{input}'"));
    }
    Ok(Version::new(parts[0], parts[1], parts[2]))
}
