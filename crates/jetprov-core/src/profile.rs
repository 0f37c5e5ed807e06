use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context};
use jetprov_security::is_sha256_hex;
use serde::{Deserialize, Serialize};

use crate::artifact::WheelArtifact;
use crate::revision::parse_revision;

/// Pinned URLs, versions and package lists for every runbook.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProvisionProfile {
    pub pytorch: PytorchProfile,
    pub vscode: VscodeProfile,
    pub snap: SnapProfile,
    pub terminal_font: TerminalFontProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PytorchProfile {
    pub python_version: String,
    pub system_packages: Vec<String>,
    pub auxiliary_packages: Vec<String>,
    pub cache_dir_name: String,
    pub workspace_dir_name: String,
    pub venv_name: String,
    pub numpy_major_limit: u64,
    pub cusparselt: CusparseltProfile,
    pub wheels: Vec<WheelArtifact>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CusparseltProfile {
    pub keyring_url: String,
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VscodeProfile {
    pub deb_url: String,
    pub package_name: String,
    pub prerequisite_packages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SnapProfile {
    pub snap_name: String,
    pub default_revision: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TerminalFontProfile {
    pub default_font: String,
    pub profiles_schema: String,
    pub profile_path_prefix: String,
}

impl Default for PytorchProfile {
    fn default() -> Self {
        Self {
            python_version: "3.10".to_string(),
            system_packages: [
                "python3-pip",
                "libopenblas-dev",
                "libjpeg-dev",
                "zlib1g-dev",
                "libpython3-dev",
                "libavcodec-dev",
                "libavformat-dev",
                "libswscale-dev",
                "git",
                "wget",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            auxiliary_packages: vec!["numpy<2".to_string(), "pillow".to_string()],
            cache_dir_name: "jetson-wheels".to_string(),
            workspace_dir_name: "workspace".to_string(),
            venv_name: "torch-venv".to_string(),
            numpy_major_limit: 2,
            cusparselt: CusparseltProfile::default(),
            wheels: vec![
                WheelArtifact {
                    name: "torch".to_string(),
                    url: "https://developer.download.nvidia.com/compute/redist/jp/v60/pytorch/torch-2.4.0a0+07cecf4168.nv24.05.14710581-cp310-cp310-linux_aarch64.whl".to_string(),
                    sha256: None,
                    file_name: None,
                },
                WheelArtifact {
                    name: "torchvision".to_string(),
                    url: "https://pypi.jetson-ai-lab.dev/jp6/cu122/torchvision-0.19.0a0+48b1edf-cp310-cp310-linux_aarch64.whl".to_string(),
                    sha256: None,
                    file_name: None,
                },
                WheelArtifact {
                    name: "onnxruntime-gpu".to_string(),
                    url: "https://pypi.jetson-ai-lab.dev/jp6/cu122/onnxruntime_gpu-1.18.0-cp310-cp310-linux_aarch64.whl".to_string(),
                    sha256: None,
                    file_name: None,
                },
            ],
        }
    }
}

impl Default for CusparseltProfile {
    fn default() -> Self {
        Self {
            keyring_url: "https://developer.download.nvidia.com/compute/cuda/repos/ubuntu2204/arm64/cuda-keyring_1.1-1_all.deb".to_string(),
            packages: vec!["libcusparselt0".to_string(), "libcusparselt-dev".to_string()],
        }
    }
}

impl Default for VscodeProfile {
    fn default() -> Self {
        Self {
            deb_url: "https://update.code.visualstudio.com/latest/linux-deb-arm64/stable"
                .to_string(),
            package_name: "code".to_string(),
            prerequisite_packages: vec![
                "wget".to_string(),
                "gpg".to_string(),
                "apt-transport-https".to_string(),
            ],
        }
    }
}

impl Default for SnapProfile {
    fn default() -> Self {
        Self {
            snap_name: "snapd".to_string(),
            default_revision: "24724".to_string(),
        }
    }
}

impl Default for TerminalFontProfile {
    fn default() -> Self {
        Self {
            default_font: "Monospace 12".to_string(),
            profiles_schema: "org.gnome.Terminal.ProfilesList".to_string(),
            profile_path_prefix: "/org/gnome/terminal/legacy/profiles:/:".to_string(),
        }
    }
}

impl ProvisionProfile {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let profile: Self = toml::from_str(input).context("failed to parse jetprov profile")?;
        profile.validate()?;
        Ok(profile)
    }

    /// Reads `path` when given, otherwise returns the built-in profile.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read profile: {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid profile: {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.pytorch.validate()?;
        if self.vscode.package_name.trim().is_empty() {
            return Err(anyhow!("vscode.package_name must not be empty"));
        }
        validate_download_url(&self.vscode.deb_url).context("invalid vscode.deb_url")?;
        if self.snap.snap_name.trim().is_empty() {
            return Err(anyhow!("snap.snap_name must not be empty"));
        }
        parse_revision(&self.snap.default_revision)
            .map_err(|err| anyhow!("invalid snap.default_revision: {err}"))?;
        if self.terminal_font.profiles_schema.trim().is_empty() {
            return Err(anyhow!("terminal_font.profiles_schema must not be empty"));
        }
        if !self.terminal_font.profile_path_prefix.starts_with('/') {
            return Err(anyhow!(
                "terminal_font.profile_path_prefix must be an absolute dconf path: {}",
                self.terminal_font.profile_path_prefix
            ));
        }
        Ok(())
    }
}

impl PytorchProfile {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.python_version.trim().is_empty()
            || !self
                .python_version
                .split('.')
                .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(anyhow!(
                "pytorch.python_version must look like '3.10': {}",
                self.python_version
            ));
        }
        if self.wheels.is_empty() {
            return Err(anyhow!("pytorch.wheels must list at least one wheel"));
        }
        if self.numpy_major_limit == 0 {
            return Err(anyhow!("pytorch.numpy_major_limit must be positive"));
        }
        validate_download_url(&self.cusparselt.keyring_url)
            .context("invalid pytorch.cusparselt.keyring_url")?;

        let mut seen_file_names = HashSet::new();
        for wheel in &self.wheels {
            if wheel.name.trim().is_empty() {
                return Err(anyhow!("wheel name must not be empty: {}", wheel.url));
            }
            validate_download_url(&wheel.url)
                .with_context(|| format!("invalid url for wheel '{}'", wheel.name))?;
            let file_name = wheel.cache_file_name()?;
            if !file_name.ends_with(".whl") || file_name.contains('/') {
                return Err(anyhow!(
                    "wheel '{}' must resolve to a '.whl' file name, got '{}'",
                    wheel.name,
                    file_name
                ));
            }
            if !seen_file_names.insert(file_name.clone()) {
                return Err(anyhow!("duplicate wheel file name '{file_name}'"));
            }
            if let Some(sha256) = wheel.sha256.as_deref() {
                if !is_sha256_hex(sha256) {
                    return Err(anyhow!(
                        "wheel '{}' sha256 must be 64 hex characters",
                        wheel.name
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn python_executable_name(&self) -> String {
        format!("python{}", self.python_version)
    }
}

fn validate_download_url(url: &str) -> anyhow::Result<()> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("url must not be empty"));
    }
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return Err(anyhow!("url must use http or https: {url}"));
    }
    Ok(())
}
