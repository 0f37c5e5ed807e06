use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::capability::compute_capability_label;
use crate::version::leading_version;

/// Prints one JSON object describing the installed GPU Python stack.
pub const RUNTIME_PROBE_SCRIPT: &str = r#"import json
report = {}
import torch
report["torch_version"] = torch.__version__
report["cuda_available"] = bool(torch.cuda.is_available())
report["cuda_version"] = torch.version.cuda
report["cudnn_version"] = torch.backends.cudnn.version() if torch.backends.cudnn.is_available() else None
if report["cuda_available"]:
    report["device_name"] = torch.cuda.get_device_name(0)
    report["compute_capability"] = list(torch.cuda.get_device_capability(0))
import torchvision
report["torchvision_version"] = torchvision.__version__
import onnxruntime
report["onnxruntime_version"] = onnxruntime.__version__
report["onnxruntime_providers"] = onnxruntime.get_available_providers()
import numpy
report["numpy_version"] = numpy.__version__
print(json.dumps(report))
"#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeProbeReport {
    pub torch_version: String,
    pub cuda_available: bool,
    #[serde(default)]
    pub cuda_version: Option<String>,
    #[serde(default)]
    pub cudnn_version: Option<u64>,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub compute_capability: Option<(u32, u32)>,
    pub torchvision_version: String,
    pub onnxruntime_version: String,
    #[serde(default)]
    pub onnxruntime_providers: Vec<String>,
    pub numpy_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeEvaluation {
    pub lines: Vec<String>,
    pub warnings: Vec<String>,
}

impl RuntimeProbeReport {
    /// Parses the last non-empty stdout line; imports may print banners first.
    pub fn from_probe_output(stdout: &str) -> Result<Self> {
        let line = stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .ok_or_else(|| anyhow!("runtime probe produced no output"))?;
        serde_json::from_str(line)
            .with_context(|| format!("runtime probe output is not a valid report: {line}"))
    }
}

pub fn evaluate_runtime_probe(
    report: &RuntimeProbeReport,
    numpy_major_limit: u64,
) -> Result<ProbeEvaluation> {
    if !report.cuda_available {
        return Err(anyhow!(
            "torch {} reports CUDA unavailable; the GPU build was not picked up",
            report.torch_version
        ));
    }

    let numpy = leading_version(&report.numpy_version)
        .with_context(|| format!("invalid numpy version '{}'", report.numpy_version))?;
    if numpy.major >= numpy_major_limit {
        return Err(anyhow!(
            "numpy {} is not supported by the Jetson wheels; major version must be below {}",
            report.numpy_version,
            numpy_major_limit
        ));
    }

    let mut lines = vec![
        format!("torch: {}", report.torch_version),
        format!(
            "cuda: {} (cuDNN {})",
            report.cuda_version.as_deref().unwrap_or("unknown"),
            report
                .cudnn_version
                .map(|value| value.to_string())
                .unwrap_or_else(|| "unavailable".to_string())
        ),
    ];
    if let Some(device) = report.device_name.as_deref() {
        lines.push(format!("device: {device}"));
    }
    if let Some((major, minor)) = report.compute_capability {
        lines.push(format!(
            "compute capability: {major}.{minor} ({})",
            compute_capability_label(major, minor)
        ));
    }
    lines.push(format!("torchvision: {}", report.torchvision_version));
    lines.push(format!(
        "onnxruntime: {} [{}]",
        report.onnxruntime_version,
        report.onnxruntime_providers.join(", ")
    ));
    lines.push(format!("numpy: {}", report.numpy_version));

    let mut warnings = Vec::new();
    if !report
        .onnxruntime_providers
        .iter()
        .any(|provider| provider == "CUDAExecutionProvider")
    {
        warnings.push(format!(
            "onnxruntime {} has no CUDAExecutionProvider; inference will run on CPU",
            report.onnxruntime_version
        ));
    }

    Ok(ProbeEvaluation { lines, warnings })
}
