use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::group::FileGroupMap;

/// Reference to the series feeding one output: either a single series label
/// or several labels merged into one volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeriesRef {
    Single(String),
    Merged(Vec<String>),
}

impl SeriesRef {
    fn labels(&self) -> Vec<&str> {
        match self {
            SeriesRef::Single(label) => vec![label.as_str()],
            SeriesRef::Merged(labels) => labels.iter().map(|l| l.as_str()).collect(),
        }
    }
}

/// One planned output: a name template, the requested output types and the
/// series that produce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub template: String,
    pub outtypes: Vec<String>,
    pub series: Vec<SeriesRef>,
}

/// The conversion plan as returned by the heuristic and persisted to the
/// auto/edit files. The serialization is order-preserving pretty JSON so the
/// edit copy survives hand modification with exact round-trip fidelity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversionPlan {
    pub entries: Vec<PlanEntry>,
}

impl ConversionPlan {
    pub fn to_text(&self) -> Result<String> {
        let mut text = serde_json::to_string_pretty(self).context("plan is not serializable")?;
        text.push('\n');
        Ok(text)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("malformed conversion plan")
    }
}

/// Target flavor of one planned output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    Dicom,
    Nifti,
    NiftiGz,
}

impl OutputType {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputType::Dicom => "dicom",
            OutputType::Nifti => "nii",
            OutputType::NiftiGz => "nii.gz",
        }
    }
}

impl FromStr for OutputType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dicom" => Ok(OutputType::Dicom),
            "nii" => Ok(OutputType::Nifti),
            "nii.gz" => Ok(OutputType::NiftiGz),
            other => bail!("unknown output type {:?}", other),
        }
    }
}

/// One resolved unit of conversion work; rebuilt fresh on every run.
#[derive(Debug, Clone)]
pub struct ConversionItem {
    pub prefix: PathBuf,
    pub outtypes: Vec<OutputType>,
    pub files: Vec<PathBuf>,
}

/// Expand the plan against the file-group map into concrete work items.
/// `{subject}` resolves to the (possibly anonymized) subject id and `{item}`
/// to the 1-based index within a multi-series entry; a multi-series entry
/// without `{item}` gets a numeric suffix to keep prefixes distinct.
/// A plan referencing an unknown series label is fatal here, not earlier.
pub fn expand_plan(
    plan: &ConversionPlan,
    file_groups: &FileGroupMap,
    conv_outdir: &Path,
    subject: &str,
) -> Result<Vec<ConversionItem>> {
    let mut items = Vec::new();
    for entry in &plan.entries {
        let outtypes = entry
            .outtypes
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<OutputType>>>()
            .with_context(|| format!("bad output type in plan entry {:?}", entry.template))?;

        for (index, series_ref) in entry.series.iter().enumerate() {
            let mut files = Vec::new();
            for label in series_ref.labels() {
                let group = file_groups.get(label).with_context(|| {
                    format!("plan references unknown series {:?}", label)
                })?;
                files.extend(group.iter().cloned());
            }

            let mut name = entry
                .template
                .replace("{subject}", subject)
                .replace("{item}", &(index + 1).to_string());
            if entry.series.len() > 1 && !entry.template.contains("{item}") {
                name.push_str(&format!("_{}", index + 1));
            }

            items.push(ConversionItem {
                prefix: conv_outdir.join(name),
                outtypes: outtypes.clone(),
                files,
            });
        }
    }
    Ok(items)
}
