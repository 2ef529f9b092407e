use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::group::SeqInfoRow;
use crate::plan::{ConversionItem, ConversionPlan, PlanEntry, SeriesRef};
use crate::scan::ScanMeta;

/// The pluggable heuristic capability set. Only `derive_plan` is required;
/// the optional hooks default to no-ops.
pub trait Heuristic {
    fn name(&self) -> &'static str;

    /// Map the ordered series summary to a conversion plan. The returned
    /// structure is not validated here; a malformed plan surfaces at
    /// serialization or expansion time.
    fn derive_plan(&self, rows: &[SeqInfoRow]) -> Result<ConversionPlan>;

    /// Per-file veto applied during grouping, before series assignment.
    fn exclude_file(&self, _meta: &ScanMeta) -> bool {
        false
    }

    /// Invoked once per item after all its output types are handled.
    /// Failures are not caught by the orchestrator.
    fn post_convert(&self, _item: &ConversionItem) -> Result<()> {
        Ok(())
    }

    /// Default output suffix for plans that leave outtypes empty.
    fn output_suffix(&self) -> Option<&'static str> {
        None
    }
}

/// A loaded heuristic plus the source file to copy into the info directory
/// for provenance (None for built-ins selected by name).
pub struct LoadedHeuristic {
    pub heuristic: Box<dyn Heuristic>,
    pub source: Option<PathBuf>,
}

/// Resolve a heuristic by registry name or by filesystem path (selected by
/// file stem). An unknown name or unreadable path is a fatal configuration
/// error.
pub fn load(spec: &str) -> Result<LoadedHeuristic> {
    let path = Path::new(spec);
    let (name, source) = if path.exists() {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string())
            .unwrap_or_default();
        (stem, Some(path.to_path_buf()))
    } else {
        (spec.to_string(), None)
    };

    let heuristic: Box<dyn Heuristic> = match name.as_str() {
        "convertall" => Box::new(ConvertAll),
        other => bail!("unknown heuristic {:?}", other),
    };
    Ok(LoadedHeuristic { heuristic, source })
}

/// Built-in catch-all heuristic: every discovered series becomes one output
/// named `{subject}/{label}`.
pub struct ConvertAll;

impl Heuristic for ConvertAll {
    fn name(&self) -> &'static str {
        "convertall"
    }

    fn derive_plan(&self, rows: &[SeqInfoRow]) -> Result<ConversionPlan> {
        let suffix = self.output_suffix().unwrap_or("nii.gz");
        let entries = rows
            .iter()
            .map(|row| PlanEntry {
                template: format!("{{subject}}/{}", row.series_label),
                outtypes: vec![suffix.to_string()],
                series: vec![SeriesRef::Single(row.series_label.clone())],
            })
            .collect();
        Ok(ConversionPlan { entries })
    }

    fn output_suffix(&self) -> Option<&'static str> {
        Some("nii.gz")
    }
}
