use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::group::{FileGroupMap, SeqInfoRow};
use crate::plan::ConversionPlan;

/// On-disk layout of one subject's persisted discovery state, rooted at the
/// `info` directory under the subject's output tree.
#[derive(Debug, Clone)]
pub struct InfoPaths {
    pub info_dir: PathBuf,
    pub dicominfo: PathBuf,
    pub filegroup: PathBuf,
    pub auto_plan: PathBuf,
    pub edit_plan: PathBuf,
}

impl InfoPaths {
    pub fn new(outdir: &Path, anon_subject: &str, subject: &str) -> Self {
        let info_dir = outdir.join(anon_subject).join("info");
        Self {
            dicominfo: info_dir.join("dicominfo.txt"),
            filegroup: info_dir.join("filegroup.json"),
            auto_plan: info_dir.join(format!("{}.auto.txt", subject)),
            edit_plan: info_dir.join(format!("{}.edit.txt", subject)),
            info_dir,
        }
    }
}

/// Resume path: when the user-editable plan exists it wins outright and
/// discovery is skipped. Returns None when there is nothing to resume from.
pub fn resolve(paths: &InfoPaths) -> Result<Option<(ConversionPlan, FileGroupMap)>> {
    if !paths.edit_plan.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&paths.edit_plan)
        .with_context(|| format!("failed to read {}", paths.edit_plan.display()))?;
    let plan = ConversionPlan::from_text(&text)
        .with_context(|| format!("failed to parse {}", paths.edit_plan.display()))?;

    let file = File::open(&paths.filegroup)
        .with_context(|| format!("failed to open {}", paths.filegroup.display()))?;
    let file_groups: FileGroupMap = serde_json::from_reader(file)
        .with_context(|| format!("failed to parse {}", paths.filegroup.display()))?;

    info!(edit_plan = %paths.edit_plan.display(), "resuming from edited plan");
    Ok(Some((plan, file_groups)))
}

/// Persist the discovery artifacts. The auto plan is write-once and the edit
/// plan is only seeded when absent; the store never touches an existing edit
/// copy again.
pub fn persist(
    paths: &InfoPaths,
    rows: &[SeqInfoRow],
    file_groups: &FileGroupMap,
    plan: &ConversionPlan,
    heuristic_name: &str,
    heuristic_source: Option<&Path>,
) -> Result<()> {
    std::fs::create_dir_all(&paths.info_dir)
        .with_context(|| format!("failed to create {}", paths.info_dir.display()))?;

    write_dicominfo(&paths.dicominfo, rows)?;

    let file = File::create(&paths.filegroup)
        .with_context(|| format!("failed to create {}", paths.filegroup.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), file_groups)?;

    let text = plan.to_text()?;
    if !paths.auto_plan.exists() {
        std::fs::write(&paths.auto_plan, &text)
            .with_context(|| format!("failed to write {}", paths.auto_plan.display()))?;
    }
    if !paths.edit_plan.exists() {
        std::fs::write(&paths.edit_plan, &text)
            .with_context(|| format!("failed to write {}", paths.edit_plan.display()))?;
    }

    // Provenance: the heuristic module itself, or just its name for
    // built-ins selected by name.
    match heuristic_source {
        Some(source) => {
            let dest = paths.info_dir.join(
                source
                    .file_name()
                    .context("heuristic source has no file name")?,
            );
            std::fs::copy(source, &dest)
                .with_context(|| format!("failed to copy heuristic to {}", dest.display()))?;
        }
        None => {
            std::fs::write(paths.info_dir.join("heuristic.txt"), format!("{}\n", heuristic_name))?;
        }
    }

    info!(info_dir = %paths.info_dir.display(), series = rows.len(), "discovery persisted");
    Ok(())
}

fn write_dicominfo(path: &Path, rows: &[SeqInfoRow]) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut w = BufWriter::new(file);
    writeln!(
        w,
        "total_files_till_now\texample_file\tseries_label\toutput_name\toutput_type\tdim1\tdim2\tdim3\tdim4\tfile_count\tTR\tTE\tprotocol\tis_motion_corrected"
    )?;
    for row in rows {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            row.total_files_till_now,
            row.example_file,
            row.series_label,
            row.output_name,
            row.output_type,
            row.dims[0],
            row.dims[1],
            row.dims[2],
            row.dims[3],
            row.file_count,
            row.repetition_time_s,
            row.echo_time_ms,
            row.protocol,
            row.motion_corrected
        )?;
    }
    Ok(())
}
