use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::plan::{ConversionItem, OutputType};
use crate::scan::ScanDecoder;

/// How raw files are placed into a dicom output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    Hardlink,
    Symlink,
}

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub link_mode: LinkMode,
    pub with_prov: bool,
}

/// What one backend invocation produced. More than one volume signals an
/// acquisition with inconsistent geometry that the backend had to split.
#[derive(Debug, Default)]
pub struct ConvertOutcome {
    pub volumes: Vec<PathBuf>,
    pub bvals: Option<PathBuf>,
    pub bvecs: Option<PathBuf>,
    pub provenance: Option<PathBuf>,
}

/// External collaborator: a pixel-data conversion tool. `work_dir` is a
/// private scratch directory for this one output.
pub trait ConverterBackend {
    fn name(&self) -> &'static str;
    fn convert(
        &self,
        files: &[PathBuf],
        work_dir: &Path,
        compress: bool,
    ) -> Result<ConvertOutcome>;
}

/// External collaborator: binds acquisition metadata into a produced volume
/// and writes the companion sidecar. Failures here are tolerated.
pub trait MetadataEmbedder {
    fn embed(&self, volume: &Path, sources: &[PathBuf], sidecar: &Path) -> Result<()>;
}

/// Walk the resolved plan and drive conversion per output. Backend and
/// embedding failures are isolated per output; post-convert hook failures
/// propagate. The staging directory is removed on every exit path.
pub fn convert_items(
    items: &[ConversionItem],
    backend: Option<&dyn ConverterBackend>,
    embedder: &dyn MetadataEmbedder,
    options: &ConvertOptions,
    post_convert: Option<&dyn Fn(&ConversionItem) -> Result<()>>,
) -> Result<()> {
    let staging = TempDir::new().context("failed to create conversion staging directory")?;

    for (index, item) in items.iter().enumerate() {
        if let Some(parent) = item.prefix.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        for outtype in &item.outtypes {
            match outtype {
                OutputType::Dicom => {
                    relink_sources(item, options.link_mode)?;
                }
                OutputType::Nifti | OutputType::NiftiGz => {
                    let Some(backend) = backend else {
                        continue;
                    };
                    let work_dir = staging
                        .path()
                        .join(format!("item{}-{}", index, outtype.extension()));
                    if let Err(err) =
                        convert_one_volume(item, *outtype, backend, embedder, options, &work_dir)
                    {
                        warn!(
                            prefix = %item.prefix.display(),
                            outtype = outtype.extension(),
                            %err,
                            "conversion failed for output"
                        );
                    }
                }
            }
        }

        if let Some(hook) = post_convert {
            hook(item).with_context(|| {
                format!("post-convert hook failed for {}", item.prefix.display())
            })?;
        }
    }

    Ok(())
}

fn convert_one_volume(
    item: &ConversionItem,
    outtype: OutputType,
    backend: &dyn ConverterBackend,
    embedder: &dyn MetadataEmbedder,
    options: &ConvertOptions,
    work_dir: &Path,
) -> Result<()> {
    let dest = PathBuf::from(format!(
        "{}.{}",
        item.prefix.display(),
        outtype.extension()
    ));
    if dest.exists() {
        // Idempotent skip: an existing output is never regenerated or
        // re-touched, including its metadata.
        info!(dest = %dest.display(), "output exists, skipping");
        return Ok(());
    }

    fs::create_dir_all(work_dir)?;
    let outcome = backend.convert(&item.files, work_dir, outtype == OutputType::NiftiGz)?;

    if outcome.volumes.len() != 1 {
        warn!(
            dest = %dest.display(),
            volumes = outcome.volumes.len(),
            backend = backend.name(),
            "inconsistent geometry, output abandoned"
        );
        return Ok(());
    }

    move_file(&outcome.volumes[0], &dest)?;
    if let Some(bvals) = &outcome.bvals {
        move_file(bvals, &with_suffix(&item.prefix, "bval"))?;
    }
    if let Some(bvecs) = &outcome.bvecs {
        move_file(bvecs, &with_suffix(&item.prefix, "bvec"))?;
    }

    let sidecar = with_suffix(&item.prefix, "json");
    match embedder.embed(&dest, &item.files, &sidecar) {
        Ok(()) => {
            if sidecar.exists() {
                set_read_only(&sidecar)?;
            }
        }
        Err(err) => {
            warn!(dest = %dest.display(), %err, "metadata embedding failed");
        }
    }

    // Final per-output step, regardless of embedding outcome.
    set_read_only(&dest)?;

    if options.with_prov {
        if let Err(err) = capture_provenance(&outcome, &item.prefix) {
            warn!(prefix = %item.prefix.display(), %err, "provenance capture failed");
        }
    }

    Ok(())
}

fn capture_provenance(outcome: &ConvertOutcome, prefix: &Path) -> Result<()> {
    let Some(record) = &outcome.provenance else {
        return Ok(());
    };
    let dest = with_suffix(prefix, "prov.json");
    fs::copy(record, &dest)
        .with_context(|| format!("failed to copy provenance to {}", dest.display()))?;
    set_read_only(&dest)
}

/// Recreate `<prefix>.dicom/` from scratch and link every source file into
/// it. Existing link names are never overwritten.
fn relink_sources(item: &ConversionItem, mode: LinkMode) -> Result<()> {
    let dest_dir = with_suffix(&item.prefix, "dicom");
    if dest_dir.exists() {
        fs::remove_dir_all(&dest_dir)
            .with_context(|| format!("failed to clear {}", dest_dir.display()))?;
    }
    fs::create_dir_all(&dest_dir)?;

    for file in &item.files {
        let name = file
            .file_name()
            .with_context(|| format!("source file {} has no name", file.display()))?;
        let target = dest_dir.join(name);
        if target.exists() {
            continue;
        }
        match mode {
            LinkMode::Hardlink => fs::hard_link(file, &target)
                .with_context(|| format!("failed to hard-link {}", target.display()))?,
            LinkMode::Symlink => symlink(file, &target)
                .with_context(|| format!("failed to symlink {}", target.display()))?,
        }
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(source: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, target)
}

#[cfg(not(unix))]
fn symlink(source: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::copy(source, target).map(|_| ())
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}.{}", prefix.display(), suffix))
}

fn set_read_only(path: &Path) -> Result<()> {
    let mut perms = fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms)
        .with_context(|| format!("failed to lock {}", path.display()))
}

/// Rename with a copy fallback; the staging directory may live on a
/// different filesystem than the output tree.
fn move_file(source: &Path, dest: &Path) -> Result<()> {
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    fs::copy(source, dest)
        .with_context(|| format!("failed to place output at {}", dest.display()))?;
    fs::remove_file(source).ok();
    Ok(())
}

/// Default embedder: decodes the anchor source file and writes its metadata
/// as the JSON sidecar. Header-level embedding into the volume itself is the
/// converter's business.
pub struct SidecarEmbedder {
    decoder: Box<dyn ScanDecoder>,
}

impl SidecarEmbedder {
    pub fn new(decoder: Box<dyn ScanDecoder>) -> Self {
        Self { decoder }
    }
}

impl MetadataEmbedder for SidecarEmbedder {
    fn embed(&self, _volume: &Path, sources: &[PathBuf], sidecar: &Path) -> Result<()> {
        let anchor = sources.first().context("conversion item has no sources")?;
        let meta = self.decoder.decode(anchor)?;
        let file = fs::File::create(sidecar)
            .with_context(|| format!("failed to create {}", sidecar.display()))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &meta)?;
        Ok(())
    }
}

/// `dcm2niix` subprocess backend. Sources are staged into a private input
/// directory, the tool runs against it and produced volumes plus gradient
/// tables are collected from the work area. A command record is written
/// alongside as the provenance artifact.
pub struct Dcm2niixBackend;

impl ConverterBackend for Dcm2niixBackend {
    fn name(&self) -> &'static str {
        "dcm2niix"
    }

    fn convert(
        &self,
        files: &[PathBuf],
        work_dir: &Path,
        compress: bool,
    ) -> Result<ConvertOutcome> {
        let input_dir = work_dir.join("in");
        fs::create_dir_all(&input_dir)?;
        for file in files {
            let name = file
                .file_name()
                .with_context(|| format!("source file {} has no name", file.display()))?;
            let target = input_dir.join(name);
            if fs::hard_link(file, &target).is_err() {
                fs::copy(file, &target)
                    .with_context(|| format!("failed to stage {}", file.display()))?;
            }
        }

        let args = vec![
            "-b".to_string(),
            "n".to_string(),
            "-z".to_string(),
            if compress { "y" } else { "n" }.to_string(),
            "-f".to_string(),
            "converted".to_string(),
            "-o".to_string(),
            work_dir.display().to_string(),
            input_dir.display().to_string(),
        ];
        let status = Command::new("dcm2niix")
            .args(&args)
            .status()
            .context("failed to launch dcm2niix")?;
        if !status.success() {
            bail!("dcm2niix exited with {}", status);
        }

        let mut outcome = ConvertOutcome::default();
        let mut entries: Vec<PathBuf> = fs::read_dir(work_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        entries.sort();
        for path in entries {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !name.starts_with("converted") {
                continue;
            }
            if name.ends_with(".nii") || name.ends_with(".nii.gz") {
                outcome.volumes.push(path);
            } else if name.ends_with(".bval") {
                outcome.bvals = Some(path);
            } else if name.ends_with(".bvec") {
                outcome.bvecs = Some(path);
            }
        }

        let record = work_dir.join("prov.json");
        let body = json!({
            "tool": self.name(),
            "args": args,
            "exit_status": status.code(),
        });
        fs::write(&record, serde_json::to_string_pretty(&body)?)?;
        outcome.provenance = Some(record);

        Ok(outcome)
    }
}
