use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use tempfile::TempDir;
use tracing::info;
use walkdir::WalkDir;

use crate::scan::RawFile;

/// Result of materializing one subject's input. When the input was archived,
/// `staging` owns the extraction directory; dropping it removes every
/// extracted file, so the caller must keep it alive for the whole run.
#[derive(Debug)]
pub struct Materialized {
    pub files: Vec<RawFile>,
    pub staging: Option<TempDir>,
}

/// Expand the `{subject}` placeholder, glob the result and produce the flat
/// session-tagged file list. All matches must be either plain
/// files/directories or archives; mixing the two is a configuration error.
pub fn materialize(template: &str, subject: &str) -> Result<Materialized> {
    if !template.contains("{subject}") {
        bail!("path template {:?} has no {{subject}} placeholder", template);
    }
    let pattern = template.replace("{subject}", subject);

    let mut matches: Vec<PathBuf> = glob::glob(&pattern)
        .with_context(|| format!("invalid glob pattern {:?}", pattern))?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to read glob match")?;
    matches.sort();

    if matches.is_empty() {
        bail!("no input matched {:?}", pattern);
    }

    let archives = matches.iter().filter(|p| is_archive(p)).count();
    if archives > 0 && archives < matches.len() {
        bail!(
            "mixed archive and plain inputs for {:?} ({} archives out of {} matches)",
            pattern,
            archives,
            matches.len()
        );
    }

    if archives == 0 {
        let files = collect_plain(&matches)?;
        info!(subject, files = files.len(), "materialized plain input");
        return Ok(Materialized { files, staging: None });
    }

    let staging = TempDir::new().context("failed to create extraction directory")?;
    let multi = matches.len() > 1;
    let mut files = Vec::new();
    for (index, archive) in matches.iter().enumerate() {
        let dest = staging.path().join(index.to_string());
        std::fs::create_dir_all(&dest)?;
        let mut extracted = extract_archive(archive, &dest)
            .with_context(|| format!("failed to extract {}", archive.display()))?;
        extracted.sort();
        let session = if multi { Some(index as u32) } else { None };
        files.extend(extracted.into_iter().map(|path| RawFile { path, session }));
    }
    info!(
        subject,
        archives,
        files = files.len(),
        "materialized archived input"
    );
    Ok(Materialized {
        files,
        staging: Some(staging),
    })
}

fn is_archive(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with(".tar") || name.ends_with(".tar.gz") || name.ends_with(".tgz")
}

fn collect_plain(matches: &[PathBuf]) -> Result<Vec<RawFile>> {
    let mut paths = Vec::new();
    for m in matches {
        if m.is_dir() {
            for entry in WalkDir::new(m).sort_by_file_name() {
                let entry = entry?;
                if entry.file_type().is_file() {
                    paths.push(entry.into_path());
                }
            }
        } else {
            paths.push(m.clone());
        }
    }
    paths.sort();
    Ok(paths
        .into_iter()
        .map(|path| RawFile { path, session: None })
        .collect())
}

/// Extract regular files from a tar or tar.gz archive. Archive permission
/// bits are not preserved; extracted files get default mode bits.
fn extract_archive(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(archive)?;
    let reader: Box<dyn Read> = if is_gz(archive) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(false);

    let mut extracted = Vec::new();
    for entry in tar.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        if entry.unpack_in(dest)? {
            let path = dest.join(entry.path()?);
            extracted.push(path);
        }
    }
    Ok(extracted)
}

fn is_gz(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with(".tar.gz") || name.ends_with(".tgz")
}
