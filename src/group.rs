use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::scan::{RawFile, ScanDecoder, ScanMeta, SeriesId, SeriesMatcher};

/// Series label -> ordered raw file paths. The canonical link back to the
/// raw data; persisted and required on every resume.
pub type FileGroupMap = BTreeMap<String, Vec<PathBuf>>;

/// Flattened summary of one discovered series, in the exact column order of
/// the persisted dicominfo table. The two output fields are placeholders for
/// heuristic annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeqInfoRow {
    pub total_files_till_now: usize,
    pub example_file: String,
    pub series_label: String,
    pub output_name: String,
    pub output_type: String,
    pub dims: [u32; 4],
    pub file_count: usize,
    pub repetition_time_s: f64,
    pub echo_time_ms: f64,
    pub protocol: String,
    pub motion_corrected: bool,
}

/// One discovered group: the anchor establishing it plus its canonical file
/// list. Membership of later matching files is appended here only for the
/// first group they match.
struct GroupAnchor {
    series_id: SeriesId,
    anchor: ScanMeta,
    files: Vec<PathBuf>,
}

/// Per-file membership record, one entry per signature match (duplicates
/// across groups are possible and expected). `series_id` is the resolved
/// identity: a file joining a group inherits the anchor's canonical id.
struct Membership {
    path: PathBuf,
    series_id: SeriesId,
    group_index: usize,
}

pub struct GroupOutcome {
    pub rows: Vec<SeqInfoRow>,
    pub file_groups: FileGroupMap,
}

/// Partition the raw file pool into series groups and emit the ordered
/// summary rows. `exclude` is the optional per-file heuristic veto.
pub fn group_files(
    files: &[RawFile],
    decoder: &dyn ScanDecoder,
    matcher: &dyn SeriesMatcher,
    exclude: Option<&dyn Fn(&ScanMeta) -> bool>,
) -> Result<GroupOutcome> {
    let multi_session = files.iter().any(|f| f.session.is_some());

    let mut anchors: Vec<GroupAnchor> = Vec::new();
    let mut memberships: Vec<Membership> = Vec::new();

    for file in files {
        let meta = match decoder.decode(&file.path) {
            Ok(meta) => meta,
            Err(err) => {
                debug!(file = %file.path.display(), %err, "undecodable file excluded");
                ScanMeta::unreadable()
            }
        };

        let mut series_id = meta.provisional_series_id(file.session);
        if !series_id.is_excluded() {
            let vetoed = exclude.map(|f| f(&meta)).unwrap_or(false);
            if vetoed || meta.has_excluded_image_type() {
                series_id.sequence = -1;
            }
        }

        let matched: Vec<usize> = anchors
            .iter()
            .enumerate()
            .filter(|(_, g)| matcher.same_series(&meta.signature, &g.anchor.signature))
            .map(|(i, _)| i)
            .collect();

        match matched.first().copied() {
            Some(first) => {
                if matched.len() > 1 {
                    // Latent double-count hazard in multi-match input; only
                    // the first group's file list stays canonical.
                    warn!(
                        file = %file.path.display(),
                        groups = matched.len(),
                        "file matches multiple series groups"
                    );
                }
                if !series_id.is_excluded() {
                    // Ambiguous per-file metadata inherits the group's
                    // canonical series identity.
                    let anchor_id = &anchors[first].series_id;
                    series_id = SeriesId {
                        session: anchor_id.session,
                        sequence: anchor_id.sequence,
                        protocol: anchor_id.protocol.clone(),
                    };
                }
                anchors[first].files.push(file.path.clone());
                for group_index in matched {
                    memberships.push(Membership {
                        path: file.path.clone(),
                        series_id: series_id.clone(),
                        group_index,
                    });
                }
            }
            None => {
                let group_index = anchors.len();
                memberships.push(Membership {
                    path: file.path.clone(),
                    series_id: series_id.clone(),
                    group_index,
                });
                anchors.push(GroupAnchor {
                    series_id,
                    anchor: meta,
                    files: vec![file.path.clone()],
                });
            }
        }
    }

    // One representative group per distinct series id, first discovery wins;
    // the BTreeMap iteration order is the deterministic output order.
    let mut by_series: BTreeMap<SeriesId, usize> = BTreeMap::new();
    for (index, anchor) in anchors.iter().enumerate() {
        by_series.entry(anchor.series_id.clone()).or_insert(index);
    }

    let mut rows = Vec::new();
    let mut file_groups = FileGroupMap::new();
    let mut total_files = 0usize;

    for (series_id, index) in &by_series {
        if series_id.is_excluded() {
            continue;
        }
        let group = &anchors[*index];
        let Some(shape) = group.anchor.shape.as_ref() else {
            // Metadata-only series; filtered, not an error.
            continue;
        };

        let label = series_id.label(multi_session);
        total_files += group.files.len();

        let example_file = group
            .files
            .first()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        rows.push(SeqInfoRow {
            total_files_till_now: total_files,
            example_file,
            series_label: label.clone(),
            output_name: "-".to_string(),
            output_type: "-".to_string(),
            dims: pad_dims(shape),
            file_count: group.files.len(),
            repetition_time_s: group.anchor.repetition_time_s.unwrap_or(-1.0),
            echo_time_ms: group.anchor.echo_time_ms.unwrap_or(-1.0),
            protocol: series_id.protocol.clone(),
            motion_corrected: group.anchor.is_motion_corrected(),
        });
        file_groups.insert(label, group.files.clone());
    }

    for membership in &memberships {
        trace!(
            file = %membership.path.display(),
            series = %membership.series_id.label(multi_session),
            group = membership.group_index,
            "membership row"
        );
    }
    debug!(
        files = files.len(),
        groups = anchors.len(),
        memberships = memberships.len(),
        series = rows.len(),
        "grouping finished"
    );

    Ok(GroupOutcome { rows, file_groups })
}

fn pad_dims(shape: &[u32]) -> [u32; 4] {
    let mut dims = [1u32; 4];
    for (i, d) in shape.iter().take(4).enumerate() {
        dims[i] = *d;
    }
    dims
}
