use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sericonv::group::group_files;
use sericonv::scan::{
    ExactMatcher, RawFile, ScanDecoder, ScanMeta, SeriesMatcher, Signature,
};
use tempfile::TempDir;

/// Test decoder: each fixture file holds a JSON-encoded ScanMeta. A file
/// that does not parse plays the role of unreadable scanner output.
struct JsonDecoder;

impl ScanDecoder for JsonDecoder {
    fn decode(&self, path: &Path) -> Result<ScanMeta> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).with_context(|| format!("not a scan: {}", path.display()))
    }
}

fn meta(sequence: i32, protocol: &str, sig_value: &str) -> ScanMeta {
    let mut fields = BTreeMap::new();
    fields.insert("ProtocolName".to_string(), protocol.to_string());
    fields.insert("SeriesNumber".to_string(), sequence.to_string());
    fields.insert("Marker".to_string(), sig_value.to_string());
    ScanMeta {
        series_number: Some(sequence),
        protocol: Some(protocol.to_string()),
        image_type: vec!["ORIGINAL".to_string(), "PRIMARY".to_string()],
        shape: Some(vec![64, 64, 1]),
        repetition_time_s: Some(2.0),
        echo_time_ms: Some(30.0),
        series_description: protocol.to_string(),
        signature: Signature::from_fields(fields),
    }
}

fn write_scan(dir: &Path, name: &str, meta: &ScanMeta) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, serde_json::to_string(meta).unwrap()).unwrap();
    path
}

fn raw(path: PathBuf, session: Option<u32>) -> RawFile {
    RawFile { path, session }
}

#[test]
fn five_identical_files_form_one_series() {
    // Scenario: 5 files, identical signature, sequence 3, protocol T1w.
    let tmp = TempDir::new().unwrap();
    let m = meta(3, "T1w", "a");
    let files: Vec<RawFile> = (0..5)
        .map(|i| raw(write_scan(tmp.path(), &format!("f{}.dcm", i), &m), None))
        .collect();

    let out = group_files(&files, &JsonDecoder, &ExactMatcher, None).unwrap();
    assert_eq!(out.rows.len(), 1);
    let row = &out.rows[0];
    assert_eq!(row.series_label, "3-T1w");
    assert_eq!(row.file_count, 5);
    assert_eq!(row.total_files_till_now, 5);
    assert_eq!(row.dims, [64, 64, 1, 1]);
    assert_eq!(out.file_groups["3-T1w"].len(), 5);
}

#[test]
fn session_tags_appear_in_labels() {
    // Scenario: two archives, one distinguishable series each.
    let tmp = TempDir::new().unwrap();
    let a = write_scan(tmp.path(), "a.dcm", &meta(2, "T1w", "a"));
    let b = write_scan(tmp.path(), "b.dcm", &meta(2, "T1w", "b"));
    let files = vec![raw(a, Some(0)), raw(b, Some(1))];

    let out = group_files(&files, &JsonDecoder, &ExactMatcher, None).unwrap();
    let labels: Vec<&str> = out.rows.iter().map(|r| r.series_label.as_str()).collect();
    assert_eq!(labels, vec!["0-2-T1w", "1-2-T1w"]);
}

#[test]
fn unreadable_file_is_excluded_and_rest_survive() {
    // Scenario: non-scan content mixed into a valid set.
    let tmp = TempDir::new().unwrap();
    let good = write_scan(tmp.path(), "good.dcm", &meta(1, "T2w", "a"));
    let junk = tmp.path().join("junk.dcm");
    fs::write(&junk, "not a scan at all").unwrap();

    let out = group_files(
        &[raw(good.clone(), None), raw(junk.clone(), None)],
        &JsonDecoder,
        &ExactMatcher,
        None,
    )
    .unwrap();

    assert_eq!(out.rows.len(), 1);
    assert_eq!(out.rows[0].series_label, "1-T2w");
    for paths in out.file_groups.values() {
        assert!(!paths.contains(&junk));
    }
    assert!(out.file_groups.values().any(|p| p.contains(&good)));
}

#[test]
fn excluded_image_types_get_negative_sequence() {
    let tmp = TempDir::new().unwrap();
    let mut screenshot = meta(4, "localizer", "s");
    screenshot.image_type = vec!["DERIVED".to_string(), "SCREENSAVE".to_string()];
    let path = write_scan(tmp.path(), "shot.dcm", &screenshot);

    let out = group_files(&[raw(path, None)], &JsonDecoder, &ExactMatcher, None).unwrap();
    assert!(out.rows.is_empty());
    assert!(out.file_groups.is_empty());
}

#[test]
fn heuristic_veto_excludes_files() {
    let tmp = TempDir::new().unwrap();
    let keep = write_scan(tmp.path(), "keep.dcm", &meta(1, "T1w", "a"));
    let drop = write_scan(tmp.path(), "drop.dcm", &meta(2, "fieldmap", "b"));
    let veto = |m: &ScanMeta| m.protocol.as_deref() == Some("fieldmap");

    let out = group_files(
        &[raw(keep, None), raw(drop, None)],
        &JsonDecoder,
        &ExactMatcher,
        Some(&veto),
    )
    .unwrap();
    assert_eq!(out.rows.len(), 1);
    assert_eq!(out.rows[0].series_label, "1-T1w");
}

#[test]
fn metadata_only_series_is_silently_filtered() {
    let tmp = TempDir::new().unwrap();
    let mut shapeless = meta(7, "report", "r");
    shapeless.shape = None;
    let path = write_scan(tmp.path(), "r.dcm", &shapeless);

    let out = group_files(&[raw(path, None)], &JsonDecoder, &ExactMatcher, None).unwrap();
    assert!(out.rows.is_empty());
}

#[test]
fn grouping_is_deterministic_across_runs() {
    let tmp = TempDir::new().unwrap();
    let mut files = Vec::new();
    for seq in [9, 3, 5] {
        let m = meta(seq, &format!("proto{}", seq), &format!("sig{}", seq));
        for i in 0..3 {
            files.push(raw(
                write_scan(tmp.path(), &format!("s{}f{}.dcm", seq, i), &m),
                None,
            ));
        }
    }

    let first = group_files(&files, &JsonDecoder, &ExactMatcher, None).unwrap();
    let second = group_files(&files, &JsonDecoder, &ExactMatcher, None).unwrap();
    assert_eq!(first.rows, second.rows);
    assert_eq!(first.file_groups, second.file_groups);

    // Output order follows the series id order, not input order.
    let labels: Vec<&str> = first.rows.iter().map(|r| r.series_label.as_str()).collect();
    assert_eq!(labels, vec!["3-proto3", "5-proto5", "9-proto9"]);
    let totals: Vec<usize> = first.rows.iter().map(|r| r.total_files_till_now).collect();
    assert_eq!(totals, vec![3, 6, 9]);
}

#[test]
fn every_file_lands_in_exactly_one_canonical_group() {
    let tmp = TempDir::new().unwrap();
    let m1 = meta(1, "T1w", "a");
    let m2 = meta(2, "bold", "b");
    let mut files = Vec::new();
    for i in 0..4 {
        files.push(raw(write_scan(tmp.path(), &format!("a{}.dcm", i), &m1), None));
        files.push(raw(write_scan(tmp.path(), &format!("b{}.dcm", i), &m2), None));
    }

    let out = group_files(&files, &JsonDecoder, &ExactMatcher, None).unwrap();
    let mut seen: Vec<&PathBuf> = out.file_groups.values().flatten().collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), files.len());
}

/// Non-transitive matcher that considers everything one series, the
/// degenerate repeated-scan case: grouping must not crash and the first
/// group's list stays canonical.
struct MatchEverything;

impl SeriesMatcher for MatchEverything {
    fn same_series(&self, _a: &Signature, _b: &Signature) -> bool {
        true
    }
}

#[test]
fn multi_match_keeps_first_group_canonical() {
    let tmp = TempDir::new().unwrap();
    let files: Vec<RawFile> = (0..3)
        .map(|i| {
            raw(
                write_scan(tmp.path(), &format!("f{}.dcm", i), &meta(1, "T1w", "x")),
                None,
            )
        })
        .collect();

    let out = group_files(&files, &JsonDecoder, &MatchEverything, None).unwrap();
    assert_eq!(out.rows.len(), 1);
    assert_eq!(out.rows[0].file_count, 3);
    assert_eq!(out.rows[0].total_files_till_now, 3);
}

#[test]
fn ambiguous_file_inherits_group_series_number() {
    let tmp = TempDir::new().unwrap();
    let anchor = meta(5, "dwi", "same");
    // Same acquisition signature, conflicting per-file series number.
    let mut straggler = anchor.clone();
    straggler.series_number = Some(99);
    let a = write_scan(tmp.path(), "a.dcm", &anchor);
    let b = write_scan(tmp.path(), "b.dcm", &straggler);

    let out = group_files(
        &[raw(a, None), raw(b, None)],
        &JsonDecoder,
        &ExactMatcher,
        None,
    )
    .unwrap();
    assert_eq!(out.rows.len(), 1);
    assert_eq!(out.rows[0].series_label, "5-dwi");
    assert_eq!(out.rows[0].file_count, 2);
}
