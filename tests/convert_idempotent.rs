use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use sericonv::convert::{
    convert_items, ConvertOptions, ConvertOutcome, ConverterBackend, LinkMode, MetadataEmbedder,
};
use sericonv::plan::{ConversionItem, OutputType};
use tempfile::TempDir;

/// Records invocations and fabricates a volume (plus optional extras) in the
/// work directory, standing in for the external converter process.
struct FakeBackend {
    calls: Cell<usize>,
    volumes_per_call: usize,
    with_gradients: bool,
}

impl FakeBackend {
    fn new() -> Self {
        Self {
            calls: Cell::new(0),
            volumes_per_call: 1,
            with_gradients: false,
        }
    }
}

impl ConverterBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn convert(&self, _files: &[PathBuf], work_dir: &Path, compress: bool) -> Result<ConvertOutcome> {
        self.calls.set(self.calls.get() + 1);
        fs::create_dir_all(work_dir)?;
        let ext = if compress { "nii.gz" } else { "nii" };
        let mut outcome = ConvertOutcome::default();
        for i in 0..self.volumes_per_call {
            let vol = work_dir.join(format!("converted{}.{}", i, ext));
            fs::write(&vol, b"volume")?;
            outcome.volumes.push(vol);
        }
        if self.with_gradients {
            let bval = work_dir.join("converted.bval");
            let bvec = work_dir.join("converted.bvec");
            fs::write(&bval, b"0 1000")?;
            fs::write(&bvec, b"0 0 1")?;
            outcome.bvals = Some(bval);
            outcome.bvecs = Some(bvec);
        }
        let prov = work_dir.join("prov.json");
        fs::write(&prov, b"{}")?;
        outcome.provenance = Some(prov);
        Ok(outcome)
    }
}

struct CountingEmbedder {
    calls: Cell<usize>,
    fail: bool,
}

impl CountingEmbedder {
    fn new(fail: bool) -> Self {
        Self {
            calls: Cell::new(0),
            fail,
        }
    }
}

impl MetadataEmbedder for CountingEmbedder {
    fn embed(&self, _volume: &Path, _sources: &[PathBuf], sidecar: &Path) -> Result<()> {
        self.calls.set(self.calls.get() + 1);
        if self.fail {
            bail!("no metadata available");
        }
        fs::write(sidecar, b"{\"Protocol\":\"T1w\"}")?;
        Ok(())
    }
}

fn options() -> ConvertOptions {
    ConvertOptions {
        link_mode: LinkMode::Symlink,
        with_prov: false,
    }
}

fn item(out: &Path, name: &str, outtypes: Vec<OutputType>, files: Vec<PathBuf>) -> ConversionItem {
    ConversionItem {
        prefix: out.join(name),
        outtypes,
        files,
    }
}

fn source_files(dir: &Path, n: usize) -> Vec<PathBuf> {
    (0..n)
        .map(|i| {
            let p = dir.join(format!("src{}.dcm", i));
            fs::write(&p, b"dicom").unwrap();
            p
        })
        .collect()
}

#[test]
fn converted_output_is_created_and_locked() {
    let tmp = TempDir::new().unwrap();
    let sources = source_files(tmp.path(), 2);
    let backend = FakeBackend::new();
    let embedder = CountingEmbedder::new(false);
    let items = vec![item(tmp.path(), "out/T1w", vec![OutputType::NiftiGz], sources)];

    convert_items(&items, Some(&backend), &embedder, &options(), None).unwrap();

    let dest = tmp.path().join("out/T1w.nii.gz");
    let sidecar = tmp.path().join("out/T1w.json");
    assert!(dest.exists());
    assert!(sidecar.exists());
    assert!(fs::metadata(&dest).unwrap().permissions().readonly());
    assert!(fs::metadata(&sidecar).unwrap().permissions().readonly());
    assert_eq!(backend.calls.get(), 1);
    assert_eq!(embedder.calls.get(), 1);
}

#[test]
fn second_run_skips_existing_output_entirely() {
    // Scenario: re-run after success must not reconvert or re-embed.
    let tmp = TempDir::new().unwrap();
    let sources = source_files(tmp.path(), 1);
    let backend = FakeBackend::new();
    let embedder = CountingEmbedder::new(false);
    let items = vec![item(tmp.path(), "out/T1w", vec![OutputType::NiftiGz], sources)];

    convert_items(&items, Some(&backend), &embedder, &options(), None).unwrap();
    let dest = tmp.path().join("out/T1w.nii.gz");
    let mtime = fs::metadata(&dest).unwrap().modified().unwrap();

    convert_items(&items, Some(&backend), &embedder, &options(), None).unwrap();
    assert_eq!(backend.calls.get(), 1, "no second converter invocation");
    assert_eq!(embedder.calls.get(), 1, "no second embedding call");
    assert_eq!(fs::metadata(&dest).unwrap().modified().unwrap(), mtime);
    assert!(fs::metadata(&dest).unwrap().permissions().readonly());
}

#[test]
fn primary_output_is_locked_even_when_embedding_fails() {
    let tmp = TempDir::new().unwrap();
    let sources = source_files(tmp.path(), 1);
    let backend = FakeBackend::new();
    let embedder = CountingEmbedder::new(true);
    let items = vec![item(tmp.path(), "out/bold", vec![OutputType::Nifti], sources)];

    convert_items(&items, Some(&backend), &embedder, &options(), None).unwrap();
    let dest = tmp.path().join("out/bold.nii");
    assert!(dest.exists());
    assert!(fs::metadata(&dest).unwrap().permissions().readonly());
    assert!(!tmp.path().join("out/bold.json").exists());
}

#[test]
fn multi_volume_outcome_abandons_the_output_but_run_continues() {
    let tmp = TempDir::new().unwrap();
    let sources = source_files(tmp.path(), 1);
    let mut backend = FakeBackend::new();
    backend.volumes_per_call = 2;
    let embedder = CountingEmbedder::new(false);
    let items = vec![
        item(tmp.path(), "out/dwi", vec![OutputType::NiftiGz], sources.clone()),
        item(tmp.path(), "out/later", vec![OutputType::Dicom], sources),
    ];

    convert_items(&items, Some(&backend), &embedder, &options(), None).unwrap();
    assert!(!tmp.path().join("out/dwi.nii.gz").exists());
    assert_eq!(embedder.calls.get(), 0);
    // The following item still ran.
    assert!(tmp.path().join("out/later.dicom").is_dir());
}

#[test]
fn gradient_tables_are_placed_alongside() {
    let tmp = TempDir::new().unwrap();
    let sources = source_files(tmp.path(), 1);
    let mut backend = FakeBackend::new();
    backend.with_gradients = true;
    let embedder = CountingEmbedder::new(false);
    let items = vec![item(tmp.path(), "out/dwi", vec![OutputType::NiftiGz], sources)];

    convert_items(&items, Some(&backend), &embedder, &options(), None).unwrap();
    assert!(tmp.path().join("out/dwi.bval").exists());
    assert!(tmp.path().join("out/dwi.bvec").exists());
}

#[test]
fn provenance_record_is_copied_and_locked_when_enabled() {
    let tmp = TempDir::new().unwrap();
    let sources = source_files(tmp.path(), 1);
    let backend = FakeBackend::new();
    let embedder = CountingEmbedder::new(false);
    let mut opts = options();
    opts.with_prov = true;
    let items = vec![item(tmp.path(), "out/T1w", vec![OutputType::NiftiGz], sources)];

    convert_items(&items, Some(&backend), &embedder, &opts, None).unwrap();
    let prov = tmp.path().join("out/T1w.prov.json");
    assert!(prov.exists());
    assert!(fs::metadata(&prov).unwrap().permissions().readonly());
}

#[test]
fn dicom_outtype_links_sources_and_recreates_dir() {
    let tmp = TempDir::new().unwrap();
    let sources = source_files(tmp.path(), 3);
    let embedder = CountingEmbedder::new(false);
    let items = vec![item(
        tmp.path(),
        "out/anat",
        vec![OutputType::Dicom],
        sources.clone(),
    )];

    convert_items(&items, None, &embedder, &options(), None).unwrap();
    let dicom_dir = tmp.path().join("out/anat.dicom");
    assert_eq!(fs::read_dir(&dicom_dir).unwrap().count(), 3);

    // A stale entry disappears on re-run because the dir is recreated.
    fs::write(dicom_dir.join("stale.dcm"), b"stale").unwrap();
    convert_items(&items, None, &embedder, &options(), None).unwrap();
    assert_eq!(fs::read_dir(&dicom_dir).unwrap().count(), 3);
}

#[test]
fn disabled_converter_skips_volume_outputs() {
    let tmp = TempDir::new().unwrap();
    let sources = source_files(tmp.path(), 1);
    let embedder = CountingEmbedder::new(false);
    let items = vec![item(
        tmp.path(),
        "out/T1w",
        vec![OutputType::NiftiGz, OutputType::Dicom],
        sources,
    )];

    convert_items(&items, None, &embedder, &options(), None).unwrap();
    assert!(!tmp.path().join("out/T1w.nii.gz").exists());
    assert!(tmp.path().join("out/T1w.dicom").is_dir());
    assert_eq!(embedder.calls.get(), 0);
}

#[test]
fn failing_backend_isolates_the_output() {
    struct FailingBackend;
    impl ConverterBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn convert(&self, _: &[PathBuf], _: &Path, _: bool) -> Result<ConvertOutcome> {
            bail!("converter crashed")
        }
    }

    let tmp = TempDir::new().unwrap();
    let sources = source_files(tmp.path(), 1);
    let embedder = CountingEmbedder::new(false);
    let items = vec![
        item(tmp.path(), "out/a", vec![OutputType::NiftiGz], sources.clone()),
        item(tmp.path(), "out/b", vec![OutputType::Dicom], sources),
    ];

    convert_items(&items, Some(&FailingBackend), &embedder, &options(), None).unwrap();
    assert!(!tmp.path().join("out/a.nii.gz").exists());
    assert!(tmp.path().join("out/b.dicom").is_dir());
}

#[test]
fn post_convert_hook_failure_propagates() {
    let tmp = TempDir::new().unwrap();
    let sources = source_files(tmp.path(), 1);
    let backend = FakeBackend::new();
    let embedder = CountingEmbedder::new(false);
    let items = vec![
        item(tmp.path(), "out/a", vec![OutputType::NiftiGz], sources.clone()),
        item(tmp.path(), "out/b", vec![OutputType::NiftiGz], sources),
    ];

    let hook = |_: &ConversionItem| -> Result<()> { bail!("custom hook exploded") };
    let err = convert_items(&items, Some(&backend), &embedder, &options(), Some(&hook))
        .unwrap_err();
    assert!(err.to_string().contains("post-convert hook failed"));
    // The first item's output was finalized before the hook aborted the run.
    assert!(tmp.path().join("out/a.nii.gz").exists());
    assert!(!tmp.path().join("out/b.nii.gz").exists());
}
