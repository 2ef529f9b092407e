use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Header fields that vary between otherwise-identical scans of one series
/// (orientation cosines, ICE dimension counters, pulse-sequence name) and
/// must not participate in signature comparison.
pub const UNSTABLE_SIGNATURE_FIELDS: &[&str] =
    &["ImageOrientationPatient", "ICE_Dims", "SequenceName"];

/// Image-type tokens that mark a file as non-convertible content.
pub const EXCLUDED_IMAGE_TYPES: &[&str] = &["RAW", "SCREENSAVE", "PRESENTATION"];

/// Case-sensitive marker a scanner writes into the series description of
/// motion-corrected reconstructions.
pub const MOTION_MARKER: &str = "MoCo";

/// Sentinel protocol label for files whose metadata could not be read.
pub const EXCLUDED_PROTOCOL: &str = "none";

/// One raw acquisition file as produced by the materializer. `session` is
/// `None` for single-session input and `Some(i)` for the i-th source archive.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub path: PathBuf,
    pub session: Option<u32>,
}

/// Comparable summary of a scan's acquisition parameters. Unstable fields are
/// stripped at construction, so equality over the remaining map is the
/// default series-membership test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    fields: BTreeMap<String, String>,
}

impl Signature {
    pub fn from_fields(fields: BTreeMap<String, String>) -> Self {
        let mut fields = fields;
        for key in UNSTABLE_SIGNATURE_FIELDS {
            fields.remove(*key);
        }
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Identity of one series: (session, sequence number, protocol label).
/// The derived `Ord` gives the total order that fixes enumeration order
/// everywhere downstream. A negative sequence means "excluded from
/// conversion".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesId {
    pub session: Option<u32>,
    pub sequence: i32,
    pub protocol: String,
}

impl SeriesId {
    pub fn is_excluded(&self) -> bool {
        self.sequence < 0
    }

    /// Human-readable label; the session part is included only when the run
    /// spans multiple sessions.
    pub fn label(&self, multi_session: bool) -> String {
        match (multi_session, self.session) {
            (true, Some(session)) => format!("{}-{}-{}", session, self.sequence, self.protocol),
            _ => format!("{}-{}", self.sequence, self.protocol),
        }
    }
}

/// Decoded per-file metadata, as handed over by the external decoder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanMeta {
    pub series_number: Option<i32>,
    pub protocol: Option<String>,
    pub image_type: Vec<String>,
    /// Volumetric shape (3 or 4 dims); `None` for metadata-only files.
    pub shape: Option<Vec<u32>>,
    pub repetition_time_s: Option<f64>,
    pub echo_time_ms: Option<f64>,
    pub series_description: String,
    pub signature: Signature,
}

impl ScanMeta {
    /// Fallback for files whose header could not be decoded: excluded
    /// sentinel series id, empty signature (never matches a real anchor).
    pub fn unreadable() -> Self {
        Self::default()
    }

    pub fn provisional_series_id(&self, session: Option<u32>) -> SeriesId {
        match (self.series_number, &self.protocol) {
            (Some(sequence), Some(protocol)) if sequence >= 0 => SeriesId {
                session,
                sequence,
                protocol: protocol.clone(),
            },
            _ => SeriesId {
                session,
                sequence: -1,
                protocol: self
                    .protocol
                    .clone()
                    .unwrap_or_else(|| EXCLUDED_PROTOCOL.to_string()),
            },
        }
    }

    pub fn has_excluded_image_type(&self) -> bool {
        self.image_type
            .iter()
            .any(|t| EXCLUDED_IMAGE_TYPES.contains(&t.to_uppercase().as_str()))
    }

    pub fn is_motion_corrected(&self) -> bool {
        self.series_description.contains(MOTION_MARKER)
    }
}

/// External collaborator: turns a raw file into decoded metadata.
pub trait ScanDecoder {
    fn decode(&self, path: &Path) -> Result<ScanMeta>;
}

/// External collaborator: decides whether two signatures belong to the same
/// series.
pub trait SeriesMatcher {
    fn same_series(&self, a: &Signature, b: &Signature) -> bool;
}

/// Default matcher: exact equality of the stable signature fields. Empty
/// signatures (unreadable files) only match other empty signatures.
pub struct ExactMatcher;

impl SeriesMatcher for ExactMatcher {
    fn same_series(&self, a: &Signature, b: &Signature) -> bool {
        a == b
    }
}
