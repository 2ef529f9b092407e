use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use dicom_object::open_file;

use crate::scan::{ScanDecoder, ScanMeta, Signature};

/// Header fields that make up the acquisition signature. The unstable subset
/// is stripped again by `Signature::from_fields`; listing the fields here and
/// filtering there keeps the exclusion set in one place.
const SIGNATURE_FIELDS: &[&str] = &[
    "StudyInstanceUID",
    "SeriesInstanceUID",
    "SeriesNumber",
    "ProtocolName",
    "ImageType",
    "Rows",
    "Columns",
    "EchoTime",
    "RepetitionTime",
    "SequenceName",
    "ImageOrientationPatient",
];

/// Production decoder on top of the `dicom-object` crate. All per-field
/// absences degrade to `None`; only an unreadable file as a whole is an
/// error, which the grouper turns into the exclusion sentinel.
pub struct DicomDecoder;

impl ScanDecoder for DicomDecoder {
    fn decode(&self, path: &Path) -> Result<ScanMeta> {
        let obj = open_file(path)
            .with_context(|| format!("failed to read DICOM file {}", path.display()))?;

        let element_str = |name: &str| -> Option<String> {
            obj.element_by_name(name)
                .ok()
                .and_then(|e| e.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let mut fields = BTreeMap::new();
        for name in SIGNATURE_FIELDS {
            if let Some(value) = element_str(name) {
                fields.insert(name.to_string(), value);
            }
        }

        let series_number = element_str("SeriesNumber").and_then(|s| s.parse::<i32>().ok());
        let protocol = element_str("ProtocolName");
        let image_type = element_str("ImageType")
            .map(|s| s.split('\\').map(|t| t.trim().to_string()).collect())
            .unwrap_or_default();
        let series_description = element_str("SeriesDescription").unwrap_or_default();

        let rows = element_str("Rows").and_then(|s| s.parse::<u32>().ok());
        let cols = element_str("Columns").and_then(|s| s.parse::<u32>().ok());
        let frames = element_str("NumberOfFrames").and_then(|s| s.parse::<u32>().ok());
        let shape = match (rows, cols) {
            (Some(r), Some(c)) => Some(match frames {
                Some(f) if f > 1 => vec![r, c, f],
                _ => vec![r, c, 1],
            }),
            _ => None,
        };

        // DICOM stores TR in milliseconds; the summary wants seconds.
        let repetition_time_s = element_str("RepetitionTime")
            .and_then(|s| s.parse::<f64>().ok())
            .map(|ms| ms / 1000.0);
        let echo_time_ms = element_str("EchoTime").and_then(|s| s.parse::<f64>().ok());

        Ok(ScanMeta {
            series_number,
            protocol,
            image_type,
            shape,
            repetition_time_s,
            echo_time_ms,
            series_description,
            signature: Signature::from_fields(fields),
        })
    }
}
