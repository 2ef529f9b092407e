use std::path::PathBuf;

use tempfile::TempDir;

use crate::group::{FileGroupMap, SeqInfoRow};
use crate::plan::ConversionPlan;
use crate::scan::RawFile;
use crate::store::InfoPaths;

/// Per-subject run state threaded through the pipeline stages. The staging
/// directory of an archived input lives here so extracted files survive until
/// the whole run is over and are removed on every exit path.
pub struct Ctx {
    pub subject: String,
    pub anon_subject: String,
    pub template: String,
    pub outdir: PathBuf,
    pub conv_outdir: PathBuf,
    pub info: InfoPaths,

    pub staging: Option<TempDir>,
    pub raw_files: Vec<RawFile>,
    pub rows: Vec<SeqInfoRow>,
    pub file_groups: FileGroupMap,
    pub plan: Option<ConversionPlan>,
    /// True when an edited plan was loaded and discovery is bypassed.
    pub resumed: bool,
}

impl Ctx {
    pub fn new(
        subject: String,
        anon_subject: String,
        template: String,
        outdir: PathBuf,
        conv_outdir: PathBuf,
    ) -> Self {
        let info = InfoPaths::new(&outdir, &anon_subject, &subject);
        Self {
            subject,
            anon_subject,
            template,
            outdir,
            conv_outdir,
            info,
            staging: None,
            raw_files: Vec::new(),
            rows: Vec::new(),
            file_groups: FileGroupMap::new(),
            plan: None,
            resumed: false,
        }
    }
}
