use anyhow::Result;
use tracing::info;

use crate::ctx::Ctx;
use crate::pipeline::Stage;
use crate::store;

/// The sanctioned override path: an existing edit plan wins outright and
/// suppresses re-discovery entirely.
pub struct Stage1Resume;

impl Stage1Resume {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for Stage1Resume {
    fn name(&self) -> &'static str {
        "stage1_resume"
    }

    fn run(&self, ctx: &mut Ctx) -> Result<()> {
        if let Some((plan, file_groups)) = store::resolve(&ctx.info)? {
            ctx.plan = Some(plan);
            ctx.file_groups = file_groups;
            ctx.resumed = true;
            info!(subject = %ctx.subject, "edited plan found, discovery skipped");
        }
        Ok(())
    }
}
