use anyhow::Result;
use std::fs;
use tracing::info;

use crate::ctx::Ctx;
use crate::pipeline::Stage;

pub struct Stage0Scaffold;

impl Stage0Scaffold {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for Stage0Scaffold {
    fn name(&self) -> &'static str {
        "stage0_scaffold"
    }

    fn run(&self, ctx: &mut Ctx) -> Result<()> {
        fs::create_dir_all(&ctx.outdir)?;
        fs::create_dir_all(&ctx.conv_outdir)?;
        info!(
            outdir = %ctx.outdir.display(),
            conv_outdir = %ctx.conv_outdir.display(),
            "output_dirs_ready"
        );
        Ok(())
    }
}
