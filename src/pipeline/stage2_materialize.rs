use anyhow::Result;

use crate::archive;
use crate::ctx::Ctx;
use crate::pipeline::Stage;

pub struct Stage2Materialize;

impl Stage2Materialize {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for Stage2Materialize {
    fn name(&self) -> &'static str {
        "stage2_materialize"
    }

    fn run(&self, ctx: &mut Ctx) -> Result<()> {
        if ctx.resumed {
            return Ok(());
        }
        let materialized = archive::materialize(&ctx.template, &ctx.subject)?;
        ctx.raw_files = materialized.files;
        ctx.staging = materialized.staging;
        Ok(())
    }
}
