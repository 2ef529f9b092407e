use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::ctx::Ctx;
use crate::pipeline::Stage;
use crate::store;

pub struct Stage5Persist {
    heuristic_name: String,
    heuristic_source: Option<PathBuf>,
}

impl Stage5Persist {
    pub fn new(heuristic_name: String, heuristic_source: Option<PathBuf>) -> Self {
        Self {
            heuristic_name,
            heuristic_source,
        }
    }
}

impl Stage for Stage5Persist {
    fn name(&self) -> &'static str {
        "stage5_persist"
    }

    fn run(&self, ctx: &mut Ctx) -> Result<()> {
        if ctx.resumed {
            return Ok(());
        }
        let plan = ctx.plan.as_ref().context("no plan to persist")?;
        store::persist(
            &ctx.info,
            &ctx.rows,
            &ctx.file_groups,
            plan,
            &self.heuristic_name,
            self.heuristic_source.as_deref(),
        )
    }
}
