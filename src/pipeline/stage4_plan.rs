use std::rc::Rc;

use anyhow::Result;
use tracing::info;

use crate::ctx::Ctx;
use crate::heuristic::Heuristic;
use crate::pipeline::Stage;

pub struct Stage4Plan {
    heuristic: Rc<dyn Heuristic>,
}

impl Stage4Plan {
    pub fn new(heuristic: Rc<dyn Heuristic>) -> Self {
        Self { heuristic }
    }
}

impl Stage for Stage4Plan {
    fn name(&self) -> &'static str {
        "stage4_plan"
    }

    fn run(&self, ctx: &mut Ctx) -> Result<()> {
        if ctx.resumed {
            return Ok(());
        }
        let mut plan = self.heuristic.derive_plan(&ctx.rows)?;
        // Entries with no explicit outtypes fall back to the heuristic's
        // declared suffix.
        if let Some(suffix) = self.heuristic.output_suffix() {
            for entry in &mut plan.entries {
                if entry.outtypes.is_empty() {
                    entry.outtypes.push(suffix.to_string());
                }
            }
        }
        info!(
            heuristic = self.heuristic.name(),
            entries = plan.entries.len(),
            "plan derived"
        );
        ctx.plan = Some(plan);
        Ok(())
    }
}
