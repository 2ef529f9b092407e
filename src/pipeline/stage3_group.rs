use std::rc::Rc;

use anyhow::Result;
use tracing::info;

use crate::ctx::Ctx;
use crate::group;
use crate::heuristic::Heuristic;
use crate::pipeline::Stage;
use crate::scan::{ScanDecoder, SeriesMatcher};

pub struct Stage3Group {
    decoder: Box<dyn ScanDecoder>,
    matcher: Box<dyn SeriesMatcher>,
    heuristic: Rc<dyn Heuristic>,
}

impl Stage3Group {
    pub fn new(
        decoder: Box<dyn ScanDecoder>,
        matcher: Box<dyn SeriesMatcher>,
        heuristic: Rc<dyn Heuristic>,
    ) -> Self {
        Self {
            decoder,
            matcher,
            heuristic,
        }
    }
}

impl Stage for Stage3Group {
    fn name(&self) -> &'static str {
        "stage3_group"
    }

    fn run(&self, ctx: &mut Ctx) -> Result<()> {
        if ctx.resumed {
            return Ok(());
        }
        let heuristic = self.heuristic.clone();
        let exclude = move |meta: &crate::scan::ScanMeta| heuristic.exclude_file(meta);
        let outcome = group::group_files(
            &ctx.raw_files,
            self.decoder.as_ref(),
            self.matcher.as_ref(),
            Some(&exclude),
        )?;
        info!(
            subject = %ctx.subject,
            series = outcome.rows.len(),
            "series discovered"
        );
        ctx.rows = outcome.rows;
        ctx.file_groups = outcome.file_groups;
        Ok(())
    }
}
