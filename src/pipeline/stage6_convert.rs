use std::rc::Rc;

use anyhow::{Context, Result};
use tracing::info;

use crate::convert::{self, ConvertOptions, ConverterBackend, MetadataEmbedder};
use crate::ctx::Ctx;
use crate::heuristic::Heuristic;
use crate::pipeline::Stage;
use crate::plan;

pub struct Stage6Convert {
    backend: Option<Box<dyn ConverterBackend>>,
    embedder: Box<dyn MetadataEmbedder>,
    heuristic: Rc<dyn Heuristic>,
    options: ConvertOptions,
}

impl Stage6Convert {
    pub fn new(
        backend: Option<Box<dyn ConverterBackend>>,
        embedder: Box<dyn MetadataEmbedder>,
        heuristic: Rc<dyn Heuristic>,
        options: ConvertOptions,
    ) -> Self {
        Self {
            backend,
            embedder,
            heuristic,
            options,
        }
    }
}

impl Stage for Stage6Convert {
    fn name(&self) -> &'static str {
        "stage6_convert"
    }

    fn run(&self, ctx: &mut Ctx) -> Result<()> {
        let plan = ctx.plan.as_ref().context("no conversion plan resolved")?;
        let items = plan::expand_plan(
            plan,
            &ctx.file_groups,
            &ctx.conv_outdir,
            &ctx.anon_subject,
        )?;
        info!(subject = %ctx.subject, items = items.len(), "conversion starting");

        let heuristic = self.heuristic.clone();
        let post = move |item: &plan::ConversionItem| heuristic.post_convert(item);
        convert::convert_items(
            &items,
            self.backend.as_deref(),
            self.embedder.as_ref(),
            &self.options,
            Some(&post),
        )
    }
}
