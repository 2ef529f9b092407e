use std::path::Path;
use std::process::Command;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use sericonv::cli::{Cli, ConverterArg, LinkModeArg};
use sericonv::convert::{
    ConvertOptions, ConverterBackend, Dcm2niixBackend, LinkMode, SidecarEmbedder,
};
use sericonv::ctx::Ctx;
use sericonv::dicom::DicomDecoder;
use sericonv::heuristic::{self, Heuristic};
use sericonv::pipeline::stage0_scaffold::Stage0Scaffold;
use sericonv::pipeline::stage1_resume::Stage1Resume;
use sericonv::pipeline::stage2_materialize::Stage2Materialize;
use sericonv::pipeline::stage3_group::Stage3Group;
use sericonv::pipeline::stage4_plan::Stage4Plan;
use sericonv::pipeline::stage5_persist::Stage5Persist;
use sericonv::pipeline::stage6_convert::Stage6Convert;
use sericonv::pipeline::Pipeline;
use sericonv::queue;
use sericonv::scan::ExactMatcher;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let loaded = heuristic::load(&cli.heuristic)
        .with_context(|| format!("cannot load heuristic {:?}", cli.heuristic))?;
    let heuristic: Rc<dyn Heuristic> = Rc::from(loaded.heuristic);

    let mut failed = 0usize;
    for subject in &cli.subjects {
        if let Some(queue_name) = &cli.queue {
            queue::submit(queue_name, subject, &single_subject_args(&cli, subject))?;
            continue;
        }
        if let Err(err) = run_subject(&cli, heuristic.clone(), loaded.source.as_deref(), subject) {
            error!(subject = %subject, err = format!("{:#}", err), "subject run failed");
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{} of {} subject runs failed", failed, cli.subjects.len());
    }
    Ok(())
}

fn run_subject(
    cli: &Cli,
    heuristic: Rc<dyn Heuristic>,
    heuristic_source: Option<&Path>,
    subject: &str,
) -> Result<()> {
    let anon_subject = match &cli.anon_cmd {
        Some(cmd) => anonymize(cmd, subject)?,
        None => subject.to_string(),
    };
    let conv_outdir = cli.conv_outdir.clone().unwrap_or_else(|| cli.outdir.clone());

    let mut ctx = Ctx::new(
        subject.to_string(),
        anon_subject,
        cli.files.clone(),
        cli.outdir.clone(),
        conv_outdir,
    );

    let backend: Option<Box<dyn ConverterBackend>> = match cli.converter {
        ConverterArg::Dcm2niix => Some(Box::new(Dcm2niixBackend)),
        ConverterArg::None => None,
    };
    let options = ConvertOptions {
        link_mode: match cli.link_mode {
            LinkModeArg::Hardlink => LinkMode::Hardlink,
            LinkModeArg::Symlink => LinkMode::Symlink,
        },
        with_prov: cli.with_prov,
    };

    Pipeline::new(vec![
        Box::new(Stage0Scaffold::new()),
        Box::new(Stage1Resume::new()),
        Box::new(Stage2Materialize::new()),
        Box::new(Stage3Group::new(
            Box::new(DicomDecoder),
            Box::new(ExactMatcher),
            heuristic.clone(),
        )),
        Box::new(Stage4Plan::new(heuristic.clone())),
        Box::new(Stage5Persist::new(
            heuristic.name().to_string(),
            heuristic_source.map(|p| p.to_path_buf()),
        )),
        Box::new(Stage6Convert::new(
            backend,
            Box::new(SidecarEmbedder::new(Box::new(DicomDecoder))),
            heuristic,
            options,
        )),
    ])
    .run(&mut ctx)
}

/// External subject-id anonymizer: first stdout line of `<cmd> <subject>`.
fn anonymize(cmd: &str, subject: &str) -> Result<String> {
    let output = Command::new(cmd)
        .arg(subject)
        .output()
        .with_context(|| format!("failed to run anonymizer {:?}", cmd))?;
    if !output.status.success() {
        bail!("anonymizer {:?} exited with {}", cmd, output.status);
    }
    let anon = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .to_string();
    if anon.is_empty() {
        bail!("anonymizer {:?} produced no id for {}", cmd, subject);
    }
    Ok(anon)
}

/// The inline argument list narrowed to one subject, for queue submission.
fn single_subject_args(cli: &Cli, subject: &str) -> Vec<String> {
    let mut args = vec![
        "--files".to_string(),
        cli.files.clone(),
        "--subjects".to_string(),
        subject.to_string(),
        "--heuristic".to_string(),
        cli.heuristic.clone(),
        "--converter".to_string(),
        match cli.converter {
            ConverterArg::Dcm2niix => "dcm2niix".to_string(),
            ConverterArg::None => "none".to_string(),
        },
        "--outdir".to_string(),
        cli.outdir.display().to_string(),
        "--link-mode".to_string(),
        match cli.link_mode {
            LinkModeArg::Hardlink => "hardlink".to_string(),
            LinkModeArg::Symlink => "symlink".to_string(),
        },
    ];
    if let Some(dir) = &cli.conv_outdir {
        args.push("--conv-outdir".to_string());
        args.push(dir.display().to_string());
    }
    if let Some(cmd) = &cli.anon_cmd {
        args.push("--anon-cmd".to_string());
        args.push(cmd.clone());
    }
    if cli.with_prov {
        args.push("--with-prov".to_string());
    }
    args
}
