use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "sericonv", version, about = "Organize raw imaging series and drive conversion")]
pub struct Cli {
    #[arg(
        short = 'd',
        long = "files",
        help = "Input path template with a {subject} placeholder (plain paths or tar archives)"
    )]
    pub files: String,

    #[arg(short = 's', long = "subjects", num_args = 1.., required = true, help = "Subject identifier (repeatable)")]
    pub subjects: Vec<String>,

    #[arg(
        short = 'f',
        long,
        help = "Heuristic name or path to a heuristic module file"
    )]
    pub heuristic: String,

    #[arg(short = 'c', long, value_enum, default_value_t = ConverterArg::Dcm2niix)]
    pub converter: ConverterArg,

    #[arg(short = 'o', long, default_value = ".", help = "Output directory for plan artifacts")]
    pub outdir: PathBuf,

    #[arg(long, help = "Output directory for converted files (defaults to --outdir)")]
    pub conv_outdir: Option<PathBuf>,

    #[arg(long, help = "Command mapping a subject id to an anonymized id")]
    pub anon_cmd: Option<String>,

    #[arg(short = 'q', long, help = "Submit each subject to this batch queue instead of running inline")]
    pub queue: Option<String>,

    #[arg(long, default_value_t = false, help = "Capture converter provenance records")]
    pub with_prov: bool,

    #[arg(long, value_enum, default_value_t = LinkModeArg::Hardlink)]
    pub link_mode: LinkModeArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConverterArg {
    Dcm2niix,
    /// Disable conversion entirely (heuristic testing only).
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LinkModeArg {
    Hardlink,
    Symlink,
}
