use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::info;

/// Fire-and-forget dispatch of one subject's run to a batch queue. The
/// submitted command is the same binary with the same arguments restricted to
/// a single subject, so inline and queued runs share one code path.
pub fn submit(queue: &str, subject: &str, args: &[String]) -> Result<()> {
    let exe = std::env::current_exe().context("cannot resolve current executable")?;
    let job_name = format!("sericonv-{}", subject);

    let status = Command::new("qsub")
        .args(["-q", queue, "-N", &job_name, "-b", "y"])
        .arg(&exe)
        .args(args)
        .status()
        .context("failed to launch qsub")?;
    if !status.success() {
        bail!("qsub exited with {} for subject {}", status, subject);
    }
    info!(queue, subject, "job submitted");
    Ok(())
}
