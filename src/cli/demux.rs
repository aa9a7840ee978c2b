use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::command::{Cli, DemuxArgs};
use usm::Usm;

pub fn cmd_demux(args: &DemuxArgs, _cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Opening USM container: {}", args.input.display());

    let pb = multi.map(|multi| {
        let pb = multi.add(ProgressBar::new_spinner());
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
            pb.set_style(style);
        }
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb.set_message(format!("Demuxing {}...", args.input.display()));
        pb
    });

    let usm = Usm::open(&args.input, args.key)?;

    log::info!(
        "{} video, {} audio, {} alpha track(s) found (container version {})",
        usm.videos().len(),
        usm.audios().len(),
        usm.alphas().len(),
        usm.version()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    );

    usm.demux(
        &args.output,
        !args.no_video,
        !args.no_audio,
        !args.no_alpha,
        None,
    )?;

    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }

    log::info!("Wrote elementary streams to {}", args.output.display());

    Ok(())
}
