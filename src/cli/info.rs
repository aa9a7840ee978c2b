use anyhow::Result;
use indicatif::MultiProgress;

use super::command::{Cli, InfoArgs};
use usm::{Track, Usm};

pub fn cmd_info(args: &InfoArgs, _cli: &Cli, _multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing USM container: {}", args.input.display());

    let usm = Usm::open(&args.input, None)?;

    println!();
    println!("USM Container Information");
    println!("==========================");
    println!();
    println!(
        "Container version            {}",
        usm.version()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );
    println!("Video tracks                 {}", usm.videos().len());
    println!("Audio tracks                 {}", usm.audios().len());
    println!("Alpha tracks                 {}", usm.alphas().len());
    println!();

    display_tracks("Video", usm.videos());
    display_tracks("Audio", usm.audios());
    display_tracks("Alpha", usm.alphas());

    Ok(())
}

fn display_tracks(label: &str, tracks: &[Track]) {
    if tracks.is_empty() {
        return;
    }

    println!("{label} Tracks");
    for track in tracks {
        let filename = track
            .crid
            .require_string("filename")
            .unwrap_or("<unknown>");
        let total_bytes: u64 = track.stream.iter().map(|&(_, size)| size as u64).sum();

        println!("  Channel {:<3}  {:<32}  {} chunk(s), {} bytes", track.channel_number, filename, track.stream.len(), total_bytes);
    }
    println!();
}
