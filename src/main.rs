mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use trimforge::timecode::Timecode;
use trimforge::{config, probe, spawn_trim, AudioOutcome, TrimRequest};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "trimforge=trace,trimforge_media=trace".to_string()
        } else {
            "trimforge=debug,trimforge_media=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Trim {
            input,
            output,
            start,
            end,
        } => trim_file(&input, &output, start, end, cli.config.as_deref()),
        Commands::Probe { file, json } => probe_file(&file, json),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("trimforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn trim_file(
    input: &Path,
    output: &Path,
    start: i64,
    end: i64,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let request = TrimRequest::new(input, output, start, end);

    tracing::info!(
        "Trimming {:?} [{} - {}] into {:?}",
        input,
        Timecode(start),
        Timecode(end),
        output
    );

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt
        .block_on(async {
            spawn_trim(request, config.trim_options())
                .wait_with_progress(|ratio| {
                    tracing::info!("Progress: {:.0}%", ratio * 100.0);
                })
                .await
        })
        .context("Trim failed")?;

    println!("Output: {}", outcome.output_path.display());
    println!("Size: {} bytes", outcome.output_bytes);
    println!("Video samples: {}", outcome.video_samples);
    match &outcome.audio {
        AudioOutcome::Absent => println!("Audio: none in source"),
        AudioOutcome::Copied { samples } => println!("Audio samples: {}", samples),
        AudioOutcome::Dropped { reason } => println!("Audio: dropped ({})", reason),
    }

    Ok(())
}

fn probe_file(file: &Path, json: bool) -> Result<()> {
    let report = probe::probe_file(file).with_context(|| format!("Failed to probe {:?}", file))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("File: {}", report.file.display());
    println!("Faststart: {}", report.faststart);
    match report.duration_us {
        Some(d) => println!("Duration: {} ({:?})", Timecode(d), report.duration_source),
        None => println!("Duration: unknown"),
    }

    println!("\nTracks:");
    for track in &report.tracks {
        let selected = if Some(track.index) == report.video_track
            || Some(track.index) == report.audio_track
        {
            "*"
        } else {
            " "
        };
        print!(
            "{} #{} {} {} timescale={} samples={} sync={}",
            selected,
            track.index,
            track.kind,
            track.mime.as_deref().unwrap_or("<unreadable>"),
            track.timescale,
            track.sample_count,
            track.sync_samples
        );
        if let Some(d) = track.duration_us {
            print!(" duration={}", Timecode(d));
        }
        if let (Some(w), Some(h)) = (track.width, track.height) {
            print!(" {}x{}", w, h);
        }
        if let Some(rate) = track.sample_rate {
            print!(" {}Hz", rate);
        }
        if let Some(ch) = track.channels {
            print!(" {}ch", ch);
        }
        println!();
    }

    if report.video_track.is_none() {
        println!("\nNo video track: this file cannot be trimmed");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::load_config_or_default(None)?
        }
    };

    println!("  Read buffer: {} bytes", config.trim.read_buffer_bytes);
    println!(
        "  Progress interval: {}us",
        config.trim.progress_interval_micros
    );

    Ok(())
}
