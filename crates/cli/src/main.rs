use std::path::PathBuf;

use clap::Parser;

use farplay::config::{ConfigFile, TargetCaps};
use farplay::logging::{LogQueue, LogWriterThread, expand_log_path, level_filter};

#[derive(Parser)]
#[command(
    name = "farplay",
    about = "Inspect and migrate farplay settings files"
)]
struct Args {
    /// Settings file (TOML)
    #[arg(long, short, default_value = "farplay.toml")]
    config: PathBuf,

    /// Rewrite the file in canonical form after migration
    #[arg(long)]
    migrate: bool,
}

fn main() {
    let args = Args::parse();

    let mut config = match ConfigFile::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", args.config.display());
            return;
        }
    };
    config.settings.apply_target_caps(&TargetCaps::vita());

    // Route tracing through the bounded log queue, the same path the
    // streaming runtime uses.
    let queue = LogQueue::new(config.settings.logging.queue_depth);
    let writer = LogWriterThread::spawn(queue.clone(), Box::new(std::io::stderr()));
    let make_writer = {
        let queue = queue.clone();
        move || queue.writer()
    };
    tracing_subscriber::fmt()
        .with_max_level(level_filter(config.settings.logging.profile))
        .with_writer(make_writer)
        .init();

    let settings = &config.settings;
    println!("settings from {}:", args.config.display());
    println!("  resolution   = {}", settings.resolution);
    println!("  fps          = {}", settings.fps.0);
    println!(
        "  latency mode = {:?} ({} kbps)",
        settings.latency_mode,
        settings.latency_mode.target_bitrate_kbps()
    );
    println!("  force 30fps  = {}", settings.force_30fps);
    println!(
        "  video scale  = {}",
        if settings.stretch_video { "stretch" } else { "preserve" }
    );
    println!("  map preset   = {}", settings.controller_map_id);
    println!(
        "  log profile  = {:?} → {}",
        settings.logging.profile,
        expand_log_path(&settings.logging.path, 1)
    );
    for (i, map) in config.custom_maps.iter().enumerate() {
        if !map.is_empty() {
            println!("  custom map {} = {} entries", i + 1, map.len());
        }
    }

    if args.migrate {
        if let Err(e) = config.save(&args.config) {
            eprintln!("Failed to save {}: {e}", args.config.display());
        } else {
            println!("rewrote {} in canonical form", args.config.display());
        }
    }

    writer.shutdown();
}
