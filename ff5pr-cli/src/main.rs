use clap::Parser;
use std::path::PathBuf;

use ff5pr_core::{dump_builtin_catalog, run, GenerationSettings};

#[derive(Debug, Parser)]
#[command(name = "ff5pr-rando", version, about = "Final Fantasy V PR multiworld randomiser")]
struct Args {
    /// Settings JSON; flags below override its fields.
    #[arg(long)]
    settings: Option<PathBuf>,

    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    seed_name: Option<String>,

    #[arg(long)]
    player: Option<u32>,

    #[arg(long)]
    player_name: Option<String>,

    /// Catalog source JSON (defaults to the built-in tables).
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Directory of extracted game scripts.
    #[arg(long, required_unless_present_any = ["settings", "dump_catalog"])]
    scripts: Option<PathBuf>,

    #[arg(long)]
    extra_patches: Option<PathBuf>,

    /// Placement decided by the multiworld host.
    #[arg(long)]
    host_placements: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Debug-only: print the built-in catalog as JSON and exit.
    #[arg(long, hide = true)]
    dump_catalog: bool,
}

fn init_logging(debug: bool) -> Result<(), fern::InitError> {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

fn settings_from(args: Args) -> ff5pr_core::Result<GenerationSettings> {
    let mut settings = match &args.settings {
        Some(path) => GenerationSettings::load(path)?,
        None => GenerationSettings::default(),
    };
    if let Some(output) = args.output {
        settings.output_path = output;
    }
    if let Some(seed) = args.seed {
        settings.seed = seed;
    }
    if let Some(seed_name) = args.seed_name {
        settings.seed_name = seed_name;
    }
    if let Some(player) = args.player {
        settings.player = player;
    }
    if let Some(player_name) = args.player_name {
        settings.player_name = player_name;
    }
    if args.catalog.is_some() {
        settings.catalog_path = args.catalog;
    }
    if args.scripts.is_some() {
        settings.script_dir = args.scripts;
    }
    if args.extra_patches.is_some() {
        settings.extra_patch_dir = args.extra_patches;
    }
    if args.host_placements.is_some() {
        settings.host_placements = args.host_placements;
    }
    settings.debug |= args.debug;
    Ok(settings)
}

fn main() {
    let args = Args::parse();

    if args.dump_catalog {
        match dump_builtin_catalog() {
            Ok(json) => println!("{}", json),
            Err(err) => {
                eprintln!("Error: {err}");
                std::process::exit(1);
            }
        }
        return;
    }

    if let Err(err) = init_logging(args.debug) {
        eprintln!("Failed to initialise logging: {err}");
    }

    let result = settings_from(args).and_then(run);
    match result {
        Ok(path) => log::info!("bundle written to {}", path.display()),
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}
