//! XR/17032 / LIMNstation simulator CLI.
//!
//! A single `run` subcommand: load a boot ROM (and optional NVRAM image),
//! build the system, and drive it until a guest CPU powers the platform
//! off or the process receives `SIGINT`.

use std::io::Write as _;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};

use xr17032_core::config::Config;
use xr17032_core::sim::loader;
use xr17032_core::Simulator;

#[derive(Parser, Debug)]
#[command(name = "xrsim", author, version, about = "XR/17032 / LIMNstation simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Boot a LIMNstation system from a boot ROM image.
    Run {
        /// Flat boot ROM image, loaded at the platform board's ROM window.
        #[arg(short, long)]
        rom: PathBuf,
        /// Optional NVRAM image; written back on a clean shutdown.
        #[arg(long)]
        nvram: Option<PathBuf>,
        /// Optional JSON config overriding `Config::default()`.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Stats sections to print at shutdown (comma-separated).
        #[arg(long, value_delimiter = ',', default_value = "summary,core,memory")]
        stats: Vec<String>,
    },
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_signum: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

fn install_sigint_handler() {
    // SAFETY: `on_sigint` only touches a static `AtomicBool`, which is
    // signal-safe; this runs once before any worker threads exist.
    unsafe {
        let _ = libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t);
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { rom, nvram, config, stats } => cmd_run(&rom, nvram.as_deref(), config.as_deref(), &stats),
    }
}

fn load_config(path: Option<&std::path::Path>) -> Config {
    let Some(path) = path else { return Config::default() };
    let text = std::fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("could not read config {}: {e}", path.display());
        process::exit(1);
    });
    let config: Config = serde_json::from_str(&text).unwrap_or_else(|e| {
        eprintln!("invalid config {}: {e}", path.display());
        process::exit(1);
    });
    if let Err(e) = config.validate() {
        eprintln!("invalid config {}: {e}", path.display());
        process::exit(1);
    }
    config
}

fn cmd_run(rom: &std::path::Path, nvram: Option<&std::path::Path>, config_path: Option<&std::path::Path>, stats_sections: &[String]) {
    let config = load_config(config_path);
    install_sigint_handler();

    println!("LIMNstation: {} CPU(s), {} MiB RAM, {} worker thread(s)", config.system.num_cpus, config.system.ram_size / 1024 / 1024, config.scheduler.workers);

    let sim = Simulator::new(&config);
    loader::load_boot_rom(&sim, rom);
    if let Some(nvram_path) = nvram {
        loader::load_nvram(&sim, nvram_path);
    }

    let mut sim = sim;
    let exit_code = sim.run_until(|| SHUTDOWN_REQUESTED.load(Ordering::Relaxed));

    if nvram.is_some() {
        loader::save_nvram(&sim);
    }

    let sections: Vec<&str> = stats_sections.iter().map(String::as_str).collect();
    if !sections.is_empty() {
        sim.stats().print_sections(&sections);
    }

    match exit_code {
        Some(code) => {
            println!("\n[*] guest requested power-off, exit code {code}");
            let _ = std::io::stdout().flush().ok();
            process::exit(code as i32);
        }
        None => {
            println!("\n[*] interrupted");
        }
    }
}
