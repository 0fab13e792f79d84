//! mac-command
//!
//! Command shell for the `mac_fpga` multiply-accumulate peer on a
//! Raspberry Pi.
//!
//! # Usage
//!
//! ```bash
//! # Interactive session on the default pins
//! mac-command
//!
//! # Same, against the simulated peer, printing shadow registers
//! mac-command --sim --show-shadow
//!
//! # Run a command script
//! mac-command run bench.mac
//!
//! # Write a default configuration file
//! mac-command config init -o mac-command.toml
//!
//! # Log every transaction (-v) or every clock pulse (-vv)
//! mac-command --sim -vv
//! ```
//!
//! `RUST_LOG` overrides the `-v` levels, e.g. `RUST_LOG=mac_command=trace`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use mac_command::config::BackendKind;
use mac_command::gpio::SimGpio;
use mac_command::shell::{spawn_stdin_reader, Transcript};
use mac_command::{Config, Gpio, MacDriver, Shell};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

/// MAC peer command shell
#[derive(Parser)]
#[command(name = "mac-command")]
#[command(author = "Prasanna Gautam")]
#[command(version = "0.1.0")]
#[command(about = "Drive the FPGA multiply-accumulate peer over GPIO")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use the simulated peer instead of /dev/gpiomem
    #[arg(long, global = true)]
    sim: bool,

    /// Settle delay around each clock edge, in microseconds
    #[arg(long, global = true)]
    delay_us: Option<u64>,

    /// CLOCK pin (BCM numbering)
    #[arg(long, global = true)]
    clock: Option<u8>,

    /// CMD1 pin (BCM numbering)
    #[arg(long, global = true)]
    cmd1: Option<u8>,

    /// CMD0 pin (BCM numbering)
    #[arg(long, global = true)]
    cmd0: Option<u8>,

    /// DATA pin (BCM numbering)
    #[arg(long, global = true)]
    data: Option<u8>,

    /// Print shadow registers after each operation
    #[arg(long, global = true)]
    show_shadow: bool,

    /// Append a timestamped session transcript to this file
    #[arg(long, global = true)]
    transcript: Option<PathBuf>,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session on stdin (default)
    Shell,

    /// Execute commands from a script file
    Run {
        /// Script with one command per line
        script: PathBuf,
    },

    /// Configuration file operations
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level(cli.verbose)),
    )
    .init();

    let config = load_config(&cli)?;

    match cli.command {
        None | Some(Commands::Shell) => run_shell(&config),
        Some(Commands::Run { ref script }) => run_script(&config, script),
        Some(Commands::Config(ConfigCommands::Show)) => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Some(Commands::Config(ConfigCommands::Init { ref output })) => {
            init_config(output.as_deref())
        }
    }
}

fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Defaults, then the config file, then command-line overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match cli.config {
        Some(ref path) => Config::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => Config::default(),
    };

    if cli.sim {
        config.backend.kind = BackendKind::Sim;
    }
    if let Some(us) = cli.delay_us {
        config.timing.settle_us = us;
    }
    if let Some(pin) = cli.clock {
        config.pins.clock = pin;
    }
    if let Some(pin) = cli.cmd1 {
        config.pins.cmd1 = pin;
    }
    if let Some(pin) = cli.cmd0 {
        config.pins.cmd0 = pin;
    }
    if let Some(pin) = cli.data {
        config.pins.data = pin;
    }
    if cli.show_shadow {
        config.shell.show_shadow = true;
    }
    if let Some(ref path) = cli.transcript {
        config.shell.transcript = Some(path.clone());
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_config(output: Option<&Path>) -> Result<()> {
    let text = Config::default().to_toml()?;
    match output {
        Some(path) => {
            fs::write(path, text)
                .with_context(|| format!("Failed to write config: {}", path.display()))?;
            println!(
                "{} Wrote default configuration to {}",
                "[OK]".green().bold(),
                path.display()
            );
        }
        None => print!("{}", text),
    }
    Ok(())
}

fn open_backend(config: &Config) -> Result<Box<dyn Gpio>> {
    match config.backend.kind {
        BackendKind::Sim => {
            log::info!("using simulated peer");
            Ok(Box::new(SimGpio::new(config.pins)))
        }
        #[cfg(unix)]
        BackendKind::Gpiomem => {
            let gpio = mac_command::gpio::BcmGpio::open(&config.backend.device, config.backend.soc)
                .context("Failed to initialize GPIO")?;
            Ok(Box::new(gpio))
        }
        #[cfg(not(unix))]
        BackendKind::Gpiomem => anyhow::bail!("the gpiomem backend requires a Unix host; use --sim"),
    }
}

fn build_shell(config: &Config) -> Result<Shell<Box<dyn Gpio>, io::Stdout>> {
    let gpio = open_backend(config)?;
    let driver = MacDriver::new(gpio, config.pins, config.timing.settle())
        .context("Failed to initialize MAC peer")?;

    println!(
        "{} Pins ready (clock {}, cmd1 {}, cmd0 {}, data {}), settle {}us",
        "[OK]".green().bold(),
        config.pins.clock,
        config.pins.cmd1,
        config.pins.cmd0,
        config.pins.data,
        config.timing.settle_us
    );

    let mut shell = Shell::new(driver, io::stdout()).with_show_shadow(config.shell.show_shadow);
    if let Some(ref path) = config.shell.transcript {
        shell = shell.with_transcript(Transcript::create(path)?);
        println!("{} Transcript: {}", "[*]".cyan(), path.display());
    }
    Ok(shell)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")
}

fn run_shell(config: &Config) -> Result<()> {
    let runtime = runtime()?;

    runtime.block_on(async {
        // Register handlers before touching the pins so an early signal
        // still goes through the orderly release path.
        let shutdown = shutdown_signal()?;
        let mut shell = build_shell(config)?;
        println!("{} Type 'help' for commands", "[*]".cyan());

        let mut lines = spawn_stdin_reader();
        let result = shell.run(&mut lines, shutdown).await;
        let released = shell.finish();
        result?;
        released?;
        Ok::<(), anyhow::Error>(())
    })?;

    // The stdin reader thread may still be blocked; it ends with the process.
    runtime.shutdown_background();
    Ok(())
}

fn run_script(config: &Config, script: &Path) -> Result<()> {
    let file = File::open(script)
        .with_context(|| format!("Failed to open script: {}", script.display()))?;

    runtime()?.block_on(async {
        // same ordering as the interactive shell: handlers first, then pins
        let shutdown = shutdown_signal()?;
        let mut shell = build_shell(config)?;

        let result = shell.run_script(BufReader::new(file), shutdown).await;
        let released = shell.finish();
        result?;
        released?;
        Ok::<(), anyhow::Error>(())
    })
}

#[cfg(unix)]
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt()).context("Failed to register SIGINT")?;
    let mut terminate = signal(SignalKind::terminate()).context("Failed to register SIGTERM")?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => log::info!("received SIGINT"),
            _ = terminate.recv() => log::info!("received SIGTERM"),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    Ok(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("received Ctrl-C");
        }
    })
}
