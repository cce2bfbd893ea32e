use anyhow::{Context, bail};
use audio_scheduler::config::AppConfig;
use audio_scheduler::logging;
use audio_scheduler::playback::{PlaybackOutcome, Volume};
use audio_scheduler::schedule::TimeOfDay;
use audio_scheduler::{AudioScheduler, PlaySource};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use tracing::Level;

#[derive(Parser)]
#[command(name = "audio-scheduler", about = "Play audio files at fixed times every day")]
struct Cli {
    /// Directory holding schedule.json, config.json and log.txt
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Notification cue played before every file
    #[arg(long, global = true)]
    cue: Option<PathBuf>,
    /// Playback volume, 0.0 to 1.0
    #[arg(long, global = true)]
    volume: Option<f32>,
    /// More diagnostic output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until Ctrl-C
    Run,
    /// Schedule a file: `add HH:MM FILE` or `add HOUR MINUTE FILE`
    Add {
        #[arg(num_args = 2..=3, required = true, value_name = "TIME FILE")]
        args: Vec<String>,
    },
    /// Remove the entry at a time
    Remove {
        /// Time of day (HH:MM)
        time: String,
    },
    /// List scheduled entries
    List,
    /// Play a file, or a scheduled entry, right now
    Play {
        /// Audio file to play
        file: Option<PathBuf>,
        /// Play the entry scheduled at this time instead
        #[arg(long, conflicts_with = "file")]
        at: Option<String>,
    },
    /// List output devices
    Devices,
    /// Select the output device
    SetDevice {
        /// Exact device name as shown by `devices`
        #[arg(required_unless_present = "default")]
        name: Option<String>,
        /// Use the system default device
        #[arg(long, conflicts_with = "name")]
        default: bool,
    },
    /// Show recent audit log entries
    History {
        #[arg(short, default_value_t = 20)]
        n: usize,
    },
}

fn main() {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    logging::init_logging(level);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = AppConfig::new(cli.data_dir.unwrap_or_else(AppConfig::default_data_dir));
    if let Some(cue) = cli.cue {
        config.cue_path = cue;
    }
    if let Some(v) = cli.volume {
        config.volume = Volume::new(v)?;
    }
    let app = Arc::new(AudioScheduler::open(config));

    match cli.command {
        Commands::Run => {
            let (tx, rx) = mpsc::channel();
            ctrlc::set_handler(move || {
                let _ = tx.send(());
            })
            .context("cannot install Ctrl-C handler")?;

            app.start().context("cannot start scheduler")?;
            println!(
                "Scheduler running with {} entr{} (data in {}). Press Ctrl-C to stop.",
                app.job_count(),
                if app.job_count() == 1 { "y" } else { "ies" },
                app.config().data_dir.display()
            );
            let _ = rx.recv();
            println!("Shutting down...");
            app.shutdown().context("cannot save settings")?;
        }
        Commands::Add { args } => {
            let (time, file) = match args.as_slice() {
                [time, file] => (time.parse::<TimeOfDay>()?, file),
                [hour, minute, file] => (TimeOfDay::from_parts(hour, minute)?, file),
                _ => bail!("expected `add HH:MM FILE` or `add HOUR MINUTE FILE`"),
            };
            let replaced = app.add(&time.to_string(), file)?;
            match replaced {
                Some(old) => println!("{} now plays {} (was {})", time, file, old.display()),
                None => println!("Scheduled {} at {}", file, time),
            }
        }
        Commands::Remove { time } => match app.remove(&time)? {
            Some(file) => println!("Removed {} - {}", time, file.display()),
            None => println!("Nothing scheduled at {}", time),
        },
        Commands::List => {
            let entries = app.list();
            if entries.is_empty() {
                println!("No scheduled entries.");
            }
            for entry in entries {
                println!("{}", entry);
            }
        }
        Commands::Play { file, at } => {
            let source = match (file, at) {
                (Some(file), _) => PlaySource::File(file),
                (None, Some(at)) => PlaySource::Entry(at.parse()?),
                (None, None) => bail!("give a FILE or --at HH:MM"),
            };
            let stopper = app.clone();
            ctrlc::set_handler(move || {
                stopper.stop();
            })
            .context("cannot install Ctrl-C handler")?;

            let task = app.test_play(source)?;
            match task.wait() {
                Some(PlaybackOutcome::Played { device }) => println!("Played on {}", device),
                Some(PlaybackOutcome::Stopped) => println!("Stopped."),
                Some(PlaybackOutcome::Failed(message)) => bail!(message),
                None => bail!("playback thread panicked"),
            }
            app.shutdown().context("cannot save settings")?;
        }
        Commands::Devices => {
            let selected = app.selected_device();
            let devices = app.devices()?;
            if devices.is_empty() {
                println!("No output devices found.");
            }
            for device in &devices {
                let marker = if selected.as_deref() == Some(device.name.as_str()) { "*" } else { " " };
                println!(
                    "{} [{}] {} ({} ch)",
                    marker, device.index, device.name, device.max_output_channels
                );
            }
            match selected {
                Some(name) if !devices.iter().any(|d| d.name == name) => {
                    println!("Selected device '{}' is not present; the system default will be used.", name)
                }
                None => println!("Using the system default device."),
                _ => {}
            }
        }
        Commands::SetDevice { name, default } => {
            let name = if default { None } else { name };
            app.set_device(name.clone())?;
            println!("Output device: {}", name.as_deref().unwrap_or("system default"));
        }
        Commands::History { n } => {
            for entry in app.audit().tail(n) {
                println!("{} - {}", entry.timestamp, entry.message);
            }
        }
    }
    Ok(())
}
