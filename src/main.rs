use chrono::{Local, NaiveDateTime};
use clap::{Parser, Subcommand};
use signage_flow::config::Config;
use signage_flow::controller::Controller;
use signage_flow::driver::{NullDriver, TimedDriver};
use signage_flow::error::Result;
use signage_flow::play_log::PlayLog;
use signage_flow::runtime::{self, Cadence, SystemClock};
use signage_flow::schedule::{self, Schedule};
use signage_flow::store::JsonStateStore;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "signageflow", about = "Digital signage scheduling engine")]
struct Cli {
    /// Config file (default: ~/.config/signageflow/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine in the foreground until Ctrl-C
    ///
    /// The engine keeps its state in memory and saves it after every change.
    /// Edits made with the other subcommands while it runs are overwritten;
    /// stop the engine first.
    Run,
    /// Show groups, schedules and interval countdowns
    Status,
    /// Group management
    Group {
        #[command(subcommand)]
        action: GroupCmd,
    },
    /// Media item management
    Item {
        #[command(subcommand)]
        action: ItemCmd,
    },
    /// Restrict the main queue to some groups
    Filter {
        #[command(subcommand)]
        action: FilterCmd,
    },
    /// Rebuild the queue when it runs out (default) or stop
    Repeat {
        #[command(subcommand)]
        action: RepeatCmd,
    },
}

#[derive(Subcommand)]
enum GroupCmd {
    /// Create a new group
    Add { name: String },
    /// Delete a group (items stay registered)
    Remove { name: String },
    /// Rename a group
    Rename { old: String, new: String },
    /// Set or clear a group's schedule
    Schedule {
        name: String,
        /// Window start (HH:MM or HH:MM:SS)
        #[arg(long)]
        start: Option<String>,
        /// Window end (HH:MM or HH:MM:SS); earlier than start spans midnight
        #[arg(long)]
        end: Option<String>,
        /// Days: "mon,tue", "0,1", "weekdays", "weekend" or "daily"
        #[arg(long)]
        days: Option<String>,
        /// Make this an interval group running every N minutes
        #[arg(long)]
        every: Option<u32>,
        /// Remove the schedule (the group stops taking part)
        #[arg(long, conflicts_with_all = ["start", "end", "days", "every"])]
        clear: bool,
    },
    /// List groups and their schedules
    List,
}

#[derive(Subcommand)]
enum ItemCmd {
    /// Register media file(s)
    Add {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Also put the files into this group
        #[arg(short, long)]
        group: Option<String>,
    },
    /// Register every supported file in a folder (not recursive)
    Scan {
        dir: PathBuf,
        #[arg(short, long)]
        group: Option<String>,
    },
    /// Put a file into a group
    Assign { file: PathBuf, group: String },
    /// Take a file out of a group
    Unassign { file: PathBuf, group: String },
    /// Set display duration and loop count
    Set {
        file: PathBuf,
        /// Seconds to show the item (0 = natural length)
        #[arg(short, long)]
        duration: Option<f64>,
        /// Plays per dispatch (0 = forever)
        #[arg(short, long)]
        loops: Option<u32>,
    },
    /// List registered items
    List {
        #[arg(short, long)]
        group: Option<String>,
    },
}

#[derive(Subcommand)]
enum FilterCmd {
    /// Only play these groups
    Set {
        #[arg(required = true)]
        groups: Vec<String>,
    },
    /// Play every active group
    Clear,
}

#[derive(Subcommand)]
enum RepeatCmd {
    On,
    Off,
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(&config.log_level);

    let result = match cli.command {
        Commands::Run => run(&config).await,
        command => manage(command, &config),
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: &Config) -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let driver = TimedDriver::new(event_tx, config.video_fallback());
    let store = JsonStateStore::new(&config.state_file);
    let controller = Controller::load(Box::new(store), Box::new(driver), now())?
        .with_play_log(PlayLog::new(&config.play_log_path()))
        .with_target_size(config.target_size())
        .with_image_duration(config.image_duration());

    let cadence = Cadence {
        tick: config.tick_interval(),
        sweep: config.sweep_interval(),
    };
    info!(state = %config.state_file.display(), "signageflow starting");
    let (handle, task) = runtime::spawn_engine(controller, event_rx, cadence, SystemClock);

    let mut status = handle.subscribe();
    let printer = tokio::spawn(async move {
        let mut last_line = String::new();
        while status.changed().await.is_ok() {
            let text = status.borrow_and_update().clone();
            // The clock line changes every tick; only echo the rest when it moves.
            let rest = text.lines().skip(1).collect::<Vec<_>>().join(" | ");
            if rest != last_line {
                println!("{}", rest);
                last_line = rest;
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.shutdown();
    join_engine(task).await;
    printer.abort();
    Ok(())
}

/// Wait for the engine task. Returns false if it panicked or was cancelled.
async fn join_engine(task: tokio::task::JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            warn!("engine task failed: {}", e);
            false
        }
    }
}

/// Offline edits: load state, apply, save.
fn manage(command: Commands, config: &Config) -> Result<()> {
    let store = JsonStateStore::new(&config.state_file);
    let mut c = Controller::load(Box::new(store), Box::new(NullDriver), now())?
        .with_image_duration(config.image_duration());

    match command {
        // Handled by run().
        Commands::Run => {}
        Commands::Status => {
            println!("signageFlow v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Groups: {} | Items: {} | Repeat: {} | Filter: {}",
                c.registry().groups().len(),
                c.registry().items().len(),
                if c.repeat() { "on" } else { "off" },
                join_or(c.filter(), "none")
            );
            println!("{}", c.status_text(now()));
        }
        Commands::Group { action } => match action {
            GroupCmd::Add { name } => {
                c.add_group(&name)?;
                println!("Created group '{}'", name.trim());
            }
            GroupCmd::Remove { name } => {
                c.delete_group(&name)?;
                println!("Deleted group '{}'", name);
            }
            GroupCmd::Rename { old, new } => {
                c.rename_group(&old, &new, now())?;
                println!("Renamed '{}' to '{}'", old, new.trim());
            }
            GroupCmd::Schedule {
                name,
                start,
                end,
                days,
                every,
                clear,
            } => {
                let schedule = if clear {
                    None
                } else {
                    Some(build_schedule(start, end, days, every)?)
                };
                c.edit_schedule(&name, schedule, now())?;
                println!("Schedule for '{}' saved.", name);
            }
            GroupCmd::List => {
                let at = now();
                if c.registry().groups().is_empty() {
                    println!("No groups.");
                }
                for g in c.registry().groups() {
                    let members = c.registry().items_in(&g.name).len();
                    match &g.schedule {
                        Some(s) => {
                            let every = s
                                .run_interval()
                                .map(|m| format!(" every {} min", m))
                                .unwrap_or_default();
                            println!(
                                "{:<20} {:<8} {} {}{} | {} item(s){}",
                                g.name,
                                s.kind(),
                                s.window_display(),
                                s.days_display(),
                                every,
                                members,
                                if s.is_active_at(at) { " | active" } else { "" }
                            );
                        }
                        None => println!("{:<20} (no schedule) | {} item(s)", g.name, members),
                    }
                }
            }
        },
        Commands::Item { action } => match action {
            ItemCmd::Add { files, group } => {
                for file in &files {
                    let file = absolute(file);
                    match &group {
                        Some(g) => {
                            c.assign_group(&file, g)?;
                        }
                        None => {
                            c.add_item(&file);
                        }
                    }
                }
                println!("Registered {} file(s)", files.len());
            }
            ItemCmd::Scan { dir, group } => {
                let added = c.scan_folder(&absolute(&dir), group.as_deref())?;
                println!("Added {} new file(s) from {}", added, dir.display());
            }
            ItemCmd::Assign { file, group } => {
                if c.assign_group(&absolute(&file), &group)? {
                    println!("Added '{}' to '{}'", file.display(), group);
                } else {
                    println!("'{}' is already in '{}'", file.display(), group);
                }
            }
            ItemCmd::Unassign { file, group } => {
                if c.remove_from_group(&absolute(&file), &group)? {
                    println!("Removed '{}' from '{}'", file.display(), group);
                } else {
                    println!("'{}' was not in '{}'", file.display(), group);
                }
            }
            ItemCmd::Set {
                file,
                duration,
                loops,
            } => {
                let file = absolute(&file);
                let current = c
                    .registry()
                    .item(&file)
                    .map(|i| (i.duration, i.loop_count));
                let (cur_duration, cur_loops) = current.unwrap_or((None, 1));
                let duration = match duration {
                    Some(secs) if secs > 0.0 => Some(Duration::from_secs_f64(secs)),
                    Some(_) => None,
                    None => cur_duration,
                };
                c.set_item_playback(&file, duration, loops.unwrap_or(cur_loops))?;
                if let Some(item) = c.registry().item(&file) {
                    println!("{}", item.label());
                }
            }
            ItemCmd::List { group } => {
                let items: Vec<_> = c
                    .registry()
                    .items()
                    .iter()
                    .filter(|i| group.as_deref().is_none_or(|g| i.in_group(g)))
                    .collect();
                if items.is_empty() {
                    println!("No items.");
                }
                for (n, item) in items.iter().enumerate() {
                    println!("{:>3}. {}", n + 1, item.label());
                }
            }
        },
        Commands::Filter { action } => match action {
            FilterCmd::Set { groups } => {
                let groups: BTreeSet<String> = groups.into_iter().collect();
                println!("Filter: {}", join_or(&groups, "none"));
                c.set_filter(groups);
            }
            FilterCmd::Clear => {
                c.set_filter(BTreeSet::new());
                println!("Filter cleared.");
            }
        },
        Commands::Repeat { action } => {
            let on = matches!(action, RepeatCmd::On);
            c.set_repeat(on);
            println!("Repeat {}", if on { "on" } else { "off" });
        }
    }
    Ok(())
}

fn build_schedule(
    start: Option<String>,
    end: Option<String>,
    days: Option<String>,
    every: Option<u32>,
) -> Result<Schedule> {
    use signage_flow::error::EngineError;

    let start = start
        .map(|s| schedule::parse_time(&s))
        .transpose()
        .map_err(EngineError::InvalidSchedule)?;
    let end = end
        .map(|s| schedule::parse_time(&s))
        .transpose()
        .map_err(EngineError::InvalidSchedule)?;
    let days = days
        .map(|s| schedule::parse_days(&s))
        .transpose()
        .map_err(EngineError::InvalidSchedule)?
        .unwrap_or_default();
    if every == Some(0) {
        return Err(EngineError::InvalidSchedule(
            "interval must be at least one minute".to_string(),
        ));
    }
    Ok(Schedule {
        start,
        end,
        days,
        interval_minutes: every,
        interval_group: every.is_some(),
    })
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn join_or(set: &BTreeSet<String>, empty: &str) -> String {
    if set.is_empty() {
        empty.to_string()
    } else {
        set.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}
