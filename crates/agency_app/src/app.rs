use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use agency_core::clock::SystemClock;
use agency_core::notifications::{Notification, NotificationSink};
use agency_core::reminder::{
    collect_candidates, NotifiedRecord, ReminderCandidate, ReminderCategory, ReminderLedger,
    ReminderSource,
};
use agency_core::store::FileStore;
use agency_core::task::TaskEntry;
use agency_core::{TaskPoller, TaskSource};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub actor_id: String,
    pub poll_interval: Duration,
    pub retention_days: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("AGENCY_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(actor) = std::env::var("AGENCY_ACTOR_ID") {
            if !actor.trim().is_empty() {
                config.actor_id = actor.trim().to_string();
            }
        }
        if let Ok(interval) = std::env::var("AGENCY_POLL_INTERVAL_SECS") {
            if let Ok(value) = interval.trim().parse::<u64>() {
                if value > 0 {
                    config.poll_interval = Duration::from_secs(value);
                }
            }
        }
        if let Ok(days) = std::env::var("AGENCY_RETENTION_DAYS") {
            if let Ok(value) = days.trim().parse::<i64>() {
                if value > 0 {
                    config.retention_days = value;
                }
            }
        }
        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("agency_data"),
            actor_id: "front-desk".to_string(),
            poll_interval: Duration::from_secs(30),
            retention_days: 30,
        }
    }
}

/// Task feed backed by JSON drop files, one per actor, the way the booking
/// backend exports them: `<data_dir>/tasks/<actor>.json`.
struct FileTaskFeed {
    root: PathBuf,
}

impl TaskSource for FileTaskFeed {
    fn fetch_tasks(&self, actor_id: &str) -> Result<Vec<TaskEntry>> {
        let path = self.root.join("tasks").join(format!("{actor_id}.json"));
        read_json_list(&path)
            .with_context(|| format!("task feed `{}` is unreadable", path.display()))
    }
}

/// Reminder feeds: `<data_dir>/reminders/flights.json` and `hotels.json`.
struct FileReminderFeed {
    root: PathBuf,
}

impl ReminderSource for FileReminderFeed {
    fn fetch_candidates(&self, category: ReminderCategory) -> Result<Vec<ReminderCandidate>> {
        let file = match category {
            ReminderCategory::Flight => "flights.json",
            ReminderCategory::Hotel => "hotels.json",
        };
        let path = self.root.join("reminders").join(file);
        read_json_list(&path)
            .with_context(|| format!("reminder feed `{}` is unreadable", path.display()))
    }
}

/// An absent feed file means the backend has nothing for us yet.
fn read_json_list<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

/// Prints toasts straight to the terminal; the console has no overlay layer.
struct TerminalSink;

impl NotificationSink for TerminalSink {
    fn notify(&self, notification: Notification) {
        let secs = notification.suggested_duration().as_secs();
        println!();
        println!("  ** {} (auto-dismiss after {secs}s) **", notification.message);
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Tasks,
    Pending,
    Notified,
    Remind {
        category: ReminderCategory,
        booking_ref: String,
    },
    Remove {
        index: usize,
    },
    Clear,
    Prune,
    Refresh,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut parts = line.split_whitespace();
    let Some(head) = parts.next() else {
        return Err("empty command".to_string());
    };
    match head {
        "tasks" => Ok(Command::Tasks),
        "pending" => Ok(Command::Pending),
        "notified" => Ok(Command::Notified),
        "remind" => {
            let usage = "usage: remind <flight|hotel> <booking-ref>".to_string();
            let category = match parts.next() {
                Some("flight") => ReminderCategory::Flight,
                Some("hotel") => ReminderCategory::Hotel,
                _ => return Err(usage),
            };
            let Some(booking_ref) = parts.next() else {
                return Err(usage);
            };
            Ok(Command::Remind {
                category,
                booking_ref: booking_ref.to_string(),
            })
        }
        "remove" => {
            let Some(token) = parts.next() else {
                return Err("usage: remove <row-index>".to_string());
            };
            let index = token
                .parse::<usize>()
                .map_err(|_| format!("`{token}` is not a row index"))?;
            Ok(Command::Remove { index })
        }
        "clear" => Ok(Command::Clear),
        "prune" => Ok(Command::Prune),
        "refresh" => Ok(Command::Refresh),
        "help" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(format!("unknown command `{other}`, try `help`")),
    }
}

const HELP_TEXT: &str = "\
commands:
  tasks                          show the last observed task list
  refresh                        fetch the task list right now
  pending                        customers still waiting for a reminder
  notified                       customers already reminded
  remind <flight|hotel> <ref>    record a reminder for a booking
  remove <row-index>             drop one row from the notified history
  prune                          drop history rows past the retention window
  clear                          wipe the notified history
  quit                           leave the console";

struct ConsoleController {
    config: AppConfig,
    poller: TaskPoller,
    ledger: ReminderLedger,
    reminders: FileReminderFeed,
}

impl ConsoleController {
    fn new(config: AppConfig) -> Result<Self> {
        info!(
            data_dir = %config.data_dir.display(),
            actor_id = %config.actor_id,
            "initializing console"
        );
        let store = FileStore::open(config.data_dir.join("state"))
            .context("failed to open the state store")?;
        let ledger = ReminderLedger::open(
            Arc::new(store),
            Arc::new(SystemClock),
            config.retention_days,
        )
        .context("failed to open the reminder ledger")?;
        let poller = TaskPoller::new(
            Arc::new(FileTaskFeed {
                root: config.data_dir.clone(),
            }),
            Arc::new(TerminalSink),
        );
        let reminders = FileReminderFeed {
            root: config.data_dir.clone(),
        };
        Ok(Self {
            config,
            poller,
            ledger,
            reminders,
        })
    }

    fn start(&mut self) -> Result<()> {
        self.poller
            .start(&self.config.actor_id, self.config.poll_interval)?;
        info!(
            actor_id = %self.config.actor_id,
            interval_secs = self.config.poll_interval.as_secs(),
            "task polling started"
        );
        Ok(())
    }

    fn shutdown(&mut self) {
        self.poller.stop();
        info!("console shut down");
    }

    fn dispatch(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Tasks => {
                match self.poller.snapshot() {
                    Some(tasks) => print_tasks(&tasks),
                    None => println!("no task snapshot yet, try `refresh`"),
                }
            }
            Command::Refresh => {
                self.poller.poll_now(&self.config.actor_id);
                match self.poller.snapshot() {
                    Some(tasks) => print_tasks(&tasks),
                    None => println!("task feed unavailable"),
                }
            }
            Command::Pending => {
                let candidates = collect_candidates(&self.reminders)?;
                print_pending(&self.ledger.pending(&candidates));
            }
            Command::Notified => print_notified(self.ledger.notified()),
            Command::Remind {
                category,
                booking_ref,
            } => self.remind(category, &booking_ref)?,
            Command::Remove { index } => {
                if self.ledger.remove(index)? {
                    println!("row {index} removed");
                } else {
                    println!("no row {index} in the notified history");
                }
            }
            Command::Clear => {
                if confirm("Wipe the entire notified history? [y/N] ")? {
                    self.ledger.clear_all()?;
                    println!("notified history cleared");
                } else {
                    println!("cancelled");
                }
            }
            Command::Prune => {
                let dropped = self.ledger.prune()?;
                println!(
                    "dropped {dropped} row(s) older than {} days",
                    self.config.retention_days
                );
            }
            Command::Help => println!("{HELP_TEXT}"),
            Command::Quit => {}
        }
        Ok(())
    }

    fn remind(&mut self, category: ReminderCategory, booking_ref: &str) -> Result<()> {
        let candidates = collect_candidates(&self.reminders)?;
        let Some(candidate) = candidates
            .iter()
            .find(|candidate| candidate.category == category && candidate.booking_ref == booking_ref)
        else {
            println!("no {category} candidate with booking ref `{booking_ref}`");
            return Ok(());
        };

        let prompt = format!(
            "Send {} reminder to {} <{}>? [y/N] ",
            candidate.category, candidate.name, candidate.email
        );
        let confirmed = confirm(&prompt)?;
        if self.ledger.promote(candidate, confirmed)? {
            println!("recorded: {} has been reminded", candidate.name);
        } else if confirmed {
            println!("{} was already in the notified history", candidate.name);
        } else {
            println!("cancelled");
        }
        Ok(())
    }
}

fn print_tasks(tasks: &[TaskEntry]) {
    if tasks.is_empty() {
        println!("no open tasks");
        return;
    }
    println!("{:<10} {:<12} NAME", "ID", "STATUS");
    for task in tasks {
        println!(
            "{:<10} {:<12} {}",
            task.id.to_string(),
            task.status,
            task.name
        );
    }
}

fn print_pending(pending: &[ReminderCandidate]) {
    if pending.is_empty() {
        println!("nobody is waiting for a reminder");
        return;
    }
    println!(
        "{:<10} {:<8} {:<20} {:<26} DATE",
        "BOOKING", "KIND", "NAME", "EMAIL"
    );
    for candidate in pending {
        println!(
            "{:<10} {:<8} {:<20} {:<26} {}",
            candidate.booking_ref,
            candidate.category.to_string(),
            candidate.name,
            candidate.email,
            candidate.date
        );
    }
}

fn print_notified(notified: &[NotifiedRecord]) {
    if notified.is_empty() {
        println!("the notified history is empty");
        return;
    }
    println!(
        "{:<5} {:<10} {:<8} {:<20} NOTIFIED AT",
        "ROW", "BOOKING", "KIND", "NAME"
    );
    for (index, record) in notified.iter().enumerate() {
        println!(
            "{:<5} {:<10} {:<8} {:<20} {}",
            index,
            record.customer.booking_ref,
            record.customer.category.to_string(),
            record.customer.name,
            record.notified_at.format("%Y-%m-%d %H:%M")
        );
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn prompt_line(prompt: &str) -> Result<Option<String>> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    let read = io::stdin().read_line(&mut line)?;
    if read == 0 {
        Ok(None)
    } else {
        Ok(Some(line))
    }
}

pub fn run(config: AppConfig) -> Result<()> {
    let mut controller = ConsoleController::new(config)?;
    controller.start()?;
    println!("Wayfare operations console. Type `help` for commands.");

    loop {
        let Some(line) = prompt_line("wayfare> ")? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_command(line) {
            Err(message) => println!("{message}"),
            Ok(Command::Quit) => break,
            Ok(command) => {
                if let Err(err) = controller.dispatch(command) {
                    warn!(%err, "command failed");
                    println!("error: {err:#}");
                }
            }
        }
    }

    controller.shutdown();
    Ok(())
}
