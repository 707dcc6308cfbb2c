use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DATA_FILE_NAME: &str = ".productivity_timer_data.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Track,
    Stats,
    ExportCsv(PathBuf),
    Help,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_path: PathBuf,
    pub poll_interval: Duration,
    pub refresh_interval: Duration,
    pub target_path: Option<String>,
    pub target_name: Option<String>,
    pub mode: Mode,
}

impl Config {
    pub fn from_args() -> Result<Self> {
        Self::parse(env::args().skip(1))
    }

    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut data_path = default_data_path();
        let mut poll_ms: u64 = 1000;
        let mut refresh_ms: u64 = 100;
        let mut target_path = None;
        let mut target_name = None;
        let mut mode = Mode::Track;

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--data" => {
                    let value = args.next().context("missing value for --data")?;
                    data_path = PathBuf::from(value);
                }
                "--poll-ms" => {
                    let value = args.next().context("missing value for --poll-ms")?;
                    poll_ms = value
                        .parse::<u64>()
                        .with_context(|| format!("invalid --poll-ms value: {value}"))?;
                }
                "--refresh-ms" => {
                    let value = args.next().context("missing value for --refresh-ms")?;
                    refresh_ms = value
                        .parse::<u64>()
                        .with_context(|| format!("invalid --refresh-ms value: {value}"))?;
                }
                "--app" => {
                    target_path = Some(args.next().context("missing value for --app")?);
                }
                "--name" => {
                    target_name = Some(args.next().context("missing value for --name")?);
                }
                "--stats" => mode = Mode::Stats,
                "--export-csv" => {
                    let value = args.next().context("missing value for --export-csv")?;
                    mode = Mode::ExportCsv(PathBuf::from(value));
                }
                "--help" | "-h" => mode = Mode::Help,
                _ => bail!("unknown argument: {arg}"),
            }
        }

        if poll_ms == 0 {
            bail!("--poll-ms must be greater than zero");
        }
        if refresh_ms == 0 {
            bail!("--refresh-ms must be greater than zero");
        }
        if target_name.is_some() && target_path.is_none() {
            bail!("--name requires --app");
        }

        Ok(Self {
            data_path,
            poll_interval: Duration::from_millis(poll_ms),
            refresh_interval: Duration::from_millis(refresh_ms),
            target_path,
            target_name,
            mode,
        })
    }

    /// True when only the options shared with the timer window were given.
    pub fn is_window_compatible(&self) -> bool {
        self.target_path.is_none() && matches!(self.mode, Mode::Track | Mode::Help)
    }
}

pub fn default_data_path() -> PathBuf {
    home_dir()
        .map(|home| home.join(DATA_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(DATA_FILE_NAME))
}

fn home_dir() -> Option<PathBuf> {
    let candidates: [&str; 2] = if cfg!(windows) {
        ["USERPROFILE", "HOME"]
    } else {
        ["HOME", "USERPROFILE"]
    };
    candidates
        .into_iter()
        .filter_map(env::var_os)
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}

pub fn print_help() {
    println!(
        "\
Productivity Timer Tracker

Usage:
  prodtimer-tracker --app <path> [--name <label>] [--data <path>] [--poll-ms <ms>] [--refresh-ms <ms>]
  prodtimer-tracker --stats [--data <path>]
  prodtimer-tracker --export-csv <file> [--data <path>]

Options:
  --app          Executable of the application to track
  --name         Display name used for statistics (default: executable file name)
  --data         JSON data file (default: ~/{DATA_FILE_NAME})
  --poll-ms      Process poll interval in milliseconds (default: 1000)
  --refresh-ms   Elapsed-time refresh interval in milliseconds (default: 100)
  --stats        Print per-application usage totals and exit
  --export-csv   Write every recorded session as CSV and exit
  -h, --help     Print this help"
    );
}
