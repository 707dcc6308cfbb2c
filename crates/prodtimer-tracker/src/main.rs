use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

use prodtimer_tracker::config::{print_help, Config, Mode};
use prodtimer_tracker::store::export_sessions_csv;
use prodtimer_tracker::{
    format_elapsed, init_logging, spawn_poll_worker, unix_seconds_now, DataFileGuard, Phase,
    Recorder, Store, SystemProcessTable, TargetApp,
};

fn main() -> Result<()> {
    init_logging();
    let config = Config::from_args()?;

    match &config.mode {
        Mode::Help => {
            print_help();
            Ok(())
        }
        Mode::Stats => print_stats(&config.data_path),
        Mode::ExportCsv(output_path) => export_csv(&config.data_path, output_path),
        Mode::Track => {
            let _data_guard = match DataFileGuard::acquire(&config.data_path)? {
                Some(guard) => guard,
                None => {
                    warn!(data = %config.data_path.display(), "data file is in use by another timer");
                    return Ok(());
                }
            };
            track(&config)
        }
    }
}

fn track(config: &Config) -> Result<()> {
    let target_path = config
        .target_path
        .as_deref()
        .context("--app is required for tracking (see --help)")?;
    let target = TargetApp::from_path(target_path, config.target_name.as_deref())?;

    let mut store = Store::load(&config.data_path);
    store.add_recent_app(target.clone());
    let mut recorder = Recorder::new(target);

    let worker = spawn_poll_worker(SystemProcessTable::new(), config.poll_interval);
    worker.retarget(recorder.poll_target());

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = Arc::clone(&shutdown);
    if let Err(err) = ctrlc::set_handler(move || {
        shutdown_signal.store(true, Ordering::SeqCst);
    }) {
        warn!("ctrlc handler registration failed: {err}");
    }

    info!(
        app = %recorder.target().display_name,
        path = %recorder.target().path,
        data = %store.path().display(),
        poll_ms = config.poll_interval.as_millis() as u64,
        refresh_ms = config.refresh_interval.as_millis() as u64,
        "tracker started"
    );

    let mut shown = String::new();
    while !shutdown.load(Ordering::Relaxed) {
        for result in worker.drain() {
            recorder.ingest(&result, &mut store);
        }
        let now = unix_seconds_now();

        let elapsed = format_elapsed(recorder.refresh(now));
        let status = format!(
            "{} {elapsed} {}",
            recorder.target().display_name,
            phase_label(recorder.phase())
        );
        if status != shown {
            print_status(&status);
            shown = status;
        }
        thread::sleep(config.refresh_interval);
    }

    // Finalize before the poll worker goes away.
    if let Some(record) = recorder.close(unix_seconds_now(), &mut store) {
        println!();
        info!(duration = %format_elapsed(record.duration_seconds as f64), "final session saved");
    }
    worker.shutdown();
    info!("tracker stopped");
    Ok(())
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Idle => "[waiting]",
        Phase::Running => "[running]",
        Phase::Paused { .. } => "[stopped]",
    }
}

fn print_status(status: &str) {
    let mut stdout = io::stdout().lock();
    let _ = write!(stdout, "\r{status}   ");
    let _ = stdout.flush();
}

fn print_stats(data_path: &Path) -> Result<()> {
    let store = Store::load(data_path);
    let rows = store.summary();
    if rows.is_empty() {
        println!("No sessions recorded in {}", data_path.display());
        return Ok(());
    }

    println!("{:<32} {:>10} {:>9}  {}", "Application", "Total", "Sessions", "Last used");
    for row in rows {
        println!(
            "{:<32} {:>10} {:>9}  {}",
            row.name,
            format_elapsed(row.total_seconds as f64),
            row.session_count,
            row.last_date.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn export_csv(data_path: &Path, output_path: &Path) -> Result<()> {
    let store = Store::load(data_path);
    let file = File::create(output_path)
        .with_context(|| format!("failed to create export file: {}", output_path.display()))?;
    let rows = export_sessions_csv(store.data(), BufWriter::new(file))?;
    info!(rows, path = %output_path.display(), "exported sessions");
    Ok(())
}
