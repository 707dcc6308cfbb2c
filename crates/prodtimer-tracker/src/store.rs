use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::monitor::exe_basename;

pub const MAX_RECENT_APPS: usize = 5;

/// The application being timed. Matching only ever looks at the basename of
/// `path`; `display_name` keys the usage statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetApp {
    #[serde(rename = "name")]
    pub display_name: String,
    pub path: String,
}

impl TargetApp {
    pub fn new(display_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            path: path.into(),
        }
    }

    /// Validates a user-supplied executable; the name defaults to its file name.
    pub fn from_path(path: &str, display_name: Option<&str>) -> Result<Self> {
        let path = path.trim();
        if path.is_empty() {
            bail!("no application path given");
        }
        if !Path::new(path).is_file() {
            bail!("application not found: {path}");
        }

        let display_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| exe_basename(path).to_owned());
        Ok(Self::new(display_name, path))
    }

    pub fn exists(&self) -> bool {
        Path::new(&self.path).is_file()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// `YYYY-MM-DD`, local time.
    pub date: String,
    #[serde(rename = "duration")]
    pub duration_seconds: u64,
    /// `HH:MM:SS`, local time.
    pub start_time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStatistics {
    #[serde(rename = "total_time", default)]
    pub total_seconds: u64,
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub name: String,
    pub total_seconds: u64,
    pub session_count: usize,
    pub last_date: Option<String>,
}

/// Everything persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppData {
    #[serde(default)]
    pub recent_apps: Vec<TargetApp>,
    #[serde(default)]
    pub statistics: BTreeMap<String, AppStatistics>,
}

impl AppData {
    /// Most-recent-first, unique by path, at most [`MAX_RECENT_APPS`].
    pub fn add_recent_app(&mut self, app: TargetApp) {
        self.recent_apps.retain(|existing| existing.path != app.path);
        self.recent_apps.insert(0, app);
        self.recent_apps.truncate(MAX_RECENT_APPS);
    }

    pub fn record_session(&mut self, display_name: &str, record: SessionRecord) {
        let stats = self
            .statistics
            .entry(display_name.to_owned())
            .or_default();
        stats.total_seconds = stats.total_seconds.saturating_add(record.duration_seconds);
        stats.sessions.push(record);
    }

    pub fn summary(&self) -> Vec<SummaryRow> {
        let mut rows: Vec<SummaryRow> = self
            .statistics
            .iter()
            .map(|(name, stats)| SummaryRow {
                name: name.clone(),
                total_seconds: stats.total_seconds,
                session_count: stats.sessions.len(),
                last_date: stats.sessions.iter().map(|s| s.date.clone()).max(),
            })
            .collect();
        rows.sort_by(|a, b| {
            b.total_seconds
                .cmp(&a.total_seconds)
                .then_with(|| a.name.cmp(&b.name))
        });
        rows
    }
}

/// [`AppData`] bound to its file. Every mutation is written through; write
/// failures are logged and the in-memory copy stays authoritative.
pub struct Store {
    path: PathBuf,
    data: AppData,
}

impl Store {
    /// Never fails: a missing or unreadable file yields an empty document.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match read_document(&path) {
            Ok(Some(data)) => {
                debug!(path = %path.display(), "loaded data file");
                data
            }
            Ok(None) => AppData::default(),
            Err(err) => {
                warn!("{err:#}; starting with empty data");
                AppData::default()
            }
        };
        Self { path, data }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &AppData {
        &self.data
    }

    pub fn recent_apps(&self) -> &[TargetApp] {
        &self.data.recent_apps
    }

    /// Recent apps whose executable is still on disk.
    pub fn available_recent_apps(&self) -> Vec<TargetApp> {
        self.data
            .recent_apps
            .iter()
            .filter(|app| app.exists())
            .cloned()
            .collect()
    }

    pub fn statistics_for(&self, display_name: &str) -> Option<&AppStatistics> {
        self.data.statistics.get(display_name)
    }

    pub fn summary(&self) -> Vec<SummaryRow> {
        self.data.summary()
    }

    pub fn add_recent_app(&mut self, app: TargetApp) {
        self.data.add_recent_app(app);
        self.flush();
    }

    pub fn record_session(&mut self, display_name: &str, record: SessionRecord) {
        self.data.record_session(display_name, record);
        self.flush();
    }

    pub fn save(&self) -> Result<()> {
        write_document(&self.path, &self.data)
    }

    fn flush(&self) {
        if let Err(err) = self.save() {
            warn!("{err:#}");
        }
    }
}

fn read_document(path: &Path) -> Result<Option<AppData>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read data file: {}", path.display()))
        }
    };
    let data = serde_json::from_str(&text)
        .with_context(|| format!("malformed data file: {}", path.display()))?;
    Ok(Some(data))
}

/// Writes a uniquely named sibling temp file, syncs it, then renames it over
/// the target. The temp file is removed if any step fails.
fn write_document(path: &Path, data: &AppData) -> Result<()> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create data directory: {}", parent.display())
            })?;
            parent
        }
        None => Path::new("."),
    };

    let text = serde_json::to_string_pretty(data).context("failed to serialize data file")?;
    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in: {}", dir.display()))?;
    temp.write_all(text.as_bytes())
        .with_context(|| format!("failed to write temp file: {}", temp.path().display()))?;
    temp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync temp file: {}", temp.path().display()))?;
    temp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to replace data file: {}", path.display()))?;
    Ok(())
}

/// One CSV row per recorded session. Returns the number of rows written.
pub fn export_sessions_csv<W: Write>(data: &AppData, writer: W) -> Result<usize> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["app", "date", "start_time", "duration_seconds"])
        .context("failed to write CSV header")?;

    let mut rows = 0;
    for (name, stats) in &data.statistics {
        for session in &stats.sessions {
            let duration = session.duration_seconds.to_string();
            csv.write_record([
                name.as_str(),
                session.date.as_str(),
                session.start_time.as_str(),
                duration.as_str(),
            ])
            .context("failed to write CSV row")?;
            rows += 1;
        }
    }
    csv.flush().context("failed to flush CSV writer")?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(date: &str, duration_seconds: u64) -> SessionRecord {
        SessionRecord {
            date: date.to_owned(),
            duration_seconds,
            start_time: "09:30:00".to_owned(),
        }
    }

    #[test]
    fn recent_apps_are_unique_and_bounded() {
        let mut data = AppData::default();
        for i in 0..8 {
            data.add_recent_app(TargetApp::new(format!("app{i}"), format!("/opt/app{i}")));
        }
        assert_eq!(data.recent_apps.len(), MAX_RECENT_APPS);
        assert_eq!(data.recent_apps[0].path, "/opt/app7");
        assert_eq!(data.recent_apps[4].path, "/opt/app3");

        data.add_recent_app(TargetApp::new("renamed", "/opt/app5"));
        assert_eq!(data.recent_apps.len(), MAX_RECENT_APPS);
        assert_eq!(data.recent_apps[0], TargetApp::new("renamed", "/opt/app5"));
        let same_path = data
            .recent_apps
            .iter()
            .filter(|app| app.path == "/opt/app5")
            .count();
        assert_eq!(same_path, 1);
    }

    #[test]
    fn sessions_append_and_accumulate() {
        let mut data = AppData::default();
        data.record_session("Editor", record("2024-05-01", 5));
        data.record_session("Editor", record("2024-05-02", 7));
        let stats = &data.statistics["Editor"];
        assert_eq!(stats.total_seconds, 12);
        assert_eq!(stats.sessions.len(), 2);
        assert_eq!(stats.sessions[0].date, "2024-05-01");
    }

    #[test]
    fn document_uses_persisted_field_names() {
        let mut data = AppData::default();
        data.add_recent_app(TargetApp::new("Editor", "/opt/editor"));
        data.record_session("Editor", record("2024-05-01", 5));

        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["recent_apps"][0]["name"], "Editor");
        assert_eq!(value["recent_apps"][0]["path"], "/opt/editor");
        assert_eq!(value["statistics"]["Editor"]["total_time"], 5);
        assert_eq!(value["statistics"]["Editor"]["sessions"][0]["duration"], 5);
        assert_eq!(
            value["statistics"]["Editor"]["sessions"][0]["start_time"],
            "09:30:00"
        );
    }

    #[test]
    fn reads_existing_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        fs::write(
            &path,
            r#"{"recent_apps": [{"name": "game.exe", "path": "C:/Games/game.exe"}],
                "statistics": {"game.exe": {"total_time": 42,
                  "sessions": [{"date": "2024-01-02", "duration": 42, "start_time": "20:00:01"}]}}}"#,
        )
        .unwrap();

        let store = Store::load(&path);
        assert_eq!(store.recent_apps().len(), 1);
        let stats = store.statistics_for("game.exe").unwrap();
        assert_eq!(stats.total_seconds, 42);
        assert_eq!(stats.sessions[0].start_time, "20:00:01");
    }

    #[test]
    fn malformed_or_missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let missing = Store::load(dir.path().join("absent.json"));
        assert_eq!(missing.data(), &AppData::default());

        let path = dir.path().join("broken.json");
        fs::write(&path, "{\"recent_apps\": [").unwrap();
        let broken = Store::load(&path);
        assert_eq!(broken.data(), &AppData::default());
    }

    #[test]
    fn mutations_are_written_through() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("data.json");

        let mut store = Store::load(&path);
        store.add_recent_app(TargetApp::new("Editor", "/opt/editor"));
        store.record_session("Editor", record("2024-05-01", 9));
        assert_eq!(dir_entries(path.parent().unwrap()), vec!["data.json".to_owned()]);

        let reloaded = Store::load(&path);
        assert_eq!(reloaded.data(), store.data());
    }

    #[test]
    fn write_failure_keeps_memory_state() {
        let dir = tempdir().unwrap();
        // A directory where the file should be makes the rename fail.
        let path = dir.path().join("data.json");
        fs::create_dir_all(path.join("occupied")).unwrap();

        let mut store = Store::load(&path);
        store.record_session("Editor", record("2024-05-01", 3));
        assert!(store.save().is_err());
        assert_eq!(store.statistics_for("Editor").unwrap().total_seconds, 3);
    }

    #[test]
    fn failed_save_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        fs::create_dir_all(path.join("occupied")).unwrap();

        let mut store = Store::load(&path);
        store.add_recent_app(TargetApp::new("Editor", "/opt/editor"));
        store.record_session("Editor", record("2024-05-01", 3));

        assert_eq!(dir_entries(dir.path()), vec!["data.json".to_owned()]);
        assert!(path.is_dir());
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn target_from_path_validates_and_names() {
        let dir = tempdir().unwrap();
        let exe = dir.path().join("Editor.exe");
        fs::write(&exe, b"").unwrap();
        let exe_text = exe.to_string_lossy().into_owned();

        let app = TargetApp::from_path(&exe_text, None).unwrap();
        assert_eq!(app.display_name, "Editor.exe");
        assert!(app.exists());

        let named = TargetApp::from_path(&exe_text, Some("  My Editor ")).unwrap();
        assert_eq!(named.display_name, "My Editor");

        assert!(TargetApp::from_path("", None).is_err());
        assert!(TargetApp::from_path(
            &dir.path().join("gone.exe").to_string_lossy(),
            None
        )
        .is_err());
    }

    #[test]
    fn available_recent_apps_hides_vanished_executables() {
        let dir = tempdir().unwrap();
        let exe = dir.path().join("tool");
        fs::write(&exe, b"").unwrap();

        let mut store = Store::load(dir.path().join("data.json"));
        store.add_recent_app(TargetApp::new("gone", "/definitely/not/here"));
        store.add_recent_app(TargetApp::new("tool", exe.to_string_lossy()));

        let available = store.available_recent_apps();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].display_name, "tool");
        assert_eq!(store.recent_apps().len(), 2);
    }

    #[test]
    fn summary_orders_by_total_time() {
        let mut data = AppData::default();
        data.record_session("Short", record("2024-05-03", 10));
        data.record_session("Long", record("2024-05-01", 100));
        data.record_session("Long", record("2024-05-02", 20));

        let rows = data.summary();
        assert_eq!(rows[0].name, "Long");
        assert_eq!(rows[0].total_seconds, 120);
        assert_eq!(rows[0].session_count, 2);
        assert_eq!(rows[0].last_date.as_deref(), Some("2024-05-02"));
        assert_eq!(rows[1].name, "Short");
    }

    #[test]
    fn exports_one_row_per_session() {
        let mut data = AppData::default();
        data.record_session("Editor, Pro", record("2024-05-01", 5));
        data.record_session("Game", record("2024-05-02", 60));

        let mut out = Vec::new();
        let rows = export_sessions_csv(&data, &mut out).unwrap();
        assert_eq!(rows, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "app,date,start_time,duration_seconds");
        assert_eq!(lines[1], "\"Editor, Pro\",2024-05-01,09:30:00,5");
        assert_eq!(lines[2], "Game,2024-05-02,09:30:00,60");
    }
}
