use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::session::unix_seconds_now;

pub use platform::SystemProcessTable;

/// Source of the live process list.
///
/// Each entry is one live process; `None` marks a process whose executable
/// could not be read (exited mid-enumeration, access denied, zombie).
pub trait ProcessTable {
    fn executable_paths(&mut self) -> Vec<Option<String>>;
}

/// Answers "is the target executable running right now" from one snapshot of
/// the process table. Nothing is carried between polls.
pub struct ActivityTracker<T> {
    table: T,
}

impl<T: ProcessTable> ActivityTracker<T> {
    pub fn new(table: T) -> Self {
        Self { table }
    }

    /// `None` when there is nothing to look for (empty target path).
    pub fn poll(&mut self, target_path: &str) -> Option<bool> {
        let target = match_key(target_path)?;
        let alive = self
            .table
            .executable_paths()
            .into_iter()
            .flatten()
            .any(|path| match_key(&path).as_deref() == Some(target.as_str()));
        Some(alive)
    }
}

/// File-name component of a path, accepting both `/` and `\` separators so a
/// Windows path is split the same way on every host.
pub fn exe_basename(path: &str) -> &str {
    path.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(path)
}

fn match_key(path: &str) -> Option<String> {
    let name = exe_basename(path.trim());
    if name.is_empty() {
        None
    } else {
        Some(name.to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollRequest {
    Retarget(Option<String>),
    PollNow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    pub target_path: String,
    pub alive: bool,
    /// Wall-clock seconds when the process table was read. Transitions are
    /// stamped with this, not with the time the result is picked up.
    pub polled_at: f64,
}

/// Handle to the background thread that runs the slow tick.
pub struct PollWorker {
    requests: mpsc::Sender<PollRequest>,
    results: mpsc::Receiver<PollResult>,
    handle: thread::JoinHandle<()>,
}

impl PollWorker {
    pub fn retarget(&self, target_path: Option<String>) {
        let _ = self.requests.send(PollRequest::Retarget(target_path));
    }

    pub fn poll_now(&self) {
        let _ = self.requests.send(PollRequest::PollNow);
    }

    /// Results delivered since the last call, oldest first. Never blocks.
    pub fn drain(&self) -> Vec<PollResult> {
        self.results.try_iter().collect()
    }

    /// Blocks up to `timeout` for the next result.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<PollResult> {
        self.results.recv_timeout(timeout).ok()
    }

    pub fn shutdown(self) {
        let Self {
            requests, handle, ..
        } = self;
        drop(requests);
        if handle.join().is_err() {
            tracing::warn!("poll worker panicked");
        }
    }
}

pub fn spawn_poll_worker<T>(table: T, interval: Duration) -> PollWorker
where
    T: ProcessTable + Send + 'static,
{
    let (request_tx, request_rx) = mpsc::channel::<PollRequest>();
    let (result_tx, result_rx) = mpsc::channel::<PollResult>();

    let handle = thread::spawn(move || {
        debug!(interval_ms = interval.as_millis() as u64, "poll worker started");
        let mut tracker = ActivityTracker::new(table);
        let mut target: Option<String> = None;
        let mut next_poll = Instant::now();

        loop {
            let wait = next_poll.saturating_duration_since(Instant::now());
            match request_rx.recv_timeout(wait) {
                Ok(PollRequest::Retarget(path)) => {
                    target = path;
                    next_poll = Instant::now();
                }
                Ok(PollRequest::PollNow) => {
                    next_poll = Instant::now();
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if let Some(path) = target.as_deref() {
                        let polled_at = unix_seconds_now();
                        if let Some(alive) = tracker.poll(path) {
                            let result = PollResult {
                                target_path: path.to_owned(),
                                alive,
                                polled_at,
                            };
                            if result_tx.send(result).is_err() {
                                break;
                            }
                        }
                    }
                    next_poll = Instant::now() + interval;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("poll worker stopped");
    });

    PollWorker {
        requests: request_tx,
        results: result_rx,
        handle,
    }
}

#[cfg(not(windows))]
mod platform {
    use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

    use super::ProcessTable;

    pub struct SystemProcessTable {
        system: System,
    }

    impl SystemProcessTable {
        pub fn new() -> Self {
            Self {
                system: System::new(),
            }
        }
    }

    impl Default for SystemProcessTable {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ProcessTable for SystemProcessTable {
        fn executable_paths(&mut self) -> Vec<Option<String>> {
            self.system.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::nothing().with_exe(UpdateKind::OnlyIfNotSet),
            );
            self.system
                .processes()
                .values()
                .map(|process| {
                    if process.status() == ProcessStatus::Zombie {
                        return None;
                    }
                    process.exe().map(|path| path.to_string_lossy().into_owned())
                })
                .collect()
        }
    }
}

#[cfg(windows)]
mod platform {
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
        TH32CS_SNAPPROCESS,
    };
    use windows_sys::Win32::System::Threading::{
        OpenProcess, QueryFullProcessImageNameW, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    use super::ProcessTable;

    #[derive(Debug, Default)]
    pub struct SystemProcessTable;

    impl SystemProcessTable {
        pub fn new() -> Self {
            Self
        }
    }

    impl ProcessTable for SystemProcessTable {
        fn executable_paths(&mut self) -> Vec<Option<String>> {
            process_ids().into_iter().map(process_path).collect()
        }
    }

    fn process_ids() -> Vec<u32> {
        let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) };
        if snapshot == INVALID_HANDLE_VALUE {
            return Vec::new();
        }

        let mut entry: PROCESSENTRY32W = unsafe { std::mem::zeroed() };
        entry.dwSize = std::mem::size_of::<PROCESSENTRY32W>() as u32;

        let mut pids = Vec::new();
        let mut ok = unsafe { Process32FirstW(snapshot, &mut entry) };
        while ok != 0 {
            // pid 0 is the idle pseudo-process
            if entry.th32ProcessID != 0 {
                pids.push(entry.th32ProcessID);
            }
            ok = unsafe { Process32NextW(snapshot, &mut entry) };
        }

        unsafe {
            CloseHandle(snapshot);
        }
        pids
    }

    fn process_path(pid: u32) -> Option<String> {
        with_process_handle(pid, |handle| {
            let mut buffer: Vec<u16> = vec![0; 4096];
            let mut size: u32 = buffer.len() as u32;
            let ok =
                unsafe { QueryFullProcessImageNameW(handle, 0, buffer.as_mut_ptr(), &mut size) };
            if ok == 0 || size == 0 {
                return None;
            }
            Some(String::from_utf16_lossy(&buffer[..size as usize]))
        })
    }

    fn with_process_handle<T>(pid: u32, f: impl FnOnce(HANDLE) -> Option<T>) -> Option<T> {
        let handle = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid) };
        if handle.is_null() {
            return None;
        }

        let result = f(handle);
        unsafe {
            CloseHandle(handle);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTable(Vec<Option<String>>);

    impl ProcessTable for FakeTable {
        fn executable_paths(&mut self) -> Vec<Option<String>> {
            self.0.clone()
        }
    }

    fn fake(paths: &[Option<&str>]) -> ActivityTracker<FakeTable> {
        ActivityTracker::new(FakeTable(
            paths.iter().map(|p| p.map(str::to_owned)).collect(),
        ))
    }

    #[test]
    fn basename_handles_both_separators() {
        assert_eq!(exe_basename(r"C:\Apps\Foo.EXE"), "Foo.EXE");
        assert_eq!(exe_basename("/usr/bin/foo"), "foo");
        assert_eq!(exe_basename("foo"), "foo");
        assert_eq!(exe_basename(r"C:\Apps\"), "");
    }

    #[test]
    fn match_is_case_insensitive_on_basename() {
        let mut tracker = fake(&[Some("/usr/bin/bash"), Some(r"c:\apps\foo.exe")]);
        assert_eq!(tracker.poll(r"C:\Apps\Foo.EXE"), Some(true));
    }

    #[test]
    fn basename_match_ignores_directory() {
        let mut tracker = fake(&[Some(r"D:\Portable\FOO.exe")]);
        assert_eq!(tracker.poll(r"C:\Apps\Foo.EXE"), Some(true));
    }

    #[test]
    fn unreadable_processes_are_skipped() {
        let mut tracker = fake(&[None, None, Some("/opt/editor/editor")]);
        assert_eq!(tracker.poll("/opt/editor/editor"), Some(true));

        let mut tracker = fake(&[None, None]);
        assert_eq!(tracker.poll("/opt/editor/editor"), Some(false));
    }

    #[test]
    fn missing_target_is_not_alive() {
        let mut tracker = fake(&[Some("/usr/bin/bash")]);
        assert_eq!(tracker.poll("/opt/editor/editor"), Some(false));
    }

    #[test]
    fn empty_target_gives_no_signal() {
        let mut tracker = fake(&[Some("/usr/bin/bash"), Some("")]);
        assert_eq!(tracker.poll(""), None);
        assert_eq!(tracker.poll("   "), None);
        assert_eq!(tracker.poll(r"C:\Apps\"), None);
    }

    #[test]
    fn worker_reports_for_current_target() {
        let worker = spawn_poll_worker(
            FakeTable(vec![Some("/opt/editor/editor".to_owned())]),
            Duration::from_millis(20),
        );
        let before = unix_seconds_now();
        worker.retarget(Some("/somewhere/EDITOR".to_owned()));
        let result = worker.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(result.target_path, "/somewhere/EDITOR");
        assert!(result.alive);
        assert!(result.polled_at >= before && result.polled_at <= unix_seconds_now());

        worker.retarget(Some("/opt/other/other".to_owned()));
        let result = loop {
            let next = worker.recv_timeout(Duration::from_secs(2)).unwrap();
            if next.target_path == "/opt/other/other" {
                break next;
            }
        };
        assert!(!result.alive);
        worker.shutdown();
    }

    #[test]
    fn worker_is_silent_without_target() {
        let worker = spawn_poll_worker(
            FakeTable(vec![Some("/opt/editor/editor".to_owned())]),
            Duration::from_millis(10),
        );
        worker.poll_now();
        assert!(worker.recv_timeout(Duration::from_millis(100)).is_none());
        worker.retarget(Some(String::new()));
        assert!(worker.recv_timeout(Duration::from_millis(100)).is_none());
        assert!(worker.drain().is_empty());
        worker.shutdown();
    }
}
