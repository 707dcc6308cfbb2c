#![cfg_attr(all(windows, not(debug_assertions)), windows_subsystem = "windows")]

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use eframe::egui::{self, Align, Color32, Layout, RichText, Sense};
use tracing::info;

use prodtimer_tracker::config::{Config, Mode};
use prodtimer_tracker::{
    format_elapsed, init_logging, spawn_poll_worker, unix_seconds_now, DataFileGuard, Phase,
    PollWorker, Recorder, Store, SystemProcessTable, TargetApp,
};

const SELECTOR_SIZE: [f32; 2] = [220.0, 176.0];
const TIMER_SIZE: [f32; 2] = [180.0, 84.0];
const TIMER_SCREEN_MARGIN: f32 = 20.0;
const TIMER_SCREEN_TOP: f32 = 50.0;
const BACKGROUND: Color32 = Color32::from_rgb(0xB1, 0x9C, 0xD9);
const ACCENT: Color32 = Color32::from_rgb(0xFF, 0xEB, 0x99);
const TEXT: Color32 = Color32::from_rgb(0x4A, 0x4A, 0x4A);
const PLACEHOLDER: &str = "Select an application...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Page {
    Selector,
    Timer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    AddPath,
    Begin,
    Toggle,
    Back,
    Close,
}

struct TimerWindow {
    store: Store,
    worker: Option<PollWorker>,
    recorder: Option<Recorder>,
    page: Page,
    recent: Vec<TargetApp>,
    selected: Option<usize>,
    path_input: String,
    info_message: Option<String>,
    poll_interval: Duration,
    refresh_interval: Duration,
}

impl TimerWindow {
    fn new(config: &Config) -> Self {
        let store = Store::load(&config.data_path);
        let recent = store.available_recent_apps();
        Self {
            store,
            worker: Some(spawn_poll_worker(
                SystemProcessTable::new(),
                config.poll_interval,
            )),
            recorder: None,
            page: Page::Selector,
            recent,
            selected: None,
            path_input: String::new(),
            info_message: None,
            poll_interval: config.poll_interval,
            refresh_interval: config.refresh_interval,
        }
    }

    fn selected_app(&self) -> Option<&TargetApp> {
        self.selected.and_then(|index| self.recent.get(index))
    }

    fn reload_recent(&mut self) {
        let selected_path = self.selected_app().map(|app| app.path.clone());
        self.recent = self.store.available_recent_apps();
        self.selected =
            selected_path.and_then(|path| self.recent.iter().position(|app| app.path == path));
    }

    fn add_from_input(&mut self) {
        match TargetApp::from_path(&self.path_input, None) {
            Ok(app) => {
                let path = app.path.clone();
                self.store.add_recent_app(app);
                self.recent = self.store.available_recent_apps();
                self.selected = self.recent.iter().position(|app| app.path == path);
                self.path_input.clear();
                self.info_message = None;
            }
            Err(err) => self.info_message = Some(format!("{err:#}")),
        }
    }

    fn begin(&mut self, ctx: &egui::Context) {
        let Some(app) = self.selected_app().cloned() else {
            return;
        };
        info!(app = %app.display_name, "tracking started");
        let recorder = Recorder::new(app);
        if let Some(worker) = &self.worker {
            worker.retarget(recorder.poll_target());
        }
        self.recorder = Some(recorder);
        self.page = Page::Timer;

        ctx.send_viewport_cmd(egui::ViewportCommand::InnerSize(TIMER_SIZE.into()));
        if let Some(monitor) = ctx.input(|i| i.viewport().monitor_size) {
            let x = (monitor.x - TIMER_SIZE[0] - TIMER_SCREEN_MARGIN).max(0.0);
            ctx.send_viewport_cmd(egui::ViewportCommand::OuterPosition(egui::pos2(
                x,
                TIMER_SCREEN_TOP,
            )));
        }
    }

    /// Persists the current session (if any) and stops polling its target.
    fn end_session(&mut self) {
        if let Some(mut recorder) = self.recorder.take() {
            recorder.close(unix_seconds_now(), &mut self.store);
        }
        if let Some(worker) = &self.worker {
            worker.retarget(None);
        }
    }

    fn back(&mut self, ctx: &egui::Context) {
        self.end_session();
        self.reload_recent();
        self.page = Page::Selector;
        ctx.send_viewport_cmd(egui::ViewportCommand::InnerSize(SELECTOR_SIZE.into()));
    }

    fn shutdown(&mut self) {
        self.end_session();
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }

    fn drain_poll_results(&mut self) {
        let (Some(worker), Some(recorder)) = (self.worker.as_ref(), self.recorder.as_mut()) else {
            return;
        };
        for result in worker.drain() {
            recorder.ingest(&result, &mut self.store);
        }
    }

    fn draw_selector(&mut self, ui: &mut egui::Ui) -> Option<Action> {
        let mut action = draw_title_bar(ui, "Select App", false);

        ui.label("Select an application to track:");
        let selected_text = self
            .selected_app()
            .map(|app| app.display_name.clone())
            .unwrap_or_else(|| PLACEHOLDER.to_owned());
        egui::ComboBox::from_id_salt("recent_apps")
            .selected_text(selected_text)
            .width(ui.available_width())
            .show_ui(ui, |ui| {
                ui.selectable_value(&mut self.selected, None, PLACEHOLDER);
                for (index, app) in self.recent.iter().enumerate() {
                    ui.selectable_value(&mut self.selected, Some(index), app.display_name.as_str())
                        .on_hover_text(app.path.as_str());
                }
            });

        ui.horizontal(|ui| {
            let input_width = (ui.available_width() - 44.0).max(40.0);
            let response = ui.add(
                egui::TextEdit::singleline(&mut self.path_input)
                    .hint_text("Path to executable")
                    .desired_width(input_width),
            );
            let submitted =
                response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            if ui.button("Add").clicked() || submitted {
                action = Some(Action::AddPath);
            }
        });
        if let Some(message) = &self.info_message {
            ui.label(RichText::new(message).small().color(Color32::DARK_RED));
        }

        ui.with_layout(Layout::bottom_up(Align::Center), |ui| {
            let begin = egui::Button::new(RichText::new("Begin").strong())
                .fill(ACCENT)
                .min_size(egui::vec2(ui.available_width(), 26.0));
            if ui.add_enabled(self.selected.is_some(), begin).clicked() {
                action = Some(Action::Begin);
            }
        });
        action
    }

    fn draw_timer(&mut self, ui: &mut egui::Ui, now: f64) -> Option<Action> {
        let Some(recorder) = self.recorder.as_mut() else {
            return Some(Action::Back);
        };
        let title = recorder.target().display_name.clone();
        let mut action = draw_title_bar(ui, &title, true);

        let elapsed = recorder.refresh(now);
        let toggle_label = match recorder.phase() {
            Phase::Running => "⏸",
            Phase::Idle | Phase::Paused { .. } => "▶",
        };
        ui.horizontal(|ui| {
            if ui
                .add(egui::Button::new(toggle_label).fill(ACCENT).small())
                .on_hover_text("Pause/Resume")
                .clicked()
            {
                action = Some(Action::Toggle);
            }
            ui.label(
                RichText::new(format_elapsed(elapsed))
                    .size(22.0)
                    .monospace()
                    .color(TEXT),
            );
        });
        action
    }

    fn apply(&mut self, action: Action, ctx: &egui::Context) {
        match action {
            Action::AddPath => self.add_from_input(),
            Action::Begin => self.begin(ctx),
            Action::Toggle => {
                if let Some(recorder) = self.recorder.as_mut() {
                    recorder.toggle(unix_seconds_now());
                }
            }
            Action::Back => self.back(ctx),
            Action::Close => ctx.send_viewport_cmd(egui::ViewportCommand::Close),
        }
    }
}

impl eframe::App for TimerWindow {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if ctx.input(|i| i.viewport().close_requested()) {
            // Finalize first; the poll worker is torn down after.
            self.shutdown();
            return;
        }

        self.drain_poll_results();
        let now = unix_seconds_now();

        let frame = egui::Frame::default()
            .fill(BACKGROUND)
            .inner_margin(egui::Margin::same(6.0));
        let action = egui::CentralPanel::default()
            .frame(frame)
            .show(ctx, |ui| {
                let drag = ui.interact(ui.max_rect(), ui.id().with("window_drag"), Sense::drag());
                if drag.drag_started() {
                    ctx.send_viewport_cmd(egui::ViewportCommand::StartDrag);
                }
                match self.page {
                    Page::Selector => self.draw_selector(ui),
                    Page::Timer => self.draw_timer(ui, now),
                }
            })
            .inner;
        if let Some(action) = action {
            self.apply(action, ctx);
        }

        let running = self
            .recorder
            .as_ref()
            .is_some_and(|recorder| recorder.timer().is_running());
        ctx.request_repaint_after(if running {
            self.refresh_interval
        } else {
            self.poll_interval
        });
    }
}

fn draw_title_bar(ui: &mut egui::Ui, title: &str, with_back: bool) -> Option<Action> {
    let mut action = None;
    ui.horizontal(|ui| {
        if with_back && ui.small_button("←").on_hover_text("Back").clicked() {
            action = Some(Action::Back);
        }
        ui.add(egui::Label::new(RichText::new(title).strong().color(TEXT)).truncate());
        ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
            if ui.small_button("×").on_hover_text("Close").clicked() {
                action = Some(Action::Close);
            }
        });
    });
    action
}

fn print_help() {
    println!(
        "\
Productivity Timer

Usage:
  prodtimer [--data <path>] [--poll-ms <ms>] [--refresh-ms <ms>]

Options:
  --data         JSON data file (default: ~/.productivity_timer_data.json)
  --poll-ms      Process poll interval in milliseconds (default: 1000)
  --refresh-ms   Timer refresh interval in milliseconds (default: 100)
  -h, --help     Print this help"
    );
}

fn main() -> Result<()> {
    init_logging();
    let config = Config::from_args()?;
    if config.mode == Mode::Help {
        print_help();
        return Ok(());
    }
    if !config.is_window_compatible() {
        bail!("--app, --name, --stats and --export-csv are only supported by prodtimer-tracker");
    }
    // Held until the window closes.
    let Some(_data_guard) = DataFileGuard::acquire(&config.data_path)? else {
        bail!(
            "{} is in use by another Productivity Timer",
            config.data_path.display()
        );
    };

    let viewport = egui::ViewportBuilder::default()
        .with_title("Productivity Timer")
        .with_inner_size(SELECTOR_SIZE)
        .with_resizable(false)
        .with_decorations(false)
        .with_always_on_top();
    let native_options = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };
    eframe::run_native(
        "Productivity Timer",
        native_options,
        Box::new(move |cc| {
            cc.egui_ctx.set_theme(egui::ThemePreference::Light);
            Ok(Box::new(TimerWindow::new(&config)))
        }),
    )
    .map_err(|err| anyhow!("failed to start Productivity Timer: {err}"))
}
