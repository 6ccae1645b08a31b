use anyhow::{Context, Result};
use pixels::{Pixels, SurfaceTexture};
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};
use vss_core::{Interval, Phase, SessionPhase};
use vss_experiment::{
    Command, ExperimentConfig, ExperimentEvent, ExperimentStateMachine, ExperimentView,
};
use vss_render::{FrameStats, NoiseRenderer};
use vss_timing::{HighPrecisionTimer, Timer};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowId},
};

pub struct App {
    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    experiment: ExperimentStateMachine<HighPrecisionTimer, StdRng>,
    renderer: Option<NoiseRenderer>,
    current_size: Option<PhysicalSize<u32>>,
    scale_factor: f64,
    monitor_refresh_hz: Option<f64>,
    results_path: Option<PathBuf>,
    title: String,

    should_exit: bool,
}

impl App {
    pub fn new(config: ExperimentConfig, rng: StdRng, results_path: Option<PathBuf>) -> Result<Self> {
        let timer = HighPrecisionTimer::new();
        let experiment = ExperimentStateMachine::new(config, timer, rng);

        Ok(Self {
            window: None,
            pixels: None,
            experiment,
            renderer: None,
            current_size: None,
            scale_factor: 1.0,
            monitor_refresh_hz: None,
            results_path,
            title: String::new(),
            should_exit: false,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        info!("press SPACE to start, 1/2 to answer, ESC to stop or exit");
        event_loop.run_app(&mut self)?;
        Ok(())
    }

    fn create_window_and_surface(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let primary_monitor = event_loop
            .primary_monitor()
            .or_else(|| event_loop.available_monitors().next())
            .context("no monitor available")?;

        self.monitor_refresh_hz = primary_monitor
            .refresh_rate_millihertz()
            .map(|rate| rate as f64 / 1000.0);

        let window_attributes = Window::default_attributes()
            .with_title("VSS staircase")
            .with_fullscreen(Some(Fullscreen::Borderless(Some(primary_monitor.clone()))))
            .with_resizable(false);

        let window = Arc::new(event_loop.create_window(window_attributes)?);
        let physical_size = window.inner_size();
        self.current_size = Some(physical_size);
        self.scale_factor = window.scale_factor();

        info!(
            width = physical_size.width,
            height = physical_size.height,
            scale_factor = self.scale_factor,
            monitor_refresh_hz = ?self.monitor_refresh_hz,
            "display configured"
        );

        let surface_texture =
            SurfaceTexture::new(physical_size.width, physical_size.height, window.clone());
        self.pixels = Some(Pixels::new(
            physical_size.width,
            physical_size.height,
            surface_texture,
        )?);

        self.renderer = Some(NoiseRenderer::new(
            physical_size.width,
            physical_size.height,
            self.experiment.config().stimulus.block_px,
        ));
        self.experiment
            .resize(physical_size.width, physical_size.height);

        window.set_cursor_visible(false);
        window.request_redraw();
        self.window = Some(window);
        self.refresh_title();

        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        let (Some(pix), Some(renderer)) = (self.pixels.as_mut(), self.renderer.as_mut()) else {
            return Ok(());
        };
        let mut timer = self.experiment.timer.clone();
        let content = self.experiment.frame();

        let stats: FrameStats = renderer.render_frame(&content, pix.frame_mut(), &mut timer)?;
        let before_present = timer.now();
        pix.render()?;
        let present = timer.elapsed(before_present);

        trace!(
            present_ms = present.as_secs_f64() * 1e3,
            draw_ms = stats.draw.as_secs_f64() * 1e3,
            copy_ms = stats.copy.as_secs_f64() * 1e3,
            total_ms = stats.total.as_secs_f64() * 1e3,
            skipped = stats.skipped,
            "frame"
        );
        if let Some(field) = stats.field {
            trace!(
                mean = field.mean,
                std_dev = field.std_dev,
                target = field.target_std_dev,
                "noise field"
            );
        }
        Ok(())
    }

    fn update(&mut self) {
        let events = self.experiment.update();
        let mut changed = false;
        for event in events {
            changed = true;
            match event {
                ExperimentEvent::IntervalEnded {
                    quality: Some(q), ..
                } => {
                    if (q.effective_hz - q.intended_hz).abs() > 0.1 * q.intended_hz {
                        warn!(
                            trial = q.trial_num,
                            effective_hz = q.effective_hz,
                            intended_hz = q.intended_hz,
                            "noise update rate off target"
                        );
                    }
                }
                ExperimentEvent::TrialScored { record, .. } => {
                    info!(
                        trial = record.trial_num,
                        contrast_pct = record.contrast_pct,
                        rms_pct = record.rms_percent,
                        correct = record.correct,
                        "trial scored"
                    );
                }
                ExperimentEvent::SessionStopped { reason } => {
                    self.on_session_stopped(reason.is_some());
                }
                _ => {}
            }
        }
        if changed {
            self.refresh_title();
        }
    }

    fn on_session_stopped(&mut self, completed: bool) {
        let report = self.experiment.report();
        match &report.threshold {
            Some(t) => info!(
                completed,
                stop_reason = ?report.stop_reason,
                trials = report.trials_run,
                reversals = report.reversals.len(),
                threshold_pct = t.percent_range,
                rms_pct = t.rms_percent,
                "session ended"
            ),
            None => info!(
                completed,
                trials = report.trials_run,
                reversals = report.reversals.len(),
                "session ended without a threshold estimate"
            ),
        }
        if let Some(path) = &self.results_path {
            if let Err(e) = report.write_json(path) {
                error!(error = %e, "failed to save results");
            }
        }
    }

    fn handle_input(&mut self, key: PhysicalKey, event_loop: &ActiveEventLoop) {
        let PhysicalKey::Code(code) = key else { return };
        let phase = *self.experiment.current_phase();
        let command = match code {
            KeyCode::Digit1 | KeyCode::Numpad1 => Some(Command::Respond(Interval::First)),
            KeyCode::Digit2 | KeyCode::Numpad2 => Some(Command::Respond(Interval::Second)),
            KeyCode::Space if phase.is_instructions() => Some(Command::ConfirmStart),
            KeyCode::Space => Some(Command::Start),
            KeyCode::Enter | KeyCode::NumpadEnter => Some(Command::ConfirmStart),
            KeyCode::Escape if phase.is_running() || phase.is_instructions() => {
                Some(Command::Stop)
            }
            KeyCode::Escape => {
                self.cleanup_and_exit(event_loop);
                None
            }
            _ => None,
        };
        if let Some(command) = command {
            let handled = self.experiment.handle_command(command);
            debug!(?command, handled, "key command");
            if handled {
                self.refresh_title();
            }
        }
    }

    fn handle_resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.current_size = Some(new_size);
        if let Some(pixels) = &mut self.pixels {
            if let Err(e) = pixels.resize_surface(new_size.width, new_size.height) {
                error!(error = %e, "failed to resize surface");
            }
            if let Err(e) = pixels.resize_buffer(new_size.width, new_size.height) {
                error!(error = %e, "failed to resize buffer");
            }
        }
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.resize(new_size.width, new_size.height);
        }
        self.experiment.resize(new_size.width, new_size.height);
    }

    fn refresh_title(&mut self) {
        let title = status_line(&self.experiment.view());
        if title != self.title {
            if let Some(window) = &self.window {
                window.set_title(&title);
            }
            self.title = title;
        }
    }

    fn cleanup_and_exit(&mut self, event_loop: &ActiveEventLoop) {
        if self.experiment.current_phase().is_running() {
            self.experiment.stop();
            self.update();
        }
        if let Some(window) = &self.window {
            window.set_cursor_visible(true);
        }
        let stats = self.experiment.timer.calibration_stats();
        info!(
            mean_frame_ms = stats.average_frame_time_ns / 1e6,
            jitter_ms = stats.jitter_ns / 1e6,
            fps = stats.effective_fps,
            "exiting"
        );
        self.should_exit = true;
        event_loop.exit();
    }
}

/// One-line status for the window title
fn status_line(view: &ExperimentView<'_>) -> String {
    let threshold = view
        .threshold
        .map(|t| format!("{:.1}% (RMS {:.2}%)", t.percent_range, t.rms_percent))
        .unwrap_or_else(|| "-".to_string());
    match view.phase {
        SessionPhase::Idle if view.trial_index == 0 => {
            "VSS staircase | SPACE to start, ESC to exit".to_string()
        }
        SessionPhase::Idle => format!(
            "VSS staircase | stopped after {} trials | threshold {threshold} | SPACE to restart",
            view.trial_index
        ),
        SessionPhase::Instructions => "Which interval contained the flicker? Press 1 or 2 \
             after each trial. SPACE or ENTER to begin, ESC to cancel"
            .to_string(),
        SessionPhase::Running => {
            let prompt = if view.awaiting_response {
                " | 1 or 2?".to_string()
            } else {
                match view.current_interval {
                    Some(i) => format!(" | interval {}", i.number()),
                    None => String::new(),
                }
            };
            format!(
                "Trial {} | correct {} / incorrect {} | reversals {} | threshold {threshold}{prompt}",
                view.trial_index + 1,
                view.stats.correct,
                view.stats.incorrect,
                view.reversal_count,
            )
        }
        SessionPhase::Complete => format!(
            "Done: {} | {} trials | threshold {threshold} | SPACE to run again, ESC to exit",
            view.stop_reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "stopped".to_string()),
            view.trial_index
        ),
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create_window_and_surface(event_loop) {
                error!(error = %e, "failed to create window and surface");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.cleanup_and_exit(event_loop),
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render() {
                    // keep the session alive; the next frame retries
                    warn!(error = %e, "render failed");
                }
                self.update();
                if let Some(win) = &self.window {
                    win.request_redraw();
                }
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state.is_pressed() && !event.repeat =>
            {
                self.handle_input(event.physical_key, event_loop);
            }
            WindowEvent::Resized(sz) => self.handle_resize(sz),
            WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                self.scale_factor = scale_factor;
                if let Some(window) = &self.window {
                    self.handle_resize(window.inner_size());
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_exit {
            event_loop.exit();
        }
    }
}
