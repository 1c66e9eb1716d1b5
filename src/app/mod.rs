mod egui_host;
pub mod input;
mod timing;

use crate::assets::{AssetIndex, AssetSource, LoaderRegistry, SourceError};
use crate::config::{GalleryConfig, SourceConfig};
use crate::gallery::{LoadWorker, ViewerSession};
use crate::render::{save_png, Gpu, RenderContext, RenderDevice};
use crate::ui::{thumbnail_progress, GalleryUi, UiActions};
use crossbeam_channel::{bounded, Receiver, TryRecvError};
use egui_host::{EguiHost, WindowInput};
use input::{InputAction, InputState};
use timing::FrameTiming;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes, WindowId};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
}

enum ViewerState {
    Closed,
    Fetching(Receiver<Result<AssetIndex, SourceError>>),
    Failed(String),
    Ready {
        session: Box<ViewerSession>,
        worker: LoadWorker,
    },
}

pub struct App {
    config: GalleryConfig,
    source: Arc<dyn AssetSource>,
    state: ViewerState,
    window: Option<Arc<Window>>,
    render: Option<RenderContext>,
    egui: Option<EguiHost>,
    ui: GalleryUi,
    input: InputState,
    timing: FrameTiming,
    target_frame_duration: Duration,
    next_frame_time: Instant,
}

impl App {
    fn new(config: GalleryConfig) -> Self {
        let source = config.open_source();
        let state = ViewerState::Fetching(fetch_index(Arc::clone(&source)));
        let ui = GalleryUi::new(config.thumbnail.width, config.thumbnail.height);
        Self {
            config,
            source,
            state,
            window: None,
            render: None,
            egui: None,
            ui,
            input: InputState::default(),
            timing: FrameTiming::new(Instant::now()),
            target_frame_duration: Duration::from_millis(16),
            next_frame_time: Instant::now(),
        }
    }

    fn restart(&mut self) {
        self.close_session();
        self.ui.reset();
        self.source = self.config.open_source();
        log::info!("Fetching model index from {}", self.source.describe());
        self.state = ViewerState::Fetching(fetch_index(Arc::clone(&self.source)));
    }

    fn close_session(&mut self) {
        if let ViewerState::Ready { session, .. } = &mut self.state {
            session.shutdown();
        }
        self.state = ViewerState::Closed;
    }

    /// Opens a session once the index has arrived and a graphics device exists.
    fn poll_index(&mut self) {
        let ViewerState::Fetching(receiver) = &self.state else {
            return;
        };
        let Some(gpu) = self.render.as_ref().map(RenderContext::gpu) else {
            return;
        };
        let result = match receiver.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => {
                self.state = ViewerState::Failed("index fetch stopped unexpectedly".to_string());
                return;
            }
        };

        self.state = match result {
            Ok(index) => self.open_session(index, gpu),
            Err(err) => {
                log::error!("Failed to fetch model index: {}", err);
                ViewerState::Failed(err.to_string())
            }
        };
    }

    fn open_session(&self, index: AssetIndex, gpu: Arc<Gpu>) -> ViewerState {
        log::info!(
            "Index loaded: {} formats, {} models",
            index.formats().count(),
            index.model_count()
        );
        let registry = Arc::new(LoaderRegistry::with_default_loaders(
            Arc::clone(&self.source),
            self.config.alpha_test,
        ));
        let worker = match LoadWorker::spawn(registry, self.config.load_workers) {
            Ok(worker) => worker,
            Err(err) => return ViewerState::Failed(format!("cannot start load workers: {err}")),
        };
        let ground = match self.config.ground_texture() {
            Ok(ground) => ground,
            Err(err) => {
                log::warn!("{}; using the built-in checker", err);
                None
            }
        };
        let device = RenderDevice::new(gpu);
        let mut session = Box::new(ViewerSession::new(index, &self.config, ground, device));
        session.start();
        ViewerState::Ready { session, worker }
    }

    /// Feeds worker completions in and new requests out. Runs every frame, visible or not.
    fn pump_session(&mut self) {
        let ViewerState::Ready { session, worker } = &mut self.state else {
            return;
        };
        for completion in worker.drain() {
            session.handle_completion(completion);
        }
        session.tick();
        submit_requests(session, worker);
    }

    fn update_target_frame_duration(&mut self, window: &Window) {
        let mut target = Duration::from_millis(16);
        if let Some(millihz) = window
            .current_monitor()
            .and_then(|monitor| monitor.refresh_rate_millihertz())
        {
            let hz = millihz as f32 / 1000.0;
            if hz > 1.0 {
                target = Duration::from_secs_f32(1.0 / hz);
            }
        }
        self.target_frame_duration = target;
        self.next_frame_time = Instant::now() + self.target_frame_duration;
    }

    fn frame(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        let sampled = self.timing.update(now);
        self.poll_index();
        self.pump_session();

        let (Some(window), Some(egui), Some(render)) =
            (self.window.clone(), self.egui.as_mut(), self.render.as_mut())
        else {
            return;
        };

        let mut preview_texture = None;
        let mut viewport_busy = false;
        if let ViewerState::Ready { session, .. } = &mut self.state {
            let started = Instant::now();
            session.render_preview();
            self.timing.set_preview_time(started.elapsed());
            preview_texture = render.preview_texture(session.preview_target());
            viewport_busy = session.loading_indicator_visible();
        }

        let ui = &mut self.ui;
        let state = &self.state;
        let source_label = self.source.describe();
        let mut actions = UiActions::default();
        let output = egui.run_ui(&window, &mut self.input, viewport_busy, |ctx| {
            actions = match state {
                ViewerState::Closed => UiActions::default(),
                ViewerState::Fetching(_) => {
                    ui.show_message(ctx, &format!("Loading model index from {source_label}…"), false)
                }
                ViewerState::Failed(message) => ui.show_message(ctx, message, true),
                ViewerState::Ready { session, .. } => {
                    ui.show_gallery(ctx, session, preview_texture, &source_label)
                }
            };
        });

        if let Err(err) = render.present(
            &output.clipped_primitives,
            &output.textures_delta,
            output.pixels_per_point,
        ) {
            log::error!("Present failed: {}", err);
        }

        self.apply_actions(actions, event_loop);
        self.apply_held_keys();
        if sampled {
            window.set_title(&self.timing.title(&self.config.window.title, &self.title_detail()));
        }
    }

    fn title_detail(&self) -> String {
        match &self.state {
            ViewerState::Ready { session, .. } => match session.active_format() {
                Some(format) => format!("{} ({})", format, thumbnail_progress(session.entries())),
                None => String::new(),
            },
            ViewerState::Fetching(_) => "loading index".to_string(),
            ViewerState::Failed(_) => "index unavailable".to_string(),
            ViewerState::Closed => String::new(),
        }
    }

    fn apply_actions(&mut self, actions: UiActions, event_loop: &ActiveEventLoop) {
        if actions.quit {
            event_loop.exit();
            return;
        }
        if actions.open_folder {
            self.open_folder();
            return;
        }
        if actions.retry {
            self.restart();
            return;
        }

        let ViewerState::Ready { session, worker } = &mut self.state else {
            return;
        };
        if let Some(format) = &actions.select_format {
            session.select_format(format);
        }
        if let Some(model) = &actions.select_model {
            session.select_model(model);
        }
        submit_requests(session, worker);

        if let Some([width, height]) = actions.viewport_px {
            session.resize_preview(width, height);
        }
        let fov = session.preview().camera().fov_y_degrees;
        let preview = session.preview_mut();
        actions
            .gesture
            .apply(preview.orbit_mut(), actions.viewport_height, fov);
        if actions.reset_camera {
            preview.reset_camera();
        }
        if actions.frame_model {
            preview.frame_current_model();
        }

        if actions.save_screenshot {
            self.save_screenshot();
        }
        if actions.export_thumbnails {
            self.export_thumbnails();
        }
    }

    /// Held arrow keys. [`InputState`] ignores them while blocked.
    fn apply_held_keys(&mut self) {
        if let ViewerState::Ready { session, .. } = &mut self.state {
            self.input
                .update_orbit(session.preview_mut().orbit_mut(), self.timing.frame_dt);
        }
    }

    fn handle_key_action(&mut self, action: InputAction) {
        let ViewerState::Ready { session, .. } = &mut self.state else {
            return;
        };
        let preview = session.preview_mut();
        match action {
            InputAction::Dolly(factor) => preview.orbit_mut().dolly(factor),
            InputAction::FrameModel => {
                preview.frame_current_model();
            }
            InputAction::ResetCamera => preview.reset_camera(),
            InputAction::None => {}
        }
    }

    fn open_folder(&mut self) {
        let Some(root) = rfd::FileDialog::new()
            .set_title("Open model folder")
            .pick_folder()
        else {
            return;
        };
        log::info!("Switching asset root to {}", root.display());
        self.config.source = SourceConfig::Directory { root };
        self.restart();
    }

    fn save_screenshot(&self) {
        let ViewerState::Ready { session, .. } = &self.state else {
            return;
        };
        let name = session
            .preview()
            .current_model()
            .map(|model| format!("{}.png", model.name))
            .unwrap_or_else(|| "preview.png".to_string());
        let Some(path) = rfd::FileDialog::new()
            .add_filter("PNG image", &["png"])
            .set_file_name(name)
            .save_file()
        else {
            return;
        };
        let saved = session
            .preview_frame()
            .and_then(|frame| save_png(&path, &frame));
        match saved {
            Ok(()) => log::info!("Saved screenshot to {}", path.display()),
            Err(err) => log::error!("Screenshot failed: {}", err),
        }
    }

    fn export_thumbnails(&self) {
        let ViewerState::Ready { session, .. } = &self.state else {
            return;
        };
        let Some(dir) = rfd::FileDialog::new()
            .set_title("Export thumbnails to")
            .pick_folder()
        else {
            return;
        };
        if let Err(err) = session.export_thumbnails(&dir) {
            log::error!("Thumbnail export failed: {}", err);
        }
    }
}

fn fetch_index(source: Arc<dyn AssetSource>) -> Receiver<Result<AssetIndex, SourceError>> {
    let (sender, receiver) = bounded(1);
    let spawned = thread::Builder::new()
        .name("index-fetch".to_string())
        .spawn(move || {
            // The receiver is gone if the user switched roots meanwhile.
            let _ = sender.send(source.fetch_index());
        });
    if let Err(err) = spawned {
        log::error!("Failed to start index fetch: {}", err);
    }
    receiver
}

fn submit_requests(session: &mut ViewerSession, worker: &LoadWorker) {
    for request in session.take_requests() {
        if !worker.submit(request) {
            log::error!("Load workers stopped; request dropped");
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attrs = WindowAttributes::default()
            .with_title(self.config.window.title.clone())
            .with_inner_size(LogicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(true);
        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("Failed to create window: {}", err);
                event_loop.exit();
                return;
            }
        };

        let render = match RenderContext::new(Arc::clone(&window), self.config.clear_color) {
            Ok(render) => render,
            Err(err) => {
                log::error!("Failed to initialise rendering: {}", err);
                event_loop.exit();
                return;
            }
        };
        self.egui = Some(EguiHost::new(&window, render.max_texture_side()));
        self.render = Some(render);
        self.update_target_frame_duration(&window);
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        if let (Some(window), Some(egui)) = (&self.window, &mut self.egui) {
            match egui.route(window, &event, &mut self.input) {
                WindowInput::Consumed => return,
                WindowInput::Quit => {
                    event_loop.exit();
                    return;
                }
                WindowInput::Camera(action) => {
                    self.handle_key_action(action);
                    return;
                }
                WindowInput::Unhandled => {}
            }
        }

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(render) = &mut self.render {
                    render.resize(size);
                }
                if let Some(window) = self.window.clone() {
                    self.update_target_frame_duration(&window);
                }
            }
            WindowEvent::Moved(_) => {
                if let Some(window) = self.window.clone() {
                    self.update_target_frame_duration(&window);
                }
            }
            WindowEvent::RedrawRequested => self.frame(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        if now >= self.next_frame_time {
            if let Some(window) = &self.window {
                window.request_redraw();
            }
            self.next_frame_time = now + self.target_frame_duration;
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_frame_time));
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.close_session();
    }
}

pub fn run(config: GalleryConfig) -> Result<(), AppError> {
    log::info!("{} starting", config.window.title);
    log::info!("   Press ESC or close the window to exit");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = App::new(config);
    log::info!("Fetching model index from {}", app.source.describe());
    event_loop.run_app(&mut app)?;

    log::info!("Goodbye");
    Ok(())
}
