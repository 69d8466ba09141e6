//! Stereo VR panorama viewer
//!
//! Renders a 360° image on a textured sphere to a head-mounted display and
//! mirrors it to a desktop window. Controller buttons (or the arrow keys)
//! step through the other panoramas in the same directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

pub mod browse;
pub mod compositor;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod gamepad;
pub mod gpu;
pub mod input;
pub mod mesh;
pub mod pose;
pub mod render_target;
pub mod renderer;
pub mod session;
pub mod simulated;
pub mod texture;

pub use config::{RuntimeKind, ViewerConfig};
pub use error::StartupError;

use device::{HmdRuntime, NoHeadset};
use events::{FrameCounter, Notification, Notifier};
use input::{InputRouter, Navigation};
use renderer::Renderer;
use session::{SessionSettings, StereoSession};
use simulated::SimulatedRuntime;

const WINDOW_TITLE: &str = "Panorama Viewer";
const INITIAL_WINDOW_SIZE: (f64, f64) = (1280.0, 720.0);

/// Headset runtime selected by configuration.
pub fn runtime_for(kind: RuntimeKind) -> Box<dyn HmdRuntime> {
    match kind {
        RuntimeKind::None => Box::new(NoHeadset),
        RuntimeKind::Simulated => Box::new(SimulatedRuntime),
    }
}

struct PanoramaApp {
    config: ViewerConfig,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    session: StereoSession,
    input: InputRouter,
    notifier: Notifier,
    frames: FrameCounter,
    /// Last panorama navigated to, even if it failed to load.
    cursor: Option<PathBuf>,
    fatal: Option<StartupError>,
}

impl PanoramaApp {
    fn new(config: ViewerConfig) -> Self {
        let settings = SessionSettings {
            near_clip: config.near_clip,
            far_clip: config.far_clip,
            submit_layout: config.submit_layout,
            show_mirror_window: config.show_mirror_window,
            desktop_aspect: (INITIAL_WINDOW_SIZE.0 / INITIAL_WINDOW_SIZE.1) as f32,
        };

        let mut notifier = Notifier::new();
        notifier.subscribe(|notification| match notification {
            Notification::FramesPerSecond(fps) => debug!("{:.1} fps", fps),
            Notification::Status(status) => info!("{}", status),
            Notification::CriticalError(message) => error!("{}", message),
            Notification::DeviceIdentity(_) => {}
        });

        Self {
            cursor: config.panorama.clone(),
            session: StereoSession::new(settings),
            config,
            window: None,
            renderer: None,
            input: InputRouter::new(),
            notifier,
            frames: FrameCounter::new(Instant::now()),
            fatal: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: StartupError) {
        error!("Startup failed: {}", err);
        self.fatal = Some(err);
        event_loop.exit();
    }

    /// Step through the current directory; a panorama that fails to load is
    /// skipped over on the next step.
    fn navigate(&mut self, navigation: Navigation) {
        let (Some(renderer), Some(current)) = (self.renderer.as_mut(), self.cursor.as_ref()) else {
            debug!("Nothing to navigate from");
            return;
        };
        let next = match browse::neighbour(current, navigation.delta()) {
            Ok(Some(next)) => next,
            Ok(None) => {
                debug!("No panoramas next to {}", current.display());
                return;
            }
            Err(e) => {
                debug!("Cannot list directory of {}: {}", current.display(), e);
                return;
            }
        };
        info!("{:?}: {}", navigation, next.display());
        if let Err(e) = renderer.load_panorama(&next, &mut self.notifier) {
            debug!("Skipping panorama: {}", e);
        }
        self.cursor = Some(next);
    }

    fn frame(&mut self) {
        let mut actions = Vec::new();
        if let Some(device) = self.session.device_mut() {
            actions = self.input.poll(device);
        }
        for action in actions {
            self.navigate(action);
        }

        self.session.begin_frame();
        if let Some(renderer) = &mut self.renderer {
            renderer.render_frame(&mut self.session);
        }

        if let Some(fps) = self.frames.tick(Instant::now()) {
            self.notifier.emit(Notification::FramesPerSecond(fps));
        }
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

impl ApplicationHandler for PanoramaApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        info!("Creating window");

        let attrs = Window::default_attributes()
            .with_title(WINDOW_TITLE)
            .with_inner_size(LogicalSize::new(INITIAL_WINDOW_SIZE.0, INITIAL_WINDOW_SIZE.1));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => return self.fail(event_loop, e.into()),
        };

        let title_window = window.clone();
        self.notifier.subscribe(move |notification| {
            if let Notification::DeviceIdentity(identity) = notification {
                title_window.set_title(identity);
            }
        });

        let mut renderer = match Renderer::new(window.clone(), &self.config) {
            Ok(renderer) => renderer,
            Err(e) => return self.fail(event_loop, e),
        };
        info!("Renderer initialized");

        let size = window.inner_size();
        if size.width > 0 && size.height > 0 {
            self.session.set_desktop_aspect(size.width as f32 / size.height as f32);
        }

        let runtime = runtime_for(self.config.runtime);
        let state = self.session.initialize(runtime.as_ref(), &mut self.notifier);
        info!("Session state: {:?}", state);
        if let Some(eye_size) = self.session.eye_size() {
            renderer.allocate_eye_targets(eye_size);
        }
        // The headset paces frames when present; otherwise sync to the display.
        renderer.set_vsync(!self.session.is_stereo());

        if let Some(path) = self.config.panorama.clone() {
            if let Err(e) = renderer.load_panorama(&path, &mut self.notifier) {
                warn!("Could not load initial panorama: {}", e);
            }
        }

        window.request_redraw();
        self.renderer = Some(renderer);
        self.window = Some(window);
        self.frames = FrameCounter::new(Instant::now());
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(renderer) = &mut self.renderer {
                    renderer.resize(size.width, size.height);
                }
                if size.width > 0 && size.height > 0 {
                    self.session.set_desktop_aspect(size.width as f32 / size.height as f32);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed && event.logical_key == Key::Named(NamedKey::Escape) {
                    info!("Escape pressed, exiting");
                    event_loop.exit();
                } else if let Some(navigation) = input::keyboard_navigation(&event) {
                    self.navigate(navigation);
                }
            }
            WindowEvent::RedrawRequested => self.frame(),
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        info!("Shutting down");
        if let Some(renderer) = &mut self.renderer {
            renderer.shutdown();
        }
        self.session.shutdown();
    }
}

/// Open the window, bring up the headset and run until exit.
pub fn run(config: ViewerConfig) -> Result<(), StartupError> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = PanoramaApp::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
