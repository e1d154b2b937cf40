//! Minimal winit host for the engine.
//!
//! This is the demo shell: it owns the window, translates winit events
//! into [`InputFrame`]s and engine requests, and drives one frame per
//! redraw. While the window is occluded it falls back to a coarse timer
//! instead of the display callback.
//!
//! Controls: drag with the left mouse button, push the body with the
//! arrow keys or WASD, `S` saves a snapshot, `L` restores the last one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec2;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::input::{key_force, InputFrame};
use crate::layout::{BeamDesc, Particle};
use crate::messages::{EngineRequest, EngineResponse};
use crate::params::EngineOptions;
use crate::scene::SceneStore;

const HIDDEN_TICK: Duration = Duration::from_millis(250);

/// A softbody grid to look at while dragging things around.
fn demo_scene(options: &EngineOptions) -> SceneStore {
    let mut scene = SceneStore::new(options.max_particles as usize, options.max_beams as usize);
    let cols = 8u16;
    let rows = 5u16;
    let spacing = options.particle_radius * 3.0;
    let origin = Vec2::new(
        options.bounds * 0.5 - spacing * (cols - 1) as f32 * 0.5,
        options.bounds * 0.7,
    );

    let id = |col: u16, row: u16| row * cols + col;
    for row in 0..rows {
        for col in 0..cols {
            let position = origin + Vec2::new(col as f32, -(row as f32)) * spacing;
            scene
                .add_particle(id(col, row), Particle::at(position))
                .expect("demo scene fits capacity");
        }
    }

    let mut link = |a: u16, b: u16, len: f32| {
        let beam_id = scene.first_free_beam_id().expect("demo scene fits capacity");
        scene
            .add_beam(beam_id, BeamDesc::new(a, b, len, 60.0, 3.0, 0.3, 1.0))
            .expect("demo scene endpoints exist");
    };
    let diagonal = spacing * std::f32::consts::SQRT_2;
    for row in 0..rows {
        for col in 0..cols {
            if col + 1 < cols {
                link(id(col, row), id(col + 1, row), spacing);
            }
            if row + 1 < rows {
                link(id(col, row), id(col, row + 1), spacing);
            }
            if col + 1 < cols && row + 1 < rows {
                link(id(col, row), id(col + 1, row + 1), diagonal);
                link(id(col + 1, row), id(col, row + 1), diagonal);
            }
        }
    }
    scene
}

/// The windowed application driving one [`Engine`].
pub struct App {
    options: EngineOptions,
    window: Option<Arc<Window>>,
    engine: Option<Engine>,
    up: bool,
    down: bool,
    left: bool,
    right: bool,
    cursor_pos: Vec2,
    cursor_held: bool,
    last_snapshot: Option<Vec<u8>>,
    last_fps_report: Option<Instant>,
}

impl App {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            window: None,
            engine: None,
            up: false,
            down: false,
            left: false,
            right: false,
            cursor_pos: Vec2::ZERO,
            cursor_held: false,
            last_snapshot: None,
            last_fps_report: None,
        }
    }

    fn input_frame(&self) -> InputFrame {
        InputFrame {
            key_force: key_force(self.up, self.down, self.left, self.right),
            cursor_pos: self.cursor_pos,
            cursor_active: self.cursor_held,
        }
    }

}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title("softbody2d")
            .with_inner_size(winit::dpi::LogicalSize::new(900, 900));
        let window = Arc::new(event_loop.create_window(attrs).unwrap());
        self.window = Some(window.clone());

        match pollster::block_on(Engine::with_window(window, self.options)) {
            Ok(mut engine) => {
                engine.load_scene(&demo_scene(&self.options));
                self.engine = Some(engine);
            }
            Err(e) => {
                eprintln!("Engine init failed: {}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                if let Some(engine) = &mut self.engine {
                    engine.handle(EngineRequest::Destroy);
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(engine) = &mut self.engine {
                    engine.resize(size.width, size.height);
                }
            }
            WindowEvent::Occluded(hidden) => {
                if let Some(engine) = &mut self.engine {
                    engine.handle(EngineRequest::VisibilityChange { hidden });
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                let pressed = event.state == ElementState::Pressed;
                if let PhysicalKey::Code(code) = event.physical_key {
                    match code {
                        KeyCode::Escape if pressed => event_loop.exit(),
                        KeyCode::KeyS if pressed && !event.repeat => {
                            if let Some(engine) = &mut self.engine {
                                if let Some(EngineResponse::Snapshot(bytes)) =
                                    engine.handle(EngineRequest::SnapshotSave)
                                {
                                    log::info!("Saved snapshot ({} bytes)", bytes.len());
                                    self.last_snapshot = Some(bytes);
                                }
                            }
                        }
                        KeyCode::KeyL if pressed && !event.repeat => {
                            if let (Some(engine), Some(bytes)) = (&mut self.engine, &self.last_snapshot) {
                                let response =
                                    engine.handle(EngineRequest::SnapshotLoad(bytes.clone()));
                                log::info!("Snapshot load: {:?}", response);
                            }
                        }
                        KeyCode::ArrowUp | KeyCode::KeyW => self.up = pressed,
                        KeyCode::ArrowDown => self.down = pressed,
                        KeyCode::ArrowLeft | KeyCode::KeyA => self.left = pressed,
                        KeyCode::ArrowRight | KeyCode::KeyD => self.right = pressed,
                        _ => {}
                    }
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                if button == MouseButton::Left {
                    self.cursor_held = state == ElementState::Pressed;
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                if let Some(window) = &self.window {
                    let size = window.inner_size();
                    if size.width > 0 && size.height > 0 {
                        // Normalized, y up to match simulation space.
                        self.cursor_pos = Vec2::new(
                            position.x as f32 / size.width as f32,
                            1.0 - position.y as f32 / size.height as f32,
                        );
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                let input = self.input_frame();
                let Some(engine) = &mut self.engine else {
                    return;
                };
                engine.handle(EngineRequest::Input(input));
                match engine.frame() {
                    Ok(fps) => {
                        let due = self
                            .last_fps_report
                            .is_none_or(|at| at.elapsed() >= Duration::from_secs(1));
                        if due {
                            self.last_fps_report = Some(Instant::now());
                            log::debug!("{:?}", EngineResponse::Framerate(fps));
                        }
                    }
                    Err(EngineError::Transient(e)) => log::warn!("{}", e),
                    Err(e) => {
                        eprintln!("Render error: {}", e);
                        event_loop.exit();
                        return;
                    }
                }
                if engine.is_hidden() {
                    event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + HIDDEN_TICK));
                } else {
                    event_loop.set_control_flow(ControlFlow::Poll);
                    if let Some(window) = &self.window {
                        window.request_redraw();
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        // While hidden the coarse timer lands here; schedule one frame.
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}
