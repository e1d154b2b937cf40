use softbody2d::params::EngineOptions;
use softbody2d::window::App;
use winit::event_loop::{ControlFlow, EventLoop};

fn main() {
    env_logger::init();

    let event_loop = EventLoop::new().unwrap();
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(EngineOptions::default());
    event_loop.run_app(&mut app).unwrap();
}
