//! Validate the generated WGSL with naga before it ever reaches a
//! device, across a spread of engine configurations.

use naga::front::wgsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};

use softbody2d::gpu::{compute_shader_source, render_shader_source};
use softbody2d::params::EngineOptions;

fn validate(source: &str, what: &str) {
    let module = match wgsl::parse_str(source) {
        Ok(module) => module,
        Err(err) => panic!("{} shader failed to parse: {}", what, err.emit_to_string(source)),
    };
    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    if let Err(err) = validator.validate(&module) {
        panic!("{} shader failed validation: {}", what, err);
    }
}

fn configurations() -> Vec<EngineOptions> {
    vec![
        EngineOptions::default(),
        EngineOptions {
            particle_radius: 2.5,
            subticks: 2,
            max_particles: 8,
            max_beams: 4,
            bounds: 100.0,
            user_force: 0.5,
        },
        EngineOptions {
            particle_radius: 1.0,
            subticks: 255,
            max_particles: 2730,
            max_beams: 1638,
            bounds: 5000.0,
            user_force: 2.0,
        },
    ]
}

#[test]
fn compute_shader_is_valid() {
    for options in configurations() {
        validate(&compute_shader_source(&options), "compute");
    }
}

#[test]
fn render_shader_is_valid() {
    for options in configurations() {
        validate(&render_shader_source(&options), "render");
    }
}

#[test]
fn shader_generation_is_deterministic() {
    let options = EngineOptions::default();
    assert_eq!(compute_shader_source(&options), compute_shader_source(&options));
    assert_eq!(render_shader_source(&options), render_shader_source(&options));
}

#[test]
fn compute_shader_has_both_entry_points() {
    let module = wgsl::parse_str(&compute_shader_source(&EngineOptions::default())).unwrap();
    let names: Vec<&str> = module.entry_points.iter().map(|ep| ep.name.as_str()).collect();
    assert!(names.contains(&"update"));
    assert!(names.contains(&"compact"));
}
