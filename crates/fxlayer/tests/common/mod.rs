#![allow(dead_code)]

use fxlayer::headless::DeviceHandle;
use fxlayer::{Core, CoreConfig, EffectRef, HeadlessAdapter, MemoryFileSystem, ParameterRef, ParameterType};
use fxlayer_naga::NagaCompiler;

pub const SHADER: &str = r#"
@group(0) @binding(0) var<uniform> time: f32;
@group(0) @binding(1) var<uniform> tint: vec4<f32>;
@group(0) @binding(2) var src: texture_2d<f32>;
@group(0) @binding(3) var src_sampler: sampler;

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) position: vec4<f32>, @location(2) uv: vec4<f32>) -> VertexOut {
    var out: VertexOut;
    out.position = position;
    out.uv = uv.xy;
    return out;
}

@fragment
fn fs_time(in: VertexOut) -> @location(0) vec4<f32> {
    return vec4<f32>(time, time, time, 1.0);
}

@fragment
fn fs_tint(in: VertexOut) -> @location(0) vec4<f32> {
    return textureSample(src, src_sampler, in.uv) * tint;
}
"#;

/// `g_time` drives `time` of the single pass `T0:p0`.
pub const SCENARIO: &str = r#"
technique T0 {
    pass p0 <blend = true;> {
        vertex = vs_main;
        fragment = fs_time;
    }
}

global time = "g_time";
"#;

pub fn effect_source(directives: &str) -> String {
    format!("{SHADER}\n{directives}")
}

/// Create `g_time` and the `SCENARIO` effect named `fx` on top of it.
pub fn scenario_effect(core: &Core) -> (ParameterRef, EffectRef) {
    let g_time = core.create_parameter("g_time", ParameterType::Float1).unwrap();
    let effect = core.create_effect("fx", &effect_source(SCENARIO)).unwrap();
    (g_time, effect)
}

pub fn init_logging() {
    fxlayer::logging::init("debug");
}

pub fn core() -> Core {
    init_logging();
    Core::new(
        CoreConfig::default(),
        Box::new(NagaCompiler::new()),
        Box::new(MemoryFileSystem::new()),
    )
}

pub fn headless_core() -> (Core, DeviceHandle) {
    let core = core();
    let adapter = HeadlessAdapter::new(320, 240);
    let device = adapter.device();
    core.set_adapter(Box::new(adapter)).unwrap();
    (core, device)
}
