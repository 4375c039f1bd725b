mod common;

use fxlayer::headless::{DrawKind, RenderState, CULL_CCW, CULL_NONE};
use fxlayer::{
    fullscreen_quad, FxError, Identifiable, TextureDesc, TextureFormat, Vertex, VertexFlags,
};

use common::{effect_source, headless_core, scenario_effect};

#[test]
fn bound_global_reaches_the_draw_and_reset_restores_states() {
    let (core, device) = headless_core();
    let (g_time, effect) = scenario_effect(&core);
    let before = device.borrow().states();

    g_time.set_scalar(&[12.5]).unwrap();
    let technique = effect.bind(&core, true).unwrap();
    assert_eq!(technique.name(), "T0");

    let pass = &technique.passes()[0];
    core.set_pass(pass).unwrap();
    assert_eq!(device.borrow().state(RenderState::AlphaBlendEnable), 1);
    core.draw_quad(None).unwrap();
    core.reset_pass(pass).unwrap();
    effect.reset(&core).unwrap();

    let device = device.borrow();
    let draw = &device.draws[0];
    assert_eq!(draw.kind, DrawKind::Quad);
    assert_eq!(draw.pass, Some(pass.id()));
    assert_eq!(draw.uniforms["time"], vec![12.5]);
    assert_eq!(draw.states[&RenderState::ZEnable], 0);
    assert_eq!(draw.states[&RenderState::ZWriteEnable], 0);
    assert_eq!(draw.states[&RenderState::CullMode], CULL_NONE);
    assert_eq!(draw.states[&RenderState::AlphaTestEnable], 0);
    assert_eq!(draw.states[&RenderState::StencilEnable], 0);
    assert_eq!(draw.states[&RenderState::AlphaBlendEnable], 1);

    assert_eq!(device.states(), before);
}

#[test]
fn values_set_while_bound_apply_before_the_next_draw() {
    let (core, device) = headless_core();
    let (g_time, effect) = scenario_effect(&core);

    let technique = effect.bind(&core, false).unwrap();
    let pass = &technique.passes()[0];
    core.set_pass(pass).unwrap();
    core.draw_quad(None).unwrap();
    g_time.set_scalar(&[4.0]).unwrap();
    core.draw_quad(None).unwrap();
    core.reset_pass(pass).unwrap();
    effect.reset(&core).unwrap();

    let device = device.borrow();
    assert_eq!(device.draws[0].uniforms["time"], vec![0.0]);
    assert_eq!(device.draws[1].uniforms["time"], vec![4.0]);
    assert!(!pass.uniform("time").unwrap().is_dirty());
}

#[test]
fn passes_nest_strictly() {
    let (core, _device) = headless_core();
    let source = effect_source(
        r#"
        technique T0 {
            pass a { fragment = fs_time; }
            pass b { fragment = fs_time; }
        }
        "#,
    );
    let effect = core.create_effect("fx", &source).unwrap();
    let technique = effect.default_technique();
    let (a, b) = (&technique.passes()[0], &technique.passes()[1]);

    // No bound effect yet.
    assert!(matches!(core.set_pass(a), Err(FxError::InvalidCall(_))));

    effect.bind(&core, false).unwrap();
    core.set_pass(a).unwrap();
    assert!(matches!(core.set_pass(b), Err(FxError::InvalidCall(_))));
    assert!(matches!(core.reset_pass(b), Err(FxError::InvalidCall(_))));
    assert_eq!(core.bound_pass(), Some(a.id()));

    core.reset_pass(a).unwrap();
    core.set_pass(b).unwrap();
    core.reset_pass(b).unwrap();
    assert!(matches!(core.reset_pass(b), Err(FxError::InvalidCall(_))));
    effect.reset(&core).unwrap();
}

#[test]
fn passes_of_another_effect_are_rejected() {
    let (core, _device) = headless_core();
    let source = effect_source("technique T0 { pass p0 { fragment = fs_time; } }");
    let first = core.create_effect("first", &source).unwrap();
    let second = core.create_effect("second", &source).unwrap();

    first.bind(&core, false).unwrap();
    let foreign = &second.default_technique().passes()[0];
    assert!(matches!(core.set_pass(foreign), Err(FxError::InvalidCall(_))));
    first.reset(&core).unwrap();
}

#[test]
fn passes_of_another_technique_are_rejected() {
    let (core, _device) = headless_core();
    let source = effect_source(
        r#"
        technique T0 { pass p0 { fragment = fs_time; } }
        technique T1 { pass p0 { fragment = fs_time; } }
        "#,
    );
    let effect = core.create_effect("fx", &source).unwrap();
    let other = &effect.technique_by_name("T1").unwrap().passes()[0];

    let technique = effect.bind(&core, false).unwrap();
    assert_eq!(technique.name(), "T0");
    assert!(matches!(core.set_pass(other), Err(FxError::InvalidCall(_))));
    assert_eq!(core.bound_pass(), None);

    let own = &technique.passes()[0];
    core.set_pass(own).unwrap();
    core.reset_pass(own).unwrap();
    effect.reset(&core).unwrap();
}

#[test]
fn reset_releases_a_pass_left_bound() {
    let (core, device) = headless_core();
    let (_g_time, effect) = scenario_effect(&core);
    let before = device.borrow().states();

    let technique = effect.bind(&core, false).unwrap();
    core.set_pass(&technique.passes()[0]).unwrap();
    effect.reset(&core).unwrap();

    assert_eq!(core.bound_pass(), None);
    assert_eq!(device.borrow().bound_pass(), None);
    assert_eq!(device.borrow().states(), before);
}

#[test]
fn partial_capture_leaves_other_states_alone() {
    let (core, device) = headless_core();
    let (_g_time, effect) = scenario_effect(&core);

    effect.bind(&core, false).unwrap();
    device.borrow_mut().set_state(RenderState::FillMode, 2);
    device.borrow_mut().set_state(RenderState::CullMode, CULL_NONE);
    effect.reset(&core).unwrap();
    assert_eq!(device.borrow().state(RenderState::FillMode), 2);
    assert_eq!(device.borrow().state(RenderState::CullMode), CULL_CCW);

    effect.bind(&core, true).unwrap();
    device.borrow_mut().set_state(RenderState::FillMode, 3);
    effect.reset(&core).unwrap();
    assert_eq!(device.borrow().state(RenderState::FillMode), 2);
}

#[test]
fn pass_targets_fall_back_to_the_default_target() {
    let (core, device) = headless_core();
    core.create_texture("scratch", TextureDesc::render_target(64, 64, TextureFormat::Rgba8))
        .unwrap();
    let source = effect_source(
        r#"
        technique T0 {
            pass first <target = ":lastpass"; target1 = "scratch";> { fragment = fs_time; }
            pass second { fragment = fs_time; }
        }
        "#,
    );
    let effect = core.create_effect("fx", &source).unwrap();
    let technique = effect.bind(&core, false).unwrap();
    let (first, second) = (&technique.passes()[0], &technique.passes()[1]);

    assert_eq!(first.target(&core, 0).unwrap().name(), ":lastpass");
    assert_eq!(first.target(&core, 1).unwrap().name(), "scratch");
    assert_eq!(first.target(&core, 2).unwrap().name(), "backbuffer");
    assert!(first.explicit_target(2).is_none());
    assert!(first.target(&core, 4).is_err());

    for pass in [first, second] {
        core.set_pass(pass).unwrap();
        core.draw_quad(None).unwrap();
        core.reset_pass(pass).unwrap();
    }
    effect.reset(&core).unwrap();

    let device = device.borrow();
    assert_eq!(
        device.draws[0].targets,
        vec![Some(":lastpass".to_string()), Some("scratch".to_string()), None, None]
    );
    assert_eq!(device.draws[1].targets[0].as_deref(), Some("backbuffer"));
}

#[test]
fn targets_must_be_render_targets() {
    let (core, _device) = headless_core();
    let plain = core
        .create_texture("plain", TextureDesc::new_2d(16, 16, TextureFormat::Rgba8))
        .unwrap();
    let source = effect_source(
        r#"technique T0 { pass p0 <target = "plain";> { fragment = fs_time; } }"#,
    );
    assert!(matches!(
        core.create_effect("fx", &source),
        Err(FxError::CompileFailed { .. })
    ));

    let ok = core
        .create_effect("ok", &effect_source("technique T0 { pass p0 { fragment = fs_time; } }"))
        .unwrap();
    let pass = &ok.default_technique().passes()[0];
    assert!(matches!(pass.set_target(0, Some(plain)), Err(FxError::InvalidArgument(_))));
    assert!(pass.set_target(9, None).is_err());
}

#[test]
fn geometry_ranges_are_checked() {
    let (core, device) = headless_core();
    let (_g_time, effect) = scenario_effect(&core);
    let quad = fullscreen_quad();
    let triangles: Vec<Vertex> = [quad[0], quad[1], quad[2], quad[2], quad[1], quad[3]].to_vec();

    let technique = effect.bind(&core, false).unwrap();
    let pass = &technique.passes()[0];
    core.set_pass(pass).unwrap();
    assert!(matches!(
        core.draw_geometry(0, 0, &triangles, VertexFlags::TRANSFORMED),
        Err(FxError::InvalidArgument(_))
    ));
    assert!(matches!(
        core.draw_geometry(1, 2, &triangles, VertexFlags::TRANSFORMED),
        Err(FxError::InvalidArgument(_))
    ));
    core.draw_geometry(3, 1, &triangles, VertexFlags::TRANSFORMED).unwrap();
    core.draw_quad(Some(&quad)).unwrap();
    core.reset_pass(pass).unwrap();
    effect.reset(&core).unwrap();

    let device = device.borrow();
    assert_eq!(device.draws.len(), 2);
    assert_eq!(device.draws[0].kind, DrawKind::Geometry { offset: 3, count: 1 });
    assert_eq!(device.draws[0].vertices, 3);
}
