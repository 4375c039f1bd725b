mod common;

use fxlayer::{FxError, FrameData, Identifiable, ParameterType, Viewport, PARAM_FRAME, PARAM_VIEWPORT};

use common::{effect_source, headless_core};

#[test]
fn global_values_reach_every_program_uniform() {
    let (core, _device) = headless_core();
    let g_time = core.create_parameter("g_time", ParameterType::Float1).unwrap();
    let source = effect_source(
        r#"
        technique T0 {
            pass a { vertex = vs_main; fragment = fs_time; }
            pass b { fragment = fs_time; }
        }
        global time = "g_time";
        "#,
    );
    let effect = core.create_effect("fx", &source).unwrap();

    g_time.set_scalar(&[3.25]).unwrap();

    let effect_time = effect.parameter("time").unwrap();
    assert_eq!(effect_time.full_name(), "fx:time");
    assert_eq!(effect_time.scalar(), vec![3.25]);
    for pass in effect.default_technique().passes() {
        let uniform = pass.uniform("time").unwrap();
        assert!(!uniform.is_virtual());
        assert_eq!(uniform.scalar(), vec![3.25]);
    }
}

#[test]
fn attaching_to_a_program_uniform_fails_without_mutation() {
    let (core, _device) = headless_core();
    let source = effect_source("technique T0 { pass p0 { fragment = fs_time; } }");
    let effect = core.create_effect("fx", &source).unwrap();
    let uniform = effect.default_technique().passes()[0].uniform("time").unwrap();
    let other = core.create_parameter("other", ParameterType::Float1).unwrap();
    other.set_scalar(&[7.0]).unwrap();

    let err = uniform.attach(&other).unwrap_err();
    assert!(matches!(err, FxError::InvalidCall(_)));
    assert!(uniform.attached().is_empty());
    assert_eq!(other.scalar(), vec![7.0]);
}

#[test]
fn registry_names_are_unique() {
    let (core, _device) = headless_core();
    core.create_parameter("exposure", ParameterType::Float1).unwrap();
    assert!(matches!(
        core.create_parameter("exposure", ParameterType::Float2),
        Err(FxError::AlreadySet(_))
    ));
    assert!(core.create_parameter("", ParameterType::Float1).is_err());

    core.remove_parameter("exposure").unwrap();
    assert!(core.parameter("exposure").is_none());
    assert!(matches!(core.remove_parameter("fx_time"), Err(FxError::InvalidCall(_))));
}

#[test]
fn frame_data_feeds_system_parameters() {
    let (core, _device) = headless_core();
    let mut frame = FrameData::new(Viewport::new(640, 480));
    frame.advance();
    frame.advance();
    core.update_frame(&frame).unwrap();

    assert_eq!(core.parameter(PARAM_FRAME).unwrap().scalar(), vec![2.0]);
    assert_eq!(
        core.parameter(PARAM_VIEWPORT).unwrap().scalar(),
        vec![0.0, 0.0, 640.0, 480.0]
    );
}

#[test]
fn sampler_parameters_take_textures_only() {
    let (core, _device) = headless_core();
    let scalar = core.create_parameter("scale", ParameterType::Float1).unwrap();
    let texture = core.texture(":lastpass").unwrap();
    assert!(matches!(
        core.connect_texture(&scalar, &texture),
        Err(FxError::InvalidArgument(_))
    ));

    let sampler = core.create_parameter("input", ParameterType::Sampler2D).unwrap();
    core.connect_texture(&sampler, &texture).unwrap();
    assert_eq!(sampler.texture().unwrap().name(), ":lastpass");
}
