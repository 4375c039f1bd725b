mod common;

use std::rc::Rc;

use fxlayer::{
    FxError, Identifiable, Image, ParameterType, TextureDesc, TextureFlags, TextureFormat, TextureRegion,
    SPECIAL_TEXTURES,
};

use common::{effect_source, headless_core};

fn released(device: &fxlayer::headless::DeviceHandle, name: &str) -> usize {
    device.borrow().released.iter().filter(|n| *n == name).count()
}

#[test]
fn special_textures_follow_the_surface() {
    let (core, device) = headless_core();
    for name in SPECIAL_TEXTURES {
        let texture = core.texture(name).unwrap();
        assert!(texture.is_render_target());
        assert_eq!(texture.desc().size, [320, 240, 1]);
    }
    assert_eq!(core.texture(":backbuffer").unwrap().name(), "backbuffer");
    assert_eq!(device.borrow().live_textures().len(), 3);
}

#[test]
fn special_textures_survive_resize_until_rebound() {
    let (core, device) = headless_core();
    let source = effect_source(
        r#"
        technique T0 { pass p0 <target = ":lastpass";> { fragment = fs_tint; } }
        texture src = ":thisframe";
        "#,
    );
    let effect = core.create_effect("fx", &source).unwrap();
    let old = core.texture(":thisframe").unwrap();

    core.resize(640, 480).unwrap();
    let new = core.texture(":thisframe").unwrap();
    assert!(!Rc::ptr_eq(&old, &new));
    assert_eq!(new.desc().size, [640, 480, 1]);
    drop(old);

    // Nothing but the registry held :lastshader. The others are still bound.
    assert_eq!(released(&device, ":lastshader"), 1);
    assert_eq!(released(&device, ":thisframe"), 0);
    assert_eq!(released(&device, ":lastpass"), 0);

    let technique = effect.bind(&core, false).unwrap();
    let pass = &technique.passes()[0];
    assert_eq!(released(&device, ":thisframe"), 1);
    assert_eq!(released(&device, ":lastpass"), 1);
    assert!(Rc::ptr_eq(&effect.parameter("src").unwrap().texture().unwrap(), &new));
    assert_eq!(pass.target(&core, 0).unwrap().desc().size, [640, 480, 1]);

    core.set_pass(pass).unwrap();
    core.draw_quad(None).unwrap();
    core.reset_pass(pass).unwrap();
    effect.reset(&core).unwrap();

    let device = device.borrow();
    assert_eq!(device.draws[0].textures["src"], ":thisframe");
    assert_eq!(device.draws[0].targets[0].as_deref(), Some(":lastpass"));
}

#[test]
fn unsupported_formats_create_nothing() {
    let (core, device) = headless_core();
    let live = device.borrow().textures.len();

    let unknown = TextureDesc::new_2d(8, 8, TextureFormat::Unknown);
    assert!(matches!(core.create_texture("a", unknown), Err(FxError::InvalidArgument(_))));
    let refused = TextureDesc::new_2d(8, 8, TextureFormat::Rgb10A2);
    assert!(matches!(core.create_texture("b", refused), Err(FxError::Api(_))));
    let empty = TextureDesc::new_2d(0, 8, TextureFormat::Rgba8);
    assert!(core.create_texture("c", empty).is_err());

    assert!(core.texture("a").is_none());
    assert!(core.texture("b").is_none());
    assert_eq!(device.borrow().textures.len(), live);
}

#[test]
fn texture_names_are_checked() {
    let (core, _device) = headless_core();
    let desc = TextureDesc::new_2d(8, 8, TextureFormat::Rgba8).with_flags(TextureFlags::DYNAMIC);
    core.create_texture("noise", desc).unwrap();
    assert!(matches!(core.create_texture("noise", desc), Err(FxError::AlreadySet(_))));
    assert!(matches!(core.create_texture(":mine", desc), Err(FxError::InvalidArgument(_))));
    assert!(matches!(core.remove_texture(":lastpass"), Err(FxError::InvalidCall(_))));
}

#[test]
fn uploads_require_matching_formats() {
    let (core, device) = headless_core();
    let texture = core
        .create_texture("noise", TextureDesc::new_2d(4, 4, TextureFormat::Rgba8))
        .unwrap();

    let whole = Image::new_2d(4, 4, TextureFormat::Rgba8, vec![0; 64]);
    core.load_texture(&texture, &whole, None).unwrap();

    let corner = TextureRegion {
        origin: [2, 2, 0],
        size: [2, 2, 1],
    };
    let small = Image::new_2d(2, 2, TextureFormat::Rgba8, vec![0; 16]);
    core.load_texture(&texture, &small, Some(corner)).unwrap();

    let rgb = Image::new_2d(4, 4, TextureFormat::Rgb8, vec![0; 48]);
    assert!(matches!(
        core.load_texture(&texture, &rgb, None),
        Err(FxError::InvalidArgument(_))
    ));
    let outside = TextureRegion {
        origin: [3, 3, 0],
        size: [2, 2, 1],
    };
    assert!(core.load_texture(&texture, &small, Some(outside)).is_err());
    let short = Image::new_2d(4, 4, TextureFormat::Rgba8, vec![0; 10]);
    assert!(core.load_texture(&texture, &short, None).is_err());

    let device = device.borrow();
    assert_eq!(device.uploads.len(), 2);
    assert_eq!(device.uploads[1].region, corner);
    assert_eq!(device.uploads[1].bytes, 16);
}

#[test]
fn textures_live_until_the_last_holder_lets_go() {
    let (core, device) = headless_core();
    let texture = core
        .create_texture("noise", TextureDesc::new_2d(4, 4, TextureFormat::Rgba8))
        .unwrap();
    let input = core.create_parameter("input", ParameterType::Sampler2D).unwrap();
    core.connect_texture(&input, &texture).unwrap();
    drop(texture);

    core.remove_texture("noise").unwrap();
    assert_eq!(released(&device, "noise"), 0);

    core.remove_parameter("input").unwrap();
    drop(input);
    assert_eq!(released(&device, "noise"), 1);
}

#[test]
fn failed_connect_keeps_the_old_texture() {
    let (core, _device) = headless_core();
    let noise = core
        .create_texture("noise", TextureDesc::new_2d(4, 4, TextureFormat::Rgba8))
        .unwrap();
    let source = effect_source("technique T0 { pass p0 { fragment = fs_tint; } }");
    let effect = core.create_effect("fx", &source).unwrap();
    let src = effect.parameter("src").unwrap();
    let leaves = src.attached();
    assert!(!leaves.is_empty());

    core.destroy_effect("fx").unwrap();
    assert!(matches!(
        core.connect_texture(&src, &noise),
        Err(FxError::InvalidCall(_))
    ));
    assert!(src.texture().is_none());
    assert!(leaves.iter().all(|leaf| leaf.texture().is_none()));
}
