//! Per-draw commit behavior: texture dirty ranges, constant-buffer flushes,
//! render-target resolution order and the frame statistics.

mod common;

use common::*;
use glaze_graphics::hal::backend::null::ContextCall;
use glaze_graphics::hal::TextureView;
use glaze_graphics::{ClearFlags, GraphicsError, IntRect, PrimitiveType};
use pretty_assertions::assert_eq;

#[test]
fn texture_commits_cover_exactly_the_dirty_range() {
    let mut f = fixture();
    let names = ["tTex0", "tTex1", "tTex2", "tTex3", "tTex4", "tTex5", "tTex6"];
    let (vs, fs) = shader_pair(&f.graphics, &names);
    let quad = quad_buffer(&f.graphics);
    f.graphics.set_shaders(Some(&vs), Some(&fs)).unwrap();
    f.graphics.set_vertex_buffer(&quad).unwrap();

    for unit in 0..6 {
        let texture = plain_texture(&f.graphics);
        f.graphics.set_texture(unit, Some(&texture)).unwrap();
    }
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();

    // Rebind new textures at units 2 and 5 only.
    f.log.clear();
    let new_a = plain_texture(&f.graphics);
    let new_b = plain_texture(&f.graphics);
    f.graphics.set_texture(2, Some(&new_a)).unwrap();
    f.graphics.set_texture(5, Some(&new_b)).unwrap();
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();

    // The commit touches the contiguous range 2..=5 and nothing outside it.
    let mut committed = committed_texture_variables(&f.log);
    committed.sort();
    assert_eq!(committed, vec!["tTex2", "tTex3", "tTex4", "tTex5"]);
}

#[test]
fn unchanged_textures_are_not_recommitted() {
    let mut f = fixture();
    let (vs, fs) = shader_pair(&f.graphics, &["tAlbedoMap", "tNormalMap"]);
    let quad = quad_buffer(&f.graphics);
    f.graphics.set_shaders(Some(&vs), Some(&fs)).unwrap();
    f.graphics.set_vertex_buffer(&quad).unwrap();
    let albedo = plain_texture(&f.graphics);
    let normal = plain_texture(&f.graphics);
    f.graphics.set_texture(0, Some(&albedo)).unwrap();
    f.graphics.set_texture(1, Some(&normal)).unwrap();
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();

    f.log.clear();
    // Same bindings again: idempotent, nothing to commit.
    f.graphics.set_texture(0, Some(&albedo)).unwrap();
    f.graphics.set_texture(1, Some(&normal)).unwrap();
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();
    assert_eq!(committed_texture_variables(&f.log), Vec::<String>::new());
}

#[test]
fn render_target_texture_redirects_to_backup() {
    let mut f = fixture();
    let (vs, fs) = shader_pair(&f.graphics, &["tAlbedoMap"]);
    let quad = quad_buffer(&f.graphics);
    f.graphics.set_shaders(Some(&vs), Some(&fs)).unwrap();
    f.graphics.set_vertex_buffer(&quad).unwrap();

    let target = render_target_texture(&f.graphics);
    let backup = plain_texture(&f.graphics);
    target.set_backup_texture(Some(backup.clone()));
    f.graphics
        .set_render_target_texture(0, Some(&target))
        .unwrap();

    // Binding the active render target as a texture must upload the backup's
    // view, never the target's own.
    f.graphics.set_texture(0, Some(&target)).unwrap();
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();

    let backup_view = backup.srv().unwrap().id();
    let target_view = target.srv().unwrap().id();
    let pushed: Vec<_> = f
        .log
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            ContextCall::SetShaderTexture { view, .. } => Some(view),
            _ => None,
        })
        .collect();
    assert_eq!(pushed, vec![backup_view]);
    assert!(!pushed.contains(&target_view));
}

#[test]
fn rebinding_as_render_target_displaces_bound_texture_units() {
    let mut f = fixture();
    let (vs, fs) = shader_pair(&f.graphics, &["tAlbedoMap"]);
    f.graphics.set_shaders(Some(&vs), Some(&fs)).unwrap();

    let target = render_target_texture(&f.graphics);
    f.graphics.set_texture(0, Some(&target)).unwrap();
    assert!(f
        .graphics
        .texture(0)
        .is_some_and(|t| std::rc::Rc::ptr_eq(t, &target)));

    // Without a backup the unit is cleared outright.
    f.graphics
        .set_render_target_texture(0, Some(&target))
        .unwrap();
    assert!(f.graphics.texture(0).is_none());
}

#[test]
fn dirty_constant_buffers_flush_before_the_draw_only_once() {
    let mut f = fixture();
    let (vs, fs) = shader_pair(&f.graphics, &[]);
    let quad = quad_buffer(&f.graphics);
    f.graphics.set_shaders(Some(&vs), Some(&fs)).unwrap();
    f.graphics.set_vertex_buffer(&quad).unwrap();

    f.graphics
        .set_shader_parameter("MatDiffColor", &[1.0f32, 0.0, 0.0, 1.0]);
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();

    let calls = f.log.calls();
    let upload = calls
        .iter()
        .position(|c| matches!(c, ContextCall::UpdateBuffer { .. }))
        .expect("parameter write must flush");
    let draw = calls
        .iter()
        .position(|c| matches!(c, ContextCall::Draw(_)))
        .unwrap();
    assert!(upload < draw);

    // No further writes: the next draw flushes nothing.
    f.log.clear();
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();
    assert!(!f
        .log
        .calls()
        .iter()
        .any(|c| matches!(c, ContextCall::UpdateBuffer { .. })));
}

#[test]
fn unknown_parameters_are_ignored() {
    let mut f = fixture();
    let (vs, fs) = shader_pair(&f.graphics, &[]);
    f.graphics.set_shaders(Some(&vs), Some(&fs)).unwrap();
    assert!(f.graphics.has_shader_parameter("MatDiffColor"));
    assert!(!f.graphics.has_shader_parameter("NoSuchParam"));
    f.graphics
        .set_shader_parameter("NoSuchParam", &[0.0f32; 4]);
    // Nothing became dirty, so a draw flushes nothing.
    let quad = quad_buffer(&f.graphics);
    f.graphics.set_vertex_buffer(&quad).unwrap();
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();
    assert!(!f
        .log
        .calls()
        .iter()
        .any(|c| matches!(c, ContextCall::UpdateBuffer { .. })));
}

#[test]
fn viewport_is_reissued_after_every_render_target_rebind() {
    let mut f = fixture();
    let (vs, fs) = shader_pair(&f.graphics, &[]);
    let quad = quad_buffer(&f.graphics);
    f.graphics.set_shaders(Some(&vs), Some(&fs)).unwrap();
    f.graphics.set_vertex_buffer(&quad).unwrap();
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();

    let target = render_target_texture(&f.graphics);
    f.log.clear();
    f.graphics
        .set_render_target_texture(0, Some(&target))
        .unwrap();
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();

    let calls = f.log.calls();
    let rebind = calls
        .iter()
        .position(|c| matches!(c, ContextCall::SetRenderTargets { .. }))
        .expect("rebind must reach the device");
    let viewport = calls
        .iter()
        .position(|c| matches!(c, ContextCall::SetViewports(_)))
        .expect("viewport must be reapplied");
    assert!(viewport > rebind);
}

#[test]
fn primitive_and_batch_counters_follow_topology() {
    let mut f = fixture();
    let (vs, fs) = shader_pair(&f.graphics, &[]);
    let quad = quad_buffer(&f.graphics);
    f.graphics.set_shaders(Some(&vs), Some(&fs)).unwrap();
    f.graphics.set_vertex_buffer(&quad).unwrap();

    f.graphics.draw(PrimitiveType::TriangleList, 0, 9).unwrap();
    assert_eq!(f.graphics.stats().primitives, 3);
    assert_eq!(f.graphics.stats().batches, 1);

    f.graphics
        .draw(PrimitiveType::TriangleStrip, 0, 5)
        .unwrap();
    assert_eq!(f.graphics.stats().primitives, 6);

    // Triangle fans are unsupported and contribute zero primitives.
    f.graphics.draw(PrimitiveType::TriangleFan, 0, 12).unwrap();
    assert_eq!(f.graphics.stats().primitives, 6);
    assert_eq!(f.graphics.stats().batches, 3);

    f.graphics.begin_frame().unwrap();
    assert_eq!(f.graphics.stats(), Default::default());
}

#[test]
fn full_viewport_clear_uses_the_device_fast_path() {
    let mut f = fixture();
    f.graphics
        .clear(ClearFlags::COLOR | ClearFlags::DEPTH, [0.0; 4], 1.0, 0)
        .unwrap();
    let calls = f.log.calls();
    assert!(calls
        .iter()
        .any(|c| matches!(c, ContextCall::ClearRenderTarget { .. })));
    assert!(calls
        .iter()
        .any(|c| matches!(c, ContextCall::ClearDepthStencil { .. })));

    // A sub-viewport clear is a renderer concern, not a device one.
    f.graphics.set_viewport(IntRect::new(0, 0, 64, 64));
    let err = f
        .graphics
        .clear(ClearFlags::COLOR, [0.0; 4], 1.0, 0)
        .unwrap_err();
    assert!(matches!(err, GraphicsError::PartialClear));
}

#[test]
fn too_many_vertex_buffers_leave_state_untouched() {
    let mut f = fixture();
    let buffers: Vec<_> = (0..5).map(|_| quad_buffer(&f.graphics)).collect();
    let err = f.graphics.set_vertex_buffers(&buffers, 0).unwrap_err();
    assert!(matches!(err, GraphicsError::TooManyVertexBuffers { .. }));

    let (vs, fs) = shader_pair(&f.graphics, &[]);
    f.graphics.set_shaders(Some(&vs), Some(&fs)).unwrap();
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();
    // No vertex buffer ever reached the device.
    assert!(!f
        .log
        .calls()
        .iter()
        .any(|c| matches!(c, ContextCall::SetVertexBuffers { .. })));
}

#[test]
fn parameter_sources_reset_when_group_buffers_change() {
    use glaze_graphics::ShaderParameterGroup;

    let mut f = fixture();
    let (vs, fs) = shader_pair(&f.graphics, &[]);
    f.graphics.set_shaders(Some(&vs), Some(&fs)).unwrap();
    assert!(f
        .graphics
        .needs_parameter_update(ShaderParameterGroup::Camera, 7));
    assert!(!f
        .graphics
        .needs_parameter_update(ShaderParameterGroup::Camera, 7));

    // A vertex shader with a differently sized camera buffer rebinds the
    // group to another physical buffer; the stale source must not stick.
    let vs_big = make_shader(
        &f.graphics,
        glaze_graphics::hal::ShaderStage::Vertex,
        "big.vs",
        vs_reflection_sized(128),
    );
    f.graphics.set_shaders(Some(&vs_big), Some(&fs)).unwrap();
    assert!(f
        .graphics
        .needs_parameter_update(ShaderParameterGroup::Camera, 7));
}

#[test]
fn point_fill_mode_coerces_topology_to_points() {
    let mut f = fixture();
    let (vs, fs) = shader_pair(&f.graphics, &[]);
    let quad = quad_buffer(&f.graphics);
    f.graphics.set_shaders(Some(&vs), Some(&fs)).unwrap();
    f.graphics.set_vertex_buffer(&quad).unwrap();
    f.graphics.set_fill_mode(glaze_graphics::FillMode::Point);

    f.graphics.draw(PrimitiveType::TriangleList, 0, 6).unwrap();
    // Point list: one primitive per vertex.
    assert_eq!(f.graphics.stats().primitives, 6);
}
