//! Pipeline cache identity: equal observable state reuses the cached
//! pipeline, any contributing change builds exactly one new one.

mod common;

use common::*;
use glaze_graphics::{BlendMode, CompareMode, CullMode, PrimitiveType};
use pretty_assertions::assert_eq;

#[test]
fn equal_state_reuses_the_cached_pipeline() {
    let mut f = fixture();
    let (vs, fs) = shader_pair(&f.graphics, &["tAlbedoMap"]);
    let quad = quad_buffer(&f.graphics);
    f.graphics.set_shaders(Some(&vs), Some(&fs)).unwrap();
    f.graphics.set_vertex_buffer(&quad).unwrap();

    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();
    assert_eq!(f.device.pipelines_created(), 1);

    // Re-set every contributing field to its current value; nothing may be
    // marked dirty, and the next draw must not build or rebind differently.
    f.graphics.set_blend_mode(BlendMode::Replace, false);
    f.graphics.set_cull_mode(CullMode::Ccw);
    f.graphics.set_depth_test(CompareMode::LessEqual);
    f.graphics.set_depth_write(true);
    f.graphics.set_shaders(Some(&vs), Some(&fs)).unwrap();
    f.graphics.set_vertex_buffer(&quad).unwrap();
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();

    assert_eq!(f.device.pipelines_created(), 1);
    let binds = pipeline_binds(&f.log);
    assert_eq!(binds.len(), 2);
    assert_eq!(binds[0], binds[1]);
}

#[test]
fn each_contributing_field_changes_the_key_once() {
    let mut f = fixture();
    let (vs, fs) = shader_pair(&f.graphics, &[]);
    let quad = quad_buffer(&f.graphics);
    f.graphics.set_shaders(Some(&vs), Some(&fs)).unwrap();
    f.graphics.set_vertex_buffer(&quad).unwrap();
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();
    assert_eq!(f.device.pipelines_created(), 1);

    f.graphics.set_cull_mode(CullMode::Cw);
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();
    assert_eq!(f.device.pipelines_created(), 2);

    f.graphics.set_blend_mode(BlendMode::Alpha, false);
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();
    assert_eq!(f.device.pipelines_created(), 3);

    f.graphics.set_depth_test(CompareMode::Greater);
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();
    assert_eq!(f.device.pipelines_created(), 4);

    f.graphics
        .draw(PrimitiveType::TriangleStrip, 0, 4)
        .unwrap();
    assert_eq!(f.device.pipelines_created(), 5);

    // Returning to an already-seen combination allocates nothing new.
    f.graphics.set_cull_mode(CullMode::Ccw);
    f.graphics.set_blend_mode(BlendMode::Replace, false);
    f.graphics.set_depth_test(CompareMode::LessEqual);
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();
    assert_eq!(f.device.pipelines_created(), 5);
    let binds = pipeline_binds(&f.log);
    assert_eq!(binds.last(), binds.first());
}

#[test]
fn swapping_buffers_across_slots_is_a_different_declaration() {
    let mut f = fixture();
    let (vs, fs) = shader_pair(&f.graphics, &[]);
    f.graphics.set_shaders(Some(&vs), Some(&fs)).unwrap();

    let a = quad_buffer(&f.graphics);
    let b = glaze_graphics::VertexBuffer::new(
        f.graphics.device(),
        4,
        &[glaze_graphics::VertexElement::new(
            glaze_graphics::VertexElementType::Vector4,
            glaze_graphics::VertexElementSemantic::Color,
        )],
        false,
    )
    .unwrap();

    f.graphics
        .set_vertex_buffers(&[a.clone(), b.clone()], 0)
        .unwrap();
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();
    assert_eq!(f.device.pipelines_created(), 1);

    f.graphics.set_vertex_buffers(&[b, a], 0).unwrap();
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();
    assert_eq!(f.device.pipelines_created(), 2);
}

#[test]
fn stencil_ref_is_dynamic_and_never_rebuilds() {
    use glaze_graphics::hal::backend::null::ContextCall;
    use glaze_graphics::StencilOp;

    let mut f = fixture();
    let (vs, fs) = shader_pair(&f.graphics, &[]);
    let quad = quad_buffer(&f.graphics);
    f.graphics.set_shaders(Some(&vs), Some(&fs)).unwrap();
    f.graphics.set_vertex_buffer(&quad).unwrap();
    f.graphics.set_stencil_test(
        true,
        CompareMode::Always,
        StencilOp::Ref,
        StencilOp::Keep,
        StencilOp::Keep,
        1,
        u32::MAX,
        u32::MAX,
    );
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();
    assert_eq!(f.device.pipelines_created(), 1);

    f.log.clear();
    f.graphics.set_stencil_test(
        true,
        CompareMode::Always,
        StencilOp::Ref,
        StencilOp::Keep,
        StencilOp::Keep,
        42,
        u32::MAX,
        u32::MAX,
    );
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();

    assert_eq!(f.device.pipelines_created(), 1);
    assert!(f
        .log
        .calls()
        .contains(&ContextCall::SetStencilReference(42)));
}

#[test]
fn releasing_a_shader_evicts_only_its_pipelines() {
    let mut f = fixture();
    let (vs_a, fs) = shader_pair(&f.graphics, &[]);
    let vs_b = make_shader(
        &f.graphics,
        glaze_graphics::hal::ShaderStage::Vertex,
        "other.vs",
        vs_reflection(),
    );
    let quad = quad_buffer(&f.graphics);
    f.graphics.set_vertex_buffer(&quad).unwrap();

    f.graphics.set_shaders(Some(&vs_a), Some(&fs)).unwrap();
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();
    f.graphics.set_shaders(Some(&vs_b), Some(&fs)).unwrap();
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();
    assert_eq!(f.graphics.pipeline_count(), 2);

    f.graphics.release_shader(&vs_a);
    assert_eq!(f.graphics.pipeline_count(), 1);

    // The surviving shader pair still draws from cache.
    f.graphics.set_shaders(Some(&vs_b), Some(&fs)).unwrap();
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();
    assert_eq!(f.device.pipelines_created(), 2);
}

#[test]
fn draw_without_shaders_or_vertices_is_refused_quietly() {
    let mut f = fixture();
    let quad = quad_buffer(&f.graphics);
    f.graphics.set_vertex_buffer(&quad).unwrap();

    // No shader program bound.
    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();
    assert_eq!(draw_calls(&f.log), 0);

    let (vs, fs) = shader_pair(&f.graphics, &[]);
    f.graphics.set_shaders(Some(&vs), Some(&fs)).unwrap();
    f.graphics.draw(PrimitiveType::TriangleList, 0, 0).unwrap();
    assert_eq!(draw_calls(&f.log), 0);
    assert_eq!(f.device.pipelines_created(), 0);

    f.graphics.draw(PrimitiveType::TriangleList, 0, 3).unwrap();
    assert_eq!(draw_calls(&f.log), 1);
}
