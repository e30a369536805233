//! Tracked render state, dirty bookkeeping and the packed state hashes.
//!
//! Setters live on [`crate::Graphics`]; this module holds the data they
//! compare against plus the bit-packing that turns each fixed-function state
//! block into a small integer contributing to the pipeline cache key.

use crate::defs::*;

/// Contiguous dirty index range over a fixed-size slot array (textures,
/// vertex streams). Widens to cover every marked slot since the last commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DirtyRange(Option<(usize, usize)>);

impl DirtyRange {
    pub fn mark(&mut self, index: usize) {
        self.0 = Some(match self.0 {
            None => (index, index),
            Some((first, last)) => (first.min(index), last.max(index)),
        });
    }

    pub fn get(&self) -> Option<(usize, usize)> {
        self.0
    }

    pub fn take(&mut self) -> Option<(usize, usize)> {
        self.0.take()
    }

    pub fn is_marked(&self) -> bool {
        self.0.is_some()
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }
}

/// Fine-grained dirty bits, one per state block the device cares about.
#[derive(Debug, Default)]
pub(crate) struct DirtyFlags {
    pub render_targets: bool,
    pub textures: bool,
    pub vertex_declaration: bool,
    pub vertex_shader: bool,
    pub fragment_shader: bool,
    pub blend_state: bool,
    pub depth_state: bool,
    pub rasterizer_state: bool,
    pub scissor_rect: bool,
    pub stencil_ref: bool,
    pub primitive_type: bool,
    pub texture_range: DirtyRange,
    pub vertex_buffer_range: DirtyRange,
}

impl DirtyFlags {
    /// Everything dirty; used after reset so the first draw rebinds the
    /// whole state.
    pub fn all() -> Self {
        Self {
            render_targets: true,
            textures: true,
            vertex_declaration: true,
            vertex_shader: false,
            fragment_shader: false,
            blend_state: true,
            depth_state: true,
            rasterizer_state: true,
            scissor_rect: true,
            stencil_ref: true,
            primitive_type: false,
            texture_range: DirtyRange::default(),
            vertex_buffer_range: DirtyRange::default(),
        }
    }
}

/// The observable render state, exactly one current value per field.
#[derive(Debug)]
pub(crate) struct RenderState {
    pub blend_mode: BlendMode,
    pub alpha_to_coverage: bool,
    pub color_write: bool,
    pub cull_mode: CullMode,
    pub constant_depth_bias: f32,
    pub slope_scaled_depth_bias: f32,
    pub depth_test_mode: CompareMode,
    pub depth_write: bool,
    pub fill_mode: FillMode,
    pub line_anti_alias: bool,
    pub scissor_test: bool,
    pub scissor_rect: IntRect,
    pub stencil_test: bool,
    pub stencil_test_mode: CompareMode,
    pub stencil_pass: StencilOp,
    pub stencil_fail: StencilOp,
    pub stencil_z_fail: StencilOp,
    pub stencil_ref: u32,
    pub stencil_compare_mask: u32,
    pub stencil_write_mask: u32,
    pub viewport: IntRect,
    pub primitive_type: PrimitiveType,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            blend_mode: BlendMode::Replace,
            alpha_to_coverage: false,
            color_write: true,
            cull_mode: CullMode::Ccw,
            constant_depth_bias: 0.0,
            slope_scaled_depth_bias: 0.0,
            depth_test_mode: CompareMode::LessEqual,
            depth_write: true,
            fill_mode: FillMode::Solid,
            line_anti_alias: false,
            scissor_test: false,
            scissor_rect: IntRect::ZERO,
            stencil_test: false,
            stencil_test_mode: CompareMode::Always,
            stencil_pass: StencilOp::Keep,
            stencil_fail: StencilOp::Keep,
            stencil_z_fail: StencilOp::Keep,
            stencil_ref: 0,
            stencil_compare_mask: u32::MAX,
            stencil_write_mask: u32::MAX,
            viewport: IntRect::ZERO,
            primitive_type: PrimitiveType::TriangleList,
        }
    }
}

/// Packs color-write, alpha-to-coverage and the blend mode into disjoint bit
/// ranges.
pub(crate) fn blend_state_hash(state: &RenderState) -> u32 {
    (state.color_write as u32)
        | ((state.alpha_to_coverage as u32) << 1)
        | ((state.blend_mode as u32) << 2)
}

/// Packs depth-write, stencil-enable, compare mode, the stencil masks, the
/// stencil compare mode and the op triple. Ops occupy a base-5 digit each so
/// the triple fits seven bits.
pub(crate) fn depth_state_hash(state: &RenderState) -> u32 {
    (state.depth_write as u32)
        | ((state.stencil_test as u32) << 1)
        | ((state.depth_test_mode as u32) << 2)
        | ((state.stencil_compare_mask & 0xff) << 5)
        | ((state.stencil_write_mask & 0xff) << 13)
        | ((state.stencil_test_mode as u32) << 21)
        | ((state.stencil_fail as u32
            + state.stencil_z_fail as u32 * 5
            + state.stencil_pass as u32 * 25)
            << 24)
}

/// Constant depth bias quantized against the bound depth buffer's bit depth,
/// as the device consumes it.
pub(crate) fn scaled_depth_bias(state: &RenderState, depth_bits: u32) -> i32 {
    (state.constant_depth_bias * (1u32 << depth_bits) as f32) as i32
}

/// Packs scissor-enable, line antialias, fill and cull mode plus the
/// quantized depth biases.
pub(crate) fn rasterizer_state_hash(state: &RenderState, depth_bits: u32) -> u32 {
    (state.scissor_test as u32)
        | ((state.line_anti_alias as u32) << 1)
        | ((state.fill_mode as u32) << 2)
        | ((state.cull_mode as u32) << 4)
        | (((scaled_depth_bias(state, depth_bits) & 0x1fff) as u32) << 6)
        | ((((state.slope_scaled_depth_bias * 100.0) as i32 & 0x1fff) as u32) << 19)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_range_widens_to_cover_marks() {
        let mut range = DirtyRange::default();
        assert_eq!(range.get(), None);
        range.mark(5);
        range.mark(2);
        assert_eq!(range.get(), Some((2, 5)));
        range.mark(3);
        assert_eq!(range.get(), Some((2, 5)));
        assert_eq!(range.take(), Some((2, 5)));
        assert_eq!(range.get(), None);
    }

    #[test]
    fn blend_hash_separates_contributing_fields() {
        let mut state = RenderState::default();
        let base = blend_state_hash(&state);
        state.color_write = false;
        let no_write = blend_state_hash(&state);
        assert_ne!(base, no_write);
        state.color_write = true;
        state.blend_mode = BlendMode::Alpha;
        assert_ne!(base, blend_state_hash(&state));
        state.blend_mode = BlendMode::Replace;
        assert_eq!(base, blend_state_hash(&state));
    }

    #[test]
    fn depth_hash_packs_stencil_ops_disjointly() {
        let mut state = RenderState::default();
        state.stencil_test = true;
        let keep = depth_state_hash(&state);
        state.stencil_pass = StencilOp::Ref;
        let replace = depth_state_hash(&state);
        assert_ne!(keep, replace);
        state.stencil_pass = StencilOp::Keep;
        state.stencil_fail = StencilOp::Ref;
        assert_ne!(replace, depth_state_hash(&state));
    }

    #[test]
    fn stencil_ref_does_not_contribute_to_depth_hash() {
        let mut state = RenderState::default();
        let base = depth_state_hash(&state);
        state.stencil_ref = 0xab;
        assert_eq!(base, depth_state_hash(&state));
    }

    #[test]
    fn rasterizer_hash_quantizes_depth_bias() {
        let mut state = RenderState::default();
        let base = rasterizer_state_hash(&state, 24);
        state.constant_depth_bias = 0.00001;
        assert_ne!(base, rasterizer_state_hash(&state, 24));
        state.constant_depth_bias = 0.0;
        state.slope_scaled_depth_bias = 1.5;
        assert_ne!(base, rasterizer_state_hash(&state, 24));
    }
}
