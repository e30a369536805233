//! The render-state facade: immediate-mode setters, draw submission and the
//! per-draw preparation sequence.
//!
//! Callers mutate state through the setters; every setter compares against
//! the recorded value and only marks the matching dirty bit on an actual
//! change. Draw calls run the fixed preparation order (render targets,
//! vertex declaration, state hashes, pipeline cache, texture commits,
//! resource commit, scissor, constant-buffer flush), then submit.

use std::rc::Rc;
use std::sync::Arc;

use glaze_hal::{
    self as hal, DeviceContext, PipelineState, RenderDevice, ShaderResourceBinding, SwapChain,
    TextureViewHandle, VertexStream,
};
use hashbrown::HashMap;
use tracing::{debug, error, warn};

use crate::buffer::{IndexBuffer, VertexBuffer};
use crate::constant_buffer::ConstantBuffer;
use crate::defs::*;
use crate::error::GraphicsError;
use crate::pipeline::{CachedPipeline, PipelineCache, PipelineKey, TargetFormats};
use crate::program::{ConstantBufferCache, ShaderProgram};
use crate::shader::ShaderVariation;
use crate::state::{
    blend_state_hash, depth_state_hash, rasterizer_state_hash, DirtyFlags, RenderState,
};
use crate::texture::{RenderSurface, Texture2D};

/// Per-frame submission counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub primitives: u64,
    pub batches: u64,
}

fn opt_rc_eq<T>(a: &Option<Rc<T>>, b: &Option<Rc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

pub struct Graphics {
    device: Arc<dyn RenderDevice>,
    context: Box<dyn DeviceContext>,
    swap_chain: Box<dyn SwapChain>,
    width: i32,
    height: i32,

    vertex_buffers: [Option<Rc<VertexBuffer>>; MAX_VERTEX_STREAMS],
    vertex_offsets: [u64; MAX_VERTEX_STREAMS],
    index_buffer: Option<Rc<IndexBuffer>>,
    textures: [Option<Rc<Texture2D>>; MAX_TEXTURE_UNITS],
    render_targets: [Option<Rc<RenderSurface>>; MAX_RENDER_TARGETS],
    depth_stencil: Option<Rc<RenderSurface>>,
    vertex_shader: Option<Rc<ShaderVariation>>,
    fragment_shader: Option<Rc<ShaderVariation>>,

    state: RenderState,
    dirty: DirtyFlags,

    programs: HashMap<(u64, u64), Rc<ShaderProgram>>,
    program: Option<Rc<ShaderProgram>>,
    constant_buffers: ConstantBufferCache,
    pipelines: PipelineCache,
    dirty_constant_buffers: Vec<Rc<ConstantBuffer>>,
    parameter_sources: [Option<usize>; MAX_SHADER_PARAMETER_GROUPS],
    bound_constant_buffers: [[Option<Rc<ConstantBuffer>>; MAX_SHADER_PARAMETER_GROUPS]; 2],

    render_target_views: [Option<TextureViewHandle>; MAX_RENDER_TARGETS],
    depth_stencil_view: Option<TextureViewHandle>,
    current: Option<CachedPipeline>,
    blend_hash: Option<u32>,
    depth_hash: Option<u32>,
    rasterizer_hash: Option<u32>,
    vertex_declaration_hash: u64,

    stats: FrameStats,
}

impl Graphics {
    pub fn new(
        device: Arc<dyn RenderDevice>,
        context: Box<dyn DeviceContext>,
        swap_chain: Box<dyn SwapChain>,
    ) -> Self {
        let desc = swap_chain.desc();
        let mut graphics = Self {
            constant_buffers: ConstantBufferCache::new(device.clone()),
            pipelines: PipelineCache::new(device.clone()),
            device,
            context,
            swap_chain,
            width: desc.width as i32,
            height: desc.height as i32,
            vertex_buffers: Default::default(),
            vertex_offsets: [0; MAX_VERTEX_STREAMS],
            index_buffer: None,
            textures: std::array::from_fn(|_| None),
            render_targets: Default::default(),
            depth_stencil: None,
            vertex_shader: None,
            fragment_shader: None,
            state: RenderState::default(),
            dirty: DirtyFlags::all(),
            programs: HashMap::new(),
            program: None,
            dirty_constant_buffers: Vec::new(),
            parameter_sources: [None; MAX_SHADER_PARAMETER_GROUPS],
            bound_constant_buffers: Default::default(),
            render_target_views: Default::default(),
            depth_stencil_view: None,
            current: None,
            blend_hash: None,
            depth_hash: None,
            rasterizer_hash: None,
            vertex_declaration_hash: 0,
            stats: FrameStats::default(),
        };
        graphics.state.viewport = IntRect::new(0, 0, graphics.width, graphics.height);
        graphics
    }

    /// Forget every bound object and mark all state dirty, as right after
    /// device creation. Cached pipelines and programs survive.
    pub fn reset_cached_state(&mut self) {
        self.vertex_buffers = Default::default();
        self.vertex_offsets = [0; MAX_VERTEX_STREAMS];
        self.index_buffer = None;
        self.textures = std::array::from_fn(|_| None);
        self.render_targets = Default::default();
        self.depth_stencil = None;
        self.render_target_views = Default::default();
        self.depth_stencil_view = None;
        self.state = RenderState::default();
        self.state.viewport = IntRect::new(0, 0, self.width, self.height);
        self.dirty = DirtyFlags::all();
        self.blend_hash = None;
        self.depth_hash = None;
        self.rasterizer_hash = None;
        self.vertex_declaration_hash = 0;
        self.current = None;
        self.program = None;
        self.parameter_sources = [None; MAX_SHADER_PARAMETER_GROUPS];
        self.bound_constant_buffers = Default::default();
        self.dirty_constant_buffers.clear();
    }

    pub fn device(&self) -> &Arc<dyn RenderDevice> {
        &self.device
    }

    pub fn context_mut(&mut self) -> &mut dyn DeviceContext {
        self.context.as_mut()
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn texture(&self, unit: usize) -> Option<&Rc<Texture2D>> {
        self.textures.get(unit).and_then(|t| t.as_ref())
    }

    pub fn render_target(&self, index: usize) -> Option<&Rc<RenderSurface>> {
        self.render_targets.get(index).and_then(|t| t.as_ref())
    }

    pub fn viewport(&self) -> IntRect {
        self.state.viewport
    }

    /// Size of the active render target, falling back to the depth-stencil
    /// for depth-only rendering and the backbuffer otherwise.
    pub fn render_target_dimensions(&self) -> (i32, i32) {
        if let Some(rt) = &self.render_targets[0] {
            (rt.width() as i32, rt.height() as i32)
        } else if let Some(ds) = &self.depth_stencil {
            (ds.width() as i32, ds.height() as i32)
        } else {
            (self.width, self.height)
        }
    }

    // --- frame control ---------------------------------------------------

    /// Rebind the default targets, drop last frame's texture bindings and
    /// zero the statistics.
    pub fn begin_frame(&mut self) -> Result<(), GraphicsError> {
        self.reset_render_targets();
        for unit in 0..MAX_TEXTURE_UNITS {
            self.set_texture(unit, None)?;
        }
        self.stats = FrameStats::default();
        Ok(())
    }

    /// Submit outstanding work and present.
    pub fn end_frame(&mut self, vsync: bool) {
        self.context.flush();
        self.swap_chain.present(vsync as u32);
    }

    pub fn reset_render_targets(&mut self) {
        for index in 0..MAX_RENDER_TARGETS {
            let _ = self.set_render_target(index, None);
        }
        self.set_depth_stencil(None);
        self.set_viewport(IntRect::new(0, 0, self.width, self.height));
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.context.set_render_targets(&[], None);
        self.render_target_views = Default::default();
        self.depth_stencil_view = None;
        self.dirty.render_targets = true;

        self.swap_chain.resize(width, height);
        let desc = self.swap_chain.desc();
        self.width = desc.width as i32;
        self.height = desc.height as i32;
        self.reset_render_targets();
        debug!(width = self.width, height = self.height, "resized backbuffer");
    }

    /// Clear the current targets. Only full-viewport clears hit the fast
    /// device path; partial clears are a renderer concern and are rejected.
    pub fn clear(
        &mut self,
        flags: ClearFlags,
        color: [f32; 4],
        depth: f32,
        stencil: u32,
    ) -> Result<(), GraphicsError> {
        let (rt_width, rt_height) = self.render_target_dimensions();
        let viewport = self.state.viewport;
        let full = viewport.left == 0
            && viewport.top == 0
            && viewport.right == rt_width
            && viewport.bottom == rt_height;
        if !full {
            return Err(GraphicsError::PartialClear);
        }

        // Clearing depth requires the writable depth view to be bound.
        let old_depth_write = self.state.depth_write;
        self.set_depth_write(true);
        self.prepare_draw()?;

        if flags.contains(ClearFlags::COLOR) {
            if let Some(view) = self.render_target_views[0].clone() {
                self.context.clear_render_target(&view, color);
            }
        }
        if flags.intersects(ClearFlags::DEPTH | ClearFlags::STENCIL) {
            if let Some(view) = self.depth_stencil_view.clone() {
                let mut clear_flags = hal::ClearDepthStencilFlags::empty();
                if flags.contains(ClearFlags::DEPTH) {
                    clear_flags |= hal::ClearDepthStencilFlags::DEPTH;
                }
                if flags.contains(ClearFlags::STENCIL) {
                    clear_flags |= hal::ClearDepthStencilFlags::STENCIL;
                }
                self.context
                    .clear_depth_stencil(&view, clear_flags, depth, stencil as u8);
            }
        }

        self.set_depth_write(old_depth_write);
        Ok(())
    }

    /// Resolve a multisampled auto-resolve texture into its resolve target.
    pub fn resolve_to_texture(&mut self, texture: &Rc<Texture2D>) -> Result<(), GraphicsError> {
        texture.set_resolve_dirty(false);
        if let Some(surface) = texture.render_surface() {
            surface.set_resolve_dirty(false);
        }
        let resolve = texture
            .resolve_target()
            .ok_or(GraphicsError::NoResolveTarget)?
            .clone();
        self.context.resolve_texture(texture.gpu(), &resolve)?;
        Ok(())
    }

    // --- state setters ---------------------------------------------------

    pub fn set_blend_mode(&mut self, mode: BlendMode, alpha_to_coverage: bool) {
        if mode != self.state.blend_mode || alpha_to_coverage != self.state.alpha_to_coverage {
            self.state.blend_mode = mode;
            self.state.alpha_to_coverage = alpha_to_coverage;
            self.dirty.blend_state = true;
        }
    }

    pub fn set_color_write(&mut self, enable: bool) {
        if enable != self.state.color_write {
            self.state.color_write = enable;
            self.dirty.blend_state = true;
        }
    }

    pub fn set_cull_mode(&mut self, mode: CullMode) {
        if mode != self.state.cull_mode {
            self.state.cull_mode = mode;
            self.dirty.rasterizer_state = true;
        }
    }

    pub fn set_depth_bias(&mut self, constant_bias: f32, slope_scaled_bias: f32) {
        if constant_bias != self.state.constant_depth_bias
            || slope_scaled_bias != self.state.slope_scaled_depth_bias
        {
            self.state.constant_depth_bias = constant_bias;
            self.state.slope_scaled_depth_bias = slope_scaled_bias;
            self.dirty.rasterizer_state = true;
        }
    }

    pub fn set_depth_test(&mut self, mode: CompareMode) {
        if mode != self.state.depth_test_mode {
            self.state.depth_test_mode = mode;
            self.dirty.depth_state = true;
        }
    }

    pub fn set_depth_write(&mut self, enable: bool) {
        if enable != self.state.depth_write {
            self.state.depth_write = enable;
            self.dirty.depth_state = true;
            // Also switches between the writable and read-only depth view.
            self.dirty.render_targets = true;
        }
    }

    pub fn set_fill_mode(&mut self, mode: FillMode) {
        if mode != self.state.fill_mode {
            self.state.fill_mode = mode;
            self.dirty.rasterizer_state = true;
        }
    }

    pub fn set_line_anti_alias(&mut self, enable: bool) {
        if enable != self.state.line_anti_alias {
            self.state.line_anti_alias = enable;
            self.dirty.rasterizer_state = true;
        }
    }

    /// Scissor test with a rectangle relative to the current viewport.
    pub fn set_scissor_test(&mut self, enable: bool, rect: IntRect) {
        let (rt_width, rt_height) = self.render_target_dimensions();
        let view_pos = (self.state.viewport.left, self.state.viewport.top);
        let mut enable = enable;

        if enable {
            let mut scissor = IntRect::new(
                (rect.left + view_pos.0).clamp(0, rt_width - 1),
                (rect.top + view_pos.1).clamp(0, rt_height - 1),
                (rect.right + view_pos.0).clamp(0, rt_width),
                (rect.bottom + view_pos.1).clamp(0, rt_height),
            );
            if scissor.right == scissor.left {
                scissor.right += 1;
            }
            if scissor.bottom == scissor.top {
                scissor.bottom += 1;
            }
            if scissor.right < scissor.left || scissor.bottom < scissor.top {
                enable = false;
            }
            if enable && scissor != self.state.scissor_rect {
                self.state.scissor_rect = scissor;
                self.dirty.scissor_rect = true;
            }
        }

        if enable != self.state.scissor_test {
            self.state.scissor_test = enable;
            self.dirty.rasterizer_state = true;
        }
    }

    /// Scissor test with a normalized [-1, 1] rectangle in viewport space.
    /// A rect covering the whole range disables the test instead; some
    /// render loops toggle a full rect on and off every light.
    pub fn set_scissor_test_normalized(
        &mut self,
        enable: bool,
        rect: NormalizedRect,
        border_inclusive: bool,
    ) {
        let mut enable = enable;
        if rect.min_x <= -1.0 && rect.min_y <= -1.0 && rect.max_x >= 1.0 && rect.max_y >= 1.0 {
            enable = false;
        }

        if enable {
            let (rt_width, rt_height) = self.render_target_dimensions();
            let view_size = (
                self.state.viewport.width() as f32,
                self.state.viewport.height() as f32,
            );
            let view_pos = (self.state.viewport.left, self.state.viewport.top);
            let expand = if border_inclusive { 1 } else { 0 };

            let mut scissor = IntRect::new(
                (((rect.min_x + 1.0) * 0.5 * view_size.0) as i32 + view_pos.0)
                    .clamp(0, rt_width - 1),
                (((-rect.max_y + 1.0) * 0.5 * view_size.1) as i32 + view_pos.1)
                    .clamp(0, rt_height - 1),
                (((rect.max_x + 1.0) * 0.5 * view_size.0) as i32 + view_pos.0 + expand)
                    .clamp(0, rt_width),
                (((-rect.min_y + 1.0) * 0.5 * view_size.1) as i32 + view_pos.1 + expand)
                    .clamp(0, rt_height),
            );
            if scissor.right == scissor.left {
                scissor.right += 1;
            }
            if scissor.bottom == scissor.top {
                scissor.bottom += 1;
            }
            if scissor.right < scissor.left || scissor.bottom < scissor.top {
                enable = false;
            }
            if enable && scissor != self.state.scissor_rect {
                self.state.scissor_rect = scissor;
                self.dirty.scissor_rect = true;
            }
        }

        if enable != self.state.scissor_test {
            self.state.scissor_test = enable;
            self.dirty.rasterizer_state = true;
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_stencil_test(
        &mut self,
        enable: bool,
        mode: CompareMode,
        pass: StencilOp,
        fail: StencilOp,
        z_fail: StencilOp,
        stencil_ref: u32,
        compare_mask: u32,
        write_mask: u32,
    ) {
        if enable != self.state.stencil_test {
            self.state.stencil_test = enable;
            self.dirty.depth_state = true;
        }

        if enable {
            if mode != self.state.stencil_test_mode {
                self.state.stencil_test_mode = mode;
                self.dirty.depth_state = true;
            }
            if pass != self.state.stencil_pass {
                self.state.stencil_pass = pass;
                self.dirty.depth_state = true;
            }
            if fail != self.state.stencil_fail {
                self.state.stencil_fail = fail;
                self.dirty.depth_state = true;
            }
            if z_fail != self.state.stencil_z_fail {
                self.state.stencil_z_fail = z_fail;
                self.dirty.depth_state = true;
            }
            if compare_mask != self.state.stencil_compare_mask {
                self.state.stencil_compare_mask = compare_mask;
                self.dirty.depth_state = true;
            }
            if write_mask != self.state.stencil_write_mask {
                self.state.stencil_write_mask = write_mask;
                self.dirty.depth_state = true;
            }
            // The reference value is dynamic state: it is reissued before
            // the next draw without invalidating any pipeline.
            if stencil_ref != self.state.stencil_ref {
                self.state.stencil_ref = stencil_ref;
                self.dirty.stencil_ref = true;
            }
        }
    }

    /// Set the viewport, clamped to the render-target size. Also disables
    /// the scissor test; callers re-enable it relative to the new viewport.
    pub fn set_viewport(&mut self, rect: IntRect) {
        let (rt_width, rt_height) = self.render_target_dimensions();
        let mut rect = rect;
        if rect.right <= rect.left {
            rect.right = rect.left + 1;
        }
        if rect.bottom <= rect.top {
            rect.bottom = rect.top + 1;
        }
        rect.left = rect.left.clamp(0, rt_width);
        rect.top = rect.top.clamp(0, rt_height);
        rect.right = rect.right.clamp(0, rt_width);
        rect.bottom = rect.bottom.clamp(0, rt_height);

        self.context.set_viewports(&[hal::Viewport {
            x: rect.left as f32,
            y: rect.top as f32,
            width: rect.width() as f32,
            height: rect.height() as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }]);
        self.state.viewport = rect;

        if self.state.scissor_test {
            self.state.scissor_test = false;
            self.dirty.rasterizer_state = true;
        }
    }

    /// Bind a texture. Binding the texture of the active render target
    /// redirects to its backup texture (or nothing) so a draw can never
    /// sample its own output; multisampled auto-resolve textures resolve
    /// lazily here, and dirty mip chains are regenerated.
    pub fn set_texture(
        &mut self,
        unit: usize,
        texture: Option<&Rc<Texture2D>>,
    ) -> Result<(), GraphicsError> {
        if unit >= MAX_TEXTURE_UNITS {
            return Ok(());
        }

        let mut texture = texture.cloned();
        if let Some(tex) = texture.clone() {
            let bound_as_target = self.render_targets[0]
                .as_ref()
                .and_then(|surface| surface.parent_texture())
                .is_some_and(|parent| Rc::ptr_eq(&parent, &tex));
            if bound_as_target {
                texture = tex.backup_texture();
            } else if tex.sample_count() > 1 && tex.auto_resolve() && tex.is_resolve_dirty() {
                self.resolve_to_texture(&tex)?;
            }
        }
        if let Some(tex) = &texture {
            if tex.levels_dirty() && tex.mip_levels() > 1 {
                tex.regenerate_levels(self.context.as_mut())?;
            }
        }

        if !opt_rc_eq(&texture, &self.textures[unit]) {
            self.dirty.texture_range.mark(unit);
            self.textures[unit] = texture;
            self.dirty.textures = true;
        }
        Ok(())
    }

    pub fn set_vertex_buffer(&mut self, buffer: &Rc<VertexBuffer>) -> Result<(), GraphicsError> {
        self.set_vertex_buffers(std::slice::from_ref(buffer), 0)
    }

    /// Bind vertex buffers to stream slots in order. Fails without touching
    /// any state when more buffers than stream slots are passed.
    pub fn set_vertex_buffers(
        &mut self,
        buffers: &[Rc<VertexBuffer>],
        instance_offset: u32,
    ) -> Result<(), GraphicsError> {
        if buffers.len() > MAX_VERTEX_STREAMS {
            error!("too many vertex buffers");
            return Err(GraphicsError::TooManyVertexBuffers {
                requested: buffers.len(),
                limit: MAX_VERTEX_STREAMS,
            });
        }

        for slot in 0..MAX_VERTEX_STREAMS {
            let buffer = buffers.get(slot);
            let mut changed = false;
            if let Some(buffer) = buffer {
                let offset = if buffer.has_instance_data() {
                    instance_offset as u64 * buffer.vertex_size() as u64
                } else {
                    0
                };
                let same = self.vertex_buffers[slot]
                    .as_ref()
                    .is_some_and(|bound| Rc::ptr_eq(bound, buffer));
                if !same || offset != self.vertex_offsets[slot] {
                    self.vertex_buffers[slot] = Some(buffer.clone());
                    self.vertex_offsets[slot] = offset;
                    changed = true;
                }
            } else if self.vertex_buffers[slot].is_some() {
                self.vertex_buffers[slot] = None;
                self.vertex_offsets[slot] = 0;
                changed = true;
            }

            if changed {
                self.dirty.vertex_declaration = true;
                self.dirty.vertex_buffer_range.mark(slot);
            }
        }
        Ok(())
    }

    pub fn set_index_buffer(&mut self, buffer: Option<&Rc<IndexBuffer>>) {
        if !opt_rc_eq(&buffer.cloned(), &self.index_buffer) {
            self.context
                .set_index_buffer(buffer.map(|b| b.gpu()), 0);
            self.index_buffer = buffer.cloned();
        }
    }

    /// Bind a color render target. Any texture unit sampling the target's
    /// texture is redirected to the backup texture, and multisampled or
    /// mip-mapped targets are marked for resolve / regeneration on next
    /// read.
    pub fn set_render_target(
        &mut self,
        index: usize,
        surface: Option<&Rc<RenderSurface>>,
    ) -> Result<(), GraphicsError> {
        if index >= MAX_RENDER_TARGETS {
            return Ok(());
        }
        if opt_rc_eq(&surface.cloned(), &self.render_targets[index]) {
            return Ok(());
        }

        self.render_targets[index] = surface.cloned();
        self.dirty.render_targets = true;

        if let Some(surface) = surface {
            if let Some(parent) = surface.parent_texture() {
                for unit in 0..MAX_TEXTURE_UNITS {
                    let samples_parent = self.textures[unit]
                        .as_ref()
                        .is_some_and(|bound| Rc::ptr_eq(bound, &parent));
                    if samples_parent {
                        let backup = parent.backup_texture();
                        self.set_texture(unit, backup.as_ref())?;
                    }
                }

                if parent.sample_count() > 1 && parent.auto_resolve() {
                    parent.set_resolve_dirty(true);
                    surface.set_resolve_dirty(true);
                }
                if parent.mip_levels() > 1 {
                    parent.set_levels_dirty();
                }
            }
        }
        Ok(())
    }

    pub fn set_render_target_texture(
        &mut self,
        index: usize,
        texture: Option<&Rc<Texture2D>>,
    ) -> Result<(), GraphicsError> {
        let surface = texture.and_then(|t| t.render_surface().cloned());
        self.set_render_target(index, surface.as_ref())
    }

    pub fn set_depth_stencil(&mut self, surface: Option<&Rc<RenderSurface>>) {
        if !opt_rc_eq(&surface.cloned(), &self.depth_stencil) {
            self.depth_stencil = surface.cloned();
            self.dirty.render_targets = true;
            // Constant depth bias scaling depends on the depth bit depth.
            self.dirty.rasterizer_state = true;
        }
    }

    pub fn set_depth_stencil_texture(&mut self, texture: Option<&Rc<Texture2D>>) {
        let surface = texture.and_then(|t| t.render_surface().cloned());
        self.set_depth_stencil(surface.as_ref());
    }

    /// Bind a shader pair. The linked program is created (or fetched) and
    /// parameter sources are invalidated for any group whose backing buffer
    /// changed.
    pub fn set_shaders(
        &mut self,
        vs: Option<&Rc<ShaderVariation>>,
        fs: Option<&Rc<ShaderVariation>>,
    ) -> Result<(), GraphicsError> {
        if !opt_rc_eq(&vs.cloned(), &self.vertex_shader) {
            self.vertex_shader = vs.cloned();
            self.dirty.vertex_shader = true;
            self.dirty.vertex_declaration = true;
        }
        if !opt_rc_eq(&fs.cloned(), &self.fragment_shader) {
            self.fragment_shader = fs.cloned();
            self.dirty.fragment_shader = true;
        }

        if let (Some(vs), Some(fs)) = (self.vertex_shader.clone(), self.fragment_shader.clone()) {
            let key = (vs.id(), fs.id());
            let program = match self.programs.get(&key) {
                Some(program) => program.clone(),
                None => {
                    let program = ShaderProgram::new(&vs, &fs, &mut self.constant_buffers)?;
                    self.programs.insert(key, program.clone());
                    program
                }
            };

            for group in 0..MAX_SHADER_PARAMETER_GROUPS {
                for (slot, stage) in [hal::ShaderStage::Vertex, hal::ShaderStage::Fragment]
                    .into_iter()
                    .enumerate()
                {
                    let new = program.constant_buffer(stage, group).cloned();
                    if !opt_rc_eq(&new, &self.bound_constant_buffers[slot][group]) {
                        self.parameter_sources[group] = None;
                        self.bound_constant_buffers[slot][group] = new;
                    }
                }
            }
            self.program = Some(program);
        } else {
            self.program = None;
        }
        Ok(())
    }

    pub fn shader_program(&self) -> Option<&Rc<ShaderProgram>> {
        self.program.as_ref()
    }

    // --- shader parameters ----------------------------------------------

    /// Write one named uniform. Unknown names are ignored so materials can
    /// set parameters that only some shader variations declare.
    pub fn set_shader_parameter<T: bytemuck::NoUninit>(&mut self, name: &str, value: &T) {
        self.set_shader_parameter_bytes(name, bytemuck::bytes_of(value));
    }

    pub fn set_shader_parameter_slice(&mut self, name: &str, values: &[f32]) {
        self.set_shader_parameter_bytes(name, bytemuck::cast_slice(values));
    }

    /// 3x3 matrices occupy three 16-byte rows in constant-buffer layout.
    pub fn set_shader_parameter_matrix3(&mut self, name: &str, rows: &[[f32; 3]; 3]) {
        let Some(entry) = self
            .program
            .as_ref()
            .and_then(|program| program.parameter(name).cloned())
        else {
            return;
        };
        if !entry.buffer.is_dirty() {
            self.dirty_constant_buffers.push(entry.buffer.clone());
        }
        entry
            .buffer
            .set_vector3_array_parameter(entry.parameter.offset, rows);
    }

    fn set_shader_parameter_bytes(&mut self, name: &str, data: &[u8]) {
        let Some(entry) = self
            .program
            .as_ref()
            .and_then(|program| program.parameter(name).cloned())
        else {
            return;
        };
        if !entry.buffer.is_dirty() {
            self.dirty_constant_buffers.push(entry.buffer.clone());
        }
        entry.buffer.set_parameter(entry.parameter.offset, data);
    }

    pub fn has_shader_parameter(&self, name: &str) -> bool {
        self.program
            .as_ref()
            .is_some_and(|program| program.has_parameter(name))
    }

    /// Whether a parameter group needs re-uploading for `source`. Sources
    /// are opaque caller cookies (typically object addresses); a bound
    /// buffer change forces the next check to report true.
    pub fn needs_parameter_update(&mut self, group: ShaderParameterGroup, source: usize) -> bool {
        if self.parameter_sources[group.index()] != Some(source) {
            self.parameter_sources[group.index()] = Some(source);
            true
        } else {
            false
        }
    }

    pub fn clear_parameter_source(&mut self, group: ShaderParameterGroup) {
        self.parameter_sources[group.index()] = None;
    }

    pub fn clear_parameter_sources(&mut self) {
        self.parameter_sources = [None; MAX_SHADER_PARAMETER_GROUPS];
    }

    pub fn clear_transform_sources(&mut self) {
        self.parameter_sources[ShaderParameterGroup::Camera.index()] = None;
        self.parameter_sources[ShaderParameterGroup::Object.index()] = None;
    }

    // --- shader lifetime -------------------------------------------------

    /// Release a shader variation: drops every linked program and cached
    /// pipeline that references it and unbinds it if bound.
    pub fn release_shader(&mut self, shader: &Rc<ShaderVariation>) {
        let id = shader.id();
        self.programs
            .retain(|(vs, fs), _| *vs != id && *fs != id);
        self.pipelines.remove_shader(id);

        let mut unbound = false;
        if self
            .vertex_shader
            .as_ref()
            .is_some_and(|bound| bound.id() == id)
        {
            self.vertex_shader = None;
            self.dirty.vertex_shader = true;
            self.dirty.vertex_declaration = true;
            unbound = true;
        }
        if self
            .fragment_shader
            .as_ref()
            .is_some_and(|bound| bound.id() == id)
        {
            self.fragment_shader = None;
            self.dirty.fragment_shader = true;
            unbound = true;
        }
        if unbound {
            self.program = None;
            self.current = None;
        }
    }

    // --- draw submission -------------------------------------------------

    fn set_primitive_type(&mut self, primitive_type: PrimitiveType) {
        if primitive_type != self.state.primitive_type {
            self.state.primitive_type = primitive_type;
            self.dirty.primitive_type = true;
        }
    }

    pub fn draw(
        &mut self,
        primitive_type: PrimitiveType,
        vertex_start: u32,
        vertex_count: u32,
    ) -> Result<(), GraphicsError> {
        if vertex_count == 0 || self.program.is_none() {
            return Ok(());
        }
        let primitive_type = if self.state.fill_mode == FillMode::Point {
            PrimitiveType::PointList
        } else {
            primitive_type
        };
        self.set_primitive_type(primitive_type);
        self.prepare_draw()?;

        self.context.draw(&hal::DrawAttribs {
            vertex_count,
            start_vertex: vertex_start,
            instance_count: 1,
        });
        self.stats.primitives += primitive_count(vertex_count, primitive_type) as u64;
        self.stats.batches += 1;
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        primitive_type: PrimitiveType,
        index_start: u32,
        index_count: u32,
        vertex_count: u32,
    ) -> Result<(), GraphicsError> {
        self.draw_indexed_base(primitive_type, index_start, index_count, 0, vertex_count)
    }

    pub fn draw_indexed_base(
        &mut self,
        primitive_type: PrimitiveType,
        index_start: u32,
        index_count: u32,
        base_vertex: i32,
        vertex_count: u32,
    ) -> Result<(), GraphicsError> {
        if vertex_count == 0 || self.program.is_none() {
            return Ok(());
        }
        let index_type = self
            .index_buffer
            .as_ref()
            .ok_or(GraphicsError::NoIndexBuffer)?
            .index_type();
        let primitive_type = if self.state.fill_mode == FillMode::Point {
            PrimitiveType::PointList
        } else {
            primitive_type
        };
        self.set_primitive_type(primitive_type);
        self.prepare_draw()?;

        self.context.draw_indexed(&hal::DrawIndexedAttribs {
            index_count,
            first_index: index_start,
            base_vertex,
            instance_count: 1,
            index_type,
        });
        self.stats.primitives += primitive_count(index_count, primitive_type) as u64;
        self.stats.batches += 1;
        Ok(())
    }

    pub fn draw_instanced(
        &mut self,
        primitive_type: PrimitiveType,
        index_start: u32,
        index_count: u32,
        instance_count: u32,
    ) -> Result<(), GraphicsError> {
        if index_count == 0 || instance_count == 0 || self.program.is_none() {
            return Ok(());
        }
        let index_type = self
            .index_buffer
            .as_ref()
            .ok_or(GraphicsError::NoIndexBuffer)?
            .index_type();
        let primitive_type = if self.state.fill_mode == FillMode::Point {
            PrimitiveType::PointList
        } else {
            primitive_type
        };
        self.set_primitive_type(primitive_type);
        self.prepare_draw()?;

        self.context.draw_indexed(&hal::DrawIndexedAttribs {
            index_count,
            first_index: index_start,
            base_vertex: 0,
            instance_count,
            index_type,
        });
        self.stats.primitives +=
            instance_count as u64 * primitive_count(index_count, primitive_type) as u64;
        self.stats.batches += 1;
        Ok(())
    }

    // --- the per-draw state machine --------------------------------------

    fn depth_bits(&self) -> u32 {
        let format = self
            .depth_stencil
            .as_ref()
            .and_then(|surface| surface.parent_texture())
            .map(|texture| texture.format())
            .unwrap_or(self.swap_chain.desc().depth_format);
        match format.depth_bits() {
            0 => 24,
            bits => bits,
        }
    }

    /// Resolve all dirty state against the device, in the fixed order:
    /// render targets, vertex declaration, state hashes, pipeline cache
    /// lookup, texture commits, resource commit, dynamic stencil ref,
    /// scissor, constant-buffer flushes.
    fn prepare_draw(&mut self) -> Result<(), GraphicsError> {
        let mut pipeline_changed = false;

        if self.dirty.render_targets {
            let mut depth_view = self
                .depth_stencil
                .as_ref()
                .filter(|surface| surface.is_depth_stencil())
                .and_then(|surface| surface.dsv(false));
            // Prefer a read-only depth view when not writing so shaders may
            // sample the depth buffer at the same time.
            if !self.state.depth_write {
                if let Some(read_only) = self
                    .depth_stencil
                    .as_ref()
                    .and_then(|surface| surface.dsv(true))
                {
                    depth_view = Some(read_only);
                }
            }
            let depth_view = depth_view.unwrap_or_else(|| self.swap_chain.depth_stencil_dsv());

            let mut colors: [Option<TextureViewHandle>; MAX_RENDER_TARGETS] = Default::default();
            for (index, target) in self.render_targets.iter().enumerate() {
                colors[index] = target
                    .as_ref()
                    .filter(|surface| surface.is_color())
                    .and_then(|surface| surface.rtv());
            }
            // Render to the backbuffer when no target is bound at slot 0,
            // unless a smaller depth-stencil implies depth-only rendering.
            let backbuffer = self.render_targets[0].is_none()
                && self.depth_stencil.as_ref().is_none_or(|surface| {
                    surface.width() as i32 == self.width && surface.height() as i32 == self.height
                });
            if backbuffer {
                colors[0] = Some(self.swap_chain.current_backbuffer_rtv());
            }

            self.context
                .set_render_targets(&colors, Some(depth_view.clone()));
            self.render_target_views = colors;
            self.depth_stencil_view = Some(depth_view);

            // The viewport does not survive a render-target rebind on every
            // backend, so always reissue it.
            self.set_viewport(self.state.viewport);
            self.dirty.render_targets = false;
        }

        let (Some(vs), Some(fs)) = (self.vertex_shader.clone(), self.fragment_shader.clone())
        else {
            return Ok(());
        };

        if self.dirty.vertex_shader
            || self.dirty.fragment_shader
            || self.dirty.blend_state
            || self.dirty.depth_state
            || self.dirty.rasterizer_state
            || self.dirty.primitive_type
            || self.dirty.vertex_declaration
        {
            let mut pipeline_dirty = self.dirty.vertex_shader || self.dirty.fragment_shader;

            if self.dirty.vertex_declaration {
                if let Some((first, last)) = self.dirty.vertex_buffer_range.take() {
                    let streams: Vec<Option<VertexStream>> = (first..=last)
                        .map(|slot| {
                            self.vertex_buffers[slot].as_ref().map(|buffer| VertexStream {
                                buffer: buffer.gpu().clone(),
                                offset: self.vertex_offsets[slot],
                            })
                        })
                        .collect();
                    self.context.set_vertex_buffers(first as u32, &streams);
                }

                let mut declaration_hash = 0u64;
                for (slot, buffer) in self.vertex_buffers.iter().enumerate() {
                    if let Some(buffer) = buffer {
                        declaration_hash |= buffer.buffer_hash(slot);
                    }
                }
                // Zero means no vertex buffers are bound; that alone never
                // forces a rebuild.
                if declaration_hash != 0 && declaration_hash != self.vertex_declaration_hash {
                    pipeline_dirty = true;
                    self.vertex_declaration_hash = declaration_hash;
                }
                self.dirty.vertex_declaration = false;
            }

            if self.dirty.primitive_type {
                pipeline_dirty = true;
                self.dirty.primitive_type = false;
            }

            if self.dirty.blend_state {
                let hash = blend_state_hash(&self.state);
                if Some(hash) != self.blend_hash {
                    pipeline_dirty = true;
                    self.blend_hash = Some(hash);
                }
                self.dirty.blend_state = false;
            }

            if self.dirty.depth_state {
                let hash = depth_state_hash(&self.state);
                if Some(hash) != self.depth_hash {
                    pipeline_dirty = true;
                    self.depth_hash = Some(hash);
                }
                self.dirty.depth_state = false;
            }

            let depth_bits = self.depth_bits();
            if self.dirty.rasterizer_state {
                let hash = rasterizer_state_hash(&self.state, depth_bits);
                if Some(hash) != self.rasterizer_hash {
                    pipeline_dirty = true;
                    self.rasterizer_hash = Some(hash);
                }
                self.dirty.rasterizer_state = false;
            }

            self.dirty.vertex_shader = false;
            self.dirty.fragment_shader = false;

            if pipeline_dirty {
                let Some(program) = self.program.clone() else {
                    return Ok(());
                };
                let key = PipelineKey {
                    vertex_shader: vs.id(),
                    fragment_shader: fs.id(),
                    blend_hash: self.blend_hash.unwrap_or_default(),
                    depth_hash: self.depth_hash.unwrap_or_default(),
                    rasterizer_hash: self.rasterizer_hash.unwrap_or_default(),
                    vertex_declaration_hash: self.vertex_declaration_hash,
                    primitive_type: self.state.primitive_type,
                };
                let swap_desc = self.swap_chain.desc();
                let formats = TargetFormats {
                    color: swap_desc.color_format,
                    depth: swap_desc.depth_format,
                    sample_count: swap_desc.sample_count,
                    depth_bits,
                };
                let cached = self.pipelines.get_or_create(
                    key,
                    &vs,
                    &fs,
                    &program,
                    &self.vertex_buffers,
                    &self.state,
                    &formats,
                )?;

                let changed = self
                    .current
                    .as_ref()
                    .is_none_or(|current| current.pipeline.id() != cached.pipeline.id());
                if changed {
                    pipeline_changed = true;
                    self.current = Some(cached);
                }
            }
        }

        let Some(current) = self.current.clone() else {
            warn!("draw prepared without a resolved pipeline");
            return Ok(());
        };
        self.context.set_pipeline_state(&current.pipeline);

        if pipeline_changed || (self.dirty.textures && self.dirty.texture_range.is_marked()) {
            let range = self.dirty.texture_range.get();
            for entry in current.texture_map.iter() {
                let in_range =
                    range.is_some_and(|(first, last)| entry.unit >= first && entry.unit <= last);
                if !(pipeline_changed || in_range) {
                    continue;
                }
                if let Some(texture) = &self.textures[entry.unit] {
                    if let Some(srv) = texture.srv() {
                        current.binding.set_texture(
                            entry.stage,
                            &entry.variable,
                            &srv,
                            texture.sampler(),
                        )?;
                    }
                }
            }
            self.dirty.texture_range.clear();
            self.dirty.textures = false;
        }

        self.context.commit_shader_resources(&current.binding);

        if self.dirty.stencil_ref {
            self.context.set_stencil_reference(self.state.stencil_ref);
            self.dirty.stencil_ref = false;
        }

        if self.dirty.scissor_rect {
            let rect = self.state.scissor_rect;
            self.context.set_scissor_rects(&[hal::ScissorRect {
                left: rect.left,
                top: rect.top,
                right: rect.right,
                bottom: rect.bottom,
            }]);
            self.dirty.scissor_rect = false;
        }

        for buffer in std::mem::take(&mut self.dirty_constant_buffers) {
            buffer.apply(self.context.as_mut())?;
        }

        Ok(())
    }
}
