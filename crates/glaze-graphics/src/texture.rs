//! Two-dimensional textures and their render surfaces.
//!
//! A texture created with render-target or depth-stencil usage owns a
//! [`RenderSurface`] that can be bound as an output. Multisampled textures
//! with auto-resolve carry a single-sampled resolve texture; sampling goes
//! through the resolve texture and a resolve is triggered lazily when the
//! texture is next bound for reading while marked resolve-dirty.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use glaze_hal::{
    DeviceContext, GpuTexture, RenderDevice, SamplerDesc, SamplerHandle, TextureDesc,
    TextureFormat, TextureHandle, TextureRegion, TextureUsage, TextureViewHandle,
};
use tracing::error;

use crate::error::GraphicsError;

/// How a texture is used, which decides the views it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureUsageKind {
    #[default]
    Static,
    Dynamic,
    RenderTarget,
    DepthStencil,
}

#[derive(Debug, Clone)]
pub struct Texture2DDesc {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Zero requests a full mip chain.
    pub mip_levels: u32,
    pub sample_count: u32,
    pub auto_resolve: bool,
    pub usage: TextureUsageKind,
    pub sampler: SamplerDesc,
}

impl Default for Texture2DDesc {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            mip_levels: 1,
            sample_count: 1,
            auto_resolve: false,
            usage: TextureUsageKind::Static,
            sampler: SamplerDesc::default(),
        }
    }
}

fn full_mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

#[derive(Debug)]
pub struct Texture2D {
    gpu: TextureHandle,
    desc: Texture2DDesc,
    mip_levels: u32,
    sampler: SamplerHandle,
    resolve_texture: Option<TextureHandle>,
    render_surface: Option<Rc<RenderSurface>>,
    backup: RefCell<Option<Rc<Texture2D>>>,
    resolve_dirty: Cell<bool>,
    levels_dirty: Cell<bool>,
}

impl Texture2D {
    pub fn new(
        device: &Arc<dyn RenderDevice>,
        desc: Texture2DDesc,
    ) -> Result<Rc<Self>, GraphicsError> {
        let mip_levels = if desc.mip_levels == 0 {
            full_mip_count(desc.width, desc.height)
        } else {
            desc.mip_levels
        };
        let multisampled = desc.sample_count > 1;

        let usage = match desc.usage {
            TextureUsageKind::Static | TextureUsageKind::Dynamic => TextureUsage::SHADER_RESOURCE,
            TextureUsageKind::RenderTarget => {
                if multisampled && desc.auto_resolve {
                    // Sampling goes through the resolve texture.
                    TextureUsage::RENDER_TARGET
                } else {
                    TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE
                }
            }
            TextureUsageKind::DepthStencil => TextureUsage::DEPTH_STENCIL,
        };

        let gpu = device.create_texture(
            &TextureDesc {
                label: desc.label.clone(),
                width: desc.width,
                height: desc.height,
                mip_levels,
                sample_count: desc.sample_count,
                format: desc.format,
                usage,
            },
            None,
        )?;

        let resolve_texture = if multisampled
            && desc.auto_resolve
            && desc.usage == TextureUsageKind::RenderTarget
        {
            Some(device.create_texture(
                &TextureDesc {
                    label: desc.label.clone(),
                    width: desc.width,
                    height: desc.height,
                    mip_levels,
                    sample_count: 1,
                    format: desc.format,
                    usage: TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
                },
                None,
            )?)
        } else {
            None
        };

        let sampler = device.create_sampler(&desc.sampler)?;
        let has_surface = matches!(
            desc.usage,
            TextureUsageKind::RenderTarget | TextureUsageKind::DepthStencil
        );

        Ok(Rc::new_cyclic(|weak: &Weak<Texture2D>| Self {
            render_surface: has_surface.then(|| {
                Rc::new(RenderSurface {
                    parent: weak.clone(),
                    resolve_dirty: Cell::new(false),
                })
            }),
            gpu,
            desc,
            mip_levels,
            sampler,
            resolve_texture,
            backup: RefCell::new(None),
            resolve_dirty: Cell::new(false),
            levels_dirty: Cell::new(false),
        }))
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn format(&self) -> TextureFormat {
        self.desc.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn sample_count(&self) -> u32 {
        self.desc.sample_count
    }

    pub fn auto_resolve(&self) -> bool {
        self.desc.auto_resolve
    }

    pub fn usage(&self) -> TextureUsageKind {
        self.desc.usage
    }

    pub fn render_surface(&self) -> Option<&Rc<RenderSurface>> {
        self.render_surface.as_ref()
    }

    /// The view sampled by shaders: the resolve texture's for auto-resolving
    /// multisampled targets, the texture's own otherwise.
    pub fn srv(&self) -> Option<TextureViewHandle> {
        match &self.resolve_texture {
            Some(resolve) => resolve.srv(),
            None => self.gpu.srv(),
        }
    }

    pub fn sampler(&self) -> &SamplerHandle {
        &self.sampler
    }

    pub(crate) fn gpu(&self) -> &TextureHandle {
        &self.gpu
    }

    pub(crate) fn resolve_target(&self) -> Option<&TextureHandle> {
        self.resolve_texture.as_ref()
    }

    pub fn backup_texture(&self) -> Option<Rc<Texture2D>> {
        self.backup.borrow().clone()
    }

    pub fn set_backup_texture(&self, backup: Option<Rc<Texture2D>>) {
        *self.backup.borrow_mut() = backup;
    }

    pub fn is_resolve_dirty(&self) -> bool {
        self.resolve_dirty.get()
    }

    pub(crate) fn set_resolve_dirty(&self, dirty: bool) {
        self.resolve_dirty.set(dirty);
    }

    pub fn levels_dirty(&self) -> bool {
        self.levels_dirty.get()
    }

    pub(crate) fn set_levels_dirty(&self) {
        self.levels_dirty.set(true);
    }

    /// Regenerate the mip chain from level zero.
    pub(crate) fn regenerate_levels(
        &self,
        context: &mut dyn DeviceContext,
    ) -> Result<(), GraphicsError> {
        if self.mip_levels > 1 {
            context.generate_mips(&self.gpu)?;
        }
        self.levels_dirty.set(false);
        Ok(())
    }

    /// Upload pixel data to one mip level. The region must lie within the
    /// level and the data length must match exactly.
    pub fn set_data(
        &self,
        context: &mut dyn DeviceContext,
        mip_level: u32,
        region: TextureRegion,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        if mip_level >= self.mip_levels {
            error!(mip_level, levels = self.mip_levels, "mip level out of range");
            return Err(GraphicsError::RangeOutOfBounds {
                start: mip_level,
                count: 1,
                capacity: self.mip_levels,
            });
        }
        let level_width = (self.desc.width >> mip_level).max(1);
        let level_height = (self.desc.height >> mip_level).max(1);
        if region.x + region.width > level_width || region.y + region.height > level_height {
            error!("texture update region out of range");
            return Err(GraphicsError::RangeOutOfBounds {
                start: region.x,
                count: region.width,
                capacity: level_width,
            });
        }
        context.update_texture(&self.gpu, mip_level, &region, data)?;
        Ok(())
    }
}

/// A bindable color or depth output of a texture.
#[derive(Debug)]
pub struct RenderSurface {
    parent: Weak<Texture2D>,
    resolve_dirty: Cell<bool>,
}

impl RenderSurface {
    pub fn parent_texture(&self) -> Option<Rc<Texture2D>> {
        self.parent.upgrade()
    }

    pub fn width(&self) -> u32 {
        self.parent_texture().map_or(0, |t| t.width())
    }

    pub fn height(&self) -> u32 {
        self.parent_texture().map_or(0, |t| t.height())
    }

    pub fn is_color(&self) -> bool {
        self.parent_texture()
            .is_some_and(|t| t.usage() == TextureUsageKind::RenderTarget)
    }

    pub fn is_depth_stencil(&self) -> bool {
        self.parent_texture()
            .is_some_and(|t| t.usage() == TextureUsageKind::DepthStencil)
    }

    pub fn is_resolve_dirty(&self) -> bool {
        self.resolve_dirty.get()
    }

    pub(crate) fn set_resolve_dirty(&self, dirty: bool) {
        self.resolve_dirty.set(dirty);
    }

    pub(crate) fn rtv(&self) -> Option<TextureViewHandle> {
        self.parent_texture().and_then(|t| t.gpu.rtv(0))
    }

    pub(crate) fn dsv(&self, read_only: bool) -> Option<TextureViewHandle> {
        self.parent_texture().and_then(|t| t.gpu.dsv(read_only))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glaze_hal::backend::null::NullDevice;
    use glaze_hal::TextureView;

    fn device() -> Arc<dyn RenderDevice> {
        Arc::new(NullDevice::new())
    }

    #[test]
    fn full_mip_chain_is_computed_from_the_larger_extent() {
        assert_eq!(full_mip_count(256, 16), 9);
        assert_eq!(full_mip_count(1, 1), 1);
        let texture = Texture2D::new(
            &device(),
            Texture2DDesc {
                width: 64,
                height: 32,
                mip_levels: 0,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(texture.mip_levels(), 7);
    }

    #[test]
    fn render_target_textures_own_a_surface() {
        let texture = Texture2D::new(
            &device(),
            Texture2DDesc {
                width: 16,
                height: 16,
                usage: TextureUsageKind::RenderTarget,
                ..Default::default()
            },
        )
        .unwrap();
        let surface = texture.render_surface().unwrap();
        assert!(surface.is_color());
        assert!(Rc::ptr_eq(&surface.parent_texture().unwrap(), &texture));

        let plain = Texture2D::new(&device(), Texture2DDesc::default()).unwrap();
        assert!(plain.render_surface().is_none());
    }

    #[test]
    fn auto_resolve_msaa_texture_samples_through_resolve_target() {
        let texture = Texture2D::new(
            &device(),
            Texture2DDesc {
                width: 16,
                height: 16,
                sample_count: 4,
                auto_resolve: true,
                usage: TextureUsageKind::RenderTarget,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(texture.resolve_target().is_some());
        let resolve_srv = texture.srv().unwrap();
        assert_eq!(
            resolve_srv.id(),
            texture.resolve_target().unwrap().srv().unwrap().id()
        );
    }

    #[test]
    fn update_region_is_validated_per_level() {
        let null = Arc::new(NullDevice::new());
        let mut context = null.create_context();
        let device: Arc<dyn RenderDevice> = null.clone();
        let texture = Texture2D::new(
            &device,
            Texture2DDesc {
                width: 8,
                height: 8,
                mip_levels: 2,
                ..Default::default()
            },
        )
        .unwrap();
        // Level 1 is 4x4; an 8-wide write must fail without a device call.
        null.log().clear();
        let err = texture.set_data(
            &mut context,
            1,
            TextureRegion {
                x: 0,
                y: 0,
                width: 8,
                height: 8,
            },
            &[0u8; 8 * 8 * 4],
        );
        assert!(err.is_err());
        assert!(null.log().calls().is_empty());
    }
}
