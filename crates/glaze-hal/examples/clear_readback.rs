//! Headless smoke test: clear an offscreen swap chain and read it back.
//!
//! Run with `cargo run -p glaze-hal --example clear_readback`.

use glaze_hal::backend::wgpu_backend::{WgpuDevice, WgpuDeviceConfig};
use glaze_hal::{DeviceContext, SwapChain, SwapChainDesc};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let device = pollster::block_on(WgpuDevice::new_headless(WgpuDeviceConfig::default()))?;
    let mut context = device.create_context();
    let swap_chain = device.create_swap_chain(SwapChainDesc {
        width: 64,
        height: 64,
        ..Default::default()
    })?;

    context.clear_render_target(&swap_chain.current_backbuffer_rtv(), [0.2, 0.4, 0.6, 1.0]);
    context.flush();

    let pixels = swap_chain.read_back_rgba8()?;
    println!(
        "{}x{} backbuffer, top-left pixel {:?}",
        swap_chain.desc().width,
        swap_chain.desc().height,
        &pixels[..4]
    );
    Ok(())
}
