//! Backend-agnostic abstraction of an explicit graphics API.
//!
//! This crate defines the descriptor data model and object traits
//! ([`RenderDevice`], [`DeviceContext`], [`SwapChain`]) that the render-state
//! layer in `glaze-graphics` is written against, together with two backends:
//!
//! - [`backend::null`] creates placeholder objects and records every
//!   context call; the test suites drive this one.
//! - [`backend::wgpu_backend`] realizes the contract on `wgpu` with
//!   offscreen, texture-backed swap chains.
//!
//! The model is deliberately Direct3D-ish: immutable pipeline state objects,
//! explicit resource bindings with static (bind-once) and dynamic (per-draw)
//! shader variables, and a persistent device context that latches output and
//! input-assembler state between draws.

pub mod backend;
mod device;
mod types;

pub use device::*;
pub use types::*;
