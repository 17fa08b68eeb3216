//! Uniform state for the globe renderer.
//!
//! `UniformState` caches every derived transform behind a dirty flag; `FrameState` is the per-frame
//! input it is synchronized from; `layout` holds the GPU-visible structs it flattens into.

mod dirty;
mod ephemeris;
mod frame_state;
mod layout;
mod uniform_state;

pub use dirty::{Derived, UniformInputs};
pub use ephemeris::{Ephemeris, LowPrecisionEphemeris, teme_to_pseudo_fixed};
pub use frame_state::{CameraAxes, CameraSnapshot, Fog, FrameState, Frustum, Pass, Passes, SceneMode};
pub use layout::{AutomaticUniforms, FrustumUniforms, mat3_to_padded, mat4_to_f32};
pub use uniform_state::{EncodedCartesian3, UniformState, Viewport, view_2d_to_3d};
