//! A virtual globe: imagery layers streamed over HTTP, a scattering sky and a horizon depth plane,
//! rendered through the frame-paced context.
//!
//! Internal architecture overview:
//! - `globe`: the per-tick flow that ties uniforms, imagery and drawing together.
//! - `backend`: the imagery backend that fetches, decodes, uploads, reprojects and mipmaps tiles.
//! - `sky_atmosphere`/`depth_plane`: the two built-in primitives and their shaders.
//! - `config`/`logging`/`error`: the ambient surface of the `globe` binary.

mod backend;
mod config;
mod depth_plane;
mod error;
mod geometry;
mod globe;
mod logging;
mod sky_atmosphere;

pub use backend::{EncodedImageryWork, GpuImageryBackend, decode_rgba8};
pub use config::{
    CameraSettings, ConfigError, FetchSettings, GlobeConfig, LayerConfig, LogSettings,
    TilingSchemeKind,
};
pub use depth_plane::{DEPTH_PLANE_WGSL, DepthPlane, compute_depth_quad};
pub use error::GlobeError;
pub use geometry::{EllipsoidMesh, ellipsoid_mesh};
pub use globe::{FrameReport, Globe, ImageryProgress, TickOutcome, camera_from_settings};
pub use logging::{LogConfig, init_logging};
pub use sky_atmosphere::{AtmosphereRadii, SKY_ATMOSPHERE_WGSL, SkyAtmosphere};
