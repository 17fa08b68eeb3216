//! The per-tick flow: synchronize uniforms, advance imagery, then record and submit one frame.

use std::sync::Arc;

use fetch::{FetchQueue, HttpTransport, Transport};
use geodesy::{Cartographic, Ellipsoid, JulianDate};
use glam::DVec3;
use imagery::{ImageryId, ImageryLayer, ImageryState, LayerCollection, LayerId, TileKey};
use renderer::{ClearCommand, DrawOutcome, FrameContext};
use uniforms::{CameraSnapshot, FrameState, Frustum, LowPrecisionEphemeris, SceneMode};

use crate::backend::{EncodedImageryWork, GpuImageryBackend};
use crate::config::{CameraSettings, GlobeConfig};
use crate::{DepthPlane, GlobeError, SkyAtmosphere};

const CAMERA_NEAR: f64 = 1.0;

/// What one rendered tick recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_number: u64,
    pub slot: usize,
    pub draws: usize,
    pub skipped_draws: usize,
    pub imagery: EncodedImageryWork,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Rendered(FrameReport),
    /// No drawable this tick; pending reprojections were cancelled.
    Skipped,
}

/// Load progress of the tiles the globe holds references on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageryProgress {
    pub ready: usize,
    pub failed: usize,
    pub loading: usize,
}

impl ImageryProgress {
    pub fn total(&self) -> usize {
        self.ready + self.failed + self.loading
    }

    pub fn is_settled(&self) -> bool {
        self.loading == 0
    }
}

pub struct Globe {
    context: FrameContext,
    layers: LayerCollection<GpuImageryBackend>,
    backend: GpuImageryBackend,
    sky_atmosphere: SkyAtmosphere,
    depth_plane: DepthPlane,
    show_depth_plane: bool,
    ellipsoid: Ellipsoid,
    camera_settings: CameraSettings,
    camera: CameraSnapshot,
    mode: SceneMode,
    time: JulianDate,
    ephemeris: LowPrecisionEphemeris,
    clear_color: wgpu::Color,
    frame_number: u64,
    held_imagery: Vec<(LayerId, ImageryId)>,
}

impl Globe {
    /// Fetches imagery over HTTP.
    pub fn new(context: FrameContext, config: &GlobeConfig) -> Result<Self, GlobeError> {
        let transport = HttpTransport::new(&config.fetch.transport_config())?;
        Self::with_transport(context, config, Arc::new(transport))
    }

    pub fn with_transport(
        context: FrameContext,
        config: &GlobeConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, GlobeError> {
        config.validate()?;
        let ellipsoid = Ellipsoid::wgs84();
        let fetch_queue = FetchQueue::new(config.fetch.queue_config(), transport)?;
        let mut layers: LayerCollection<GpuImageryBackend> = LayerCollection::new();
        let backend = GpuImageryBackend::new(
            context.device().clone(),
            context.queue().clone(),
            fetch_queue,
            config.decode_workers,
            layers.completion_sink(),
        )?;
        for layer in &config.layers {
            let layer_id = layers.add(
                ImageryLayer::new(layer.build_provider(ellipsoid)).with_show(layer.show),
                None,
            )?;
            tracing::info!(layer = ?layer_id, template = %layer.url_template, "imagery layer configured");
        }

        let mut sky_atmosphere = SkyAtmosphere::new(ellipsoid);
        sky_atmosphere.show = config.sky_atmosphere;
        let camera = camera_from_settings(&ellipsoid, &config.camera, aspect_ratio(&context));
        let mut globe = Self {
            context,
            layers,
            backend,
            sky_atmosphere,
            depth_plane: DepthPlane::new(ellipsoid),
            show_depth_plane: config.depth_plane,
            ellipsoid,
            camera_settings: config.camera,
            camera,
            mode: SceneMode::Scene3D,
            time: JulianDate::now(),
            ephemeris: LowPrecisionEphemeris,
            clear_color: config.clear_color(),
            frame_number: 0,
            held_imagery: Vec::new(),
        };
        globe.request_level(config.base_level);
        Ok(globe)
    }

    pub fn context(&self) -> &FrameContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut FrameContext {
        &mut self.context
    }

    pub fn layers(&self) -> &LayerCollection<GpuImageryBackend> {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut LayerCollection<GpuImageryBackend> {
        &mut self.layers
    }

    pub fn backend(&self) -> &GpuImageryBackend {
        &self.backend
    }

    pub fn sky_atmosphere_mut(&mut self) -> &mut SkyAtmosphere {
        &mut self.sky_atmosphere
    }

    pub fn set_show_depth_plane(&mut self, show: bool) {
        self.show_depth_plane = show;
    }

    pub fn ellipsoid(&self) -> &Ellipsoid {
        &self.ellipsoid
    }

    pub fn camera(&self) -> &CameraSnapshot {
        &self.camera
    }

    pub fn set_camera(&mut self, camera: CameraSnapshot) {
        self.camera = camera;
    }

    pub fn set_mode(&mut self, mode: SceneMode) {
        self.mode = mode;
    }

    pub fn set_time(&mut self, time: JulianDate) {
        self.time = time;
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Resizes the target and refits the camera's aspect ratio. Empty sizes are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.context.resize(width, height);
        self.camera = camera_from_settings(
            &self.ellipsoid,
            &self.camera_settings,
            aspect_ratio(&self.context),
        );
    }

    /// Takes a reference on every tile of `level` in each layer, so the tiles load and stay cached.
    /// Levels outside a layer's range are skipped for that layer.
    pub fn request_level(&mut self, level: u32) {
        for index in 0..self.layers.len() {
            let Some(layer) = self.layers.get_mut(index) else {
                continue;
            };
            let provider = layer.provider();
            if level < provider.minimum_level() || level > provider.maximum_level() {
                tracing::debug!(layer = ?layer.id(), level, "level outside the layer's range");
                continue;
            }
            let scheme = provider.tiling_scheme();
            let columns = scheme.number_of_x_tiles_at_level(level);
            let rows = scheme.number_of_y_tiles_at_level(level);
            let layer_id = layer.id();
            for y in 0..rows {
                for x in 0..columns {
                    let id = layer.get_imagery_from_cache(TileKey::new(level, x, y));
                    self.held_imagery.push((layer_id, id));
                }
            }
            tracing::debug!(layer = ?layer_id, level, tiles = columns * rows, "imagery level requested");
        }
    }

    /// Releases every reference taken by [`request_level`](Self::request_level).
    pub fn release_requested(&mut self) {
        for (layer_id, id) in self.held_imagery.drain(..) {
            if let Some(layer) = self.layers.layer_mut(layer_id) {
                layer.release_reference(id);
            }
        }
    }

    pub fn imagery_progress(&self) -> ImageryProgress {
        let mut progress = ImageryProgress::default();
        for &(layer_id, id) in &self.held_imagery {
            let Some(imagery) = self
                .layers
                .layer(layer_id)
                .and_then(|layer| layer.imagery(id))
            else {
                continue;
            };
            match imagery.state() {
                ImageryState::Ready => progress.ready += 1,
                ImageryState::Failed => progress.failed += 1,
                _ => progress.loading += 1,
            }
        }
        progress
    }

    /// Runs one tick. A tick without a drawable still advances imagery and returns `Skipped`.
    pub fn tick(&mut self) -> Result<TickOutcome, GlobeError> {
        if self.context.is_device_lost() {
            return Err(GlobeError::DeviceLost);
        }
        self.frame_number += 1;
        let mut frame_state = FrameState::new(self.camera, self.time);
        frame_state.mode = self.mode;
        frame_state.frame_number = self.frame_number;
        self.context
            .uniform_state_mut()
            .update(&frame_state, &self.ephemeris);

        self.layers.update();
        self.layers.update_imagery(&mut self.backend);

        let sync_state = match self.context.begin_frame() {
            Ok(sync_state) => sync_state,
            Err(error) => {
                self.layers.cancel_reprojections();
                tracing::debug!(frame = self.frame_number, %error, "tick skipped");
                self.log_collection_events();
                return Ok(TickOutcome::Skipped);
            }
        };

        let mut reprojections = Vec::new();
        self.layers.queue_reprojection_commands(&mut reprojections);
        let imagery = self
            .backend
            .encode(self.context.command_encoder(), reprojections);

        self.context
            .clear(&ClearCommand::all(self.clear_color), None);

        let mut commands = Vec::with_capacity(2);
        if let Some(command) = self.sky_atmosphere.update(&mut self.context, &frame_state) {
            commands.push(command);
        }
        if self.show_depth_plane {
            self.depth_plane.update(&mut self.context, &frame_state);
            if let Some(command) = self.depth_plane.command() {
                commands.push(command.clone());
            }
        }

        let mut pass = self.context.create_render_pass(None);
        let mut report = FrameReport {
            frame_number: self.frame_number,
            slot: sync_state.index(),
            draws: 0,
            skipped_draws: 0,
            imagery,
        };
        for command in &commands {
            match self.context.draw(command, &mut pass, None) {
                DrawOutcome::Drawn => report.draws += 1,
                DrawOutcome::SkippedTextureNotResident => report.skipped_draws += 1,
            }
        }
        self.context.complete_render_pass(pass);
        self.context.end_frame();
        self.log_collection_events();
        tracing::trace!(?report, "frame rendered");
        Ok(TickOutcome::Rendered(report))
    }

    fn log_collection_events(&mut self) {
        for event in self.layers.drain_events() {
            tracing::debug!(?event, "layer collection changed");
        }
    }
}

impl Drop for Globe {
    fn drop(&mut self) {
        self.release_requested();
    }
}

fn aspect_ratio(context: &FrameContext) -> f64 {
    let (width, height) = context.size();
    f64::from(width) / f64::from(height)
}

/// A camera above the configured position, looking at the ellipsoid center, with the far plane
/// past the back of the atmosphere.
pub fn camera_from_settings(
    ellipsoid: &Ellipsoid,
    settings: &CameraSettings,
    aspect_ratio: f64,
) -> CameraSnapshot {
    let position = ellipsoid.cartographic_to_cartesian(Cartographic::from_degrees(
        settings.longitude_degrees,
        settings.latitude_degrees,
        settings.height,
    ));
    let up = if settings.latitude_degrees.abs() > 89.0 {
        DVec3::X
    } else {
        DVec3::Z
    };
    let far = position.length() + 2.0 * ellipsoid.maximum_radius();
    let frustum = Frustum::perspective(
        settings.fov_y_degrees.to_radians(),
        aspect_ratio,
        CAMERA_NEAR,
        far,
    );
    CameraSnapshot::look_at(position, DVec3::ZERO, up, frustum)
}
