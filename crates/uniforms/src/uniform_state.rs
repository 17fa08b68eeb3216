use std::f64::consts::{FRAC_PI_2, PI};

use geodesy::{MapProjection, Projection, east_north_up_to_fixed_frame};
use glam::{DMat3, DMat4, DVec2, DVec3, DVec4, Vec3};

use crate::dirty::{DERIVED_COUNT, Derived, UniformInputs};
use crate::ephemeris::{Ephemeris, teme_to_pseudo_fixed};
use crate::frame_state::{CameraAxes, CameraSnapshot, FrameState, Frustum, Pass, SceneMode};
use crate::layout::{AutomaticUniforms, FrustumUniforms, mat3_to_padded, mat4_to_f32};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
        }
    }
}

/// A double split into two floats so shaders can subtract large positions without losing precision.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EncodedCartesian3 {
    pub high: Vec3,
    pub low: Vec3,
}

impl EncodedCartesian3 {
    pub fn from_cartesian(value: DVec3) -> Self {
        let (hx, lx) = encode_component(value.x);
        let (hy, ly) = encode_component(value.y);
        let (hz, lz) = encode_component(value.z);
        Self {
            high: Vec3::new(hx, hy, hz),
            low: Vec3::new(lx, ly, lz),
        }
    }
}

fn encode_component(value: f64) -> (f32, f32) {
    const SPLIT: f64 = 65_536.0;
    if value >= 0.0 {
        let high = (value / SPLIT).floor() * SPLIT;
        (high as f32, (value - high) as f32)
    } else {
        let high = (-value / SPLIT).floor() * SPLIT;
        (-high as f32, (value + high) as f32)
    }
}

/// Lazily derived transforms for one render context.
///
/// Assigning an input marks every value derived from it dirty; each getter recomputes on first read
/// after that and caches until the next assignment. Getters therefore take `&mut self`.
#[derive(Debug, Clone)]
pub struct UniformState {
    dirty: Derived,
    recompute_counts: [u32; DERIVED_COUNT],

    model: DMat4,
    view: DMat4,
    inverse_view: DMat4,
    view_rotation: DMat3,
    inverse_view_rotation: DMat3,
    projection: DMat4,
    infinite_projection: DMat4,
    viewport: Viewport,

    camera: CameraAxes,
    mode: SceneMode,
    map_projection: Projection,
    frustum_2d_width: f64,
    eye_height_2d: DVec2,

    current_frustum: DVec2,
    frustum_planes: DVec4,
    entire_frustum: DVec2,
    fog_density: f32,
    pass: Pass,
    frame_number: u64,
    morph_time: f64,

    sun_position_wc: DVec3,
    sun_direction_wc: DVec3,
    sun_direction_ec: DVec3,
    moon_direction_ec: DVec3,
    teme_to_pseudo_fixed: DMat3,

    view_3d: DMat4,
    view_rotation_3d: DMat3,
    inverse_view_3d: DMat4,
    inverse_view_rotation_3d: DMat3,
    inverse_model: DMat4,
    inverse_transpose_model: DMat3,
    inverse_projection: DMat4,
    model_view: DMat4,
    model_view_3d: DMat4,
    model_view_relative_to_eye: DMat4,
    inverse_model_view: DMat4,
    inverse_model_view_3d: DMat4,
    view_projection: DMat4,
    inverse_view_projection: DMat4,
    model_view_projection: DMat4,
    inverse_model_view_projection: DMat4,
    model_view_projection_relative_to_eye: DMat4,
    model_view_infinite_projection: DMat4,
    normal: DMat3,
    normal_3d: DMat3,
    inverse_normal: DMat3,
    inverse_normal_3d: DMat3,
    encoded_camera_position_mc: EncodedCartesian3,
    viewport_orthographic: DMat4,
    viewport_transformation: DMat4,
}

impl Default for UniformState {
    fn default() -> Self {
        Self::new()
    }
}

impl UniformState {
    pub fn new() -> Self {
        Self {
            dirty: Derived::all(),
            recompute_counts: [0; DERIVED_COUNT],
            model: DMat4::IDENTITY,
            view: DMat4::IDENTITY,
            inverse_view: DMat4::IDENTITY,
            view_rotation: DMat3::IDENTITY,
            inverse_view_rotation: DMat3::IDENTITY,
            projection: DMat4::IDENTITY,
            infinite_projection: DMat4::IDENTITY,
            viewport: Viewport::new(1.0, 1.0),
            camera: CameraAxes {
                position: DVec3::ZERO,
                direction: DVec3::NEG_Z,
                right: DVec3::X,
                up: DVec3::Y,
            },
            mode: SceneMode::Scene3D,
            map_projection: Projection::default(),
            frustum_2d_width: 0.0,
            eye_height_2d: DVec2::ZERO,
            current_frustum: DVec2::ONE,
            frustum_planes: DVec4::ZERO,
            entire_frustum: DVec2::ONE,
            fog_density: 0.0,
            pass: Pass::Opaque,
            frame_number: 0,
            morph_time: 1.0,
            sun_position_wc: DVec3::ZERO,
            sun_direction_wc: DVec3::ZERO,
            sun_direction_ec: DVec3::ZERO,
            moon_direction_ec: DVec3::ZERO,
            teme_to_pseudo_fixed: DMat3::IDENTITY,
            view_3d: DMat4::IDENTITY,
            view_rotation_3d: DMat3::IDENTITY,
            inverse_view_3d: DMat4::IDENTITY,
            inverse_view_rotation_3d: DMat3::IDENTITY,
            inverse_model: DMat4::IDENTITY,
            inverse_transpose_model: DMat3::IDENTITY,
            inverse_projection: DMat4::IDENTITY,
            model_view: DMat4::IDENTITY,
            model_view_3d: DMat4::IDENTITY,
            model_view_relative_to_eye: DMat4::IDENTITY,
            inverse_model_view: DMat4::IDENTITY,
            inverse_model_view_3d: DMat4::IDENTITY,
            view_projection: DMat4::IDENTITY,
            inverse_view_projection: DMat4::IDENTITY,
            model_view_projection: DMat4::IDENTITY,
            inverse_model_view_projection: DMat4::IDENTITY,
            model_view_projection_relative_to_eye: DMat4::IDENTITY,
            model_view_infinite_projection: DMat4::IDENTITY,
            normal: DMat3::IDENTITY,
            normal_3d: DMat3::IDENTITY,
            inverse_normal: DMat3::IDENTITY,
            inverse_normal_3d: DMat3::IDENTITY,
            encoded_camera_position_mc: EncodedCartesian3::default(),
            viewport_orthographic: DMat4::IDENTITY,
            viewport_transformation: DMat4::IDENTITY,
        }
    }

    fn invalidate(&mut self, inputs: UniformInputs) {
        self.dirty |= Derived::invalidated_by(inputs);
    }

    /// Clears the flag and counts a recompute when `value` was dirty.
    fn take_dirty(&mut self, value: Derived) -> bool {
        if !self.dirty.contains(value) {
            return false;
        }
        self.dirty.remove(value);
        self.recompute_counts[value.slot()] += 1;
        true
    }

    pub fn is_dirty(&self, value: Derived) -> bool {
        self.dirty.contains(value)
    }

    pub fn recompute_count(&self, value: Derived) -> u32 {
        self.recompute_counts[value.slot()]
    }

    // Inputs

    pub fn model(&self) -> DMat4 {
        self.model
    }

    pub fn set_model(&mut self, model: DMat4) {
        if self.model == model {
            return;
        }
        self.model = model;
        self.invalidate(UniformInputs::MODEL);
    }

    pub fn view(&self) -> DMat4 {
        self.view
    }

    pub fn view_rotation(&self) -> DMat3 {
        self.view_rotation
    }

    pub fn set_view(&mut self, view: DMat4) {
        self.view = view;
        self.view_rotation = DMat3::from_mat4(view);
        self.invalidate(UniformInputs::VIEW);
    }

    pub fn inverse_view(&self) -> DMat4 {
        self.inverse_view
    }

    pub fn inverse_view_rotation(&self) -> DMat3 {
        self.inverse_view_rotation
    }

    pub fn set_inverse_view(&mut self, inverse_view: DMat4) {
        self.inverse_view = inverse_view;
        self.inverse_view_rotation = DMat3::from_mat4(inverse_view);
    }

    pub fn projection(&self) -> DMat4 {
        self.projection
    }

    pub fn set_projection(&mut self, projection: DMat4) {
        self.projection = projection;
        self.invalidate(UniformInputs::PROJECTION);
    }

    pub fn infinite_projection(&self) -> DMat4 {
        self.infinite_projection
    }

    pub fn set_infinite_projection(&mut self, infinite_projection: DMat4) {
        self.infinite_projection = infinite_projection;
        self.invalidate(UniformInputs::INFINITE_PROJECTION);
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        if self.viewport == viewport {
            return;
        }
        self.viewport = viewport;
        self.invalidate(UniformInputs::VIEWPORT);
    }

    pub fn set_camera(&mut self, camera: &CameraSnapshot) {
        self.camera = camera.axes;
        self.invalidate(UniformInputs::CAMERA);
    }

    pub fn camera_position(&self) -> DVec3 {
        self.camera.position
    }

    pub fn mode(&self) -> SceneMode {
        self.mode
    }

    pub fn map_projection(&self) -> &Projection {
        &self.map_projection
    }

    pub fn frustum_2d_width(&self) -> f64 {
        self.frustum_2d_width
    }

    pub fn eye_height_2d(&self) -> DVec2 {
        self.eye_height_2d
    }

    pub fn current_frustum(&self) -> DVec2 {
        self.current_frustum
    }

    pub fn frustum_planes(&self) -> DVec4 {
        self.frustum_planes
    }

    pub fn entire_frustum(&self) -> DVec2 {
        self.entire_frustum
    }

    pub fn fog_density(&self) -> f32 {
        self.fog_density
    }

    pub fn pass(&self) -> Pass {
        self.pass
    }

    pub fn update_pass(&mut self, pass: Pass) {
        self.pass = pass;
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn sun_position_wc(&self) -> DVec3 {
        self.sun_position_wc
    }

    pub fn sun_direction_wc(&self) -> DVec3 {
        self.sun_direction_wc
    }

    pub fn sun_direction_ec(&self) -> DVec3 {
        self.sun_direction_ec
    }

    pub fn moon_direction_ec(&self) -> DVec3 {
        self.moon_direction_ec
    }

    pub fn teme_to_pseudo_fixed(&self) -> DMat3 {
        self.teme_to_pseudo_fixed
    }

    /// Copies projection and clip planes from `frustum`.
    pub fn update_frustum(&mut self, frustum: &Frustum) {
        self.set_projection(frustum.projection);
        if let Some(infinite_projection) = frustum.infinite_projection {
            self.set_infinite_projection(infinite_projection);
        }
        self.current_frustum = DVec2::new(frustum.near, frustum.far);
        self.frustum_planes = DVec4::new(frustum.top, frustum.bottom, frustum.left, frustum.right);
    }

    /// Synchronizes with the frame: camera, mode, celestial directions, frustum and fog.
    pub fn update(&mut self, frame_state: &FrameState, ephemeris: &dyn Ephemeris) {
        if self.mode != frame_state.mode || self.map_projection != frame_state.map_projection {
            self.mode = frame_state.mode;
            self.map_projection = frame_state.map_projection;
            self.invalidate(UniformInputs::CAMERA);
        }

        let camera = &frame_state.camera;
        self.set_view(camera.view_matrix);
        self.set_inverse_view(camera.inverse_view_matrix);
        self.set_camera(camera);

        if frame_state.mode == SceneMode::Scene2D {
            self.frustum_2d_width = camera.frustum.width();
            let eye_height = self.frustum_2d_width * 0.5;
            self.eye_height_2d = DVec2::new(eye_height, eye_height * eye_height);
        } else {
            self.frustum_2d_width = 0.0;
            self.eye_height_2d = DVec2::ZERO;
        }

        self.teme_to_pseudo_fixed = teme_to_pseudo_fixed(frame_state.time);
        self.set_sun_and_moon_directions(frame_state, ephemeris);

        self.entire_frustum = DVec2::new(camera.frustum.near, camera.frustum.far);
        self.update_frustum(&camera.frustum);

        self.fog_density = frame_state.fog.density as f32;
        self.frame_number = frame_state.frame_number;
        self.morph_time = frame_state.morph_time;
        self.pass = frame_state.pass;
    }

    fn set_sun_and_moon_directions(&mut self, frame_state: &FrameState, ephemeris: &dyn Ephemeris) {
        let transform = self.teme_to_pseudo_fixed;
        self.sun_position_wc = transform * ephemeris.sun_position_inertial(frame_state.time);
        self.sun_direction_wc = self.sun_position_wc.normalize_or_zero();

        let view_rotation_3d = self.view_rotation_3d();
        self.sun_direction_ec = (view_rotation_3d * self.sun_position_wc).normalize_or_zero();
        let moon_position_wc = transform * ephemeris.moon_position_inertial(frame_state.time);
        self.moon_direction_ec = (view_rotation_3d * moon_position_wc).normalize_or_zero();
    }

    pub fn set_automatic_uniforms(&mut self, layout: &mut AutomaticUniforms) {
        layout.view_rotation = mat3_to_padded(self.view_rotation);
        layout.teme_to_pseudo_fixed = mat3_to_padded(self.teme_to_pseudo_fixed);
        layout.sun_direction_ec = self.sun_direction_ec.as_vec3().to_array();
        layout.sun_direction_wc = self.sun_direction_wc.as_vec3().to_array();
        layout.moon_direction_ec = self.moon_direction_ec.as_vec3().to_array();
        layout.viewer_position_wc = self.inverse_view.w_axis.truncate().as_vec3().to_array();
        layout.morph_time = self.morph_time as f32;
        layout.fog_density = self.fog_density;
        layout.frame_number = self.frame_number as f32;
        layout.pass = self.pass.as_uniform();
    }

    pub fn set_frustum_uniforms(&mut self, layout: &mut FrustumUniforms) {
        layout.viewport_orthographic = mat4_to_f32(self.viewport_orthographic());
        layout.viewport_transformation = mat4_to_f32(self.viewport_transformation());
        layout.projection = mat4_to_f32(self.projection);
        layout.inverse_projection = mat4_to_f32(self.inverse_projection());
        layout.view = mat4_to_f32(self.view);
        layout.model_view = mat4_to_f32(self.model_view());
        layout.model_view_3d = mat4_to_f32(self.model_view_3d());
        layout.inverse_model_view = mat4_to_f32(self.inverse_model_view());
        layout.model_view_projection = mat4_to_f32(self.model_view_projection());
        layout.viewport = [
            self.viewport.x as f32,
            self.viewport.y as f32,
            self.viewport.width as f32,
            self.viewport.height as f32,
        ];
        layout.normal = mat3_to_padded(self.normal());
        layout.normal_3d = mat3_to_padded(self.normal_3d());
        layout.entire_frustum = [self.entire_frustum.x as f32, self.entire_frustum.y as f32];
    }

    // Derived

    fn clean_view_3d(&mut self) {
        if self.take_dirty(Derived::VIEW_3D) {
            self.view_3d = if self.mode == SceneMode::Scene3D {
                self.view
            } else {
                view_2d_to_3d(
                    &self.camera,
                    self.frustum_2d_width,
                    self.mode,
                    &self.map_projection,
                )
            };
            self.view_rotation_3d = DMat3::from_mat4(self.view_3d);
        }
    }

    pub fn view_3d(&mut self) -> DMat4 {
        self.clean_view_3d();
        self.view_3d
    }

    pub fn view_rotation_3d(&mut self) -> DMat3 {
        self.clean_view_3d();
        self.view_rotation_3d
    }

    fn clean_inverse_view_3d(&mut self) {
        if self.take_dirty(Derived::INVERSE_VIEW_3D) {
            self.inverse_view_3d = self.view_3d().inverse();
            self.inverse_view_rotation_3d = DMat3::from_mat4(self.inverse_view_3d);
        }
    }

    pub fn inverse_view_3d(&mut self) -> DMat4 {
        self.clean_inverse_view_3d();
        self.inverse_view_3d
    }

    pub fn inverse_view_rotation_3d(&mut self) -> DMat3 {
        self.clean_inverse_view_3d();
        self.inverse_view_rotation_3d
    }

    pub fn inverse_model(&mut self) -> DMat4 {
        if self.take_dirty(Derived::INVERSE_MODEL) {
            self.inverse_model = self.model.inverse();
        }
        self.inverse_model
    }

    pub fn inverse_transpose_model(&mut self) -> DMat3 {
        if self.take_dirty(Derived::INVERSE_TRANSPOSE_MODEL) {
            self.inverse_transpose_model = DMat3::from_mat4(self.model.inverse().transpose());
        }
        self.inverse_transpose_model
    }

    pub fn inverse_projection(&mut self) -> DMat4 {
        if self.take_dirty(Derived::INVERSE_PROJECTION) {
            self.inverse_projection = self.projection.inverse();
        }
        self.inverse_projection
    }

    pub fn model_view(&mut self) -> DMat4 {
        if self.take_dirty(Derived::MODEL_VIEW) {
            self.model_view = self.view * self.model;
        }
        self.model_view
    }

    pub fn model_view_3d(&mut self) -> DMat4 {
        if self.take_dirty(Derived::MODEL_VIEW_3D) {
            self.model_view_3d = self.view_3d() * self.model;
        }
        self.model_view_3d
    }

    /// Model-view with the translation dropped, for positions already relative to the eye.
    pub fn model_view_relative_to_eye(&mut self) -> DMat4 {
        if self.take_dirty(Derived::MODEL_VIEW_RELATIVE_TO_EYE) {
            let mut matrix = self.model_view();
            matrix.w_axis = DVec4::new(0.0, 0.0, 0.0, matrix.w_axis.w);
            self.model_view_relative_to_eye = matrix;
        }
        self.model_view_relative_to_eye
    }

    pub fn inverse_model_view(&mut self) -> DMat4 {
        if self.take_dirty(Derived::INVERSE_MODEL_VIEW) {
            self.inverse_model_view = self.model_view().inverse();
        }
        self.inverse_model_view
    }

    pub fn inverse_model_view_3d(&mut self) -> DMat4 {
        if self.take_dirty(Derived::INVERSE_MODEL_VIEW_3D) {
            self.inverse_model_view_3d = self.model_view_3d().inverse();
        }
        self.inverse_model_view_3d
    }

    pub fn view_projection(&mut self) -> DMat4 {
        if self.take_dirty(Derived::VIEW_PROJECTION) {
            self.view_projection = self.projection * self.view;
        }
        self.view_projection
    }

    pub fn inverse_view_projection(&mut self) -> DMat4 {
        if self.take_dirty(Derived::INVERSE_VIEW_PROJECTION) {
            self.inverse_view_projection = self.view_projection().inverse();
        }
        self.inverse_view_projection
    }

    pub fn model_view_projection(&mut self) -> DMat4 {
        if self.take_dirty(Derived::MODEL_VIEW_PROJECTION) {
            self.model_view_projection = self.projection * self.model_view();
        }
        self.model_view_projection
    }

    pub fn inverse_model_view_projection(&mut self) -> DMat4 {
        if self.take_dirty(Derived::INVERSE_MODEL_VIEW_PROJECTION) {
            self.inverse_model_view_projection = self.model_view_projection().inverse();
        }
        self.inverse_model_view_projection
    }

    pub fn model_view_projection_relative_to_eye(&mut self) -> DMat4 {
        if self.take_dirty(Derived::MODEL_VIEW_PROJECTION_RELATIVE_TO_EYE) {
            self.model_view_projection_relative_to_eye =
                self.projection * self.model_view_relative_to_eye();
        }
        self.model_view_projection_relative_to_eye
    }

    pub fn model_view_infinite_projection(&mut self) -> DMat4 {
        if self.take_dirty(Derived::MODEL_VIEW_INFINITE_PROJECTION) {
            self.model_view_infinite_projection = self.infinite_projection * self.model_view();
        }
        self.model_view_infinite_projection
    }

    pub fn normal(&mut self) -> DMat3 {
        if self.take_dirty(Derived::NORMAL) {
            self.normal = DMat3::from_mat4(self.inverse_model_view()).transpose();
        }
        self.normal
    }

    pub fn normal_3d(&mut self) -> DMat3 {
        if self.take_dirty(Derived::NORMAL_3D) {
            self.normal_3d = DMat3::from_mat4(self.inverse_model_view_3d()).transpose();
        }
        self.normal_3d
    }

    pub fn inverse_normal(&mut self) -> DMat3 {
        if self.take_dirty(Derived::INVERSE_NORMAL) {
            self.inverse_normal = DMat3::from_mat4(self.inverse_model_view());
        }
        self.inverse_normal
    }

    pub fn inverse_normal_3d(&mut self) -> DMat3 {
        if self.take_dirty(Derived::INVERSE_NORMAL_3D) {
            self.inverse_normal_3d = DMat3::from_mat4(self.inverse_model_view_3d());
        }
        self.inverse_normal_3d
    }

    pub fn encoded_camera_position_mc(&mut self) -> EncodedCartesian3 {
        if self.take_dirty(Derived::ENCODED_CAMERA_POSITION_MC) {
            let position_mc = self.inverse_model().transform_point3(self.camera.position);
            self.encoded_camera_position_mc = EncodedCartesian3::from_cartesian(position_mc);
        }
        self.encoded_camera_position_mc
    }

    fn clean_viewport(&mut self) {
        if self.take_dirty(Derived::VIEWPORT_TRANSFORMS) {
            let Viewport {
                x,
                y,
                width,
                height,
            } = self.viewport;
            self.viewport_orthographic =
                DMat4::orthographic_rh(x, x + width, y, y + height, 0.0, 1.0);

            let half_width = width * 0.5;
            let half_height = height * 0.5;
            let half_depth = 0.5;
            self.viewport_transformation = DMat4::from_cols(
                DVec4::new(half_width, 0.0, 0.0, 0.0),
                DVec4::new(0.0, half_height, 0.0, 0.0),
                DVec4::new(0.0, 0.0, half_depth, 0.0),
                DVec4::new(x + half_width, y + half_height, half_depth, 1.0),
            );
        }
    }

    pub fn viewport_orthographic(&mut self) -> DMat4 {
        self.clean_viewport();
        self.viewport_orthographic
    }

    pub fn viewport_transformation(&mut self) -> DMat4 {
        self.clean_viewport();
        self.viewport_transformation
    }
}

/// Builds the 3D view matrix equivalent to a camera flying over the 2D or Columbus-view map.
///
/// 2D world axes are X out of the map, Y east and Z north. Positions outside the projection's
/// valid range are clamped to longitude `[-pi, pi]` and latitude `[-pi/2, pi/2]`.
pub fn view_2d_to_3d(
    camera: &CameraAxes,
    frustum_2d_width: f64,
    mode: SceneMode,
    projection: &dyn MapProjection,
) -> DMat4 {
    let to_enu = |v: DVec3| DVec3::new(v.y, v.z, v.x);
    let mut position = to_enu(camera.position);
    let right = to_enu(camera.right);
    let up = to_enu(camera.up);
    let direction = to_enu(camera.direction);

    // The apparent 2D height is half the frustum width.
    if mode == SceneMode::Scene2D {
        position.z = frustum_2d_width * 0.5;
    }

    let mut cartographic = projection.unproject(position);
    cartographic.longitude = clamp_finite(cartographic.longitude, -PI, PI);
    cartographic.latitude = clamp_finite(cartographic.latitude, -FRAC_PI_2, FRAC_PI_2);
    if !cartographic.height.is_finite() {
        cartographic.height = 0.0;
    }
    let ellipsoid = projection.ellipsoid();
    let position_3d = ellipsoid.cartographic_to_cartesian(cartographic);

    let enu_to_fixed = east_north_up_to_fixed_frame(position_3d, ellipsoid);
    let r = enu_to_fixed.transform_vector3(right);
    let u = enu_to_fixed.transform_vector3(up);
    let d = enu_to_fixed.transform_vector3(direction);

    DMat4::from_cols(
        DVec4::new(r.x, u.x, -d.x, 0.0),
        DVec4::new(r.y, u.y, -d.y, 0.0),
        DVec4::new(r.z, u.z, -d.z, 0.0),
        DVec4::new(-r.dot(position_3d), -u.dot(position_3d), d.dot(position_3d), 1.0),
    )
}

fn clamp_finite(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ephemeris::LowPrecisionEphemeris;
    use geodesy::{Ellipsoid, GeographicProjection, JulianDate, WebMercatorProjection};
    use proptest::prelude::*;

    fn translation(x: f64, y: f64, z: f64) -> DMat4 {
        DMat4::from_translation(DVec3::new(x, y, z))
    }

    fn looking_down_2d(position: DVec3) -> CameraAxes {
        CameraAxes {
            position,
            direction: DVec3::NEG_X,
            right: DVec3::Y,
            up: DVec3::Z,
        }
    }

    fn globe_camera() -> CameraSnapshot {
        CameraSnapshot::look_at(
            DVec3::new(2.0e7, 0.0, 0.0),
            DVec3::ZERO,
            DVec3::Z,
            Frustum::perspective(60f64.to_radians(), 1.5, 1.0, 5.0e7),
        )
    }

    #[test]
    fn model_view_recomputes_once_per_model_assignment() {
        let mut state = UniformState::new();
        state.set_view(translation(0.0, 0.0, -10.0));
        let _ = state.model_view();
        let baseline = state.recompute_count(Derived::MODEL_VIEW);

        state.set_model(translation(1.0, 2.0, 3.0));
        assert!(state.is_dirty(Derived::MODEL_VIEW));
        let first = state.model_view();
        let second = state.model_view();

        assert_eq!(first, second);
        assert_eq!(state.recompute_count(Derived::MODEL_VIEW), baseline + 1);
        assert!(!state.is_dirty(Derived::MODEL_VIEW));
        assert_eq!(first.w_axis.truncate(), DVec3::new(1.0, 2.0, -7.0));
    }

    #[test]
    fn reading_mvp_cleans_model_view_first() {
        let mut state = UniformState::new();
        state.set_model(translation(0.0, 0.0, 5.0));
        state.set_projection(DMat4::from_scale(DVec3::splat(2.0)));
        let mvp = state.model_view_projection();

        assert!(!state.is_dirty(Derived::MODEL_VIEW));
        assert_eq!(mvp.w_axis.truncate(), DVec3::new(0.0, 0.0, 10.0));
        let _ = state.model_view();
        assert_eq!(state.recompute_count(Derived::MODEL_VIEW), 1);
    }

    #[test]
    fn projection_change_keeps_model_view_cached() {
        let mut state = UniformState::new();
        let _ = state.model_view();
        let _ = state.inverse_projection();
        state.set_projection(DMat4::from_scale(DVec3::splat(3.0)));

        assert!(!state.is_dirty(Derived::MODEL_VIEW));
        assert!(state.is_dirty(Derived::INVERSE_PROJECTION));
        let inverse = state.inverse_projection();
        assert!((inverse.x_axis.x - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn relative_to_eye_drops_translation() {
        let mut state = UniformState::new();
        state.set_view(translation(4.0, 5.0, 6.0));
        let rte = state.model_view_relative_to_eye();
        assert_eq!(rte.w_axis, DVec4::new(0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn encoded_camera_position_splits_high_and_low() {
        let mut state = UniformState::new();
        let camera = CameraSnapshot::look_at(
            DVec3::new(6_378_137.5, -70_000.25, 0.0),
            DVec3::ZERO,
            DVec3::Z,
            Frustum::perspective(1.0, 1.0, 1.0, 10.0),
        );
        state.set_camera(&camera);
        let encoded = state.encoded_camera_position_mc();
        assert_eq!(encoded.high.x, 6_356_992.0);
        assert!((f64::from(encoded.high.x) + f64::from(encoded.low.x) - 6_378_137.5).abs() < 1e-3);
        assert_eq!(encoded.high.y, -65_536.0);
        assert!((f64::from(encoded.low.y) + 4_464.25).abs() < 1e-3);
    }

    #[test]
    fn viewport_transformation_maps_ndc_corners_to_pixels() {
        let mut state = UniformState::new();
        state.set_viewport(Viewport {
            x: 10.0,
            y: 20.0,
            width: 200.0,
            height: 100.0,
        });
        let transform = state.viewport_transformation();
        let corner = transform.transform_point3(DVec3::new(1.0, 1.0, 1.0));
        assert_eq!(corner, DVec3::new(210.0, 120.0, 1.0));
        let origin = transform.transform_point3(DVec3::new(-1.0, -1.0, -1.0));
        assert_eq!(origin, DVec3::new(10.0, 20.0, 0.0));
    }

    #[test]
    fn scene_2d_camera_at_origin_sits_on_the_surface() {
        let projection = GeographicProjection::default();
        let camera = looking_down_2d(DVec3::new(1.0e7, 0.0, 0.0));
        let view = view_2d_to_3d(&camera, 0.0, SceneMode::Scene2D, &projection);

        let position = view.inverse().w_axis.truncate();
        let ellipsoid = Ellipsoid::wgs84();
        assert!((position - DVec3::new(ellipsoid.maximum_radius(), 0.0, 0.0)).length() < 1e-6);
        let cartographic = ellipsoid
            .cartesian_to_cartographic(position)
            .expect("surface point");
        assert!(cartographic.longitude.abs() < 1e-12);
        assert!(cartographic.latitude.abs() < 1e-12);

        // Looking straight down at the globe center.
        let forward = -DVec3::new(view.x_axis.z, view.y_axis.z, view.z_axis.z);
        assert!((forward - DVec3::NEG_X).length() < 1e-12);
    }

    #[test]
    fn columbus_view_keeps_camera_height() {
        let projection = GeographicProjection::default();
        let camera = looking_down_2d(DVec3::new(5_000.0, 0.0, 0.0));
        let view = view_2d_to_3d(&camera, 0.0, SceneMode::ColumbusView, &projection);
        let position = view.inverse().w_axis.truncate();
        assert!((position.x - (6_378_137.0 + 5_000.0)).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_2d_position_is_clamped() {
        let projection = WebMercatorProjection::default();
        let camera = looking_down_2d(DVec3::new(1_000.0, 1.0e12, 1.0e6));
        let view = view_2d_to_3d(&camera, 0.0, SceneMode::ColumbusView, &projection);
        assert!(view.is_finite());

        let position = view.inverse().w_axis.truncate();
        let cartographic = Ellipsoid::wgs84()
            .cartesian_to_cartographic(position)
            .expect("surface point");
        assert!((cartographic.longitude.abs() - PI).abs() < 1e-9);
        assert!(cartographic.latitude > 0.0 && cartographic.latitude < FRAC_PI_2);
    }

    #[test]
    fn update_in_3d_uses_camera_view_for_view_3d() {
        let mut state = UniformState::new();
        let camera = globe_camera();
        let frame_state = FrameState::new(camera, JulianDate::J2000);
        state.update(&frame_state, &LowPrecisionEphemeris);

        assert_eq!(state.view_3d(), camera.view_matrix);
        assert!((state.sun_direction_wc().length() - 1.0).abs() < 1e-9);
        assert!((state.sun_direction_ec().length() - 1.0).abs() < 1e-9);
        assert_eq!(state.entire_frustum(), DVec2::new(1.0, 5.0e7));
        assert_eq!(state.eye_height_2d(), DVec2::ZERO);
    }

    #[test]
    fn update_in_2d_tracks_frustum_width() {
        let mut state = UniformState::new();
        let mut camera = globe_camera();
        camera.frustum = Frustum::orthographic(-2.0e6, 2.0e6, -1.0e6, 1.0e6, 1.0, 1.0e8);
        let mut frame_state = FrameState::new(camera, JulianDate::J2000);
        frame_state.mode = SceneMode::Scene2D;
        state.update(&frame_state, &LowPrecisionEphemeris);

        assert_eq!(state.frustum_2d_width(), 4.0e6);
        assert_eq!(state.eye_height_2d(), DVec2::new(2.0e6, 4.0e12));
        assert!(state.view_3d().is_finite());
    }

    #[test]
    fn automatic_uniforms_carry_viewer_position_and_pass() {
        let mut state = UniformState::new();
        let camera = globe_camera();
        let mut frame_state = FrameState::new(camera, JulianDate::J2000);
        frame_state.frame_number = 42;
        frame_state.pass = Pass::Translucent;
        state.update(&frame_state, &LowPrecisionEphemeris);

        let mut layout = bytemuck::Zeroable::zeroed();
        state.set_automatic_uniforms(&mut layout);
        let layout: AutomaticUniforms = layout;
        let [x, y, z] = layout.viewer_position_wc;
        assert!((x - 2.0e7).abs() < 4.0);
        assert!(y.abs() < 1e-3 && z.abs() < 1e-3);
        assert_eq!(layout.frame_number, 42.0);
        assert_eq!(layout.pass, 3.0);
    }

    #[test]
    fn frustum_uniforms_use_clean_derived_values() {
        let mut state = UniformState::new();
        let camera = globe_camera();
        state.update(&FrameState::new(camera, JulianDate::J2000), &LowPrecisionEphemeris);
        state.set_model(translation(1.0, 0.0, 0.0));

        let mut layout: FrustumUniforms = bytemuck::Zeroable::zeroed();
        state.set_frustum_uniforms(&mut layout);
        let expected = mat4_to_f32(camera.view_matrix * translation(1.0, 0.0, 0.0));
        assert_eq!(layout.model_view, expected);
        assert_eq!(layout.entire_frustum, [1.0, 5.0e7]);
        assert!(!state.is_dirty(Derived::MODEL_VIEW));
    }

    #[derive(Debug, Clone)]
    enum Step {
        Model(f64),
        View(f64),
        Projection(f64),
        Read,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (-100.0f64..100.0).prop_map(Step::Model),
            (-100.0f64..100.0).prop_map(Step::View),
            (0.5f64..4.0).prop_map(Step::Projection),
            Just(Step::Read),
        ]
    }

    proptest! {
        #[test]
        fn cached_values_match_eager_recompute(steps in proptest::collection::vec(step(), 1..40)) {
            let mut state = UniformState::new();
            let mut model = DMat4::IDENTITY;
            let mut view = DMat4::IDENTITY;
            let mut projection = DMat4::IDENTITY;
            for step in steps {
                match step {
                    Step::Model(offset) => {
                        model = translation(offset, 0.0, 1.0);
                        state.set_model(model);
                    }
                    Step::View(offset) => {
                        view = translation(0.0, offset, -3.0);
                        state.set_view(view);
                    }
                    Step::Projection(scale) => {
                        projection = DMat4::from_scale(DVec3::splat(scale));
                        state.set_projection(projection);
                    }
                    Step::Read => {
                        prop_assert_eq!(state.model_view(), view * model);
                        prop_assert_eq!(state.model_view_projection(), projection * (view * model));
                        prop_assert_eq!(state.view_projection(), projection * view);
                    }
                }
            }
            prop_assert_eq!(state.model_view_projection(), projection * (view * model));
        }
    }
}
