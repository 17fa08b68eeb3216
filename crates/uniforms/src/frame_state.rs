use geodesy::{JulianDate, Projection};
use glam::{DMat4, DVec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SceneMode {
    Scene2D,
    ColumbusView,
    Scene3D,
    Morphing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Pass {
    Compute = 0,
    Globe = 1,
    Opaque = 2,
    Translucent = 3,
    Overlay = 4,
}

impl Pass {
    pub fn as_uniform(self) -> f32 {
        f32::from(self as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Passes {
    pub render: bool,
    pub pick: bool,
}

impl Default for Passes {
    fn default() -> Self {
        Self {
            render: true,
            pick: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fog {
    pub enabled: bool,
    pub density: f64,
}

impl Default for Fog {
    fn default() -> Self {
        Self {
            enabled: true,
            density: 2.0e-4,
        }
    }
}

/// Off-center view volume plus the projection matrices built from it. Depth maps to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
    pub top: f64,
    pub near: f64,
    pub far: f64,
    pub projection: DMat4,
    pub infinite_projection: Option<DMat4>,
}

impl Frustum {
    pub fn perspective(fov_y: f64, aspect_ratio: f64, near: f64, far: f64) -> Self {
        assert!(
            near > 0.0 && far > near,
            "perspective frustum needs 0 < near < far, got near={near} far={far}"
        );
        let top = near * (fov_y * 0.5).tan();
        let right = top * aspect_ratio;
        Self {
            left: -right,
            right,
            bottom: -top,
            top,
            near,
            far,
            projection: DMat4::perspective_rh(fov_y, aspect_ratio, near, far),
            infinite_projection: Some(DMat4::perspective_infinite_rh(fov_y, aspect_ratio, near)),
        }
    }

    pub fn orthographic(
        left: f64,
        right: f64,
        bottom: f64,
        top: f64,
        near: f64,
        far: f64,
    ) -> Self {
        Self {
            left,
            right,
            bottom,
            top,
            near,
            far,
            projection: DMat4::orthographic_rh(left, right, bottom, top, near, far),
            infinite_projection: None,
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }
}

/// Camera position and orientation vectors in one world frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraAxes {
    pub position: DVec3,
    pub direction: DVec3,
    pub right: DVec3,
    pub up: DVec3,
}

/// What the uniform state reads from the active camera each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSnapshot {
    pub axes: CameraAxes,
    pub view_matrix: DMat4,
    pub inverse_view_matrix: DMat4,
    pub frustum: Frustum,
}

impl CameraSnapshot {
    pub fn look_at(position: DVec3, target: DVec3, up: DVec3, frustum: Frustum) -> Self {
        let direction = (target - position).normalize();
        let right = direction.cross(up).normalize();
        let up = right.cross(direction);
        let view_matrix = DMat4::look_to_rh(position, direction, up);
        Self {
            axes: CameraAxes {
                position,
                direction,
                right,
                up,
            },
            view_matrix,
            inverse_view_matrix: view_matrix.inverse(),
            frustum,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameState {
    pub mode: SceneMode,
    pub morph_time: f64,
    pub frame_number: u64,
    pub time: JulianDate,
    pub camera: CameraSnapshot,
    pub map_projection: Projection,
    pub passes: Passes,
    pub fog: Fog,
    pub pass: Pass,
}

impl FrameState {
    pub fn new(camera: CameraSnapshot, time: JulianDate) -> Self {
        Self {
            mode: SceneMode::Scene3D,
            morph_time: 1.0,
            frame_number: 0,
            time,
            camera,
            map_projection: Projection::default(),
            passes: Passes::default(),
            fog: Fog::default(),
            pass: Pass::Opaque,
        }
    }
}
