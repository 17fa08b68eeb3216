use bitflags::bitflags;

bitflags! {
    /// Values assigned from outside the uniform state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UniformInputs: u16 {
        const MODEL = 1 << 0;
        const VIEW = 1 << 1;
        const PROJECTION = 1 << 2;
        const INFINITE_PROJECTION = 1 << 3;
        const VIEWPORT = 1 << 4;
        /// Camera vectors, 2D frustum width, scene mode and map projection.
        const CAMERA = 1 << 5;
    }
}

bitflags! {
    /// Lazily recomputed values, one dirty bit each.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Derived: u32 {
        const VIEW_3D = 1 << 0;
        const INVERSE_VIEW_3D = 1 << 1;
        const INVERSE_MODEL = 1 << 2;
        const INVERSE_TRANSPOSE_MODEL = 1 << 3;
        const INVERSE_PROJECTION = 1 << 4;
        const MODEL_VIEW = 1 << 5;
        const MODEL_VIEW_3D = 1 << 6;
        const MODEL_VIEW_RELATIVE_TO_EYE = 1 << 7;
        const INVERSE_MODEL_VIEW = 1 << 8;
        const INVERSE_MODEL_VIEW_3D = 1 << 9;
        const VIEW_PROJECTION = 1 << 10;
        const INVERSE_VIEW_PROJECTION = 1 << 11;
        const MODEL_VIEW_PROJECTION = 1 << 12;
        const INVERSE_MODEL_VIEW_PROJECTION = 1 << 13;
        const MODEL_VIEW_PROJECTION_RELATIVE_TO_EYE = 1 << 14;
        const MODEL_VIEW_INFINITE_PROJECTION = 1 << 15;
        const NORMAL = 1 << 16;
        const NORMAL_3D = 1 << 17;
        const INVERSE_NORMAL = 1 << 18;
        const INVERSE_NORMAL_3D = 1 << 19;
        const ENCODED_CAMERA_POSITION_MC = 1 << 20;
        const VIEWPORT_TRANSFORMS = 1 << 21;
    }
}

pub(crate) const DERIVED_COUNT: usize = 22;

/// Direct dependencies: (value, inputs it reads, derived values it reads).
const DEPENDENCIES: &[(Derived, UniformInputs, Derived)] = &[
    (
        Derived::VIEW_3D,
        UniformInputs::VIEW.union(UniformInputs::CAMERA),
        Derived::empty(),
    ),
    (
        Derived::INVERSE_VIEW_3D,
        UniformInputs::empty(),
        Derived::VIEW_3D,
    ),
    (
        Derived::INVERSE_MODEL,
        UniformInputs::MODEL,
        Derived::empty(),
    ),
    (
        Derived::INVERSE_TRANSPOSE_MODEL,
        UniformInputs::MODEL,
        Derived::empty(),
    ),
    (
        Derived::INVERSE_PROJECTION,
        UniformInputs::PROJECTION,
        Derived::empty(),
    ),
    (
        Derived::MODEL_VIEW,
        UniformInputs::MODEL.union(UniformInputs::VIEW),
        Derived::empty(),
    ),
    (
        Derived::MODEL_VIEW_3D,
        UniformInputs::MODEL,
        Derived::VIEW_3D,
    ),
    (
        Derived::MODEL_VIEW_RELATIVE_TO_EYE,
        UniformInputs::empty(),
        Derived::MODEL_VIEW,
    ),
    (
        Derived::INVERSE_MODEL_VIEW,
        UniformInputs::empty(),
        Derived::MODEL_VIEW,
    ),
    (
        Derived::INVERSE_MODEL_VIEW_3D,
        UniformInputs::empty(),
        Derived::MODEL_VIEW_3D,
    ),
    (
        Derived::VIEW_PROJECTION,
        UniformInputs::VIEW.union(UniformInputs::PROJECTION),
        Derived::empty(),
    ),
    (
        Derived::INVERSE_VIEW_PROJECTION,
        UniformInputs::empty(),
        Derived::VIEW_PROJECTION,
    ),
    (
        Derived::MODEL_VIEW_PROJECTION,
        UniformInputs::PROJECTION,
        Derived::MODEL_VIEW,
    ),
    (
        Derived::INVERSE_MODEL_VIEW_PROJECTION,
        UniformInputs::empty(),
        Derived::MODEL_VIEW_PROJECTION,
    ),
    (
        Derived::MODEL_VIEW_PROJECTION_RELATIVE_TO_EYE,
        UniformInputs::PROJECTION,
        Derived::MODEL_VIEW_RELATIVE_TO_EYE,
    ),
    (
        Derived::MODEL_VIEW_INFINITE_PROJECTION,
        UniformInputs::INFINITE_PROJECTION,
        Derived::MODEL_VIEW,
    ),
    (
        Derived::NORMAL,
        UniformInputs::empty(),
        Derived::INVERSE_MODEL_VIEW,
    ),
    (
        Derived::NORMAL_3D,
        UniformInputs::empty(),
        Derived::INVERSE_MODEL_VIEW_3D,
    ),
    (
        Derived::INVERSE_NORMAL,
        UniformInputs::empty(),
        Derived::INVERSE_MODEL_VIEW,
    ),
    (
        Derived::INVERSE_NORMAL_3D,
        UniformInputs::empty(),
        Derived::INVERSE_MODEL_VIEW_3D,
    ),
    (
        Derived::ENCODED_CAMERA_POSITION_MC,
        UniformInputs::CAMERA,
        Derived::INVERSE_MODEL,
    ),
    (
        Derived::VIEWPORT_TRANSFORMS,
        UniformInputs::VIEWPORT,
        Derived::empty(),
    ),
];

impl Derived {
    /// Every derived value that transitively reads any of `inputs`.
    pub fn invalidated_by(inputs: UniformInputs) -> Derived {
        let mut invalid = Derived::empty();
        loop {
            let mut next = invalid;
            for (value, direct_inputs, upstream) in DEPENDENCIES {
                if direct_inputs.intersects(inputs) || upstream.intersects(invalid) {
                    next |= *value;
                }
            }
            if next == invalid {
                return invalid;
            }
            invalid = next;
        }
    }

    pub(crate) fn slot(self) -> usize {
        assert!(
            self.bits().count_ones() == 1,
            "derived slot lookup needs exactly one flag, got {self:?}"
        );
        self.bits().trailing_zeros() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_derived_value_has_one_dependency_row() {
        let mut covered = Derived::empty();
        for (value, _, _) in DEPENDENCIES {
            assert!(!covered.intersects(*value), "{value:?} listed twice");
            covered |= *value;
        }
        assert_eq!(covered, Derived::all());
        assert_eq!(Derived::all().bits().count_ones() as usize, DERIVED_COUNT);
    }

    #[test]
    fn view_change_reaches_normals_transitively() {
        let invalid = Derived::invalidated_by(UniformInputs::VIEW);
        assert!(invalid.contains(Derived::MODEL_VIEW));
        assert!(invalid.contains(Derived::NORMAL));
        assert!(invalid.contains(Derived::NORMAL_3D));
        assert!(invalid.contains(Derived::MODEL_VIEW_INFINITE_PROJECTION));
        assert!(!invalid.contains(Derived::INVERSE_PROJECTION));
        assert!(!invalid.contains(Derived::INVERSE_MODEL));
        assert!(!invalid.contains(Derived::VIEWPORT_TRANSFORMS));
    }

    #[test]
    fn projection_change_leaves_model_view_clean() {
        let invalid = Derived::invalidated_by(UniformInputs::PROJECTION);
        assert!(invalid.contains(Derived::INVERSE_PROJECTION));
        assert!(invalid.contains(Derived::MODEL_VIEW_PROJECTION));
        assert!(invalid.contains(Derived::INVERSE_MODEL_VIEW_PROJECTION));
        assert!(!invalid.contains(Derived::MODEL_VIEW));
        assert!(!invalid.contains(Derived::NORMAL));
    }

    #[test]
    fn infinite_projection_only_touches_its_product() {
        assert_eq!(
            Derived::invalidated_by(UniformInputs::INFINITE_PROJECTION),
            Derived::MODEL_VIEW_INFINITE_PROJECTION
        );
    }
}
