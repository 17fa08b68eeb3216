use geodesy::Rectangle;

use crate::{ImageryError, LayerId};

slotmap::new_key_type! {
    /// Generation-checked handle to a cached tile; stale after eviction.
    pub struct ImageryId;
}

/// Quadtree address inside one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub level: u32,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub const fn new(level: u32, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }

    /// The covering tile one level coarser, absent at level 0.
    pub fn parent(self) -> Option<TileKey> {
        (self.level > 0).then(|| TileKey::new(self.level - 1, self.x / 2, self.y / 2))
    }
}

/// The asynchronous step a tile is waiting on while `Transitioning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageryStep {
    Request,
    CreateTexture,
    Reproject,
    GenerateMipmaps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageryState {
    Unloaded,
    Transitioning(ImageryStep),
    Received,
    TextureLoaded,
    Reprojected,
    Ready,
    Failed,
    PlaceHolder,
}

/// Idle state, step started from it, state reached when that step succeeds.
pub(crate) const TRANSITIONS: &[(ImageryState, ImageryStep, ImageryState)] = &[
    (
        ImageryState::Unloaded,
        ImageryStep::Request,
        ImageryState::Received,
    ),
    (
        ImageryState::Received,
        ImageryStep::CreateTexture,
        ImageryState::TextureLoaded,
    ),
    (
        ImageryState::TextureLoaded,
        ImageryStep::Reproject,
        ImageryState::Reprojected,
    ),
    (
        ImageryState::Reprojected,
        ImageryStep::GenerateMipmaps,
        ImageryState::Ready,
    ),
];

impl ImageryStep {
    pub(crate) fn started_from(state: ImageryState) -> Option<ImageryStep> {
        TRANSITIONS
            .iter()
            .find(|(from, _, _)| *from == state)
            .map(|(_, step, _)| *step)
    }

    pub(crate) fn completes_to(self) -> ImageryState {
        TRANSITIONS
            .iter()
            .find(|(_, step, _)| *step == self)
            .map(|(_, _, to)| *to)
            .unwrap_or_else(|| panic!("imagery step {self:?} has no transition row"))
    }
}

impl ImageryState {
    /// Position along the load pipeline; `Failed` ranks after every live state.
    pub fn pipeline_rank(self) -> u8 {
        match self {
            ImageryState::PlaceHolder | ImageryState::Unloaded => 0,
            ImageryState::Transitioning(ImageryStep::Request) => 1,
            ImageryState::Received => 2,
            ImageryState::Transitioning(ImageryStep::CreateTexture) => 3,
            ImageryState::TextureLoaded => 4,
            ImageryState::Transitioning(ImageryStep::Reproject) => 5,
            ImageryState::Reprojected => 6,
            ImageryState::Transitioning(ImageryStep::GenerateMipmaps) => 7,
            ImageryState::Ready => 8,
            ImageryState::Failed => 9,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ImageryState::Ready | ImageryState::Failed)
    }
}

/// One cached tile image of a layer.
#[derive(Debug)]
pub struct Imagery<T, C> {
    pub(crate) key: TileKey,
    pub(crate) layer: LayerId,
    pub(crate) state: ImageryState,
    pub(crate) reference_count: u32,
    pub(crate) parent: Option<ImageryId>,
    pub(crate) rectangle: Option<Rectangle>,
    pub(crate) image: Option<Vec<u8>>,
    pub(crate) texture: Option<T>,
    pub(crate) reprojection: Option<C>,
    pub(crate) error: Option<ImageryError>,
}

impl<T, C> Imagery<T, C> {
    pub(crate) fn new(
        key: TileKey,
        layer: LayerId,
        parent: Option<ImageryId>,
        rectangle: Option<Rectangle>,
    ) -> Self {
        Self {
            key,
            layer,
            state: ImageryState::Unloaded,
            reference_count: 0,
            parent,
            rectangle,
            image: None,
            texture: None,
            reprojection: None,
            error: None,
        }
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    pub fn state(&self) -> ImageryState {
        self.state
    }

    pub fn reference_count(&self) -> u32 {
        self.reference_count
    }

    pub fn parent(&self) -> Option<ImageryId> {
        self.parent
    }

    pub fn rectangle(&self) -> Option<Rectangle> {
        self.rectangle
    }

    pub fn image(&self) -> Option<&[u8]> {
        self.image.as_deref()
    }

    pub fn texture(&self) -> Option<&T> {
        self.texture.as_ref()
    }

    pub fn error(&self) -> Option<&ImageryError> {
        self.error.as_ref()
    }

    pub fn has_pending_reprojection(&self) -> bool {
        self.reprojection.is_some()
    }
}
