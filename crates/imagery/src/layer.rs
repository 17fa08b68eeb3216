use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use slotmap::SlotMap;

use crate::{
    Dispatch, Imagery, ImageryBackend, ImageryCompletion, ImageryError, ImageryId,
    ImageryProvider, ImageryState, ImageryStep, ImageryTicket, MAXIMUM_LEVEL, QueuedReprojection,
    StepOutput, TileKey,
};

static NEXT_LAYER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(u64);

impl LayerId {
    fn next() -> Self {
        Self(NEXT_LAYER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type CachedImagery<B> = Imagery<<B as ImageryBackend>::Texture, <B as ImageryBackend>::Command>;

/// One imagery source draped over the globe, owning its tile cache.
///
/// Tiles live in a generation-checked arena; the (level, x, y) index points into it. A tile's
/// parent link is a counted reference, so evicting a tile may cascade up the quadtree.
pub struct ImageryLayer<B: ImageryBackend> {
    id: LayerId,
    provider: Box<dyn ImageryProvider>,
    show: bool,
    pub(crate) shown_at_last_update: bool,
    pub(crate) is_base_layer: bool,
    pub(crate) layer_index: usize,
    cache: SlotMap<ImageryId, CachedImagery<B>>,
    by_key: HashMap<TileKey, ImageryId>,
    placeholder: ImageryId,
    pending_reprojections: Vec<ImageryId>,
    evictions: u64,
}

impl<B: ImageryBackend> ImageryLayer<B> {
    pub fn new(provider: Box<dyn ImageryProvider>) -> Self {
        let id = LayerId::next();
        let mut cache = SlotMap::with_key();
        let mut placeholder = Imagery::new(TileKey::new(0, 0, 0), id, None, None);
        placeholder.state = ImageryState::PlaceHolder;
        placeholder.reference_count = 1;
        let placeholder = cache.insert(placeholder);
        Self {
            id,
            provider,
            show: true,
            shown_at_last_update: true,
            is_base_layer: false,
            layer_index: 0,
            cache,
            by_key: HashMap::new(),
            placeholder,
            pending_reprojections: Vec::new(),
            evictions: 0,
        }
    }

    pub fn with_show(mut self, show: bool) -> Self {
        self.show = show;
        self.shown_at_last_update = show;
        self
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn provider(&self) -> &dyn ImageryProvider {
        self.provider.as_ref()
    }

    pub fn show(&self) -> bool {
        self.show
    }

    /// Takes effect at the collection's next update pass.
    pub fn set_show(&mut self, show: bool) {
        self.show = show;
    }

    pub fn is_base_layer(&self) -> bool {
        self.is_base_layer
    }

    pub fn layer_index(&self) -> usize {
        self.layer_index
    }

    /// Tiles currently cached, the placeholder included.
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn placeholder(&self) -> ImageryId {
        self.placeholder
    }

    pub fn imagery(&self, id: ImageryId) -> Option<&CachedImagery<B>> {
        self.cache.get(id)
    }

    pub fn imagery_id(&self, key: TileKey) -> Option<ImageryId> {
        self.by_key.get(&key).copied()
    }

    pub fn pending_reprojection_count(&self) -> usize {
        self.pending_reprojections.len()
    }

    /// Returns the cached tile for `key`, creating it and its ancestors as needed, and takes one
    /// reference on it. Pair with [`release_reference`](Self::release_reference).
    pub fn get_imagery_from_cache(&mut self, key: TileKey) -> ImageryId {
        let id = match self.by_key.get(&key) {
            Some(&id) => id,
            None => {
                let parent = key.parent().map(|parent| self.get_imagery_from_cache(parent));
                let rectangle = (self.provider.ready() && key.level <= MAXIMUM_LEVEL).then(|| {
                    self.provider
                        .tiling_scheme()
                        .tile_xy_to_rectangle(key.x, key.y, key.level)
                });
                let id = self.cache.insert(Imagery::new(key, self.id, parent, rectangle));
                self.by_key.insert(key, id);
                id
            }
        };
        self.add_reference(id);
        id
    }

    pub fn add_reference(&mut self, id: ImageryId) {
        let imagery = self
            .cache
            .get_mut(id)
            .unwrap_or_else(|| panic!("add_reference on evicted imagery {id:?}"));
        imagery.reference_count += 1;
    }

    /// Drops one reference and returns how many remain. At zero the tile is evicted and its parent
    /// released in turn.
    pub fn release_reference(&mut self, id: ImageryId) -> u32 {
        let mut first_remaining = None;
        let mut next = Some(id);
        while let Some(current) = next {
            let imagery = self
                .cache
                .get_mut(current)
                .unwrap_or_else(|| panic!("release_reference on evicted imagery {current:?}"));
            assert!(
                imagery.reference_count > 0,
                "imagery {:?} released with zero references",
                imagery.key
            );
            imagery.reference_count -= 1;
            let remaining = imagery.reference_count;
            first_remaining.get_or_insert(remaining);
            if remaining > 0 {
                break;
            }
            next = self.evict(current);
        }
        first_remaining.unwrap_or(0)
    }

    fn evict(&mut self, id: ImageryId) -> Option<ImageryId> {
        let imagery = self.cache.remove(id)?;
        if self.by_key.get(&imagery.key) == Some(&id) {
            self.by_key.remove(&imagery.key);
        }
        self.evictions += 1;
        tracing::trace!(layer = ?self.id, key = ?imagery.key, "imagery evicted");
        imagery.parent
    }

    /// Advances one tile by at most one transition.
    pub fn process_state_machine(&mut self, id: ImageryId, backend: &mut B) {
        let provider_ready = self.provider.ready();
        let Some(imagery) = self.cache.get_mut(id) else {
            return;
        };
        if imagery.state == ImageryState::PlaceHolder {
            return;
        }
        let key = imagery.key;
        if key.level > MAXIMUM_LEVEL {
            if imagery.state == ImageryState::Unloaded {
                fail(
                    imagery,
                    ImageryError::NotAvailable {
                        level: key.level,
                        x: key.x,
                        y: key.y,
                    },
                );
            }
            return;
        }
        let rectangle = match imagery.rectangle {
            Some(rectangle) => rectangle,
            None if provider_ready => {
                let rectangle = self
                    .provider
                    .tiling_scheme()
                    .tile_xy_to_rectangle(key.x, key.y, key.level);
                imagery.rectangle = Some(rectangle);
                rectangle
            }
            None => return,
        };
        let Some(step) = ImageryStep::started_from(imagery.state) else {
            return;
        };
        let ticket = ImageryTicket {
            layer: self.id,
            imagery: id,
            key,
            step,
        };

        match step {
            ImageryStep::Request => {
                if !provider_ready {
                    return;
                }
                let Some(request) = self.provider.request(key.x, key.y, key.level) else {
                    fail(
                        imagery,
                        ImageryError::NotAvailable {
                            level: key.level,
                            x: key.x,
                            y: key.y,
                        },
                    );
                    return;
                };
                imagery.state = ImageryState::Transitioning(step);
                if backend.request_imagery(ticket, request) == Dispatch::Deferred {
                    imagery.state = ImageryState::Unloaded;
                }
            }
            ImageryStep::CreateTexture => {
                let image = imagery.image.take().unwrap_or_else(|| {
                    panic!("imagery {key:?} reached Received without image bytes")
                });
                imagery.state = ImageryState::Transitioning(step);
                backend.create_texture(ticket, image);
            }
            ImageryStep::Reproject => {
                if !self.provider.tiling_scheme().is_web_mercator() {
                    imagery.state = step.completes_to();
                    return;
                }
                let texture = imagery.texture.as_ref().unwrap_or_else(|| {
                    panic!("imagery {key:?} reached TextureLoaded without a texture")
                });
                match backend.reproject_texture(ticket, texture, rectangle) {
                    Some(command) => {
                        imagery.reprojection = Some(command);
                        imagery.state = ImageryState::Transitioning(step);
                        // Held until the command completes or is cancelled.
                        imagery.reference_count += 1;
                        self.pending_reprojections.push(id);
                    }
                    None => imagery.state = step.completes_to(),
                }
            }
            ImageryStep::GenerateMipmaps => {
                let texture = imagery.texture.as_ref().unwrap_or_else(|| {
                    panic!("imagery {key:?} reached Reprojected without a texture")
                });
                imagery.state = ImageryState::Transitioning(step);
                backend.generate_mipmaps(ticket, texture);
            }
        }
    }

    /// Runs the state machine once over every cached tile.
    pub fn update_imagery(&mut self, backend: &mut B) {
        let ids: Vec<ImageryId> = self.cache.keys().collect();
        for id in ids {
            self.process_state_machine(id, backend);
        }
    }

    pub(crate) fn apply_completion(&mut self, completion: ImageryCompletion<B::Texture>) {
        let ImageryCompletion { ticket, output } = completion;
        let Some(imagery) = self.cache.get_mut(ticket.imagery) else {
            tracing::trace!(?ticket, "completion for evicted imagery discarded");
            return;
        };
        if imagery.state != ImageryState::Transitioning(ticket.step) {
            tracing::debug!(?ticket, state = ?imagery.state, "stale imagery completion discarded");
            return;
        }

        match (ticket.step, output) {
            (_, StepOutput::Failed(error)) => {
                tracing::warn!(
                    layer = ?self.id,
                    level = ticket.key.level,
                    x = ticket.key.x,
                    y = ticket.key.y,
                    %error,
                    "imagery failed"
                );
                fail(imagery, error);
            }
            (ImageryStep::Request, StepOutput::Image(bytes)) => {
                imagery.image = Some(bytes);
                imagery.state = ticket.step.completes_to();
            }
            (ImageryStep::CreateTexture | ImageryStep::Reproject, StepOutput::Texture(texture)) => {
                imagery.texture = Some(texture);
                imagery.state = ticket.step.completes_to();
            }
            (ImageryStep::GenerateMipmaps, StepOutput::MipmapsGenerated) => {
                imagery.state = ticket.step.completes_to();
            }
            (step, output) => panic!(
                "backend completed imagery step {step:?} with a {} output",
                output_kind(&output)
            ),
        }

        if ticket.step == ImageryStep::Reproject {
            self.release_reference(ticket.imagery);
        }
    }

    /// Moves commands created since the last call into the frame's list.
    pub fn queue_reprojection_commands(
        &mut self,
        frame: &mut Vec<QueuedReprojection<B::Command>>,
    ) {
        for id in self.pending_reprojections.drain(..) {
            let Some(imagery) = self.cache.get_mut(id) else {
                continue;
            };
            let Some(command) = imagery.reprojection.take() else {
                continue;
            };
            frame.push(QueuedReprojection {
                ticket: ImageryTicket {
                    layer: self.id,
                    imagery: id,
                    key: imagery.key,
                    step: ImageryStep::Reproject,
                },
                command,
            });
        }
    }

    /// Drops reprojections that were not yet queued and returns their tiles to `TextureLoaded`.
    pub fn cancel_reprojections(&mut self) {
        let pending = std::mem::take(&mut self.pending_reprojections);
        for id in pending {
            let Some(imagery) = self.cache.get_mut(id) else {
                continue;
            };
            if imagery.reprojection.take().is_none() {
                continue;
            }
            imagery.state = ImageryState::TextureLoaded;
            self.release_reference(id);
        }
    }

    /// Rewinds every tile with a step in flight so it restarts once the layer is updated again.
    ///
    /// Completions issued before this call no longer match the tile's state and are discarded.
    /// A tile waiting on texture creation has already handed its bytes to the backend, so it
    /// goes back to `Unloaded` and is requested again.
    pub fn abandon_in_flight_steps(&mut self) -> usize {
        self.pending_reprojections.clear();
        let in_flight: Vec<(ImageryId, ImageryStep)> = self
            .cache
            .iter()
            .filter_map(|(id, imagery)| match imagery.state {
                ImageryState::Transitioning(step) => Some((id, step)),
                _ => None,
            })
            .collect();
        for &(id, step) in &in_flight {
            let Some(imagery) = self.cache.get_mut(id) else {
                continue;
            };
            imagery.state = match step {
                ImageryStep::Request | ImageryStep::CreateTexture => ImageryState::Unloaded,
                ImageryStep::Reproject => ImageryState::TextureLoaded,
                ImageryStep::GenerateMipmaps => ImageryState::Reprojected,
            };
            if step == ImageryStep::Reproject {
                imagery.reprojection = None;
                self.release_reference(id);
            }
        }
        if !in_flight.is_empty() {
            tracing::debug!(layer = ?self.id, abandoned = in_flight.len(), "in-flight imagery steps rewound");
        }
        in_flight.len()
    }

    /// The tile itself if ready, otherwise the nearest ready ancestor.
    pub fn ready_imagery_or_ancestor(&self, id: ImageryId) -> Option<ImageryId> {
        let mut next = Some(id);
        while let Some(current) = next {
            let imagery = self.cache.get(current)?;
            if imagery.state == ImageryState::Ready {
                return Some(current);
            }
            next = imagery.parent;
        }
        None
    }
}

fn fail<T, C>(imagery: &mut Imagery<T, C>, error: ImageryError) {
    imagery.state = ImageryState::Failed;
    imagery.image = None;
    imagery.error = Some(error);
}

fn output_kind<T>(output: &StepOutput<T>) -> &'static str {
    match output {
        StepOutput::Image(_) => "image",
        StepOutput::Texture(_) => "texture",
        StepOutput::MipmapsGenerated => "mipmaps",
        StepOutput::Failed(_) => "failure",
    }
}
