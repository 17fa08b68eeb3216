use crossbeam_channel::{Receiver, Sender};

use crate::{
    CompletionSink, ImageryBackend, ImageryCompletion, ImageryLayer, ImageryProvider, LayerCollectionError,
    LayerId, QueuedReprojection,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShowChange {
    pub layer: LayerId,
    pub index: usize,
    pub show: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionEvent {
    Added {
        layer: LayerId,
        index: usize,
    },
    Removed {
        layer: LayerId,
        index: usize,
    },
    Moved {
        layer: LayerId,
        new_index: usize,
        old_index: usize,
    },
    /// Every visibility change seen by one update pass.
    ShownOrHidden(Vec<ShowChange>),
}

/// Ordered imagery layers; index 0 is drawn first.
pub struct LayerCollection<B: ImageryBackend> {
    layers: Vec<ImageryLayer<B>>,
    events: Vec<CollectionEvent>,
    completion_sender: Sender<ImageryCompletion<B::Texture>>,
    completion_receiver: Receiver<ImageryCompletion<B::Texture>>,
}

impl<B: ImageryBackend> Default for LayerCollection<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ImageryBackend> LayerCollection<B> {
    pub fn new() -> Self {
        let (completion_sender, completion_receiver) = crossbeam_channel::unbounded();
        Self {
            layers: Vec::new(),
            events: Vec::new(),
            completion_sender,
            completion_receiver,
        }
    }

    /// Where backends report finished steps; results are applied on the next `update_imagery`.
    pub fn completion_sink(&self) -> CompletionSink<B::Texture> {
        CompletionSink::new(self.completion_sender.clone())
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ImageryLayer<B>> {
        self.layers.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ImageryLayer<B>> {
        self.layers.get_mut(index)
    }

    pub fn layer(&self, id: LayerId) -> Option<&ImageryLayer<B>> {
        self.layers.iter().find(|layer| layer.id() == id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut ImageryLayer<B>> {
        self.layers.iter_mut().find(|layer| layer.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageryLayer<B>> {
        self.layers.iter()
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.index_of(id).is_some()
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|layer| layer.id() == id)
    }

    pub fn base_layer(&self) -> Option<LayerId> {
        self.layers
            .iter()
            .find(|layer| layer.is_base_layer())
            .map(ImageryLayer::id)
    }

    /// Inserts at `index` (`0..=len`) or appends.
    pub fn add(
        &mut self,
        mut layer: ImageryLayer<B>,
        index: Option<usize>,
    ) -> Result<LayerId, LayerCollectionError> {
        let len = self.layers.len();
        let index = index.unwrap_or(len);
        if index > len {
            return Err(LayerCollectionError::IndexOutOfBounds { index, len });
        }
        let id = layer.id();
        // Visibility set before insertion is reported by `Added`, not as a change.
        layer.shown_at_last_update = layer.show();
        self.layers.insert(index, layer);
        self.update();
        self.events.push(CollectionEvent::Added { layer: id, index });
        tracing::debug!(layer = ?id, index, "imagery layer added");
        Ok(id)
    }

    pub fn add_imagery_provider(
        &mut self,
        provider: Box<dyn ImageryProvider>,
        index: Option<usize>,
    ) -> Result<LayerId, LayerCollectionError> {
        self.add(ImageryLayer::new(provider), index)
    }

    /// Removes the layer. With `destroy` it is dropped here, otherwise it is handed back.
    pub fn remove(
        &mut self,
        id: LayerId,
        destroy: bool,
    ) -> Result<Option<ImageryLayer<B>>, LayerCollectionError> {
        let index = self
            .index_of(id)
            .ok_or(LayerCollectionError::NotFound(id))?;
        let mut layer = self.layers.remove(index);
        if !destroy {
            layer.abandon_in_flight_steps();
        }
        self.update();
        self.events.push(CollectionEvent::Removed { layer: id, index });
        tracing::debug!(layer = ?id, index, destroy, "imagery layer removed");
        Ok((!destroy).then_some(layer))
    }

    pub fn remove_all(&mut self, destroy: bool) -> Vec<ImageryLayer<B>> {
        let mut layers = std::mem::take(&mut self.layers);
        for (index, layer) in layers.iter_mut().enumerate() {
            if !destroy {
                layer.abandon_in_flight_steps();
            }
            self.events.push(CollectionEvent::Removed {
                layer: layer.id(),
                index,
            });
        }
        if destroy { Vec::new() } else { layers }
    }

    pub fn raise(&mut self, id: LayerId) -> Result<(), LayerCollectionError> {
        self.relocate(id, |index, len| (index + 1).min(len - 1))
    }

    pub fn lower(&mut self, id: LayerId) -> Result<(), LayerCollectionError> {
        self.relocate(id, |index, _| index.saturating_sub(1))
    }

    pub fn raise_to_top(&mut self, id: LayerId) -> Result<(), LayerCollectionError> {
        self.relocate(id, |_, len| len - 1)
    }

    pub fn lower_to_bottom(&mut self, id: LayerId) -> Result<(), LayerCollectionError> {
        self.relocate(id, |_, _| 0)
    }

    fn relocate(
        &mut self,
        id: LayerId,
        target: impl FnOnce(usize, usize) -> usize,
    ) -> Result<(), LayerCollectionError> {
        let old_index = self
            .index_of(id)
            .ok_or(LayerCollectionError::NotFound(id))?;
        let new_index = target(old_index, self.layers.len());
        if new_index == old_index {
            return Ok(());
        }
        let layer = self.layers.remove(old_index);
        self.layers.insert(new_index, layer);
        self.update();
        self.events.push(CollectionEvent::Moved {
            layer: id,
            new_index,
            old_index,
        });
        Ok(())
    }

    /// Reassigns indices, picks the base layer and batches visibility changes.
    pub fn update(&mut self) {
        let mut base_layer_found = false;
        let mut changes = Vec::new();
        for (index, layer) in self.layers.iter_mut().enumerate() {
            layer.layer_index = index;
            layer.is_base_layer = layer.show() && !base_layer_found;
            base_layer_found |= layer.show();
            if layer.show() != layer.shown_at_last_update {
                layer.shown_at_last_update = layer.show();
                changes.push(ShowChange {
                    layer: layer.id(),
                    index,
                    show: layer.show(),
                });
            }
        }
        if !changes.is_empty() {
            self.events.push(CollectionEvent::ShownOrHidden(changes));
        }
    }

    pub fn drain_events(&mut self) -> Vec<CollectionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Applies reported completions, then advances every tile of every shown layer once.
    pub fn update_imagery(&mut self, backend: &mut B) {
        self.apply_completions();
        for layer in self.layers.iter_mut().filter(|layer| layer.show()) {
            layer.update_imagery(backend);
        }
    }

    /// Returns how many completions were routed to a layer.
    pub fn apply_completions(&mut self) -> usize {
        let mut applied = 0;
        for completion in self.completion_receiver.try_iter() {
            let layer_id = completion.ticket.layer;
            match self.layers.iter_mut().find(|layer| layer.id() == layer_id) {
                Some(layer) => {
                    layer.apply_completion(completion);
                    applied += 1;
                }
                None => {
                    tracing::trace!(layer = ?layer_id, "completion for removed layer discarded");
                }
            }
        }
        applied
    }

    pub fn queue_reprojection_commands(
        &mut self,
        frame: &mut Vec<QueuedReprojection<B::Command>>,
    ) {
        for layer in &mut self.layers {
            layer.queue_reprojection_commands(frame);
        }
    }

    pub fn cancel_reprojections(&mut self) {
        for layer in &mut self.layers {
            layer.cancel_reprojections();
        }
    }
}
