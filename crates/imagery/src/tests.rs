use proptest::prelude::*;

use crate::*;

#[derive(Default)]
struct RecordingBackend {
    requests: Vec<(ImageryTicket, ImageryRequest)>,
    textures: Vec<(ImageryTicket, Vec<u8>)>,
    reprojections: Vec<ImageryTicket>,
    mipmaps: Vec<ImageryTicket>,
    defer_requests: bool,
}

impl ImageryBackend for RecordingBackend {
    type Texture = u32;
    type Command = ImageryTicket;

    fn request_imagery(&mut self, ticket: ImageryTicket, request: ImageryRequest) -> Dispatch {
        if self.defer_requests {
            return Dispatch::Deferred;
        }
        self.requests.push((ticket, request));
        Dispatch::Started
    }

    fn create_texture(&mut self, ticket: ImageryTicket, image: Vec<u8>) {
        self.textures.push((ticket, image));
    }

    fn reproject_texture(
        &mut self,
        ticket: ImageryTicket,
        _texture: &u32,
        _rectangle: geodesy::Rectangle,
    ) -> Option<ImageryTicket> {
        self.reprojections.push(ticket);
        Some(ticket)
    }

    fn generate_mipmaps(&mut self, ticket: ImageryTicket, _texture: &u32) {
        self.mipmaps.push(ticket);
    }
}

fn geographic_provider() -> UrlTemplateImageryProvider {
    UrlTemplateImageryProvider::new(
        "https://tiles.example/{z}/{x}/{y}.png",
        Box::new(GeographicTilingScheme::default()),
    )
}

fn geographic_layer() -> ImageryLayer<RecordingBackend> {
    ImageryLayer::new(Box::new(geographic_provider()))
}

fn mercator_layer() -> ImageryLayer<RecordingBackend> {
    ImageryLayer::new(Box::new(UrlTemplateImageryProvider::new(
        "https://{s}.osm.example/{z}/{x}/{y}.png",
        Box::new(WebMercatorTilingScheme::default()),
    )))
}

fn state(layer: &ImageryLayer<RecordingBackend>, id: ImageryId) -> ImageryState {
    layer.imagery(id).expect("cached").state()
}

fn references(layer: &ImageryLayer<RecordingBackend>, id: ImageryId) -> u32 {
    layer.imagery(id).expect("cached").reference_count()
}

fn ticket(layer: &ImageryLayer<RecordingBackend>, id: ImageryId, step: ImageryStep) -> ImageryTicket {
    ImageryTicket {
        layer: layer.id(),
        imagery: id,
        key: layer.imagery(id).expect("cached").key(),
        step,
    }
}

fn complete(
    layer: &mut ImageryLayer<RecordingBackend>,
    ticket: ImageryTicket,
    output: StepOutput<u32>,
) {
    layer.apply_completion(ImageryCompletion { ticket, output });
}

fn success_for(step: ImageryStep) -> StepOutput<u32> {
    match step {
        ImageryStep::Request => StepOutput::Image(vec![0xAB; 4]),
        ImageryStep::CreateTexture => StepOutput::Texture(1),
        ImageryStep::Reproject => StepOutput::Texture(2),
        ImageryStep::GenerateMipmaps => StepOutput::MipmapsGenerated,
    }
}

/// Processes and completes every step until the tile reaches `target`.
fn drive(
    layer: &mut ImageryLayer<RecordingBackend>,
    backend: &mut RecordingBackend,
    id: ImageryId,
    target: ImageryState,
) {
    for _ in 0..16 {
        if state(layer, id) == target {
            return;
        }
        layer.process_state_machine(id, backend);
        if state(layer, id) == target {
            return;
        }
        if let ImageryState::Transitioning(step) = state(layer, id) {
            if step == ImageryStep::Reproject {
                let mut frame = Vec::new();
                layer.queue_reprojection_commands(&mut frame);
            }
            let pending = ticket(layer, id, step);
            complete(layer, pending, success_for(step));
        }
    }
    panic!("tile never reached {target:?}, stuck at {:?}", state(layer, id));
}

#[test]
fn three_level_chain_evicts_each_tile_once() {
    let mut layer = geographic_layer();
    let leaf = layer.get_imagery_from_cache(TileKey::new(2, 3, 1));
    let sibling = layer.get_imagery_from_cache(TileKey::new(2, 2, 1));
    let middle = layer.imagery_id(TileKey::new(1, 1, 0)).expect("parent cached");
    let root = layer.imagery_id(TileKey::new(0, 0, 0)).expect("root cached");

    assert_eq!(layer.cached_count(), 5);
    assert_eq!(references(&layer, middle), 2);
    assert_eq!(references(&layer, root), 1);
    assert_eq!(layer.imagery(leaf).unwrap().parent(), Some(middle));
    assert_eq!(layer.imagery(root).unwrap().parent(), None);

    assert_eq!(layer.release_reference(leaf), 0);
    assert_eq!(layer.evictions(), 1);
    assert!(layer.imagery(leaf).is_none());
    assert_eq!(references(&layer, middle), 1);

    assert_eq!(layer.release_reference(sibling), 0);
    assert_eq!(layer.evictions(), 4);
    assert!(layer.imagery(middle).is_none());
    assert!(layer.imagery(root).is_none());
    assert_eq!(layer.cached_count(), 1);
    assert_eq!(state(&layer, layer.placeholder()), ImageryState::PlaceHolder);
}

#[test]
fn repeated_lookup_shares_one_tile() {
    let mut layer = geographic_layer();
    let first = layer.get_imagery_from_cache(TileKey::new(1, 2, 1));
    let second = layer.get_imagery_from_cache(TileKey::new(1, 2, 1));
    assert_eq!(first, second);
    assert_eq!(references(&layer, first), 2);
    assert_eq!(layer.release_reference(first), 1);

    let expected = GeographicTilingScheme::default().tile_xy_to_rectangle(2, 1, 1);
    assert_eq!(layer.imagery(first).unwrap().rectangle(), Some(expected));
}

#[test]
#[should_panic(expected = "release_reference on evicted imagery")]
fn releasing_an_evicted_tile_panics() {
    let mut layer = geographic_layer();
    let id = layer.get_imagery_from_cache(TileKey::new(0, 0, 0));
    layer.release_reference(id);
    layer.release_reference(id);
}

#[test]
fn geographic_tile_skips_reprojection() {
    let mut layer = geographic_layer();
    let mut backend = RecordingBackend::default();
    let id = layer.get_imagery_from_cache(TileKey::new(0, 1, 0));

    layer.process_state_machine(id, &mut backend);
    assert_eq!(state(&layer, id), ImageryState::Transitioning(ImageryStep::Request));
    assert_eq!(backend.requests[0].1.url, "https://tiles.example/0/1/0.png");
    layer.process_state_machine(id, &mut backend);
    assert_eq!(backend.requests.len(), 1);

    let request_ticket = backend.requests[0].0;
    complete(&mut layer, request_ticket, StepOutput::Image(vec![1, 2, 3]));
    assert_eq!(state(&layer, id), ImageryState::Received);
    assert_eq!(layer.imagery(id).unwrap().image(), Some(&[1u8, 2, 3][..]));

    layer.process_state_machine(id, &mut backend);
    assert_eq!(
        state(&layer, id),
        ImageryState::Transitioning(ImageryStep::CreateTexture)
    );
    assert_eq!(backend.textures[0].1, vec![1, 2, 3]);
    assert_eq!(layer.imagery(id).unwrap().image(), None);

    let texture_ticket = backend.textures[0].0;
    complete(&mut layer, texture_ticket, StepOutput::Texture(7));
    assert_eq!(state(&layer, id), ImageryState::TextureLoaded);

    layer.process_state_machine(id, &mut backend);
    assert_eq!(state(&layer, id), ImageryState::Reprojected);
    assert!(backend.reprojections.is_empty());

    layer.process_state_machine(id, &mut backend);
    assert_eq!(
        state(&layer, id),
        ImageryState::Transitioning(ImageryStep::GenerateMipmaps)
    );
    let mipmap_ticket = backend.mipmaps[0];
    complete(&mut layer, mipmap_ticket, StepOutput::MipmapsGenerated);
    assert_eq!(state(&layer, id), ImageryState::Ready);
    assert_eq!(layer.imagery(id).unwrap().texture(), Some(&7));
}

#[test]
fn web_mercator_reprojection_holds_a_reference_until_complete() {
    let mut layer = mercator_layer();
    let mut backend = RecordingBackend::default();
    let id = layer.get_imagery_from_cache(TileKey::new(0, 0, 0));
    drive(&mut layer, &mut backend, id, ImageryState::TextureLoaded);

    layer.process_state_machine(id, &mut backend);
    assert_eq!(state(&layer, id), ImageryState::Transitioning(ImageryStep::Reproject));
    assert_eq!(references(&layer, id), 2);
    assert_eq!(layer.pending_reprojection_count(), 1);

    let mut frame = Vec::new();
    layer.queue_reprojection_commands(&mut frame);
    assert_eq!(frame.len(), 1);
    assert_eq!(layer.pending_reprojection_count(), 0);
    assert_eq!(frame[0].command, frame[0].ticket);

    complete(&mut layer, frame[0].ticket, StepOutput::Texture(9));
    assert_eq!(state(&layer, id), ImageryState::Reprojected);
    assert_eq!(references(&layer, id), 1);
    assert_eq!(layer.imagery(id).unwrap().texture(), Some(&9));
}

#[test]
fn cancelled_reprojection_returns_to_texture_loaded() {
    let mut layer = mercator_layer();
    let mut backend = RecordingBackend::default();
    let id = layer.get_imagery_from_cache(TileKey::new(0, 0, 0));
    drive(&mut layer, &mut backend, id, ImageryState::TextureLoaded);
    layer.process_state_machine(id, &mut backend);

    layer.cancel_reprojections();
    assert_eq!(state(&layer, id), ImageryState::TextureLoaded);
    assert_eq!(references(&layer, id), 1);
    assert!(!layer.imagery(id).unwrap().has_pending_reprojection());

    layer.process_state_machine(id, &mut backend);
    assert_eq!(backend.reprojections.len(), 2);
}

#[test]
fn cancelling_the_last_reference_evicts_the_tile() {
    let mut layer = mercator_layer();
    let mut backend = RecordingBackend::default();
    let id = layer.get_imagery_from_cache(TileKey::new(0, 0, 0));
    drive(&mut layer, &mut backend, id, ImageryState::TextureLoaded);
    layer.process_state_machine(id, &mut backend);

    assert_eq!(layer.release_reference(id), 1);
    layer.cancel_reprojections();
    assert!(layer.imagery(id).is_none());
}

#[test]
fn queued_reprojection_is_not_cancelled() {
    let mut layer = mercator_layer();
    let mut backend = RecordingBackend::default();
    let id = layer.get_imagery_from_cache(TileKey::new(0, 0, 0));
    drive(&mut layer, &mut backend, id, ImageryState::TextureLoaded);
    layer.process_state_machine(id, &mut backend);

    let mut frame = Vec::new();
    layer.queue_reprojection_commands(&mut frame);
    layer.cancel_reprojections();
    assert_eq!(state(&layer, id), ImageryState::Transitioning(ImageryStep::Reproject));
    assert_eq!(references(&layer, id), 2);
}

#[test]
fn failed_tile_is_terminal_and_falls_back_to_ready_ancestor() {
    let mut layer = geographic_layer();
    let mut backend = RecordingBackend::default();
    let child = layer.get_imagery_from_cache(TileKey::new(1, 0, 0));
    let root = layer.imagery_id(TileKey::new(0, 0, 0)).expect("root cached");
    drive(&mut layer, &mut backend, root, ImageryState::Ready);

    layer.process_state_machine(child, &mut backend);
    let failure = ImageryError::Fetch("connection reset".to_owned());
    let request = ticket(&layer, child, ImageryStep::Request);
    complete(&mut layer, request, StepOutput::Failed(failure.clone()));
    assert_eq!(state(&layer, child), ImageryState::Failed);
    assert_eq!(layer.imagery(child).unwrap().error(), Some(&failure));

    let requests_before = backend.requests.len();
    layer.process_state_machine(child, &mut backend);
    assert_eq!(state(&layer, child), ImageryState::Failed);
    assert_eq!(backend.requests.len(), requests_before);
    assert_eq!(layer.ready_imagery_or_ancestor(child), Some(root));
    assert_eq!(layer.ready_imagery_or_ancestor(root), Some(root));
}

#[test]
fn completion_after_eviction_is_discarded() {
    let mut layer = geographic_layer();
    let mut backend = RecordingBackend::default();
    let old = layer.get_imagery_from_cache(TileKey::new(0, 0, 0));
    layer.process_state_machine(old, &mut backend);
    let stale_ticket = backend.requests[0].0;
    layer.release_reference(old);

    complete(&mut layer, stale_ticket, StepOutput::Image(vec![1]));
    assert_eq!(layer.cached_count(), 1);

    let fresh = layer.get_imagery_from_cache(TileKey::new(0, 0, 0));
    assert_ne!(fresh, old);
    complete(&mut layer, stale_ticket, StepOutput::Image(vec![1]));
    assert_eq!(state(&layer, fresh), ImageryState::Unloaded);
}

#[test]
fn deferred_request_retries_next_frame() {
    let mut layer = geographic_layer();
    let mut backend = RecordingBackend {
        defer_requests: true,
        ..RecordingBackend::default()
    };
    let id = layer.get_imagery_from_cache(TileKey::new(0, 0, 0));
    layer.process_state_machine(id, &mut backend);
    assert_eq!(state(&layer, id), ImageryState::Unloaded);

    backend.defer_requests = false;
    layer.process_state_machine(id, &mut backend);
    assert_eq!(state(&layer, id), ImageryState::Transitioning(ImageryStep::Request));
}

#[test]
fn tiles_wait_for_provider_readiness() {
    let (provider, ready) = geographic_provider().deferred();
    let mut layer: ImageryLayer<RecordingBackend> = ImageryLayer::new(Box::new(provider));
    let mut backend = RecordingBackend::default();
    let id = layer.get_imagery_from_cache(TileKey::new(0, 1, 0));
    assert_eq!(layer.imagery(id).unwrap().rectangle(), None);

    layer.process_state_machine(id, &mut backend);
    assert_eq!(state(&layer, id), ImageryState::Unloaded);
    assert!(backend.requests.is_empty());

    ready.set(true);
    layer.process_state_machine(id, &mut backend);
    assert!(layer.imagery(id).unwrap().rectangle().is_some());
    assert_eq!(backend.requests.len(), 1);
}

#[test]
fn tile_beyond_provider_levels_fails() {
    let provider = geographic_provider().with_levels(0, 0);
    let mut layer: ImageryLayer<RecordingBackend> = ImageryLayer::new(Box::new(provider));
    let mut backend = RecordingBackend::default();
    let id = layer.get_imagery_from_cache(TileKey::new(1, 0, 0));
    layer.process_state_machine(id, &mut backend);
    assert_eq!(state(&layer, id), ImageryState::Failed);
    assert!(matches!(
        layer.imagery(id).unwrap().error(),
        Some(ImageryError::NotAvailable { level: 1, .. })
    ));
}

#[test]
fn tile_past_the_deepest_level_fails_instead_of_overflowing() {
    let mut layer = geographic_layer();
    let mut backend = RecordingBackend::default();
    let id = layer.get_imagery_from_cache(TileKey::new(MAXIMUM_LEVEL + 1, 0, 0));
    assert_eq!(layer.imagery(id).unwrap().rectangle(), None);
    layer.process_state_machine(id, &mut backend);
    assert_eq!(state(&layer, id), ImageryState::Failed);
    assert!(backend.requests.is_empty());
}

fn collection_with(shows: &[bool]) -> (LayerCollection<RecordingBackend>, Vec<LayerId>) {
    let mut collection = LayerCollection::new();
    let ids = shows
        .iter()
        .map(|&show| {
            collection
                .add(geographic_layer().with_show(show), None)
                .expect("append")
        })
        .collect();
    collection.drain_events();
    (collection, ids)
}

fn base_flags(collection: &LayerCollection<RecordingBackend>) -> Vec<bool> {
    collection.iter().map(ImageryLayer::is_base_layer).collect()
}

#[test]
fn first_shown_layer_is_the_only_base_layer() {
    let (mut collection, ids) = collection_with(&[false, true, true]);
    assert_eq!(base_flags(&collection), vec![false, true, false]);
    assert_eq!(collection.base_layer(), Some(ids[1]));

    collection.get_mut(0).unwrap().set_show(true);
    collection.update();
    assert_eq!(base_flags(&collection), vec![true, false, false]);
    assert_eq!(
        collection.drain_events(),
        vec![CollectionEvent::ShownOrHidden(vec![ShowChange {
            layer: ids[0],
            index: 0,
            show: true,
        }])]
    );
}

#[test]
fn visibility_changes_are_batched_per_update() {
    let (mut collection, ids) = collection_with(&[true, true, true]);
    collection.layer_mut(ids[0]).unwrap().set_show(false);
    collection.layer_mut(ids[2]).unwrap().set_show(false);
    collection.update();
    collection.update();

    let events = collection.drain_events();
    assert_eq!(events.len(), 1);
    let CollectionEvent::ShownOrHidden(changes) = &events[0] else {
        panic!("expected a visibility batch, got {events:?}");
    };
    assert_eq!(
        changes.iter().map(|change| change.layer).collect::<Vec<_>>(),
        vec![ids[0], ids[2]]
    );
    assert_eq!(collection.base_layer(), Some(ids[1]));
}

#[test]
fn add_rejects_index_past_the_end() {
    let (mut collection, _) = collection_with(&[true]);
    let result = collection.add(geographic_layer(), Some(3));
    assert_eq!(
        result,
        Err(LayerCollectionError::IndexOutOfBounds { index: 3, len: 1 })
    );

    let id = collection.add(geographic_layer(), Some(0)).expect("front");
    assert_eq!(collection.index_of(id), Some(0));
    assert_eq!(collection.get(1).unwrap().layer_index(), 1);
    assert_eq!(
        collection.drain_events(),
        vec![CollectionEvent::Added { layer: id, index: 0 }]
    );
}

#[test]
fn raise_and_lower_reorder_and_report_moves() {
    let (mut collection, ids) = collection_with(&[true, true, true]);

    collection.raise(ids[0]).unwrap();
    assert_eq!(collection.index_of(ids[0]), Some(1));
    collection.raise_to_top(ids[0]).unwrap();
    assert_eq!(collection.index_of(ids[0]), Some(2));
    collection.raise(ids[0]).unwrap();
    collection.lower_to_bottom(ids[2]).unwrap();
    collection.lower(ids[2]).unwrap();

    let order: Vec<_> = collection.iter().map(ImageryLayer::id).collect();
    assert_eq!(order, vec![ids[2], ids[1], ids[0]]);
    assert_eq!(collection.base_layer(), Some(ids[2]));
    assert_eq!(
        collection.drain_events(),
        vec![
            CollectionEvent::Moved {
                layer: ids[0],
                new_index: 1,
                old_index: 0,
            },
            CollectionEvent::Moved {
                layer: ids[0],
                new_index: 2,
                old_index: 1,
            },
            CollectionEvent::Moved {
                layer: ids[2],
                new_index: 0,
                old_index: 1,
            },
        ]
    );
}

#[test]
fn remove_hands_back_the_layer_unless_destroyed() {
    let (mut collection, ids) = collection_with(&[true, true]);
    let kept = collection.remove(ids[0], false).unwrap();
    assert_eq!(kept.map(|layer| layer.id()), Some(ids[0]));
    assert_eq!(collection.base_layer(), Some(ids[1]));
    assert_eq!(
        collection.remove(ids[0], true).err(),
        Some(LayerCollectionError::NotFound(ids[0]))
    );
    assert!(collection.remove(ids[1], true).unwrap().is_none());
    assert!(collection.is_empty());
    assert_eq!(
        collection.drain_events(),
        vec![
            CollectionEvent::Removed {
                layer: ids[0],
                index: 0
            },
            CollectionEvent::Removed {
                layer: ids[1],
                index: 0
            },
        ]
    );
}

#[test]
fn remove_all_reports_each_layer() {
    let (mut collection, ids) = collection_with(&[true, false]);
    let layers = collection.remove_all(false);
    assert_eq!(layers.len(), 2);
    assert!(collection.is_empty());
    assert!(!collection.contains(ids[0]));
    assert_eq!(collection.drain_events().len(), 2);
}

#[test]
fn removed_layer_restarts_in_flight_request_when_re_added() {
    let (mut collection, ids) = collection_with(&[true]);
    let mut backend = RecordingBackend::default();
    let tile = collection
        .layer_mut(ids[0])
        .unwrap()
        .get_imagery_from_cache(TileKey::new(0, 0, 0));
    collection.update_imagery(&mut backend);
    let first_request = backend.requests[0].0;

    let layer = collection.remove(ids[0], false).unwrap().expect("handed back");
    assert_eq!(state(&layer, tile), ImageryState::Unloaded);
    let sink = collection.completion_sink();
    sink.complete(first_request, StepOutput::Image(vec![9]));
    assert_eq!(collection.apply_completions(), 0);

    collection.add(layer, None).unwrap();
    collection.update_imagery(&mut backend);
    assert_eq!(backend.requests.len(), 2);
    assert_eq!(backend.requests[1].0.imagery, tile);

    sink.complete(backend.requests[1].0, StepOutput::Image(vec![9]));
    collection.update_imagery(&mut backend);
    let layer = collection.layer(ids[0]).unwrap();
    assert_eq!(
        state(layer, tile),
        ImageryState::Transitioning(ImageryStep::CreateTexture)
    );
}

#[test]
fn removing_a_layer_releases_reprojection_references() {
    let mut collection: LayerCollection<RecordingBackend> = LayerCollection::new();
    let id = collection.add(mercator_layer(), None).unwrap();
    let mut backend = RecordingBackend::default();
    let layer = collection.layer_mut(id).unwrap();
    let pending = layer.get_imagery_from_cache(TileKey::new(1, 0, 0));
    let queued = layer.get_imagery_from_cache(TileKey::new(1, 1, 0));
    for tile in [pending, queued] {
        drive(layer, &mut backend, tile, ImageryState::TextureLoaded);
    }
    layer.process_state_machine(queued, &mut backend);
    let mut frame = Vec::new();
    layer.queue_reprojection_commands(&mut frame);
    layer.process_state_machine(pending, &mut backend);
    assert_eq!(references(layer, queued), 2);
    assert_eq!(references(layer, pending), 2);

    let mut layer = collection.remove(id, false).unwrap().expect("handed back");
    for tile in [pending, queued] {
        assert_eq!(state(&layer, tile), ImageryState::TextureLoaded);
        assert_eq!(references(&layer, tile), 1);
    }
    assert_eq!(layer.pending_reprojection_count(), 0);

    // The queued command still finishes on the GPU; its completion must not release again.
    complete(&mut layer, frame[0].ticket, StepOutput::Texture(7));
    assert_eq!(references(&layer, queued), 1);
    assert_eq!(state(&layer, queued), ImageryState::TextureLoaded);

    collection.add(layer, None).unwrap();
    let layer = collection.layer_mut(id).unwrap();
    drive(layer, &mut backend, queued, ImageryState::Ready);
    assert_eq!(references(layer, queued), 1);
}

#[test]
fn remove_all_rewinds_texture_creation_to_a_new_request() {
    let (mut collection, ids) = collection_with(&[true]);
    let mut backend = RecordingBackend::default();
    let layer = collection.layer_mut(ids[0]).unwrap();
    let tile = layer.get_imagery_from_cache(TileKey::new(0, 0, 0));
    drive(layer, &mut backend, tile, ImageryState::Received);
    layer.process_state_machine(tile, &mut backend);
    assert_eq!(
        state(layer, tile),
        ImageryState::Transitioning(ImageryStep::CreateTexture)
    );

    let layers = collection.remove_all(false);
    assert_eq!(state(&layers[0], tile), ImageryState::Unloaded);
}

#[test]
fn hidden_layer_added_reports_no_visibility_change() {
    let mut collection: LayerCollection<RecordingBackend> = LayerCollection::new();
    let mut layer = geographic_layer();
    layer.set_show(false);
    let id = collection.add(layer, None).unwrap();
    collection.update();
    assert_eq!(
        collection.drain_events(),
        vec![CollectionEvent::Added { layer: id, index: 0 }]
    );
    assert_eq!(collection.base_layer(), None);
}

#[test]
fn update_imagery_applies_sink_completions_and_skips_hidden_layers() {
    let (mut collection, ids) = collection_with(&[true, false]);
    let mut backend = RecordingBackend::default();
    let shown = collection
        .layer_mut(ids[0])
        .unwrap()
        .get_imagery_from_cache(TileKey::new(0, 0, 0));
    let hidden = collection
        .layer_mut(ids[1])
        .unwrap()
        .get_imagery_from_cache(TileKey::new(0, 0, 0));

    collection.update_imagery(&mut backend);
    assert_eq!(backend.requests.len(), 1);
    assert_eq!(backend.requests[0].0.layer, ids[0]);

    let sink = collection.completion_sink();
    sink.complete(backend.requests[0].0, StepOutput::Image(vec![5]));
    collection.update_imagery(&mut backend);

    let shown_layer = collection.layer(ids[0]).unwrap();
    assert_eq!(
        shown_layer.imagery(shown).unwrap().state(),
        ImageryState::Transitioning(ImageryStep::CreateTexture)
    );
    let hidden_layer = collection.layer(ids[1]).unwrap();
    assert_eq!(hidden_layer.imagery(hidden).unwrap().state(), ImageryState::Unloaded);
}

#[test]
fn completion_for_removed_layer_is_discarded() {
    let (mut collection, ids) = collection_with(&[true]);
    let mut backend = RecordingBackend::default();
    collection
        .layer_mut(ids[0])
        .unwrap()
        .get_imagery_from_cache(TileKey::new(0, 0, 0));
    collection.update_imagery(&mut backend);
    collection.remove(ids[0], true).unwrap();

    collection
        .completion_sink()
        .complete(backend.requests[0].0, StepOutput::Image(vec![1]));
    assert_eq!(collection.apply_completions(), 0);
}

#[test]
fn reprojections_are_queued_in_collection_order() {
    let mut collection: LayerCollection<RecordingBackend> = LayerCollection::new();
    let first = collection.add(mercator_layer(), None).unwrap();
    let second = collection.add(mercator_layer(), None).unwrap();
    let mut backend = RecordingBackend::default();
    for layer_id in [second, first] {
        let layer = collection.layer_mut(layer_id).unwrap();
        let id = layer.get_imagery_from_cache(TileKey::new(0, 0, 0));
        drive(layer, &mut backend, id, ImageryState::TextureLoaded);
        layer.process_state_machine(id, &mut backend);
    }

    let mut frame = Vec::new();
    collection.queue_reprojection_commands(&mut frame);
    let layers: Vec<_> = frame.iter().map(|queued| queued.ticket.layer).collect();
    assert_eq!(layers, vec![first, second]);
}

#[derive(Debug, Clone)]
enum Action {
    Process(usize),
    Complete(usize, bool),
    Queue,
    Cancel,
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        4 => (0usize..3).prop_map(Action::Process),
        4 => (any::<usize>(), prop::bool::weighted(0.85)).prop_map(|(pick, ok)| Action::Complete(pick, ok)),
        1 => Just(Action::Queue),
        1 => Just(Action::Cancel),
    ]
}

proptest! {
    #[test]
    fn states_only_move_forward(actions in prop::collection::vec(action(), 1..120)) {
        let mut layer = mercator_layer();
        let mut backend = RecordingBackend::default();
        let keys = [TileKey::new(2, 1, 1), TileKey::new(2, 2, 1), TileKey::new(1, 0, 1)];
        let ids: Vec<_> = keys.iter().map(|&key| layer.get_imagery_from_cache(key)).collect();
        let mut outstanding: Vec<ImageryTicket> = Vec::new();

        for action in actions {
            let before: Vec<_> = ids.iter().map(|&id| state(&layer, id)).collect();
            match action {
                Action::Process(index) => {
                    layer.process_state_machine(ids[index], &mut backend);
                    outstanding.extend(backend.requests.drain(..).map(|(ticket, _)| ticket));
                    outstanding.extend(backend.textures.drain(..).map(|(ticket, _)| ticket));
                    outstanding.extend(backend.mipmaps.drain(..));
                    backend.reprojections.clear();
                }
                Action::Complete(pick, ok) => {
                    if !outstanding.is_empty() {
                        let ticket = outstanding.remove(pick % outstanding.len());
                        let output = if ok {
                            success_for(ticket.step)
                        } else {
                            StepOutput::Failed(ImageryError::Decode("corrupt".to_owned()))
                        };
                        complete(&mut layer, ticket, output);
                    }
                }
                Action::Queue => {
                    let mut frame = Vec::new();
                    layer.queue_reprojection_commands(&mut frame);
                    outstanding.extend(frame.into_iter().map(|queued| queued.ticket));
                }
                Action::Cancel => layer.cancel_reprojections(),
            }

            for (index, &id) in ids.iter().enumerate() {
                let after = state(&layer, id);
                let rolled_back = matches!(action, Action::Cancel)
                    && before[index] == ImageryState::Transitioning(ImageryStep::Reproject)
                    && after == ImageryState::TextureLoaded;
                prop_assert!(
                    rolled_back || after.pipeline_rank() >= before[index].pipeline_rank(),
                    "{:?} moved backwards from {:?} to {:?}", keys[index], before[index], after
                );
                if before[index].is_terminal() {
                    prop_assert_eq!(after, before[index]);
                }
                prop_assert!(references(&layer, id) >= 1);
            }
        }
    }
}
