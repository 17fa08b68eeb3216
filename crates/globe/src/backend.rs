//! The imagery backend that fetches tiles over the fetch queue, decodes and uploads them on worker
//! threads, and records reprojection and mipmap passes into the frame's encoder.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use fetch::{FetchOperation, FetchOutcome, FetchQueue, QueueError};
use geodesy::Rectangle;
use imagery::{
    CompletionSink, Dispatch, ImageryBackend, ImageryError, ImageryRequest, ImageryTicket,
    QueuedReprojection, StepOutput,
};
use renderer::{GpuTexture, MipmapGenerator, ReprojectionCommand, Reprojector};

use crate::GlobeError;

struct DecodeJob {
    ticket: ImageryTicket,
    image: Vec<u8>,
}

/// Work recorded into one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodedImageryWork {
    pub reprojections: usize,
    pub mipmaps: usize,
}

pub struct GpuImageryBackend {
    device: wgpu::Device,
    fetch_queue: FetchQueue,
    decode_sender: Option<Sender<DecodeJob>>,
    decode_workers: Vec<JoinHandle<()>>,
    sink: CompletionSink<Arc<GpuTexture>>,
    reprojector: Reprojector,
    mipmap_generator: MipmapGenerator,
    pending_mipmaps: Vec<(ImageryTicket, Arc<GpuTexture>)>,
    requests_started: u64,
    requests_deferred: u64,
}

impl GpuImageryBackend {
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        fetch_queue: FetchQueue,
        decode_workers: usize,
        sink: CompletionSink<Arc<GpuTexture>>,
    ) -> Result<Self, GlobeError> {
        assert!(decode_workers > 0, "imagery backend needs a decode worker");
        let (decode_sender, decode_receiver) = crossbeam_channel::unbounded();
        let mut workers = Vec::with_capacity(decode_workers);
        for worker_index in 0..decode_workers {
            let receiver = decode_receiver.clone();
            let device = device.clone();
            let queue = queue.clone();
            let sink = sink.clone();
            let handle = std::thread::Builder::new()
                .name(format!("imagery_decode_{worker_index}"))
                .spawn(move || decode_worker_loop(receiver, device, queue, sink))
                .map_err(GlobeError::DecodeWorker)?;
            workers.push(handle);
        }
        let reprojector = Reprojector::new(&device);
        let mipmap_generator = MipmapGenerator::new(&device);
        Ok(Self {
            device,
            fetch_queue,
            decode_sender: Some(decode_sender),
            decode_workers: workers,
            sink,
            reprojector,
            mipmap_generator,
            pending_mipmaps: Vec::new(),
            requests_started: 0,
            requests_deferred: 0,
        })
    }

    pub fn pending_mipmaps(&self) -> usize {
        self.pending_mipmaps.len()
    }

    pub fn requests_started(&self) -> u64 {
        self.requests_started
    }

    pub fn requests_deferred(&self) -> u64 {
        self.requests_deferred
    }

    /// Records the frame's reprojections, then every pending mipmap chain, into `encoder` and
    /// reports each step complete. Results become visible at the next `update_imagery`, after this
    /// encoder has been submitted.
    pub fn encode(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        reprojections: Vec<QueuedReprojection<ReprojectionCommand>>,
    ) -> EncodedImageryWork {
        let mut work = EncodedImageryWork::default();
        for QueuedReprojection { ticket, command } in reprojections {
            let texture = self.reprojector.encode(&self.device, encoder, &command);
            self.sink
                .complete(ticket, StepOutput::Texture(Arc::new(texture)));
            work.reprojections += 1;
        }
        for (ticket, texture) in self.pending_mipmaps.drain(..) {
            self.mipmap_generator
                .generate(&self.device, encoder, &texture);
            self.sink.complete(ticket, StepOutput::MipmapsGenerated);
            work.mipmaps += 1;
        }
        if work != EncodedImageryWork::default() {
            tracing::debug!(
                reprojections = work.reprojections,
                mipmaps = work.mipmaps,
                "imagery GPU work encoded"
            );
        }
        work
    }
}

impl ImageryBackend for GpuImageryBackend {
    type Texture = Arc<GpuTexture>;
    type Command = ReprojectionCommand;

    fn request_imagery(&mut self, ticket: ImageryTicket, request: ImageryRequest) -> Dispatch {
        let ImageryRequest {
            url,
            headers,
            params,
        } = request;
        let operation = FetchOperation::new(url, Some(headers), Some(params));
        let sink = self.sink.clone();
        operation.on_complete(move |outcome| {
            let output = match outcome {
                FetchOutcome::Completed(bytes) => StepOutput::Image(bytes),
                FetchOutcome::Cancelled => {
                    StepOutput::Failed(ImageryError::Fetch("request cancelled".to_owned()))
                }
                FetchOutcome::Failed { error, .. } => {
                    StepOutput::Failed(ImageryError::Fetch(error.to_string()))
                }
            };
            sink.complete(ticket, output);
        });
        match operation.enqueue(&self.fetch_queue) {
            Ok(()) => {
                self.requests_started += 1;
                Dispatch::Started
            }
            Err(QueueError::Full) => {
                self.requests_deferred += 1;
                tracing::trace!(url = operation.url(), "fetch queue full, request deferred");
                Dispatch::Deferred
            }
            Err(error) => {
                self.sink.complete(
                    ticket,
                    StepOutput::Failed(ImageryError::Fetch(error.to_string())),
                );
                Dispatch::Started
            }
        }
    }

    fn create_texture(&mut self, ticket: ImageryTicket, image: Vec<u8>) {
        let sent = self
            .decode_sender
            .as_ref()
            .is_some_and(|sender| sender.send(DecodeJob { ticket, image }).is_ok());
        if !sent {
            self.sink.complete(
                ticket,
                StepOutput::Failed(ImageryError::Upload("decode workers stopped".to_owned())),
            );
        }
    }

    fn reproject_texture(
        &mut self,
        _ticket: ImageryTicket,
        texture: &Arc<GpuTexture>,
        rectangle: Rectangle,
    ) -> Option<ReprojectionCommand> {
        Some(ReprojectionCommand::new(Arc::clone(texture), rectangle, true))
    }

    fn generate_mipmaps(&mut self, ticket: ImageryTicket, texture: &Arc<GpuTexture>) {
        if texture.mip_level_count() <= 1 {
            self.sink.complete(ticket, StepOutput::MipmapsGenerated);
            return;
        }
        self.pending_mipmaps.push((ticket, Arc::clone(texture)));
    }
}

impl Drop for GpuImageryBackend {
    fn drop(&mut self) {
        self.decode_sender = None;
        for handle in self.decode_workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("imagery decode worker panicked");
            }
        }
    }
}

fn decode_worker_loop(
    receiver: Receiver<DecodeJob>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    sink: CompletionSink<Arc<GpuTexture>>,
) {
    let max_dimension = device.limits().max_texture_dimension_2d;
    for DecodeJob { ticket, image } in receiver {
        let output = match decode_rgba8(&image) {
            Ok((width, height, _)) if width.max(height) > max_dimension => {
                StepOutput::Failed(ImageryError::Upload(format!(
                    "image {width}x{height} exceeds the device limit of {max_dimension}"
                )))
            }
            Ok((width, height, pixels)) => {
                let texture =
                    GpuTexture::from_rgba8(&device, &queue, "imagery.tile", width, height, &pixels, true);
                StepOutput::Texture(Arc::new(texture))
            }
            Err(error) => StepOutput::Failed(error),
        };
        sink.complete(ticket, output);
    }
}

/// Decodes PNG or JPEG bytes into tightly packed RGBA8.
pub fn decode_rgba8(bytes: &[u8]) -> Result<(u32, u32, Vec<u8>), ImageryError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|error| ImageryError::Decode(error.to_string()))?
        .to_rgba8();
    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(ImageryError::Decode(format!(
            "image has empty size {width}x{height}"
        )));
    }
    Ok((width, height, decoded.into_raw()))
}
