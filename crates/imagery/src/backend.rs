use crossbeam_channel::Sender;
use geodesy::Rectangle;

use crate::{ImageryError, ImageryId, ImageryRequest, ImageryStep, LayerId, TileKey};

/// Names the tile and step an asynchronous result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageryTicket {
    pub layer: LayerId,
    pub imagery: ImageryId,
    pub key: TileKey,
    pub step: ImageryStep,
}

#[derive(Debug)]
pub enum StepOutput<T> {
    Image(Vec<u8>),
    Texture(T),
    MipmapsGenerated,
    Failed(ImageryError),
}

#[derive(Debug)]
pub struct ImageryCompletion<T> {
    pub ticket: ImageryTicket,
    pub output: StepOutput<T>,
}

/// Sending half of the completion channel; clone it into worker threads.
#[derive(Debug)]
pub struct CompletionSink<T> {
    sender: Sender<ImageryCompletion<T>>,
}

impl<T> Clone for CompletionSink<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> CompletionSink<T> {
    pub(crate) fn new(sender: Sender<ImageryCompletion<T>>) -> Self {
        Self { sender }
    }

    pub fn complete(&self, ticket: ImageryTicket, output: StepOutput<T>) {
        if self
            .sender
            .send(ImageryCompletion { ticket, output })
            .is_err()
        {
            tracing::trace!(?ticket, "imagery completion dropped, collection is gone");
        }
    }
}

/// Whether the backend accepted a request this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Started,
    /// Try again next frame; the tile stays where it was.
    Deferred,
}

/// Performs the slow steps of the tile pipeline. Every started step must eventually report through
/// the collection's [`CompletionSink`], except reprojection, which reports when its queued command
/// has executed.
pub trait ImageryBackend {
    type Texture;
    type Command;

    fn request_imagery(&mut self, ticket: ImageryTicket, request: ImageryRequest) -> Dispatch;

    fn create_texture(&mut self, ticket: ImageryTicket, image: Vec<u8>);

    /// `None` when the texture already matches the globe's geographic layout.
    fn reproject_texture(
        &mut self,
        ticket: ImageryTicket,
        texture: &Self::Texture,
        rectangle: Rectangle,
    ) -> Option<Self::Command>;

    fn generate_mipmaps(&mut self, ticket: ImageryTicket, texture: &Self::Texture);
}

/// A reprojection moved into the frame's command list.
#[derive(Debug)]
pub struct QueuedReprojection<C> {
    pub ticket: ImageryTicket,
    pub command: C,
}
