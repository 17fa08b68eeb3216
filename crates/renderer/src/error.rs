use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ContextError {
    #[error("no compatible graphics adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("graphics device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("render target size {width}x{height} is empty")]
    EmptyTarget { width: u32, height: u32 },
}
