//! Video device service provider interface
//!
//! The media pipeline drives rendering backends through a factory and a
//! per-stream object. Frames are pushed with [`VideoDevStream::put_frame`]
//! on the pipeline's own media thread; implementations must not block it
//! beyond copying the frame.

use thiserror::Error;

use crate::media::{MediaDirection, MediaFormat};

use super::WindowHandle;

/// Errors a video device reports back to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VidDevError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("invalid device index")]
    InvalidDevice,
    #[error("unsupported capability")]
    InvalidCapability,
    #[error("unsupported format")]
    BadFormat,
    #[error("operation not valid in the current stream state")]
    InvalidOperation,
    #[error("device failure")]
    Failed,
}

/// Result of a video device operation
pub type VidDevResult<T> = Result<T, VidDevError>;

/// Device capabilities the pipeline can query or set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DevCap {
    Format,
    OutputHide,
    OutputPosition,
}

/// Value carried by a capability get/set
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CapValue {
    Format(MediaFormat),
    OutputHide(bool),
}

impl CapValue {
    /// Capability this value belongs to
    pub fn cap(&self) -> DevCap {
        match self {
            Self::Format(_) => DevCap::Format,
            Self::OutputHide(_) => DevCap::OutputHide,
        }
    }
}

/// Static description of one device of a factory
#[derive(Debug, Clone, PartialEq)]
pub struct VideoDevInfo {
    pub name: String,
    pub driver: String,
    /// Capture for cameras, playback for renderers
    pub dir: MediaDirection,
    pub has_callback: bool,
    pub caps: Vec<DevCap>,
    pub formats: Vec<MediaFormat>,
}

/// Parameters a stream is opened with
#[derive(Debug, Clone, PartialEq)]
pub struct VideoDevParam {
    pub dir: MediaDirection,
    pub capture_id: Option<usize>,
    pub render_id: Option<usize>,
    pub clock_rate: u32,
    /// Requested format; `None` leaves the device default in place
    pub format: Option<MediaFormat>,
    /// Window the stream renders into, filled in by the device
    pub window: WindowHandle,
}

/// A rendering or capture backend
pub trait VideoDevFactory: Send + Sync {
    fn init(&self) -> VidDevResult<()>;
    fn destroy(&self) -> VidDevResult<()>;
    fn device_count(&self) -> usize;
    fn device_info(&self, index: usize) -> VidDevResult<VideoDevInfo>;
    fn default_param(&self, index: usize) -> VidDevResult<VideoDevParam>;
    fn create_stream(&self, param: &VideoDevParam) -> VidDevResult<Box<dyn VideoDevStream>>;
    fn refresh(&self) -> VidDevResult<()>;
}

/// One open stream of a [`VideoDevFactory`]
pub trait VideoDevStream: Send {
    fn param(&self) -> VidDevResult<VideoDevParam>;
    fn cap(&self, cap: DevCap) -> VidDevResult<CapValue>;
    fn set_cap(&mut self, value: CapValue) -> VidDevResult<()>;
    fn start(&mut self) -> VidDevResult<()>;
    fn stop(&mut self) -> VidDevResult<()>;
    fn put_frame(&mut self, frame: &[u8]) -> VidDevResult<()>;
    fn destroy(self: Box<Self>) -> VidDevResult<()>;
}
