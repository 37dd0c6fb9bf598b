//! Video device SPI implementation backed by render surfaces
//!
//! The media pipeline calls into [`RenderFactory`] and [`RenderStream`] on its
//! own threads. Each stream owns one [`RenderSurface`]; the surface is announced
//! to the GUI thread as soon as it exists and retracted when the stream is
//! destroyed.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use crate::dispatch::{UiMessage, UiSender};
use crate::media::{FourCc, MediaDirection, MediaFormat};
use crate::stack::WindowHandle;
use crate::stack::spi::{
    CapValue, DevCap, VidDevError, VidDevResult, VideoDevFactory, VideoDevInfo, VideoDevParam, VideoDevStream,
};

use super::SurfaceNotice;
use super::surface::{RenderSurface, pixel_format_for};

/// Driver name the render device reports
pub const RENDER_DRIVER_NAME: &str = "Bridge";
/// Name of the single render device
pub const RENDER_DEVICE_NAME: &str = "Surface renderer";

const DEFAULT_CLOCK_RATE: u32 = 90_000;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 25;

/// Render backend exposing a single playback device
pub struct RenderFactory {
    ui: UiSender,
    info: RwLock<Option<VideoDevInfo>>,
}

impl RenderFactory {
    pub fn new(ui: UiSender) -> Self {
        Self {
            ui,
            info: RwLock::new(None),
        }
    }

    fn describe() -> VideoDevInfo {
        let formats = [FourCc::BGRA, FourCc::RGBA, FourCc::RGB24]
            .into_iter()
            .map(|id| MediaFormat::video(id, DEFAULT_WIDTH, DEFAULT_HEIGHT, DEFAULT_FPS, 1))
            .collect();
        VideoDevInfo {
            name: RENDER_DEVICE_NAME.to_string(),
            driver: RENDER_DRIVER_NAME.to_string(),
            dir: MediaDirection::PLAYBACK,
            has_callback: false,
            caps: vec![DevCap::Format, DevCap::OutputHide],
            formats,
        }
    }

    fn checked_info(&self, index: usize) -> VidDevResult<VideoDevInfo> {
        if index >= self.device_count() {
            return Err(VidDevError::InvalidDevice);
        }
        self.info.read().clone().ok_or(VidDevError::InvalidOperation)
    }
}

impl VideoDevFactory for RenderFactory {
    fn init(&self) -> VidDevResult<()> {
        *self.info.write() = Some(Self::describe());
        info!("Render device initialized ({} device)", self.device_count());
        Ok(())
    }

    fn destroy(&self) -> VidDevResult<()> {
        *self.info.write() = None;
        debug!("Render device destroyed");
        Ok(())
    }

    fn device_count(&self) -> usize {
        1
    }

    fn device_info(&self, index: usize) -> VidDevResult<VideoDevInfo> {
        self.checked_info(index)
    }

    fn default_param(&self, index: usize) -> VidDevResult<VideoDevParam> {
        let info = self.checked_info(index)?;
        Ok(VideoDevParam {
            dir: MediaDirection::PLAYBACK,
            capture_id: None,
            render_id: Some(index),
            clock_rate: DEFAULT_CLOCK_RATE,
            format: info.formats.first().copied(),
            window: WindowHandle::None,
        })
    }

    fn create_stream(&self, param: &VideoDevParam) -> VidDevResult<Box<dyn VideoDevStream>> {
        if param.dir != MediaDirection::PLAYBACK {
            return Err(VidDevError::InvalidArgument);
        }

        let surface = RenderSurface::new(self.ui.clone());
        let mut stream = RenderStream {
            param: VideoDevParam {
                format: None,
                window: WindowHandle::Surface(surface.id()),
                ..param.clone()
            },
            frame_len: 0,
            running: false,
            retracted: false,
            surface,
            ui: self.ui.clone(),
        };
        self.ui
            .post(UiMessage::Surface(SurfaceNotice::Created(stream.surface.clone())));

        if let Some(format) = param.format {
            if let Err(err) = stream.set_cap(CapValue::Format(format)) {
                warn!(surface = %stream.surface.id(), format = %format.id, "Initial format rejected: {}", err);
            }
        }

        info!(surface = %stream.surface.id(), "Render stream created");
        Ok(Box::new(stream))
    }

    fn refresh(&self) -> VidDevResult<()> {
        Ok(())
    }
}

/// One render stream, writing into its own surface
pub struct RenderStream {
    param: VideoDevParam,
    frame_len: usize,
    running: bool,
    retracted: bool,
    surface: Arc<RenderSurface>,
    ui: UiSender,
}

impl RenderStream {
    fn retract(&mut self) {
        if self.retracted {
            return;
        }
        self.halt();
        self.retracted = true;
        let id = self.surface.id();
        self.ui.post(UiMessage::Surface(SurfaceNotice::Destroyed(id)));
        info!(surface = %id, "Render stream destroyed");
    }

    fn halt(&mut self) {
        if self.running {
            self.running = false;
            self.surface.put_frame(None);
            debug!(surface = %self.surface.id(), "Render stream stopped");
        }
    }
}

impl VideoDevStream for RenderStream {
    fn param(&self) -> VidDevResult<VideoDevParam> {
        Ok(self.param.clone())
    }

    fn cap(&self, cap: DevCap) -> VidDevResult<CapValue> {
        match cap {
            DevCap::Format => self
                .param
                .format
                .map(CapValue::Format)
                .ok_or(VidDevError::InvalidOperation),
            _ => Err(VidDevError::InvalidCapability),
        }
    }

    fn set_cap(&mut self, value: CapValue) -> VidDevResult<()> {
        match value {
            CapValue::Format(format) => {
                let pixel_format = pixel_format_for(format.id).ok_or(VidDevError::BadFormat)?;
                let (width, height) = format.video_size().ok_or(VidDevError::BadFormat)?;
                if width == 0 || height == 0 {
                    return Err(VidDevError::BadFormat);
                }
                if !self.surface.set_format(&format) {
                    return Err(VidDevError::BadFormat);
                }
                self.frame_len = width as usize * height as usize * pixel_format.bytes_per_pixel();
                self.param.format = Some(format);
                Ok(())
            }
            // The pipeline toggles visibility on its own schedule; the GUI decides
            CapValue::OutputHide(_) => Ok(()),
        }
    }

    fn start(&mut self) -> VidDevResult<()> {
        self.running = true;
        info!(surface = %self.surface.id(), "Render stream started");
        Ok(())
    }

    fn stop(&mut self) -> VidDevResult<()> {
        self.halt();
        Ok(())
    }

    fn put_frame(&mut self, frame: &[u8]) -> VidDevResult<()> {
        if !self.running {
            return Err(VidDevError::InvalidOperation);
        }
        if frame.is_empty() || frame.len() < self.frame_len {
            trace!(surface = %self.surface.id(), len = frame.len(), "Skipping incomplete frame");
            return Ok(());
        }
        if self.surface.put_frame(Some(frame)) {
            Ok(())
        } else {
            Err(VidDevError::Failed)
        }
    }

    fn destroy(mut self: Box<Self>) -> VidDevResult<()> {
        self.retract();
        Ok(())
    }
}

impl Drop for RenderStream {
    fn drop(&mut self) {
        self.retract();
    }
}
