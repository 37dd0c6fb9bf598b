//! Pixel buffer shared between the media thread and the GUI thread

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::dispatch::{UiMessage, UiSender};
use crate::media::{FourCc, MediaFormat};

use super::SurfaceNotice;

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a render surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl SurfaceId {
    fn next() -> Self {
        Self(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

/// Local pixel layouts a surface can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 32-bit, bytes B G R A in memory
    Argb32,
    /// 32-bit, bytes R G B A in memory
    Rgba8888,
    /// 24-bit, bytes R G B in memory
    Rgb888,
}

impl PixelFormat {
    /// Bytes per pixel
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Argb32 | Self::Rgba8888 => 4,
            Self::Rgb888 => 3,
        }
    }
}

const FORMAT_TABLE: &[(FourCc, PixelFormat)] = &[
    (FourCc::BGRA, PixelFormat::Argb32),
    (FourCc::RGBA, PixelFormat::Rgba8888),
    (FourCc::RGB24, PixelFormat::Rgb888),
];

/// Local pixel format for a pipeline format id
pub fn pixel_format_for(id: FourCc) -> Option<PixelFormat> {
    FORMAT_TABLE
        .iter()
        .find(|(fourcc, _)| *fourcc == id)
        .map(|(_, format)| *format)
}

/// One frame as painted by a widget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Paint target of a widget
pub trait Painter {
    /// Blit a frame scaled into the widget area
    fn draw_frame(&mut self, frame: &VideoFrame);
    /// Paint the blank (transparent) background
    fn fill_blank(&mut self);
}

#[derive(Debug, Default)]
struct SurfaceState {
    format: Option<PixelFormat>,
    size: (u32, u32),
    frame: Option<VideoFrame>,
    generation: u64,
}

/// Pixel buffer fed by a render stream and painted by widgets
///
/// The buffer lock is held only for the copy in [`put_frame`](Self::put_frame)
/// and the read in [`paint`](Self::paint); notifications are posted after it
/// is released.
pub struct RenderSurface {
    id: SurfaceId,
    state: Mutex<SurfaceState>,
    ui: UiSender,
}

impl RenderSurface {
    pub(crate) fn new(ui: UiSender) -> Arc<Self> {
        let surface = Arc::new(Self {
            id: SurfaceId::next(),
            state: Mutex::new(SurfaceState::default()),
            ui,
        });
        debug!(surface = %surface.id, "Render surface created");
        surface
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    /// Frame geometry of the current format
    pub fn frame_size(&self) -> (u32, u32) {
        self.state.lock().size
    }

    pub fn pixel_format(&self) -> Option<PixelFormat> {
        self.state.lock().format
    }

    /// Frame generation; bumped by every frame write or clear
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn has_frame(&self) -> bool {
        self.state.lock().frame.is_some()
    }

    /// Copy a frame into the surface, or clear it with `None`
    ///
    /// Called on the media thread. Without a configured format the frame is
    /// dropped and the call still succeeds. Returns false only when the
    /// buffer is too short for the configured geometry.
    pub fn put_frame(&self, frame: Option<&[u8]>) -> bool {
        {
            let mut state = self.state.lock();
            let Some(format) = state.format else {
                return true;
            };
            match frame {
                Some(buf) => {
                    let (width, height) = state.size;
                    let needed = width as usize * height as usize * format.bytes_per_pixel();
                    if buf.len() < needed {
                        return false;
                    }
                    state.frame = Some(VideoFrame {
                        format,
                        width,
                        height,
                        data: buf[..needed].to_vec(),
                    });
                }
                None => state.frame = None,
            }
            state.generation += 1;
        }
        self.ui
            .post(UiMessage::Surface(SurfaceNotice::FrameChanged(self.id)));
        true
    }

    /// Switch to the local equivalent of a pipeline format
    ///
    /// Unknown format ids and non-video formats are rejected and leave the
    /// surface untouched.
    pub fn set_format(&self, format: &MediaFormat) -> bool {
        let Some(pixel_format) = pixel_format_for(format.id) else {
            warn!(surface = %self.id, format = %format.id, "Unsupported pixel format");
            return false;
        };
        let Some(size) = format.video_size() else {
            warn!(surface = %self.id, "Not a video format");
            return false;
        };
        {
            let mut state = self.state.lock();
            state.format = Some(pixel_format);
            state.size = size;
        }
        trace!(surface = %self.id, ?pixel_format, width = size.0, height = size.1, "Surface format changed");
        self.ui
            .post(UiMessage::Surface(SurfaceNotice::FormatChanged(self.id)));
        true
    }

    /// Paint the current frame, or blank when there is none
    pub fn paint(&self, painter: &mut dyn Painter) {
        let state = self.state.lock();
        match &state.frame {
            Some(frame) => painter.draw_frame(frame),
            None => painter.fill_blank(),
        }
    }
}

impl fmt::Debug for RenderSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderSurface").field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ui_channel;

    #[derive(Default)]
    struct RecordingPainter {
        frames: Vec<VideoFrame>,
        blanks: usize,
    }

    impl Painter for RecordingPainter {
        fn draw_frame(&mut self, frame: &VideoFrame) {
            self.frames.push(frame.clone());
        }

        fn fill_blank(&mut self) {
            self.blanks += 1;
        }
    }

    #[test]
    fn test_format_table() {
        assert_eq!(pixel_format_for(FourCc::BGRA), Some(PixelFormat::Argb32));
        assert_eq!(pixel_format_for(FourCc::RGBA), Some(PixelFormat::Rgba8888));
        assert_eq!(pixel_format_for(FourCc::RGB24), Some(PixelFormat::Rgb888));
        assert_eq!(pixel_format_for(FourCc::I420), None);
    }

    #[test]
    fn test_unknown_format_leaves_surface_untouched() {
        let (ui, mut rx) = ui_channel();
        let surface = RenderSurface::new(ui);
        assert!(surface.set_format(&MediaFormat::video(FourCc::BGRA, 2, 2, 25, 1)));
        assert!(!surface.set_format(&MediaFormat::video(FourCc::I420, 640, 480, 25, 1)));
        assert_eq!(surface.pixel_format(), Some(PixelFormat::Argb32));
        assert_eq!(surface.frame_size(), (2, 2));

        // Only the accepted change was announced
        assert!(matches!(
            rx.try_recv(),
            Some(UiMessage::Surface(SurfaceNotice::FormatChanged(_)))
        ));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_clear_paints_blank() {
        let (ui, _rx) = ui_channel();
        let surface = RenderSurface::new(ui);
        surface.set_format(&MediaFormat::video(FourCc::RGB24, 2, 1, 25, 1));
        assert!(surface.put_frame(Some(&[1, 2, 3, 4, 5, 6])));

        let mut painter = RecordingPainter::default();
        surface.paint(&mut painter);
        assert_eq!(painter.frames.len(), 1);
        assert_eq!(painter.frames[0].data, vec![1, 2, 3, 4, 5, 6]);

        assert!(surface.put_frame(None));
        surface.paint(&mut painter);
        assert_eq!(painter.blanks, 1);
        assert_eq!(surface.generation(), 2);
    }

    #[test]
    fn test_frame_without_format_is_dropped() {
        let (ui, mut rx) = ui_channel();
        let surface = RenderSurface::new(ui);
        assert!(surface.put_frame(Some(&[0; 16])));
        assert!(!surface.has_frame());
        assert_eq!(surface.generation(), 0);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_short_frame_rejected() {
        let (ui, _rx) = ui_channel();
        let surface = RenderSurface::new(ui);
        surface.set_format(&MediaFormat::video(FourCc::BGRA, 4, 4, 25, 1));
        assert!(!surface.put_frame(Some(&[0; 10])));
        assert!(!surface.has_frame());
    }
}
