//! Render surface bridge
//!
//! Connects the media pipeline's pull-based frame delivery to GUI-owned views:
//!
//! - [`RenderSurface`]: pixel buffer written on the media thread, read on the GUI thread
//! - [`RenderHub`] and [`VideoWidget`]: the GUI-side arena of surfaces and the
//!   widgets that paint them
//! - [`RenderFactory`] / [`RenderStream`]: the video device SPI implementation
//!   the pipeline drives
//!
//! Surfaces are created on whatever thread opens a stream and reach the GUI
//! thread only through a [`SurfaceNotice::Created`] message; no widget can bind
//! a surface before that message has been handled.

mod device;
mod surface;
mod widget;

use std::sync::Arc;

pub use device::{RENDER_DEVICE_NAME, RENDER_DRIVER_NAME, RenderFactory, RenderStream};
pub use surface::{Painter, PixelFormat, RenderSurface, SurfaceId, VideoFrame, pixel_format_for};
pub use widget::{RenderHub, VideoWidget, WidgetId, WidgetOwner};

/// Cross-thread surface notification, handled by [`RenderHub`]
#[derive(Debug)]
pub enum SurfaceNotice {
    /// A new surface, handed over to the GUI thread
    Created(Arc<RenderSurface>),
    /// The surface's frame changed (new frame or cleared)
    FrameChanged(SurfaceId),
    /// The surface's pixel format or geometry changed
    FormatChanged(SurfaceId),
    /// The owning stream was destroyed
    Destroyed(SurfaceId),
}
