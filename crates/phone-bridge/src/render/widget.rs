//! GUI-side arena of surfaces and the widgets painting them

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::call::CallId;

use super::surface::{Painter, RenderSurface, SurfaceId};
use super::SurfaceNotice;

/// Handle to a widget in the [`RenderHub`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WidgetId(u64);

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "widget-{}", self.0)
    }
}

/// Who a widget is showing video for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetOwner {
    /// Incoming video of a call's media stream
    Call { call: CallId, media_index: usize },
    /// Local preview of a capture device
    Preview { device: usize },
    /// No longer fed by anything
    Detached,
}

/// A view bound to at most one surface
#[derive(Debug)]
pub struct VideoWidget {
    id: WidgetId,
    owner: WidgetOwner,
    surface: Option<SurfaceId>,
    seen_generation: Option<u64>,
    size_hint: (u32, u32),
    repaint_pending: bool,
    repaint_requests: u64,
}

impl VideoWidget {
    pub fn id(&self) -> WidgetId {
        self.id
    }

    pub fn owner(&self) -> WidgetOwner {
        self.owner
    }

    /// Surface currently bound, if any
    pub fn surface(&self) -> Option<SurfaceId> {
        self.surface
    }

    /// Geometry of the bound surface's format
    pub fn size_hint(&self) -> (u32, u32) {
        self.size_hint
    }

    /// Whether a repaint was requested since the last paint
    pub fn needs_repaint(&self) -> bool {
        self.repaint_pending
    }

    /// Number of repaints requested over the widget's lifetime
    pub fn repaint_requests(&self) -> u64 {
        self.repaint_requests
    }

    fn refresh_frame(&mut self, surfaces: &HashMap<SurfaceId, Arc<RenderSurface>>) {
        let generation = self
            .surface
            .and_then(|id| surfaces.get(&id))
            .map_or(0, |s| s.generation());
        if self.seen_generation != Some(generation) {
            self.seen_generation = Some(generation);
            self.repaint_pending = true;
            self.repaint_requests += 1;
        }
    }

    fn refresh_format(&mut self, surfaces: &HashMap<SurfaceId, Arc<RenderSurface>>) {
        self.size_hint = self
            .surface
            .and_then(|id| surfaces.get(&id))
            .map_or((0, 0), |s| s.frame_size());
    }

    fn bind(&mut self, surface: Option<SurfaceId>, surfaces: &HashMap<SurfaceId, Arc<RenderSurface>>) {
        if self.surface != surface {
            trace!(widget = %self.id, ?surface, "Widget surface changed");
            self.surface = surface;
            // A rebind always repaints, even onto a surface at the same generation
            self.seen_generation = None;
            self.refresh_format(surfaces);
            self.refresh_frame(surfaces);
        }
    }
}

/// Surfaces handed over to the GUI thread and the widgets observing them
#[derive(Debug, Default)]
pub struct RenderHub {
    surfaces: HashMap<SurfaceId, Arc<RenderSurface>>,
    widgets: HashMap<WidgetId, VideoWidget>,
    next_widget: u64,
}

impl RenderHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn widget(&self, id: WidgetId) -> Option<&VideoWidget> {
        self.widgets.get(&id)
    }

    pub fn widget_count(&self) -> usize {
        self.widgets.len()
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&Arc<RenderSurface>> {
        self.surfaces.get(&id)
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    /// Paint a widget and clear its pending repaint; false if the widget is unknown
    pub fn paint(&mut self, id: WidgetId, painter: &mut dyn Painter) -> bool {
        let Some(widget) = self.widgets.get_mut(&id) else {
            return false;
        };
        match widget.surface.and_then(|s| self.surfaces.get(&s)) {
            Some(surface) => surface.paint(painter),
            None => painter.fill_blank(),
        }
        widget.repaint_pending = false;
        true
    }

    pub(crate) fn create_widget(&mut self, owner: WidgetOwner) -> WidgetId {
        self.next_widget += 1;
        let id = WidgetId(self.next_widget);
        let mut widget = VideoWidget {
            id,
            owner,
            surface: None,
            seen_generation: None,
            size_hint: (0, 0),
            repaint_pending: false,
            repaint_requests: 0,
        };
        widget.refresh_frame(&self.surfaces);
        self.widgets.insert(id, widget);
        debug!(widget = %id, ?owner, "Video widget created");
        id
    }

    pub(crate) fn remove_widget(&mut self, id: WidgetId) -> Option<VideoWidget> {
        let widget = self.widgets.remove(&id);
        if widget.is_some() {
            debug!(widget = %id, "Video widget destroyed");
        }
        widget
    }

    pub(crate) fn set_owner(&mut self, id: WidgetId, owner: WidgetOwner) {
        if let Some(widget) = self.widgets.get_mut(&id) {
            widget.owner = owner;
        }
    }

    /// Bind or unbind a widget; binding to a surface not handed over yet unbinds
    pub(crate) fn set_widget_surface(&mut self, id: WidgetId, surface: Option<SurfaceId>) {
        let surface = surface.filter(|s| self.surfaces.contains_key(s));
        if let Some(widget) = self.widgets.get_mut(&id) {
            widget.bind(surface, &self.surfaces);
        }
    }

    pub(crate) fn handle_notice(&mut self, notice: SurfaceNotice) {
        match notice {
            SurfaceNotice::Created(surface) => {
                let id = surface.id();
                debug!(surface = %id, "Surface handed over to GUI thread");
                self.surfaces.insert(id, surface);
            }
            SurfaceNotice::FrameChanged(id) => {
                for widget in self.widgets.values_mut().filter(|w| w.surface == Some(id)) {
                    widget.refresh_frame(&self.surfaces);
                }
            }
            SurfaceNotice::FormatChanged(id) => {
                for widget in self.widgets.values_mut().filter(|w| w.surface == Some(id)) {
                    widget.refresh_format(&self.surfaces);
                }
            }
            SurfaceNotice::Destroyed(id) => {
                if self.surfaces.remove(&id).is_some() {
                    debug!(surface = %id, "Surface released");
                }
                for widget in self.widgets.values_mut().filter(|w| w.surface == Some(id)) {
                    widget.bind(None, &self.surfaces);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ui_channel;
    use crate::media::{FourCc, MediaFormat};

    struct CountingPainter {
        frames: usize,
        blanks: usize,
    }

    impl Painter for CountingPainter {
        fn draw_frame(&mut self, _frame: &crate::render::VideoFrame) {
            self.frames += 1;
        }

        fn fill_blank(&mut self) {
            self.blanks += 1;
        }
    }

    #[test]
    fn test_repaint_only_on_new_generation() {
        let (ui, _rx) = ui_channel();
        let surface = RenderSurface::new(ui);
        surface.set_format(&MediaFormat::video(FourCc::RGBA, 1, 1, 25, 1));
        let sid = surface.id();

        let mut hub = RenderHub::new();
        hub.handle_notice(SurfaceNotice::Created(surface.clone()));
        let w = hub.create_widget(WidgetOwner::Preview { device: 0 });
        hub.set_widget_surface(w, Some(sid));
        let after_bind = hub.widget(w).unwrap().repaint_requests();
        assert_eq!(hub.widget(w).unwrap().size_hint(), (1, 1));

        // Same generation announced twice only repaints once
        surface.put_frame(Some(&[1, 2, 3, 4]));
        hub.handle_notice(SurfaceNotice::FrameChanged(sid));
        hub.handle_notice(SurfaceNotice::FrameChanged(sid));
        assert_eq!(hub.widget(w).unwrap().repaint_requests(), after_bind + 1);

        let mut painter = CountingPainter { frames: 0, blanks: 0 };
        assert!(hub.paint(w, &mut painter));
        assert_eq!(painter.frames, 1);
        assert!(!hub.widget(w).unwrap().needs_repaint());
    }

    #[test]
    fn test_destroyed_surface_detaches_widgets() {
        let (ui, _rx) = ui_channel();
        let surface = RenderSurface::new(ui);
        let sid = surface.id();

        let mut hub = RenderHub::new();
        hub.handle_notice(SurfaceNotice::Created(surface));
        let a = hub.create_widget(WidgetOwner::Detached);
        let b = hub.create_widget(WidgetOwner::Detached);
        hub.set_widget_surface(a, Some(sid));
        hub.set_widget_surface(b, Some(sid));

        hub.handle_notice(SurfaceNotice::Destroyed(sid));
        assert_eq!(hub.surface_count(), 0);
        assert_eq!(hub.widget(a).unwrap().surface(), None);
        assert_eq!(hub.widget(b).unwrap().surface(), None);

        let mut painter = CountingPainter { frames: 0, blanks: 0 };
        hub.paint(a, &mut painter);
        assert_eq!(painter.blanks, 1);
    }

    #[test]
    fn test_bind_to_unknown_surface_stays_unbound() {
        let (ui, _rx) = ui_channel();
        let surface = RenderSurface::new(ui);
        let mut hub = RenderHub::new();
        let w = hub.create_widget(WidgetOwner::Detached);
        hub.set_widget_surface(w, Some(surface.id()));
        assert_eq!(hub.widget(w).unwrap().surface(), None);
    }
}
