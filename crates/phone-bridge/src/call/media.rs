//! Media streams, stream properties and playback widgets of a call
//!
//! Stream descriptions are read through from the stack on every query; only
//! property values the stack cannot report back (levels) are cached locally.

use tracing::{debug, error, warn};

use crate::media::{FormatDetails, MediaDirection, MediaStream, MediaType, PropertyValue, StreamProperty};
use crate::phone::PhoneEvent;
use crate::render::{RenderHub, SurfaceId, WidgetId, WidgetOwner};
use crate::stack::{CallHandle, CallMediaInfo, CodecDirection, ConfSlot, StackResult, StreamInfo, VideoStreamOp, WindowHandle};

use super::Call;

const DEFAULT_VOLUME: f32 = 1.0;
const TRANSMIT_STOP_BELOW: f32 = 0.1;
const TRANSMIT_START_ABOVE: f32 = 0.9;

impl Call {
    /// Whether the stack reports any media for the call
    pub fn has_active_media_stream(&self) -> bool {
        self.handle
            .is_some_and(|h| self.ctx.stack.call_has_media(h))
    }

    /// Live streams of the call, optionally only those of one media type
    pub fn media_streams(&self, media_type: Option<MediaType>) -> Vec<MediaStream> {
        let Some(handle) = self.active_handle() else {
            return Vec::new();
        };
        let Ok(info) = self.ctx.stack.call_info(handle) else {
            return Vec::new();
        };
        info.media
            .iter()
            .filter(|m| media_type.is_none_or(|t| t == m.media_type))
            .map(|m| MediaStream {
                media_type: m.media_type,
                dir: m.dir,
                index: m.index,
                state: m.status,
                format: if m.dir.is_none() {
                    None
                } else {
                    self.ctx
                        .stack
                        .stream_info(handle, m.index)
                        .ok()
                        .map(stream_format)
                },
            })
            .collect()
    }

    /// Live description of the stream at `media_index`
    pub fn find_media_stream(&self, media_index: usize) -> Option<MediaStream> {
        self.media_streams(None)
            .into_iter()
            .find(|s| s.index == media_index)
    }

    /// Current value of a stream property in one direction
    ///
    /// `None` when the call is inactive, the index is unknown or the property
    /// is not defined for that stream and direction.
    pub fn media_stream_property(&self, media_index: usize, dir: MediaDirection, property: StreamProperty) -> Option<PropertyValue> {
        let handle = self.active_handle()?;
        let media = self.media_line(handle, media_index)?;
        let single = dir == MediaDirection::CAPTURE || dir == MediaDirection::PLAYBACK;

        match (media.media_type, property) {
            (MediaType::Audio, StreamProperty::Enabled) => {
                let slot = media.conf_slot?;
                let (source, sink) = if dir == MediaDirection::CAPTURE {
                    (ConfSlot::MASTER, slot)
                } else if dir == MediaDirection::PLAYBACK {
                    (slot, ConfSlot::MASTER)
                } else {
                    return None;
                };
                let listeners = self.ctx.stack.conf_listeners(source).ok()?;
                Some(PropertyValue::Bool(listeners.contains(&sink)))
            }
            (MediaType::Video, StreamProperty::Enabled) if single => Some(PropertyValue::Bool(media.dir.contains(dir))),
            (MediaType::Audio | MediaType::Video, StreamProperty::Volume) if single => Some(
                self.property_cache
                    .get(&(media_index, dir, property))
                    .copied()
                    .unwrap_or(PropertyValue::Float(DEFAULT_VOLUME)),
            ),
            _ => None,
        }
    }

    /// Change a stream property
    ///
    /// Setting the value already observed is a no-op that succeeds without
    /// reaching the stack. Levels are remembered only once the stack accepted
    /// them. A failure is reported through the return value and leaves the
    /// call state alone.
    pub fn set_media_stream_property(
        &mut self,
        media_index: usize,
        dir: MediaDirection,
        property: StreamProperty,
        value: PropertyValue,
    ) -> bool {
        if self.media_stream_property(media_index, dir, property) == Some(value) {
            debug!(call_id = %self.id, media = media_index, ?property, "Stream property unchanged");
            return true;
        }
        let Some(handle) = self.active_handle() else {
            warn!(call_id = %self.id, "Cannot change stream property of inactive call");
            return false;
        };
        let Some(media) = self.media_line(handle, media_index) else {
            warn!(call_id = %self.id, media = media_index, "Unknown media index");
            return false;
        };

        debug!(call_id = %self.id, media = media_index, ?dir, ?property, ?value, "Changing stream property");
        let changed = match (media.media_type, property) {
            (MediaType::Audio, StreamProperty::Enabled) => self.set_audio_enabled(&media, dir, value.as_bool()),
            (MediaType::Audio, StreamProperty::Volume) => self.set_audio_level(&media, dir, value),
            (MediaType::Video, StreamProperty::Enabled) => {
                let new_dir = if value.as_bool() {
                    media.dir.with(dir)
                } else {
                    media.dir.without(dir)
                };
                let op = VideoStreamOp::ChangeDirection {
                    media_index,
                    dir: new_dir,
                };
                self.ctx.stack.set_video_stream(handle, op).is_ok()
            }
            (MediaType::Video, StreamProperty::Volume) => self.set_video_transmit(handle, media_index, dir, value),
            (MediaType::Unknown, _) => {
                warn!(call_id = %self.id, media = media_index, "Stream has no adjustable properties");
                return false;
            }
        };

        if changed {
            self.emit(PhoneEvent::CallMediaChanged { call: self.id });
        } else {
            warn!(call_id = %self.id, media = media_index, ?property, "Stream property not changed");
        }
        changed
    }

    /// New widget showing the incoming video of stream `media_index`
    ///
    /// `None` unless the stream is video with a playback direction and its
    /// window is one of this crate's render surfaces.
    pub fn playback_widget(&mut self, media_index: usize, hub: &mut RenderHub) -> Option<WidgetId> {
        let stream = self.find_media_stream(media_index)?;
        if stream.media_type != MediaType::Video || !stream.dir.contains(MediaDirection::PLAYBACK) {
            return None;
        }
        let surface = self.playback_surface(media_index)?;

        let widget = hub.create_widget(WidgetOwner::Call {
            call: self.id,
            media_index,
        });
        hub.set_widget_surface(widget, Some(surface));
        self.playback_widgets.entry(media_index).or_default().push(widget);
        debug!(call_id = %self.id, media = media_index, %widget, "Video playback widget created");
        Some(widget)
    }

    /// Playback widgets currently attached to stream `media_index`
    pub fn playback_widgets(&self, media_index: usize) -> &[WidgetId] {
        self.playback_widgets
            .get(&media_index)
            .map_or(&[], |widgets| widgets.as_slice())
    }

    /// Forget a widget that was destroyed elsewhere
    pub(crate) fn on_playback_widget_destroyed(&mut self, widget: WidgetId) {
        let mut emptied = None;
        for (media_index, widgets) in &mut self.playback_widgets {
            if let Some(pos) = widgets.iter().position(|w| *w == widget) {
                widgets.remove(pos);
                debug!(call_id = %self.id, media = *media_index, %widget, "Video playback widget destroyed");
                if widgets.is_empty() {
                    emptied = Some(*media_index);
                }
                break;
            }
        }
        if let Some(media_index) = emptied {
            self.playback_widgets.remove(&media_index);
        }
    }

    /// Rebind every playback widget to its stream's current surface
    pub(crate) fn update_playback_widgets(&self, hub: &mut RenderHub) {
        for (media_index, widgets) in &self.playback_widgets {
            let surface = self.playback_surface(*media_index);
            for widget in widgets {
                hub.set_widget_surface(*widget, surface);
            }
        }
    }

    fn media_line(&self, handle: CallHandle, media_index: usize) -> Option<CallMediaInfo> {
        let info = self.ctx.stack.call_info(handle).ok()?;
        info.media.into_iter().find(|m| m.index == media_index)
    }

    fn playback_surface(&self, media_index: usize) -> Option<SurfaceId> {
        let handle = self.handle?;
        let window = self.media_line(handle, media_index)?.video_window?;
        match self.ctx.stack.video_window(window) {
            Ok(WindowHandle::Surface(surface)) => Some(surface),
            Ok(WindowHandle::None) => None,
            Ok(other) => {
                error!(call_id = %self.id, media = media_index, window = ?other, "Incompatible render device type");
                None
            }
            Err(err) => {
                error!(call_id = %self.id, media = media_index, status = %err, "Failed to get video playback window info");
                None
            }
        }
    }

    fn set_audio_enabled(&self, media: &CallMediaInfo, dir: MediaDirection, enabled: bool) -> bool {
        let Some(slot) = media.conf_slot else {
            return false;
        };
        let stack = &self.ctx.stack;
        let wire = |source: ConfSlot, sink: ConfSlot| -> StackResult<()> {
            if enabled {
                stack.conf_connect(source, sink)
            } else {
                stack.conf_disconnect(source, sink)
            }
        };

        let mut ok = true;
        if dir.contains(MediaDirection::CAPTURE) {
            ok &= wire(ConfSlot::MASTER, slot).is_ok();
        }
        if dir.contains(MediaDirection::PLAYBACK) {
            ok &= wire(slot, ConfSlot::MASTER).is_ok();
        }
        ok
    }

    fn set_audio_level(&mut self, media: &CallMediaInfo, dir: MediaDirection, value: PropertyValue) -> bool {
        let Some(slot) = media.conf_slot else {
            return false;
        };
        let level = value.as_f32();

        let mut ok = true;
        if dir.contains(MediaDirection::CAPTURE) {
            if self.ctx.stack.adjust_tx_level(slot, level).is_ok() {
                self.cache_property(media.index, MediaDirection::CAPTURE, StreamProperty::Volume, value);
            } else {
                ok = false;
            }
        }
        if dir.contains(MediaDirection::PLAYBACK) {
            if self.ctx.stack.adjust_rx_level(slot, level).is_ok() {
                self.cache_property(media.index, MediaDirection::PLAYBACK, StreamProperty::Volume, value);
            } else {
                ok = false;
            }
        }
        ok
    }

    fn set_video_transmit(&mut self, handle: CallHandle, media_index: usize, dir: MediaDirection, value: PropertyValue) -> bool {
        let level = value.as_f32();
        let op = if level < TRANSMIT_STOP_BELOW {
            VideoStreamOp::StopTransmit { media_index, dir }
        } else if level > TRANSMIT_START_ABOVE {
            VideoStreamOp::StartTransmit { media_index, dir }
        } else {
            debug!(call_id = %self.id, media = media_index, level, "Video level between thresholds, nothing to do");
            return false;
        };

        if self.ctx.stack.set_video_stream(handle, op).is_err() {
            return false;
        }
        for single in [MediaDirection::CAPTURE, MediaDirection::PLAYBACK] {
            if dir.contains(single) {
                self.cache_property(media_index, single, StreamProperty::Volume, value);
            }
        }
        true
    }

    fn cache_property(&mut self, media_index: usize, dir: MediaDirection, property: StreamProperty, value: PropertyValue) {
        self.property_cache.insert((media_index, dir, property), value);
    }
}

fn stream_format(info: StreamInfo) -> FormatDetails {
    match info {
        StreamInfo::Audio { format } => FormatDetails::Audio(format),
        StreamInfo::Video {
            direction: CodecDirection::Encoding,
            encoder,
            ..
        } => FormatDetails::Video(encoder),
        StreamInfo::Video {
            direction: CodecDirection::Decoding,
            decoder,
            ..
        } => FormatDetails::Video(decoder),
    }
}
