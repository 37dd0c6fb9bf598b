//! Device enumeration and video preview

use tracing::{debug, info, warn};

use crate::error::{PhoneError, PhoneResult};
use crate::media::{MediaDirection, MediaType, SipDevice};
use crate::render::{RENDER_DEVICE_NAME, WidgetId, WidgetOwner};
use crate::stack::AudioDevInfo;
use crate::stack::spi::VideoDevInfo;
use crate::worker::SipTask;

use super::{Phone, PhoneEvent, Preview, StackState};

impl Phone {
    /// Re-read the device list from the stack
    ///
    /// Only done while the stack is up, no call exists and no preview is
    /// running. Returns true and emits `DevicesChanged` when the list changed.
    pub fn update_available_devices(&mut self) -> bool {
        if self.stack_state != StackState::Up || !self.stack.enum_calls().is_empty() || !self.previews.is_empty() {
            debug!("Device list update skipped");
            return false;
        }

        let mut devices = Vec::new();
        match self.stack.refresh_audio_devices().and_then(|()| self.stack.enum_audio_devices()) {
            Ok(audio) => {
                info!(count = audio.len(), "Found audio devices");
                devices.extend(audio.iter().enumerate().map(|(index, info)| audio_device(index, info)));
            }
            Err(status) => warn!(status = %status, "Failed to enumerate audio devices"),
        }
        match self.stack.refresh_video_devices().and_then(|()| self.stack.enum_video_devices()) {
            Ok(video) => {
                info!(count = video.len(), "Found video devices");
                // Devices without formats cannot be opened
                devices.extend(
                    video
                        .iter()
                        .enumerate()
                        .filter(|(_, info)| !info.formats.is_empty())
                        .map(|(index, info)| video_device(index, info)),
                );
            }
            Err(status) => warn!(status = %status, "Failed to enumerate video devices"),
        }
        devices.sort();
        for device in &devices {
            debug!(media_type = ?device.media_type, index = device.index, name = %device.name, dir = ?device.dir, formats = device.formats.len(), "Device");
        }

        if same_devices(&self.devices, &devices) {
            return false;
        }
        self.devices = devices;
        self.emit(PhoneEvent::DevicesChanged);
        true
    }

    pub fn find_device_by_index(&self, media_type: MediaType, index: usize) -> Option<SipDevice> {
        self.devices
            .iter()
            .find(|d| d.media_type == media_type && d.index == index)
            .cloned()
    }

    pub fn find_device_by_name(&self, media_type: MediaType, name: &str) -> Option<SipDevice> {
        self.devices
            .iter()
            .find(|d| d.media_type == media_type && d.name == name)
            .cloned()
    }

    /// Device used when none is chosen explicitly
    ///
    /// Video playback always goes to the bridge's render device; otherwise
    /// the lowest-index device supporting `dir` is chosen.
    pub fn default_device(&self, media_type: MediaType, dir: MediaDirection) -> Option<SipDevice> {
        if media_type == MediaType::Video && dir == MediaDirection::PLAYBACK {
            return self.find_device_by_name(MediaType::Video, RENDER_DEVICE_NAME);
        }
        self.available_devices(media_type, dir).into_iter().next()
    }

    /// Devices of `media_type` supporting every direction in `dir`, by index
    pub fn available_devices(&self, media_type: MediaType, dir: MediaDirection) -> Vec<SipDevice> {
        self.devices
            .iter()
            .filter(|d| d.media_type == media_type && d.dir.contains(dir))
            .cloned()
            .collect()
    }

    pub fn is_audio_calls_available(&self) -> bool {
        self.is_calls_available() && self.devices.iter().any(|d| d.media_type == MediaType::Audio)
    }

    pub fn is_video_calls_available(&self) -> bool {
        self.is_audio_calls_available() && self.devices.iter().any(|d| d.media_type == MediaType::Video)
    }

    /// New widget showing the local preview of a capture device
    ///
    /// The first widget for a device starts the preview on the worker; the
    /// widget stays blank until the preview surface is handed over.
    pub fn start_video_preview(&mut self, device: &SipDevice) -> PhoneResult<WidgetId> {
        if !self.is_calls_available() {
            return Err(PhoneError::invalid_state("stack is not running"));
        }
        if device.media_type != MediaType::Video
            || !device.dir.contains(MediaDirection::CAPTURE)
            || !self.devices.contains(device)
        {
            return Err(PhoneError::DeviceNotFound {
                device: device.name.clone(),
            });
        }
        if self.previews.get(&device.index).is_some_and(|p| p.stopping) {
            return Err(PhoneError::invalid_state(format!(
                "preview of {} is still stopping",
                device.name
            )));
        }

        if !self.previews.contains_key(&device.index) {
            let render = self
                .default_device(MediaType::Video, MediaDirection::PLAYBACK)
                .ok_or_else(|| PhoneError::DeviceNotFound {
                    device: RENDER_DEVICE_NAME.to_string(),
                })?;
            if !self.worker.start_task(SipTask::start_preview(device.index, render.index)) {
                return Err(PhoneError::ShuttingDown);
            }
            self.previews.insert(device.index, Preview::default());
        }

        let widget = self.hub.create_widget(WidgetOwner::Preview { device: device.index });
        if let Some(preview) = self.previews.get_mut(&device.index) {
            preview.widgets.push(widget);
            self.hub.set_widget_surface(widget, preview.surface);
        }
        Ok(widget)
    }

    /// Release a preview widget; releasing the last one stops the preview
    ///
    /// The widget keeps showing the preview until the preview surface goes away.
    pub fn stop_video_preview(&mut self, widget: WidgetId) {
        let Some(WidgetOwner::Preview { device }) = self.hub.widget(widget).map(|w| w.owner()) else {
            return;
        };
        self.hub.set_owner(widget, WidgetOwner::Detached);

        let hub = &self.hub;
        let Some(preview) = self.previews.get_mut(&device) else {
            return;
        };
        let still_held = preview.widgets.iter().any(|w| {
            hub.widget(*w)
                .is_some_and(|w| w.owner() == WidgetOwner::Preview { device })
        });
        if still_held || preview.stopping {
            return;
        }

        preview.stopping = true;
        if !self.worker.start_task(SipTask::stop_preview(device)) {
            warn!(capture_dev = device, "Worker is shutting down, preview not stopped");
        }
    }
}

fn audio_device(index: usize, info: &AudioDevInfo) -> SipDevice {
    let dir = match (info.input_count > 0, info.output_count > 0) {
        (true, true) => MediaDirection::CAPTURE_AND_PLAYBACK,
        (true, false) => MediaDirection::CAPTURE,
        (false, true) => MediaDirection::PLAYBACK,
        (false, false) => MediaDirection::NONE,
    };
    SipDevice {
        media_type: MediaType::Audio,
        dir,
        index,
        name: info.name.clone(),
        formats: info.formats.clone(),
    }
}

fn video_device(index: usize, info: &VideoDevInfo) -> SipDevice {
    SipDevice {
        media_type: MediaType::Video,
        dir: info.dir,
        index,
        name: info.name.clone(),
        formats: info.formats.clone(),
    }
}

/// Field-by-field comparison; device equality alone ignores index and formats
fn same_devices(a: &[SipDevice], b: &[SipDevice]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.media_type == y.media_type
                && x.index == y.index
                && x.name == y.name
                && x.dir == y.dir
                && x.formats == y.formats
        })
}
