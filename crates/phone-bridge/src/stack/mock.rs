//! In-memory [`SipStack`]
//!
//! `MockStack` keeps accounts, calls, conference wiring and video streams in
//! memory and drives the registered [`StackCallbacks`] the way a native
//! engine would. Scripting methods let tests play the remote side: ring in a
//! call, move it through invite states, bring media up, open an incoming video
//! window and push frames into it from another thread.
//!
//! Every trait call is counted per [`MockOp`], and a failure status can be
//! armed for the next call of an operation. Callbacks are always invoked
//! after the internal lock is released, so they may call back into the stack.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::media::{
    AudioFormatDetails, FourCc, MediaDirection, MediaFormat, MediaStatus, MediaType, VideoFormatDetails,
};

use super::spi::{DevCap, VidDevError, VidDevResult, VideoDevFactory, VideoDevInfo, VideoDevStream};
use super::{
    AccountHandle, AccountInfo, AccountSpec, AudioDevInfo, CallHandle, CallInfo, CallMediaInfo, CallSetting,
    CodecDirection, ConfSlot, InviteState, SipStack, StackCallbacks, StackResult, StackSetup, StackStatus,
    StreamInfo, ToneDigit, VideoCodecParams, VideoStreamOp, WindowHandle, WindowId,
};

/// Invalid argument
pub const EINVAL: StackStatus = StackStatus::new(70_004);
/// Object not found
pub const ENOTFOUND: StackStatus = StackStatus::new(70_006);
/// Operation not valid in the current state
pub const EINVALIDOP: StackStatus = StackStatus::new(70_013);

const EVID_BASE: i32 = 520_000;
const REGISTRATION_EXPIRES: u32 = 300;

/// Operations the mock counts and can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Create,
    Destroy,
    PreviewStart,
    PreviewStop,
    MakeCall,
    Answer,
    Hangup,
    CallInfo,
    SendDtmf,
    SetVideoStream,
    ConfConnect,
    ConfDisconnect,
    AdjustTxLevel,
    AdjustRxLevel,
    AccountAdd,
    AccountModify,
    AccountDel,
    AccountSetRegistration,
}

/// How the simulated remote side reacts to a hangup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HangupMode {
    /// The call disconnects before `hangup` returns
    #[default]
    Immediate,
    /// The call disconnects on another thread after the delay
    Delayed(Duration),
    /// The hangup is accepted but the call never disconnects
    Ignored,
}

struct MockCall {
    info: CallInfo,
    active: bool,
    connected_at: Option<Instant>,
    dtmf: String,
}

struct MockAccount {
    spec: AccountSpec,
    registered: bool,
}

#[derive(Default)]
struct MockState {
    created: bool,
    callbacks: Option<Arc<dyn StackCallbacks>>,
    video_factory: Option<Arc<dyn VideoDevFactory>>,
    ops: HashMap<MockOp, usize>,
    failures: HashMap<MockOp, StackStatus>,
    delays: HashMap<MockOp, Duration>,
    hangup_mode: HangupMode,
    accounts: BTreeMap<i32, MockAccount>,
    next_account: i32,
    calls: BTreeMap<i32, MockCall>,
    next_call: i32,
    next_slot: u32,
    conf: HashMap<ConfSlot, Vec<ConfSlot>>,
    windows: HashMap<i32, WindowHandle>,
    next_window: i32,
    preview_format: Option<MediaFormat>,
    previews: HashMap<usize, Box<dyn VideoDevStream>>,
    call_video: HashMap<(i32, usize), Box<dyn VideoDevStream>>,
    audio_devices: Vec<AudioDevInfo>,
    cameras: Vec<VideoDevInfo>,
    threads: Vec<String>,
    codec_params: HashMap<String, VideoCodecParams>,
}

/// Thread-safe in-memory stack; clones share the same state
#[derive(Clone, Default)]
pub struct MockStack {
    shared: Arc<Mutex<MockState>>,
}

fn vid_status(err: VidDevError) -> StackStatus {
    let offset = match err {
        VidDevError::InvalidArgument => 1,
        VidDevError::InvalidDevice => 2,
        VidDevError::InvalidCapability => 3,
        VidDevError::BadFormat => 4,
        VidDevError::InvalidOperation => 5,
        VidDevError::Failed => 6,
    };
    StackStatus::new(EVID_BASE + offset)
}

impl MockStack {
    /// Empty stack: no devices, no accounts
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack with one sound card and one camera
    pub fn with_default_devices() -> Self {
        let stack = Self::new();
        stack.add_audio_device("Mock sound card", 1, 2);
        stack.add_camera("Mock camera");
        stack
    }

    pub fn add_audio_device(&self, name: &str, input_count: u32, output_count: u32) {
        self.shared.lock().audio_devices.push(AudioDevInfo {
            name: name.to_string(),
            driver: "mock".to_string(),
            input_count,
            output_count,
            formats: vec![MediaFormat::audio(
                FourCc::L16,
                AudioFormatDetails {
                    clock_rate: 16_000,
                    channel_count: 1,
                    frame_time_usec: 20_000,
                    bits_per_sample: 16,
                    ..Default::default()
                },
            )],
        });
    }

    pub fn add_camera(&self, name: &str) {
        self.shared.lock().cameras.push(VideoDevInfo {
            name: name.to_string(),
            driver: "mock".to_string(),
            dir: MediaDirection::CAPTURE,
            has_callback: true,
            caps: vec![DevCap::Format],
            formats: vec![MediaFormat::video(FourCc::I420, 640, 480, 30, 1)],
        });
    }

    pub fn set_hangup_mode(&self, mode: HangupMode) {
        self.shared.lock().hangup_mode = mode;
    }

    /// Make the next call of `op` fail with `status`
    pub fn fail_next(&self, op: MockOp, status: StackStatus) {
        self.shared.lock().failures.insert(op, status);
    }

    /// Make every call of `op` block for `delay` first
    pub fn set_op_delay(&self, op: MockOp, delay: Duration) {
        self.shared.lock().delays.insert(op, delay);
    }

    /// How many times `op` has been invoked
    pub fn op_count(&self, op: MockOp) -> usize {
        self.shared.lock().ops.get(&op).copied().unwrap_or(0)
    }

    pub fn is_created(&self) -> bool {
        self.shared.lock().created
    }

    /// Threads announced through `register_thread`
    pub fn registered_threads(&self) -> Vec<String> {
        self.shared.lock().threads.clone()
    }

    pub fn codec_params(&self, codec: &str) -> Option<VideoCodecParams> {
        self.shared.lock().codec_params.get(codec).copied()
    }

    /// Digits sent on a call so far
    pub fn sent_dtmf(&self, call: CallHandle) -> String {
        self.shared
            .lock()
            .calls
            .get(&call.0)
            .map(|c| c.dtmf.clone())
            .unwrap_or_default()
    }

    pub fn is_account_registered(&self, account: AccountHandle) -> bool {
        self.shared
            .lock()
            .accounts
            .get(&account.0)
            .is_some_and(|a| a.registered)
    }

    pub fn account_count(&self) -> usize {
        self.shared.lock().accounts.len()
    }

    /// Format used for preview streams instead of the render default
    pub fn set_preview_format(&self, format: MediaFormat) {
        self.shared.lock().preview_format = Some(format);
    }

    /// Ring in a new call from `remote` and announce it
    pub fn incoming_call(&self, account: AccountHandle, remote: &str, protocol_id: &str) -> CallHandle {
        let handle = {
            let mut st = self.shared.lock();
            let handle = CallHandle(st.next_call);
            st.next_call += 1;
            st.calls.insert(
                handle.0,
                MockCall {
                    info: new_call_info(protocol_id, remote, InviteState::Incoming),
                    active: true,
                    connected_at: None,
                    dtmf: String::new(),
                },
            );
            handle
        };
        debug!(handle = handle.0, remote, "Mock incoming call");
        self.redeliver_incoming_call(account, handle);
        handle
    }

    /// Announce an existing call again, as a racing second notification would
    pub fn redeliver_incoming_call(&self, account: AccountHandle, call: CallHandle) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.on_incoming_call(account, call);
        }
    }

    /// Move a call to a new invite state, as the remote side would
    pub fn advance_call(&self, call: CallHandle, state: InviteState, status: u16) {
        if state == InviteState::Disconnected {
            self.disconnect(call, status);
            return;
        }
        {
            let mut st = self.shared.lock();
            let Some(c) = st.calls.get_mut(&call.0) else {
                return;
            };
            if !c.active {
                return;
            }
            c.info.state = state;
            c.info.last_status = status;
            if state == InviteState::Confirmed && c.connected_at.is_none() {
                c.connected_at = Some(Instant::now());
            }
        }
        self.fire_call_state(call);
    }

    /// Disconnect a call with a final status and release its media
    pub fn disconnect(&self, call: CallHandle, status: u16) {
        let streams = {
            let mut st = self.shared.lock();
            let Some(c) = st.calls.get_mut(&call.0) else {
                return;
            };
            if !c.active {
                return;
            }
            c.active = false;
            c.info.state = InviteState::Disconnected;
            c.info.last_status = status;
            if let Some(at) = c.connected_at.take() {
                c.info.connect_duration = at.elapsed();
            }
            if let Some(slot) = c.info.conf_slot {
                st.conf.remove(&slot);
                for listeners in st.conf.values_mut() {
                    listeners.retain(|s| *s != slot);
                }
            }
            take_call_video(&mut st, call)
        };
        for stream in streams {
            let _ = stream.destroy();
        }
        debug!(handle = call.0, status, "Mock call disconnected");
        self.fire_call_state(call);
    }

    /// Bring up audio (and optionally video) media on a call
    pub fn activate_media(&self, call: CallHandle, with_video: bool) {
        {
            let mut st = self.shared.lock();
            st.next_slot += 1;
            let slot = ConfSlot(st.next_slot);
            let Some(c) = st.calls.get_mut(&call.0) else {
                return;
            };
            let mut media = vec![CallMediaInfo {
                index: 0,
                media_type: MediaType::Audio,
                dir: MediaDirection::CAPTURE_AND_PLAYBACK,
                status: MediaStatus::Active,
                conf_slot: Some(slot),
                video_window: None,
            }];
            if with_video {
                media.push(CallMediaInfo {
                    index: 1,
                    media_type: MediaType::Video,
                    dir: MediaDirection::CAPTURE_AND_PLAYBACK,
                    status: MediaStatus::Active,
                    conf_slot: None,
                    video_window: None,
                });
            }
            c.info.media = media;
            c.info.media_status = MediaStatus::Active;
            c.info.conf_slot = Some(slot);
        }
        self.fire_call_media_state(call);
    }

    /// Report a media failure on a call
    pub fn fail_media(&self, call: CallHandle) {
        {
            let mut st = self.shared.lock();
            let Some(c) = st.calls.get_mut(&call.0) else {
                return;
            };
            c.info.media_status = MediaStatus::Error;
        }
        self.fire_call_media_state(call);
    }

    /// Open the incoming video window of a video stream through the render factory
    pub fn open_call_video(&self, call: CallHandle, media_index: usize, format: MediaFormat) -> StackResult<WindowHandle> {
        let factory = self.shared.lock().video_factory.clone().ok_or(EINVALIDOP)?;
        let mut param = factory.default_param(0).map_err(vid_status)?;
        param.format = Some(format);
        let mut stream = factory.create_stream(&param).map_err(vid_status)?;
        stream.start().map_err(vid_status)?;
        let window = stream.param().map_err(vid_status)?.window;

        {
            let mut st = self.shared.lock();
            let win = st.next_window;
            st.next_window += 1;
            let Some(line) = st
                .calls
                .get_mut(&call.0)
                .and_then(|c| c.info.media.iter_mut().find(|m| m.index == media_index))
            else {
                return Err(EINVAL);
            };
            line.video_window = Some(WindowId(win));
            st.windows.insert(win, window);
            st.call_video.insert((call.0, media_index), stream);
        }
        self.fire_call_media_state(call);
        Ok(window)
    }

    /// Push a decoded frame into a call's incoming video window
    pub fn push_call_video_frame(&self, call: CallHandle, media_index: usize, frame: &[u8]) -> VidDevResult<()> {
        let mut st = self.shared.lock();
        let stream = st
            .call_video
            .get_mut(&(call.0, media_index))
            .ok_or(VidDevError::InvalidOperation)?;
        stream.put_frame(frame)
    }

    /// Push a captured frame into the preview of `capture_dev`
    pub fn push_preview_frame(&self, capture_dev: usize, frame: &[u8]) -> VidDevResult<()> {
        let mut st = self.shared.lock();
        let stream = st
            .previews
            .get_mut(&capture_dev)
            .ok_or(VidDevError::InvalidOperation)?;
        stream.put_frame(frame)
    }

    fn begin(&self, op: MockOp) -> StackResult<MutexGuard<'_, MockState>> {
        let delay = {
            let mut st = self.shared.lock();
            *st.ops.entry(op).or_default() += 1;
            st.delays.get(&op).copied()
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        let mut st = self.shared.lock();
        match st.failures.remove(&op) {
            Some(status) => Err(status),
            None => Ok(st),
        }
    }

    fn callbacks(&self) -> Option<Arc<dyn StackCallbacks>> {
        self.shared.lock().callbacks.clone()
    }

    fn fire_call_state(&self, call: CallHandle) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.on_call_state(call);
        }
    }

    fn fire_call_media_state(&self, call: CallHandle) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.on_call_media_state(call);
        }
    }

    fn fire_reg_state(&self, account: AccountHandle) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.on_reg_state(account);
        }
    }
}

fn new_call_info(protocol_id: &str, remote: &str, state: InviteState) -> CallInfo {
    CallInfo {
        call_id: protocol_id.to_string(),
        remote_info: remote.to_string(),
        state,
        last_status: 0,
        connect_duration: Duration::ZERO,
        media_status: MediaStatus::None,
        conf_slot: None,
        media: Vec::new(),
    }
}

fn take_call_video(st: &mut MockState, call: CallHandle) -> Vec<Box<dyn VideoDevStream>> {
    let keys: Vec<(i32, usize)> = st.call_video.keys().filter(|(c, _)| *c == call.0).copied().collect();
    keys.into_iter().filter_map(|key| st.call_video.remove(&key)).collect()
}

fn video_details() -> VideoFormatDetails {
    VideoFormatDetails {
        fps_num: 25,
        fps_den: 1,
        width: 640,
        height: 480,
        avg_bitrate: 512_000,
        max_bitrate: 512_000,
    }
}

impl SipStack for MockStack {
    fn create(&self, setup: &StackSetup) -> StackResult<()> {
        let factory = {
            let mut st = self.begin(MockOp::Create)?;
            if st.created {
                return Err(EINVALIDOP);
            }
            st.created = true;
            st.callbacks = Some(setup.callbacks.clone());
            st.video_factory = Some(setup.video_factory.clone());
            setup.video_factory.clone()
        };
        factory.init().map_err(vid_status)?;
        info!(udp_port = setup.udp_port, tcp_port = setup.tcp_port, "Mock stack created");
        Ok(())
    }

    fn destroy(&self) -> StackResult<()> {
        let (streams, factory) = {
            let mut st = self.begin(MockOp::Destroy)?;
            let mut streams: Vec<Box<dyn VideoDevStream>> = st.previews.drain().map(|(_, s)| s).collect();
            streams.extend(st.call_video.drain().map(|(_, s)| s));
            for call in st.calls.values_mut() {
                call.active = false;
            }
            st.conf.clear();
            st.windows.clear();
            st.callbacks = None;
            st.created = false;
            (streams, st.video_factory.take())
        };
        for stream in streams {
            let _ = stream.destroy();
        }
        if let Some(factory) = factory {
            factory.destroy().map_err(vid_status)?;
        }
        info!("Mock stack destroyed");
        Ok(())
    }

    fn register_thread(&self, name: &str) -> StackResult<()> {
        self.shared.lock().threads.push(name.to_string());
        Ok(())
    }

    fn set_video_codec_params(&self, codec: &str, params: &VideoCodecParams) -> StackResult<()> {
        self.shared.lock().codec_params.insert(codec.to_string(), *params);
        Ok(())
    }

    fn preview_start(&self, capture_dev: usize, render_dev: usize) -> StackResult<WindowHandle> {
        let (factory, camera_count, format) = {
            let st = self.begin(MockOp::PreviewStart)?;
            if capture_dev >= st.cameras.len() {
                return Err(EINVAL);
            }
            if let Some(existing) = st.previews.get(&capture_dev) {
                return existing.param().map(|p| p.window).map_err(vid_status);
            }
            let factory = st.video_factory.clone().ok_or(EINVALIDOP)?;
            (factory, st.cameras.len(), st.preview_format)
        };

        let render_index = render_dev.checked_sub(camera_count).ok_or(EINVAL)?;
        let mut param = factory.default_param(render_index).map_err(vid_status)?;
        param.capture_id = Some(capture_dev);
        if format.is_some() {
            param.format = format;
        }
        let mut stream = factory.create_stream(&param).map_err(vid_status)?;
        stream.start().map_err(vid_status)?;
        let window = stream.param().map_err(vid_status)?.window;
        self.shared.lock().previews.insert(capture_dev, stream);
        Ok(window)
    }

    fn preview_stop(&self, capture_dev: usize) -> StackResult<()> {
        let stream = {
            let mut st = self.begin(MockOp::PreviewStop)?;
            st.previews.remove(&capture_dev).ok_or(EINVALIDOP)?
        };
        stream.destroy().map_err(vid_status)
    }

    fn make_call(&self, _account: AccountHandle, uri: &str, _setting: &CallSetting) -> StackResult<CallHandle> {
        if !self.verify_uri(uri) {
            return Err(EINVAL);
        }
        let mut st = self.begin(MockOp::MakeCall)?;
        let handle = CallHandle(st.next_call);
        st.next_call += 1;
        st.calls.insert(
            handle.0,
            MockCall {
                info: new_call_info(&format!("mock-{}@bridge", handle.0), uri, InviteState::Calling),
                active: true,
                connected_at: None,
                dtmf: String::new(),
            },
        );
        Ok(handle)
    }

    fn answer(&self, call: CallHandle, code: u16, _setting: &CallSetting) -> StackResult<()> {
        {
            let mut st = self.begin(MockOp::Answer)?;
            let c = st.calls.get_mut(&call.0).ok_or(ENOTFOUND)?;
            if !c.active {
                return Err(EINVALIDOP);
            }
            c.info.state = InviteState::Connecting;
            c.info.last_status = code;
        }
        self.fire_call_state(call);
        Ok(())
    }

    fn hangup(&self, call: CallHandle, code: u16, _reason: &str) -> StackResult<()> {
        let mode = {
            let st = self.begin(MockOp::Hangup)?;
            let c = st.calls.get(&call.0).ok_or(ENOTFOUND)?;
            if !c.active {
                return Err(EINVALIDOP);
            }
            st.hangup_mode
        };
        match mode {
            HangupMode::Immediate => self.disconnect(call, code),
            HangupMode::Delayed(delay) => {
                let stack = self.clone();
                thread::spawn(move || {
                    thread::sleep(delay);
                    stack.disconnect(call, code);
                });
            }
            HangupMode::Ignored => {}
        }
        Ok(())
    }

    fn is_call_active(&self, call: CallHandle) -> bool {
        self.shared.lock().calls.get(&call.0).is_some_and(|c| c.active)
    }

    fn call_has_media(&self, call: CallHandle) -> bool {
        self.shared
            .lock()
            .calls
            .get(&call.0)
            .is_some_and(|c| c.active && c.info.media_status != MediaStatus::None)
    }

    fn call_info(&self, call: CallHandle) -> StackResult<CallInfo> {
        let st = self.begin(MockOp::CallInfo)?;
        let c = st.calls.get(&call.0).ok_or(ENOTFOUND)?;
        let mut info = c.info.clone();
        if let Some(at) = c.connected_at {
            info.connect_duration = at.elapsed();
        }
        Ok(info)
    }

    fn stream_info(&self, call: CallHandle, media_index: usize) -> StackResult<StreamInfo> {
        let st = self.shared.lock();
        let c = st.calls.get(&call.0).ok_or(ENOTFOUND)?;
        let line = c.info.media.iter().find(|m| m.index == media_index).ok_or(EINVAL)?;
        match line.media_type {
            MediaType::Audio => Ok(StreamInfo::Audio {
                format: AudioFormatDetails {
                    clock_rate: 8_000,
                    channel_count: 1,
                    frame_time_usec: 20_000,
                    bits_per_sample: 16,
                    avg_bitrate: 64_000,
                    max_bitrate: 64_000,
                },
            }),
            MediaType::Video => Ok(StreamInfo::Video {
                direction: CodecDirection::Decoding,
                encoder: video_details(),
                decoder: video_details(),
            }),
            MediaType::Unknown => Err(EINVAL),
        }
    }

    fn enum_calls(&self) -> Vec<CallHandle> {
        self.shared
            .lock()
            .calls
            .iter()
            .filter(|(_, c)| c.active)
            .map(|(h, _)| CallHandle(*h))
            .collect()
    }

    fn send_dtmf(&self, call: CallHandle, digits: &[ToneDigit]) -> StackResult<()> {
        let mut st = self.begin(MockOp::SendDtmf)?;
        let c = st.calls.get_mut(&call.0).ok_or(ENOTFOUND)?;
        if !c.active {
            return Err(EINVALIDOP);
        }
        c.dtmf.extend(digits.iter().map(|d| d.digit));
        Ok(())
    }

    fn set_video_stream(&self, call: CallHandle, op: VideoStreamOp) -> StackResult<()> {
        let mut st = self.begin(MockOp::SetVideoStream)?;
        let c = st.calls.get_mut(&call.0).ok_or(ENOTFOUND)?;
        if !c.active {
            return Err(EINVALIDOP);
        }
        if let VideoStreamOp::ChangeDirection { media_index, dir } = op {
            let line = c
                .info
                .media
                .iter_mut()
                .find(|m| m.index == media_index && m.media_type == MediaType::Video)
                .ok_or(EINVAL)?;
            line.dir = dir;
        }
        Ok(())
    }

    fn video_window(&self, window: WindowId) -> StackResult<WindowHandle> {
        self.shared.lock().windows.get(&window.0).copied().ok_or(ENOTFOUND)
    }

    fn conf_connect(&self, source: ConfSlot, sink: ConfSlot) -> StackResult<()> {
        let mut st = self.begin(MockOp::ConfConnect)?;
        let listeners = st.conf.entry(source).or_default();
        if !listeners.contains(&sink) {
            listeners.push(sink);
        }
        Ok(())
    }

    fn conf_disconnect(&self, source: ConfSlot, sink: ConfSlot) -> StackResult<()> {
        let mut st = self.begin(MockOp::ConfDisconnect)?;
        let listeners = st.conf.get_mut(&source).ok_or(ENOTFOUND)?;
        let pos = listeners.iter().position(|s| *s == sink).ok_or(ENOTFOUND)?;
        listeners.remove(pos);
        Ok(())
    }

    fn conf_listeners(&self, source: ConfSlot) -> StackResult<Vec<ConfSlot>> {
        Ok(self.shared.lock().conf.get(&source).cloned().unwrap_or_default())
    }

    fn adjust_tx_level(&self, _slot: ConfSlot, level: f32) -> StackResult<()> {
        let _st = self.begin(MockOp::AdjustTxLevel)?;
        if level < 0.0 { Err(EINVAL) } else { Ok(()) }
    }

    fn adjust_rx_level(&self, _slot: ConfSlot, level: f32) -> StackResult<()> {
        let _st = self.begin(MockOp::AdjustRxLevel)?;
        if level < 0.0 { Err(EINVAL) } else { Ok(()) }
    }

    fn account_add(&self, spec: &AccountSpec) -> StackResult<AccountHandle> {
        let handle = {
            let mut st = self.begin(MockOp::AccountAdd)?;
            let handle = AccountHandle(st.next_account);
            st.next_account += 1;
            st.accounts.insert(
                handle.0,
                MockAccount {
                    spec: spec.clone(),
                    registered: spec.register_on_add,
                },
            );
            handle
        };
        if spec.register_on_add {
            self.fire_reg_state(handle);
        }
        Ok(handle)
    }

    fn account_modify(&self, account: AccountHandle, spec: &AccountSpec) -> StackResult<()> {
        let mut st = self.begin(MockOp::AccountModify)?;
        let acc = st.accounts.get_mut(&account.0).ok_or(ENOTFOUND)?;
        acc.spec = spec.clone();
        Ok(())
    }

    fn account_del(&self, account: AccountHandle) -> StackResult<()> {
        let mut st = self.begin(MockOp::AccountDel)?;
        st.accounts.remove(&account.0).map(|_| ()).ok_or(ENOTFOUND)
    }

    fn account_set_registration(&self, account: AccountHandle, register: bool) -> StackResult<()> {
        {
            let mut st = self.begin(MockOp::AccountSetRegistration)?;
            let acc = st.accounts.get_mut(&account.0).ok_or(ENOTFOUND)?;
            acc.registered = register;
        }
        self.fire_reg_state(account);
        Ok(())
    }

    fn account_info(&self, account: AccountHandle) -> StackResult<AccountInfo> {
        let st = self.shared.lock();
        let acc = st.accounts.get(&account.0).ok_or(ENOTFOUND)?;
        Ok(AccountInfo {
            uri: acc.spec.id_uri.clone(),
            expires: if acc.registered { REGISTRATION_EXPIRES } else { 0 },
            status: if acc.registered { 200 } else { 0 },
            status_text: if acc.registered { "OK".to_string() } else { String::new() },
        })
    }

    fn account_config(&self, account: AccountHandle) -> StackResult<AccountSpec> {
        let st = self.shared.lock();
        st.accounts.get(&account.0).map(|a| a.spec.clone()).ok_or(ENOTFOUND)
    }

    fn refresh_audio_devices(&self) -> StackResult<()> {
        Ok(())
    }

    fn enum_audio_devices(&self) -> StackResult<Vec<AudioDevInfo>> {
        Ok(self.shared.lock().audio_devices.clone())
    }

    fn refresh_video_devices(&self) -> StackResult<()> {
        let factory = self.shared.lock().video_factory.clone();
        match factory {
            Some(factory) => factory.refresh().map_err(vid_status),
            None => Ok(()),
        }
    }

    fn enum_video_devices(&self) -> StackResult<Vec<VideoDevInfo>> {
        let (mut devices, factory) = {
            let st = self.shared.lock();
            (st.cameras.clone(), st.video_factory.clone())
        };
        if let Some(factory) = factory {
            for index in 0..factory.device_count() {
                devices.push(factory.device_info(index).map_err(vid_status)?);
            }
        }
        Ok(devices)
    }

    fn verify_uri(&self, uri: &str) -> bool {
        let uri = uri.trim();
        let uri = uri.strip_prefix('<').and_then(|u| u.strip_suffix('>')).unwrap_or(uri);
        uri.strip_prefix("sip:")
            .or_else(|| uri.strip_prefix("sips:"))
            .is_some_and(|rest| !rest.is_empty() && !rest.starts_with('@') && !rest.contains(char::is_whitespace))
    }

    fn status_text(&self, status: StackStatus) -> String {
        match status.code() {
            0 => "Success".to_string(),
            70_004 => "Invalid argument".to_string(),
            70_006 => "Not found".to_string(),
            70_013 => "Invalid operation".to_string(),
            code if code > EVID_BASE && code <= EVID_BASE + 6 => format!("Video device error ({})", code),
            code => format!("Unknown error {}", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_uri() {
        let stack = MockStack::new();
        assert!(stack.verify_uri("sip:alice@example.com"));
        assert!(stack.verify_uri("<sip:alice@example.com>"));
        assert!(stack.verify_uri("sips:bob@example.com:5061"));
        assert!(!stack.verify_uri("alice@example.com"));
        assert!(!stack.verify_uri("sip:"));
        assert!(!stack.verify_uri("sip:a b@example.com"));
    }

    #[test]
    fn test_failure_is_one_shot() {
        let stack = MockStack::new();
        stack.fail_next(MockOp::ConfConnect, EINVALIDOP);
        assert_eq!(stack.conf_connect(ConfSlot(1), ConfSlot::MASTER), Err(EINVALIDOP));
        assert!(stack.conf_connect(ConfSlot(1), ConfSlot::MASTER).is_ok());
        assert_eq!(stack.op_count(MockOp::ConfConnect), 2);
        assert_eq!(stack.conf_listeners(ConfSlot(1)), Ok(vec![ConfSlot::MASTER]));
    }

    #[test]
    fn test_hangup_disconnects_call() {
        let stack = MockStack::new();
        let call = stack
            .make_call(AccountHandle(0), "sip:bob@example.com", &CallSetting::new(false))
            .unwrap();
        assert!(stack.is_call_active(call));
        stack.hangup(call, 603, "").unwrap();
        assert!(!stack.is_call_active(call));
        let info = stack.call_info(call).unwrap();
        assert_eq!(info.state, InviteState::Disconnected);
        assert_eq!(info.last_status, 603);
        assert_eq!(stack.hangup(call, 603, ""), Err(EINVALIDOP));
    }

    #[test]
    fn test_ignored_hangup_keeps_call_active() {
        let stack = MockStack::new();
        stack.set_hangup_mode(HangupMode::Ignored);
        let call = stack
            .make_call(AccountHandle(0), "sip:bob@example.com", &CallSetting::new(false))
            .unwrap();
        stack.hangup(call, 603, "").unwrap();
        assert!(stack.is_call_active(call));
        assert_eq!(stack.enum_calls(), vec![call]);
    }

    #[test]
    fn test_preview_requires_created_stack() {
        let stack = MockStack::with_default_devices();
        assert_eq!(stack.preview_start(0, 1), Err(EINVALIDOP));
        assert_eq!(stack.preview_start(5, 1), Err(EINVAL));
    }
}
