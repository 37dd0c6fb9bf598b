//! Boundary to the native SIP/media stack
//!
//! The stack itself (signaling, codecs, RTP, ICE) is an external collaborator.
//! This module pins down the capability set the bridge consumes from it:
//!
//! - **Lifecycle**: [`SipStack::create`] / [`SipStack::destroy`], only ever
//!   invoked from the worker thread
//! - **Per-call operations**: make, answer, hang up, info and stream queries
//! - **Conference bridge**: audio slot wiring and levels
//! - **Accounts and devices**
//! - **Callbacks**: [`StackCallbacks`], invoked by the stack on its own threads
//! - **Video device SPI**: [`spi`], the rendering backend the media pipeline pulls frames through
//!
//! [`mock::MockStack`] is a complete in-memory implementation used by the
//! tests and by applications that want to exercise the bridge without a
//! native engine.

pub mod mock;
pub mod spi;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::media::{AudioFormatDetails, MediaDirection, MediaFormat, MediaStatus, MediaType, VideoFormatDetails};
use crate::render::SurfaceId;

use self::spi::{VideoDevFactory, VideoDevInfo};

/// Native status code; zero is success
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackStatus(i32);

impl StackStatus {
    /// Success
    pub const SUCCESS: Self = Self(0);
    /// Status of a task that has not run yet, or of an operation with no better code
    pub const UNKNOWN_FAILURE: Self = Self(-1);

    /// Wrap a native status code
    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    /// Raw native code
    pub const fn code(self) -> i32 {
        self.0
    }

    /// Whether this status is success
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// `Ok(())` on success, the status itself otherwise
    pub fn check(self) -> Result<(), StackStatus> {
        if self.is_success() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StackStatus({})", self.0)
    }
}

/// Result of a native operation
pub type StackResult<T> = Result<T, StackStatus>;

/// Native call index, valid only while the call is active in the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallHandle(pub i32);

/// Native account index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountHandle(pub i32);

/// Conference bridge port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfSlot(pub u32);

impl ConfSlot {
    /// The sound device port
    pub const MASTER: Self = Self(0);
}

/// Native video window index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub i32);

/// What a native video window renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowHandle {
    /// No window
    #[default]
    None,
    /// A render surface owned by this crate's render device
    Surface(SurfaceId),
    /// Some other renderer's window
    Native { kind: u32, raw: u64 },
}

impl WindowHandle {
    /// Surface id, if the window belongs to this crate's render device
    pub fn surface(self) -> Option<SurfaceId> {
        match self {
            Self::Surface(id) => Some(id),
            _ => None,
        }
    }
}

/// INVITE session state as reported by the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InviteState {
    Null,
    Calling,
    Incoming,
    Early,
    Connecting,
    Confirmed,
    Disconnected,
}

/// Media counts requested when placing or answering a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSetting {
    pub audio_count: u32,
    pub video_count: u32,
}

impl CallSetting {
    /// One audio stream, plus one video stream when asked for
    pub fn new(with_video: bool) -> Self {
        Self {
            audio_count: 1,
            video_count: if with_video { 1 } else { 0 },
        }
    }
}

/// Snapshot of one media line of a call
#[derive(Debug, Clone, PartialEq)]
pub struct CallMediaInfo {
    pub index: usize,
    pub media_type: MediaType,
    pub dir: MediaDirection,
    pub status: MediaStatus,
    /// Conference slot of an audio stream
    pub conf_slot: Option<ConfSlot>,
    /// Incoming video window of a video stream
    pub video_window: Option<WindowId>,
}

/// Snapshot of a call as the stack sees it
#[derive(Debug, Clone, PartialEq)]
pub struct CallInfo {
    /// Protocol-level dialog identifier (the SIP Call-ID)
    pub call_id: String,
    pub remote_info: String,
    pub state: InviteState,
    pub last_status: u16,
    pub connect_duration: Duration,
    pub media_status: MediaStatus,
    pub conf_slot: Option<ConfSlot>,
    pub media: Vec<CallMediaInfo>,
}

/// Which side of a video codec a stream info describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecDirection {
    Encoding,
    Decoding,
}

/// Codec parameters of one stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamInfo {
    Audio {
        format: AudioFormatDetails,
    },
    Video {
        direction: CodecDirection,
        encoder: VideoFormatDetails,
        decoder: VideoFormatDetails,
    },
}

/// Video stream operations on a live call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoStreamOp {
    ChangeDirection { media_index: usize, dir: MediaDirection },
    StartTransmit { media_index: usize, dir: MediaDirection },
    StopTransmit { media_index: usize, dir: MediaDirection },
}

/// One DTMF tone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToneDigit {
    pub digit: char,
    pub on: Duration,
    pub off: Duration,
    pub volume: u16,
}

/// Encoder parameters pushed for a video codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoCodecParams {
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub avg_bitrate: u32,
    pub max_bitrate: u32,
}

/// Digest credential of an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub realm: String,
    pub scheme: String,
    pub username: String,
    pub password: String,
}

/// Account as the stack stores it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSpec {
    pub id_uri: String,
    pub registrar_uri: String,
    pub proxies: Vec<String>,
    pub credentials: Vec<Credential>,
    pub register_on_add: bool,
    pub video_capture_device: Option<usize>,
    pub video_render_device: Option<usize>,
}

/// Registration state of an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub uri: String,
    /// Seconds until the registration expires; zero when unregistered
    pub expires: u32,
    pub status: u16,
    pub status_text: String,
}

/// An audio device as enumerated by the stack
#[derive(Debug, Clone, PartialEq)]
pub struct AudioDevInfo {
    pub name: String,
    pub driver: String,
    pub input_count: u32,
    pub output_count: u32,
    pub formats: Vec<MediaFormat>,
}

/// Result of the stack's NAT type detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatDetectResult {
    pub status: StackStatus,
    pub nat_type_name: String,
}

/// Media event raised on a single stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    FormatChanged,
    KeyframeMissing,
    Other(u32),
}

/// Callback table handed to the stack on creation
///
/// The stack invokes these on its own threads, at arbitrary times.
/// Implementations must only snapshot what they need and return; they never
/// block and never touch GUI-owned state.
pub trait StackCallbacks: Send + Sync {
    fn on_reg_state(&self, account: AccountHandle);
    fn on_nat_detect(&self, result: NatDetectResult);
    fn on_incoming_call(&self, account: AccountHandle, call: CallHandle);
    fn on_call_state(&self, call: CallHandle);
    fn on_call_media_state(&self, call: CallHandle);
    fn on_call_media_event(&self, call: CallHandle, media_index: usize, event: MediaEvent);
}

/// Everything create-stack needs
#[derive(Clone)]
pub struct StackSetup {
    pub stun_server: Option<String>,
    pub enable_ice: bool,
    pub udp_port: u16,
    pub tcp_port: u16,
    pub user_agent: String,
    pub log_file: Option<PathBuf>,
    pub callbacks: Arc<dyn StackCallbacks>,
    pub video_factory: Arc<dyn VideoDevFactory>,
}

impl fmt::Debug for StackSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackSetup")
            .field("stun_server", &self.stun_server)
            .field("enable_ice", &self.enable_ice)
            .field("udp_port", &self.udp_port)
            .field("tcp_port", &self.tcp_port)
            .field("user_agent", &self.user_agent)
            .field("log_file", &self.log_file)
            .finish_non_exhaustive()
    }
}

/// The native SIP/media engine
///
/// Mutating calls must never run concurrently from two application threads;
/// lifecycle calls are issued from the single worker thread and everything
/// else from the GUI thread.
pub trait SipStack: Send + Sync {
    // Lifecycle (worker thread only)
    fn create(&self, setup: &StackSetup) -> StackResult<()>;
    fn destroy(&self) -> StackResult<()>;
    /// Announce an application thread to the stack before it issues calls
    fn register_thread(&self, name: &str) -> StackResult<()>;
    fn set_video_codec_params(&self, codec: &str, params: &VideoCodecParams) -> StackResult<()>;

    // Preview (worker thread only)
    fn preview_start(&self, capture_dev: usize, render_dev: usize) -> StackResult<WindowHandle>;
    fn preview_stop(&self, capture_dev: usize) -> StackResult<()>;

    // Calls
    fn make_call(&self, account: AccountHandle, uri: &str, setting: &CallSetting) -> StackResult<CallHandle>;
    fn answer(&self, call: CallHandle, code: u16, setting: &CallSetting) -> StackResult<()>;
    fn hangup(&self, call: CallHandle, code: u16, reason: &str) -> StackResult<()>;
    fn is_call_active(&self, call: CallHandle) -> bool;
    fn call_has_media(&self, call: CallHandle) -> bool;
    fn call_info(&self, call: CallHandle) -> StackResult<CallInfo>;
    fn stream_info(&self, call: CallHandle, media_index: usize) -> StackResult<StreamInfo>;
    fn enum_calls(&self) -> Vec<CallHandle>;
    fn send_dtmf(&self, call: CallHandle, digits: &[ToneDigit]) -> StackResult<()>;
    fn set_video_stream(&self, call: CallHandle, op: VideoStreamOp) -> StackResult<()>;
    fn video_window(&self, window: WindowId) -> StackResult<WindowHandle>;

    // Conference bridge
    fn conf_connect(&self, source: ConfSlot, sink: ConfSlot) -> StackResult<()>;
    fn conf_disconnect(&self, source: ConfSlot, sink: ConfSlot) -> StackResult<()>;
    fn conf_listeners(&self, source: ConfSlot) -> StackResult<Vec<ConfSlot>>;
    fn adjust_tx_level(&self, slot: ConfSlot, level: f32) -> StackResult<()>;
    fn adjust_rx_level(&self, slot: ConfSlot, level: f32) -> StackResult<()>;

    // Accounts
    fn account_add(&self, spec: &AccountSpec) -> StackResult<AccountHandle>;
    fn account_modify(&self, account: AccountHandle, spec: &AccountSpec) -> StackResult<()>;
    fn account_del(&self, account: AccountHandle) -> StackResult<()>;
    fn account_set_registration(&self, account: AccountHandle, register: bool) -> StackResult<()>;
    fn account_info(&self, account: AccountHandle) -> StackResult<AccountInfo>;
    fn account_config(&self, account: AccountHandle) -> StackResult<AccountSpec>;

    // Devices
    fn refresh_audio_devices(&self) -> StackResult<()>;
    fn enum_audio_devices(&self) -> StackResult<Vec<AudioDevInfo>>;
    fn refresh_video_devices(&self) -> StackResult<()>;
    fn enum_video_devices(&self) -> StackResult<Vec<VideoDevInfo>>;

    // Helpers
    fn verify_uri(&self, uri: &str) -> bool;
    /// Human-readable text for a native status
    fn status_text(&self, status: StackStatus) -> String;
}
