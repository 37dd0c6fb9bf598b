//! Call state machine
//!
//! A [`Call`] represents one SIP dialog and its media streams. It lives on the
//! GUI thread and is only ever mutated there:
//!
//! - user actions ([`Call::start`], [`Call::hangup`], [`Call::destroy`], ...) run
//!   synchronously against the stack
//! - stack callbacks arrive as [`SipEvent`]s through the GUI channel and are
//!   applied by the owning [`Phone`](crate::phone::Phone)
//!
//! # State rules
//!
//! States only move forward (see [`CallState`]). `Disconnected` and `Aborted`
//! are terminal: once reached, no further state or status change is applied
//! and the native handle is released, although the call object itself stays
//! around until its deferred deletion runs.
//!
//! # Destroy protocol
//!
//! [`Call::destroy`] hangs up and then blocks on the call's signal for a
//! bounded time, waking at least once per destroy tick to re-check whether the
//! stack still considers the call active. A call that outlives the wait is
//! flagged and destroys itself when its terminal state arrives.

mod media;
mod registry;
mod state;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::{UiMessage, UiSender};
use crate::event::SipEvent;
use crate::media::{MediaDirection, MediaStatus, PropertyValue, StreamProperty};
use crate::phone::{AccountId, PhoneEvent};
use crate::render::{RenderHub, WidgetId};
use crate::stack::{AccountHandle, CallHandle, CallSetting, ConfSlot, SipStack, StackStatus, ToneDigit};

pub(crate) use registry::{CallRegistry, CallSignal};
pub use state::{CallRole, CallState, status};

/// Unique identifier of a call object
pub type CallId = Uuid;

const DTMF_MAX_DIGITS: usize = 16;
const DTMF_ON: Duration = Duration::from_millis(120);
const DTMF_OFF: Duration = Duration::from_millis(50);

/// Collaborators every call shares with the phone
pub(crate) struct CallContext {
    pub(crate) stack: Arc<dyn SipStack>,
    pub(crate) registry: Arc<CallRegistry>,
    pub(crate) ui: UiSender,
    pub(crate) events: broadcast::Sender<PhoneEvent>,
    pub(crate) destroy_tick: Duration,
}

/// One SIP dialog and its media
pub struct Call {
    id: CallId,
    role: CallRole,
    state: CallState,
    account_id: AccountId,
    account: AccountHandle,
    remote_uri: String,
    status_code: u16,
    status_text: String,
    handle: Option<CallHandle>,
    protocol_id: Option<String>,
    delayed_destroy: bool,
    deletion_due: Option<Instant>,
    media_close_deadline: Option<Instant>,
    total_duration: Duration,
    signal: Arc<CallSignal>,
    ctx: Arc<CallContext>,
    playback_widgets: BTreeMap<usize, Vec<WidgetId>>,
    property_cache: HashMap<(usize, MediaDirection, StreamProperty), PropertyValue>,
}

impl Call {
    fn new(ctx: Arc<CallContext>, role: CallRole, account_id: AccountId, account: AccountHandle, remote_uri: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            state: CallState::Inited,
            account_id,
            account,
            remote_uri,
            status_code: status::UNDEFINED,
            status_text: String::new(),
            handle: None,
            protocol_id: None,
            delayed_destroy: false,
            deletion_due: None,
            media_close_deadline: None,
            total_duration: Duration::ZERO,
            signal: Arc::new(CallSignal::default()),
            ctx,
            playback_widgets: BTreeMap::new(),
            property_cache: HashMap::new(),
        }
    }

    /// New outgoing call, not yet started
    pub(crate) fn outgoing(ctx: Arc<CallContext>, account_id: AccountId, account: AccountHandle, remote_uri: &str) -> Self {
        let call = Self::new(ctx, CallRole::Caller, account_id, account, remote_uri.to_string());
        info!(call_id = %call.id, remote = %call.remote_uri, account = account.0, "Call created as caller");
        call
    }

    /// Call for an incoming dialog, ringing and waiting to be answered
    pub(crate) fn incoming(ctx: Arc<CallContext>, account_id: AccountId, account: AccountHandle, handle: CallHandle) -> Self {
        let mut call = Self::new(ctx, CallRole::Receiver, account_id, account, String::new());
        match call.ctx.stack.call_info(handle) {
            Ok(info) => {
                call.remote_uri = info.remote_info;
                call.protocol_id = Some(info.call_id);
                call.status_code = info.last_status;
                call.status_text = status::reason_phrase(info.last_status).to_string();
            }
            Err(err) => {
                warn!(handle = handle.0, status = %err, "Failed to read incoming call info");
            }
        }
        call.attach(handle);
        call.state = CallState::Ringing;
        info!(call_id = %call.id, remote = %call.remote_uri, account = account.0, handle = handle.0, "Call created as receiver");
        call
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Account the call was placed or received on
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn remote_uri(&self) -> &str {
        &self.remote_uri
    }

    /// Last SIP status code
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Native handle, while the call holds one
    pub fn native_handle(&self) -> Option<CallHandle> {
        self.handle
    }

    /// Protocol dialog identifier (SIP Call-ID), once known
    pub fn protocol_call_id(&self) -> Option<&str> {
        self.protocol_id.as_deref()
    }

    /// Whether the stack still considers the call active
    pub fn is_active(&self) -> bool {
        self.active_handle().is_some()
    }

    /// Whether a destroy is waiting for the call to disconnect
    pub fn is_destroy_pending(&self) -> bool {
        self.delayed_destroy
    }

    /// Connect duration; live while active, last reported afterwards
    pub fn duration(&self) -> Duration {
        self.active_handle()
            .and_then(|h| self.ctx.stack.call_info(h).ok())
            .map_or(self.total_duration, |info| info.connect_duration)
    }

    /// Place the call (caller) or answer it (receiver)
    ///
    /// Valid only for a caller in `Inited` or a receiver in `Ringing`. A stack
    /// rejection aborts the call.
    pub fn start(&mut self, with_video: bool) -> bool {
        info!(call_id = %self.id, with_video, remote = %self.remote_uri, "Starting call");
        let setting = CallSetting::new(with_video);
        match (self.role, self.state) {
            (CallRole::Caller, CallState::Inited) => {
                if let Some(handle) = self.handle {
                    warn!(call_id = %self.id, handle = handle.0, "Call already placed");
                    return false;
                }
                match self.ctx.stack.make_call(self.account, &self.remote_uri, &setting) {
                    Ok(handle) => {
                        self.attach(handle);
                        if let Ok(info) = self.ctx.stack.call_info(handle) {
                            self.protocol_id = Some(info.call_id);
                        }
                        true
                    }
                    Err(err) => {
                        self.set_error(err);
                        false
                    }
                }
            }
            (CallRole::Receiver, CallState::Ringing) => {
                let Some(handle) = self.handle else {
                    warn!(call_id = %self.id, "Cannot answer call without native handle");
                    return false;
                };
                match self.ctx.stack.answer(handle, status::OK, &setting) {
                    Ok(()) => true,
                    Err(err) => {
                        self.set_error(err);
                        false
                    }
                }
            }
            (role, state) => {
                warn!(call_id = %self.id, ?role, %state, "Call cannot be started in this state");
                false
            }
        }
    }

    /// Ask the stack to end the call
    ///
    /// Best effort: a failure is reported and leaves the state untouched,
    /// state changes only ever arrive as events.
    pub fn hangup(&mut self, code: u16, reason: &str) -> bool {
        let Some(handle) = self.active_handle() else {
            debug!(call_id = %self.id, "Hangup ignored, call is not active");
            return false;
        };
        info!(call_id = %self.id, code, handle = handle.0, "Hanging up call");
        match self.ctx.stack.hangup(handle, code, reason) {
            Ok(()) => true,
            Err(err) => {
                warn!(call_id = %self.id, status = %err, "Hangup failed: {}", self.ctx.stack.status_text(err));
                false
            }
        }
    }

    /// Hang up and schedule deletion, waiting at most `max_wait` for the stack
    ///
    /// Returns true when deletion has been scheduled. Returns false when the
    /// call was still active after `max_wait`; it is then deleted once it
    /// reaches a terminal state.
    pub fn destroy(&mut self, max_wait: Duration) -> bool {
        info!(call_id = %self.id, max_wait_ms = max_wait.as_millis() as u64, "Destroying call");

        if self.hangup(status::DECLINE, "") {
            let started = Instant::now();
            let mut remaining = max_wait;
            while self.is_active() && !remaining.is_zero() {
                self.signal.wait_for(remaining.min(self.ctx.destroy_tick));
                remaining = max_wait.saturating_sub(started.elapsed());
            }

            if self.is_active() {
                info!(call_id = %self.id, "Waiting for call disconnection");
                self.delayed_destroy = true;
                return false;
            }
        }

        self.schedule_deletion();
        true
    }

    /// Play DTMF digits into the call; at most 16 digits are sent
    pub fn send_dtmf(&mut self, digits: &str) -> bool {
        let Some(handle) = self.active_handle() else {
            return false;
        };
        let tones: Vec<ToneDigit> = digits
            .chars()
            .take(DTMF_MAX_DIGITS)
            .map(|digit| ToneDigit {
                digit,
                on: DTMF_ON,
                off: DTMF_OFF,
                volume: 0,
            })
            .collect();
        if tones.is_empty() {
            return false;
        }

        match self.ctx.stack.send_dtmf(handle, &tones) {
            Ok(()) => {
                let sent: String = tones.iter().map(|t| t.digit).collect();
                debug!(call_id = %self.id, digits = %sent, "DTMF sent");
                self.emit(PhoneEvent::DtmfSent {
                    call: self.id,
                    digits: sent,
                });
                true
            }
            Err(err) => {
                warn!(call_id = %self.id, status = %err, "Failed to send DTMF");
                false
            }
        }
    }

    /// Apply one stack event; only call-scoped kinds reach a call
    pub(crate) fn process_event(&mut self, event: SipEvent, hub: &mut RenderHub) {
        match event {
            SipEvent::CallState {
                state,
                status,
                duration,
                media_close_deadline,
                ..
            } => {
                self.total_duration = duration;
                self.media_close_deadline = media_close_deadline;
                self.set_status(status, status::reason_phrase(status));
                self.set_state(CallState::from_invite(state, status));
            }
            SipEvent::CallMediaState { conf_slot, media_status, .. } => {
                match media_status {
                    MediaStatus::Active => {
                        if let Some(slot) = conf_slot {
                            self.connect_audio(slot);
                        }
                    }
                    MediaStatus::Error => {
                        if let Some(handle) = self.active_handle() {
                            warn!(call_id = %self.id, "Media error, hanging up");
                            if let Err(err) =
                                self.ctx
                                    .stack
                                    .hangup(handle, status::INTERNAL_SERVER_ERROR, "ICE negotiation failed")
                            {
                                warn!(call_id = %self.id, status = %err, "Hangup after media error failed");
                            }
                        }
                    }
                    _ => {}
                }
                self.update_playback_widgets(hub);
                self.emit(PhoneEvent::CallMediaChanged { call: self.id });
            }
            SipEvent::Error { status, .. } => self.set_error(status),
            other @ (SipEvent::RegState { .. } | SipEvent::IncomingCall { .. }) => {
                warn!(call_id = %self.id, kind = ?other.kind(), "Unexpected event kind delivered to call, discarded");
            }
        }
    }

    /// When deletion may run, if it has been scheduled
    pub(crate) fn deletion_due(&self) -> Option<Instant> {
        self.deletion_due
            .map(|due| self.media_close_deadline.map_or(due, |deadline| due.max(deadline)))
    }

    /// Final teardown before the call object is dropped
    pub(crate) fn release(&mut self, hub: &mut RenderHub) {
        if let Some(handle) = self.handle.take() {
            self.ctx.registry.remove(handle);
            if self.ctx.stack.is_call_active(handle) {
                if let Err(err) = self.ctx.stack.hangup(handle, status::DECLINE, "") {
                    warn!(call_id = %self.id, status = %err, "Hangup on release failed: {}", self.ctx.stack.status_text(err));
                }
            }
        }
        for widget in std::mem::take(&mut self.playback_widgets).into_values().flatten() {
            hub.remove_widget(widget);
        }
        info!(call_id = %self.id, remote = %self.remote_uri, "Call destroyed");
    }

    /// Drop the native side without a hangup; used when the stack is gone
    pub(crate) fn invalidate(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.ctx.registry.remove(handle);
        }
        self.delayed_destroy = false;
    }

    fn active_handle(&self) -> Option<CallHandle> {
        self.handle.filter(|h| self.ctx.stack.is_call_active(*h))
    }

    fn attach(&mut self, handle: CallHandle) {
        self.handle = Some(handle);
        self.ctx.registry.insert(handle, self.id, self.signal.clone());
    }

    fn connect_audio(&self, slot: ConfSlot) {
        let stack = &self.ctx.stack;
        for (source, sink) in [(slot, ConfSlot::MASTER), (ConfSlot::MASTER, slot)] {
            if let Err(err) = stack.conf_connect(source, sink) {
                warn!(call_id = %self.id, status = %err, source = source.0, sink = sink.0, "Failed to connect audio slot");
            }
        }
    }

    fn schedule_deletion(&mut self) {
        if self.deletion_due.is_some() {
            return;
        }
        let now = Instant::now();
        let due = self.media_close_deadline.map_or(now, |deadline| deadline.max(now));
        self.deletion_due = Some(due);
        self.ctx.ui.post(UiMessage::DestroyCall { call: self.id, due });
    }

    fn set_state(&mut self, state: CallState) {
        if self.state.is_terminal() || state <= self.state {
            return;
        }
        info!(call_id = %self.id, from = %self.state, to = %state, remote = %self.remote_uri, "Call state changed");
        self.state = state;

        if state.is_terminal() {
            if let Some(handle) = self.handle.take() {
                self.ctx.registry.remove(handle);
            }
            if self.delayed_destroy {
                self.destroy(Duration::ZERO);
            }
        }
        self.emit(PhoneEvent::CallStateChanged { call: self.id, state });
    }

    fn set_status(&mut self, code: u16, text: &str) {
        if self.state.is_terminal() || self.status_code == code {
            return;
        }
        self.status_code = code;
        self.status_text = text.to_string();
        debug!(call_id = %self.id, code, text, "Call status changed");
        self.emit(PhoneEvent::CallStatusChanged {
            call: self.id,
            code,
            text: self.status_text.clone(),
        });
    }

    fn set_error(&mut self, err: StackStatus) {
        if self.state.is_terminal() {
            return;
        }
        let text = self.ctx.stack.status_text(err);
        warn!(call_id = %self.id, status = %err, "Call failed: {}", text);
        self.set_status(status::INTERNAL_SERVER_ERROR, &text);
        self.set_state(CallState::Aborted);
    }

    fn emit(&self, event: PhoneEvent) {
        // No subscribers is not an error
        let _ = self.ctx.events.send(event);
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("remote_uri", &self.remote_uri)
            .field("status_code", &self.status_code)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ui_channel;
    use crate::stack::InviteState;
    use crate::stack::mock::{HangupMode, MockOp, MockStack};
    use tracing_test::traced_test;

    struct Fixture {
        stack: Arc<MockStack>,
        ctx: Arc<CallContext>,
        events: broadcast::Receiver<PhoneEvent>,
        _rx: crate::dispatch::UiReceiver,
    }

    fn fixture() -> Fixture {
        let stack = Arc::new(MockStack::new());
        let (ui, rx) = ui_channel();
        let (tx, events) = broadcast::channel(64);
        let ctx = Arc::new(CallContext {
            stack: stack.clone(),
            registry: Arc::new(CallRegistry::new()),
            ui,
            events: tx,
            destroy_tick: Duration::from_millis(100),
        });
        Fixture {
            stack,
            ctx,
            events,
            _rx: rx,
        }
    }

    fn state_event(call: &Call, state: InviteState, status: u16) -> SipEvent {
        SipEvent::CallState {
            call: call.id(),
            state,
            status,
            duration: Duration::ZERO,
            media_close_deadline: None,
        }
    }

    #[test]
    fn test_states_never_go_back() {
        let f = fixture();
        let mut hub = RenderHub::new();
        let mut call = Call::outgoing(f.ctx.clone(), Uuid::new_v4(), AccountHandle(0), "sip:bob@example.com");
        assert!(call.start(false));

        call.process_event(state_event(&call, InviteState::Early, 180), &mut hub);
        assert_eq!(call.state(), CallState::Ringing);
        call.process_event(state_event(&call, InviteState::Calling, 100), &mut hub);
        assert_eq!(call.state(), CallState::Ringing);
        call.process_event(state_event(&call, InviteState::Confirmed, 200), &mut hub);
        assert_eq!(call.state(), CallState::Confirmed);

        call.process_event(state_event(&call, InviteState::Disconnected, 603), &mut hub);
        assert_eq!(call.state(), CallState::Disconnected);
        assert!(call.native_handle().is_none());

        // Terminal: neither Aborted nor a new status is applied
        call.process_event(
            SipEvent::Error {
                call: call.id(),
                status: StackStatus::new(70004),
            },
            &mut hub,
        );
        assert_eq!(call.state(), CallState::Disconnected);
        assert_eq!(call.status_code(), 603);
    }

    #[test]
    fn test_make_call_failure_aborts_once() {
        let mut f = fixture();
        f.stack.fail_next(MockOp::MakeCall, StackStatus::new(171_039));
        let mut call = Call::outgoing(f.ctx.clone(), Uuid::new_v4(), AccountHandle(0), "sip:bob@example.com");
        assert!(!call.start(true));
        assert_eq!(call.state(), CallState::Aborted);
        assert_eq!(call.status_code(), status::INTERNAL_SERVER_ERROR);
        assert!(!call.status_text().is_empty());

        let mut aborted = 0;
        while let Ok(event) = f.events.try_recv() {
            if matches!(event, PhoneEvent::CallStateChanged { state: CallState::Aborted, .. }) {
                aborted += 1;
            }
        }
        assert_eq!(aborted, 1);
        // Starting again is a precondition failure, not another abort
        assert!(!call.start(true));
    }

    #[test]
    fn test_start_requires_matching_role_and_state() {
        let f = fixture();
        let mut call = Call::outgoing(f.ctx.clone(), Uuid::new_v4(), AccountHandle(0), "sip:bob@example.com");
        assert!(call.start(false));
        let handle = call.native_handle().unwrap();

        // Placing it again before any state event arrives must not dial twice
        assert!(!call.start(false));
        assert_eq!(f.stack.op_count(MockOp::MakeCall), 1);
        assert_eq!(call.native_handle(), Some(handle));

        assert!(call.destroy(Duration::from_secs(1)));
        assert!(!f.stack.is_call_active(handle));
        assert!(f.stack.enum_calls().is_empty());
    }

    #[test]
    fn test_hangup_failure_keeps_state() {
        let f = fixture();
        let mut call = Call::outgoing(f.ctx.clone(), Uuid::new_v4(), AccountHandle(0), "sip:bob@example.com");
        assert!(call.start(false));
        f.stack.fail_next(MockOp::Hangup, StackStatus::new(70013));
        assert!(!call.hangup(status::DECLINE, "bye"));
        assert_eq!(call.state(), CallState::Inited);
        assert!(call.is_active());
    }

    #[test]
    #[traced_test]
    fn test_release_reports_failed_hangup() {
        let f = fixture();
        let mut hub = RenderHub::new();
        let mut call = Call::outgoing(f.ctx.clone(), Uuid::new_v4(), AccountHandle(0), "sip:bob@example.com");
        assert!(call.start(false));
        let handle = call.native_handle().unwrap();

        f.stack.fail_next(MockOp::Hangup, StackStatus::new(70013));
        call.release(&mut hub);
        assert!(call.native_handle().is_none());
        assert!(!f.ctx.registry.contains(handle));
        assert!(logs_contain("Hangup on release failed"));
    }

    #[test]
    fn test_destroy_inactive_call_returns_immediately() {
        let f = fixture();
        let mut call = Call::outgoing(f.ctx.clone(), Uuid::new_v4(), AccountHandle(0), "sip:bob@example.com");
        let started = Instant::now();
        assert!(call.destroy(Duration::ZERO));
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(call.deletion_due().is_some());
    }

    #[test]
    fn test_destroy_times_out_and_defers() {
        let f = fixture();
        f.stack.set_hangup_mode(HangupMode::Ignored);
        let mut hub = RenderHub::new();
        let mut call = Call::outgoing(f.ctx.clone(), Uuid::new_v4(), AccountHandle(0), "sip:bob@example.com");
        assert!(call.start(false));

        let started = Instant::now();
        assert!(!call.destroy(Duration::from_millis(250)));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(250));
        assert!(waited < Duration::from_millis(1000));
        assert!(call.is_destroy_pending());
        assert!(call.deletion_due().is_none());

        // The terminal state completes the pending destroy
        let handle = call.native_handle().unwrap();
        f.stack.disconnect(handle, 603);
        call.process_event(state_event(&call, InviteState::Disconnected, 603), &mut hub);
        assert!(call.deletion_due().is_some());
    }

    #[test]
    fn test_dtmf_truncated_to_sixteen_digits() {
        let mut f = fixture();
        let mut call = Call::outgoing(f.ctx.clone(), Uuid::new_v4(), AccountHandle(0), "sip:bob@example.com");
        assert!(!call.send_dtmf("123"));
        assert!(call.start(false));
        assert!(call.send_dtmf("0123456789*#ABCD99"));

        let handle = call.native_handle().unwrap();
        assert_eq!(f.stack.sent_dtmf(handle), "0123456789*#ABCD");
        let mut sent = None;
        while let Ok(event) = f.events.try_recv() {
            if let PhoneEvent::DtmfSent { digits, .. } = event {
                sent = Some(digits);
            }
        }
        assert_eq!(sent.as_deref(), Some("0123456789*#ABCD"));
    }
}
