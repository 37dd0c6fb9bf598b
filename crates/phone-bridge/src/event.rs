//! Stack events and the callback bridge producing them
//!
//! [`CallbackBridge`] is the [`StackCallbacks`] table handed to the stack. It
//! runs on the stack's threads, so it only snapshots what the GUI thread will
//! need into a [`SipEvent`], posts it, and wakes anyone blocked in a call's
//! destroy-wait. All interpretation of the event happens later, on the GUI
//! thread.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::call::{CallId, CallRegistry};
use crate::dispatch::{UiMessage, UiSender};
use crate::media::MediaStatus;
use crate::stack::{
    AccountHandle, CallHandle, ConfSlot, InviteState, MediaEvent, NatDetectResult, SipStack, StackCallbacks,
    StackStatus,
};

/// Kinds of [`SipEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SipEventKind {
    RegState,
    IncomingCall,
    CallState,
    CallMediaState,
    Error,
}

/// One asynchronous stack occurrence, delivered once to the GUI thread
#[derive(Debug, Clone, PartialEq)]
pub enum SipEvent {
    /// Registration state of an account changed
    RegState { account: AccountHandle },
    /// The stack received a new call
    IncomingCall { account: AccountHandle, call: CallHandle },
    /// A tracked call's invite state changed
    CallState {
        call: CallId,
        state: InviteState,
        status: u16,
        duration: Duration,
        /// Earliest deletion time when media was up and needs time to close
        media_close_deadline: Option<Instant>,
    },
    /// A tracked call's media state changed
    CallMediaState {
        call: CallId,
        conf_slot: Option<ConfSlot>,
        media_status: MediaStatus,
    },
    /// Reading a tracked call's state from the stack failed
    Error { call: CallId, status: StackStatus },
}

impl SipEvent {
    pub fn kind(&self) -> SipEventKind {
        match self {
            Self::RegState { .. } => SipEventKind::RegState,
            Self::IncomingCall { .. } => SipEventKind::IncomingCall,
            Self::CallState { .. } => SipEventKind::CallState,
            Self::CallMediaState { .. } => SipEventKind::CallMediaState,
            Self::Error { .. } => SipEventKind::Error,
        }
    }

    /// Target call of a call-scoped event
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            Self::CallState { call, .. } | Self::CallMediaState { call, .. } | Self::Error { call, .. } => Some(*call),
            Self::RegState { .. } | Self::IncomingCall { .. } => None,
        }
    }
}

/// Stack callback table posting [`SipEvent`]s to the GUI thread
pub(crate) struct CallbackBridge {
    stack: Weak<dyn SipStack>,
    registry: Arc<CallRegistry>,
    ui: UiSender,
    close_media_delay: Duration,
}

impl CallbackBridge {
    pub(crate) fn new(
        stack: Weak<dyn SipStack>,
        registry: Arc<CallRegistry>,
        ui: UiSender,
        close_media_delay: Duration,
    ) -> Self {
        Self {
            stack,
            registry,
            ui,
            close_media_delay,
        }
    }

    fn post(&self, event: SipEvent) {
        trace!(kind = ?event.kind(), "Posting stack event");
        self.ui.post(UiMessage::Sip(event));
    }
}

impl StackCallbacks for CallbackBridge {
    fn on_reg_state(&self, account: AccountHandle) {
        self.post(SipEvent::RegState { account });
    }

    fn on_nat_detect(&self, result: NatDetectResult) {
        if result.status.is_success() {
            info!(nat_type = %result.nat_type_name, "NAT detected");
        } else {
            warn!(status = %result.status, "NAT detection failed");
        }
    }

    fn on_incoming_call(&self, account: AccountHandle, call: CallHandle) {
        self.post(SipEvent::IncomingCall { account, call });
    }

    fn on_call_state(&self, call: CallHandle) {
        let Some(entry) = self.registry.lookup(call) else {
            trace!(handle = call.0, "State change of untracked call");
            return;
        };
        let Some(stack) = self.stack.upgrade() else {
            return;
        };

        let event = match stack.call_info(call) {
            Ok(info) => SipEvent::CallState {
                call: entry.call,
                state: info.state,
                status: info.last_status,
                duration: info.connect_duration,
                media_close_deadline: (info.media_status != MediaStatus::None)
                    .then(|| Instant::now() + self.close_media_delay),
            },
            Err(status) => SipEvent::Error {
                call: entry.call,
                status,
            },
        };
        debug!(call_id = %entry.call, handle = call.0, "Call state callback");
        self.post(event);
        entry.signal.notify();
    }

    fn on_call_media_state(&self, call: CallHandle) {
        let Some(entry) = self.registry.lookup(call) else {
            trace!(handle = call.0, "Media change of untracked call");
            return;
        };
        let Some(stack) = self.stack.upgrade() else {
            return;
        };

        let event = match stack.call_info(call) {
            Ok(info) => SipEvent::CallMediaState {
                call: entry.call,
                conf_slot: info.conf_slot,
                media_status: info.media_status,
            },
            Err(status) => SipEvent::Error {
                call: entry.call,
                status,
            },
        };
        debug!(call_id = %entry.call, handle = call.0, "Call media state callback");
        self.post(event);
        entry.signal.notify();
    }

    fn on_call_media_event(&self, call: CallHandle, media_index: usize, event: MediaEvent) {
        trace!(handle = call.0, media = media_index, ?event, "Call media event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallSignal;
    use crate::dispatch::ui_channel;
    use crate::stack::mock::MockStack;
    use uuid::Uuid;

    #[test]
    fn test_event_kinds() {
        let id = Uuid::new_v4();
        let event = SipEvent::Error {
            call: id,
            status: StackStatus::new(1),
        };
        assert_eq!(event.kind(), SipEventKind::Error);
        assert_eq!(event.call_id(), Some(id));
        assert_eq!(SipEvent::RegState { account: AccountHandle(0) }.call_id(), None);
    }

    #[test]
    fn test_untracked_call_is_ignored() {
        let stack: Arc<dyn SipStack> = Arc::new(MockStack::new());
        let (ui, mut rx) = ui_channel();
        let bridge = CallbackBridge::new(
            Arc::downgrade(&stack),
            Arc::new(CallRegistry::new()),
            ui,
            Duration::from_secs(3),
        );
        bridge.on_call_state(CallHandle(7));
        bridge.on_call_media_state(CallHandle(7));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_missing_call_info_becomes_error() {
        let stack: Arc<dyn SipStack> = Arc::new(MockStack::new());
        let registry = Arc::new(CallRegistry::new());
        let (ui, mut rx) = ui_channel();
        let bridge = CallbackBridge::new(Arc::downgrade(&stack), registry.clone(), ui, Duration::from_secs(3));

        let id = Uuid::new_v4();
        registry.insert(CallHandle(42), id, Arc::new(CallSignal::default()));
        bridge.on_call_state(CallHandle(42));
        match rx.try_recv() {
            Some(UiMessage::Sip(SipEvent::Error { call, .. })) => assert_eq!(call, id),
            other => panic!("unexpected message {:?}", other),
        }
    }
}
