//! Change notifications published by a [`Phone`](super::Phone)

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::call::{CallId, CallState};

use super::AccountId;

/// Capacity of the notification channel; slow subscribers lag beyond it
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Externally observable change
#[derive(Debug, Clone, PartialEq)]
pub enum PhoneEvent {
    /// The stack came up or went down
    CallsAvailableChanged { available: bool },
    /// The device list changed
    DevicesChanged,
    CallCreated { call: CallId },
    /// The call object is gone; its id is no longer valid
    CallDestroyed { call: CallId },
    CallStateChanged { call: CallId, state: CallState },
    CallStatusChanged { call: CallId, code: u16, text: String },
    /// Streams, properties or playback surfaces of a call changed
    CallMediaChanged { call: CallId },
    DtmfSent { call: CallId, digits: String },
    AccountInserted { account: AccountId },
    AccountChanged { account: AccountId },
    AccountRemoved { account: AccountId },
    AccountRegistrationChanged { account: AccountId, registered: bool },
}

impl PhoneEvent {
    /// Call the event is about, for call-scoped events
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            Self::CallCreated { call }
            | Self::CallDestroyed { call }
            | Self::CallStateChanged { call, .. }
            | Self::CallStatusChanged { call, .. }
            | Self::CallMediaChanged { call }
            | Self::DtmfSent { call, .. } => Some(*call),
            _ => None,
        }
    }
}

/// Stream of [`PhoneEvent`]s for async consumers
pub type EventStream = BroadcastStream<PhoneEvent>;

pub(crate) fn event_channel() -> broadcast::Sender<PhoneEvent> {
    let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    tx
}
