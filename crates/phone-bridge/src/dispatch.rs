//! Message channel into the GUI thread
//!
//! Every cross-thread hand-off in the bridge is a typed message moved through
//! this channel: stack callbacks post [`SipEvent`]s, the worker posts finished
//! [`SipTask`]s, render streams post [`SurfaceNotice`]s, and calls post their
//! own deferred deletion. The GUI thread owns the receiving end and is the
//! only place any of these are acted upon.

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::trace;

use crate::call::CallId;
use crate::event::SipEvent;
use crate::render::SurfaceNotice;
use crate::worker::SipTask;

/// One unit of work for the GUI thread
#[derive(Debug)]
pub(crate) enum UiMessage {
    /// A stack occurrence, snapshotted on the thread that observed it
    Sip(SipEvent),
    /// A worker task that has run to completion
    TaskFinished(SipTask),
    /// A surface changed or changed hands
    Surface(SurfaceNotice),
    /// A call asks to be deleted once `due` has passed
    DestroyCall { call: CallId, due: Instant },
}

/// Sending half of the GUI channel; cheap to clone and usable from any thread
#[derive(Clone)]
pub struct UiSender {
    tx: mpsc::UnboundedSender<UiMessage>,
}

impl UiSender {
    /// Post a message; returns false once the GUI side is gone
    pub(crate) fn post(&self, message: UiMessage) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(err) => {
                trace!("GUI loop closed, dropping {:?}", err.0);
                false
            }
        }
    }
}

impl std::fmt::Debug for UiSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiSender")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Receiving half, owned by the GUI thread
pub(crate) struct UiReceiver {
    rx: mpsc::UnboundedReceiver<UiMessage>,
}

impl UiReceiver {
    /// Next queued message without blocking
    pub(crate) fn try_recv(&mut self) -> Option<UiMessage> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next message
    pub(crate) async fn recv(&mut self) -> Option<UiMessage> {
        self.rx.recv().await
    }
}

/// Create the GUI channel
pub(crate) fn ui_channel() -> (UiSender, UiReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UiSender { tx }, UiReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::AccountHandle;

    #[test]
    fn test_messages_from_one_thread_keep_order() {
        let (tx, mut rx) = ui_channel();
        let producer = std::thread::spawn(move || {
            for i in 0..100 {
                tx.post(UiMessage::Sip(SipEvent::RegState {
                    account: AccountHandle(i),
                }));
            }
        });
        producer.join().unwrap();

        let mut seen = Vec::new();
        while let Some(UiMessage::Sip(SipEvent::RegState { account })) = rx.try_recv() {
            seen.push(account.0);
        }
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_post_after_receiver_dropped() {
        let (tx, rx) = ui_channel();
        drop(rx);
        assert!(!tx.post(UiMessage::Sip(SipEvent::RegState {
            account: AccountHandle(0)
        })));
    }
}
