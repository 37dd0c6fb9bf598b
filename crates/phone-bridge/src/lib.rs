//! # Phone Bridge - Native SIP Stack to GUI Event Loop
//!
//! This crate connects a callback-driven native SIP/media stack to an
//! application whose state lives on a single GUI thread:
//!
//! - **worker**: one background thread runs the blocking stack operations
//!   (create, destroy, start/stop preview) in submission order
//! - **event**: stack callbacks are snapshotted on whatever thread they fire
//!   and posted to the GUI thread
//! - **call**: a forward-only call state machine with a bounded, deferred
//!   destroy protocol
//! - **render**: a video device implementation that hands decoded frames to
//!   GUI widgets through shared render surfaces
//! - **phone**: the GUI-side owner of calls, accounts, devices and previews
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rvoip_phone_bridge::{AccountConfig, Phone, PhoneConfig, PhoneEvent};
//! use rvoip_phone_bridge::stack::mock::MockStack;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut phone = Phone::new(PhoneConfig::default(), Arc::new(MockStack::with_default_devices()))?;
//!     let mut events = phone.subscribe();
//!
//!     phone.init_stack()?;
//!     phone.run_for(Duration::from_millis(50)).await;
//!
//!     let account = uuid::Uuid::new_v4();
//!     phone.insert_account(account, &AccountConfig {
//!         user_id: "alice@example.com".into(),
//!         password: "secret".into(),
//!         ..Default::default()
//!     })?;
//!
//!     let call = phone.new_call(account, "sip:bob@example.com")?;
//!     if let Some(call) = phone.call_mut(call) {
//!         call.start(false);
//!     }
//!     phone.run_for(Duration::from_millis(50)).await;
//!
//!     while let Ok(event) = events.try_recv() {
//!         if let PhoneEvent::CallStateChanged { state, .. } = event {
//!             println!("call is now {:?}", state);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Threading
//!
//! [`Phone`], [`Call`] and every widget are confined to the thread that
//! created the phone. Stack callbacks, the worker and render streams only
//! ever talk to it through one message channel, which the GUI thread drains
//! with [`Phone::process_events`] or [`Phone::run_for`].

pub mod call;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod media;
pub mod phone;
pub mod render;
pub mod stack;
pub mod worker;

pub(crate) mod dispatch;

// Re-export main types
pub use call::{Call, CallId, CallRole, CallState};
pub use config::{PhoneConfig, VideoCodecConfig};
pub use error::{PhoneError, PhoneResult};
pub use media::{MediaDirection, MediaType, SipDevice};
pub use phone::{AccountConfig, AccountId, CallHandler, EventStream, Phone, PhoneEvent, StackState};
pub use render::{Painter, RenderHub, VideoWidget, WidgetId};
pub use stack::{SipStack, StackStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
