//! Shared fixtures for the phone bridge integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rvoip_phone_bridge::render::VideoFrame;
use rvoip_phone_bridge::stack::AccountHandle;
use rvoip_phone_bridge::stack::mock::MockStack;
use rvoip_phone_bridge::{AccountConfig, AccountId, Painter, Phone, PhoneConfig, PhoneEvent};
use tokio::sync::broadcast;
use uuid::Uuid;

pub const PUMP_TIMEOUT: Duration = Duration::from_secs(5);

/// Short delays so deferred deletions run within a test
pub fn fast_config() -> PhoneConfig {
    PhoneConfig::default()
        .with_close_media_delay(Duration::from_millis(150))
        .with_destroy_tick(Duration::from_millis(20))
}

/// Phone whose stack has finished starting
pub fn started_phone(stack: &Arc<MockStack>) -> Phone {
    let mut phone = Phone::new(fast_config(), stack.clone()).expect("phone");
    phone.init_stack().expect("init stack");
    assert!(pump_until(&mut phone, Phone::is_calls_available), "stack did not come up");
    phone
}

/// Pump the phone until `done` holds or the timeout passes
pub fn pump_until(phone: &mut Phone, done: impl Fn(&Phone) -> bool) -> bool {
    let deadline = Instant::now() + PUMP_TIMEOUT;
    loop {
        phone.process_events();
        if done(phone) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

/// Add an account; the mock hands out account handles in order starting at 0
pub fn add_account(phone: &mut Phone, stack: &MockStack) -> (AccountId, AccountHandle) {
    let id = Uuid::new_v4();
    let config = AccountConfig {
        user_id: "alice@example.com".to_string(),
        password: "secret".to_string(),
        ..Default::default()
    };
    phone.insert_account(id, &config).expect("insert account");
    (id, AccountHandle(stack.account_count() as i32 - 1))
}

pub fn drain(events: &mut broadcast::Receiver<PhoneEvent>) -> Vec<PhoneEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

/// Records what a widget painted
#[derive(Debug, Default)]
pub struct RecordingPainter {
    pub frames: Vec<VideoFrame>,
    pub blanks: usize,
}

impl Painter for RecordingPainter {
    fn draw_frame(&mut self, frame: &VideoFrame) {
        self.frames.push(frame.clone());
    }

    fn fill_blank(&mut self) {
        self.blanks += 1;
    }
}
