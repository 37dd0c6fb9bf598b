//! Incoming call dispatch: handler order, rejection and duplicate notifications

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use common::{add_account, drain, pump_until, started_phone};
use rvoip_phone_bridge::call::status;
use rvoip_phone_bridge::stack::mock::{MockOp, MockStack};
use rvoip_phone_bridge::stack::{AccountHandle, InviteState, SipStack};
use rvoip_phone_bridge::{Call, CallHandler, CallRole, CallState, PhoneEvent};

fn mock_stack() -> Arc<MockStack> {
    let stack = Arc::new(MockStack::new());
    stack.add_audio_device("Mock sound card", 1, 1);
    stack
}

fn accept_all() -> Rc<dyn CallHandler> {
    Rc::new(|_order: i32, _call: &mut Call| true)
}

#[test]
fn test_unhandled_call_is_rejected_and_deleted() {
    let stack = mock_stack();
    let mut phone = started_phone(&stack);
    let (_, account) = add_account(&mut phone, &stack);
    let mut events = phone.subscribe();

    let handle = stack.incoming_call(account, "sip:carol@example.com", "in-1@example.com");
    assert!(pump_until(&mut phone, |p| p.calls(false).is_empty()));

    let info = stack.call_info(handle).unwrap();
    assert_eq!(info.state, InviteState::Disconnected);
    assert_eq!(info.last_status, status::NOT_ACCEPTABLE_HERE);
    assert_eq!(phone.render_hub().widget_count(), 0);

    let seen = drain(&mut events);
    let created: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            PhoneEvent::CallCreated { call } => Some(*call),
            _ => None,
        })
        .collect();
    assert_eq!(created.len(), 1);
    assert!(seen.contains(&PhoneEvent::CallDestroyed { call: created[0] }));
}

#[test]
fn test_handlers_offered_in_order_until_accepted() {
    let stack = mock_stack();
    let mut phone = started_phone(&stack);
    let (_, account) = add_account(&mut phone, &stack);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let recorder = |accept: bool| -> Rc<dyn CallHandler> {
        let seen = seen.clone();
        Rc::new(move |order: i32, call: &mut Call| {
            seen.borrow_mut().push((order, call.remote_uri().to_string()));
            accept
        })
    };
    assert!(phone.insert_call_handler(20, recorder(true)));
    assert!(phone.insert_call_handler(-10, recorder(false)));
    assert!(phone.insert_call_handler(30, recorder(true)));
    assert_eq!(phone.call_handler_count(), 3);

    stack.incoming_call(account, "sip:carol@example.com", "in-2@example.com");
    assert!(pump_until(&mut phone, |p| p.calls(false).len() == 1));

    let orders: Vec<i32> = seen.borrow().iter().map(|(order, _)| *order).collect();
    assert_eq!(orders, vec![-10, 20]);
    assert_eq!(seen.borrow()[0].1, "sip:carol@example.com");

    let call = phone.calls(false)[0];
    assert_eq!(call.role(), CallRole::Receiver);
    assert_eq!(call.state(), CallState::Ringing);
    assert_eq!(call.protocol_call_id(), Some("in-2@example.com"));
}

#[test]
fn test_handler_answers_call() {
    let stack = mock_stack();
    let mut phone = started_phone(&stack);
    let (_, account) = add_account(&mut phone, &stack);

    let answer: Rc<dyn CallHandler> = Rc::new(|_order: i32, call: &mut Call| call.start(false));
    phone.insert_call_handler(0, answer);

    let handle = stack.incoming_call(account, "sip:carol@example.com", "in-3@example.com");
    assert!(pump_until(&mut phone, |p| {
        p.calls(false).first().is_some_and(|c| c.state() == CallState::Connecting)
    }));
    assert_eq!(stack.op_count(MockOp::Answer), 1);
    assert_eq!(stack.call_info(handle).unwrap().last_status, status::OK);
}

#[test]
fn test_duplicate_notifications_are_ignored() {
    let stack = mock_stack();
    let mut phone = started_phone(&stack);
    let (_, account) = add_account(&mut phone, &stack);
    phone.insert_call_handler(0, accept_all());

    let handle = stack.incoming_call(account, "sip:carol@example.com", "dup@example.com");
    assert!(pump_until(&mut phone, |p| p.calls(false).len() == 1));

    // Same native call announced again
    stack.redeliver_incoming_call(account, handle);
    // Same dialog under a second native handle
    let second = stack.incoming_call(account, "sip:carol@example.com", "dup@example.com");
    phone.process_events();

    assert_eq!(phone.calls(false).len(), 1);
    assert_eq!(phone.calls(false)[0].native_handle(), Some(handle));
    // The duplicate is left alone, not rejected
    assert!(stack.is_call_active(second));
    assert_eq!(stack.op_count(MockOp::Hangup), 0);
}

#[test]
fn test_call_for_unknown_account_is_rejected() {
    let stack = mock_stack();
    let mut phone = started_phone(&stack);
    phone.insert_call_handler(0, accept_all());

    let handle = stack.incoming_call(AccountHandle(42), "sip:mallory@example.com", "stray@example.com");
    phone.process_events();

    assert!(phone.calls(false).is_empty());
    assert!(!stack.is_call_active(handle));
    assert_eq!(stack.call_info(handle).unwrap().last_status, status::NOT_ACCEPTABLE_HERE);
}
