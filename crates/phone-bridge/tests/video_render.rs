//! Video rendering into GUI widgets: call playback and local preview

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{PUMP_TIMEOUT, RecordingPainter, add_account, pump_until, started_phone};
use rvoip_phone_bridge::media::{FourCc, MediaFormat};
use rvoip_phone_bridge::render::{PixelFormat, WidgetOwner};
use rvoip_phone_bridge::stack::InviteState;
use rvoip_phone_bridge::stack::mock::{MockOp, MockStack};
use rvoip_phone_bridge::{CallState, MediaDirection, MediaType, Phone, PhoneError, WidgetId};

/// 2x2 RGBA, small enough to push whole frames by hand
fn tiny_format() -> MediaFormat {
    MediaFormat::video(FourCc::RGBA, 2, 2, 25, 1)
}

fn video_stack() -> Arc<MockStack> {
    let stack = Arc::new(MockStack::with_default_devices());
    stack.set_preview_format(tiny_format());
    stack
}

fn widget_surface_bound(phone: &Phone, widget: WidgetId) -> bool {
    phone.widget(widget).is_some_and(|w| w.surface().is_some())
}

#[test]
fn test_playback_widget_paints_frames_and_clears() {
    let stack = video_stack();
    let mut phone = started_phone(&stack);
    let (account, _) = add_account(&mut phone, &stack);

    let id = phone.new_call(account, "sip:bob@example.com").unwrap();
    assert!(phone.call_mut(id).unwrap().start(true));
    let handle = phone.call(id).unwrap().native_handle().unwrap();
    stack.advance_call(handle, InviteState::Confirmed, 200);
    stack.activate_media(handle, true);
    stack.open_call_video(handle, 1, tiny_format()).unwrap();
    phone.process_events();

    // Audio streams have no playback widget
    assert!(phone.playback_widget(id, 0).is_none());
    let widget = phone.playback_widget(id, 1).unwrap();
    assert_eq!(phone.call(id).unwrap().playback_widgets(1), &[widget]);
    let surface_id = phone.widget(widget).unwrap().surface().unwrap();
    assert_eq!(phone.widget(widget).unwrap().size_hint(), (2, 2));
    assert_eq!(
        phone.render_hub().surface(surface_id).unwrap().pixel_format(),
        Some(PixelFormat::Rgba8888)
    );

    let frame: Vec<u8> = (0..16).collect();
    stack.push_call_video_frame(handle, 1, &frame).unwrap();
    phone.process_events();
    assert!(phone.widget(widget).unwrap().needs_repaint());

    let mut painter = RecordingPainter::default();
    assert!(phone.paint_widget(widget, &mut painter));
    assert_eq!(painter.frames.len(), 1);
    assert_eq!(painter.frames[0].data, frame);
    assert!(!phone.widget(widget).unwrap().needs_repaint());

    // Clearing the surface paints the blank background
    let surface = phone.render_hub().surface(surface_id).unwrap().clone();
    assert!(surface.put_frame(None));
    phone.process_events();
    assert!(phone.widget(widget).unwrap().needs_repaint());
    assert!(phone.paint_widget(widget, &mut painter));
    assert_eq!(painter.frames.len(), 1);
    assert_eq!(painter.blanks, 1);

    // Disconnect tears the stream down and unbinds the widget
    stack.disconnect(handle, 603);
    assert!(pump_until(&mut phone, |p| {
        p.call(id).is_some_and(|c| c.state() == CallState::Disconnected)
    }));
    assert!(phone.widget(widget).is_some_and(|w| w.surface().is_none()));
    assert!(phone.render_hub().surface(surface_id).is_none());

    // Deleting the call takes its widgets along
    assert!(phone.destroy_call(id, Duration::ZERO).unwrap());
    assert!(pump_until(&mut phone, |p| p.call(id).is_none()));
    assert!(phone.widget(widget).is_none());
}

#[test]
fn test_destroyed_playback_widget_is_forgotten_by_call() {
    let stack = video_stack();
    let mut phone = started_phone(&stack);
    let (account, _) = add_account(&mut phone, &stack);

    let id = phone.new_call(account, "sip:bob@example.com").unwrap();
    assert!(phone.call_mut(id).unwrap().start(true));
    let handle = phone.call(id).unwrap().native_handle().unwrap();
    stack.activate_media(handle, true);
    stack.open_call_video(handle, 1, tiny_format()).unwrap();
    phone.process_events();

    let first = phone.playback_widget(id, 1).unwrap();
    let second = phone.playback_widget(id, 1).unwrap();
    assert_eq!(phone.call(id).unwrap().playback_widgets(1).len(), 2);

    assert!(phone.destroy_widget(first));
    assert!(!phone.destroy_widget(first));
    assert_eq!(phone.call(id).unwrap().playback_widgets(1), &[second]);
}

#[test]
fn test_preview_shared_between_widgets() {
    let stack = video_stack();
    let mut phone = started_phone(&stack);
    let camera = phone.default_device(MediaType::Video, MediaDirection::CAPTURE).unwrap();
    assert_eq!(camera.name, "Mock camera");

    let first = phone.start_video_preview(&camera).unwrap();
    assert!(!widget_surface_bound(&phone, first));
    assert!(pump_until(&mut phone, |p| widget_surface_bound(p, first)));

    stack.push_preview_frame(camera.index, &[9; 16]).unwrap();
    phone.process_events();
    let mut painter = RecordingPainter::default();
    assert!(phone.paint_widget(first, &mut painter));
    assert_eq!(painter.frames.len(), 1);

    // A second widget joins the running preview
    let second = phone.start_video_preview(&camera).unwrap();
    assert_eq!(phone.widget(second).unwrap().surface(), phone.widget(first).unwrap().surface());
    assert_eq!(stack.op_count(MockOp::PreviewStart), 1);

    // Releasing one widget keeps the preview running for the other
    phone.stop_video_preview(first);
    thread::sleep(Duration::from_millis(20));
    phone.process_events();
    assert_eq!(stack.op_count(MockOp::PreviewStop), 0);
    assert_eq!(phone.widget(first).unwrap().owner(), WidgetOwner::Detached);
    assert!(widget_surface_bound(&phone, first));

    // Releasing the last one stops it
    assert!(phone.destroy_widget(second));
    assert!(matches!(
        phone.start_video_preview(&camera),
        Err(PhoneError::InvalidState { .. })
    ));
    assert!(pump_until(&mut phone, |p| !widget_surface_bound(p, first)));
    assert_eq!(stack.op_count(MockOp::PreviewStop), 1);

    // Once the stop has been applied the device can be previewed again
    let deadline = Instant::now() + PUMP_TIMEOUT;
    let third = loop {
        match phone.start_video_preview(&camera) {
            Ok(widget) => break widget,
            Err(PhoneError::InvalidState { .. }) if Instant::now() < deadline => {
                thread::sleep(Duration::from_millis(2));
                phone.process_events();
            }
            Err(err) => panic!("preview did not restart: {}", err),
        }
    };
    assert!(pump_until(&mut phone, |p| widget_surface_bound(p, third)));
    assert_eq!(stack.op_count(MockOp::PreviewStart), 2);
}

#[test]
fn test_preview_stopped_before_start_completes_attaches_then_detaches() {
    let stack = video_stack();
    let mut phone = started_phone(&stack);
    let camera = phone.default_device(MediaType::Video, MediaDirection::CAPTURE).unwrap();

    let widget = phone.start_video_preview(&camera).unwrap();
    phone.stop_video_preview(widget);

    // Step message by message, recording each change of the widget's binding
    let mut bindings = vec![phone.widget(widget).unwrap().surface()];
    let deadline = Instant::now() + PUMP_TIMEOUT;
    while bindings.len() < 3 {
        assert!(Instant::now() < deadline, "preview never attached and detached: {:?}", bindings);
        if !phone.process_next() {
            thread::sleep(Duration::from_millis(2));
            continue;
        }
        let surface = phone.widget(widget).unwrap().surface();
        if bindings.last() != Some(&surface) {
            bindings.push(surface);
        }
    }

    assert!(bindings[0].is_none());
    assert!(bindings[1].is_some());
    assert!(bindings[2].is_none());
    assert_eq!(phone.widget(widget).unwrap().owner(), WidgetOwner::Detached);
    assert_eq!(stack.op_count(MockOp::PreviewStart), 1);
    assert_eq!(stack.op_count(MockOp::PreviewStop), 1);
}

#[test]
fn test_preview_rejects_non_capture_devices() {
    let stack = video_stack();
    let mut phone = started_phone(&stack);

    let renderer = phone.default_device(MediaType::Video, MediaDirection::PLAYBACK).unwrap();
    assert!(matches!(
        phone.start_video_preview(&renderer),
        Err(PhoneError::DeviceNotFound { .. })
    ));
    let sound_card = phone.default_device(MediaType::Audio, MediaDirection::CAPTURE).unwrap();
    assert!(matches!(
        phone.start_video_preview(&sound_card),
        Err(PhoneError::DeviceNotFound { .. })
    ));
    assert_eq!(phone.render_hub().widget_count(), 0);
}
