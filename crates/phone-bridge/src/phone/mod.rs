//! The phone: GUI-thread owner of calls, accounts, devices and previews
//!
//! A [`Phone`] ties the pieces of the bridge together:
//!
//! - blocking stack work (create, destroy, preview) goes through the
//!   [`Worker`] and comes back as a finished task
//! - stack callbacks come back as [`SipEvent`]s
//! - render streams hand their surfaces over as [`SurfaceNotice`]s
//!
//! All of it arrives on one channel and is applied by whichever thread pumps
//! the phone ([`Phone::process_events`], [`Phone::process_next`] or
//! [`Phone::run_for`]). That thread is the GUI thread; a `Phone` is not `Send`
//! and cannot leave it.
//!
//! ```no_run
//! use std::sync::Arc;
//! use rvoip_phone_bridge::config::PhoneConfig;
//! use rvoip_phone_bridge::phone::Phone;
//! use rvoip_phone_bridge::stack::mock::MockStack;
//!
//! # async fn example() -> rvoip_phone_bridge::error::PhoneResult<()> {
//! let mut phone = Phone::new(PhoneConfig::default(), Arc::new(MockStack::with_default_devices()))?;
//! let mut events = phone.subscribe();
//! phone.init_stack()?;
//! phone.run_for(std::time::Duration::from_millis(100)).await;
//! assert!(phone.is_calls_available());
//! # let _ = events.try_recv();
//! # Ok(())
//! # }
//! ```

mod accounts;
mod devices;
mod events;
mod handlers;

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::call::{Call, CallContext, CallId, CallRegistry, status};
use crate::config::PhoneConfig;
use crate::dispatch::{UiMessage, UiReceiver, UiSender, ui_channel};
use crate::error::{PhoneError, PhoneResult};
use crate::event::{CallbackBridge, SipEvent};
use crate::media::SipDevice;
use crate::render::{Painter, RenderFactory, RenderHub, SurfaceId, VideoWidget, WidgetId, WidgetOwner};
use crate::stack::{AccountHandle, CallHandle, SipStack, StackSetup, StackStatus, WindowHandle};
use crate::worker::{SipTask, TaskType, Worker};

use self::handlers::HandlerList;

pub use accounts::AccountConfig;
pub use events::{EVENT_CHANNEL_CAPACITY, EventStream, PhoneEvent};
pub use handlers::CallHandler;

/// Application-level account identifier
pub type AccountId = Uuid;

/// Name the GUI thread is registered with in the stack
const GUI_THREAD_NAME: &str = "gui";
const SHUTDOWN_POLL: Duration = Duration::from_millis(2);

/// Lifecycle of the native stack as the phone sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    Down,
    Starting,
    Up,
    Stopping,
}

/// Preview of one capture device
#[derive(Debug, Default)]
struct Preview {
    /// Widgets shown the preview surface; those still owned by the preview keep it running
    widgets: Vec<WidgetId>,
    surface: Option<SurfaceId>,
    stopping: bool,
}

/// Bridge between the native stack and the GUI thread
pub struct Phone {
    config: PhoneConfig,
    stack: Arc<dyn SipStack>,
    registry: Arc<CallRegistry>,
    ui: UiSender,
    rx: UiReceiver,
    events: broadcast::Sender<PhoneEvent>,
    ctx: Arc<CallContext>,
    worker: Worker,
    stack_state: StackState,
    calls: Vec<Call>,
    accounts: HashMap<AccountId, AccountHandle>,
    devices: Vec<SipDevice>,
    hub: RenderHub,
    previews: BTreeMap<usize, Preview>,
    handlers: HandlerList,
    deletions: Vec<(CallId, Instant)>,
}

impl Phone {
    /// Create a phone driving `stack`; the stack is not started yet
    pub fn new(config: PhoneConfig, stack: Arc<dyn SipStack>) -> PhoneResult<Self> {
        config.validate()?;

        let (ui, rx) = ui_channel();
        let events = events::event_channel();
        let registry = Arc::new(CallRegistry::new());

        let task_sink = ui.clone();
        let worker = Worker::spawn(stack.clone(), move |task: SipTask| {
            task_sink.post(UiMessage::TaskFinished(task));
        })?;

        let ctx = Arc::new(CallContext {
            stack: stack.clone(),
            registry: registry.clone(),
            ui: ui.clone(),
            events: events.clone(),
            destroy_tick: config.destroy_tick(),
        });

        info!(user_agent = %config.user_agent, "Phone created");
        Ok(Self {
            config,
            stack,
            registry,
            ui,
            rx,
            events,
            ctx,
            worker,
            stack_state: StackState::Down,
            calls: Vec::new(),
            accounts: HashMap::new(),
            devices: Vec::new(),
            hub: RenderHub::new(),
            previews: BTreeMap::new(),
            handlers: HandlerList::default(),
            deletions: Vec::new(),
        })
    }

    pub fn config(&self) -> &PhoneConfig {
        &self.config
    }

    pub fn stack_state(&self) -> StackState {
        self.stack_state
    }

    /// Whether the stack is up and calls can be made
    pub fn is_calls_available(&self) -> bool {
        self.stack_state == StackState::Up
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<PhoneEvent> {
        self.events.subscribe()
    }

    /// Change notifications as a stream
    pub fn event_stream(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }

    // ---- Stack lifecycle ----

    /// Queue stack creation; completion is reported as `CallsAvailableChanged`
    pub fn init_stack(&mut self) -> PhoneResult<()> {
        if self.stack_state != StackState::Down {
            return Err(PhoneError::invalid_state(format!(
                "stack cannot be started while {:?}",
                self.stack_state
            )));
        }

        let callbacks = CallbackBridge::new(
            Arc::downgrade(&self.stack),
            self.registry.clone(),
            self.ui.clone(),
            self.config.close_media_delay(),
        );
        let setup = StackSetup {
            stun_server: self.config.stun_server.clone(),
            enable_ice: self.config.enable_ice,
            udp_port: self.config.udp_port,
            tcp_port: self.config.tcp_port,
            user_agent: self.config.user_agent.clone(),
            log_file: self.config.log_file.clone(),
            callbacks: Arc::new(callbacks),
            video_factory: Arc::new(RenderFactory::new(self.ui.clone())),
        };

        if !self.worker.start_task(SipTask::create_stack(setup)) {
            return Err(PhoneError::ShuttingDown);
        }
        self.stack_state = StackState::Starting;
        Ok(())
    }

    /// Remove accounts and previews, then queue stack destruction
    pub fn destroy_stack(&mut self) -> PhoneResult<()> {
        if self.stack_state != StackState::Up {
            return Err(PhoneError::invalid_state(format!(
                "stack cannot be destroyed while {:?}",
                self.stack_state
            )));
        }

        let accounts: Vec<AccountId> = self.accounts.keys().copied().collect();
        for account in accounts {
            self.remove_account(account);
        }
        for (_, preview) in std::mem::take(&mut self.previews) {
            for widget in preview.widgets {
                self.hub.remove_widget(widget);
            }
        }

        if !self.worker.start_task(SipTask::destroy_stack()) {
            return Err(PhoneError::ShuttingDown);
        }
        self.stack_state = StackState::Stopping;
        Ok(())
    }

    /// Destroy the stack if it is up, drain the worker and apply what it reported
    pub fn shutdown(&mut self) {
        // A create still in flight must land before the stack can be torn down
        while self.stack_state == StackState::Starting {
            if !self.process_next() {
                std::thread::sleep(SHUTDOWN_POLL);
            }
        }
        if self.stack_state == StackState::Up {
            if let Err(err) = self.destroy_stack() {
                warn!(error = %err, "Failed to queue stack destruction");
            }
        }
        self.worker.join();
        self.process_events();
    }

    // ---- Event loop ----

    /// Apply every queued message without blocking, then run due deletions
    ///
    /// Returns the number of messages handled.
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(message) = self.rx.try_recv() {
            self.handle_message(message);
            handled += 1;
        }
        self.reap_deleted_calls();
        handled
    }

    /// Apply one queued message, if any
    pub fn process_next(&mut self) -> bool {
        match self.rx.try_recv() {
            Some(message) => {
                self.handle_message(message);
                true
            }
            None => false,
        }
    }

    /// Pump messages for `duration`, waking early for deferred call deletions
    pub async fn run_for(&mut self, duration: Duration) {
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            self.reap_deleted_calls();
            let wake = self
                .next_deletion_due()
                .map(tokio::time::Instant::from_std)
                .map_or(deadline, |due| due.min(deadline));

            match tokio::time::timeout_at(wake, self.rx.recv()).await {
                Ok(Some(message)) => self.handle_message(message),
                Ok(None) => break,
                Err(_) if wake >= deadline => break,
                Err(_) => {}
            }
        }
        self.reap_deleted_calls();
    }

    fn handle_message(&mut self, message: UiMessage) {
        match message {
            UiMessage::Sip(event) => self.dispatch(event),
            UiMessage::TaskFinished(task) => self.on_task_finished(task),
            UiMessage::Surface(notice) => self.hub.handle_notice(notice),
            UiMessage::DestroyCall { call, due } => {
                debug!(call_id = %call, "Call deletion scheduled");
                self.deletions.push((call, due));
            }
        }
    }

    fn dispatch(&mut self, event: SipEvent) {
        match event {
            SipEvent::RegState { account } => self.on_reg_state(account),
            SipEvent::IncomingCall { account, call } => self.on_incoming_call(account, call),
            SipEvent::CallState { .. } | SipEvent::CallMediaState { .. } | SipEvent::Error { .. } => {
                self.deliver_to_call(event)
            }
        }
    }

    fn deliver_to_call(&mut self, event: SipEvent) {
        let Some(call_id) = event.call_id() else {
            error!(kind = ?event.kind(), "Unexpected event kind for call delivery");
            return;
        };
        match self.calls.iter_mut().find(|c| c.id() == call_id) {
            Some(call) => call.process_event(event, &mut self.hub),
            None => debug!(call_id = %call_id, kind = ?event.kind(), "Event for destroyed call dropped"),
        }
    }

    fn on_reg_state(&mut self, handle: AccountHandle) {
        let Some(account) = self.account_id_by_handle(handle) else {
            debug!(account = handle.0, "Registration change of unknown account");
            return;
        };
        match self.stack.account_info(handle) {
            Ok(info) => {
                let registered = info.expires > 0;
                info!(account = %account, status = info.status, status_text = %info.status_text, expires = info.expires, "Account registration changed");
                self.emit(PhoneEvent::AccountRegistrationChanged { account, registered });
            }
            Err(err) => {
                warn!(account = %account, status = %err, "Failed to read account registration");
            }
        }
    }

    fn on_incoming_call(&mut self, account_handle: AccountHandle, handle: CallHandle) {
        let Some(account) = self.account_id_by_handle(account_handle) else {
            warn!(account = account_handle.0, handle = handle.0, "Incoming call for unknown account, rejecting");
            if let Err(err) = self.stack.hangup(handle, status::NOT_ACCEPTABLE_HERE, "") {
                warn!(handle = handle.0, status = %err, "Failed to reject incoming call");
            }
            return;
        };
        if self.is_duplicate_call(handle) {
            warn!(handle = handle.0, "Ignoring duplicate incoming call");
            return;
        }

        let call = Call::incoming(self.ctx.clone(), account, account_handle, handle);
        let call_id = call.id();
        self.calls.push(call);
        self.emit(PhoneEvent::CallCreated { call: call_id });

        let handlers = self.handlers.ordered();
        let Some(call) = self.calls.last_mut() else {
            return;
        };
        if !handlers::offer(&handlers, call) {
            info!(call_id = %call_id, remote = %call.remote_uri(), handle = handle.0, "Destroying unhandled call");
            call.hangup(status::NOT_ACCEPTABLE_HERE, "");
            call.destroy(Duration::ZERO);
        }
    }

    /// A second notification for a call that is already tracked
    fn is_duplicate_call(&self, handle: CallHandle) -> bool {
        if self.registry.contains(handle) {
            return true;
        }
        let Ok(info) = self.stack.call_info(handle) else {
            return false;
        };
        self.calls.iter().any(|call| {
            !call.state().is_terminal()
                && call.native_handle() != Some(handle)
                && call.protocol_call_id() == Some(info.call_id.as_str())
        })
    }

    fn on_task_finished(&mut self, task: SipTask) {
        let status = task.status();
        match task.task_type() {
            TaskType::CreateStack => {
                if status.is_success() {
                    self.on_stack_created();
                } else {
                    error!(status = %status, "Failed to initialize SIP stack: {}", self.stack.status_text(status));
                    self.stack_state = StackState::Down;
                }
            }
            TaskType::DestroyStack => {
                if status.is_success() {
                    info!("SIP stack destroyed");
                } else {
                    error!(status = %status, "Failed to destroy SIP stack: {}", self.stack.status_text(status));
                }
                self.on_stack_destroyed();
            }
            TaskType::StartPreview => {
                if let Some(capture_dev) = task.capture_device() {
                    self.on_preview_started(capture_dev, status, task.window());
                }
            }
            TaskType::StopPreview => {
                if let Some(capture_dev) = task.capture_device() {
                    self.on_preview_stopped(capture_dev, status);
                }
            }
        }
    }

    fn on_stack_created(&mut self) {
        if let Err(err) = self.stack.register_thread(GUI_THREAD_NAME) {
            warn!(status = %err, "Failed to register GUI thread with stack");
        }
        self.stack_state = StackState::Up;

        for codec in &self.config.video_codecs {
            if let Err(err) = self.stack.set_video_codec_params(&codec.name, &codec.params()) {
                warn!(codec = %codec.name, status = %err, "Failed to set video codec parameters");
            }
        }
        self.update_available_devices();

        info!("SIP stack initialized");
        self.emit(PhoneEvent::CallsAvailableChanged { available: true });
    }

    fn on_stack_destroyed(&mut self) {
        for mut call in std::mem::take(&mut self.calls) {
            call.invalidate();
            call.release(&mut self.hub);
            self.emit(PhoneEvent::CallDestroyed { call: call.id() });
        }
        self.registry.clear();
        self.deletions.clear();
        self.accounts.clear();
        self.devices.clear();
        for (_, preview) in std::mem::take(&mut self.previews) {
            for widget in preview.widgets {
                self.hub.set_owner(widget, WidgetOwner::Detached);
                self.hub.set_widget_surface(widget, None);
            }
        }
        self.stack_state = StackState::Down;
        self.emit(PhoneEvent::CallsAvailableChanged { available: false });
    }

    fn on_preview_started(&mut self, capture_dev: usize, status: StackStatus, window: WindowHandle) {
        if !status.is_success() {
            error!(capture_dev, status = %status, "Failed to start video preview: {}", self.stack.status_text(status));
            if let Some(preview) = self.previews.remove(&capture_dev) {
                for widget in preview.widgets {
                    self.hub.set_owner(widget, WidgetOwner::Detached);
                }
            }
            return;
        }

        let Some(surface) = window.surface() else {
            error!(capture_dev, ?window, "Incompatible render device type");
            return;
        };
        if let Some(preview) = self.previews.get_mut(&capture_dev) {
            preview.surface = Some(surface);
            for widget in &preview.widgets {
                self.hub.set_widget_surface(*widget, Some(surface));
            }
        }
        info!(capture_dev, %surface, "Video preview started");
    }

    fn on_preview_stopped(&mut self, capture_dev: usize, status: StackStatus) {
        if let Some(preview) = self.previews.remove(&capture_dev) {
            for widget in preview.widgets {
                self.hub.set_widget_surface(widget, None);
            }
        }
        if status.is_success() {
            info!(capture_dev, "Video preview stopped");
        } else {
            error!(capture_dev, status = %status, "Failed to stop video preview: {}", self.stack.status_text(status));
        }
    }

    // ---- Calls ----

    /// Calls the phone tracks, optionally only those still active in the stack
    pub fn calls(&self, active_only: bool) -> Vec<&Call> {
        self.calls
            .iter()
            .filter(|call| !active_only || call.is_active())
            .collect()
    }

    pub fn call(&self, id: CallId) -> Option<&Call> {
        self.calls.iter().find(|call| call.id() == id)
    }

    pub fn call_mut(&mut self, id: CallId) -> Option<&mut Call> {
        self.calls.iter_mut().find(|call| call.id() == id)
    }

    /// Create an outgoing call; it is placed with [`Call::start`]
    pub fn new_call(&mut self, account: AccountId, remote_uri: &str) -> PhoneResult<CallId> {
        if !self.is_calls_available() {
            return Err(PhoneError::invalid_state("calls are not available"));
        }
        let handle = self.account_handle(account)?;
        if !self.stack.verify_uri(remote_uri) {
            return Err(PhoneError::invalid_argument(format!("not a SIP URI: {}", remote_uri)));
        }

        let call = Call::outgoing(self.ctx.clone(), account, handle, remote_uri);
        let id = call.id();
        self.calls.push(call);
        self.emit(PhoneEvent::CallCreated { call: id });
        Ok(id)
    }

    /// [`Call::destroy`] on a tracked call
    pub fn destroy_call(&mut self, id: CallId, max_wait: Duration) -> PhoneResult<bool> {
        let call = self.call_mut(id).ok_or_else(|| PhoneError::CallNotFound {
            call_id: id.to_string(),
        })?;
        Ok(call.destroy(max_wait))
    }

    /// New widget showing the incoming video of a call's stream
    pub fn playback_widget(&mut self, id: CallId, media_index: usize) -> Option<WidgetId> {
        let call = self.calls.iter_mut().find(|call| call.id() == id)?;
        call.playback_widget(media_index, &mut self.hub)
    }

    fn remove_call(&mut self, id: CallId) {
        let Some(pos) = self.calls.iter().position(|call| call.id() == id) else {
            return;
        };
        let mut call = self.calls.remove(pos);
        call.release(&mut self.hub);
        let account = call.account_id();
        drop(call);
        self.emit(PhoneEvent::CallDestroyed { call: id });

        if !self.calls.iter().any(|call| call.account_id() == account) {
            self.set_account_registered(account, false);
        }
    }

    fn next_deletion_due(&self) -> Option<Instant> {
        self.deletions.iter().map(|(_, due)| *due).min()
    }

    fn reap_deleted_calls(&mut self) {
        if self.deletions.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut pending = Vec::new();
        for (id, due) in std::mem::take(&mut self.deletions) {
            // A media close deadline may have moved since the deletion was scheduled
            let due = self
                .call(id)
                .and_then(Call::deletion_due)
                .map_or(due, |current| current.max(due));
            if due <= now {
                self.remove_call(id);
            } else {
                pending.push((id, due));
            }
        }
        self.deletions.extend(pending);
    }

    // ---- Widgets ----

    /// Surfaces and widgets owned by the GUI thread
    pub fn render_hub(&self) -> &RenderHub {
        &self.hub
    }

    pub fn widget(&self, id: WidgetId) -> Option<&VideoWidget> {
        self.hub.widget(id)
    }

    /// Paint a widget's current frame, or a blank area when it has none
    pub fn paint_widget(&mut self, id: WidgetId, painter: &mut dyn Painter) -> bool {
        self.hub.paint(id, painter)
    }

    /// Destroy a playback or preview widget
    ///
    /// The last widget of a preview stops it.
    pub fn destroy_widget(&mut self, id: WidgetId) -> bool {
        let Some(owner) = self.hub.widget(id).map(VideoWidget::owner) else {
            return false;
        };
        match owner {
            WidgetOwner::Call { call, .. } => {
                if let Some(call) = self.calls.iter_mut().find(|c| c.id() == call) {
                    call.on_playback_widget_destroyed(id);
                }
            }
            WidgetOwner::Preview { .. } => self.stop_video_preview(id),
            WidgetOwner::Detached => {}
        }
        for preview in self.previews.values_mut() {
            preview.widgets.retain(|w| *w != id);
        }
        self.hub.remove_widget(id).is_some()
    }

    // ---- Call handlers ----

    /// Offer incoming calls to `handler` at position `order`
    pub fn insert_call_handler(&mut self, order: i32, handler: Rc<dyn CallHandler>) -> bool {
        self.handlers.insert(order, handler)
    }

    pub fn remove_call_handler(&mut self, order: i32, handler: &Rc<dyn CallHandler>) -> bool {
        self.handlers.remove(order, handler)
    }

    pub fn call_handler_count(&self) -> usize {
        self.handlers.len()
    }

    fn emit(&self, event: PhoneEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for Phone {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Phone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phone")
            .field("stack_state", &self.stack_state)
            .field("calls", &self.calls.len())
            .field("accounts", &self.accounts.len())
            .field("devices", &self.devices.len())
            .field("previews", &self.previews.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::mock::{MockOp, MockStack};
    use tracing_test::traced_test;

    fn started_phone(stack: &Arc<MockStack>) -> Phone {
        let mut phone = Phone::new(PhoneConfig::default(), stack.clone()).unwrap();
        phone.init_stack().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !phone.is_calls_available() && Instant::now() < deadline {
            phone.process_events();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(phone.is_calls_available());
        phone
    }

    #[test]
    fn test_init_stack_pushes_codecs_and_registers_gui_thread() {
        let stack = Arc::new(MockStack::with_default_devices());
        let phone = started_phone(&stack);

        assert!(stack.is_created());
        assert!(stack.codec_params("H264").is_some());
        assert!(stack.codec_params("H263").is_some());
        let threads = stack.registered_threads();
        assert!(threads.iter().any(|t| t == "sip-worker"));
        assert!(threads.iter().any(|t| t == GUI_THREAD_NAME));
        assert_eq!(phone.stack_state(), StackState::Up);
    }

    #[test]
    fn test_init_twice_rejected() {
        let stack = Arc::new(MockStack::new());
        let mut phone = started_phone(&stack);
        assert!(matches!(phone.init_stack(), Err(PhoneError::InvalidState { .. })));
        assert_eq!(stack.op_count(MockOp::Create), 1);
    }

    #[test]
    fn test_failed_create_leaves_stack_down() {
        let stack = Arc::new(MockStack::new());
        stack.fail_next(MockOp::Create, StackStatus::new(70_013));
        let mut phone = Phone::new(PhoneConfig::default(), stack.clone()).unwrap();
        let mut events = phone.subscribe();
        phone.init_stack().unwrap();
        phone.shutdown();

        assert_eq!(phone.stack_state(), StackState::Down);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_destroy_stack_clears_state() {
        let stack = Arc::new(MockStack::with_default_devices());
        let mut phone = started_phone(&stack);
        let mut events = phone.subscribe();

        phone.shutdown();
        assert_eq!(phone.stack_state(), StackState::Down);
        assert!(!stack.is_created());
        assert!(phone.available_devices(crate::media::MediaType::Audio, crate::media::MediaDirection::NONE).is_empty());

        let mut unavailable = false;
        while let Ok(event) = events.try_recv() {
            if event == (PhoneEvent::CallsAvailableChanged { available: false }) {
                unavailable = true;
            }
        }
        assert!(unavailable);
    }

    #[test]
    fn test_new_call_requires_running_stack_and_known_account() {
        let stack = Arc::new(MockStack::new());
        let mut phone = Phone::new(PhoneConfig::default(), stack.clone()).unwrap();
        assert!(matches!(
            phone.new_call(Uuid::new_v4(), "sip:bob@example.com"),
            Err(PhoneError::InvalidState { .. })
        ));

        phone.init_stack().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !phone.is_calls_available() && Instant::now() < deadline {
            phone.process_events();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(
            phone.new_call(Uuid::new_v4(), "sip:bob@example.com"),
            Err(PhoneError::AccountNotFound { .. })
        ));
    }

    #[test]
    #[traced_test]
    fn test_duplicate_incoming_call_ignored() {
        let stack = Arc::new(MockStack::with_default_devices());
        let mut phone = started_phone(&stack);
        let config = AccountConfig {
            user_id: "alice@example.com".to_string(),
            ..Default::default()
        };
        phone.insert_account(Uuid::new_v4(), &config).unwrap();
        let accept: Rc<dyn CallHandler> = Rc::new(|_: i32, _: &mut Call| true);
        phone.insert_call_handler(0, accept);

        let handle = stack.incoming_call(AccountHandle(0), "sip:carol@example.com", "dup@example.com");
        phone.process_events();
        stack.redeliver_incoming_call(AccountHandle(0), handle);
        phone.process_events();

        assert_eq!(phone.calls.len(), 1);
        assert!(phone.registry.contains(handle));
        assert!(logs_contain("Ignoring duplicate incoming call"));
    }

    #[test]
    #[traced_test]
    fn test_preview_on_foreign_window_left_unbound() {
        let stack = Arc::new(MockStack::with_default_devices());
        let mut phone = started_phone(&stack);
        let widget = phone.hub.create_widget(WidgetOwner::Preview { device: 0 });
        phone.previews.insert(
            0,
            Preview {
                widgets: vec![widget],
                ..Default::default()
            },
        );

        phone.on_preview_started(0, StackStatus::SUCCESS, WindowHandle::Native { kind: 1, raw: 0xdead });
        assert!(phone.widget(widget).unwrap().surface().is_none());
        assert!(logs_contain("Incompatible render device type"));
    }

    #[test]
    fn test_failed_preview_start_detaches_widgets() {
        let stack = Arc::new(MockStack::with_default_devices());
        stack.fail_next(MockOp::PreviewStart, StackStatus::new(70_004));
        let mut phone = started_phone(&stack);
        let camera = phone
            .default_device(crate::media::MediaType::Video, crate::media::MediaDirection::CAPTURE)
            .unwrap();

        let widget = phone.start_video_preview(&camera).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !phone.previews.is_empty() && Instant::now() < deadline {
            phone.process_events();
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(phone.previews.is_empty());
        assert_eq!(phone.widget(widget).unwrap().owner(), WidgetOwner::Detached);
        assert_eq!(stack.op_count(MockOp::PreviewStop), 0);
    }
}
