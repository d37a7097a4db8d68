/* Read transaction lifecycle controller.
 *
 * Exactly one interrupt read is outstanding while armed. A tokio task owns
 * the in-flight `Transfer`: it awaits the completion, runs the report
 * handler and resubmits. Disarming aborts that task and awaits it, so once
 * `disarm()` returns no completion for the old transaction can still reach
 * the sink. */

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::calibration::{normalize, OffscreenPosition, Settings};
use crate::report::{self, DecodedState};
use crate::sink::{Axis, EventSink, InputEvent, Key};
use crate::transport::{Completion, StatusClass, SubmissionError, Transfer, Transport};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /* No read outstanding. */
    Closed = 0,
    /* A read is pending completion. */
    Armed = 1,
    /* Cancellation requested; a late completion must do nothing. */
    ShuttingDown = 2,
}

impl TransactionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Armed,
            2 => Self::ShuttingDown,
            _ => Self::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Armed => "armed",
            Self::ShuttingDown => "shutting-down",
        }
    }
}

/* State shared between the controller and its completion task. */
#[derive(Debug)]
struct SharedState(AtomicU8);

impl SharedState {
    fn new() -> Self {
        Self(AtomicU8::new(TransactionState::Closed as u8))
    }

    fn load(&self) -> TransactionState {
        TransactionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: TransactionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /* Armed -> Closed, unless a disarm got there first. */
    fn close_if_armed(&self) {
        let _ = self.0.compare_exchange(
            TransactionState::Armed as u8,
            TransactionState::Closed as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/* Read-only view of a poller's state that does not need the session guard. */
#[derive(Debug, Clone)]
pub struct StateProbe(Arc<SharedState>);

impl StateProbe {
    pub fn get(&self) -> TransactionState {
        self.0.load()
    }
}

fn key(key: Key, pressed: bool) -> InputEvent {
    InputEvent::Key { key, pressed }
}

fn abs(axis: Axis, value: i32) -> InputEvent {
    InputEvent::Abs { axis, value }
}

/* Turn one decoded report into the ordered event list for the sink. */
/* The caller appends the `sync()`. */
pub fn translate(state: &DecodedState, settings: &Settings) -> Vec<InputEvent> {
    let position = normalize(state.raw_x, state.raw_y, settings);
    let features = &settings.features;
    let trigger = state.buttons.trigger;
    let mut events = Vec::with_capacity(13);

    if features.offscreen_reload {
        events.push(key(Key::Trigger, trigger && !position.off_screen));
        events.push(key(Key::Reload, trigger && position.off_screen));
    } else {
        events.push(key(Key::Trigger, trigger));
    }

    if !position.off_screen {
        events.push(abs(Axis::X, position.x));
        events.push(abs(Axis::Y, position.y));
    } else if features.offscreen_position == OffscreenPosition::Zero {
        events.push(abs(Axis::X, 0));
        events.push(abs(Axis::Y, 0));
    }

    events.push(abs(Axis::HatX, i32::from(state.dpad.x)));
    events.push(abs(Axis::HatY, i32::from(state.dpad.y)));

    let buttons = &state.buttons;
    events.push(key(Key::A, buttons.a));
    events.push(key(Key::B, buttons.b));
    events.push(key(Key::C, buttons.c));
    events.push(key(Key::Start, buttons.start));
    events.push(key(Key::Select, buttons.select));

    events
}

/* Decodes completed reports and forwards them to the sink. */
pub struct ReportHandler {
    device: String,
    settings: watch::Receiver<Settings>,
    sink: Mutex<Box<dyn EventSink>>,
}

impl ReportHandler {
    pub fn new(device: &str, settings: watch::Receiver<Settings>, sink: Box<dyn EventSink>) -> Self {
        Self {
            device: device.to_string(),
            settings,
            sink: Mutex::new(sink),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /* One consistent copy of the current settings. */
    pub fn settings(&self) -> Settings {
        *self.settings.borrow()
    }

    /* Handle one successful read. Wrong-length reports are dropped. */
    pub fn handle(&self, data: &[u8]) {
        let Some(state) = report::decode(data) else {
            debug!(
                "{}: skipping {} byte report (expected {})",
                self.device,
                data.len(),
                report::REPORT_LEN
            );
            return;
        };

        let events = translate(&state, &self.settings());

        let Ok(mut sink) = self.sink.lock() else {
            error!("{}: event sink lock poisoned", self.device);
            return;
        };

        for event in events {
            if let Err(e) = sink.emit(event) {
                debug!("{}: {} sink dropped event: {}", self.device, sink.name(), e);
                return;
            }
        }
        if let Err(e) = sink.sync() {
            debug!("{}: {} sink sync failed: {}", self.device, sink.name(), e);
        }
    }
}

/* Process one completion. Returns the next transfer to await, or `None` */
/* when the transaction ends here. */
fn on_complete(
    completion: Completion,
    transport: &dyn Transport,
    handler: &ReportHandler,
    state: &SharedState,
) -> Option<Transfer> {
    if state.load() != TransactionState::Armed {
        return None;
    }

    let device = handler.device();
    match completion.status.class() {
        StatusClass::Success => handler.handle(&completion.data),
        StatusClass::Timeout => {
            if !handler.settings().features.resubmit_on_timeout {
                info!("{}: read timed out, polling stopped until reopened", device);
                state.close_if_armed();
                return None;
            }
            debug!("{}: read timed out, resubmitting", device);
        }
        StatusClass::Terminal => {
            debug!("{}: read ended ({:?}), not resubmitting", device, completion.status);
            state.close_if_armed();
            return None;
        }
        StatusClass::Transient => {
            warn!("{}: read failed ({:?}), resubmitting", device, completion.status);
        }
    }

    /* A disarm may have started while the handler ran */
    if state.load() != TransactionState::Armed {
        return None;
    }

    match transport.submit_read() {
        Ok(transfer) => Some(transfer),
        Err(SubmissionError::Stopped) => {
            state.close_if_armed();
            None
        }
        Err(e) => {
            error!("{}: failed to resubmit read: {}", device, e);
            state.close_if_armed();
            None
        }
    }
}

async fn run(
    mut transfer: Transfer,
    transport: Arc<dyn Transport>,
    handler: Arc<ReportHandler>,
    state: Arc<SharedState>,
) {
    loop {
        let completion = transfer.await;
        match on_complete(completion, transport.as_ref(), &handler, &state) {
            Some(next) => transfer = next,
            None => break,
        }
    }
}

pub struct Poller {
    transport: Arc<dyn Transport>,
    handler: Arc<ReportHandler>,
    state: Arc<SharedState>,
    task: Option<JoinHandle<()>>,
}

impl Poller {
    pub fn new(transport: Arc<dyn Transport>, handler: Arc<ReportHandler>) -> Self {
        Self {
            transport,
            handler,
            state: Arc::new(SharedState::new()),
            task: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state.load()
    }

    pub fn probe(&self) -> StateProbe {
        StateProbe(self.state.clone())
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /* Submit the first read and start the completion task. */
    pub async fn arm(&mut self) -> Result<(), SubmissionError> {
        if self.state.load() == TransactionState::Armed {
            return Err(SubmissionError::Busy);
        }

        /* Reap a task that ended on its own (timeout, terminal status) */
        self.stop_task().await;

        let transfer = self.transport.submit_read()?;
        self.state.store(TransactionState::Armed);
        self.task = Some(tokio::spawn(run(
            transfer,
            self.transport.clone(),
            self.handler.clone(),
            self.state.clone(),
        )));

        debug!("{}: read armed on {}", self.handler.device(), self.transport.name());
        Ok(())
    }

    /* Cancel the outstanding read and wait until its completion path has */
    /* fully drained. No-op when already closed. */
    pub async fn disarm(&mut self) {
        if self.task.is_some() {
            self.state.store(TransactionState::ShuttingDown);
            self.stop_task().await;
            debug!("{}: read disarmed", self.handler.device());
        }
        self.state.store(TransactionState::Closed);
    }

    async fn stop_task(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();
        match task.await {
            Err(e) if e.is_panic() => {
                error!("{}: completion task panicked", self.handler.device());
            }
            _ => {}
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
