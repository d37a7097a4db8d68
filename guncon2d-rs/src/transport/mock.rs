/* Scripted transport for tests.
 *
 * Reads complete when the test pushes a `Completion` through the paired
 * `MockController`. The controller also counts submissions and in-flight
 * reads, injects submission failures, and records control payloads. */

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Completion, CompletionStatus, SubmissionError, Transfer, Transport, TransportError};

#[derive(Default)]
struct MockState {
    submits: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    submit_failures: Mutex<VecDeque<SubmissionError>>,
    controls: Mutex<Vec<Vec<u8>>>,
    fail_controls: AtomicBool,
    fail_reset: AtomicBool,
    resets: AtomicUsize,
    stopped: AtomicBool,
}

/* Decrements the in-flight count when the transfer completes or is dropped. */
struct InFlight(Arc<MockState>);

impl InFlight {
    fn start(state: &Arc<MockState>) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(state.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockTransport {
    completions: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Completion>>>,
    state: Arc<MockState>,
}

#[derive(Clone)]
pub struct MockController {
    tx: mpsc::UnboundedSender<Completion>,
    state: Arc<MockState>,
}

pub fn mock() -> (MockTransport, MockController) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = Arc::new(MockState::default());
    (
        MockTransport {
            completions: Arc::new(tokio::sync::Mutex::new(rx)),
            state: state.clone(),
        },
        MockController { tx, state },
    )
}

impl MockController {
    pub fn complete(&self, completion: Completion) {
        let _ = self.tx.send(completion);
    }

    /* Complete the next read successfully with `data`. */
    pub fn report(&self, data: &[u8]) {
        self.complete(Completion::success(data.to_vec()));
    }

    pub fn fail(&self, status: CompletionStatus) {
        self.complete(Completion::failed(status));
    }

    /* Make the next `submit_read` call fail with `error`. */
    pub fn fail_next_submit(&self, error: SubmissionError) {
        self.state.submit_failures.lock().unwrap().push_back(error);
    }

    pub fn fail_controls(&self, fail: bool) {
        self.state.fail_controls.store(fail, Ordering::SeqCst);
    }

    /* Make every later `reset` call fail. */
    pub fn fail_reset(&self, fail: bool) {
        self.state.fail_reset.store(fail, Ordering::SeqCst);
    }

    pub fn submits(&self) -> usize {
        self.state.submits.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn controls(&self) -> Vec<Vec<u8>> {
        self.state.controls.lock().unwrap().clone()
    }

    pub fn resets(&self) -> usize {
        self.state.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    fn submit_read(&self) -> Result<Transfer, SubmissionError> {
        if let Some(error) = self.state.submit_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        if self.state.stopped.load(Ordering::SeqCst) {
            return Err(SubmissionError::Stopped);
        }

        self.state.submits.fetch_add(1, Ordering::SeqCst);
        let in_flight = InFlight::start(&self.state);
        let completions = self.completions.clone();

        Ok(Box::pin(async move {
            let _in_flight = in_flight;
            let mut rx = completions.lock().await;
            rx.recv()
                .await
                .unwrap_or_else(|| Completion::failed(CompletionStatus::Disconnected))
        }))
    }

    async fn send_control(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.state.controls.lock().unwrap().push(payload.to_vec());
        if self.state.fail_controls.load(Ordering::SeqCst) {
            return Err(TransportError::Control("stalled".into()));
        }
        Ok(())
    }

    async fn reset(&self) -> Result<(), TransportError> {
        self.state.resets.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_reset.load(Ordering::SeqCst) {
            return Err(TransportError::Reset("port reset refused".into()));
        }
        Ok(())
    }

    fn shutdown(&self) {
        self.state.stopped.store(true, Ordering::SeqCst);
    }
}
