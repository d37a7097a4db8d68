/* Device session: one gun, its read controller and the power-management
 * entry points.
 *
 * Every lifecycle transition runs under `guard`, which owns the `Poller`.
 * `is_open` is only written while the guard is held; it is atomic so status
 * queries can read it without waiting behind a reset. */

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::calibration::SettingsHandle;
use crate::device::DeviceInfo;
use crate::poller::{Poller, ReportHandler, StateProbe, TransactionState};
use crate::sink::EventSink;
use crate::transport::{SubmissionError, Transport, TransportError, MODE_COMMAND};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to start polling: {0}")]
    Submit(#[from] SubmissionError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/* Proof that `pre_reset()` ran. Holds the session guard until it is */
/* handed back to `post_reset()`. */
pub struct ResetGuard {
    poller: OwnedMutexGuard<Poller>,
}

pub struct DeviceSession {
    info: DeviceInfo,
    settings: SettingsHandle,
    guard: Arc<Mutex<Poller>>,
    probe: StateProbe,
    is_open: AtomicBool,
    send_mode_command: bool,
}

impl DeviceSession {
    pub fn new(
        info: DeviceInfo,
        transport: Arc<dyn Transport>,
        sink: Box<dyn EventSink>,
        settings: SettingsHandle,
        send_mode_command: bool,
    ) -> Self {
        let handler = Arc::new(ReportHandler::new(&info.sysname, settings.subscribe(), sink));
        let poller = Poller::new(transport, handler);
        let probe = poller.probe();

        Self {
            info,
            settings,
            guard: Arc::new(Mutex::new(poller)),
            probe,
            is_open: AtomicBool::new(false),
            send_mode_command,
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }

    pub fn state(&self) -> TransactionState {
        self.probe.get()
    }

    /* Start reporting. Re-opening an open session whose read ended (timeout, */
    /* terminal status) arms it again. */
    pub async fn open(&self) -> Result<(), SessionError> {
        let mut poller = self.guard.lock().await;

        if self.is_open() && poller.state() == TransactionState::Armed {
            debug!("{}: already open", self.info.sysname);
            return Ok(());
        }

        if self.send_mode_command {
            match poller.transport().send_control(&MODE_COMMAND).await {
                Ok(()) => debug!("{}: mode command sent", self.info.sysname),
                Err(e) => warn!("{}: failed to send mode command: {}", self.info.sysname, e),
            }
        }

        poller.arm().await?;
        self.is_open.store(true, Ordering::Release);
        info!("{}: opened", self.info.sysname);
        Ok(())
    }

    pub async fn close(&self) {
        let mut poller = self.guard.lock().await;
        poller.disarm().await;
        self.is_open.store(false, Ordering::Release);
        info!("{}: closed", self.info.sysname);
    }

    /* Hot-unplug. The transport stops accepting reads first, so a */
    /* completion racing the disarm cannot resubmit. The session stays */
    /* closed for good. */
    pub async fn remove(&self) {
        let mut poller = self.guard.lock().await;
        poller.transport().shutdown();
        poller.disarm().await;
        self.is_open.store(false, Ordering::Release);
        info!("{}: removed", self.info.sysname);
    }

    /* Stop reading but remember the session was open. */
    pub async fn suspend(&self) {
        let mut poller = self.guard.lock().await;
        if self.is_open() {
            poller.disarm().await;
            debug!("{}: suspended", self.info.sysname);
        }
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        let mut poller = self.guard.lock().await;
        self.rearm(&mut poller, "resumed").await
    }

    pub async fn reset_resume(&self) -> Result<(), SessionError> {
        let mut poller = self.guard.lock().await;
        self.rearm(&mut poller, "reset-resumed").await
    }

    /* Take the guard and cancel the outstanding read. The guard stays */
    /* held until the returned token is given to `post_reset()`. */
    pub async fn pre_reset(&self) -> ResetGuard {
        let mut poller = self.guard.clone().lock_owned().await;
        poller.disarm().await;
        debug!("{}: pre-reset", self.info.sysname);
        ResetGuard { poller }
    }

    /* Re-arm if open, then release the guard taken by `pre_reset()`. */
    pub async fn post_reset(&self, guard: ResetGuard) -> Result<(), SessionError> {
        let mut poller = guard.poller;
        self.rearm(&mut poller, "post-reset").await
    }

    /* Port-reset the device with reads quiesced around it. */
    pub async fn reset(&self) -> Result<(), SessionError> {
        let guard = self.pre_reset().await;
        let transport = guard.poller.transport().clone();

        let result = transport.reset().await;
        if let Err(e) = &result {
            warn!("{}: {}", self.info.sysname, e);
        }

        self.post_reset(guard).await?;
        result?;
        info!("{}: reset", self.info.sysname);
        Ok(())
    }

    async fn rearm(&self, poller: &mut Poller, what: &str) -> Result<(), SessionError> {
        if !self.is_open() || poller.state() == TransactionState::Armed {
            return Ok(());
        }

        match poller.arm().await {
            Ok(()) => {
                debug!("{}: {}", self.info.sysname, what);
                Ok(())
            }
            Err(e) => {
                warn!("{}: failed to re-arm ({}): {}", self.info.sysname, what, e);
                Err(e.into())
            }
        }
    }
}
