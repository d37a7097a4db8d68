/* logind sleep hook: suspend every session before the system sleeps and
 * resume them on wake.
 *
 * While awake the daemon holds a "delay" inhibitor lock. After
 * PrepareForSleep(true) logind waits for that lock to be released (up to
 * InhibitDelayMaxSec), and it is only dropped once every session has been
 * disarmed. */

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use zbus::zvariant::OwnedFd;

use super::Sessions;

#[zbus::proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1"
)]
trait Login1Manager {
    fn inhibit(&self, what: &str, who: &str, why: &str, mode: &str) -> zbus::Result<OwnedFd>;

    #[zbus(signal)]
    fn prepare_for_sleep(&self, start: bool) -> zbus::Result<()>;
}

/* Hands out sleep delay locks. Sleep is held back until the lock is dropped. */
#[async_trait]
trait SleepInhibitor: Send + Sync {
    type Lock: Send;

    async fn acquire(&self) -> Result<Self::Lock>;
}

#[async_trait]
impl<'a> SleepInhibitor for Login1ManagerProxy<'a> {
    type Lock = OwnedFd;

    async fn acquire(&self) -> Result<OwnedFd> {
        self.inhibit("sleep", "guncon2d", "Stopping light gun reads", "delay")
            .await
            .context("logind refused the sleep delay lock")
    }
}

async fn apply(sessions: &Sessions, going_to_sleep: bool) {
    let sessions: Vec<_> = sessions.read().await.values().cloned().collect();

    for session in sessions {
        if going_to_sleep {
            session.suspend().await;
        } else if let Err(e) = session.resume().await {
            warn!("{}: resume after sleep failed: {}", session.info().sysname, e);
        }
    }
}

struct SleepHook<I: SleepInhibitor> {
    sessions: Sessions,
    inhibitor: I,
    lock: Option<I::Lock>,
}

impl<I: SleepInhibitor> SleepHook<I> {
    fn new(sessions: Sessions, inhibitor: I) -> Self {
        Self {
            sessions,
            inhibitor,
            lock: None,
        }
    }

    async fn take_lock(&mut self) {
        if self.lock.is_some() {
            return;
        }
        match self.inhibitor.acquire().await {
            Ok(lock) => {
                debug!("Holding sleep delay lock");
                self.lock = Some(lock);
            }
            Err(e) => warn!("Guns may still be reading when the system sleeps: {e:#}"),
        }
    }

    async fn prepare_for_sleep(&mut self, going_to_sleep: bool) {
        if going_to_sleep {
            info!("System going to sleep, suspending guns");
            apply(&self.sessions, true).await;
            if let Some(lock) = self.lock.take() {
                drop(lock);
                debug!("Released sleep delay lock");
            }
        } else {
            info!("System woke up, resuming guns");
            apply(&self.sessions, false).await;
            self.take_lock().await;
        }
    }
}

async fn watch(conn: zbus::Connection, sessions: Sessions) -> Result<()> {
    let proxy = Login1ManagerProxy::new(&conn)
        .await
        .context("Failed to create logind proxy")?;
    let mut signals = proxy
        .receive_prepare_for_sleep()
        .await
        .context("Failed to subscribe to PrepareForSleep")?;

    let mut hook = SleepHook::new(sessions, proxy.clone());
    hook.take_lock().await;

    debug!("Listening for logind sleep signals");
    while let Some(signal) = signals.next().await {
        let args = signal.args()?;
        hook.prepare_for_sleep(*args.start()).await;
    }
    Ok(())
}

/* Run the hook in the background. Without logind the daemon works, it */
/* just does not quiesce the guns around sleep. */
pub fn spawn(conn: zbus::Connection, sessions: Sessions) {
    tokio::spawn(async move {
        if let Err(e) = watch(conn, sessions).await {
            warn!("logind sleep hook unavailable: {e:#}");
        }
    });
}
