pub mod device;
pub mod manager;
pub mod sleep;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use zbus::connection::Builder;

use crate::calibration::SettingsHandle;
use crate::config::DaemonConfig;
use crate::device::DeviceInfo;
use crate::session::DeviceSession;
use crate::sink::{self, SinkKind};
use crate::transport::usb::UsbTransport;
use crate::udev_monitor::DeviceAction;

pub const BUS_NAME: &str = "org.freedesktop.guncon2";
pub const MANAGER_PATH: &str = "/org/freedesktop/guncon2";

/* Live sessions keyed by udev sysname. */
pub type Sessions = Arc<RwLock<HashMap<String, Arc<DeviceSession>>>>;

/* Open the hardware and build a session for a matched gun. */
fn create_session(
    info: DeviceInfo,
    config: &DaemonConfig,
    sink_kind: SinkKind,
) -> Result<DeviceSession> {
    let transport = UsbTransport::open(&info, config.read_timeout)
        .with_context(|| format!("Failed to open {}", info.sysname))?;

    let settings = SettingsHandle::new(config.settings);
    let sink = sink::create_sink(sink_kind, &info, &settings.snapshot())
        .with_context(|| format!("Failed to create {:?} sink for {}", sink_kind, info.sysname))?;

    Ok(DeviceSession::new(
        info,
        Arc::new(transport),
        sink,
        settings,
        config.send_mode_command,
    ))
}

async fn update_manager(conn: &zbus::Connection, path: &str, added: bool) -> Result<()> {
    let iface_ref = conn
        .object_server()
        .interface::<_, manager::GunconManager>(MANAGER_PATH)
        .await?;
    if added {
        iface_ref.get_mut().await.add_device(path.to_string()).await;
    } else {
        iface_ref.get_mut().await.remove_device(path).await;
    }
    iface_ref
        .get()
        .await
        .devices_changed(iface_ref.signal_emitter())
        .await?;
    Ok(())
}

/* Starts the DBus server and registers all interfaces. */
/*  */
/* This function runs until a shutdown signal arrives or the udev monitor */
/* goes away. It receives hot-plug events through the `device_rx` channel. */
pub async fn run_server(
    mut device_rx: mpsc::Receiver<DeviceAction>,
    config: DaemonConfig,
    sink_kind: SinkKind,
) -> Result<()> {
    let manager = manager::GunconManager::default();

    let conn = Builder::system()?
        .name(BUS_NAME)?
        .serve_at(MANAGER_PATH, manager)?
        .build()
        .await
        .context("Failed to connect to the system bus")?;

    info!("DBus server ready on {}", BUS_NAME);

    let sessions: Sessions = Arc::new(RwLock::new(HashMap::new()));
    sleep::spawn(conn.clone(), sessions.clone());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let action = tokio::select! {
            action = device_rx.recv() => match action {
                Some(action) => action,
                None => {
                    info!("udev monitor channel closed, shutting down");
                    break;
                }
            },
            _ = &mut shutdown => {
                info!("Received shutdown signal");
                break;
            }
        };

        match action {
            DeviceAction::Add {
                sysname,
                name,
                vid,
                pid,
                busnum,
                devnum,
            } => {
                if !config.matches_device(vid, pid) {
                    debug!("Ignoring {} ({:04x}:{:04x})", sysname, vid, pid);
                    continue;
                }
                if sessions.read().await.contains_key(&sysname) {
                    debug!("{} already registered", sysname);
                    continue;
                }

                info!("Matched gun {} ({}) at bus {} address {}", sysname, name, busnum, devnum);
                let info = DeviceInfo::new(&sysname, &name, vid, pid, busnum, devnum);

                let session = match create_session(info, &config, sink_kind) {
                    Ok(session) => Arc::new(session),
                    Err(e) => {
                        warn!("{e:#}");
                        continue;
                    }
                };

                if config.auto_open {
                    if let Err(e) = session.open().await {
                        warn!("{}: auto-open failed: {}", sysname, e);
                    }
                }

                let path = device::device_path(&session);
                let object = device::GunconDevice::new(session.clone());
                if let Err(e) = conn.object_server().at(path.as_str(), object).await {
                    warn!("Failed to register device {}: {}", sysname, e);
                    session.close().await;
                    continue;
                }

                sessions.write().await.insert(sysname.clone(), session);
                update_manager(&conn, &path, true).await?;
                info!("Device {} registered at {}", sysname, path);
            }
            DeviceAction::Remove { sysname } => {
                let Some(session) = sessions.write().await.remove(&sysname) else {
                    debug!("Device removed: {} (was not registered)", sysname);
                    continue;
                };

                /* The pending read ends with Disconnected; removing still */
                /* drains it before the objects go away */
                session.remove().await;

                let path = device::device_path(&session);
                let _ = conn
                    .object_server()
                    .remove::<device::GunconDevice, _>(path.as_str())
                    .await;
                update_manager(&conn, &path, false).await?;
                info!("Device {} removed", sysname);
            }
        }
    }

    close_all(&sessions).await;
    Ok(())
}

/* Resolves on SIGINT or SIGTERM. */
async fn shutdown_signal() {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

/* Close every session. Bounded so a wedged transfer cannot hang shutdown. */
async fn close_all(sessions: &Sessions) {
    let sessions: Vec<_> = sessions.write().await.drain().map(|(_, s)| s).collect();
    for session in sessions {
        if tokio::time::timeout(Duration::from_secs(2), session.close())
            .await
            .is_err()
        {
            warn!("{}: close timed out", session.info().sysname);
        }
    }
}
