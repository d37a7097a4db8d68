/* udev hot-plug monitor.
 *
 * Runs on its own OS thread (udev handles are not `Send`): reports every
 * USB device present at startup, then waits on the udev netlink socket and
 * forwards add/remove events to the daemon through an `mpsc` channel.
 * Filtering against the configured matches happens on the receiving side. */

use std::os::fd::{AsRawFd, BorrowedFd};
use std::thread;

use anyhow::{Context, Result};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAction {
    Add {
        sysname: String,
        name: String,
        vid: u16,
        pid: u16,
        busnum: u8,
        devnum: u8,
    },
    Remove {
        sysname: String,
    },
}

/* Parse the `PRODUCT` property, `vid/pid/bcdDevice` in unpadded hex. */
fn parse_product(product: &str) -> Option<(u16, u16)> {
    let mut parts = product.split('/');
    let vid = u16::from_str_radix(parts.next()?, 16).ok()?;
    let pid = u16::from_str_radix(parts.next()?, 16).ok()?;
    Some((vid, pid))
}

fn property(device: &udev::Device, key: &str) -> Option<String> {
    device
        .property_value(key)
        .map(|v| v.to_string_lossy().into_owned())
}

fn sysname(device: &udev::Device) -> String {
    device.sysname().to_string_lossy().into_owned()
}

/* Build an `Add` action from a `usb_device`. `None` for interfaces, hubs */
/* without a bus address, and anything with a malformed PRODUCT. */
fn add_action(device: &udev::Device) -> Option<DeviceAction> {
    let (vid, pid) = parse_product(&property(device, "PRODUCT")?)?;
    let busnum = property(device, "BUSNUM")?.trim().parse().ok()?;
    let devnum = property(device, "DEVNUM")?.trim().parse().ok()?;
    let name = property(device, "ID_MODEL")
        .map(|m| m.replace('_', " "))
        .unwrap_or_else(|| format!("{:04x}:{:04x}", vid, pid));

    Some(DeviceAction::Add {
        sysname: sysname(device),
        name,
        vid,
        pid,
        busnum,
        devnum,
    })
}

/* Report devices that were already plugged in before the daemon started. */
fn enumerate(tx: &mpsc::Sender<DeviceAction>) -> Result<()> {
    let mut enumerator = udev::Enumerator::new().context("Failed to create udev enumerator")?;
    enumerator.match_subsystem("usb")?;
    enumerator.match_property("DEVTYPE", "usb_device")?;

    for device in enumerator.scan_devices()? {
        if let Some(action) = add_action(&device) {
            tx.blocking_send(action)
                .context("Device channel closed during enumeration")?;
        }
    }
    Ok(())
}

fn monitor(tx: &mpsc::Sender<DeviceAction>) -> Result<()> {
    let socket = udev::MonitorBuilder::new()?
        .match_subsystem_devtype("usb", "usb_device")?
        .listen()
        .context("Failed to listen on udev monitor")?;

    /* Subscribe before enumerating so nothing plugged in between is lost */
    enumerate(tx)?;
    info!("udev monitor running");

    loop {
        {
            /* SAFETY: `socket` outlives this borrow. */
            let fd = unsafe { BorrowedFd::borrow_raw(socket.as_raw_fd()) };
            let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(e).context("poll on udev socket failed"),
            }
        }

        for event in socket.iter() {
            let action = match event.event_type() {
                udev::EventType::Add => add_action(&event.device()),
                udev::EventType::Remove => Some(DeviceAction::Remove {
                    sysname: sysname(&event.device()),
                }),
                other => {
                    debug!("Ignoring udev {:?} for {}", other, sysname(&event.device()));
                    None
                }
            };

            if let Some(action) = action {
                debug!("udev: {:?}", action);
                if tx.blocking_send(action).is_err() {
                    info!("Device channel closed, stopping udev monitor");
                    return Ok(());
                }
            }
        }
    }
}

/* Start the monitor thread. */
pub fn spawn(tx: mpsc::Sender<DeviceAction>) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("udev-monitor".into())
        .spawn(move || {
            if let Err(e) = monitor(&tx) {
                error!("udev monitor failed: {e:#}");
            }
        })
        .context("Failed to spawn udev monitor thread")
}
