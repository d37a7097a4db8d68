/* nusb-backed transport for a real GunCon 2.
 *
 * The gun exposes a single vendor interface with one interrupt-IN endpoint.
 * The interface is claimed (detaching any kernel driver) for as long as the
 * transport lives. */

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nusb::transfer::{
    ControlOut, ControlType, Direction, EndpointType, Recipient, RequestBuffer, TransferError,
};
use tracing::{debug, info};

use super::{Completion, CompletionStatus, SubmissionError, Transfer, Transport, TransportError};
use crate::device::DeviceInfo;

/* The gun only has interface 0. */
const INTERFACE: u8 = 0;

/* HID class SET_REPORT, output report */
const HID_SET_REPORT: u8 = 0x09;
const REPORT_TYPE_OUTPUT: u16 = 0x0200;

/* Upper bound on the mode command round-trip. */
const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

pub struct UsbTransport {
    device: nusb::Device,
    interface: nusb::Interface,
    endpoint: u8,
    packet_size: usize,
    read_timeout: Option<Duration>,
    /* Set once a read reports the device gone; later submissions fail fast */
    disconnected: Arc<AtomicBool>,
    stopped: AtomicBool,
    label: String,
}

/* Find the first interrupt-IN endpoint: (address, max packet size). */
fn find_interrupt_in(interface: &nusb::Interface) -> Option<(u8, usize)> {
    interface.descriptors().find_map(|alt| {
        alt.endpoints()
            .find(|ep| ep.transfer_type() == EndpointType::Interrupt && ep.direction() == Direction::In)
            .map(|ep| (ep.address(), ep.max_packet_size()))
    })
}

/* Translate a nusb transfer error into a completion status. */
fn map_transfer_error(error: TransferError) -> CompletionStatus {
    match error {
        TransferError::Cancelled => CompletionStatus::Cancelled,
        TransferError::Stall => CompletionStatus::Stalled,
        TransferError::Disconnected => CompletionStatus::Disconnected,
        other => CompletionStatus::Failed(other.to_string()),
    }
}

impl UsbTransport {
    /* Open the gun at the bus position reported by udev. */
    /*  */
    /* `read_timeout` bounds each interrupt read; `None` waits forever, */
    /* which is the normal case for a gun streaming at 50 Hz. */
    pub fn open(info: &DeviceInfo, read_timeout: Option<Duration>) -> Result<Self, TransportError> {
        let usb_info = nusb::list_devices()?
            .find(|d| d.bus_number() == info.busnum && d.device_address() == info.devnum)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!(
                        "no USB device at bus {} address {}",
                        info.busnum, info.devnum
                    ),
                )
            })?;

        let device = usb_info.open()?;
        let interface = device.detach_and_claim_interface(INTERFACE)?;

        let (endpoint, packet_size) = find_interrupt_in(&interface).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "could not find interrupt endpoint")
        })?;

        info!(
            "Claimed {} interface {} (endpoint {:#04x}, {} byte packets)",
            info.sysname, INTERFACE, endpoint, packet_size
        );

        Ok(Self {
            device,
            interface,
            endpoint,
            packet_size,
            read_timeout,
            disconnected: Arc::new(AtomicBool::new(false)),
            stopped: AtomicBool::new(false),
            label: format!("usb {:03}/{:03}", info.busnum, info.devnum),
        })
    }
}

#[async_trait]
impl Transport for UsbTransport {
    fn name(&self) -> &str {
        &self.label
    }

    fn submit_read(&self) -> Result<Transfer, SubmissionError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SubmissionError::Stopped);
        }
        if self.disconnected.load(Ordering::Acquire) {
            return Err(SubmissionError::Disconnected);
        }

        /* nusb queues the transfer immediately; failures surface on completion */
        let pending = self
            .interface
            .interrupt_in(self.endpoint, RequestBuffer::new(self.packet_size));
        let limit = self.read_timeout;
        let disconnected = self.disconnected.clone();

        Ok(Box::pin(async move {
            let completion = match limit {
                Some(limit) => match tokio::time::timeout(limit, pending).await {
                    Ok(completion) => completion,
                    /* Dropping the transfer future cancels it */
                    Err(_elapsed) => return Completion::failed(CompletionStatus::TimedOut),
                },
                None => pending.await,
            };

            let status = match completion.status {
                Ok(()) => CompletionStatus::Success,
                Err(e) => map_transfer_error(e),
            };
            if status == CompletionStatus::Disconnected {
                disconnected.store(true, Ordering::Release);
            }
            Completion {
                data: completion.data,
                status,
            }
        }))
    }

    async fn send_control(&self, payload: &[u8]) -> Result<(), TransportError> {
        let pending = self.interface.control_out(ControlOut {
            control_type: ControlType::Class,
            recipient: Recipient::Interface,
            request: HID_SET_REPORT,
            value: REPORT_TYPE_OUTPUT,
            index: u16::from(INTERFACE),
            data: payload,
        });

        match tokio::time::timeout(CONTROL_TIMEOUT, pending).await {
            Ok(completion) => {
                completion
                    .into_result()
                    .map_err(|e| TransportError::Control(e.to_string()))?;
                debug!("TX control {} bytes: {:02x?}", payload.len(), payload);
                Ok(())
            }
            Err(_elapsed) => Err(TransportError::Timeout),
        }
    }

    async fn reset(&self) -> Result<(), TransportError> {
        self.device
            .reset()
            .map_err(|e| TransportError::Reset(e.to_string()))
    }

    fn shutdown(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!("{}: no longer accepting reads", self.label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_errors_map_to_statuses() {
        assert_eq!(
            map_transfer_error(TransferError::Cancelled),
            CompletionStatus::Cancelled
        );
        assert_eq!(
            map_transfer_error(TransferError::Stall),
            CompletionStatus::Stalled
        );
        assert_eq!(
            map_transfer_error(TransferError::Disconnected),
            CompletionStatus::Disconnected
        );
        assert!(matches!(
            map_transfer_error(TransferError::Fault),
            CompletionStatus::Failed(_)
        ));
    }
}
