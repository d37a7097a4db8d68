pub mod usb;

#[cfg(test)]
pub mod mock;

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use thiserror::Error;

/* Mode-select command sent once at open: everything zero except the */
/* trailing selector, 1 = normal 50 Hz reporting. */
pub const MODE_COMMAND: [u8; 6] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x01];

/* Outcome of one read transaction. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionStatus {
    Success,
    /* The read did not complete in time. */
    TimedOut,
    /* Explicit cancellation. */
    Cancelled,
    /* Endpoint halted. */
    Stalled,
    /* Device gone or shutting down. */
    Disconnected,
    /* Anything else; assumed transient. */
    Failed(String),
}

/* How the lifecycle controller reacts to a status. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Timeout,
    Terminal,
    Transient,
}

impl CompletionStatus {
    pub fn class(&self) -> StatusClass {
        match self {
            Self::Success => StatusClass::Success,
            Self::TimedOut => StatusClass::Timeout,
            Self::Cancelled | Self::Stalled | Self::Disconnected => StatusClass::Terminal,
            Self::Failed(_) => StatusClass::Transient,
        }
    }
}

/* A finished read: the bytes actually transferred plus the status. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub data: Vec<u8>,
    pub status: CompletionStatus,
}

impl Completion {
    #[cfg(test)]
    pub fn success(data: Vec<u8>) -> Self {
        Self {
            data,
            status: CompletionStatus::Success,
        }
    }

    pub fn failed(status: CompletionStatus) -> Self {
        Self {
            data: Vec::new(),
            status,
        }
    }
}

/* An in-flight read. Resolves exactly once; dropping it cancels the read. */
pub type Transfer = Pin<Box<dyn Future<Output = Completion> + Send + 'static>>;

/* The transport refused to start a read. */
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("device is disconnected")]
    Disconnected,

    #[error("a read is already outstanding")]
    Busy,

    /* Benign: `shutdown()` was called; the device is going away. */
    #[error("polling has been stopped")]
    Stopped,
}

/* Errors from non-read transport operations. */
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("control transfer failed: {0}")]
    Control(String),

    #[error("control transfer timed out")]
    Timeout,

    #[error("device reset failed: {0}")]
    Reset(String),

    #[error("USB I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/* Hardware access for one gun. */
/*  */
/* All USB traffic goes through this trait so that the lifecycle */
/* controller and session never touch nusb directly and can be driven */
/* by a scripted transport in tests. */
#[async_trait]
pub trait Transport: Send + Sync {
    /* Returns the transport name for logging purposes. */
    fn name(&self) -> &str;

    /* Start one interrupt read. Non-blocking: the result is observed by */
    /* awaiting the returned `Transfer`. */
    fn submit_read(&self) -> Result<Transfer, SubmissionError>;

    /* Send a class SET_REPORT control payload to the interface. */
    async fn send_control(&self, payload: &[u8]) -> Result<(), TransportError>;

    /* Port-reset the device. */
    async fn reset(&self) -> Result<(), TransportError>;

    /* Refuse every later `submit_read` with `SubmissionError::Stopped`. */
    /* Called when the gun is unplugged, before its session is closed. */
    fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        assert_eq!(CompletionStatus::Success.class(), StatusClass::Success);
        assert_eq!(CompletionStatus::TimedOut.class(), StatusClass::Timeout);
        assert_eq!(CompletionStatus::Cancelled.class(), StatusClass::Terminal);
        assert_eq!(CompletionStatus::Stalled.class(), StatusClass::Terminal);
        assert_eq!(CompletionStatus::Disconnected.class(), StatusClass::Terminal);
        assert_eq!(
            CompletionStatus::Failed("overflow".into()).class(),
            StatusClass::Transient
        );
    }

    #[test]
    fn mode_command_selects_normal_mode() {
        assert_eq!(MODE_COMMAND.len(), 6);
        assert_eq!(MODE_COMMAND[5], 1);
        assert!(MODE_COMMAND[..5].iter().all(|b| *b == 0));
    }
}
