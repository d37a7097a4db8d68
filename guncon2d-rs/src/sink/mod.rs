pub mod json;
pub mod uinput;

use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::calibration::Settings;
use crate::device::DeviceInfo;

/* Logical keys reported by the gun. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    /* Pointer primary button */
    Trigger,
    /* Pointer secondary button (off-screen shot) */
    Reload,
    A,
    B,
    C,
    Start,
    Select,
}

/* Logical absolute axes. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    X,
    Y,
    HatX,
    HatY,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    Key { key: Key, pressed: bool },
    Abs { axis: Axis, value: i32 },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/* Range advertised for one absolute axis. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisRange {
    pub min: i32,
    pub max: i32,
    pub fuzz: i32,
}

/* Pointer axis ranges a sink should advertise for the given settings. */
/* Rescale mode advertises the output range; raw mode the calibrated window. */
pub fn pointer_ranges(settings: &Settings) -> (AxisRange, AxisRange) {
    if settings.features.raw {
        let b = &settings.bounds;
        (
            AxisRange {
                min: i32::from(b.x_min),
                max: i32::from(b.x_max),
                fuzz: 0,
            },
            AxisRange {
                min: i32::from(b.y_min),
                max: i32::from(b.y_max),
                fuzz: 0,
            },
        )
    } else {
        (
            AxisRange {
                min: 0,
                max: i32::from(settings.output.x_max),
                fuzz: 10,
            },
            AxisRange {
                min: 0,
                max: i32::from(settings.output.y_max),
                fuzz: 3,
            },
        )
    }
}

/* Consumer of decoded input. */
/*  */
/* `emit` queues one change; `sync` marks the end of one decoded report. */
/* Implementations must not block for long: they are driven from the */
/* transfer completion path. */
pub trait EventSink: Send {
    fn name(&self) -> &str;

    fn emit(&mut self, event: InputEvent) -> Result<(), SinkError>;

    fn sync(&mut self) -> Result<(), SinkError>;
}

/* Which sink the daemon creates for each device. */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SinkKind {
    #[default]
    Uinput,
    Json,
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uinput" => Ok(Self::Uinput),
            "json" => Ok(Self::Json),
            other => Err(format!("Unknown sink '{other}'")),
        }
    }
}

/* Instantiate the configured sink for a device. */
pub fn create_sink(
    kind: SinkKind,
    info: &DeviceInfo,
    settings: &Settings,
) -> Result<Box<dyn EventSink>, SinkError> {
    match kind {
        SinkKind::Uinput => Ok(Box::new(uinput::UinputSink::create(info, settings)?)),
        SinkKind::Json => Ok(Box::new(json::JsonSink::stdout(&info.sysname))),
    }
}
