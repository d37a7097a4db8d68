/* uinput-backed event sink.
 *
 * The gun is exposed as two virtual input devices, matching the layout
 * games and emulators expect:
 *   - "<name>": joystick with A/B/C/Start/Select and a hat for the d-pad
 *   - "<name> (pointer)": absolute pointer with trigger (BTN_LEFT) and
 *     reload (BTN_RIGHT), flagged INPUT_PROP_DIRECT
 *
 * Events are queued per device and written as one batch on `sync()`;
 * evdev terminates every batch with SYN_REPORT. */

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{
    AbsInfo, AbsoluteAxisType, AttributeSet, BusType, EventType, InputId, Key as KeyCode,
    PropType, UinputAbsSetup,
};
use tracing::{debug, info};

use super::{pointer_ranges, Axis, AxisRange, EventSink, InputEvent, Key, SinkError};
use crate::calibration::Settings;
use crate::device::DeviceInfo;

/* Display names of the two virtual devices. */
const JOYSTICK_NAME: &str = "Namco GunCon 2";
const POINTER_NAME: &str = "Namco GunCon 2 (pointer)";

const JOYSTICK_KEYS: [KeyCode; 5] = [
    KeyCode::BTN_SOUTH, /* BTN_A */
    KeyCode::BTN_EAST, /* BTN_B */
    KeyCode::BTN_C,
    KeyCode::BTN_START,
    KeyCode::BTN_SELECT,
];
const POINTER_KEYS: [KeyCode; 2] = [KeyCode::BTN_LEFT, KeyCode::BTN_RIGHT];

const HAT_RANGE: AxisRange = AxisRange {
    min: -1,
    max: 1,
    fuzz: 0,
};

/* Which of the two virtual devices an event is written to. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Joystick,
    Pointer,
}

fn key_code(key: Key) -> KeyCode {
    match key {
        Key::Trigger => KeyCode::BTN_LEFT,
        Key::Reload => KeyCode::BTN_RIGHT,
        Key::A => KeyCode::BTN_SOUTH, /* BTN_A */
        Key::B => KeyCode::BTN_EAST, /* BTN_B */
        Key::C => KeyCode::BTN_C,
        Key::Start => KeyCode::BTN_START,
        Key::Select => KeyCode::BTN_SELECT,
    }
}

fn axis_code(axis: Axis) -> AbsoluteAxisType {
    match axis {
        Axis::X => AbsoluteAxisType::ABS_X,
        Axis::Y => AbsoluteAxisType::ABS_Y,
        Axis::HatX => AbsoluteAxisType::ABS_HAT0X,
        Axis::HatY => AbsoluteAxisType::ABS_HAT0Y,
    }
}

/* Trigger, reload and position go to the pointer, the rest to the joystick. */
fn route(event: InputEvent) -> (Target, evdev::InputEvent) {
    match event {
        InputEvent::Key { key, pressed } => {
            let target = match key {
                Key::Trigger | Key::Reload => Target::Pointer,
                _ => Target::Joystick,
            };
            let raw =
                evdev::InputEvent::new(EventType::KEY, key_code(key).code(), i32::from(pressed));
            (target, raw)
        }
        InputEvent::Abs { axis, value } => {
            let target = match axis {
                Axis::X | Axis::Y => Target::Pointer,
                Axis::HatX | Axis::HatY => Target::Joystick,
            };
            let raw = evdev::InputEvent::new(EventType::ABSOLUTE, axis_code(axis).0, value);
            (target, raw)
        }
    }
}

/* One created uinput device and the events queued for its next batch. */
struct Output {
    device: VirtualDevice,
    name: &'static str,
    pending: Vec<evdev::InputEvent>,
}

impl Output {
    fn create(
        info: &DeviceInfo,
        name: &'static str,
        keys: &[KeyCode],
        axes: &[(AbsoluteAxisType, AxisRange)],
        direct: bool,
    ) -> Result<Self, SinkError> {
        let mut key_set = AttributeSet::<KeyCode>::new();
        for key in keys {
            key_set.insert(*key);
        }

        let mut builder = VirtualDeviceBuilder::new()?
            .name(name)
            .input_id(InputId::new(BusType::BUS_USB, info.vid, info.pid, 1))
            .with_keys(&key_set)?;

        for (axis, range) in axes {
            let setup = UinputAbsSetup::new(
                *axis,
                AbsInfo::new(0, range.min, range.max, range.fuzz, 0, 0),
            );
            builder = builder.with_absolute_axis(&setup)?;
        }

        if direct {
            let mut props = AttributeSet::<PropType>::new();
            props.insert(PropType::DIRECT);
            builder = builder.with_properties(&props)?;
        }

        let device = builder.build()?;
        info!("Created uinput device \"{}\" for {}", name, info.sysname);

        Ok(Self {
            device,
            name,
            pending: Vec::with_capacity(8),
        })
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        let batch = std::mem::take(&mut self.pending);
        self.device.emit(&batch)?;
        Ok(())
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        debug!("Destroying uinput device \"{}\"", self.name);
    }
}

pub struct UinputSink {
    joystick: Output,
    pointer: Output,
}

impl UinputSink {
    /* Create both virtual devices. Pointer ranges are fixed at creation time. */
    pub fn create(info: &DeviceInfo, settings: &Settings) -> Result<Self, SinkError> {
        let joystick = Output::create(
            info,
            JOYSTICK_NAME,
            &JOYSTICK_KEYS,
            &[
                (AbsoluteAxisType::ABS_HAT0X, HAT_RANGE),
                (AbsoluteAxisType::ABS_HAT0Y, HAT_RANGE),
            ],
            false,
        )?;

        let (x, y) = pointer_ranges(settings);
        let pointer = Output::create(
            info,
            POINTER_NAME,
            &POINTER_KEYS,
            &[(AbsoluteAxisType::ABS_X, x), (AbsoluteAxisType::ABS_Y, y)],
            true,
        )?;

        Ok(Self { joystick, pointer })
    }
}

impl EventSink for UinputSink {
    fn name(&self) -> &str {
        "uinput"
    }

    fn emit(&mut self, event: InputEvent) -> Result<(), SinkError> {
        let (target, raw) = route(event);
        match target {
            Target::Joystick => self.joystick.pending.push(raw),
            Target::Pointer => self.pointer.pending.push(raw),
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<(), SinkError> {
        let joystick = self.joystick.flush();
        let pointer = self.pointer.flush();
        joystick.and(pointer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_and_reload_go_to_pointer() {
        let (target, raw) = route(InputEvent::Key {
            key: Key::Trigger,
            pressed: true,
        });
        assert_eq!(target, Target::Pointer);
        assert_eq!(raw.event_type(), EventType::KEY);
        assert_eq!(raw.code(), KeyCode::BTN_LEFT.code());
        assert_eq!(raw.value(), 1);

        let (target, raw) = route(InputEvent::Key {
            key: Key::Reload,
            pressed: false,
        });
        assert_eq!(target, Target::Pointer);
        assert_eq!(raw.code(), KeyCode::BTN_RIGHT.code());
        assert_eq!(raw.value(), 0);
    }

    #[test]
    fn position_goes_to_pointer() {
        let (target, raw) = route(InputEvent::Abs {
            axis: Axis::Y,
            value: 187,
        });
        assert_eq!(target, Target::Pointer);
        assert_eq!(raw.event_type(), EventType::ABSOLUTE);
        assert_eq!(raw.code(), AbsoluteAxisType::ABS_Y.0);
        assert_eq!(raw.value(), 187);
    }

    #[test]
    fn buttons_and_hat_go_to_joystick() {
        let (target, raw) = route(InputEvent::Key {
            key: Key::Select,
            pressed: true,
        });
        assert_eq!(target, Target::Joystick);
        assert_eq!(raw.code(), KeyCode::BTN_SELECT.code());

        let (target, raw) = route(InputEvent::Abs {
            axis: Axis::HatX,
            value: -1,
        });
        assert_eq!(target, Target::Joystick);
        assert_eq!(raw.code(), AbsoluteAxisType::ABS_HAT0X.0);
        assert_eq!(raw.value(), -1);
    }

    #[test]
    fn every_key_is_advertised() {
        for key in [Key::Trigger, Key::Reload, Key::A, Key::B, Key::C, Key::Start, Key::Select] {
            let code = key_code(key);
            assert!(JOYSTICK_KEYS.contains(&code) || POINTER_KEYS.contains(&code));
        }
    }
}
