/* GunCon 2 interrupt report decoding. */
/*  */
/* The gun streams one fixed 6-byte report per interrupt transfer: */
/* - byte 0: d-pad and A/B/C (active-low bitfield) */
/* - byte 1: Start/Select/Trigger (active-low bitfield) */
/* - bytes 2..=3: X sample, u16 little-endian */
/* - byte 4: Y sample, u8 */
/* - byte 5: unused */

use serde::Serialize;

/* Exact length of one report. Anything else is skipped. */
pub const REPORT_LEN: usize = 6;

/* Byte 0 bits */
const DPAD_LEFT: u8 = 1 << 7;
const DPAD_DOWN: u8 = 1 << 6;
const DPAD_RIGHT: u8 = 1 << 5;
const DPAD_UP: u8 = 1 << 4;
const BUTTON_A: u8 = 1 << 3;
const BUTTON_B: u8 = 1 << 2;
const BUTTON_C: u8 = 1 << 1;

/* Byte 1 bits */
const BUTTON_START: u8 = 1 << 7;
const BUTTON_SELECT: u8 = 1 << 6;
const BUTTON_TRIGGER: u8 = 1 << 5;

/* Byte offsets */
const OFFSET_DPAD: usize = 0;
const OFFSET_BUTTONS: usize = 1;
const OFFSET_X: usize = 2;
const OFFSET_Y: usize = 4;

/* Physical button state. `true` means pressed. */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Buttons {
    pub trigger: bool,
    pub a: bool,
    pub b: bool,
    pub c: bool,
    pub start: bool,
    pub select: bool,
}

/* D-pad as two signed accumulators, each in -1..=1. */
/* Opposing bits may both be set; they cancel out to 0. */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Dpad {
    pub x: i8,
    pub y: i8,
}

/* One decoded report. Positions are in raw sensor units. */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodedState {
    pub buttons: Buttons,
    pub dpad: Dpad,
    pub raw_x: u16,
    pub raw_y: u16,
}

/* Test an active-low bit: a cleared bit means pressed. */
#[inline]
fn pressed(byte: u8, mask: u8) -> bool {
    byte & mask == 0
}

/* Decode one raw report. */
/* Returns `None` when the buffer is not exactly `REPORT_LEN` bytes long; */
/* there is no partial decode. */
pub fn decode(buf: &[u8]) -> Option<DecodedState> {
    let report: &[u8; REPORT_LEN] = buf.try_into().ok()?;

    let dpad_byte = report[OFFSET_DPAD];
    let button_byte = report[OFFSET_BUTTONS];

    let mut dpad = Dpad::default();
    if pressed(dpad_byte, DPAD_LEFT) {
        dpad.x -= 1;
    }
    if pressed(dpad_byte, DPAD_RIGHT) {
        dpad.x += 1;
    }
    if pressed(dpad_byte, DPAD_UP) {
        dpad.y -= 1;
    }
    if pressed(dpad_byte, DPAD_DOWN) {
        dpad.y += 1;
    }

    let buttons = Buttons {
        trigger: pressed(button_byte, BUTTON_TRIGGER),
        a: pressed(dpad_byte, BUTTON_A),
        b: pressed(dpad_byte, BUTTON_B),
        c: pressed(dpad_byte, BUTTON_C),
        start: pressed(button_byte, BUTTON_START),
        select: pressed(button_byte, BUTTON_SELECT),
    };

    Some(DecodedState {
        buttons,
        dpad,
        raw_x: u16::from_le_bytes([report[OFFSET_X], report[OFFSET_X + 1]]),
        raw_y: u16::from(report[OFFSET_Y]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /* An idle report: every active-low bit set, aim at (x, y). */
    fn idle(x: u16, y: u8) -> [u8; REPORT_LEN] {
        let [lo, hi] = x.to_le_bytes();
        [0xFF, 0xFF, lo, hi, y, 0x00]
    }

    #[test]
    fn idle_report_has_nothing_pressed() {
        let state = decode(&idle(400, 120)).expect("valid report");
        assert_eq!(state.buttons, Buttons::default());
        assert_eq!(state.dpad, Dpad::default());
        assert_eq!(state.raw_x, 400);
        assert_eq!(state.raw_y, 120);
    }

    #[test]
    fn wrong_length_is_skipped() {
        assert!(decode(&[]).is_none());
        assert!(decode(&[0xFF; 5]).is_none());
        assert!(decode(&[0xFF; 7]).is_none());
        assert!(decode(&[0xFF; 64]).is_none());
    }

    #[test]
    fn x_is_little_endian() {
        let mut report = idle(0, 0);
        report[2] = 0x34;
        report[3] = 0x12;
        assert_eq!(decode(&report).unwrap().raw_x, 0x1234);
    }

    #[test]
    fn every_button_is_active_low() {
        let cases: [(usize, u8, fn(&Buttons) -> bool); 6] = [
            (1, BUTTON_TRIGGER, |b| b.trigger),
            (0, BUTTON_A, |b| b.a),
            (0, BUTTON_B, |b| b.b),
            (0, BUTTON_C, |b| b.c),
            (1, BUTTON_START, |b| b.start),
            (1, BUTTON_SELECT, |b| b.select),
        ];

        for (byte, mask, get) in cases {
            let mut report = idle(100, 100);
            report[byte] &= !mask;
            let state = decode(&report).unwrap();
            assert!(get(&state.buttons), "bit {mask:#04x} of byte {byte} cleared");

            /* Every other button stays released */
            let pressed_count = [
                state.buttons.trigger,
                state.buttons.a,
                state.buttons.b,
                state.buttons.c,
                state.buttons.start,
                state.buttons.select,
            ]
            .iter()
            .filter(|p| **p)
            .count();
            assert_eq!(pressed_count, 1);
        }
    }

    #[test]
    fn all_bits_cleared_presses_everything() {
        let state = decode(&[0x00, 0x00, 0, 0, 0, 0]).unwrap();
        assert!(state.buttons.trigger);
        assert!(state.buttons.a && state.buttons.b && state.buttons.c);
        assert!(state.buttons.start && state.buttons.select);
        /* All four directions at once cancel out */
        assert_eq!(state.dpad, Dpad { x: 0, y: 0 });
    }

    #[test]
    fn dpad_single_directions() {
        let cases = [
            (DPAD_LEFT, Dpad { x: -1, y: 0 }),
            (DPAD_RIGHT, Dpad { x: 1, y: 0 }),
            (DPAD_UP, Dpad { x: 0, y: -1 }),
            (DPAD_DOWN, Dpad { x: 0, y: 1 }),
        ];
        for (mask, expected) in cases {
            let mut report = idle(0, 0);
            report[0] &= !mask;
            assert_eq!(decode(&report).unwrap().dpad, expected);
        }
    }

    #[test]
    fn dpad_opposing_bits_cancel() {
        let mut report = idle(0, 0);
        report[0] &= !(DPAD_LEFT | DPAD_RIGHT);
        assert_eq!(decode(&report).unwrap().dpad, Dpad { x: 0, y: 0 });

        let mut report = idle(0, 0);
        report[0] &= !(DPAD_UP | DPAD_DOWN | DPAD_RIGHT);
        assert_eq!(decode(&report).unwrap().dpad, Dpad { x: 1, y: 0 });
    }

    #[test]
    fn dpad_diagonal() {
        let mut report = idle(0, 0);
        report[0] &= !(DPAD_UP | DPAD_LEFT);
        assert_eq!(decode(&report).unwrap().dpad, Dpad { x: -1, y: -1 });
    }

    #[test]
    fn decode_is_deterministic() {
        let report = [0x5A, 0xC3, 0x10, 0x02, 0x78, 0xEE];
        assert_eq!(decode(&report), decode(&report));
    }

    #[test]
    fn trailing_byte_is_ignored() {
        let mut a = idle(321, 45);
        let mut b = a;
        a[5] = 0x00;
        b[5] = 0xFF;
        assert_eq!(decode(&a), decode(&b));
    }
}
