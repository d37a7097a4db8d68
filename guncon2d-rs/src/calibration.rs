/* Calibration and position normalization.
 *
 * Raw samples are tested against the calibrated bounds to decide whether the
 * gun is aimed at the screen, then either passed through unchanged or
 * linearly rescaled into the advertised output range. Settings are shared
 * through a `watch` channel: the configuration side writes, every decode
 * reads one consistent snapshot without taking the session guard. */

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

/* Bounds found by experimentation on a CRT at 640x480. */
pub const DEFAULT_X_MIN: u16 = 80;
pub const DEFAULT_X_MAX: u16 = 734;
pub const DEFAULT_Y_MIN: u16 = 0;
pub const DEFAULT_Y_MAX: u16 = 240;

/* Rescale target ranges. */
pub const DEFAULT_X_OUTPUT_MAX: u16 = 1024;
pub const DEFAULT_Y_OUTPUT_MAX: u16 = 255;

/* Calibrated axis, used in error reports. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalAxis {
    X,
    Y,
}

impl fmt::Display for CalAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X => f.write_str("X"),
            Self::Y => f.write_str("Y"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalibrationError {
    /* min == max on an axis. Normalization falls back to passthrough. */
    #[error("{0} axis calibration is degenerate (min == max), passing raw values through")]
    Degenerate(CalAxis),

    /* Two-point calibration could not solve an axis (coinciding targets). */
    #[error("cannot solve {0} axis from the given targets")]
    Unsolvable(CalAxis),

    #[error("unknown off-screen position policy '{0}' (expected 'hold' or 'zero')")]
    UnknownPolicy(String),
}

/* Raw-unit window that maps onto the visible screen. Inclusive on both ends. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationBounds {
    pub x_min: u16,
    pub x_max: u16,
    pub y_min: u16,
    pub y_max: u16,
}

impl Default for CalibrationBounds {
    fn default() -> Self {
        Self {
            x_min: DEFAULT_X_MIN,
            x_max: DEFAULT_X_MAX,
            y_min: DEFAULT_Y_MIN,
            y_max: DEFAULT_Y_MAX,
        }
    }
}

impl CalibrationBounds {
    pub fn new(x_min: u16, x_max: u16, y_min: u16, y_max: u16) -> Self {
        Self {
            x_min,
            x_max,
            y_min,
            y_max,
        }
    }

    /* True when the sample lies outside the calibrated window. */
    pub fn is_off_screen(&self, x: u16, y: u16) -> bool {
        x < self.x_min || x > self.x_max || y < self.y_min || y > self.y_max
    }

    /* Axes whose bounds collapse to a single value. */
    pub fn degenerate_axes(&self) -> Vec<CalAxis> {
        let mut axes = Vec::new();
        if self.x_min == self.x_max {
            axes.push(CalAxis::X);
        }
        if self.y_min == self.y_max {
            axes.push(CalAxis::Y);
        }
        axes
    }
}

/* Upper end of the rescaled output range; the lower end is always 0. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRange {
    pub x_max: u16,
    pub y_max: u16,
}

impl Default for OutputRange {
    fn default() -> Self {
        Self {
            x_max: DEFAULT_X_OUTPUT_MAX,
            y_max: DEFAULT_Y_OUTPUT_MAX,
        }
    }
}

/* What the pointer reports while the gun is aimed off-screen. */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffscreenPosition {
    /* Suppress the update; the sink keeps the last on-screen position. */
    #[default]
    Hold,
    /* Report (0, 0). */
    Zero,
}

impl OffscreenPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::Zero => "zero",
        }
    }
}

impl FromStr for OffscreenPosition {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hold" => Ok(Self::Hold),
            "zero" => Ok(Self::Zero),
            _ => Err(CalibrationError::UnknownPolicy(s.to_string())),
        }
    }
}

/* Runtime feature toggles. */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    /* Report raw sensor units instead of rescaling. */
    pub raw: bool,
    /* Off-screen trigger pulls become "reload" instead of "trigger". */
    pub offscreen_reload: bool,
    pub offscreen_position: OffscreenPosition,
    /* Keep polling after a read timeout instead of going idle until the next open. */
    pub resubmit_on_timeout: bool,
}

/* Everything the normalizer and the report handler read per decode. */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub bounds: CalibrationBounds,
    pub output: OutputRange,
    pub features: Features,
}

/* Normalizer output. Values are only meaningful for the pointer when */
/* `off_screen` is false. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalized {
    pub x: i32,
    pub y: i32,
    pub off_screen: bool,
}

/* Map `raw` from `min..=max` onto `0..=out_max`. */
/* A degenerate axis (min == max) passes the raw value through. */
fn rescale(raw: u16, min: u16, max: u16, out_max: u16) -> i32 {
    if min == max {
        return i32::from(raw);
    }

    /* i64 keeps (raw - min) * out_max exact for the full u16 range */
    let num = (i64::from(raw) - i64::from(min)) * i64::from(out_max);
    let den = i64::from(max) - i64::from(min);
    let scaled = (num / den).clamp(0, i64::from(out_max));

    /* out_max is a u16, so the clamped value always fits */
    scaled as i32
}

/* Apply calibration to one raw sample. */
pub fn normalize(raw_x: u16, raw_y: u16, settings: &Settings) -> Normalized {
    let bounds = &settings.bounds;
    let off_screen = bounds.is_off_screen(raw_x, raw_y);

    if settings.features.raw {
        return Normalized {
            x: i32::from(raw_x),
            y: i32::from(raw_y),
            off_screen,
        };
    }

    Normalized {
        x: rescale(raw_x, bounds.x_min, bounds.x_max, settings.output.x_max),
        y: rescale(raw_y, bounds.y_min, bounds.y_max, settings.output.y_max),
        off_screen,
    }
}

/* Inputs of a two-point calibration: where the gun reported each shot, and */
/* where on screen the targets were drawn. Screen size is implied by the */
/* centre target (its coordinates are half the resolution). */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwoPointShots {
    pub center_shot: (u16, u16),
    pub topleft_shot: (u16, u16),
    pub center_target: (u16, u16),
    pub topleft_target: (u16, u16),
}

impl TwoPointShots {
    /* Solve one axis. Returns the inclusive raw bounds covering the screen. */
    fn solve_axis(
        axis: CalAxis,
        center_shot: u16,
        topleft_shot: u16,
        center_target: u16,
        topleft_target: u16,
    ) -> Result<(u16, u16), CalibrationError> {
        let screen = f64::from(center_target) * 2.0;
        if screen == 0.0 {
            return Err(CalibrationError::Unsolvable(axis));
        }

        let fraction = f64::from(center_target) / screen - f64::from(topleft_target) / screen;
        if fraction == 0.0 {
            return Err(CalibrationError::Unsolvable(axis));
        }

        /* Raw units covered by the whole screen width/height */
        let span = (f64::from(center_shot) - f64::from(topleft_shot)) / fraction;
        let zero = f64::from(center_shot) - span / 2.0;

        let limit = f64::from(u16::MAX);
        let low = zero.floor().clamp(0.0, limit) as u16;
        let high = (zero + span).ceil().clamp(0.0, limit) as u16;
        Ok((low, high))
    }

    /* Derive new bounds from the shots. An axis that cannot be solved keeps */
    /* its bounds from `current` and is reported in the returned errors. */
    pub fn solve(&self, current: CalibrationBounds) -> (CalibrationBounds, Vec<CalibrationError>) {
        let mut bounds = current;
        let mut errors = Vec::new();

        match Self::solve_axis(
            CalAxis::X,
            self.center_shot.0,
            self.topleft_shot.0,
            self.center_target.0,
            self.topleft_target.0,
        ) {
            Ok((min, max)) => {
                bounds.x_min = min;
                bounds.x_max = max;
            }
            Err(e) => errors.push(e),
        }

        match Self::solve_axis(
            CalAxis::Y,
            self.center_shot.1,
            self.topleft_shot.1,
            self.center_target.1,
            self.topleft_target.1,
        ) {
            Ok((min, max)) => {
                bounds.y_min = min;
                bounds.y_max = max;
            }
            Err(e) => errors.push(e),
        }

        (bounds, errors)
    }
}

/* Log degenerate axes. Called once per bounds change, never per report. */
fn report_degenerate(bounds: &CalibrationBounds) {
    for axis in bounds.degenerate_axes() {
        warn!("{}", CalibrationError::Degenerate(axis));
    }
}

/* Single-writer handle to the shared settings. */
/*  */
/* Cloning the handle shares the same channel. Readers obtained through */
/* `subscribe` always see a complete `Settings` value. */
#[derive(Clone)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<Settings>>,
}

impl SettingsHandle {
    pub fn new(initial: Settings) -> Self {
        report_degenerate(&initial.bounds);
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Settings {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    /* Apply `modify` atomically with respect to readers. */
    pub fn update<F>(&self, modify: F)
    where
        F: FnOnce(&mut Settings),
    {
        let mut bounds_changed = false;
        let changed = self.tx.send_if_modified(|settings| {
            let before = *settings;
            modify(settings);
            bounds_changed = before.bounds != settings.bounds;
            before != *settings
        });

        if changed {
            let settings = self.snapshot();
            debug!("Settings updated: {:?}", settings);
            if bounds_changed {
                report_degenerate(&settings.bounds);
            }
        }
    }

    pub fn set_bounds(&self, bounds: CalibrationBounds) {
        self.update(|s| s.bounds = bounds);
    }

    pub fn set_output_range(&self, output: OutputRange) {
        self.update(|s| s.output = output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rescale_settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn default_scenario_rescales() {
        let n = normalize(400, 120, &rescale_settings());
        assert!(!n.off_screen);
        /* (400 - 80) * 1024 / (734 - 80) = 501.04 */
        assert_eq!(n.x, 501);
        /* (120 - 0) * 255 / (240 - 0) = 127.5 */
        assert_eq!(n.y, 127);
    }

    #[test]
    fn sample_left_of_screen_is_off_screen() {
        let n = normalize(10, 120, &rescale_settings());
        assert!(n.off_screen);
        assert_eq!(n.x, 0);
    }

    #[test]
    fn bounds_are_inclusive() {
        let b = CalibrationBounds::default();
        assert!(!b.is_off_screen(b.x_min, b.y_min));
        assert!(!b.is_off_screen(b.x_max, b.y_max));
        assert!(!b.is_off_screen(b.x_min, b.y_max));
        assert!(!b.is_off_screen(b.x_max, b.y_min));

        assert!(b.is_off_screen(b.x_min - 1, 120));
        assert!(b.is_off_screen(b.x_max + 1, 120));
        assert!(b.is_off_screen(400, b.y_max + 1));

        let b = CalibrationBounds::new(80, 734, 10, 240);
        assert!(b.is_off_screen(400, 9));
    }

    #[test]
    fn rescale_hits_both_ends() {
        let s = rescale_settings();
        let low = normalize(s.bounds.x_min, s.bounds.y_min, &s);
        let high = normalize(s.bounds.x_max, s.bounds.y_max, &s);
        assert_eq!((low.x, low.y), (0, 0));
        assert_eq!(
            (high.x, high.y),
            (i32::from(DEFAULT_X_OUTPUT_MAX), i32::from(DEFAULT_Y_OUTPUT_MAX))
        );
    }

    #[test]
    fn rescale_is_monotonic() {
        let s = rescale_settings();
        let mut previous = i32::MIN;
        for raw in 0..=1000u16 {
            let n = normalize(raw, 120, &s);
            assert!(n.x >= previous, "raw {raw} went backwards");
            assert!(n.x >= 0);
            previous = n.x;
        }
    }

    #[test]
    fn rescale_full_u16_range_does_not_overflow() {
        let mut s = rescale_settings();
        s.bounds = CalibrationBounds::new(0, u16::MAX, 0, u16::MAX);
        s.output = OutputRange {
            x_max: u16::MAX,
            y_max: u16::MAX,
        };
        let n = normalize(u16::MAX, u16::MAX, &s);
        assert_eq!(n.x, i32::from(u16::MAX));
        assert_eq!(n.y, i32::from(u16::MAX));
        let n = normalize(u16::MAX / 2, 0, &s);
        assert_eq!(n.x, i32::from(u16::MAX / 2));
    }

    #[test]
    fn raw_mode_passes_samples_through() {
        let mut s = rescale_settings();
        s.features.raw = true;
        let n = normalize(400, 120, &s);
        assert_eq!((n.x, n.y), (400, 120));
        assert!(!n.off_screen);

        /* The off-screen test still applies */
        assert!(normalize(10, 120, &s).off_screen);
    }

    #[test]
    fn degenerate_axis_falls_back_to_passthrough() {
        let mut s = rescale_settings();
        s.bounds = CalibrationBounds::new(300, 300, 0, 240);
        let n = normalize(300, 120, &s);
        assert_eq!(n.x, 300);
        assert_eq!(n.y, 127);
        assert!(!n.off_screen);

        s.bounds = CalibrationBounds::new(80, 734, 50, 50);
        let n = normalize(400, 50, &s);
        assert_eq!(n.x, 501);
        assert_eq!(n.y, 50);
    }

    #[test]
    fn degenerate_axes_are_listed() {
        assert!(CalibrationBounds::default().degenerate_axes().is_empty());
        assert_eq!(
            CalibrationBounds::new(5, 5, 7, 7).degenerate_axes(),
            vec![CalAxis::X, CalAxis::Y]
        );
    }

    #[test]
    fn offscreen_position_parsing() {
        assert_eq!("hold".parse::<OffscreenPosition>(), Ok(OffscreenPosition::Hold));
        assert_eq!(" Zero ".parse::<OffscreenPosition>(), Ok(OffscreenPosition::Zero));
        assert!("clamp".parse::<OffscreenPosition>().is_err());
        assert_eq!(OffscreenPosition::Zero.as_str(), "zero");
    }

    #[test]
    fn two_point_solves_both_axes() {
        let shots = TwoPointShots {
            center_shot: (400, 120),
            topleft_shot: (250, 60),
            center_target: (160, 120),
            topleft_target: (80, 60),
        };
        let (bounds, errors) = shots.solve(CalibrationBounds::default());
        assert!(errors.is_empty());
        assert_eq!(bounds, CalibrationBounds::new(100, 700, 0, 240));
    }

    #[test]
    fn two_point_keeps_unsolvable_axis() {
        let shots = TwoPointShots {
            center_shot: (400, 120),
            topleft_shot: (250, 60),
            /* Targets share the same Y coordinate */
            center_target: (160, 60),
            topleft_target: (80, 60),
        };
        let current = CalibrationBounds::new(1, 2, 3, 4);
        let (bounds, errors) = shots.solve(current);
        assert_eq!(errors, vec![CalibrationError::Unsolvable(CalAxis::Y)]);
        assert_eq!((bounds.x_min, bounds.x_max), (100, 700));
        assert_eq!((bounds.y_min, bounds.y_max), (3, 4));
    }

    #[test]
    fn two_point_clamps_negative_origin() {
        let shots = TwoPointShots {
            center_shot: (100, 120),
            topleft_shot: (0, 60),
            center_target: (160, 120),
            topleft_target: (80, 60),
        };
        let (bounds, _) = shots.solve(CalibrationBounds::default());
        /* span 400, zero at -100 */
        assert_eq!((bounds.x_min, bounds.x_max), (0, 300));
    }

    #[test]
    fn two_point_zero_center_target_is_unsolvable() {
        let shots = TwoPointShots {
            center_shot: (400, 120),
            topleft_shot: (250, 60),
            center_target: (0, 120),
            topleft_target: (80, 60),
        };
        let (_, errors) = shots.solve(CalibrationBounds::default());
        assert_eq!(errors, vec![CalibrationError::Unsolvable(CalAxis::X)]);
    }

    #[test]
    fn handle_snapshots_follow_updates() {
        let handle = SettingsHandle::new(Settings::default());
        let rx = handle.subscribe();

        handle.set_bounds(CalibrationBounds::new(0, 100, 0, 100));
        assert_eq!(rx.borrow().bounds, CalibrationBounds::new(0, 100, 0, 100));

        handle.update(|s| s.features.offscreen_reload = true);
        let snap = handle.snapshot();
        assert!(snap.features.offscreen_reload);
        assert_eq!(snap.bounds.x_max, 100);
    }

    #[test]
    fn handle_clones_share_state() {
        let a = SettingsHandle::new(Settings::default());
        let b = a.clone();
        b.set_output_range(OutputRange {
            x_max: 640,
            y_max: 480,
        });
        assert_eq!(a.snapshot().output.x_max, 640);
    }
}
