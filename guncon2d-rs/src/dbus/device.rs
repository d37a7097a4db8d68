use std::sync::Arc;

use tracing::{info, warn};
use zbus::interface;
use zbus::object_server::SignalEmitter;

use crate::calibration::{CalibrationBounds, OffscreenPosition, OutputRange, TwoPointShots};
use crate::session::{DeviceSession, SessionError};

/* Root under which every gun is published. */
pub const DEVICE_PATH_PREFIX: &str = "/org/freedesktop/guncon2/device";

pub fn device_path(session: &DeviceSession) -> String {
    format!("{}/{}", DEVICE_PATH_PREFIX, session.info().object_name())
}

fn io_error(e: SessionError) -> zbus::fdo::Error {
    zbus::fdo::Error::IOError(e.to_string())
}

/* The org.freedesktop.guncon2.Device interface. */
/*  */
/* Lifecycle methods map straight onto the session; settings properties */
/* write through the session's `SettingsHandle` and take effect on the */
/* next decoded report. */
pub struct GunconDevice {
    session: Arc<DeviceSession>,
}

impl GunconDevice {
    pub fn new(session: Arc<DeviceSession>) -> Self {
        Self { session }
    }

    async fn lifecycle_changed(&self, emitter: &SignalEmitter<'_>) {
        if let Err(e) = self.is_open_changed(emitter).await {
            warn!("Failed to emit IsOpen change: {}", e);
        }
        if let Err(e) = self.state_changed(emitter).await {
            warn!("Failed to emit State change: {}", e);
        }
    }
}

#[interface(name = "org.freedesktop.guncon2.Device")]
impl GunconDevice {
    /* Product name reported by udev (constant). */
    #[zbus(property)]
    async fn name(&self) -> String {
        self.session.info().name.clone()
    }

    /* `usb:vvvv:pppp` (constant). */
    #[zbus(property)]
    async fn model(&self) -> String {
        self.session.info().model()
    }

    #[zbus(property)]
    async fn phys(&self) -> String {
        self.session.info().phys()
    }

    #[zbus(property)]
    async fn is_open(&self) -> bool {
        self.session.is_open()
    }

    /* Read transaction state: "closed", "armed" or "shutting-down". */
    #[zbus(property)]
    async fn state(&self) -> String {
        self.session.state().as_str().to_string()
    }

    /* Calibrated raw window as (x_min, x_max, y_min, y_max). */
    #[zbus(property)]
    async fn calibration(&self) -> (u16, u16, u16, u16) {
        let b = self.session.settings().snapshot().bounds;
        (b.x_min, b.x_max, b.y_min, b.y_max)
    }

    #[zbus(property)]
    async fn set_calibration(&self, value: (u16, u16, u16, u16)) {
        let (x_min, x_max, y_min, y_max) = value;
        self.session
            .settings()
            .set_bounds(CalibrationBounds::new(x_min, x_max, y_min, y_max));
    }

    /* Rescale targets as (x_max, y_max). */
    #[zbus(property)]
    async fn output_range(&self) -> (u16, u16) {
        let o = self.session.settings().snapshot().output;
        (o.x_max, o.y_max)
    }

    #[zbus(property)]
    async fn set_output_range(&self, value: (u16, u16)) {
        self.session.settings().set_output_range(OutputRange {
            x_max: value.0,
            y_max: value.1,
        });
    }

    #[zbus(property)]
    async fn raw(&self) -> bool {
        self.session.settings().snapshot().features.raw
    }

    #[zbus(property)]
    async fn set_raw(&self, raw: bool) {
        self.session.settings().update(|s| s.features.raw = raw);
    }

    #[zbus(property)]
    async fn offscreen_reload(&self) -> bool {
        self.session.settings().snapshot().features.offscreen_reload
    }

    #[zbus(property)]
    async fn set_offscreen_reload(&self, enabled: bool) {
        self.session
            .settings()
            .update(|s| s.features.offscreen_reload = enabled);
    }

    /* "hold" or "zero". */
    #[zbus(property)]
    async fn offscreen_position(&self) -> String {
        self.session
            .settings()
            .snapshot()
            .features
            .offscreen_position
            .as_str()
            .to_string()
    }

    #[zbus(property)]
    async fn set_offscreen_position(&self, policy: String) -> zbus::fdo::Result<()> {
        let position = policy
            .parse::<OffscreenPosition>()
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
        self.session
            .settings()
            .update(|s| s.features.offscreen_position = position);
        Ok(())
    }

    #[zbus(property)]
    async fn resubmit_on_timeout(&self) -> bool {
        self.session.settings().snapshot().features.resubmit_on_timeout
    }

    #[zbus(property)]
    async fn set_resubmit_on_timeout(&self, enabled: bool) {
        self.session
            .settings()
            .update(|s| s.features.resubmit_on_timeout = enabled);
    }

    async fn open(
        &self,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> zbus::fdo::Result<()> {
        let result = self.session.open().await.map_err(io_error);
        self.lifecycle_changed(&emitter).await;
        result
    }

    async fn close(&self, #[zbus(signal_emitter)] emitter: SignalEmitter<'_>) {
        self.session.close().await;
        self.lifecycle_changed(&emitter).await;
    }

    async fn suspend(&self, #[zbus(signal_emitter)] emitter: SignalEmitter<'_>) {
        self.session.suspend().await;
        self.lifecycle_changed(&emitter).await;
    }

    async fn resume(
        &self,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> zbus::fdo::Result<()> {
        let result = self.session.resume().await.map_err(io_error);
        self.lifecycle_changed(&emitter).await;
        result
    }

    async fn reset_resume(
        &self,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> zbus::fdo::Result<()> {
        let result = self.session.reset_resume().await.map_err(io_error);
        self.lifecycle_changed(&emitter).await;
        result
    }

    /* USB port reset with reads quiesced across it. */
    async fn reset(
        &self,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> zbus::fdo::Result<()> {
        let result = self.session.reset().await.map_err(io_error);
        self.lifecycle_changed(&emitter).await;
        result
    }

    /* Derive and apply bounds from a centre shot and a top-left shot. */
    /* Returns the bounds now in effect. */
    async fn calibrate_two_point(
        &self,
        center_shot: (u16, u16),
        topleft_shot: (u16, u16),
        center_target: (u16, u16),
        topleft_target: (u16, u16),
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> zbus::fdo::Result<(u16, u16, u16, u16)> {
        let shots = TwoPointShots {
            center_shot,
            topleft_shot,
            center_target,
            topleft_target,
        };
        let settings = self.session.settings();
        let (bounds, errors) = shots.solve(settings.snapshot().bounds);

        if errors.len() == 2 {
            let reasons: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(zbus::fdo::Error::InvalidArgs(reasons.join("; ")));
        }
        for e in &errors {
            warn!("{}: {}", self.session.info().sysname, e);
        }

        settings.set_bounds(bounds);
        info!(
            "{}: calibrated to x {}..={} y {}..={}",
            self.session.info().sysname,
            bounds.x_min,
            bounds.x_max,
            bounds.y_min,
            bounds.y_max
        );
        if let Err(e) = self.calibration_changed(&emitter).await {
            warn!("Failed to emit Calibration change: {}", e);
        }

        Ok((bounds.x_min, bounds.x_max, bounds.y_min, bounds.y_max))
    }
}
