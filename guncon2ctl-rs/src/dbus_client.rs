/* guncon2ctl DBus client: low-level helper for calling the org.freedesktop.guncon2 API, wrapping
 * property access and method calls for the manager and device objects. */
//! Low-level DBus client for `org.freedesktop.guncon2`.
//!
//! All communication with the daemon goes through this module.

use anyhow::{anyhow, Context, Result};
use zbus::zvariant::{OwnedValue, Value};
use zbus::Connection;

const BUS_NAME: &str = "org.freedesktop.guncon2";
const MANAGER_PATH: &str = "/org/freedesktop/guncon2";
const MANAGER_IFACE: &str = "org.freedesktop.guncon2.Manager";
const DEVICE_IFACE: &str = "org.freedesktop.guncon2.Device";

/// Calibrated raw window as reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub x_min: u16,
    pub x_max: u16,
    pub y_min: u16,
    pub y_max: u16,
}

/// A client that talks to the `guncon2d` daemon over the system DBus.
pub struct GunconClient {
    conn: Connection,
}

impl GunconClient {
    /// Connect to the system bus.
    pub async fn connect() -> Result<Self> {
        let conn = Connection::system()
            .await
            .context("Cannot connect to the system DBus")?;
        Ok(Self { conn })
    }

    // -----------------------------------------------------------------------
    // Manager
    // -----------------------------------------------------------------------

    /// Get the DBus API version from the Manager.
    pub async fn get_api_version(&self) -> Result<i32> {
        let val = self.get_property(MANAGER_PATH, MANAGER_IFACE, "APIVersion").await?;
        val.downcast_ref::<i32>()
            .context("Type mismatch for APIVersion")
    }

    /// Get the list of device object paths from the Manager.
    pub async fn list_devices(&self) -> Result<Vec<String>> {
        let val = self.get_property(MANAGER_PATH, MANAGER_IFACE, "Devices").await?;
        extract_object_path_array(val).context("Failed to parse Devices property")
    }

    /// Resolve a device specifier (numeric index or sysname substring) to a
    /// full object path.
    pub async fn resolve_device(&self, spec: &str) -> Result<String> {
        let devices = self.list_devices().await?;
        resolve_in(&devices, spec)
    }

    // -----------------------------------------------------------------------
    // Device properties
    // -----------------------------------------------------------------------

    pub async fn get_device_name(&self, path: &str) -> Result<String> {
        self.get_string_property(path, "Name").await
    }

    pub async fn get_device_model(&self, path: &str) -> Result<String> {
        self.get_string_property(path, "Model").await
    }

    pub async fn get_device_phys(&self, path: &str) -> Result<String> {
        self.get_string_property(path, "Phys").await
    }

    pub async fn get_device_state(&self, path: &str) -> Result<String> {
        self.get_string_property(path, "State").await
    }

    pub async fn get_is_open(&self, path: &str) -> Result<bool> {
        self.get_bool_property(path, "IsOpen").await
    }

    pub async fn get_calibration(&self, path: &str) -> Result<Bounds> {
        let val = self.get_property(path, DEVICE_IFACE, "Calibration").await?;
        let fields = extract_u16_struct(val, 4).context("Failed to parse Calibration property")?;
        Ok(Bounds {
            x_min: fields[0],
            x_max: fields[1],
            y_min: fields[2],
            y_max: fields[3],
        })
    }

    pub async fn set_calibration(&self, path: &str, bounds: Bounds) -> Result<()> {
        let value = (bounds.x_min, bounds.x_max, bounds.y_min, bounds.y_max);
        self.set_property(path, "Calibration", Value::from(value)).await
    }

    pub async fn get_output_range(&self, path: &str) -> Result<(u16, u16)> {
        let val = self.get_property(path, DEVICE_IFACE, "OutputRange").await?;
        let fields = extract_u16_struct(val, 2).context("Failed to parse OutputRange property")?;
        Ok((fields[0], fields[1]))
    }

    pub async fn set_output_range(&self, path: &str, x_max: u16, y_max: u16) -> Result<()> {
        self.set_property(path, "OutputRange", Value::from((x_max, y_max)))
            .await
    }

    pub async fn get_bool_flag(&self, path: &str, prop: &str) -> Result<bool> {
        self.get_bool_property(path, prop).await
    }

    pub async fn set_bool_flag(&self, path: &str, prop: &str, value: bool) -> Result<()> {
        self.set_property(path, prop, Value::from(value)).await
    }

    pub async fn get_offscreen_position(&self, path: &str) -> Result<String> {
        self.get_string_property(path, "OffscreenPosition").await
    }

    pub async fn set_offscreen_position(&self, path: &str, policy: &str) -> Result<()> {
        self.set_property(path, "OffscreenPosition", Value::from(policy))
            .await
    }

    // -----------------------------------------------------------------------
    // Device methods
    // -----------------------------------------------------------------------

    /// Call one of the argument-less lifecycle methods (Open, Close, ...).
    pub async fn call_lifecycle(&self, path: &str, method: &str) -> Result<()> {
        self.conn
            .call_method(Some(BUS_NAME), path, Some(DEVICE_IFACE), method, &())
            .await
            .with_context(|| format!("{} call failed", method))?;
        Ok(())
    }

    pub async fn calibrate_two_point(
        &self,
        path: &str,
        center_shot: (u16, u16),
        topleft_shot: (u16, u16),
        center_target: (u16, u16),
        topleft_target: (u16, u16),
    ) -> Result<Bounds> {
        let reply = self
            .conn
            .call_method(
                Some(BUS_NAME),
                path,
                Some(DEVICE_IFACE),
                "CalibrateTwoPoint",
                &(center_shot, topleft_shot, center_target, topleft_target),
            )
            .await
            .context("CalibrateTwoPoint call failed")?;
        let (x_min, x_max, y_min, y_max): (u16, u16, u16, u16) = reply.body().deserialize()?;
        Ok(Bounds {
            x_min,
            x_max,
            y_min,
            y_max,
        })
    }

    // -----------------------------------------------------------------------
    // Generic helpers
    // -----------------------------------------------------------------------

    async fn get_property(&self, path: &str, iface: &str, prop: &str) -> Result<OwnedValue> {
        let reply = self
            .conn
            .call_method(
                Some(BUS_NAME),
                path,
                Some("org.freedesktop.DBus.Properties"),
                "Get",
                &(iface, prop),
            )
            .await
            .with_context(|| format!("Get {}.{} at {} failed", iface, prop, path))?;
        let val: OwnedValue = reply.body().deserialize()?;
        Ok(val)
    }

    async fn set_property(&self, path: &str, prop: &str, value: Value<'_>) -> Result<()> {
        self.conn
            .call_method(
                Some(BUS_NAME),
                path,
                Some("org.freedesktop.DBus.Properties"),
                "Set",
                &(DEVICE_IFACE, prop, value),
            )
            .await
            .with_context(|| format!("Set {}.{} at {} failed", DEVICE_IFACE, prop, path))?;
        Ok(())
    }

    async fn get_string_property(&self, path: &str, prop: &str) -> Result<String> {
        let val = self.get_property(path, DEVICE_IFACE, prop).await?;
        val.downcast_ref::<String>()
            .with_context(|| format!("Type mismatch for {}.{} at {}", DEVICE_IFACE, prop, path))
    }

    async fn get_bool_property(&self, path: &str, prop: &str) -> Result<bool> {
        let val = self.get_property(path, DEVICE_IFACE, prop).await?;
        val.downcast_ref::<bool>()
            .with_context(|| format!("Type mismatch for {}.{} at {}", DEVICE_IFACE, prop, path))
    }
}

// ---------------------------------------------------------------------------
// Free-standing helpers
// ---------------------------------------------------------------------------

/// Pick a device from `devices` by index or by sysname substring.
///
/// Object paths carry the sysname with `-` and `.` replaced by `_`, so the
/// specifier is normalised the same way before matching.
pub fn resolve_in(devices: &[String], spec: &str) -> Result<String> {
    anyhow::ensure!(!devices.is_empty(), "No devices found");

    // Try numeric index first.
    if let Ok(idx) = spec.parse::<usize>() {
        return devices
            .get(idx)
            .cloned()
            .with_context(|| format!("Device index {} out of range (0..{})", idx, devices.len()));
    }

    let needle = spec.replace(['-', '.', ':'], "_");
    devices
        .iter()
        .find(|path| path.ends_with(&needle) || path.contains(&needle))
        .cloned()
        .ok_or_else(|| anyhow!("No device matching '{}' found", spec))
}

/// Extract a `Vec<String>` of object-path strings from an `OwnedValue`
/// that wraps an array of object-paths.
fn extract_object_path_array(val: OwnedValue) -> Result<Vec<String>> {
    let inner: Value<'_> = val.into();
    match inner {
        Value::Array(arr) => {
            let mut out = Vec::with_capacity(arr.len());
            for item in arr.iter() {
                match item {
                    Value::ObjectPath(p) => out.push(p.to_string()),
                    _ => return Err(anyhow!("Array contains non-object-path value")),
                }
            }
            Ok(out)
        }
        _ => Err(anyhow!("Value is not an array of object paths")),
    }
}

/// Extract the fields of a struct made only of `q` (u16) values.
fn extract_u16_struct(val: OwnedValue, expected: usize) -> Result<Vec<u16>> {
    let inner: Value<'_> = val.into();
    let Value::Structure(structure) = inner else {
        return Err(anyhow!("Value is not a structure"));
    };
    let mut out = Vec::with_capacity(expected);
    for field in structure.fields() {
        match field {
            Value::U16(n) => out.push(*n),
            _ => return Err(anyhow!("Structure contains non-u16 value")),
        }
    }
    anyhow::ensure!(
        out.len() == expected,
        "Expected {} fields, got {}",
        expected,
        out.len()
    );
    Ok(out)
}
