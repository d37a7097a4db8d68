/* Daemon configuration, read from an INI file.
 *
 *   [Device]       DeviceMatch, AutoOpen, SendModeCommand
 *   [Calibration]  XMin, XMax, YMin, YMax
 *   [Output]       Raw, XMax, YMax, OffscreenReload, OffscreenPosition, Sink
 *   [Transport]    ReadTimeoutMs, ResubmitOnTimeout
 *
 * Every key is optional. A value that does not parse is reported and the
 * default is kept. */

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use configparser::ini::Ini;
use thiserror::Error;
use tracing::{debug, warn};

use crate::calibration::Settings;
use crate::device::{GUNCON2_PRODUCT_ID, NAMCO_VENDOR_ID};
use crate::sink::SinkKind;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/guncon2d.conf";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("INI parse error: {0}")]
    Parse(String),

    #[error("Invalid DeviceMatch pattern: {0}")]
    InvalidMatch(String),
}

/* A single bus:vid:pid match pattern from the `DeviceMatch=` field. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMatch {
    pub bustype: String,
    pub vid: u16,
    pub pid: u16,
}

impl DeviceMatch {
    pub fn usb(vid: u16, pid: u16) -> Self {
        Self {
            bustype: "usb".to_string(),
            vid,
            pid,
        }
    }

    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.bustype == "usb" && self.vid == vid && self.pid == pid
    }
}

/* Parse a `DeviceMatch` string like `"usb:0b9a:016a;usb:0b9a:016b"`. */
pub fn parse_device_matches(s: &str) -> Result<Vec<DeviceMatch>, ConfigError> {
    let mut matches = Vec::new();

    for part in s.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let segments: Vec<&str> = part.split(':').collect();
        let [bustype, vid, pid] = segments.as_slice() else {
            return Err(ConfigError::InvalidMatch(part.to_string()));
        };
        let vid = u16::from_str_radix(vid, 16)
            .map_err(|e| ConfigError::InvalidMatch(format!("{part}: VID {e}")))?;
        let pid = u16::from_str_radix(pid, 16)
            .map_err(|e| ConfigError::InvalidMatch(format!("{part}: PID {e}")))?;

        matches.push(DeviceMatch {
            bustype: bustype.to_ascii_lowercase(),
            vid,
            pid,
        });
    }

    if matches.is_empty() {
        return Err(ConfigError::InvalidMatch("DeviceMatch is empty".to_string()));
    }

    Ok(matches)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub matches: Vec<DeviceMatch>,
    /* Open sessions as soon as a gun is plugged in. */
    pub auto_open: bool,
    pub send_mode_command: bool,
    pub settings: Settings,
    pub sink: SinkKind,
    /* `None` waits forever on each read. */
    pub read_timeout: Option<Duration>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            matches: vec![DeviceMatch::usb(NAMCO_VENDOR_ID, GUNCON2_PRODUCT_ID)],
            auto_open: true,
            send_mode_command: true,
            settings: Settings::default(),
            sink: SinkKind::default(),
            read_timeout: None,
        }
    }
}

/* Overwrite `target` with the parsed value of `[section] key`, if present. */
fn read_value<T>(ini: &Ini, section: &str, key: &str, target: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = ini.get(section, key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(e) => warn!("Ignoring invalid [{}] {} = '{}': {}", section, key, raw, e),
    }
}

fn read_bool(ini: &Ini, section: &str, key: &str, target: &mut bool) {
    let Some(raw) = ini.get(section, key) else {
        return;
    };
    match parse_bool(&raw) {
        Some(value) => *target = value,
        None => warn!("Ignoring invalid [{}] {} = '{}': expected a boolean", section, key, raw),
    }
}

impl DaemonConfig {
    /* Load the configuration file. A missing or unreadable file yields the */
    /* defaults. */
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to read config {:?}: {}, using defaults", path, e);
                return Self::default();
            }
        };

        match Self::parse(&text) {
            Ok(config) => {
                debug!("Loaded config from {:?}: {:?}", path, config);
                config
            }
            Err(e) => {
                warn!("Failed to parse config {:?}: {}, using defaults", path, e);
                Self::default()
            }
        }
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut ini = Ini::new();
        ini.read(text.to_string()).map_err(ConfigError::Parse)?;
        Ok(Self::from_ini(&ini))
    }

    /* Keys are lowercase: configparser folds case by default. */
    fn from_ini(ini: &Ini) -> Self {
        let mut config = Self::default();

        if let Some(s) = ini.get("device", "devicematch") {
            match parse_device_matches(&s) {
                Ok(matches) => config.matches = matches,
                Err(e) => warn!("Ignoring [Device] DeviceMatch: {}", e),
            }
        }
        read_bool(ini, "device", "autoopen", &mut config.auto_open);
        read_bool(ini, "device", "sendmodecommand", &mut config.send_mode_command);

        let bounds = &mut config.settings.bounds;
        read_value(ini, "calibration", "xmin", &mut bounds.x_min);
        read_value(ini, "calibration", "xmax", &mut bounds.x_max);
        read_value(ini, "calibration", "ymin", &mut bounds.y_min);
        read_value(ini, "calibration", "ymax", &mut bounds.y_max);

        let output = &mut config.settings.output;
        read_value(ini, "output", "xmax", &mut output.x_max);
        read_value(ini, "output", "ymax", &mut output.y_max);

        let features = &mut config.settings.features;
        read_bool(ini, "output", "raw", &mut features.raw);
        read_bool(ini, "output", "offscreenreload", &mut features.offscreen_reload);
        read_value(ini, "output", "offscreenposition", &mut features.offscreen_position);
        read_value(ini, "output", "sink", &mut config.sink);

        read_bool(ini, "transport", "resubmitontimeout", &mut features.resubmit_on_timeout);
        let mut timeout_ms: u64 = 0;
        read_value(ini, "transport", "readtimeoutms", &mut timeout_ms);
        config.read_timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));

        config
    }

    pub fn matches_device(&self, vid: u16, pid: u16) -> bool {
        self.matches.iter().any(|m| m.matches(vid, pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationBounds, OffscreenPosition};

    #[test]
    fn test_parse_device_matches_single() {
        let matches = parse_device_matches("usb:0b9a:016a").unwrap();
        assert_eq!(matches, vec![DeviceMatch::usb(0x0b9a, 0x016a)]);
    }

    #[test]
    fn test_parse_device_matches_multiple() {
        let matches = parse_device_matches("usb:0b9a:016a; usb:0B9A:016B;").unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[1].pid, 0x016b);
    }

    #[test]
    fn test_parse_device_matches_invalid() {
        assert!(parse_device_matches("usb:0b9a").is_err());
        assert!(parse_device_matches("usb:zzzz:016a").is_err());
        assert!(parse_device_matches(" ; ").is_err());
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = DaemonConfig::parse("").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert!(config.matches_device(NAMCO_VENDOR_ID, GUNCON2_PRODUCT_ID));
        assert!(!config.matches_device(0x046d, 0xc539));
        assert!(config.auto_open);
        assert!(config.send_mode_command);
        assert_eq!(config.read_timeout, None);
    }

    #[test]
    fn test_full_config() {
        let text = "\
[Device]
DeviceMatch=usb:0b9a:016a;usb:1234:5678
AutoOpen=no
SendModeCommand=0

[Calibration]
XMin=100
XMax=700
YMin=10
YMax=230

[Output]
Raw=false
XMax=640
YMax=480
OffscreenReload=yes
OffscreenPosition=zero
Sink=json

[Transport]
ReadTimeoutMs=250
ResubmitOnTimeout=true
";
        let config = DaemonConfig::parse(text).unwrap();
        assert!(config.matches_device(0x1234, 0x5678));
        assert!(!config.auto_open);
        assert!(!config.send_mode_command);
        assert_eq!(config.settings.bounds, CalibrationBounds::new(100, 700, 10, 230));
        assert_eq!(config.settings.output.x_max, 640);
        assert_eq!(config.settings.output.y_max, 480);
        assert!(!config.settings.features.raw);
        assert!(config.settings.features.offscreen_reload);
        assert_eq!(
            config.settings.features.offscreen_position,
            OffscreenPosition::Zero
        );
        assert!(config.settings.features.resubmit_on_timeout);
        assert_eq!(config.sink, SinkKind::Json);
        assert_eq!(config.read_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let text = "\
[Calibration]
XMin=-5
XMax=99999
YMax=120

[Output]
Raw=maybe
OffscreenPosition=clamp
Sink=evdev

[Device]
DeviceMatch=garbage
";
        let config = DaemonConfig::parse(text).unwrap();
        let defaults = DaemonConfig::default();
        assert_eq!(config.settings.bounds.x_min, defaults.settings.bounds.x_min);
        assert_eq!(config.settings.bounds.x_max, defaults.settings.bounds.x_max);
        /* Valid keys next to invalid ones still apply */
        assert_eq!(config.settings.bounds.y_max, 120);
        assert!(!config.settings.features.raw);
        assert_eq!(
            config.settings.features.offscreen_position,
            OffscreenPosition::Hold
        );
        assert_eq!(config.sink, SinkKind::Uinput);
        assert_eq!(config.matches, defaults.matches);
    }

    #[test]
    fn test_zero_timeout_means_none() {
        let config = DaemonConfig::parse("[Transport]\nReadTimeoutMs=0\n").unwrap();
        assert_eq!(config.read_timeout, None);
    }

    #[test]
    fn test_bool_spellings() {
        for (s, v) in [("1", true), ("On", true), ("YES", true), ("off", false), ("0", false)] {
            assert_eq!(parse_bool(s), Some(v), "{s}");
        }
        assert_eq!(parse_bool("2"), None);
    }
}
