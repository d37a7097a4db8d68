/* Identity of one connected gun, as reported by udev. */

/* Namco vendor ID and the GunCon 2 product ID. */
pub const NAMCO_VENDOR_ID: u16 = 0x0b9a;
pub const GUNCON2_PRODUCT_ID: u16 = 0x016a;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /* udev sysname, e.g. `1-1.2` */
    pub sysname: String,
    pub name: String,
    pub vid: u16,
    pub pid: u16,
    pub busnum: u8,
    pub devnum: u8,
}

impl DeviceInfo {
    pub fn new(sysname: &str, name: &str, vid: u16, pid: u16, busnum: u8, devnum: u8) -> Self {
        Self {
            sysname: sysname.to_string(),
            name: name.to_string(),
            vid,
            pid,
            busnum,
            devnum,
        }
    }

    /* `usb:vvvv:pppp`, the same form used by `DeviceMatch=` patterns. */
    pub fn model(&self) -> String {
        format!("usb:{:04x}:{:04x}", self.vid, self.pid)
    }

    /* Physical path, published as the DBus `Phys` property. */
    pub fn phys(&self) -> String {
        format!("usb-{}/input0", self.sysname)
    }

    /* DBus object path component: sysnames contain `-` and `.`. */
    pub fn object_name(&self) -> String {
        self.sysname.replace(['-', '.', ':'], "_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gun() -> DeviceInfo {
        DeviceInfo::new("3-1.4", "GunCon2", NAMCO_VENDOR_ID, GUNCON2_PRODUCT_ID, 3, 7)
    }

    #[test]
    fn model_string() {
        assert_eq!(gun().model(), "usb:0b9a:016a");
    }

    #[test]
    fn phys_path() {
        assert_eq!(gun().phys(), "usb-3-1.4/input0");
    }

    #[test]
    fn object_name_is_dbus_safe() {
        assert_eq!(gun().object_name(), "3_1_4");
    }
}
