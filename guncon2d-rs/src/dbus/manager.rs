use std::sync::Arc;

use tokio::sync::RwLock;
use zbus::interface;

/* Bumped whenever a property or method of the guncon2 interfaces changes */
/* shape; guncon2ctl prints it in `list`. */
pub const API_VERSION: i32 = 1;

/* org.freedesktop.guncon2.Manager at /org/freedesktop/guncon2. */
/*  */
/* Publishes the object path of every gun that has a live session. Paths */
/* are unique: udev can replay an add for a gun that is already known. */
pub struct GunconManager {
    devices: Arc<RwLock<Vec<String>>>,
}

impl Default for GunconManager {
    fn default() -> Self {
        Self {
            devices: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl GunconManager {
    /* Called once the gun's Device object is being served. */
    pub async fn add_device(&self, path: String) {
        let mut devices = self.devices.write().await;
        if !devices.contains(&path) {
            devices.push(path);
        }
    }

    /* Called after the session was removed and the object unpublished. */
    pub async fn remove_device(&self, path: &str) {
        self.devices.write().await.retain(|p| p != path);
    }
}

#[interface(name = "org.freedesktop.guncon2.Manager")]
impl GunconManager {
    #[zbus(property, name = "APIVersion")]
    async fn api_version(&self) -> i32 {
        API_VERSION
    }

    /* Emits PropertiesChanged through `devices_changed` on hot-plug. */
    #[zbus(property)]
    async fn devices(&self) -> Vec<zbus::zvariant::ObjectPath<'static>> {
        self.devices
            .read()
            .await
            .iter()
            .filter_map(|p| zbus::zvariant::ObjectPath::try_from(p.as_str()).ok())
            .map(|p| p.to_owned())
            .collect()
    }
}
