//! Jura device model.
//!
//! A [`Device`] binds one physical machine to its catalog entry and owns the
//! user's current selection: which product is chosen and which attribute
//! values override the product defaults. It encodes the 18-byte command
//! frame the firmware expects and hands it to the BLE session for delivery.
//!
//! The consuming platform layer talks to a device through a small surface:
//! attribute queries for building its controls, `select_*`/`set_value` for
//! user input, `brew` to fire the selected product, and observer callbacks
//! for connectivity and product changes.
//!
//! # Example
//!
//! ```ignore
//! use jura_ble::{BleLink, find_machine};
//! use jura_device::Device;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (peripheral, manufacturer_data) = find_machine(None).await?;
//!     let device = Device::new("Jura", BleLink::new(peripheral), &manufacturer_data)?;
//!
//!     device.select_product("Espresso")?;
//!     device.brew()?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use jura_ble::{Link, Session};
use jura_catalog::{AttrKey, CatalogError, Machine, SpecKind};
use jura_proto::COMMAND_LEN;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("advertisement too short for a model code")]
    BadAdvertisement,
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("no active product named {0:?}")]
    UnknownProduct(String),
    #[error("selected product has no attribute {0}")]
    UnknownAttribute(AttrKey),
    #[error("attribute {0} has no option named {1:?}")]
    UnknownOption(AttrKey, String),
    #[error("no product selected")]
    NoProductSelected,
}

/// Query view of one attribute, shaped for the platform's controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    /// Option picker. `default` is the current choice: the user override if
    /// set, otherwise the product default; `None` when nothing applies yet
    /// (product not selected, or no product chosen for the `product` key).
    Options {
        options: Vec<String>,
        default: Option<String>,
    },
    /// Numeric range. `value` is the user override if set, otherwise the
    /// product default.
    Range { min: i64, max: i64, step: i64, value: i64 },
}

/// Link-quality bookkeeping fed from advertisements.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    pub last_seen: Option<SystemTime>,
    pub rssi: Option<i16>,
}

type Observer = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Observers {
    connectivity: Mutex<Vec<Observer>>,
    product: Mutex<Vec<Observer>>,
}

impl Observers {
    fn notify(list: &Mutex<Vec<Observer>>) {
        for observer in lock(list).iter() {
            observer();
        }
    }
}

#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    conn_info: Mutex<ConnectionInfo>,
    observers: Observers,
}

#[derive(Default)]
struct Selection {
    /// Index into `Machine::products`.
    product: Option<usize>,
    values: HashMap<AttrKey, i64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One paired Jura machine: catalog, selection state and BLE session.
pub struct Device {
    pub name: String,
    machine: Arc<Machine>,
    session: Session,
    shared: Arc<Shared>,
    selection: Mutex<Selection>,
}

impl Device {
    /// Build a device from a peripheral link and the manufacturer data of
    /// its advertisement. Fails when the advertisement carries no model code
    /// or the model is not in the bundled catalog; both are fatal, there is
    /// nothing to retry.
    pub fn new(
        name: impl Into<String>,
        link: impl Link,
        manufacturer_data: &[u8],
    ) -> Result<Self, DeviceError> {
        let code = jura_proto::model_code(manufacturer_data).ok_or(DeviceError::BadAdvertisement)?;
        let machine = Arc::new(jura_catalog::machine(code)?);

        let shared = Arc::new(Shared::default());
        let session_shared = Arc::clone(&shared);
        let session = Session::new(link, move |connected| {
            session_shared.connected.store(connected, Ordering::Relaxed);
            Observers::notify(&session_shared.observers.connectivity);
        });

        Ok(Self {
            name: name.into(),
            machine,
            session,
            shared,
            selection: Mutex::new(Selection::default()),
        })
    }

    pub fn model(&self) -> &str {
        &self.machine.model
    }

    /// The shared, read-only catalog entry for this machine's model.
    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    /// Select-style attribute keys applicable to this machine.
    pub fn select_keys(&self) -> Vec<AttrKey> {
        self.machine.select_keys()
    }

    /// Number-style attribute keys applicable to this machine.
    pub fn number_keys(&self) -> Vec<AttrKey> {
        self.machine.number_keys()
    }

    /// Query one attribute. `None` means the attribute is unavailable right
    /// now: no product selected and the catalog has no option list for the
    /// key, or the selected product does not carry it.
    pub fn attribute(&self, key: AttrKey) -> Option<Attribute> {
        if key == AttrKey::Product {
            let selection = lock(&self.selection);
            return Some(Attribute::Options {
                options: self
                    .machine
                    .products
                    .iter()
                    .filter(|p| p.active)
                    .map(|p| p.name.clone())
                    .collect(),
                default: selection.product.map(|i| self.machine.products[i].name.clone()),
            });
        }

        let selection = lock(&self.selection);
        let spec = selection
            .product
            .and_then(|i| self.machine.products[i].attribute(key));

        let Some(spec) = spec else {
            // before a product is chosen, select keys expose the
            // catalog-wide option list so pickers can be pre-populated
            return self.machine.catalog_options(key).map(|options| Attribute::Options {
                options: options.to_vec(),
                default: None,
            });
        };

        Some(match &spec.kind {
            SpecKind::Range { min, max, step, value } => Attribute::Range {
                min: *min,
                max: *max,
                step: *step,
                value: selection.values.get(&key).copied().unwrap_or(*value),
            },
            SpecKind::Items { items, default } => {
                let current = selection
                    .values
                    .get(&key)
                    .copied()
                    .unwrap_or(i64::from(*default));
                Attribute::Options {
                    options: items.iter().map(|i| i.name.clone()).collect(),
                    default: items
                        .iter()
                        .find(|i| i64::from(i.value) == current)
                        .map(|i| i.name.clone()),
                }
            }
        })
    }

    /// Select the product to brew. Clears all attribute overrides from any
    /// previous selection and notifies product observers.
    pub fn select_product(&self, product: &str) -> Result<(), DeviceError> {
        let index = self
            .machine
            .products
            .iter()
            .position(|p| p.active && p.name == product)
            .ok_or_else(|| DeviceError::UnknownProduct(product.to_string()))?;

        self.session.ping();
        {
            let mut selection = lock(&self.selection);
            selection.product = Some(index);
            selection.values.clear();
        }
        Observers::notify(&self.shared.observers.product);
        Ok(())
    }

    /// Choose an option of an enumerated attribute by name. For the
    /// `product` key this is the same as [`Device::select_product`].
    pub fn select_option(&self, key: AttrKey, option: &str) -> Result<(), DeviceError> {
        if key == AttrKey::Product {
            return self.select_product(option);
        }

        let value = {
            let selection = lock(&self.selection);
            let spec = selection
                .product
                .and_then(|i| self.machine.products[i].attribute(key))
                .ok_or(DeviceError::UnknownAttribute(key))?;
            spec.item_named(option)
                .ok_or_else(|| DeviceError::UnknownOption(key, option.to_string()))?
                .value
        };
        self.set_value(key, i64::from(value));
        Ok(())
    }

    /// Override an attribute value for the current selection.
    ///
    /// No bounds check happens here; callers clamp against the range the
    /// attribute view reports. The override is cleared by the next product
    /// selection.
    pub fn set_value(&self, key: AttrKey, value: i64) {
        self.session.ping();
        lock(&self.selection).values.insert(key, value);
    }

    /// Encode the command frame for the current selection.
    pub fn encode_command(&self) -> Result<[u8; COMMAND_LEN], DeviceError> {
        let selection = lock(&self.selection);
        let product = selection
            .product
            .map(|i| &self.machine.products[i])
            .ok_or(DeviceError::NoProductSelected)?;

        let mut data = [0u8; COMMAND_LEN];
        data[1] = product.code;

        for key in AttrKey::SELECTS.into_iter().chain(AttrKey::NUMBERS) {
            let Some(spec) = product.attribute(key) else {
                continue;
            };
            let mut value = selection
                .values
                .get(&key)
                .copied()
                .unwrap_or_else(|| spec.default_value());
            let step = spec.step();
            if step != 0 {
                value /= step;
            }
            data[spec.argument] = value as u8;
        }

        Ok(data)
    }

    /// Encode the current selection and queue it on the session.
    pub fn brew(&self) -> Result<(), DeviceError> {
        let command = self.encode_command()?;
        log::debug!("{}: brewing {:02x?}", self.name, command);
        self.session.send(command.to_vec());
        Ok(())
    }

    /// Extend the keepalive window (starting the session if needed).
    pub fn ping(&self) {
        self.session.ping();
    }

    /// Drop the keepalive window, letting the session wind down now.
    pub fn ping_cancel(&self) {
        self.session.ping_cancel();
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        lock(&self.shared.conn_info).clone()
    }

    /// Record a fresh advertisement sighting and notify connectivity
    /// observers, so the platform can show last-seen/signal data for
    /// machines it is not currently connected to.
    pub fn advertisement_seen(&self, rssi: Option<i16>) {
        {
            let mut info = lock(&self.shared.conn_info);
            info.last_seen = Some(SystemTime::now());
            info.rssi = rssi;
        }
        Observers::notify(&self.shared.observers.connectivity);
    }

    /// Register a callback fired on every connectivity change and
    /// advertisement sighting.
    pub fn on_connectivity(&self, observer: impl Fn() + Send + Sync + 'static) {
        lock(&self.shared.observers.connectivity).push(Box::new(observer));
    }

    /// Register a callback fired when the selected product changes.
    pub fn on_product_changed(&self, observer: impl Fn() + Send + Sync + 'static) {
        lock(&self.shared.observers.product).push(Box::new(observer));
    }
}
