//! btleplug-backed transport and discovery helpers.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use uuid::Uuid;

use crate::session::{Link, LinkError};

/// A scanned peripheral that carries Jura manufacturer data.
#[derive(Debug, Clone)]
pub struct DiscoveredMachine {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    /// Model code decoded from the advertisement, used for catalog lookup.
    pub model_code: Option<u16>,
    /// Raw manufacturer-specific data (id 171).
    pub manufacturer_data: Vec<u8>,
}

/// [`Link`] over a btleplug peripheral.
pub struct BleLink {
    peripheral: Peripheral,
}

impl BleLink {
    pub fn new(peripheral: Peripheral) -> Self {
        Self { peripheral }
    }

    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, LinkError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(LinkError::CharacteristicMissing(uuid))
    }
}

#[async_trait]
impl Link for BleLink {
    async fn connect(&self) -> Result<(), LinkError> {
        self.peripheral.connect().await?;
        self.peripheral.discover_services().await?;
        Ok(())
    }

    async fn read_key(&self) -> Result<Vec<u8>, LinkError> {
        let characteristic = self.characteristic(jura_proto::KEY_UUID)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn write_command(&self, payload: &[u8]) -> Result<(), LinkError> {
        let characteristic = self.characteristic(jura_proto::COMMAND_UUID)?;
        self.peripheral
            .write(&characteristic, payload, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

/// Get the default Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter, LinkError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters
        .into_iter()
        .next()
        .ok_or(LinkError::Unavailable("no bluetooth adapter found"))
}

/// Scan for peripherals advertising Jura manufacturer data.
pub async fn scan(duration_secs: u64) -> Result<Vec<DiscoveredMachine>, LinkError> {
    let adapter = get_adapter().await?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(duration_secs)).await;

    let mut machines = Vec::new();
    for peripheral in adapter.peripherals().await? {
        if let Some(props) = peripheral.properties().await? {
            let Some(data) = props.manufacturer_data.get(&jura_proto::MANUFACTURER_ID) else {
                continue;
            };
            machines.push(DiscoveredMachine {
                name: props.local_name.unwrap_or_else(|| "Unknown".to_string()),
                address: peripheral.address().to_string(),
                rssi: props.rssi,
                model_code: jura_proto::model_code(data),
                manufacturer_data: data.clone(),
            });
        }
    }

    adapter.stop_scan().await?;
    Ok(machines)
}

/// Find a Jura machine by name/address pattern, or the first machine seen.
///
/// Returns the peripheral together with its manufacturer data, which the
/// device layer needs for the catalog lookup.
pub async fn find_machine(target: Option<&str>) -> Result<(Peripheral, Vec<u8>), LinkError> {
    let adapter = get_adapter().await?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(5)).await;

    for peripheral in adapter.peripherals().await? {
        if let Some(props) = peripheral.properties().await? {
            let Some(data) = props.manufacturer_data.get(&jura_proto::MANUFACTURER_ID) else {
                continue;
            };
            let name = props.local_name.unwrap_or_default();
            let address = peripheral.address().to_string();

            let matches = match target {
                Some(t) => name.contains(t) || address.contains(t),
                None => true,
            };
            if matches {
                let data = data.clone();
                adapter.stop_scan().await?;
                return Ok((peripheral, data));
            }
        }
    }

    adapter.stop_scan().await?;
    Err(LinkError::Unavailable("no jura machine found"))
}
