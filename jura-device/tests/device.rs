//! Device-level tests against the bundled E8, D4 and GIGA 5 catalogs.
//!
//! Command frames and attribute views are checked against byte sequences
//! captured from the official mobile app.

use async_trait::async_trait;
use jura_ble::{Link, LinkError};
use jura_catalog::AttrKey;
use jura_device::{Attribute, Device, DeviceError};

struct NullLink;

#[async_trait]
impl Link for NullLink {
    async fn connect(&self) -> Result<(), LinkError> {
        Ok(())
    }

    async fn read_key(&self) -> Result<Vec<u8>, LinkError> {
        Ok(vec![0x2A])
    }

    async fn write_command(&self, _payload: &[u8]) -> Result<(), LinkError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        Ok(())
    }
}

fn make_device(manufacturer_data: &[u8]) -> Device {
    Device::new("Jura", NullLink, manufacturer_data).unwrap()
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

fn options(device: &Device, key: AttrKey) -> (Vec<String>, Option<String>) {
    match device.attribute(key) {
        Some(Attribute::Options { options, default }) => (options, default),
        other => panic!("{key}: expected options view, got {other:?}"),
    }
}

#[tokio::test]
async fn device_e8() {
    let device = make_device(b"*\x05\x08\x03\xfb;");
    assert_eq!(device.model(), "E8 (EB)");

    assert_eq!(
        device.select_keys(),
        [AttrKey::Product, AttrKey::CoffeeStrength, AttrKey::Temperature]
    );
    assert_eq!(
        device.number_keys(),
        [
            AttrKey::WaterAmount,
            AttrKey::MilkFoamAmount,
            AttrKey::Bypass,
            AttrKey::MilkBreak,
        ]
    );

    let (names, default) = options(&device, AttrKey::Product);
    assert_eq!(default, None);
    assert_eq!(
        names,
        [
            "Espresso",
            "Coffee",
            "Cappuccino",
            "Espresso Macchiato",
            "Latte Macchiato",
            "Milk Foam",
            "Hotwater Portion(normal)",
            "Espresso Doppio",
            "2 Espressi",
            "2 Coffee",
            "Cafe Barista",
            "Barista Lungo",
            "1 Flat White",
            "Cortado",
        ]
    );

    device.select_product("Cafe Barista").unwrap();
    assert_eq!(
        hex(&device.encode_command().unwrap()),
        "002800061200000100000900000000000000"
    );

    let (names, default) = options(&device, AttrKey::CoffeeStrength);
    assert_eq!(names, ["1", "2", "3", "4", "5", "6", "7", "8", "9", "10"]);
    assert_eq!(default.as_deref(), Some("6"));

    device.select_option(AttrKey::CoffeeStrength, "10").unwrap();

    assert_eq!(
        device.attribute(AttrKey::WaterAmount),
        Some(Attribute::Range { min: 25, max: 240, step: 5, value: 90 })
    );

    device.set_value(AttrKey::WaterAmount, 50);
    assert_eq!(
        device.attribute(AttrKey::WaterAmount),
        Some(Attribute::Range { min: 25, max: 240, step: 5, value: 50 })
    );
    assert_eq!(
        hex(&device.encode_command().unwrap()),
        "0028000a0a00000100000900000000000000"
    );

    // selecting another product discards the overrides above
    device.select_product("Cappuccino").unwrap();
    assert_eq!(
        hex(&device.encode_command().unwrap()),
        "000400080c000e0100000000000000000000"
    );
    let (_, selected) = options(&device, AttrKey::Product);
    assert_eq!(selected.as_deref(), Some("Cappuccino"));
}

#[tokio::test]
async fn device_d4() {
    let device = make_device(b"*\x05\x08\x03u;");
    assert_eq!(device.model(), "D4");

    assert_eq!(
        device.select_keys(),
        [AttrKey::Product, AttrKey::CoffeeStrength, AttrKey::Temperature]
    );
    assert_eq!(device.number_keys(), [AttrKey::WaterAmount, AttrKey::Bypass]);

    let (names, default) = options(&device, AttrKey::Product);
    assert_eq!(default, None);
    assert_eq!(
        names,
        [
            "Espresso",
            "Coffee",
            "2 Espressi",
            "2 Coffee",
            "Ristretto (only JOE)",
            "Cafe Barista (only JOE)",
            "Barista Lungo (only JOE)",
            "Espresso Doppio (only JOE)",
            "2 Ristretti (only JOE)",
        ]
    );
}

#[tokio::test]
async fn device_giga5() {
    let device = make_device(b"*\x05\x08\x03=5");
    assert_eq!(device.model(), "GIGA 5");

    assert_eq!(
        device.select_keys(),
        [
            AttrKey::Product,
            AttrKey::GrinderRatio,
            AttrKey::CoffeeStrength,
            AttrKey::Temperature,
        ]
    );
    assert_eq!(
        device.number_keys(),
        [AttrKey::WaterAmount, AttrKey::MilkAmount, AttrKey::MilkFoamAmount]
    );

    let (names, _) = options(&device, AttrKey::Product);
    assert_eq!(names.len(), 20);
    assert_eq!(names[0], "Ristretto");
    assert_eq!(names[19], "2 Portion Milk");

    device.select_product("Coffee").unwrap();
    assert_eq!(
        hex(&device.encode_command().unwrap()),
        "000302031400000100000000000000000000"
    );

    let (names, default) = options(&device, AttrKey::CoffeeStrength);
    assert_eq!(names, ["XMild", "Mild", "Normal", "Strong", "XStrong"]);
    assert_eq!(default.as_deref(), Some("Normal"));

    let (names, default) = options(&device, AttrKey::GrinderRatio);
    assert_eq!(names, ["100_0", "75_25", "50_50", "25_75", "0_100"]);
    assert_eq!(default.as_deref(), Some("50_50"));

    assert_eq!(
        device.attribute(AttrKey::WaterAmount),
        Some(Attribute::Range { min: 25, max: 240, step: 5, value: 100 })
    );

    let (names, default) = options(&device, AttrKey::Temperature);
    assert_eq!(names, ["Low", "Normal", "High"]);
    assert_eq!(default.as_deref(), Some("Normal"));
}

#[tokio::test]
async fn catalog_options_before_selection() {
    let device = make_device(b"*\x05\x08\x03\xfb;");

    // no product selected yet: select keys expose the catalog-wide list
    let (names, default) = options(&device, AttrKey::CoffeeStrength);
    assert_eq!(names, ["1", "2", "3", "4", "5", "6", "7", "8", "9", "10"]);
    assert_eq!(default, None);

    // number keys have no catalog-level fallback
    assert_eq!(device.attribute(AttrKey::WaterAmount), None);
}

#[tokio::test]
async fn encode_requires_selection() {
    let device = make_device(b"*\x05\x08\x03\xfb;");
    assert!(matches!(
        device.encode_command(),
        Err(DeviceError::NoProductSelected)
    ));
    assert!(matches!(device.brew(), Err(DeviceError::NoProductSelected)));
}

#[tokio::test]
async fn selection_errors() {
    let device = make_device(b"*\x05\x08\x03\xfb;");

    assert!(matches!(
        device.select_product("Tea"),
        Err(DeviceError::UnknownProduct(_))
    ));

    device.select_product("Cafe Barista").unwrap();
    assert!(matches!(
        device.select_option(AttrKey::CoffeeStrength, "11"),
        Err(DeviceError::UnknownOption(AttrKey::CoffeeStrength, _))
    ));
    assert!(matches!(
        device.select_option(AttrKey::GrinderRatio, "50_50"),
        Err(DeviceError::UnknownAttribute(AttrKey::GrinderRatio))
    ));
}

#[tokio::test]
async fn unknown_model_fails_device_creation() {
    assert!(matches!(
        Device::new("Jura", NullLink, b"*\x05\x08\x03\x00\x00"),
        Err(DeviceError::Catalog(_))
    ));
    assert!(matches!(
        Device::new("Jura", NullLink, b"*\x05"),
        Err(DeviceError::BadAdvertisement)
    ));
}

#[tokio::test]
async fn observers_fire_synchronously() {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    let device = make_device(b"*\x05\x08\x03\xfb;");

    let products = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&products);
    device.on_product_changed(move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let sightings = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&sightings);
    device.on_connectivity(move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    device.select_product("Espresso").unwrap();
    assert_eq!(products.load(Ordering::SeqCst), 1);

    device.advertisement_seen(Some(-60));
    assert_eq!(sightings.load(Ordering::SeqCst), 1);
    let info = device.connection_info();
    assert_eq!(info.rssi, Some(-60));
    assert!(info.last_seen.is_some());
}
