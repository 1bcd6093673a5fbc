//! Bundled Jura machine catalog.
//!
//! Every Jura model advertises a numeric code; the bundled `resources.zip`
//! maps that code to a model name and an XML document describing the
//! products the machine can brew and the attributes each product exposes.
//! The catalog is read-only: [`machine`] parses the archive on every call
//! and the returned [`Machine`] is immutable, so it can be shared freely
//! between devices of the same model.

use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read};

const RESOURCES: &[u8] = include_bytes!("../resources.zip");
const INDEX_FILE: &str = "JOE_MACHINES.TXT";

/// Fixed size of the command frame attribute offsets point into.
const COMMAND_LEN: usize = 18;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown machine model code {0}")]
    UnknownModel(u16),
    #[error("malformed catalog: {0}")]
    Malformed(String),
}

fn malformed(err: impl fmt::Display) -> CatalogError {
    CatalogError::Malformed(err.to_string())
}

/// The fixed set of tunable attribute keys across all Jura models.
///
/// The two groups mirror how the machine app presents them: `SELECTS` are
/// option pickers, `NUMBERS` are numeric amounts. Their order is the order
/// attribute bytes are resolved in when a command frame is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrKey {
    Product,
    GrinderRatio,
    CoffeeStrength,
    Temperature,
    WaterAmount,
    MilkAmount,
    MilkFoamAmount,
    Bypass,
    MilkBreak,
}

impl AttrKey {
    pub const SELECTS: [AttrKey; 4] = [
        AttrKey::Product,
        AttrKey::GrinderRatio,
        AttrKey::CoffeeStrength,
        AttrKey::Temperature,
    ];

    pub const NUMBERS: [AttrKey; 5] = [
        AttrKey::WaterAmount,
        AttrKey::MilkAmount,
        AttrKey::MilkFoamAmount,
        AttrKey::Bypass,
        AttrKey::MilkBreak,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AttrKey::Product => "product",
            AttrKey::GrinderRatio => "grinder_ratio",
            AttrKey::CoffeeStrength => "coffee_strength",
            AttrKey::Temperature => "temperature",
            AttrKey::WaterAmount => "water_amount",
            AttrKey::MilkAmount => "milk_amount",
            AttrKey::MilkFoamAmount => "milk_foam_amount",
            AttrKey::Bypass => "bypass",
            AttrKey::MilkBreak => "milk_break",
        }
    }

    /// XML element name in the product documents.
    fn element(self) -> &'static str {
        match self {
            AttrKey::Product => "PRODUCT",
            AttrKey::GrinderRatio => "GRINDER_RATIO",
            AttrKey::CoffeeStrength => "COFFEE_STRENGTH",
            AttrKey::Temperature => "TEMPERATURE",
            AttrKey::WaterAmount => "WATER_AMOUNT",
            AttrKey::MilkAmount => "MILK_AMOUNT",
            AttrKey::MilkFoamAmount => "MILK_FOAM_AMOUNT",
            AttrKey::Bypass => "BYPASS",
            AttrKey::MilkBreak => "MILK_BREAK",
        }
    }

    pub fn parse(s: &str) -> Option<AttrKey> {
        AttrKey::SELECTS
            .into_iter()
            .chain(AttrKey::NUMBERS)
            .find(|k| k.as_str() == s)
    }
}

impl fmt::Display for AttrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of an enumerated attribute.
#[derive(Debug, Clone)]
pub struct Item {
    pub name: String,
    /// Raw byte written into the command frame when this item is chosen.
    pub value: u8,
}

#[derive(Debug, Clone)]
pub enum SpecKind {
    /// Numeric range with a declared default. `step` scales the value down
    /// before it is written into the command frame.
    Range { min: i64, max: i64, step: i64, value: i64 },
    /// Ordered option list; `default` is the raw value of the default item.
    Items { items: Vec<Item>, default: u8 },
}

/// A single tunable attribute of a product.
#[derive(Debug, Clone)]
pub struct AttributeSpec {
    /// Byte offset into the 18-byte command frame.
    pub argument: usize,
    pub kind: SpecKind,
}

impl AttributeSpec {
    pub fn step(&self) -> i64 {
        match self.kind {
            SpecKind::Range { step, .. } => step,
            SpecKind::Items { .. } => 0,
        }
    }

    /// Value encoded when the user has not overridden the attribute.
    pub fn default_value(&self) -> i64 {
        match &self.kind {
            SpecKind::Range { value, .. } => *value,
            SpecKind::Items { default, .. } => i64::from(*default),
        }
    }

    pub fn item_named(&self, name: &str) -> Option<&Item> {
        match &self.kind {
            SpecKind::Items { items, .. } => items.iter().find(|i| i.name == name),
            SpecKind::Range { .. } => None,
        }
    }
}

/// One brewable product of a machine.
#[derive(Debug, Clone)]
pub struct Product {
    pub name: String,
    /// Command byte identifying the product, written at frame offset 1.
    pub code: u8,
    pub active: bool,
    attributes: HashMap<AttrKey, AttributeSpec>,
}

impl Product {
    pub fn attribute(&self, key: AttrKey) -> Option<&AttributeSpec> {
        self.attributes.get(&key)
    }
}

/// Immutable per-model catalog: the products a machine offers and which
/// attribute keys apply to it.
#[derive(Debug, Clone)]
pub struct Machine {
    pub model: String,
    pub products: Vec<Product>,
    /// Lowercased product document, kept for the applicability heuristic.
    serialized: String,
    /// Per select key: option names seen across all products, in document
    /// order with duplicates dropped. Used to pre-populate pickers before a
    /// product is chosen.
    options: HashMap<AttrKey, Vec<String>>,
}

impl Machine {
    /// Select-style keys applicable to this model.
    ///
    /// An attribute applies when its name occurs anywhere in the lowercased
    /// product document. This is a substring check, not a structural one;
    /// it matches what the machine app does and keeps the key-to-control
    /// mapping identical across implementations.
    pub fn select_keys(&self) -> Vec<AttrKey> {
        AttrKey::SELECTS
            .into_iter()
            .filter(|k| self.serialized.contains(k.as_str()))
            .collect()
    }

    /// Number-style keys applicable to this model.
    pub fn number_keys(&self) -> Vec<AttrKey> {
        AttrKey::NUMBERS
            .into_iter()
            .filter(|k| self.serialized.contains(k.as_str()))
            .collect()
    }

    /// Catalog-wide option names for a select key, present for every select
    /// key even when no product carries it (the list is then empty).
    pub fn catalog_options(&self, key: AttrKey) -> Option<&[String]> {
        self.options.get(&key).map(Vec::as_slice)
    }

    pub fn product(&self, name: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.name == name)
    }
}

/// Look up a model code in the bundled archive and parse its product
/// document.
pub fn machine(code: u16) -> Result<Machine, CatalogError> {
    let mut zip = zip::ZipArchive::new(Cursor::new(RESOURCES)).map_err(malformed)?;

    let mut index = String::new();
    zip.by_name(INDEX_FILE)
        .map_err(malformed)?
        .read_to_string(&mut index)
        .map_err(malformed)?;

    // the index matches on the textual prefix of the code
    let needle = code.to_string();
    let line = index
        .lines()
        .find(|line| line.starts_with(&needle))
        .ok_or(CatalogError::UnknownModel(code))?;

    let fields: Vec<&str> = line.split(';').collect();
    if fields.len() < 3 {
        return Err(CatalogError::Malformed(format!("bad index line {line:?}")));
    }
    let model = fields[1].to_string();

    let dir = format!("documents/xml/{}/", fields[2]);
    let document = zip
        .file_names()
        .find(|name| name.starts_with(&dir) && name.ends_with(".xml"))
        .ok_or_else(|| CatalogError::Malformed(format!("no product document under {dir}")))?
        .to_string();

    let mut xml = String::new();
    zip.by_name(&document)
        .map_err(malformed)?
        .read_to_string(&mut xml)
        .map_err(malformed)?;

    parse_machine(model, &xml)
}

fn parse_machine(model: String, xml: &str) -> Result<Machine, CatalogError> {
    let doc = roxmltree::Document::parse(xml).map_err(malformed)?;
    let products_el = doc
        .root_element()
        .children()
        .find(|n| n.has_tag_name("PRODUCTS"))
        .ok_or_else(|| CatalogError::Malformed("missing PRODUCTS element".into()))?;

    let mut products = Vec::new();
    for node in products_el.children().filter(|n| n.has_tag_name("PRODUCT")) {
        products.push(parse_product(node)?);
    }

    let mut options = HashMap::new();
    for key in AttrKey::SELECTS {
        let mut names: Vec<String> = Vec::new();
        for product in &products {
            if let Some(AttributeSpec { kind: SpecKind::Items { items, .. }, .. }) =
                product.attribute(key)
            {
                for item in items {
                    if !names.contains(&item.name) {
                        names.push(item.name.clone());
                    }
                }
            }
        }
        options.insert(key, names);
    }

    Ok(Machine {
        model,
        products,
        serialized: xml.to_lowercase(),
        options,
    })
}

fn parse_product(node: roxmltree::Node) -> Result<Product, CatalogError> {
    let name = require_attr(node, "Name")?.to_string();
    let code = u8::from_str_radix(require_attr(node, "Code")?, 16)
        .map_err(|e| CatalogError::Malformed(format!("product {name:?}: bad code: {e}")))?;
    let active = node.attribute("Active") != Some("false");

    let mut attributes = HashMap::new();
    for key in AttrKey::SELECTS.into_iter().chain(AttrKey::NUMBERS) {
        if key == AttrKey::Product {
            continue;
        }
        if let Some(el) = node.children().find(|n| n.has_tag_name(key.element())) {
            let spec = parse_spec(el)
                .map_err(|e| CatalogError::Malformed(format!("product {name:?}, {key}: {e}")))?;
            attributes.insert(key, spec);
        }
    }

    Ok(Product { name, code, active, attributes })
}

fn parse_spec(node: roxmltree::Node) -> Result<AttributeSpec, String> {
    let argument = node.attribute("Argument").ok_or("missing Argument")?;
    let argument: usize = argument
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .map_err(|_| format!("bad Argument {argument:?}"))?;
    if argument >= COMMAND_LEN {
        return Err(format!("Argument offset {argument} outside command frame"));
    }

    let kind = if node.attribute("Value").is_some() {
        SpecKind::Range {
            min: int_attr(node, "Min")?,
            max: int_attr(node, "Max")?,
            step: int_attr(node, "Step")?,
            value: int_attr(node, "Value")?,
        }
    } else {
        let default = hex_attr(node, "Default")?;
        let mut items = Vec::new();
        for item in node.children().filter(|n| n.has_tag_name("ITEM")) {
            items.push(Item {
                name: item.attribute("Name").ok_or("ITEM missing Name")?.to_string(),
                value: hex_attr(item, "Value")?,
            });
        }
        if items.is_empty() {
            return Err("enumerated attribute with no ITEM entries".into());
        }
        SpecKind::Items { items, default }
    };

    Ok(AttributeSpec { argument, kind })
}

fn require_attr<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Result<&'a str, CatalogError> {
    node.attribute(name)
        .ok_or_else(|| CatalogError::Malformed(format!("missing {name} attribute")))
}

fn int_attr(node: roxmltree::Node, name: &str) -> Result<i64, String> {
    node.attribute(name)
        .ok_or_else(|| format!("missing {name}"))?
        .parse()
        .map_err(|e| format!("bad {name}: {e}"))
}

fn hex_attr(node: roxmltree::Node, name: &str) -> Result<u8, String> {
    let raw = node.attribute(name).ok_or_else(|| format!("missing {name}"))?;
    u8::from_str_radix(raw, 16).map_err(|e| format!("bad {name}: {e}"))
}
