// ABOUTME: Sectioned host inventory: role sections of hostname + attribute lines.
// ABOUTME: The orchestrator consumes (hostname, attribute-map) pairs only.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{Error, Result};

/// Default inventory location, relative to the working directory.
pub const INVENTORY_FILE: &str = "inventory/hosts";

/// Section holding hosts that get an agent-only install.
pub const AGENTS_SECTION: &str = "agents";

/// Section holding hosts that get a full or compile-master install.
pub const MASTERS_SECTION: &str = "puppetmasters";

/// One parsed inventory line: a hostname and its free-form attributes.
#[derive(Debug, Clone, Default)]
pub struct InventoryEntry {
    pub hostname: String,
    pub attributes: HashMap<String, String>,
}

impl InventoryEntry {
    pub fn bare(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            attributes: HashMap::new(),
        }
    }

    /// An attribute value, treating the empty string as unset.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// True when an attribute is literally "true".
    pub fn flag(&self, key: &str) -> bool {
        self.attr(key) == Some("true")
    }

    /// Whether this host asked for CSR attributes: either explicitly or by
    /// carrying any pp_* extension attribute.
    pub fn wants_csr_attributes(&self) -> bool {
        self.flag("csr_attributes") || self.attributes.keys().any(|k| k.starts_with("pp_"))
    }

    /// The pp_* extension attributes, for the CSR attributes payload.
    pub fn extension_attributes(&self) -> BTreeMap<String, String> {
        self.attributes
            .iter()
            .filter(|(k, _)| k.starts_with("pp_"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// The whole inventory: role sections in stable order.
#[derive(Debug, Default)]
pub struct Inventory {
    sections: BTreeMap<String, Vec<InventoryEntry>>,
}

impl Inventory {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::InventoryNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut sections: BTreeMap<String, Vec<InventoryEntry>> = BTreeMap::new();
        let mut current: Option<String> = None;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                let name = name.trim().to_string();
                sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }

            let Some(section) = &current else {
                return Err(Error::InvalidInventory(format!(
                    "line {}: host line before any [section] header",
                    lineno + 1
                )));
            };

            let mut tokens = line.split_whitespace();
            let hostname = tokens.next().map(str::to_string).unwrap_or_default();
            let mut attributes = HashMap::new();
            for token in tokens {
                match token.split_once('=') {
                    Some((key, value)) => {
                        attributes.insert(key.to_string(), value.to_string());
                    }
                    None => {
                        tracing::warn!(
                            "inventory line {}: ignoring token without '=': {}",
                            lineno + 1,
                            token
                        );
                    }
                }
            }

            sections
                .get_mut(section)
                .expect("current section was inserted above")
                .push(InventoryEntry {
                    hostname,
                    attributes,
                });
        }

        Ok(Self { sections })
    }

    /// Synthetic inventory for --local runs: the controlling host as the
    /// single puppetmaster.
    pub fn local() -> Self {
        let mut sections = BTreeMap::new();
        sections.insert(
            MASTERS_SECTION.to_string(),
            vec![InventoryEntry::bare("localhost")],
        );
        Self { sections }
    }

    pub fn section(&self, name: &str) -> &[InventoryEntry] {
        self.sections.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, &[InventoryEntry])> {
        self.sections.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}
