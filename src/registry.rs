use crate::boxes::FourCC;
use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::value::BoxValue;
use std::collections::HashMap;
use std::sync::Arc;

/// One registered box type: its schema and the versions it understands.
#[derive(Debug, Clone)]
pub struct Registration {
    pub schema: Arc<Schema>,
    /// Empty means every version is accepted.
    pub versions: Vec<u8>,
}

/// Maps box types to the schema that lays out their payload.
///
/// The registry is immutable once built; use [`Registry::builder`] to add
/// types fluently.
#[derive(Debug, Default)]
pub struct Registry {
    map: HashMap<FourCC, Registration>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn lookup(&self, box_type: FourCC) -> Option<&Registration> {
        self.map.get(&box_type)
    }

    /// A new, empty value for `box_type`, or `None` if the type is not registered.
    pub fn new_box(&self, box_type: FourCC) -> Option<BoxValue> {
        self.lookup(box_type)
            .map(|reg| BoxValue::new(box_type, reg.schema.clone()))
    }

    pub fn is_supported_type(&self, box_type: FourCC) -> bool {
        self.map.contains_key(&box_type)
    }

    /// True when `version` is declared for `box_type`, the type declares no
    /// versions, or the type is not registered at all.
    pub fn is_supported_version(&self, box_type: FourCC, version: u8) -> bool {
        match self.map.get(&box_type) {
            Some(reg) => reg.versions.is_empty() || reg.versions.contains(&version),
            None => true,
        }
    }

    pub fn supported_versions(&self, box_type: FourCC) -> Option<&[u8]> {
        self.map.get(&box_type).map(|reg| reg.versions.as_slice())
    }

    pub fn types(&self) -> impl Iterator<Item = FourCC> + '_ {
        self.map.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    map: HashMap<FourCC, Registration>,
}

impl RegistryBuilder {
    /// Adds `box_type`. Registering the same type twice is a schema error.
    pub fn register(mut self, box_type: FourCC, schema: Schema, versions: &[u8]) -> Result<Self> {
        if self.map.contains_key(&box_type) {
            return Err(Error::Schema(format!("box type '{box_type}' registered twice")));
        }
        self.map.insert(
            box_type,
            Registration {
                schema: Arc::new(schema),
                versions: versions.to_vec(),
            },
        );
        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry { map: self.map }
    }
}
