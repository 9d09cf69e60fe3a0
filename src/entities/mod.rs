// Lookup tables - the only state shared across records
//
// Each table is populated once before the first record and never written
// again:
// - IUCN categories: fixed in-process constant
// - Operators: external listing + unique-label resolution at startup
// - Municipalities: external listing

pub mod category;
pub mod registry;

pub use category::{CategoryResolution, IucnCategory};
pub use registry::{NameRegistry, NameRegistryBuilder};

use crate::statement::EntityId;

#[derive(Debug, Clone)]
pub struct LookupTables {
    pub operators: NameRegistry,
    pub municipalities: NameRegistry,
}

impl LookupTables {
    pub fn new(operators: NameRegistry, municipalities: NameRegistry) -> Self {
        LookupTables {
            operators,
            municipalities,
        }
    }

    pub fn empty() -> Self {
        LookupTables::new(NameRegistry::empty("operator"), NameRegistry::empty("municipality"))
    }

    /// Operators are often municipalities; those are looked up second
    pub fn operator(&self, name: &str) -> Option<&EntityId> {
        self.operators.get(name).or_else(|| self.municipalities.get(name))
    }

    pub fn municipality(&self, name: &str) -> Option<&EntityId> {
        self.municipalities.get(name)
    }

    pub fn category(&self, raw: Option<&str>) -> CategoryResolution {
        category::resolve(raw)
    }
}
