// 🏛️ Vocabulary - Named properties and items of the knowledge base
//
// Built once at startup (defaults, optionally overridden from config),
// then passed by reference into every component. Nothing mutates it
// after construction.

use crate::statement::{EntityId, PropertyId};
use serde::{Deserialize, Serialize};

/// Fixed units an area quantity may arrive in, and their factor to hectares
const SQUARE_KILOMETRE_IN_HECTARES: f64 = 100.0;
const SQUARE_METRE_IN_HECTARES: f64 = 0.0001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    // ========================================================================
    // PROPERTIES
    // ========================================================================
    pub instance_of: PropertyId,
    /// The registry's own identifier property (unique per record)
    pub registry_id: PropertyId,
    pub inception: PropertyId,
    pub iucn_category: PropertyId,
    pub country: PropertyId,
    pub located_in: PropertyId,
    pub coordinate_location: PropertyId,
    pub geoshape: PropertyId,
    pub operator: PropertyId,
    pub area: PropertyId,
    pub applies_to_part: PropertyId,

    // Reference properties
    pub reference_url: PropertyId,
    pub retrieved: PropertyId,
    pub publication_date: PropertyId,
    pub stated_in: PropertyId,

    // ========================================================================
    // ITEMS
    // ========================================================================
    pub country_item: EntityId,
    pub hectare: EntityId,
    pub square_kilometre: EntityId,
    pub square_metre: EntityId,
    pub land: EntityId,
    pub forest: EntityId,
    pub body_of_water: EntityId,
    pub earth: EntityId,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Vocabulary::wikidata()
    }
}

impl Vocabulary {
    /// Identifiers as published on Wikidata
    pub fn wikidata() -> Self {
        Vocabulary {
            instance_of: PropertyId::new("P31"),
            registry_id: PropertyId::new("P3613"),
            inception: PropertyId::new("P571"),
            iucn_category: PropertyId::new("P814"),
            country: PropertyId::new("P17"),
            located_in: PropertyId::new("P131"),
            coordinate_location: PropertyId::new("P625"),
            geoshape: PropertyId::new("P3896"),
            operator: PropertyId::new("P137"),
            area: PropertyId::new("P2046"),
            applies_to_part: PropertyId::new("P518"),

            reference_url: PropertyId::new("P854"),
            retrieved: PropertyId::new("P813"),
            publication_date: PropertyId::new("P577"),
            stated_in: PropertyId::new("P248"),

            country_item: EntityId::new("Q34"),
            hectare: EntityId::new("Q35852"),
            square_kilometre: EntityId::new("Q712226"),
            square_metre: EntityId::new("Q25343"),
            land: EntityId::new("Q11081619"),
            forest: EntityId::new("Q4421"),
            body_of_water: EntityId::new("Q15324"),
            earth: EntityId::new("Q2"),
        }
    }

    /// Convert an area quantity to hectares. Unknown units yield None.
    pub fn to_hectares(&self, amount: f64, unit: Option<&EntityId>) -> Option<f64> {
        match unit {
            Some(u) if u == &self.hectare => Some(amount),
            Some(u) if u == &self.square_kilometre => Some(amount * SQUARE_KILOMETRE_IN_HECTARES),
            Some(u) if u == &self.square_metre => Some(amount * SQUARE_METRE_IN_HECTARES),
            _ => None,
        }
    }

    /// (name, id) pairs for startup logging
    pub fn properties(&self) -> Vec<(&'static str, &PropertyId)> {
        vec![
            ("instance of", &self.instance_of),
            ("registry id", &self.registry_id),
            ("inception", &self.inception),
            ("IUCN protected areas category", &self.iucn_category),
            ("country", &self.country),
            ("located in the administrative territorial entity", &self.located_in),
            ("coordinate location", &self.coordinate_location),
            ("geoshape", &self.geoshape),
            ("operator", &self.operator),
            ("area", &self.area),
            ("applies to part", &self.applies_to_part),
            ("reference URL", &self.reference_url),
            ("retrieved", &self.retrieved),
            ("publication date", &self.publication_date),
            ("stated in", &self.stated_in),
        ]
    }
}
