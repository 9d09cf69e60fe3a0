// 🏷️ IUCN Category - Fixed table of protected area categories
//
// Seven entries: six real categories plus "0", the registry's marker for
// areas that cannot be classified. That marker is NOT the same thing as a
// record without a category:
// - no IUCNKAT at all        → Absent, the property is left alone
// - IUCNKAT = "0"            → NotApplicable, asserted as "no value"
// - IUCNKAT = "Q"            → Unrecognized, anomaly, left alone

use crate::statement::EntityId;
use serde::{Deserialize, Serialize};

// ============================================================================
// CATEGORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IucnCategory {
    /// Strict Nature Reserve
    Ia,
    /// Wilderness Area
    Ib,
    /// National Park
    II,
    /// Natural Monument or Feature
    III,
    /// Habitat/Species Management Area
    IV,
    /// Protected Landscape/Seascape
    V,
}

impl IucnCategory {
    pub const ALL: [IucnCategory; 6] = [
        IucnCategory::Ia,
        IucnCategory::Ib,
        IucnCategory::II,
        IucnCategory::III,
        IucnCategory::IV,
        IucnCategory::V,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            IucnCategory::Ia => "IA",
            IucnCategory::Ib => "IB",
            IucnCategory::II => "II",
            IucnCategory::III => "III",
            IucnCategory::IV => "IV",
            IucnCategory::V => "V",
        }
    }

    /// Knowledge base item for this category
    pub fn entity(&self) -> EntityId {
        EntityId::new(match self {
            IucnCategory::Ia => "Q14545608",
            IucnCategory::Ib => "Q14545620",
            IucnCategory::II => "Q14545628",
            IucnCategory::III => "Q14545633",
            IucnCategory::IV => "Q14545639",
            IucnCategory::V => "Q14545646",
        })
    }
}

/// Code reserved for "cannot be classified"
pub const NOT_APPLICABLE_CODE: &str = "0";

// ============================================================================
// RESOLUTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryResolution {
    /// The record carries no category code
    Absent,

    /// Explicitly not classifiable
    NotApplicable,

    Category(IucnCategory),

    /// A code outside the table (normalized form)
    Unrecognized(String),
}

/// Normalize a raw feed value: text before the first comma, trimmed,
/// upper-cased. `"Ia, Strikt naturreservat"` → `"IA"`.
pub fn normalize_code(raw: &str) -> String {
    raw.split(',').next().unwrap_or("").trim().to_uppercase()
}

/// Resolve an optional raw code against the fixed table
pub fn resolve(raw: Option<&str>) -> CategoryResolution {
    let Some(raw) = raw else {
        return CategoryResolution::Absent;
    };

    let code = normalize_code(raw);
    if code == NOT_APPLICABLE_CODE {
        return CategoryResolution::NotApplicable;
    }

    IucnCategory::ALL
        .iter()
        .find(|c| c.code() == code)
        .map(|c| CategoryResolution::Category(*c))
        .unwrap_or(CategoryResolution::Unrecognized(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_has_seven_entries() {
        // six categories + the not-applicable marker
        assert_eq!(IucnCategory::ALL.len() + 1, 7);
        let mut entities: Vec<EntityId> = IucnCategory::ALL.iter().map(|c| c.entity()).collect();
        entities.dedup();
        assert_eq!(entities.len(), 6);
    }

    #[test]
    fn test_resolution_variants() {
        assert_eq!(resolve(None), CategoryResolution::Absent);
        assert_eq!(resolve(Some("0, Områden som ej kan klassificeras")), CategoryResolution::NotApplicable);
        assert_eq!(resolve(Some(" ia, Strikt naturreservat")), CategoryResolution::Category(IucnCategory::Ia));
        assert_eq!(resolve(Some("V")), CategoryResolution::Category(IucnCategory::V));
        assert_eq!(resolve(Some("VI")), CategoryResolution::Unrecognized("VI".to_string()));
    }
}
