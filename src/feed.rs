// 📥 Feed - GeoJSON features from the protected area registry
//
// One FeatureCollection per file, one SourceRecord per feature.
// Records are built lazily so that a broken feature only costs itself.

use crate::error::RecordError;
use crate::geometry::Geometry;
use crate::statement::EntityId;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::fs;
use std::path::Path;

// ============================================================================
// FEED PROPERTY KEYS
// ============================================================================

pub const KEY_ID: &str = "NVRID";
pub const KEY_NAME: &str = "NAMN";
pub const KEY_CATEGORY: &str = "IUCNKAT";
pub const KEY_OPERATOR: &str = "FORVALTARE";
pub const KEY_MUNICIPALITY: &str = "KOMMUN";

/// Inception candidates, highest priority first
pub const INCEPTION_KEYS: [&str; 3] = ["IKRAFTDAT", "URSGALLDAT", "URSBESLDAT"];

/// Date format used by every date property in the feed
pub const FEED_DATE_FORMAT: &str = "%Y/%m/%d";

// ============================================================================
// OBJECT TYPE
// ============================================================================

/// What kind of protected area a feed describes (nature reserve, national
/// park, ...) and where its provenance points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectType {
    /// Item the records are an instance of
    pub entity: EntityId,

    /// Human-readable name, for logs
    pub label: String,

    /// Metadata page describing the dataset, cited in shape documents
    pub source_url: String,

    /// Per-record reference URL; `{id}` is replaced by the record id
    pub reference_url_template: String,

    /// Item cited as "stated in"
    pub stated_in: EntityId,

    /// Shape document article name; `{id}` and `{name}` are substituted
    pub article_template: String,
}

impl ObjectType {
    pub fn reference_url(&self, record_id: &str) -> String {
        self.reference_url_template.replace("{id}", record_id)
    }
}

// ============================================================================
// AREA PARTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaPart {
    Total,
    Land,
    Forest,
    Water,
}

impl AreaPart {
    pub const ALL: [AreaPart; 4] = [AreaPart::Total, AreaPart::Land, AreaPart::Forest, AreaPart::Water];

    pub fn feed_key(&self) -> &'static str {
        match self {
            AreaPart::Total => "AREA_HA",
            AreaPart::Land => "LAND_HA",
            AreaPart::Forest => "SKOG_HA",
            AreaPart::Water => "VATTEN_HA",
        }
    }
}

// ============================================================================
// SOURCE RECORD
// ============================================================================

/// Immutable view of one feature for one run
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub id: String,
    pub name: Option<String>,
    /// None when the feature carries a null or malformed geometry
    pub geometry: Option<Geometry>,
    /// Why a present geometry could not be parsed; only the geometry fails
    pub geometry_error: Option<RecordError>,
    /// Non-null feature properties
    pub properties: Map<String, Json>,
    pub published: NaiveDate,
    pub retrieved: NaiveDate,
    /// The feature exactly as read, null properties removed
    pub feature: Json,
}

impl SourceRecord {
    /// Build a record from a GeoJSON feature.
    ///
    /// Null-valued properties are dropped first. A missing id is fatal for
    /// this record. A malformed geometry is kept as `geometry_error` so the
    /// other properties can still be reconciled.
    pub fn from_feature(
        mut feature: Json,
        published: NaiveDate,
        retrieved: NaiveDate,
    ) -> Result<SourceRecord, RecordError> {
        if let Some(props) = feature.get_mut("properties").and_then(Json::as_object_mut) {
            props.retain(|_, v| !v.is_null());
        }

        let properties = feature
            .get("properties")
            .and_then(Json::as_object)
            .cloned()
            .unwrap_or_default();

        let id = scalar_text(properties.get(KEY_ID)).ok_or(RecordError::MissingId)?;
        let name = scalar_text(properties.get(KEY_NAME));

        let (geometry, geometry_error) = match feature.get("geometry") {
            None | Some(Json::Null) => (None, None),
            Some(g) => match Geometry::from_geojson(g) {
                Ok(geometry) => (Some(geometry), None),
                Err(err) => (None, Some(err)),
            },
        };

        Ok(SourceRecord {
            id,
            name,
            geometry,
            geometry_error,
            properties,
            published,
            retrieved,
            feature,
        })
    }

    pub fn text(&self, key: &str) -> Option<String> {
        scalar_text(self.properties.get(key))
    }

    /// Finite numbers, or strings that parse as finite numbers
    pub fn number(&self, key: &str) -> Option<f64> {
        let value = match self.properties.get(key)? {
            Json::Number(n) => n.as_f64(),
            Json::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        value.filter(|v| v.is_finite())
    }

    pub fn category_code(&self) -> Option<String> {
        self.text(KEY_CATEGORY)
    }

    pub fn operator_name(&self) -> Option<String> {
        self.text(KEY_OPERATOR)
    }

    /// Municipality names, comma separated in the feed
    pub fn municipality_names(&self) -> Vec<String> {
        self.text(KEY_MUNICIPALITY)
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn area_hectares(&self, part: AreaPart) -> Option<f64> {
        self.number(part.feed_key())
    }

    /// First present inception candidate, parsed.
    pub fn inception_date(&self) -> Result<NaiveDate, RecordError> {
        let (key, raw) = INCEPTION_KEYS
            .iter()
            .find_map(|key| self.text(key).map(|v| (*key, v)))
            .ok_or(RecordError::NoInceptionDate)?;

        NaiveDate::parse_from_str(raw.trim(), FEED_DATE_FORMAT).map_err(|_| RecordError::InvalidDate {
            property: key.to_string(),
            value: raw,
        })
    }
}

fn scalar_text(value: Option<&Json>) -> Option<String> {
    match value? {
        Json::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ============================================================================
// FEATURE COLLECTION FILES
// ============================================================================

/// Read the raw bytes of a feed file (kept for input digests)
pub fn read_feed_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read feed file {}", path.display()))
}

/// Parse a FeatureCollection into its features, untouched
pub fn parse_features(bytes: &[u8], origin: &Path) -> Result<Vec<Json>> {
    let collection: Json = serde_json::from_slice(bytes)
        .with_context(|| format!("Failed to parse GeoJSON in {}", origin.display()))?;

    match collection.get("features") {
        Some(Json::Array(features)) => Ok(features.clone()),
        _ => anyhow::bail!("{} is not a FeatureCollection", origin.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn feature(properties: Json) -> Json {
        json!({
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": [15.0, 60.0]},
            "properties": properties
        })
    }

    #[test]
    fn test_missing_id_is_fatal() {
        let err = SourceRecord::from_feature(feature(json!({"NAMN": "Nameless"})), date("2020-02-25"), date("2020-02-25"))
            .unwrap_err();
        assert_eq!(err, RecordError::MissingId);
    }

    #[test]
    fn test_null_properties_are_dropped() {
        let record = SourceRecord::from_feature(
            feature(json!({"NVRID": 2001234, "NAMN": "Bjurälven", "KOMMUN": null})),
            date("2020-02-25"),
            date("2020-02-25"),
        )
        .unwrap();

        assert_eq!(record.id, "2001234");
        assert!(!record.properties.contains_key("KOMMUN"));
        assert!(record.feature["properties"].get("KOMMUN").is_none());
    }

    #[test]
    fn test_inception_priority() {
        let record = SourceRecord::from_feature(
            feature(json!({"NVRID": "1", "URSGALLDAT": "1999/01/02", "URSBESLDAT": "1998/05/06"})),
            date("2020-02-25"),
            date("2020-02-25"),
        )
        .unwrap();
        assert_eq!(record.inception_date().unwrap(), date("1999-01-02"));

        let record = SourceRecord::from_feature(
            feature(json!({"NVRID": "1", "IKRAFTDAT": "2001/12/24", "URSGALLDAT": "1999/01/02"})),
            date("2020-02-25"),
            date("2020-02-25"),
        )
        .unwrap();
        assert_eq!(record.inception_date().unwrap(), date("2001-12-24"));
    }

    #[test]
    fn test_no_inception_candidates() {
        let record = SourceRecord::from_feature(feature(json!({"NVRID": "1"})), date("2020-02-25"), date("2020-02-25"))
            .unwrap();
        assert_eq!(record.inception_date().unwrap_err(), RecordError::NoInceptionDate);
    }

    #[test]
    fn test_municipalities_split_on_comma() {
        let record = SourceRecord::from_feature(
            feature(json!({"NVRID": "1", "KOMMUN": "Kiruna, Gällivare,"})),
            date("2020-02-25"),
            date("2020-02-25"),
        )
        .unwrap();
        assert_eq!(record.municipality_names(), vec!["Kiruna".to_string(), "Gällivare".to_string()]);
    }

    #[test]
    fn test_non_finite_numbers_are_ignored() {
        let record = SourceRecord::from_feature(
            feature(json!({"NVRID": "1", "AREA_HA": "NaN", "LAND_HA": "inf", "SKOG_HA": " 80.5 ", "VATTEN_HA": 2})),
            date("2020-02-25"),
            date("2020-02-25"),
        )
        .unwrap();
        assert_eq!(record.area_hectares(AreaPart::Total), None);
        assert_eq!(record.area_hectares(AreaPart::Land), None);
        assert_eq!(record.area_hectares(AreaPart::Forest), Some(80.5));
        assert_eq!(record.area_hectares(AreaPart::Water), Some(2.0));
    }

    #[test]
    fn test_malformed_geometry_keeps_the_record() {
        let record = SourceRecord::from_feature(
            json!({
                "type": "Feature",
                "geometry": {"type": "Polygon", "coordinates": "broken"},
                "properties": {"NVRID": "1", "IKRAFTDAT": "2001/12/24"}
            }),
            date("2020-02-25"),
            date("2020-02-25"),
        )
        .unwrap();
        assert!(record.geometry.is_none());
        assert!(matches!(record.geometry_error, Some(RecordError::InvalidGeometry(_))));
        assert_eq!(record.inception_date().unwrap(), date("2001-12-24"));
    }

    #[test]
    fn test_parse_features_requires_collection() {
        let path = Path::new("inline.geojson");
        let features = parse_features(br#"{"type":"FeatureCollection","features":[{"type":"Feature"}]}"#, path).unwrap();
        assert_eq!(features.len(), 1);
        assert!(parse_features(br#"{"type":"Feature"}"#, path).is_err());
    }
}
