// 🗺️ Geometry Projection - Coordinates, zoom and shape documents
//
// From a record's geometry derive:
// - a representative point (centroid, or the nearest contained vertex)
// - coordinate location statements, with tolerance-based idempotence
// - a map zoom level from the envelope diagonal
// - a canonical shape document in the document store, plus a statement
//   pointing at it
//
// All statements are built into a scratch list; the caller merges them
// into the record's delta only when projection succeeds.

use crate::client::DocumentStore;
use crate::delta::Evaluation;
use crate::error::{RecordError, SyncResult};
use crate::feed::{ObjectType, SourceRecord};
use crate::geometry::{arc_distance_km, Coord, Geometry};
use crate::statement::{GlobeCoordinate, Statement, Value};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Allowed drift for point geometries (about 1 m)
pub const POINT_TOLERANCE_KM: f64 = 0.001;

/// Allowed drift for polygon centroids (about 100 m)
pub const AREA_TOLERANCE_KM: f64 = 0.1;

/// Degrees; roughly 10 m at Swedish latitudes
pub const COORDINATE_PRECISION: f64 = 0.0001;

pub const SHAPE_LICENSE: &str = "CC0-1.0";
pub const SHAPE_SOURCES_PREFIX: &str = "Naturvårdsverket (Swedish Environmental Protection Agency), ";
pub const DESCRIPTION_LANGUAGE: &str = "sv";

pub const SUMMARY_DOCUMENT_CREATED: &str = "Initial creation using data from Naturvårdsverket.";
pub const SUMMARY_DOCUMENT_UPDATED: &str =
    "Updated using data from Naturvårdsverket due to detected difference with local data.";

/// (exclusive upper bound of the diagonal in km, zoom)
const ZOOM_BUCKETS: [(f64, u8); 6] = [
    (1.0, 13),
    (4.0, 12),
    (16.0, 11),
    (64.0, 10),
    (256.0, 9),
    (1024.0, 8),
];
const ZOOM_FALLBACK: u8 = 7;

// ============================================================================
// REPRESENTATIVE POINT
// ============================================================================

/// The centroid if it lies inside or on the geometry; otherwise the vertex
/// nearest to it, provided that vertex is contained.
pub fn representative_point(geometry: &Geometry) -> Result<Coord, RecordError> {
    let centroid = geometry.centroid().ok_or(RecordError::NoContainedPoint)?;
    if geometry.contains_or_touches(&centroid) {
        return Ok(centroid);
    }

    let mut closest = centroid;
    let mut closest_distance = f64::MAX;
    for vertex in geometry.vertices() {
        let distance = centroid.distance(&vertex);
        if distance < closest_distance {
            closest_distance = distance;
            closest = vertex;
        }
    }

    if geometry.contains_or_touches(&closest) {
        debug!("Centroid outside of geometry, using nearest vertex {:?}", closest);
        Ok(closest)
    } else {
        Err(RecordError::NoContainedPoint)
    }
}

// ============================================================================
// ZOOM
// ============================================================================

/// Strict less-than at every bucket boundary
pub fn zoom_for_diagonal_km(diagonal_km: f64) -> u8 {
    for (limit, zoom) in ZOOM_BUCKETS {
        if diagonal_km < limit {
            return zoom;
        }
    }
    warn!(
        "Area too large ({:.1} km across) to come up with a good zoom value, using {}",
        diagonal_km, ZOOM_FALLBACK
    );
    ZOOM_FALLBACK
}

pub fn evaluate_zoom(geometry: &Geometry) -> Result<u8, RecordError> {
    let envelope = geometry
        .envelope()
        .ok_or_else(|| RecordError::InvalidGeometry(format!("empty {}", geometry.kind_name())))?;
    Ok(zoom_for_diagonal_km(envelope.diagonal_km()))
}

// ============================================================================
// SHAPE DOCUMENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeDocument {
    pub license: String,
    pub sources: String,
    pub description: BTreeMap<String, String>,
    pub longitude: f64,
    pub latitude: f64,
    pub zoom: u8,
    /// The feature exactly as read
    pub data: Json,
}

impl ShapeDocument {
    pub fn build(record: &SourceRecord, object_type: &ObjectType, point: Coord, zoom: u8) -> Self {
        let mut description = BTreeMap::new();
        if let Some(name) = &record.name {
            description.insert(DESCRIPTION_LANGUAGE.to_string(), name.clone());
        }
        ShapeDocument {
            license: SHAPE_LICENSE.to_string(),
            sources: format!("{}{}", SHAPE_SOURCES_PREFIX, object_type.source_url),
            description,
            longitude: point.x,
            latitude: point.y,
            zoom,
            data: record.feature.clone(),
        }
    }

    pub fn to_value(&self) -> Result<Json, RecordError> {
        serde_json::to_value(self).map_err(|e| RecordError::ShapeDocument(e.to_string()))
    }
}

/// Deep structural equality: key order and formatting are irrelevant
pub fn documents_equal(a: &Json, b: &Json) -> bool {
    a == b
}

// ============================================================================
// ARTICLE NAMING
// ============================================================================

pub trait ArticleNaming {
    fn article_name(&self, record: &SourceRecord, object_type: &ObjectType) -> String;
}

/// Substitutes `{id}` and `{name}` in the object type's article template.
/// In sandbox mode the article moves under `Data:Sandbox/<user>/`.
#[derive(Debug, Clone, Default)]
pub struct TemplateNaming {
    pub sandbox_user: Option<String>,
}

impl TemplateNaming {
    pub fn new(sandbox_user: Option<String>) -> Self {
        TemplateNaming { sandbox_user }
    }
}

impl ArticleNaming for TemplateNaming {
    fn article_name(&self, record: &SourceRecord, object_type: &ObjectType) -> String {
        let name = object_type
            .article_template
            .replace("{id}", &record.id)
            .replace("{name}", record.name.as_deref().unwrap_or(&record.id));

        match &self.sandbox_user {
            Some(user) => format!("Data:Sandbox/{}/{}", user, name.strip_prefix("Data:").unwrap_or(&name)),
            None => name,
        }
    }
}

// ============================================================================
// DOCUMENT SYNC
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentSync {
    Created,
    Updated,
    Unchanged,
    /// The existing document is not a JSON object; left alone this cycle
    SkippedUnparseable,
}

impl DocumentSync {
    pub fn wrote(&self) -> bool {
        matches!(self, DocumentSync::Created | DocumentSync::Updated)
    }
}

// ============================================================================
// PROJECTION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Statements to merge into the record's delta
    pub additions: Vec<Statement>,
    pub document: Option<DocumentSync>,
}

pub struct GeometryProjector<'a> {
    documents: &'a dyn DocumentStore,
    naming: &'a dyn ArticleNaming,
    object_type: &'a ObjectType,
    dry_run: bool,
}

impl<'a> GeometryProjector<'a> {
    pub fn new(
        documents: &'a dyn DocumentStore,
        naming: &'a dyn ArticleNaming,
        object_type: &'a ObjectType,
        dry_run: bool,
    ) -> Self {
        GeometryProjector {
            documents,
            naming,
            object_type,
            dry_run,
        }
    }

    /// Project one geometry. Record errors mean only the geometry failed;
    /// client errors abort the run.
    pub fn project(&self, eval: &Evaluation<'_>, geometry: &Geometry) -> SyncResult<Projection> {
        let mut additions = Vec::new();

        let document = match geometry {
            Geometry::Point(point) => {
                self.evaluate_coordinate(eval, *point, POINT_TOLERANCE_KM, &mut additions);
                None
            }
            Geometry::MultiPoint(points) => {
                let vocab = eval.vocab();
                let existing = eval.entity().remote_statements(&vocab.coordinate_location).count();
                if existing > 0 {
                    return Err(RecordError::MultiLocationNotImplemented { existing }.into());
                }
                for point in points {
                    self.evaluate_coordinate(eval, *point, POINT_TOLERANCE_KM, &mut additions);
                }
                None
            }
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) => {
                let point = representative_point(geometry)?;
                self.evaluate_coordinate(eval, point, AREA_TOLERANCE_KM, &mut additions);

                let zoom = evaluate_zoom(geometry)?;
                let document = ShapeDocument::build(eval.record(), self.object_type, point, zoom);
                let article = self.naming.article_name(eval.record(), self.object_type);

                let sync = self.sync_document(&article, &document)?;
                if sync != DocumentSync::SkippedUnparseable && self.needs_shape_statement(eval, &article) {
                    additions.push(eval.statement(&eval.vocab().geoshape, Value::text(article)));
                }
                Some(sync)
            }
            Geometry::Unsupported(kind) => {
                return Err(RecordError::UnsupportedGeometry(kind.as_str().to_string()).into());
            }
        };

        Ok(Projection { additions, document })
    }

    /// Add a coordinate statement unless an existing coordinate (remote most
    /// recently published, or added earlier in this pass) is within
    /// `tolerance_km`.
    fn evaluate_coordinate(&self, eval: &Evaluation<'_>, point: Coord, tolerance_km: f64, additions: &mut Vec<Statement>) {
        let vocab = eval.vocab();
        let local = GlobeCoordinate {
            latitude: point.y,
            longitude: point.x,
            precision: COORDINATE_PRECISION,
        };

        let remote = eval
            .entity()
            .most_recent_published(&vocab.coordinate_location, &vocab.publication_date)
            .and_then(Statement::value)
            .and_then(Value::as_coordinate)
            .copied();
        let added = additions
            .iter()
            .filter_map(|s| s.value().and_then(Value::as_coordinate).copied());

        let nearest = remote
            .into_iter()
            .chain(added)
            .map(|c| arc_distance_km(c.latitude, c.longitude, local.latitude, local.longitude))
            .fold(None, |best: Option<f64>, d| Some(best.map_or(d, |b| b.min(d))));

        match nearest {
            Some(distance) if within_tolerance(distance, tolerance_km) => debug!(
                "Will not add new coordinate location, local data is only {:.1} meters away",
                distance * 1000.0
            ),
            Some(distance) => {
                debug!(
                    "Will add a new coordinate location, local data is {:.1} meters away",
                    distance * 1000.0
                );
                additions.push(eval.statement(&vocab.coordinate_location, Value::GlobeCoordinate(local)));
            }
            None => additions.push(eval.statement(&vocab.coordinate_location, Value::GlobeCoordinate(local))),
        }
    }

    /// A new shape statement is needed unless the latest one already names
    /// this article.
    fn needs_shape_statement(&self, eval: &Evaluation<'_>, article: &str) -> bool {
        let vocab = eval.vocab();
        let current = eval
            .entity()
            .most_recent_published(&vocab.geoshape, &vocab.publication_date)
            .and_then(Statement::value)
            .and_then(Value::as_text);
        current != Some(article)
    }

    /// Create, overwrite or leave the stored document. Writes are suppressed
    /// in dry-run mode but the decision is still reported.
    pub fn sync_document(&self, article: &str, document: &ShapeDocument) -> SyncResult<DocumentSync> {
        let local = document.to_value()?;
        let remote = self.documents.get_document(article)?;

        let (outcome, summary) = match remote.text.filter(|_| remote.exists) {
            None => (DocumentSync::Created, SUMMARY_DOCUMENT_CREATED),
            Some(text) => match serde_json::from_str::<Json>(&text) {
                Ok(existing) if existing.is_object() => {
                    if documents_equal(&existing, &local) {
                        debug!("No changes to {}", article);
                        return Ok(DocumentSync::Unchanged);
                    }
                    (DocumentSync::Updated, SUMMARY_DOCUMENT_UPDATED)
                }
                _ => {
                    warn!("Invalid JSON object in document {}, leaving it untouched", article);
                    return Ok(DocumentSync::SkippedUnparseable);
                }
            },
        };

        if self.dry_run {
            info!("[dry run] Would write {:?} document {}", outcome, article);
        } else {
            let text = serde_json::to_string(&local).map_err(|e| RecordError::ShapeDocument(e.to_string()))?;
            self.documents.save_document(article, &text, summary)?;
            info!("Committed {:?} document {}", outcome, article);
        }
        Ok(outcome)
    }
}

/// An existing coordinate replaces the new one only when strictly closer
/// than the tolerance.
pub fn within_tolerance(distance_km: f64, tolerance_km: f64) -> bool {
    distance_km < tolerance_km
}
