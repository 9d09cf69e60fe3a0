// 🧾 Statement Model - Append-only assertions about remote entities
//
// An entity's identity persists, its statements accumulate:
// - A changed fact becomes a NEW statement, the old one stays as history
// - "Current" means most recently published, judged by the publication
//   date carried in the statement's references
// - Statements built locally carry no remote id until committed

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Item identifier in the knowledge base (e.g. "Q34")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

/// Property identifier in the knowledge base (e.g. "P31")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PropertyId {
    pub fn new(id: impl Into<String>) -> Self {
        PropertyId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// VALUES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobeCoordinate {
    pub latitude: f64,
    pub longitude: f64,
    /// Degrees
    pub precision: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Text(String),

    /// Amount with an optional unit item (None = unitless)
    Quantity { amount: f64, unit: Option<EntityId> },

    /// Day precision date
    Time(NaiveDate),

    GlobeCoordinate(GlobeCoordinate),

    Entity(EntityId),

    /// A remote value type this system never writes; kept so a snapshot
    /// round-trips without losing statements
    Other(serde_json::Value),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn entity(id: &EntityId) -> Self {
        Value::Entity(id.clone())
    }

    pub fn as_time(&self) -> Option<NaiveDate> {
        match self {
            Value::Time(date) => Some(*date),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_coordinate(&self) -> Option<&GlobeCoordinate> {
        match self {
            Value::GlobeCoordinate(c) => Some(c),
            _ => None,
        }
    }
}

/// The main assertion of a statement.
///
/// `NoValue` is an explicit "this property deliberately has no value"
/// marker, distinct from the property being absent altogether.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Snak {
    Value(Value),
    NoValue,
    SomeValue,
}

impl Snak {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Snak::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Value> for Snak {
    fn from(value: Value) -> Self {
        Snak::Value(value)
    }
}

// ============================================================================
// REFERENCES & QUALIFIERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub property: PropertyId,
    pub value: Value,
}

/// Citation bundle: ordered (property, value) pairs
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Reference {
    pub snaks: Vec<PropertyValue>,
}

impl Reference {
    pub fn new() -> Self {
        Reference { snaks: Vec::new() }
    }

    /// Builder: append a (property, value) pair
    pub fn with(mut self, property: &PropertyId, value: Value) -> Self {
        self.snaks.push(PropertyValue {
            property: property.clone(),
            value,
        });
        self
    }

    pub fn get(&self, property: &PropertyId) -> Option<&Value> {
        self.snaks
            .iter()
            .find(|pv| &pv.property == property)
            .map(|pv| &pv.value)
    }

    pub fn len(&self) -> usize {
        self.snaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snaks.is_empty()
    }
}

// ============================================================================
// STATEMENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    /// Remote statement id; None until committed
    pub id: Option<String>,

    pub property: PropertyId,

    pub snak: Snak,

    /// Ordered mapping property → value
    pub qualifiers: Vec<PropertyValue>,

    pub references: Vec<Reference>,
}

impl Statement {
    /// New unlinked statement without qualifiers or references
    pub fn new(property: &PropertyId, snak: impl Into<Snak>) -> Self {
        Statement {
            id: None,
            property: property.clone(),
            snak: snak.into(),
            qualifiers: Vec::new(),
            references: Vec::new(),
        }
    }

    pub fn with_qualifier(mut self, property: &PropertyId, value: Value) -> Self {
        match self.qualifiers.iter_mut().find(|q| &q.property == property) {
            Some(existing) => existing.value = value,
            None => self.qualifiers.push(PropertyValue {
                property: property.clone(),
                value,
            }),
        }
        self
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.references.push(reference);
        self
    }

    pub fn value(&self) -> Option<&Value> {
        self.snak.value()
    }

    pub fn qualifier(&self, property: &PropertyId) -> Option<&Value> {
        self.qualifiers
            .iter()
            .find(|q| &q.property == property)
            .map(|q| &q.value)
    }

    /// Latest publication date found in any reference
    pub fn published(&self, publication_date: &PropertyId) -> Option<NaiveDate> {
        self.references
            .iter()
            .filter_map(|r| r.get(publication_date).and_then(Value::as_time))
            .max()
    }

    pub fn is_linked(&self) -> bool {
        self.id.is_some()
    }
}

// ============================================================================
// KNOWLEDGE BASE ENTITY
// ============================================================================

/// Working set for one record: either not yet created remotely, or a
/// snapshot of the remote entity fetched once for this pass.
#[derive(Debug, Clone, PartialEq)]
pub enum KnowledgeBaseEntity {
    /// Built locally, no remote identity yet
    Pending { statements: Vec<Statement> },

    /// Remote identity plus the statements read in this pass
    Existing { id: EntityId, statements: Vec<Statement> },
}

impl KnowledgeBaseEntity {
    pub fn id(&self) -> Option<&EntityId> {
        match self {
            KnowledgeBaseEntity::Pending { .. } => None,
            KnowledgeBaseEntity::Existing { id, .. } => Some(id),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, KnowledgeBaseEntity::Pending { .. })
    }

    /// Every statement held, including locally built bootstrap statements
    pub fn statements(&self) -> &[Statement] {
        match self {
            KnowledgeBaseEntity::Pending { statements } => statements,
            KnowledgeBaseEntity::Existing { statements, .. } => statements,
        }
    }

    /// Statements read from the remote snapshot. A pending entity has none.
    pub fn remote_statements<'a, 'p>(&'a self, property: &'p PropertyId) -> impl Iterator<Item = &'a Statement> + 'p
    where
        'a: 'p,
    {
        let statements: &[Statement] = match self {
            KnowledgeBaseEntity::Pending { .. } => &[],
            KnowledgeBaseEntity::Existing { statements, .. } => statements,
        };
        statements.iter().filter(move |s| &s.property == property)
    }

    /// The remote statement for `property` whose publication date is latest.
    /// Statements without a publication date rank oldest; ties go to the one
    /// listed last.
    pub fn most_recent_published(
        &self,
        property: &PropertyId,
        publication_date: &PropertyId,
    ) -> Option<&Statement> {
        self.remote_statements(property)
            .max_by_key(|s| s.published(publication_date))
    }

    /// Like `most_recent_published`, restricted to one qualifier slot.
    /// `slot = None` matches statements that carry no `qualifier` at all.
    pub fn most_recent_in_slot(
        &self,
        property: &PropertyId,
        qualifier: &PropertyId,
        slot: Option<&Value>,
        publication_date: &PropertyId,
    ) -> Option<&Statement> {
        self.remote_statements(property)
            .filter(|s| s.qualifier(qualifier) == slot)
            .max_by_key(|s| s.published(publication_date))
    }
}
