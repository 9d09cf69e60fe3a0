// 📚 Wikibase knowledge base client
//
// Reads through wbgetentities and the SPARQL endpoint, writes through
// wbeditentity. Also owns the JSON codec between the Wikibase data model
// and our Statement model.

use super::http::{send, ApiClient};
use super::KnowledgeBase;
use crate::error::ClientError;
use crate::statement::{
    EntityId, GlobeCoordinate, KnowledgeBaseEntity, PropertyId, PropertyValue, Reference, Snak, Statement, Value,
};
use crate::vocabulary::Vocabulary;
use chrono::NaiveDate;
use serde_json::{json, Map, Value as Json};
use tracing::{debug, warn};

const ENTITY_IRI_PREFIX: &str = "http://www.wikidata.org/entity/";
const GREGORIAN_CALENDAR: &str = "http://www.wikidata.org/entity/Q1985727";
const DAY_PRECISION: u64 = 11;

pub struct WikibaseClient {
    api: ApiClient,
    sparql_url: String,
    vocab: Vocabulary,
}

impl WikibaseClient {
    pub fn new(api: ApiClient, sparql_url: &str, vocab: Vocabulary) -> Self {
        WikibaseClient {
            api,
            sparql_url: sparql_url.to_string(),
            vocab,
        }
    }

    fn sparql(&self, query: &str) -> Result<Json, ClientError> {
        debug!("SPARQL {}", query);
        let request = self
            .api
            .http()
            .get(&self.sparql_url)
            .header("Accept", "application/sparql-results+json")
            .query(&[("query", query), ("format", "json")]);
        send(request)
    }

    fn edit(&self, params: &[(&str, &str)]) -> Result<Json, ClientError> {
        let mut all = vec![("action", "wbeditentity"), ("bot", "1")];
        all.extend_from_slice(params);
        self.api.post(&all)
    }
}

impl KnowledgeBase for WikibaseClient {
    fn get_entity(&self, id: &EntityId) -> Result<Option<KnowledgeBaseEntity>, ClientError> {
        let body = self
            .api
            .get(&[("action", "wbgetentities"), ("ids", id.as_str()), ("props", "claims")])?;
        let entity = body
            .get("entities")
            .and_then(|e| e.get(id.as_str()))
            .ok_or_else(|| ClientError::Parse(format!("no entity {} in response", id)))?;
        if entity.get("missing").is_some() {
            return Ok(None);
        }
        Ok(Some(KnowledgeBaseEntity::Existing {
            id: id.clone(),
            statements: decode_claims(entity.get("claims").unwrap_or(&Json::Null)),
        }))
    }

    fn find_unique_entity_by_property(
        &self,
        object_type: &EntityId,
        property: &PropertyId,
        value: &str,
    ) -> Result<Vec<EntityId>, ClientError> {
        let query = format!(
            "SELECT ?item WHERE {{ ?item wdt:{} ?value. ?item wdt:{} wd:{}. FILTER (?value IN (\"{}\")) }} LIMIT 2",
            property,
            self.vocab.instance_of,
            object_type,
            escape_literal(value)
        );
        let body = self.sparql(&query)?;
        let bindings = body
            .pointer("/results/bindings")
            .and_then(Json::as_array)
            .ok_or_else(|| ClientError::Parse("SPARQL response without bindings".to_string()))?;

        Ok(bindings
            .iter()
            .filter_map(|b| b.pointer("/item/value").and_then(Json::as_str))
            .map(entity_from_iri)
            .collect())
    }

    fn create_entity(&self, statements: &[Statement], summary: &str) -> Result<EntityId, ClientError> {
        let claims: Vec<Json> = statements.iter().map(|s| encode_statement(s, &self.vocab)).collect();
        let data = json!({ "claims": claims }).to_string();
        let body = self.edit(&[("new", "item"), ("data", data.as_str()), ("summary", summary)])?;

        body.pointer("/entity/id")
            .and_then(Json::as_str)
            .map(EntityId::new)
            .ok_or_else(|| ClientError::Parse("wbeditentity returned no entity id".to_string()))
    }

    fn update_entity(
        &self,
        id: &EntityId,
        to_add: &[Statement],
        to_delete: &[Statement],
        summary: &str,
    ) -> Result<(), ClientError> {
        let mut claims: Vec<Json> = to_add.iter().map(|s| encode_statement(s, &self.vocab)).collect();
        claims.extend(
            to_delete
                .iter()
                .filter_map(|s| s.id.as_ref())
                .map(|statement_id| json!({ "id": statement_id, "remove": "" })),
        );
        let data = json!({ "claims": claims }).to_string();
        self.edit(&[("id", id.as_str()), ("data", data.as_str()), ("summary", summary)])?;
        Ok(())
    }

    fn find_entity_by_label(&self, label: &str, language: &str) -> Result<Option<EntityId>, ClientError> {
        let body = self.api.get(&[
            ("action", "wbsearchentities"),
            ("search", label),
            ("language", language),
            ("strictlanguage", "1"),
            ("type", "item"),
            ("limit", "10"),
        ])?;
        let hits: Vec<EntityId> = body
            .get("search")
            .and_then(Json::as_array)
            .map(|results| {
                results
                    .iter()
                    .filter(|r| r.get("label").and_then(Json::as_str) == Some(label))
                    .filter_map(|r| r.get("id").and_then(Json::as_str))
                    .map(EntityId::new)
                    .collect()
            })
            .unwrap_or_default();

        match hits.len() {
            1 => Ok(hits.into_iter().next()),
            0 => Ok(None),
            n => {
                warn!("Label '{}'@{} is not unique ({} items)", label, language, n);
                Ok(None)
            }
        }
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

pub fn entity_from_iri(iri: &str) -> EntityId {
    EntityId::new(iri.rsplit('/').next().unwrap_or(iri))
}

// ============================================================================
// ENCODING
// ============================================================================

pub fn encode_statement(statement: &Statement, vocab: &Vocabulary) -> Json {
    let mut qualifiers = Map::new();
    let mut qualifier_order = Vec::new();
    for q in &statement.qualifiers {
        push_snak(&mut qualifiers, &q.property, encode_value_snak(&q.property, &q.value, vocab));
        qualifier_order.push(q.property.to_string());
    }

    let references: Vec<Json> = statement.references.iter().map(|r| encode_reference(r, vocab)).collect();

    let mut encoded = json!({
        "type": "statement",
        "rank": "normal",
        "mainsnak": encode_snak(&statement.property, &statement.snak, vocab),
        "references": references,
    });
    if !qualifiers.is_empty() {
        encoded["qualifiers"] = Json::Object(qualifiers);
        encoded["qualifiers-order"] = json!(qualifier_order);
    }
    if let Some(id) = &statement.id {
        encoded["id"] = json!(id);
    }
    encoded
}

fn encode_reference(reference: &Reference, vocab: &Vocabulary) -> Json {
    let mut snaks = Map::new();
    let mut order = Vec::new();
    for pv in &reference.snaks {
        push_snak(&mut snaks, &pv.property, encode_value_snak(&pv.property, &pv.value, vocab));
        if !order.contains(&pv.property.to_string()) {
            order.push(pv.property.to_string());
        }
    }
    json!({ "snaks": snaks, "snaks-order": order })
}

fn push_snak(map: &mut Map<String, Json>, property: &PropertyId, snak: Json) {
    if let Json::Array(list) = map
        .entry(property.to_string())
        .or_insert_with(|| Json::Array(Vec::new()))
    {
        list.push(snak);
    }
}

fn encode_snak(property: &PropertyId, snak: &Snak, vocab: &Vocabulary) -> Json {
    match snak {
        Snak::Value(value) => encode_value_snak(property, value, vocab),
        Snak::NoValue => json!({ "snaktype": "novalue", "property": property }),
        Snak::SomeValue => json!({ "snaktype": "somevalue", "property": property }),
    }
}

fn encode_value_snak(property: &PropertyId, value: &Value, vocab: &Vocabulary) -> Json {
    json!({
        "snaktype": "value",
        "property": property,
        "datavalue": encode_value(value, vocab),
    })
}

pub fn encode_value(value: &Value, vocab: &Vocabulary) -> Json {
    match value {
        Value::Text(s) => json!({ "type": "string", "value": s }),
        Value::Quantity { amount, unit } => json!({
            "type": "quantity",
            "value": {
                "amount": format_amount(*amount),
                "unit": unit.as_ref().map_or_else(|| "1".to_string(), |u| format!("{}{}", ENTITY_IRI_PREFIX, u)),
            }
        }),
        Value::Time(date) => json!({
            "type": "time",
            "value": {
                "time": format!("+{}T00:00:00Z", date.format("%Y-%m-%d")),
                "timezone": 0,
                "before": 0,
                "after": 0,
                "precision": DAY_PRECISION,
                "calendarmodel": GREGORIAN_CALENDAR,
            }
        }),
        Value::GlobeCoordinate(c) => json!({
            "type": "globecoordinate",
            "value": {
                "latitude": c.latitude,
                "longitude": c.longitude,
                "precision": c.precision,
                "globe": format!("{}{}", ENTITY_IRI_PREFIX, vocab.earth),
            }
        }),
        Value::Entity(id) => json!({
            "type": "wikibase-entityid",
            "value": { "entity-type": "item", "id": id },
        }),
        Value::Other(datavalue) => datavalue.clone(),
    }
}

/// Wikibase wants a signed decimal string
fn format_amount(amount: f64) -> String {
    if amount < 0.0 {
        format!("{}", amount)
    } else {
        format!("+{}", amount)
    }
}

// ============================================================================
// DECODING
// ============================================================================

/// `claims` object (property → statements) into a flat statement list
pub fn decode_claims(claims: &Json) -> Vec<Statement> {
    let Some(groups) = claims.as_object() else {
        return Vec::new();
    };
    groups
        .values()
        .filter_map(Json::as_array)
        .flatten()
        .filter_map(decode_statement)
        .collect()
}

pub fn decode_statement(json: &Json) -> Option<Statement> {
    let (property, snak) = decode_snak(json.get("mainsnak")?)?;

    let mut statement = Statement::new(&property, snak);
    statement.id = json.get("id").and_then(Json::as_str).map(String::from);
    statement.qualifiers = decode_value_snaks(json.get("qualifiers"), json.get("qualifiers-order"));
    statement.references = json
        .get("references")
        .and_then(Json::as_array)
        .map(|refs| {
            refs.iter()
                .map(|r| Reference {
                    snaks: decode_value_snaks(r.get("snaks"), r.get("snaks-order")),
                })
                .collect()
        })
        .unwrap_or_default();
    Some(statement)
}

/// property → [snak] map in the declared order; only value snaks survive
fn decode_value_snaks(snaks: Option<&Json>, order: Option<&Json>) -> Vec<PropertyValue> {
    let Some(snaks) = snaks.and_then(Json::as_object) else {
        return Vec::new();
    };
    let order: Vec<&str> = match order.and_then(Json::as_array) {
        Some(list) => list.iter().filter_map(Json::as_str).collect(),
        None => snaks.keys().map(String::as_str).collect(),
    };

    order
        .iter()
        .filter_map(|p| snaks.get(*p).and_then(Json::as_array))
        .flatten()
        .filter_map(decode_snak)
        .filter_map(|(property, snak)| match snak {
            Snak::Value(value) => Some(PropertyValue { property, value }),
            _ => None,
        })
        .collect()
}

fn decode_snak(json: &Json) -> Option<(PropertyId, Snak)> {
    let property = PropertyId::new(json.get("property")?.as_str()?);
    let snak = match json.get("snaktype")?.as_str()? {
        "novalue" => Snak::NoValue,
        "somevalue" => Snak::SomeValue,
        _ => Snak::Value(decode_value(json.get("datavalue")?)),
    };
    Some((property, snak))
}

/// Unknown or unparseable datavalues are preserved as `Value::Other`
pub fn decode_value(datavalue: &Json) -> Value {
    let value = &datavalue["value"];
    let decoded = match datavalue.get("type").and_then(Json::as_str) {
        Some("string") => value.as_str().map(Value::text),
        Some("quantity") => decode_quantity(value),
        Some("time") => decode_time(value),
        Some("globecoordinate") => Some(Value::GlobeCoordinate(GlobeCoordinate {
            latitude: value["latitude"].as_f64().unwrap_or(f64::NAN),
            longitude: value["longitude"].as_f64().unwrap_or(f64::NAN),
            precision: value["precision"].as_f64().unwrap_or(0.0),
        })),
        Some("wikibase-entityid") => value
            .get("id")
            .and_then(Json::as_str)
            .map(EntityId::new)
            .or_else(|| value["numeric-id"].as_u64().map(|n| EntityId::new(format!("Q{}", n))))
            .map(Value::Entity),
        _ => None,
    };
    decoded.unwrap_or_else(|| Value::Other(datavalue.clone()))
}

fn decode_quantity(value: &Json) -> Option<Value> {
    let amount: f64 = value["amount"].as_str()?.trim_start_matches('+').parse().ok()?;
    let unit = match value["unit"].as_str()? {
        "1" => None,
        iri => Some(entity_from_iri(iri)),
    };
    Some(Value::Quantity { amount, unit })
}

/// Day precision only; coarser times stay `Other`
fn decode_time(value: &Json) -> Option<Value> {
    if value["precision"].as_u64()? < DAY_PRECISION {
        return None;
    }
    let time = value["time"].as_str()?;
    let date_part = time.trim_start_matches('+').split('T').next()?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok().map(Value::Time)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_decode_area_statement() {
        let json = json!({
            "id": "Q30180845$5A1B",
            "mainsnak": {
                "snaktype": "value",
                "property": "P2046",
                "datavalue": {"type": "quantity", "value": {"amount": "+80", "unit": "http://www.wikidata.org/entity/Q35852"}}
            },
            "qualifiers": {
                "P518": [{"snaktype": "value", "property": "P518",
                          "datavalue": {"type": "wikibase-entityid", "value": {"entity-type": "item", "numeric-id": 4421}}}]
            },
            "qualifiers-order": ["P518"],
            "references": [{
                "snaks": {
                    "P577": [{"snaktype": "value", "property": "P577",
                              "datavalue": {"type": "time", "value": {"time": "+2020-02-25T00:00:00Z", "precision": 11}}}],
                    "P248": [{"snaktype": "value", "property": "P248",
                              "datavalue": {"type": "wikibase-entityid", "value": {"entity-type": "item", "id": "Q29580583"}}}]
                },
                "snaks-order": ["P577", "P248"]
            }]
        });

        let statement = decode_statement(&json).unwrap();
        assert_eq!(statement.id.as_deref(), Some("Q30180845$5A1B"));
        assert_eq!(
            statement.value(),
            Some(&Value::Quantity { amount: 80.0, unit: Some(EntityId::new("Q35852")) })
        );
        assert_eq!(
            statement.qualifier(&PropertyId::new("P518")),
            Some(&Value::Entity(EntityId::new("Q4421")))
        );
        assert_eq!(statement.published(&PropertyId::new("P577")), Some(day("2020-02-25")));
    }

    #[test]
    fn test_decode_novalue_and_year_precision() {
        let novalue = json!({"mainsnak": {"snaktype": "novalue", "property": "P814"}});
        assert_eq!(decode_statement(&novalue).unwrap().snak, Snak::NoValue);

        let year = json!({"type": "time", "value": {"time": "+1981-00-00T00:00:00Z", "precision": 9}});
        assert!(matches!(decode_value(&year), Value::Other(_)));
    }

    #[test]
    fn test_encode_new_statement() {
        let vocab = Vocabulary::wikidata();
        let statement = Statement::new(&vocab.area, Value::Quantity { amount: 20.5, unit: Some(vocab.hectare.clone()) })
            .with_qualifier(&vocab.applies_to_part, Value::entity(&vocab.body_of_water))
            .with_reference(Reference::new().with(&vocab.publication_date, Value::Time(day("2020-02-25"))));

        let json = encode_statement(&statement, &vocab);
        assert!(json.get("id").is_none());
        assert_eq!(json["mainsnak"]["datavalue"]["value"]["amount"], json!("+20.5"));
        assert_eq!(
            json["mainsnak"]["datavalue"]["value"]["unit"],
            json!("http://www.wikidata.org/entity/Q35852")
        );
        assert_eq!(json["qualifiers"]["P518"][0]["datavalue"]["value"]["id"], json!("Q15324"));
        assert_eq!(
            json["references"][0]["snaks"]["P577"][0]["datavalue"]["value"]["time"],
            json!("+2020-02-25T00:00:00Z")
        );
    }

    #[test]
    fn test_sparql_literal_escaping() {
        assert_eq!(escape_literal(r#"a"b\c"#), r#"a\"b\\c"#);
        assert_eq!(entity_from_iri("http://www.wikidata.org/entity/Q42"), EntityId::new("Q42"));
    }
}
