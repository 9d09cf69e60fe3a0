// 🧪 Test fixtures shared by the unit tests

use crate::feed::{ObjectType, SourceRecord};
use crate::statement::{EntityId, Statement};
use chrono::NaiveDate;
use serde_json::{json, Value as Json};

pub fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn nature_reserve() -> ObjectType {
    ObjectType {
        entity: EntityId::new("Q179049"),
        label: "nature reserve".to_string(),
        source_url: "http://metadatakatalogen.naturvardsverket.se/metadatakatalogen/GetMetaDataById?id=2921b01a-0baf-4702-a89f-9c5626c97844".to_string(),
        reference_url_template: "http://nvpub.vic-metria.nu/naturvardsregistret/rest/omrade/{id}/G%C3%A4llande".to_string(),
        stated_in: EntityId::new("Q29580583"),
        article_template: "Data:Naturvårdsregistret/{id}.map".to_string(),
    }
}

/// Record published and retrieved 2020-02-25
pub fn record_with(properties: Json, geometry: Option<Json>) -> SourceRecord {
    let feature = json!({
        "type": "Feature",
        "geometry": geometry.unwrap_or(Json::Null),
        "properties": properties
    });
    SourceRecord::from_feature(feature, day("2020-02-25"), day("2020-02-25")).unwrap()
}

/// Pretend the statement came back from the remote side
pub fn linked(id: &str, mut statement: Statement) -> Statement {
    statement.id = Some(id.to_string());
    statement
}

pub fn square(x0: f64, y0: f64, side: f64) -> Json {
    json!({
        "type": "Polygon",
        "coordinates": [[
            [x0, y0], [x0 + side, y0], [x0 + side, y0 + side], [x0, y0 + side], [x0, y0]
        ]]
    })
}
