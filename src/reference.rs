// 📎 Provenance - The citation bundle every new statement carries
//
// Four entries, always in this order:
//   reference URL → retrieved → publication date → stated in

use crate::feed::{ObjectType, SourceRecord};
use crate::statement::{Reference, Statement, Value};
use crate::vocabulary::Vocabulary;

/// Number of entries in a provenance reference
pub const PROVENANCE_ENTRIES: usize = 4;

/// Build the reference bundle for one record. Pure; never varies by
/// property.
pub fn provenance_reference(record: &SourceRecord, object_type: &ObjectType, vocab: &Vocabulary) -> Reference {
    Reference::new()
        .with(&vocab.reference_url, Value::Text(object_type.reference_url(&record.id)))
        .with(&vocab.retrieved, Value::Time(record.retrieved))
        .with(&vocab.publication_date, Value::Time(record.published))
        .with(&vocab.stated_in, Value::entity(&object_type.stated_in))
}

/// Attach a bundle to a statement, replacing whatever references it had
pub fn cite(statement: Statement, reference: &Reference) -> Statement {
    Statement {
        references: vec![reference.clone()],
        ..statement
    }
}

/// True when the statement carries a complete provenance bundle
pub fn is_fully_referenced(statement: &Statement, vocab: &Vocabulary) -> bool {
    statement.references.iter().any(|r| {
        r.len() == PROVENANCE_ENTRIES
            && r.get(&vocab.reference_url).is_some()
            && r.get(&vocab.retrieved).is_some()
            && r.get(&vocab.publication_date).is_some()
            && r.get(&vocab.stated_in).is_some()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{nature_reserve, record_with};
    use serde_json::json;

    #[test]
    fn test_bundle_has_four_ordered_entries() {
        let vocab = Vocabulary::wikidata();
        let record = record_with(json!({"NVRID": "2001234"}), None);

        let reference = provenance_reference(&record, &nature_reserve(), &vocab);

        assert_eq!(reference.len(), PROVENANCE_ENTRIES);
        let order: Vec<&str> = reference.snaks.iter().map(|pv| pv.property.as_str()).collect();
        assert_eq!(order, vec!["P854", "P813", "P577", "P248"]);
        assert_eq!(
            reference.get(&vocab.reference_url),
            Some(&Value::text(
                "http://nvpub.vic-metria.nu/naturvardsregistret/rest/omrade/2001234/G%C3%A4llande"
            ))
        );

        let statement = cite(Statement::new(&vocab.country, Value::entity(&vocab.country_item)), &reference);
        assert!(is_fully_referenced(&statement, &vocab));
        assert!(!is_fully_referenced(
            &Statement::new(&vocab.country, Value::entity(&vocab.country_item)),
            &vocab
        ));
    }
}
