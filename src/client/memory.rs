// 🧪 In-memory collaborators
//
// Behave like the remote services closely enough to drive the whole
// pipeline offline: committed statements get ids, and references survive
// so that a second pass sees what the first one wrote.

use super::{DocumentStore, KnowledgeBase, RemoteDocument};
use crate::error::ClientError;
use crate::statement::{EntityId, KnowledgeBaseEntity, PropertyId, Statement, Value};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// KNOWLEDGE BASE
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryKnowledgeBase {
    entities: RefCell<BTreeMap<EntityId, Vec<Statement>>>,
    labels: RefCell<HashMap<(String, String), EntityId>>,
    next_id: Cell<u64>,
    next_statement: Cell<u64>,
    edits: Cell<usize>,
}

impl InMemoryKnowledgeBase {
    pub fn new() -> Self {
        InMemoryKnowledgeBase {
            next_id: Cell::new(1000),
            ..Default::default()
        }
    }

    pub fn insert_label(&self, label: &str, language: &str, id: EntityId) {
        self.labels
            .borrow_mut()
            .insert((label.to_string(), language.to_string()), id);
    }

    /// Seed an entity as if it already existed remotely
    pub fn insert_entity(&self, id: EntityId, statements: Vec<Statement>) {
        let linked = statements.into_iter().map(|s| self.link(&id, s)).collect();
        self.entities.borrow_mut().insert(id, linked);
    }

    pub fn statements(&self, id: &EntityId) -> Vec<Statement> {
        self.entities.borrow().get(id).cloned().unwrap_or_default()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.borrow().len()
    }

    /// Number of create/update calls received
    pub fn edits(&self) -> usize {
        self.edits.get()
    }

    fn link(&self, entity: &EntityId, mut statement: Statement) -> Statement {
        if statement.id.is_none() {
            let n = self.next_statement.get() + 1;
            self.next_statement.set(n);
            statement.id = Some(format!("{}$mem-{}", entity, n));
        }
        statement
    }
}

impl KnowledgeBase for InMemoryKnowledgeBase {
    fn get_entity(&self, id: &EntityId) -> Result<Option<KnowledgeBaseEntity>, ClientError> {
        Ok(self.entities.borrow().get(id).map(|statements| KnowledgeBaseEntity::Existing {
            id: id.clone(),
            statements: statements.clone(),
        }))
    }

    fn find_unique_entity_by_property(
        &self,
        object_type: &EntityId,
        property: &PropertyId,
        value: &str,
    ) -> Result<Vec<EntityId>, ClientError> {
        let wanted_type = Value::Entity(object_type.clone());
        let wanted_value = Value::text(value);
        Ok(self
            .entities
            .borrow()
            .iter()
            .filter(|(_, statements)| {
                statements.iter().any(|s| s.value() == Some(&wanted_type))
                    && statements
                        .iter()
                        .any(|s| &s.property == property && s.value() == Some(&wanted_value))
            })
            .map(|(id, _)| id.clone())
            .take(2)
            .collect())
    }

    fn create_entity(&self, statements: &[Statement], _summary: &str) -> Result<EntityId, ClientError> {
        let n = self.next_id.get() + 1;
        self.next_id.set(n);
        let id = EntityId::new(format!("Q{}", n));
        self.insert_entity(id.clone(), statements.to_vec());
        self.edits.set(self.edits.get() + 1);
        Ok(id)
    }

    fn update_entity(
        &self,
        id: &EntityId,
        to_add: &[Statement],
        to_delete: &[Statement],
        _summary: &str,
    ) -> Result<(), ClientError> {
        let added: Vec<Statement> = to_add.iter().cloned().map(|s| self.link(id, s)).collect();
        let mut entities = self.entities.borrow_mut();
        let statements = entities.get_mut(id).ok_or_else(|| ClientError::Api {
            code: "no-such-entity".to_string(),
            info: format!("Could not find an entity with the ID \"{}\".", id),
        })?;

        let deleted: Vec<&String> = to_delete.iter().filter_map(|s| s.id.as_ref()).collect();
        statements.retain(|s| !s.id.as_ref().is_some_and(|sid| deleted.contains(&sid)));
        statements.extend(added);
        self.edits.set(self.edits.get() + 1);
        Ok(())
    }

    fn find_entity_by_label(&self, label: &str, language: &str) -> Result<Option<EntityId>, ClientError> {
        Ok(self
            .labels
            .borrow()
            .get(&(label.to_string(), language.to_string()))
            .cloned())
    }
}

// ============================================================================
// DOCUMENT STORE
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryDocuments {
    pages: RefCell<HashMap<String, (String, u64)>>,
    summaries: RefCell<HashMap<String, String>>,
    saves: Cell<usize>,
}

impl InMemoryDocuments {
    pub fn new() -> Self {
        InMemoryDocuments::default()
    }

    /// Seed a page without counting it as a save
    pub fn insert(&self, name: &str, text: &str) {
        self.pages.borrow_mut().insert(name.to_string(), (text.to_string(), 1));
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.pages.borrow().get(name).map(|(text, _)| text.clone())
    }

    pub fn saves(&self) -> usize {
        self.saves.get()
    }

    /// Edit summary of the most recent save of `name`
    pub fn last_summary(&self, name: &str) -> Option<String> {
        self.summaries.borrow().get(name).cloned()
    }
}

impl DocumentStore for InMemoryDocuments {
    fn get_document(&self, name: &str) -> Result<RemoteDocument, ClientError> {
        Ok(match self.pages.borrow().get(name) {
            Some((text, revision)) => RemoteDocument {
                exists: true,
                text: Some(text.clone()),
                revision_id: Some(*revision),
            },
            None => RemoteDocument::missing(),
        })
    }

    fn save_document(&self, name: &str, text: &str, summary: &str) -> Result<(), ClientError> {
        let mut pages = self.pages.borrow_mut();
        let revision = pages.get(name).map_or(1, |(_, r)| r + 1);
        pages.insert(name.to_string(), (text.to_string(), revision));
        self.summaries.borrow_mut().insert(name.to_string(), summary.to_string());
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_links_and_deletes() {
        let kb = InMemoryKnowledgeBase::new();
        let p = PropertyId::new("P2046");
        let id = kb
            .create_entity(&[Statement::new(&p, Value::text("old"))], "create")
            .unwrap();
        let old = kb.statements(&id).remove(0);
        assert!(old.is_linked());

        kb.update_entity(&id, &[Statement::new(&p, Value::text("new"))], &[old], "update")
            .unwrap();

        let statements = kb.statements(&id);
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].value(), Some(&Value::text("new")));
        assert_eq!(kb.edits(), 2);
    }

    #[test]
    fn test_document_revisions_increase() {
        let docs = InMemoryDocuments::new();
        docs.save_document("Data:A.map", "{}", "first").unwrap();
        docs.save_document("Data:A.map", "{\"a\":1}", "second").unwrap();
        let document = docs.get_document("Data:A.map").unwrap();
        assert_eq!(document.revision_id, Some(2));
        assert_eq!(docs.saves(), 2);
        assert_eq!(docs.last_summary("Data:A.map").as_deref(), Some("second"));
    }
}
