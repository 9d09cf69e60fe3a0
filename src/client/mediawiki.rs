// 📄 MediaWiki document store (Commons Data: pages)

use super::http::ApiClient;
use super::{DocumentStore, RemoteDocument};
use crate::error::ClientError;
use serde_json::Value as Json;
use tracing::debug;

pub struct MediaWikiDocuments {
    api: ApiClient,
}

impl MediaWikiDocuments {
    pub fn new(api: ApiClient) -> Self {
        MediaWikiDocuments { api }
    }
}

impl DocumentStore for MediaWikiDocuments {
    fn get_document(&self, name: &str) -> Result<RemoteDocument, ClientError> {
        let body = self.api.get(&[
            ("action", "query"),
            ("prop", "revisions"),
            ("rvprop", "ids|content"),
            ("rvslots", "main"),
            ("titles", name),
        ])?;
        Ok(parse_revision(&body))
    }

    fn save_document(&self, name: &str, text: &str, summary: &str) -> Result<(), ClientError> {
        debug!("Saving {} ({} bytes)", name, text.len());
        let body = self.api.post(&[
            ("action", "edit"),
            ("title", name),
            ("text", text),
            ("summary", summary),
            ("bot", "1"),
        ])?;

        match body.pointer("/edit/result").and_then(Json::as_str) {
            Some("Success") => Ok(()),
            other => Err(ClientError::Api {
                code: "editfailed".to_string(),
                info: format!("edit of {} returned {:?}", name, other),
            }),
        }
    }
}

/// formatversion=2 query response → RemoteDocument
fn parse_revision(body: &Json) -> RemoteDocument {
    let Some(page) = body.pointer("/query/pages/0") else {
        return RemoteDocument::missing();
    };
    if page.get("missing").and_then(Json::as_bool).unwrap_or(false) {
        return RemoteDocument::missing();
    }

    let revision = page.pointer("/revisions/0");
    RemoteDocument {
        exists: revision.is_some(),
        text: revision
            .and_then(|r| r.pointer("/slots/main/content"))
            .and_then(Json::as_str)
            .map(String::from),
        revision_id: revision.and_then(|r| r.get("revid")).and_then(Json::as_u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_existing_revision() {
        let body = json!({"query": {"pages": [{
            "pageid": 1, "title": "Data:Naturvårdsregistret/2001234.map",
            "revisions": [{"revid": 4242, "slots": {"main": {"content": "{\"zoom\":12}"}}}]
        }]}});
        let document = parse_revision(&body);
        assert!(document.exists);
        assert_eq!(document.revision_id, Some(4242));
        assert_eq!(document.text.as_deref(), Some("{\"zoom\":12}"));
    }

    #[test]
    fn test_parse_missing_page() {
        let body = json!({"query": {"pages": [{"title": "Data:Nope.map", "missing": true}]}});
        assert_eq!(parse_revision(&body), RemoteDocument::missing());
    }
}
