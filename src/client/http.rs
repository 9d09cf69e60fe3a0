// 🔌 MediaWiki Action API transport
//
// Shared by the knowledge base and the document store: both speak the same
// api.php dialect (format=json, `error` objects, CSRF tokens for writes).
// Blocking, one request at a time; no retries at this layer.

use crate::error::ClientError;
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::Value as Json;
use std::cell::RefCell;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT_SECS: u64 = 60;

pub struct ApiClient {
    http: Client,
    api_url: String,
    access_token: Option<String>,
    csrf_token: RefCell<Option<String>>,
}

impl ApiClient {
    pub fn new(api_url: &str, user_agent: &str, access_token: Option<String>) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(user_agent)
            .build()?;

        Ok(ApiClient {
            http,
            api_url: api_url.to_string(),
            access_token,
            csrf_token: RefCell::new(None),
        })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// GET api.php with `params`, returning the decoded body
    pub fn get(&self, params: &[(&str, &str)]) -> Result<Json, ClientError> {
        debug!("GET {} action={:?}", self.api_url, action_of(params));
        let request = self
            .http
            .get(&self.api_url)
            .query(&[("format", "json"), ("formatversion", "2")])
            .query(params);
        send(self.authorized(request))
    }

    /// POST api.php with `params` plus a CSRF token
    pub fn post(&self, params: &[(&str, &str)]) -> Result<Json, ClientError> {
        let token = self.csrf_token()?;
        debug!("POST {} action={:?}", self.api_url, action_of(params));

        let mut form: Vec<(&str, &str)> = vec![("format", "json"), ("formatversion", "2"), ("token", token.as_str())];
        form.extend_from_slice(params);
        let request = self.http.post(&self.api_url).form(&form);
        send(self.authorized(request))
    }

    fn csrf_token(&self) -> Result<String, ClientError> {
        if let Some(token) = self.csrf_token.borrow().as_ref() {
            return Ok(token.clone());
        }

        let body = self.get(&[("action", "query"), ("meta", "tokens"), ("type", "csrf")])?;
        let token = body
            .pointer("/query/tokens/csrftoken")
            .and_then(Json::as_str)
            .ok_or_else(|| ClientError::Parse("no csrf token in response".to_string()))?
            .to_string();

        *self.csrf_token.borrow_mut() = Some(token.clone());
        Ok(token)
    }
}

fn action_of<'p>(params: &[(&str, &'p str)]) -> Option<&'p str> {
    params.iter().find(|(k, _)| *k == "action").map(|(_, v)| *v)
}

/// Send, check the HTTP status and the API-level `error` object
pub(crate) fn send(request: RequestBuilder) -> Result<Json, ClientError> {
    let response = request.send()?;
    let status = response.status();
    let body = response.text()?;

    if !status.is_success() {
        return Err(ClientError::Http {
            status: status.as_u16(),
            body,
        });
    }

    let json: Json = serde_json::from_str(&body).map_err(|e| ClientError::Parse(e.to_string()))?;
    api_error(&json).map_or(Ok(json), Err)
}

/// `{"error": {"code": .., "info": ..}}` → ClientError::Api
pub(crate) fn api_error(body: &Json) -> Option<ClientError> {
    let error = body.get("error")?;
    Some(ClientError::Api {
        code: error.get("code").and_then(Json::as_str).unwrap_or("unknown").to_string(),
        info: error
            .get("info")
            .or_else(|| error.get("text"))
            .and_then(Json::as_str)
            .unwrap_or("")
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_error_is_detected() {
        let err = api_error(&json!({"error": {"code": "badtoken", "info": "Invalid CSRF token."}})).unwrap();
        assert_eq!(err.to_string(), "remote API error badtoken: Invalid CSRF token.");
        assert!(api_error(&json!({"query": {}})).is_none());
    }

    #[test]
    fn test_action_lookup() {
        assert_eq!(action_of(&[("titles", "X"), ("action", "query")]), Some("query"));
        assert_eq!(action_of(&[("titles", "X")]), None);
    }
}
