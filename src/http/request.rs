//! Description of one logical upstream call.
//!
//! The executor rebuilds the HTTP request from a `RequestSpec` on every attempt so
//! each retry carries a fresh token and the same request ID.

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    /// Path relative to the executor's base URL.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub json: Option<Value>,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            json: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a JSON body. Serialization failures leave the body empty.
    pub fn json<T: Serialize>(mut self, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => self.json = Some(value),
            Err(e) => tracing::warn!(path = %self.path, error = %e, "Dropping unserializable request body"),
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_parts() {
        let spec = RequestSpec::get("api/v4/projects/7/repository/commits")
            .query("per_page", 100)
            .query("since", "2025-01-01T00:00:00Z")
            .header("Accept", "application/json");

        assert_eq!(spec.method, Method::GET);
        assert_eq!(spec.query.len(), 2);
        assert_eq!(spec.query[0], ("per_page".to_string(), "100".to_string()));
        assert!(spec.json.is_none());
    }

    #[test]
    fn json_body_is_stored() {
        let spec = RequestSpec::post("graphql").json(&serde_json::json!({"query": "{ x }"}));
        assert_eq!(spec.json.unwrap()["query"], "{ x }");
    }
}
