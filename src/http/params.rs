//! Request parameter collection
//!
//! Signatures cover the full parameter mapping regardless of where the
//! parameters traveled, so query string, urlencoded body and multipart text
//! fields are folded into one sorted map. A multipart `file` part is kept
//! aside as raw bytes.

use std::collections::BTreeMap;

use axum::extract::{FromRequest, Multipart, Query, Request};
use axum::http::header::CONTENT_TYPE;
use axum::Form;
use bytes::Bytes;

pub struct Params {
    map: BTreeMap<String, String>,
    pub file: Option<Bytes>,
}

impl Params {
    /// Gather parameters from the query string and the body
    pub async fn collect(req: Request) -> Result<Self, String> {
        let mut map = BTreeMap::new();

        if let Ok(Query(query)) = Query::<BTreeMap<String, String>>::try_from_uri(req.uri()) {
            map.extend(query);
        }

        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let mut file = None;
        if content_type.starts_with("multipart/form-data") {
            let mut multipart = Multipart::from_request(req, &())
                .await
                .map_err(|e| e.to_string())?;
            while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
                let name = field.name().unwrap_or_default().to_string();
                if name == "file" {
                    file = Some(field.bytes().await.map_err(|e| e.to_string())?);
                } else {
                    let value = field.text().await.map_err(|e| e.to_string())?;
                    map.insert(name, value);
                }
            }
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(form) = Form::<BTreeMap<String, String>>::from_request(req, &())
                .await
                .map_err(|e| e.to_string())?;
            map.extend(form);
        }

        Ok(Self { map, file })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// A boolean flag: `1` or `true` means set
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("1") | Some("true"))
    }

    /// An optional integer parameter; a malformed value is an error
    pub fn integer(&self, key: &str) -> Result<Option<i64>, String> {
        match self.get(key) {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|_| format!("{} must be an integer", key)),
        }
    }

    /// The sorted parameter mapping, as consumed by signing
    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.map
    }

    /// JSON rendering of the mapping for the request audit row
    pub fn json(&self) -> String {
        serde_json::to_string(&self.map).unwrap_or_default()
    }

    #[cfg(test)]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            map: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            file: None,
        }
    }
}
