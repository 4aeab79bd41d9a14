//! Request/response views handed to policies, and the actions they return.

use serde_json::Value;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

/// Header map with case-insensitive names.
///
/// Names are stored lowercased. Repeated headers are joined by the
/// interception layer before they reach the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: BTreeMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.inner
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.inner.remove(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.set(k, v);
        }
        headers
    }
}

/// Shared metadata that survives from the request phase to the response phase.
pub type Metadata = HashMap<String, Value>;

/// The request as seen by policies.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub route_key: String,
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub authority: String,
    pub scheme: String,
    pub headers: Headers,
    /// Present only when the route requires the request body.
    pub body: Option<Vec<u8>>,
    pub metadata: Metadata,
}

impl RequestContext {
    pub fn new(route_key: impl Into<String>, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            route_key: route_key.into(),
            method: method.into(),
            path: path.into(),
            scheme: "https".to_string(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// The upstream response as seen by policies, with the originating request.
#[derive(Debug, Clone, Default)]
pub struct ResponseContext {
    pub request: RequestContext,
    pub status: u16,
    pub headers: Headers,
    /// Present only when the route requires the response body.
    pub body: Option<Vec<u8>>,
}

impl ResponseContext {
    pub fn new(request: RequestContext, status: u16) -> Self {
        Self {
            request,
            status,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Field lookup used by execution conditions.
pub trait ConditionContext {
    fn request(&self) -> &RequestContext;

    fn response_status(&self) -> Option<u16> {
        None
    }

    fn response_header(&self, _name: &str) -> Option<&str> {
        None
    }

    fn metadata_value(&self, key: &str) -> Option<Cow<'_, str>> {
        self.request().metadata.get(key).map(|value| match value {
            Value::String(s) => Cow::Borrowed(s.as_str()),
            other => Cow::Owned(other.to_string()),
        })
    }
}

impl ConditionContext for RequestContext {
    fn request(&self) -> &RequestContext {
        self
    }
}

impl ConditionContext for ResponseContext {
    fn request(&self) -> &RequestContext {
        &self.request
    }

    fn response_status(&self) -> Option<u16> {
        Some(self.status)
    }

    fn response_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

/// Changes a policy asks to make to the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMutation {
    pub set_headers: Vec<(String, String)>,
    pub remove_headers: Vec<String>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl RequestMutation {
    pub fn set_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_headers.push((name.into(), value.into()));
        self
    }

    pub fn remove_header(mut self, name: impl Into<String>) -> Self {
        self.remove_headers.push(name.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Apply to `ctx`. Removals run before additions.
    pub fn apply(&self, ctx: &mut RequestContext) {
        for name in &self.remove_headers {
            ctx.headers.remove(name);
        }
        for (name, value) in &self.set_headers {
            ctx.headers.set(name, value.clone());
        }
        if let Some(path) = &self.path {
            ctx.path = path.clone();
        }
        if let Some(method) = &self.method {
            ctx.method = method.clone();
        }
        if let Some(body) = &self.body {
            ctx.body = Some(body.clone());
        }
    }
}

/// Changes a policy asks to make to the response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMutation {
    pub set_headers: Vec<(String, String)>,
    pub remove_headers: Vec<String>,
    pub status: Option<u16>,
    pub body: Option<Vec<u8>>,
}

impl ResponseMutation {
    pub fn set_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_headers.push((name.into(), value.into()));
        self
    }

    pub fn remove_header(mut self, name: impl Into<String>) -> Self {
        self.remove_headers.push(name.into());
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn apply(&self, ctx: &mut ResponseContext) {
        for name in &self.remove_headers {
            ctx.headers.remove(name);
        }
        for (name, value) in &self.set_headers {
            ctx.headers.set(name, value.clone());
        }
        if let Some(status) = self.status {
            ctx.status = status;
        }
        if let Some(body) = &self.body {
            ctx.body = Some(body.clone());
        }
    }
}

/// A response returned directly to the client, ending the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmediateResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ImmediateResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Result of a policy's request phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestAction {
    Continue,
    Mutate(RequestMutation),
    ImmediateResponse(ImmediateResponse),
}

/// Result of a policy's response phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseAction {
    Continue,
    Mutate(ResponseMutation),
}
