//! In-memory [`ArmClient`] for provider tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use carina_core::provider::BoxFuture;
use serde_json::{Value as Json, json};

use crate::arm::{ArmClient, ArmError, ArmResult};
use crate::expand::merge_body;

/// Scripted answer to a GET
#[derive(Debug, Clone)]
pub enum Reply {
    Body(Json),
    NotFound,
    Status(u16),
}

impl Reply {
    /// Body with `properties.provisioningState` (or run `status`) set
    pub fn state(key: &str, value: &str) -> Self {
        let mut properties = serde_json::Map::new();
        properties.insert(key.to_string(), Json::String(value.to_string()));
        Reply::Body(json!({ "properties": properties }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: &'static str,
    pub id: String,
    pub body: Option<Json>,
}

#[derive(Default)]
struct FakeState {
    resources: HashMap<String, Json>,
    scripted: HashMap<String, VecDeque<Reply>>,
    repeat: HashMap<String, Reply>,
    posts: HashMap<String, Json>,
    requests: Vec<Request>,
}

/// Stores PUT bodies and serves them back; GETs can be scripted per ID
///
/// Scripted replies are consumed first. A reply registered with
/// [`repeat_get`](Self::repeat_get) is returned forever after that, and
/// otherwise the stored resource is served.
#[derive(Default)]
pub struct FakeArmClient {
    state: Mutex<FakeState>,
}

fn key(id: &str) -> String {
    id.trim_end_matches('/').to_ascii_lowercase()
}

impl FakeArmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(self, id: &str, body: Json) -> Self {
        let mut body = body;
        merge_body(&mut body, json!({ "id": id }));
        self.state.lock().unwrap().resources.insert(key(id), body);
        self
    }

    pub fn script_get(self, id: &str, replies: Vec<Reply>) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(key(id))
            .or_default()
            .extend(replies);
        self
    }

    pub fn repeat_get(self, id: &str, reply: Reply) -> Self {
        self.state.lock().unwrap().repeat.insert(key(id), reply);
        self
    }

    pub fn with_post_response(self, id: &str, action: &str, body: Json) -> Self {
        self.state
            .lock()
            .unwrap()
            .posts
            .insert(key(&format!("{}/{}", id, action)), body);
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Requests other than GET, as `(method, id)`
    pub fn mutations(&self) -> Vec<(&'static str, String)> {
        self.requests()
            .into_iter()
            .filter(|r| r.method != "GET")
            .map(|r| (r.method, r.id))
            .collect()
    }

    pub fn count(&self, method: &str, id: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && key(&r.id) == key(id))
            .count()
    }

    pub fn stored(&self, id: &str) -> Option<Json> {
        self.state.lock().unwrap().resources.get(&key(id)).cloned()
    }

    fn record(&self, method: &'static str, id: &str, body: Option<Json>) {
        self.state.lock().unwrap().requests.push(Request {
            method,
            id: id.to_string(),
            body,
        });
    }
}

impl ArmClient for FakeArmClient {
    fn get(&self, id: &str, _api_version: &str) -> BoxFuture<'_, ArmResult<Option<Json>>> {
        self.record("GET", id, None);
        let mut state = self.state.lock().unwrap();
        let k = key(id);
        let scripted = state.scripted.get_mut(&k).and_then(VecDeque::pop_front);
        let reply = scripted.or_else(|| state.repeat.get(&k).cloned());
        let result = match reply {
            Some(Reply::Body(body)) => Ok(Some(body)),
            Some(Reply::NotFound) => Ok(None),
            Some(Reply::Status(status)) => Err(ArmError::Status {
                id: id.to_string(),
                status,
                code: "Scripted".to_string(),
                message: "scripted failure".to_string(),
            }),
            None => Ok(state.resources.get(&k).cloned()),
        };
        Box::pin(async move { result })
    }

    fn put(&self, id: &str, _api_version: &str, body: Json) -> BoxFuture<'_, ArmResult<Json>> {
        self.record("PUT", id, Some(body.clone()));
        let mut stored = body;
        merge_body(&mut stored, json!({ "id": id }));
        self.state
            .lock()
            .unwrap()
            .resources
            .insert(key(id), stored.clone());
        Box::pin(async move { Ok(stored) })
    }

    fn patch(&self, id: &str, _api_version: &str, body: Json) -> BoxFuture<'_, ArmResult<Json>> {
        self.record("PATCH", id, Some(body.clone()));
        let mut state = self.state.lock().unwrap();
        let result = match state.resources.get_mut(&key(id)) {
            Some(existing) => {
                merge_body(existing, body);
                Ok(existing.clone())
            }
            None => Err(ArmError::NotFound(id.to_string())),
        };
        Box::pin(async move { result })
    }

    fn delete(&self, id: &str, _api_version: &str) -> BoxFuture<'_, ArmResult<()>> {
        self.record("DELETE", id, None);
        self.state.lock().unwrap().resources.remove(&key(id));
        Box::pin(async move { Ok(()) })
    }

    fn post(
        &self,
        id: &str,
        action: &str,
        _api_version: &str,
        body: Json,
    ) -> BoxFuture<'_, ArmResult<Option<Json>>> {
        let path = format!("{}/{}", id, action);
        self.record("POST", &path, Some(body));
        let response = self.state.lock().unwrap().posts.get(&key(&path)).cloned();
        Box::pin(async move { Ok(response) })
    }
}
