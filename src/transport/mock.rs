//! Scripted in-memory broker for engine tests.

use super::{Session, Transport};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
pub(crate) struct MockBroker {
    posts: Mutex<Vec<(String, Value)>>,
    gets: Mutex<Vec<String>>,
    replies: Mutex<HashMap<String, VecDeque<Value>>>,
    post_replies: Mutex<HashMap<String, Value>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a GET reply. Once the queue for an endpoint is drained the
    /// endpoint answers with an empty list under its usual field.
    pub fn queue(&self, endpoint: &str, reply: Value) {
        self.replies
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn reply_to_post(&self, endpoint: &str, reply: Value) {
        self.post_replies
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), reply);
    }

    /// Makes every call to `endpoint` fail. `"connect"` and `"disconnect"`
    /// control the session calls.
    pub fn fail(&self, endpoint: &str) {
        self.failing.lock().unwrap().insert(endpoint.to_string());
    }

    pub fn posts(&self) -> Vec<(String, Value)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn posts_to(&self, endpoint: &str) -> Vec<Value> {
        self.posts()
            .into_iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, v)| v)
            .collect()
    }

    pub fn gets(&self) -> Vec<String> {
        self.gets.lock().unwrap().clone()
    }

    /// Every call in order, as `"GET <endpoint>"`, `"POST <endpoint>"`,
    /// `"connect"` or `"disconnect"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn check(&self, key: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(key) {
            return Err(anyhow!("mock broker rejected '{}'", key));
        }
        Ok(())
    }
}

fn empty_reply(endpoint: &str) -> Value {
    match endpoint {
        "plugin/message/list" => json!({"messages": []}),
        "plugin/transaction/list" => json!({"transactions": []}),
        "plugin/subscription/list" => json!({"subscriptions": []}),
        "response/list" => json!({"responses": []}),
        _ => json!({}),
    }
}

#[async_trait]
impl Transport for MockBroker {
    async fn post(&self, endpoint: &str, payload: Value) -> Result<Value> {
        self.calls.lock().unwrap().push(format!("POST {}", endpoint));
        self.check(endpoint)?;
        self.posts
            .lock()
            .unwrap()
            .push((endpoint.to_string(), payload));
        Ok(self
            .post_replies
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .unwrap_or_else(|| json!({})))
    }

    async fn get(&self, endpoint: &str) -> Result<Value> {
        self.calls.lock().unwrap().push(format!("GET {}", endpoint));
        self.check(endpoint)?;
        self.gets.lock().unwrap().push(endpoint.to_string());
        let queued = self
            .replies
            .lock()
            .unwrap()
            .get_mut(endpoint)
            .and_then(VecDeque::pop_front);
        Ok(queued.unwrap_or_else(|| empty_reply(endpoint)))
    }
}

#[async_trait]
impl Session for MockBroker {
    async fn connect(&self) -> Result<()> {
        self.calls.lock().unwrap().push("connect".to_string());
        self.check("connect")
    }

    async fn disconnect(&self) -> Result<()> {
        self.calls.lock().unwrap().push("disconnect".to_string());
        self.check("disconnect")
    }
}
