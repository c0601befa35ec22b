// MIT License - Copyright (c) 2026 Peter Wright
// Remote attribute subscriptions and requests

//! Registry of attribute callbacks, fed by the broker transport.
//!
//! Updates arrive on the attributes topic as a JSON object; responses to
//! explicit requests arrive on `<response prefix><request id>`. A value may
//! be flat (`{"id_modelo_panel": 10002}`) or nested under a namespace
//! (`{"shared": {"id_modelo_panel": 10002}}`); both are accepted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::constants::ATTRIBUTE_NAMESPACES;
use crate::error::{BridgeError, Result};

/// Called on every update of a subscribed attribute.
pub type AttributeCallback = Arc<dyn Fn(Result<Value>) + Send + Sync>;

/// Called once with the values found in a request's response.
pub type ResponseCallback = Box<dyn FnOnce(Result<Map<String, Value>>) + Send>;

struct PendingRequest {
    names: Vec<String>,
    callback: ResponseCallback,
}

#[derive(Default)]
pub struct AttributeHub {
    subscriptions: Mutex<HashMap<String, Vec<AttributeCallback>>>,
    pending: Mutex<HashMap<u32, PendingRequest>>,
    next_request_id: AtomicU32,
}

impl std::fmt::Debug for AttributeHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeHub")
            .field("subscriptions", &self.subscribed_names())
            .field("pending", &self.pending_requests())
            .finish()
    }
}

impl AttributeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, name: impl Into<String>, callback: AttributeCallback) {
        let name = name.into();
        debug!("Subscribing to attribute {name}");
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name)
            .or_default()
            .push(callback);
    }

    pub fn subscribed_names(&self) -> Vec<String> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = subs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Register a one-shot request and return its id.
    pub fn register_request(&self, names: Vec<String>, callback: ResponseCallback) -> u32 {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, PendingRequest { names, callback });
        id
    }

    /// Drop a request that could not be sent, failing its callback.
    pub fn cancel_request(&self, id: u32, error: BridgeError) {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        if let Some(req) = pending {
            (req.callback)(Err(error));
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Handle a payload from the attributes topic.
    pub fn dispatch_update(&self, payload: &[u8]) {
        let object = match parse_object(payload) {
            Ok(object) => object,
            Err(e) => {
                warn!("Ignoring attribute update: {e}");
                return;
            }
        };

        // Callbacks run outside the lock so they may subscribe or request.
        let matched: Vec<(AttributeCallback, Value)> = {
            let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
            subs.iter()
                .filter_map(|(name, cbs)| find_value(&object, name).map(|v| (cbs, v)))
                .flat_map(|(cbs, v)| cbs.iter().map(move |cb| (Arc::clone(cb), v.clone())))
                .collect()
        };
        if matched.is_empty() {
            debug!("Attribute update with no subscribed keys");
        }
        for (callback, value) in matched {
            callback(Ok(value));
        }
    }

    /// Handle a payload from `<response prefix><id>`.
    pub fn dispatch_response(&self, id: u32, payload: &[u8]) {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        let Some(req) = pending else {
            debug!("Attribute response {id} matches no pending request");
            return;
        };

        let result = parse_object(payload).and_then(|object| {
            let found: Map<String, Value> = req
                .names
                .iter()
                .filter_map(|name| find_value(&object, name).map(|v| (name.clone(), v)))
                .collect();
            if found.is_empty() {
                Err(BridgeError::Attribute {
                    details: format!("response {id} has none of {:?}", req.names),
                })
            } else {
                Ok(found)
            }
        });
        (req.callback)(result);
    }
}

fn parse_object(payload: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(BridgeError::Attribute {
            details: format!("expected a JSON object, got {other}"),
        }),
        Err(e) => Err(BridgeError::Attribute {
            details: format!("invalid JSON: {e}"),
        }),
    }
}

/// Flat key first, then each namespace in turn.
fn find_value(object: &Map<String, Value>, name: &str) -> Option<Value> {
    if let Some(v) = object.get(name) {
        return Some(v.clone());
    }
    ATTRIBUTE_NAMESPACES
        .iter()
        .filter_map(|ns| object.get(*ns)?.as_object())
        .find_map(|nested| nested.get(name).cloned())
}
