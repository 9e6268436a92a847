//! Common test utilities for swap-harness integration tests

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swap_harness::polling::PollingConfig;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// Polling bounds short enough for tests.
#[allow(dead_code)]
pub fn fast_polling() -> PollingConfig {
    PollingConfig::default()
        .with_action_polling(Duration::from_millis(300), Duration::from_millis(20))
        .with_event_polling(Duration::from_millis(300), Duration::from_millis(20))
}

/// State of a swap served by [`FakeSwap`].
#[derive(Clone, Debug)]
pub struct SwapState {
    pub role: &'static str,
    pub alpha: &'static str,
    pub beta: &'static str,
    pub status: &'static str,
    pub actions: Vec<String>,
    pub events: Vec<String>,
}

/// A swap resource whose actions disappear once executed.
///
/// Executing an action optionally appends an event to the swap's event log,
/// which is how the daemon acknowledges a ledger transaction.
#[allow(dead_code)]
pub struct FakeSwap {
    pub href: String,
    pub state: Arc<Mutex<SwapState>>,
    pub calls: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl FakeSwap {
    /// Serve a swap at `/swaps/<id>` on `server`.
    pub async fn mount(server: &MockServer, id: &str, state: SwapState) -> Self {
        let href = format!("/swaps/{}", id);
        let state = Arc::new(Mutex::new(state));
        let calls = Arc::new(AtomicUsize::new(0));

        let swap_href = href.clone();
        let shared = state.clone();
        Mock::given(method("GET"))
            .and(path(href.clone()))
            .respond_with(move |_: &Request| {
                let state = shared.lock().unwrap().clone();
                ResponseTemplate::new(200).set_body_json(swap_json(&swap_href, &state))
            })
            .mount(server)
            .await;

        Self { href, state, calls }
    }

    /// Serve `POST <href>/<action>`, appending `event` to the log when called.
    pub async fn on_action(&self, server: &MockServer, action: &str, event: Option<&str>) {
        let state = self.state.clone();
        let calls = self.calls.clone();
        let name = action.to_string();
        let event = event.map(str::to_string);

        Mock::given(method("POST"))
            .and(path(format!("{}/{}", self.href, action)))
            .respond_with(move |_: &Request| {
                calls.fetch_add(1, Ordering::SeqCst);
                let mut state = state.lock().unwrap();
                state.actions.retain(|a| a != &name);
                if let Some(event) = &event {
                    state.events.push(event.clone());
                }
                ResponseTemplate::new(200)
            })
            .mount(server)
            .await;
    }

    /// Number of executed actions.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Replace the overall status.
    pub fn set_status(&self, status: &'static str) {
        self.state.lock().unwrap().status = status;
    }
}

/// A herc20 → hbit swap in progress offering `actions`.
#[allow(dead_code)]
pub fn herc20_hbit(role: &'static str, actions: &[&str]) -> SwapState {
    SwapState {
        role,
        alpha: "herc20",
        beta: "hbit",
        status: "IN_PROGRESS",
        actions: actions.iter().map(|a| a.to_string()).collect(),
        events: Vec::new(),
    }
}

/// Siren representation of a swap.
pub fn swap_json(href: &str, state: &SwapState) -> Value {
    let actions: Vec<Value> = state
        .actions
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "href": format!("{}/{}", href, name),
                "method": "POST",
                "fields": []
            })
        })
        .collect();
    let events: Vec<Value> = state.events.iter().map(|e| json!({ "name": e })).collect();

    json!({
        "class": ["swap"],
        "properties": {
            "role": state.role,
            "status": state.status,
            "alpha": { "protocol": state.alpha },
            "beta": { "protocol": state.beta },
            "events": events
        },
        "actions": actions,
        "links": [{ "rel": ["self"], "href": href }]
    })
}

/// Serve `GET /` for a daemon with `peer_id`.
#[allow(dead_code)]
pub async fn mount_root(server: &MockServer, peer_id: &str, address: &str) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": peer_id,
            "listen_addresses": [address]
        })))
        .mount(server)
        .await;
}
