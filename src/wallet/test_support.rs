//! Shared fixtures for wallet tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::{EndpointConfig, NetworkKind, ProviderKind, WalletConfig};
use crate::explorer::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::explorer::{ExplorerApi, ResilientClient};

pub const BASE: &str = "http://node.test/api";

/// Routes by "METHOD url"; the last queued response for a route repeats.
#[derive(Default)]
pub struct Router {
    routes: Mutex<HashMap<String, VecDeque<(u16, String)>>>,
    hits: Mutex<Vec<String>>,
}

impl Router {
    pub fn on(&self, method: &str, path: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .entry(format!("{} {}{}", method, BASE, path))
            .or_default()
            .push_back((status, body.to_string()));
    }

    pub fn hits(&self, method: &str, path: &str) -> usize {
        let key = format!("{} {}{}", method, BASE, path);
        self.hits.lock().unwrap().iter().filter(|h| **h == key).count()
    }
}

#[async_trait]
impl HttpTransport for Router {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let key = format!("{} {}", request.method, request.url);
        self.hits.lock().unwrap().push(key.clone());
        let mut routes = self.routes.lock().unwrap();
        let queue = routes
            .get_mut(&key)
            .ok_or_else(|| TransportError(format!("no route for {}", key)))?;
        let (status, body) = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        };
        Ok(HttpResponse { status, body })
    }
}

pub fn test_config() -> WalletConfig {
    let mut config = WalletConfig::default();
    config.endpoints = vec![EndpointConfig {
        name: "node".into(),
        base_url: BASE.into(),
        timeout_ms: 5_000,
        priority: 1,
        provider: ProviderKind::Mempool,
    }];
    config.retries.critical.max_attempts = 1;
    config.retries.low.max_attempts = 1;
    config
}

pub fn explorer(router: Arc<Router>, config: &WalletConfig) -> ExplorerApi {
    let client = ResilientClient::new(config, router).unwrap();
    ExplorerApi::new(client, NetworkKind::Mainnet, config.cache.clone())
}
