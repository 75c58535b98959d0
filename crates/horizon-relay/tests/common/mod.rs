//! Shared fixtures for the client integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use horizon_relay::transport::{MemoryPeer, MemoryServer};
use horizon_relay::{ClientConfig, ReconnectConfig, RelayClient, Signal};
use parking_lot::Mutex;
use tokio::time::Instant;

pub const URL: &str = "ws://relay.test/socket";

/// A config with deterministic reconnect delays and no heartbeat.
pub fn quiet_config() -> ClientConfig {
    ClientConfig::new(URL)
        .no_heartbeat()
        .reconnect_config(
            ReconnectConfig::new()
                .jitter(false)
                .initial_delay(Duration::from_millis(100)),
        )
}

/// Every emission of a signal, with the time it happened.
pub struct Recorder<T> {
    entries: Arc<Mutex<Vec<(Instant, T)>>>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn attach(signal: &Signal<T>) -> Self {
        let entries = Arc::new(Mutex::new(Vec::new()));
        let sink = entries.clone();
        signal.connect(move |value: &T| sink.lock().push((Instant::now(), value.clone())));
        Self { entries }
    }

    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn values(&self) -> Vec<T> {
        self.entries.lock().iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn times(&self) -> Vec<Instant> {
        self.entries.lock().iter().map(|(at, _)| *at).collect()
    }
}

/// Open a client against `server` and hand back the server side too.
pub async fn connected(server: &mut MemoryServer, config: ClientConfig) -> (RelayClient, MemoryPeer) {
    let client = RelayClient::with_connector(config, server.connector()).unwrap();
    client.connect().await.unwrap();
    let peer = server.accept().await.unwrap();
    (client, peer)
}

/// Let the connection task catch up on everything already queued.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
