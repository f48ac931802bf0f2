//! Shared doubles for the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use keyward::broker::{Broker, BrokerConfig, ConsentPrompt, ConsentSurface, SurfaceHandle};
use keyward::crypto::SecretKey;
use keyward::storage::{KeyValueStore, MemoryStore, PRIVATE_KEY_KEY};
use keyward::types::{BrokerError, Result};

pub const SECRET: &str = "0000000000000000000000000000000000000000000000000000000000000001";
pub const PUBKEY: &str = "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

/// Surface that records every prompt and every dismissal
pub struct RecordingSurface {
    prompts: mpsc::UnboundedSender<ConsentPrompt>,
    opened: Mutex<Vec<ConsentPrompt>>,
    closed: Mutex<Vec<SurfaceHandle>>,
    fail_open: bool,
}

impl RecordingSurface {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ConsentPrompt>) {
        Self::build(false)
    }

    pub fn failing() -> (Arc<Self>, mpsc::UnboundedReceiver<ConsentPrompt>) {
        Self::build(true)
    }

    fn build(fail_open: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<ConsentPrompt>) {
        let (prompts, rx) = mpsc::unbounded_channel();
        let surface = Self {
            prompts,
            opened: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            fail_open,
        };
        (Arc::new(surface), rx)
    }

    pub fn opened(&self) -> Vec<ConsentPrompt> {
        self.opened.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<SurfaceHandle> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConsentSurface for RecordingSurface {
    async fn open(&self, prompt: &ConsentPrompt) -> Result<SurfaceHandle> {
        if self.fail_open {
            return Err(BrokerError::Surface("no display".into()));
        }
        self.opened.lock().unwrap().push(prompt.clone());
        let _ = self.prompts.send(prompt.clone());
        Ok(SurfaceHandle::new(format!("window-{}", prompt.id)))
    }

    fn close(&self, handle: &SurfaceHandle) {
        self.closed.lock().unwrap().push(handle.clone());
    }
}

/// Memory store that counts reads of the private key
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    key_reads: AtomicUsize,
}

impl CountingStore {
    pub fn key_reads(&self) -> usize {
        self.key_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if key == PRIVATE_KEY_KEY {
            self.key_reads.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key).await
    }
}

pub struct Harness {
    pub broker: Arc<Broker>,
    pub store: Arc<CountingStore>,
    pub surface: Arc<RecordingSurface>,
    pub prompts: mpsc::UnboundedReceiver<ConsentPrompt>,
}

pub async fn harness(config: BrokerConfig) -> Harness {
    let (surface, prompts) = RecordingSurface::new();
    harness_with(surface, prompts, config, true).await
}

pub async fn harness_with(
    surface: Arc<RecordingSurface>,
    prompts: mpsc::UnboundedReceiver<ConsentPrompt>,
    config: BrokerConfig,
    with_key: bool,
) -> Harness {
    let store = Arc::new(CountingStore::default());
    let broker = Broker::new(store.clone(), surface.clone(), config);
    if with_key {
        broker
            .keys()
            .set_private_key(&SecretKey::from_hex(SECRET).unwrap())
            .await
            .unwrap();
    }
    Harness {
        broker: Arc::new(broker),
        store,
        surface,
        prompts,
    }
}
