// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for Redis.
//!
//! One container plays both roles: source documents, the change stream and
//! the anonymized target all live in the same Redis under different prefixes,
//! as they do with the default configuration.

use anonymization_engine::config::{CheckpointConfig, LiveConfig, ReindexConfig};
use anonymization_engine::{AnonymizerConfig, CheckpointBackend, Customer};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::path::Path;
use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

pub const STREAM_KEY: &str = "customers:changes";
pub const SOURCE_PREFIX: &str = "customers:";
pub const TARGET_PREFIX: &str = "customers_anonymised:";

/// Create a vanilla Redis container (streams-compatible).
///
/// Uses official redis:7 image. Waits for "Ready to accept connections".
pub fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

/// Get the Redis URL for a container.
pub fn redis_url(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(6379);
    format!("redis://127.0.0.1:{}", port)
}

/// A Redis container acting as source and target.
pub struct TestRedis<'a> {
    #[allow(dead_code)] // Kept alive for container lifetime
    container: Container<'a, GenericImage>,
    pub url: String,
}

impl<'a> TestRedis<'a> {
    pub fn new(docker: &'a Cli) -> Self {
        let container = redis_container(docker);
        let url = redis_url(&container);
        Self { container, url }
    }

    pub async fn conn(&self) -> ConnectionManager {
        let client = redis::Client::open(self.url.as_str()).unwrap();
        ConnectionManager::new(client).await.unwrap()
    }

    /// Store a source document, the way the source application would.
    pub async fn put_customer(&self, customer: &Customer) {
        let mut conn = self.conn().await;
        let json = customer.to_json().unwrap();
        let _: () = conn
            .set(format!("{}{}", SOURCE_PREFIX, customer.id), json)
            .await
            .unwrap();
    }

    /// Store raw bytes as a source document.
    pub async fn put_raw(&self, id: &str, payload: &str) {
        let mut conn = self.conn().await;
        let _: () = conn.set(format!("{}{}", SOURCE_PREFIX, id), payload).await.unwrap();
    }

    pub async fn delete_customer(&self, id: &str) {
        let mut conn = self.conn().await;
        let _: () = conn.del(format!("{}{}", SOURCE_PREFIX, id)).await.unwrap();
    }

    /// Append a change entry; returns its stream ID.
    pub async fn append_change(&self, op: &str, id: &str) -> String {
        let mut conn = self.conn().await;
        conn.xadd(STREAM_KEY, "*", &[("op", op), ("id", id)])
            .await
            .unwrap()
    }

    /// Store the document and append an insert for it.
    pub async fn insert_customer(&self, customer: &Customer) -> String {
        self.put_customer(customer).await;
        self.append_change("insert", &customer.id).await
    }

    /// Trim the stream so that only entries at or after `min_id` remain.
    pub async fn trim_stream_before(&self, min_id: &str) {
        let mut conn = self.conn().await;
        let _: i64 = redis::cmd("XTRIM")
            .arg(STREAM_KEY)
            .arg("MINID")
            .arg(min_id)
            .query_async(&mut conn)
            .await
            .unwrap();
    }

    pub async fn get_anonymized(&self, id: &str) -> Option<Customer> {
        let mut conn = self.conn().await;
        let raw: Option<String> = conn.get(format!("{}{}", TARGET_PREFIX, id)).await.unwrap();
        raw.map(|json| Customer::from_json(id, json.as_bytes()).unwrap())
    }

    /// Number of documents in the target collection.
    pub async fn anonymized_count(&self) -> usize {
        let mut conn = self.conn().await;
        let keys: Vec<String> = conn.keys(format!("{}*", TARGET_PREFIX)).await.unwrap();
        keys.len()
    }

    /// Engine configuration pointing at this container, with fast timers and
    /// a SQLite checkpoint under `dir`.
    pub fn config(&self, dir: &Path) -> AnonymizerConfig {
        let mut config = AnonymizerConfig::default().with_redis_url(&self.url);
        config.live = LiveConfig::testing();
        config.reindex = ReindexConfig {
            batch_size: 50,
            scan_count: 20,
        };
        config.checkpoint = CheckpointConfig {
            backend: CheckpointBackend::Sqlite,
            path: dir.join("checkpoint.db").to_string_lossy().into_owned(),
            name: "customers".to_string(),
        };
        config
    }
}
