//! In-process backend for tests and dry runs.

use super::backend::{InfraBackend, QueueState, SubscriptionState};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
struct State {
    databases: BTreeMap<String, Vec<String>>,
    document_databases: BTreeSet<String>,
    scripts: Vec<(String, String)>,
    queues: BTreeMap<String, QueueState>,
    topics: BTreeMap<String, Vec<SubscriptionState>>,
    buckets: BTreeSet<String>,
    failing_migrations: BTreeSet<String>,
    failing_seeds: bool,
    tunnel_url: Option<String>,
    creates: usize,
}

/// Keeps every resource in memory. Failures and pre-existing resources can
/// be injected to exercise conflict and error paths.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a queue already exists, optionally with a redrive policy.
    pub fn with_queue(self, name: &str, redrive_target: Option<&str>) -> Self {
        self.state.lock().queues.insert(
            name.to_string(),
            QueueState {
                redrive_target: redrive_target.map(str::to_string),
            },
        );
        self
    }

    /// Pretend a topic already has this subscription.
    pub fn with_subscription(self, topic: &str, subscription: SubscriptionState) -> Self {
        self.state
            .lock()
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(subscription);
        self
    }

    pub fn with_database(self, name: &str) -> Self {
        self.state
            .lock()
            .databases
            .insert(name.to_string(), Vec::new());
        self
    }

    /// Make the migration file with this name fail.
    pub fn failing_migration(self, name: &str) -> Self {
        self.state
            .lock()
            .failing_migrations
            .insert(name.to_string());
        self
    }

    pub fn failing_seeds(self) -> Self {
        self.state.lock().failing_seeds = true;
        self
    }

    pub fn with_tunnel_url(self, url: &str) -> Self {
        self.state.lock().tunnel_url = Some(url.to_string());
        self
    }

    pub fn queues(&self) -> Vec<String> {
        self.state.lock().queues.keys().cloned().collect()
    }

    pub fn queue_state(&self, name: &str) -> Option<QueueState> {
        self.state.lock().queues.get(name).cloned()
    }

    pub fn databases(&self) -> Vec<String> {
        self.state.lock().databases.keys().cloned().collect()
    }

    pub fn migrations(&self, database: &str) -> Vec<String> {
        self.state
            .lock()
            .databases
            .get(database)
            .cloned()
            .unwrap_or_default()
    }

    /// Scripts run against a database (seeds), in order.
    pub fn scripts(&self, database: &str) -> Vec<String> {
        self.state
            .lock()
            .scripts
            .iter()
            .filter(|(db, _)| db == database)
            .map(|(_, script)| script.clone())
            .collect()
    }

    pub fn subscriptions_of(&self, topic: &str) -> Vec<SubscriptionState> {
        self.state
            .lock()
            .topics
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    pub fn buckets(&self) -> Vec<String> {
        self.state.lock().buckets.iter().cloned().collect()
    }

    /// Number of create calls of any kind.
    pub fn creates(&self) -> usize {
        self.state.lock().creates
    }

    fn seed(&self, database: &str, script: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing_seeds {
            return Err(Error::Seed {
                database: database.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        state
            .scripts
            .push((database.to_string(), script.to_string()));
        Ok(())
    }
}

/// Topic name from an ARN or a bare name.
fn topic_key(topic: &str) -> &str {
    topic.rsplit(':').next().unwrap_or(topic)
}

#[async_trait]
impl InfraBackend for MemoryBackend {
    async fn database_exists(&self, database: &str) -> Result<bool> {
        Ok(self.state.lock().databases.contains_key(database))
    }

    async fn create_database(&self, database: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.creates += 1;
        state.databases.insert(database.to_string(), Vec::new());
        Ok(())
    }

    async fn applied_migrations(&self, database: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .state
            .lock()
            .databases
            .get(database)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn apply_migration(&self, database: &str, name: &str, _sql: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing_migrations.contains(name) {
            return Err(Error::Migration {
                database: database.to_string(),
                migration: name.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        state
            .databases
            .entry(database.to_string())
            .or_default()
            .push(name.to_string());
        Ok(())
    }

    async fn run_sql(&self, database: &str, sql: &str) -> Result<()> {
        self.seed(database, sql)
    }

    async fn document_database_exists(&self, database: &str) -> Result<bool> {
        Ok(self.state.lock().document_databases.contains(database))
    }

    async fn create_document_database(&self, database: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.creates += 1;
        state.document_databases.insert(database.to_string());
        Ok(())
    }

    async fn run_document_script(&self, database: &str, script: &str) -> Result<()> {
        self.seed(database, script)
    }

    async fn queue(&self, name: &str) -> Result<Option<QueueState>> {
        Ok(self.state.lock().queues.get(name).cloned())
    }

    async fn create_queue(&self, name: &str, redrive_target: Option<&str>) -> Result<()> {
        let mut state = self.state.lock();
        state.creates += 1;
        state.queues.insert(
            name.to_string(),
            QueueState {
                redrive_target: redrive_target.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn topic_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().topics.contains_key(name))
    }

    async fn create_topic(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.creates += 1;
        state.topics.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn subscriptions(&self, topic_arn: &str) -> Result<Vec<SubscriptionState>> {
        Ok(self.subscriptions_of(topic_key(topic_arn)))
    }

    async fn subscribe(
        &self,
        topic_arn: &str,
        protocol: &str,
        endpoint: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.creates += 1;
        state
            .topics
            .entry(topic_key(topic_arn).to_string())
            .or_default()
            .push(SubscriptionState {
                protocol: protocol.to_string(),
                endpoint: endpoint.to_string(),
                attributes: attributes.clone(),
            });
        Ok(())
    }

    async fn bucket_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().buckets.contains(name))
    }

    async fn create_bucket(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.creates += 1;
        state.buckets.insert(name.to_string());
        Ok(())
    }

    async fn tunnel_url(&self, _api_url: &str) -> Result<Option<String>> {
        Ok(self.state.lock().tunnel_url.clone())
    }
}
