use crate::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};

/// Name of the bookkeeping table recording applied migration files.
pub const MIGRATIONS_TABLE: &str = "devup_schema_migrations";

/// Existing queue as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueState {
    /// ARN of the dead-letter target from the redrive policy, if any.
    pub redrive_target: Option<String>,
}

/// Existing subscription. `attributes` holds only the settable delivery
/// attributes that differ from their defaults.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionState {
    pub protocol: String,
    pub endpoint: String,
    pub attributes: BTreeMap<String, String>,
}

/// Low-level primitives against the infrastructure engines. The
/// provisioner builds idempotence and conflict detection on top.
#[async_trait]
pub trait InfraBackend: Send + Sync {
    async fn database_exists(&self, database: &str) -> Result<bool>;
    async fn create_database(&self, database: &str) -> Result<()>;
    /// Names of migration files already recorded in `MIGRATIONS_TABLE`.
    async fn applied_migrations(&self, database: &str) -> Result<BTreeSet<String>>;
    /// Apply one migration and record it, in a single transaction.
    async fn apply_migration(&self, database: &str, name: &str, sql: &str) -> Result<()>;
    async fn run_sql(&self, database: &str, sql: &str) -> Result<()>;

    async fn document_database_exists(&self, database: &str) -> Result<bool>;
    async fn create_document_database(&self, database: &str) -> Result<()>;
    async fn run_document_script(&self, database: &str, script: &str) -> Result<()>;

    async fn queue(&self, name: &str) -> Result<Option<QueueState>>;
    async fn create_queue(&self, name: &str, redrive_target: Option<&str>) -> Result<()>;

    async fn topic_exists(&self, name: &str) -> Result<bool>;
    async fn create_topic(&self, name: &str) -> Result<()>;
    async fn subscriptions(&self, topic_arn: &str) -> Result<Vec<SubscriptionState>>;
    async fn subscribe(
        &self,
        topic_arn: &str,
        protocol: &str,
        endpoint: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()>;

    async fn bucket_exists(&self, name: &str) -> Result<bool>;
    async fn create_bucket(&self, name: &str) -> Result<()>;

    /// Public URL reported by the tunnel agent's local API, once established.
    async fn tunnel_url(&self, api_url: &str) -> Result<Option<String>>;
}
