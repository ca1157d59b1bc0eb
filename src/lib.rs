#![allow(unused_assignments)]

//! # devup
//!
//! Brings up a local development stack from per-service manifests.
//!
//! ## Features
//!
//! - **Dependency Graph**: services, infrastructure engines and the resources
//!   inside them, leveled for startup with cycle detection
//! - **Reference Resolution**: `${postgres.host}`, `${sqs.orders.dlq}` and
//!   friends substituted into each service's environment
//! - **Idempotent Provisioning**: databases, migrations, seeds, queues with
//!   dead-letter queues, topics with subscriptions and buckets
//! - **Deterministic Composition**: one compose document for the whole stack
//! - **Health Gating**: a dependent starts only once its dependencies are
//!   healthy; failures name the node that caused them
//!
//! ## Quick Start
//!
//! ```no_run
//! use devup::{ComposeRuntime, EnvSecretStore, Parser, Stack, UpOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), devup::Error> {
//! let registry = Parser::new().load_registry("devup.yaml")?;
//! let runtime = ComposeRuntime::new(registry.settings.project(), registry.compose_path());
//! let secrets = EnvSecretStore::load(&registry.root_dir);
//!
//! let stack = Stack::new(registry, Arc::new(runtime), Arc::new(secrets));
//! let summary = stack.up(&UpOptions::default()).await?;
//! summary.outcome()?;
//! # Ok(())
//! # }
//! ```

pub mod compose;
pub mod config;
pub mod dependency;
pub mod error;
pub mod healthcheck;
pub mod orchestrator;
pub mod provision;
pub mod resolve;
pub mod runtime;
pub mod stack;

// Re-export commonly used types
pub use config::{Parser, Registry, ServiceManifest};
pub use error::{Error, Result};
pub use orchestrator::{NodeState, Orchestrator};
pub use resolve::{EnvSecretStore, SecretStore};
pub use runtime::{ComposeRuntime, ContainerRuntime};
pub use stack::{Stack, StatusEntry, UpOptions, UpSummary};
