//! Provisioning through the engine containers' own CLIs (`psql`, `mongosh`,
//! `awslocal`), run with the runtime's exec facility.

use super::backend::{InfraBackend, QueueState, SubscriptionState, MIGRATIONS_TABLE};
use super::topic_arn;
use crate::dependency::{Engine, AWS_ACCOUNT_ID, POSTGRES_USER};
use crate::error::{Error, Result};
use crate::healthcheck::shared_client;
use crate::runtime::{ContainerRuntime, ExecOutput};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

const TUNNEL_API_TIMEOUT: Duration = Duration::from_secs(5);

/// Subscription attributes a manifest can set, with the value SNS reports
/// when they were left unset.
const SUBSCRIPTION_ATTRIBUTES: &[(&str, Option<&str>)] = &[
    ("DeliveryPolicy", None),
    ("FilterPolicy", None),
    ("FilterPolicyScope", Some("MessageAttributes")),
    ("RawMessageDelivery", Some("false")),
    ("RedrivePolicy", None),
];

/// The settable attributes of a `get-subscription-attributes` response,
/// minus those still at their default.
fn settable_attributes(attributes: Option<&serde_json::Value>) -> BTreeMap<String, String> {
    let Some(attributes) = attributes.and_then(|a| a.as_object()) else {
        return BTreeMap::new();
    };
    SUBSCRIPTION_ATTRIBUTES
        .iter()
        .filter_map(|(key, default)| {
            let value = attributes.get(*key)?.as_str()?;
            if value.is_empty() || Some(value) == *default {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

pub struct DockerExecBackend {
    runtime: Arc<dyn ContainerRuntime>,
    /// Port each engine listens on inside its container.
    ports: BTreeMap<Engine, u16>,
}

impl DockerExecBackend {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, ports: BTreeMap<Engine, u16>) -> Self {
        Self { runtime, ports }
    }

    fn port(&self, engine: Engine) -> String {
        self.ports
            .get(&engine)
            .copied()
            .unwrap_or_else(|| engine.native_port())
            .to_string()
    }

    async fn exec(&self, engine: Engine, args: Vec<String>, stdin: Option<String>) -> Result<ExecOutput> {
        Ok(self.runtime.exec(engine.id(), &args, stdin).await?)
    }

    async fn exec_ok(&self, engine: Engine, args: Vec<String>, stdin: Option<String>) -> Result<String> {
        let what = args.first().cloned().unwrap_or_default();
        let output = self.exec(engine, args, stdin).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(Error::Provisioning {
                node: engine.id().to_string(),
                reason: format!("{} failed: {}", what, output.stderr.trim()),
            })
        }
    }

    fn psql(&self, database: &str) -> Vec<String> {
        let port = self.port(Engine::Postgres);
        [
            "psql",
            "-U",
            POSTGRES_USER,
            "-p",
            port.as_str(),
            "-v",
            "ON_ERROR_STOP=1",
            "-tA",
            "-d",
            database,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    async fn psql_query(&self, database: &str, sql: &str) -> Result<String> {
        let mut args = self.psql(database);
        args.extend(["-c".to_string(), sql.to_string()]);
        self.exec_ok(Engine::Postgres, args, None).await
    }

    fn mongosh(&self, database: &str, script: &str) -> Vec<String> {
        vec![
            "mongosh".to_string(),
            "--quiet".to_string(),
            "--port".to_string(),
            self.port(Engine::Mongodb),
            database.to_string(),
            "--eval".to_string(),
            script.to_string(),
        ]
    }

    async fn aws(&self, args: &[&str]) -> Result<ExecOutput> {
        let mut all = vec!["awslocal".to_string()];
        all.extend(args.iter().map(|s| s.to_string()));
        self.exec(Engine::Localstack, all, None).await
    }

    async fn aws_ok(&self, args: &[&str]) -> Result<serde_json::Value> {
        let output = self.aws(args).await?;
        if !output.success() {
            return Err(Error::Provisioning {
                node: Engine::Localstack.id().to_string(),
                reason: format!("awslocal {} failed: {}", args.join(" "), output.stderr.trim()),
            });
        }
        if output.stdout.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&output.stdout)?)
    }

    fn queue_url(&self, name: &str) -> String {
        format!(
            "http://localhost:{}/{}/{}",
            self.port(Engine::Localstack),
            AWS_ACCOUNT_ID,
            name
        )
    }
}

/// Quote a SQL string literal.
fn sql_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Quote a SQL identifier.
fn sql_identifier(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn migration_script(name: &str, sql: &str) -> String {
    format!(
        "BEGIN;\n{}\n;\nINSERT INTO {} (name) VALUES ({});\nCOMMIT;\n",
        sql,
        MIGRATIONS_TABLE,
        sql_literal(name)
    )
}

fn redrive_policy(target_arn: &str) -> String {
    serde_json::json!({
        "RedrivePolicy": serde_json::json!({
            "deadLetterTargetArn": target_arn,
            "maxReceiveCount": "5",
        })
        .to_string()
    })
    .to_string()
}

#[async_trait]
impl InfraBackend for DockerExecBackend {
    async fn database_exists(&self, database: &str) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM pg_database WHERE datname = {}",
            sql_literal(database)
        );
        Ok(self.psql_query("postgres", &sql).await?.trim() == "1")
    }

    async fn create_database(&self, database: &str) -> Result<()> {
        let sql = format!("CREATE DATABASE {}", sql_identifier(database));
        self.psql_query("postgres", &sql).await.map(|_| ())
    }

    async fn applied_migrations(&self, database: &str) -> Result<BTreeSet<String>> {
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} (name text PRIMARY KEY, applied_at timestamptz NOT NULL DEFAULT now())",
            MIGRATIONS_TABLE
        );
        self.psql_query(database, &create).await?;
        let rows = self
            .psql_query(database, &format!("SELECT name FROM {}", MIGRATIONS_TABLE))
            .await?;
        Ok(rows
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn apply_migration(&self, database: &str, name: &str, sql: &str) -> Result<()> {
        let output = self
            .exec(
                Engine::Postgres,
                self.psql(database),
                Some(migration_script(name, sql)),
            )
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(Error::Migration {
                database: database.to_string(),
                migration: name.to_string(),
                reason: output.stderr.trim().to_string(),
            })
        }
    }

    async fn run_sql(&self, database: &str, sql: &str) -> Result<()> {
        let mut args = self.psql(database);
        args.push("--single-transaction".to_string());
        self.exec_ok(Engine::Postgres, args, Some(sql.to_string()))
            .await
            .map(|_| ())
    }

    async fn document_database_exists(&self, database: &str) -> Result<bool> {
        let script = format!(
            "print(db.getMongo().getDBNames().includes({}) ? 'yes' : 'no')",
            serde_json::to_string(database)?
        );
        let out = self
            .exec_ok(Engine::Mongodb, self.mongosh("admin", &script), None)
            .await?;
        Ok(out.trim() == "yes")
    }

    async fn create_document_database(&self, database: &str) -> Result<()> {
        // MongoDB creates databases lazily; a marker document materializes it.
        let script = "db._devup.insertOne({ createdAt: new Date() })";
        self.exec_ok(Engine::Mongodb, self.mongosh(database, script), None)
            .await
            .map(|_| ())
    }

    async fn run_document_script(&self, database: &str, script: &str) -> Result<()> {
        self.exec_ok(Engine::Mongodb, self.mongosh(database, script), None)
            .await
            .map(|_| ())
    }

    async fn queue(&self, name: &str) -> Result<Option<QueueState>> {
        let url = self.queue_url(name);
        let output = self
            .aws(&[
                "sqs",
                "get-queue-attributes",
                "--queue-url",
                &url,
                "--attribute-names",
                "RedrivePolicy",
            ])
            .await?;
        if !output.success() {
            if output.stderr.contains("NonExistentQueue") {
                return Ok(None);
            }
            return Err(Error::Provisioning {
                node: format!("sqs/{}", name),
                reason: output.stderr.trim().to_string(),
            });
        }

        let json: serde_json::Value = if output.stdout.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&output.stdout)?
        };
        let redrive_target = json
            .pointer("/Attributes/RedrivePolicy")
            .and_then(|v| v.as_str())
            .and_then(|policy| serde_json::from_str::<serde_json::Value>(policy).ok())
            .and_then(|policy| {
                policy
                    .get("deadLetterTargetArn")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            });
        Ok(Some(QueueState { redrive_target }))
    }

    async fn create_queue(&self, name: &str, redrive_target: Option<&str>) -> Result<()> {
        let attributes = redrive_target.map(redrive_policy);
        let mut args = vec!["sqs", "create-queue", "--queue-name", name];
        if let Some(attributes) = &attributes {
            args.extend(["--attributes", attributes.as_str()]);
        }
        self.aws_ok(&args).await.map(|_| ())
    }

    async fn topic_exists(&self, name: &str) -> Result<bool> {
        let json = self.aws_ok(&["sns", "list-topics"]).await?;
        let arn = topic_arn(name);
        Ok(json
            .get("Topics")
            .and_then(|t| t.as_array())
            .is_some_and(|topics| {
                topics
                    .iter()
                    .any(|t| t.get("TopicArn").and_then(|a| a.as_str()) == Some(arn.as_str()))
            }))
    }

    async fn create_topic(&self, name: &str) -> Result<()> {
        self.aws_ok(&["sns", "create-topic", "--name", name])
            .await
            .map(|_| ())
    }

    async fn subscriptions(&self, topic_arn: &str) -> Result<Vec<SubscriptionState>> {
        let json = self
            .aws_ok(&["sns", "list-subscriptions-by-topic", "--topic-arn", topic_arn])
            .await?;
        let listed: Vec<(String, String, String)> = json
            .get("Subscriptions")
            .and_then(|s| s.as_array())
            .map(|subs| {
                subs.iter()
                    .filter_map(|s| {
                        Some((
                            s.get("SubscriptionArn")?.as_str()?.to_string(),
                            s.get("Protocol")?.as_str()?.to_string(),
                            s.get("Endpoint")?.as_str()?.to_string(),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut subscriptions = Vec::with_capacity(listed.len());
        for (arn, protocol, endpoint) in listed {
            let json = self
                .aws_ok(&["sns", "get-subscription-attributes", "--subscription-arn", arn.as_str()])
                .await?;
            subscriptions.push(SubscriptionState {
                protocol,
                endpoint,
                attributes: settable_attributes(json.get("Attributes")),
            });
        }
        Ok(subscriptions)
    }

    async fn subscribe(
        &self,
        topic_arn: &str,
        protocol: &str,
        endpoint: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()> {
        let attributes_json = serde_json::to_string(attributes)?;
        let mut args = vec![
            "sns",
            "subscribe",
            "--topic-arn",
            topic_arn,
            "--protocol",
            protocol,
            "--notification-endpoint",
            endpoint,
        ];
        if !attributes.is_empty() {
            args.extend(["--attributes", attributes_json.as_str()]);
        }
        self.aws_ok(&args).await.map(|_| ())
    }

    async fn bucket_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .aws(&["s3api", "head-bucket", "--bucket", name])
            .await?
            .success())
    }

    async fn create_bucket(&self, name: &str) -> Result<()> {
        self.aws_ok(&["s3api", "create-bucket", "--bucket", name])
            .await
            .map(|_| ())
    }

    async fn tunnel_url(&self, api_url: &str) -> Result<Option<String>> {
        let response = shared_client()
            .get(api_url)
            .timeout(TUNNEL_API_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let json: serde_json::Value = response.json().await?;
        Ok(json
            .pointer("/tunnels/0/public_url")
            .and_then(|u| u.as_str())
            .map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_sql() {
        assert_eq!(sql_literal("it's"), "'it''s'");
        assert_eq!(sql_identifier("orders_db"), "\"orders_db\"");
    }

    #[test]
    fn migration_records_itself_in_the_same_transaction() {
        let script = migration_script("001_init.sql", "CREATE TABLE t (id int);");
        assert!(script.starts_with("BEGIN;"));
        assert!(script.contains("INSERT INTO devup_schema_migrations (name) VALUES ('001_init.sql');"));
        assert!(script.trim_end().ends_with("COMMIT;"));
    }

    #[test]
    fn redrive_policy_is_nested_json() {
        let policy = redrive_policy("arn:aws:sqs:us-east-1:000000000000:orders-dlq");
        let outer: serde_json::Value = serde_json::from_str(&policy).unwrap();
        let inner: serde_json::Value =
            serde_json::from_str(outer["RedrivePolicy"].as_str().unwrap()).unwrap();
        assert_eq!(
            inner["deadLetterTargetArn"],
            "arn:aws:sqs:us-east-1:000000000000:orders-dlq"
        );
    }

    #[test]
    fn subscription_attributes_drop_defaults_and_read_only_keys() {
        let response = serde_json::json!({
            "Owner": "000000000000",
            "RawMessageDelivery": "false",
            "FilterPolicyScope": "MessageAttributes",
            "FilterPolicy": "{\"kind\":[\"created\"]}",
        });
        let attributes = settable_attributes(Some(&response));
        assert_eq!(
            attributes,
            BTreeMap::from([(
                "FilterPolicy".to_string(),
                "{\"kind\":[\"created\"]}".to_string()
            )])
        );
    }
}
