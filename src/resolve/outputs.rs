use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Attributes a provisioned resource exposes to references, e.g. a queue's
/// `url`, `arn` and `dlq`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionOutputs(BTreeMap<String, String>);

impl ProvisionOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Shared per-run table of provisioning outputs, written once per node.
#[derive(Debug, Default)]
pub struct OutputsTable {
    entries: Mutex<BTreeMap<String, ProvisionOutputs>>,
}

impl OutputsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// Panics if outputs for `node` were already recorded.
    pub fn insert(&self, node: &str, outputs: ProvisionOutputs) {
        let mut entries = self.entries.lock();
        if entries.contains_key(node) {
            panic!("outputs for '{}' recorded twice", node);
        }
        entries.insert(node.to_string(), outputs);
    }

    pub fn get(&self, node: &str) -> Option<ProvisionOutputs> {
        self.entries.lock().get(node).cloned()
    }

    pub fn contains(&self, node: &str) -> bool {
        self.entries.lock().contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<String, ProvisionOutputs> {
        self.entries.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_reads_outputs() {
        let table = OutputsTable::new();
        table.insert(
            "sqs/orders",
            ProvisionOutputs::new()
                .with("url", "http://ls:4566/000000000000/orders")
                .with("arn", "arn:aws:sqs:us-east-1:000000000000:orders"),
        );
        let outputs = table.get("sqs/orders").unwrap();
        assert_eq!(outputs.get("arn"), Some("arn:aws:sqs:us-east-1:000000000000:orders"));
        assert!(outputs.get("dlq").is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    #[should_panic(expected = "recorded twice")]
    fn second_write_panics() {
        let table = OutputsTable::new();
        table.insert("s3/uploads", ProvisionOutputs::new());
        table.insert("s3/uploads", ProvisionOutputs::new());
    }
}
