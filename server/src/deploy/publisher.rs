//! Metadata key publisher

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::coord::CoordConnector;
use crate::deploy::metadata::MetadataLayout;
use crate::deploy::StepFailure;
use crate::models::metadata::KeyRecord;

pub const CONNECT_FAILED: &str = "Unable to connect to etcd2 server.";
pub const UPDATE_FAILED: &str = "Unable to perform updates to etcd2 server.";

/// Merge key records in order; later records overwrite earlier ones
pub fn merge_keys<'a>(
    sources: impl IntoIterator<Item = &'a [KeyRecord]>,
) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    for records in sources {
        for record in records {
            merged.insert(record.key.clone(), record.value.clone());
        }
    }
    merged
}

/// Pushes merged key records to an environment's coordination endpoint
#[derive(Clone)]
pub struct KeyPublisher {
    connector: Arc<dyn CoordConnector>,
}

impl KeyPublisher {
    pub fn new(connector: Arc<dyn CoordConnector>) -> Self {
        Self { connector }
    }

    /// Publish every key; the first failing key aborts the step.
    /// Returns the number of keys written.
    pub async fn publish(
        &self,
        endpoint: &str,
        layout: &MetadataLayout,
        environment: &str,
    ) -> Result<usize, StepFailure> {
        let (common, image) = layout.key_records(environment).await;
        let keys = merge_keys([common.as_slice(), image.as_slice()]);
        if keys.is_empty() {
            debug!("No keys to publish for {}", environment);
            return Ok(0);
        }

        let client = self
            .connector
            .connect(endpoint)
            .map_err(|e| StepFailure::new(CONNECT_FAILED, e))?;

        for (key, value) in &keys {
            client
                .set(key, value)
                .await
                .map_err(|e| StepFailure::new(UPDATE_FAILED, format!("{}: {}", key, e)))?;
        }

        info!("Published {} keys to {}", keys.len(), endpoint);
        Ok(keys.len())
    }
}
