//! Provisioning metadata file shapes

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::value::ConfigValue;

/// `main.yml` in a role's `meta` directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleMeta {
    #[serde(default)]
    pub environments: HashMap<String, RoleEnvironment>,
}

/// Per-environment overrides inside `main.yml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleEnvironment {
    /// Integer or numeric string
    #[serde(default)]
    pub containers: Option<ConfigValue>,
}

impl RoleMeta {
    /// Positive container override for an environment
    pub fn containers_for(&self, environment: &str) -> Option<i64> {
        self.environments
            .get(environment)
            .and_then(|env| env.containers.as_ref())
            .and_then(ConfigValue::as_int)
            .filter(|count| *count > 0)
    }
}

/// One record of an `<env>.etcd2.yml` key file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key: String,
    #[serde(default)]
    pub value: String,
}
