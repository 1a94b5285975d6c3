use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// Environment keys carrying tenant mappings follow
/// `RESTQL_MAPPING_{tenant}_{RESOURCE}={url template}`.
const ENV_MAPPING_PREFIX: &str = "RESTQL_MAPPING_";

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("invalid mapping url for resource {resource}: {source}")]
    InvalidUrl {
        resource: String,
        #[source]
        source: url::ParseError,
    },

    #[error("mapping url for resource {resource} has no host")]
    MissingHost { resource: String },

    #[error("failed to load mappings from database: {0}")]
    Database(#[source] anyhow::Error),
}

/// A named upstream resource template. Path segments of the form `:name`
/// are placeholders filled from statement params.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    resource_name: String,
    scheme: String,
    host: String,
    path_template: String,
    query_template: Vec<(String, String)>,
    path_params: Vec<String>,
}

impl Mapping {
    pub fn new(resource_name: &str, url_template: &str) -> Result<Self, MappingError> {
        let url = Url::parse(url_template).map_err(|source| MappingError::InvalidUrl {
            resource: resource_name.to_string(),
            source,
        })?;

        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(MappingError::MissingHost {
                    resource: resource_name.to_string(),
                })
            }
        };

        let path_template = url.path().to_string();
        let path_params = path_template
            .split('/')
            .filter_map(|segment| segment.strip_prefix(':'))
            .map(str::to_string)
            .collect();
        let query_template = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        Ok(Mapping {
            resource_name: resource_name.to_string(),
            scheme: url.scheme().to_string(),
            host,
            path_template,
            query_template,
            path_params,
        })
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Fixed query params carried by the mapping URL itself.
    pub fn query_template(&self) -> &[(String, String)] {
        &self.query_template
    }

    /// Placeholder names in path order.
    pub fn path_param_names(&self) -> &[String] {
        &self.path_params
    }

    /// Substitutes `:name` placeholders in path order. Placeholders with no
    /// matching param stay literal. Returns the rendered path and the names
    /// of the params consumed, so callers can drop them from the query
    /// string.
    pub fn path_with_params(
        &self,
        params: &HashMap<String, Value>,
    ) -> (String, Vec<String>) {
        let mut consumed = Vec::new();
        let path = self
            .path_template
            .split('/')
            .map(|segment| match segment.strip_prefix(':') {
                Some(name) => match params.get(name) {
                    Some(value) => {
                        if !consumed.iter().any(|c| c == name) {
                            consumed.push(name.to_string());
                        }
                        param_to_path_segment(value)
                    }
                    None => segment.to_string(),
                },
                None => segment.to_string(),
            })
            .collect::<Vec<_>>()
            .join("/");

        (path, consumed)
    }
}

fn param_to_path_segment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Database seam consumed by the mappings reader.
#[async_trait]
pub trait Database: Send + Sync {
    async fn find_mappings_for_tenant(&self, tenant: &str) -> anyhow::Result<Vec<Mapping>>;
}

/// Environment variable source, injectable for tests.
pub trait EnvSource: Send + Sync {
    fn get_all(&self) -> HashMap<String, String>;
}

/// Reads process environment variables.
#[derive(Debug, Default, Clone)]
pub struct SystemEnv;

impl EnvSource for SystemEnv {
    fn get_all(&self) -> HashMap<String, String> {
        std::env::vars().collect()
    }
}

/// Merges tenant mappings from three sources with strict precedence:
/// database lowest, local configuration next, environment highest.
pub struct MappingsReader {
    env: Arc<dyn EnvSource>,
    local: HashMap<String, HashMap<String, String>>,
    db: Arc<dyn Database>,
}

impl MappingsReader {
    pub fn new(
        env: Arc<dyn EnvSource>,
        local: HashMap<String, HashMap<String, String>>,
        db: Arc<dyn Database>,
    ) -> Self {
        MappingsReader { env, local, db }
    }

    pub async fn from_tenant(&self, tenant: &str) -> Result<HashMap<String, Mapping>, MappingError> {
        debug!(tenant, "reading mappings");
        let mut mappings = HashMap::new();

        let from_db = self
            .db
            .find_mappings_for_tenant(tenant)
            .await
            .map_err(MappingError::Database)?;
        for mapping in from_db {
            mappings.insert(mapping.resource_name().to_string(), mapping);
        }

        if let Some(local) = self.local.get(tenant) {
            for (resource, url) in local {
                let mapping = Mapping::new(resource, url)?;
                mappings.insert(resource.clone(), mapping);
            }
        }

        for (resource, url) in self.env_mappings(tenant) {
            match Mapping::new(&resource, &url) {
                Ok(mapping) => {
                    mappings.insert(resource, mapping);
                }
                Err(err) => {
                    warn!(%resource, %err, "skipping invalid environment mapping");
                }
            }
        }

        Ok(mappings)
    }

    fn env_mappings(&self, tenant: &str) -> Vec<(String, String)> {
        if tenant.is_empty() {
            return Vec::new();
        }

        let tenant_prefix = format!("{ENV_MAPPING_PREFIX}{tenant}_");
        self.env
            .get_all()
            .into_iter()
            .filter_map(|(key, url)| {
                let resource = key.strip_prefix(&tenant_prefix)?;
                if resource.is_empty() {
                    return None;
                }
                Some((resource.to_lowercase(), url))
            })
            .collect()
    }
}
