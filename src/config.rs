use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub presign_ttl_secs: u64,
}

/// Limits applied to a single registration run.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfig {
    pub timeout: Duration,
    /// Extra time the final commit or rollback gets once the run has decided.
    pub terminal_grace: Duration,
    pub max_in_flight: usize,
    pub max_documents: usize,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            terminal_grace: Duration::from_secs(2),
            max_in_flight: 8,
            max_documents: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub storage: StorageConfig,
    pub registration: RegistrationConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let max_connections = env_parse("DB_MAX_CONNECTIONS").unwrap_or(10);

        let storage = StorageConfig {
            endpoint: std::env::var("MINIO_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:9000".into()),
            bucket: std::env::var("MINIO_BUCKET").unwrap_or_else(|_| "student-uploads".into()),
            access_key: std::env::var("MINIO_ACCESS_KEY").context("MINIO_ACCESS_KEY is not set")?,
            secret_key: std::env::var("MINIO_SECRET_KEY").context("MINIO_SECRET_KEY is not set")?,
            region: std::env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".into()),
            presign_ttl_secs: env_parse("PRESIGN_TTL_SECS").unwrap_or(600),
        };

        let defaults = RegistrationConfig::default();
        let registration = RegistrationConfig {
            timeout: env_parse("REGISTRATION_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            terminal_grace: env_parse("REGISTRATION_TERMINAL_GRACE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.terminal_grace),
            max_in_flight: env_parse("REGISTRATION_MAX_IN_FLIGHT")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_in_flight),
            max_documents: env_parse("REGISTRATION_MAX_DOCUMENTS")
                .unwrap_or(defaults.max_documents),
        };

        Ok(Self {
            database_url,
            max_connections,
            storage,
            registration,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_defaults() {
        let cfg = RegistrationConfig::default();
        assert_eq!(cfg.timeout, Duration::from_secs(10));
        assert_eq!(cfg.terminal_grace, Duration::from_secs(2));
        assert_eq!(cfg.max_in_flight, 8);
        assert_eq!(cfg.max_documents, 10);
    }

    #[test]
    fn env_parse_ignores_garbage() {
        std::env::set_var("STUDENT_REGISTRY_TEST_NUM", " 42 ");
        assert_eq!(env_parse::<u64>("STUDENT_REGISTRY_TEST_NUM"), Some(42));
        std::env::set_var("STUDENT_REGISTRY_TEST_NUM", "forty-two");
        assert_eq!(env_parse::<u64>("STUDENT_REGISTRY_TEST_NUM"), None);
        std::env::remove_var("STUDENT_REGISTRY_TEST_NUM");
    }
}
