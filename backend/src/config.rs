//! Process configuration read from the environment.
//!
//! A `.env` file in the working directory is loaded first (see `main.rs`), then
//! every required variable is checked up front so the server refuses to start
//! with a partial configuration instead of failing on the first upload.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

const PRODUCTION_LOAD_RETRIES: u32 = 20;
const DEVELOPMENT_LOAD_RETRIES: u32 = 4;
const DEFAULT_RETRY_DELAY_MS: u64 = 2000;
const DEFAULT_SETTLE_MS: u64 = 2000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;
const DEFAULT_JOB_RETENTION_SECS: u64 = 3600;

const GCS_API_URL: &str = "https://storage.googleapis.com";
const BIGQUERY_API_URL: &str = "https://bigquery.googleapis.com";
const METADATA_URL: &str = "http://metadata.google.internal";
const GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Which set of collaborators the pipeline talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Cloud Storage, BigQuery and GitHub.
    Gcp,
    /// A staging directory and a SQLite warehouse under `LOCAL_DATA_DIR`.
    /// Publishing still goes to GitHub.
    Local { data_dir: PathBuf },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub production: bool,
    pub backend: Backend,

    pub project_id: String,
    pub dataset_id: String,
    pub bucket_name: String,
    pub bigquery_location: String,
    /// Static OAuth token; when absent tokens come from the metadata server.
    pub google_access_token: Option<String>,

    pub looker_base_url: String,
    pub looker_project_id: String,
    pub looker_webhook_secret: String,

    pub github_token: String,
    pub github_owner: String,
    pub github_repo: String,
    pub github_branch: String,

    pub session_secret: String,

    pub load_max_retries: u32,
    pub load_retry_delay: Duration,
    pub load_poll_interval: Duration,
    pub deploy_settle: Duration,
    /// Whole-request timeout for every outbound HTTP call.
    pub http_timeout: Duration,
    /// How long finished jobs stay queryable through the status endpoint.
    pub job_retention: Duration,

    /// API endpoints, overridable for emulators and GitHub Enterprise.
    pub gcs_api_url: String,
    pub bigquery_api_url: String,
    pub metadata_url: String,
    pub github_api_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));
        let url = |key: &'static str, default: &str| {
            get(key)
                .unwrap_or_else(|| default.to_string())
                .trim_end_matches('/')
                .to_string()
        };
        let millis = |key: &'static str, default: u64| {
            parse_or(get(key), key, default).map(Duration::from_millis)
        };

        let production = get("APP_ENV").is_some_and(|v| v.eq_ignore_ascii_case("production"));
        let default_retries = if production {
            PRODUCTION_LOAD_RETRIES
        } else {
            DEVELOPMENT_LOAD_RETRIES
        };

        let backend = match get("INGEST_BACKEND").as_deref() {
            None | Some("gcp") => Backend::Gcp,
            Some("local") => Backend::Local {
                data_dir: PathBuf::from(get("LOCAL_DATA_DIR").unwrap_or_else(|| "tmp".to_string())),
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "INGEST_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let load_max_retries = parse_or(get("LOAD_MAX_RETRIES"), "LOAD_MAX_RETRIES", default_retries)?;
        if load_max_retries == 0 {
            return Err(ConfigError::Invalid {
                key: "LOAD_MAX_RETRIES",
                value: "0".to_string(),
            });
        }

        Ok(Config {
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(get("PORT"), "PORT", 8080)?,
            production,
            backend,
            project_id: required("GOOGLE_CLOUD_PROJECT")?,
            dataset_id: required("BIGQUERY_DATASET_ID")?,
            bucket_name: required("GCS_BUCKET_NAME")?,
            bigquery_location: get("BIGQUERY_LOCATION").unwrap_or_else(|| "US".to_string()),
            google_access_token: get("GOOGLE_OAUTH_ACCESS_TOKEN"),
            looker_base_url: required("LOOKERSDK_BASE_URL")?
                .trim_end_matches('/')
                .to_string(),
            looker_project_id: required("LOOKER_PROJECT_ID")?,
            looker_webhook_secret: required("LOOKER_PROJECT_WEBHOOK_SECRET")?,
            github_token: required("GITHUB_TOKEN")?,
            github_owner: required("GITHUB_REPO_OWNER")?,
            github_repo: required("GITHUB_REPO_NAME")?,
            github_branch: get("GITHUB_BRANCH").unwrap_or_else(|| "main".to_string()),
            session_secret: required("JWT_SECRET")?,
            load_max_retries,
            load_retry_delay: millis("LOAD_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS)?,
            load_poll_interval: millis("LOAD_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?,
            deploy_settle: millis("DEPLOY_SETTLE_MS", DEFAULT_SETTLE_MS)?,
            http_timeout: Duration::from_secs(parse_or(
                get("HTTP_TIMEOUT_SECS"),
                "HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
            job_retention: Duration::from_secs(parse_or(
                get("JOB_RETENTION_SECS"),
                "JOB_RETENTION_SECS",
                DEFAULT_JOB_RETENTION_SECS,
            )?),
            gcs_api_url: url("GCS_API_URL", GCS_API_URL),
            bigquery_api_url: url("BIGQUERY_API_URL", BIGQUERY_API_URL),
            metadata_url: url("GCE_METADATA_URL", METADATA_URL),
            github_api_url: url("GITHUB_API_URL", GITHUB_API_URL),
        })
    }

    /// Deploy webhook of the Looker project that includes the refinements.
    pub fn deploy_webhook_url(&self) -> String {
        format!(
            "{}/webhooks/projects/{}/deploy",
            self.looker_base_url, self.looker_project_id
        )
    }
}

fn parse_or<T: std::str::FromStr>(
    raw: Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, String> {
        [
            ("GOOGLE_CLOUD_PROJECT", "acme-analytics"),
            ("BIGQUERY_DATASET_ID", "uploads"),
            ("GCS_BUCKET_NAME", "acme-uploads"),
            ("LOOKER_PROJECT_ID", "portal"),
            ("LOOKER_PROJECT_WEBHOOK_SECRET", "hook-secret"),
            ("LOOKERSDK_BASE_URL", "https://acme.looker.com/"),
            ("GITHUB_TOKEN", "ghp_token"),
            ("GITHUB_REPO_OWNER", "acme"),
            ("GITHUB_REPO_NAME", "lookml"),
            ("JWT_SECRET", "cookie-secret"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect()
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn development_defaults() {
        let config = load(&base_env()).unwrap();
        assert!(!config.production);
        assert_eq!(config.load_max_retries, 4);
        assert_eq!(config.load_retry_delay, Duration::from_millis(2000));
        assert_eq!(config.github_branch, "main");
        assert_eq!(config.bigquery_location, "US");
        assert_eq!(config.backend, Backend::Gcp);
        assert_eq!(config.http_timeout, Duration::from_secs(120));
        assert_eq!(config.load_poll_interval, Duration::from_secs(1));
        assert_eq!(config.github_api_url, "https://api.github.com");
        assert_eq!(config.bigquery_api_url, "https://bigquery.googleapis.com");
        assert_eq!(
            config.deploy_webhook_url(),
            "https://acme.looker.com/webhooks/projects/portal/deploy"
        );
    }

    #[test]
    fn production_raises_the_retry_bound() {
        let mut env = base_env();
        env.insert("APP_ENV", "production".to_string());
        assert_eq!(load(&env).unwrap().load_max_retries, 20);

        env.insert("LOAD_MAX_RETRIES", "7".to_string());
        assert_eq!(load(&env).unwrap().load_max_retries, 7);
    }

    #[test]
    fn missing_required_value_is_named() {
        let mut env = base_env();
        env.remove("GCS_BUCKET_NAME");
        let err = load(&env).unwrap_err();
        assert_eq!(err.to_string(), "GCS_BUCKET_NAME is required");

        let mut env = base_env();
        env.insert("JWT_SECRET", "  ".to_string());
        assert!(matches!(load(&env), Err(ConfigError::Missing("JWT_SECRET"))));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let mut env = base_env();
        env.insert("PORT", "eighty".to_string());
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid { key: "PORT", .. })
        ));
    }

    #[test]
    fn endpoints_can_point_at_emulators() {
        let mut env = base_env();
        env.insert("GCS_API_URL", "http://localhost:4443/".to_string());
        env.insert("GITHUB_API_URL", "https://git.acme.internal/api/v3".to_string());
        env.insert("HTTP_TIMEOUT_SECS", "5".to_string());
        let config = load(&env).unwrap();

        assert_eq!(config.gcs_api_url, "http://localhost:4443");
        assert_eq!(config.github_api_url, "https://git.acme.internal/api/v3");
        assert_eq!(config.metadata_url, "http://metadata.google.internal");
        assert_eq!(config.http_timeout, Duration::from_secs(5));
    }

    #[test]
    fn local_backend_uses_data_dir() {
        let mut env = base_env();
        env.insert("INGEST_BACKEND", "local".to_string());
        env.insert("LOCAL_DATA_DIR", "/var/lib/ingest".to_string());
        assert_eq!(
            load(&env).unwrap().backend,
            Backend::Local {
                data_dir: PathBuf::from("/var/lib/ingest")
            }
        );
    }
}
