//! Application configuration loaded from environment variables.

use crate::errors::{AppError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Signing provider OAuth host (e.g. https://account-d.docusign.com)
    pub signing_auth_base_url: String,
    /// Signing provider REST API host (e.g. https://demo.docusign.net/restapi)
    pub signing_api_base_url: String,
    /// Integration key (OAuth client id) registered with the provider
    pub signing_integration_key: String,
    /// Provider user id impersonated by the JWT grant
    pub signing_user_id: String,
    /// Provider account id under which envelopes are created
    pub signing_account_id: String,
    /// Path to the RS256 private key (PEM) for the JWT assertion
    pub signing_private_key_path: String,
    /// Lifetime of the JWT assertion in seconds
    pub signing_token_lifetime_secs: u64,
    /// Name of the admin countersigner added to every envelope
    pub admin_signer_name: String,
    /// Email of the admin countersigner
    pub admin_signer_email: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./grantflow.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| AppError::Config("Invalid API_PORT".to_string()))?,
            signing_auth_base_url: env_var("SIGNING_AUTH_BASE_URL")
                .unwrap_or_else(|_| "https://account-d.docusign.com".to_string()),
            signing_api_base_url: env_var("SIGNING_API_BASE_URL")
                .unwrap_or_else(|_| "https://demo.docusign.net/restapi".to_string()),
            signing_integration_key: required("SIGNING_INTEGRATION_KEY")?,
            signing_user_id: required("SIGNING_USER_ID")?,
            signing_account_id: required("SIGNING_ACCOUNT_ID")?,
            signing_private_key_path: required("SIGNING_PRIVATE_KEY_PATH")?,
            signing_token_lifetime_secs: env_var("SIGNING_TOKEN_LIFETIME_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .map_err(|_| {
                    AppError::Config("Invalid SIGNING_TOKEN_LIFETIME_SECS".to_string())
                })?,
            admin_signer_name: env_var("ADMIN_SIGNER_NAME")
                .unwrap_or_else(|_| "Grants Administrator".to_string()),
            admin_signer_email: env_var("ADMIN_SIGNER_EMAIL")
                .unwrap_or_else(|_| "grants-admin@example.org".to_string()),
        })
    }
}

fn required(key: &str) -> Result<String> {
    env_var(key).map_err(|_| AppError::Config(format!("{key} environment variable is required")))
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| AppError::Config(format!("Missing env var: {key}")))
}
