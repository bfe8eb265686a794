//! E-signature provider client — JWT-bearer token exchange and envelope CRUD.
//!
//! The provider speaks the OAuth2 JWT-bearer grant: a short-lived RS256
//! assertion is exchanged at `{auth_base}/oauth/token` for a bearer token,
//! which then authorizes envelope calls under
//! `{api_base}/v2.1/accounts/{account_id}`.
//!
//! There is no retry or compensation anywhere in this chain.  If envelope
//! creation succeeds but a later step fails, the envelope exists at the
//! provider without a linked application and needs manual reconciliation.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::errors::{AppError, Result};
use crate::models::Application;

/// Scope requested for every assertion.
const TOKEN_SCOPE: &str = "signature impersonation";

// ─────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AssertionClaims {
    iss: String,
    sub: String,
    aud: String,
    iat: i64,
    exp: i64,
    scope: String,
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessToken {
    pub access_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeCreated {
    #[serde(rename = "envelopeId")]
    envelope_id: String,
}

#[derive(Debug, Deserialize)]
struct EnvelopeStatus {
    status: String,
}

/// Inbound webhook payload from the provider's event notification service.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    #[serde(rename = "envelopeId")]
    pub envelope_id: Option<String>,
}

impl WebhookEvent {
    /// Whether this callback reports a fully-signed envelope.
    pub fn is_completed(&self) -> bool {
        self.event == "envelope-completed"
    }
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

/// Signing-provider client, constructed once in `main` and shared through
/// the API state.
pub struct SigningClient {
    http: Client,
    auth_base: String,
    api_base: String,
    integration_key: String,
    user_id: String,
    account_id: String,
    encoding_key: EncodingKey,
    token_lifetime_secs: u64,
    admin_signer_name: String,
    admin_signer_email: String,
}

impl SigningClient {
    /// Build a client from config, loading the RS256 private key from disk.
    pub fn new(http: Client, config: &Config) -> Result<Self> {
        let pem = std::fs::read(&config.signing_private_key_path).map_err(|e| {
            AppError::Config(format!(
                "Cannot read signing key {}: {e}",
                config.signing_private_key_path
            ))
        })?;
        let encoding_key = EncodingKey::from_rsa_pem(&pem)?;
        Ok(Self {
            http,
            auth_base: config.signing_auth_base_url.trim_end_matches('/').to_string(),
            api_base: config.signing_api_base_url.trim_end_matches('/').to_string(),
            integration_key: config.signing_integration_key.clone(),
            user_id: config.signing_user_id.clone(),
            account_id: config.signing_account_id.clone(),
            encoding_key,
            token_lifetime_secs: config.signing_token_lifetime_secs,
            admin_signer_name: config.admin_signer_name.clone(),
            admin_signer_email: config.admin_signer_email.clone(),
        })
    }

    /// Build the RS256 JWT assertion for the JWT-bearer grant.
    ///
    /// The `aud` claim is the auth host without scheme, per the provider's
    /// token-endpoint contract.
    fn build_assertion(&self, issued_at: i64) -> Result<String> {
        let claims = AssertionClaims {
            iss: self.integration_key.clone(),
            sub: self.user_id.clone(),
            aud: audience_host(&self.auth_base),
            iat: issued_at,
            exp: issued_at + self.token_lifetime_secs as i64,
            scope: TOKEN_SCOPE.to_string(),
        };
        Ok(encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &self.encoding_key,
        )?)
    }

    /// Exchange a fresh JWT assertion for a short-lived bearer token.
    pub async fn obtain_token(&self) -> Result<AccessToken> {
        let assertion = self.build_assertion(chrono::Utc::now().timestamp())?;

        let resp = self
            .http
            .post(format!("{}/oauth/token", self.auth_base))
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body: TokenErrorBody = resp.json().await.unwrap_or(TokenErrorBody {
                error: None,
                error_description: None,
            });
            return Err(AppError::Signing(format!(
                "Token exchange failed ({status}): {} {}",
                body.error.unwrap_or_default(),
                body.error_description.unwrap_or_default()
            )));
        }

        let token: AccessToken = resp.json().await?;
        debug!("Obtained signing token (expires_in={}s)", token.expires_in);
        Ok(token)
    }

    /// Create a sent envelope carrying the agreement PDF, routed to the
    /// applicant (routing order 1) and the admin countersigner (order 2).
    /// Returns the provider's envelope id.
    pub async fn create_envelope(
        &self,
        token: &AccessToken,
        app: &Application,
        document: &[u8],
    ) -> Result<String> {
        let body = envelope_request_body(
            app,
            document,
            &self.admin_signer_name,
            &self.admin_signer_email,
        );

        let resp = self
            .http
            .post(format!(
                "{}/v2.1/accounts/{}/envelopes",
                self.api_base, self.account_id
            ))
            .bearer_auth(&token.access_token)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::Signing(format!(
                "Envelope creation failed ({status}): {text}"
            )));
        }

        let created: EnvelopeCreated = resp.json().await?;
        debug!("Created envelope {}", created.envelope_id);
        Ok(created.envelope_id)
    }

    /// Fetch the provider-reported status string for an envelope.
    pub async fn envelope_status(&self, token: &AccessToken, envelope_id: &str) -> Result<String> {
        let resp = self
            .http
            .get(format!(
                "{}/v2.1/accounts/{}/envelopes/{}",
                self.api_base, self.account_id, envelope_id
            ))
            .bearer_auth(&token.access_token)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(AppError::Signing(format!(
                "Envelope status fetch failed ({status})"
            )));
        }
        let body: EnvelopeStatus = resp.json().await?;
        Ok(body.status)
    }

    /// Fetch the combined signed PDF for an envelope.
    pub async fn fetch_document(&self, token: &AccessToken, envelope_id: &str) -> Result<Vec<u8>> {
        let resp = self
            .http
            .get(format!(
                "{}/v2.1/accounts/{}/envelopes/{}/documents/combined",
                self.api_base, self.account_id, envelope_id
            ))
            .bearer_auth(&token.access_token)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(AppError::Signing(format!(
                "Document fetch failed ({status})"
            )));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Strip the scheme from the auth base URL to form the `aud` claim.
fn audience_host(auth_base: &str) -> String {
    auth_base
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .to_string()
}

/// Assemble the envelope-creation request body.
fn envelope_request_body(
    app: &Application,
    document: &[u8],
    admin_name: &str,
    admin_email: &str,
) -> Value {
    json!({
        "emailSubject": format!("Grant agreement: {}", app.title),
        "documents": [{
            "documentBase64": BASE64.encode(document),
            "name": format!("grant-agreement-{}.pdf", app.id),
            "fileExtension": "pdf",
            "documentId": "1",
        }],
        "recipients": {
            "signers": [
                {
                    "email": app.applicant_email,
                    "name": app.applicant_name,
                    "recipientId": "1",
                    "routingOrder": "1",
                    "tabs": {
                        "signHereTabs": [{
                            "documentId": "1",
                            "pageNumber": "1",
                            "xPosition": "140",
                            "yPosition": "520",
                        }]
                    }
                },
                {
                    "email": admin_email,
                    "name": admin_name,
                    "recipientId": "2",
                    "routingOrder": "2",
                    "tabs": {
                        "signHereTabs": [{
                            "documentId": "1",
                            "pageNumber": "1",
                            "xPosition": "340",
                            "yPosition": "520",
                        }]
                    }
                }
            ]
        },
        "status": "sent",
    })
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
