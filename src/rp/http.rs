//! HTTP relying-party client.
//!
//! Speaks the demo FIDO2 backend protocol: ceremony options come back as
//! JSON documents with base64 payload fields, identities travel in custom
//! `X-USER-*` headers, and every request carries `X-Requested-With` to mark
//! the caller as programmatic rather than a browser.
//!
//! No retries here: each options fetch consumes a server-side challenge, so
//! a failed ceremony starts over from a fresh fetch at the orchestrator.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use super::RelyingParty;
use crate::error::{CeremonyError, Result};
use crate::types::{
    AssertionResult, AttestationResult, AuthenticatedUser, AuthenticationOptions,
    CredentialDescriptor, CredentialParameter, CredentialRef, RegistrationOptions,
    RelyingPartyInfo, UserEntity, UserId,
};

/// Default relying-party origin (the original demo backend).
const DEFAULT_BASE_URL: &str = "https://fido2.apps.praphull.com";

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const HEADER_USER_TOKEN: &str = "X-USER-TOKEN";
const HEADER_USER_ID: &str = "X-USER-ID";
const HEADER_USER_NAME: &str = "X-USER-NAME";

/// Configuration for [`HttpRelyingParty`].
#[derive(Debug, Clone)]
pub struct HttpRelyingPartyConfig {
    /// Relying-party origin, e.g. `https://fido2.apps.praphull.com`.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for HttpRelyingPartyConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Relying-party client over HTTPS.
///
/// Holds a single [`reqwest::Client`]; construct once per process and share.
pub struct HttpRelyingParty {
    client: Client,
    /// Base of the FIDO2 endpoints, `<origin>/auth/fido2`.
    fido_base: String,
    /// Password login endpoint, `<origin>/users/doLogin`; the one route
    /// outside the FIDO2 base.
    login_url: String,
}

impl HttpRelyingParty {
    /// Create a client for the given relying party.
    #[instrument(level = "debug", skip_all, fields(base_url = %config.base_url))]
    pub fn new(config: HttpRelyingPartyConfig) -> Result<Self> {
        let origin = Url::parse(&config.base_url)
            .map_err(|e| CeremonyError::Server(format!("invalid relying party URL: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));

        let client = Client::builder()
            .timeout(config.timeout)
            .https_only(true)
            .default_headers(headers)
            .build()
            .map_err(|e| CeremonyError::Server(format!("failed to create HTTP client: {e}")))?;

        let origin = origin.as_str().trim_end_matches('/').to_string();
        let fido_base = format!("{origin}/auth/fido2");
        let login_url = format!("{origin}/users/doLogin");

        debug!("relying party client created");
        Ok(Self {
            client,
            fido_base,
            login_url,
        })
    }

    /// Client for the original demo backend with default settings.
    pub fn with_defaults() -> Result<Self> {
        Self::new(HttpRelyingPartyConfig::default())
    }

    async fn parse_json<T>(&self, response: Response, context: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        response.json().await.map_err(|e| {
            warn!(error = %e, context, "failed to parse relying party response");
            CeremonyError::Server(format!("failed to parse {context} response: {e}"))
        })
    }

    /// Non-success on an options/lookup endpoint is always a server error.
    async fn fetch_error(&self, response: Response, context: &str) -> CeremonyError {
        let status = response.status();
        let detail = error_detail(response).await;
        warn!(status = %status, context, detail = %detail, "relying party request failed");
        CeremonyError::Server(format!("{context} returned status {status}: {detail}"))
    }

    /// Non-success on a submission endpoint: 4xx is a semantic rejection of
    /// the ceremony result, anything else is a server error.
    async fn submit_error(&self, response: Response, context: &str) -> CeremonyError {
        let status = response.status();
        let detail = error_detail(response).await;
        warn!(status = %status, context, detail = %detail, "ceremony result submission failed");
        if status.is_client_error() {
            CeremonyError::ServerRejected(format!("{context} returned status {status}: {detail}"))
        } else {
            CeremonyError::Server(format!("{context} returned status {status}: {detail}"))
        }
    }
}

#[async_trait]
impl RelyingParty for HttpRelyingParty {
    #[instrument(level = "debug", skip(self))]
    async fn resolve_user(&self, username: &str) -> Result<Option<AuthenticatedUser>> {
        let url = format!("{}/user/id", self.fido_base);

        let response = self
            .client
            .get(&url)
            .header(HEADER_USER_NAME, username)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(self.fetch_error(response, "resolveUser").await);
        }

        let login: WireLoginResponse = self.parse_json(response, "resolveUser").await?;
        Ok(login.into_user())
    }

    #[instrument(level = "debug", skip(self, password))]
    async fn password_login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<AuthenticatedUser>> {
        let body = WirePasswordBody { username, password };

        let response = self.client.post(&self.login_url).json(&body).send().await?;

        // Rejected credentials are a normal outcome, not a transport failure.
        if response.status().is_client_error() {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(self.fetch_error(response, "passwordLogin").await);
        }

        let login: WireLoginResponse = self.parse_json(response, "passwordLogin").await?;
        Ok(login.into_user())
    }

    #[instrument(level = "debug", skip(self), fields(user = %user))]
    async fn registration_options(&self, user: UserId) -> Result<RegistrationOptions> {
        let url = format!("{}/attestation/options", self.fido_base);

        let response = self
            .client
            .get(&url)
            .query(&[("platform_only", "true")])
            .header(HEADER_USER_TOKEN, user.0.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.fetch_error(response, "registrationOptions").await);
        }

        let wire: WireCreationOptions = self.parse_json(response, "registrationOptions").await?;
        wire.into_options()
    }

    #[instrument(level = "debug", skip(self))]
    async fn authentication_options(
        &self,
        user: Option<UserId>,
        credential_id: Option<&str>,
    ) -> Result<AuthenticationOptions> {
        let url = format!("{}/assertion/options", self.fido_base);

        let mut request = self.client.get(&url);
        if let Some(user) = user {
            request = request.header(HEADER_USER_ID, user.0.to_string());
        }
        if let Some(cred_id) = credential_id {
            request = request.query(&[("credId", cred_id)]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(self.fetch_error(response, "authenticationOptions").await);
        }

        let wire: WireRequestOptions = self.parse_json(response, "authenticationOptions").await?;
        wire.into_options()
    }

    #[instrument(level = "debug", skip(self, attestation), fields(user = %user))]
    async fn submit_attestation(
        &self,
        user: UserId,
        attestation: &AttestationResult,
    ) -> Result<Vec<CredentialRef>> {
        let url = format!("{}/register", self.fido_base);
        let body = WireAttestationBody::from(attestation);

        let response = self
            .client
            .post(&url)
            .header(HEADER_USER_TOKEN, user.0.to_string())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.submit_error(response, "submitAttestation").await);
        }

        let wire: WireCredentialList = self.parse_json(response, "submitAttestation").await?;
        Ok(wire
            .credentials
            .into_iter()
            .map(|c| CredentialRef {
                credential_id: c.cred_id,
            })
            .collect())
    }

    #[instrument(level = "debug", skip(self, assertion))]
    async fn submit_assertion(&self, assertion: &AssertionResult) -> Result<AuthenticatedUser> {
        let url = format!("{}/login", self.fido_base);
        let body = WireAssertionBody::from(assertion);

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(self.submit_error(response, "submitAssertion").await);
        }

        let login: WireLoginResponse = self.parse_json(response, "submitAssertion").await?;
        login.into_user().ok_or_else(|| {
            CeremonyError::ServerRejected("login response carried no user id".into())
        })
    }
}

/// Best-effort extraction of the `error` field from a failure body.
async fn error_detail(response: Response) -> String {
    match response.json::<WireError>().await {
        Ok(WireError { error: Some(e) }) => e,
        _ => String::new(),
    }
}

/// Decode a base64 payload field; the server emits standard alphabet but
/// credential ids may arrive base64url-encoded.
fn decode_b64(encoded: &str, field: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .or_else(|_| URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')))
        .map_err(|e| CeremonyError::Server(format!("invalid base64 in {field}: {e}")))
}

fn encode_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

fn timeout_from_secs(secs: Option<f64>) -> Option<Duration> {
    secs.filter(|t| t.is_finite() && *t > 0.0)
        .map(Duration::from_secs_f64)
}

// ================= Wire documents ========================== //

#[derive(Debug, Deserialize)]
struct WireChallenge {
    value: String,
}

#[derive(Debug, Deserialize)]
struct WireRp {
    id: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    name: String,
    #[serde(default, rename = "displayName")]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct WireParameter {
    #[serde(rename = "type")]
    ty: String,
    alg: i32,
}

#[derive(Debug, Deserialize)]
struct WireDescriptor {
    id: String,
    #[serde(default, rename = "type")]
    ty: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireSelection {
    #[serde(rename = "authenticatorAttachment")]
    attachment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCreationOptions {
    rp: WireRp,
    user: WireUser,
    challenge: WireChallenge,
    #[serde(default, rename = "pubKeyCredParams")]
    parameters: Vec<WireParameter>,
    timeout: Option<f64>,
    #[serde(default, rename = "excludeCredentials")]
    exclude_credentials: Vec<WireDescriptor>,
    #[serde(rename = "authenticatorSelection")]
    selection: Option<WireSelection>,
}

#[derive(Debug, Deserialize)]
struct WireRequestOptions {
    challenge: WireChallenge,
    #[serde(rename = "rpId")]
    rp_id: String,
    #[serde(default, rename = "allowCredentials")]
    allow_credentials: Vec<WireDescriptor>,
    timeout: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireLoginResponse {
    #[serde(rename = "userId")]
    user_id: Option<i64>,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCredential {
    #[serde(rename = "credId")]
    cred_id: String,
}

#[derive(Debug, Deserialize)]
struct WireCredentialList {
    #[serde(default)]
    credentials: Vec<WireCredential>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct WirePasswordBody<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct WireAttestationBody {
    id: String,
    #[serde(rename = "type")]
    ty: &'static str,
    #[serde(rename = "rawId")]
    raw_id: String,
    response: WireAttestationResponse,
}

#[derive(Debug, Serialize)]
struct WireAttestationResponse {
    #[serde(rename = "clientDataJSON")]
    client_data_json: String,
    #[serde(rename = "attestationObject")]
    attestation_object: String,
}

#[derive(Debug, Serialize)]
struct WireAssertionBody {
    id: String,
    #[serde(rename = "type")]
    ty: &'static str,
    #[serde(rename = "rawId")]
    raw_id: String,
    response: WireAssertionResponse,
}

#[derive(Debug, Serialize)]
struct WireAssertionResponse {
    #[serde(rename = "clientDataJSON")]
    client_data_json: String,
    #[serde(rename = "authenticatorData")]
    authenticator_data: String,
    signature: String,
    /// Empty string when the authenticator supplied no handle.
    #[serde(rename = "userHandle")]
    user_handle: String,
}

impl WireLoginResponse {
    fn into_user(self) -> Option<AuthenticatedUser> {
        self.user_id.map(|id| AuthenticatedUser {
            user_id: UserId(id),
            username: self.username,
        })
    }
}

impl WireCreationOptions {
    fn into_options(self) -> Result<RegistrationOptions> {
        Ok(RegistrationOptions {
            challenge: decode_b64(&self.challenge.value, "challenge")?,
            rp: RelyingPartyInfo {
                id: self.rp.id,
                name: self.rp.name,
            },
            user: UserEntity {
                id: decode_b64(&self.user.id, "user.id")?,
                name: self.user.name,
                display_name: self.user.display_name,
            },
            parameters: self
                .parameters
                .into_iter()
                .map(|p| CredentialParameter {
                    ty: p.ty,
                    alg: p.alg,
                })
                .collect(),
            exclude_credentials: descriptors(self.exclude_credentials)?,
            authenticator_attachment: self.selection.and_then(|s| s.attachment),
            timeout: timeout_from_secs(self.timeout),
        })
    }
}

impl WireRequestOptions {
    fn into_options(self) -> Result<AuthenticationOptions> {
        Ok(AuthenticationOptions {
            challenge: decode_b64(&self.challenge.value, "challenge")?,
            rp_id: self.rp_id,
            allow_credentials: descriptors(self.allow_credentials)?,
            timeout: timeout_from_secs(self.timeout),
        })
    }
}

fn descriptors(wire: Vec<WireDescriptor>) -> Result<Vec<CredentialDescriptor>> {
    wire.into_iter()
        .map(|d| {
            Ok(CredentialDescriptor {
                id: decode_b64(&d.id, "credential id")?,
                ty: d.ty.unwrap_or_else(|| "public-key".to_string()),
            })
        })
        .collect()
}

impl From<&AttestationResult> for WireAttestationBody {
    fn from(attestation: &AttestationResult) -> Self {
        let raw_id = encode_b64(&attestation.credential_id);
        Self {
            id: raw_id.clone(),
            ty: "public-key",
            raw_id,
            response: WireAttestationResponse {
                client_data_json: encode_b64(&attestation.client_data_json),
                attestation_object: encode_b64(&attestation.attestation_object),
            },
        }
    }
}

impl From<&AssertionResult> for WireAssertionBody {
    fn from(assertion: &AssertionResult) -> Self {
        let raw_id = encode_b64(&assertion.credential_id);
        Self {
            id: raw_id.clone(),
            ty: "public-key",
            raw_id,
            response: WireAssertionResponse {
                client_data_json: encode_b64(&assertion.client_data_json),
                authenticator_data: encode_b64(&assertion.authenticator_data),
                signature: encode_b64(&assertion.signature),
                user_handle: assertion
                    .user_handle
                    .as_deref()
                    .map(encode_b64)
                    .unwrap_or_default(),
            },
        }
    }
}
