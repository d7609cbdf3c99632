//! Typed configuration document consumed by a backend instance.
//!
//! A [`TobiraConfig`] is built once per worker and written to the worker's
//! `config.toml` before the backend is spawned. Serialisation goes through
//! `toml` and depends only on the struct's contents, so identical documents
//! always render to identical bytes.
//!
//! Within each section plain values are declared before nested tables; the
//! TOML encoder emits fields in declaration order.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Complete configuration for one backend instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TobiraConfig {
    /// Site-wide settings.
    pub general: GeneralSection,
    /// HTTP listener.
    pub http: HttpSection,
    /// Database connection.
    pub db: DbSection,
    /// Search index namespace.
    pub search: SearchSection,
    /// Backend logging.
    pub log: LogSection,
    /// Authentication.
    pub auth: AuthSection,
    /// Upstream Opencast instance.
    pub opencast: OpencastSection,
    /// Harvesting credentials.
    pub sync: SyncSection,
    /// Theme assets.
    pub theme: ThemeSection,
}

impl TobiraConfig {
    /// Renders the document as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Serialise`] if the encoder rejects the
    /// document.
    pub fn to_toml(&self) -> Result<String, DocumentError> {
        toml::to_string(self).map_err(DocumentError::Serialise)
    }

    /// Parses a document previously produced by [`Self::to_toml`].
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Parse`] when the text is not a valid
    /// configuration document.
    pub fn from_toml(text: &str) -> Result<Self, DocumentError> {
        toml::from_str(text).map_err(DocumentError::Parse)
    }
}

/// `[general]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralSection {
    /// Externally reachable base URL.
    pub tobira_url: String,
    /// Whether users may be looked up by name.
    pub users_searchable: bool,
    /// Site title, per language.
    pub site_title: TranslatedString,
}

/// Text with per-language variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatedString {
    /// English variant.
    pub en: String,
}

/// `[http]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSection {
    /// Listen port.
    pub port: u16,
}

/// `[db]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbSection {
    /// Database name.
    pub database: String,
    /// Role.
    pub user: String,
    /// Password.
    pub password: String,
    /// TLS policy for the database connection.
    pub tls_mode: TlsMode,
}

/// TLS policy for database connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TlsMode {
    /// Plain TCP.
    Off,
    /// TLS with certificate verification.
    On,
    /// TLS without certificate verification.
    WithoutVerification,
}

/// `[search]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSection {
    /// Prefix for every index owned by this instance.
    pub index_prefix: String,
    /// API key of the search service.
    pub key: String,
}

/// `[log]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSection {
    /// Backend log level.
    pub level: String,
}

/// `[auth]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSection {
    /// How users are authenticated.
    pub mode: AuthMode,
    /// Shared secret trusted by the login proxy.
    pub trusted_external_key: String,
    /// Whether links to external services carry pre-authentication.
    pub pre_auth_external_links: bool,
    /// JWT settings.
    pub jwt: JwtSection,
}

/// Authentication modes understood by the backend.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum AuthMode {
    /// No authentication; everyone is anonymous.
    None,
    /// Every request is authenticated by a reverse proxy.
    FullAuthProxy,
    /// Only the login route is handled by a proxy that trusts a shared key.
    /// This is the pre-authenticated mode automated tests rely on.
    #[default]
    LoginProxy,
    /// Credentials are checked against Opencast.
    Opencast,
}

/// `[auth.jwt]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtSection {
    /// Algorithm used to sign tokens.
    pub signing_algorithm: SigningAlgorithm,
}

/// JWT signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// ECDSA over P-256 with SHA-256.
    #[serde(rename = "ES256")]
    Es256,
    /// ECDSA over P-384 with SHA-384.
    #[serde(rename = "ES384")]
    Es384,
}

/// `[opencast]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpencastSection {
    /// Opencast host.
    pub host: String,
}

/// `[sync]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSection {
    /// Harvesting user.
    pub user: String,
    /// Harvesting password.
    pub password: String,
}

/// `[theme]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeSection {
    /// Favicon path.
    pub favicon: Utf8PathBuf,
    /// Logo variants.
    pub logo: LogoSet,
}

/// `[theme.logo]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoSet {
    /// Wide logo for light mode.
    pub large: Logo,
    /// Wide logo for dark mode.
    pub large_dark: Logo,
    /// Narrow logo for light mode.
    pub small: Logo,
    /// Narrow logo for dark mode.
    pub small_dark: Logo,
}

/// A single logo asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Logo {
    /// Path to the image.
    pub path: Utf8PathBuf,
    /// Intrinsic `[width, height]`.
    pub resolution: [u32; 2],
}

/// Errors raised while encoding or decoding a configuration document.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The document could not be encoded.
    #[error("failed to serialise configuration document: {0}")]
    Serialise(#[source] toml::ser::Error),
    /// The text is not a valid configuration document.
    #[error("failed to parse configuration document: {0}")]
    Parse(#[source] toml::de::Error),
}
