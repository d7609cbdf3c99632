//! Builds the configuration document for one worker's backend.

use camino::{Utf8Path, Utf8PathBuf};
use tobira_harness_config::document::{
    AuthSection, DbSection, GeneralSection, HttpSection, JwtSection, LogSection, Logo, LogoSet,
    OpencastSection, SearchSection, SigningAlgorithm, SyncSection, ThemeSection, TlsMode,
    TranslatedString,
};
use tobira_harness_config::{AuthMode, DocumentError, HarnessConfig, TobiraConfig};

use crate::slot::WorkerSlot;

const SITE_TITLE: &str = "Tobira Videoportal";
const SEARCH_KEY: &str = "tobira";
const TRUSTED_EXTERNAL_KEY: &str = "tobira";
const BACKEND_LOG_LEVEL: &str = "debug";
// Never contacted during UI tests.
const OPENCAST_HOST: &str = "https://dummy.invalid";
const SYNC_USER: &str = "admin";
const SYNC_PASSWORD: &str = "opencast";
const THEME_ASSET_DIR: &str = "util/dev-config";
const LARGE_LOGO_RESOLUTION: [u32; 2] = [425, 182];
const SMALL_LOGO_RESOLUTION: [u32; 2] = [212, 182];

/// Produces [`TobiraConfig`] documents from worker slots.
///
/// Synthesis is pure: the output depends only on the slot and the values
/// captured at construction, so rendering the same slot twice yields
/// byte-identical text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSynthesizer {
    root_path: Utf8PathBuf,
    database_user: String,
    database_password: String,
    auth_mode: AuthMode,
}

impl ConfigSynthesizer {
    /// Captures the values shared by every worker.
    #[must_use]
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            root_path: config.root_path().to_path_buf(),
            database_user: config.database_user.clone(),
            database_password: config.database_password.clone(),
            auth_mode: config.auth_mode(),
        }
    }

    /// Overrides the authentication mode.
    #[must_use]
    pub const fn with_auth_mode(mut self, auth_mode: AuthMode) -> Self {
        self.auth_mode = auth_mode;
        self
    }

    /// Builds the document for `slot`.
    #[must_use]
    pub fn synthesize(&self, slot: &WorkerSlot) -> TobiraConfig {
        TobiraConfig {
            general: GeneralSection {
                tobira_url: slot.base_url(),
                users_searchable: true,
                site_title: TranslatedString {
                    en: SITE_TITLE.to_owned(),
                },
            },
            http: HttpSection { port: slot.port() },
            db: DbSection {
                database: slot.db_name().as_str().to_owned(),
                user: self.database_user.clone(),
                password: self.database_password.clone(),
                tls_mode: TlsMode::Off,
            },
            search: SearchSection {
                index_prefix: slot.index_prefix().to_owned(),
                key: SEARCH_KEY.to_owned(),
            },
            log: LogSection {
                level: BACKEND_LOG_LEVEL.to_owned(),
            },
            auth: AuthSection {
                mode: self.auth_mode,
                trusted_external_key: TRUSTED_EXTERNAL_KEY.to_owned(),
                pre_auth_external_links: true,
                jwt: JwtSection {
                    signing_algorithm: SigningAlgorithm::Es256,
                },
            },
            opencast: OpencastSection {
                host: OPENCAST_HOST.to_owned(),
            },
            sync: SyncSection {
                user: SYNC_USER.to_owned(),
                password: SYNC_PASSWORD.to_owned(),
            },
            theme: self.theme(),
        }
    }

    /// Renders the document for `slot` as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError`] if encoding fails.
    pub fn render(&self, slot: &WorkerSlot) -> Result<String, DocumentError> {
        self.synthesize(slot).to_toml()
    }

    fn theme(&self) -> ThemeSection {
        let asset_dir = self.root_path.join(THEME_ASSET_DIR);
        let logo = |file: &str, resolution| Logo {
            path: asset_dir.join(file),
            resolution,
        };
        ThemeSection {
            favicon: asset_dir.join("favicon.svg"),
            logo: LogoSet {
                large: logo("logo-large.svg", LARGE_LOGO_RESOLUTION),
                large_dark: logo("logo-large-dark.svg", LARGE_LOGO_RESOLUTION),
                small: logo("logo-small.svg", SMALL_LOGO_RESOLUTION),
                small_dark: logo("logo-small.svg", SMALL_LOGO_RESOLUTION),
            },
        }
    }

    /// Repository root theme assets are resolved against.
    #[must_use]
    pub fn root_path(&self) -> &Utf8Path {
        &self.root_path
    }
}
