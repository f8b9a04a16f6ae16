//! Session configuration: API identity, protocol-version constants and the
//! server endpoint, merged into the immutable bundle a connection is built from.

use serde::{Deserialize, Serialize};

use crate::credentials::SecretValue;

/// `initConnection` constructor id for the supported protocol layer.
pub const INIT_CONNECTION: u32 = 0x6979_6de9;

/// Protocol layer spoken by default.
pub const DEFAULT_LAYER: u32 = 57;

/// `invokeWithLayer` constructor id.
pub const INVOKE_WITH_LAYER: u32 = 0xda9b_0d0d;

/// Language code reported to the server by default.
pub const DEFAULT_LANG_CODE: &str = "en";

/// Parameters sent when initializing a protocol connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiConfig {
    /// Application version reported to the server.
    pub app_version: String,
    /// Client language code.
    pub lang_code: String,
    /// Application id issued by the protocol operator.
    pub api_id: i32,
    /// `initConnection` constructor id.
    pub init_connection: u32,
    /// Protocol layer number.
    pub layer: u32,
    /// `invokeWithLayer` constructor id.
    pub invoke_with_layer: u32,
}

impl ApiConfig {
    /// Defaults for the given application id, using this crate's version.
    pub fn with_api_id(api_id: i32) -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_owned(),
            lang_code: DEFAULT_LANG_CODE.to_owned(),
            api_id,
            init_connection: INIT_CONNECTION,
            layer: DEFAULT_LAYER,
            invoke_with_layer: INVOKE_WITH_LAYER,
        }
    }

    /// Apply caller-supplied overrides on top of these values.
    pub fn merged(mut self, overrides: &ApiOverrides) -> Self {
        if let Some(v) = &overrides.app_version {
            self.app_version = v.clone();
        }
        if let Some(v) = &overrides.lang_code {
            self.lang_code = v.clone();
        }
        if let Some(v) = overrides.api_id {
            self.api_id = v;
        }
        if let Some(v) = overrides.init_connection {
            self.init_connection = v;
        }
        if let Some(v) = overrides.layer {
            self.layer = v;
        }
        if let Some(v) = overrides.invoke_with_layer {
            self.invoke_with_layer = v;
        }
        self
    }
}

/// Optional replacements for [`ApiConfig`] fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiOverrides {
    /// Application version override.
    pub app_version: Option<String>,
    /// Language code override.
    pub lang_code: Option<String>,
    /// Application id override.
    pub api_id: Option<i32>,
    /// `initConnection` constructor id override.
    pub init_connection: Option<u32>,
    /// Protocol layer override.
    pub layer: Option<u32>,
    /// `invokeWithLayer` constructor id override.
    pub invoke_with_layer: Option<u32>,
}

/// Which protocol server to talk to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Use the test environment instead of production.
    pub dev: bool,
    /// Preferred data center, if pinned.
    pub dc: Option<u32>,
    /// Explicit server host, overriding the data-center table.
    pub host: Option<String>,
}

/// Everything needed to construct one protocol connection.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Merged API initialization parameters.
    pub api: ApiConfig,
    /// Server endpoint descriptor.
    pub server: ServerConfig,
    /// Application secret paired with `api.api_id`.
    pub api_hash: SecretValue,
}

impl SessionConfig {
    /// Merge account-independent inputs into one configuration.
    pub fn new(
        api_id: i32,
        api_hash: SecretValue,
        server: ServerConfig,
        overrides: &ApiOverrides,
    ) -> Self {
        Self {
            api: ApiConfig::with_api_id(api_id).merged(overrides),
            server,
            api_hash,
        }
    }
}
