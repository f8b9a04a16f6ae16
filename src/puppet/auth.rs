//! Authentication state machine: phone check, code request, sign-in and the
//! optional two-factor password challenge.
//!
//! ```text
//! Unauthenticated -> CodeRequested -> SignedIn
//!                                  -> PasswordChallengeRequired -> SignedIn
//! ```
//!
//! Both successful paths end in the completion step, the only place the
//! listening phase is entered.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::connection::TransportError;
use super::storage::AccountProfile;
use super::{Puppet, PuppetError};

/// Error kind the server returns for a malformed phone number.
///
/// Matched by exact string; a server-side rename would silently turn
/// `invalid` results into errors.
pub const PHONE_NUMBER_INVALID: &str = "PHONE_NUMBER_INVALID";

/// Error kind signalling that the account has a two-factor password.
pub const SESSION_PASSWORD_NEEDED: &str = "SESSION_PASSWORD_NEEDED";

/// Where a puppet is in the sign-in flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No sign-in attempt yet, or logged out.
    Unauthenticated,
    /// A verification code was sent.
    CodeRequested,
    /// The code was accepted but a password is required.
    PasswordChallengeRequired,
    /// Signed in and listening.
    SignedIn,
}

/// Registration status of a phone number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhoneStatus {
    /// An account exists for the number.
    Registered,
    /// No account exists for the number.
    Unregistered,
    /// The server rejected the number as malformed.
    Invalid,
}

/// Result of a sign-in step that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum AuthOutcome {
    /// Authentication completed.
    Ok,
    /// A password challenge must be answered via [`Puppet::check_password`].
    NeedPassword {
        /// User-chosen password hint.
        hint: String,
        /// Salt for hashing the password answer.
        salt: Vec<u8>,
    },
}

/// Metadata returned when a verification code is sent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SentCode {
    /// Hash to pass back to [`Puppet::sign_in`].
    pub phone_code_hash: String,
    /// Remaining protocol-defined fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct CheckedPhone {
    phone_registered: bool,
}

#[derive(Deserialize)]
struct Authorization {
    user: AuthorizedUser,
}

#[derive(Deserialize)]
struct AuthorizedUser {
    id: i64,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    #[serde(alias = "phone")]
    phone_number: Option<String>,
}

impl From<AuthorizedUser> for AccountProfile {
    fn from(user: AuthorizedUser) -> Self {
        Self {
            account_id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            phone_number: user.phone_number,
        }
    }
}

#[derive(Deserialize)]
struct PasswordInfo {
    #[serde(default)]
    hint: String,
    #[serde(default)]
    current_salt: Vec<u8>,
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, TransportError> {
    serde_json::from_value(value).map_err(|e| TransportError::Malformed {
        method: method.to_owned(),
        reason: e.to_string(),
    })
}

impl Puppet {
    /// Ask whether `phone_number` belongs to a registered account.
    ///
    /// # Errors
    ///
    /// Propagates transport errors other than [`PHONE_NUMBER_INVALID`].
    pub async fn check_phone(&self, phone_number: &str) -> Result<PhoneStatus, PuppetError> {
        let transport = self.connection.connection().await?;
        let method = "auth.checkPhone";
        match transport
            .invoke(method, json!({ "phone_number": phone_number }))
            .await
        {
            Ok(value) => {
                let checked: CheckedPhone = decode(method, value)?;
                Ok(if checked.phone_registered {
                    PhoneStatus::Registered
                } else {
                    PhoneStatus::Unregistered
                })
            }
            Err(e) if e.is_kind(PHONE_NUMBER_INVALID) => Ok(PhoneStatus::Invalid),
            Err(e) => Err(e.into()),
        }
    }

    /// Request a verification code for `phone_number`.
    ///
    /// # Errors
    ///
    /// Propagates transport errors unchanged.
    pub async fn send_code(&self, phone_number: &str) -> Result<SentCode, PuppetError> {
        let transport = self.connection.connection().await?;
        let config = self.connection.config();
        let method = "auth.sendCode";
        let value = transport
            .invoke(
                method,
                json!({
                    "phone_number": phone_number,
                    "current_number": true,
                    "api_id": config.api.api_id,
                    "api_hash": config.api_hash.expose(),
                }),
            )
            .await?;
        let sent: SentCode = decode(method, value)?;
        self.set_state(AuthState::CodeRequested).await;
        Ok(sent)
    }

    /// Sign in with the code the user received.
    ///
    /// Returns [`AuthOutcome::NeedPassword`] without completing sign-in
    /// when the account has a two-factor password.
    ///
    /// # Errors
    ///
    /// Propagates transport errors other than [`SESSION_PASSWORD_NEEDED`],
    /// and persistence errors from the completion step.
    pub async fn sign_in(
        &self,
        phone_number: &str,
        phone_code_hash: &str,
        phone_code: &str,
    ) -> Result<AuthOutcome, PuppetError> {
        let transport = self.connection.connection().await?;
        let method = "auth.signIn";
        let result = transport
            .invoke(
                method,
                json!({
                    "phone_number": phone_number,
                    "phone_code": phone_code,
                    "phone_code_hash": phone_code_hash,
                }),
            )
            .await;

        match result {
            Ok(value) => {
                let auth: Authorization = decode(method, value)?;
                self.complete_sign_in(auth.user.into()).await
            }
            Err(e) if e.is_kind(SESSION_PASSWORD_NEEDED) => {
                let method = "account.getPassword";
                let value = transport.invoke(method, json!({})).await?;
                let password: PasswordInfo = decode(method, value)?;
                self.set_state(AuthState::PasswordChallengeRequired).await;
                Ok(AuthOutcome::NeedPassword {
                    hint: password.hint,
                    salt: password.current_salt,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Answer the password challenge with the salted password hash.
    ///
    /// # Errors
    ///
    /// Propagates transport errors unchanged, and persistence errors from
    /// the completion step.
    pub async fn check_password(&self, password_hash: &[u8]) -> Result<AuthOutcome, PuppetError> {
        let transport = self.connection.connection().await?;
        let method = "auth.checkPassword";
        let value = transport
            .invoke(method, json!({ "password_hash": password_hash }))
            .await?;
        let auth: Authorization = decode(method, value)?;
        self.complete_sign_in(auth.user.into()).await
    }

    /// Log the account out on the server.
    ///
    /// The auth state returns to [`AuthState::Unauthenticated`]. The local
    /// credential blob and any running listeners are left as is; clearing
    /// them is up to the caller.
    ///
    /// # Errors
    ///
    /// Propagates transport errors unchanged; the state is kept on failure.
    pub async fn log_out(&self) -> Result<(), PuppetError> {
        let transport = self.connection.connection().await?;
        transport.invoke("auth.logOut", json!({})).await?;
        info!("logged out");
        self.set_state(AuthState::Unauthenticated).await;
        Ok(())
    }

    /// Completion step: record the account, persist, start listening.
    async fn complete_sign_in(&self, profile: AccountProfile) -> Result<AuthOutcome, PuppetError> {
        info!(account_id = profile.account_id, "sign-in complete");
        self.storage.record_profile(&profile).await?;
        self.begin_listening().await?;
        self.set_state(AuthState::SignedIn).await;
        Ok(AuthOutcome::Ok)
    }
}
