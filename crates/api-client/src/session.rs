//! Session lifecycle: sign-in, OTP verification, password reset, sign-out
//!
//! These are the only request paths, besides the refresh round, that write
//! to the credential store. Sign-in, OTP and password-reset endpoints are
//! credential-exempt, so a stale token in the store never leaks into them.

use property_auth::{
    CredentialPair, LOGIN_PATH, LOGOUT_PATH, OTP_REQUEST_PATH, OTP_VERIFY_PATH,
    PASSWORD_RESET_CONFIRM_PATH, PASSWORD_RESET_REQUEST_PATH, SIGNUP_PATH, SessionResponse,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::client::ApiClient;
use crate::error::{Error, Result};

/// Out-of-band session notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A refresh round failed and the store was cleared. Sent once per
    /// failed round no matter how many requests were waiting on it; the
    /// receiver is expected to send the user back to sign-in.
    Terminated { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpChannel {
    Phone,
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    Signup,
    Login,
    PasswordReset,
    PhoneChange,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    identifier: &'a str,
    password: &'a str,
    remember_me: bool,
}

#[derive(Serialize)]
struct OtpRequest<'a> {
    recipient: &'a str,
    otp_type: OtpChannel,
    purpose: OtpPurpose,
}

#[derive(Serialize)]
struct OtpVerifyRequest<'a> {
    recipient: &'a str,
    otp_code: &'a str,
    purpose: OtpPurpose,
}

#[derive(Serialize)]
struct PasswordResetRequest<'a> {
    identifier: &'a str,
}

#[derive(Serialize)]
struct PasswordResetConfirm<'a> {
    token: &'a str,
    new_password: &'a str,
    new_password_confirm: &'a str,
}

#[derive(Serialize)]
struct LogoutRequest<'a> {
    refresh_token: &'a str,
}

impl ApiClient {
    /// Sign in with username/email/phone and password.
    ///
    /// On `success` with tokens, the pair and user are written to the store.
    pub async fn sign_in(
        &self,
        identifier: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<SessionResponse> {
        let response: SessionResponse = self
            .post(
                LOGIN_PATH,
                &LoginRequest {
                    identifier,
                    password,
                    remember_me,
                },
            )
            .await?;
        self.adopt_session(&response)?;
        Ok(response)
    }

    /// Register a new account. The payload is forwarded as-is.
    pub async fn sign_up<B: Serialize + ?Sized>(&self, payload: &B) -> Result<serde_json::Value> {
        self.post(SIGNUP_PATH, payload).await
    }

    pub async fn request_otp(
        &self,
        recipient: &str,
        channel: OtpChannel,
        purpose: OtpPurpose,
    ) -> Result<serde_json::Value> {
        self.post(
            OTP_REQUEST_PATH,
            &OtpRequest {
                recipient,
                otp_type: channel,
                purpose,
            },
        )
        .await
    }

    /// Verify a one-time code. A successful verification that carries
    /// tokens starts a session exactly like `sign_in`.
    pub async fn verify_otp(
        &self,
        recipient: &str,
        code: &str,
        purpose: OtpPurpose,
    ) -> Result<SessionResponse> {
        let response: SessionResponse = self
            .post(
                OTP_VERIFY_PATH,
                &OtpVerifyRequest {
                    recipient,
                    otp_code: code,
                    purpose,
                },
            )
            .await?;
        self.adopt_session(&response)?;
        Ok(response)
    }

    /// Ask for password reset instructions. The backend answers with success
    /// whether or not the account exists.
    pub async fn request_password_reset(&self, identifier: &str) -> Result<serde_json::Value> {
        self.post(
            PASSWORD_RESET_REQUEST_PATH,
            &PasswordResetRequest { identifier },
        )
        .await
    }

    /// Set a new password with the token from the reset message. Does not
    /// sign in; the caller follows up with `sign_in`.
    pub async fn confirm_password_reset(
        &self,
        token: &str,
        new_password: &str,
        new_password_confirm: &str,
    ) -> Result<serde_json::Value> {
        self.post(
            PASSWORD_RESET_CONFIRM_PATH,
            &PasswordResetConfirm {
                token,
                new_password,
                new_password_confirm,
            },
        )
        .await
    }

    /// End the session locally, then tell the backend to blacklist the
    /// refresh token.
    ///
    /// Local state is cleared first, so the session is gone even if the
    /// logout call fails.
    pub async fn sign_out(&self) -> Result<()> {
        let previous = self.store().get();
        self.store().clear().map_err(Error::Store)?;
        info!("signed out locally");

        let Some(pair) = previous else {
            return Ok(());
        };
        self.post::<serde_json::Value, _>(
            LOGOUT_PATH,
            &LogoutRequest {
                refresh_token: pair.refresh_token(),
            },
        )
        .await
        .map(|_| ())
        .inspect_err(|e| warn!(error = %e, "backend logout failed"))
    }

    /// User object stored at the last sign-in.
    pub fn current_user(&self) -> Option<serde_json::Value> {
        self.store().user()
    }

    pub fn is_signed_in(&self) -> bool {
        self.store().get().is_some()
    }

    fn adopt_session(&self, response: &SessionResponse) -> Result<()> {
        let (true, Some(tokens)) = (response.success, response.tokens.clone()) else {
            return Ok(());
        };
        let persisted = self.store().set(CredentialPair::from(tokens)).and_then(|()| {
            match &response.user {
                Some(user) => self.store().set_user(user.clone()),
                None => Ok(()),
            }
        });
        if let Err(e) = persisted {
            // The store keeps writes in memory even when persisting fails. A
            // sign-in reported as failed must not leave a live session behind.
            warn!(error = %e, "failed to persist new session, discarding it");
            if let Err(clear_err) = self.store().clear() {
                debug!(error = %clear_err, "discarded session was not persisted either");
            }
            return Err(Error::Store(e));
        }
        info!("session started");
        Ok(())
    }
}
