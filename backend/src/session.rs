//! Cookie-carried session credentials for the embedded Looker portal.
//!
//! The requesting user is identified by the `looker_user_id` cookie. The
//! cookieless-embed tokens travel in a second cookie as an eight element JSON
//! array whose first element, the session reference token, is encrypted with
//! a key derived from `JWT_SECRET`.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::HttpRequest;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;

pub const USER_ID_COOKIE: &str = "looker_user_id";
pub const EMBED_TOKENS_COOKIE: &str = "looker_embed_tokens";

const KEY_SALT: &[u8] = b"lookml-ingest-session";
const KEY_ITERATIONS: u32 = 100_000;
const NONCE_LEN: usize = 12;
const COOKIE_MAX_AGE_DAYS: i64 = 30;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("token is not in nonce:ciphertext form")]
    Malformed,
    #[error("token could not be encrypted")]
    Encrypt,
    #[error("token could not be decrypted")]
    Decrypt,
}

/// Symmetric cipher for the session reference token.
///
/// The key is PBKDF2-HMAC-SHA256 over the configured secret; values are
/// AES-256-GCM sealed and written as `hex(nonce):hex(ciphertext)`.
#[derive(Clone)]
pub struct SessionCipher {
    cipher: Aes256Gcm,
}

impl SessionCipher {
    pub fn new(secret: &str) -> Self {
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), KEY_SALT, KEY_ITERATIONS, &mut key);
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    pub fn encrypt(&self, token: &str) -> Result<String, SessionError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), token.as_bytes())
            .map_err(|_| SessionError::Encrypt)?;
        Ok(format!("{}:{}", hex::encode(nonce), hex::encode(sealed)))
    }

    pub fn decrypt(&self, value: &str) -> Result<String, SessionError> {
        let (nonce, sealed) = value.split_once(':').ok_or(SessionError::Malformed)?;
        let nonce = hex::decode(nonce).map_err(|_| SessionError::Malformed)?;
        let sealed = hex::decode(sealed).map_err(|_| SessionError::Malformed)?;
        if nonce.len() != NONCE_LEN {
            return Err(SessionError::Malformed);
        }
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), sealed.as_slice())
            .map_err(|_| SessionError::Decrypt)?;
        String::from_utf8(plain).map_err(|_| SessionError::Decrypt)
    }
}

/// Tokens returned by a cookieless embed session acquire or generate call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedTokens {
    pub session_reference_token: String,
    pub api_token: String,
    pub authentication_token: String,
    pub navigation_token: String,
    pub api_token_ttl: Option<u64>,
    pub authentication_token_ttl: Option<u64>,
    pub navigation_token_ttl: Option<u64>,
    pub session_reference_token_ttl: Option<u64>,
}

impl EmbedTokens {
    /// Cookie value: the positional array with the reference token encrypted.
    pub fn to_cookie_value(&self, cipher: &SessionCipher) -> Result<String, SessionError> {
        Ok(json!([
            cipher.encrypt(&self.session_reference_token)?,
            self.api_token,
            self.authentication_token,
            self.navigation_token,
            self.api_token_ttl,
            self.authentication_token_ttl,
            self.navigation_token_ttl,
            self.session_reference_token_ttl,
        ])
        .to_string())
    }

    /// Reverse of `to_cookie_value`; anything malformed reads as no session.
    pub fn from_cookie_value(raw: &str, cipher: &SessionCipher) -> Option<Self> {
        let values: Vec<Value> = serde_json::from_str(raw).ok()?;
        if values.len() != 8 {
            return None;
        }
        let text = |idx: usize| values[idx].as_str().map(str::to_string);
        let ttl = |idx: usize| values[idx].as_u64();

        Some(EmbedTokens {
            session_reference_token: cipher.decrypt(values[0].as_str()?).ok()?,
            api_token: text(1)?,
            authentication_token: text(2)?,
            navigation_token: text(3)?,
            api_token_ttl: ttl(4),
            authentication_token_ttl: ttl(5),
            navigation_token_ttl: ttl(6),
            session_reference_token_ttl: ttl(7),
        })
    }
}

/// The Looker user behind the request, if the portal identified one.
pub fn user_id(req: &HttpRequest) -> Option<String> {
    req.cookie(USER_ID_COOKIE)
        .map(|c| c.value().trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn read_embed_tokens(req: &HttpRequest, cipher: &SessionCipher) -> Option<EmbedTokens> {
    let cookie = req.cookie(EMBED_TOKENS_COOKIE)?;
    EmbedTokens::from_cookie_value(cookie.value(), cipher)
}

pub fn embed_tokens_cookie(
    tokens: &EmbedTokens,
    cipher: &SessionCipher,
    secure: bool,
) -> Result<Cookie<'static>, SessionError> {
    Ok(Cookie::build(EMBED_TOKENS_COOKIE, tokens.to_cookie_value(cipher)?)
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .max_age(CookieDuration::days(COOKIE_MAX_AGE_DAYS))
        .finish())
}
