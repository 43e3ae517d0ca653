//! Credential persistence
//!
//! Three entries live in durable storage: access token, refresh token and
//! the serialized user. They are written and cleared as a set.

use ledgerly_api::User;
use ledgerly_storage::KeyValueStore;
use std::sync::Arc;

use crate::Result;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_KEY: &str = "user";

const ALL_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY];

#[derive(Clone)]
pub struct CredentialVault {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialVault {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn access_token(&self) -> Result<Option<String>> {
        Ok(self.store.get(ACCESS_TOKEN_KEY)?)
    }

    pub fn refresh_token(&self) -> Result<Option<String>> {
        Ok(self.store.get(REFRESH_TOKEN_KEY)?)
    }

    /// Stored user, or `Err` when the entry exists but no longer parses
    pub fn user(&self) -> Result<Option<User>> {
        match self.store.get(USER_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// True if any of the three entries is present
    pub fn has_any(&self) -> Result<bool> {
        for key in ALL_KEYS {
            if self.store.get(key)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn store_login(&self, access_token: &str, refresh_token: &str, user: &User) -> Result<()> {
        let user_json = serde_json::to_string(user)?;
        self.store.set_many(&[
            (ACCESS_TOKEN_KEY, access_token),
            (REFRESH_TOKEN_KEY, refresh_token),
            (USER_KEY, &user_json),
        ])?;
        Ok(())
    }

    /// Persist the result of a token refresh; the refresh token is only
    /// replaced when the server rotated it
    pub fn store_refreshed(&self, access_token: &str, refresh_token: Option<&str>) -> Result<()> {
        match refresh_token {
            Some(refresh_token) => self.store.set_many(&[
                (ACCESS_TOKEN_KEY, access_token),
                (REFRESH_TOKEN_KEY, refresh_token),
            ])?,
            None => self.store.set(ACCESS_TOKEN_KEY, access_token)?,
        }
        Ok(())
    }

    pub fn store_user(&self, user: &User) -> Result<()> {
        let user_json = serde_json::to_string(user)?;
        self.store.set(USER_KEY, &user_json)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove_many(&ALL_KEYS)?;
        Ok(())
    }
}
