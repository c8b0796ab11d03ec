//! GitHub token lookup in the OS keychain.
//!
//! One token per API host (Keychain on macOS, Credential Manager on Windows,
//! Secret Service on Linux).

use keyring::Entry;

use crate::error::ReviewError;

/// Service name used in the keychain.
const SERVICE_NAME: &str = "review-watch";

/// Read-only keychain access. Tokens are stored with the OS tooling or `gh`.
pub struct CredentialService;

impl CredentialService {
    /// Retrieve the token for an API host.
    ///
    /// Returns `NotFound` when nothing is stored.
    pub fn get_token(api_url: &str) -> Result<String, ReviewError> {
        let entry = Self::get_entry(api_url)?;

        entry.get_password().map_err(|e| read_error(api_url, e))
    }

    fn get_entry(api_url: &str) -> Result<Entry, ReviewError> {
        Entry::new(SERVICE_NAME, &account_for(api_url)).map_err(|e| {
            ReviewError::credential_storage(format!("Failed to create keyring entry: {}", e))
        })
    }
}

fn read_error(api_url: &str, error: keyring::Error) -> ReviewError {
    match error {
        keyring::Error::NoEntry => ReviewError::not_found_with_id("credential", api_url),
        e => ReviewError::credential_storage(format!("Failed to retrieve token: {}", e)),
    }
}

/// Keychain account for an API URL: its lowercased host.
///
/// `https://api.github.com/` and `HTTPS://API.GITHUB.COM` share one entry.
fn account_for(api_url: &str) -> String {
    let url = api_url.trim().to_lowercase();
    let without_scheme = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(&url);
    without_scheme
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string()
}
