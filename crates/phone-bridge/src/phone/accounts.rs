//! Account management

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{PhoneError, PhoneResult};
use crate::media::{MediaDirection, MediaType};
use crate::stack::{AccountHandle, AccountSpec, Credential};

use super::{AccountId, Phone, PhoneEvent};

/// User-facing account settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// `user@domain`
    pub user_id: String,
    pub password: String,
    /// Registrar host; the domain of `user_id` when empty
    pub server_host: String,
    /// Registrar port, 0 for the default
    pub server_port: u16,
    /// Outbound proxy host, none when empty
    pub proxy_host: String,
    pub proxy_port: u16,
}

impl Phone {
    /// Accounts known to the phone
    pub fn available_accounts(&self) -> Vec<AccountId> {
        self.accounts.keys().copied().collect()
    }

    /// Add an account to the stack; it is not registered yet
    pub fn insert_account(&mut self, id: AccountId, config: &AccountConfig) -> PhoneResult<()> {
        if !self.is_calls_available() {
            return Err(PhoneError::invalid_state("stack is not running"));
        }
        if id.is_nil() {
            return Err(PhoneError::invalid_argument("account id must not be nil"));
        }
        if self.accounts.contains_key(&id) {
            return Err(PhoneError::invalid_argument(format!("account {} already exists", id)));
        }

        let spec = self.account_spec(config)?;
        let handle = self.stack.account_add(&spec).map_err(|status| {
            error!(account = %id, status = %status, "Failed to create account");
            PhoneError::stack(status, self.stack.status_text(status))
        })?;

        info!(account = %id, handle = handle.0, "Account created");
        self.accounts.insert(id, handle);
        self.emit(PhoneEvent::AccountInserted { account: id });
        Ok(())
    }

    /// Replace an account's settings
    pub fn update_account(&mut self, id: AccountId, config: &AccountConfig) -> PhoneResult<()> {
        let handle = self.account_handle(id)?;
        let spec = self.account_spec(config)?;
        self.stack.account_modify(handle, &spec).map_err(|status| {
            error!(account = %id, status = %status, "Failed to change account");
            PhoneError::stack(status, self.stack.status_text(status))
        })?;

        info!(account = %id, handle = handle.0, "Account changed");
        self.emit(PhoneEvent::AccountChanged { account: id });
        Ok(())
    }

    /// Delete an account together with its calls
    pub fn remove_account(&mut self, id: AccountId) -> bool {
        let Some(&handle) = self.accounts.get(&id) else {
            return false;
        };

        let calls: Vec<_> = self
            .calls
            .iter()
            .filter(|call| call.account_id() == id)
            .map(|call| call.id())
            .collect();
        for call in calls {
            self.remove_call(call);
        }
        self.set_account_registered(id, false);

        if let Err(status) = self.stack.account_del(handle) {
            warn!(account = %id, status = %status, "Failed to delete account from stack");
        }
        self.accounts.remove(&id);
        info!(account = %id, "Account destroyed");
        self.emit(PhoneEvent::AccountRemoved { account: id });
        true
    }

    /// Local URI of an account as the stack reports it
    pub fn account_uri(&self, id: AccountId) -> Option<String> {
        let handle = *self.accounts.get(&id)?;
        self.stack.account_info(handle).ok().map(|info| info.uri)
    }

    /// Settings of an account, read back from the stack
    pub fn account_config(&self, id: AccountId) -> Option<AccountConfig> {
        let handle = *self.accounts.get(&id)?;
        let spec = self.stack.account_config(handle).ok()?;
        let credential = spec.credentials.first()?;

        let mut config = AccountConfig {
            user_id: credential.username.clone(),
            password: credential.password.clone(),
            ..Default::default()
        };
        if let Some((host, port)) = spec.proxies.first().and_then(|p| parse_sip_uri(p)) {
            config.proxy_host = host;
            config.proxy_port = port;
        }
        if let Some((host, port)) = parse_sip_uri(&spec.registrar_uri) {
            config.server_host = host;
            config.server_port = port;
        }
        Some(config)
    }

    /// Whether the account holds a live registration
    pub fn is_account_registered(&self, id: AccountId) -> bool {
        self.accounts
            .get(&id)
            .and_then(|handle| self.stack.account_info(*handle).ok())
            .is_some_and(|info| info.expires > 0)
    }

    /// Request registration or unregistration
    ///
    /// Returns true when a request was sent; the outcome arrives as
    /// `AccountRegistrationChanged`.
    pub fn set_account_registered(&mut self, id: AccountId, registered: bool) -> bool {
        let Some(&handle) = self.accounts.get(&id) else {
            return false;
        };
        if self.is_account_registered(id) == registered {
            return false;
        }
        match self.stack.account_set_registration(handle, registered) {
            Ok(()) => {
                info!(account = %id, registered, "Account registration request sent");
                true
            }
            Err(status) => {
                error!(account = %id, status = %status, "Failed to send account registration request: {}", self.stack.status_text(status));
                false
            }
        }
    }

    pub(super) fn account_handle(&self, id: AccountId) -> PhoneResult<AccountHandle> {
        self.accounts
            .get(&id)
            .copied()
            .ok_or_else(|| PhoneError::AccountNotFound {
                account_id: id.to_string(),
            })
    }

    pub(super) fn account_id_by_handle(&self, handle: AccountHandle) -> Option<AccountId> {
        self.accounts
            .iter()
            .find(|(_, h)| **h == handle)
            .map(|(id, _)| *id)
    }

    fn account_spec(&self, config: &AccountConfig) -> PhoneResult<AccountSpec> {
        let id_uri = format!("<sip:{}>", config.user_id);
        if config.user_id.is_empty() || !self.stack.verify_uri(&id_uri) {
            return Err(PhoneError::invalid_argument(format!("invalid user id: {:?}", config.user_id)));
        }

        let server_host = if config.server_host.is_empty() {
            config
                .user_id
                .split_once('@')
                .map_or(config.user_id.as_str(), |(_, domain)| domain)
        } else {
            config.server_host.as_str()
        };
        let proxies = if config.proxy_host.is_empty() {
            Vec::new()
        } else {
            vec![sip_uri(&config.proxy_host, config.proxy_port)]
        };

        Ok(AccountSpec {
            id_uri,
            registrar_uri: sip_uri(server_host, config.server_port),
            proxies,
            credentials: vec![Credential {
                realm: "*".to_string(),
                scheme: "digest".to_string(),
                username: config.user_id.clone(),
                password: config.password.clone(),
            }],
            register_on_add: false,
            video_capture_device: self
                .default_device(MediaType::Video, MediaDirection::CAPTURE)
                .map(|d| d.index),
            video_render_device: self
                .default_device(MediaType::Video, MediaDirection::PLAYBACK)
                .map(|d| d.index),
        })
    }
}

fn sip_uri(host: &str, port: u16) -> String {
    if port > 0 {
        format!("<sip:{}:{}>", host, port)
    } else {
        format!("<sip:{}>", host)
    }
}

/// Host and port of `<sip:host[:port]>`; port 0 when absent
fn parse_sip_uri(uri: &str) -> Option<(String, u16)> {
    let uri = uri.trim();
    let uri = uri
        .strip_prefix('<')
        .and_then(|u| u.strip_suffix('>'))
        .unwrap_or(uri);
    let uri = uri.strip_prefix("sip:").unwrap_or(uri);
    if uri.is_empty() {
        return None;
    }
    match uri.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), port.parse().unwrap_or(0))),
        None => Some((uri.to_string(), 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sip_uri_with_and_without_port() {
        assert_eq!(sip_uri("example.com", 0), "<sip:example.com>");
        assert_eq!(sip_uri("example.com", 5070), "<sip:example.com:5070>");
        assert_eq!(parse_sip_uri("<sip:example.com:5070>"), Some(("example.com".to_string(), 5070)));
        assert_eq!(parse_sip_uri("sip:proxy.example.com"), Some(("proxy.example.com".to_string(), 0)));
        assert_eq!(parse_sip_uri("<sip:>"), None);
    }
}
