//! Application state management
//!
//! Every service is built once at startup from the same store handle and
//! shared through `Arc<AppState>`. Nothing here holds session data.

use std::sync::Arc;
use std::time::Instant;

use crm_core::{AppConfig, AuthStore};

use crate::auth::{
    AuthService, CredentialHasher, MembershipService, PasswordConfig, SessionValidator,
    TokenRefreshManager,
};

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// The single source of truth for users, sessions and grants
    pub store: Arc<dyn AuthStore>,
    pub auth: AuthService,
    pub validator: SessionValidator,
    pub refresher: TokenRefreshManager,
    pub members: MembershipService,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Wire up services with hashing parameters taken from configuration
    pub fn new(config: AppConfig, store: Arc<dyn AuthStore>) -> Self {
        let hasher =
            CredentialHasher::new(PasswordConfig::from(&config.auth.password_hashing));
        Self::with_hasher(config, store, hasher)
    }

    pub fn with_hasher(
        config: AppConfig,
        store: Arc<dyn AuthStore>,
        hasher: CredentialHasher,
    ) -> Self {
        let auth_config = config.auth.clone();
        Self {
            auth: AuthService::new(store.clone(), hasher, auth_config.clone()),
            validator: SessionValidator::new(store.clone(), auth_config.store_timeout()),
            refresher: TokenRefreshManager::new(store.clone(), auth_config),
            members: MembershipService::new(store.clone()),
            store,
            config,
            start_time: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
