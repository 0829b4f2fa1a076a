//! Password hashing, verification and strength policy
//!
//! Hashing follows OWASP recommendations for Argon2id:
//! - Memory: 64 MB
//! - Iterations: 3
//! - Parallelism: 4 lanes
//! - Salt: 16 random bytes
//! - Output: 32 bytes
//!
//! Argon2 is CPU and memory bound, so the async entry points on
//! [`CredentialHasher`] run it on the blocking thread pool.
use std::sync::{Arc, OnceLock};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use crm_core::config::{PasswordHashingConfig, PasswordPolicyConfig};
use crm_core::{CrmError, ValidationFailure};
use thiserror::Error;

/// Password hashing and verification errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Failed to verify password: {0}")]
    VerificationFailed(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,
}

impl From<PasswordError> for CrmError {
    fn from(err: PasswordError) -> Self {
        CrmError::internal(err.to_string())
    }
}

/// Argon2id cost parameters
#[derive(Debug, Clone)]
pub struct PasswordConfig {
    /// Memory cost in KB (default: 65536 = 64 MB)
    pub memory_cost: u32,
    /// Time cost (iterations, default: 3)
    pub time_cost: u32,
    /// Parallelism (lanes, default: 4)
    pub parallelism: u32,
    /// Output length in bytes (default: 32)
    pub output_len: Option<usize>,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost: 65536,
            time_cost: 3,
            parallelism: 4,
            output_len: Some(32),
        }
    }
}

impl From<&PasswordHashingConfig> for PasswordConfig {
    fn from(config: &PasswordHashingConfig) -> Self {
        Self {
            memory_cost: config.memory_cost,
            time_cost: config.time_cost,
            parallelism: config.parallelism,
            output_len: Some(32),
        }
    }
}

impl PasswordConfig {
    /// Smallest parameters Argon2 accepts. Tests only.
    pub fn insecure_fast() -> Self {
        Self {
            memory_cost: 8,
            time_cost: 1,
            parallelism: 1,
            output_len: Some(32),
        }
    }

    fn to_params(&self) -> Result<Params, PasswordError> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            self.output_len,
        )
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))
    }
}

/// Hash a password with the given parameters
///
/// Returns a PHC string (`$argon2id$v=19$m=...`) carrying algorithm,
/// parameters and salt, safe to store as is.
pub fn hash_password_with_config(
    password: &str,
    config: &PasswordConfig,
) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    let params = config.to_params()?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;

    Ok(password_hash.to_string())
}

/// Verify a plaintext password against a stored PHC hash
///
/// Parameters are read from the hash itself, so hashes made under older
/// settings keep verifying.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
    }
}

/// Configurable strength rules
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    min_length: usize,
    max_length: usize,
    require_uppercase: bool,
    require_lowercase: bool,
    require_digit: bool,
    require_special: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::from(&PasswordPolicyConfig::default())
    }
}

impl From<&PasswordPolicyConfig> for PasswordPolicy {
    fn from(config: &PasswordPolicyConfig) -> Self {
        Self {
            // Never weaker than 8, whatever the configuration says
            min_length: config.min_length.max(8),
            max_length: config.max_length,
            require_uppercase: config.require_uppercase,
            require_lowercase: config.require_lowercase,
            require_digit: config.require_digit,
            require_special: config.require_special,
        }
    }
}

impl PasswordPolicy {
    /// Check a candidate password; the error names the first unmet rule
    pub fn validate(&self, password: &str) -> Result<(), CrmError> {
        let weak = |reason: String| CrmError::Validation(ValidationFailure::WeakPassword(reason));
        let len = password.chars().count();

        if len < self.min_length {
            return Err(weak(format!(
                "Password must be at least {} characters long",
                self.min_length
            )));
        }
        if len > self.max_length {
            return Err(weak(format!(
                "Password must be at most {} characters long",
                self.max_length
            )));
        }
        if self.require_uppercase && !password.chars().any(char::is_uppercase) {
            return Err(weak(
                "Password must contain at least one uppercase letter".to_string(),
            ));
        }
        if self.require_lowercase && !password.chars().any(char::is_lowercase) {
            return Err(weak(
                "Password must contain at least one lowercase letter".to_string(),
            ));
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(weak("Password must contain at least one digit".to_string()));
        }
        if self.require_special && !password.chars().any(|c| !c.is_alphanumeric()) {
            return Err(weak(
                "Password must contain at least one special character".to_string(),
            ));
        }

        Ok(())
    }
}

/// Async hashing front end shared by the auth services
#[derive(Debug, Clone)]
pub struct CredentialHasher {
    config: Arc<PasswordConfig>,
    dummy_hash: Arc<OnceLock<Option<String>>>,
}

impl CredentialHasher {
    pub fn new(config: PasswordConfig) -> Self {
        Self {
            config: Arc::new(config),
            dummy_hash: Arc::new(OnceLock::new()),
        }
    }

    pub async fn hash(&self, password: &str) -> Result<String, CrmError> {
        let config = self.config.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hash_password_with_config(&password, &config))
            .await
            .map_err(|e| CrmError::internal(format!("hashing task failed: {e}")))?
            .map_err(CrmError::from)
    }

    pub async fn verify(&self, password: &str, hash: &str) -> Result<bool, CrmError> {
        let password = password.to_owned();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| CrmError::internal(format!("verification task failed: {e}")))?
            .map_err(CrmError::from)
    }

    /// Burn the same work as a real verification when there is no account to check
    pub async fn verify_dummy(&self, password: &str) {
        let config = self.config.clone();
        let dummy = self.dummy_hash.clone();
        let password = password.to_owned();
        let _ = tokio::task::spawn_blocking(move || {
            let hash = dummy.get_or_init(|| {
                hash_password_with_config("dummy-password-for-timing", &config).ok()
            });
            if let Some(hash) = hash {
                let _ = verify_password(&password, hash);
            }
        })
        .await;
    }
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self::new(PasswordConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_password() {
        let password = "SecureP@ssw0rd!";
        let hash = hash_password_with_config(password, &PasswordConfig::insecure_fast())
            .expect("Failed to hash password");

        assert!(verify_password(password, &hash).expect("Verification failed"));
        assert!(!verify_password("WrongPassword", &hash).expect("Verification failed"));
    }

    #[test]
    fn test_same_password_produces_different_hashes() {
        let config = PasswordConfig::insecure_fast();
        let password = "SamePassword123!";

        let hash1 = hash_password_with_config(password, &config).unwrap();
        let hash2 = hash_password_with_config(password, &config).unwrap();

        assert_ne!(hash1, hash2);
        assert!(verify_password(password, &hash1).unwrap());
        assert!(verify_password(password, &hash2).unwrap());
    }

    #[test]
    fn test_invalid_hash_format() {
        let result = verify_password("password", "invalid-hash-format");
        assert!(matches!(result, Err(PasswordError::InvalidHashFormat)));
    }

    #[test]
    fn test_default_policy_only_checks_length() {
        let policy = PasswordPolicy::default();
        assert!(policy.validate("Str0ngPass!").is_ok());
        assert!(policy.validate("alllowercase").is_ok());
        assert!(matches!(
            policy.validate("short1!"),
            Err(CrmError::Validation(ValidationFailure::WeakPassword(_)))
        ));
        assert!(policy.validate(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_complexity_rules_are_configurable() {
        let policy = PasswordPolicy::from(&PasswordPolicyConfig {
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
            ..Default::default()
        });

        assert!(policy.validate("SecureP@ssw0rd!").is_ok());
        assert!(policy.validate("password123!").is_err());
        assert!(policy.validate("PASSWORD123!").is_err());
        assert!(policy.validate("Password!").is_err());
        assert!(policy.validate("Password123").is_err());
    }

    #[test]
    fn test_policy_never_below_eight() {
        let policy = PasswordPolicy::from(&PasswordPolicyConfig {
            min_length: 4,
            ..Default::default()
        });
        assert!(policy.validate("abcdefg").is_err());
    }

    #[test]
    fn test_custom_config() {
        let config = PasswordConfig {
            memory_cost: 32768,
            time_cost: 2,
            parallelism: 2,
            output_len: Some(32),
        };

        let password = "TestPassword123!";
        let hash = hash_password_with_config(password, &config).unwrap();

        assert!(verify_password(password, &hash).unwrap());
        assert!(hash.starts_with("$argon2id$"));
        assert!(hash.contains("m=32768"));
        assert!(hash.contains("t=2"));
        assert!(hash.contains("p=2"));
    }

    #[tokio::test]
    async fn test_hasher_round_trip_off_thread() {
        let hasher = CredentialHasher::new(PasswordConfig::insecure_fast());
        let hash = hasher.hash("Str0ngPass!").await.unwrap();
        assert!(hasher.verify("Str0ngPass!", &hash).await.unwrap());
        assert!(!hasher.verify("wrong", &hash).await.unwrap());
        hasher.verify_dummy("anything").await;
    }
}
