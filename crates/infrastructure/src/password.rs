use application::{password::PasswordHasherError, PasswordHasher};
use async_trait::async_trait;
use bcrypt::{hash, verify, DEFAULT_COST};
use config::SecurityConfig;
use domain::PasswordHash;

/// bcrypt 哈希器，计算放在阻塞线程池中执行
#[derive(Clone)]
pub struct BcryptPasswordHasher {
    cost: u32,
}

impl BcryptPasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }
}

impl From<&SecurityConfig> for BcryptPasswordHasher {
    fn from(config: &SecurityConfig) -> Self {
        Self::new(config.bcrypt_cost)
    }
}

impl Default for BcryptPasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_COST)
    }
}

#[async_trait]
impl PasswordHasher for BcryptPasswordHasher {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
        let cost = self.cost;
        let plaintext = plaintext.to_owned();
        let hashed = tokio::task::spawn_blocking(move || hash(plaintext, cost))
            .await
            .map_err(|err| PasswordHasherError::hash_error(err.to_string()))
            .and_then(|res| res.map_err(|err| PasswordHasherError::hash_error(err.to_string())))?;

        PasswordHash::new(hashed).map_err(|err| PasswordHasherError::hash_error(err.to_string()))
    }

    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError> {
        let plaintext = plaintext.to_owned();
        let hashed = hashed.as_str().to_owned();
        tokio::task::spawn_blocking(move || verify(plaintext, &hashed))
            .await
            .map_err(|err| PasswordHasherError::verify_error(err.to_string()))
            .and_then(|res| res.map_err(|err| PasswordHasherError::verify_error(err.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashes_and_verifies() {
        let hasher = BcryptPasswordHasher::new(4);
        let hashed = hasher.hash("s3cret").await.unwrap();

        assert_ne!(hashed.as_str(), "s3cret");
        assert!(hasher.verify("s3cret", &hashed).await.unwrap());
        assert!(!hasher.verify("wrong", &hashed).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_hash_is_a_verify_error() {
        let hasher = BcryptPasswordHasher::new(4);
        let bogus = PasswordHash::new("not-a-bcrypt-hash").unwrap();

        assert!(matches!(
            hasher.verify("anything", &bogus).await,
            Err(PasswordHasherError::Verify(_))
        ));
    }

    #[test]
    fn cost_comes_from_security_config() {
        let hasher = BcryptPasswordHasher::from(&SecurityConfig { bcrypt_cost: 6 });
        assert_eq!(hasher.cost(), 6);
    }
}
