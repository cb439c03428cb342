use crate::error::{AppError, AppResult};

pub fn hash_password(plain: &str, cost: u32) -> AppResult<String> {
    bcrypt::hash(plain, cost).map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Malformed stored hashes count as a mismatch.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    bcrypt::verify(plain, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("correct horse", 4).unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("battery staple", &hash));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-bcrypt-hash"));
    }
}
