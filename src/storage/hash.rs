use sha2::{Digest, Sha256};

pub fn compute_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Time-based image identifier: `<epoch-millis>-<8 hex>.<ext>`.
///
/// The hex suffix keeps two generations landing in the same millisecond
/// apart; the millis prefix keeps ids sortable by creation time.
pub fn image_id(created_at: i64, salt: &str, extension: &str) -> String {
    let hash = compute_hash(&format!("{created_at}:{salt}"));
    format!("{created_at}-{}.{extension}", &hash[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_ids_sort_by_time() {
        let earlier = image_id(1_700_000_000_000, "a", "png");
        let later = image_id(1_700_000_000_001, "a", "png");
        assert!(earlier < later);
        assert!(earlier.starts_with("1700000000000-"));
        assert!(earlier.ends_with(".png"));
    }

    #[test]
    fn salt_separates_same_millisecond() {
        assert_ne!(image_id(1, "cat", "png"), image_id(1, "dog", "png"));
    }
}
