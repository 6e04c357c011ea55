//! Unique-id generation for outbound messages.

use std::sync::Arc;

use uuid::Uuid;

/// Produces globally unique message identifiers.
///
/// Implementations must never return an empty id; the relay uses the empty
/// id to mean "nothing in flight".
pub trait IdGenerator: Send + Sync {
    /// Generate a fresh id for a message published by `publisher`.
    fn generate(&self, publisher: &str) -> String;
}

/// Shared id generator handle.
pub type SharedIdGenerator = Arc<dyn IdGenerator>;

/// Default generator: `<publisher>-<uuid v4>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn generate(&self, publisher: &str) -> String {
        let uuid = Uuid::new_v4().simple();
        if publisher.is_empty() {
            uuid.to_string()
        } else {
            format!("{}-{}", publisher, uuid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_ids_are_unique_and_prefixed() {
        let ids = UuidIdGenerator;
        let a = ids.generate("console");
        let b = ids.generate("console");

        assert!(a.starts_with("console-"));
        assert_ne!(a, b);
        assert!(!ids.generate("").is_empty());
    }
}
