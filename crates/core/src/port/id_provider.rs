// Worker token / id generation port (for deterministic testing)

/// Generates unique worker tokens and, when a producer doesn't override
/// `jobId`, job ids (spec.md 3.2).
pub trait IdProvider: Send + Sync {
    fn generate_id(&self) -> String;
}

/// UUID v4 provider (production).
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}
