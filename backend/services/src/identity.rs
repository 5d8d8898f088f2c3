use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("error generating UUID: {0}")]
pub struct IdentityError(pub String);

/// Source of 16-byte row ids.
pub trait IdGenerator: Send {
    fn generate(&mut self) -> Result<[u8; 16], IdentityError>;
}

/// Random (v4) UUIDs in their binary form.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&mut self) -> Result<[u8; 16], IdentityError> {
        Ok(Uuid::new_v4().into_bytes())
    }
}
