use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation ID type for tracking one request or job across the pipeline
///
/// Uses UUID v4 so ids stay unique across processes writing to the same ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new correlation ID using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the underlying UUID
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Uuid::try_parse(id).map_or_else(|_| Self(Uuid::new_v4()), Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_uuid_round_trips() {
        let id = Uuid::new_v4();
        let correlation = CorrelationId::from(id.to_string().as_str());
        assert_eq!(correlation.as_uuid(), &id);
    }

    #[test]
    fn test_invalid_string_generates_fresh_id() {
        let a = CorrelationId::from("not-a-uuid");
        let b = CorrelationId::from("not-a-uuid");
        assert_ne!(a, b);
    }
}
