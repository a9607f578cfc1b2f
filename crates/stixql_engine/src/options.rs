use serde::{Deserialize, Serialize};

use stixql_compile::SanitizeProfile;

/// Engine behaviour knobs. Everything has a safe default; construct with
/// struct update syntax when overriding single fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How the encoder treats document properties with no schema mapping.
    pub sanitize: SanitizeProfile,
    /// Escalate internal inconsistencies (e.g. a marking selector that
    /// addresses no encoded property) to per-document errors instead of
    /// logged skips.
    pub strict_failure: bool,
    /// Identities per existence query when checking references against the
    /// store.
    pub existence_batch: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sanitize: SanitizeProfile::default(),
            strict_failure: false,
            existence_batch: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_lenient() {
        let config = EngineConfig::default();
        assert_eq!(config.sanitize, SanitizeProfile::DropUnknown);
        assert!(!config.strict_failure);
        assert_eq!(config.existence_batch, 50);
    }
}
