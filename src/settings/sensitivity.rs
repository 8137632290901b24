//! Static classification of which settings hold secrets.
//!
//! The table is part of the deployed binary, not of the stored data. Changing
//! it does not touch flags already persisted; `configgate-admin migrate`
//! re-encrypts rows that became sensitive.

/// A classification table: category → keys.
pub type ClassTable = &'static [(&'static str, &'static [&'static str])];

/// Settings whose values are credentials.
pub const SENSITIVE_CONFIGS: ClassTable = &[
    ("SMTP", &["smtp_password"]),
    ("API", &["openai_api_key", "webhook_secret", "api_secret_key"]),
    ("SECURITY", &["encryption_key", "jwt_secret", "oauth_client_secret"]),
    ("GENERAL", &["database_password", "redis_password"]),
];

/// Decides, for each (category, key), whether the value is sensitive and
/// whether it should be encrypted.
///
/// Everything sensitive must be encrypted. `encrypt_also` lists settings that
/// are encrypted when possible without being sensitive; it is empty by default.
#[derive(Debug, Clone, Copy)]
pub struct SensitivityClassifier {
    sensitive: ClassTable,
    encrypt_also: ClassTable,
}

impl SensitivityClassifier {
    pub const fn new(sensitive: ClassTable, encrypt_also: ClassTable) -> Self {
        Self {
            sensitive,
            encrypt_also,
        }
    }

    pub fn is_sensitive(&self, category: &str, key: &str) -> bool {
        contains(self.sensitive, category, key)
    }

    pub fn should_encrypt(&self, category: &str, key: &str) -> bool {
        self.is_sensitive(category, key) || contains(self.encrypt_also, category, key)
    }

    /// All sensitive (category, key) pairs.
    pub fn entries(&self) -> impl Iterator<Item = (&'static str, &'static str)> {
        self.sensitive
            .iter()
            .flat_map(|(category, keys)| keys.iter().map(move |key| (*category, *key)))
    }
}

impl Default for SensitivityClassifier {
    fn default() -> Self {
        Self::new(SENSITIVE_CONFIGS, &[])
    }
}

fn contains(table: ClassTable, category: &str, key: &str) -> bool {
    table
        .iter()
        .find(|(c, _)| *c == category)
        .is_some_and(|(_, keys)| keys.contains(&key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_classifications() {
        let classifier = SensitivityClassifier::default();
        let cases = [
            ("SMTP", "smtp_password", true),
            ("API", "openai_api_key", true),
            ("API", "webhook_secret", true),
            ("API", "api_secret_key", true),
            ("SECURITY", "encryption_key", true),
            ("SECURITY", "jwt_secret", true),
            ("SECURITY", "oauth_client_secret", true),
            ("GENERAL", "database_password", true),
            ("GENERAL", "redis_password", true),
            ("SMTP", "smtp_enabled", false),
            ("API", "api_rate_limit", false),
            ("GENERAL", "max_file_size_mb", false),
            ("GENERAL", "app_name", false),
        ];
        for (category, key, expected) in cases {
            assert_eq!(classifier.is_sensitive(category, key), expected, "{category}.{key}");
            assert_eq!(classifier.should_encrypt(category, key), expected, "{category}.{key}");
        }
    }

    #[test]
    fn test_matching_is_exact() {
        let classifier = SensitivityClassifier::default();
        assert!(!classifier.is_sensitive("smtp", "smtp_password"));
        assert!(!classifier.is_sensitive("SMTP", "SMTP_PASSWORD"));
        assert!(!classifier.is_sensitive("API", "smtp_password"));
    }

    #[test]
    fn test_entries_cover_table() {
        let entries: Vec<_> = SensitivityClassifier::default().entries().collect();
        assert_eq!(entries.len(), 9);
        assert!(entries.contains(&("SMTP", "smtp_password")));
    }

    #[test]
    fn test_encrypt_also_is_not_sensitive() {
        let classifier = SensitivityClassifier::new(SENSITIVE_CONFIGS, &[("SMTP", &["smtp_username"])]);
        assert!(classifier.should_encrypt("SMTP", "smtp_username"));
        assert!(!classifier.is_sensitive("SMTP", "smtp_username"));
    }
}
