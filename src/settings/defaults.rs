use configgate_types::ConfigValue;

/// A built-in setting applied by a reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDefault {
    pub category: &'static str,
    pub key: &'static str,
    pub value: ConfigValue,
    pub description: &'static str,
}

impl ConfigDefault {
    fn new(
        category: &'static str,
        key: &'static str,
        value: impl Into<ConfigValue>,
        description: &'static str,
    ) -> Self {
        Self {
            category,
            key,
            value: value.into(),
            description,
        }
    }
}

/// Built-in defaults.
///
/// Secrets default to the empty string, so a reset never needs the cipher.
pub fn default_entries() -> Vec<ConfigDefault> {
    vec![
        ConfigDefault::new("GENERAL", "app_name", "ConfigGate", "Display name of the application"),
        ConfigDefault::new("GENERAL", "max_file_size_mb", 10i64, "Upload size limit in megabytes"),
        ConfigDefault::new("GENERAL", "database_password", "", "Database password"),
        ConfigDefault::new("GENERAL", "redis_password", "", "Redis password"),
        ConfigDefault::new("SMTP", "smtp_enabled", false, "Send email notifications"),
        ConfigDefault::new("SMTP", "smtp_host", "", "SMTP server host"),
        ConfigDefault::new("SMTP", "smtp_port", 587i64, "SMTP server port"),
        ConfigDefault::new("SMTP", "smtp_username", "", "SMTP login"),
        ConfigDefault::new("SMTP", "smtp_password", "", "SMTP password"),
        ConfigDefault::new("API", "api_rate_limit", 60i64, "Requests per minute per client"),
        ConfigDefault::new("API", "openai_api_key", "", "OpenAI API key"),
        ConfigDefault::new("API", "webhook_secret", "", "Webhook signing secret"),
        ConfigDefault::new("API", "api_secret_key", "", "API signing key"),
        ConfigDefault::new("SECURITY", "session_timeout_minutes", 30i64, "Idle session lifetime"),
        ConfigDefault::new(
            "SECURITY",
            "allowed_origins",
            vec!["http://localhost:8088".to_string()],
            "CORS origins",
        ),
        ConfigDefault::new("SECURITY", "jwt_secret", "", "JWT signing secret"),
        ConfigDefault::new("SECURITY", "oauth_client_secret", "", "OAuth client secret"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SensitivityClassifier;
    use std::collections::HashSet;

    #[test]
    fn test_defaults_are_unique() {
        let entries = default_entries();
        let pairs: HashSet<_> = entries.iter().map(|d| (d.category, d.key)).collect();
        assert_eq!(pairs.len(), entries.len());
    }

    #[test]
    fn test_sensitive_defaults_are_empty() {
        let classifier = SensitivityClassifier::default();
        for default in default_entries() {
            if classifier.is_sensitive(default.category, default.key) {
                assert!(default.value.is_empty(), "{}.{}", default.category, default.key);
            }
        }
    }
}
