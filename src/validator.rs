//! C1 URL Validator (spec §4.1).
//!
//! Pure, synchronous, fails closed on any parse error.

use url::Url;

use crate::error::ValidationError;

#[derive(Debug, Clone)]
pub struct UrlValidator {
    allow_hosts: Vec<String>,
    deny_extensions: Vec<String>,
    require_https: bool,
}

impl UrlValidator {
    pub fn new(allow_hosts: Vec<String>, deny_extensions: Vec<String>) -> Self {
        Self::with_scheme_policy(allow_hosts, deny_extensions, true)
    }

    /// `require_https = false` only exists so integration tests can point
    /// the pipeline at a plain-http mock server; production configuration
    /// always leaves this at its `true` default.
    pub fn with_scheme_policy(
        allow_hosts: Vec<String>,
        deny_extensions: Vec<String>,
        require_https: bool,
    ) -> Self {
        Self {
            allow_hosts: allow_hosts.into_iter().map(|h| h.to_ascii_lowercase()).collect(),
            deny_extensions: deny_extensions
                .into_iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            require_https,
        }
    }

    /// Accepts iff: scheme is exactly `https` (unless the scheme policy has
    /// been relaxed); host (lower-cased) contains at least one allow-list
    /// token as a suffix-or-infix match; path does not end with a denied
    /// extension.
    pub fn validate(&self, url: &str) -> Result<(), ValidationError> {
        let parsed = Url::parse(url).map_err(|e| ValidationError::Unparsable(e.to_string()))?;

        if self.require_https && parsed.scheme() != "https" {
            return Err(ValidationError::NotHttps(parsed.scheme().to_string()));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| ValidationError::Unparsable("missing host".to_string()))?
            .to_ascii_lowercase();

        if !self.allow_hosts.iter().any(|token| host.contains(token.as_str())) {
            return Err(ValidationError::HostNotAllowed(host));
        }

        let path = parsed.path().to_ascii_lowercase();
        if let Some(ext) = self
            .deny_extensions
            .iter()
            .find(|ext| path.ends_with(ext.as_str()))
        {
            return Err(ValidationError::DeniedExtension(ext.clone()));
        }

        Ok(())
    }
}
