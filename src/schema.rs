//! Vendored Chrome DevTools Protocol schema.
//!
//! The schema JSON (domains and command names from browser_protocol +
//! js_protocol) is bundled at build time and used for two things only:
//! case-insensitive method-name normalization for `cdp` calls, and help
//! text. Chrome's canonical casing is always what goes on the wire.

use std::collections::HashMap;

use serde::Deserialize;

/// Bundled protocol schema JSON.
const PROTOCOL_JSON: &str = include_str!("../data/protocol.json");

#[derive(Debug, Deserialize)]
struct SchemaFile {
    domains: Vec<SchemaDomain>,
}

#[derive(Debug, Deserialize)]
struct SchemaDomain {
    domain: String,
    #[serde(default)]
    commands: Vec<SchemaCommand>,
}

#[derive(Debug, Deserialize)]
struct SchemaCommand {
    name: String,
}

/// Method-name lookup over the bundled protocol schema.
#[derive(Debug)]
pub struct ProtocolSchema {
    /// lowercase "domain.method" → canonical "Domain.method"
    canonical: HashMap<String, String>,
    /// Canonical domain names in schema order.
    domains: Vec<String>,
}

impl ProtocolSchema {
    /// Parse the bundled schema.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the bundled file is malformed (a build
    /// defect, surfaced rather than papered over).
    pub fn load() -> Result<Self, serde_json::Error> {
        let file: SchemaFile = serde_json::from_str(PROTOCOL_JSON)?;
        let mut canonical = HashMap::new();
        let mut domains = Vec::with_capacity(file.domains.len());
        for domain in &file.domains {
            domains.push(domain.domain.clone());
            for command in &domain.commands {
                let full = format!("{}.{}", domain.domain, command.name);
                canonical.insert(full.to_ascii_lowercase(), full);
            }
        }
        Ok(Self { canonical, domains })
    }

    /// Resolve a method name case-insensitively to its canonical casing.
    ///
    /// Accepts `page.NAVIGATE`, `Page.navigate`, etc.; returns `None`
    /// when the method is not in the protocol.
    #[must_use]
    pub fn normalize(&self, method: &str) -> Option<&str> {
        self.canonical
            .get(&method.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Canonical domain names, for help text.
    #[must_use]
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Canonical method names starting with the given prefix
    /// (case-insensitive), sorted; for help text.
    #[must_use]
    pub fn methods_with_prefix(&self, prefix: &str) -> Vec<&str> {
        let prefix = prefix.to_ascii_lowercase();
        let mut methods: Vec<&str> = self
            .canonical
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, canonical)| canonical.as_str())
            .collect();
        methods.sort_unstable();
        methods
    }

    /// Number of known methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ProtocolSchema {
        ProtocolSchema::load().expect("bundled schema must parse")
    }

    #[test]
    fn bundled_schema_parses_and_is_nonempty() {
        let s = schema();
        assert!(s.len() > 100);
        assert!(s.domains().iter().any(|d| d == "Network"));
    }

    #[test]
    fn normalize_is_case_insensitive() {
        let s = schema();
        assert_eq!(s.normalize("page.navigate"), Some("Page.navigate"));
        assert_eq!(s.normalize("PAGE.NAVIGATE"), Some("Page.navigate"));
        assert_eq!(s.normalize("Page.navigate"), Some("Page.navigate"));
        assert_eq!(
            s.normalize("network.getresponsebody"),
            Some("Network.getResponseBody")
        );
    }

    #[test]
    fn normalize_rejects_unknown_methods() {
        let s = schema();
        assert_eq!(s.normalize("Bogus.method"), None);
        assert_eq!(s.normalize("Pagenavigate"), None);
        assert_eq!(s.normalize(""), None);
    }

    #[test]
    fn core_session_methods_are_present() {
        let s = schema();
        for method in [
            "Target.getTargets",
            "Target.createTarget",
            "Target.attachToTarget",
            "Target.setDiscoverTargets",
            "Network.enable",
            "Network.getResponseBody",
            "Runtime.enable",
            "Runtime.evaluate",
            "Log.enable",
            "DOM.getDocument",
            "DOM.getOuterHTML",
            "DOM.querySelectorAll",
            "Overlay.highlightNode",
            "Page.captureScreenshot",
            "Page.getFrameTree",
        ] {
            assert_eq!(s.normalize(method), Some(method), "missing {method}");
        }
    }

    #[test]
    fn prefix_listing_is_sorted() {
        let s = schema();
        let methods = s.methods_with_prefix("log.");
        assert!(methods.contains(&"Log.enable"));
        let mut sorted = methods.clone();
        sorted.sort_unstable();
        assert_eq!(methods, sorted);
    }
}
