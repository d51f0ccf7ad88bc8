//! Legacy CDN rewrite tables
//!
//! The tables are plain configuration handed to [`crate::domain::UrlRewriter`]
//! at construction, so environments and tests can swap them without touching
//! the transformation pipeline.

use serde::{Deserialize, Serialize};

/// One ordered remap rule: origin containing `legacy` is served from `target`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRule {
    /// Host or host+path prefix of the legacy origin (substring match)
    pub legacy: String,
    /// Canonical new-CDN hostname
    pub target: String,
}

impl DomainRule {
    pub fn new(legacy: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            legacy: legacy.into(),
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Substring that identifies a legacy CDN URL
    pub legacy_host_marker: String,

    /// Transform prefixes that older migrations nested inside each other
    pub wrapper_prefixes: Vec<String>,

    /// Remap rules, evaluated in declaration order
    pub domain_rules: Vec<DomainRule>,

    /// Generic proxy that takes an encoded absolute origin URL as its path
    pub fallback_proxy_prefix: String,

    /// Origins served directly, never through the proxy
    pub stock_photo_hosts: Vec<String>,

    /// Deepest payload nesting path discovery will expand
    pub max_discovery_depth: usize,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            legacy_host_marker: defaults::LEGACY_HOST_MARKER.to_string(),
            wrapper_prefixes: defaults::WRAPPER_PREFIXES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            domain_rules: defaults::DOMAIN_RULES
                .iter()
                .map(|(legacy, target)| DomainRule::new(*legacy, *target))
                .collect(),
            fallback_proxy_prefix: defaults::FALLBACK_PROXY_PREFIX.to_string(),
            stock_photo_hosts: defaults::STOCK_PHOTO_HOSTS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            max_discovery_depth: defaults::MAX_DISCOVERY_DEPTH,
        }
    }
}

impl RewriteConfig {
    /// First rule whose legacy key occurs in `origin`
    pub fn match_rule(&self, origin: &str) -> Option<&DomainRule> {
        self.domain_rules
            .iter()
            .find(|rule| origin.contains(rule.legacy.as_str()))
    }

    pub fn is_stock_photo(&self, origin: &str) -> bool {
        self.stock_photo_hosts
            .iter()
            .any(|host| origin.contains(host.as_str()))
    }
}

/// Production tables
pub mod defaults {
    pub const LEGACY_HOST_MARKER: &str = "cloudimg.io";

    pub const WRAPPER_PREFIXES: &[&str] = &[
        "https://alnnibitpo.cloudimg.io/v7/",
        "https://alnnibitpo.cloudimg.io/",
        "https://czi3m2qn.cloudimg.io/cdn/n/n/",
        "https://acbbesnfco.cloudimg.io/v7",
    ];

    /// Order matters: `pluginserver.uat2`/`uat3` must precede `pluginserver.uat`,
    /// which is a substring of both.
    pub const DOMAIN_RULES: &[(&str, &str)] = &[
        ("s3-us-west-2.amazonaws.com/imageserver.prod", "buildfire.imgix.net"),
        ("s3-us-west-2.amazonaws.com/pluginserver.prod", "bfplugins.imgix.net"),
        ("s3-us-west-2.amazonaws.com/imagelibserver", "buildfire-uat.imgix.net"),
        ("s3-us-west-2.amazonaws.com/pluginserver.uat2", "bfplugins-uat.imgix.net"),
        ("s3-us-west-2.amazonaws.com/pluginserver.uat3", "bfplugins-uat.imgix.net"),
        ("s3-us-west-2.amazonaws.com/pluginserver.uat", "bfplugins-uat.imgix.net"),
        ("s3.us-west-2.amazonaws.com/imageserver.prod", "buildfire.imgix.net"),
        ("s3.us-west-2.amazonaws.com/pluginserver.prod", "bfplugins.imgix.net"),
        ("imageserver.prod.s3.amazonaws.com", "buildfire.imgix.net"),
        ("s3.amazonaws.com/Kaleo.DevBucket", "bflegacy.imgix.net"),
        ("bfplugins-uat.imgix.net", "bfplugins-uat.imgix.net"),
        ("imagelibserver.s3.amazonaws.com", "buildfire-uat.imgix.net"),
        ("d1q5x1plk9guz6.cloudfront.net", "bfplugins-uat.imgix.net"),
        ("d3lkxgii6udy4q.cloudfront.net", "bfplugins-uat.imgix.net"),
        ("d26kqod42fnsx0.cloudfront.net", "bfplugins-uat.imgix.net"),
        ("pluginserver.buildfire.com", "bfplugins.imgix.net"),
    ];

    pub const FALLBACK_PROXY_PREFIX: &str = "https://buildfire-proxy.imgix.net/cdn/";

    pub const STOCK_PHOTO_HOSTS: &[&str] = &["images.unsplash.com"];

    pub const MAX_DISCOVERY_DEPTH: usize = 512;
}
