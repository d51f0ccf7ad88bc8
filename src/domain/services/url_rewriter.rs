//! Legacy CDN URL rewrite engine
//!
//! Pure and total: [`UrlRewriter::rewrite`] never fails. Every legacy URL
//! occurrence inside a larger string is replaced independently; strings
//! without the legacy host marker are returned untouched.
//!
//! Pipeline per occurrence:
//! 1. normalization (percent-decode, encode spaces and parentheses)
//! 2. duplicate wrapper collapse (last occurrence wins)
//! 3. shape classification ([`Shape`]), peeling nested legacy hosts
//! 4. stock-photo passthrough
//! 5. ordered domain remap
//! 6. generic proxy fallback
//! 7. query normalization (`fit`, `width`, `height`)

use regex::{Captures, Regex};
use std::borrow::Cow;
use thiserror::Error;

use crate::domain::document::{DiscoveredUrl, RewriteResult};
use crate::domain::rewrite_rules::RewriteConfig;

#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("Invalid rewrite pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Invalid rewrite configuration: {0}")]
    InvalidConfig(String),
}

/// Recognized legacy transform encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `/s/width/<w>/`
    Width { width: u32 },
    /// `/bound/<w>x<h>/n/`, fit within box
    Bound { width: u32, height: u32 },
    /// `/crop/<w>x<h>/n/`
    Crop { width: u32, height: u32 },
    /// Transform host wrapping an origin URL with no parameters
    Passthrough,
}

impl Shape {
    /// Proxy query parameters carried by this shape
    pub fn query_params(self) -> Option<String> {
        match self {
            Self::Width { width } => Some(format!("width={}", width)),
            Self::Bound { width, height } => Some(format!("width={}&height={}", width, height)),
            Self::Crop { width, height } => {
                Some(format!("fit=crop&width={}&height={}", width, height))
            }
            Self::Passthrough => None,
        }
    }
}

/// A classified legacy URL: its shape and the unwrapped origin (`host/path?query`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub shape: Shape,
    pub origin: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShapeKind {
    Width,
    Bound,
    Crop,
    Passthrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryMode {
    /// Only `fit`, `width`, `height` survive
    AllowListOnly,
    /// Origin's own parameters are kept ahead of the normalized size parameters
    PreserveOrigin,
}

const SIZE_PARAMS: [&str; 4] = ["fit", "func", "width", "height"];

#[derive(Debug, Clone)]
pub struct UrlRewriter {
    config: RewriteConfig,
    legacy_url: Regex,
    encoded_legacy_url: Regex,
    legacy_scheme: Regex,
    proxied_legacy_url: Regex,
    legacy_origin: Regex,
    shapes: Vec<(ShapeKind, Regex)>,
    size_param: Regex,
}

impl UrlRewriter {
    pub fn new(config: RewriteConfig) -> Result<Self, RewriteError> {
        if config.legacy_host_marker.trim().is_empty() {
            return Err(RewriteError::InvalidConfig(
                "legacy_host_marker must not be empty".to_string(),
            ));
        }
        if config.fallback_proxy_prefix.trim().is_empty() {
            return Err(RewriteError::InvalidConfig(
                "fallback_proxy_prefix must not be empty".to_string(),
            ));
        }
        if let Some(index) = config.domain_rules.iter().position(|r| r.legacy.is_empty()) {
            return Err(RewriteError::InvalidConfig(format!(
                "domain rule #{} has an empty legacy key",
                index
            )));
        }

        let marker = regex::escape(&config.legacy_host_marker);
        let host = format!(r"[a-z0-9.-]*{}", marker);
        let origin = r"https?:/{1,2}(.+)$";

        let shapes = vec![
            (
                ShapeKind::Width,
                Regex::new(&format!(r"(?i)^https://{}/s/width/(\d{{1,9}})/{}", host, origin))?,
            ),
            (
                ShapeKind::Bound,
                Regex::new(&format!(
                    r"(?i)^https://{}/bound/(\d{{1,9}})x(\d{{1,9}})/n/{}",
                    host, origin
                ))?,
            ),
            (
                ShapeKind::Crop,
                Regex::new(&format!(
                    r"(?i)^https://{}/crop/(\d{{1,9}})x(\d{{1,9}})/n/{}",
                    host, origin
                ))?,
            ),
            (
                ShapeKind::Passthrough,
                Regex::new(&format!(r"(?i)^https://{}(?:/[^/?#]+)*?/{}", host, origin))?,
            ),
        ];

        Ok(Self {
            legacy_url: Regex::new(&format!(r#"(?i)https://{}[^\s"')<>]+"#, host))?,
            encoded_legacy_url: Regex::new(&format!(
                r#"(?i)https?%3A%2F%2F{}[^\s"')<>]*"#,
                host
            ))?,
            legacy_scheme: Regex::new(&format!(r"(?i)https?:/{{1,2}}({})", host))?,
            proxied_legacy_url: Regex::new(&format!(
                r"{}(https://{})",
                regex::escape(&config.fallback_proxy_prefix),
                host
            ))?,
            legacy_origin: Regex::new(&format!(r"(?i)^{}(?:[/?#]|$)", host))?,
            shapes,
            size_param: Regex::new(r"[?&](fit|func|width|height)=([^&?#\s]*)")?,
            config,
        })
    }

    pub fn config(&self) -> &RewriteConfig {
        &self.config
    }

    /// Rewrite every legacy CDN URL occurring in `input`
    pub fn rewrite(&self, input: &str) -> String {
        if !input.contains(self.config.legacy_host_marker.as_str()) {
            return input.to_string();
        }
        let prepared = self.prepare(input);
        self.legacy_url
            .replace_all(&prepared, |caps: &Captures<'_>| self.rewrite_match(&caps[0]))
            .into_owned()
    }

    /// Rewrite discovered URLs, keeping only the ones that actually changed
    pub fn rewrite_all(&self, discovered: &[DiscoveredUrl]) -> Vec<RewriteResult> {
        discovered
            .iter()
            .filter_map(|found| {
                let new_url = self.rewrite(&found.url);
                (new_url != found.url).then(|| RewriteResult {
                    path: found.path.clone(),
                    new_url,
                })
            })
            .collect()
    }

    /// Classify a single cleaned legacy URL; first matching shape wins
    pub fn classify(&self, url: &str) -> Option<Classified> {
        self.shapes.iter().find_map(|(kind, regex)| {
            let caps = regex.captures(url)?;
            let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
            let (shape, origin_group) = match kind {
                ShapeKind::Width => (Shape::Width { width: number(1)? }, 2),
                ShapeKind::Bound => (
                    Shape::Bound {
                        width: number(1)?,
                        height: number(2)?,
                    },
                    3,
                ),
                ShapeKind::Crop => (
                    Shape::Crop {
                        width: number(1)?,
                        height: number(2)?,
                    },
                    3,
                ),
                ShapeKind::Passthrough => (Shape::Passthrough, 1),
            };
            let origin = caps.get(origin_group)?.as_str().trim().to_string();
            Some(Classified { shape, origin })
        })
    }

    /// Collapse nested copies of the same wrapper prefix, keeping the last wrapped part
    pub fn collapse_wrappers(&self, url: &str) -> String {
        let mut current = url.to_string();
        for prefix in &self.config.wrapper_prefixes {
            if prefix.is_empty() || current.matches(prefix.as_str()).count() < 2 {
                continue;
            }
            if let Some(last) = current.rsplit(prefix.as_str()).next() {
                current = format!("{}{}", prefix, last);
            }
        }
        current
    }

    /// Whole-string cleanup before occurrences are matched
    fn prepare(&self, input: &str) -> String {
        let without_entities = input.replace("amp;", "");
        let decoded = self
            .encoded_legacy_url
            .replace_all(&without_entities, |caps: &Captures<'_>| {
                decode_best_effort(&caps[0]).into_owned()
            });
        let schemed = self.legacy_scheme.replace_all(&decoded, "https://$1");
        self.proxied_legacy_url
            .replace_all(&schemed, "$1")
            .into_owned()
    }

    fn rewrite_match(&self, matched: &str) -> String {
        let normalized = encode_unsafe_literals(&decode_best_effort(matched));
        let cleaned = self.collapse_wrappers(normalized.trim());

        let Some(mut classified) = self.classify(&cleaned) else {
            return self.normalize_query(&cleaned, QueryMode::AllowListOnly);
        };

        // A different legacy host may wrap another one; peel until the origin
        // is outside the legacy CDN. The innermost explicit size wins.
        while self.legacy_origin.is_match(&classified.origin) {
            let wrapped = format!("https://{}", classified.origin);
            let Some(inner) = self.classify(&wrapped) else {
                return self.normalize_query(&wrapped, QueryMode::AllowListOnly);
            };
            if inner.shape != Shape::Passthrough {
                classified.shape = inner.shape;
            }
            classified.origin = inner.origin;
        }

        if self.config.is_stock_photo(&classified.origin) {
            return format!("https://{}", classified.origin);
        }

        let params = classified.shape.query_params();

        if let Some(rule) = self.config.match_rule(&classified.origin) {
            let remapped = classified.origin.replacen(rule.legacy.as_str(), &rule.target, 1);
            let url = append_query(&format!("https://{}", remapped), params.as_deref());
            return self.normalize_query(&url, QueryMode::AllowListOnly);
        }

        let absolute = format!("https://{}", classified.origin);
        let (base, query) = match absolute.split_once('?') {
            Some((base, query)) => (base, Some(query)),
            None => (absolute.as_str(), None),
        };
        let mut url = format!(
            "{}{}",
            self.config.fallback_proxy_prefix,
            urlencoding::encode(base)
        );
        if let Some(query) = query {
            url = append_query(&url, Some(query));
        }
        let url = append_query(&url, params.as_deref());
        self.normalize_query(&url, QueryMode::PreserveOrigin)
    }

    /// Final stage: allow-listed size parameters (last occurrence wins, fixed
    /// order) and per-segment path re-encoding.
    fn normalize_query(&self, url: &str, mode: QueryMode) -> String {
        let (base, query) = match url.split_once('?') {
            Some((base, query)) => (base, Some(query)),
            None => (url, None),
        };

        let mut fit: Option<String> = None;
        let mut width: Option<String> = None;
        let mut height: Option<String> = None;
        for caps in self.size_param.captures_iter(url) {
            let value = &caps[2];
            match &caps[1] {
                "fit" if !value.is_empty() => fit = Some(value.to_string()),
                "func" if value == "crop" => fit = Some("crop".to_string()),
                "width" if !value.is_empty() => width = Some(value.to_string()),
                "height" if !value.is_empty() => height = Some(value.to_string()),
                _ => {}
            }
        }

        let mut params: Vec<String> = Vec::new();
        if mode == QueryMode::PreserveOrigin {
            if let Some(query) = query {
                params.extend(
                    query
                        .split(['&', '?'])
                        .filter(|pair| !pair.is_empty())
                        .filter(|pair| {
                            let name = pair.split('=').next().unwrap_or_default();
                            !SIZE_PARAMS.contains(&name)
                        })
                        .map(str::to_string),
                );
            }
        }
        if let Some(fit) = fit {
            params.push(format!("fit={}", urlencoding::encode(&fit)));
        }
        if let Some(width) = width {
            params.push(format!("width={}", urlencoding::encode(&width)));
        }
        if let Some(height) = height {
            params.push(format!("height={}", urlencoding::encode(&height)));
        }

        let base = normalize_path_segments(base);
        if params.is_empty() {
            base
        } else {
            format!("{}?{}", base, params.join("&"))
        }
    }
}

fn decode_best_effort(input: &str) -> Cow<'_, str> {
    urlencoding::decode(input).unwrap_or(Cow::Borrowed(input))
}

fn encode_unsafe_literals(input: &str) -> String {
    input
        .replace(' ', "%20")
        .replace('(', "%28")
        .replace(')', "%29")
}

fn append_query(url: &str, params: Option<&str>) -> String {
    match params {
        Some(params) if !params.is_empty() => {
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{}{}{}", url, separator, params)
        }
        _ => url.to_string(),
    }
}

/// Decode then re-encode every path segment after the authority
fn normalize_path_segments(base: &str) -> String {
    let Some(scheme_end) = base.find("://") else {
        return base.to_string();
    };
    let authority_start = scheme_end + 3;
    let Some(path_start) = base[authority_start..].find('/').map(|i| authority_start + i) else {
        return base.to_string();
    };
    let (origin, path) = base.split_at(path_start);
    let segments: Vec<String> = path[1..]
        .split('/')
        .map(|segment| urlencoding::encode(&decode_best_effort(segment)).into_owned())
        .collect();
    format!("{}/{}", origin, segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rewrite_rules::DomainRule;

    fn rewriter() -> UrlRewriter {
        UrlRewriter::new(RewriteConfig::default()).unwrap()
    }

    #[test]
    fn leaves_non_legacy_strings_untouched() {
        let input = "see https://cdn.example.com/a b.png?x=1&amp;y=2";
        assert_eq!(rewriter().rewrite(input), input);
    }

    #[test]
    fn classifies_in_priority_order() {
        let r = rewriter();
        let width = r
            .classify("https://alnnibitpo.cloudimg.io/s/width/200/https://o.com/a.png")
            .unwrap();
        assert_eq!(width.shape, Shape::Width { width: 200 });
        assert_eq!(width.origin, "o.com/a.png");

        let bound = r
            .classify("https://alnnibitpo.cloudimg.io/bound/300x200/n/https://o.com/a.png")
            .unwrap();
        assert_eq!(bound.shape, Shape::Bound { width: 300, height: 200 });

        let crop = r
            .classify("https://alnnibitpo.cloudimg.io/crop/64x64/n/https://o.com/a.png")
            .unwrap();
        assert_eq!(crop.shape, Shape::Crop { width: 64, height: 64 });

        let pass = r
            .classify("https://czi3m2qn.cloudimg.io/cdn/n/n/https://o.com/a.png")
            .unwrap();
        assert_eq!(pass.shape, Shape::Passthrough);
        assert_eq!(pass.origin, "o.com/a.png");

        assert!(r.classify("https://alnnibitpo.cloudimg.io/v7/a.png").is_none());
    }

    #[test]
    fn width_shape_remaps_domain() {
        let out = rewriter().rewrite(
            "https://alnnibitpo.cloudimg.io/s/width/200/https://s3-us-west-2.amazonaws.com/imageserver.prod/app/a.png",
        );
        assert_eq!(out, "https://buildfire.imgix.net/app/a.png?width=200");
    }

    #[test]
    fn crop_shape_emits_fit_first() {
        let out = rewriter().rewrite(
            "https://alnnibitpo.cloudimg.io/crop/100x50/n/https://pluginserver.buildfire.com/p/a.png",
        );
        assert_eq!(out, "https://bfplugins.imgix.net/p/a.png?fit=crop&width=100&height=50");
    }

    #[test]
    fn bound_shape_drops_func_bound() {
        let out = rewriter().rewrite(
            "https://alnnibitpo.cloudimg.io/bound/10x20/n/https://d26kqod42fnsx0.cloudfront.net/a.png?func=bound",
        );
        assert_eq!(out, "https://bfplugins-uat.imgix.net/a.png?width=10&height=20");
    }

    #[test]
    fn stock_photo_returns_origin_exactly() {
        let out = rewriter().rewrite(
            "https://alnnibitpo.cloudimg.io/crop/100x50/n/https://images.unsplash.com/photo-1?w=800&q=80",
        );
        assert_eq!(out, "https://images.unsplash.com/photo-1?w=800&q=80");
    }

    #[test]
    fn unmapped_origin_goes_through_proxy() {
        let out = rewriter().rewrite(
            "https://alnnibitpo.cloudimg.io/v7/https://example.org/img/a.png?v=3",
        );
        assert_eq!(
            out,
            "https://buildfire-proxy.imgix.net/cdn/https%3A%2F%2Fexample.org%2Fimg%2Fa.png?v=3"
        );
    }

    #[test]
    fn unmapped_origin_keeps_captured_size() {
        let out = rewriter().rewrite(
            "https://alnnibitpo.cloudimg.io/s/width/320/https://example.org/a.png",
        );
        assert_eq!(
            out,
            "https://buildfire-proxy.imgix.net/cdn/https%3A%2F%2Fexample.org%2Fa.png?width=320"
        );
    }

    #[test]
    fn collapses_duplicate_wrappers() {
        let r = rewriter();
        assert_eq!(
            r.collapse_wrappers(
                "https://alnnibitpo.cloudimg.io/v7/https://alnnibitpo.cloudimg.io/v7/https://origin/img.png"
            ),
            "https://alnnibitpo.cloudimg.io/v7/https://origin/img.png"
        );
        assert_eq!(
            r.collapse_wrappers("https://alnnibitpo.cloudimg.io/v7/https://origin/img.png"),
            "https://alnnibitpo.cloudimg.io/v7/https://origin/img.png"
        );
    }

    #[test]
    fn peels_different_legacy_host_before_fallback() {
        let r = rewriter();
        let once = r.rewrite(
            "https://acbbesnfco.cloudimg.io/v7/https://alnnibitpo.cloudimg.io/v7/https://example.org/a.png",
        );
        assert_eq!(
            once,
            "https://buildfire-proxy.imgix.net/cdn/https%3A%2F%2Fexample.org%2Fa.png"
        );
        assert_eq!(r.rewrite(&once), once);
    }

    #[test]
    fn peels_passthrough_around_sized_legacy_url() {
        let r = rewriter();
        let once = r.rewrite(
            "https://czi3m2qn.cloudimg.io/cdn/n/n/https://alnnibitpo.cloudimg.io/s/width/200/https://pluginserver.buildfire.com/a.png",
        );
        assert_eq!(once, "https://bfplugins.imgix.net/a.png?width=200");
        assert_eq!(r.rewrite(&once), once);
    }

    #[test]
    fn outer_size_survives_inner_passthrough() {
        let out = rewriter().rewrite(
            "https://alnnibitpo.cloudimg.io/crop/40x30/n/https://czi3m2qn.cloudimg.io/cdn/n/n/https://pluginserver.buildfire.com/a.png",
        );
        assert_eq!(out, "https://bfplugins.imgix.net/a.png?fit=crop&width=40&height=30");
    }

    #[test]
    fn wrapped_legacy_url_without_origin_is_only_normalized() {
        let r = rewriter();
        let once = r.rewrite(
            "https://czi3m2qn.cloudimg.io/cdn/n/n/https://alnnibitpo.cloudimg.io/v7/folder/a.png",
        );
        assert_eq!(once, "https://alnnibitpo.cloudimg.io/v7/folder/a.png");
        assert_eq!(r.rewrite(&once), once);
    }

    #[test]
    fn last_width_wins() {
        let out = rewriter().rewrite(
            "https://alnnibitpo.cloudimg.io/v7/https://imagelibserver.s3.amazonaws.com/a.png?width=100&x=1&width=200",
        );
        assert_eq!(out, "https://buildfire-uat.imgix.net/a.png?width=200");
    }

    #[test]
    fn rewrites_every_occurrence_in_html() {
        let html = r#"<p><img src="https://alnnibitpo.cloudimg.io/v7/https://pluginserver.buildfire.com/a.png"> and <img src="https://alnnibitpo.cloudimg.io/v7/https://pluginserver.buildfire.com/b.png"></p>"#;
        let out = rewriter().rewrite(html);
        assert_eq!(
            out,
            r#"<p><img src="https://bfplugins.imgix.net/a.png"> and <img src="https://bfplugins.imgix.net/b.png"></p>"#
        );
    }

    #[test]
    fn strips_html_entity_artifacts() {
        let out = rewriter().rewrite(
            "https://alnnibitpo.cloudimg.io/v7/https://pluginserver.buildfire.com/a.png?width=10&amp;height=20",
        );
        assert_eq!(out, "https://bfplugins.imgix.net/a.png?width=10&height=20");
    }

    #[test]
    fn repairs_single_slash_scheme() {
        let out = rewriter()
            .rewrite("https:/alnnibitpo.cloudimg.io/v7/https://pluginserver.buildfire.com/a.png");
        assert_eq!(out, "https://bfplugins.imgix.net/a.png");
    }

    #[test]
    fn encodes_spaces_and_parentheses_in_segments() {
        let out = rewriter().rewrite(
            "https://alnnibitpo.cloudimg.io/v7/https://pluginserver.buildfire.com/my%20pic%20%281%29.png",
        );
        assert_eq!(out, "https://bfplugins.imgix.net/my%20pic%20%281%29.png");
    }

    #[test]
    fn unwraps_proxied_legacy_url() {
        let out = rewriter().rewrite(
            "https://buildfire-proxy.imgix.net/cdn/https%3A%2F%2Falnnibitpo.cloudimg.io%2Fv7%2Fhttps%3A%2F%2Fpluginserver.buildfire.com%2Fa.png",
        );
        assert_eq!(out, "https://bfplugins.imgix.net/a.png");
    }

    #[test]
    fn malformed_percent_encoding_does_not_abort() {
        let out = rewriter().rewrite("https://alnnibitpo.cloudimg.io/v7/%E0%A4%A/a.png");
        assert!(out.starts_with("https://alnnibitpo.cloudimg.io/v7/"));
    }

    #[test]
    fn unknown_shape_is_only_normalized() {
        let out = rewriter()
            .rewrite("https://alnnibitpo.cloudimg.io/v7/folder/a.png?func=crop&width=5&q=1");
        assert_eq!(out, "https://alnnibitpo.cloudimg.io/v7/folder/a.png?fit=crop&width=5");
    }

    #[test]
    fn custom_table_first_match_wins() {
        let config = RewriteConfig {
            domain_rules: vec![
                DomainRule::new("bucket.example.com", "first.imgix.net"),
                DomainRule::new("bucket.example.com/special", "never.imgix.net"),
            ],
            ..RewriteConfig::default()
        };
        let r = UrlRewriter::new(config).unwrap();
        let out = r.rewrite("https://alnnibitpo.cloudimg.io/v7/https://bucket.example.com/special/a.png");
        assert_eq!(out, "https://first.imgix.net/special/a.png");
    }

    #[test]
    fn rejects_empty_rule_key() {
        let config = RewriteConfig {
            domain_rules: vec![DomainRule::new("", "x.imgix.net")],
            ..RewriteConfig::default()
        };
        assert!(matches!(
            UrlRewriter::new(config),
            Err(RewriteError::InvalidConfig(_))
        ));
    }
}
