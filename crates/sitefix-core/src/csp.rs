//! Content-Security-Policy model and the token requirement table.
//!
//! A [`CspPolicy`] keeps directives in source order so that re-serialising an
//! untouched policy reproduces the input. Tokens are only ever appended after
//! a presence check, which makes [`CspPolicy::ensure`] idempotent.

use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static META_CSP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta\b[^>]*?http-equiv\s*=\s*["']content-security-policy["'][^>]*>"#)
        .expect("meta csp regex is valid")
});

static CONTENT_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\bcontent\s*=\s*"([^"]*)""#).expect("content attr regex is valid")
});

/// A single directive such as `img-src 'self' data:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CspDirective {
    pub name: String,
    pub sources: Vec<String>,
}

/// A parsed policy: an ordered list of directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CspPolicy {
    directives: Vec<CspDirective>,
}

impl CspPolicy {
    /// Parse a policy string. Empty segments are dropped; directive names are
    /// lowercased, source tokens are kept verbatim.
    pub fn parse(policy: &str) -> Self {
        let directives = policy
            .split(';')
            .filter_map(|segment| {
                let mut parts = segment.split_whitespace();
                let name = parts.next()?.to_ascii_lowercase();
                Some(CspDirective {
                    name,
                    sources: parts.map(str::to_string).collect(),
                })
            })
            .collect();
        Self { directives }
    }

    pub fn directives(&self) -> &[CspDirective] {
        &self.directives
    }

    pub fn directive(&self, name: &str) -> Option<&CspDirective> {
        self.directives.iter().find(|d| d.name == name)
    }

    /// Whether the directive's current value already mentions `token`.
    ///
    /// Substring match, so `https://fonts.googleapis.com` satisfies a
    /// requirement for `fonts.googleapis.com`.
    pub fn contains(&self, directive: &str, token: &str) -> bool {
        self.directive(directive)
            .map(|d| d.sources.iter().any(|s| s.contains(token)))
            .unwrap_or(false)
    }

    /// Append `token` to `directive` unless already present.
    ///
    /// A missing directive is created seeded with the `default-src` sources,
    /// so adding it never narrows what the fallback already allowed.
    /// Returns `true` if the policy changed.
    pub fn ensure(&mut self, directive: &str, token: &str) -> bool {
        if self.contains(directive, token) {
            return false;
        }
        if let Some(existing) = self.directives.iter_mut().find(|d| d.name == directive) {
            existing.sources.push(token.to_string());
            return true;
        }

        let mut sources = self
            .directive("default-src")
            .map(|d| d.sources.clone())
            .unwrap_or_default();
        if !sources.iter().any(|s| s.contains(token)) {
            sources.push(token.to_string());
        }
        self.directives.push(CspDirective {
            name: directive.to_string(),
            sources,
        });
        true
    }

    /// Apply every requirement. Returns the number of tokens added.
    pub fn apply(&mut self, requirements: &CspRequirements) -> usize {
        requirements
            .entries
            .iter()
            .filter(|req| self.ensure(&req.directive, &req.token))
            .count()
    }

    /// Whether inline `<script>` blocks would be allowed by this policy.
    pub fn allows_inline_scripts(&self) -> bool {
        match self
            .directive("script-src")
            .or_else(|| self.directive("default-src"))
        {
            Some(d) => d.sources.iter().any(|s| s == "'unsafe-inline'"),
            None => true,
        }
    }
}

impl fmt::Display for CspPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .directives
            .iter()
            .map(|d| {
                if d.sources.is_empty() {
                    d.name.clone()
                } else {
                    format!("{} {}", d.name, d.sources.join(" "))
                }
            })
            .collect();
        write!(f, "{}", rendered.join("; "))
    }
}

/// One `(directive, token)` pair the site needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CspRequirement {
    pub directive: String,
    pub token: String,
}

/// The token table applied to every policy the pipeline touches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CspRequirements {
    entries: Vec<CspRequirement>,
}

impl CspRequirements {
    pub fn new(entries: Vec<CspRequirement>) -> Self {
        Self { entries }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Builder-style insertion.
    pub fn with(mut self, directive: &str, token: &str) -> Self {
        self.entries.push(CspRequirement {
            directive: directive.to_string(),
            token: token.to_string(),
        });
        self
    }

    pub fn entries(&self) -> &[CspRequirement] {
        &self.entries
    }

    /// Sources the public site loads from: Google Fonts, the hosted backend
    /// over https and websockets, Stripe for donations, and remote images.
    pub fn site_defaults() -> Self {
        Self::empty()
            .with("style-src", "'self'")
            .with("style-src", "'unsafe-inline'")
            .with("style-src", "https://fonts.googleapis.com")
            .with("font-src", "'self'")
            .with("font-src", "https://fonts.gstatic.com")
            .with("font-src", "data:")
            .with("img-src", "'self'")
            .with("img-src", "data:")
            .with("img-src", "blob:")
            .with("img-src", "https://*.supabase.co")
            .with("img-src", "https://images.unsplash.com")
            .with("connect-src", "'self'")
            .with("connect-src", "https://*.supabase.co")
            .with("connect-src", "wss://*.supabase.co")
            .with("connect-src", "https://api.stripe.com")
            .with("script-src", "'self'")
            .with("script-src", "https://js.stripe.com")
    }
}

impl Default for CspRequirements {
    fn default() -> Self {
        Self::site_defaults()
    }
}

/// Augment every CSP `<meta>` tag in `html`.
///
/// Only tags whose policy actually gained tokens are rewritten; everything
/// else is returned borrowed and byte-identical.
pub fn augment_meta_policies<'a>(html: &'a str, requirements: &CspRequirements) -> Cow<'a, str> {
    let mut changed = false;
    let out = META_CSP_RE.replace_all(html, |caps: &regex::Captures<'_>| {
        let tag = &caps[0];
        match augment_tag(tag, requirements) {
            Some(patched) => {
                changed = true;
                patched
            }
            None => tag.to_string(),
        }
    });
    if changed {
        Cow::Owned(out.into_owned())
    } else {
        Cow::Borrowed(html)
    }
}

fn augment_tag(tag: &str, requirements: &CspRequirements) -> Option<String> {
    let caps = CONTENT_ATTR_RE.captures(tag)?;
    let value = caps.get(1)?;
    let mut policy = CspPolicy::parse(value.as_str());
    if policy.apply(requirements) == 0 {
        return None;
    }
    let mut patched = String::with_capacity(tag.len() + 64);
    patched.push_str(&tag[..value.start()]);
    patched.push_str(&policy.to_string());
    patched.push_str(&tag[value.end()..]);
    Some(patched)
}

/// Parse the first CSP `<meta>` policy in `html`, if any.
pub fn meta_policy(html: &str) -> Option<CspPolicy> {
    let tag = META_CSP_RE.find(html)?;
    let caps = CONTENT_ATTR_RE.captures(tag.as_str())?;
    Some(CspPolicy::parse(caps.get(1)?.as_str()))
}
