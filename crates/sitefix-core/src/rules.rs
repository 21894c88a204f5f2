//! Patch rules applied to generated HTML.
//!
//! A rule is a pure `&str -> String` transformation that must be idempotent:
//! applying it to its own output changes nothing. That property is what lets
//! the pipeline run again over an already-patched tree with zero writes.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::{HostFix, RecoveryConfig, SiteConfig};
use crate::csp::{self, CspRequirements};
use crate::recovery;

static HEAD_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<head(?:\s[^>]*)?>").expect("head regex is valid"));

static HEAD_CLOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</head\s*>").expect("head close regex is valid"));

static META_CHARSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<meta\s[^>]*\bcharset\s*=[^>]*>").expect("meta charset regex is valid")
});

/// A single idempotent text transformation.
pub trait PatchRule: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Apply the rule. Unchanged input comes back borrowed.
    fn apply<'a>(&self, html: &'a str) -> Cow<'a, str>;
}

/// Rewrites hosts that still contain an unresolved accessor call, e.g.
/// `https://<ref>.getSupabaseClient().co` → `https://<ref>.supabase.co`,
/// for both `https://` and `wss://`.
pub struct HostFixRule {
    fixes: Vec<(Regex, String)>,
}

impl HostFixRule {
    pub fn new(fixes: &[HostFix]) -> Self {
        let fixes = fixes
            .iter()
            .filter(|f| !f.broken.is_empty() && !f.replacement.contains(&f.broken))
            .filter_map(|f| {
                let pattern = format!(r"\b(https|wss)://([A-Za-z0-9-]+)\.{}", regex::escape(&f.broken));
                let re = Regex::new(&pattern).ok()?;
                let replacement = format!("${{1}}://${{2}}.{}", f.replacement.replace('$', "$$"));
                Some((re, replacement))
            })
            .collect();
        Self { fixes }
    }
}

impl PatchRule for HostFixRule {
    fn name(&self) -> &'static str {
        "host-fix"
    }

    fn apply<'a>(&self, html: &'a str) -> Cow<'a, str> {
        let mut out = Cow::Borrowed(html);
        for (re, replacement) in &self.fixes {
            let replaced = match re.replace_all(&out, replacement.as_str()) {
                Cow::Owned(s) => Some(s),
                Cow::Borrowed(_) => None,
            };
            if let Some(s) = replaced {
                out = Cow::Owned(s);
            }
        }
        out
    }
}

/// Adds the required tokens to every CSP `<meta>` policy.
pub struct CspMetaRule {
    requirements: CspRequirements,
}

impl CspMetaRule {
    pub fn new(requirements: CspRequirements) -> Self {
        Self { requirements }
    }
}

impl PatchRule for CspMetaRule {
    fn name(&self) -> &'static str {
        "csp-meta"
    }

    fn apply<'a>(&self, html: &'a str) -> Cow<'a, str> {
        csp::augment_meta_policies(html, &self.requirements)
    }
}

/// Injects a marker-guarded snippet into `<head>`.
///
/// Placement: right after the head's `<meta charset>` when it has one, so
/// the declaration stays within the first 1024 bytes; otherwise right after
/// the opening `<head>` tag, or right before `</head>` for documents without
/// one. Documents with neither tag are left alone.
pub fn inject_into_head(html: &str, snippet: &str) -> Option<String> {
    let head_close = HEAD_CLOSE_RE.find(html).map(|m| m.start());
    let charset = META_CHARSET_RE
        .find(html)
        .filter(|m| head_close.map_or(true, |close| m.start() < close))
        .map(|m| m.end());
    let at = charset
        .or_else(|| HEAD_OPEN_RE.find(html).map(|m| m.end()))
        .or(head_close)?;
    let mut out = String::with_capacity(html.len() + snippet.len());
    out.push_str(&html[..at]);
    out.push_str(snippet);
    out.push_str(&html[at..]);
    Some(out)
}

/// Injects the recovery script unless the page already carries it.
///
/// Pages whose CSP forbids inline scripts get a `<script src>` reference to
/// the external script file instead of an inline block.
pub struct RecoveryScriptRule {
    recovery: RecoveryConfig,
    inline: String,
    external: String,
}

impl RecoveryScriptRule {
    pub fn new(recovery: &RecoveryConfig, host_fixes: &[HostFix], csp: &CspRequirements) -> Self {
        let script = recovery::render_script(recovery, host_fixes, csp);
        Self {
            inline: recovery::inline_tag(recovery, &script),
            external: recovery::external_tag(recovery),
            recovery: recovery.clone(),
        }
    }
}

impl PatchRule for RecoveryScriptRule {
    fn name(&self) -> &'static str {
        "recovery-script"
    }

    fn apply<'a>(&self, html: &'a str) -> Cow<'a, str> {
        if html.contains(&self.recovery.marker_attr) {
            return Cow::Borrowed(html);
        }
        let allows_inline = csp::meta_policy(html)
            .map(|p| p.allows_inline_scripts())
            .unwrap_or(true);
        let tag = if allows_inline {
            &self.inline
        } else {
            &self.external
        };
        match inject_into_head(html, tag) {
            Some(patched) => Cow::Owned(patched),
            None => Cow::Borrowed(html),
        }
    }
}

/// Rules applied in a fixed order.
pub struct RuleSet {
    rules: Vec<Box<dyn PatchRule>>,
}

impl RuleSet {
    pub fn new(rules: Vec<Box<dyn PatchRule>>) -> Self {
        Self { rules }
    }

    /// The standard order: host fixes first so the CSP and recovery rules see
    /// corrected URLs, then CSP augmentation, then recovery-script injection
    /// (which inspects the augmented policy).
    pub fn standard(config: &SiteConfig) -> Self {
        let mut rules: Vec<Box<dyn PatchRule>> = vec![
            Box::new(HostFixRule::new(&config.host_fixes)),
            Box::new(CspMetaRule::new(config.csp.clone())),
        ];
        if config.recovery.enabled {
            rules.push(Box::new(RecoveryScriptRule::new(
                &config.recovery,
                &config.host_fixes,
                &config.csp,
            )));
        }
        Self::new(rules)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Apply every rule in order. Returns the result and the names of the
    /// rules that changed something.
    pub fn apply<'a>(&self, html: &'a str) -> (Cow<'a, str>, Vec<&'static str>) {
        let mut current = Cow::Borrowed(html);
        let mut fired = Vec::new();
        for rule in &self.rules {
            let next = match rule.apply(&current) {
                Cow::Borrowed(_) => None,
                Cow::Owned(s) => Some(s),
            };
            if let Some(s) = next {
                fired.push(rule.name());
                current = Cow::Owned(s);
            }
        }
        (current, fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROKEN: &str = "https://sfrlnidbiviniuqhryyc.getSupabaseClient().co";
    const FIXED: &str = "https://sfrlnidbiviniuqhryyc.supabase.co";

    fn host_rule() -> HostFixRule {
        HostFixRule::new(&[HostFix::default()])
    }

    #[test]
    fn test_host_fix_https_and_wss() {
        let html = format!(
            r#"<link href="{BROKEN}/rest/v1"><script>new WebSocket("wss://sfrlnidbiviniuqhryyc.getSupabaseClient().co/realtime")</script>"#
        );
        let out = host_rule().apply(&html);
        assert!(out.contains(&format!("{FIXED}/rest/v1")));
        assert!(out.contains("wss://sfrlnidbiviniuqhryyc.supabase.co/realtime"));
        assert!(!out.contains("getSupabaseClient()"));
    }

    #[test]
    fn test_host_fix_is_idempotent() {
        let rule = host_rule();
        let once = rule.apply(BROKEN).into_owned();
        assert_eq!(once, FIXED);
        assert!(matches!(rule.apply(&once), Cow::Borrowed(_)));
    }

    #[test]
    fn test_host_fix_ignores_other_schemes() {
        let html = "ftp://abc.getSupabaseClient().co";
        assert_eq!(host_rule().apply(html), html);
    }

    #[test]
    fn test_inject_after_head_open_tag() {
        let out = inject_into_head("<html><head lang=\"en\"><title>t</title></head></html>", "<x>").unwrap();
        assert_eq!(out, "<html><head lang=\"en\"><x><title>t</title></head></html>");
    }

    #[test]
    fn test_inject_before_head_close_without_open_tag() {
        let out = inject_into_head("<meta charset=utf-8></head><body>", "<x>").unwrap();
        assert_eq!(out, "<meta charset=utf-8><x></head><body>");
    }

    #[test]
    fn test_inject_after_meta_charset() {
        let out = inject_into_head(
            r#"<html><head><meta charset="UTF-8" /><title>t</title></head></html>"#,
            "<x>",
        )
        .unwrap();
        assert_eq!(out, r#"<html><head><meta charset="UTF-8" /><x><title>t</title></head></html>"#);
    }

    #[test]
    fn test_inject_ignores_charset_outside_head() {
        let out = inject_into_head(
            r#"<head><title>t</title></head><body><meta charset="utf-8"></body>"#,
            "<x>",
        )
        .unwrap();
        assert!(out.starts_with("<head><x><title>"));
    }

    #[test]
    fn test_inline_recovery_keeps_charset_near_start() {
        let rule = RecoveryScriptRule::new(
            &RecoveryConfig::default(),
            &[HostFix::default()],
            &CspRequirements::site_defaults(),
        );
        let page = r#"<!doctype html><html lang="en"><head><meta charset="UTF-8" /><link rel="icon" href="/favicon.ico" /><meta name="viewport" content="width=device-width, initial-scale=1.0" /><title>Whisker Haven</title></head><body><div id="root"></div></body></html>"#;
        let out = rule.apply(page);
        assert!(out.contains("<script data-sitefix-recovery>"));
        let offset = out.find("<meta charset").unwrap();
        assert!(offset < 1024, "charset moved to byte {offset}");
        assert!(out.find("<script data-sitefix-recovery>").unwrap() > offset);
    }

    #[test]
    fn test_inject_skips_fragments_and_headers() {
        assert!(inject_into_head("<header>nav</header>", "<x>").is_none());
    }

    #[test]
    fn test_recovery_rule_inline_vs_external() {
        let rule = RecoveryScriptRule::new(
            &RecoveryConfig::default(),
            &[HostFix::default()],
            &CspRequirements::empty(),
        );

        let open = rule.apply("<head></head>");
        assert!(open.contains("<script data-sitefix-recovery>"));

        let strict = rule.apply(
            r#"<head><meta http-equiv="Content-Security-Policy" content="script-src 'self'"></head>"#,
        );
        assert!(strict.contains(r#"<script src="/sitefix-recovery.js" data-sitefix-recovery></script>"#));
        assert!(!strict.contains("MutationObserver"));
    }

    #[test]
    fn test_standard_rules_idempotent_on_full_document() {
        let config = SiteConfig::default();
        let rules = RuleSet::standard(&config);
        assert_eq!(rules.names(), vec!["host-fix", "csp-meta", "recovery-script"]);

        let html = format!(
            r#"<!doctype html><html><head><meta http-equiv="Content-Security-Policy" content="default-src 'self'; connect-src 'self' {BROKEN}"><title>Home</title></head><body><header></header><footer></footer></body></html>"#
        );
        let (once, fired) = rules.apply(&html);
        assert_eq!(fired, vec!["host-fix", "csp-meta", "recovery-script"]);
        assert!(once.contains(FIXED));

        let (twice, fired_again) = rules.apply(&once);
        assert!(fired_again.is_empty());
        assert_eq!(twice, once);
    }
}
