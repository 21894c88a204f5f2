//! Per-route prerendering: navigate, wait, validate, annotate, write.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Serialize;
use sitefix_core::rules::inject_into_head;
use sitefix_core::{content_digest, write_atomic, RetryPolicy, RouteEntry, SiteConfig};

use crate::browser::BrowserPage;
use crate::obs;

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<header[\s>]").expect("header regex is valid"));
static FOOTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<footer[\s>]").expect("footer regex is valid"));
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>.*?</title>").expect("title regex is valid"));
static META_DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta\s[^>]*name\s*=\s*["']description["'][^>]*>"#)
        .expect("meta description regex is valid")
});

/// Everything a single route render needs, resolved once per run.
#[derive(Debug, Clone)]
pub struct PrerenderSettings {
    pub base_url: String,
    pub output_dir: PathBuf,
    pub root_id: String,
    pub navigation_timeout: Duration,
    pub ready_timeout: Duration,
    pub settle: Duration,
    pub retry: RetryPolicy,
}

impl PrerenderSettings {
    pub fn from_config(config: &SiteConfig) -> Self {
        Self {
            base_url: config.preview_base_url(),
            output_dir: config.output_dir.clone(),
            root_id: config.browser.root_element_id.clone(),
            navigation_timeout: Duration::from_millis(config.browser.navigation_timeout_ms),
            ready_timeout: Duration::from_millis(config.browser.ready_timeout_ms),
            settle: Duration::from_millis(config.browser.settle_ms),
            retry: config.route_retry,
        }
    }

    /// Absolute URL of `route` on the preview server.
    pub fn url_for(&self, route: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            route.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RouteStatus {
    Written {
        path: PathBuf,
        digest: String,
        bytes: usize,
    },
    Failed {
        reason: String,
    },
}

/// Result of prerendering one route.
#[derive(Debug, Clone, Serialize)]
pub struct RouteOutcome {
    pub route: String,
    pub attempts: u32,
    #[serde(flatten)]
    pub status: RouteStatus,
    pub duration_ms: u64,
}

impl RouteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self.status, RouteStatus::Written { .. })
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            RouteStatus::Failed { reason } => Some(reason),
            RouteStatus::Written { .. } => None,
        }
    }
}

/// Check that rendered markup carries the site chrome.
pub fn validate_markup(html: &str) -> Result<(), String> {
    let missing: Vec<&str> = [("<header>", &*HEADER_RE), ("<footer>", &*FOOTER_RE)]
        .into_iter()
        .filter(|(_, re)| !re.is_match(html))
        .map(|(tag, _)| tag)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!("rendered markup missing {}", missing.join(" and ")))
    }
}

/// Set the route's `<title>` and meta description. Empty manifest fields
/// leave the document's own values in place.
pub fn annotate(html: &str, entry: &RouteEntry) -> String {
    let mut out = html.to_string();

    if !entry.title.is_empty() {
        let title = format!("<title>{}</title>", escape_html(&entry.title));
        out = if TITLE_RE.is_match(&out) {
            TITLE_RE.replace(&out, regex::NoExpand(&title)).into_owned()
        } else {
            inject_into_head(&out, &title).unwrap_or(out)
        };
    }

    if !entry.description.is_empty() {
        let meta = format!(
            r#"<meta name="description" content="{}">"#,
            escape_html(&entry.description)
        );
        out = if META_DESCRIPTION_RE.is_match(&out) {
            META_DESCRIPTION_RE
                .replace(&out, regex::NoExpand(&meta))
                .into_owned()
        } else {
            inject_into_head(&out, &meta).unwrap_or(out)
        };
    }

    out
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// One attempt: everything up to the validated, annotated document.
async fn render_once(
    page: &mut dyn BrowserPage,
    entry: &RouteEntry,
    settings: &PrerenderSettings,
) -> Result<String, String> {
    let url = settings.url_for(&entry.path);
    page.goto(&url, settings.navigation_timeout)
        .await
        .map_err(|e| e.to_string())?;
    page.wait_for_root(&settings.root_id, settings.ready_timeout)
        .await
        .map_err(|e| e.to_string())?;
    page.settle(settings.settle).await.map_err(|e| e.to_string())?;
    let html = page.content().await.map_err(|e| e.to_string())?;
    validate_markup(&html)?;
    Ok(annotate(&html, entry))
}

/// Prerender one route with retries.
///
/// Only a document that passes validation is written; a route that fails
/// every attempt leaves no file behind. Failures are returned in the
/// outcome rather than as an error so the caller can carry on with the
/// remaining routes.
pub async fn prerender_route(
    page: &mut dyn BrowserPage,
    entry: &RouteEntry,
    settings: &PrerenderSettings,
) -> RouteOutcome {
    let started = Instant::now();
    let max_attempts = settings.retry.max_attempts.max(1);
    let target = settings.output_dir.join(entry.output_file());
    let mut last_reason = String::new();

    for attempt in 1..=max_attempts {
        obs::emit_route_attempt(&entry.path, attempt, max_attempts);

        let result = match render_once(page, entry, settings).await {
            Ok(html) => write_atomic(&target, html.as_bytes())
                .map(|_| html)
                .map_err(|e| e.to_string()),
            Err(reason) => Err(reason),
        };

        match result {
            Ok(html) => {
                obs::emit_route_written(&entry.path, &target, html.len());
                return RouteOutcome {
                    route: entry.path.clone(),
                    attempts: attempt,
                    status: RouteStatus::Written {
                        path: target,
                        digest: content_digest(html.as_bytes()),
                        bytes: html.len(),
                    },
                    duration_ms: started.elapsed().as_millis() as u64,
                };
            }
            Err(reason) => {
                if attempt < max_attempts {
                    let delay = settings.retry.delay_for(attempt);
                    obs::emit_route_retry(&entry.path, attempt, &reason, delay.as_millis() as u64);
                    tokio::time::sleep(delay).await;
                }
                last_reason = reason;
            }
        }
    }

    obs::emit_route_failed(&entry.path, max_attempts, &last_reason);
    RouteOutcome {
        route: entry.path.clone(),
        attempts: max_attempts,
        status: RouteStatus::Failed {
            reason: last_reason,
        },
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::Browser;
    use crate::fakes::{FakeBrowser, FakeResponse};
    use tempfile::tempdir;

    const GOOD: &str = r#"<html><head><title>Vite App</title></head><body><div id="root"><header class="nav">Whisker Haven</header><main>Cats</main><footer>Visit us</footer></div></body></html>"#;
    const NO_FOOTER: &str = r#"<html><head></head><body><div id="root"><header>x</header><main>y</main></div></body></html>"#;

    fn settings(output_dir: PathBuf) -> PrerenderSettings {
        PrerenderSettings {
            base_url: "http://localhost:4173".to_string(),
            output_dir,
            root_id: "root".to_string(),
            navigation_timeout: Duration::from_secs(1),
            ready_timeout: Duration::from_millis(10),
            settle: Duration::ZERO,
            retry: RetryPolicy::immediate(3),
        }
    }

    #[test]
    fn test_validate_markup() {
        assert!(validate_markup(GOOD).is_ok());
        let err = validate_markup(NO_FOOTER).unwrap_err();
        assert!(err.contains("<footer>"));
        assert!(!err.contains("<header>"));
        let err = validate_markup("<div></div>").unwrap_err();
        assert!(err.contains("<header> and <footer>"));
        // Tag-name prefix is not a match.
        assert!(validate_markup("<headerx></headerx><footer>").is_err());
    }

    #[test]
    fn test_url_for() {
        let s = settings(PathBuf::from("dist"));
        assert_eq!(s.url_for("/"), "http://localhost:4173/");
        assert_eq!(s.url_for("/about"), "http://localhost:4173/about");
    }

    #[test]
    fn test_annotate_replaces_title_and_adds_description() {
        let entry = RouteEntry::new("/adopt", "Adopt a Cat | Whisker Haven", "Meet cats & kittens");
        let html = annotate(GOOD, &entry);
        assert!(html.contains("<title>Adopt a Cat | Whisker Haven</title>"));
        assert!(!html.contains("Vite App"));
        assert!(html.contains(r#"<meta name="description" content="Meet cats &amp; kittens">"#));
        assert_eq!(annotate(&html, &entry), html);
    }

    #[test]
    fn test_annotate_empty_fields_keep_document() {
        let entry = RouteEntry::new("/", "", "");
        assert_eq!(annotate(GOOD, &entry), GOOD);
    }

    #[tokio::test]
    async fn test_route_written_after_retry() {
        let dir = tempdir().unwrap();
        let browser = FakeBrowser::new().script(
            "/about",
            vec![
                FakeResponse::NeverReady,
                FakeResponse::Html(GOOD.to_string()),
            ],
        );
        let mut page = browser.new_page().await.unwrap();
        let entry = RouteEntry::new("/about", "About Us", "");

        let outcome = prerender_route(page.as_mut(), &entry, &settings(dir.path().to_path_buf())).await;

        assert!(outcome.is_written());
        assert_eq!(outcome.attempts, 2);
        let written = std::fs::read_to_string(dir.path().join("about.html")).unwrap();
        assert!(written.contains("<title>About Us</title>"));
    }

    #[tokio::test]
    async fn test_invalid_markup_never_written() {
        let dir = tempdir().unwrap();
        let browser = FakeBrowser::new().with_default(FakeResponse::Html(NO_FOOTER.to_string()));
        let mut page = browser.new_page().await.unwrap();
        let entry = RouteEntry::new("/", "Home", "");

        let outcome = prerender_route(page.as_mut(), &entry, &settings(dir.path().to_path_buf())).await;

        assert!(!outcome.is_written());
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.failure_reason().unwrap().contains("<footer>"));
        assert_eq!(browser.visit_count("/"), 3);
        assert!(!dir.path().join("index.html").exists());
    }
}
