//! Integration tests for the post-build patch pipeline over a fixture tree.

use std::fs;
use std::path::{Path, PathBuf};

use sitefix_core::{fix_site, find_html_files, CspPolicy, PatchPipeline, RuleSet, SiteConfig};
use tempfile::{tempdir, TempDir};

const HOME: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta http-equiv="Content-Security-Policy" content="default-src 'self'; style-src 'self' https://fonts.googleapis.com; connect-src 'self' https://sfrlnidbiviniuqhryyc.getSupabaseClient().co wss://sfrlnidbiviniuqhryyc.getSupabaseClient().co">
<title>Whisker Haven</title>
</head>
<body><header>nav</header><div id="root"><img src="https://sfrlnidbiviniuqhryyc.getSupabaseClient().co/storage/v1/object/public/cats/milo.jpg"></div><footer>2024</footer></body>
</html>
"#;

const BLOG_POST: &str = r#"<html><head><title>Kitten care</title></head><body><header></header><p>Feed little and often.</p><footer></footer></body></html>"#;

fn fixture() -> (TempDir, PathBuf) {
    let dir = tempdir().expect("tempdir");
    let dist = dir.path().join("dist");
    fs::create_dir_all(dist.join("blog/2024")).unwrap();
    fs::create_dir_all(dist.join("assets")).unwrap();
    fs::write(dist.join("index.html"), HOME).unwrap();
    fs::write(dist.join("about.html"), HOME).unwrap();
    fs::write(dist.join("blog/2024/kitten-care.html"), BLOG_POST).unwrap();
    fs::write(dist.join("assets/index.js"), "console.log('getSupabaseClient().co')").unwrap();
    (dir, dist)
}

fn config_for(dist: &Path) -> SiteConfig {
    SiteConfig {
        output_dir: dist.to_path_buf(),
        ..SiteConfig::default()
    }
}

/// Test: first pass fixes URLs and CSP, second pass writes nothing
#[test]
fn test_second_run_reports_zero_changes() {
    let (_dir, dist) = fixture();
    let config = config_for(&dist);
    let pipeline = PatchPipeline::new(RuleSet::standard(&config));

    let first = pipeline.run(&dist).expect("first run");
    assert_eq!(first.scanned, 3);
    assert_eq!(first.changed_count(), 3);
    assert_eq!(first.failed_count(), 0);

    let snapshot: Vec<String> = find_html_files(&dist)
        .unwrap()
        .iter()
        .map(|p| fs::read_to_string(p).unwrap())
        .collect();

    let second = pipeline.run(&dist).expect("second run");
    assert_eq!(second.changed_count(), 0, "second run must be a no-op");

    let after: Vec<String> = find_html_files(&dist)
        .unwrap()
        .iter()
        .map(|p| fs::read_to_string(p).unwrap())
        .collect();
    assert_eq!(snapshot, after);
}

/// Test: accessor-call hosts become real hosts for https and wss
#[test]
fn test_url_bug_corrected_in_markup_and_csp() {
    let (_dir, dist) = fixture();
    let config = config_for(&dist);
    PatchPipeline::new(RuleSet::standard(&config))
        .run(&dist)
        .unwrap();

    let home = fs::read_to_string(dist.join("index.html")).unwrap();
    assert!(!home.contains("getSupabaseClient()"));
    assert!(home.contains("https://sfrlnidbiviniuqhryyc.supabase.co/storage/v1/object/public/cats/milo.jpg"));
    assert!(home.contains("wss://sfrlnidbiviniuqhryyc.supabase.co"));

    // Non-HTML assets are out of scope for the page pass.
    let js = fs::read_to_string(dist.join("assets/index.js")).unwrap();
    assert!(js.contains("getSupabaseClient().co"));
}

/// Test: existing style-src token is not appended again
#[test]
fn test_existing_csp_token_not_duplicated() {
    let (_dir, dist) = fixture();
    let config = config_for(&dist);
    PatchPipeline::new(RuleSet::standard(&config))
        .run(&dist)
        .unwrap();

    let home = fs::read_to_string(dist.join("index.html")).unwrap();
    let policy = sitefix_core::csp::meta_policy(&home).expect("policy");
    let style = policy.directive("style-src").unwrap();
    let google = style
        .sources
        .iter()
        .filter(|s| s.contains("fonts.googleapis.com"))
        .count();
    assert_eq!(google, 1);
    assert!(policy.contains("font-src", "https://fonts.gstatic.com"));
    assert!(policy.contains("img-src", "data:"));
    assert!(policy.contains("connect-src", "wss://*.supabase.co"));

    let reparsed = CspPolicy::parse(&policy.to_string());
    assert_eq!(reparsed, policy);
}

/// Test: an unreadable file does not stop the others
#[test]
fn test_per_file_isolation() {
    let (_dir, dist) = fixture();
    fs::write(dist.join("a-broken.html"), [0x3c, 0x68, 0xff, 0xfe, 0x3e]).unwrap();
    let config = config_for(&dist);

    let report = PatchPipeline::new(RuleSet::standard(&config))
        .run(&dist)
        .expect("run");

    assert_eq!(report.scanned, 4);
    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.failures[0].path, dist.join("a-broken.html"));
    assert_eq!(report.changed_count(), 3);
    assert!(report.changed.contains(&dist.join("index.html")));
    assert!(report.changed.contains(&dist.join("blog/2024/kitten-care.html")));
}

/// Test: blog post without a CSP gets the inline recovery script,
/// the strict home page gets the external reference
#[test]
fn test_recovery_script_placement() {
    let (_dir, dist) = fixture();
    let config = config_for(&dist);
    let report = fix_site(&config).expect("fix site");
    assert!(report.recovery_script_written);
    assert_eq!(report.placeholders_created.len(), config.placeholder_assets.len());

    let post = fs::read_to_string(dist.join("blog/2024/kitten-care.html")).unwrap();
    assert!(post.starts_with("<html><head><script data-sitefix-recovery>"));

    let home = fs::read_to_string(dist.join("index.html")).unwrap();
    assert!(home.contains(r#"<script src="/sitefix-recovery.js" data-sitefix-recovery></script>"#));
    assert!(dist.join("sitefix-recovery.js").is_file());
    assert!(dist.join("fonts/inter-var.woff2").is_file());

    let again = fix_site(&config).expect("fix site again");
    assert_eq!(again.files_changed(), 0);
}

const VITE_INDEX: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <link rel="icon" type="image/svg+xml" href="/favicon.svg" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>Whisker Haven</title>
    <script type="module" crossorigin src="/assets/index-3f9a.js"></script>
  </head>
  <body><div id="root"></div></body>
</html>
"#;

/// Test: the inlined recovery script lands after the charset declaration,
/// which stays inside the first 1024 bytes
#[test]
fn test_inline_recovery_keeps_charset_in_first_kilobyte() {
    let (_dir, dist) = fixture();
    fs::write(dist.join("index.html"), VITE_INDEX).unwrap();
    let config = config_for(&dist);
    fix_site(&config).expect("fix site");

    let page = fs::read_to_string(dist.join("index.html")).unwrap();
    let charset = page.find(r#"<meta charset="UTF-8" />"#).expect("charset kept");
    let script = page.find("<script data-sitefix-recovery>").expect("inline script");
    assert!(charset < 1024, "charset at byte {charset}");
    assert!(script > charset);
}

/// Test: patched pages keep their permissions and the written recovery
/// script is world-readable
#[cfg(unix)]
#[test]
fn test_patched_files_stay_readable() {
    use std::os::unix::fs::PermissionsExt;

    let (_dir, dist) = fixture();
    let home = dist.join("index.html");
    fs::set_permissions(&home, fs::Permissions::from_mode(0o644)).unwrap();
    let config = config_for(&dist);
    fix_site(&config).expect("fix site");

    let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode(&home), 0o644);
    assert_eq!(mode(&dist.join("sitefix-recovery.js")), 0o644);
}
