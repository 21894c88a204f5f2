//! End-to-end orchestrator tests.
//!
//! The bundler is a shell one-liner, the "preview server" is a long-running
//! `sleep`, and HTTP readiness is answered by a listener inside the test.
//! The browser is the scripted fake.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sitefix_core::{
    CommandConfig, ReadinessPolicy, RetryPolicy, RouteEntry, RouteManifest, SiteConfig,
    SiteFixError,
};
use sitefix_prerender::fakes::{FakeBrowser, FakeLauncher, FakeResponse};
use sitefix_prerender::PrerenderPipeline;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const PAGE: &str = r#"<!doctype html><html><head><title>Vite App</title></head><body><div id="root"><header><nav>Whisker Haven</nav></header><main>Cats waiting for homes</main><footer>Registered charity</footer></div></body></html>"#;
const NO_FOOTER: &str = r#"<!doctype html><html><head></head><body><div id="root"><header>nav</header><main>loading</main></div></body></html>"#;

/// Answers every request with `200 OK` until the test ends. Returns the port.
async fn spawn_http_responder() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                    .await;
            });
        }
    });
    port
}

fn config_for(dist: &Path, port: u16, routes: &[&str]) -> SiteConfig {
    let bundle_script = format!(
        "mkdir -p '{0}/assets' && echo 'console.log(1)' > '{0}/assets/app.js'",
        dist.display()
    );
    SiteConfig {
        output_dir: dist.to_path_buf(),
        preview_port: port,
        routes: RouteManifest::new(
            routes
                .iter()
                .map(|r| RouteEntry::new(r, &format!("{r} | Whisker Haven"), "Rescue cats"))
                .collect(),
        ),
        bundler: CommandConfig::new("sh", &["-c", &bundle_script], 60),
        preview: CommandConfig::new("sleep", &["30"], 0),
        server_retry: RetryPolicy::immediate(2),
        route_retry: RetryPolicy::immediate(3),
        readiness: ReadinessPolicy {
            initial_delay_ms: 10,
            poll_interval_ms: 20,
            max_interval_ms: 100,
            deadline_ms: 2_000,
            probe_timeout_ms: 500,
        },
        shutdown_grace_ms: 2_000,
        ..SiteConfig::default()
    }
}

#[cfg(target_os = "linux")]
/// A preview command that records its pid, then becomes a long `sleep`.
fn pid_recording_preview(dir: &Path) -> (CommandConfig, PathBuf) {
    let pid_file = dir.join("preview.pid");
    let script = format!("echo $$ > '{}'; exec sleep 30", pid_file.display());
    (CommandConfig::new("sh", &["-c", &script], 0), pid_file)
}

#[cfg(target_os = "linux")]
fn recorded_pid(pid_file: &Path) -> u32 {
    fs::read_to_string(pid_file)
        .expect("preview pid recorded")
        .trim()
        .parse()
        .expect("pid is numeric")
}

#[cfg(target_os = "linux")]
/// Running, non-zombie process with this pid.
fn process_alive(pid: u32) -> bool {
    let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    let state = stat.rsplit_once(')').map(|(_, rest)| rest.trim_start());
    !matches!(state.and_then(|s| s.chars().next()), Some('Z') | Some('X') | None)
}

fn html_files(dist: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dist)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".html"))
        .collect();
    names.sort();
    names
}

/// Test: two routes produce exactly index.html and about.html
#[tokio::test]
async fn test_two_routes_written() {
    let dir = tempdir().unwrap();
    let dist = dir.path().join("dist");
    fs::create_dir_all(&dist).unwrap();
    fs::write(dist.join("stale.html"), "old build").unwrap();

    let port = spawn_http_responder().await;
    let config = config_for(&dist, port, &["/", "/about"]);
    let browser = FakeBrowser::new().with_default(FakeResponse::Html(PAGE.to_string()));
    let launcher = FakeLauncher::new(browser.clone());

    let report = PrerenderPipeline::run(&config, &launcher).await.expect("run");

    assert_eq!(report.written(), 2);
    assert_eq!(report.failed(), 0);
    assert!(report.bundle.passed());
    assert_eq!(html_files(&dist), vec!["about.html", "index.html"]);
    assert!(dist.join("assets/app.js").is_file());

    for file in ["index.html", "about.html"] {
        let html = fs::read_to_string(dist.join(file)).unwrap();
        assert!(html.contains("<header>"), "{file} lacks header");
        assert!(html.contains("<footer>"), "{file} lacks footer");
    }
    let about = fs::read_to_string(dist.join("about.html")).unwrap();
    assert!(about.contains("<title>/about | Whisker Haven</title>"));

    assert_eq!(browser.visits(), vec!["/", "/about"]);
    assert!(browser.is_closed());
    assert_eq!(browser.open_pages(), 0);
}

/// Test: a route missing its footer is retried and never written
#[tokio::test]
async fn test_missing_footer_retried_not_written() {
    let dir = tempdir().unwrap();
    let dist = dir.path().join("dist");
    let port = spawn_http_responder().await;
    let config = config_for(&dist, port, &["/", "/about"]);
    let browser = FakeBrowser::new()
        .with_default(FakeResponse::Html(PAGE.to_string()))
        .script("/about", vec![FakeResponse::Html(NO_FOOTER.to_string())]);
    let launcher = FakeLauncher::new(browser.clone());

    let report = PrerenderPipeline::run(&config, &launcher).await.expect("run");

    assert_eq!(report.written(), 1);
    assert_eq!(report.failed(), 1);
    let failed = report.failed_routes().next().unwrap();
    assert_eq!(failed.route, "/about");
    assert_eq!(failed.attempts, 3);
    assert!(failed.failure_reason().unwrap().contains("<footer>"));
    assert_eq!(browser.visit_count("/about"), 3);
    assert_eq!(html_files(&dist), vec!["index.html"]);
}

/// Test: a route that recovers on a later attempt is written
#[tokio::test]
async fn test_transient_navigation_error_recovers() {
    let dir = tempdir().unwrap();
    let dist = dir.path().join("dist");
    let port = spawn_http_responder().await;
    let config = config_for(&dist, port, &["/adopt"]);
    let browser = FakeBrowser::new().script(
        "/adopt",
        vec![
            FakeResponse::NavigationError("net::ERR_CONNECTION_RESET".to_string()),
            FakeResponse::NeverReady,
            FakeResponse::Html(PAGE.to_string()),
        ],
    );
    let launcher = FakeLauncher::new(browser.clone());

    let report = PrerenderPipeline::run(&config, &launcher).await.expect("run");

    assert_eq!(report.routes[0].attempts, 3);
    assert!(dist.join("adopt.html").is_file());
}

/// Test: bundler failure is fatal and nothing further starts
#[tokio::test]
async fn test_bundler_failure_aborts_run() {
    let dir = tempdir().unwrap();
    let dist = dir.path().join("dist");
    let mut config = config_for(&dist, 1, &["/"]);
    config.bundler = CommandConfig::new("sh", &["-c", "echo 'vite: syntax error' >&2; exit 2"], 60);
    let launcher = FakeLauncher::new(FakeBrowser::new());

    let err = PrerenderPipeline::run(&config, &launcher).await.unwrap_err();

    assert!(matches!(err, SiteFixError::BuildFailure { exit_code: 2 }));
    assert_eq!(launcher.launches(), 0);
    assert!(!dist.exists());
}

/// Test: a preview server that dies on startup fails after every attempt
#[tokio::test]
async fn test_server_start_failure_after_attempts() {
    let dir = tempdir().unwrap();
    let dist = dir.path().join("dist");
    let mut config = config_for(&dist, 1, &["/"]);
    config.preview = CommandConfig::new("sh", &["-c", "echo 'port {port} in use' >&2; exit 1"], 0);
    let launcher = FakeLauncher::new(FakeBrowser::new());

    let err = PrerenderPipeline::run(&config, &launcher).await.unwrap_err();

    match err {
        SiteFixError::ServerStartFailure { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("expected ServerStartFailure, got {other:?}"),
    }
    assert_eq!(launcher.launches(), 0);
}

/// Test: browser launch failure still releases the server
#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_browser_launch_failure() {
    let dir = tempdir().unwrap();
    let dist = dir.path().join("dist");
    let port = spawn_http_responder().await;
    let mut config = config_for(&dist, port, &["/"]);
    let (preview, pid_file) = pid_recording_preview(dir.path());
    config.preview = preview;
    let launcher = FakeLauncher::failing("no usable display");

    let err = PrerenderPipeline::run(&config, &launcher).await.unwrap_err();

    assert!(matches!(err, SiteFixError::Browser(msg) if msg.contains("no usable display")));
    assert_eq!(html_files(&dist), Vec::<String>::new());
    let pid = recorded_pid(&pid_file);
    assert!(!process_alive(pid), "preview server {pid} outlived the run");
}

/// Test: cancelling mid-prerender closes the browser and stops the server
#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_cancelled_run_releases_server_and_browser() {
    let dir = tempdir().unwrap();
    let dist = dir.path().join("dist");
    let port = spawn_http_responder().await;
    let mut config = config_for(&dist, port, &["/", "/about"]);
    let (preview, pid_file) = pid_recording_preview(dir.path());
    config.preview = preview;
    // Long fixed backoff keeps the run parked between attempts.
    config.route_retry = RetryPolicy {
        max_attempts: 5,
        base_delay_ms: 60_000,
        max_delay_ms: 60_000,
        exponential: false,
    };
    let browser = FakeBrowser::new().with_default(FakeResponse::NeverReady);
    let launcher = FakeLauncher::new(browser.clone());

    let watcher = browser.clone();
    let cancel = async move {
        while watcher.visit_count("/") == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    let err = tokio::time::timeout(
        Duration::from_secs(20),
        PrerenderPipeline::run_until(&config, &launcher, cancel),
    )
    .await
    .expect("cancelled run returns promptly")
    .unwrap_err();

    assert!(matches!(err, SiteFixError::Interrupted));
    assert!(browser.is_closed());
    let pid = recorded_pid(&pid_file);
    assert!(!process_alive(pid), "preview server {pid} outlived the run");
    assert_eq!(html_files(&dist), Vec::<String>::new());
}

/// Test: failing every route fails the run but still closes the browser
#[tokio::test]
async fn test_all_routes_failing_fails_run() {
    let dir = tempdir().unwrap();
    let dist = dir.path().join("dist");
    let port = spawn_http_responder().await;
    let mut config = config_for(&dist, port, &["/", "/about", "/blog"]);
    config.route_retry = RetryPolicy::immediate(1);
    let browser = FakeBrowser::new().with_default(FakeResponse::NeverReady);
    let launcher = FakeLauncher::new(browser.clone());

    let err = PrerenderPipeline::run(&config, &launcher).await.unwrap_err();

    assert!(matches!(err, SiteFixError::RoutePrerenderFailure { .. }));
    assert!(err.to_string().contains("3 of 3 routes"));
    assert!(browser.is_closed());
    assert_eq!(browser.open_pages(), 0);
}

/// Test: concurrent rendering writes the same set of files
#[tokio::test]
async fn test_concurrent_rendering() {
    let dir = tempdir().unwrap();
    let dist = dir.path().join("dist");
    let port = spawn_http_responder().await;
    let mut config = config_for(&dist, port, &["/", "/about", "/donate", "/contact"]);
    config.prerender_concurrency = 3;
    let browser = FakeBrowser::new().with_default(FakeResponse::Html(PAGE.to_string()));
    let launcher = FakeLauncher::new(browser.clone());

    let report = PrerenderPipeline::run(&config, &launcher).await.expect("run");

    let routes: Vec<&str> = report.routes.iter().map(|r| r.route.as_str()).collect();
    assert_eq!(routes, vec!["/", "/about", "/donate", "/contact"]);
    assert_eq!(
        html_files(&dist),
        vec!["about.html", "contact.html", "donate.html", "index.html"]
    );
    assert_eq!(browser.open_pages(), 0);
}
