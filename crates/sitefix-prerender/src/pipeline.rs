//! Build and prerender orchestration.
//!
//! Order: clean output → bundle → preview server → browser → routes →
//! shutdown. The server and browser are acquired in that order and released
//! in reverse on every path out of the run, including errors and Ctrl-C.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use sitefix_core::{Result, RouteEntry, SiteConfig, SiteFixError};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::browser::{Browser, BrowserLauncher};
use crate::build::{build_bundle, clean_output};
use crate::obs;
use crate::prerender::{prerender_route, PrerenderSettings, RouteOutcome};
use crate::server::PreviewServer;
use crate::stage::StageResult;

/// Summary of one build and prerender run.
#[derive(Debug, Clone, Serialize)]
pub struct PrerenderReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub bundle: StageResult,
    pub routes: Vec<RouteOutcome>,
    pub duration_ms: u64,
}

impl PrerenderReport {
    pub fn written(&self) -> usize {
        self.routes.iter().filter(|r| r.is_written()).count()
    }

    pub fn failed(&self) -> usize {
        self.routes.len() - self.written()
    }

    pub fn failed_routes(&self) -> impl Iterator<Item = &RouteOutcome> {
        self.routes.iter().filter(|r| !r.is_written())
    }
}

/// Runs the whole build and prerender sequence.
pub struct PrerenderPipeline;

impl PrerenderPipeline {
    /// Clean, bundle, serve and prerender every route in the manifest.
    ///
    /// Bundler and server failures abort the run. Route failures are
    /// recorded per route; the run as a whole fails only when no route was
    /// written or the failed share exceeds `max_route_failure_ratio`.
    ///
    /// Ctrl-C stops the run with [`SiteFixError::Interrupted`] once the
    /// browser and server are released.
    pub async fn run(config: &SiteConfig, launcher: &dyn BrowserLauncher) -> Result<PrerenderReport> {
        Self::run_until(config, launcher, interrupt_signal()).await
    }

    /// [`run`](Self::run), cancelled when `cancel` completes instead of on
    /// Ctrl-C.
    pub async fn run_until<F>(
        config: &SiteConfig,
        launcher: &dyn BrowserLauncher,
        cancel: F,
    ) -> Result<PrerenderReport>
    where
        F: Future<Output = ()>,
    {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id);
        Self::run_inner(config, launcher, run_id, cancel).instrument(span).await
    }

    async fn run_inner<F>(
        config: &SiteConfig,
        launcher: &dyn BrowserLauncher,
        run_id: String,
        cancel: F,
    ) -> Result<PrerenderReport>
    where
        F: Future<Output = ()>,
    {
        config.validate()?;
        let started_at = Utc::now();
        let started = Instant::now();
        let grace = config.shutdown_grace();
        obs::emit_run_started(&run_id, config.routes.len());
        tokio::pin!(cancel);

        // Dropping this future on cancel kills the bundler (`kill_on_drop`)
        // and any half-started server (`PreviewServer`'s drop).
        let (bundle, server) = tokio::select! {
            started = async {
                clean_output(&config.output_dir)?;
                let bundle = build_bundle(config).await?;
                let server = PreviewServer::start(config).await?;
                Ok::<_, SiteFixError>((bundle, server))
            } => started?,
            _ = &mut cancel => {
                warn!("interrupted before the preview server was ready");
                return Err(SiteFixError::Interrupted);
            }
        };

        let browser = tokio::select! {
            launched = launcher.launch(&config.browser) => match launched {
                Ok(browser) => browser,
                Err(e) => {
                    warn!(error = %e, "browser launch failed");
                    shutdown(server, None, grace).await;
                    return Err(e.into());
                }
            },
            _ = &mut cancel => {
                warn!("interrupted while launching the browser");
                shutdown(server, None, grace).await;
                return Err(SiteFixError::Interrupted);
            }
        };

        let settings = PrerenderSettings::from_config(config);
        let routes = tokio::select! {
            routes = render_all(browser.as_ref(), config.routes.routes(), &settings, config.prerender_concurrency) => Some(routes),
            _ = &mut cancel => None,
        };
        shutdown(server, Some(browser), grace).await;
        let Some(routes) = routes else {
            warn!("interrupted while prerendering");
            return Err(SiteFixError::Interrupted);
        };

        let report = PrerenderReport {
            run_id,
            started_at,
            bundle,
            routes,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        obs::emit_run_finished(&report.run_id, report.duration_ms, report.written(), report.failed());

        check_failure_threshold(&report, config.max_route_failure_ratio)?;
        Ok(report)
    }
}

/// Completes on Ctrl-C. Never completes when the handler cannot be
/// installed, so a missing handler does not cancel the run.
async fn interrupt_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Render routes in manifest order. One page is reused when rendering
/// sequentially; concurrent rendering gives each route its own page.
async fn render_all(
    browser: &dyn Browser,
    routes: &[RouteEntry],
    settings: &PrerenderSettings,
    concurrency: usize,
) -> Vec<RouteOutcome> {
    if concurrency <= 1 {
        let mut page = match browser.new_page().await {
            Ok(page) => page,
            Err(e) => {
                let reason = format!("cannot open page: {e}");
                return routes.iter().map(|entry| page_failure(entry, &reason)).collect();
            }
        };
        let mut outcomes = Vec::with_capacity(routes.len());
        for entry in routes {
            outcomes.push(prerender_route(page.as_mut(), entry, settings).await);
        }
        if let Err(e) = page.close().await {
            warn!(error = %e, "failed to close page");
        }
        return outcomes;
    }

    stream::iter(routes)
        .map(|entry| async move {
            let mut page = match browser.new_page().await {
                Ok(page) => page,
                Err(e) => return page_failure(entry, &format!("cannot open page: {e}")),
            };
            let outcome = prerender_route(page.as_mut(), entry, settings).await;
            if let Err(e) = page.close().await {
                warn!(route = %entry.path, error = %e, "failed to close page");
            }
            outcome
        })
        .buffered(concurrency)
        .collect()
        .await
}

fn page_failure(entry: &RouteEntry, reason: &str) -> RouteOutcome {
    obs::emit_route_failed(&entry.path, 0, reason);
    RouteOutcome {
        route: entry.path.clone(),
        attempts: 0,
        status: crate::prerender::RouteStatus::Failed {
            reason: reason.to_string(),
        },
        duration_ms: 0,
    }
}

/// Release the browser, then the server. Errors are logged, never raised,
/// so shutdown cannot mask the run's own result.
async fn shutdown(server: PreviewServer, browser: Option<Box<dyn Browser>>, grace: Duration) {
    if let Some(browser) = browser {
        match browser.close().await {
            Ok(()) => info!("browser closed"),
            Err(e) => warn!(error = %e, "failed to close browser"),
        }
    }
    let port = server.port();
    if let Err(e) = server.shutdown(grace).await {
        warn!(port = port, error = %e, "failed to stop preview server");
    }
}

/// Fail the run when nothing was written or too many routes failed.
pub fn check_failure_threshold(report: &PrerenderReport, max_ratio: f64) -> Result<()> {
    let total = report.routes.len();
    if total == 0 {
        return Ok(());
    }
    let failed = report.failed();
    let ratio = failed as f64 / total as f64;
    if report.written() == 0 || ratio > max_ratio {
        let reasons: Vec<String> = report
            .failed_routes()
            .map(|r| format!("{}: {}", r.route, r.failure_reason().unwrap_or_default()))
            .collect();
        return Err(SiteFixError::RoutePrerenderFailure {
            route: format!("{failed} of {total} routes"),
            attempts: report.failed_routes().map(|r| r.attempts).max().unwrap_or(0),
            reason: reasons.join("; "),
        });
    }
    if failed > 0 {
        warn!(failed = failed, total = total, "some routes were not prerendered");
    }
    Ok(())
}
