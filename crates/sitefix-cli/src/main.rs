//! Sitefix - build and post-build fixes for the rescue site
//!
//! ## Commands
//!
//! - `build`: Clean, bundle, serve and prerender every route
//! - `fix-csp`: Patch every HTML file under the output directory
//! - `fix-blog-csp`: Patch the blog subtree only
//! - `fix-supabase-env`: Write the backend env fallback and reference it
//! - `release`: `build`, then `fix-csp`, then `fix-supabase-env`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sitefix_core::{fix_blog, fix_site, write_env_fallback, SiteConfig, SiteFixReport};
use sitefix_prerender::{ChromeLauncher, PrerenderPipeline, PrerenderReport};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "sitefix")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, prerender and patch the rescue site's static output", long_about = None)]
struct Cli {
    /// Configuration file (default: ./sitefix.json when present)
    #[arg(short, long, global = true, env = "SITEFIX_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean, bundle, start the preview server and prerender every route
    Build {
        /// Write the run report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Apply the HTML/CSP patch rules to every page in the output directory
    FixCsp,

    /// Apply the patch rules to the blog subtree only
    FixBlogCsp,

    /// Write supabase-env.js/json and reference the script from every page
    FixSupabaseEnv,

    /// Build, then fix-csp, then fix-supabase-env
    Release {
        /// Write the build report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    sitefix_core::init_tracing(cli.json, level);

    let config = SiteConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Build { report } => cmd_build(&config, report.as_deref()).await,
        Commands::FixCsp => cmd_fix_csp(&config),
        Commands::FixBlogCsp => cmd_fix_blog_csp(&config),
        Commands::FixSupabaseEnv => cmd_fix_supabase_env(&config),
        Commands::Release { report } => cmd_release(&config, report.as_deref()).await,
    }
}

async fn cmd_build(config: &SiteConfig, report_path: Option<&Path>) -> Result<()> {
    let report = PrerenderPipeline::run(config, &ChromeLauncher::new())
        .await
        .context("Build and prerender failed")?;

    if let Some(path) = report_path {
        write_report(&report, path)?;
    }
    for failed in report.failed_routes() {
        warn!(
            route = %failed.route,
            reason = failed.failure_reason().unwrap_or_default(),
            "route not prerendered"
        );
    }

    println!(
        "Prerendered {}/{} routes into {} in {:.1}s (run {})",
        report.written(),
        report.routes.len(),
        config.output_dir.display(),
        report.duration_ms as f64 / 1000.0,
        report.run_id
    );
    Ok(())
}

fn write_report(report: &PrerenderReport, path: &Path) -> Result<()> {
    let json = serde_json::to_vec_pretty(report)?;
    sitefix_core::write_atomic(path, &json)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    info!(path = %path.display(), "run report written");
    Ok(())
}

fn cmd_fix_csp(config: &SiteConfig) -> Result<()> {
    let report = fix_site(config).context("CSP fix failed")?;
    print_fix_summary("fix-csp", &report);
    Ok(())
}

fn cmd_fix_blog_csp(config: &SiteConfig) -> Result<()> {
    let report = fix_blog(config).context("Blog CSP fix failed")?;
    print_fix_summary("fix-blog-csp", &report);
    Ok(())
}

fn print_fix_summary(command: &str, report: &SiteFixReport) {
    for failure in &report.pages.failures {
        warn!(path = %failure.path.display(), error = %failure.error, "file skipped");
    }
    println!(
        "{command}: scanned {} pages under {}, changed {}, failed {}, {} other files written",
        report.pages.scanned,
        report.root.display(),
        report.pages.changed_count(),
        report.pages.failed_count(),
        report.files_changed() - report.pages.changed_count()
    );
}

fn cmd_fix_supabase_env(config: &SiteConfig) -> Result<()> {
    let report = write_env_fallback(config).context("Supabase env fallback failed")?;
    println!(
        "fix-supabase-env: wrote {} files, referenced from {} of {} pages",
        report.files_written.len(),
        report.pages.changed_count(),
        report.pages.scanned
    );
    Ok(())
}

async fn cmd_release(config: &SiteConfig, report_path: Option<&Path>) -> Result<()> {
    // Credentials are needed by the last step; do not spend a build finding out.
    config
        .require_supabase()
        .context("Release needs Supabase credentials")?;

    cmd_build(config, report_path).await?;
    cmd_fix_csp(config)?;
    cmd_fix_supabase_env(config)?;
    println!("release: done");
    Ok(())
}
