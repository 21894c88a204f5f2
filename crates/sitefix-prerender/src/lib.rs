//! Sitefix Prerender
//!
//! Produces static HTML snapshots of the rescue site's client-rendered routes:
//! - Clean output and run the production bundler
//! - Start the preview server and wait until it answers HTTP
//! - Drive a headless browser over the route manifest with retries
//! - Validate and annotate each snapshot, then shut everything down

pub mod browser;
pub mod build;
pub mod chrome;
pub mod fakes;
pub mod obs;
pub mod pipeline;
pub mod prerender;
pub mod probe;
pub mod server;
pub mod stage;

pub use browser::{root_has_content, Browser, BrowserError, BrowserLauncher, BrowserPage};
pub use build::{build_bundle, clean_output};
pub use chrome::{ChromeBrowser, ChromeLauncher};
pub use pipeline::{check_failure_threshold, PrerenderPipeline, PrerenderReport};
pub use prerender::{
    annotate, prerender_route, validate_markup, PrerenderSettings, RouteOutcome, RouteStatus,
};
pub use probe::HttpProbe;
pub use server::{PreviewServer, ShutdownKind};
pub use stage::{StageResult, StageRunner};
