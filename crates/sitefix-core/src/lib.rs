//! Sitefix Core
//!
//! Configuration and post-build patching for the rescue site's static build:
//! - Route manifest and site configuration
//! - CSP policy model and token requirements
//! - Idempotent HTML patch rules and the tree-wide patch pipeline
//! - Browser recovery script, placeholder assets and backend env fallback

pub mod artifact;
pub mod assets;
pub mod config;
pub mod csp;
pub mod error;
pub mod fix;
pub mod headers;
pub mod manifest;
pub mod patch;
pub mod recovery;
pub mod rules;
pub mod supabase_env;
pub mod telemetry;
pub mod walk;

pub use artifact::{content_digest, write_atomic, HtmlArtifact};
pub use config::{
    BrowserConfig, CommandConfig, HostFix, ReadinessPolicy, RecoveryConfig, RetryPolicy,
    SiteConfig, SupabaseConfig,
};
pub use csp::{CspPolicy, CspRequirement, CspRequirements};
pub use error::{Result, SiteFixError};
pub use fix::{fix_blog, fix_site, fix_subtree, SiteFixReport};
pub use manifest::{output_file, RouteEntry, RouteManifest};
pub use patch::{apply_patch, PatchFailure, PatchOutcome, PatchPipeline, PatchReport};
pub use rules::{CspMetaRule, HostFixRule, PatchRule, RecoveryScriptRule, RuleSet};
pub use supabase_env::{write_env_fallback, EnvFallbackReport};
pub use telemetry::init_tracing;
pub use walk::find_html_files;
