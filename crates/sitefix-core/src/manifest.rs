//! Route manifest: the ordered list of public routes to prerender.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Metadata for a single public route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteEntry {
    /// URL path, always starting with `/`.
    pub path: String,

    /// Document title written into the snapshot.
    pub title: String,

    /// Meta description written into the snapshot when absent.
    pub description: String,
}

impl RouteEntry {
    pub fn new(path: &str, title: &str, description: &str) -> Self {
        Self {
            path: path.to_string(),
            title: title.to_string(),
            description: description.to_string(),
        }
    }

    /// Snapshot file for this route, relative to the output directory.
    pub fn output_file(&self) -> PathBuf {
        output_file(&self.path)
    }
}

/// Ordered route manifest. Prerendering follows this order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct RouteManifest {
    routes: Vec<RouteEntry>,
}

impl RouteManifest {
    pub fn new(routes: Vec<RouteEntry>) -> Self {
        Self { routes }
    }

    /// The public pages of the rescue site.
    pub fn public_site() -> Self {
        Self::new(vec![
            RouteEntry::new(
                "/",
                "Whisker Haven Cat Rescue",
                "Rescue, rehabilitation and adoption of cats in need.",
            ),
            RouteEntry::new(
                "/about",
                "About Us | Whisker Haven",
                "Who we are, how we work and the volunteers behind the rescue.",
            ),
            RouteEntry::new(
                "/adopt",
                "Adopt a Cat | Whisker Haven",
                "Meet the cats currently looking for a forever home.",
            ),
            RouteEntry::new(
                "/blog",
                "Blog | Whisker Haven",
                "Stories, care guides and news from the rescue.",
            ),
            RouteEntry::new(
                "/events",
                "Events | Whisker Haven",
                "Adoption days, fundraisers and community events.",
            ),
            RouteEntry::new(
                "/donate",
                "Donate | Whisker Haven",
                "Support food, shelter and veterinary care for rescued cats.",
            ),
            RouteEntry::new(
                "/volunteer",
                "Volunteer | Whisker Haven",
                "Foster, transport or help out at the shelter.",
            ),
            RouteEntry::new(
                "/contact",
                "Contact | Whisker Haven",
                "Get in touch with the rescue team.",
            ),
            RouteEntry::new(
                "/success-stories",
                "Success Stories | Whisker Haven",
                "Happy endings from cats adopted through the rescue.",
            ),
        ])
    }

    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&RouteEntry> {
        self.routes.iter().find(|r| r.path == path)
    }
}

impl Default for RouteManifest {
    fn default() -> Self {
        Self::public_site()
    }
}

/// Map a route path to its snapshot file.
///
/// `/` becomes `index.html`; any other route drops the leading slash (and a
/// trailing one) and gains `.html`.
pub fn output_file(route: &str) -> PathBuf {
    let trimmed = route.trim_matches('/');
    if trimmed.is_empty() {
        PathBuf::from("index.html")
    } else {
        PathBuf::from(format!("{trimmed}.html"))
    }
}
