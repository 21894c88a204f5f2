//! Scripted in-memory browser (testing only)
//!
//! `FakeBrowser` answers each route from a per-route script of responses,
//! one per navigation; the last response repeats once the script runs out.
//! Routes without a script fall back to the default response.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sitefix_core::BrowserConfig;

use crate::browser::{
    root_has_content, Browser, BrowserError, BrowserLauncher, BrowserPage, BrowserResult,
};

/// What a navigation to a route produces.
#[derive(Debug, Clone)]
pub enum FakeResponse {
    /// Page renders this document.
    Html(String),
    /// Navigation itself fails.
    NavigationError(String),
    /// Page loads but the app root never fills in.
    NeverReady,
}

#[derive(Debug, Default)]
struct FakeState {
    scripts: HashMap<String, VecDeque<FakeResponse>>,
    default: Option<FakeResponse>,
    visits: Vec<String>,
    pages_opened: usize,
    pages_closed: usize,
    closed: bool,
}

impl FakeState {
    fn next_response(&mut self, route: &str) -> Option<FakeResponse> {
        match self.scripts.get_mut(route) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => self.default.clone(),
        }
    }
}

/// In-memory browser. Cloning shares state, so a test can keep a handle
/// for assertions after handing one to the launcher.
#[derive(Debug, Clone, Default)]
pub struct FakeBrowser {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Response for routes without their own script.
    pub fn with_default(self, response: FakeResponse) -> Self {
        self.state.lock().unwrap().default = Some(response);
        self
    }

    /// Script the responses for `route`, one per navigation.
    pub fn script(self, route: &str, responses: Vec<FakeResponse>) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(route.to_string(), responses.into());
        self
    }

    /// Route paths navigated to, in order, one entry per attempt.
    pub fn visits(&self) -> Vec<String> {
        self.state.lock().unwrap().visits.clone()
    }

    pub fn visit_count(&self, route: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .visits
            .iter()
            .filter(|v| v.as_str() == route)
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Pages opened but not yet closed.
    pub fn open_pages(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.pages_opened - state.pages_closed
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_page(&self) -> BrowserResult<Box<dyn BrowserPage>> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(BrowserError::Closed);
        }
        state.pages_opened += 1;
        Ok(Box::new(FakePage {
            state: Arc::clone(&self.state),
            current: None,
            closed: false,
        }))
    }

    async fn close(&self) -> BrowserResult<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

struct FakePage {
    state: Arc<Mutex<FakeState>>,
    current: Option<FakeResponse>,
    closed: bool,
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> BrowserResult<()> {
        let route = route_of(url);
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(BrowserError::Closed);
        }
        state.visits.push(route.clone());
        let response = state.next_response(&route);
        drop(state);

        match response {
            Some(FakeResponse::NavigationError(reason)) => {
                self.current = None;
                Err(BrowserError::Navigation {
                    url: url.to_string(),
                    reason,
                })
            }
            Some(response) => {
                self.current = Some(response);
                Ok(())
            }
            None => Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: "no scripted response".to_string(),
            }),
        }
    }

    async fn wait_for_root(&mut self, root_id: &str, timeout: Duration) -> BrowserResult<()> {
        let ready = match &self.current {
            Some(FakeResponse::Html(html)) => root_has_content(html, root_id),
            _ => false,
        };
        if ready {
            Ok(())
        } else {
            Err(BrowserError::Timeout {
                what: format!("#{root_id} to render"),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }

    async fn settle(&mut self, _delay: Duration) -> BrowserResult<()> {
        Ok(())
    }

    async fn content(&mut self) -> BrowserResult<String> {
        match &self.current {
            Some(FakeResponse::Html(html)) => Ok(html.clone()),
            _ => Ok(String::new()),
        }
    }

    async fn close(&mut self) -> BrowserResult<()> {
        if !self.closed {
            self.closed = true;
            self.state.lock().unwrap().pages_closed += 1;
        }
        Ok(())
    }
}

/// Path part of `url`, `/` when there is none.
fn route_of(url: &str) -> String {
    let after_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    match after_scheme.find('/') {
        Some(i) => after_scheme[i..].to_string(),
        None => "/".to_string(),
    }
}

/// Launcher handing out clones of one `FakeBrowser`, or failing.
#[derive(Debug, Clone, Default)]
pub struct FakeLauncher {
    browser: FakeBrowser,
    fail_with: Option<String>,
    launches: Arc<Mutex<usize>>,
}

impl FakeLauncher {
    pub fn new(browser: FakeBrowser) -> Self {
        Self {
            browser,
            fail_with: None,
            launches: Arc::default(),
        }
    }

    /// A launcher whose every launch fails with `reason`.
    pub fn failing(reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn launches(&self) -> usize {
        *self.launches.lock().unwrap()
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _config: &BrowserConfig) -> BrowserResult<Box<dyn Browser>> {
        *self.launches.lock().unwrap() += 1;
        if let Some(reason) = &self.fail_with {
            return Err(BrowserError::Launch(reason.clone()));
        }
        Ok(Box::new(self.browser.clone()))
    }
}
