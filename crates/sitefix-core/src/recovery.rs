//! Browser-side recovery script.
//!
//! The generated script re-applies the host and CSP fixes in the page itself,
//! for markup that reaches the DOM without passing through the build-time
//! patch (client-side re-renders after hydration). Every node it touches is
//! marked with the configured "fixed" attribute and skipped on later passes,
//! so running it on load, after the recheck delay and on every DOM mutation
//! cannot loop.

use serde_json::json;

use crate::config::{HostFix, RecoveryConfig};
use crate::csp::CspRequirements;

const TEMPLATE: &str = r##"(function () {
  "use strict";
  if (window.__sitefixRecovery) { return; }
  window.__sitefixRecovery = true;

  var CFG = __SITEFIX_CONFIG__;
  var URL_ATTRS = ["src", "href", "srcset", "content", "data-src", "action"];

  function escapeRe(s) { return s.replace(/[.*+?^${}()|[\]\\]/g, "\\$&"); }

  var HOST_RES = CFG.hostFixes.map(function (f) {
    return {
      re: new RegExp("((?:https|wss)://[A-Za-z0-9-]+)\\." + escapeRe(f.broken), "g"),
      to: "$1." + f.replacement
    };
  });

  function fixUrl(value) {
    var out = value;
    HOST_RES.forEach(function (h) { out = out.replace(h.re, h.to); });
    return out;
  }

  function hasBrokenHost(value) {
    return CFG.hostFixes.some(function (f) { return value.indexOf(f.broken) !== -1; });
  }

  function matchesHost(value, hosts) {
    return hosts.some(function (h) { return value.indexOf(h) !== -1; });
  }

  function patchCsp(meta) {
    var directives = (meta.getAttribute("content") || "").split(";")
      .map(function (d) { return d.trim(); })
      .filter(function (d) { return d.length > 0; });
    var changed = false;
    CFG.csp.forEach(function (req) {
      var idx = -1;
      for (var i = 0; i < directives.length; i++) {
        if (directives[i].split(/\s+/)[0].toLowerCase() === req.directive) { idx = i; break; }
      }
      if (idx === -1) {
        directives.push(req.directive + " " + req.token);
        changed = true;
      } else if (directives[idx].indexOf(req.token) === -1) {
        directives[idx] = directives[idx] + " " + req.token;
        changed = true;
      }
    });
    if (changed) { meta.setAttribute("content", directives.join("; ")); }
  }

  function isCspMeta(el) {
    return el.tagName === "META" &&
      (el.getAttribute("http-equiv") || "").toLowerCase() === "content-security-policy";
  }

  function fixElement(el) {
    if (!el || el.nodeType !== 1 || el.hasAttribute(CFG.fixedAttr)) { return; }
    var touched = false;

    if (isCspMeta(el)) {
      patchCsp(el);
      touched = true;
    }

    if (el.tagName === "LINK" && (el.getAttribute("rel") || "").toLowerCase() === "preload" &&
        matchesHost(el.getAttribute("href") || "", CFG.placeholderHosts)) {
      el.parentNode && el.parentNode.removeChild(el);
      return;
    }

    URL_ATTRS.forEach(function (attr) {
      var value = el.getAttribute(attr);
      if (value && hasBrokenHost(value)) {
        el.setAttribute(attr, fixUrl(value));
        touched = true;
      }
    });

    if (el.tagName === "IMG" && matchesHost(el.getAttribute("src") || "", CFG.fallbackHosts)) {
      el.addEventListener("error", function onError() {
        el.removeEventListener("error", onError);
        el.setAttribute("src", CFG.fallbackImage);
      });
      touched = true;
    }

    if (touched) { el.setAttribute(CFG.fixedAttr, ""); }
  }

  function sweep(root) {
    if (!root || !root.querySelectorAll) { return; }
    fixElement(root);
    var all = root.querySelectorAll("meta, link, script, img, a, iframe, source, form");
    for (var i = 0; i < all.length; i++) { fixElement(all[i]); }
  }

  function run() { sweep(document.documentElement); }

  if (document.readyState === "loading") {
    document.addEventListener("DOMContentLoaded", run);
  } else {
    run();
  }
  window.setTimeout(run, CFG.recheckMs);

  if (window.MutationObserver) {
    new MutationObserver(function (records) {
      records.forEach(function (r) {
        for (var i = 0; i < r.addedNodes.length; i++) { sweep(r.addedNodes[i]); }
      });
    }).observe(document.documentElement, { childList: true, subtree: true });
  }
})();
"##;

/// Render the recovery script for the given configuration.
pub fn render_script(
    recovery: &RecoveryConfig,
    host_fixes: &[HostFix],
    csp: &CspRequirements,
) -> String {
    let cfg = json!({
        "fixedAttr": recovery.fixed_attr,
        "hostFixes": host_fixes
            .iter()
            .map(|f| json!({ "broken": f.broken, "replacement": f.replacement }))
            .collect::<Vec<_>>(),
        "csp": csp
            .entries()
            .iter()
            .map(|r| json!({ "directive": r.directive, "token": r.token }))
            .collect::<Vec<_>>(),
        "placeholderHosts": recovery.placeholder_api_hosts,
        "fallbackHosts": recovery.fallback_image_hosts,
        "fallbackImage": recovery.fallback_image,
        "recheckMs": recovery.recheck_delay_ms,
    });
    // `</` would terminate an inline <script> block early.
    let cfg = cfg.to_string().replace("</", "<\\/");
    TEMPLATE.replace("__SITEFIX_CONFIG__", &cfg)
}

/// Inline `<script>` tag carrying the recovery script.
pub fn inline_tag(recovery: &RecoveryConfig, script: &str) -> String {
    format!("<script {}>{}</script>", recovery.marker_attr, script)
}

/// External `<script src>` tag pointing at the written script file.
pub fn external_tag(recovery: &RecoveryConfig) -> String {
    format!(
        "<script src=\"/{}\" {}></script>",
        recovery.script_file.trim_start_matches('/'),
        recovery.marker_attr
    )
}
