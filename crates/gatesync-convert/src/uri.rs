//! Path template rendering for the data plane.
//!
//! Templates carry two kinds of placeholders: stage variables `{env.NAME}`
//! and path parameters `{name}`. Route matching wants parameters as `:name`,
//! upstream rewriting wants `${name}`. Stage variables missing from the map
//! are left verbatim so they can still be bound later.
//!
//! Nested braces (`{a{b}}`) are never parsed recursively; the whole balanced
//! group is copied through as literal text.

use std::collections::BTreeMap;

const ENV_PREFIX: &str = "env.";

/// Which data-plane grammar to render path parameters into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriRenderer {
    /// `{name}` → `:name`
    RouteMatch,
    /// `{name}` → `${name}`
    UpstreamRewrite,
}

impl UriRenderer {
    pub fn render(self, template: &str, vars: &BTreeMap<String, String>) -> String {
        match self {
            UriRenderer::RouteMatch => render_route_path(template, vars),
            UriRenderer::UpstreamRewrite => render_upstream_path(template, vars),
        }
    }
}

/// Replace `{env.NAME}` with the value of `NAME` where one is bound.
pub fn substitute_env(template: &str, vars: &BTreeMap<String, String>) -> String {
    rewrite_placeholders(template, |token| {
        token
            .strip_prefix(ENV_PREFIX)
            .and_then(|name| vars.get(name))
            .cloned()
    })
}

/// Render a template for route matching: `/users/{id}` → `/users/:id`.
pub fn render_route_path(template: &str, vars: &BTreeMap<String, String>) -> String {
    let substituted = substitute_env(template, vars);
    rewrite_placeholders(&substituted, |token| {
        is_path_param(token).then(|| format!(":{token}"))
    })
}

/// Render a template for upstream rewriting: `/users/{id}` → `/users/${id}`.
pub fn render_upstream_path(template: &str, vars: &BTreeMap<String, String>) -> String {
    let substituted = substitute_env(template, vars);
    rewrite_placeholders(&substituted, |token| {
        is_path_param(token).then(|| format!("${{{token}}}"))
    })
}

fn is_path_param(token: &str) -> bool {
    !token.starts_with(ENV_PREFIX)
}

/// Walk `template`, offering the inside of every flat `{...}` token to
/// `replace`. Tokens for which `replace` returns `None`, empty tokens,
/// nested groups, and unbalanced braces are copied through unchanged.
fn rewrite_placeholders<F>(template: &str, replace: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let bytes = template.as_bytes();
    let mut out = String::with_capacity(template.len());
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        match scan_group(bytes, i) {
            Group::Flat(end) => {
                let token = &template[i + 1..end];
                if let Some(replacement) = (!token.is_empty()).then(|| replace(token)).flatten() {
                    out.push_str(&template[literal_start..i]);
                    out.push_str(&replacement);
                    literal_start = end + 1;
                }
                i = end + 1;
            }
            Group::Nested(end) => i = end + 1,
            // Only this brace is literal; later groups may still close.
            Group::Unclosed => i += 1,
        }
    }

    out.push_str(&template[literal_start..]);
    out
}

enum Group {
    /// `{...}` without inner braces; index of the closing brace.
    Flat(usize),
    /// Balanced group containing inner braces; index of the closing brace.
    Nested(usize),
    Unclosed,
}

fn scan_group(bytes: &[u8], open: usize) -> Group {
    let mut depth = 0usize;
    let mut nested = false;
    for (offset, byte) in bytes[open..].iter().enumerate() {
        match byte {
            b'{' => {
                depth += 1;
                if depth > 1 {
                    nested = true;
                }
            }
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let end = open + offset;
                    return if nested { Group::Nested(end) } else { Group::Flat(end) };
                }
            }
            _ => {}
        }
    }
    Group::Unclosed
}
