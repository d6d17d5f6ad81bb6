//! Text templates: user-supplied service URL formats and the remote shell commands
//!
//! Service formats are written Go-style (`http://{{.IP}}:{{.Port}}`); the leading
//! dot on each field is stripped before handing the source to minijinja.

use crate::{Error, Result};
use minijinja::{context, Environment, UndefinedBehavior, Value};

/// Format used when the user gives none
pub const DEFAULT_SERVICE_FORMAT: &str = "http://{{.IP}}:{{.Port}}";

const URL_TEMPLATE: &str = "url";

/// A compiled service URL format
#[derive(Debug)]
pub struct UrlTemplate {
    env: Environment<'static>,
}

impl UrlTemplate {
    pub fn new(source: &str) -> Result<Self> {
        let env = strict_env(URL_TEMPLATE, normalize(source))?;
        Ok(Self { env })
    }

    /// Render for one (IP, node port) pair
    pub fn render(&self, ip: &str, port: i32) -> Result<String> {
        let tmpl = self.env.get_template(URL_TEMPLATE)?;
        Ok(tmpl.render(context! { IP => ip, Port => port })?)
    }
}

impl std::str::FromStr for UrlTemplate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        UrlTemplate::new(s)
    }
}

/// Render a one-off template; every referenced variable must be supplied
pub fn render(name: &'static str, source: &'static str, ctx: Value) -> Result<String> {
    let env = strict_env(name, source.to_string())?;
    let tmpl = env.get_template(name)?;
    Ok(tmpl.render(ctx)?)
}

fn strict_env(name: &'static str, source: String) -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_template_owned(name, source)?;
    Ok(env)
}

/// `{{.IP}}` / `{{ .Port }}` / `{{- .IP }}` to `{{IP}}` / `{{ Port }}` / `{{- IP }}`
fn normalize(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(idx) = rest.find("{{") {
        out.push_str(&rest[..idx + 2]);
        rest = &rest[idx + 2..];
        // Go only reads `-` as a trim marker when whitespace follows
        if let Some(after) = rest.strip_prefix('-') {
            if after.starts_with(char::is_whitespace) {
                out.push('-');
                rest = after;
            }
        }
        let trimmed = rest.trim_start();
        let ws = &rest[..rest.len() - trimmed.len()];
        out.push_str(ws);
        rest = trimmed.strip_prefix('.').unwrap_or(trimmed);
    }
    out.push_str(rest);
    out
}
