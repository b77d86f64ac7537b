//! `${VAR}` substitution for config files.
//!
//! - `${VAR}` must be set (an empty value is allowed).
//! - `${VAR:-default}` falls back when `VAR` is unset or empty, as in sh.
//! - `$${...}` is kept literally as `${...}`.

use anyhow::{bail, Result};
use regex::{Captures, Regex};
use std::env;

const PATTERN: &str = r"\$(\$?)\{([A-Za-z_][A-Za-z0-9_]*)(:-[^}]*)?\}";

pub fn expand_env(input: &str) -> Result<String> {
    let re = Regex::new(PATTERN)?;
    let mut missing: Vec<String> = Vec::new();

    let expanded = re.replace_all(input, |caps: &Captures<'_>| {
        if !caps[1].is_empty() {
            return caps[0][1..].to_string();
        }
        let name = &caps[2];
        let fallback = caps.get(3).map(|m| &m.as_str()[2..]);
        match (env::var(name).ok().filter(|v| !v.is_empty() || fallback.is_none()), fallback) {
            (Some(value), _) => value,
            (None, Some(fallback)) => fallback.to_string(),
            (None, None) => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        missing.dedup();
        bail!("missing environment variable(s): {}", missing.join(", "));
    }
    Ok(expanded.into_owned())
}
