//! Payload template resolution
//!
//! Each executor invocation owns its own `PayloadEngine`; there is no global
//! generator state, so runs stay independent and tests deterministic where
//! the generator kind allows.

use once_cell::sync::Lazy;
use rand::distr::Alphanumeric;
use rand::Rng;
use regex::Regex;

use crate::spec::{GeneratorKind, PayloadSpec, PayloadVariable};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").unwrap());

/// All placeholder names appearing in a template
pub fn placeholder_names(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// Resolves payload templates by generating a value for each declared
/// variable. Placeholders without a declared variable are left verbatim.
#[derive(Debug, Default)]
pub struct PayloadEngine;

impl PayloadEngine {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the template for the request at `request_index` (0-based).
    pub fn resolve(&self, payload: &PayloadSpec, request_index: u32) -> String {
        PLACEHOLDER
            .replace_all(&payload.template, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                match payload.variables.get(name) {
                    Some(variable) => self.generate(variable, request_index),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    fn generate(&self, variable: &PayloadVariable, request_index: u32) -> String {
        match variable.kind {
            GeneratorKind::Incremental => {
                let base = variable
                    .params
                    .get("base")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                increment_base(base, request_index)
            }
            GeneratorKind::RandomId => {
                let length = param_usize(variable, "length", 8);
                let mut rng = rand::rng();
                (0..length)
                    .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
                    .collect()
            }
            GeneratorKind::Uuid => uuid::Uuid::new_v4().to_string(),
            GeneratorKind::Timestamp => chrono::Utc::now().timestamp_millis().to_string(),
            GeneratorKind::RandomString => {
                let length = param_usize(variable, "length", 12);
                rand::rng()
                    .sample_iter(Alphanumeric)
                    .take(length)
                    .map(char::from)
                    .collect()
            }
        }
    }
}

fn param_usize(variable: &PayloadVariable, key: &str, default: usize) -> usize {
    variable
        .params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}

/// Split a trailing numeric suffix off the base value and add the request
/// index to it; a base without a numeric suffix gets the index appended.
fn increment_base(base: &str, request_index: u32) -> String {
    let digits_start = base
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    let (prefix, suffix) = base.split_at(digits_start);
    match suffix.parse::<u64>() {
        Ok(n) => format!("{}{}", prefix, n + u64::from(request_index)),
        Err(_) => format!("{}{}", base, request_index),
    }
}
