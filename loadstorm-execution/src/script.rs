//! k6 script generation
//!
//! The container engine runs k6 inside a container; this module turns a
//! `LoadTestSpec` into the script it executes. Load patterns become VU
//! stages, literal bodies are inlined, and payload templates become
//! per-iteration JS expressions so every virtual user sends distinct data.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use loadstorm_core::{
    GeneratorKind, HttpMethod, LoadTestSpec, PatternKind, PayloadSpec, RequestSpec,
};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").unwrap());

const JS_HELPERS: &str = r#"function uuid() {
  return 'xxxxxxxx-xxxx-4xxx-yxxx-xxxxxxxxxxxx'.replace(/[xy]/g, function (c) {
    const r = (Math.random() * 16) | 0;
    const v = c === 'x' ? r : (r & 0x3) | 0x8;
    return v.toString(16);
  });
}
function randId(n) {
  let s = '';
  for (let i = 0; i < n; i++) s += Math.floor(Math.random() * 10);
  return s;
}
function randString(n) {
  const chars = 'ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789';
  let s = '';
  for (let i = 0; i < n; i++) s += chars[Math.floor(Math.random() * chars.length)];
  return s;
}"#;

/// Generate the complete k6 script for a spec
pub fn generate_script(spec: &LoadTestSpec) -> String {
    let mut script = String::new();
    script.push_str("import http from 'k6/http';\nimport { sleep } from 'k6';\n\n");
    script.push_str(&format!(
        "export const options = {};\n\n",
        serde_json::to_string_pretty(&build_options(spec)).unwrap_or_else(|_| "{}".into())
    ));
    script.push_str(JS_HELPERS);
    script.push_str("\n\nexport default function () {\n");
    for request in &spec.requests {
        script.push_str(&emit_request(request));
    }
    script.push_str("  sleep(1);\n}\n");
    script
}

/// Map the load pattern onto k6 options: plain vus/duration for a constant
/// pattern, VU stages for everything else.
fn build_options(spec: &LoadTestSpec) -> serde_json::Value {
    let vus = spec.load_pattern.virtual_users.max(1);
    let total = spec.duration.as_secs().max(1);
    let stage = |secs: u64, target: u32| json!({"duration": format!("{}s", secs.max(1)), "target": target});

    match spec.load_pattern.kind {
        PatternKind::Constant => json!({
            "vus": vus,
            "duration": format!("{}s", total),
        }),
        PatternKind::RampUp => {
            let ramp = spec
                .load_pattern
                .ramp_up
                .map(|d| d.as_secs())
                .unwrap_or(total / 4)
                .min(total);
            json!({"stages": [stage(ramp.max(1), vus), stage((total - ramp).max(1), vus)]})
        }
        PatternKind::Spike => json!({"stages": [
            stage(total / 10, vus),
            stage(total * 6 / 10, vus),
            stage(total * 3 / 10, 0),
        ]}),
        PatternKind::Step => {
            let quarter = (total / 4).max(1);
            let steps: Vec<_> = (1..=4).map(|i| stage(quarter, vus * i / 4)).collect();
            json!({ "stages": steps })
        }
        PatternKind::RandomBurst => {
            let quarter = (total / 4).max(1);
            let low = (vus / 4).max(1);
            json!({"stages": [
                stage(quarter, vus),
                stage(quarter, low),
                stage(quarter, vus),
                stage(quarter, low),
            ]})
        }
    }
}

fn emit_request(request: &RequestSpec) -> String {
    let url = js_string(&request.url);
    let params = match &request.headers {
        Some(headers) => format!(
            ", {{ headers: {} }}",
            serde_json::to_string(headers).unwrap_or_else(|_| "{}".into())
        ),
        None => String::new(),
    };

    match request.method {
        HttpMethod::Get | HttpMethod::Head | HttpMethod::Options => {
            let method = request.method.as_str().to_lowercase();
            format!("  http.{}({}{});\n", method, url, params)
        }
        _ => {
            let method = request.method.as_str().to_lowercase();
            let body = body_expression(request);
            format!("  http.{}({}, {}{});\n", method, url, body, params)
        }
    }
}

/// The JS expression producing the request body: a quoted literal, a
/// template literal with per-iteration generator expressions, or null.
fn body_expression(request: &RequestSpec) -> String {
    if let Some(body) = &request.body {
        return js_string(body);
    }
    if let Some(payload) = &request.payload {
        return payload_expression(payload);
    }
    "null".to_string()
}

fn payload_expression(payload: &PayloadSpec) -> String {
    let escaped = payload
        .template
        .replace('\\', "\\\\")
        .replace('`', "\\`")
        .replace("${", "\\${");
    let substituted = PLACEHOLDER.replace_all(&escaped, |caps: &regex::Captures<'_>| {
        match payload.variables.get(&caps[1]) {
            Some(variable) => format!("${{{}}}", generator_expression(variable.kind, variable)),
            None => caps[0].to_string(),
        }
    });
    format!("`{}`", substituted)
}

fn generator_expression(
    kind: GeneratorKind,
    variable: &loadstorm_core::PayloadVariable,
) -> String {
    let length = |key: &str, default: u64| {
        variable
            .params
            .get(key)
            .and_then(|v| v.as_u64())
            .unwrap_or(default)
    };
    match kind {
        GeneratorKind::Incremental => {
            let base = variable
                .params
                .get("base")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let digits_start = base
                .rfind(|c: char| !c.is_ascii_digit())
                .map(|i| i + 1)
                .unwrap_or(0);
            let (prefix, suffix) = base.split_at(digits_start);
            match suffix.parse::<u64>() {
                Ok(n) => format!("`{}${{{} + __ITER}}`", prefix, n),
                Err(_) => format!("`{}${{__ITER}}`", base),
            }
        }
        GeneratorKind::RandomId => format!("randId({})", length("length", 8)),
        GeneratorKind::Uuid => "uuid()".to_string(),
        GeneratorKind::Timestamp => "Date.now()".to_string(),
        GeneratorKind::RandomString => format!("randString({})", length("length", 12)),
    }
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".into())
}
