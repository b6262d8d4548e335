//! `NCUBE_PARAMS` environment configuration (§6, §10.4): a JSON object read
//! once and frozen, in the spirit of `prost_build::Config`'s builder-then-
//! freeze shape, but triggered by environment rather than a fluent builder.

use std::collections::HashMap;
use std::env;

use once_cell::sync::OnceCell;
use serde_json::Value as JsonValue;

/// Parsed `NCUBE_PARAMS` contents. Construction never panics: a missing or
/// malformed blob degrades to defaults and is logged at `warn` once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NcubeParams {
    pub user: Option<String>,
    pub extra: HashMap<String, String>,
}

impl NcubeParams {
    fn from_json_str(raw: &str) -> Self {
        let parsed: JsonValue = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("NCUBE_PARAMS is not valid JSON ({e}); using defaults");
                return Self::default();
            }
        };
        let Some(obj) = parsed.as_object() else {
            log::warn!("NCUBE_PARAMS must be a JSON object; using defaults");
            return Self::default();
        };

        let mut extra = HashMap::new();
        let mut user = None;
        for (k, v) in obj {
            let Some(s) = v.as_str() else {
                log::warn!("NCUBE_PARAMS key '{k}' is not a string, ignoring");
                continue;
            };
            if k == "user" {
                user = Some(s.to_string());
            } else {
                extra.insert(k.clone(), s.to_string());
            }
        }
        Self { user, extra }
    }

    fn from_env() -> Self {
        match env::var("NCUBE_PARAMS") {
            Ok(raw) => Self::from_json_str(&raw),
            Err(_) => Self::default(),
        }
    }
}

static PARAMS: OnceCell<NcubeParams> = OnceCell::new();

/// The process-wide `NcubeParams`, parsed from `NCUBE_PARAMS` on first call
/// and cached for the lifetime of the process.
pub fn ncube_params() -> &'static NcubeParams {
    PARAMS.get_or_init(NcubeParams::from_env)
}
