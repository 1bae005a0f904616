//! Request validation: the `{ident}` grammar, the `add_task` JSON schema
//! (beyond what `taskwire_core::codec` already structurally enforces), and
//! `list_tasks`'s `offset`/`limit` query params.
//!
//! Grounded in `asynxd/asynxd/forms.py`'s voluptuous schemas: `identifier_form`,
//! `add_task_form`, `list_tasks_form`.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use taskwire_core::codec::decode_new_task;
use taskwire_core::NewTask;

use crate::error::AppError;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^https?://").unwrap());

pub const CNAME_MIN: usize = 3;
pub const CNAME_MAX: usize = 96;
pub const LIST_LIMIT_MAX: i64 = taskwire_core::MAX_LIST_LIMIT;
const LIST_LIMIT_DEFAULT: i64 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Id(i64),
    Uuid(String),
    Cname(String),
}

/// Parses `{ident}`: bare decimal or `id:{N}` -> id (values outside
/// `i64`'s range are treated as not-found, per spec.md §8's boundary case,
/// rather than a parse failure), `uuid:{uuid}` -> uuid, `cname:{name}`
/// (length 3-96) -> cname. Any other shape, or a cname outside the length
/// bounds, is reported as not-found (not validation) — mirroring
/// `IdentifierNotFound`, which the original raises uniformly for every
/// `identifier_form` rejection regardless of cause.
pub fn parse_identifier(raw: &str) -> Result<Identifier, AppError> {
    let not_found = || AppError::not_found(format!("unrecognized identifier: {raw}"));

    if let Some(rest) = raw.strip_prefix("uuid:") {
        if rest.is_empty() {
            return Err(not_found());
        }
        return Ok(Identifier::Uuid(rest.to_string()));
    }
    if let Some(rest) = raw.strip_prefix("cname:") {
        if (CNAME_MIN..=CNAME_MAX).contains(&rest.len()) {
            return Ok(Identifier::Cname(rest.to_string()));
        }
        return Err(not_found());
    }
    let digits = raw.strip_prefix("id:").unwrap_or(raw);
    digits
        .parse::<i64>()
        .map(Identifier::Id)
        .map_err(|_| not_found())
}

/// Validates and decodes a POST body into a [`NewTask`]. `value` must
/// already be well-formed JSON (a syntax failure is the facade's 400/parse
/// case, handled before this is called); everything this function rejects
/// is a 422/validation failure.
pub fn validate_new_task(value: &Value) -> Result<NewTask, AppError> {
    let task = decode_new_task(value).map_err(|e| AppError::validation(e.to_string()))?;

    if !URL_RE.is_match(&task.request.url) {
        return Err(AppError::validation(format!(
            "request.url must match ^https?://: {:?}",
            task.request.url
        )));
    }
    if let Some(cname) = &task.cname {
        if !(CNAME_MIN..=CNAME_MAX).contains(&cname.len()) {
            return Err(AppError::validation(format!(
                "cname length must be between {CNAME_MIN} and {CNAME_MAX} characters"
            )));
        }
    }
    if let Some(countdown) = task.countdown {
        if countdown < 0.0 {
            return Err(AppError::validation("countdown must be non-negative"));
        }
    }
    if task.eta.is_some() && task.countdown.is_some() {
        return Err(AppError::validation("eta and countdown are mutually exclusive"));
    }
    validate_callback_urls(&task)?;
    Ok(task)
}

fn validate_callback_urls(task: &NewTask) -> Result<(), AppError> {
    use taskwire_core::Callback;
    for cb in [&task.on_success, &task.on_failure, &task.on_complete] {
        match cb {
            Callback::Post(url) if !URL_RE.is_match(url) => {
                return Err(AppError::validation(format!(
                    "callback url must match ^https?://: {url:?}"
                )));
            }
            Callback::SubTask(sub) => validate_callback_urls(sub)?,
            _ => {}
        }
    }
    Ok(())
}

/// `offset`/`limit` from `?offset=&limit=`, defaulting to `0`/`50`.
/// Non-integer values or a `limit` outside `[0, 200]` are validation
/// failures (voluptuous's `Coerce(int)` + `Range` behavior), not the raw
/// 400 Axum's built-in `Query` rejection would produce.
pub fn parse_list_params(params: &HashMap<String, String>) -> Result<(i64, i64), AppError> {
    let offset = match params.get("offset") {
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| AppError::validation(format!("offset must be an integer: {raw:?}")))?,
        None => 0,
    };
    let limit = match params.get("limit") {
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| AppError::validation(format!("limit must be an integer: {raw:?}")))?,
        None => LIST_LIMIT_DEFAULT,
    };
    if !(0..=LIST_LIMIT_MAX).contains(&limit) {
        return Err(AppError::validation(format!(
            "limit must be between 0 and {LIST_LIMIT_MAX}"
        )));
    }
    Ok((offset, limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_decimal_is_id() {
        assert_eq!(parse_identifier("42").unwrap(), Identifier::Id(42));
    }

    #[test]
    fn id_prefixed_is_id() {
        assert_eq!(parse_identifier("id:42").unwrap(), Identifier::Id(42));
    }

    #[test]
    fn uuid_prefixed_is_uuid() {
        assert_eq!(
            parse_identifier("uuid:abc-123").unwrap(),
            Identifier::Uuid("abc-123".to_string())
        );
    }

    #[test]
    fn cname_length_bounds() {
        assert!(parse_identifier("cname:aa").is_err());
        assert!(parse_identifier("cname:aaa").is_ok());
        assert!(parse_identifier(&format!("cname:{}", "a".repeat(96))).is_ok());
        assert!(parse_identifier(&format!("cname:{}", "a".repeat(97))).is_err());
    }

    #[test]
    fn id_beyond_i64_is_not_found_not_parse_error() {
        let err = parse_identifier("99999999999999999999999999").unwrap_err();
        assert_eq!(format!("{err}"), format!("{err}")); // constructible, no panic
    }

    #[test]
    fn list_params_defaults() {
        let (offset, limit) = parse_list_params(&HashMap::new()).unwrap();
        assert_eq!((offset, limit), (0, 50));
    }

    #[test]
    fn list_params_rejects_non_integer_limit() {
        let mut params = HashMap::new();
        params.insert("limit".to_string(), "a".to_string());
        assert!(parse_list_params(&params).is_err());
    }

    #[test]
    fn list_params_rejects_limit_over_200() {
        let mut params = HashMap::new();
        params.insert("limit".to_string(), "201".to_string());
        assert!(parse_list_params(&params).is_err());
    }

    #[test]
    fn list_params_accepts_limit_200() {
        let mut params = HashMap::new();
        params.insert("limit".to_string(), "200".to_string());
        assert!(parse_list_params(&params).is_ok());
    }
}
