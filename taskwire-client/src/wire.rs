//! Decodes the facade's task JSON (RFC 3339 `eta`/`last_run_at`, schedule as
//! a string) back into a [`taskwire_core::Task`]. The inverse of
//! `taskwire-server`'s `wire::task_to_json`, reimplemented here since the
//! client crate does not depend on the server crate.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value;
use taskwire_core::codec::{decode_callback, decode_request};
use taskwire_core::{Schedule, Status, Task};

use crate::error::ClientError;

pub fn decode_task(value: &Value) -> Result<Task, ClientError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ClientError::Decode("expected a task object".to_string()))?;

    let id = obj
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| ClientError::Decode("missing task.id".to_string()))?;
    let uuid = obj
        .get("uuid")
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::Decode("missing task.uuid".to_string()))?
        .to_string();
    let cname = obj.get("cname").and_then(Value::as_str).map(str::to_string);
    let request_value = obj
        .get("request")
        .ok_or_else(|| ClientError::Decode("missing task.request".to_string()))?;
    let request = decode_request(request_value).map_err(|e| ClientError::Decode(e.to_string()))?;
    let eta = decode_rfc3339(obj.get("eta"))?;
    let last_run_at = decode_rfc3339(obj.get("last_run_at"))?;
    let schedule = match obj.get("schedule") {
        Some(Value::String(s)) => {
            Some(Schedule::parse(s).map_err(|e| ClientError::Decode(e.to_string()))?)
        }
        _ => None,
    };
    let status_str = obj
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::Decode("missing task.status".to_string()))?;
    let status = Status::from_str(status_str).map_err(ClientError::Decode)?;
    let on_success = obj
        .get("on_success")
        .map(decode_callback)
        .transpose()
        .map_err(|e| ClientError::Decode(e.to_string()))?
        .unwrap_or_default();
    let on_failure = obj
        .get("on_failure")
        .map(decode_callback)
        .transpose()
        .map_err(|e| ClientError::Decode(e.to_string()))?
        .unwrap_or_default();
    let on_complete = obj
        .get("on_complete")
        .map(decode_callback)
        .transpose()
        .map_err(|e| ClientError::Decode(e.to_string()))?
        .unwrap_or_default();

    Ok(Task {
        id,
        uuid,
        cname,
        request,
        eta,
        schedule,
        last_run_at,
        status,
        on_success,
        on_failure,
        on_complete,
    })
}

fn decode_rfc3339(value: Option<&Value>) -> Result<Option<DateTime<Utc>>, ClientError> {
    match value {
        Some(Value::String(s)) => Ok(Some(
            DateTime::parse_from_rfc3339(s)
                .map_err(|e| ClientError::Decode(e.to_string()))?
                .with_timezone(&Utc),
        )),
        _ => Ok(None),
    }
}
