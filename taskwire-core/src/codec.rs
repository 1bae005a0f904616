//! JSON encode/decode of task fields, and timestamp <-> absolute-time /
//! schedule-string <-> `Schedule` conversions.
//!
//! Each metadata hash field is independently JSON-encoded (mirroring
//! `examples/original_source/asynx-core/asynx_core/taskqueue.py::Task._to_redis`,
//! which runs every field value through its own `_dumps` rather than
//! serializing the whole task as one blob) so that scalar types still
//! round-trip through the store's plain-string hash fields.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::error::CodecError;
use crate::schedule::Schedule;
use crate::task::{Callback, Method, NewTask, Request, Status, Task};

/// Encodes a persisted [`Task`] into the field -> JSON-string map written to
/// `AX:META:{app}:{queue}:{id}` by `hset_many`.
pub fn encode_task_fields(task: &Task) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    fields.insert("uuid".to_string(), Value::String(task.uuid.clone()).to_string());
    fields.insert("cname".to_string(), encode_opt_string(&task.cname));
    fields.insert("request".to_string(), encode_request(&task.request).to_string());
    fields.insert("eta".to_string(), encode_eta(task.eta));
    fields.insert(
        "schedule".to_string(),
        match &task.schedule {
            Some(s) => Value::String(s.to_string()).to_string(),
            None => Value::Null.to_string(),
        },
    );
    fields.insert("last_run_at".to_string(), encode_eta(task.last_run_at));
    fields.insert("status".to_string(), Value::String(task.status.as_str().to_string()).to_string());
    fields.insert("on_success".to_string(), encode_callback(&task.on_success).to_string());
    fields.insert("on_failure".to_string(), encode_callback(&task.on_failure).to_string());
    fields.insert("on_complete".to_string(), encode_callback(&task.on_complete).to_string());
    fields
}

/// Decodes the `hget_all` result for a metadata hash back into a [`Task`].
/// `id` is supplied by the caller since it is the key suffix, not a stored
/// field (mirroring `Task._from_redis`, which splices `task_id` in
/// separately from the hash payload).
pub fn decode_task_fields(id: i64, fields: &HashMap<String, String>) -> Result<Task, CodecError> {
    let uuid = field_str(fields, "uuid")?;
    let cname = decode_opt_string(field_str(fields, "cname")?.as_str())?;
    let request = decode_request(&parse_json(field_str(fields, "request")?.as_str(), "request")?)?;
    let eta = decode_eta(field_str(fields, "eta")?.as_str())?;
    let schedule = match parse_json(field_str(fields, "schedule")?.as_str(), "schedule")? {
        Value::Null => None,
        Value::String(s) => Some(Schedule::parse(&s).map_err(|e| CodecError::InvalidField {
            field: "schedule",
            detail: e.to_string(),
        })?),
        _ => {
            return Err(CodecError::InvalidField {
                field: "schedule",
                detail: "expected a string or null".to_string(),
            });
        }
    };
    let last_run_at = decode_eta(field_str(fields, "last_run_at")?.as_str())?;
    let status_str = match parse_json(field_str(fields, "status")?.as_str(), "status")? {
        Value::String(s) => s,
        _ => {
            return Err(CodecError::InvalidField {
                field: "status",
                detail: "expected a string".to_string(),
            });
        }
    };
    let status = Status::from_str(&status_str).map_err(|detail| CodecError::InvalidField {
        field: "status",
        detail,
    })?;
    let on_success = decode_callback(&parse_json(field_str(fields, "on_success")?.as_str(), "on_success")?)?;
    let on_failure = decode_callback(&parse_json(field_str(fields, "on_failure")?.as_str(), "on_failure")?)?;
    let on_complete = decode_callback(&parse_json(field_str(fields, "on_complete")?.as_str(), "on_complete")?)?;

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

fn field_str(fields: &HashMap<String, String>, name: &'static str) -> Result<String, CodecError> {
    fields
        .get(name)
        .cloned()
        .ok_or(CodecError::MissingField(name))
}

fn parse_json(raw: &str, field: &'static str) -> Result<Value, CodecError> {
    serde_json::from_str(raw).map_err(|e| CodecError::InvalidField {
        field,
        detail: e.to_string(),
    })
}

/// `eta`/`last_run_at` are persisted as a float seconds-since-epoch, or JSON
/// null, never an ISO-8601 string (that form is reserved for the facade's
/// wire representation, see spec.md §6).
pub fn encode_eta(t: Option<DateTime<Utc>>) -> String {
    match t {
        Some(dt) => {
            let seconds = dt.timestamp() as f64 + dt.timestamp_subsec_nanos() as f64 / 1e9;
            Value::from(seconds).to_string()
        }
        None => Value::Null.to_string(),
    }
}

pub fn decode_eta(raw: &str) -> Result<Option<DateTime<Utc>>, CodecError> {
    match parse_json(raw, "eta")? {
        Value::Null => Ok(None),
        Value::Number(n) => {
            let seconds = n.as_f64().ok_or_else(|| CodecError::InvalidField {
                field: "eta",
                detail: "not a finite number".to_string(),
            })?;
            let whole = seconds.trunc() as i64;
            let nanos = ((seconds.fract()) * 1e9).round() as u32;
            Utc.timestamp_opt(whole, nanos)
                .single()
                .map(Some)
                .ok_or_else(|| CodecError::InvalidField {
                    field: "eta",
                    detail: "timestamp out of range".to_string(),
                })
        }
        _ => Err(CodecError::InvalidField {
            field: "eta",
            detail: "expected a number or null".to_string(),
        }),
    }
}

fn encode_opt_string(s: &Option<String>) -> String {
    match s {
        Some(v) => Value::String(v.clone()).to_string(),
        None => Value::Null.to_string(),
    }
}

fn decode_opt_string(raw: &str) -> Result<Option<String>, CodecError> {
    match parse_json(raw, "cname")? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        _ => Err(CodecError::InvalidField {
            field: "cname",
            detail: "expected a string or null".to_string(),
        }),
    }
}

pub fn encode_request(req: &Request) -> Value {
    let mut map = Map::new();
    map.insert("method".to_string(), Value::String(req.method.as_str().to_string()));
    map.insert("url".to_string(), Value::String(req.url.clone()));
    map.insert(
        "headers".to_string(),
        match &req.headers {
            Some(h) => Value::Object(
                h.iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
            None => Value::Null,
        },
    );
    map.insert(
        "payload".to_string(),
        req.payload.clone().map(Value::String).unwrap_or(Value::Null),
    );
    map.insert(
        "timeout".to_string(),
        req.timeout.map(Value::from).unwrap_or(Value::Null),
    );
    map.insert(
        "allow_redirects".to_string(),
        req.allow_redirects.map(Value::Bool).unwrap_or(Value::Null),
    );
    Value::Object(map)
}

pub fn decode_request(value: &Value) -> Result<Request, CodecError> {
    let obj = value.as_object().ok_or_else(|| CodecError::InvalidField {
        field: "request",
        detail: "expected an object".to_string(),
    })?;
    let method_str = obj
        .get("method")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingField("request.method"))?;
    let method = Method::from_str(method_str).map_err(|detail| CodecError::InvalidField {
        field: "request.method",
        detail,
    })?;
    let url = obj
        .get("url")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingField("request.url"))?
        .to_string();
    let headers = match obj.get("headers") {
        Some(Value::Object(m)) => Some(
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
        ),
        _ => None,
    };
    let payload = obj.get("payload").and_then(Value::as_str).map(str::to_string);
    let timeout = obj.get("timeout").and_then(Value::as_f64);
    let allow_redirects = obj.get("allow_redirects").and_then(Value::as_bool);

    Ok(Request {
        method,
        url,
        headers,
        payload,
        timeout,
        allow_redirects,
    })
}

/// Callback wire shapes: JSON `null`, the literal strings `"__report__"` /
/// `"__delete__"`, an `http(s)://…` URL string, or a nested sub-task
/// descriptor object (the same shape `decode_new_task` accepts).
pub fn encode_callback(cb: &Callback) -> Value {
    match cb {
        Callback::None => Value::Null,
        Callback::Report => Value::String("__report__".to_string()),
        Callback::Delete => Value::String("__delete__".to_string()),
        Callback::Post(url) => Value::String(url.clone()),
        Callback::SubTask(task) => encode_new_task(task),
    }
}

pub fn decode_callback(value: &Value) -> Result<Callback, CodecError> {
    match value {
        Value::Null => Ok(Callback::None),
        Value::String(s) if s == "__report__" => Ok(Callback::Report),
        Value::String(s) if s == "__delete__" => Ok(Callback::Delete),
        Value::String(s) => Ok(Callback::Post(s.clone())),
        Value::Object(_) => Ok(Callback::SubTask(Box::new(decode_new_task(value)?))),
        other => Err(CodecError::InvalidField {
            field: "callback",
            detail: format!("unsupported callback shape: {other}"),
        }),
    }
}

/// Encodes a not-yet-persisted descriptor, used both for the facade's task
/// JSON (input side) and for a `SubTask` callback's nested object.
pub fn encode_new_task(task: &NewTask) -> Value {
    let mut map = Map::new();
    if let Some(cname) = &task.cname {
        map.insert("cname".to_string(), Value::String(cname.clone()));
    }
    map.insert("request".to_string(), encode_request(&task.request));
    if let Some(eta) = task.eta {
        map.insert("eta".to_string(), Value::String(eta.to_rfc3339()));
    }
    if let Some(countdown) = task.countdown {
        map.insert("countdown".to_string(), Value::from(countdown));
    }
    if let Some(schedule) = &task.schedule {
        map.insert("schedule".to_string(), Value::String(schedule.to_string()));
    }
    map.insert("on_success".to_string(), encode_callback(&task.on_success));
    map.insert("on_failure".to_string(), encode_callback(&task.on_failure));
    map.insert("on_complete".to_string(), encode_callback(&task.on_complete));
    Value::Object(map)
}

pub fn decode_new_task(value: &Value) -> Result<NewTask, CodecError> {
    let obj = value.as_object().ok_or_else(|| CodecError::InvalidField {
        field: "task",
        detail: "expected an object".to_string(),
    })?;
    let request_value = obj.get("request").ok_or(CodecError::MissingField("request"))?;
    let request = decode_request(request_value)?;

    let cname = obj
        .get("cname")
        .and_then(Value::as_str)
        .map(str::to_string);

    let eta = match obj.get("eta") {
        Some(Value::String(s)) => Some(DateTime::parse_from_rfc3339(s)
            .map_err(|e| CodecError::InvalidField {
                field: "eta",
                detail: e.to_string(),
            })?
            .with_timezone(&Utc)),
        Some(Value::Null) | None => None,
        _ => {
            return Err(CodecError::InvalidField {
                field: "eta",
                detail: "expected an ISO-8601 string or null".to_string(),
            });
        }
    };

    let countdown = obj.get("countdown").and_then(Value::as_f64);

    let schedule = match obj.get("schedule") {
        Some(Value::String(s)) => Some(Schedule::parse(s).map_err(|e| CodecError::InvalidField {
            field: "schedule",
            detail: e.to_string(),
        })?),
        Some(Value::Null) | None => None,
        _ => {
            return Err(CodecError::InvalidField {
                field: "schedule",
                detail: "expected a string or null".to_string(),
            });
        }
    };

    let mut new_task = NewTask::new(request);
    new_task.cname = cname;
    new_task.eta = eta;
    new_task.countdown = countdown;
    new_task.schedule = schedule;
    if let Some(v) = obj.get("on_success") {
        new_task.on_success = decode_callback(v)?;
    }
    if let Some(v) = obj.get("on_failure") {
        new_task.on_failure = decode_callback(v)?;
    }
    if let Some(v) = obj.get("on_complete") {
        new_task.on_complete = decode_callback(v)?;
    }
    Ok(new_task)
}

/// The shape of an HTTP response serialized as a callback's sub-task
/// `payload`. Mirrors `Task._wrap_response`: `url`, `status_code`, `headers`,
/// `content` (text body), `history` (redirect chain, same shape), `reason`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponsePayload {
    pub url: String,
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub content: String,
    pub history: Vec<ResponsePayload>,
    pub reason: Option<String>,
}

impl ResponsePayload {
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("url".to_string(), Value::String(self.url.clone()));
        map.insert("status_code".to_string(), Value::from(self.status_code));
        map.insert(
            "headers".to_string(),
            Value::Object(
                self.headers
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );
        map.insert("content".to_string(), Value::String(self.content.clone()));
        map.insert(
            "history".to_string(),
            Value::Array(self.history.iter().map(ResponsePayload::to_json).collect()),
        );
        map.insert(
            "reason".to_string(),
            self.reason.clone().map(Value::String).unwrap_or(Value::Null),
        );
        Value::Object(map)
    }

    pub fn to_payload_string(&self) -> String {
        self.to_json().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Status;
    use chrono::TimeZone;

    fn sample_request() -> Request {
        Request {
            method: Method::Get,
            url: "http://httpbin.org/get".to_string(),
            headers: None,
            payload: None,
            timeout: None,
            allow_redirects: None,
        }
    }

    #[test]
    fn eta_round_trips() {
        let dt = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let encoded = encode_eta(Some(dt));
        let decoded = decode_eta(&encoded).unwrap();
        assert_eq!(decoded, Some(dt));
    }

    #[test]
    fn null_eta_round_trips() {
        assert_eq!(decode_eta(&encode_eta(None)).unwrap(), None);
    }

    #[test]
    fn task_fields_round_trip() {
        let task = Task {
            id: 1,
            uuid: "u-1".to_string(),
            cname: Some("job-a".to_string()),
            request: sample_request(),
            eta: None,
            schedule: None,
            last_run_at: None,
            status: Status::Enqueued,
            on_success: Callback::Delete,
            on_failure: Callback::Report,
            on_complete: Callback::Post("http://example.test/hook".to_string()),
        };
        let fields = encode_task_fields(&task);
        let decoded = decode_task_fields(1, &fields).unwrap();
        assert_eq!(decoded, task);
    }

    #[test]
    fn callback_subtask_round_trips() {
        let inner = NewTask::new(sample_request());
        let cb = Callback::SubTask(Box::new(inner.clone()));
        let encoded = encode_callback(&cb);
        let decoded = decode_callback(&encoded).unwrap();
        assert_eq!(decoded, Callback::SubTask(Box::new(inner)));
    }
}
