//! The task data model: `Task`, `Request`, `Callback`, `Status`.
//!
//! JSON encoding/decoding lives in [`crate::codec`], kept separate so the
//! data model itself stays free of wire-format concerns.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::schedule::Schedule;

/// Outbound HTTP method. Upper-cased on the wire; spec.md's data model
/// enumerates exactly these six (notably not `OPTIONS`, even though the
/// `allow_redirects` default clause mentions it — see
/// [`Method::default_allow_redirects`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Head,
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Head => "HEAD",
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// `true` for `POST`/`PUT`/`PATCH`, the methods a `payload` is honored on.
    pub fn allows_payload(self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }

    /// spec.md: "default: true for GET/OPTIONS, false for HEAD, otherwise
    /// unset". `OPTIONS` isn't a constructible `Method` in this data model,
    /// so that arm is unreachable here; documented rather than "fixed" (see
    /// DESIGN.md).
    pub fn default_allow_redirects(self) -> Option<bool> {
        match self {
            Method::Get => Some(true),
            Method::Head => Some(false),
            _ => None,
        }
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HEAD" => Ok(Method::Head),
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => Err(format!("unsupported method: {other}")),
        }
    }
}

/// A structured outbound HTTP call descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Option<HashMap<String, String>>,
    pub payload: Option<String>,
    pub timeout: Option<f64>,
    pub allow_redirects: Option<bool>,
}

/// Action invoked by the runner after the outbound request resolves.
///
/// `Delete` is the literal `"__delete__"`; it is not a value a caller may
/// set through validation (see `examples/original_source/asynxd/asynxd/forms.py`'s
/// `on_success`/`on_failure`/`on_complete` schema, which only permits
/// `__report__`, a URL, a nested descriptor, or null) — it exists solely as
/// `on_success`'s implicit default and dispatches as a no-op, since terminal
/// cleanup already deletes (or reschedules) the task regardless of callback
/// outcome.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Callback {
    #[default]
    None,
    Report,
    Delete,
    Post(String),
    SubTask(Box<NewTask>),
}

/// Lifecycle state of a persisted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    New,
    Enqueued,
    Delayed,
    Running,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::New => "new",
            Status::Enqueued => "enqueued",
            Status::Delayed => "delayed",
            Status::Running => "running",
        }
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Status::New),
            "enqueued" => Ok(Status::Enqueued),
            "delayed" => Ok(Status::Delayed),
            "running" => Ok(Status::Running),
            other => Err(format!("unrecognized status: {other}")),
        }
    }
}

/// A not-yet-persisted task descriptor, as accepted by `add_task` and as the
/// shape of an embedded `SubTask` callback.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub cname: Option<String>,
    pub request: Request,
    pub eta: Option<DateTime<Utc>>,
    pub countdown: Option<f64>,
    pub schedule: Option<Schedule>,
    pub on_success: Callback,
    pub on_failure: Callback,
    pub on_complete: Callback,
}

impl NewTask {
    /// spec.md §9: `on_success` defaults to `__delete__`, `on_failure` to
    /// `__report__`, `on_complete` to null.
    pub fn new(request: Request) -> Self {
        NewTask {
            cname: None,
            request,
            eta: None,
            countdown: None,
            schedule: None,
            on_success: Callback::Delete,
            on_failure: Callback::Report,
            on_complete: Callback::None,
        }
    }
}

/// A persisted task, as returned by `get_task`/`add_task`/`list_tasks`.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: i64,
    pub uuid: String,
    pub cname: Option<String>,
    pub request: Request,
    pub eta: Option<DateTime<Utc>>,
    pub schedule: Option<Schedule>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub status: Status,
    pub on_success: Callback,
    pub on_failure: Callback,
    pub on_complete: Callback,
}

impl Task {
    /// `eta − now` in seconds; `None` when `eta` is unset. Never persisted —
    /// recomputed on every read, per spec.md §3's `countdown` definition.
    pub fn countdown(&self, now: DateTime<Utc>) -> Option<f64> {
        self.eta
            .map(|eta| (eta - now).num_milliseconds() as f64 / 1000.0)
    }
}
