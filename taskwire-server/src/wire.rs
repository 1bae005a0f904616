//! Task wire encoding: the facade's JSON shape, distinct from
//! `taskwire_core::codec`'s store-field encoding. `eta`/`last_run_at` are
//! RFC 3339 strings here (spec.md §6), not the store's epoch floats;
//! `countdown` is computed fresh on every response, never persisted.

use chrono::Utc;
use serde_json::{json, Value};
use taskwire_core::codec::{encode_callback, encode_request};
use taskwire_core::Task;

pub fn task_to_json(task: &Task) -> Value {
    let now = Utc::now();
    json!({
        "id": task.id,
        "uuid": task.uuid,
        "cname": task.cname,
        "request": encode_request(&task.request),
        "eta": task.eta.map(|dt| dt.to_rfc3339()),
        "countdown": task.countdown(now),
        "schedule": task.schedule.as_ref().map(|s| s.to_string()),
        "last_run_at": task.last_run_at.map(|dt| dt.to_rfc3339()),
        "status": task.status.as_str(),
        "on_success": encode_callback(&task.on_success),
        "on_failure": encode_callback(&task.on_failure),
        "on_complete": encode_callback(&task.on_complete),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskwire_core::{Method, Request, Status};

    fn sample_task() -> Task {
        Task {
            id: 7,
            uuid: "u-7".to_string(),
            cname: Some("job-seven".to_string()),
            request: Request {
                method: Method::Get,
                url: "http://httpbin.org/get".to_string(),
                headers: None,
                payload: None,
                timeout: None,
                allow_redirects: None,
            },
            eta: None,
            schedule: None,
            last_run_at: None,
            status: Status::Enqueued,
            on_success: taskwire_core::Callback::Delete,
            on_failure: taskwire_core::Callback::Report,
            on_complete: taskwire_core::Callback::None,
        }
    }

    #[test]
    fn immediate_task_has_null_countdown() {
        let json = task_to_json(&sample_task());
        assert!(json["countdown"].is_null());
        assert!(json["eta"].is_null());
        assert_eq!(json["status"], "enqueued");
    }

    #[test]
    fn delayed_task_has_rfc3339_eta_and_positive_countdown() {
        let mut task = sample_task();
        task.eta = Some(Utc::now() + chrono::TimeDelta::seconds(200));
        task.status = Status::Delayed;
        let json = task_to_json(&task);
        assert!(json["eta"].as_str().unwrap().contains('T'));
        let countdown = json["countdown"].as_f64().unwrap();
        assert!((190.0..=200.0).contains(&countdown), "countdown={countdown}");
    }
}
