//! Prometheus metrics for the dorch workers.

use metrics::{counter, gauge, histogram};

/// Record one finished meta job ("success", "failure", "aborted").
pub fn meta_job_result(result: &'static str) {
    counter!("dorch_meta_jobs_total", "result" => result).increment(1);
}

pub fn meta_job_duration(seconds: f64) {
    histogram!("dorch_meta_job_duration_seconds").record(seconds);
}

pub fn meta_in_progress_inc() {
    gauge!("dorch_meta_in_progress").increment(1);
}

pub fn meta_in_progress_dec() {
    gauge!("dorch_meta_in_progress").decrement(1);
}

/// Record an exception while processing a meta job, tagged by kind.
pub fn meta_exception(kind: &str) {
    counter!("dorch_meta_exceptions_total", "exception" => kind.to_string()).increment(1);
}

/// Record one finished screenshot job ("success", "failure", "aborted").
pub fn screenshot_job_result(result: &'static str) {
    counter!("dorch_screenshot_jobs_total", "result" => result).increment(1);
}

pub fn screenshot_job_duration(seconds: f64) {
    histogram!("dorch_screenshot_job_duration_seconds").record(seconds);
}

pub fn screenshot_in_progress_inc() {
    gauge!("dorch_screenshot_in_progress").increment(1);
}

pub fn screenshot_in_progress_dec() {
    gauge!("dorch_screenshot_in_progress").decrement(1);
}

pub fn screenshot_exception(kind: &str) {
    counter!("dorch_screenshot_exceptions_total", "exception" => kind.to_string()).increment(1);
}

/// Record a screenshot job that had no renderable maps.
pub fn screenshot_no_maps() {
    counter!("dorch_screenshot_no_maps_total").increment(1);
}
