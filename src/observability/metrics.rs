//! Metrics collection.
//!
//! # Metrics
//! - `loadgate_requests_total` (counter): requests created
//! - `loadgate_requests_completed_total` (counter): terminal completions, by
//!   `code`
//! - `loadgate_admission_rejected_total` (counter): requests refused by the
//!   admission ledger
//! - `loadgate_requests_detached_total` (counter): cancels converted into
//!   background detached loads
//! - `loadgate_requests_transferred_total` (counter): ownership transfers
//!   claimed
//! - `loadgate_requests_in_flight` (gauge): currently admitted requests
//!
//! # Design Decisions
//! - Updates go through the `metrics` facade macros; the host decides on a
//!   recorder (or none, in which case they are no-ops)
//! - Completion codes become a label so terminal outcomes can be graphed
//!   without one counter per code

use metrics::{counter, gauge};

use crate::messages::ErrorCode;

pub fn record_request_created() {
    counter!("loadgate_requests_total").increment(1);
}

pub fn record_request_completed(code: ErrorCode) {
    counter!("loadgate_requests_completed_total", "code" => code.to_string()).increment(1);
}

pub fn record_admission_rejected() {
    counter!("loadgate_admission_rejected_total").increment(1);
}

pub fn record_request_detached() {
    counter!("loadgate_requests_detached_total").increment(1);
}

pub fn record_request_transferred() {
    counter!("loadgate_requests_transferred_total").increment(1);
}

pub fn set_requests_in_flight(count: usize) {
    gauge!("loadgate_requests_in_flight").set(count as f64);
}
