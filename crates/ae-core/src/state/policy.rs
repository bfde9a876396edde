//! Mapping of NoData / execution-error verdicts through the rule's policies.

use crate::eval::State;
use crate::model::{ExecErrState, NoDataState};

use super::instance::reason;

/// Where a NoData or Error verdict leads, before `for` handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Normal,
    /// Alerting, subject to the pending period.
    Firing,
    NoData,
    Error,
}

/// Outcome of a NoData verdict and the reason to record with it.
pub fn no_data_outcome(policy: NoDataState, previous: State) -> (Outcome, Option<String>) {
    match policy {
        NoDataState::Alerting => (Outcome::Firing, Some(reason::NO_DATA.to_string())),
        NoDataState::NoData => (Outcome::NoData, None),
        NoDataState::Ok => (Outcome::Normal, Some(reason::NO_DATA.to_string())),
        NoDataState::KeepLast => (
            keep_last(previous),
            Some(reason::concat(reason::NO_DATA, reason::KEEP_LAST)),
        ),
    }
}

/// Outcome of an Error verdict and the reason to record with it.
pub fn exec_err_outcome(policy: ExecErrState, previous: State) -> (Outcome, Option<String>) {
    match policy {
        ExecErrState::Alerting => (Outcome::Firing, Some(reason::ERROR.to_string())),
        ExecErrState::Error => (Outcome::Error, None),
        ExecErrState::Ok => (Outcome::Normal, Some(reason::ERROR.to_string())),
        ExecErrState::KeepLast => (
            keep_last(previous),
            Some(reason::concat(reason::ERROR, reason::KEEP_LAST)),
        ),
    }
}

/// A pending instance keeps counting toward its `for` duration.
fn keep_last(previous: State) -> Outcome {
    match previous {
        State::Normal => Outcome::Normal,
        State::Pending | State::Alerting => Outcome::Firing,
        State::NoData => Outcome::NoData,
        State::Error => Outcome::Error,
    }
}
