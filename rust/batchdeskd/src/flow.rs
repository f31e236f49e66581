//! Self check-in page flow: entry guard plus the idle/success/duplicate/error
//! status the page shows.
//!
//! The daemon keeps no flow between requests. Retrying after `error` is a new
//! `checkin.submit`, which enters a fresh flow in `idle`.

use chrono::{DateTime, FixedOffset, NaiveDate};
use rusqlite::Connection;
use thiserror::Error;
use tracing::warn;

use crate::code::is_code_valid;
use crate::guard::{check_in, CheckIn, CheckInError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInStatus {
    Idle,
    Success,
    Duplicate,
    Error,
}

impl CheckInStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Success => "success",
            Self::Duplicate => "duplicate",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Duplicate)
    }
}

/// Why a visitor never reaches the check-in form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EntryRejection {
    #[error("This QR code is not valid.")]
    Invalid,
    #[error("This QR code has expired. Please scan today's code.")]
    Expired,
}

impl EntryRejection {
    pub fn code(self) -> &'static str {
        match self {
            Self::Invalid => "invalid_code",
            Self::Expired => "expired_code",
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Please select your name before checking in.")]
    StudentRequired,
    #[error("check-in already finished with status {}", .0.as_str())]
    NotIdle(CheckInStatus),
    #[error("{}", SubmitError::FAILED_MESSAGE)]
    Failed(#[source] CheckInError),
}

impl SubmitError {
    pub const FAILED_MESSAGE: &'static str =
        "There was an error recording your attendance. Please try again.";
}

#[derive(Debug, Clone)]
pub struct CheckInFlow {
    batch_id: String,
    status: CheckInStatus,
}

impl CheckInFlow {
    pub fn enter(
        batch_id: Option<&str>,
        code: Option<&str>,
        today: NaiveDate,
    ) -> Result<Self, EntryRejection> {
        let batch_id = batch_id.map(str::trim).filter(|s| !s.is_empty());
        let code = code.map(str::trim).filter(|s| !s.is_empty());
        let (Some(batch_id), Some(code)) = (batch_id, code) else {
            return Err(EntryRejection::Invalid);
        };
        if !is_code_valid(batch_id, today, code) {
            return Err(EntryRejection::Expired);
        }
        Ok(Self {
            batch_id: batch_id.to_string(),
            status: CheckInStatus::Idle,
        })
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn status(&self) -> CheckInStatus {
        self.status
    }

    pub fn submit(
        &mut self,
        conn: &Connection,
        student_id: Option<&str>,
        now: DateTime<FixedOffset>,
    ) -> Result<CheckIn, SubmitError> {
        if self.status != CheckInStatus::Idle {
            return Err(SubmitError::NotIdle(self.status));
        }
        let Some(student_id) = student_id.map(str::trim).filter(|s| !s.is_empty()) else {
            return Err(SubmitError::StudentRequired);
        };
        match check_in(conn, student_id, &self.batch_id, now) {
            Ok(res) => {
                self.status = if res.already_existed {
                    CheckInStatus::Duplicate
                } else {
                    CheckInStatus::Success
                };
                Ok(res)
            }
            Err(e) => {
                warn!(student_id, batch_id = %self.batch_id, error = %e, "check-in failed");
                self.status = CheckInStatus::Error;
                Err(SubmitError::Failed(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::derive_code;
    use crate::db::init_schema;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).expect("date")
    }

    fn at(raw: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(raw).expect("rfc3339")
    }

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("schema");
        conn.execute_batch(
            "INSERT INTO batches(id, name, time_slot, category) VALUES('b1', 'Java Core', '9-11', 'New');
             INSERT INTO students(id, batch_id, name, contact) VALUES('s1', 'b1', 'Asha', '');",
        )
        .expect("seed");
        conn
    }

    #[test]
    fn entry_requires_batch_and_code() {
        assert_eq!(
            CheckInFlow::enter(None, Some("abc"), today()).unwrap_err(),
            EntryRejection::Invalid
        );
        assert_eq!(
            CheckInFlow::enter(Some("b1"), Some("  "), today()).unwrap_err(),
            EntryRejection::Invalid
        );
    }

    #[test]
    fn yesterdays_code_is_expired() {
        let yesterday = today().pred_opt().expect("pred");
        let stale = derive_code("b1", yesterday);
        let rejection = CheckInFlow::enter(Some("b1"), Some(&stale), today()).unwrap_err();
        assert_eq!(rejection, EntryRejection::Expired);
        assert_eq!(rejection.code(), "expired_code");
    }

    #[test]
    fn success_then_terminal() {
        let conn = seeded();
        let code = derive_code("b1", today());
        let mut flow = CheckInFlow::enter(Some("b1"), Some(&code), today()).expect("enter");
        assert_eq!(flow.status(), CheckInStatus::Idle);

        flow.submit(&conn, Some("s1"), at("2024-03-04T09:00:00+05:30"))
            .expect("submit");
        assert_eq!(flow.status(), CheckInStatus::Success);
        assert!(flow.status().is_terminal());

        let again = flow.submit(&conn, Some("s1"), at("2024-03-04T09:01:00+05:30"));
        assert!(matches!(again, Err(SubmitError::NotIdle(CheckInStatus::Success))));
    }

    #[test]
    fn repeat_visit_is_duplicate() {
        let conn = seeded();
        let code = derive_code("b1", today());
        let mut first = CheckInFlow::enter(Some("b1"), Some(&code), today()).expect("enter");
        first
            .submit(&conn, Some("s1"), at("2024-03-04T09:00:00+05:30"))
            .expect("first");

        let mut second = CheckInFlow::enter(Some("b1"), Some(&code), today()).expect("enter");
        let res = second
            .submit(&conn, Some("s1"), at("2024-03-04T18:00:00+05:30"))
            .expect("second");
        assert!(res.already_existed);
        assert_eq!(second.status(), CheckInStatus::Duplicate);
    }

    #[test]
    fn missing_student_keeps_flow_idle() {
        let conn = seeded();
        let code = derive_code("b1", today());
        let mut flow = CheckInFlow::enter(Some("b1"), Some(&code), today()).expect("enter");
        let res = flow.submit(&conn, Some(""), at("2024-03-04T09:00:00+05:30"));
        assert!(matches!(res, Err(SubmitError::StudentRequired)));
        assert_eq!(flow.status(), CheckInStatus::Idle);
    }

    #[test]
    fn storage_failure_allows_retry() {
        let conn = seeded();
        let code = derive_code("b1", today());
        let mut flow = CheckInFlow::enter(Some("b1"), Some(&code), today()).expect("enter");
        let res = flow.submit(&conn, Some("ghost"), at("2024-03-04T09:00:00+05:30"));
        assert!(matches!(res, Err(SubmitError::Failed(_))));
        assert_eq!(flow.status(), CheckInStatus::Error);

        let again = flow.submit(&conn, Some("s1"), at("2024-03-04T09:01:00+05:30"));
        assert!(matches!(again, Err(SubmitError::NotIdle(CheckInStatus::Error))));

        let mut retry = CheckInFlow::enter(Some("b1"), Some(&code), today()).expect("enter");
        assert_eq!(retry.status(), CheckInStatus::Idle);
        retry
            .submit(&conn, Some("s1"), at("2024-03-04T09:02:00+05:30"))
            .expect("retry succeeds");
        assert_eq!(retry.status(), CheckInStatus::Success);
    }
}
