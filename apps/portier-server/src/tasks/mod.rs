//! Task families and their closed task sets.
//!
//! Each family is one main/retry/dead-letter queue triple. The enums below are the
//! complete set of tasks a family's consumer accepts; anything else fails to decode and
//! is dropped.

mod email;
mod reports;

pub use email::EmailTaskHandler;
pub use reports::ReportTaskHandler;

use portier_queue::QueueFamily;
use portier_storage::{ConfirmationToken, TokenType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Notification emails.
pub const EMAIL_TASKS: QueueFamily =
    QueueFamily::new("email_tasks", 3, Duration::from_millis(5000));

/// Reports.
pub const REPORT_TASKS: QueueFamily =
    QueueFamily::new("report_tasks", 5, Duration::from_millis(10000));

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", content = "data", rename_all = "snake_case")]
pub enum EmailTask {
    SendRegisterEmail { register_token: String },
    SendEmailChangeEmail { email_change_token: String },
    SendPasswordResetEmail { password_reset_token: String },
}

impl EmailTask {
    /// The notification that announces a token of this type.
    pub fn for_token(token: &ConfirmationToken) -> Self {
        let value = token.token.clone();
        match token.token_type {
            TokenType::Register => EmailTask::SendRegisterEmail {
                register_token: value,
            },
            TokenType::EmailChange => EmailTask::SendEmailChangeEmail {
                email_change_token: value,
            },
            TokenType::PasswordChange => EmailTask::SendPasswordResetEmail {
                password_reset_token: value,
            },
        }
    }

    pub fn token(&self) -> &str {
        match self {
            EmailTask::SendRegisterEmail { register_token } => register_token,
            EmailTask::SendEmailChangeEmail { email_change_token } => email_change_token,
            EmailTask::SendPasswordResetEmail {
                password_reset_token,
            } => password_reset_token,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", content = "data", rename_all = "snake_case")]
pub enum ReportTask {
    GenerateReport { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use portier_queue::QueueEvent;

    #[test]
    fn test_email_task_wire_names() {
        let cases = [
            (
                EmailTask::SendRegisterEmail {
                    register_token: "t".into(),
                },
                "send_register_email",
                "register_token",
            ),
            (
                EmailTask::SendEmailChangeEmail {
                    email_change_token: "t".into(),
                },
                "send_email_change_email",
                "email_change_token",
            ),
            (
                EmailTask::SendPasswordResetEmail {
                    password_reset_token: "t".into(),
                },
                "send_password_reset_email",
                "password_reset_token",
            ),
        ];
        for (task, name, field) in cases {
            let event = QueueEvent::from_task(&task).unwrap();
            assert_eq!(event.task, name);
            assert_eq!(event.data[field], "t");
            assert_eq!(event.decode::<EmailTask>().unwrap(), task);
        }
    }

    #[test]
    fn test_report_task_wire_name() {
        let event = QueueEvent::from_task(&ReportTask::GenerateReport {
            name: "weekly".into(),
        })
        .unwrap();
        assert_eq!(event.task, "generate_report");
        assert_eq!(event.data, serde_json::json!({"name": "weekly"}));
    }

    #[test]
    fn test_email_task_rejects_report_tasks() {
        let event = QueueEvent::from_task(&ReportTask::GenerateReport {
            name: "weekly".into(),
        })
        .unwrap();
        assert!(event.decode::<EmailTask>().is_err());
    }

    #[test]
    fn test_family_tunings() {
        assert_eq!(EMAIL_TASKS.max_retries, 3);
        assert_eq!(EMAIL_TASKS.retry_delay, Duration::from_secs(5));
        assert_eq!(REPORT_TASKS.max_retries, 5);
        assert_eq!(REPORT_TASKS.retry_delay, Duration::from_secs(10));
    }
}
