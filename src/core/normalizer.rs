/// Event normalizer
///
/// Single entry point for both producers: audit trail lines and shell hook
/// submissions. Both paths share one environment filter.

use crate::config::CaptureConfig;
use crate::core::audit::AuditParser;
use crate::core::env_filter::EnvFilter;
use crate::core::submission::Submission;
use crate::core::Event;
use crate::error::Result;
use chrono::Utc;
use std::sync::Arc;

pub struct Normalizer {
    env_filter: Arc<EnvFilter>,
    audit: AuditParser,
}

impl Normalizer {
    pub fn new(config: &CaptureConfig) -> Self {
        let env_filter = Arc::new(EnvFilter::new(config));
        let audit = AuditParser::new(config.exec_event_types.clone(), Arc::clone(&env_filter));
        Self { env_filter, audit }
    }

    /// One audit line. `None` means skip it.
    pub fn audit(&self, line: &str) -> Option<Event> {
        self.audit.parse_line(line)
    }

    /// A hook submission. Errors mean the payload itself was unusable.
    pub fn submission(&self, submission: Submission) -> Result<Event> {
        submission.into_event(&self.env_filter, Utc::now())
    }

    pub fn env_filter(&self) -> &EnvFilter {
        &self.env_filter
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(&CaptureConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecallError;
    use std::collections::BTreeMap;

    fn submission(command: &str) -> Submission {
        let mut env = BTreeMap::new();
        env.insert("PWD".to_string(), "/home/bob".to_string());
        env.insert("___PREEXEC_CMD".to_string(), "x".to_string());
        Submission {
            command: command.to_string(),
            command_encoding: None,
            return_code: 0,
            start_timestamp: "2024-03-01T10:00:00Z".to_string(),
            end_timestamp: None,
            env,
            hostname: None,
        }
    }

    #[test]
    fn test_submission_path() {
        let normalizer = Normalizer::default();
        // "ls -la"
        let event = normalizer.submission(submission("bHMgLWxh")).unwrap();

        assert_eq!(event.command, "ls -la");
        assert_eq!(event.argv, vec!["ls", "-la"]);
        assert_eq!(event.cwd.as_deref(), Some("/home/bob"));
        assert!(!event.env.contains_key("___PREEXEC_CMD"));
    }

    #[test]
    fn test_empty_submission_rejected() {
        let normalizer = Normalizer::default();
        let result = normalizer.submission(submission("   "));
        assert!(matches!(result, Err(RecallError::InvalidSubmission(_))));
    }

    #[test]
    fn test_audit_path_skips_garbage() {
        let normalizer = Normalizer::default();
        assert!(normalizer.audit("<?xml version='1.0' encoding='UTF-8'?>").is_none());
        assert!(normalizer.audit("<audit>").is_none());
        assert!(normalizer.audit("not xml at all").is_none());
    }

    #[test]
    fn test_audit_path() {
        let normalizer = Normalizer::default();
        let line = r#"<record version="11" event="execve(2)" modifier="0" time="Mon Jan  9 12:34:56 2017" msec=" + 250 msec"><path>/bin/ls</path><path>/bin/ls</path><exec_args><arg>ls</arg><arg>-l</arg></exec_args><exec_env><env>PWD=/tmp</env></exec_env><subject audit-uid="bob" uid="bob" pid="42"/><return errval="success" retval="0"/></record>"#;

        let event = normalizer.audit(line).unwrap();
        assert_eq!(event.command, "ls -l");
        assert_eq!(event.cwd.as_deref(), Some("/tmp"));
        assert_eq!(event.return_code, 0);
    }
}
