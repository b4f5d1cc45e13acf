/// Audit trail parsing
///
/// Turns one XML audit line (one `<record>` per line, as printed by `praudit -xl`)
/// into an [`Event`]. Anything that is not well-formed XML, or not a process
/// execution record, is dropped. Every sub-field is extracted independently: a
/// missing `<exec_env>` does not cost us the argv, and so on.

use crate::core::env_filter::{split_env_entry, EnvFilter};
use crate::core::event::Event;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use roxmltree::{Document, Node};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// `time` attribute layout, e.g. `Mon Jan  9 12:34:56 2017`
const AUDIT_TIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Record attributes that are consumed, not carried into `audit_metadata`
const CONSUMED_ATTRS: &[&str] = &["version", "time", "msec"];

/// Return code for records without a usable `retval`
pub const UNKNOWN_RETURN_CODE: i32 = -1;

/// Why a sub-field could not be extracted
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractError {
    Missing(&'static str),
    Invalid(&'static str, String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Missing(what) => write!(f, "no <{}> element", what),
            ExtractError::Invalid(what, detail) => write!(f, "bad {}: {}", what, detail),
        }
    }
}

/// Resolved executable paths of a record
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Paths {
    pub path: Option<String>,
    pub realpath: Option<String>,
}

pub struct AuditParser {
    exec_event_types: Vec<String>,
    env_filter: Arc<EnvFilter>,
}

impl AuditParser {
    pub fn new(exec_event_types: Vec<String>, env_filter: Arc<EnvFilter>) -> Self {
        Self {
            exec_event_types,
            env_filter,
        }
    }

    /// Parse one line. `None` for malformed or non-execution records.
    pub fn parse_line(&self, line: &str) -> Option<Event> {
        let doc = match Document::parse(line.trim()) {
            Ok(doc) => doc,
            Err(e) => {
                trace!(error = %e, "skipping malformed audit line");
                return None;
            }
        };
        let record = doc.root_element();

        match record.attribute("event") {
            Some(kind) if self.exec_event_types.iter().any(|t| t == kind) => {}
            other => {
                trace!(event = ?other, "skipping non-exec audit record");
                return None;
            }
        }

        let paths = extract_paths(record);

        let argv = extract_argv(record).unwrap_or_else(|e| {
            warn!(error = %e, "argv extraction failed");
            Vec::new()
        });

        let raw_env = extract_env(record).unwrap_or_else(|e| {
            warn!(error = %e, "env extraction failed");
            Vec::new()
        });
        let env = self.env_filter.apply(raw_env);

        let subject = extract_attrs(record, "subject").unwrap_or_else(|e| {
            debug!(error = %e, "record has no subject");
            BTreeMap::new()
        });

        let return_status = extract_attrs(record, "return").unwrap_or_else(|e| {
            debug!(error = %e, "record has no return block");
            BTreeMap::new()
        });
        let return_code = return_status
            .get("retval")
            .and_then(|v| v.trim().parse::<i32>().ok())
            .unwrap_or(UNKNOWN_RETURN_CODE);

        let start_timestamp = extract_timestamp(record).unwrap_or_else(|e| {
            warn!(error = %e, "falling back to ingestion time");
            Utc::now()
        });

        let command = join_argv(&argv);

        let mut event = Event::new(command, argv, env, return_code, start_timestamp);
        event.path = paths.path;
        event.realpath = paths.realpath;
        event.subject = subject;
        event.return_status = return_status;
        event.audit_metadata = extract_metadata(record);

        Some(event)
    }
}

/// Two paths are (path, realpath); one path is both; none is a warning
pub fn extract_paths(record: Node) -> Paths {
    let found: Vec<String> = record
        .descendants()
        .filter(|n| n.has_tag_name("path"))
        .filter_map(|n| n.text())
        .map(str::to_string)
        .collect();

    match found.as_slice() {
        [] => {
            warn!("no paths found for exec record");
            Paths::default()
        }
        [only] => Paths {
            path: Some(only.clone()),
            realpath: Some(only.clone()),
        },
        [path, realpath] => Paths {
            path: Some(path.clone()),
            realpath: Some(realpath.clone()),
        },
        [path, realpath, ..] => {
            warn!(count = found.len(), "more than two paths, using the first two");
            Paths {
                path: Some(path.clone()),
                realpath: Some(realpath.clone()),
            }
        }
    }
}

pub fn extract_argv(record: Node) -> Result<Vec<String>, ExtractError> {
    let args = record
        .descendants()
        .find(|n| n.has_tag_name("exec_args"))
        .ok_or(ExtractError::Missing("exec_args"))?;

    // empty <arg/> still holds a position
    Ok(args
        .children()
        .filter(|n| n.has_tag_name("arg"))
        .map(|n| n.text().unwrap_or_default().to_string())
        .collect())
}

pub fn extract_env(record: Node) -> Result<Vec<(String, String)>, ExtractError> {
    let env = record
        .descendants()
        .find(|n| n.has_tag_name("exec_env"))
        .ok_or(ExtractError::Missing("exec_env"))?;

    Ok(env
        .children()
        .filter(|n| n.has_tag_name("env"))
        .filter_map(|n| n.text())
        .map(split_env_entry)
        .collect())
}

/// Attribute bag of the first `tag` element
pub fn extract_attrs(
    record: Node,
    tag: &'static str,
) -> Result<BTreeMap<String, String>, ExtractError> {
    let node = record
        .descendants()
        .find(|n| n.has_tag_name(tag))
        .ok_or(ExtractError::Missing(tag))?;

    Ok(node
        .attributes()
        .map(|a| (a.name().to_string(), a.value().to_string()))
        .collect())
}

pub fn extract_timestamp(record: Node) -> Result<DateTime<Utc>, ExtractError> {
    let raw = record
        .attribute("time")
        .ok_or(ExtractError::Missing("time"))?;
    let mut ts = parse_audit_time(raw)?;

    if let Some(msec) = record.attribute("msec") {
        match parse_msec(msec) {
            Some(ms) => ts += Duration::milliseconds(ms),
            None => debug!(%msec, "ignoring unparsable msec attribute"),
        }
    }

    Ok(ts)
}

/// Audit times carry no zone and are taken as UTC
pub fn parse_audit_time(raw: &str) -> Result<DateTime<Utc>, ExtractError> {
    NaiveDateTime::parse_from_str(raw.trim(), AUDIT_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| ExtractError::Invalid("time", format!("{:?}: {}", raw, e)))
}

// " + 123 msec" -> 123
fn parse_msec(raw: &str) -> Option<i64> {
    raw.trim()
        .trim_start_matches('+')
        .trim_end_matches("msec")
        .trim()
        .parse()
        .ok()
}

fn extract_metadata(record: Node) -> BTreeMap<String, String> {
    let mut metadata: BTreeMap<String, String> = record
        .attributes()
        .filter(|a| !CONSUMED_ATTRS.contains(&a.name()))
        .map(|a| (a.name().to_string(), a.value().to_string()))
        .collect();

    if let Some(attribute) = record.descendants().find(|n| n.has_tag_name("attribute")) {
        for a in attribute.attributes() {
            metadata.insert(format!("attribute.{}", a.name()), a.value().to_string());
        }
    }

    metadata
}

/// Rebuild a shell-quoted command line from argv
pub fn join_argv(argv: &[String]) -> String {
    shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_else(|_| argv.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EXEC_RECORD: &str = r#"<record version="11" event="execve(2)" modifier="0" time="Mon Jan  9 12:34:56 2017" msec=" + 250 msec" ><path>/usr/bin/git</path><path>/Library/Developer/usr/bin/git</path><attribute mode="100755" uid="root" /><exec_args><arg>git</arg><arg>status</arg><arg /></exec_args><exec_env><env>PWD=/work/repo</env><env>USER=bob</env><env>___PREEXEC_START=1</env><env>NOEQUALS</env></exec_env><subject audit-uid="bob" uid="bob" gid="staff" pid="4242" /><return errval="success" retval="0" /></record>"#;

    fn parser() -> AuditParser {
        AuditParser::new(vec!["execve(2)".to_string()], Arc::new(EnvFilter::default()))
    }

    #[test]
    fn test_parses_exec_record() {
        let event = parser().parse_line(EXEC_RECORD).unwrap();

        assert_eq!(event.argv, vec!["git", "status", ""]);
        assert_eq!(event.path.as_deref(), Some("/usr/bin/git"));
        assert_eq!(event.realpath.as_deref(), Some("/Library/Developer/usr/bin/git"));
        assert_eq!(event.return_code, 0);
        assert_eq!(event.cwd.as_deref(), Some("/work/repo"));
        assert_eq!(event.env.get("USER").map(String::as_str), Some("bob"));
        assert_eq!(event.env.get("NOEQUALS").map(String::as_str), Some(""));
        assert!(!event.env.contains_key("___PREEXEC_START"));
        assert_eq!(event.subject.get("pid").map(String::as_str), Some("4242"));
        assert_eq!(event.return_status.get("errval").map(String::as_str), Some("success"));
        assert_eq!(event.audit_metadata.get("event").map(String::as_str), Some("execve(2)"));
        assert_eq!(
            event.audit_metadata.get("attribute.mode").map(String::as_str),
            Some("100755")
        );
        assert!(!event.audit_metadata.contains_key("time"));
        assert!(!event.audit_metadata.contains_key("version"));
    }

    #[test]
    fn test_timestamp_with_msec() {
        let event = parser().parse_line(EXEC_RECORD).unwrap();
        let expected = Utc.with_ymd_and_hms(2017, 1, 9, 12, 34, 56).unwrap()
            + Duration::milliseconds(250);
        assert_eq!(event.start_timestamp, expected);
    }

    #[test]
    fn test_non_exec_record_dropped() {
        let line = EXEC_RECORD.replace("execve(2)", "open(2) - read");
        assert!(parser().parse_line(&line).is_none());

        let line = EXEC_RECORD.replace(r#"event="execve(2)" "#, "");
        assert!(parser().parse_line(&line).is_none());
    }

    #[test]
    fn test_malformed_line_dropped() {
        assert!(parser().parse_line("<record event=\"execve(2)\"").is_none());
        assert!(parser().parse_line("not xml at all").is_none());
        assert!(parser().parse_line("").is_none());
    }

    #[test]
    fn test_single_path_used_for_both() {
        let line = r#"<record event="execve(2)" time="Mon Jan  9 12:34:56 2017"><path>/bin/ls</path><exec_args><arg>ls</arg></exec_args></record>"#;
        let event = parser().parse_line(line).unwrap();
        assert_eq!(event.path.as_deref(), Some("/bin/ls"));
        assert_eq!(event.path, event.realpath);
    }

    #[test]
    fn test_missing_blocks_are_not_fatal() {
        let line = r#"<record event="execve(2)" time="garbage"><exec_args><arg>true</arg></exec_args></record>"#;
        let before = Utc::now();
        let event = parser().parse_line(line).unwrap();

        assert_eq!(event.argv, vec!["true"]);
        assert!(event.path.is_none());
        assert!(event.realpath.is_none());
        assert!(event.env.is_empty());
        assert!(event.subject.is_empty());
        assert_eq!(event.return_code, UNKNOWN_RETURN_CODE);
        assert!(event.start_timestamp >= before);
    }

    #[test]
    fn test_env_survives_missing_argv() {
        let line = r#"<record event="execve(2)" time="Mon Jan  9 12:34:56 2017"><exec_env><env>PWD=/x</env></exec_env></record>"#;
        let event = parser().parse_line(line).unwrap();
        assert!(event.argv.is_empty());
        assert_eq!(event.cwd.as_deref(), Some("/x"));
    }

    #[test]
    fn test_parse_audit_time_two_digit_day() {
        let ts = parse_audit_time("Tue Jan 17 08:00:01 2017").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2017, 1, 17, 8, 0, 1).unwrap());
    }

    #[test]
    fn test_join_argv_quotes() {
        let argv = vec!["echo".to_string(), "hello world".to_string()];
        assert_eq!(join_argv(&argv), "echo 'hello world'");
    }
}
