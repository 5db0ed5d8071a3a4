use super::data::{Measurements, Properties, SeverityLevel};
use super::serde_helpers::default_schema_version;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::backtrace::Backtrace;
use std::error::Error;
use std::panic::Location;
use std::path::Path;
use std::sync::OnceLock;

// `   3: my_crate::module::function::h0123456789abcdef`
const FRAME_PATTERN: &str = r"^\s*(\d+):\s+(.+?)\s*$";
// `             at ./src/module.rs:42:17`
const LOCATION_PATTERN: &str = r"^\s*at\s+(.+?):(\d+)(?::(\d+))?\s*$";
const SYMBOL_HASH_PATTERN: &str = r"::h[0-9a-f]{16}$";

// Leading frames produced by the capture itself.
const CAPTURE_FRAME_PREFIXES: &[&str] = &[
    "std::backtrace",
    "<std::backtrace",
    "backtrace::",
    "std::sys::backtrace",
];
const CAPTURE_FRAME_MARKER: &str = "domain::exception::";

struct TracePatterns {
    frame: Regex,
    location: Regex,
    symbol_hash: Regex,
}

static PATTERNS: OnceLock<Option<TracePatterns>> = OnceLock::new();

fn patterns() -> Option<&'static TracePatterns> {
    PATTERNS
        .get_or_init(|| {
            Some(TracePatterns {
                frame: Regex::new(FRAME_PATTERN).ok()?,
                location: Regex::new(LOCATION_PATTERN).ok()?,
                symbol_hash: Regex::new(SYMBOL_HASH_PATTERN).ok()?,
            })
        })
        .as_ref()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub level: u32,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembly: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// One error in a chain. Nesting is expressed through `id` / `outerId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    pub id: u32,
    pub outer_id: u32,
    pub type_name: String,
    pub message: String,
    #[serde(default = "default_true")]
    pub has_full_stack: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_stack: Option<Vec<StackFrame>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionData {
    pub exceptions: Vec<ExceptionDetails>,
    #[serde(default = "default_schema_version")]
    pub ver: u32,
    #[serde(default)]
    pub severity_level: SeverityLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<String>,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Measurements::is_empty")]
    pub measurements: Measurements,
}

impl ExceptionData {
    /// Builds exception telemetry for `err`, capturing the stack at the call site.
    pub fn from_error<E>(err: &E, severity_level: SeverityLevel) -> Self
    where
        E: Error + ?Sized,
    {
        let trace = Backtrace::force_capture().to_string();
        Self::from_error_with_trace(err, &trace, severity_level)
    }

    /// Like [`from_error`](Self::from_error), but `problemId` comes from the
    /// location of the outermost `#[track_caller]` call instead of the
    /// innermost captured frame. Wrappers that build exception telemetry on
    /// behalf of their caller use this.
    #[track_caller]
    pub fn from_error_at_caller<E>(err: &E, severity_level: SeverityLevel) -> Self
    where
        E: Error + ?Sized,
    {
        let caller = Location::caller();
        let mut data = Self::from_error(err, severity_level);
        let site = StackFrame {
            level: 0,
            method: String::new(),
            assembly: None,
            file_name: Some(caller.file().to_string()),
            line: Some(caller.line()),
        };
        let type_name = std::any::type_name::<E>();
        data.problem_id = Some(problem_id(type_name, Some(&site)));
        data
    }

    /// Builds exception telemetry for `err` from an already rendered backtrace.
    pub fn from_error_with_trace<E>(err: &E, trace: &str, severity_level: SeverityLevel) -> Self
    where
        E: Error + ?Sized,
    {
        let type_name = std::any::type_name::<E>().to_string();
        let frames = parse_backtrace(trace);
        let problem_id = problem_id(&type_name, frames.first());

        let mut exceptions = vec![ExceptionDetails {
            id: 1,
            outer_id: 0,
            type_name,
            message: err.to_string(),
            has_full_stack: true,
            stack: None,
            parsed_stack: (!frames.is_empty()).then_some(frames),
        }];

        let mut outer_id = 1;
        let mut source = err.source();
        while let Some(inner) = source {
            let id = outer_id + 1;
            exceptions.push(ExceptionDetails {
                id,
                outer_id,
                type_name: debug_type_name(inner),
                message: inner.to_string(),
                has_full_stack: false,
                stack: None,
                parsed_stack: None,
            });
            outer_id = id;
            source = inner.source();
        }

        Self {
            exceptions,
            ver: default_schema_version(),
            severity_level,
            problem_id: Some(problem_id),
            properties: Properties::new(),
            measurements: Measurements::new(),
        }
    }
}

/// Parses the std `Backtrace` display format into frames ordered innermost
/// first. Capture machinery at the top of the trace is dropped; a file path
/// repeated by consecutive frames is shortened to its file name.
pub fn parse_backtrace(trace: &str) -> Vec<StackFrame> {
    let Some(patterns) = patterns() else {
        return Vec::new();
    };

    let mut raw: Vec<(String, Option<String>, Option<u32>)> = Vec::new();
    for line in trace.lines() {
        if let Some(caps) = patterns.frame.captures(line) {
            let symbol = patterns.symbol_hash.replace(&caps[2], "").into_owned();
            raw.push((symbol, None, None));
        } else if let Some(caps) = patterns.location.captures(line)
            && let Some(last) = raw.last_mut()
            && last.1.is_none()
        {
            last.1 = Some(caps[1].to_string());
            last.2 = caps[2].parse().ok();
        }
    }

    let skip = raw
        .iter()
        .take_while(|(symbol, _, _)| is_capture_frame(symbol))
        .count();

    let mut frames = Vec::with_capacity(raw.len().saturating_sub(skip));
    let mut prev_path: Option<String> = None;
    for (index, (method, path, line)) in raw.into_iter().skip(skip).enumerate() {
        let file_name = match path {
            Some(path) if prev_path.as_deref() == Some(path.as_str()) => Some(basename(&path)),
            Some(path) => {
                prev_path = Some(path.clone());
                Some(path)
            }
            None => None,
        };

        let assembly = crate_of(&method);
        frames.push(StackFrame {
            level: index as u32 + 1,
            method,
            assembly,
            file_name,
            line,
        });
    }
    frames
}

/// `{typeName}/{md5("{file}:{line}")}` of the innermost frame.
pub fn problem_id(type_name: &str, innermost: Option<&StackFrame>) -> String {
    let file = innermost
        .and_then(|f| f.file_name.as_deref())
        .unwrap_or_default();
    let line = innermost
        .and_then(|f| f.line)
        .map(|l| l.to_string())
        .unwrap_or_default();
    let digest = md5::compute(format!("{file}:{line}"));
    format!("{type_name}/{digest:x}")
}

fn is_capture_frame(symbol: &str) -> bool {
    CAPTURE_FRAME_PREFIXES.iter().any(|p| symbol.starts_with(p))
        || symbol.contains(CAPTURE_FRAME_MARKER)
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string()
}

fn crate_of(symbol: &str) -> Option<String> {
    let (head, _) = symbol.split_once("::")?;
    let valid = !head.is_empty() && head.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| head.to_string())
}

fn debug_type_name(err: &(dyn Error + 'static)) -> String {
    let rendered = format!("{err:?}");
    let name: String = rendered
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == ':')
        .collect();
    if name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        name
    } else {
        "Error".to_string()
    }
}
