//! Result line parsing
//!
//! The inference routine answers with exactly one `<label>|<confidence>`
//! line on stdout. Runtimes still leak unrelated log lines onto that
//! stream, so a line only qualifies when it contains the separator *and*
//! starts with a recognised label prefix or the error marker.

use crate::error::{PredictError, Result};

pub const FIELD_SEPARATOR: char = '|';
pub const ERROR_MARKER: &str = "Error";

/// Expected-format filter for stdout lines
#[derive(Debug, Clone)]
pub struct OutputFilter {
    label_prefixes: Vec<String>,
}

impl Default for OutputFilter {
    fn default() -> Self {
        Self::new(vec!["Tomato___".to_string()])
    }
}

impl OutputFilter {
    pub fn new(label_prefixes: Vec<String>) -> Self {
        Self { label_prefixes }
    }

    pub fn label_prefixes(&self) -> &[String] {
        &self.label_prefixes
    }

    pub fn qualifies(&self, line: &str) -> bool {
        line.contains(FIELD_SEPARATOR)
            && (line.starts_with(ERROR_MARKER)
                || self
                    .label_prefixes
                    .iter()
                    .any(|prefix| line.starts_with(prefix.as_str())))
    }
}

/// What the invoker captured from stdout
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedOutput {
    /// First qualifying line, if any
    pub line: Option<String>,
    /// Number of lines read before stopping
    pub lines_seen: usize,
}

/// A parsed `<label>|<confidence>` pair
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPrediction {
    pub label: String,
    pub confidence: f64,
}

impl ParsedPrediction {
    pub fn is_error_marker(&self) -> bool {
        self.label == ERROR_MARKER
    }
}

/// Turn captured stdout into a typed prediction
pub fn parse_output(output: &CapturedOutput) -> Result<ParsedPrediction> {
    match &output.line {
        Some(line) => parse_line(line),
        None if output.lines_seen == 0 => Err(PredictError::EmptyOutput),
        None => Err(PredictError::MalformedOutput(format!(
            "no qualifying line in {} line(s) of output",
            output.lines_seen
        ))),
    }
}

/// Parse a single qualifying line
pub fn parse_line(raw: &str) -> Result<ParsedPrediction> {
    let line = raw.trim();
    if line.is_empty() {
        return Err(PredictError::EmptyOutput);
    }

    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
    if fields.len() != 2 {
        return Err(PredictError::UnexpectedFieldCount {
            line: line.to_string(),
            fields: fields.len(),
        });
    }

    let confidence = fields[1].trim().parse::<f64>().map_err(|e| {
        PredictError::MalformedOutput(format!("confidence {:?} is not a number: {}", fields[1], e))
    })?;

    Ok(ParsedPrediction {
        label: fields[0].to_string(),
        confidence,
    })
}
