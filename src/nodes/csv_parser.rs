//! CSV field parser stage
//!
//! Turns each line into an ordered list of fields. No quoting or escaping:
//! the delimiter always separates fields.

use crate::runtime::node::{ProcessNode, StageContext, WorkResult};
use crate::runtime::ports::{PortDirection, PortSchema};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Where whitespace is trimmed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimPolicy {
    /// Trim every field
    #[default]
    PerField,
    /// Trim only the ends of the whole line before splitting
    Line,
    /// Keep fields exactly as split
    None,
}

/// Split `line` on `delimiter` and apply `trim`.
///
/// Always returns at least one field: `""` yields `[""]`.
pub fn split_fields(line: &str, delimiter: char, trim: TrimPolicy) -> Vec<String> {
    match trim {
        TrimPolicy::PerField => line.split(delimiter).map(|f| f.trim().to_string()).collect(),
        TrimPolicy::Line => line.trim().split(delimiter).map(str::to_string).collect(),
        TrimPolicy::None => line.split(delimiter).map(str::to_string).collect(),
    }
}

/// Transform stage: lines in, field lists out
///
/// Input: `lines`
/// Output: `fields`
pub struct CsvParser {
    name: String,
    delimiter: char,
    trim: TrimPolicy,
    lines_parsed: u64,
}

impl CsvParser {
    pub fn new() -> Self {
        Self {
            name: "csv_parser".to_string(),
            delimiter: ',',
            trim: TrimPolicy::default(),
            lines_parsed: 0,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_trim(mut self, trim: TrimPolicy) -> Self {
        self.trim = trim;
        self
    }
}

impl Default for CsvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessNode for CsvParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::new::<String>("lines", 0, PortDirection::Input)]
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::new::<Vec<String>>("fields", 0, PortDirection::Output)]
    }

    fn work(&mut self, ctx: &StageContext<'_>) -> WorkResult<usize> {
        // Blocks until a line arrives; ends the stage on end-of-stream or stop
        let line = ctx.input::<String>(0)?.recv()?;
        let fields = split_fields(&line, self.delimiter, self.trim);
        trace!("[{}] {:?}", self.name, fields);

        self.lines_parsed += 1;
        if ctx.output::<Vec<String>>(0)?.send(fields).is_err() {
            debug!("[{}] No consumer left for fields", self.name);
        }
        Ok(1)
    }

    fn on_shutdown(&mut self, _ctx: &StageContext<'_>) -> WorkResult<()> {
        debug!("[{}] Parsed {} lines", self.name, self.lines_parsed);
        Ok(())
    }
}
