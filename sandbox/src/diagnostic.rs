//! Human-readable failure reports for compile errors and guest exceptions.

use std::fmt;

/// A guest failure with its source location, when known.
///
/// Rendered as:
///
/// ```text
/// Error: boom
///     at contract.js:3:7
///     throw new Error("boom");
///           ^
/// stack:
///     at <eval> (contract.js:3:7)
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub tag: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub source_line: Option<String>,
    pub stack: Option<String>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = tag.to_string();
        self
    }

    pub fn with_location(mut self, line: Option<u32>, column: Option<u32>) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    /// Attach a stack trace, taking the location from its first frame when
    /// none is known yet.
    pub fn with_stack(mut self, stack: Option<String>) -> Self {
        let stack = stack.filter(|s| !s.trim().is_empty());
        if self.line.is_none() {
            if let Some((line, column)) = stack.as_deref().and_then(first_frame_location) {
                self.line = Some(line);
                self.column = column;
            }
        }
        self.stack = stack;
        self
    }

    /// Copy the offending line out of `source`.
    pub fn with_source(mut self, source: &str) -> Self {
        if let Some(line) = self.line {
            self.source_line = source
                .lines()
                .nth((line as usize).saturating_sub(1))
                .map(str::to_string);
        }
        self
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(line) = self.line {
            write!(f, "\n    at {}:{}", self.tag, line)?;
            if let Some(column) = self.column {
                write!(f, ":{}", column)?;
            }
        }
        if let Some(text) = &self.source_line {
            write!(f, "\n    {}", text)?;
            if let Some(column) = self.column {
                let pad = (column as usize).saturating_sub(1).min(text.len());
                write!(f, "\n    {}^", " ".repeat(pad))?;
            }
        }
        if let Some(stack) = &self.stack {
            write!(f, "\nstack:\n{}", stack.trim_end())?;
        }
        Ok(())
    }
}

/// Parse `line[:column]` out of the first stack frame that carries one.
///
/// Accepts both `at fn (file:3:7)` and `at file:3` frame shapes.
pub fn first_frame_location(stack: &str) -> Option<(u32, Option<u32>)> {
    stack.lines().find_map(|frame| {
        let frame = frame.trim();
        let location = match (frame.rfind('('), frame.strip_suffix(')')) {
            (Some(open), Some(body)) => &body[open + 1..],
            _ => frame.strip_prefix("at ").unwrap_or(frame),
        };
        let mut numbers = location
            .rsplit(':')
            .map_while(|part| part.parse::<u32>().ok())
            .take(2)
            .collect::<Vec<_>>();
        // rsplit yields from the right, so the column (if any) comes first
        numbers.reverse();
        let prefix_len = location.split(':').count();
        if numbers.is_empty() || prefix_len <= numbers.len() {
            return None;
        }
        match numbers.as_slice() {
            [line, column] => Some((*line, Some(*column))),
            [line] => Some((*line, None)),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_with_column() {
        let stack = "    at <eval> (contract.js:3:7)\n";
        assert_eq!(first_frame_location(stack), Some((3, Some(7))));
    }

    #[test]
    fn test_location_without_column() {
        let stack = "    at f (eval_script:12)\n    at <eval> (eval_script:20)\n";
        assert_eq!(first_frame_location(stack), Some((12, None)));
    }

    #[test]
    fn test_native_frames_are_skipped() {
        let stack = "    at put (native)\n    at <eval> (contract.js:4:1)\n";
        assert_eq!(first_frame_location(stack), Some((4, Some(1))));
    }

    #[test]
    fn test_no_location() {
        assert_eq!(first_frame_location("    at <anonymous>"), None);
        assert_eq!(first_frame_location(""), None);
    }

    #[test]
    fn test_render_with_caret() {
        let source = "let a = 1;\nlet b = 2;\nthrow new Error(\"boom\");\n";
        let diag = Diagnostic::new("Error: boom")
            .with_tag("contract.js")
            .with_stack(Some("    at <eval> (contract.js:3:7)".into()))
            .with_source(source);

        assert_eq!(diag.line, Some(3));
        let text = diag.render();
        assert!(text.starts_with("Error: boom\n    at contract.js:3:7"));
        assert!(text.contains("throw new Error(\"boom\");\n          ^"));
        assert!(text.contains("stack:"));
    }

    #[test]
    fn test_render_message_only() {
        assert_eq!(Diagnostic::new("boom").render(), "boom");
    }
}
