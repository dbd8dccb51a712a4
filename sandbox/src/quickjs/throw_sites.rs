//! Throw-site marking for thrown non-`Error` values.
//!
//! QuickJS attaches a location only to `Error` objects, so `throw "boom"`
//! reaches the host with no line. Before a source runs, every `throw`
//! statement is rewritten from `throw <expr>` to
//! `throw __throw_site(<line>), <expr>`. The comma operator leaves the
//! thrown value unchanged and no line breaks are added, so reported lines
//! match the original text.
//!
//! The scan is lexical: strings, template literals, comments and regular
//! expression literals are skipped, and `throw` used as a property or
//! method name is left alone.

/// Global function that receives throw-site reports.
pub(crate) const MARKER: &str = "__throw_site";

/// Keywords after which a `/` starts a regular expression.
const EXPRESSION_KEYWORDS: &[&str] = &[
    "await",
    "case",
    "delete",
    "do",
    "else",
    "in",
    "instanceof",
    "new",
    "of",
    "return",
    "throw",
    "typeof",
    "void",
    "yield",
];

/// Mark every `throw` statement in `source` with its line.
///
/// `module` is the file tag reported for module sources; contract sources
/// pass `None`.
pub(crate) fn instrument(source: &str, module: Option<&str>) -> String {
    let mut out = String::with_capacity(source.len() + 32);
    let mut copied = 0;
    let mut lexer = Lexer::new(source.as_bytes());
    // Whether a `/` here would start a regex rather than divide.
    let mut regex_ok = true;
    // Whether the next identifier is a property name.
    let mut member = false;
    let mut depth = 0usize;
    let mut templates: Vec<usize> = Vec::new();

    if source.starts_with("#!") {
        lexer.skip_line();
    }

    while let Some(byte) = lexer.peek(0) {
        match byte {
            b'\n' => {
                lexer.line += 1;
                lexer.pos += 1;
            }
            b' ' | b'\t' | b'\r' | 0x0b | 0x0c => lexer.pos += 1,
            b'/' if lexer.peek(1) == Some(b'/') => lexer.skip_line(),
            b'/' if lexer.peek(1) == Some(b'*') => lexer.skip_block_comment(),
            b'/' if regex_ok => {
                lexer.skip_regex();
                regex_ok = false;
                member = false;
            }
            b'\'' | b'"' => {
                lexer.skip_string(byte);
                regex_ok = false;
                member = false;
            }
            b'`' => {
                lexer.pos += 1;
                regex_ok = lexer.skip_template();
                if regex_ok {
                    templates.push(depth);
                    depth += 1;
                }
                member = false;
            }
            b'{' => {
                lexer.pos += 1;
                depth += 1;
                regex_ok = true;
                member = false;
            }
            b'}' => {
                lexer.pos += 1;
                depth = depth.saturating_sub(1);
                if templates.last() == Some(&depth) {
                    templates.pop();
                    regex_ok = lexer.skip_template();
                    if regex_ok {
                        templates.push(depth);
                        depth += 1;
                    }
                } else {
                    regex_ok = true;
                }
                member = false;
            }
            b'.' if lexer.peek(1).is_some_and(|b| b.is_ascii_digit()) => {
                lexer.skip_number();
                regex_ok = false;
                member = false;
            }
            // `.name`, `?.name` and `#private` are names, never keywords.
            b'.' | b'#' => {
                lexer.pos += 1;
                regex_ok = true;
                member = true;
            }
            b')' | b']' => {
                lexer.pos += 1;
                regex_ok = false;
                member = false;
            }
            b'0'..=b'9' => {
                lexer.skip_number();
                regex_ok = false;
                member = false;
            }
            b if is_ident_byte(b) => {
                let start = lexer.pos;
                lexer.skip_ident();
                let word = &source[start..lexer.pos];
                if word == "throw" && !member && lexer.throw_statement_follows() {
                    out.push_str(&source[copied..lexer.pos]);
                    out.push_str(&marker_call(lexer.line, module));
                    copied = lexer.pos;
                }
                regex_ok = EXPRESSION_KEYWORDS.contains(&word);
                member = false;
            }
            _ => {
                lexer.pos += 1;
                regex_ok = true;
                member = false;
            }
        }
    }

    out.push_str(&source[copied..]);
    out
}

fn marker_call(line: u32, module: Option<&str>) -> String {
    match module {
        Some(module) => format!(" {}({}, {:?}),", MARKER, line, module),
        None => format!(" {}({}),", MARKER, line),
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b == b'\\' || b >= 0x80
}

struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: u32,
}

impl<'a> Lexer<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            line: 1,
        }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    /// Stop at the next newline without consuming it.
    fn skip_line(&mut self) {
        while let Some(b) = self.peek(0) {
            if b == b'\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) {
        self.pos += 2;
        while let Some(b) = self.peek(0) {
            if b == b'*' && self.peek(1) == Some(b'/') {
                self.pos += 2;
                return;
            }
            if b == b'\n' {
                self.line += 1;
            }
            self.pos += 1;
        }
    }

    fn skip_string(&mut self, quote: u8) {
        self.pos += 1;
        while let Some(b) = self.peek(0) {
            match b {
                b'\\' => {
                    if self.peek(1) == Some(b'\n') {
                        self.line += 1;
                    }
                    self.pos += 2;
                }
                b'\n' => return,
                _ if b == quote => {
                    self.pos += 1;
                    return;
                }
                _ => self.pos += 1,
            }
        }
    }

    /// Scan template text up to the closing backtick or the next `${`.
    /// Returns true when a substitution was opened.
    fn skip_template(&mut self) -> bool {
        while let Some(b) = self.peek(0) {
            match b {
                b'\\' => {
                    if self.peek(1) == Some(b'\n') {
                        self.line += 1;
                    }
                    self.pos += 2;
                }
                b'`' => {
                    self.pos += 1;
                    return false;
                }
                b'$' if self.peek(1) == Some(b'{') => {
                    self.pos += 2;
                    return true;
                }
                b'\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                _ => self.pos += 1,
            }
        }
        false
    }

    fn skip_regex(&mut self) {
        self.pos += 1;
        let mut in_class = false;
        while let Some(b) = self.peek(0) {
            match b {
                b'\\' => self.pos += 2,
                b'\n' => return,
                b'[' => {
                    in_class = true;
                    self.pos += 1;
                }
                b']' => {
                    in_class = false;
                    self.pos += 1;
                }
                b'/' if !in_class => {
                    self.pos += 1;
                    break;
                }
                _ => self.pos += 1,
            }
        }
        // flags
        while self.peek(0).is_some_and(is_ident_byte) {
            self.pos += 1;
        }
    }

    fn skip_number(&mut self) {
        self.pos += 1;
        while let Some(b) = self.peek(0) {
            let exponent_sign = (b == b'+' || b == b'-')
                && matches!(self.bytes.get(self.pos - 1), Some(b'e' | b'E'));
            if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || exponent_sign {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn skip_ident(&mut self) {
        while self.peek(0).is_some_and(is_ident_byte) {
            self.pos += 1;
        }
    }

    /// Whether the `throw` just consumed starts a throw statement rather
    /// than naming a property, field or method.
    fn throw_statement_follows(&self) -> bool {
        let mut at = self.pos;
        while matches!(self.bytes.get(at), Some(b' ' | b'\t')) {
            at += 1;
        }
        match self.bytes.get(at) {
            None | Some(b'\n' | b'\r' | b':' | b'=' | b',' | b';' | b'}' | b')') => false,
            Some(b'(') => !self.is_method_head(at),
            Some(_) => true,
        }
    }

    /// `throw(...) {` is a method definition; `throw (...)` is not.
    fn is_method_head(&self, open: usize) -> bool {
        let mut depth = 0usize;
        let mut at = open;
        while let Some(&b) = self.bytes.get(at) {
            match b {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
            at += 1;
        }
        at += 1;
        while self.bytes.get(at).is_some_and(u8::is_ascii_whitespace) {
            at += 1;
        }
        self.bytes.get(at) == Some(&b'{')
    }
}
