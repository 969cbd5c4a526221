//! Streaming line parser
//!
//! Source is consumed line by line, character by character, in a single
//! left-to-right pass per line. Three modes are sticky across lines:
//! inside a block comment, inside a multiline string, inside a secure
//! script block. Outside those, runs of whitespace and control
//! characters separate tokens, and every token either has an immediate
//! effect on the stack or is appended to the innermost macro under
//! construction.

use std::sync::Arc;
use std::time::Instant;

use lazy_static::lazy_static;

use crate::metrics;

use super::audit::{AuditKind, AuditStatement};
use super::error::{Result, ScriptError};
use super::functions::control::{Run, Secure};
use super::functions::store::Load;
use super::library::FunctionValue;
use super::macros::{IdentityFactory, Macro, StatementFactory};
use super::stack::{Attribute, MemoryStack};
use super::value::Value;
use super::{
    StackFunction, ATTR_STATEMENT_FACTORY, COMMENT_END, COMMENT_START, MACRO_END, MACRO_START,
    MULTILINE_END, MULTILINE_START, SECURE_SCRIPT_END, SECURE_SCRIPT_START,
};

lazy_static! {
    /// Function appended after a symbol for deferred loads (`$name`
    /// inside a macro)
    static ref LOAD_FN: Arc<dyn StackFunction> = Arc::new(Load::new("LOAD"));

    /// Function appended after a symbol for deferred runs (`@name`
    /// inside a macro)
    static ref RUN_FN: Arc<dyn StackFunction> = Arc::new(Run::new("RUN"));

    static ref DEFAULT_FACTORY: Arc<dyn StatementFactory> = Arc::new(IdentityFactory);
}

/// Parse positions carried out of the character loop for error framing
struct Cursor {
    pos: usize,
    end: usize,
}

impl MemoryStack {
    /// Execute a whole script, line by line
    pub fn exec_all(&mut self, script: &str) -> Result<()> {
        let factory = self.current_factory();
        let mut line_number = 1i64;
        for line in script.lines() {
            if let Err(err) = self.exec_line_with(line, line_number, &factory) {
                if err.is_control() {
                    return Err(err);
                }
                return Err(ScriptError::Framed {
                    message: format!("Line #{}", line_number),
                    cause: Box::new(err),
                });
            }
            line_number += 1;
        }
        Ok(())
    }

    /// Execute a single line
    pub fn exec_line(&mut self, line: &str) -> Result<()> {
        let factory = self.current_factory();
        self.exec_line_with(line, -1, &factory)
    }

    /// Execute a single line carrying its source line number
    pub fn exec_line_at(&mut self, line: &str, line_number: i64) -> Result<()> {
        let factory = self.current_factory();
        self.exec_line_with(line, line_number, &factory)
    }

    fn current_factory(&self) -> Arc<dyn StatementFactory> {
        match self.get_attribute(ATTR_STATEMENT_FACTORY) {
            Some(Attribute::Factory(factory)) => factory,
            _ => DEFAULT_FACTORY.clone(),
        }
    }

    fn exec_line_with(
        &mut self,
        line: &str,
        line_number: i64,
        factory: &Arc<dyn StatementFactory>,
    ) -> Result<()> {
        self.recurse_in()?;
        let result = self.exec_line_guarded(line, line_number, factory);
        self.recurse_out();
        result
    }

    fn exec_line_guarded(
        &mut self,
        line: &str,
        line_number: i64,
        factory: &Arc<dyn StatementFactory>,
    ) -> Result<()> {
        let mut start = 0usize;

        // Fast path: inside a multiline string
        if self.multiline.is_some() {
            let trimmed = line.trim();
            if MULTILINE_END == trimmed {
                let content = self.multiline.take().unwrap_or_default();
                if let Some(buffer) = self.secure_script.as_mut() {
                    buffer.push_str(" '");
                    buffer.push_str(&percent_encode(&content));
                    buffer.push('\'');
                } else if self.open_macros.is_empty() {
                    self.push(Value::String(content))?;
                } else {
                    let wrapped = factory.wrap(
                        Value::String(content),
                        line_number,
                        0,
                        trimmed.len().saturating_sub(1),
                    );
                    if let Some(open) = self.open_macros.last_mut() {
                        open.add(wrapped);
                    }
                }
            } else if let Some(buffer) = self.multiline.as_mut() {
                // Content is preserved verbatim, lines joined with \n
                if !buffer.is_empty() {
                    buffer.push('\n');
                }
                buffer.push_str(line);
            }
            self.handle_signal()?;
            self.progress();
            return Ok(());
        }

        // Fast path: inside a block comment
        if self.in_comment {
            match find_from(line, COMMENT_END, 0) {
                None => {
                    self.handle_signal()?;
                    self.progress();
                    return Ok(());
                }
                Some(end) => start = end,
            }
        }

        let mut cursor = Cursor { pos: start, end: 0 };
        match self.parse_statements(line, line_number, factory, &mut cursor) {
            Ok(()) => {
                self.progress();
                Ok(())
            }
            Err(err) if err.is_control() => Err(err),
            Err(err) => Err(frame_with_window(
                line,
                cursor.pos,
                cursor.end,
                self.section_name(),
                err,
            )),
        }
    }

    fn parse_statements(
        &mut self,
        line: &str,
        line_number: i64,
        factory: &Arc<dyn StatementFactory>,
        cursor: &mut Cursor,
    ) -> Result<()> {
        let bytes = line.as_bytes();
        let len = bytes.len();
        let mut factory = factory.clone();

        while cursor.pos < len {
            if bytes[cursor.pos] <= b' ' {
                cursor.pos += 1;
                continue;
            }

            // Start of a block comment
            if bytes[cursor.pos] == b'/' && cursor.pos + 1 < len && bytes[cursor.pos + 1] == b'*' {
                self.in_comment = true;
                match find_from(line, COMMENT_END, cursor.pos + 2) {
                    // Seek to the comment end, handled below
                    Some(end) => cursor.pos = end,
                    None => break,
                }
            }

            // End of a block comment
            if cursor.pos + 1 < len
                && bytes[cursor.pos] == b'*'
                && bytes[cursor.pos + 1] == b'/'
            {
                if !self.in_comment {
                    if self.audit_active() {
                        self.append_audit(AuditStatement::new(
                            AuditKind::Exception,
                            None,
                            "Not inside a comment.",
                            line_number,
                            cursor.pos,
                            Some(cursor.pos + 1),
                        ));
                    } else {
                        return Err(ScriptError::Parse("Not inside a comment.".to_string()));
                    }
                }
                // A comment only ends when */ is followed by a space or
                // the end of the line
                if cursor.pos + 2 >= len || bytes[cursor.pos + 2] == b' ' {
                    self.in_comment = false;
                    cursor.pos += 2;
                    continue;
                } else {
                    match find_from(line, COMMENT_END, cursor.pos + 2) {
                        None => break,
                        Some(end) => {
                            cursor.pos = end;
                            continue;
                        }
                    }
                }
            }

            if self.in_comment {
                cursor.pos += 1;
                continue;
            }

            // Line comments, # or //
            if bytes[cursor.pos] == b'#'
                || (bytes[cursor.pos] == b'/'
                    && cursor.pos + 1 < len
                    && bytes[cursor.pos + 1] == b'/')
            {
                break;
            }

            self.inc_ops();
            self.check_ops()?;
            self.handle_signal()?;
            self.progress();

            // Trailing whitespace does not terminate strings
            let mut trimmed_len = len;
            while trimmed_len > 0 && bytes[trimmed_len - 1] <= b' ' {
                trimmed_len -= 1;
            }

            // Strings: a quote only closes the string at end of trimmed
            // line or when followed by a space
            if bytes[cursor.pos] == b'\'' || bytes[cursor.pos] == b'"' {
                let sep = bytes[cursor.pos];
                let pos = cursor.pos;
                let mut warn_sep_inclusion = false;
                let mut string_end: Option<usize> = None;
                if pos != trimmed_len - 1 {
                    let mut scan = pos + 1;
                    while scan < trimmed_len {
                        if bytes[scan] == sep {
                            if scan == trimmed_len - 1 || bytes[scan + 1] == b' ' {
                                string_end = Some(scan);
                                break;
                            } else {
                                // A separator inside the string is
                                // tolerated but worth a warning
                                warn_sep_inclusion = true;
                            }
                        }
                        scan += 1;
                    }
                }

                let string_end = match string_end {
                    None => {
                        cursor.end = len.saturating_sub(1);
                        if self.audit_active() {
                            self.append_audit(AuditStatement::new(
                                AuditKind::Exception,
                                None,
                                "Cannot find end of string",
                                line_number,
                                pos,
                                Some(len.saturating_sub(1)),
                            ));
                            // Do not try to parse the rest of the line
                            break;
                        }
                        return Err(ScriptError::Parse("Cannot find end of string".to_string()));
                    }
                    Some(end) => end,
                };

                cursor.end = string_end;
                if self.audit_mode && warn_sep_inclusion {
                    self.add_audit_error(AuditStatement::new(
                        AuditKind::Warning,
                        None,
                        "Separator found inside the string",
                        line_number,
                        pos,
                        Some(string_end + 1),
                    ));
                }

                match percent_decode(&line[pos + 1..string_end]) {
                    Ok(decoded) => {
                        if let Some(buffer) = self.secure_script.as_mut() {
                            buffer.push_str(" '");
                            buffer.push_str(&percent_encode(&decoded));
                            buffer.push('\'');
                        } else if self.open_macros.is_empty() {
                            self.push(Value::String(decoded))?;
                        } else {
                            let wrapped = factory.wrap(
                                Value::String(decoded),
                                line_number,
                                pos,
                                string_end,
                            );
                            if let Some(open) = self.open_macros.last_mut() {
                                open.add(wrapped);
                            }
                        }
                    }
                    Err(err) => {
                        if self.audit_active() {
                            self.append_audit(AuditStatement::new(
                                AuditKind::Exception,
                                None,
                                err.to_string(),
                                line_number,
                                pos,
                                Some(string_end + 1),
                            ));
                        } else {
                            return Err(err);
                        }
                    }
                }

                cursor.pos = string_end + 2;
                continue;
            }

            // A statement runs to the next whitespace or control char
            let pos = cursor.pos;
            let mut end = pos;
            while end < len && bytes[end] > b' ' {
                end += 1;
            }
            cursor.end = end;
            let stmt = &line[pos..end];

            if MULTILINE_START == stmt {
                if MULTILINE_START != line.trim() {
                    let message = format!(
                        "Can only start multiline strings by using {} on a line by itself.",
                        MULTILINE_START
                    );
                    if self.audit_active() {
                        self.append_audit(AuditStatement::new(
                            AuditKind::Exception,
                            None,
                            message,
                            line_number,
                            pos,
                            None,
                        ));
                    } else {
                        return Err(ScriptError::Parse(message));
                    }
                } else {
                    self.multiline = Some(String::new());
                }
                break;
            }

            self.dispatch_statement(stmt, line_number, pos, end, &mut factory)?;
            cursor.pos = end + 1;
        }

        Ok(())
    }

    fn dispatch_statement(
        &mut self,
        stmt: &str,
        line_number: i64,
        pos: usize,
        end: usize,
        factory: &mut Arc<dyn StatementFactory>,
    ) -> Result<()> {
        if SECURE_SCRIPT_END == stmt {
            if self.secure_script.is_none() {
                let message = "Not inside a secure script definition.".to_string();
                if self.audit_active() {
                    self.append_audit(AuditStatement::new(
                        AuditKind::Exception,
                        None,
                        message,
                        line_number,
                        pos,
                        None,
                    ));
                } else {
                    return Err(ScriptError::Parse(message));
                }
            } else if !self.audit_mode {
                let script = self.secure_script.take().unwrap_or_default();
                self.push(Value::String(script))?;
                Secure::new("SECURESCRIPT").apply(self)?;
            }
            return Ok(());
        }

        if SECURE_SCRIPT_START == stmt {
            if self.secure_script.is_none() {
                self.secure_script = Some(String::new());
            } else {
                let message = "Already inside a secure script definition.".to_string();
                if self.audit_active() {
                    self.append_audit(AuditStatement::new(
                        AuditKind::Exception,
                        None,
                        message,
                        line_number,
                        pos,
                        None,
                    ));
                } else {
                    return Err(ScriptError::Parse(message));
                }
            }
            return Ok(());
        }

        // Inside a secure block every token is collected as text
        if let Some(buffer) = self.secure_script.as_mut() {
            buffer.push(' ');
            buffer.push_str(stmt);
            return Ok(());
        }

        if MACRO_END == stmt {
            if self.open_macros.is_empty() || self.open_macros.len() == self.forced_macro {
                return Err(ScriptError::Parse("Not inside a macro definition.".to_string()));
            }
            let mut closed = match self.open_macros.pop() {
                Some(closed) => closed,
                None => return Err(ScriptError::Parse("Not inside a macro definition.".to_string())),
            };
            // The only way out of audit mode is closing the outermost
            // macro
            if self.audit_mode
                && (self.open_macros.is_empty() || self.open_macros.len() == self.forced_macro)
            {
                self.audit_mode = false;
            }
            closed.set_secure(self.in_secure_macro());
            let closed = Value::Macro(Arc::new(closed));
            match self.open_macros.last_mut() {
                None => self.push(closed)?,
                Some(enclosing) => enclosing.add(closed),
            }
            return Ok(());
        }

        if MACRO_START == stmt {
            self.open_macros.push(Macro::new());
            return Ok(());
        }

        // Hex literal
        if stmt.len() > 2 && stmt.starts_with("0x") {
            let value = parse_radix_folded(stmt, &stmt[2..], 16)?;
            return self.emit(factory, Value::Long(value), line_number, pos, end - 1);
        }

        // Binary literal
        if stmt.len() > 2 && stmt.starts_with("0b") {
            let value = parse_radix_folded(stmt, &stmt[2..], 2)?;
            return self.emit(factory, Value::Long(value), line_number, pos, end - 1);
        }

        if is_long_literal(stmt) {
            let value: i64 = stmt
                .parse()
                .map_err(|_| ScriptError::Parse(format!("Invalid LONG literal '{}'", stmt)))?;
            return self.emit(factory, Value::Long(value), line_number, pos, end - 1);
        }

        if is_double_literal(stmt) {
            let value: f64 = stmt
                .parse()
                .map_err(|_| ScriptError::Parse(format!("Invalid DOUBLE literal '{}'", stmt)))?;
            return self.emit(factory, Value::Double(value), line_number, pos, end - 1);
        }

        if stmt.eq_ignore_ascii_case("T") || stmt.eq_ignore_ascii_case("true") {
            return self.emit(factory, Value::Boolean(true), line_number, pos, end - 1);
        }

        if stmt.eq_ignore_ascii_case("F") || stmt.eq_ignore_ascii_case("false") {
            return self.emit(factory, Value::Boolean(false), line_number, pos, end - 1);
        }

        // Deferred variable dereference
        if let Some(symbol) = stmt.strip_prefix('$') {
            if self.open_macros.is_empty() {
                let value = self
                    .load(symbol)
                    .ok_or_else(|| ScriptError::UnknownSymbol(symbol.to_string()))?;
                return self.push(value);
            }
            if self.audit_mode {
                let statement = AuditStatement::new(
                    AuditKind::Load,
                    None,
                    symbol,
                    line_number,
                    pos,
                    None,
                );
                if let Some(open) = self.open_macros.last_mut() {
                    open.add(Value::Function(statement));
                }
            } else if let Some(open) = self.open_macros.last_mut() {
                open.add(factory.wrap(
                    Value::String(symbol.to_string()),
                    line_number,
                    pos,
                    end - 1,
                ));
                open.add(factory.wrap(
                    Value::Function(LOAD_FN.clone()),
                    line_number,
                    pos,
                    end - 1,
                ));
            }
            return Ok(());
        }

        // Immediate variable dereference, resolved at parse time
        if let Some(symbol) = stmt.strip_prefix("!$") {
            if self.audit_mode && !self.open_macros.is_empty() {
                let statement = AuditStatement::new(
                    AuditKind::EarlyBinding,
                    None,
                    symbol,
                    line_number,
                    pos,
                    None,
                );
                if let Some(open) = self.open_macros.last_mut() {
                    open.add(Value::Function(statement));
                }
                return Ok(());
            }

            let value = match self.load(symbol) {
                Some(value) => value,
                None => {
                    if 0 != self.forced_macro {
                        return Err(ScriptError::Parse(
                            "Early binding is not compatible with time-boxed execution limits."
                                .to_string(),
                        ));
                    }
                    if self.open_macros.len() > 1 {
                        return Err(ScriptError::Parse(
                            "Early binding is not possible inside a macro.".to_string(),
                        ));
                    }
                    return Err(ScriptError::UnknownSymbol(symbol.to_string()));
                }
            };

            if self.open_macros.is_empty() {
                return self.push(value);
            }
            let wrapped = factory.wrap(value, line_number, pos, end - 1);
            if let Some(open) = self.open_macros.last_mut() {
                open.add(wrapped);
            }
            return Ok(());
        }

        // Macro invocation
        if let Some(symbol) = stmt.strip_prefix('@') {
            if self.open_macros.is_empty() {
                return self.run(symbol);
            }
            if self.audit_mode {
                let statement = AuditStatement::new(
                    AuditKind::Run,
                    None,
                    symbol,
                    line_number,
                    pos,
                    None,
                );
                if let Some(open) = self.open_macros.last_mut() {
                    open.add(Value::String(symbol.to_string()));
                    open.add(Value::Function(statement));
                }
            } else if let Some(open) = self.open_macros.last_mut() {
                open.add(factory.wrap(
                    Value::String(symbol.to_string()),
                    line_number,
                    pos,
                    end - 1,
                ));
                open.add(factory.wrap(
                    Value::Function(RUN_FN.clone()),
                    line_number,
                    pos,
                    end - 1,
                ));
            }
            return Ok(());
        }

        // Everything else is a function call
        if self.audit_active() {
            match self.find_function(stmt) {
                Ok(resolved) => {
                    let payload = match resolved {
                        FunctionValue::Stack(function) => Value::Function(function),
                        FunctionValue::Value(value) => value,
                    };
                    let statement = AuditStatement::new(
                        AuditKind::FunctionCall,
                        Some(payload),
                        stmt,
                        line_number,
                        pos,
                        None,
                    );
                    if let Some(open) = self.open_macros.last_mut() {
                        open.add(Value::Function(statement));
                    }
                }
                Err(_) => {
                    self.append_audit(AuditStatement::new(
                        AuditKind::Unknown,
                        None,
                        stmt,
                        line_number,
                        pos,
                        None,
                    ));
                }
            }
            return Ok(());
        }

        let resolved = self.find_function(stmt)?;
        let started = Instant::now();

        let outcome = match resolved {
            FunctionValue::Stack(function) if self.open_macros.is_empty() => {
                let wrapped =
                    factory.wrap(Value::Function(function), line_number, pos, end - 1);
                match wrapped {
                    Value::Function(function) => {
                        let applied = function.apply(self);
                        if applied.is_ok() {
                            // The function may have installed another
                            // wrapping factory
                            *factory = self.current_factory();
                        }
                        applied
                    }
                    other => self.push(other),
                }
            }
            FunctionValue::Stack(function) => {
                let wrapped =
                    factory.wrap(Value::Function(function), line_number, pos, end - 1);
                if let Some(open) = self.open_macros.last_mut() {
                    open.add(wrapped);
                }
                Ok(())
            }
            FunctionValue::Value(value) => self.emit(factory, value, line_number, pos, end - 1),
        };

        if self.function_metrics() {
            metrics::record_function(stmt, started.elapsed());
        }

        outcome
    }

    fn emit(
        &mut self,
        factory: &Arc<dyn StatementFactory>,
        value: Value,
        line_number: i64,
        start: usize,
        end: usize,
    ) -> Result<()> {
        if self.open_macros.is_empty() {
            return self.push(value);
        }
        let wrapped = factory.wrap(value, line_number, start, end);
        if let Some(open) = self.open_macros.last_mut() {
            open.add(wrapped);
        }
        Ok(())
    }

    fn audit_active(&self) -> bool {
        self.audit_mode
            && !(self.open_macros.is_empty() || self.open_macros.len() == self.forced_macro)
    }

    fn append_audit(&mut self, statement: Arc<AuditStatement>) {
        if let Some(open) = self.open_macros.last_mut() {
            open.add(Value::Function(statement.clone()));
        }
        self.add_audit_error(statement);
    }

    // ── Forced-macro mode ──

    /// Open a macro from the API rather than from source. Must be
    /// balanced with [`MemoryStack::macro_close`].
    pub fn macro_open(&mut self) -> Result<()> {
        if 0 != self.forced_macro {
            return Err(ScriptError::Parse("Already in a forced Macro.".to_string()));
        }
        self.open_macros.push(Macro::new());
        self.forced_macro = self.open_macros.len();
        Ok(())
    }

    /// Close the forced macro and push it. A no-op when no forced macro
    /// is open.
    pub fn macro_close(&mut self) -> Result<()> {
        if 0 == self.forced_macro {
            return Ok(());
        }
        if self.multiline.is_some() {
            return Err(unbalanced(MULTILINE_START));
        }
        if self.in_comment {
            return Err(unbalanced(COMMENT_START));
        }
        if self.secure_script.is_some() {
            return Err(unbalanced(SECURE_SCRIPT_START));
        }
        if self.open_macros.len() != self.forced_macro {
            return Err(ScriptError::Parse(
                "Invalid level for closing forced Macro, check that all macros are correctly closed."
                    .to_string(),
            ));
        }
        let mut closed = match self.open_macros.pop() {
            Some(closed) => closed,
            None => return Err(ScriptError::Parse("Not inside a macro definition.".to_string())),
        };
        closed.set_secure(self.in_secure_macro());
        self.push(Value::Macro(Arc::new(closed)))?;
        self.forced_macro = 0;
        Ok(())
    }

    /// Fail if any multi-line construct is still open
    pub fn check_balanced(&self) -> Result<()> {
        if self.multiline.is_some() {
            return Err(unbalanced(MULTILINE_START));
        }
        if self.in_comment {
            return Err(unbalanced(COMMENT_START));
        }
        if self.secure_script.is_some() {
            return Err(unbalanced(SECURE_SCRIPT_START));
        }
        if !self.open_macros.is_empty() {
            return Err(unbalanced(MACRO_START));
        }
        Ok(())
    }
}

fn unbalanced(construct: &str) -> ScriptError {
    ScriptError::Parse(format!("Unbalanced {} construct.", construct))
}

// ── Helpers ──────────────────────────────────────────────────────────

fn find_from(line: &str, pattern: &str, from: usize) -> Option<usize> {
    if from >= line.len() {
        return None;
    }
    line[from..].find(pattern).map(|index| index + from)
}

fn is_long_literal(stmt: &str) -> bool {
    let digits = stmt
        .strip_prefix(['+', '-'])
        .unwrap_or(stmt)
        .as_bytes();
    !digits.is_empty() && digits.iter().all(u8::is_ascii_digit)
}

fn is_double_literal(stmt: &str) -> bool {
    let body = stmt.strip_prefix(['+', '-']).unwrap_or(stmt);
    match body.split_once('.') {
        Some((integral, fractional)) => {
            !integral.is_empty()
                && !fractional.is_empty()
                && integral.bytes().all(|b| b.is_ascii_digit())
                && fractional.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Parse hex or binary digits, folding overlong literals to their low
/// 64 bits (two's complement)
fn parse_radix_folded(stmt: &str, digits: &str, radix: u32) -> Result<i64> {
    let mut accumulator: u64 = 0;
    for c in digits.chars() {
        let digit = c.to_digit(radix).ok_or_else(|| {
            ScriptError::Parse(format!("Invalid literal '{}'", stmt))
        })?;
        accumulator = accumulator
            .wrapping_mul(radix as u64)
            .wrapping_add(digit as u64);
    }
    Ok(accumulator as i64)
}

/// Decode %XX escapes and validate the result as UTF-8
pub fn percent_decode(input: &str) -> Result<String> {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' {
            let escape = bytes.get(index + 1).zip(bytes.get(index + 2));
            let decoded_byte = escape.and_then(|(high, low)| {
                let high = (*high as char).to_digit(16)?;
                let low = (*low as char).to_digit(16)?;
                Some((high << 4 | low) as u8)
            });
            match decoded_byte {
                Some(byte) => {
                    decoded.push(byte);
                    index += 3;
                }
                None => {
                    return Err(ScriptError::Parse(format!(
                        "Invalid '%' escape in '{}'",
                        input
                    )))
                }
            }
        } else {
            decoded.push(bytes[index]);
            index += 1;
        }
    }
    String::from_utf8(decoded)
        .map_err(|_| ScriptError::Parse("String is not valid UTF-8 after decoding".to_string()))
}

/// Encode a string so it survives re-tokenization: quotes, percent,
/// whitespace, control characters and non-ASCII bytes become %XX
/// escapes.
pub fn percent_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'%' | b'\'' | b'"' => encoded.push_str(&format!("%{:02X}", byte)),
            0x21..=0x7E => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Rewrite an error with a +-30 character window around the offending
/// token, delimited by => and <= markers
fn frame_with_window(
    line: &str,
    pos: usize,
    end: usize,
    section: &str,
    cause: ScriptError,
) -> ScriptError {
    let len = line.len();
    let mut pos = pos.min(len.saturating_sub(1));
    let mut end = end;
    if end < pos {
        end = pos;
    }
    if end > len {
        end = len;
    }
    pos = floor_char_boundary(line, pos);
    end = floor_char_boundary(line, end);

    let before = floor_char_boundary(line, pos.saturating_sub(30));
    let after = floor_char_boundary(line, (end + 30).min(len));

    ScriptError::Framed {
        message: format!(
            "Exception at '{}=>{}<={}' in section {}",
            &line[before..pos],
            &line[pos..end],
            &line[end..after],
            section
        ),
        cause: Box::new(cause),
    }
}

fn floor_char_boundary(line: &str, mut index: usize) -> usize {
    if index >= line.len() {
        return line.len();
    }
    while index > 0 && !line.is_char_boundary(index) {
        index -= 1;
    }
    index
}
