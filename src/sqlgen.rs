//! SQL fragment assembly
//!
//! Every statement the planner emits goes through [`SqlBuilder`]. The builder
//! guarantees single-space separation between phrases, double-quoted
//! identifiers with internal quotes doubled, `"schema"."table"` emission for
//! qualified names, and semicolon tightening (no space before the final `;`).
//!
//! Builders are owned values scoped to a single statement assembly; they are
//! never shared.

/// Double-quote an identifier, doubling any embedded quotes.
///
/// `users` becomes `"users"`; `we"ird` becomes `"we""ird"`.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote a string literal, doubling any embedded quotes.
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Render an optionally schema-qualified table reference.
pub fn qualified(schema: Option<&str>, name: &str) -> String {
    match schema {
        Some(s) => format!("{}.{}", quote_ident(s), quote_ident(name)),
        None => quote_ident(name),
    }
}

/// Fluent statement assembler.
#[derive(Debug, Default)]
pub struct SqlBuilder {
    buf: String,
    indent: usize,
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw phrase, separated from the previous content by one space.
    ///
    /// Phrases starting with a closing paren or a comma attach directly to
    /// the previous token.
    pub fn phrase(&mut self, text: &str) -> &mut Self {
        if self.needs_space(text) {
            self.buf.push(' ');
        }
        self.buf.push_str(text);
        self
    }

    /// Append a double-quoted identifier.
    pub fn ident(&mut self, name: &str) -> &mut Self {
        self.phrase(&quote_ident(name))
    }

    /// Append a `"schema"."table"` reference (or just `"table"` when
    /// unqualified).
    pub fn table(&mut self, schema: Option<&str>, name: &str) -> &mut Self {
        self.phrase(&qualified(schema, name))
    }

    /// Append a comma directly after the previous token.
    pub fn comma(&mut self) -> &mut Self {
        self.buf.push(',');
        self
    }

    /// Start a new line at the current indent level.
    pub fn newline(&mut self) -> &mut Self {
        self.buf.push('\n');
        for _ in 0..self.indent {
            self.buf.push_str("  ");
        }
        self
    }

    pub fn indent(&mut self) -> &mut Self {
        self.indent += 1;
        self
    }

    pub fn dedent(&mut self) -> &mut Self {
        self.indent = self.indent.saturating_sub(1);
        self
    }

    /// Replace the last non-whitespace character. Used to turn a trailing
    /// comma into a closing paren when a list ends early.
    pub fn rewrite_last(&mut self, c: char) -> &mut Self {
        let trimmed = self.buf.trim_end().len();
        self.buf.truncate(trimmed);
        self.buf.pop();
        self.buf.push(c);
        self
    }

    /// Finish the statement: trim trailing whitespace and terminate with a
    /// single tightened semicolon.
    pub fn build(mut self) -> String {
        let trimmed = self.buf.trim_end().len();
        self.buf.truncate(trimmed);
        if !self.buf.ends_with(';') {
            self.buf.push(';');
        }
        self.buf
    }

    fn needs_space(&self, next: &str) -> bool {
        if self.buf.is_empty() || next.is_empty() {
            return false;
        }
        if self.buf.ends_with(['\n', ' ', '(']) {
            return false;
        }
        !next.starts_with([')', ',', ';'])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_plain() {
        assert_eq!(quote_ident("users"), "\"users\"");
    }

    #[test]
    fn test_quote_ident_doubles_embedded_quotes() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_quote_literal_doubles_embedded_quotes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_qualified_with_schema() {
        assert_eq!(qualified(Some("app"), "users"), "\"app\".\"users\"");
    }

    #[test]
    fn test_qualified_without_schema() {
        assert_eq!(qualified(None, "users"), "\"users\"");
    }

    #[test]
    fn test_single_space_separation() {
        let mut b = SqlBuilder::new();
        b.phrase("DROP").phrase("TABLE").table(Some("public"), "users");
        assert_eq!(b.build(), "DROP TABLE \"public\".\"users\";");
    }

    #[test]
    fn test_comma_attaches_to_previous_token() {
        let mut b = SqlBuilder::new();
        b.phrase("a").comma().phrase("b");
        assert_eq!(b.build(), "a, b;");
    }

    #[test]
    fn test_semicolon_tightening() {
        let mut b = SqlBuilder::new();
        b.phrase("SELECT 1").phrase(";");
        assert_eq!(b.build(), "SELECT 1;");
    }

    #[test]
    fn test_no_double_semicolon() {
        let mut b = SqlBuilder::new();
        b.phrase("SELECT 1;");
        assert_eq!(b.build(), "SELECT 1;");
    }

    #[test]
    fn test_rewrite_last_turns_comma_into_paren() {
        let mut b = SqlBuilder::new();
        b.phrase("(").phrase("a").comma();
        b.rewrite_last(')');
        assert_eq!(b.build(), "(a);");
    }

    #[test]
    fn test_no_space_after_open_paren() {
        let mut b = SqlBuilder::new();
        b.phrase("CHECK").phrase("(").phrase("x > 0").phrase(")");
        assert_eq!(b.build(), "CHECK (x > 0);");
    }

    #[test]
    fn test_indent_newline() {
        let mut b = SqlBuilder::new();
        b.phrase("CREATE TABLE \"t\" (").indent().newline().phrase("\"id\" INT4");
        b.dedent().newline().phrase(")");
        assert_eq!(b.build(), "CREATE TABLE \"t\" (\n  \"id\" INT4\n);");
    }
}
