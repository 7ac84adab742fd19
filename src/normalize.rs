//! Type and default-expression canonicalization
//!
//! PostgreSQL reports types and default expressions in server-rewritten form
//! (`character varying` for `varchar`, `'0'::numeric` for `0`, …). Both the
//! desired and the current model are passed through this module before any
//! equality check, so the differ always compares canonical forms.
//!
//! Both normalizers are idempotent: rewrites run to a fixpoint.

use std::sync::LazyLock;

use regex::Regex;

/// A type token as it appears in a cast: base name, the multi-word forms
/// PostgreSQL actually has (`character varying`, `double precision`,
/// `… with/without time zone`, `bit varying`), optional modifiers, optional
/// array suffixes.
const TYPE_TOKEN: &str = r"[A-Za-z_][A-Za-z0-9_]*(?:\s+(?:varying|precision))?(?:\s+(?:with|without)\s+time\s+zone)?(?:\(\s*\d+\s*(?:,\s*\d+\s*)?\))?(?:\[\])*";

/// One trailing `::type[(mods)][[]]` cast, e.g. `::character varying(255)[]`.
static TRAILING_CAST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"::\s*{TYPE_TOKEN}\s*$")).unwrap());

/// A cast token anywhere in the text (used for in-argument stripping).
static INNER_CAST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"::\s*{TYPE_TOKEN}")).unwrap());

/// `CAST(expr AS type)` wrapper.
static CAST_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^CAST\s*\((.*)\s+AS\s+{TYPE_TOKEN}\s*\)$")).unwrap()
});

/// `EXTRACT('field' FROM …)` or `EXTRACT(FIELD FROM …)`.
static EXTRACT_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bEXTRACT\s*\(\s*'?(\w+)'?\s+FROM\b").unwrap());

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

// ---------------------------------------------------------------------------
// Type normalization
// ---------------------------------------------------------------------------

/// Map a server- or user-written type token to its canonical form.
///
/// `character varying(255)` → `VARCHAR(255)`, `bigserial` → `INT8`,
/// `numeric(10)` → `NUMERIC(10,0)`, `integer[][]` → `INT4[]`.
///
/// Unrecognized base types (user-defined types, enums) are preserved
/// verbatim — their identifiers are case-sensitive.
pub fn normalize_type(raw: &str) -> String {
    let text = WHITESPACE.replace_all(raw.trim(), " ").to_string();

    // Collapse any number of array dimensions to a single trailing `[]`.
    let mut base = text.as_str();
    let mut is_array = false;
    while let Some(stripped) = base.strip_suffix("[]") {
        base = stripped.trim_end();
        is_array = true;
    }

    // Split off type modifiers: `numeric(10,2)` → (`numeric`, `10,2`).
    let (name, mods) = match base.find('(') {
        Some(open) if base.ends_with(')') => (
            base[..open].trim_end(),
            Some(base[open + 1..base.len() - 1].replace(' ', "")),
        ),
        _ => (base, None),
    };

    // `public.` qualification is search-path noise: format_type reports a
    // type bare when its schema is visible, while DDL may spell it out.
    let name = name.strip_prefix("public.").unwrap_or(name);

    let lowered = name.to_lowercase();
    let canonical = match lowered.as_str() {
        "character varying" | "varchar" => "VARCHAR",
        "bpchar" | "character" | "char" => "CHAR",
        "int2" | "smallint" | "smallserial" | "serial2" => "INT2",
        "int4" | "int" | "integer" | "serial" | "serial4" => "INT4",
        "int8" | "bigint" | "bigserial" | "serial8" => "INT8",
        "numeric" | "decimal" => "NUMERIC",
        "real" | "float4" => "FLOAT4",
        "double precision" | "float8" => "FLOAT8",
        "timestamp" | "timestamp without time zone" => "TIMESTAMP",
        "timestamptz" | "timestamp with time zone" => "TIMESTAMPTZ",
        "time" | "time without time zone" => "TIME",
        "timetz" | "time with time zone" => "TIMETZ",
        "bit varying" | "varbit" => "BIT VARYING",
        "bool" | "boolean" => "BOOLEAN",
        "text" => "TEXT",
        "bytea" => "BYTEA",
        "uuid" => "UUID",
        "date" => "DATE",
        "json" => "JSON",
        "jsonb" => "JSONB",
        "interval" => "INTERVAL",
        "inet" => "INET",
        "cidr" => "CIDR",
        "macaddr" => "MACADDR",
        _ => name,
    };

    let mut out = canonical.to_string();
    match mods {
        // numeric(p) means numeric(p,0); make the scale explicit so both
        // spellings compare equal.
        Some(m) if canonical == "NUMERIC" && !m.contains(',') => {
            out.push_str(&format!("({m},0)"));
        }
        Some(m) if !m.is_empty() => out.push_str(&format!("({m})")),
        _ => {}
    }
    if is_array {
        out.push_str("[]");
    }
    out
}

// ---------------------------------------------------------------------------
// Default normalization
// ---------------------------------------------------------------------------

/// Canonicalize a column default expression.
///
/// Returns `None` for an absent default or a literal `NULL` (PostgreSQL
/// treats them identically). The returned text is the canonical form used on
/// both sides of default-equality checks.
pub fn normalize_default(raw: Option<&str>) -> Option<String> {
    let mut text = WHITESPACE.replace_all(raw?.trim(), " ").to_string();
    if text.is_empty() || text.eq_ignore_ascii_case("null") {
        return None;
    }

    // Run the rewrite chain to a fixpoint so nested wrappings
    // (`('0'::text)::numeric`) fully unwrap and the result is stable.
    loop {
        let before = text.clone();
        text = rewrite_default_once(&text);
        if text == before {
            break;
        }
    }

    if text.is_empty() || text.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(text)
    }
}

fn rewrite_default_once(input: &str) -> String {
    let mut text = input.trim().to_string();

    if let Some(m) = TRAILING_CAST.find(&text) {
        // Keep the cast when it is part of a nextval() argument, e.g.
        // nextval('users_id_seq'::regclass) — that cast is load-bearing.
        if !within_nextval(&text, m.start()) {
            text.truncate(m.start());
            text = text.trim_end().to_string();
        }
    }

    if let Some(caps) = CAST_CALL.captures(&text) {
        text = caps[1].trim().to_string();
    }

    text = strip_outer_parens(&text);

    if let Some(stripped) = strip_prefix_ci(&text, "pg_catalog.") {
        text = stripped;
    }

    if text.eq_ignore_ascii_case("now()") || text.eq_ignore_ascii_case("current_timestamp") {
        text = "CURRENT_TIMESTAMP".to_string();
    }

    text = EXTRACT_FIELD
        .replace_all(&text, |caps: &regex::Captures<'_>| {
            format!("EXTRACT({} FROM", caps[1].to_lowercase())
        })
        .to_string();

    // Strip casts inside function arguments, except inside nextval(...).
    if !text.to_lowercase().contains("nextval(") {
        text = INNER_CAST.replace_all(&text, "").to_string();
    }

    // '42' and '4.2' are numeric literals in quotes; unquote them.
    if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        let inner = &text[1..text.len() - 1];
        if !inner.is_empty() && inner.parse::<f64>().is_ok() {
            text = inner.to_string();
        }
    }

    WHITESPACE.replace_all(text.trim(), " ").to_string()
}

/// True when the byte offset falls inside a `nextval(` call's parentheses.
fn within_nextval(text: &str, offset: usize) -> bool {
    let lower = text.to_lowercase();
    match lower.find("nextval(") {
        Some(start) => offset > start && text[offset..].contains(')'),
        None => false,
    }
}

/// Strip one pair of outer parentheses when they are balanced around the
/// whole expression: `(x > 0)` → `x > 0`, but `(a) + (b)` is unchanged.
fn strip_outer_parens(text: &str) -> String {
    let t = text.trim();
    if !(t.starts_with('(') && t.ends_with(')')) {
        return t.to_string();
    }
    let inner = &t[1..t.len() - 1];
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return t.to_string();
                }
            }
            _ => {}
        }
    }
    if depth == 0 {
        inner.trim().to_string()
    } else {
        t.to_string()
    }
}

fn strip_prefix_ci(text: &str, prefix: &str) -> Option<String> {
    if text.len() >= prefix.len() && text[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(text[prefix.len()..].to_string())
    } else {
        None
    }
}

/// True for the `DEFAULT nextval('…_seq'::regclass)` shape SERIAL columns
/// introspect as.
pub fn is_sequence_default(default: &str) -> bool {
    default.trim().to_lowercase().starts_with("nextval(")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_type_varchar() {
        assert_eq!(normalize_type("character varying(255)"), "VARCHAR(255)");
        assert_eq!(normalize_type("varchar(255)"), "VARCHAR(255)");
        assert_eq!(normalize_type("character varying"), "VARCHAR");
    }

    #[test]
    fn test_type_char_aliases() {
        assert_eq!(normalize_type("bpchar"), "CHAR");
        assert_eq!(normalize_type("character(8)"), "CHAR(8)");
    }

    #[test]
    fn test_type_integers_and_serials() {
        assert_eq!(normalize_type("smallint"), "INT2");
        assert_eq!(normalize_type("integer"), "INT4");
        assert_eq!(normalize_type("bigint"), "INT8");
        assert_eq!(normalize_type("serial"), "INT4");
        assert_eq!(normalize_type("bigserial"), "INT8");
        assert_eq!(normalize_type("smallserial"), "INT2");
    }

    #[test]
    fn test_type_numeric_scale_made_explicit() {
        assert_eq!(normalize_type("numeric(10)"), "NUMERIC(10,0)");
        assert_eq!(normalize_type("numeric(10,2)"), "NUMERIC(10,2)");
        assert_eq!(normalize_type("decimal"), "NUMERIC");
    }

    #[test]
    fn test_type_floats() {
        assert_eq!(normalize_type("real"), "FLOAT4");
        assert_eq!(normalize_type("double precision"), "FLOAT8");
    }

    #[test]
    fn test_type_timestamps() {
        assert_eq!(normalize_type("timestamp without time zone"), "TIMESTAMP");
        assert_eq!(normalize_type("timestamp with time zone"), "TIMESTAMPTZ");
    }

    #[test]
    fn test_type_bit_varying() {
        assert_eq!(normalize_type("varbit(16)"), "BIT VARYING(16)");
    }

    #[test]
    fn test_type_array_dimensions_collapse() {
        assert_eq!(normalize_type("integer[]"), "INT4[]");
        assert_eq!(normalize_type("integer[][]"), "INT4[]");
        assert_eq!(normalize_type("character varying(20)[]"), "VARCHAR(20)[]");
    }

    #[test]
    fn test_type_user_defined_preserved() {
        assert_eq!(normalize_type("order_status"), "order_status");
        assert_eq!(normalize_type("MyType"), "MyType");
    }

    #[test]
    fn test_default_absent_and_null() {
        assert_eq!(normalize_default(None), None);
        assert_eq!(normalize_default(Some("NULL")), None);
        assert_eq!(normalize_default(Some("  ")), None);
    }

    #[test]
    fn test_default_trailing_cast_stripped() {
        assert_eq!(normalize_default(Some("'0'::numeric")), Some("0".into()));
        assert_eq!(
            normalize_default(Some("'active'::character varying(20)")),
            Some("'active'".into())
        );
    }

    #[test]
    fn test_default_nested_cast_unwraps_fully() {
        assert_eq!(
            normalize_default(Some("('0'::text)::numeric(10,2)")),
            Some("0".into())
        );
    }

    #[test]
    fn test_default_cast_call_unwrapped() {
        assert_eq!(normalize_default(Some("CAST(0 AS numeric)")), Some("0".into()));
    }

    #[test]
    fn test_default_now_to_current_timestamp() {
        assert_eq!(
            normalize_default(Some("now()")),
            Some("CURRENT_TIMESTAMP".into())
        );
        assert_eq!(
            normalize_default(Some("pg_catalog.now()")),
            Some("CURRENT_TIMESTAMP".into())
        );
    }

    #[test]
    fn test_default_nextval_cast_preserved() {
        assert_eq!(
            normalize_default(Some("nextval('users_id_seq'::regclass)")),
            Some("nextval('users_id_seq'::regclass)".into())
        );
    }

    #[test]
    fn test_default_extract_quoting() {
        assert_eq!(
            normalize_default(Some("EXTRACT('YEAR' FROM created_at)")),
            Some("EXTRACT(year FROM created_at)".into())
        );
    }

    #[test]
    fn test_default_outer_parens_stripped() {
        assert_eq!(normalize_default(Some("(1 + 2)")), Some("1 + 2".into()));
        // Non-balanced outer parens stay.
        assert_eq!(
            normalize_default(Some("(a) || (b)")),
            Some("(a) || (b)".into())
        );
    }

    #[test]
    fn test_default_whitespace_collapsed() {
        assert_eq!(
            normalize_default(Some("  1   +   2 ")),
            Some("1 + 2".into())
        );
    }

    #[test]
    fn test_is_sequence_default() {
        assert!(is_sequence_default("nextval('users_id_seq'::regclass)"));
        assert!(!is_sequence_default("CURRENT_TIMESTAMP"));
    }

    proptest! {
        // Normalization stability: a second pass never changes the result.
        #[test]
        fn prop_normalize_default_idempotent(s in prop_oneof![
            "[0-9]{1,6}",
            "'[a-z]{1,8}'",
            "'[0-9]{1,4}'::numeric",
            r"\('[0-9]{1,4}'::text\)::numeric\(10,2\)",
            "now\\(\\)",
            "[a-z]{1,6}\\('[a-z]{1,5}'::text\\)",
            r"\([a-z]{1,4} > [0-9]{1,3}\)",
        ]) {
            let once = normalize_default(Some(&s));
            let twice = normalize_default(once.as_deref());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_normalize_type_idempotent(s in prop_oneof![
            "character varying\\([0-9]{1,3}\\)",
            "numeric\\([0-9]{1,2}\\)",
            "integer(\\[\\]){0,3}",
            "timestamp with time zone",
            "[a-z_]{1,10}",
        ]) {
            let once = normalize_type(&s);
            prop_assert_eq!(normalize_type(&once), once);
        }
    }
}
