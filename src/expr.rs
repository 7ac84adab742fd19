//! Semantic equality of SQL scalar expressions
//!
//! PostgreSQL rewrites expressions before storing them: `IN (…)` becomes
//! `= ANY (ARRAY[…])`, `LIKE` becomes `~~`, `now()` becomes
//! `CURRENT_TIMESTAMP`, casts and parentheses appear out of nowhere. Naive
//! text comparison of a user-written CHECK predicate against
//! `pg_get_constraintdef` output would therefore report endless spurious
//! diffs.
//!
//! [`expressions_equal`] parses each side as the WHERE clause of a dummy
//! SELECT, converts the AST into a small canonical tree applying the rewrite
//! rules, and compares structurally. On parse failure it falls back to
//! whitespace-normalized textual equality. It never fails.

use pg_query::NodeEnum;
use pg_query::protobuf::{self, AExprKind, BoolExprType};

use crate::parser::deparse_node;

/// Decide whether two scalar expressions are semantically equal.
///
/// Reflexive and symmetric; conservative (`false`) when either side cannot
/// be parsed and the texts differ.
pub fn expressions_equal(a: &str, b: &str) -> bool {
    match (canonicalize(a), canonicalize(b)) {
        (Some(ca), Some(cb)) => ca == cb,
        _ => squash_whitespace(a) == squash_whitespace(b),
    }
}

/// Equality over optional expressions; two absent expressions are equal.
pub fn expressions_equal_opt(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => expressions_equal(a, b),
        _ => false,
    }
}

fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Canonical expression tree
// ---------------------------------------------------------------------------

/// Canonical form of a scalar expression. Source locations are gone by
/// construction; the rewrite rules are applied during conversion.
#[derive(Debug, Clone, PartialEq)]
enum CanonExpr {
    Column(Vec<String>),
    Number(String),
    Text(String),
    Bool(bool),
    Null,
    /// `CURRENT_TIMESTAMP`, `CURRENT_DATE`, … — and `now()`, which
    /// canonicalizes to the `current_timestamp` token.
    ValueFunc(String),
    /// Binary or unary operator application. LIKE/ILIKE arrive here with
    /// operator text `~~`/`~~*`.
    Op {
        op: String,
        args: Vec<CanonExpr>,
    },
    /// `lhs IN (list)` — also produced from `lhs = ANY (ARRAY[list])`.
    In {
        lhs: Box<CanonExpr>,
        list: Vec<CanonExpr>,
        negated: bool,
    },
    And(Vec<CanonExpr>),
    Or(Vec<CanonExpr>),
    Not(Box<CanonExpr>),
    IsNull {
        arg: Box<CanonExpr>,
        negated: bool,
    },
    /// `EXTRACT(field FROM arg)` / `date_part('field', arg)`, field folded
    /// to lower case.
    Extract {
        field: String,
        arg: Box<CanonExpr>,
    },
    FuncCall {
        name: String,
        args: Vec<CanonExpr>,
    },
    Array(Vec<CanonExpr>),
    /// Anything not modeled above, compared by deparsed text.
    Raw(String),
}

/// Parse an expression as `SELECT 1 WHERE <expr>` and canonicalize.
fn canonicalize(text: &str) -> Option<CanonExpr> {
    let sql = format!("SELECT 1 WHERE {text}");
    let parsed = pg_query::parse(&sql).ok()?;
    let stmt = parsed.protobuf.stmts.first()?;
    let node = stmt.stmt.as_ref()?.node.as_ref()?;
    let NodeEnum::SelectStmt(select) = node else {
        return None;
    };
    let where_clause = select.where_clause.as_ref()?;
    Some(canon_node(where_clause))
}

fn canon_node(node: &protobuf::Node) -> CanonExpr {
    match node.node.as_ref() {
        Some(NodeEnum::AExpr(a)) => canon_a_expr(a),
        Some(NodeEnum::BoolExpr(b)) => canon_bool_expr(b),
        Some(NodeEnum::ColumnRef(c)) => canon_column_ref(c),
        Some(NodeEnum::AConst(c)) => canon_const(c),
        Some(NodeEnum::TypeCast(tc)) => canon_type_cast(tc),
        Some(NodeEnum::FuncCall(fc)) => canon_func_call(fc),
        Some(NodeEnum::SqlvalueFunction(svf)) => canon_value_func(svf),
        Some(NodeEnum::NullTest(nt)) => {
            let arg = nt
                .arg
                .as_ref()
                .map(|a| canon_node(a))
                .unwrap_or(CanonExpr::Null);
            CanonExpr::IsNull {
                arg: Box::new(arg),
                negated: nt.nulltesttype() == protobuf::NullTestType::IsNotNull,
            }
        }
        Some(NodeEnum::AArrayExpr(arr)) => {
            CanonExpr::Array(arr.elements.iter().map(canon_node).collect())
        }
        Some(NodeEnum::List(list)) => {
            // Bare lists only appear as operator operands (BETWEEN, IN);
            // the callers unpack them. Anything else is unexpected.
            CanonExpr::Array(list.items.iter().map(canon_node).collect())
        }
        _ => CanonExpr::Raw(squash_whitespace(&deparse_node(node))),
    }
}

fn canon_a_expr(a: &protobuf::AExpr) -> CanonExpr {
    let op = operator_text(&a.name);
    match a.kind() {
        // x BETWEEN lo AND hi  ==>  x >= lo AND x <= hi
        AExprKind::AexprBetween | AExprKind::AexprNotBetween => {
            let lhs = a.lexpr.as_deref().map(canon_node).unwrap_or(CanonExpr::Null);
            let bounds = a
                .rexpr
                .as_deref()
                .map(unpack_list)
                .unwrap_or_default();
            let (lo, hi) = match bounds.as_slice() {
                [lo, hi] => (lo.clone(), hi.clone()),
                _ => return CanonExpr::Raw(format!("between {op}")),
            };
            let expanded = CanonExpr::And(vec![
                CanonExpr::Op {
                    op: ">=".to_string(),
                    args: vec![lhs.clone(), lo],
                },
                CanonExpr::Op {
                    op: "<=".to_string(),
                    args: vec![lhs, hi],
                },
            ]);
            if a.kind() == AExprKind::AexprNotBetween {
                CanonExpr::Not(Box::new(expanded))
            } else {
                expanded
            }
        }
        // x IN (a, b)  /  x NOT IN (a, b)
        AExprKind::AexprIn => {
            let lhs = a.lexpr.as_deref().map(canon_node).unwrap_or(CanonExpr::Null);
            let list = a.rexpr.as_deref().map(unpack_list).unwrap_or_default();
            CanonExpr::In {
                lhs: Box::new(lhs),
                list,
                negated: op == "<>",
            }
        }
        // x = ANY (ARRAY[…])  ==>  x IN (…); other ANY/ALL stay operators.
        AExprKind::AexprOpAny if op == "=" || op == "<>" => {
            let lhs = a.lexpr.as_deref().map(canon_node).unwrap_or(CanonExpr::Null);
            let rhs = a.rexpr.as_deref().map(canon_node).unwrap_or(CanonExpr::Null);
            match rhs {
                CanonExpr::Array(items) => CanonExpr::In {
                    lhs: Box::new(lhs),
                    list: items,
                    negated: op == "<>",
                },
                other => CanonExpr::Op {
                    op: format!("{op} ANY"),
                    args: vec![lhs, other],
                },
            }
        }
        // LIKE/ILIKE carry their operator spelling (~~, !~~, ~~*, !~~*);
        // emitting a plain Op makes them equal to the explicit operators.
        AExprKind::AexprLike | AExprKind::AexprIlike | AExprKind::AexprOp => {
            let mut args = Vec::new();
            if let Some(l) = a.lexpr.as_deref() {
                args.push(canon_node(l));
            }
            if let Some(r) = a.rexpr.as_deref() {
                args.push(canon_node(r));
            }
            CanonExpr::Op { op, args }
        }
        _ => {
            let mut parts = Vec::new();
            if let Some(l) = a.lexpr.as_deref() {
                parts.push(canon_node(l));
            }
            if let Some(r) = a.rexpr.as_deref() {
                parts.push(canon_node(r));
            }
            CanonExpr::Op {
                op: format!("{:?}:{op}", a.kind()),
                args: parts,
            }
        }
    }
}

/// Unpack a `List` operand (IN lists, BETWEEN bounds) into its elements.
fn unpack_list(node: &protobuf::Node) -> Vec<CanonExpr> {
    match node.node.as_ref() {
        Some(NodeEnum::List(list)) => list.items.iter().map(canon_node).collect(),
        _ => vec![canon_node(node)],
    }
}

fn canon_bool_expr(b: &protobuf::BoolExpr) -> CanonExpr {
    let args: Vec<CanonExpr> = b.args.iter().map(canon_node).collect();
    match b.boolop() {
        BoolExprType::AndExpr => CanonExpr::And(flatten(args, true)),
        BoolExprType::OrExpr => CanonExpr::Or(flatten(args, false)),
        BoolExprType::NotExpr => {
            let arg = args.into_iter().next().unwrap_or(CanonExpr::Null);
            CanonExpr::Not(Box::new(arg))
        }
        BoolExprType::Undefined => CanonExpr::Raw("boolexpr".to_string()),
    }
}

/// Flatten nested same-connective chains so `(a AND b) AND c` equals
/// `a AND (b AND c)`.
fn flatten(args: Vec<CanonExpr>, is_and: bool) -> Vec<CanonExpr> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        match (is_and, arg) {
            (true, CanonExpr::And(inner)) => out.extend(inner),
            (false, CanonExpr::Or(inner)) => out.extend(inner),
            (_, other) => out.push(other),
        }
    }
    out
}

fn canon_column_ref(c: &protobuf::ColumnRef) -> CanonExpr {
    let fields: Vec<String> = c
        .fields
        .iter()
        .filter_map(|f| match f.node.as_ref() {
            Some(NodeEnum::String(s)) => Some(s.sval.clone()),
            Some(NodeEnum::AStar(_)) => Some("*".to_string()),
            _ => None,
        })
        .collect();
    CanonExpr::Column(fields)
}

fn canon_const(c: &protobuf::AConst) -> CanonExpr {
    use protobuf::a_const::Val;
    if c.isnull {
        return CanonExpr::Null;
    }
    match c.val.as_ref() {
        Some(Val::Ival(i)) => CanonExpr::Number(i.ival.to_string()),
        Some(Val::Fval(f)) => CanonExpr::Number(canonical_number(&f.fval)),
        Some(Val::Sval(s)) => CanonExpr::Text(s.sval.clone()),
        Some(Val::Boolval(b)) => CanonExpr::Bool(b.boolval),
        Some(Val::Bsval(s)) => CanonExpr::Text(s.bsval.clone()),
        None => CanonExpr::Null,
    }
}

/// Trim numeric spellings so `1.0`, `1.00` and `1` compare equal.
fn canonical_number(text: &str) -> String {
    match text.parse::<f64>() {
        Ok(v) => format!("{v}"),
        Err(_) => text.to_string(),
    }
}

/// Casts are unwrapped; a cast around a numeric-shaped string literal is
/// promoted to a numeric literal (`'5'::integer` ≡ `5`).
fn canon_type_cast(tc: &protobuf::TypeCast) -> CanonExpr {
    let inner = match tc.arg.as_deref() {
        Some(arg) => canon_node(arg),
        None => return CanonExpr::Null,
    };
    match inner {
        CanonExpr::Text(s) if s.parse::<f64>().is_ok() => CanonExpr::Number(canonical_number(&s)),
        other => other,
    }
}

fn canon_func_call(fc: &protobuf::FuncCall) -> CanonExpr {
    // Take the last name element: drops the pg_catalog. qualifier.
    let name = fc
        .funcname
        .iter()
        .rev()
        .find_map(|n| match n.node.as_ref() {
            Some(NodeEnum::String(s)) => Some(s.sval.to_lowercase()),
            _ => None,
        })
        .unwrap_or_default();

    let args: Vec<CanonExpr> = fc.args.iter().map(canon_node).collect();

    match (name.as_str(), args.as_slice()) {
        ("now", []) => CanonExpr::ValueFunc("current_timestamp".to_string()),
        // extract(year from x) and date_part('year', x) are the same call.
        ("extract" | "date_part", [field, arg]) => {
            let field_token = match field {
                CanonExpr::Text(s) => s.to_lowercase(),
                other => format!("{other:?}").to_lowercase(),
            };
            CanonExpr::Extract {
                field: field_token,
                arg: Box::new(arg.clone()),
            }
        }
        _ => CanonExpr::FuncCall { name, args },
    }
}

fn canon_value_func(svf: &protobuf::SqlValueFunction) -> CanonExpr {
    use protobuf::SqlValueFunctionOp::*;
    let token = match svf.op() {
        SvfopCurrentTimestamp | SvfopCurrentTimestampN => "current_timestamp",
        SvfopCurrentDate => "current_date",
        SvfopCurrentTime | SvfopCurrentTimeN => "current_time",
        SvfopLocaltimestamp | SvfopLocaltimestampN => "localtimestamp",
        SvfopLocaltime | SvfopLocaltimeN => "localtime",
        SvfopCurrentRole => "current_role",
        SvfopCurrentUser => "current_user",
        SvfopSessionUser => "session_user",
        SvfopUser => "current_user",
        SvfopCurrentCatalog => "current_catalog",
        SvfopCurrentSchema => "current_schema",
        Undefined => "undefined",
    };
    CanonExpr::ValueFunc(token.to_string())
}

fn operator_text(name: &[protobuf::Node]) -> String {
    name.iter()
        .rev()
        .find_map(|n| match n.node.as_ref() {
            Some(NodeEnum::String(s)) => Some(s.sval.clone()),
            _ => None,
        })
        .unwrap_or_default()
}
