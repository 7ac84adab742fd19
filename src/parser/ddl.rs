//! pg_query AST to Schema Model conversion
//!
//! Converts a multi-statement DDL source into the Desired Schema Model. The
//! parser is tolerant: statement kinds with no model mapping are skipped with
//! a warning, and a per-statement parse failure never aborts the batch (the
//! source is re-split with the scanner and each chunk parsed on its own).
//!
//! Identifier and expression text is preserved verbatim (via deparse); the
//! differ's normalizers are applied to both sides at comparison time, never
//! here.

use pg_query::NodeEnum;
use pg_query::protobuf::{self, ConstrType};
use tracing::{debug, warn};

use crate::model::{
    ArgMode, Check, CheckOption, Column, Comment, CommentTarget, EnumType, Extension, ForeignKey,
    Function, FunctionArg, GeneratedSpec, Index, IndexColumn, IndexMethod, PrimaryKey,
    QualifiedName, ReferentialAction, SchemaDefinition, SchemaModel, Sequence, SortOrder, Table,
    Unique, View, Volatility,
};

#[cfg(test)]
mod tests;

/// Parse a DDL source string into a Desired Schema Model.
///
/// Unqualified names are assigned `default_schema`. Unknown statement kinds
/// and unparseable statements are skipped with a warning.
pub fn parse_ddl(source: &str, default_schema: &str) -> SchemaModel {
    let mut model = SchemaModel::new();

    match pg_query::parse(source) {
        Ok(result) => {
            for raw_stmt in &result.protobuf.stmts {
                let raw_sql = statement_text(source, raw_stmt);
                if let Some(node) = raw_stmt.stmt.as_ref().and_then(|s| s.node.as_ref()) {
                    apply_statement(&mut model, node, default_schema, raw_sql);
                }
            }
        }
        Err(_) => {
            // One malformed statement fails the whole-batch parse. Re-split
            // with the scanner and parse each statement independently so the
            // rest of the batch survives.
            let chunks = pg_query::split_with_scanner(source).unwrap_or_default();
            for chunk in chunks {
                let chunk = chunk.trim();
                if chunk.is_empty() {
                    continue;
                }
                match pg_query::parse(chunk) {
                    Ok(result) => {
                        for raw_stmt in &result.protobuf.stmts {
                            if let Some(node) =
                                raw_stmt.stmt.as_ref().and_then(|s| s.node.as_ref())
                            {
                                apply_statement(&mut model, node, default_schema, chunk);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            statement = first_line(chunk),
                            error = %e,
                            "skipping unparseable statement"
                        );
                    }
                }
            }
        }
    }

    model
}

/// Slice the original source for one statement, for log context.
fn statement_text<'a>(source: &'a str, raw: &protobuf::RawStmt) -> &'a str {
    let start = raw.stmt_location as usize;
    let end = if raw.stmt_len > 0 {
        start + raw.stmt_len as usize
    } else {
        source.len()
    };
    source.get(start..end).unwrap_or("").trim()
}

fn first_line(sql: &str) -> &str {
    sql.lines().next().unwrap_or("")
}

fn apply_statement(model: &mut SchemaModel, node: &NodeEnum, default_schema: &str, raw_sql: &str) {
    match node {
        NodeEnum::CreateStmt(create) => apply_create_table(model, create, default_schema),
        NodeEnum::IndexStmt(idx) => apply_create_index(model, idx, default_schema),
        NodeEnum::CreateEnumStmt(e) => apply_create_enum(model, e, default_schema),
        NodeEnum::ViewStmt(v) => apply_create_view(model, v, default_schema),
        NodeEnum::CreateTableAsStmt(ctas) => apply_create_matview(model, ctas, default_schema),
        NodeEnum::CreateFunctionStmt(f) => apply_create_function(model, f, default_schema),
        NodeEnum::CreateSeqStmt(s) => apply_create_sequence(model, s, default_schema),
        NodeEnum::CreateExtensionStmt(e) => apply_create_extension(model, e),
        NodeEnum::CreateSchemaStmt(s) => apply_create_schema(model, s),
        NodeEnum::CommentStmt(c) => apply_comment(model, c, default_schema),
        NodeEnum::CreateTrigStmt(_) => {
            // Triggers follow their function (functions are replaced with
            // DROP ... CASCADE); they are not a managed entity.
            debug!(statement = first_line(raw_sql), "trigger definitions are not managed");
        }
        _ => {
            warn!(
                statement = first_line(raw_sql),
                "skipping statement with no schema-model mapping"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// CREATE TABLE
// ---------------------------------------------------------------------------

fn apply_create_table(
    model: &mut SchemaModel,
    create: &protobuf::CreateStmt,
    default_schema: &str,
) {
    let mut name = relation_name(create.relation.as_ref());
    name.set_default_schema(default_schema);
    let table_name = name.name.clone();
    let mut table = Table::new(name);

    for elt in &create.table_elts {
        match elt.node.as_ref() {
            Some(NodeEnum::ColumnDef(col)) => {
                convert_column_def(&mut table, &table_name, col, default_schema);
            }
            Some(NodeEnum::Constraint(con)) => {
                apply_table_constraint(&mut table, con, default_schema);
            }
            _ => {}
        }
    }

    model.insert_table(table);
}

/// Convert a column definition, promoting inline constraints (PRIMARY KEY,
/// UNIQUE, CHECK, REFERENCES) to table-level constraints.
fn convert_column_def(
    table: &mut Table,
    table_name: &str,
    col: &protobuf::ColumnDef,
    default_schema: &str,
) {
    let col_name = col.colname.clone();
    let (type_text, is_serial) = type_name_text(col.type_name.as_ref());

    let mut column = Column {
        name: col_name.clone(),
        type_name: type_text,
        nullable: true,
        default: None,
        generated: None,
    };

    // serial expands to its storage type, NOT NULL, and the conventional
    // <table>_<column>_seq sequence default, matching what the column
    // introspects back as. The raw parser does not perform this expansion.
    if is_serial {
        column.nullable = false;
        column.default = Some(format!("nextval('{table_name}_{col_name}_seq'::regclass)"));
    }

    // Track what the last pushed FK/unique was, so trailing DEFERRABLE
    // attribute nodes can be applied to it.
    enum LastConstraint {
        None,
        Fk,
        Unique,
    }
    let mut last = LastConstraint::None;

    for con_node in &col.constraints {
        let con = match con_node.node.as_ref() {
            Some(NodeEnum::Constraint(c)) => c,
            _ => continue,
        };

        match con.contype() {
            ConstrType::ConstrNotnull => column.nullable = false,
            ConstrType::ConstrNull => column.nullable = true,
            ConstrType::ConstrDefault => {
                if let Some(ref expr) = con.raw_expr {
                    column.default = Some(deparse_node(expr));
                }
            }
            ConstrType::ConstrGenerated => {
                if let Some(ref expr) = con.raw_expr {
                    column.generated = Some(GeneratedSpec {
                        always: con.generated_when == "a",
                        expression: deparse_node(expr),
                        stored: true,
                    });
                    // A generated column never also has a default.
                    column.default = None;
                }
            }
            ConstrType::ConstrPrimary => {
                column.nullable = false;
                table.primary_key = Some(PrimaryKey {
                    name: optional_name(&con.conname),
                    columns: vec![col_name.clone()],
                });
            }
            ConstrType::ConstrUnique => {
                table.uniques.push(Unique {
                    name: optional_name(&con.conname),
                    columns: vec![col_name.clone()],
                    deferrable: con.deferrable,
                    initially_deferred: con.initdeferred,
                });
                last = LastConstraint::Unique;
            }
            ConstrType::ConstrCheck => {
                table.checks.push(Check {
                    name: optional_name(&con.conname),
                    expression: con
                        .raw_expr
                        .as_ref()
                        .map(|e| deparse_node(e))
                        .unwrap_or_default(),
                });
            }
            ConstrType::ConstrForeign => {
                let mut ref_table = relation_name(con.pktable.as_ref());
                ref_table.set_default_schema(default_schema);
                table.foreign_keys.push(ForeignKey {
                    name: optional_name(&con.conname),
                    columns: vec![col_name.clone()],
                    ref_table,
                    ref_columns: string_list(&con.pk_attrs),
                    on_delete: referential_action(&con.fk_del_action),
                    on_update: referential_action(&con.fk_upd_action),
                    deferrable: con.deferrable,
                    initially_deferred: con.initdeferred,
                });
                last = LastConstraint::Fk;
            }
            // Trailing DEFERRABLE / INITIALLY DEFERRED attach to the
            // preceding inline constraint.
            ConstrType::ConstrAttrDeferrable => match last {
                LastConstraint::Fk => {
                    if let Some(fk) = table.foreign_keys.last_mut() {
                        fk.deferrable = true;
                    }
                }
                LastConstraint::Unique => {
                    if let Some(u) = table.uniques.last_mut() {
                        u.deferrable = true;
                    }
                }
                LastConstraint::None => {}
            },
            ConstrType::ConstrAttrDeferred => match last {
                LastConstraint::Fk => {
                    if let Some(fk) = table.foreign_keys.last_mut() {
                        fk.initially_deferred = true;
                    }
                }
                LastConstraint::Unique => {
                    if let Some(u) = table.uniques.last_mut() {
                        u.initially_deferred = true;
                    }
                }
                LastConstraint::None => {}
            },
            _ => {}
        }
    }

    table.columns.push(column);
}

fn apply_table_constraint(table: &mut Table, con: &protobuf::Constraint, default_schema: &str) {
    match con.contype() {
        ConstrType::ConstrPrimary => {
            let columns = string_list(&con.keys);
            for col_name in &columns {
                if let Some(col) = table.columns.iter_mut().find(|c| &c.name == col_name) {
                    col.nullable = false;
                }
            }
            table.primary_key = Some(PrimaryKey {
                name: optional_name(&con.conname),
                columns,
            });
        }
        ConstrType::ConstrUnique => {
            table.uniques.push(Unique {
                name: optional_name(&con.conname),
                columns: string_list(&con.keys),
                deferrable: con.deferrable,
                initially_deferred: con.initdeferred,
            });
        }
        ConstrType::ConstrCheck => {
            table.checks.push(Check {
                name: optional_name(&con.conname),
                expression: con
                    .raw_expr
                    .as_ref()
                    .map(|e| deparse_node(e))
                    .unwrap_or_default(),
            });
        }
        ConstrType::ConstrForeign => {
            let mut ref_table = relation_name(con.pktable.as_ref());
            ref_table.set_default_schema(default_schema);
            table.foreign_keys.push(ForeignKey {
                name: optional_name(&con.conname),
                columns: string_list(&con.fk_attrs),
                ref_table,
                ref_columns: string_list(&con.pk_attrs),
                on_delete: referential_action(&con.fk_del_action),
                on_update: referential_action(&con.fk_upd_action),
                deferrable: con.deferrable,
                initially_deferred: con.initdeferred,
            });
        }
        _ => {}
    }
}

/// Map a pg_query FK action code to the model action.
fn referential_action(code: &str) -> ReferentialAction {
    match code {
        "r" => ReferentialAction::Restrict,
        "c" => ReferentialAction::Cascade,
        "n" => ReferentialAction::SetNull,
        "d" => ReferentialAction::SetDefault,
        _ => ReferentialAction::NoAction,
    }
}

// ---------------------------------------------------------------------------
// CREATE INDEX
// ---------------------------------------------------------------------------

fn apply_create_index(model: &mut SchemaModel, idx: &protobuf::IndexStmt, default_schema: &str) {
    let mut table_name = relation_name(idx.relation.as_ref());
    table_name.set_default_schema(default_schema);

    if idx.idxname.is_empty() {
        warn!(
            table = %table_name,
            "skipping unnamed CREATE INDEX (the engine manages indexes by name)"
        );
        return;
    }

    let mut index = Index::new(idx.idxname.clone(), table_name.clone());
    index.unique = idx.unique;
    index.concurrent = idx.concurrent;

    if !idx.access_method.is_empty() {
        match idx.access_method.parse::<IndexMethod>() {
            Ok(method) => index.method = method,
            Err(_) => {
                warn!(
                    index = %idx.idxname,
                    method = %idx.access_method,
                    "skipping index with unsupported access method"
                );
                return;
            }
        }
    }

    let mut expressions = Vec::new();
    for param in &idx.index_params {
        let elem = match param.node.as_ref() {
            Some(NodeEnum::IndexElem(e)) => e,
            _ => continue,
        };
        if !elem.name.is_empty() {
            index.columns.push(IndexColumn {
                name: elem.name.clone(),
                opclass: elem.opclass.iter().rev().find_map(|n| match n.node.as_ref() {
                    Some(NodeEnum::String(s)) => Some(s.sval.clone()),
                    _ => None,
                }),
                order: match elem.ordering() {
                    protobuf::SortByDir::SortbyDesc => SortOrder::Desc,
                    _ => SortOrder::Asc,
                },
            });
        } else if let Some(ref expr) = elem.expr {
            expressions.push(deparse_node(expr));
        }
    }
    if !expressions.is_empty() {
        index.expression = Some(expressions.join(", "));
    }

    index.predicate = idx.where_clause.as_ref().map(|w| deparse_node(w));

    for opt in &idx.options {
        if let Some(NodeEnum::DefElem(de)) = opt.node.as_ref()
            && let Some(value) = defelem_text(de)
        {
            index.storage_params.insert(de.defname.clone(), value);
        }
    }

    if !idx.table_space.is_empty() {
        index.tablespace = Some(idx.table_space.clone());
    }

    let key = table_name.key();
    match model.get_table_mut(&key) {
        Some(table) => table.indexes.push(index),
        None => warn!(
            index = %idx.idxname,
            table = %table_name,
            "skipping index on a table not defined in the desired DDL"
        ),
    }
}

// ---------------------------------------------------------------------------
// CREATE TYPE ... AS ENUM
// ---------------------------------------------------------------------------

fn apply_create_enum(
    model: &mut SchemaModel,
    e: &protobuf::CreateEnumStmt,
    default_schema: &str,
) {
    let mut name = names_to_qualified(&e.type_name);
    name.set_default_schema(default_schema);
    model.insert_enum(EnumType {
        name,
        values: string_list(&e.vals),
    });
}

// ---------------------------------------------------------------------------
// CREATE [MATERIALIZED] VIEW
// ---------------------------------------------------------------------------

fn apply_create_view(model: &mut SchemaModel, v: &protobuf::ViewStmt, default_schema: &str) {
    let mut name = relation_name(v.view.as_ref());
    name.set_default_schema(default_schema);

    let query = match v.query.as_deref().and_then(deparse_statement) {
        Some(q) => q,
        None => {
            warn!(view = %name, "skipping view whose query could not be deparsed");
            return;
        }
    };

    let check_option = match v.with_check_option() {
        protobuf::ViewCheckOption::LocalCheckOption => Some(CheckOption::Local),
        protobuf::ViewCheckOption::CascadedCheckOption => Some(CheckOption::Cascaded),
        _ => None,
    };

    let mut security_barrier = false;
    for opt in &v.options {
        if let Some(NodeEnum::DefElem(de)) = opt.node.as_ref()
            && de.defname == "security_barrier"
        {
            security_barrier = defelem_bool(de);
        }
    }

    model.insert_view(View {
        name,
        query,
        materialized: false,
        check_option,
        security_barrier,
    });
}

fn apply_create_matview(
    model: &mut SchemaModel,
    ctas: &protobuf::CreateTableAsStmt,
    default_schema: &str,
) {
    if ctas.objtype() != protobuf::ObjectType::ObjectMatview {
        // CREATE TABLE AS is data definition *and* data load; not declarative.
        warn!("skipping CREATE TABLE AS (not a managed statement)");
        return;
    }
    let rel = ctas.into.as_ref().and_then(|i| i.rel.as_ref());
    let mut name = relation_name(rel);
    name.set_default_schema(default_schema);

    let query = match ctas.query.as_deref().and_then(deparse_statement) {
        Some(q) => q,
        None => {
            warn!(view = %name, "skipping materialized view whose query could not be deparsed");
            return;
        }
    };

    model.insert_view(View {
        name,
        query,
        materialized: true,
        check_option: None,
        security_barrier: false,
    });
}

// ---------------------------------------------------------------------------
// CREATE FUNCTION / PROCEDURE
// ---------------------------------------------------------------------------

fn apply_create_function(
    model: &mut SchemaModel,
    f: &protobuf::CreateFunctionStmt,
    default_schema: &str,
) {
    let mut name = names_to_qualified(&f.funcname);
    name.set_default_schema(default_schema);

    let mut args = Vec::new();
    for p in &f.parameters {
        let param = match p.node.as_ref() {
            Some(NodeEnum::FunctionParameter(fp)) => fp,
            _ => continue,
        };
        let mode = match param.mode() {
            protobuf::FunctionParameterMode::FuncParamOut => ArgMode::Out,
            protobuf::FunctionParameterMode::FuncParamInout => ArgMode::InOut,
            protobuf::FunctionParameterMode::FuncParamVariadic => ArgMode::Variadic,
            _ => ArgMode::In,
        };
        args.push(FunctionArg {
            name: optional_name(&param.name),
            mode,
            type_name: type_name_text(param.arg_type.as_ref()).0,
            default: param.defexpr.as_ref().map(|e| deparse_node(e)),
        });
    }

    let returns = f
        .return_type
        .as_ref()
        .map(|t| type_name_text(Some(t)).0)
        .filter(|_| !f.is_procedure);

    let mut language = "sql".to_string();
    let mut body = String::new();
    let mut volatility = None;
    let mut parallel = None;
    let mut security_definer = false;
    let mut strict = false;
    let mut cost = None;
    let mut rows = None;

    for opt in &f.options {
        let de = match opt.node.as_ref() {
            Some(NodeEnum::DefElem(d)) => d,
            _ => continue,
        };
        match de.defname.as_str() {
            "language" => {
                if let Some(v) = defelem_text(de) {
                    language = v;
                }
            }
            "as" => {
                if let Some(NodeEnum::List(list)) = de.arg.as_ref().and_then(|a| a.node.as_ref()) {
                    body = list
                        .items
                        .iter()
                        .filter_map(|n| match n.node.as_ref() {
                            Some(NodeEnum::String(s)) => Some(s.sval.clone()),
                            _ => None,
                        })
                        .collect::<Vec<_>>()
                        .join("\n");
                }
            }
            "volatility" => {
                volatility = match defelem_text(de).as_deref() {
                    Some("immutable") => Some(Volatility::Immutable),
                    Some("stable") => Some(Volatility::Stable),
                    Some("volatile") => Some(Volatility::Volatile),
                    _ => None,
                };
            }
            "parallel" => parallel = defelem_text(de),
            "security" => security_definer = defelem_bool(de),
            "strict" => strict = defelem_bool(de),
            "cost" => cost = defelem_number(de),
            "rows" => rows = defelem_number(de),
            _ => {}
        }
    }

    model.insert_function(Function {
        name,
        args,
        returns,
        language,
        body,
        is_procedure: f.is_procedure,
        volatility,
        parallel,
        security_definer,
        strict,
        cost,
        rows,
    });
}

// ---------------------------------------------------------------------------
// CREATE SEQUENCE
// ---------------------------------------------------------------------------

fn apply_create_sequence(
    model: &mut SchemaModel,
    s: &protobuf::CreateSeqStmt,
    default_schema: &str,
) {
    let mut name = relation_name(s.sequence.as_ref());
    name.set_default_schema(default_schema);
    let mut seq = Sequence::new(name);

    for opt in &s.options {
        let de = match opt.node.as_ref() {
            Some(NodeEnum::DefElem(d)) => d,
            _ => continue,
        };
        match de.defname.as_str() {
            "as" => {
                if let Some(NodeEnum::TypeName(tn)) = de.arg.as_ref().and_then(|a| a.node.as_ref())
                {
                    seq.data_type = Some(type_name_text(Some(tn)).0);
                }
            }
            "increment" => seq.increment = defelem_i64(de).unwrap_or(1),
            "minvalue" => seq.min_value = defelem_i64(de),
            "maxvalue" => seq.max_value = defelem_i64(de),
            "start" => seq.start = defelem_i64(de),
            "cache" => seq.cache = defelem_i64(de).unwrap_or(1),
            "cycle" => seq.cycle = defelem_bool(de),
            "owned_by" => {
                let parts = match de.arg.as_ref().and_then(|a| a.node.as_ref()) {
                    Some(NodeEnum::List(list)) => list
                        .items
                        .iter()
                        .filter_map(|n| match n.node.as_ref() {
                            Some(NodeEnum::String(s)) => Some(s.sval.clone()),
                            _ => None,
                        })
                        .collect::<Vec<_>>(),
                    _ => vec![],
                };
                // OWNED BY NONE arrives as a single "none" element.
                seq.owned_by = match parts.as_slice() {
                    [table, column] => {
                        Some((format!("{default_schema}.{table}"), column.clone()))
                    }
                    [schema, table, column] => {
                        Some((format!("{schema}.{table}"), column.clone()))
                    }
                    _ => None,
                };
            }
            _ => {}
        }
    }

    model.insert_sequence(seq);
}

// ---------------------------------------------------------------------------
// CREATE EXTENSION / SCHEMA / COMMENT ON
// ---------------------------------------------------------------------------

fn apply_create_extension(model: &mut SchemaModel, e: &protobuf::CreateExtensionStmt) {
    let mut version = None;
    let mut schema = None;
    for opt in &e.options {
        if let Some(NodeEnum::DefElem(de)) = opt.node.as_ref() {
            match de.defname.as_str() {
                "new_version" => version = defelem_text(de),
                "schema" => schema = defelem_text(de),
                _ => {}
            }
        }
    }
    model.insert_extension(Extension {
        name: e.extname.clone(),
        version,
        schema,
    });
}

fn apply_create_schema(model: &mut SchemaModel, s: &protobuf::CreateSchemaStmt) {
    if s.schemaname.is_empty() {
        return;
    }
    model.insert_schema(SchemaDefinition {
        name: s.schemaname.clone(),
    });
}

fn apply_comment(model: &mut SchemaModel, c: &protobuf::CommentStmt, default_schema: &str) {
    let names = match c.object.as_ref().and_then(|o| o.node.as_ref()) {
        Some(NodeEnum::List(list)) => string_list(&list.items),
        _ => return,
    };

    let target = match c.objtype() {
        protobuf::ObjectType::ObjectTable => {
            let mut name = match names.as_slice() {
                [table] => QualifiedName::unqualified(table.clone()),
                [schema, table] => QualifiedName::qualified(schema.clone(), table.clone()),
                _ => return,
            };
            name.set_default_schema(default_schema);
            CommentTarget::Table(name)
        }
        protobuf::ObjectType::ObjectColumn => {
            let (mut table, column) = match names.as_slice() {
                [table, column] => (QualifiedName::unqualified(table.clone()), column.clone()),
                [schema, table, column] => (
                    QualifiedName::qualified(schema.clone(), table.clone()),
                    column.clone(),
                ),
                _ => return,
            };
            table.set_default_schema(default_schema);
            CommentTarget::Column(table, column)
        }
        _ => {
            debug!("COMMENT ON for this object kind is not managed");
            return;
        }
    };

    model.insert_comment(Comment {
        target,
        text: if c.comment.is_empty() {
            None
        } else {
            Some(c.comment.clone())
        },
    });
}

// ---------------------------------------------------------------------------
// Shared extraction helpers
// ---------------------------------------------------------------------------

/// Convert a `RangeVar` into a [`QualifiedName`].
fn relation_name(rv: Option<&protobuf::RangeVar>) -> QualifiedName {
    match rv {
        Some(r) if !r.schemaname.is_empty() => {
            QualifiedName::qualified(r.schemaname.clone(), r.relname.clone())
        }
        Some(r) => QualifiedName::unqualified(r.relname.clone()),
        None => QualifiedName::unqualified(""),
    }
}

/// Convert a dotted name list (`funcname`, `type_name`) into a
/// [`QualifiedName`].
fn names_to_qualified(names: &[protobuf::Node]) -> QualifiedName {
    let parts = string_list(names);
    match parts.as_slice() {
        [name] => QualifiedName::unqualified(name.clone()),
        [schema, name] => QualifiedName::qualified(schema.clone(), name.clone()),
        _ => QualifiedName::unqualified(parts.last().cloned().unwrap_or_default()),
    }
}

fn optional_name(name: &str) -> Option<String> {
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn string_list(nodes: &[protobuf::Node]) -> Vec<String> {
    nodes
        .iter()
        .filter_map(|n| match n.node.as_ref() {
            Some(NodeEnum::String(s)) => Some(s.sval.clone()),
            _ => None,
        })
        .collect()
}

/// Render a `TypeName` back to SQL-ish text. Returns `(text, is_serial)`;
/// serial types are rewritten to their storage integer type.
///
/// The `pg_catalog.` qualifier is dropped (it also normalizes
/// parser-internal aliases); user-defined type names keep their schema
/// qualifier, matching how `format_type` reports them back.
fn type_name_text(tn: Option<&protobuf::TypeName>) -> (String, bool) {
    let tn = match tn {
        Some(t) => t,
        None => return ("unknown".to_string(), false),
    };

    let parts: Vec<String> = string_list(&tn.names)
        .into_iter()
        .filter(|p| p != "pg_catalog")
        .collect();
    let base = if parts.is_empty() {
        "unknown".to_string()
    } else {
        parts.join(".")
    };

    let is_serial = matches!(base.as_str(), "smallserial" | "serial" | "bigserial");
    let mut text = match base.as_str() {
        "smallserial" => "int2".to_string(),
        "serial" => "int4".to_string(),
        "bigserial" => "int8".to_string(),
        other => other.to_string(),
    };

    let mods: Vec<String> = tn
        .typmods
        .iter()
        .filter_map(|node| match node.node.as_ref() {
            Some(NodeEnum::Integer(i)) => Some(i.ival.to_string()),
            Some(NodeEnum::AConst(ac)) => match &ac.val {
                Some(protobuf::a_const::Val::Ival(i)) => Some(i.ival.to_string()),
                _ => None,
            },
            _ => None,
        })
        .collect();
    if !mods.is_empty() {
        text.push_str(&format!("({})", mods.join(",")));
    }

    for _ in &tn.array_bounds {
        text.push_str("[]");
    }

    (text, is_serial)
}

fn defelem_text(de: &protobuf::DefElem) -> Option<String> {
    match de.arg.as_ref()?.node.as_ref()? {
        NodeEnum::String(s) => Some(s.sval.clone()),
        NodeEnum::Integer(i) => Some(i.ival.to_string()),
        NodeEnum::Float(f) => Some(f.fval.clone()),
        NodeEnum::Boolean(b) => Some(b.boolval.to_string()),
        NodeEnum::TypeName(tn) => Some(type_name_text(Some(tn)).0),
        _ => None,
    }
}

fn defelem_bool(de: &protobuf::DefElem) -> bool {
    match de.arg.as_ref().and_then(|a| a.node.as_ref()) {
        Some(NodeEnum::Boolean(b)) => b.boolval,
        Some(NodeEnum::Integer(i)) => i.ival != 0,
        Some(NodeEnum::String(s)) => matches!(s.sval.as_str(), "true" | "on" | "yes" | "1"),
        // A bare flag (e.g. CYCLE) parses as a DefElem with no argument.
        None => true,
        _ => false,
    }
}

fn defelem_i64(de: &protobuf::DefElem) -> Option<i64> {
    match de.arg.as_ref()?.node.as_ref()? {
        NodeEnum::Integer(i) => Some(i.ival as i64),
        NodeEnum::Float(f) => f.fval.parse().ok(),
        NodeEnum::String(s) => s.sval.parse().ok(),
        _ => None,
    }
}

fn defelem_number(de: &protobuf::DefElem) -> Option<f64> {
    match de.arg.as_ref()?.node.as_ref()? {
        NodeEnum::Integer(i) => Some(i.ival as f64),
        NodeEnum::Float(f) => f.fval.parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Deparsing
// ---------------------------------------------------------------------------

/// Deparse a single expression node back to SQL text.
///
/// pg_query can only deparse full parse trees, so the node is spliced into
/// the target list of a trivial `SELECT` and the prefix stripped afterwards.
pub(crate) fn deparse_node(node: &protobuf::Node) -> String {
    let mut parse_result = match pg_query::parse("SELECT NULL") {
        Ok(pr) => pr,
        Err(_) => return format!("{:?}", node.node),
    };

    if let Some(stmt) = parse_result.protobuf.stmts.first_mut()
        && let Some(ref mut stmt_node) = stmt.stmt
        && let Some(NodeEnum::SelectStmt(ref mut select)) = stmt_node.node
        && let Some(first_target) = select.target_list.first_mut()
        && let Some(NodeEnum::ResTarget(ref mut res)) = first_target.node
    {
        res.val = Some(Box::new(node.clone()));
    }

    match pg_query::deparse(&parse_result.protobuf) {
        Ok(sql) => sql.strip_prefix("SELECT ").unwrap_or(&sql).to_string(),
        Err(_) => format!("{:?}", node.node),
    }
}

/// Deparse a whole statement node (used for view queries).
fn deparse_statement(node: &protobuf::Node) -> Option<String> {
    let mut parse_result = pg_query::parse("SELECT NULL").ok()?;
    let stmt = parse_result.protobuf.stmts.first_mut()?;
    stmt.stmt = Some(Box::new(node.clone()));
    pg_query::deparse(&parse_result.protobuf).ok()
}
