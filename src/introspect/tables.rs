//! Table, column, constraint, and index introspection
//!
//! All queries go straight at `pg_catalog` rather than `information_schema`:
//! the information schema hides operator classes, index expressions, and
//! constraint-backed index identity, all of which the differ needs.

use tokio_postgres::Client;

use super::IntrospectError;
use crate::model::{
    Check, Column, ForeignKey, GeneratedSpec, Index, IndexColumn, IndexMethod, PrimaryKey,
    QualifiedName, ReferentialAction, SchemaModel, SortOrder, Table, Unique,
};

/// Plain relations in the target schemas, minus extension-owned tables
/// (those are managed by their extension, not by us).
pub(super) async fn load_tables(
    client: &Client,
    schemas: &[String],
    model: &mut SchemaModel,
) -> Result<(), IntrospectError> {
    let rows = client
        .query(
            r#"
            SELECT n.nspname AS schema_name, c.relname AS table_name
            FROM pg_class c
            JOIN pg_namespace n ON c.relnamespace = n.oid
            WHERE c.relkind = 'r'
              AND n.nspname = ANY($1)
              AND NOT EXISTS (
                  SELECT 1 FROM pg_depend d
                  WHERE d.objid = c.oid AND d.deptype = 'e'
              )
            ORDER BY n.nspname, c.relname
            "#,
            &[&schemas],
        )
        .await?;

    for row in rows {
        let schema: String = row.get("schema_name");
        let name: String = row.get("table_name");
        model.insert_table(Table::new(QualifiedName::qualified(schema, name)));
    }
    Ok(())
}

pub(super) async fn load_columns(
    client: &Client,
    schemas: &[String],
    model: &mut SchemaModel,
) -> Result<(), IntrospectError> {
    let rows = client
        .query(
            r#"
            SELECT
              n.nspname AS schema_name,
              c.relname AS table_name,
              a.attname AS column_name,
              pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
              a.attnotnull AS not_null,
              pg_catalog.pg_get_expr(ad.adbin, ad.adrelid) AS default_expr,
              a.attgenerated::text AS generated
            FROM pg_attribute a
            JOIN pg_class c ON a.attrelid = c.oid
            JOIN pg_namespace n ON c.relnamespace = n.oid
            LEFT JOIN pg_attrdef ad ON ad.adrelid = a.attrelid AND ad.adnum = a.attnum
            WHERE c.relkind = 'r'
              AND n.nspname = ANY($1)
              AND a.attnum > 0
              AND NOT a.attisdropped
            ORDER BY n.nspname, c.relname, a.attnum
            "#,
            &[&schemas],
        )
        .await?;

    for row in rows {
        let schema: String = row.get("schema_name");
        let table: String = row.get("table_name");
        let key = format!("{schema}.{table}");
        let Some(table) = model.get_table_mut(&key) else {
            continue;
        };

        let not_null: bool = row.get("not_null");
        let default_expr: Option<String> = row.get("default_expr");
        let generated: String = row.get("generated");

        // attgenerated = 's': the "default" expression is actually the
        // generation expression.
        let (default, generated) = if generated == "s" {
            (
                None,
                default_expr.map(|expression| GeneratedSpec {
                    always: true,
                    expression,
                    stored: true,
                }),
            )
        } else {
            (default_expr, None)
        };

        table.columns.push(Column {
            name: row.get("column_name"),
            type_name: row.get("data_type"),
            nullable: !not_null,
            default,
            generated,
        });
    }
    Ok(())
}

pub(super) async fn load_constraints(
    client: &Client,
    schemas: &[String],
    model: &mut SchemaModel,
) -> Result<(), IntrospectError> {
    let rows = client
        .query(
            r#"
            SELECT
              n.nspname AS schema_name,
              cl.relname AS table_name,
              c.conname AS constraint_name,
              c.contype::text AS constraint_type,
              ARRAY(
                  SELECT a.attname
                  FROM pg_attribute a
                  WHERE a.attrelid = c.conrelid AND a.attnum = ANY(c.conkey)
                  ORDER BY array_position(c.conkey, a.attnum)
              ) AS columns,
              fn.nspname AS ref_schema,
              fcl.relname AS ref_table,
              ARRAY(
                  SELECT a.attname
                  FROM pg_attribute a
                  WHERE a.attrelid = c.confrelid AND a.attnum = ANY(c.confkey)
                  ORDER BY array_position(c.confkey, a.attnum)
              ) AS ref_columns,
              c.confdeltype::text AS on_delete,
              c.confupdtype::text AS on_update,
              c.condeferrable AS "deferrable",
              c.condeferred AS initially_deferred,
              CASE WHEN c.contype = 'c'
                   THEN pg_get_expr(c.conbin, c.conrelid)
              END AS check_expr
            FROM pg_constraint c
            JOIN pg_class cl ON c.conrelid = cl.oid
            JOIN pg_namespace n ON cl.relnamespace = n.oid
            LEFT JOIN pg_class fcl ON c.confrelid = fcl.oid
            LEFT JOIN pg_namespace fn ON fcl.relnamespace = fn.oid
            WHERE n.nspname = ANY($1)
              AND c.contype IN ('p', 'f', 'u', 'c')
            ORDER BY n.nspname, cl.relname, c.conname
            "#,
            &[&schemas],
        )
        .await?;

    for row in rows {
        let schema: String = row.get("schema_name");
        let table: String = row.get("table_name");
        let key = format!("{schema}.{table}");
        let Some(table) = model.get_table_mut(&key) else {
            continue;
        };

        let name: String = row.get("constraint_name");
        let contype: String = row.get("constraint_type");
        let columns: Vec<String> = row.get("columns");

        match contype.as_str() {
            "p" => {
                table.primary_key = Some(PrimaryKey {
                    name: Some(name),
                    columns,
                });
            }
            "u" => {
                table.uniques.push(Unique {
                    name: Some(name),
                    columns,
                    deferrable: row.get("deferrable"),
                    initially_deferred: row.get("initially_deferred"),
                });
            }
            "c" => {
                let expression: Option<String> = row.get("check_expr");
                table.checks.push(Check {
                    name: Some(name),
                    expression: expression.unwrap_or_default(),
                });
            }
            "f" => {
                let ref_schema: Option<String> = row.get("ref_schema");
                let ref_table: Option<String> = row.get("ref_table");
                let (Some(ref_schema), Some(ref_table)) = (ref_schema, ref_table) else {
                    continue;
                };
                table.foreign_keys.push(ForeignKey {
                    name: Some(name),
                    columns,
                    ref_table: QualifiedName::qualified(ref_schema, ref_table),
                    ref_columns: row.get("ref_columns"),
                    on_delete: action_code(row.get("on_delete")),
                    on_update: action_code(row.get("on_update")),
                    deferrable: row.get("deferrable"),
                    initially_deferred: row.get("initially_deferred"),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

fn action_code(code: String) -> ReferentialAction {
    match code.as_str() {
        "r" => ReferentialAction::Restrict,
        "c" => ReferentialAction::Cascade,
        "n" => ReferentialAction::SetNull,
        "d" => ReferentialAction::SetDefault,
        _ => ReferentialAction::NoAction,
    }
}

pub(super) async fn load_indexes(
    client: &Client,
    schemas: &[String],
    model: &mut SchemaModel,
) -> Result<(), IntrospectError> {
    let rows = client
        .query(
            r#"
            SELECT
              n.nspname AS schema_name,
              t.relname AS table_name,
              ic.relname AS index_name,
              am.amname AS method,
              ix.indisunique AS is_unique,
              pg_get_expr(ix.indpred, ix.indrelid, true) AS predicate,
              con.conname AS backing_constraint,
              ts.spcname AS tablespace,
              ic.reloptions AS storage_params
            FROM pg_index ix
            JOIN pg_class ic ON ic.oid = ix.indexrelid
            JOIN pg_class t ON t.oid = ix.indrelid
            JOIN pg_namespace n ON t.relnamespace = n.oid
            JOIN pg_am am ON ic.relam = am.oid
            LEFT JOIN pg_constraint con
              ON con.conindid = ix.indexrelid AND con.contype IN ('p', 'u', 'x')
            LEFT JOIN pg_tablespace ts ON ic.reltablespace = ts.oid
            WHERE n.nspname = ANY($1)
              AND t.relkind = 'r'
            ORDER BY n.nspname, t.relname, ic.relname
            "#,
            &[&schemas],
        )
        .await?;

    for row in rows {
        let schema: String = row.get("schema_name");
        let table_name: String = row.get("table_name");
        let key = format!("{schema}.{table_name}");
        if !model.has_table(&key) {
            continue;
        }

        let index_name: String = row.get("index_name");
        let method: String = row.get("method");
        let method = match method.parse::<IndexMethod>() {
            Ok(m) => m,
            // Indexes with access methods outside the supported set are
            // invisible to the differ rather than churned.
            Err(_) => continue,
        };

        let mut index = Index::new(
            index_name.clone(),
            QualifiedName::qualified(schema.clone(), table_name.clone()),
        );
        index.method = method;
        index.unique = row.get("is_unique");
        index.predicate = row.get("predicate");
        index.backing_constraint = row.get("backing_constraint");
        index.tablespace = row.get("tablespace");

        let storage: Option<Vec<String>> = row.get("storage_params");
        for entry in storage.unwrap_or_default() {
            if let Some((k, v)) = entry.split_once('=') {
                index.storage_params.insert(k.to_string(), v.to_string());
            }
        }

        load_index_elements(client, &schema, &index_name, &mut index).await?;

        if let Some(table) = model.get_table_mut(&key) {
            table.indexes.push(index);
        }
    }
    Ok(())
}

/// Per-element detail for one index: column name or expression, non-default
/// operator class, descending flag.
async fn load_index_elements(
    client: &Client,
    schema: &str,
    index_name: &str,
    index: &mut Index,
) -> Result<(), IntrospectError> {
    let rows = client
        .query(
            r#"
            SELECT
              a.attname AS column_name,
              pg_get_indexdef(ix.indexrelid, k.i, true) AS element,
              opc.opcname AS opclass,
              COALESCE(opc.opcdefault, true) AS opclass_default,
              (ix.indoption[k.i - 1] & 1) <> 0 AS is_desc,
              k.i <= ix.indnkeyatts AS is_key
            FROM pg_index ix
            JOIN pg_class ic ON ic.oid = ix.indexrelid
            JOIN pg_namespace n ON ic.relnamespace = n.oid
            CROSS JOIN LATERAL generate_series(1, ix.indnatts) AS k(i)
            LEFT JOIN pg_attribute a
              ON a.attrelid = ix.indrelid AND a.attnum = ix.indkey[k.i - 1]
            LEFT JOIN pg_opclass opc ON opc.oid = ix.indclass[k.i - 1]
            WHERE n.nspname = $1 AND ic.relname = $2
            ORDER BY k.i
            "#,
            &[&schema, &index_name],
        )
        .await?;

    let mut expressions = Vec::new();
    for row in rows {
        let is_key: bool = row.get("is_key");
        if !is_key {
            // INCLUDE columns; not part of the key.
            continue;
        }
        let column_name: Option<String> = row.get("column_name");
        match column_name {
            Some(name) => {
                let opclass_default: bool = row.get("opclass_default");
                let is_desc: bool = row.get("is_desc");
                index.columns.push(IndexColumn {
                    name,
                    opclass: if opclass_default {
                        None
                    } else {
                        row.get("opclass")
                    },
                    order: if is_desc { SortOrder::Desc } else { SortOrder::Asc },
                });
            }
            None => {
                let element: Option<String> = row.get("element");
                if let Some(e) = element {
                    expressions.push(e);
                }
            }
        }
    }
    if !expressions.is_empty() {
        index.expression = Some(expressions.join(", "));
    }
    Ok(())
}
