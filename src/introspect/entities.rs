//! Enum, view, function, sequence, extension, schema, and comment
//! introspection.

use tokio_postgres::Client;

use super::IntrospectError;
use crate::model::{
    ArgMode, CheckOption, Comment, CommentTarget, EnumType, Extension, Function, FunctionArg,
    QualifiedName, SchemaDefinition, SchemaModel, Sequence, View, Volatility,
};

pub(super) async fn load_enums(
    client: &Client,
    schemas: &[String],
    model: &mut SchemaModel,
) -> Result<(), IntrospectError> {
    let rows = client
        .query(
            r#"
            SELECT n.nspname AS schema_name, t.typname AS type_name, e.enumlabel AS label
            FROM pg_type t
            JOIN pg_enum e ON e.enumtypid = t.oid
            JOIN pg_namespace n ON t.typnamespace = n.oid
            WHERE n.nspname = ANY($1)
            ORDER BY n.nspname, t.typname, e.enumsortorder
            "#,
            &[&schemas],
        )
        .await?;

    for row in rows {
        let schema: String = row.get("schema_name");
        let name: String = row.get("type_name");
        let label: String = row.get("label");
        let qualified = QualifiedName::qualified(schema, name);
        let key = qualified.key();
        model
            .enums
            .entry(key)
            .or_insert_with(|| EnumType {
                name: qualified,
                values: Vec::new(),
            })
            .values
            .push(label);
    }
    Ok(())
}

pub(super) async fn load_views(
    client: &Client,
    schemas: &[String],
    model: &mut SchemaModel,
) -> Result<(), IntrospectError> {
    let rows = client
        .query(
            r#"
            SELECT
              n.nspname AS schema_name,
              c.relname AS view_name,
              pg_get_viewdef(c.oid, true) AS definition,
              c.relkind = 'm' AS materialized,
              c.reloptions AS options
            FROM pg_class c
            JOIN pg_namespace n ON c.relnamespace = n.oid
            WHERE c.relkind IN ('v', 'm')
              AND n.nspname = ANY($1)
            ORDER BY n.nspname, c.relname
            "#,
            &[&schemas],
        )
        .await?;

    for row in rows {
        let schema: String = row.get("schema_name");
        let name: String = row.get("view_name");
        let definition: String = row.get("definition");
        let options: Option<Vec<String>> = row.get("options");

        let mut check_option = None;
        let mut security_barrier = false;
        for opt in options.unwrap_or_default() {
            match opt.split_once('=') {
                Some(("check_option", "local")) => check_option = Some(CheckOption::Local),
                Some(("check_option", "cascaded")) => check_option = Some(CheckOption::Cascaded),
                Some(("security_barrier", v)) => security_barrier = v == "true" || v == "on",
                _ => {}
            }
        }

        model.insert_view(View {
            name: QualifiedName::qualified(schema, name),
            // pg_get_viewdef ends with a semicolon; the model stores the
            // bare SELECT like the parser does.
            query: definition.trim().trim_end_matches(';').to_string(),
            materialized: row.get("materialized"),
            check_option,
            security_barrier,
        });
    }
    Ok(())
}

pub(super) async fn load_functions(
    client: &Client,
    schemas: &[String],
    model: &mut SchemaModel,
) -> Result<(), IntrospectError> {
    let rows = client
        .query(
            r#"
            SELECT
              n.nspname AS schema_name,
              p.proname AS function_name,
              pg_get_function_arguments(p.oid) AS arguments,
              pg_get_function_result(p.oid) AS result_type,
              l.lanname AS language,
              p.prosrc AS body,
              p.prokind::text AS kind,
              p.provolatile::text AS volatility,
              p.proparallel::text AS parallel,
              p.prosecdef AS security_definer,
              p.proisstrict AS strict,
              p.procost AS cost,
              p.prorows AS rows
            FROM pg_proc p
            JOIN pg_namespace n ON p.pronamespace = n.oid
            JOIN pg_language l ON p.prolang = l.oid
            WHERE n.nspname = ANY($1)
              AND p.prokind IN ('f', 'p')
              AND NOT EXISTS (
                  SELECT 1 FROM pg_depend d
                  WHERE d.objid = p.oid AND d.deptype = 'e'
              )
            ORDER BY n.nspname, p.proname
            "#,
            &[&schemas],
        )
        .await?;

    for row in rows {
        let schema: String = row.get("schema_name");
        let name: String = row.get("function_name");
        let kind: String = row.get("kind");
        let is_procedure = kind == "p";
        let volatility: String = row.get("volatility");
        let parallel: String = row.get("parallel");
        let result_type: Option<String> = row.get("result_type");
        let cost: f32 = row.get("cost");
        let rows_estimate: f32 = row.get("rows");
        let arguments: String = row.get("arguments");

        model.insert_function(Function {
            name: QualifiedName::qualified(schema, name),
            args: parse_function_arguments(&arguments),
            returns: if is_procedure { None } else { result_type },
            language: row.get("language"),
            body: row.get::<_, String>("body").trim().to_string(),
            is_procedure,
            volatility: match volatility.as_str() {
                "i" => Some(Volatility::Immutable),
                "s" => Some(Volatility::Stable),
                "v" => Some(Volatility::Volatile),
                _ => None,
            },
            parallel: match parallel.as_str() {
                "s" => Some("safe".to_string()),
                "r" => Some("restricted".to_string()),
                "u" => Some("unsafe".to_string()),
                _ => None,
            },
            security_definer: row.get("security_definer"),
            strict: row.get("strict"),
            cost: Some(cost as f64),
            rows: if rows_estimate > 0.0 {
                Some(rows_estimate as f64)
            } else {
                None
            },
        });
    }
    Ok(())
}

/// Parse `pg_get_function_arguments` output ("x integer, OUT y text, z
/// numeric DEFAULT 0") back into the model's argument list.
fn parse_function_arguments(text: &str) -> Vec<FunctionArg> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    split_top_level(text)
        .into_iter()
        .map(|raw| parse_one_argument(raw.trim()))
        .collect()
}

/// Split on commas that are not nested inside parentheses.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn parse_one_argument(raw: &str) -> FunctionArg {
    let mut rest = raw;

    let mut mode = ArgMode::In;
    for (kw, m) in [
        ("OUT ", ArgMode::Out),
        ("INOUT ", ArgMode::InOut),
        ("VARIADIC ", ArgMode::Variadic),
        ("IN ", ArgMode::In),
    ] {
        if let Some(stripped) = rest.strip_prefix(kw) {
            mode = m;
            rest = stripped.trim_start();
            break;
        }
    }

    let (rest, default) = match rest.split_once(" DEFAULT ") {
        Some((head, def)) => (head.trim(), Some(def.trim().to_string())),
        None => (rest, None),
    };

    // "name type" vs a bare (possibly multi-word) type. Multi-word built-in
    // types start with one of a handful of tokens; a first word outside that
    // set followed by more text is an argument name.
    let (name, type_name) = match rest.split_once(' ') {
        Some((first, tail)) if !is_type_start(first) => {
            (Some(first.to_string()), tail.trim().to_string())
        }
        _ => (None, rest.to_string()),
    };

    FunctionArg {
        name,
        mode,
        type_name,
        default,
    }
}

fn is_type_start(word: &str) -> bool {
    matches!(
        word.to_lowercase().as_str(),
        "character" | "double" | "timestamp" | "time" | "bit" | "numeric" | "decimal"
    )
}

pub(super) async fn load_sequences(
    client: &Client,
    schemas: &[String],
    model: &mut SchemaModel,
) -> Result<(), IntrospectError> {
    let rows = client
        .query(
            r#"
            SELECT
              schemaname AS schema_name,
              sequencename AS sequence_name,
              data_type::text AS data_type,
              start_value,
              min_value,
              max_value,
              increment_by,
              cycle,
              cache_size
            FROM pg_sequences
            WHERE schemaname = ANY($1)
            ORDER BY schemaname, sequencename
            "#,
            &[&schemas],
        )
        .await?;

    for row in rows {
        let schema: String = row.get("schema_name");
        let name: String = row.get("sequence_name");
        let mut seq = Sequence::new(QualifiedName::qualified(schema, name));
        seq.data_type = row.get("data_type");
        seq.start = row.get("start_value");
        seq.min_value = row.get("min_value");
        seq.max_value = row.get("max_value");
        seq.increment = row.get("increment_by");
        seq.cycle = row.get("cycle");
        seq.cache = row.get("cache_size");
        model.insert_sequence(seq);
    }

    // Column-owned sequences (SERIAL and OWNED BY) are managed by their
    // column; mark them so the sequence handler skips them.
    let rows = client
        .query(
            r#"
            SELECT
              sn.nspname AS seq_schema,
              s.relname AS seq_name,
              tn.nspname AS table_schema,
              t.relname AS table_name,
              a.attname AS column_name
            FROM pg_depend d
            JOIN pg_class s ON s.oid = d.objid AND s.relkind = 'S'
            JOIN pg_namespace sn ON s.relnamespace = sn.oid
            JOIN pg_class t ON t.oid = d.refobjid
            JOIN pg_namespace tn ON t.relnamespace = tn.oid
            JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = d.refobjsubid
            WHERE d.deptype = 'a'
              AND d.classid = 'pg_class'::regclass
              AND sn.nspname = ANY($1)
            "#,
            &[&schemas],
        )
        .await?;

    for row in rows {
        let seq_schema: String = row.get("seq_schema");
        let seq_name: String = row.get("seq_name");
        let key = format!("{seq_schema}.{seq_name}");
        if let Some(seq) = model.sequences.get_mut(&key) {
            let table_schema: String = row.get("table_schema");
            let table_name: String = row.get("table_name");
            seq.owned_by = Some((
                format!("{table_schema}.{table_name}"),
                row.get("column_name"),
            ));
        }
    }
    Ok(())
}

pub(super) async fn load_extensions(
    client: &Client,
    model: &mut SchemaModel,
) -> Result<(), IntrospectError> {
    let rows = client
        .query(
            r#"
            SELECT e.extname AS name, e.extversion AS version, n.nspname AS schema_name
            FROM pg_extension e
            JOIN pg_namespace n ON e.extnamespace = n.oid
            ORDER BY e.extname
            "#,
            &[],
        )
        .await?;

    for row in rows {
        model.insert_extension(Extension {
            name: row.get("name"),
            version: Some(row.get("version")),
            schema: Some(row.get("schema_name")),
        });
    }
    Ok(())
}

pub(super) async fn load_schemas(
    client: &Client,
    schemas: &[String],
    model: &mut SchemaModel,
) -> Result<(), IntrospectError> {
    let rows = client
        .query(
            "SELECT nspname FROM pg_namespace WHERE nspname = ANY($1) ORDER BY nspname",
            &[&schemas],
        )
        .await?;

    for row in rows {
        model.insert_schema(SchemaDefinition {
            name: row.get("nspname"),
        });
    }
    Ok(())
}

pub(super) async fn load_comments(
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
              d.objsubid AS column_number,
              a.attname AS column_name,
              d.description AS comment_text
            FROM pg_description d
            JOIN pg_class c ON d.objoid = c.oid AND d.classoid = 'pg_class'::regclass
            JOIN pg_namespace n ON c.relnamespace = n.oid
            LEFT JOIN pg_attribute a
              ON a.attrelid = c.oid AND a.attnum = d.objsubid AND d.objsubid > 0
            WHERE n.nspname = ANY($1)
              AND c.relkind = 'r'
            ORDER BY n.nspname, c.relname, d.objsubid
            "#,
            &[&schemas],
        )
        .await?;

    for row in rows {
        let schema: String = row.get("schema_name");
        let table: String = row.get("table_name");
        let column_number: i32 = row.get("column_number");
        let text: String = row.get("comment_text");
        let table_name = QualifiedName::qualified(schema, table);

        let target = if column_number == 0 {
            CommentTarget::Table(table_name)
        } else {
            let column_name: Option<String> = row.get("column_name");
            match column_name {
                Some(c) => CommentTarget::Column(table_name, c),
                None => continue,
            }
        };

        model.insert_comment(Comment {
            target,
            text: Some(text),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_function_arguments_simple() {
        let args = parse_function_arguments("x integer, y text");
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].name.as_deref(), Some("x"));
        assert_eq!(args[0].type_name, "integer");
        assert_eq!(args[1].type_name, "text");
    }

    #[test]
    fn test_parse_function_arguments_modes_and_default() {
        let args = parse_function_arguments("OUT total numeric, z integer DEFAULT 5");
        assert_eq!(args[0].mode, ArgMode::Out);
        assert_eq!(args[0].name.as_deref(), Some("total"));
        assert_eq!(args[1].default.as_deref(), Some("5"));
    }

    #[test]
    fn test_parse_function_arguments_unnamed_multiword_type() {
        let args = parse_function_arguments("double precision, character varying(10)");
        assert_eq!(args[0].name, None);
        assert_eq!(args[0].type_name, "double precision");
        assert_eq!(args[1].type_name, "character varying(10)");
    }

    #[test]
    fn test_parse_function_arguments_empty() {
        assert!(parse_function_arguments("").is_empty());
    }

    #[test]
    fn test_split_top_level_respects_parens() {
        let parts = split_top_level("a numeric(10,2), b text");
        assert_eq!(parts, vec!["a numeric(10,2)", " b text"]);
    }
}
