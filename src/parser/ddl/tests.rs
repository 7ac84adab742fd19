use crate::model::{
    CheckOption, CommentTarget, IndexMethod, ReferentialAction, SortOrder, Volatility,
};
use crate::parser::parse_ddl;

fn parse(sql: &str) -> crate::model::SchemaModel {
    parse_ddl(sql, "public")
}

#[test]
fn test_create_table_columns_and_nullability() {
    let model = parse(
        "CREATE TABLE users (
            id integer NOT NULL,
            name text,
            email varchar(255) NOT NULL DEFAULT ''
        );",
    );

    let users = model.get_table("public.users").expect("users table");
    assert_eq!(users.columns.len(), 3);

    let id = users.get_column("id").unwrap();
    assert!(!id.nullable);
    assert_eq!(id.type_name, "int4");

    let name = users.get_column("name").unwrap();
    assert!(name.nullable);

    let email = users.get_column("email").unwrap();
    assert_eq!(email.type_name, "varchar(255)");
    assert_eq!(email.default.as_deref(), Some("''"));
}

#[test]
fn test_inline_primary_key() {
    let model = parse("CREATE TABLE t (id bigint PRIMARY KEY);");
    let t = model.get_table("public.t").unwrap();
    let pk = t.primary_key.as_ref().expect("pk");
    assert_eq!(pk.columns, vec!["id"]);
    assert!(pk.name.is_none());
    assert!(!t.get_column("id").unwrap().nullable);
}

#[test]
fn test_table_level_primary_key_forces_not_null() {
    let model = parse("CREATE TABLE t (a int, b int, PRIMARY KEY (a, b));");
    let t = model.get_table("public.t").unwrap();
    assert_eq!(t.primary_key.as_ref().unwrap().columns, vec!["a", "b"]);
    assert!(!t.get_column("a").unwrap().nullable);
    assert!(!t.get_column("b").unwrap().nullable);
}

#[test]
fn test_serial_expands_to_int_with_sequence_default() {
    let model = parse("CREATE TABLE users (id serial PRIMARY KEY);");
    let id = model
        .get_table("public.users")
        .unwrap()
        .get_column("id")
        .unwrap();
    assert_eq!(id.type_name, "int4");
    assert_eq!(
        id.default.as_deref(),
        Some("nextval('users_id_seq'::regclass)")
    );
}

#[test]
fn test_inline_foreign_key_with_actions() {
    let model = parse(
        "CREATE TABLE orders (
            id int PRIMARY KEY,
            customer_id int REFERENCES customers (id) ON DELETE CASCADE ON UPDATE SET NULL
        );",
    );
    let orders = model.get_table("public.orders").unwrap();
    assert_eq!(orders.foreign_keys.len(), 1);
    let fk = &orders.foreign_keys[0];
    assert_eq!(fk.columns, vec!["customer_id"]);
    assert_eq!(fk.ref_table.key(), "public.customers");
    assert_eq!(fk.ref_columns, vec!["id"]);
    assert_eq!(fk.on_delete, ReferentialAction::Cascade);
    assert_eq!(fk.on_update, ReferentialAction::SetNull);
}

#[test]
fn test_named_table_level_constraints() {
    let model = parse(
        "CREATE TABLE t (
            a int,
            b int,
            CONSTRAINT t_a_check CHECK (a > 0),
            CONSTRAINT t_ab_unique UNIQUE (a, b),
            CONSTRAINT fk_t_u FOREIGN KEY (b) REFERENCES u (id) DEFERRABLE INITIALLY DEFERRED
        );",
    );
    let t = model.get_table("public.t").unwrap();
    assert_eq!(t.checks[0].name.as_deref(), Some("t_a_check"));
    assert_eq!(t.checks[0].expression, "a > 0");
    assert_eq!(t.uniques[0].name.as_deref(), Some("t_ab_unique"));
    assert_eq!(t.uniques[0].columns, vec!["a", "b"]);
    let fk = &t.foreign_keys[0];
    assert_eq!(fk.name.as_deref(), Some("fk_t_u"));
    assert!(fk.deferrable);
    assert!(fk.initially_deferred);
}

#[test]
fn test_generated_column() {
    let model = parse(
        "CREATE TABLE m (
            price numeric,
            qty int,
            total numeric GENERATED ALWAYS AS (price * qty) STORED
        );",
    );
    let total = model
        .get_table("public.m")
        .unwrap()
        .get_column("total")
        .unwrap();
    let r#gen = total.generated.as_ref().expect("generated spec");
    assert!(r#gen.always);
    assert!(r#gen.stored);
    assert_eq!(r#gen.expression, "price * qty");
    assert!(total.default.is_none());
}

#[test]
fn test_create_index_full_form() {
    let model = parse(
        "CREATE TABLE t (a int, b text, c int);
         CREATE UNIQUE INDEX CONCURRENTLY idx_t ON t USING btree (a DESC, b text_pattern_ops)
             WITH (fillfactor = 70) WHERE c > 0;",
    );
    let t = model.get_table("public.t").unwrap();
    assert_eq!(t.indexes.len(), 1);
    let idx = &t.indexes[0];
    assert_eq!(idx.name, "idx_t");
    assert!(idx.unique);
    assert!(idx.concurrent);
    assert_eq!(idx.method, IndexMethod::Btree);
    assert_eq!(idx.columns[0].name, "a");
    assert_eq!(idx.columns[0].order, SortOrder::Desc);
    assert_eq!(idx.columns[1].name, "b");
    assert_eq!(idx.columns[1].opclass.as_deref(), Some("text_pattern_ops"));
    assert_eq!(idx.predicate.as_deref(), Some("c > 0"));
    assert_eq!(idx.storage_params.get("fillfactor").map(String::as_str), Some("70"));
}

#[test]
fn test_expression_index() {
    let model = parse(
        "CREATE TABLE t (email text);
         CREATE INDEX idx_t_lower ON t ((lower(email)));",
    );
    let idx = &model.get_table("public.t").unwrap().indexes[0];
    assert!(idx.columns.is_empty());
    assert_eq!(idx.expression.as_deref(), Some("lower(email)"));
}

#[test]
fn test_index_on_unknown_table_is_skipped() {
    let model = parse("CREATE INDEX idx_missing ON missing (a);");
    assert!(model.tables.is_empty());
}

#[test]
fn test_create_enum() {
    let model = parse("CREATE TYPE order_status AS ENUM ('pending', 'shipped', 'done');");
    let e = model.enums.get("public.order_status").expect("enum");
    assert_eq!(e.values, vec!["pending", "shipped", "done"]);
}

#[test]
fn test_create_view_with_options() {
    let model = parse(
        "CREATE VIEW active_users WITH (security_barrier = true)
         AS SELECT id FROM users WHERE active
         WITH CASCADED CHECK OPTION;",
    );
    let v = model.views.get("public.active_users").expect("view");
    assert!(!v.materialized);
    assert!(v.security_barrier);
    assert_eq!(v.check_option, Some(CheckOption::Cascaded));
    assert!(v.query.contains("SELECT id FROM users"));
}

#[test]
fn test_create_materialized_view() {
    let model = parse("CREATE MATERIALIZED VIEW mv AS SELECT 1 AS one;");
    let v = model.views.get("public.mv").expect("matview");
    assert!(v.materialized);
}

#[test]
fn test_create_function() {
    let model = parse(
        "CREATE FUNCTION add_one(x integer) RETURNS integer
         LANGUAGE sql IMMUTABLE STRICT
         AS $$ SELECT x + 1 $$;",
    );
    let f = model.functions.get("public.add_one").expect("function");
    assert_eq!(f.args.len(), 1);
    assert_eq!(f.args[0].name.as_deref(), Some("x"));
    assert_eq!(f.args[0].type_name, "int4");
    assert_eq!(f.returns.as_deref(), Some("int4"));
    assert_eq!(f.language, "sql");
    assert_eq!(f.volatility, Some(Volatility::Immutable));
    assert!(f.strict);
    assert!(f.body.contains("SELECT x + 1"));
}

#[test]
fn test_create_procedure() {
    let model = parse(
        "CREATE PROCEDURE cleanup() LANGUAGE plpgsql AS $$ BEGIN DELETE FROM t; END $$;",
    );
    let f = model.functions.get("public.cleanup").expect("procedure");
    assert!(f.is_procedure);
    assert!(f.returns.is_none());
}

#[test]
fn test_create_sequence_with_options() {
    let model = parse(
        "CREATE SEQUENCE order_seq AS bigint INCREMENT BY 5 MINVALUE 10 MAXVALUE 1000
         START WITH 10 CACHE 20 CYCLE;",
    );
    let s = model.sequences.get("public.order_seq").expect("sequence");
    assert_eq!(s.data_type.as_deref(), Some("int8"));
    assert_eq!(s.increment, 5);
    assert_eq!(s.min_value, Some(10));
    assert_eq!(s.max_value, Some(1000));
    assert_eq!(s.start, Some(10));
    assert_eq!(s.cache, 20);
    assert!(s.cycle);
}

#[test]
fn test_create_extension_and_schema() {
    let model = parse(
        "CREATE EXTENSION IF NOT EXISTS pgcrypto WITH SCHEMA public VERSION '1.3';
         CREATE SCHEMA analytics;",
    );
    let ext = model.extensions.get("pgcrypto").expect("extension");
    assert_eq!(ext.version.as_deref(), Some("1.3"));
    assert_eq!(ext.schema.as_deref(), Some("public"));
    assert!(model.schemas.contains_key("analytics"));
}

#[test]
fn test_comment_on_table_and_column() {
    let model = parse(
        "CREATE TABLE t (a int);
         COMMENT ON TABLE t IS 'the t table';
         COMMENT ON COLUMN t.a IS 'the a column';",
    );
    let table_comment = model.comments.get("table:public.t").expect("table comment");
    assert_eq!(table_comment.text.as_deref(), Some("the t table"));
    match &model.comments.get("column:public.t.a").unwrap().target {
        CommentTarget::Column(table, column) => {
            assert_eq!(table.key(), "public.t");
            assert_eq!(column, "a");
        }
        other => panic!("expected column target, got {other:?}"),
    }
}

#[test]
fn test_unknown_statement_is_skipped() {
    let model = parse(
        "CREATE TABLE t (a int);
         GRANT SELECT ON t TO someone;",
    );
    assert!(model.has_table("public.t"));
}

#[test]
fn test_trigger_is_recognized_and_skipped() {
    let model = parse(
        "CREATE TABLE t (a int);
         CREATE FUNCTION trg() RETURNS trigger LANGUAGE plpgsql AS $$ BEGIN RETURN NEW; END $$;
         CREATE TRIGGER t_trg BEFORE INSERT ON t FOR EACH ROW EXECUTE FUNCTION trg();",
    );
    assert!(model.has_table("public.t"));
    assert!(model.functions.contains_key("public.trg"));
}

#[test]
fn test_malformed_statement_does_not_abort_batch() {
    let model = parse(
        "CREATE TABLE good (a int);
         CREATE TABLE broken (a int,,);
         CREATE TABLE also_good (b int);",
    );
    assert!(model.has_table("public.good"));
    assert!(model.has_table("public.also_good"));
    assert!(!model.has_table("public.broken"));
}

#[test]
fn test_schema_qualified_names_preserved() {
    let model = parse("CREATE TABLE app.events (id bigint);");
    assert!(model.has_table("app.events"));
    assert!(!model.has_table("public.events"));
}

#[test]
fn test_check_expression_preserved_verbatim() {
    let model = parse("CREATE TABLE t (age int CHECK (age >= 0 AND age < 200));");
    let t = model.get_table("public.t").unwrap();
    assert_eq!(t.checks[0].expression, "age >= 0 AND age < 200");
}

#[test]
fn test_array_column_type() {
    let model = parse("CREATE TABLE t (tags text[]);");
    let tags = model.get_table("public.t").unwrap().get_column("tags").unwrap();
    assert_eq!(tags.type_name, "text[]");
}
