//! End-to-end planner scenarios.
//!
//! Desired models are built from DDL text through the real parser; current
//! models are built with the model builder, spelled the way introspection
//! reports things (server type names, canonicalized expressions), so these
//! tests exercise the same normalization paths a live run does.

use pg_declare::model::SchemaModel;
use pg_declare::model::builder::ModelBuilder;
use pg_declare::{MigrationPlan, PlanError, PlanOptions, parse_ddl, plan};

fn plan_against(desired_sql: &str, current: &SchemaModel) -> MigrationPlan {
    let desired = parse_ddl(desired_sql, "public");
    plan(&desired, current, &PlanOptions::default()).expect("plan should succeed")
}

fn empty() -> SchemaModel {
    SchemaModel::new()
}

// ---------------------------------------------------------------------------
// Seed scenario: two-table FK cycle on creation
// ---------------------------------------------------------------------------

#[test]
fn test_two_table_cycle_creates_tables_then_defers_fks() {
    let sql = "
        CREATE TABLE authors (
            id serial PRIMARY KEY,
            latest_book_id int,
            CONSTRAINT fk_latest_book FOREIGN KEY (latest_book_id) REFERENCES books (id)
        );
        CREATE TABLE books (
            id serial PRIMARY KEY,
            author_id int NOT NULL,
            CONSTRAINT fk_author FOREIGN KEY (author_id) REFERENCES authors (id)
        );
    ";

    let plan = plan_against(sql, &empty());

    // Both tables are created transactionally, with no inline FKs.
    let creates: Vec<&String> = plan
        .transactional
        .iter()
        .filter(|s| s.starts_with("CREATE TABLE"))
        .collect();
    assert_eq!(creates.len(), 2);
    for create in &creates {
        assert!(
            !create.contains("FOREIGN KEY"),
            "cycle-forming FK leaked into CREATE TABLE: {create}"
        );
    }

    // The cycle is closed in the deferred phase.
    assert_eq!(plan.deferred.len(), 2);
    assert!(plan.deferred.iter().any(|s| s.contains("\"fk_latest_book\"")));
    assert!(plan.deferred.iter().any(|s| s.contains("\"fk_author\"")));
    assert!(
        plan.deferred
            .iter()
            .all(|s| s.starts_with("ALTER TABLE") && s.contains("ADD CONSTRAINT"))
    );
    assert!(plan.concurrent.is_empty());
}

#[test]
fn test_self_referential_fk_stays_inline() {
    let sql = "
        CREATE TABLE employees (
            id serial PRIMARY KEY,
            manager_id int,
            CONSTRAINT fk_manager FOREIGN KEY (manager_id) REFERENCES employees (id)
        );
    ";

    let plan = plan_against(sql, &empty());
    assert!(plan.deferred.is_empty());
    assert!(plan.transactional[0].contains("FOREIGN KEY (\"manager_id\")"));
}

// ---------------------------------------------------------------------------
// Seed scenario: batched table change
// ---------------------------------------------------------------------------

#[test]
fn test_batched_alter_table() {
    let current = ModelBuilder::new()
        .table("users", |t| {
            t.column("id", "integer", false).column("name", "text", true);
        })
        .build();

    let sql = "
        CREATE TABLE users (
            id int NOT NULL,
            name text,
            email varchar(255) NOT NULL,
            age int,
            CHECK (age >= 0),
            UNIQUE (email)
        );
    ";

    let plan = plan_against(sql, &current);
    assert_eq!(
        plan.transactional,
        vec![
            "ALTER TABLE \"public\".\"users\" \
             ADD COLUMN \"email\" varchar(255) NOT NULL, \
             ADD COLUMN \"age\" int4, \
             ADD CONSTRAINT \"users_check\" CHECK (age >= 0), \
             ADD CONSTRAINT \"users_email_unique\" UNIQUE (\"email\");"
        ]
    );
    assert!(plan.concurrent.is_empty());
    assert!(plan.deferred.is_empty());
}

// ---------------------------------------------------------------------------
// Seed scenario: partial-index idempotence
// ---------------------------------------------------------------------------

#[test]
fn test_partial_index_reasserted_is_empty_plan() {
    // Current state as introspection reports it: server type spellings,
    // canonicalized predicate.
    let current = ModelBuilder::new()
        .table("t", |t| {
            t.column("user_id", "integer", true)
                .column("kind", "text", true)
                .column("is_default", "boolean", true)
                .column("deleted_at", "timestamp with time zone", true)
                .partial_index(
                    "idx_x",
                    &["user_id", "kind"],
                    true,
                    "((is_default = true) AND (deleted_at IS NULL))",
                );
        })
        .build();

    let sql = "
        CREATE TABLE t (
            user_id int,
            kind text,
            is_default boolean,
            deleted_at timestamptz
        );
        CREATE UNIQUE INDEX idx_x ON t (user_id, kind)
            WHERE is_default = true AND deleted_at IS NULL;
    ";

    let plan = plan_against(sql, &current);
    assert!(!plan.has_changes, "expected empty plan, got {plan:#?}");
}

// ---------------------------------------------------------------------------
// Seed scenario: type change with default conflict
// ---------------------------------------------------------------------------

#[test]
fn test_type_change_drops_and_reasserts_default() {
    let current = ModelBuilder::new()
        .table("products", |t| {
            t.column_with_default("price", "character varying(20)", true, "'0'::character varying");
        })
        .build();

    let sql = "CREATE TABLE products (price numeric(10,2) DEFAULT 0);";

    let plan = plan_against(sql, &current);
    assert_eq!(
        plan.transactional,
        vec![
            "ALTER TABLE \"public\".\"products\" \
             ALTER COLUMN \"price\" DROP DEFAULT, \
             ALTER COLUMN \"price\" TYPE numeric(10,2) USING \"price\"::numeric(10,2), \
             ALTER COLUMN \"price\" SET DEFAULT 0;"
        ]
    );
}

// ---------------------------------------------------------------------------
// Seed scenario: enum value removal is refused
// ---------------------------------------------------------------------------

#[test]
fn test_enum_value_removal_is_fatal() {
    let current = ModelBuilder::new()
        .enum_type("mood", &["happy", "fine", "sad"])
        .build();

    let desired = parse_ddl("CREATE TYPE mood AS ENUM ('happy', 'fine');", "public");
    let err = plan(&desired, &current, &PlanOptions::default()).unwrap_err();

    match err {
        PlanError::EnumNarrowing {
            name,
            current,
            desired,
        } => {
            assert_eq!(name, "public.mood");
            assert_eq!(current, vec!["happy", "fine", "sad"]);
            assert_eq!(desired, vec!["happy", "fine"]);
        }
    }
}

#[test]
fn test_enum_tail_addition_is_alter_type() {
    let current = ModelBuilder::new().enum_type("mood", &["happy", "fine"]).build();

    let plan = plan_against("CREATE TYPE mood AS ENUM ('happy', 'fine', 'sad');", &current);
    assert_eq!(
        plan.transactional,
        vec!["ALTER TYPE \"public\".\"mood\" ADD VALUE 'sad';"]
    );
}

// ---------------------------------------------------------------------------
// Seed scenario: FK auto-drop with its column
// ---------------------------------------------------------------------------

#[test]
fn test_fk_dropped_with_its_column_is_not_explicit() {
    let current = ModelBuilder::new()
        .table("customers", |t| {
            t.column("id", "integer", false).named_pk("customers_pkey", &["id"]);
        })
        .table("orders", |t| {
            t.column("id", "integer", false)
                .column("customer_id", "integer", true)
                .named_pk("orders_pkey", &["id"])
                .fk(
                    Some("orders_customer_id_fkey"),
                    &["customer_id"],
                    "customers",
                    &["id"],
                );
        })
        .build();

    let sql = "
        CREATE TABLE customers (id int PRIMARY KEY);
        CREATE TABLE orders (id int PRIMARY KEY);
    ";

    let plan = plan_against(sql, &current);
    assert_eq!(
        plan.transactional,
        vec!["ALTER TABLE \"public\".\"orders\" DROP COLUMN \"customer_id\";"]
    );
}

// ---------------------------------------------------------------------------
// Universal properties
// ---------------------------------------------------------------------------

#[test]
fn test_plan_against_itself_is_empty() {
    let sql = "
        CREATE SCHEMA app;
        CREATE TYPE app.status AS ENUM ('new', 'done');
        CREATE TABLE app.jobs (
            id bigserial PRIMARY KEY,
            payload jsonb NOT NULL,
            state app.status NOT NULL DEFAULT 'new',
            tries int NOT NULL DEFAULT 0,
            CHECK (tries >= 0)
        );
        CREATE INDEX idx_jobs_state ON app.jobs (state) WHERE state = 'new';
        CREATE VIEW app.pending AS SELECT id FROM app.jobs WHERE state = 'new';
    ";
    let desired = parse_ddl(sql, "public");
    let current = desired.clone();

    let plan = plan(&desired, &current, &PlanOptions::default()).unwrap();
    assert!(!plan.has_changes, "expected empty plan, got {plan:#?}");
}

#[test]
fn test_simulated_introspection_roundtrip_is_quiet() {
    // The desired DDL, as a user writes it.
    let sql = "
        CREATE TABLE accounts (
            id serial PRIMARY KEY,
            email varchar(255) NOT NULL,
            balance numeric(12,2) NOT NULL DEFAULT 0,
            created_at timestamptz NOT NULL DEFAULT now(),
            CONSTRAINT accounts_balance_check CHECK (balance >= 0),
            UNIQUE (email)
        );
    ";

    // The same schema, as the catalogs report it back.
    let current = ModelBuilder::new()
        .table("accounts", |t| {
            t.column_with_default("id", "integer", false, "nextval('accounts_id_seq'::regclass)")
                .column("email", "character varying(255)", false)
                .column_with_default("balance", "numeric(12,2)", false, "'0'::numeric")
                .column_with_default(
                    "created_at",
                    "timestamp with time zone",
                    false,
                    "now()",
                )
                .named_pk("accounts_pkey", &["id"])
                .check(Some("accounts_balance_check"), "(balance >= (0)::numeric)")
                .unique(Some("accounts_email_unique"), &["email"]);
        })
        .build();

    let plan = plan_against(sql, &current);
    assert!(!plan.has_changes, "expected empty plan, got {plan:#?}");
}

#[test]
fn test_added_index_is_concurrent_and_dropped_index_too() {
    let current = ModelBuilder::new()
        .table("events", |t| {
            t.column("id", "bigint", false)
                .column("kind", "text", true)
                .column("at", "timestamp with time zone", true)
                .index("idx_events_at", &["at"], false);
        })
        .build();

    let sql = "
        CREATE TABLE events (id int8 NOT NULL, kind text, at timestamptz);
        CREATE INDEX idx_events_kind ON events (kind);
    ";

    let plan = plan_against(sql, &current);
    assert!(plan.transactional.is_empty());
    assert_eq!(
        plan.concurrent,
        vec![
            "DROP INDEX CONCURRENTLY \"public\".\"idx_events_at\";",
            "CREATE INDEX CONCURRENTLY \"idx_events_kind\" ON \"public\".\"events\" (\"kind\");",
        ]
    );
}

#[test]
fn test_view_change_is_create_or_replace() {
    let current = ModelBuilder::new()
        .table("users", |t| {
            t.column("id", "integer", false).column("active", "boolean", true);
        })
        .view("v_active", "SELECT id FROM users WHERE active")
        .build();

    let sql = "
        CREATE TABLE users (id int NOT NULL, active boolean);
        CREATE VIEW v_active AS SELECT id, active FROM users WHERE active;
    ";

    let plan = plan_against(sql, &current);
    assert_eq!(plan.transactional.len(), 1);
    assert!(plan.transactional[0].starts_with("CREATE OR REPLACE VIEW"));
}

#[test]
fn test_dropped_cyclic_tables_drop_fks_first() {
    let current = ModelBuilder::new()
        .table("a", |t| {
            t.column("id", "integer", false)
                .column("b_id", "integer", true)
                .named_pk("a_pkey", &["id"])
                .fk(Some("fk_a_b"), &["b_id"], "b", &["id"]);
        })
        .table("b", |t| {
            t.column("id", "integer", false)
                .column("a_id", "integer", true)
                .named_pk("b_pkey", &["id"])
                .fk(Some("fk_b_a"), &["a_id"], "a", &["id"]);
        })
        .build();

    let plan = plan_against("", &current);

    let fk_drops: Vec<usize> = plan
        .transactional
        .iter()
        .enumerate()
        .filter(|(_, s)| s.contains("DROP CONSTRAINT"))
        .map(|(i, _)| i)
        .collect();
    let table_drops: Vec<usize> = plan
        .transactional
        .iter()
        .enumerate()
        .filter(|(_, s)| s.starts_with("DROP TABLE"))
        .map(|(i, _)| i)
        .collect();

    assert_eq!(fk_drops.len(), 2);
    assert_eq!(table_drops.len(), 2);
    assert!(
        fk_drops.iter().max() < table_drops.iter().min(),
        "cycle FKs must be dropped before any table: {:#?}",
        plan.transactional
    );
}

#[test]
fn test_standalone_sequence_created_and_owned_sequence_skipped() {
    let current = ModelBuilder::new()
        .sequence("users_id_seq", |s| {
            s.owned_by = Some(("public.users".to_string(), "id".to_string()));
        })
        .table("users", |t| {
            t.column_with_default("id", "integer", false, "nextval('users_id_seq'::regclass)");
        })
        .build();

    // The desired DDL mentions no sequences except a new standalone one;
    // the column-owned sequence must not be dropped for it.
    let sql = "
        CREATE TABLE users (id serial NOT NULL);
        CREATE SEQUENCE order_numbers INCREMENT BY 10;
    ";

    let plan = plan_against(sql, &current);
    assert_eq!(
        plan.transactional,
        vec!["CREATE SEQUENCE \"public\".\"order_numbers\" INCREMENT BY 10;"]
    );
}

#[test]
fn test_plan_serializes_for_external_executors() -> anyhow::Result<()> {
    let plan = plan_against("CREATE TABLE t (id int);", &empty());
    let json = serde_json::to_value(&plan)?;
    assert!(json["transactional"].is_array());
    assert_eq!(json["has_changes"], serde_json::Value::Bool(true));
    assert!(json["concurrent"].as_array().unwrap().is_empty());
    assert!(json["deferred"].as_array().unwrap().is_empty());
    Ok(())
}

#[test]
fn test_unparseable_statement_does_not_poison_the_plan() {
    let sql = "
        CREATE TABLE good (id int);
        THIS IS NOT SQL AT ALL;
        CREATE TABLE fine (id int);
    ";
    let plan = plan_against(sql, &empty());
    let creates: Vec<&String> = plan
        .transactional
        .iter()
        .filter(|s| s.starts_with("CREATE TABLE"))
        .collect();
    assert_eq!(creates.len(), 2);
}
