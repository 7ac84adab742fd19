//! Table differ
//!
//! For a table present in both models this produces one batched
//! `ALTER TABLE … action, action;` plus standalone statements for index
//! operations. Action order inside a batch follows a fixed priority table
//! (drops before alters before adds, foreign keys last) so no action can
//! conflict with a dependency emitted later in the same statement.

use std::collections::{BTreeMap, HashSet};

use itertools::Itertools;

use super::PlanOptions;
use crate::expr::{expressions_equal, expressions_equal_opt};
use crate::model::{
    Check, Column, ForeignKey, Index, PrimaryKey, ReferentialAction, SortOrder, Table, Unique,
};
use crate::normalize::{is_sequence_default, normalize_default, normalize_type};
use crate::sqlgen::{SqlBuilder, qualified, quote_ident};

// Batched-action priorities. Order inside one ALTER TABLE statement.
const P_DROP_FK: u8 = 0;
const P_DROP_UNIQUE: u8 = 1;
const P_DROP_CHECK: u8 = 2;
const P_DROP_PK: u8 = 3;
const P_DROP_COLUMN: u8 = 4;
const P_ALTER_TYPE: u8 = 10;
const P_SET_DEFAULT: u8 = 11;
const P_DROP_DEFAULT: u8 = 12;
const P_SET_NOT_NULL: u8 = 13;
const P_DROP_NOT_NULL: u8 = 14;
const P_ADD_COLUMN: u8 = 20;
const P_ADD_PK: u8 = 21;
const P_ADD_CHECK: u8 = 22;
const P_ADD_UNIQUE: u8 = 23;
const P_ADD_FK: u8 = 24;

struct Action {
    priority: u8,
    sql: String,
}

#[derive(Default)]
struct ActionList {
    actions: Vec<Action>,
}

impl ActionList {
    fn push(&mut self, priority: u8, sql: String) {
        self.actions.push(Action { priority, sql });
    }

    /// Render the batch as a single statement. The sort is stable, so
    /// actions with equal priority keep their emission order (the column
    /// differ relies on this for drop-default-before-type-change).
    fn into_statement(mut self, table: &Table) -> Option<String> {
        if self.actions.is_empty() {
            return None;
        }
        self.actions.sort_by_key(|a| a.priority);
        let mut b = SqlBuilder::new();
        b.phrase("ALTER TABLE")
            .table(table.name.schema.as_deref(), &table.name.name);
        let last = self.actions.len() - 1;
        for (i, action) in self.actions.iter().enumerate() {
            b.phrase(&action.sql);
            if i != last {
                b.comma();
            }
        }
        Some(b.build())
    }
}

/// Diff a table present in both models. Returns the batched ALTER TABLE
/// statement (if any) followed by index statements.
pub(crate) fn diff_table(desired: &Table, current: &Table, options: &PlanOptions) -> Vec<String> {
    let mut actions = ActionList::default();

    let dropped_columns: HashSet<&str> = current
        .columns
        .iter()
        .filter(|c| !desired.has_column(&c.name))
        .map(|c| c.name.as_str())
        .collect();

    for col in &current.columns {
        if dropped_columns.contains(col.name.as_str()) {
            actions.push(
                P_DROP_COLUMN,
                format!("DROP COLUMN {}", quote_ident(&col.name)),
            );
        }
    }
    for col in &desired.columns {
        match current.get_column(&col.name) {
            None => actions.push(
                P_ADD_COLUMN,
                format!("ADD COLUMN {}", column_definition(desired, col)),
            ),
            Some(cur) => diff_column(desired, col, cur, &mut actions),
        }
    }

    diff_primary_key(desired, current, &mut actions);
    diff_checks(desired, current, &mut actions);
    diff_uniques(desired, current, &mut actions);
    diff_foreign_keys(desired, current, &dropped_columns, &mut actions);

    let mut statements = Vec::new();
    statements.extend(actions.into_statement(desired));
    statements.extend(diff_indexes(desired, current, options));
    statements
}

// ---------------------------------------------------------------------------
// Columns
// ---------------------------------------------------------------------------

fn diff_column(table: &Table, desired: &Column, current: &Column, actions: &mut ActionList) {
    let ident = quote_ident(&desired.name);

    // Generated columns cannot be ALTERed; any change in generation is a
    // same-batch drop + add (priorities put the drop before the add).
    let generated_changed = match (&desired.generated, &current.generated) {
        (None, None) => false,
        (Some(d), Some(c)) => {
            d.always != c.always
                || d.stored != c.stored
                || !expressions_equal(&d.expression, &c.expression)
        }
        _ => true,
    };
    if generated_changed {
        actions.push(P_DROP_COLUMN, format!("DROP COLUMN {ident}"));
        actions.push(
            P_ADD_COLUMN,
            format!("ADD COLUMN {}", column_definition(table, desired)),
        );
        return;
    }

    let type_changed = normalize_type(&desired.type_name) != normalize_type(&current.type_name);
    let defaults_equal = defaults_match(desired.default.as_deref(), current.default.as_deref());

    if type_changed {
        // An existing default is typed for the old column type; it must go
        // before the type change and be re-asserted afterwards.
        if current.default.is_some() {
            actions.push(P_ALTER_TYPE, format!("ALTER COLUMN {ident} DROP DEFAULT"));
        }
        actions.push(P_ALTER_TYPE, alter_type_action(desired, current));
        if let Some(ref default) = desired.default {
            actions.push(
                P_SET_DEFAULT,
                format!("ALTER COLUMN {ident} SET DEFAULT {default}"),
            );
        }
    } else if !defaults_equal {
        match desired.default {
            Some(ref default) => actions.push(
                P_SET_DEFAULT,
                format!("ALTER COLUMN {ident} SET DEFAULT {default}"),
            ),
            None => actions.push(P_DROP_DEFAULT, format!("ALTER COLUMN {ident} DROP DEFAULT")),
        }
    }

    if desired.nullable != current.nullable {
        if desired.nullable {
            actions.push(P_DROP_NOT_NULL, format!("ALTER COLUMN {ident} DROP NOT NULL"));
        } else {
            actions.push(P_SET_NOT_NULL, format!("ALTER COLUMN {ident} SET NOT NULL"));
        }
    }
}

fn defaults_match(desired: Option<&str>, current: Option<&str>) -> bool {
    match (normalize_default(desired), normalize_default(current)) {
        (None, None) => true,
        (Some(d), Some(c)) => {
            // SERIAL shape: both sides drawing from a sequence is the same
            // column regardless of how the sequence reference is spelled.
            d == c
                || (is_sequence_default(&d) && is_sequence_default(&c))
                || expressions_equal(&d, &c)
        }
        _ => false,
    }
}

/// `ALTER COLUMN … TYPE …`, with a `USING` clause when the base type
/// actually changes. Text-to-number and text-to-boolean conversions get the
/// explicit coercion forms PostgreSQL cannot infer.
fn alter_type_action(desired: &Column, current: &Column) -> String {
    let ident = quote_ident(&desired.name);
    let target = &desired.type_name;

    let src_base = base_type_token(&current.type_name);
    let dst_base = base_type_token(&desired.type_name);
    if src_base == dst_base {
        return format!("ALTER COLUMN {ident} TYPE {target}");
    }

    let textual_src = matches!(src_base.as_str(), "TEXT" | "VARCHAR" | "CHAR");
    let cast = if textual_src && matches!(dst_base.as_str(), "INT2" | "INT4" | "INT8") {
        format!("TRUNC({ident}::DECIMAL)::{target}")
    } else if textual_src && dst_base == "BOOLEAN" {
        format!("TRIM({ident})::{target}")
    } else {
        format!("{ident}::{target}")
    };
    format!("ALTER COLUMN {ident} TYPE {target} USING {cast}")
}

fn base_type_token(type_name: &str) -> String {
    let normalized = normalize_type(type_name);
    normalized
        .split(['(', '['])
        .next()
        .unwrap_or(&normalized)
        .trim()
        .to_string()
}

/// Render a column definition for CREATE TABLE / ADD COLUMN.
///
/// A column whose default is the conventional `nextval('<table>_<col>_seq')`
/// is written back as its serial form — the sequence does not exist yet, and
/// serial is what the user wrote.
fn column_definition(table: &Table, col: &Column) -> String {
    let mut b = SqlBuilder::new();
    b.ident(&col.name);

    let serial_default = format!("nextval('{}_{}_seq'::regclass)", table.name.name, col.name);
    let is_serial = col.default.as_deref() == Some(serial_default.as_str());
    if is_serial {
        let serial_type = match normalize_type(&col.type_name).as_str() {
            "INT2" => "smallserial",
            "INT8" => "bigserial",
            _ => "serial",
        };
        b.phrase(serial_type);
    } else {
        b.phrase(&col.type_name);
    }

    if let Some(ref generated) = col.generated {
        b.phrase(if generated.always {
            "GENERATED ALWAYS AS"
        } else {
            "GENERATED BY DEFAULT AS"
        });
        b.phrase(&format!("({})", generated.expression));
        if generated.stored {
            b.phrase("STORED");
        }
    }

    if !col.nullable {
        b.phrase("NOT NULL");
    }
    if !is_serial && col.generated.is_none()
        && let Some(ref default) = col.default
    {
        b.phrase("DEFAULT").phrase(default);
    }

    let mut sql = b.build();
    sql.pop(); // column fragments carry no terminator
    sql
}

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

fn diff_primary_key(desired: &Table, current: &Table, actions: &mut ActionList) {
    match (&desired.primary_key, &current.primary_key) {
        (None, None) => {}
        (Some(d), None) => actions.push(P_ADD_PK, add_pk_action(desired, d)),
        (None, Some(c)) => actions.push(P_DROP_PK, drop_constraint_action(current, &c.name)),
        (Some(d), Some(c)) => {
            // Names are routinely autogenerated; only the column list is
            // identity.
            if d.columns != c.columns {
                actions.push(P_DROP_PK, drop_constraint_action(current, &c.name));
                actions.push(P_ADD_PK, add_pk_action(desired, d));
            }
        }
    }
}

fn add_pk_action(table: &Table, pk: &PrimaryKey) -> String {
    format!(
        "ADD CONSTRAINT {} PRIMARY KEY ({})",
        quote_ident(&pk_name(table, pk)),
        pk.columns.iter().map(|c| quote_ident(c)).join(", ")
    )
}

fn diff_checks(desired: &Table, current: &Table, actions: &mut ActionList) {
    let mut matched: HashSet<usize> = HashSet::new();

    for dchk in &desired.checks {
        let found = current
            .checks
            .iter()
            .enumerate()
            .find(|(i, c)| !matched.contains(i) && expressions_equal(&dchk.expression, &c.expression));
        match found {
            Some((i, cchk)) => {
                matched.insert(i);
                // A renamed-only check is still replaced: the name is part
                // of the user-visible contract.
                if let Some(ref dname) = dchk.name
                    && cchk.name.as_deref() != Some(dname.as_str())
                {
                    actions.push(P_DROP_CHECK, drop_constraint_action(current, &cchk.name));
                    actions.push(P_ADD_CHECK, add_check_action(desired, dchk));
                }
            }
            None => actions.push(P_ADD_CHECK, add_check_action(desired, dchk)),
        }
    }

    for (i, cchk) in current.checks.iter().enumerate() {
        if !matched.contains(&i)
            && !desired
                .checks
                .iter()
                .any(|d| expressions_equal(&d.expression, &cchk.expression))
        {
            actions.push(P_DROP_CHECK, drop_constraint_action(current, &cchk.name));
        }
    }
}

fn add_check_action(table: &Table, check: &Check) -> String {
    format!(
        "ADD CONSTRAINT {} CHECK ({})",
        quote_ident(&check_name(table, check)),
        check.expression
    )
}

fn diff_uniques(desired: &Table, current: &Table, actions: &mut ActionList) {
    // Identity is the column *set*: a permutation is the same constraint.
    let unique_key = |u: &Unique| {
        let mut cols = u.columns.clone();
        cols.sort();
        cols.join(",")
    };

    let mut matched: HashSet<usize> = HashSet::new();

    for dun in &desired.uniques {
        let dkey = unique_key(dun);
        let found = current
            .uniques
            .iter()
            .enumerate()
            .find(|(i, c)| !matched.contains(i) && unique_key(c) == dkey);
        match found {
            Some((i, cun)) => {
                matched.insert(i);
                let renamed = dun
                    .name
                    .as_ref()
                    .is_some_and(|dname| cun.name.as_deref() != Some(dname.as_str()));
                let changed = dun.deferrable != cun.deferrable
                    || dun.initially_deferred != cun.initially_deferred;
                if renamed || changed {
                    actions.push(P_DROP_UNIQUE, drop_constraint_action(current, &cun.name));
                    actions.push(P_ADD_UNIQUE, add_unique_action(desired, dun));
                }
            }
            None => actions.push(P_ADD_UNIQUE, add_unique_action(desired, dun)),
        }
    }

    for (i, cun) in current.uniques.iter().enumerate() {
        if !matched.contains(&i) {
            let ckey = unique_key(cun);
            if !desired.uniques.iter().any(|d| unique_key(d) == ckey) {
                actions.push(P_DROP_UNIQUE, drop_constraint_action(current, &cun.name));
            }
        }
    }
}

fn add_unique_action(table: &Table, unique: &Unique) -> String {
    let mut sql = format!(
        "ADD CONSTRAINT {} UNIQUE ({})",
        quote_ident(&unique_name(table, unique)),
        unique.columns.iter().map(|c| quote_ident(c)).join(", ")
    );
    if unique.deferrable {
        sql.push_str(" DEFERRABLE");
        if unique.initially_deferred {
            sql.push_str(" INITIALLY DEFERRED");
        }
    }
    sql
}

fn diff_foreign_keys(
    desired: &Table,
    current: &Table,
    dropped_columns: &HashSet<&str>,
    actions: &mut ActionList,
) {
    let mut matched: HashSet<usize> = HashSet::new();

    for dfk in &desired.foreign_keys {
        // Explicit name wins; otherwise match structurally.
        let by_name = dfk.name.as_ref().and_then(|dname| {
            current
                .foreign_keys
                .iter()
                .enumerate()
                .find(|(i, c)| !matched.contains(i) && c.name.as_deref() == Some(dname.as_str()))
        });
        let found = by_name.or_else(|| {
            current.foreign_keys.iter().enumerate().find(|(i, c)| {
                !matched.contains(i) && c.structural_key() == dfk.structural_key()
            })
        });

        match found {
            Some((i, cfk)) => {
                matched.insert(i);
                if !fks_equal(dfk, cfk) {
                    actions.push(P_DROP_FK, drop_constraint_action(current, &cfk.name));
                    actions.push(P_ADD_FK, add_fk_action(desired, dfk));
                }
            }
            None => actions.push(P_ADD_FK, add_fk_action(desired, dfk)),
        }
    }

    for (i, cfk) in current.foreign_keys.iter().enumerate() {
        if matched.contains(&i) {
            continue;
        }
        // PostgreSQL drops an FK together with its local column; an
        // explicit DROP CONSTRAINT here would fail on replay.
        if cfk
            .columns
            .iter()
            .any(|c| dropped_columns.contains(c.as_str()))
        {
            continue;
        }
        actions.push(P_DROP_FK, drop_constraint_action(current, &cfk.name));
    }
}

fn fks_equal(desired: &ForeignKey, current: &ForeignKey) -> bool {
    if let Some(ref dname) = desired.name
        && current.name.as_deref() != Some(dname.as_str())
    {
        return false;
    }
    desired.columns == current.columns
        && desired.ref_table.key() == current.ref_table.key()
        && desired.ref_columns == current.ref_columns
        && desired.on_delete == current.on_delete
        && desired.on_update == current.on_update
        && desired.deferrable == current.deferrable
        && desired.initially_deferred == current.initially_deferred
}

fn add_fk_action(table: &Table, fk: &ForeignKey) -> String {
    format!(
        "ADD CONSTRAINT {} {}",
        quote_ident(&fk_name(table, fk)),
        fk_clause(fk)
    )
}

fn fk_clause(fk: &ForeignKey) -> String {
    let mut b = SqlBuilder::new();
    b.phrase("FOREIGN KEY").phrase(&format!(
        "({})",
        fk.columns.iter().map(|c| quote_ident(c)).join(", ")
    ));
    b.phrase("REFERENCES")
        .table(fk.ref_table.schema.as_deref(), &fk.ref_table.name)
        .phrase(&format!(
            "({})",
            fk.ref_columns.iter().map(|c| quote_ident(c)).join(", ")
        ));
    if fk.on_delete != ReferentialAction::NoAction {
        b.phrase("ON DELETE").phrase(&fk.on_delete.to_string());
    }
    if fk.on_update != ReferentialAction::NoAction {
        b.phrase("ON UPDATE").phrase(&fk.on_update.to_string());
    }
    if fk.deferrable {
        b.phrase("DEFERRABLE");
        if fk.initially_deferred {
            b.phrase("INITIALLY DEFERRED");
        }
    }
    let mut sql = b.build();
    sql.pop();
    sql
}

/// Standalone `ALTER TABLE … ADD CONSTRAINT` for a foreign key — the
/// deferred-phase form used to close FK cycles.
pub(crate) fn render_add_fk_statement(table: &Table, fk: &ForeignKey) -> String {
    let mut b = SqlBuilder::new();
    b.phrase("ALTER TABLE")
        .table(table.name.schema.as_deref(), &table.name.name)
        .phrase(&add_fk_action(table, fk));
    b.build()
}

fn drop_constraint_action(table: &Table, name: &Option<String>) -> String {
    let name = name
        .clone()
        .unwrap_or_else(|| format!("{}_constraint", table.name.name));
    format!("DROP CONSTRAINT {}", quote_ident(&name))
}

// Auto-generated constraint names, used when the desired DDL does not name
// a constraint. PostgreSQL's own scheme for primary keys, so introspected
// names never churn.

fn pk_name(table: &Table, pk: &PrimaryKey) -> String {
    pk.name
        .clone()
        .unwrap_or_else(|| format!("{}_pkey", table.name.name))
}

fn unique_name(table: &Table, unique: &Unique) -> String {
    unique
        .name
        .clone()
        .unwrap_or_else(|| format!("{}_{}_unique", table.name.name, unique.columns.join("_")))
}

fn check_name(table: &Table, check: &Check) -> String {
    check
        .name
        .clone()
        .unwrap_or_else(|| format!("{}_check", table.name.name))
}

fn fk_name(table: &Table, fk: &ForeignKey) -> String {
    fk.name
        .clone()
        .unwrap_or_else(|| format!("fk_{}_{}", table.name.name, fk.ref_table.name))
}

// ---------------------------------------------------------------------------
// Indexes
// ---------------------------------------------------------------------------

/// Diff standalone indexes by name. Constraint-backed indexes never appear
/// here; the constraint diff owns them.
fn diff_indexes(desired: &Table, current: &Table, options: &PlanOptions) -> Vec<String> {
    let desired_map: BTreeMap<&str, &Index> = desired
        .standalone_indexes()
        .map(|i| (i.name.as_str(), i))
        .collect();
    let current_map: BTreeMap<&str, &Index> = current
        .standalone_indexes()
        .map(|i| (i.name.as_str(), i))
        .collect();

    let mut statements = Vec::new();

    for (name, cur) in &current_map {
        if !desired_map.contains_key(name) {
            let concurrently = if options.use_concurrent(name) {
                " CONCURRENTLY"
            } else {
                ""
            };
            statements.push(format!(
                "DROP INDEX{} {};",
                concurrently,
                qualified(cur.table.schema.as_deref(), name)
            ));
        }
    }

    for (name, des) in &desired_map {
        match current_map.get(name) {
            None => {
                statements.push(render_create_index(des, options.use_concurrent(name)));
            }
            Some(cur) if !indexes_equal(des, cur) => {
                // Atomic replacement inside the transaction: both halves
                // deliberately non-concurrent.
                statements.push(format!(
                    "DROP INDEX {};",
                    qualified(cur.table.schema.as_deref(), name)
                ));
                statements.push(render_create_index(des, false));
            }
            Some(_) => {}
        }
    }

    statements
}

fn indexes_equal(desired: &Index, current: &Index) -> bool {
    desired.method == current.method
        && desired.unique == current.unique
        && desired.columns == current.columns
        && expressions_equal_opt(desired.expression.as_deref(), current.expression.as_deref())
        && expressions_equal_opt(desired.predicate.as_deref(), current.predicate.as_deref())
        && desired.storage_params == current.storage_params
        && desired.tablespace == current.tablespace
}

pub(crate) fn render_create_index(index: &Index, concurrently: bool) -> String {
    let mut b = SqlBuilder::new();
    b.phrase("CREATE");
    if index.unique {
        b.phrase("UNIQUE");
    }
    b.phrase("INDEX");
    if concurrently {
        b.phrase("CONCURRENTLY");
    }
    b.ident(&index.name)
        .phrase("ON")
        .table(index.table.schema.as_deref(), &index.table.name);

    if index.method != crate::model::IndexMethod::Btree {
        b.phrase("USING").phrase(&index.method.to_string());
    }

    let elements = match &index.expression {
        Some(expr) => format!("(({expr}))"),
        None => format!(
            "({})",
            index
                .columns
                .iter()
                .map(|c| {
                    let mut part = quote_ident(&c.name);
                    if let Some(ref opclass) = c.opclass {
                        part.push(' ');
                        part.push_str(opclass);
                    }
                    if c.order == SortOrder::Desc {
                        part.push_str(" DESC");
                    }
                    part
                })
                .join(", ")
        ),
    };
    b.phrase(&elements);

    if !index.storage_params.is_empty() {
        b.phrase(&format!(
            "WITH ({})",
            index
                .storage_params
                .iter()
                .map(|(k, v)| format!("{k} = {v}"))
                .join(", ")
        ));
    }
    if let Some(ref tablespace) = index.tablespace {
        b.phrase("TABLESPACE").ident(tablespace);
    }
    if let Some(ref predicate) = index.predicate {
        b.phrase("WHERE").phrase(predicate);
    }
    b.build()
}

// ---------------------------------------------------------------------------
// CREATE / DROP TABLE
// ---------------------------------------------------------------------------

/// Render CREATE TABLE, leaving out the foreign keys in `omit_fks`
/// (structural keys) — those are cycle-breakers emitted in the deferred
/// phase.
pub(crate) fn render_create_table(table: &Table, omit_fks: &HashSet<String>) -> String {
    let mut b = SqlBuilder::new();
    b.phrase("CREATE TABLE")
        .table(table.name.schema.as_deref(), &table.name.name)
        .phrase("(")
        .indent();

    let mut items: Vec<String> = table
        .columns
        .iter()
        .map(|c| column_definition(table, c))
        .collect();

    if let Some(ref pk) = table.primary_key {
        items.push(format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            quote_ident(&pk_name(table, pk)),
            pk.columns.iter().map(|c| quote_ident(c)).join(", ")
        ));
    }
    for check in &table.checks {
        items.push(format!(
            "CONSTRAINT {} CHECK ({})",
            quote_ident(&check_name(table, check)),
            check.expression
        ));
    }
    for unique in &table.uniques {
        let mut item = format!(
            "CONSTRAINT {} UNIQUE ({})",
            quote_ident(&unique_name(table, unique)),
            unique.columns.iter().map(|c| quote_ident(c)).join(", ")
        );
        if unique.deferrable {
            item.push_str(" DEFERRABLE");
            if unique.initially_deferred {
                item.push_str(" INITIALLY DEFERRED");
            }
        }
        items.push(item);
    }
    for fk in &table.foreign_keys {
        if omit_fks.contains(&fk.structural_key()) {
            continue;
        }
        items.push(format!(
            "CONSTRAINT {} {}",
            quote_ident(&fk_name(table, fk)),
            fk_clause(fk)
        ));
    }

    let last = items.len().saturating_sub(1);
    for (i, item) in items.iter().enumerate() {
        b.newline().phrase(item);
        if i != last {
            b.comma();
        }
    }
    b.dedent().newline().phrase(")");
    b.build()
}

pub(crate) fn render_drop_table(table: &Table) -> String {
    format!(
        "DROP TABLE {} CASCADE;",
        qualified(table.name.schema.as_deref(), &table.name.name)
    )
}

/// `ALTER TABLE … DROP CONSTRAINT` for a named FK — the pre-drop form used
/// when dismantling cyclic table groups.
pub(crate) fn render_drop_fk_statement(table: &Table, fk: &ForeignKey) -> String {
    let mut b = SqlBuilder::new();
    b.phrase("ALTER TABLE")
        .table(table.name.schema.as_deref(), &table.name.name)
        .phrase(&drop_constraint_action(table, &fk.name));
    b.build()
}
