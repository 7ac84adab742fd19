//! Differ and migration-plan assembly
//!
//! [`plan`] is the purely functional heart of the engine: it takes the
//! Desired and Current Schema Models and produces a [`MigrationPlan`] — a
//! partitioned, ordered statement sequence. It performs no I/O and never
//! touches the database; executing the plan is the caller's job, phase by
//! phase (transactional, then concurrent, then deferred).

mod entities;
mod tables;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;

use crate::deps::DependencyResolver;
use crate::model::{Comment, CommentTarget, SchemaModel, Table};
use entities::{
    CommentHandler, EnumHandler, ExtensionHandler, FunctionHandler, SchemaHandler,
    SequenceHandler, ViewHandler, diff_entities,
};

#[derive(Debug, Error)]
pub enum PlanError {
    /// Removing or reordering enum values would lose data; the engine
    /// refuses and asks for manual intervention.
    #[error(
        "enum {name} cannot be narrowed or reordered (current: [{}]; desired: [{}]) — manual intervention required",
        current.join(", "),
        desired.join(", ")
    )]
    EnumNarrowing {
        name: String,
        current: Vec<String>,
        desired: Vec<String>,
    },
}

/// Planner knobs. Values, not configuration files — loading settings from
/// the environment belongs to the caller.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Create and drop standalone indexes with CONCURRENTLY.
    pub concurrent_indexes: bool,
    /// Per-index opt-out from concurrent creation/drop.
    pub non_concurrent_indexes: BTreeSet<String>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            concurrent_indexes: true,
            non_concurrent_indexes: BTreeSet::new(),
        }
    }
}

impl PlanOptions {
    pub(crate) fn use_concurrent(&self, index_name: &str) -> bool {
        self.concurrent_indexes && !self.non_concurrent_indexes.contains(index_name)
    }
}

/// The differ's output: statements partitioned by execution discipline.
///
/// - `transactional` runs inside one wrapping transaction;
/// - `concurrent` statements run one at a time outside any transaction;
/// - `deferred` closes FK cycles after every table exists, in a final
///   transaction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationPlan {
    pub transactional: Vec<String>,
    pub concurrent: Vec<String>,
    pub deferred: Vec<String>,
    pub has_changes: bool,
}

/// Compute the migration plan that drives `current` toward `desired`.
pub fn plan(
    desired: &SchemaModel,
    current: &SchemaModel,
    options: &PlanOptions,
) -> Result<MigrationPlan, PlanError> {
    let mut statements: Vec<String> = Vec::new();
    let mut deferred: Vec<String> = Vec::new();

    // Leading entity phases: everything tables may depend on.
    let schema_diff = diff_entities(&SchemaHandler, &desired.schemas, &current.schemas)?;
    statements.extend(schema_diff.creates.iter().cloned());

    let extension_diff =
        diff_entities(&ExtensionHandler, &desired.extensions, &current.extensions)?;
    statements.extend(extension_diff.creates.iter().cloned());
    statements.extend(extension_diff.updates.iter().cloned());

    let enum_diff = diff_entities(&EnumHandler, &desired.enums, &current.enums)?;
    statements.extend(enum_diff.creates.iter().cloned());
    statements.extend(enum_diff.updates.iter().cloned());

    let sequence_diff = diff_entities(&SequenceHandler, &desired.sequences, &current.sequences)?;
    statements.extend(sequence_diff.creates.iter().cloned());
    statements.extend(sequence_diff.updates.iter().cloned());

    // Views come down before the tables and functions they sit on change.
    let view_diff = diff_entities(&ViewHandler, &desired.views, &current.views)?;
    statements.extend(view_diff.drops.iter().cloned());

    let function_diff = diff_entities(&FunctionHandler, &desired.functions, &current.functions)?;
    statements.extend(function_diff.drops.iter().cloned());
    statements.extend(function_diff.updates.iter().cloned());
    statements.extend(function_diff.creates.iter().cloned());

    plan_tables(desired, current, options, &mut statements, &mut deferred);

    // Views are rebuilt once the tables they select from exist.
    statements.extend(view_diff.updates.iter().cloned());
    statements.extend(view_diff.creates.iter().cloned());

    let desired_comments = live_comments(&desired.comments, desired);
    let current_comments = live_comments(&current.comments, desired);
    let comment_diff = diff_entities(&CommentHandler, &desired_comments, &current_comments)?;
    statements.extend(comment_diff.drops.iter().cloned());
    statements.extend(comment_diff.updates.iter().cloned());
    statements.extend(comment_diff.creates.iter().cloned());

    // Trailing drops: nothing can still depend on these.
    statements.extend(enum_diff.drops.iter().cloned());
    statements.extend(sequence_diff.drops.iter().cloned());
    statements.extend(extension_diff.drops.iter().cloned());
    statements.extend(schema_diff.drops.iter().cloned());

    Ok(assemble(statements, deferred))
}

/// Table planning: create new tables (cycle-aware), diff common tables,
/// drop removed tables (cycle-aware, dependents first).
fn plan_tables(
    desired: &SchemaModel,
    current: &SchemaModel,
    options: &PlanOptions,
    statements: &mut Vec<String>,
    deferred: &mut Vec<String>,
) {
    // New tables, in creation order. FKs that form cycles among the new
    // tables are stripped from CREATE TABLE and closed in the deferred
    // phase.
    let added: Vec<&Table> = desired
        .tables
        .values()
        .filter(|t| !current.tables.contains_key(&t.name.key()))
        .collect();
    if !added.is_empty() {
        let detachment =
            DependencyResolver::new(added.iter().copied()).creation_order_with_detachment();

        let mut omitted: HashMap<String, HashSet<String>> = HashMap::new();
        for detached in &detachment.deferred_fks {
            omitted
                .entry(detached.table.clone())
                .or_default()
                .insert(detached.fk.structural_key());
        }

        let empty = HashSet::new();
        for key in &detachment.order {
            let table = &desired.tables[key];
            statements.push(tables::render_create_table(
                table,
                omitted.get(key).unwrap_or(&empty),
            ));
            // Indexes on a freshly created (empty) table: plain CREATE
            // INDEX, inside the transaction.
            for index in table.standalone_indexes() {
                statements.push(tables::render_create_index(index, false));
            }
        }
        for detached in &detachment.deferred_fks {
            let table = &desired.tables[&detached.table];
            deferred.push(tables::render_add_fk_statement(table, &detached.fk));
        }
    }

    // Common tables, in key order. Runs after creation so an added FK can
    // reference a new table, and before drops so removed FKs are gone
    // before their target tables.
    for (key, desired_table) in &desired.tables {
        if let Some(current_table) = current.tables.get(key) {
            statements.extend(tables::diff_table(desired_table, current_table, options));
        }
    }

    // Removed tables, dependents first. FKs cycling among the dropped set
    // are dropped explicitly before the tables.
    let dropped: Vec<&Table> = current
        .tables
        .values()
        .filter(|t| !desired.tables.contains_key(&t.name.key()))
        .collect();
    if !dropped.is_empty() {
        let detachment =
            DependencyResolver::new(dropped.iter().copied()).deletion_order_with_detachment();
        for detached in &detachment.deferred_fks {
            let table = &current.tables[&detached.table];
            statements.push(tables::render_drop_fk_statement(table, &detached.fk));
        }
        for key in &detachment.order {
            statements.push(tables::render_drop_table(&current.tables[key]));
        }
    }
}

/// Comments are only managed for objects that survive this run: comments on
/// dropped tables/columns disappear with their object.
fn live_comments(
    comments: &BTreeMap<String, Comment>,
    desired: &SchemaModel,
) -> BTreeMap<String, Comment> {
    comments
        .iter()
        .filter(|(_, comment)| match &comment.target {
            CommentTarget::Table(t) => desired.tables.contains_key(&t.key()),
            CommentTarget::Column(t, column) => desired
                .tables
                .get(&t.key())
                .is_some_and(|table| table.has_column(column)),
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Partition statements into execution phases. Statements carrying
/// CONCURRENTLY cannot run inside a transaction; everything else is
/// transactional. Deferred statements arrive pre-tagged from cycle
/// detachment.
fn assemble(statements: Vec<String>, deferred: Vec<String>) -> MigrationPlan {
    let mut plan = MigrationPlan::default();
    for statement in statements {
        if statement.contains("CONCURRENTLY") {
            plan.concurrent.push(statement);
        } else {
            plan.transactional.push(statement);
        }
    }
    plan.deferred = deferred;
    plan.has_changes =
        !(plan.transactional.is_empty() && plan.concurrent.is_empty() && plan.deferred.is_empty());
    plan
}
