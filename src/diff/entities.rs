//! Per-entity diff handlers
//!
//! Every entity kind outside tables reduces to the same three operations
//! over a keyed comparison: drop what is current-only (and managed), create
//! what is desired-only, update matched pairs whose equality predicate says
//! they differ. [`EntityHandler`] is that skeleton; each entity implements
//! it once.

use std::collections::BTreeMap;

use itertools::Itertools;
use tracing::warn;

use super::PlanError;
use crate::model::{
    Comment, CommentTarget, EnumType, Extension, Function, QualifiedName, SchemaDefinition,
    Sequence, View,
};
use crate::normalize::normalize_type;
use crate::sqlgen::{SqlBuilder, qualified, quote_ident, quote_literal};

/// Statements produced by one entity kind, split so the planner can place
/// drops before the table pass and creates after it.
#[derive(Debug, Default)]
pub(crate) struct EntityDiff {
    pub drops: Vec<String>,
    pub creates: Vec<String>,
    pub updates: Vec<String>,
}

pub(crate) trait EntityHandler {
    type Entity;

    /// Entities the engine does not manage are invisible to drop/update.
    fn managed(&self, _entity: &Self::Entity) -> bool {
        true
    }

    fn create_sql(&self, entity: &Self::Entity) -> String;

    fn drop_sql(&self, entity: &Self::Entity) -> String;

    fn needs_update(&self, desired: &Self::Entity, current: &Self::Entity) -> bool;

    /// Default update is atomic replacement.
    fn update_sql(
        &self,
        desired: &Self::Entity,
        current: &Self::Entity,
    ) -> Result<Vec<String>, PlanError> {
        Ok(vec![self.drop_sql(current), self.create_sql(desired)])
    }
}

pub(crate) fn diff_entities<H: EntityHandler>(
    handler: &H,
    desired: &BTreeMap<String, H::Entity>,
    current: &BTreeMap<String, H::Entity>,
) -> Result<EntityDiff, PlanError> {
    let mut diff = EntityDiff::default();

    for (key, cur) in current {
        if !handler.managed(cur) {
            continue;
        }
        if !desired.contains_key(key) {
            diff.drops.push(handler.drop_sql(cur));
        }
    }

    for (key, des) in desired {
        match current.get(key) {
            None => diff.creates.push(handler.create_sql(des)),
            Some(cur) => {
                if handler.managed(cur) && handler.needs_update(des, cur) {
                    diff.updates.extend(handler.update_sql(des, cur)?);
                }
            }
        }
    }

    Ok(diff)
}

fn table_ref(name: &QualifiedName) -> String {
    qualified(name.schema.as_deref(), &name.name)
}

/// Whitespace-insensitive, case-insensitive text comparison, for bodies the
/// server reformats (view definitions, function sources).
fn loose_text_eq(a: &str, b: &str) -> bool {
    let squash = |s: &str| s.split_whitespace().join(" ").to_lowercase();
    squash(a) == squash(b)
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

pub(crate) struct EnumHandler;

impl EntityHandler for EnumHandler {
    type Entity = EnumType;

    fn create_sql(&self, e: &EnumType) -> String {
        let values = e.values.iter().map(|v| quote_literal(v)).join(", ");
        format!("CREATE TYPE {} AS ENUM ({});", table_ref(&e.name), values)
    }

    fn drop_sql(&self, e: &EnumType) -> String {
        format!("DROP TYPE {};", table_ref(&e.name))
    }

    fn needs_update(&self, desired: &EnumType, current: &EnumType) -> bool {
        desired.values != current.values
    }

    /// Values appended at the tail become `ALTER TYPE … ADD VALUE`. Any
    /// removal or reorder would silently lose data and is refused.
    fn update_sql(
        &self,
        desired: &EnumType,
        current: &EnumType,
    ) -> Result<Vec<String>, PlanError> {
        let is_tail_extension = desired.values.len() >= current.values.len()
            && desired.values[..current.values.len()] == current.values[..];

        if !is_tail_extension {
            return Err(PlanError::EnumNarrowing {
                name: current.name.key(),
                current: current.values.clone(),
                desired: desired.values.clone(),
            });
        }

        Ok(desired.values[current.values.len()..]
            .iter()
            .map(|v| {
                format!(
                    "ALTER TYPE {} ADD VALUE {};",
                    table_ref(&current.name),
                    quote_literal(v)
                )
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

pub(crate) struct ViewHandler;

impl ViewHandler {
    fn render_create(&self, v: &View, or_replace: bool) -> String {
        let mut b = SqlBuilder::new();
        b.phrase("CREATE");
        if or_replace {
            b.phrase("OR REPLACE");
        }
        if v.materialized {
            b.phrase("MATERIALIZED");
        }
        b.phrase("VIEW").table(v.name.schema.as_deref(), &v.name.name);
        if v.security_barrier {
            b.phrase("WITH (security_barrier = true)");
        }
        b.phrase("AS").phrase(v.query.trim_end_matches(';').trim());
        if let Some(level) = v.check_option {
            b.phrase("WITH").phrase(&level.to_string()).phrase("CHECK OPTION");
        }
        b.build()
    }
}

impl EntityHandler for ViewHandler {
    type Entity = View;

    fn create_sql(&self, v: &View) -> String {
        self.render_create(v, false)
    }

    fn drop_sql(&self, v: &View) -> String {
        if v.materialized {
            format!("DROP MATERIALIZED VIEW {};", table_ref(&v.name))
        } else {
            format!("DROP VIEW {};", table_ref(&v.name))
        }
    }

    fn needs_update(&self, desired: &View, current: &View) -> bool {
        desired.materialized != current.materialized
            || desired.check_option != current.check_option
            || desired.security_barrier != current.security_barrier
            || !loose_text_eq(&desired.query, &current.query)
    }

    /// Plain views replace in place; materialized views cannot and are
    /// rebuilt.
    fn update_sql(&self, desired: &View, current: &View) -> Result<Vec<String>, PlanError> {
        if desired.materialized || current.materialized {
            return Ok(vec![self.drop_sql(current), self.create_sql(desired)]);
        }
        Ok(vec![self.render_create(desired, true)])
    }
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

pub(crate) struct FunctionHandler;

impl FunctionHandler {
    fn render_args(&self, f: &Function) -> String {
        f.args
            .iter()
            .map(|a| {
                let mut parts = Vec::new();
                if a.mode != crate::model::ArgMode::In {
                    parts.push(a.mode.to_string());
                }
                if let Some(ref n) = a.name {
                    parts.push(quote_ident(n));
                }
                parts.push(a.type_name.clone());
                if let Some(ref d) = a.default {
                    parts.push(format!("DEFAULT {d}"));
                }
                parts.join(" ")
            })
            .join(", ")
    }
}

impl EntityHandler for FunctionHandler {
    type Entity = Function;

    fn create_sql(&self, f: &Function) -> String {
        let mut b = SqlBuilder::new();
        b.phrase("CREATE");
        b.phrase(if f.is_procedure { "PROCEDURE" } else { "FUNCTION" });
        b.phrase(&format!(
            "{}({})",
            table_ref(&f.name),
            self.render_args(f)
        ));
        if let Some(ref returns) = f.returns {
            b.phrase("RETURNS").phrase(returns);
        }
        b.phrase("LANGUAGE").phrase(&f.language);
        if let Some(v) = f.volatility {
            b.phrase(&v.to_string());
        }
        if f.strict {
            b.phrase("STRICT");
        }
        if f.security_definer {
            b.phrase("SECURITY DEFINER");
        }
        if let Some(ref parallel) = f.parallel {
            b.phrase("PARALLEL").phrase(&parallel.to_uppercase());
        }
        if let Some(cost) = f.cost {
            b.phrase("COST").phrase(&format!("{cost}"));
        }
        if let Some(rows) = f.rows {
            b.phrase("ROWS").phrase(&format!("{rows}"));
        }
        b.phrase("AS")
            .phrase(&format!("$function${}$function$", f.body));
        b.build()
    }

    /// CASCADE so dependent triggers follow their function out.
    fn drop_sql(&self, f: &Function) -> String {
        let keyword = if f.is_procedure { "PROCEDURE" } else { "FUNCTION" };
        format!("DROP {} {} CASCADE;", keyword, table_ref(&f.name))
    }

    fn needs_update(&self, desired: &Function, current: &Function) -> bool {
        desired.is_procedure != current.is_procedure
            || desired.language != current.language
            || desired.volatility != current.volatility
            || desired.strict != current.strict
            || desired.security_definer != current.security_definer
            || !loose_text_eq(&desired.body, &current.body)
            || desired.args.len() != current.args.len()
            || desired
                .args
                .iter()
                .zip(&current.args)
                .any(|(d, c)| {
                    d.mode != c.mode
                        || d.name != c.name
                        || normalize_type(&d.type_name) != normalize_type(&c.type_name)
                })
            || match (&desired.returns, &current.returns) {
                (Some(d), Some(c)) => normalize_type(d) != normalize_type(c),
                (None, None) => false,
                _ => true,
            }
    }
}

// ---------------------------------------------------------------------------
// Sequences
// ---------------------------------------------------------------------------

pub(crate) struct SequenceHandler;

impl EntityHandler for SequenceHandler {
    type Entity = Sequence;

    /// Column-owned sequences (SERIAL and `OWNED BY`) belong to their
    /// column.
    fn managed(&self, s: &Sequence) -> bool {
        s.owned_by.is_none()
    }

    fn create_sql(&self, s: &Sequence) -> String {
        let mut b = SqlBuilder::new();
        b.phrase("CREATE SEQUENCE")
            .table(s.name.schema.as_deref(), &s.name.name);
        if let Some(ref dt) = s.data_type {
            b.phrase("AS").phrase(dt);
        }
        if s.increment != 1 {
            b.phrase("INCREMENT BY").phrase(&s.increment.to_string());
        }
        if let Some(min) = s.min_value {
            b.phrase("MINVALUE").phrase(&min.to_string());
        }
        if let Some(max) = s.max_value {
            b.phrase("MAXVALUE").phrase(&max.to_string());
        }
        if let Some(start) = s.start {
            b.phrase("START WITH").phrase(&start.to_string());
        }
        if s.cache != 1 {
            b.phrase("CACHE").phrase(&s.cache.to_string());
        }
        if s.cycle {
            b.phrase("CYCLE");
        }
        b.build()
    }

    fn drop_sql(&self, s: &Sequence) -> String {
        format!("DROP SEQUENCE {};", table_ref(&s.name))
    }

    /// Attributes the desired DDL leaves unspecified follow the server
    /// defaults and are not diffed.
    fn needs_update(&self, desired: &Sequence, current: &Sequence) -> bool {
        desired.increment != current.increment
            || desired.cycle != current.cycle
            || desired.cache != current.cache
            || matches!((desired.min_value, current.min_value), (Some(d), Some(c)) if d != c)
            || desired.min_value.is_some() && current.min_value.is_none()
            || matches!((desired.max_value, current.max_value), (Some(d), Some(c)) if d != c)
            || desired.max_value.is_some() && current.max_value.is_none()
            || matches!((desired.start, current.start), (Some(d), Some(c)) if d != c)
    }

    /// Sequences keep their state; update is a dedicated ALTER SEQUENCE.
    fn update_sql(
        &self,
        desired: &Sequence,
        current: &Sequence,
    ) -> Result<Vec<String>, PlanError> {
        let mut b = SqlBuilder::new();
        b.phrase("ALTER SEQUENCE")
            .table(current.name.schema.as_deref(), &current.name.name);
        if desired.increment != current.increment {
            b.phrase("INCREMENT BY").phrase(&desired.increment.to_string());
        }
        if let Some(min) = desired.min_value
            && current.min_value != Some(min)
        {
            b.phrase("MINVALUE").phrase(&min.to_string());
        }
        if let Some(max) = desired.max_value
            && current.max_value != Some(max)
        {
            b.phrase("MAXVALUE").phrase(&max.to_string());
        }
        if let Some(start) = desired.start
            && current.start != Some(start)
        {
            b.phrase("START WITH").phrase(&start.to_string());
        }
        if desired.cache != current.cache {
            b.phrase("CACHE").phrase(&desired.cache.to_string());
        }
        if desired.cycle != current.cycle {
            b.phrase(if desired.cycle { "CYCLE" } else { "NO CYCLE" });
        }
        Ok(vec![b.build()])
    }
}

// ---------------------------------------------------------------------------
// Extensions
// ---------------------------------------------------------------------------

pub(crate) struct ExtensionHandler;

impl EntityHandler for ExtensionHandler {
    type Entity = Extension;

    /// plpgsql ships installed everywhere; dropping it would cascade into
    /// every plpgsql function body.
    fn managed(&self, e: &Extension) -> bool {
        e.name != "plpgsql"
    }

    fn create_sql(&self, e: &Extension) -> String {
        let mut b = SqlBuilder::new();
        b.phrase("CREATE EXTENSION IF NOT EXISTS").ident(&e.name);
        if let Some(ref schema) = e.schema {
            b.phrase("WITH SCHEMA").ident(schema);
        }
        if let Some(ref version) = e.version {
            b.phrase("VERSION").phrase(&quote_literal(version));
        }
        b.build()
    }

    fn drop_sql(&self, e: &Extension) -> String {
        format!("DROP EXTENSION {};", quote_ident(&e.name))
    }

    fn needs_update(&self, desired: &Extension, current: &Extension) -> bool {
        matches!((&desired.version, &current.version), (Some(d), Some(c)) if d != c)
    }

    /// Version drift warns instead of changing anything: dropping an
    /// extension CASCADEs into everything depending on it.
    fn update_sql(
        &self,
        desired: &Extension,
        current: &Extension,
    ) -> Result<Vec<String>, PlanError> {
        warn!(
            extension = %current.name,
            current_version = current.version.as_deref().unwrap_or("?"),
            desired_version = desired.version.as_deref().unwrap_or("?"),
            "extension version differs; not changed (use ALTER EXTENSION ... UPDATE manually)"
        );
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

pub(crate) struct SchemaHandler;

impl EntityHandler for SchemaHandler {
    type Entity = SchemaDefinition;

    fn managed(&self, s: &SchemaDefinition) -> bool {
        s.name != "public" && !s.name.starts_with("pg_")
    }

    fn create_sql(&self, s: &SchemaDefinition) -> String {
        format!("CREATE SCHEMA {};", quote_ident(&s.name))
    }

    fn drop_sql(&self, s: &SchemaDefinition) -> String {
        format!("DROP SCHEMA {};", quote_ident(&s.name))
    }

    fn needs_update(&self, _desired: &SchemaDefinition, _current: &SchemaDefinition) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

pub(crate) struct CommentHandler;

impl CommentHandler {
    fn render(&self, target: &CommentTarget, text: Option<&str>) -> String {
        let value = match text {
            Some(t) => quote_literal(t),
            None => "NULL".to_string(),
        };
        match target {
            CommentTarget::Table(t) => {
                format!("COMMENT ON TABLE {} IS {};", table_ref(t), value)
            }
            CommentTarget::Column(t, c) => format!(
                "COMMENT ON COLUMN {}.{} IS {};",
                table_ref(t),
                quote_ident(c),
                value
            ),
        }
    }
}

impl EntityHandler for CommentHandler {
    type Entity = Comment;

    fn create_sql(&self, c: &Comment) -> String {
        self.render(&c.target, c.text.as_deref())
    }

    /// Dropping a comment is `COMMENT ON … IS NULL`.
    fn drop_sql(&self, c: &Comment) -> String {
        self.render(&c.target, None)
    }

    fn needs_update(&self, desired: &Comment, current: &Comment) -> bool {
        desired.text != current.text
    }

    fn update_sql(&self, desired: &Comment, _current: &Comment) -> Result<Vec<String>, PlanError> {
        Ok(vec![self.create_sql(desired)])
    }
}
