//! Schema Model types
//!
//! The Schema Model is the sole currency between the DDL parser, the catalog
//! introspector, and the differ. Both the Desired and the Current model are
//! plain values: built fresh per run, immutable afterwards, no references to
//! connections or files.
//!
//! Identifiers are stored unquoted and compared case-sensitively. Expression
//! and type text is kept verbatim as written/reported; canonicalization
//! happens at comparison time (`normalize`, `expr`), never at construction
//! time.

pub mod builder;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Schema-qualified name. `schema` is `None` for unqualified references
/// until the parser assigns the default schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    pub schema: Option<String>,
    pub name: String,
}

impl QualifiedName {
    pub fn unqualified(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Assign a schema if the name does not already carry one.
    pub fn set_default_schema(&mut self, schema: &str) {
        if self.schema.is_none() {
            self.schema = Some(schema.to_string());
        }
    }

    /// The key used for model lookup: `schema.name`, with `public` assumed
    /// for names that never got a schema assigned.
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema.as_deref().unwrap_or("public"), self.name)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(s) => write!(f, "{}.{}", s, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: QualifiedName,
    /// Columns in definition order.
    pub columns: Vec<Column>,
    pub primary_key: Option<PrimaryKey>,
    pub foreign_keys: Vec<ForeignKey>,
    pub checks: Vec<Check>,
    pub uniques: Vec<Unique>,
    /// Indexes on this table, including constraint-backed entries (tagged
    /// via [`Index::backing_constraint`]).
    pub indexes: Vec<Index>,
}

impl Table {
    pub fn new(name: QualifiedName) -> Self {
        Self {
            name,
            columns: Vec::new(),
            primary_key: None,
            foreign_keys: Vec::new(),
            checks: Vec::new(),
            uniques: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    /// Indexes that the index differ manages: everything not owned by a
    /// UNIQUE/PRIMARY/EXCLUDE constraint.
    pub fn standalone_indexes(&self) -> impl Iterator<Item = &Index> {
        self.indexes.iter().filter(|i| i.backing_constraint.is_none())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Type text as written or reported; canonicalized only at compare time.
    pub type_name: String,
    pub nullable: bool,
    pub default: Option<String>,
    /// Mutually exclusive with `default`.
    pub generated: Option<GeneratedSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSpec {
    pub always: bool,
    pub expression: String,
    pub stored: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub name: Option<String>,
    pub columns: Vec<String>,
}

/// Referential action for `ON DELETE` / `ON UPDATE`. A missing clause means
/// `NO ACTION`; the two compare equal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
pub enum ReferentialAction {
    #[default]
    #[strum(serialize = "NO ACTION")]
    NoAction,
    #[strum(serialize = "RESTRICT")]
    Restrict,
    #[strum(serialize = "CASCADE")]
    Cascade,
    #[strum(serialize = "SET NULL")]
    SetNull,
    #[strum(serialize = "SET DEFAULT")]
    SetDefault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub ref_table: QualifiedName,
    pub ref_columns: Vec<String>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
    pub deferrable: bool,
    pub initially_deferred: bool,
}

impl ForeignKey {
    /// Structural identity used when no explicit name matches:
    /// `(local cols → ref table . ref cols)`.
    pub fn structural_key(&self) -> String {
        format!(
            "{}->{}.{}",
            self.columns.join(","),
            self.ref_table.key(),
            self.ref_columns.join(",")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub name: Option<String>,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unique {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub deferrable: bool,
    pub initially_deferred: bool,
}

// ---------------------------------------------------------------------------
// Indexes
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum IndexMethod {
    #[default]
    Btree,
    Hash,
    Gist,
    Spgist,
    Gin,
    Brin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    #[strum(serialize = "ASC")]
    Asc,
    #[strum(serialize = "DESC")]
    Desc,
}

/// One keyed column of an index. Operator class is only set when it differs
/// from the column type's default; sort order only when descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub name: String,
    pub opclass: Option<String>,
    pub order: SortOrder,
}

impl IndexColumn {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            opclass: None,
            order: SortOrder::Asc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub table: QualifiedName,
    pub columns: Vec<IndexColumn>,
    /// Set for expression indexes; `columns` is empty then.
    pub expression: Option<String>,
    pub method: IndexMethod,
    pub unique: bool,
    /// Partial-index WHERE clause.
    pub predicate: Option<String>,
    pub storage_params: BTreeMap<String, String>,
    pub tablespace: Option<String>,
    /// Name of the UNIQUE/PRIMARY/EXCLUDE constraint owning this index.
    /// Constraint-backed indexes are managed via ALTER TABLE, never
    /// CREATE/DROP INDEX. Invariant: equals [`Index::name`] when set.
    pub backing_constraint: Option<String>,
    /// `CREATE INDEX CONCURRENTLY` was written in the desired DDL.
    pub concurrent: bool,
}

impl Index {
    pub fn new(name: impl Into<String>, table: QualifiedName) -> Self {
        Self {
            name: name.into(),
            table,
            columns: Vec::new(),
            expression: None,
            method: IndexMethod::Btree,
            unique: false,
            predicate: None,
            storage_params: BTreeMap::new(),
            tablespace: None,
            backing_constraint: None,
            concurrent: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Other entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumType {
    pub name: QualifiedName,
    /// Value order is significant: PostgreSQL enums are ordered types.
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum CheckOption {
    #[strum(serialize = "LOCAL")]
    Local,
    #[strum(serialize = "CASCADED")]
    Cascaded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub name: QualifiedName,
    pub query: String,
    pub materialized: bool,
    pub check_option: Option<CheckOption>,
    pub security_barrier: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
pub enum ArgMode {
    #[default]
    #[strum(serialize = "IN")]
    In,
    #[strum(serialize = "OUT")]
    Out,
    #[strum(serialize = "INOUT")]
    InOut,
    #[strum(serialize = "VARIADIC")]
    Variadic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionArg {
    pub name: Option<String>,
    pub mode: ArgMode,
    pub type_name: String,
    pub default: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum Volatility {
    #[strum(serialize = "IMMUTABLE")]
    Immutable,
    #[strum(serialize = "STABLE")]
    Stable,
    #[strum(serialize = "VOLATILE")]
    Volatile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: QualifiedName,
    pub args: Vec<FunctionArg>,
    /// `None` for procedures.
    pub returns: Option<String>,
    pub language: String,
    pub body: String,
    pub is_procedure: bool,
    pub volatility: Option<Volatility>,
    pub parallel: Option<String>,
    pub security_definer: bool,
    pub strict: bool,
    pub cost: Option<f64>,
    pub rows: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: QualifiedName,
    pub data_type: Option<String>,
    pub increment: i64,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub start: Option<i64>,
    pub cache: i64,
    pub cycle: bool,
    /// `(table key, column)` when the sequence is owned by a column.
    /// Owned sequences are managed by their column, not by the sequence
    /// handler.
    pub owned_by: Option<(String, String)>,
}

impl Sequence {
    pub fn new(name: QualifiedName) -> Self {
        Self {
            name,
            data_type: None,
            increment: 1,
            min_value: None,
            max_value: None,
            start: None,
            cache: 1,
            cycle: false,
            owned_by: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub name: String,
    pub version: Option<String>,
    pub schema: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub name: String,
}

/// Target of a `COMMENT ON` statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentTarget {
    Table(QualifiedName),
    Column(QualifiedName, String),
}

impl CommentTarget {
    pub fn key(&self) -> String {
        match self {
            Self::Table(t) => format!("table:{}", t.key()),
            Self::Column(t, c) => format!("column:{}.{}", t.key(), c),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub target: CommentTarget,
    /// `None` drops the comment.
    pub text: Option<String>,
}

// ---------------------------------------------------------------------------
// The model
// ---------------------------------------------------------------------------

/// A complete schema state. Maps are keyed by [`QualifiedName::key`] (or the
/// bare name for schema-less entities), which enforces the
/// one-entity-per-(schema, name) invariant and gives deterministic iteration
/// order, so plans are stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaModel {
    pub tables: BTreeMap<String, Table>,
    pub enums: BTreeMap<String, EnumType>,
    pub views: BTreeMap<String, View>,
    pub functions: BTreeMap<String, Function>,
    pub sequences: BTreeMap<String, Sequence>,
    pub extensions: BTreeMap<String, Extension>,
    pub schemas: BTreeMap<String, SchemaDefinition>,
    pub comments: BTreeMap<String, Comment>,
}

impl SchemaModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_table(&mut self, table: Table) {
        self.tables.insert(table.name.key(), table);
    }

    pub fn get_table(&self, key: &str) -> Option<&Table> {
        self.tables.get(key)
    }

    pub fn get_table_mut(&mut self, key: &str) -> Option<&mut Table> {
        self.tables.get_mut(key)
    }

    pub fn has_table(&self, key: &str) -> bool {
        self.tables.contains_key(key)
    }

    pub fn insert_enum(&mut self, e: EnumType) {
        self.enums.insert(e.name.key(), e);
    }

    pub fn insert_view(&mut self, v: View) {
        self.views.insert(v.name.key(), v);
    }

    pub fn insert_function(&mut self, f: Function) {
        self.functions.insert(f.name.key(), f);
    }

    pub fn insert_sequence(&mut self, s: Sequence) {
        self.sequences.insert(s.name.key(), s);
    }

    pub fn insert_extension(&mut self, e: Extension) {
        self.extensions.insert(e.name.clone(), e);
    }

    pub fn insert_schema(&mut self, s: SchemaDefinition) {
        self.schemas.insert(s.name.clone(), s);
    }

    pub fn insert_comment(&mut self, c: Comment) {
        self.comments.insert(c.target.key(), c);
    }
}
