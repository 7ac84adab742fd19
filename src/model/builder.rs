//! Test harness for building schema models
//!
//! A fluent API for constructing [`SchemaModel`] values in tests without
//! going through the parser or the introspector.
//!
//! # Example
//!
//! ```rust
//! use pg_declare::model::builder::ModelBuilder;
//!
//! let model = ModelBuilder::new()
//!     .table("orders", |t| {
//!         t.column("id", "integer", false)
//!          .column("status", "text", true)
//!          .pk(&["id"])
//!          .index("idx_orders_status", &["status"], false);
//!     })
//!     .build();
//! ```

use crate::model::{
    Check, Column, EnumType, ForeignKey, GeneratedSpec, Index, IndexColumn, PrimaryKey,
    QualifiedName, ReferentialAction, SchemaModel, Sequence, Table, Unique, View,
};

/// Builder for constructing a SchemaModel in tests.
pub struct ModelBuilder {
    model: SchemaModel,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self {
            model: SchemaModel::new(),
        }
    }

    /// Add a table. The closure receives a [`TableBuilder`] to configure
    /// columns, constraints, and indexes. Unqualified names land in
    /// `public`.
    pub fn table(mut self, name: &str, f: impl FnOnce(&mut TableBuilder)) -> Self {
        let mut builder = TableBuilder::new(name);
        f(&mut builder);
        self.model.insert_table(builder.build());
        self
    }

    pub fn enum_type(mut self, name: &str, values: &[&str]) -> Self {
        self.model.insert_enum(EnumType {
            name: qualify(name),
            values: values.iter().map(|v| v.to_string()).collect(),
        });
        self
    }

    pub fn view(mut self, name: &str, query: &str) -> Self {
        self.model.insert_view(View {
            name: qualify(name),
            query: query.to_string(),
            materialized: false,
            check_option: None,
            security_barrier: false,
        });
        self
    }

    pub fn sequence(mut self, name: &str, f: impl FnOnce(&mut Sequence)) -> Self {
        let mut seq = Sequence::new(qualify(name));
        f(&mut seq);
        self.model.insert_sequence(seq);
        self
    }

    pub fn build(self) -> SchemaModel {
        self.model
    }
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn qualify(name: &str) -> QualifiedName {
    match name.split_once('.') {
        Some((schema, bare)) => QualifiedName::qualified(schema, bare),
        None => QualifiedName::qualified("public", name),
    }
}

/// Builder for constructing a [`Table`] in tests.
pub struct TableBuilder {
    table: Table,
}

impl TableBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            table: Table::new(qualify(name)),
        }
    }

    /// Add a column without a default.
    pub fn column(&mut self, name: &str, type_name: &str, nullable: bool) -> &mut Self {
        self.table.columns.push(Column {
            name: name.to_string(),
            type_name: type_name.to_string(),
            nullable,
            default: None,
            generated: None,
        });
        self
    }

    /// Add a column with a default expression.
    pub fn column_with_default(
        &mut self,
        name: &str,
        type_name: &str,
        nullable: bool,
        default: &str,
    ) -> &mut Self {
        self.table.columns.push(Column {
            name: name.to_string(),
            type_name: type_name.to_string(),
            nullable,
            default: Some(default.to_string()),
            generated: None,
        });
        self
    }

    /// Add a generated column.
    pub fn generated_column(
        &mut self,
        name: &str,
        type_name: &str,
        expression: &str,
    ) -> &mut Self {
        self.table.columns.push(Column {
            name: name.to_string(),
            type_name: type_name.to_string(),
            nullable: true,
            default: None,
            generated: Some(GeneratedSpec {
                always: true,
                expression: expression.to_string(),
                stored: true,
            }),
        });
        self
    }

    pub fn pk(&mut self, columns: &[&str]) -> &mut Self {
        self.table.primary_key = Some(PrimaryKey {
            name: None,
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn named_pk(&mut self, name: &str, columns: &[&str]) -> &mut Self {
        self.table.primary_key = Some(PrimaryKey {
            name: Some(name.to_string()),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn fk(
        &mut self,
        name: Option<&str>,
        columns: &[&str],
        ref_table: &str,
        ref_columns: &[&str],
    ) -> &mut Self {
        self.table.foreign_keys.push(ForeignKey {
            name: name.map(|n| n.to_string()),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ref_table: qualify(ref_table),
            ref_columns: ref_columns.iter().map(|c| c.to_string()).collect(),
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
            deferrable: false,
            initially_deferred: false,
        });
        self
    }

    pub fn fk_on_delete(
        &mut self,
        name: Option<&str>,
        columns: &[&str],
        ref_table: &str,
        ref_columns: &[&str],
        on_delete: ReferentialAction,
    ) -> &mut Self {
        self.fk(name, columns, ref_table, ref_columns);
        self.table.foreign_keys.last_mut().unwrap().on_delete = on_delete;
        self
    }

    pub fn check(&mut self, name: Option<&str>, expression: &str) -> &mut Self {
        self.table.checks.push(Check {
            name: name.map(|n| n.to_string()),
            expression: expression.to_string(),
        });
        self
    }

    pub fn unique(&mut self, name: Option<&str>, columns: &[&str]) -> &mut Self {
        self.table.uniques.push(Unique {
            name: name.map(|n| n.to_string()),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            deferrable: false,
            initially_deferred: false,
        });
        self
    }

    /// Add a plain btree index.
    pub fn index(&mut self, name: &str, columns: &[&str], unique: bool) -> &mut Self {
        let mut idx = Index::new(name, self.table.name.clone());
        idx.columns = columns.iter().map(|c| IndexColumn::plain(*c)).collect();
        idx.unique = unique;
        self.table.indexes.push(idx);
        self
    }

    /// Add a partial index with a WHERE predicate.
    pub fn partial_index(
        &mut self,
        name: &str,
        columns: &[&str],
        unique: bool,
        predicate: &str,
    ) -> &mut Self {
        self.index(name, columns, unique);
        self.table.indexes.last_mut().unwrap().predicate = Some(predicate.to_string());
        self
    }

    /// Full control over an index.
    pub fn index_with(&mut self, name: &str, f: impl FnOnce(&mut Index)) -> &mut Self {
        let mut idx = Index::new(name, self.table.name.clone());
        f(&mut idx);
        self.table.indexes.push(idx);
        self
    }

    pub fn build(self) -> Table {
        self.table
    }
}
