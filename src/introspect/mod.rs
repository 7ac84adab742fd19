//! Live-schema introspection
//!
//! Reads the PostgreSQL system catalogs and reconstructs a Current Schema
//! Model equivalent to what the DDL parser builds from source text. The
//! introspector holds one read-only connection and performs the only I/O in
//! the planning pipeline; any catalog query failure is fatal for the run.

mod entities;
mod tables;

use thiserror::Error;
use tokio_postgres::Client;
use tracing::debug;

use crate::model::SchemaModel;

#[derive(Debug, Error)]
pub enum IntrospectError {
    #[error("catalog query failed: {0}")]
    Query(#[from] tokio_postgres::Error),
}

/// Build the Current Schema Model for the given schemas.
///
/// Contracts the differ relies on:
/// - constraint-backed indexes are tagged with the owning constraint and
///   thereby excluded from standalone-index diffing;
/// - SERIAL columns appear as their storage int type with a
///   `nextval(…)` default;
/// - per-column operator classes are only recorded when non-default, sort
///   orders only when descending.
pub async fn introspect_schema(
    client: &Client,
    schemas: &[String],
) -> Result<SchemaModel, IntrospectError> {
    let mut model = SchemaModel::new();

    tables::load_tables(client, schemas, &mut model).await?;
    tables::load_columns(client, schemas, &mut model).await?;
    tables::load_constraints(client, schemas, &mut model).await?;
    tables::load_indexes(client, schemas, &mut model).await?;

    entities::load_enums(client, schemas, &mut model).await?;
    entities::load_views(client, schemas, &mut model).await?;
    entities::load_functions(client, schemas, &mut model).await?;
    entities::load_sequences(client, schemas, &mut model).await?;
    entities::load_extensions(client, &mut model).await?;
    entities::load_schemas(client, schemas, &mut model).await?;
    entities::load_comments(client, schemas, &mut model).await?;

    debug!(
        tables = model.tables.len(),
        enums = model.enums.len(),
        views = model.views.len(),
        functions = model.functions.len(),
        sequences = model.sequences.len(),
        "introspection complete"
    );

    Ok(model)
}
