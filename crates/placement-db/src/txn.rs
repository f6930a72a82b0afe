//! Write transactions and numeric key sequences.
//!
//! A [`WriteTxn`] collects the statements of one unit of work. Operations
//! that are composed of finer ones stage into the caller's transaction
//! instead of opening their own, so the whole unit commits or fails as one.

use placement_core::error::{PlacementError, PlacementResult};
use surrealdb::{Connection, Surreal};
use surrealdb_types::{QueryError, SurrealValue};
use tracing::debug;

use crate::error::DbError;

/// Statements, parameters and failure mappings of one atomic write.
#[derive(Debug, Default)]
pub struct WriteTxn {
    statements: Vec<String>,
    bindings: Vec<(String, serde_json::Value)>,
    guards: Vec<PlacementError>,
    unique: Vec<(&'static str, PlacementError)>,
    conflict: Option<PlacementError>,
}

impl WriteTxn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `value` to a fresh parameter and returns its placeholder.
    pub fn bind(&mut self, value: impl Into<serde_json::Value>) -> String {
        let name = format!("p{}", self.bindings.len());
        let placeholder = format!("${name}");
        self.bindings.push((name, value.into()));
        placeholder
    }

    pub fn push(&mut self, statement: impl Into<String>) {
        self.statements.push(statement.into());
    }

    /// Aborts the transaction with `error` if `condition` holds when the
    /// statement runs. Guards see every write staged before them.
    pub fn guard(&mut self, condition: &str, error: PlacementError) {
        let tag = guard_tag(self.guards.len());
        self.statements
            .push(format!("IF {condition} {{ THROW \"{tag}\" }}"));
        self.guards.push(error);
    }

    /// Reports `error` when the commit fails on the unique index `index`.
    pub fn on_unique_violation(&mut self, index: &'static str, error: PlacementError) {
        self.unique.push((index, error));
    }

    /// Reports `error` when the commit loses a write conflict against a
    /// concurrent transaction.
    pub fn on_conflict(&mut self, error: PlacementError) {
        self.conflict = Some(error);
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    fn into_sql(statements: &[String]) -> String {
        if statements.len() == 1 {
            format!("{};", statements[0])
        } else {
            format!(
                "BEGIN TRANSACTION;\n{};\nCOMMIT TRANSACTION;",
                statements.join(";\n")
            )
        }
    }

    /// Runs every staged statement in one transaction.
    pub async fn commit<C: Connection>(self, db: &Surreal<C>) -> PlacementResult<()> {
        let WriteTxn {
            statements,
            bindings,
            guards,
            unique,
            conflict,
        } = self;
        if statements.is_empty() {
            return Ok(());
        }
        let failures = Failures {
            guards,
            unique,
            conflict,
        };

        debug!(statements = statements.len(), "Committing write transaction");

        let mut query = db.query(Self::into_sql(&statements));
        for binding in bindings {
            query = query.bind(binding);
        }

        let mut response = match query.await {
            Ok(response) => response,
            Err(e) => return Err(failures.classify(vec![e])),
        };
        // Statements ahead of the one that failed only report that they
        // were not executed, so every statement error is inspected.
        let mut errors: Vec<(usize, surrealdb::Error)> =
            response.take_errors().into_iter().collect();
        if errors.is_empty() {
            return Ok(());
        }
        errors.sort_by_key(|(index, _)| *index);
        Err(failures.classify(errors.into_iter().map(|(_, e)| e).collect()))
    }
}

fn guard_tag(index: usize) -> String {
    format!("[placement guard {index}]")
}

/// Domain errors registered for the ways a commit can fail.
struct Failures {
    guards: Vec<PlacementError>,
    unique: Vec<(&'static str, PlacementError)>,
    conflict: Option<PlacementError>,
}

impl Failures {
    /// Maps the statement errors of a failed commit back to the domain
    /// error registered for the guard, unique index or write conflict that
    /// caused it.
    fn classify(self, errors: Vec<surrealdb::Error>) -> PlacementError {
        let messages = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        let conflicted = errors.iter().any(is_write_conflict);
        let Failures {
            guards,
            unique,
            conflict,
        } = self;

        if let Some(error) = registered_error(&messages, guards, unique) {
            return error;
        }
        if let (true, Some(error)) = (conflicted, conflict) {
            return error;
        }
        match root_cause(errors) {
            Some(err) => PlacementError::from(DbError::Surreal(err)),
            None => PlacementError::Database(messages),
        }
    }
}

fn is_write_conflict(err: &surrealdb::Error) -> bool {
    err.query_details() == Some(&QueryError::TransactionConflict)
}

/// The error of the statement that actually failed, skipping the
/// statements that were only rolled back with it.
fn root_cause(errors: Vec<surrealdb::Error>) -> Option<surrealdb::Error> {
    let mut fallback = None;
    for err in errors {
        if err.query_details() != Some(&QueryError::NotExecuted) {
            return Some(err);
        }
        fallback.get_or_insert(err);
    }
    fallback
}

fn registered_error(
    message: &str,
    mut guards: Vec<PlacementError>,
    mut unique: Vec<(&'static str, PlacementError)>,
) -> Option<PlacementError> {
    if let Some(position) = (0..guards.len()).find(|i| message.contains(&guard_tag(*i))) {
        return Some(guards.swap_remove(position));
    }
    unique
        .iter()
        .position(|(index, _)| message.contains(index))
        .map(|position| unique.swap_remove(position).1)
}

#[derive(Debug, SurrealValue)]
struct SequenceRow {
    last_value: i64,
}

/// Reserves `count` consecutive numeric keys for `table`.
///
/// Sequences advance outside the write transaction, so a rolled-back write
/// leaves a gap. Keys are never reused.
pub async fn next_ids<C: Connection>(
    db: &Surreal<C>,
    table: &'static str,
    count: usize,
) -> Result<Vec<i64>, DbError> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let step = count as i64;

    let result = db
        .query(
            "UPSERT type::record('_sequence', $table) SET \
             last_value = (last_value ?? 0) + $step",
        )
        .bind(("table", table))
        .bind(("step", step))
        .await?;
    let mut result = result.check()?;

    let rows: Vec<SequenceRow> = result.take(0)?;
    let last = rows
        .first()
        .map(|row| row.last_value)
        .ok_or_else(|| DbError::Decode(format!("sequence for {table} returned no value")))?;

    Ok(((last - step + 1)..=last).collect())
}
