// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL Node Repository
//!
//! Stores each node as a JSONB metadata document keyed by `uuid`, with the
//! promoted columns `{uuid, fid, title, parent, mimetype}` projected out
//! for the query planner, a partial unique index on `fid` and secondary
//! indexes on `parent` and `mimetype`.
//!
//! Filter translation over-approximates: clauses that map cleanly onto
//! promoted columns or JSONB text/number extraction are pushed down; every
//! other clause is dropped from the SQL and re-checked by the in-memory
//! evaluator, which is the canonical semantics. Translated queries never
//! under-approximate (`!=`/`not-in` are pushed down only for promoted,
//! non-nullable columns, where SQL NULL semantics cannot lose rows).

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::errors::AntboxError;
use crate::domain::filter::{FilterOperator, NodeFilter, NodeFilters};
use crate::domain::node::{Node, NodeFactory};
use crate::domain::repository::{NodeFilterResult, NodeRepository};

/// Metadata fields projected into direct columns
pub const PROMOTED_COLUMNS: [&str; 5] = ["uuid", "fid", "title", "parent", "mimetype"];

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    uuid        TEXT PRIMARY KEY,
    fid         TEXT NOT NULL DEFAULT '',
    title       TEXT NOT NULL,
    parent      TEXT NOT NULL,
    mimetype    TEXT NOT NULL,
    metadata    JSONB NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE UNIQUE INDEX IF NOT EXISTS nodes_fid_unique ON nodes (fid) WHERE fid <> '';
CREATE INDEX IF NOT EXISTS nodes_parent_idx ON nodes (parent);
CREATE INDEX IF NOT EXISTS nodes_mimetype_idx ON nodes (mimetype);
"#;

pub struct PostgresNodeRepository {
    pool: PgPool,
}

impl PostgresNodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if absent
    pub async fn ensure_schema(&self) -> Result<(), AntboxError> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn node_from_row(row: &sqlx::postgres::PgRow) -> Result<Node, AntboxError> {
        let metadata: serde_json::Value = row
            .try_get("metadata")
            .map_err(|e| AntboxError::Unknown(e.to_string()))?;
        NodeFactory::from_metadata(&metadata)
    }
}

// ----------------------------------------------------------------------------
// Filter translation
// ----------------------------------------------------------------------------

enum Bind {
    Text(String),
    TextArray(Vec<String>),
    Number(f64),
}

struct Translation {
    where_sql: String,
    binds: Vec<Bind>,
    /// True when at least one clause could not be pushed down; the caller
    /// must post-filter with the canonical evaluator
    residual: bool,
}

fn translate(filters: &NodeFilters) -> Translation {
    let mut binds: Vec<Bind> = Vec::new();
    let mut residual = false;
    let mut groups_sql: Vec<String> = Vec::new();

    for group in filters.to_dnf() {
        let mut clause_sql: Vec<String> = Vec::new();
        for clause in &group {
            match translate_clause(clause, binds.len()) {
                Some((sql, clause_binds)) => {
                    clause_sql.push(sql);
                    binds.extend(clause_binds);
                }
                None => residual = true,
            }
        }
        if clause_sql.is_empty() {
            // Whole group untranslatable: the group constrains nothing at
            // the SQL level (over-approximation)
            groups_sql.push("TRUE".to_string());
        } else {
            groups_sql.push(format!("({})", clause_sql.join(" AND ")));
        }
    }

    let where_sql = if groups_sql.is_empty() {
        "TRUE".to_string()
    } else {
        groups_sql.join(" OR ")
    };

    Translation {
        where_sql,
        binds,
        residual,
    }
}

fn translate_clause(clause: &NodeFilter, bind_offset: usize) -> Option<(String, Vec<Bind>)> {
    let field = clause.field();
    let promoted = PROMOTED_COLUMNS.contains(&field);
    let next = bind_offset + 1;

    match clause.operator() {
        FilterOperator::Equal => {
            if let Some(text) = clause.value().as_str() {
                if promoted {
                    return Some((format!("{field} = ${next}"), vec![Bind::Text(text.into())]));
                }
                return Some((
                    format!("metadata #>> ${next} = ${}", next + 1),
                    vec![Bind::TextArray(json_path(field)), Bind::Text(text.into())],
                ));
            }
            if let Some(number) = clause.value().as_f64() {
                if !promoted {
                    return Some((
                        format!("(metadata #>> ${next})::numeric = ${}", next + 1),
                        vec![Bind::TextArray(json_path(field)), Bind::Number(number)],
                    ));
                }
            }
            None
        }
        FilterOperator::NotEqual => {
            // Promoted columns are non-nullable, so <> cannot lose rows
            let text = clause.value().as_str()?;
            promoted
                .then(|| (format!("{field} <> ${next}"), vec![Bind::Text(text.into())]))
        }
        FilterOperator::In => {
            let values = string_list(clause.value())?;
            if promoted {
                return Some((
                    format!("{field} = ANY(${next})"),
                    vec![Bind::TextArray(values)],
                ));
            }
            Some((
                format!("metadata #>> ${next} = ANY(${})", next + 1),
                vec![Bind::TextArray(json_path(field)), Bind::TextArray(values)],
            ))
        }
        FilterOperator::NotIn => {
            let values = string_list(clause.value())?;
            promoted.then(|| {
                (
                    format!("NOT ({field} = ANY(${next}))"),
                    vec![Bind::TextArray(values)],
                )
            })
        }
        FilterOperator::LessThan
        | FilterOperator::LessThanOrEqual
        | FilterOperator::GreaterThan
        | FilterOperator::GreaterThanOrEqual => {
            let number = clause.value().as_f64()?;
            let op = match clause.operator() {
                FilterOperator::LessThan => "<",
                FilterOperator::LessThanOrEqual => "<=",
                FilterOperator::GreaterThan => ">",
                _ => ">=",
            };
            if promoted {
                return None;
            }
            Some((
                format!("(metadata #>> ${next})::numeric {op} ${}", next + 1),
                vec![Bind::TextArray(json_path(field)), Bind::Number(number)],
            ))
        }
        // match, ~=, contains-* stay residual: the engine post-filters
        _ => None,
    }
}

fn json_path(field: &str) -> Vec<String> {
    field.split('.').map(str::to_string).collect()
}

fn string_list(value: &serde_json::Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    binds: &'q [Bind],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    for bind in binds {
        query = match bind {
            Bind::Text(t) => query.bind(t),
            Bind::TextArray(a) => query.bind(a),
            Bind::Number(n) => query.bind(n),
        };
    }
    query
}

#[async_trait]
impl NodeRepository for PostgresNodeRepository {
    async fn add(&self, node: &Node) -> Result<(), AntboxError> {
        let metadata = node.metadata();
        sqlx::query(
            r#"
            INSERT INTO nodes (uuid, fid, title, parent, mimetype, metadata, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(&node.uuid)
        .bind(&node.fid)
        .bind(&node.title)
        .bind(&node.parent)
        .bind(&node.mimetype)
        .bind(&metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_uuid(&self, uuid: &str) -> Result<Node, AntboxError> {
        let row = sqlx::query("SELECT metadata FROM nodes WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AntboxError::NodeNotFound(uuid.to_string()))?;
        Self::node_from_row(&row)
    }

    async fn get_by_fid(&self, fid: &str) -> Result<Node, AntboxError> {
        let row = sqlx::query("SELECT metadata FROM nodes WHERE fid = $1 AND fid <> ''")
            .bind(fid)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AntboxError::NodeNotFound(fid.to_string()))?;
        Self::node_from_row(&row)
    }

    async fn update(&self, node: &Node) -> Result<(), AntboxError> {
        let metadata = node.metadata();
        let result = sqlx::query(
            r#"
            UPDATE nodes
            SET fid = $2, title = $3, parent = $4, mimetype = $5, metadata = $6, updated_at = NOW()
            WHERE uuid = $1
            "#,
        )
        .bind(&node.uuid)
        .bind(&node.fid)
        .bind(&node.title)
        .bind(&node.parent)
        .bind(&node.mimetype)
        .bind(&metadata)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AntboxError::NodeNotFound(node.uuid.clone()));
        }
        Ok(())
    }

    async fn delete(&self, uuid: &str) -> Result<(), AntboxError> {
        let result = sqlx::query("DELETE FROM nodes WHERE uuid = $1")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AntboxError::NodeNotFound(uuid.to_string()));
        }
        Ok(())
    }

    async fn filter(
        &self,
        filters: &NodeFilters,
        page_size: usize,
        page_token: usize,
    ) -> Result<NodeFilterResult, AntboxError> {
        let page_size = page_size.max(1);
        let page_token = page_token.max(1);
        let translation = translate(filters);

        let order = "ORDER BY (metadata ->> 'createdTime') ASC, uuid ASC";
        let nodes = if translation.residual {
            // The SQL is a superset; fetch it all, re-check with the
            // canonical evaluator, then page in memory
            let sql = format!(
                "SELECT metadata FROM nodes WHERE {} {order}",
                translation.where_sql
            );
            let rows = bind_all(sqlx::query(&sql), &translation.binds)
                .fetch_all(&self.pool)
                .await?;
            let mut nodes = Vec::with_capacity(rows.len());
            for row in &rows {
                let node = Self::node_from_row(row)?;
                if filters.is_satisfied_by(&node.metadata()) {
                    nodes.push(node);
                }
            }
            nodes
                .into_iter()
                .skip((page_token - 1) * page_size)
                .take(page_size)
                .collect()
        } else {
            let limit_index = translation.binds.len() + 1;
            let sql = format!(
                "SELECT metadata FROM nodes WHERE {} {order} LIMIT ${} OFFSET ${}",
                translation.where_sql,
                limit_index,
                limit_index + 1
            );
            let rows = bind_all(sqlx::query(&sql), &translation.binds)
                .bind(page_size as i64)
                .bind(((page_token - 1) * page_size) as i64)
                .fetch_all(&self.pool)
                .await?;
            let mut nodes = Vec::with_capacity(rows.len());
            for row in &rows {
                nodes.push(Self::node_from_row(row)?);
            }
            nodes
        };

        Ok(NodeFilterResult {
            nodes,
            page_size,
            page_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_promoted_equality_pushdown() {
        let filters = NodeFilters::And(vec![NodeFilter::new(
            "parent",
            FilterOperator::Equal,
            json!("--root--"),
        )]);
        let t = translate(&filters);
        assert_eq!(t.where_sql, "(parent = $1)");
        assert!(!t.residual);
    }

    #[test]
    fn test_jsonb_path_pushdown() {
        let filters = NodeFilters::And(vec![NodeFilter::new(
            "properties.billing:code",
            FilterOperator::Equal,
            json!("ABC"),
        )]);
        let t = translate(&filters);
        assert_eq!(t.where_sql, "(metadata #>> $1 = $2)");
        assert!(!t.residual);
    }

    #[test]
    fn test_untranslatable_clause_is_residual_and_over_approximates() {
        let filters = NodeFilters::And(vec![
            NodeFilter::new("parent", FilterOperator::Equal, json!("--root--")),
            NodeFilter::new("title", FilterOperator::Match, json!("report")),
        ]);
        let t = translate(&filters);
        // The match clause is dropped from SQL, not turned into FALSE
        assert_eq!(t.where_sql, "(parent = $1)");
        assert!(t.residual);
    }

    #[test]
    fn test_not_equal_only_pushed_down_for_promoted_columns() {
        let promoted = NodeFilters::And(vec![NodeFilter::new(
            "mimetype",
            FilterOperator::NotEqual,
            json!("text/plain"),
        )]);
        let t = translate(&promoted);
        assert!(!t.residual);

        // A JSONB != would under-approximate on absent fields, so it must
        // stay residual
        let enveloped = NodeFilters::And(vec![NodeFilter::new(
            "properties.billing:code",
            FilterOperator::NotEqual,
            json!("ABC"),
        )]);
        let t = translate(&enveloped);
        assert!(t.residual);
        assert_eq!(t.where_sql, "TRUE");
    }

    #[test]
    fn test_disjunction_translation() {
        let filters = NodeFilters::Or(vec![
            vec![NodeFilter::new(
                "parent",
                FilterOperator::Equal,
                json!("--root--"),
            )],
            vec![NodeFilter::new(
                "mimetype",
                FilterOperator::In,
                json!(["a/b", "c/d"]),
            )],
        ]);
        let t = translate(&filters);
        assert_eq!(t.where_sql, "(parent = $1) OR (mimetype = ANY($2))");
        assert!(!t.residual);
    }
}
