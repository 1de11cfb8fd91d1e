//! SQLite-backed knowledge graph repository.
//!
//! Encapsulates the store behind semantic operations; nothing outside this
//! module speaks SQL. Saves are atomic per graph, fetches walk the
//! `STARTS_WITH · NEXT*` chain, repairs splice new steps into the chain and
//! record a REPAIRED_TO row.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{ActionGraph, Finding, Fingerprint, Step};
use crate::repository::schema::{initialize_schema, is_initialized, reset_schema};

/// Reason recorded on repair edges written by the self-repair path.
pub const REPAIR_REASON: &str = "Systemic repair";

/// One fingerprint matched by vector similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarFingerprint {
    pub fingerprint: Fingerprint,
    pub score: f32,
}

/// One recorded repair splice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairRecord {
    pub action_graph_id: String,
    pub failed_order: u32,
    pub reason: String,
    pub repaired_at: String,
    pub old_step: Option<Step>,
    pub new_step: Option<Step>,
}

/// SQLite-backed repository for the knowledge graph.
pub struct GraphRepository {
    conn: Arc<Mutex<Connection>>,
}

impl GraphRepository {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        if !is_initialized(&conn) {
            initialize_schema(&conn)?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&mut conn).map_err(Error::from)
    }

    /// Wipe the store and recreate the schema.
    pub fn reset(&self) -> Result<()> {
        self.with_conn(|conn| reset_schema(conn))
    }

    // ==================== Fingerprints ====================

    /// Upsert a fingerprint by hash (idempotent).
    pub fn save_fingerprint(&self, fingerprint: &mut Fingerprint) -> Result<()> {
        fingerprint.ensure_hash();
        let signals = serde_json::to_string(&fingerprint.security_signals)?;
        let embedding = embedding_to_blob(fingerprint.observation_embedding.as_deref());

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO fingerprints (
                    hash, tech_stack, auth_model, endpoint_pattern,
                    security_signals, observation_text, observation_embedding
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(hash) DO UPDATE SET
                    tech_stack = excluded.tech_stack,
                    auth_model = excluded.auth_model,
                    endpoint_pattern = excluded.endpoint_pattern,
                    security_signals = excluded.security_signals,
                    observation_text = excluded.observation_text,
                    observation_embedding = excluded.observation_embedding",
                params![
                    fingerprint.hash,
                    fingerprint.tech_stack,
                    fingerprint.auth_model,
                    fingerprint.endpoint_pattern,
                    signals,
                    fingerprint.observation_text,
                    embedding,
                ],
            )?;
            Ok(())
        })
    }

    /// Exact hash lookup.
    pub fn get_fingerprint_by_hash(&self, hash: &str) -> Result<Option<Fingerprint>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT hash, tech_stack, auth_model, endpoint_pattern,
                        security_signals, observation_text, observation_embedding
                 FROM fingerprints WHERE hash = ?1",
                params![hash],
                row_to_fingerprint,
            )
            .optional()
        })
    }

    /// Cosine-similarity top-K lookup over fingerprint embeddings.
    ///
    /// Retained for warm-start-by-similarity; the core compile path does
    /// not call it.
    pub fn find_similar_fingerprints(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SimilarFingerprint>> {
        let candidates = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT hash, tech_stack, auth_model, endpoint_pattern,
                        security_signals, observation_text, observation_embedding
                 FROM fingerprints WHERE observation_embedding IS NOT NULL",
            )?;
            let rows = stmt
                .query_map([], row_to_fingerprint)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        let mut scored: Vec<SimilarFingerprint> = candidates
            .into_iter()
            .filter_map(|fp| {
                let score = cosine_similarity(embedding, fp.observation_embedding.as_deref()?);
                Some(SimilarFingerprint {
                    fingerprint: fp,
                    score,
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    // ==================== Action graphs ====================

    /// Store an ActionGraph with all steps and edges in one transaction.
    pub fn save_action_graph(
        &self,
        fingerprint_hash: &str,
        action_graph: &mut ActionGraph,
    ) -> Result<()> {
        action_graph.ensure_id();
        if action_graph.created_at.is_none() {
            action_graph.created_at = Some(Utc::now().to_rfc3339());
        }

        let graph_id = action_graph.id.clone().unwrap_or_default();
        let mut steps = action_graph.steps.clone();
        steps.sort_by_key(|s| s.order);

        self.with_conn(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO action_graphs (
                    id, fingerprint_hash, vulnerability_type, description,
                    confidence, times_executed, times_succeeded, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    graph_id,
                    fingerprint_hash,
                    action_graph.vulnerability_type,
                    action_graph.description,
                    action_graph.confidence,
                    action_graph.times_executed as i64,
                    action_graph.times_succeeded as i64,
                    action_graph.created_at,
                    action_graph.updated_at,
                ],
            )?;

            let mut step_ids = Vec::with_capacity(steps.len());
            for step in &steps {
                insert_step(&tx, &graph_id, step)?;
                step_ids.push(tx.last_insert_rowid());
            }

            if let Some(first) = step_ids.first() {
                tx.execute(
                    "INSERT INTO step_edges (graph_id, kind, from_step, to_step)
                     VALUES (?1, 'STARTS_WITH', NULL, ?2)",
                    params![graph_id, first],
                )?;
            }
            for pair in step_ids.windows(2) {
                tx.execute(
                    "INSERT INTO step_edges (graph_id, kind, from_step, to_step)
                     VALUES (?1, 'NEXT', ?2, ?3)",
                    params![graph_id, pair[0], pair[1]],
                )?;
            }

            tx.commit()
        })?;

        debug!(graph_id = %graph_id, steps = steps.len(), "saved action graph");
        Ok(())
    }

    /// Fetch the current (newest) ActionGraph for a fingerprint, steps
    /// eager-loaded by walking `STARTS_WITH · NEXT*`.
    pub fn get_action_graph_with_steps(
        &self,
        fingerprint_hash: &str,
    ) -> Result<Option<ActionGraph>> {
        self.with_conn(|conn| {
            let Some((graph_id, mut graph)) = conn
                .query_row(
                    "SELECT id, vulnerability_type, description, confidence,
                            times_executed, times_succeeded, created_at, updated_at
                     FROM action_graphs
                     WHERE fingerprint_hash = ?1
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT 1",
                    params![fingerprint_hash],
                    |row| {
                        let id: String = row.get(0)?;
                        let graph = ActionGraph {
                            id: Some(id.clone()),
                            vulnerability_type: row.get(1)?,
                            description: row.get(2)?,
                            steps: Vec::new(),
                            confidence: row.get(3)?,
                            times_executed: row.get::<_, i64>(4)? as u64,
                            times_succeeded: row.get::<_, i64>(5)? as u64,
                            created_at: row.get(6)?,
                            updated_at: row.get(7)?,
                        };
                        Ok((id, graph))
                    },
                )
                .optional()?
            else {
                return Ok(None);
            };

            // Entry point; a severed chain (no STARTS_WITH) makes the
            // graph unusable and is reported as absent.
            let Some(first) = conn
                .query_row(
                    "SELECT to_step FROM step_edges
                     WHERE graph_id = ?1 AND kind = 'STARTS_WITH'",
                    params![graph_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?
            else {
                return Ok(None);
            };

            let mut chain = vec![first];
            let mut current = first;
            while chain.len() <= 10_000 {
                let next = conn
                    .query_row(
                        "SELECT to_step FROM step_edges
                         WHERE graph_id = ?1 AND kind = 'NEXT' AND from_step = ?2",
                        params![graph_id, current],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()?;
                match next {
                    Some(id) if !chain.contains(&id) => {
                        chain.push(id);
                        current = id;
                    }
                    _ => break,
                }
            }

            let mut steps = Vec::with_capacity(chain.len());
            for step_id in chain {
                let step = conn.query_row(
                    "SELECT step_order, phase, step_type, command, parameters,
                            output_file, success_criteria, deterministic
                     FROM steps WHERE id = ?1",
                    params![step_id],
                    row_to_step,
                )?;
                steps.push(step);
            }
            graph.steps = steps;
            Ok(Some(graph))
        })
    }

    /// Atomically bump execution metrics, exactly once per run.
    pub fn increment_execution_count(&self, graph_id: &str, succeeded: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE action_graphs SET
                    times_executed = times_executed + 1,
                    times_succeeded = times_succeeded + ?2
                 WHERE id = ?1",
                params![graph_id, succeeded as i64],
            )?;
            Ok(())
        })
    }

    /// Sever the newest graph's step chain for a fingerprint, forcing a
    /// recompile on the next run. Test affordance.
    pub fn corrupt_action_graph(&self, fingerprint_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let Some(graph_id) = conn
                .query_row(
                    "SELECT id FROM action_graphs
                     WHERE fingerprint_hash = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT 1",
                    params![fingerprint_hash],
                    |row| row.get::<_, String>(0),
                )
                .optional()?
            else {
                return Ok(false);
            };
            let deleted = conn.execute(
                "DELETE FROM step_edges WHERE graph_id = ?1 AND kind = 'STARTS_WITH'",
                params![graph_id],
            )?;
            Ok(deleted > 0)
        })
    }

    // ==================== Findings ====================

    /// Store a finding produced by a graph execution.
    pub fn save_finding(&self, graph_id: &str, finding: &mut Finding) -> Result<()> {
        finding.ensure_id();
        if finding.discovered_at.is_none() {
            finding.discovered_at = Some(Utc::now().to_rfc3339());
        }
        let embedding = embedding_to_blob(finding.observation_embedding.as_deref());

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO findings (
                    id, graph_id, observation, severity, evidence_summary,
                    target_url, observation_embedding, discovered_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    finding.id,
                    graph_id,
                    finding.observation,
                    finding.severity.to_string(),
                    finding.evidence_summary,
                    finding.target_url,
                    embedding,
                    finding.discovered_at,
                ],
            )?;
            Ok(())
        })
    }

    // ==================== Repair ====================

    /// Replace the failed step in the chain with new steps, rewiring NEXT
    /// edges and recording a REPAIRED_TO row.
    pub fn repair_step_chain(
        &self,
        graph_id: &str,
        failed_order: u32,
        new_steps: &[Step],
    ) -> Result<()> {
        if new_steps.is_empty() {
            return Err(Error::repository("repair requires at least one new step"));
        }

        let graph_id = graph_id.to_string();
        let new_steps = new_steps.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let (failed_id, old_step) = tx.query_row(
                "SELECT id, step_order, phase, step_type, command, parameters,
                        output_file, success_criteria, deterministic
                 FROM steps WHERE graph_id = ?1 AND step_order = ?2",
                params![graph_id, failed_order],
                |row| {
                    let id: i64 = row.get(0)?;
                    let step = row_to_step_at(row, 1)?;
                    Ok((id, step))
                },
            )?;

            let predecessor = tx
                .query_row(
                    "SELECT from_step FROM step_edges
                     WHERE graph_id = ?1 AND kind = 'NEXT' AND to_step = ?2",
                    params![graph_id, failed_id],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .optional()?
                .flatten();
            let successor = tx
                .query_row(
                    "SELECT to_step FROM step_edges
                     WHERE graph_id = ?1 AND kind = 'NEXT' AND from_step = ?2",
                    params![graph_id, failed_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            let was_entry: bool = tx.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM step_edges
                    WHERE graph_id = ?1 AND kind = 'STARTS_WITH' AND to_step = ?2
                 )",
                params![graph_id, failed_id],
                |row| row.get(0),
            )?;

            // Edges into and out of the failed step go with it (CASCADE).
            tx.execute("DELETE FROM steps WHERE id = ?1", params![failed_id])?;

            let mut new_ids = Vec::with_capacity(new_steps.len());
            for step in &new_steps {
                insert_step(&tx, &graph_id, step)?;
                new_ids.push(tx.last_insert_rowid());
            }
            for pair in new_ids.windows(2) {
                tx.execute(
                    "INSERT INTO step_edges (graph_id, kind, from_step, to_step)
                     VALUES (?1, 'NEXT', ?2, ?3)",
                    params![graph_id, pair[0], pair[1]],
                )?;
            }

            let first_new = new_ids[0];
            let last_new = *new_ids.last().expect("non-empty new steps");
            match predecessor {
                Some(before) => {
                    tx.execute(
                        "INSERT INTO step_edges (graph_id, kind, from_step, to_step)
                         VALUES (?1, 'NEXT', ?2, ?3)",
                        params![graph_id, before, first_new],
                    )?;
                }
                None if was_entry => {
                    tx.execute(
                        "INSERT INTO step_edges (graph_id, kind, from_step, to_step)
                         VALUES (?1, 'STARTS_WITH', NULL, ?2)",
                        params![graph_id, first_new],
                    )?;
                }
                None => {}
            }
            if let Some(after) = successor {
                tx.execute(
                    "INSERT INTO step_edges (graph_id, kind, from_step, to_step)
                     VALUES (?1, 'NEXT', ?2, ?3)",
                    params![graph_id, last_new, after],
                )?;
            }

            let old_json = serde_json::to_string(&old_step).unwrap_or_default();
            let new_json = serde_json::to_string(&new_steps[0]).unwrap_or_default();
            tx.execute(
                "INSERT INTO repairs (graph_id, failed_order, reason, repaired_at, old_step, new_step)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    graph_id,
                    failed_order,
                    REPAIR_REASON,
                    Utc::now().to_rfc3339(),
                    old_json,
                    new_json,
                ],
            )?;

            tx.commit()
        })
    }

    /// Repair history for all graphs triggered by a fingerprint, newest
    /// first. Empty when no repair has been recorded.
    pub fn get_repair_history(
        &self,
        fingerprint_hash: &str,
        max_results: usize,
    ) -> Result<Vec<RepairRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.graph_id, r.failed_order, r.reason, r.repaired_at,
                        r.old_step, r.new_step
                 FROM repairs r
                 JOIN action_graphs ag ON ag.id = r.graph_id
                 WHERE ag.fingerprint_hash = ?1 AND r.reason = ?2
                 ORDER BY r.repaired_at DESC
                 LIMIT ?3",
            )?;
            let records = stmt
                .query_map(
                    params![fingerprint_hash, REPAIR_REASON, max_results as i64],
                    |row| {
                        Ok(RepairRecord {
                            action_graph_id: row.get(0)?,
                            failed_order: row.get::<_, i64>(1)? as u32,
                            reason: row.get(2)?,
                            repaired_at: row.get(3)?,
                            old_step: row
                                .get::<_, Option<String>>(4)?
                                .and_then(|s| serde_json::from_str(&s).ok()),
                            new_step: row
                                .get::<_, Option<String>>(5)?
                                .and_then(|s| serde_json::from_str(&s).ok()),
                        })
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
    }
}

fn insert_step(tx: &rusqlite::Transaction<'_>, graph_id: &str, step: &Step) -> rusqlite::Result<()> {
    let parameters =
        serde_json::to_string(&step.parameters).unwrap_or_else(|_| "{}".to_string());
    tx.execute(
        "INSERT INTO steps (
            graph_id, step_order, phase, step_type, command,
            parameters, output_file, success_criteria, deterministic
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            graph_id,
            step.order,
            step.phase.to_string(),
            step.step_type.to_string(),
            step.command,
            parameters,
            step.output_file,
            step.success_criteria,
            step.deterministic as i64,
        ],
    )?;
    Ok(())
}

fn row_to_fingerprint(row: &Row<'_>) -> rusqlite::Result<Fingerprint> {
    let signals: String = row.get(4)?;
    Ok(Fingerprint {
        hash: row.get(0)?,
        tech_stack: row.get(1)?,
        auth_model: row.get(2)?,
        endpoint_pattern: row.get(3)?,
        security_signals: serde_json::from_str(&signals).unwrap_or_default(),
        observation_text: row.get(5)?,
        observation_embedding: row
            .get::<_, Option<Vec<u8>>>(6)?
            .map(|bytes| blob_to_embedding(&bytes)),
    })
}

fn row_to_step(row: &Row<'_>) -> rusqlite::Result<Step> {
    row_to_step_at(row, 0)
}

fn row_to_step_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<Step> {
    let phase: String = row.get(offset + 1)?;
    let step_type: String = row.get(offset + 2)?;
    let parameters: String = row.get(offset + 4)?;
    Ok(Step {
        order: row.get::<_, i64>(offset)? as u32,
        phase: phase.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                offset + 1,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?,
        step_type: step_type.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                offset + 2,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?,
        command: row.get(offset + 3)?,
        parameters: serde_json::from_str(&parameters).unwrap_or_default(),
        output_file: row.get(offset + 5)?,
        success_criteria: row.get(offset + 6)?,
        deterministic: row.get::<_, i64>(offset + 7)? != 0,
    })
}

fn embedding_to_blob(embedding: Option<&[f32]>) -> Option<Vec<u8>> {
    embedding.map(|e| e.iter().flat_map(|f| f.to_le_bytes()).collect())
}

fn blob_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().expect("4-byte chunk")))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
