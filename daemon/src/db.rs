//! SQLite model store
//!
//! Holds trained models, their training sessions and the diagnosis history.
//! At most one model is `active` at any time; `activate_model` demotes the
//! previous one inside the same transaction.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::clock;
use crate::scorer::{ClassificationResult, Prediction, Probabilities};

pub struct Database {
    conn: Connection,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("model {0} not found")]
    NotFound(i64),
    #[error("model {0} is still training")]
    StillTraining(i64),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Active,
    Archived,
    Training,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Training,
    Completed,
    Failed,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($text => Some($ty::$variant),)+
                    _ => None,
                }
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                $ty::parse(text).ok_or_else(|| {
                    FromSqlError::Other(format!("unknown {} '{}'", stringify!($ty), text).into())
                })
            }
        }
    };
}

text_enum!(ModelStatus { Active => "active", Archived => "archived", Training => "training" });
text_enum!(SessionStatus {
    Pending => "pending",
    Training => "training",
    Completed => "completed",
    Failed => "failed",
});

/// Fields supplied when creating a model row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewModel {
    pub name: String,
    pub accuracy: f64,
    pub trained_on: String,
    pub samples: u32,
    pub status: ModelStatus,
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: i64,
    pub name: String,
    pub accuracy: f64,
    pub trained_on: String,
    pub samples: u32,
    pub status: ModelStatus,
    pub file_path: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    pub model_id: i64,
    pub status: SessionStatus,
    pub progress: f64,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisRecord {
    pub id: i64,
    pub model_name: String,
    pub result: ClassificationResult,
    pub created_at: i64,
}

const MODEL_COLUMNS: &str =
    "id, name, accuracy, trained_on, samples, status, file_path, created_at, updated_at";

impl Database {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(include_str!("../schema.sql"))
    }

    pub fn insert_model(&self, model: &NewModel) -> rusqlite::Result<i64> {
        let now = clock::unix_now();
        self.conn.execute(
            "INSERT INTO models (name, accuracy, trained_on, samples, status, file_path, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![model.name, model.accuracy, model.trained_on, model.samples, model.status, model.file_path, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn map_model(row: &rusqlite::Row) -> rusqlite::Result<ModelRecord> {
        Ok(ModelRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            accuracy: row.get(2)?,
            trained_on: row.get(3)?,
            samples: row.get(4)?,
            status: row.get(5)?,
            file_path: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    /// Newest first.
    pub fn get_models(&self) -> rusqlite::Result<Vec<ModelRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MODEL_COLUMNS} FROM models ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], Self::map_model)?;
        rows.collect()
    }

    pub fn get_model(&self, id: i64) -> rusqlite::Result<Option<ModelRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {MODEL_COLUMNS} FROM models WHERE id = ?1"),
                params![id],
                Self::map_model,
            )
            .optional()
    }

    pub fn active_model(&self) -> rusqlite::Result<Option<ModelRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {MODEL_COLUMNS} FROM models WHERE status = 'active' LIMIT 1"),
                [],
                Self::map_model,
            )
            .optional()
    }

    /// Setting `Active` goes through `activate_model` and its demotion rule.
    pub fn set_model_status(&mut self, id: i64, status: ModelStatus) -> StoreResult<()> {
        if status == ModelStatus::Active {
            return self.activate_model(id).map(|_| ());
        }
        let changed = self.conn.execute(
            "UPDATE models SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status, clock::unix_now(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Makes `id` the only active model. Returns the ids that were archived.
    pub fn activate_model(&mut self, id: i64) -> StoreResult<Vec<i64>> {
        let current = self.get_model(id)?.ok_or(StoreError::NotFound(id))?;
        if current.status == ModelStatus::Training {
            return Err(StoreError::StillTraining(id));
        }
        self.promote(id, None)
    }

    /// Demotes every other active model and activates `id`, optionally
    /// recording its final accuracy, all in one transaction.
    fn promote(&mut self, id: i64, accuracy: Option<f64>) -> StoreResult<Vec<i64>> {
        let now = clock::unix_now();
        let tx = self.conn.transaction()?;
        if let Some(accuracy) = accuracy {
            let changed = tx.execute(
                "UPDATE models SET accuracy = ?1, updated_at = ?2 WHERE id = ?3",
                params![accuracy, now, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(id));
            }
        }
        let demoted: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id FROM models WHERE status = 'active' AND id != ?1")?;
            let rows = stmt.query_map(params![id], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        tx.execute(
            "UPDATE models SET status = 'archived', updated_at = ?1 WHERE status = 'active' AND id != ?2",
            params![now, id],
        )?;
        let changed = tx.execute(
            "UPDATE models SET status = 'active', updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        tx.commit()?;
        Ok(demoted)
    }

    /// Records the final accuracy of a finished training run and activates it.
    pub fn complete_training(&mut self, id: i64, accuracy: f64) -> StoreResult<Vec<i64>> {
        self.promote(id, Some(accuracy))
    }

    /// Sessions are kept as history.
    pub fn delete_model(&self, id: i64) -> rusqlite::Result<bool> {
        let changed = self.conn.execute("DELETE FROM models WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    pub fn start_session(&self, model_id: i64) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO training_sessions (model_id, status, progress, started_at) VALUES (?1, ?2, 0, ?3)",
            params![model_id, SessionStatus::Training, clock::unix_now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_session_progress(&self, id: i64, progress: f64) -> rusqlite::Result<()> {
        self.conn.execute(
            "UPDATE training_sessions SET progress = ?1 WHERE id = ?2",
            params![progress, id],
        )?;
        Ok(())
    }

    pub fn finish_session(&self, id: i64) -> rusqlite::Result<()> {
        self.conn.execute(
            "UPDATE training_sessions SET status = ?1, progress = 100, completed_at = ?2 WHERE id = ?3",
            params![SessionStatus::Completed, clock::unix_now(), id],
        )?;
        Ok(())
    }

    pub fn fail_session(&self, id: i64, message: &str) -> rusqlite::Result<()> {
        self.conn.execute(
            "UPDATE training_sessions SET status = ?1, completed_at = ?2, error_message = ?3 WHERE id = ?4",
            params![SessionStatus::Failed, clock::unix_now(), message, id],
        )?;
        Ok(())
    }

    pub fn get_session(&self, id: i64) -> rusqlite::Result<Option<SessionRecord>> {
        self.conn
            .query_row(
                "SELECT id, model_id, status, progress, started_at, completed_at, error_message
                 FROM training_sessions WHERE id = ?1",
                params![id],
                |row| {
                    Ok(SessionRecord {
                        id: row.get(0)?,
                        model_id: row.get(1)?,
                        status: row.get(2)?,
                        progress: row.get(3)?,
                        started_at: row.get(4)?,
                        completed_at: row.get(5)?,
                        error_message: row.get(6)?,
                    })
                },
            )
            .optional()
    }

    pub fn insert_diagnosis(&self, model_name: &str, result: &ClassificationResult) -> rusqlite::Result<i64> {
        let p = &result.probabilities;
        let areas = serde_json::to_string(&result.areas)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        self.conn.execute(
            "INSERT INTO diagnoses (model_name, filename, prediction, confidence, benign_probability,
                 malignant_probability, suspicious_probability, timestamp, suspicious_areas, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                model_name,
                result.filename,
                result.prediction.as_str(),
                result.confidence,
                p.benign,
                p.malignant,
                p.suspicious,
                result.timestamp,
                areas,
                clock::unix_now()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn recent_diagnoses(&self, limit: u32) -> rusqlite::Result<Vec<DiagnosisRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, model_name, filename, prediction, confidence, benign_probability,
                    malignant_probability, suspicious_probability, timestamp, suspicious_areas, created_at
             FROM diagnoses ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            let prediction: String = row.get(3)?;
            let prediction = Prediction::from_str_opt(&prediction).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    format!("unknown prediction '{prediction}'").into(),
                )
            })?;
            let areas: String = row.get(9)?;
            let areas = serde_json::from_str(&areas).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
            })?;
            Ok(DiagnosisRecord {
                id: row.get(0)?,
                model_name: row.get(1)?,
                result: ClassificationResult {
                    filename: row.get(2)?,
                    prediction,
                    confidence: row.get(4)?,
                    probabilities: Probabilities {
                        benign: row.get(5)?,
                        malignant: row.get(6)?,
                        suspicious: row.get(7)?,
                    },
                    timestamp: row.get(8)?,
                    areas,
                },
                created_at: row.get(10)?,
            })
        })?;
        rows.collect()
    }

    pub fn count_diagnoses(&self) -> rusqlite::Result<u64> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM diagnoses", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn count_diagnoses_by_prediction(&self, prediction: Prediction) -> rusqlite::Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM diagnoses WHERE prediction = ?1",
            params![prediction.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Count and mean accuracy over models that finished training.
    pub fn trained_model_summary(&self) -> rusqlite::Result<(u64, Option<f64>)> {
        self.conn.query_row(
            "SELECT COUNT(*), AVG(accuracy) FROM models WHERE status != 'training'",
            [],
            |row| Ok((row.get::<_, i64>(0)? as u64, row.get(1)?)),
        )
    }
}
