//! Dashboard aggregates over the model store

use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::scorer::Prediction;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub trained_models: u64,
    pub images_analyzed: u64,
    /// Mean over models that finished training.
    pub average_accuracy: Option<f64>,
    /// Malignant plus suspicious diagnoses.
    pub cases_detected: u64,
}

impl DashboardStats {
    pub fn collect(db: &Database) -> rusqlite::Result<Self> {
        let (trained_models, average_accuracy) = db.trained_model_summary()?;
        let cases_detected = db.count_diagnoses_by_prediction(Prediction::Malignant)?
            + db.count_diagnoses_by_prediction(Prediction::Suspicious)?;
        Ok(Self {
            trained_models,
            images_analyzed: db.count_diagnoses()?,
            average_accuracy,
            cases_detected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ModelStatus, NewModel};
    use crate::scorer::{ClassificationResult, Probabilities};

    fn diagnosis(prediction: Prediction) -> ClassificationResult {
        ClassificationResult {
            filename: "scan.jpg".to_string(),
            prediction,
            confidence: 50.0,
            probabilities: Probabilities { benign: 30.0, malignant: 20.0, suspicious: 50.0 },
            timestamp: "15/01/2024, 14:30:00".to_string(),
            areas: Vec::new(),
        }
    }

    #[test]
    fn test_empty_store() {
        let db = Database::open_in_memory().unwrap();
        db.init_schema().unwrap();
        let stats = DashboardStats::collect(&db).unwrap();
        assert_eq!(stats.trained_models, 0);
        assert_eq!(stats.images_analyzed, 0);
        assert_eq!(stats.average_accuracy, None);
        assert_eq!(stats.cases_detected, 0);
    }

    #[test]
    fn test_cases_detected_counts_malignant_and_suspicious() {
        let db = Database::open_in_memory().unwrap();
        db.init_schema().unwrap();
        for p in [Prediction::Benign, Prediction::Malignant, Prediction::Suspicious, Prediction::Suspicious] {
            db.insert_diagnosis("m", &diagnosis(p)).unwrap();
        }
        db.insert_model(&NewModel {
            name: "m".to_string(),
            accuracy: 94.2,
            trained_on: "15/01/2024".to_string(),
            samples: 5,
            status: ModelStatus::Archived,
            file_path: None,
        })
        .unwrap();

        let stats = DashboardStats::collect(&db).unwrap();
        assert_eq!(stats.images_analyzed, 4);
        assert_eq!(stats.cases_detected, 3);
        assert_eq!(stats.trained_models, 1);
        assert_eq!(stats.average_accuracy, Some(94.2));
    }
}
