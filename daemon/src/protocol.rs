//! IPC protocol definitions (JSON messages)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::intake::InputFile;
use crate::progress::{RunId, RunKind, RunOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Ping,
    ListModels,
    GetActiveModel,
    ActivateModel { params: ActivateModelParams },
    StartTraining { params: StartTrainingParams },
    Analyze { params: AnalyzeParams },
    ScanDirectory { params: ScanDirectoryParams },
    CancelRun,
    GetResults,
    GetRecentDiagnoses { params: RecentDiagnosesParams },
    GetStats,
    GetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateModelParams {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTrainingParams {
    pub model_name: String,
    pub files: Vec<InputFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeParams {
    pub files: Vec<InputFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanDirectoryParams {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentDiagnosesParams {
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Response { id: Option<String>, data: serde_json::Value },
    Progress { data: ProgressData },
    Completed { data: CompletedData },
    Canceled { data: ProgressData },
    Failed { data: FailedData },
    Status { data: StatusData },
}

impl Response {
    pub fn ok(data: serde_json::Value) -> Self {
        Response::Response { id: None, data }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Response::Response { id: None, data: serde_json::json!({ "error": message.to_string() }) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressData {
    pub run_id: RunId,
    pub kind: RunKind,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletedData {
    pub run_id: RunId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<i64>,
    pub outcome: RunOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedData {
    pub run_id: RunId,
    pub kind: RunKind,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusData {
    pub running: Option<RunKind>,
    pub run_id: Option<RunId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_training() {
        let line = r#"{"cmd":"start_training","params":{"model_name":"CancerDetect v2.0","files":[{"name":"a.png"},{"name":"b.jpg","size_bytes":10}]}}"#;
        match serde_json::from_str::<Request>(line).unwrap() {
            Request::StartTraining { params } => {
                assert_eq!(params.model_name, "CancerDetect v2.0");
                assert_eq!(params.files.len(), 2);
                assert_eq!(params.files[1].size_bytes, 10);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unit_commands() {
        assert!(matches!(serde_json::from_str::<Request>(r#"{"cmd":"ping"}"#).unwrap(), Request::Ping));
        assert!(matches!(
            serde_json::from_str::<Request>(r#"{"cmd":"cancel_run"}"#).unwrap(),
            Request::CancelRun
        ));
    }

    #[test]
    fn test_progress_response_shape() {
        let resp = Response::Progress {
            data: ProgressData { run_id: 3, kind: RunKind::Analysis, percent: 50.0 },
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["type"], "progress");
        assert_eq!(value["data"]["kind"], "analysis");
        assert_eq!(value["data"]["percent"], 50.0);
    }
}
