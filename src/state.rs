use tokio::sync::mpsc;

use crate::gate::RequestGate;
use crate::models::AnalysisJob;

// app's shared state
pub struct AppState {
    pub gate: RequestGate,
    pub job_tx: mpsc::Sender<AnalysisJob>, // queue to the analysis worker
}
