use agent_runtime::tiers::{
    ExecutionRequest, ExecutionResponse, TierError, TierExecutor, TierResult,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;

/// Leaf worker that replays a scripted sequence of results
///
/// Once the script runs out every call completes with `{"ok": true}`.
#[derive(Debug, Default)]
pub struct ScriptedDelegate {
    script: Mutex<VecDeque<TierResult<ExecutionResponse>>>,
    calls: Mutex<Vec<ExecutionRequest>>,
}

impl ScriptedDelegate {
    pub fn new(script: Vec<TierResult<ExecutionResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail `times` times with `message`, then succeed
    pub fn failing(times: usize, message: &str) -> Self {
        Self::new(
            (0..times)
                .map(|_| Err(TierError::delegate_failed("scripted_worker", message)))
                .collect(),
        )
    }

    pub fn calls(&self) -> Vec<ExecutionRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl TierExecutor for ScriptedDelegate {
    async fn execute(&self, request: ExecutionRequest) -> TierResult<ExecutionResponse> {
        let id = request.execution_id.clone();
        self.calls.lock().push(request);
        let next = self.script.lock().pop_front();
        match next {
            Some(Ok(mut response)) => {
                response.execution_id = id;
                Ok(response)
            }
            Some(Err(e)) => Err(e),
            None => Ok(ExecutionResponse::completed(id, json!({"ok": true}))),
        }
    }

    fn tier_name(&self) -> &str {
        "scripted_worker"
    }
}
