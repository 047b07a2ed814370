//! Resource control interface.
//!
//! The only path through which the engine changes anything outside itself.
//! Production deployments implement [`ResourceControl`] against their
//! element manager; tests use [`ScriptedControl`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{MedicError, Result};
use crate::fault::{ActionType, Fault, FaultType};

/// Self-reported result of a control call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlResponse {
    Succeeded,
    Failed,
    TimedOut,
}

/// A corrective action addressed to one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action_id: String,
    pub fault_id: String,
    pub resource_id: String,
    pub action_type: ActionType,
    pub parameters: BTreeMap<String, f64>,
}

impl ActionRequest {
    /// Build the request with parameters tuned to the fault being healed
    pub fn for_fault(fault: &Fault, action_id: &str, action_type: ActionType) -> Self {
        let mut parameters = BTreeMap::new();
        match action_type {
            ActionType::PowerAdjust => {
                // interference wants less power, coverage problems want more
                let delta = if fault.fault_type == FaultType::Interference { -3.0 } else { 3.0 };
                parameters.insert("delta_db".to_string(), delta);
            }
            ActionType::RerouteTraffic => {
                parameters.insert("offload_ratio".to_string(), 0.3);
            }
            ActionType::CapacityReallocate => {
                parameters.insert("extra_capacity_pct".to_string(), 20.0);
            }
            ActionType::InterferenceMitigate => {
                parameters.insert("tilt_deg".to_string(), 2.0);
            }
            ActionType::Restart | ActionType::Reconfigure => {}
        }
        Self {
            action_id: action_id.to_string(),
            fault_id: fault.id.clone(),
            resource_id: fault.resource_id.clone(),
            action_type,
            parameters,
        }
    }
}

/// Control interface consumed by the action executor.
///
/// Retrying a failed action is assumed safe.
#[async_trait]
pub trait ResourceControl: Send + Sync {
    async fn execute(&self, request: &ActionRequest) -> Result<ControlResponse>;
}

// ============================================================================
// Scripted Control (Testing)
// ============================================================================

/// Pre-configured control behaviour
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Respond(ControlResponse),
    /// Respond after a delay
    Delayed(Duration, ControlResponse),
    /// Return an error from the interface
    Error(String),
    /// Never return
    Hang,
}

/// Control interface that replays scripted responses per resource.
///
/// Unscripted calls succeed. Every call is recorded.
pub struct ScriptedControl {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedResponse>>>,
    calls: Mutex<Vec<ActionRequest>>,
}

impl ScriptedControl {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, resource_id: &str, response: ScriptedResponse) {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(resource_id.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> Vec<ActionRequest> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_for(&self, resource_id: &str) -> Vec<ActionType> {
        self.calls()
            .into_iter()
            .filter(|c| c.resource_id == resource_id)
            .map(|c| c.action_type)
            .collect()
    }
}

impl Default for ScriptedControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceControl for ScriptedControl {
    async fn execute(&self, request: &ActionRequest) -> Result<ControlResponse> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let next = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&request.resource_id)
            .and_then(|queue| queue.pop_front());

        match next.unwrap_or(ScriptedResponse::Respond(ControlResponse::Succeeded)) {
            ScriptedResponse::Respond(response) => Ok(response),
            ScriptedResponse::Delayed(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            ScriptedResponse::Error(message) => Err(MedicError::Control(message)),
            ScriptedResponse::Hang => std::future::pending().await,
        }
    }
}
