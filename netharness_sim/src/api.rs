//! Typed request dispatch for the load-generator and testnet surfaces.
//!
//! Each surface accepts a JSON object whose `action` field selects one
//! variant of a tagged enum. Replies carry an HTTP-like status code and the
//! `{success, data?, error?}` envelope; transport framing is left to callers.

use crate::generation::GenerationOptions;
use crate::harness::Harness;

use netharness_core::analyzer::analyze_transaction_patterns;
use netharness_core::error::{ErrorKind, HarnessError};
use netharness_core::pattern::TransactionPattern;
use netharness_core::profile::LoadProfileSpec;
use netharness_core::scenario::{FaultDirective, Scenario};
use netharness_core::topology::TopologySpec;
use netharness_core::transaction::ObservedTransaction;
use netharness_env::{HarnessContext, RunId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, warn};

/// Load generator `GET` actions.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum LoadGeneratorQuery {
    Patterns,
    LoadProfiles,
    UserBehaviors,
    GenerationHistory,
    ActiveGenerations,
    Generation { id: String },
}

/// Load generator `POST` actions.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum LoadGeneratorCommand {
    GenerateLoad(GenerateLoadRequest),
    CreateCustomProfile(LoadProfileSpec),
    AnalyzePatterns {
        transactions: Vec<Value>,
    },
    #[serde(rename_all = "camelCase")]
    StopGeneration {
        generation_id: String,
    },
}

/// Body of `generate-load`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateLoadRequest {
    pub profile_id: String,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub user_behaviors: Vec<String>,
    #[serde(default)]
    pub custom_patterns: Vec<TransactionPattern>,
    #[serde(default)]
    pub start_time: Option<u64>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl From<GenerateLoadRequest> for GenerationOptions {
    fn from(request: GenerateLoadRequest) -> Self {
        Self {
            regions: request.regions,
            user_behaviors: request.user_behaviors,
            custom_patterns: request.custom_patterns,
            start_time_ms: request.start_time,
            seed: request.seed,
        }
    }
}

/// Testnet `GET` actions.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum TestnetQuery {
    Topologies,
    Topology { id: String },
    Nodes,
    Node { id: String },
    RunningTests,
    #[serde(rename_all = "camelCase")]
    TestHistory {
        #[serde(default)]
        topology_id: Option<String>,
    },
    Test { id: String },
}

/// Testnet `POST` actions.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum TestnetCommand {
    CreateTopology(TopologySpec),
    #[serde(rename_all = "camelCase")]
    StartTest {
        topology_id: String,
        scenario: Scenario,
    },
    #[serde(rename_all = "camelCase")]
    StopTest {
        test_id: String,
    },
    #[serde(rename_all = "camelCase")]
    InjectFault {
        test_id: String,
        fault: FaultDirective,
    },
}

/// The response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A response with its status code.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiReply {
    pub status: u16,
    pub body: ApiResponse,
}

impl ApiReply {
    pub fn ok<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                status: 200,
                body: ApiResponse {
                    success: true,
                    data: Some(value),
                    error: None,
                },
            },
            Err(e) => Self::internal(&e.to_string()),
        }
    }

    pub fn failure(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiResponse {
                success: false,
                data: None,
                error: Some(message.into()),
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::failure(400, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::failure(404, message)
    }

    /// Logs the detail and returns a generic 500.
    fn internal(detail: &str) -> Self {
        error!("Internal error: {}", detail);
        Self::failure(500, "Internal server error")
    }

    pub fn from_error(err: &HarnessError) -> Self {
        match err.kind() {
            ErrorKind::NotFound => Self::not_found(err.to_string()),
            ErrorKind::InvalidSpec => Self::bad_request(err.to_string()),
            ErrorKind::AlreadyTerminal => Self::failure(409, err.to_string()),
            ErrorKind::SimulationFault | ErrorKind::Storage => Self::internal(&err.to_string()),
        }
    }

    fn from_result<T: Serialize>(result: Result<T, HarnessError>) -> Self {
        match result {
            Ok(data) => Self::ok(&data),
            Err(e) => Self::from_error(&e),
        }
    }

    pub fn is_success(&self) -> bool {
        self.body.success
    }
}

/// Turns `generation&id=abc` style query strings into parameters.
///
/// A leading segment without `=` is taken as the action.
pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for (i, segment) in query.trim_start_matches('?').split('&').enumerate() {
        if segment.is_empty() {
            continue;
        }
        match segment.split_once('=') {
            Some((key, value)) => {
                params.insert(key.to_string(), value.to_string());
            }
            None if i == 0 => {
                params.insert("action".to_string(), segment.to_string());
            }
            None => {
                params.insert(segment.to_string(), String::new());
            }
        }
    }
    params
}

fn params_to_value(params: &BTreeMap<String, String>) -> Value {
    let object: Map<String, Value> = params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(object)
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ApiReply> {
    serde_json::from_value(value).map_err(|e| {
        warn!("Rejected request: {}", e);
        ApiReply::bad_request(e.to_string())
    })
}

/// Dispatches typed requests against a harness.
pub struct HarnessApi<C: HarnessContext> {
    harness: Arc<Harness<C>>,
}

impl<C: HarnessContext> HarnessApi<C> {
    pub fn new(harness: Arc<Harness<C>>) -> Self {
        Self { harness }
    }

    pub fn harness(&self) -> &Harness<C> {
        &self.harness
    }

    /// `GET` on the load generator with query parameters.
    pub fn load_generator_get(&self, params: &BTreeMap<String, String>) -> ApiReply {
        match decode(params_to_value(params)) {
            Ok(query) => self.load_generator_query(query),
            Err(reply) => reply,
        }
    }

    /// `POST` on the load generator with a JSON body.
    pub fn load_generator_post(&self, body: Value) -> ApiReply {
        match decode(body) {
            Ok(command) => self.load_generator_command(command),
            Err(reply) => reply,
        }
    }

    /// `GET` on the testnet manager with query parameters.
    pub fn testnet_get(&self, params: &BTreeMap<String, String>) -> ApiReply {
        match decode(params_to_value(params)) {
            Ok(query) => self.testnet_query(query),
            Err(reply) => reply,
        }
    }

    /// `POST` on the testnet manager with a JSON body.
    pub fn testnet_post(&self, body: Value) -> ApiReply {
        match decode(body) {
            Ok(command) => self.testnet_command(command),
            Err(reply) => reply,
        }
    }

    pub fn load_generator_query(&self, query: LoadGeneratorQuery) -> ApiReply {
        let tracker = &self.harness.generations;
        match query {
            LoadGeneratorQuery::Patterns => ApiReply::ok(&tracker.list_patterns()),
            LoadGeneratorQuery::LoadProfiles => ApiReply::ok(&tracker.list_profiles()),
            LoadGeneratorQuery::UserBehaviors => ApiReply::ok(&tracker.list_user_behaviors()),
            LoadGeneratorQuery::GenerationHistory => ApiReply::ok(&tracker.generation_history()),
            LoadGeneratorQuery::ActiveGenerations => ApiReply::ok(&tracker.active_generations()),
            LoadGeneratorQuery::Generation { id } => {
                match id.parse::<RunId>().ok().and_then(|id| tracker.get_generation(id)) {
                    Some(generation) => ApiReply::ok(&generation),
                    None => ApiReply::from_error(&HarnessError::GenerationNotFound(id)),
                }
            }
        }
    }

    pub fn load_generator_command(&self, command: LoadGeneratorCommand) -> ApiReply {
        let tracker = &self.harness.generations;
        match command {
            LoadGeneratorCommand::GenerateLoad(request) => {
                let profile_id = request.profile_id.clone();
                ApiReply::from_result(tracker.generate_load(&profile_id, request.into()))
            }
            LoadGeneratorCommand::CreateCustomProfile(spec) => {
                ApiReply::from_result(tracker.create_custom_load_profile(spec))
            }
            LoadGeneratorCommand::AnalyzePatterns { transactions } => {
                let observed: Vec<ObservedTransaction> =
                    transactions.iter().map(ObservedTransaction::from_value).collect();
                let behaviors = tracker.list_user_behaviors();
                ApiReply::ok(&analyze_transaction_patterns(&observed, &behaviors))
            }
            LoadGeneratorCommand::StopGeneration { generation_id } => {
                let stopped = generation_id
                    .parse::<RunId>()
                    .map_or(false, |id| tracker.stop_generation(id));
                if stopped {
                    ApiReply::ok(&serde_json::json!({
                        "message": format!("Generation {} stopped", generation_id)
                    }))
                } else {
                    ApiReply::not_found("Generation not found or already stopped")
                }
            }
        }
    }

    pub fn testnet_query(&self, query: TestnetQuery) -> ApiReply {
        let registry = &self.harness.registry;
        let orchestrator = &self.harness.orchestrator;
        match query {
            TestnetQuery::Topologies => ApiReply::ok(&registry.list_topologies()),
            TestnetQuery::Topology { id } => match registry.get_topology(&id) {
                Some(topology) => ApiReply::ok(&topology),
                None => ApiReply::from_error(&HarnessError::TopologyNotFound(id)),
            },
            TestnetQuery::Nodes => ApiReply::ok(&registry.list_nodes()),
            TestnetQuery::Node { id } => match registry.get_node(&id) {
                Some(node) => ApiReply::ok(&node),
                None => ApiReply::from_error(&HarnessError::NodeNotFound(id)),
            },
            TestnetQuery::RunningTests => ApiReply::ok(&orchestrator.running_tests()),
            TestnetQuery::TestHistory { topology_id } => {
                let filter = topology_id.as_deref().filter(|t| !t.is_empty());
                ApiReply::ok(&orchestrator.test_history(filter))
            }
            TestnetQuery::Test { id } => {
                match id.parse::<RunId>().ok().and_then(|id| orchestrator.get_test(id)) {
                    Some(run) => ApiReply::ok(&run),
                    None => ApiReply::from_error(&HarnessError::TestNotFound(id)),
                }
            }
        }
    }

    pub fn testnet_command(&self, command: TestnetCommand) -> ApiReply {
        let orchestrator = &self.harness.orchestrator;
        match command {
            TestnetCommand::CreateTopology(spec) => {
                ApiReply::from_result(self.harness.registry.create_custom_topology(spec))
            }
            TestnetCommand::StartTest { topology_id, scenario } => {
                ApiReply::from_result(orchestrator.start_network_test(&topology_id, scenario))
            }
            TestnetCommand::StopTest { test_id } => {
                let stopped = test_id.parse::<RunId>().map_or(false, |id| orchestrator.stop_test(id));
                if stopped {
                    ApiReply::ok(&serde_json::json!({ "message": format!("Test {} stopped", test_id) }))
                } else {
                    ApiReply::not_found("Test not found or already stopped")
                }
            }
            TestnetCommand::InjectFault { test_id, fault } => {
                let result = test_id
                    .parse::<RunId>()
                    .map_err(|_| HarnessError::TestNotFound(test_id.clone()))
                    .and_then(|id| orchestrator.inject_fault(id, fault))
                    .map(|()| serde_json::json!({ "message": format!("Fault queued for test {}", test_id) }));
                ApiReply::from_result(result)
            }
        }
    }
}
