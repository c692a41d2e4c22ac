//! # Simulated Platform
//!
//! Scripted in-memory remote platform. Each entity carries a queue of
//! statuses that successive `get` calls walk through, so tests can replay
//! "creating, creating, available" or "not visible yet" sequences exactly.
//! Every call is recorded for assertions about remote side effects.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::client::{
    PlatformConnector, RemoteFilter, RemotePlatformClient, RemoteSpec, SessionToken, StatusRecord,
};
use crate::error::RemoteError;
use crate::models::{merge_attrib, Platform, ResourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Create,
    Get,
    Update,
    Delete,
    List,
    Action,
}

/// One recorded call
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub op: RemoteOp,
    pub kind: Option<ResourceKind>,
    pub ext_id: Option<String>,
    /// Action name for `Action`, entity name for `Create`
    pub detail: Option<String>,
}

#[derive(Debug)]
struct SimEntity {
    record: StatusRecord,
    /// Upcoming statuses; `None` means "not visible" for that call. An empty
    /// script reports the record as stored.
    script: VecDeque<Option<String>>,
    /// Removed once the script runs out
    deleted: bool,
}

impl SimEntity {
    /// Status for the next `get`, consuming the script
    fn advance(&mut self) -> Option<Option<String>> {
        if self.script.len() > 1 {
            return self.script.pop_front();
        }
        if self.deleted {
            return self.script.pop_front();
        }
        self.script.front().cloned()
    }

    fn peek(&self) -> Option<&Option<String>> {
        self.script.front()
    }
}

struct InjectedFailure {
    op: RemoteOp,
    ext_id: Option<String>,
    remaining: u32,
    error: RemoteError,
}

#[derive(Default)]
struct SimState {
    entities: BTreeMap<String, SimEntity>,
    create_ids: VecDeque<String>,
    create_scripts: HashMap<ResourceKind, VecDeque<Vec<Option<String>>>>,
    delete_scripts: HashMap<ResourceKind, Vec<Option<String>>>,
    action_scripts: HashMap<String, Vec<Option<String>>>,
    failures: Vec<InjectedFailure>,
    calls: Vec<RemoteCall>,
    next_id: u64,
}

impl SimState {
    fn record(&mut self, op: RemoteOp, kind: Option<ResourceKind>, ext_id: Option<&str>, detail: Option<&str>) {
        self.calls.push(RemoteCall {
            op,
            kind,
            ext_id: ext_id.map(str::to_string),
            detail: detail.map(str::to_string),
        });
    }

    fn take_failure(&mut self, op: RemoteOp, ext_id: Option<&str>) -> Option<RemoteError> {
        let index = self.failures.iter().position(|f| {
            f.op == op && f.remaining > 0 && (f.ext_id.is_none() || f.ext_id.as_deref() == ext_id)
        })?;
        let failure = &mut self.failures[index];
        failure.remaining -= 1;
        let error = failure.error.clone();
        if failure.remaining == 0 {
            self.failures.remove(index);
        }
        Some(error)
    }
}

/// Default status a freshly created entity settles on when no script is queued
fn default_ready_status(kind: ResourceKind) -> Option<String> {
    let status = match kind {
        ResourceKind::Server => "ACTIVE",
        ResourceKind::VsphereVm => "poweredOn",
        ResourceKind::Volume | ResourceKind::VolumeSnapshot | ResourceKind::Share => "available",
        ResourceKind::Network | ResourceKind::Port | ResourceKind::NsxEdge => "ACTIVE",
        ResourceKind::Stack => "CREATE_COMPLETE",
        _ => return None,
    };
    Some(status.to_string())
}

pub struct SimulatedPlatform {
    platform: Platform,
    state: Mutex<SimState>,
}

impl SimulatedPlatform {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            state: Mutex::new(SimState::default()),
        }
    }

    pub fn openstack() -> Arc<Self> {
        Arc::new(Self::new(Platform::OpenStack))
    }

    /// Id handed out by the next `create`
    pub fn push_create_id(&self, id: impl Into<String>) {
        self.state.lock().create_ids.push_back(id.into());
    }

    /// Status sequence for the next created entity of `kind`.
    ///
    /// Entries are consumed one per `get`; the last entry sticks.
    pub fn script_next_create<S: AsRef<str>>(&self, kind: ResourceKind, statuses: &[Option<S>]) {
        let script = statuses
            .iter()
            .map(|s| s.as_ref().map(|s| s.as_ref().to_string()))
            .collect();
        self.state
            .lock()
            .create_scripts
            .entry(kind)
            .or_default()
            .push_back(script);
    }

    /// Statuses an entity of `kind` reports after `delete` before it disappears
    pub fn script_delete<S: AsRef<str>>(&self, kind: ResourceKind, statuses: &[Option<S>]) {
        let script = statuses
            .iter()
            .map(|s| s.as_ref().map(|s| s.as_ref().to_string()))
            .collect();
        self.state.lock().delete_scripts.insert(kind, script);
    }

    /// Statuses an entity reports after `action`; the last one sticks
    pub fn script_action<S: AsRef<str>>(&self, action: &str, statuses: &[Option<S>]) {
        let script = statuses
            .iter()
            .map(|s| s.as_ref().map(|s| s.as_ref().to_string()))
            .collect();
        self.state
            .lock()
            .action_scripts
            .insert(action.to_string(), script);
    }

    /// Seed an existing remote entity
    pub fn insert(&self, record: StatusRecord) {
        self.state.lock().entities.insert(
            record.id.clone(),
            SimEntity {
                record,
                script: VecDeque::new(),
                deleted: false,
            },
        );
    }

    /// Drop an entity as if it vanished out of band
    pub fn remove(&self, ext_id: &str) -> bool {
        self.state.lock().entities.remove(ext_id).is_some()
    }

    /// Overwrite the steady status of an entity
    pub fn set_status(&self, ext_id: &str, status: Option<&str>) {
        if let Some(entity) = self.state.lock().entities.get_mut(ext_id) {
            entity.record.status = status.map(str::to_string);
            entity.script.clear();
        }
    }

    /// Fail the next `times` calls of `op`, optionally only for one ext_id
    pub fn fail_next(&self, op: RemoteOp, ext_id: Option<&str>, times: u32, error: RemoteError) {
        self.state.lock().failures.push(InjectedFailure {
            op,
            ext_id: ext_id.map(str::to_string),
            remaining: times,
            error,
        });
    }

    pub fn exists(&self, ext_id: &str) -> bool {
        self.state.lock().entities.contains_key(ext_id)
    }

    pub fn record(&self, ext_id: &str) -> Option<StatusRecord> {
        self.state
            .lock()
            .entities
            .get(ext_id)
            .map(|e| e.record.clone())
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, op: RemoteOp) -> usize {
        self.state.lock().calls.iter().filter(|c| c.op == op).count()
    }

    /// Number of `action` calls with this action name
    pub fn action_count(&self, action: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.op == RemoteOp::Action && c.detail.as_deref() == Some(action))
            .count()
    }
}

#[async_trait]
impl RemotePlatformClient for SimulatedPlatform {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn create(&self, spec: &RemoteSpec) -> Result<String, RemoteError> {
        let mut state = self.state.lock();
        state.record(RemoteOp::Create, Some(spec.kind), None, Some(&spec.name));
        if let Some(error) = state.take_failure(RemoteOp::Create, None) {
            return Err(error);
        }

        let id = match state.create_ids.pop_front() {
            Some(id) => id,
            None => {
                state.next_id += 1;
                format!("{}-{}", spec.kind.as_str(), state.next_id)
            }
        };
        if state.entities.contains_key(&id) {
            return Err(RemoteError::new(
                self.platform.to_string(),
                409,
                format!("entity {id} already exists"),
            ));
        }

        let script: VecDeque<Option<String>> = state
            .create_scripts
            .get_mut(&spec.kind)
            .and_then(VecDeque::pop_front)
            .map(VecDeque::from)
            .unwrap_or_else(|| default_ready_status(spec.kind).map(Some).into_iter().collect());

        let record = StatusRecord {
            id: id.clone(),
            kind: spec.kind,
            name: Some(spec.name.clone()),
            status: script.back().cloned().flatten(),
            parent: spec.parent_ext_id.clone(),
            attributes: spec.attributes.clone(),
        };
        state.entities.insert(
            id.clone(),
            SimEntity {
                record,
                script,
                deleted: false,
            },
        );
        Ok(id)
    }

    async fn get(&self, kind: ResourceKind, ext_id: &str) -> Result<Option<StatusRecord>, RemoteError> {
        let mut state = self.state.lock();
        state.record(RemoteOp::Get, Some(kind), Some(ext_id), None);
        if let Some(error) = state.take_failure(RemoteOp::Get, Some(ext_id)) {
            return Err(error);
        }

        let Some(entity) = state.entities.get_mut(ext_id) else {
            return Ok(None);
        };
        match entity.advance() {
            Some(Some(status)) => {
                let mut record = entity.record.clone();
                record.status = Some(status);
                Ok(Some(record))
            }
            Some(None) => Ok(None),
            // Script exhausted after delete
            None if entity.deleted => {
                state.entities.remove(ext_id);
                Ok(None)
            }
            None => Ok(Some(entity.record.clone())),
        }
    }

    async fn update(&self, kind: ResourceKind, ext_id: &str, fields: &Value) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.record(RemoteOp::Update, Some(kind), Some(ext_id), None);
        if let Some(error) = state.take_failure(RemoteOp::Update, Some(ext_id)) {
            return Err(error);
        }

        let platform = self.platform.to_string();
        let entity = state
            .entities
            .get_mut(ext_id)
            .ok_or_else(|| RemoteError::not_found(platform, format!("{kind} {ext_id}")))?;
        if let Some(name) = fields.get("name").and_then(Value::as_str) {
            entity.record.name = Some(name.to_string());
        }
        merge_attrib(&mut entity.record.attributes, fields);
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, ext_id: &str) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.record(RemoteOp::Delete, Some(kind), Some(ext_id), None);
        if let Some(error) = state.take_failure(RemoteOp::Delete, Some(ext_id)) {
            return Err(error);
        }

        let script = state.delete_scripts.get(&kind).cloned().unwrap_or_default();
        let platform = self.platform.to_string();
        let entity = state
            .entities
            .get_mut(ext_id)
            .ok_or_else(|| RemoteError::not_found(platform, format!("{kind} {ext_id}")))?;

        if script.is_empty() {
            state.entities.remove(ext_id);
        } else {
            entity.script = VecDeque::from(script);
            entity.deleted = true;
        }
        Ok(())
    }

    async fn list(&self, filter: &RemoteFilter) -> Result<Vec<StatusRecord>, RemoteError> {
        let mut state = self.state.lock();
        state.record(RemoteOp::List, filter.kind, None, filter.name.as_deref());
        if let Some(error) = state.take_failure(RemoteOp::List, None) {
            return Err(error);
        }

        Ok(state
            .entities
            .values()
            .filter(|e| !matches!(e.peek(), Some(None)))
            .filter(|e| filter.matches(&e.record))
            .map(|e| {
                let mut record = e.record.clone();
                if let Some(Some(status)) = e.peek() {
                    record.status = Some(status.clone());
                }
                record
            })
            .collect())
    }

    async fn action(
        &self,
        kind: ResourceKind,
        ext_id: &str,
        action: &str,
        params: &Value,
    ) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.record(RemoteOp::Action, Some(kind), Some(ext_id), Some(action));
        if let Some(error) = state.take_failure(RemoteOp::Action, Some(ext_id)) {
            return Err(error);
        }

        let script = state.action_scripts.get(action).cloned();
        let platform = self.platform.to_string();
        let entity = state
            .entities
            .get_mut(ext_id)
            .ok_or_else(|| RemoteError::not_found(platform, format!("{kind} {ext_id}")))?;

        if params.is_object() {
            merge_attrib(&mut entity.record.attributes, params);
        }
        if let Some(script) = script.filter(|s| !s.is_empty()) {
            entity.record.status = script.last().cloned().flatten();
            entity.script = VecDeque::from(script);
        }
        Ok(())
    }
}

/// Connector handing out [`SimulatedPlatform`] clients
pub struct SimulatedConnector {
    platform: Arc<SimulatedPlatform>,
    token_lifetime: Option<ChronoDuration>,
    authentications: AtomicU32,
    fail_authentication: Mutex<Option<RemoteError>>,
}

impl SimulatedConnector {
    pub fn new(platform: Arc<SimulatedPlatform>) -> Self {
        Self {
            platform,
            token_lifetime: None,
            authentications: AtomicU32::new(0),
            fail_authentication: Mutex::new(None),
        }
    }

    /// Tokens report this lifetime instead of leaving expiry to the TTL
    pub fn with_token_lifetime(mut self, lifetime: ChronoDuration) -> Self {
        self.token_lifetime = Some(lifetime);
        self
    }

    pub fn authentications(&self) -> u32 {
        self.authentications.load(Ordering::SeqCst)
    }

    pub fn fail_authentication(&self, error: Option<RemoteError>) {
        *self.fail_authentication.lock() = error;
    }

    pub fn platform_handle(&self) -> Arc<SimulatedPlatform> {
        Arc::clone(&self.platform)
    }
}

#[async_trait]
impl PlatformConnector for SimulatedConnector {
    fn platform(&self) -> Platform {
        self.platform.platform
    }

    async fn authenticate(&self, scope: Option<&str>) -> Result<SessionToken, RemoteError> {
        if let Some(error) = self.fail_authentication.lock().clone() {
            return Err(error);
        }
        let n = self.authentications.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionToken {
            value: format!("token-{n}"),
            expires_at: self.token_lifetime.map(|lifetime| Utc::now() + lifetime),
            catalog: serde_json::json!({"compute": "sim://compute", "volume": "sim://volume"}),
            scope: scope.map(str::to_string),
        })
    }

    fn connect(&self, _token: &SessionToken) -> Arc<dyn RemotePlatformClient> {
        self.platform.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(kind: ResourceKind, name: &str) -> RemoteSpec {
        RemoteSpec {
            kind,
            name: name.to_string(),
            parent_ext_id: None,
            attributes: json!({"size": 20}),
        }
    }

    #[tokio::test]
    async fn test_scripted_status_sequence() {
        let sim = SimulatedPlatform::new(Platform::OpenStack);
        sim.push_create_id("V1");
        sim.script_next_create(
            ResourceKind::Volume,
            &[None, Some("creating"), Some("creating"), Some("available")],
        );

        let id = sim.create(&spec(ResourceKind::Volume, "vol")).await.unwrap();
        assert_eq!(id, "V1");

        let mut seen = Vec::new();
        for _ in 0..5 {
            let status = sim
                .get(ResourceKind::Volume, "V1")
                .await
                .unwrap()
                .and_then(|r| r.status);
            seen.push(status);
        }
        assert_eq!(
            seen,
            vec![
                None,
                Some("creating".to_string()),
                Some("creating".to_string()),
                Some("available".to_string()),
                Some("available".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_script_then_gone() {
        let sim = SimulatedPlatform::new(Platform::OpenStack);
        sim.push_create_id("V1");
        sim.create(&spec(ResourceKind::Volume, "vol")).await.unwrap();
        sim.script_delete(ResourceKind::Volume, &[Some("deleting")]);

        sim.delete(ResourceKind::Volume, "V1").await.unwrap();
        let first = sim.get(ResourceKind::Volume, "V1").await.unwrap();
        assert_eq!(first.and_then(|r| r.status).as_deref(), Some("deleting"));
        assert!(sim.get(ResourceKind::Volume, "V1").await.unwrap().is_none());
        assert!(!sim.exists("V1"));

        let err = sim.delete(ResourceKind::Volume, "V1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failures_and_call_log() {
        let sim = SimulatedPlatform::new(Platform::Nsx);
        sim.fail_next(RemoteOp::Create, None, 1, RemoteError::new("nsx", 503, "busy"));

        assert!(sim.create(&spec(ResourceKind::NsxEdge, "edge")).await.is_err());
        let id = sim.create(&spec(ResourceKind::NsxEdge, "edge")).await.unwrap();
        sim.action(ResourceKind::NsxEdge, &id, "reboot", &Value::Null)
            .await
            .unwrap();

        assert_eq!(sim.count(RemoteOp::Create), 2);
        assert_eq!(sim.action_count("reboot"), 1);
        assert_eq!(
            sim.list(&RemoteFilter::kind(ResourceKind::NsxEdge)).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_connector_counts_authentications() {
        let connector = SimulatedConnector::new(SimulatedPlatform::openstack())
            .with_token_lifetime(ChronoDuration::minutes(30));
        let token = connector.authenticate(Some("demo")).await.unwrap();
        assert_eq!(token.scope.as_deref(), Some("demo"));
        assert!(token.expires_at.is_some());
        assert_eq!(connector.authentications(), 1);
    }
}
