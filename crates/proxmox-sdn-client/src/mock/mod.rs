//! Mock SdnClient for unit testing
//!
//! This module provides a mock implementation of `SdnClientTrait` that keeps
//! SDN objects in memory, so reconciliation logic can be tested without a
//! running Proxmox cluster.
//!
//! The mock mirrors the provider behaviour the engine relies on:
//! - created objects are staged (`state = "new"`) until `apply_sdn`
//! - subnet ids are zone-scoped, so the same CIDR twice in a zone is rejected
//!   with `SdnError::AlreadyExists`
//! - `apply_sdn` returns a task UPID whose status can be polled
//!
//! Operations live in `sdn.rs`; this file holds the state and test setup helpers.

mod sdn;

use crate::error::SdnError;
use crate::models::*;
use crate::sdn_trait::SdnClientTrait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Number of calls made to each operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub list_zones: u32,
    pub create_zone: u32,
    pub list_vnets: u32,
    pub create_vnet: u32,
    pub list_subnets: u32,
    pub create_subnet: u32,
    pub list_firewall_rules: u32,
    pub create_firewall_rule: u32,
    pub apply: u32,
    pub task_status: u32,
}

impl MockCalls {
    /// Calls that change controller state (creations and applies)
    pub fn mutations(&self) -> u32 {
        self.create_zone + self.create_vnet + self.create_subnet + self.create_firewall_rule + self.apply
    }
}

/// How `apply_sdn` behaves
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ApplyMode {
    /// Returns a task that stops with the given exit status
    Task { exit_status: String },
    /// Returns a task that never leaves `running`
    Stuck,
    /// Returns no task handle
    Synchronous,
}

/// One-shot interception of the next `apply_sdn` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ApplyInterception {
    pub(crate) delay: Duration,
    /// Fail with an API error after the delay instead of applying
    pub(crate) failure: Option<String>,
}

/// Mock SdnClient for testing
///
/// Clones share state, so a test can keep a handle for inspection while the
/// engine owns another.
#[derive(Clone)]
pub struct MockSdnClient {
    pub(crate) base_url: String,
    pub(crate) node: String,
    // In-memory storage for SDN objects
    pub(crate) zones: Arc<Mutex<BTreeMap<String, Zone>>>,
    pub(crate) vnets: Arc<Mutex<BTreeMap<String, Vnet>>>,
    /// Keyed by provider subnet id (`<zone>-<addr>-<len>`)
    pub(crate) subnets: Arc<Mutex<BTreeMap<String, Subnet>>>,
    pub(crate) firewall_rules: Arc<Mutex<HashMap<String, Vec<FirewallRule>>>>,
    pub(crate) tasks: Arc<Mutex<HashMap<String, TaskStatus>>>,
    pub(crate) calls: Arc<Mutex<MockCalls>>,
    // Failure injection
    pub(crate) apply_mode: Arc<Mutex<ApplyMode>>,
    pub(crate) subnet_collisions: Arc<Mutex<HashSet<String>>>,
    pub(crate) vnet_failure: Arc<Mutex<Option<String>>>,
    pub(crate) next_apply: Arc<Mutex<Option<ApplyInterception>>>,
    // Counter for task ids
    pub(crate) next_task: Arc<Mutex<u64>>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockSdnClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            node: "mock".to_string(),
            zones: Arc::new(Mutex::new(BTreeMap::new())),
            vnets: Arc::new(Mutex::new(BTreeMap::new())),
            subnets: Arc::new(Mutex::new(BTreeMap::new())),
            firewall_rules: Arc::new(Mutex::new(HashMap::new())),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(MockCalls::default())),
            apply_mode: Arc::new(Mutex::new(ApplyMode::Task {
                exit_status: "OK".to_string(),
            })),
            subnet_collisions: Arc::new(Mutex::new(HashSet::new())),
            vnet_failure: Arc::new(Mutex::new(None)),
            next_apply: Arc::new(Mutex::new(None)),
            next_task: Arc::new(Mutex::new(1)),
        }
    }

    /// Add an applied zone (for test setup)
    pub fn add_zone(&self, zone: &str, zone_type: &str) {
        lock(&self.zones).insert(
            zone.to_string(),
            Zone {
                zone: zone.to_string(),
                zone_type: zone_type.to_string(),
                bridge: None,
                ipam: None,
                mtu: None,
                dns: None,
                state: None,
                pending: None,
            },
        );
    }

    /// Add an applied vnet (for test setup)
    pub fn add_vnet(&self, vnet: &str, zone: &str, alias: Option<&str>) {
        lock(&self.vnets).insert(
            vnet.to_string(),
            Vnet {
                vnet: vnet.to_string(),
                zone: Some(zone.to_string()),
                alias: alias.map(str::to_string),
                tag: None,
                state: None,
                pending: None,
            },
        );
    }

    /// Add an applied subnet to an existing vnet (for test setup)
    pub fn add_subnet(&self, vnet: &str, cidr: &str) {
        let zone = lock(&self.vnets)
            .get(vnet)
            .and_then(|v| v.zone.clone())
            .unwrap_or_default();
        let id = Subnet::subnet_id(&zone, cidr);
        lock(&self.subnets).insert(id.clone(), sdn::new_subnet(&id, vnet, &zone, cidr, None));
    }

    /// Attach a security group to a vnet (for test setup)
    pub fn add_firewall_group(&self, vnet: &str, group: &str) {
        let mut rules = lock(&self.firewall_rules);
        let entry = rules.entry(vnet.to_string()).or_default();
        entry.push(FirewallRule {
            pos: Some(entry.len() as u32),
            rule_type: "group".to_string(),
            action: group.to_string(),
            enable: Some(1),
            comment: None,
        });
    }

    /// Mark an existing vnet as changed but not applied
    pub fn mark_vnet_pending(&self, vnet: &str) {
        if let Some(v) = lock(&self.vnets).get_mut(vnet) {
            v.state = Some("changed".to_string());
        }
    }

    /// Finish apply tasks with this exit status instead of `OK`
    pub fn set_apply_exit_status(&self, exit_status: &str) {
        *lock(&self.apply_mode) = ApplyMode::Task {
            exit_status: exit_status.to_string(),
        };
    }

    /// Make apply tasks run forever
    pub fn set_apply_stuck(&self) {
        *lock(&self.apply_mode) = ApplyMode::Stuck;
    }

    /// Make `apply_sdn` return no task handle
    pub fn set_apply_synchronous(&self) {
        *lock(&self.apply_mode) = ApplyMode::Synchronous;
    }

    /// Reject the next creation of `cidr` as already defined, as if another
    /// allocation had claimed it between listing and creation
    pub fn collide_subnet_once(&self, cidr: &str) {
        lock(&self.subnet_collisions).insert(cidr.to_string());
    }

    /// Fail every vnet creation with an API error
    pub fn fail_vnet_creation(&self, message: &str) {
        *lock(&self.vnet_failure) = Some(message.to_string());
    }

    /// Hold the next apply for `delay` before it proceeds, so concurrent
    /// callers can interleave with it
    pub fn delay_next_apply(&self, delay: Duration) {
        *lock(&self.next_apply) = Some(ApplyInterception { delay, failure: None });
    }

    /// Fail the next apply with an API error after `delay`, leaving staged
    /// objects untouched
    pub fn fail_next_apply_after(&self, delay: Duration, message: &str) {
        *lock(&self.next_apply) = Some(ApplyInterception {
            delay,
            failure: Some(message.to_string()),
        });
    }

    /// Let vnet creations succeed again
    pub fn clear_vnet_failure(&self) {
        *lock(&self.vnet_failure) = None;
    }

    /// Snapshot of call counters
    pub fn calls(&self) -> MockCalls {
        lock(&self.calls).clone()
    }

    /// Current vnet by id
    pub fn vnet(&self, vnet: &str) -> Option<Vnet> {
        lock(&self.vnets).get(vnet).cloned()
    }

    /// CIDRs of every subnet, staged or applied
    pub fn subnet_cidrs(&self) -> Vec<String> {
        lock(&self.subnets).values().filter_map(Subnet::cidr).collect()
    }

    pub(crate) fn next_upid(&self) -> String {
        let mut id = lock(&self.next_task);
        let current = *id;
        *id += 1;
        format!("UPID:{}:{:08X}:00000000:00000000:reloadnetworkall::root@pam:", self.node, current)
    }

    pub(crate) fn count(&self, f: impl FnOnce(&mut MockCalls)) {
        let mut calls = lock(&self.calls);
        f(&mut *calls);
    }
}

#[async_trait::async_trait]
impl SdnClientTrait for MockSdnClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn version(&self) -> Result<Version, SdnError> {
        Ok(Version {
            version: "8.2.0".to_string(),
            release: Some("8.2".to_string()),
            repoid: None,
        })
    }

    async fn list_zones(&self) -> Result<Vec<Zone>, SdnError> {
        sdn::list_zones(self).await
    }

    async fn create_zone(&self, request: &CreateZoneRequest) -> Result<(), SdnError> {
        sdn::create_zone(self, request).await
    }

    async fn list_vnets(&self) -> Result<Vec<Vnet>, SdnError> {
        sdn::list_vnets(self).await
    }

    async fn create_vnet(&self, request: &CreateVnetRequest) -> Result<(), SdnError> {
        sdn::create_vnet(self, request).await
    }

    async fn list_subnets(&self, vnet: &str) -> Result<Vec<Subnet>, SdnError> {
        sdn::list_subnets(self, vnet).await
    }

    async fn create_subnet(&self, vnet: &str, request: &CreateSubnetRequest) -> Result<(), SdnError> {
        sdn::create_subnet(self, vnet, request).await
    }

    async fn list_vnet_firewall_rules(&self, vnet: &str) -> Result<Vec<FirewallRule>, SdnError> {
        sdn::list_vnet_firewall_rules(self, vnet).await
    }

    async fn create_vnet_firewall_rule(&self, vnet: &str, request: &CreateFirewallRuleRequest) -> Result<(), SdnError> {
        sdn::create_vnet_firewall_rule(self, vnet, request).await
    }

    async fn apply_sdn(&self) -> Result<Option<String>, SdnError> {
        sdn::apply_sdn(self).await
    }

    async fn task_status(&self, node: &str, upid: &str) -> Result<TaskStatus, SdnError> {
        sdn::task_status(self, node, upid).await
    }
}
