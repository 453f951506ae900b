//! Reconciliation of a user's SDN network.
//!
//! The persisted record, the live controller state and concurrent callers are
//! reconciled in this order:
//! 1. Ensure the zone (staged, applied together with everything else)
//! 2. No record: adopt a vnet carrying the user's alias, if any
//! 3. Record: return it when ready, otherwise repair and apply
//! 4. A subnet collision, or a vnet id now owned by another user,
//!    invalidates the record
//! 5. Fresh allocation with bounded retries on collisions
//!
//! Controller mutations are staged and applied once per call. Each call
//! runs in its own store transaction and every failed allocation attempt is
//! rolled back, so a failed attempt never leaves a record behind.

use crate::allocator::allocate_subnet;
use crate::apply::ApplyCoordinator;
use crate::config::SdnConfig;
use crate::error::NetworkError;
use crate::gateway::SdnGateway;
use crate::naming::VnetIdEncoder;
use crate::readiness::ReadinessChecker;
use crate::store::{NewStudentNetwork, StoreTransaction, StudentNetworkRecord, StudentNetworkStore};
use chrono::Utc;
use ipnetwork::Ipv4Network;
use proxmox_sdn_client::SdnClientTrait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Vnet id of a provisional record until its surrogate id is known
const PENDING_VNET_ID: &str = "pending";

/// A user's network as handed to the VM provisioning layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentNetwork {
    pub vnet_id: String,
    pub subnet_cidr: String,
}

impl StudentNetwork {
    fn from_record(record: &StudentNetworkRecord) -> Self {
        Self {
            vnet_id: record.vnet_id.clone(),
            subnet_cidr: record.subnet_cidr.clone(),
        }
    }
}

/// Outcome of looking up a vnet by the user's alias
enum Adoption {
    /// The vnet has a subnet; the record now points at it
    Adopted(StudentNetwork),
    /// The vnet exists but has no subnet yet
    VnetWithoutSubnet(String),
    NotFound,
}

/// Ensures every user owns exactly one provisioned vnet and subnet
pub struct StudentNetworkReconciler {
    config: SdnConfig,
    gateway: SdnGateway,
    readiness: ReadinessChecker,
    apply: ApplyCoordinator,
    encoder: VnetIdEncoder,
    store: Arc<dyn StudentNetworkStore>,
}

impl StudentNetworkReconciler {
    /// Creates a reconciler; fails if the configuration is inconsistent
    pub fn new(
        client: Arc<dyn SdnClientTrait>,
        store: Arc<dyn StudentNetworkStore>,
        config: SdnConfig,
    ) -> Result<Self, NetworkError> {
        config.validate()?;
        let gateway = SdnGateway::new(Arc::clone(&client), config.clone());
        Ok(Self {
            readiness: ReadinessChecker::new(gateway.clone(), &config),
            apply: ApplyCoordinator::from_config(client, &config),
            encoder: VnetIdEncoder::new(&config.vnet_id_prefix, config.vnet_max_len),
            gateway,
            store,
            config,
        })
    }

    /// Returns the user's vnet and subnet, provisioning them if needed
    ///
    /// The fast path (recorded network already provisioned) performs no
    /// controller mutation. Otherwise all changes are staged and applied once.
    /// Each call runs in its own store transaction, so concurrent calls never
    /// commit or discard each other's records.
    pub async fn ensure_student_network(&self, username: &str) -> Result<StudentNetwork, NetworkError> {
        info!("Ensuring SDN network for {}", username);
        self.gateway.ensure_zone().await?;

        let alias = self.config.vnet_alias(username);
        let mut txn = self.store.begin().await?;
        let mut reserved = HashSet::new();
        let mut fixed_vnet = None;

        match txn.get(username).await? {
            None => match self.adopt(txn.as_mut(), username, &alias, None).await? {
                Adoption::Adopted(network) => return Ok(network),
                Adoption::VnetWithoutSubnet(vnet_id) => fixed_vnet = Some(vnet_id),
                Adoption::NotFound => {}
            },
            Some(record) => match self.reconcile_record(&record, &alias).await {
                Ok(network) => return Ok(network),
                Err(e @ (NetworkError::SubnetCollision { .. } | NetworkError::VnetOwnedByOther { .. })) => {
                    warn!("Recorded network of {} is no longer valid ({}), re-resolving", username, e);
                    match self.adopt(txn.as_mut(), username, &alias, Some(&record)).await? {
                        Adoption::Adopted(network) => return Ok(network),
                        Adoption::VnetWithoutSubnet(vnet_id) => fixed_vnet = Some(vnet_id),
                        Adoption::NotFound => {}
                    }
                    self.discard_record(txn.as_mut(), username).await?;
                    if let NetworkError::SubnetCollision { cidr } = e {
                        reserved.insert(cidr);
                    }
                }
                Err(e) => return Err(e),
            },
        }

        self.allocate(txn.as_mut(), username, &alias, fixed_vnet, reserved).await
    }

    /// Point the user's record at a vnet found by alias
    async fn adopt(
        &self,
        txn: &mut dyn StoreTransaction,
        username: &str,
        alias: &str,
        existing: Option<&StudentNetworkRecord>,
    ) -> Result<Adoption, NetworkError> {
        let Some(vnet) = self.gateway.find_vnet_by_alias(alias).await? else {
            debug!("No vnet with alias {:?}", alias);
            return Ok(Adoption::NotFound);
        };

        let subnets = self.gateway.vnet_subnets(&vnet.vnet).await?;
        let Some(subnet_cidr) = subnets.iter().find_map(|s| s.cidr()) else {
            info!("Vnet {} of {} has no subnet yet", vnet.vnet, username);
            return Ok(Adoption::VnetWithoutSubnet(vnet.vnet));
        };

        match existing {
            Some(record) => {
                let mut record = record.clone();
                record.vnet_id = vnet.vnet.clone();
                record.subnet_cidr = subnet_cidr.clone();
                txn.update(&record).await?;
            }
            None => {
                txn.add(NewStudentNetwork {
                    username: username.to_string(),
                    vnet_id: vnet.vnet.clone(),
                    subnet_cidr: subnet_cidr.clone(),
                })
                .await?;
            }
        }
        txn.commit().await?;

        info!("Adopted vnet {} with subnet {} for {}", vnet.vnet, subnet_cidr, username);
        Ok(Adoption::Adopted(StudentNetwork {
            vnet_id: vnet.vnet,
            subnet_cidr,
        }))
    }

    /// Return a recorded network, repairing it on the controller if needed
    async fn reconcile_record(&self, record: &StudentNetworkRecord, alias: &str) -> Result<StudentNetwork, NetworkError> {
        if self
            .readiness
            .is_ready(&record.vnet_id, &record.subnet_cidr, alias)
            .await?
        {
            debug!(
                "Network {} / {} of {} is ready",
                record.vnet_id, record.subnet_cidr, record.username
            );
            return Ok(StudentNetwork::from_record(record));
        }

        let subnet: Ipv4Network = record.subnet_cidr.parse().map_err(|e| {
            NetworkError::Configuration(format!(
                "recorded subnet {:?} of {} is not an IPv4 CIDR: {}",
                record.subnet_cidr, record.username, e
            ))
        })?;

        info!(
            "Repairing network {} / {} of {}",
            record.vnet_id, record.subnet_cidr, record.username
        );
        self.provision(&record.vnet_id, alias, subnet).await?;
        Ok(StudentNetwork::from_record(record))
    }

    /// Drop a record that no longer matches the controller
    async fn discard_record(&self, txn: &mut dyn StoreTransaction, username: &str) -> Result<(), NetworkError> {
        txn.rollback().await?;
        txn.delete(username).await?;
        txn.commit().await?;
        info!("Discarded stale network record of {}", username);
        Ok(())
    }

    /// Allocate a new subnet (and vnet unless one is given) for the user
    async fn allocate(
        &self,
        txn: &mut dyn StoreTransaction,
        username: &str,
        alias: &str,
        mut fixed_vnet: Option<String>,
        mut reserved: HashSet<String>,
    ) -> Result<StudentNetwork, NetworkError> {
        let attempts = self.config.allocate_attempts;

        for attempt in 1..=attempts {
            let mut assigned: HashSet<String> = txn.assigned_subnets().await?.into_iter().collect();
            assigned.extend(self.gateway.controller_subnets().await?);
            let subnet = allocate_subnet(self.config.base_cidr, self.config.student_prefix, &assigned, &reserved)?;
            let subnet_cidr = subnet.to_string();

            let id = txn
                .add(NewStudentNetwork {
                    username: username.to_string(),
                    vnet_id: PENDING_VNET_ID.to_string(),
                    subnet_cidr: subnet_cidr.clone(),
                })
                .await?;
            let vnet_id = match fixed_vnet.clone().map_or_else(|| self.encoder.encode(id), Ok) {
                Ok(vnet_id) => vnet_id,
                Err(e) => return Err(Self::abandon(txn, username, e).await),
            };
            debug!(
                "Attempt {}/{}: record {} for {} gets vnet {} and subnet {}",
                attempt, attempts, id, username, vnet_id, subnet_cidr
            );

            let result = self.assign_and_provision(txn, id, username, &vnet_id, alias, subnet).await;
            match result {
                Ok(()) => {
                    txn.commit().await?;
                    info!("Allocated vnet {} with subnet {} for {}", vnet_id, subnet_cidr, username);
                    return Ok(StudentNetwork { vnet_id, subnet_cidr });
                }
                Err(NetworkError::SubnetCollision { cidr }) => {
                    warn!(
                        "Subnet {} for {} collided (attempt {}/{}), retrying",
                        cidr, username, attempt, attempts
                    );
                    txn.rollback().await?;
                    reserved.insert(cidr);
                    // the vnet is already staged with the user's alias; reuse it
                    fixed_vnet = Some(vnet_id);
                }
                Err(e @ NetworkError::VnetOwnedByOther { .. }) => {
                    warn!("{} (attempt {}/{}), retrying with a new id", e, attempt, attempts);
                    txn.rollback().await?;
                    fixed_vnet = None;
                }
                Err(e) => return Err(Self::abandon(txn, username, e).await),
            }
        }

        Err(NetworkError::AllocationExhausted { attempts })
    }

    /// Roll back a failed attempt and hand back its error
    async fn abandon(txn: &mut dyn StoreTransaction, username: &str, e: NetworkError) -> NetworkError {
        if let Err(rollback_err) = txn.rollback().await {
            error!("Failed to roll back network record of {}: {}", username, rollback_err);
        }
        error!("Failed to provision network for {}: {}", username, e);
        e
    }

    async fn assign_and_provision(
        &self,
        txn: &mut dyn StoreTransaction,
        id: u64,
        username: &str,
        vnet_id: &str,
        alias: &str,
        subnet: Ipv4Network,
    ) -> Result<(), NetworkError> {
        txn.update(&StudentNetworkRecord {
            id,
            username: username.to_string(),
            vnet_id: vnet_id.to_string(),
            subnet_cidr: subnet.to_string(),
            updated_at: Utc::now(),
        })
        .await?;
        self.provision(vnet_id, alias, subnet).await
    }

    /// Stage vnet, subnet and security group, then apply once
    async fn provision(&self, vnet_id: &str, alias: &str, subnet: Ipv4Network) -> Result<(), NetworkError> {
        self.gateway.ensure_vnet(vnet_id, alias).await?;
        self.gateway.ensure_subnet(vnet_id, subnet).await?;
        if let Some(group) = &self.config.firewall_group {
            self.gateway.ensure_firewall_group_rule(vnet_id, group).await?;
        }
        self.apply.apply().await
    }
}
