//! Registry of supervised upstreams and the reconciliation between the
//! configured (desired) set and the running (actual) set.

use std::collections::HashMap;
use std::sync::Arc;

use muster_oauth::AuthRegistry;
use tokio::sync::RwLock;
use tokio::sync::watch;
use tracing::info;
use tracing::warn;

use crate::catalog::Catalog;
use crate::catalog::UpstreamCatalog;
use crate::config_types::UpstreamConfig;
use crate::config_types::validate_upstream_name;
use crate::events::EventBus;
use crate::upstream::service::UpstreamService;
use crate::upstream::service::UpstreamStatus;
use crate::upstream::state::UpstreamLifecycle;

struct ManagedUpstream {
    service: Arc<UpstreamService>,
    spec_hash: String,
    launch_fingerprint: String,
}

/// Snapshot row for status output and meta-tools.
#[derive(Debug, Clone)]
pub struct UpstreamInfo {
    pub name: String,
    pub lifecycle: UpstreamLifecycle,
    pub display_state: &'static str,
    pub status: UpstreamStatus,
}

/// The three reconciliation sets, computed by name and content hash.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub add: Vec<String>,
    pub remove: Vec<String>,
    /// Changed specs that must restart (launch-affecting fields differ).
    pub restart: Vec<String>,
    /// Changed specs whose new config applies without a restart.
    pub refresh: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ReconcileSummary {
    pub plan: ReconcilePlan,
    pub rejected: Vec<(String, String)>,
}

/// Pure diff between desired and actual, keyed by `(spec_hash,
/// launch_fingerprint)` per name. Separated from the application step so it
/// is directly testable.
pub fn plan_reconcile(
    desired: &[(String, UpstreamConfig)],
    actual: &HashMap<String, (String, String)>,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    let desired_names: HashMap<&str, &UpstreamConfig> = desired
        .iter()
        .map(|(name, config)| (name.as_str(), config))
        .collect();

    for (name, config) in desired {
        match actual.get(name) {
            None => plan.add.push(name.clone()),
            Some((spec_hash, launch_fingerprint)) => {
                if *spec_hash == config.spec_hash() {
                    continue;
                }
                if *launch_fingerprint == config.launch_fingerprint() {
                    plan.refresh.push(name.clone());
                } else {
                    plan.restart.push(name.clone());
                }
            }
        }
    }
    for name in actual.keys() {
        if !desired_names.contains_key(name.as_str()) {
            plan.remove.push(name.clone());
        }
    }

    plan.add.sort();
    plan.remove.sort();
    plan.restart.sort();
    plan.refresh.sort();
    plan
}

/// Owns the `name -> UpstreamService` map. Construction is explicit: the
/// caller supplies the bus, the auth registry, and the live-catalog watch
/// used for dependency gating.
pub struct UpstreamManager {
    auth: Arc<AuthRegistry>,
    bus: EventBus,
    catalog_watch: watch::Receiver<Arc<Catalog>>,
    services: RwLock<HashMap<String, ManagedUpstream>>,
}

impl UpstreamManager {
    pub fn new(
        auth: Arc<AuthRegistry>,
        bus: EventBus,
        catalog_watch: watch::Receiver<Arc<Catalog>>,
    ) -> Self {
        Self {
            auth,
            bus,
            catalog_watch,
            services: RwLock::new(HashMap::new()),
        }
    }

    pub fn auth(&self) -> Arc<AuthRegistry> {
        Arc::clone(&self.auth)
    }

    /// Applies a desired set: additions are constructed (and started when
    /// `auto_start`), removals are stopped and forgotten, updates restart
    /// only when launch-affecting fields changed.
    pub async fn reconcile(
        &self,
        desired: Vec<(String, UpstreamConfig)>,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let mut accepted = Vec::new();
        for (name, config) in desired {
            match validate_upstream_name(&name) {
                Ok(()) => accepted.push((name, config)),
                Err(reason) => {
                    warn!("rejecting upstream: {reason}");
                    summary.rejected.push((name, reason));
                }
            }
        }

        let mut services = self.services.write().await;
        let actual: HashMap<String, (String, String)> = services
            .iter()
            .map(|(name, managed)| {
                (
                    name.clone(),
                    (managed.spec_hash.clone(), managed.launch_fingerprint.clone()),
                )
            })
            .collect();
        let plan = plan_reconcile(&accepted, &actual);
        info!(
            "reconcile: {} to add, {} to remove, {} to restart, {} to refresh",
            plan.add.len(),
            plan.remove.len(),
            plan.restart.len(),
            plan.refresh.len()
        );

        for name in &plan.remove {
            if let Some(managed) = services.remove(name) {
                managed.service.shutdown().await;
            }
        }

        let configs: HashMap<&str, &UpstreamConfig> = accepted
            .iter()
            .map(|(name, config)| (name.as_str(), config))
            .collect();

        for name in plan.restart.iter().chain(plan.refresh.iter()) {
            // Both update flavors are applied by replacing the service; a
            // pure refresh (prefix or filter change) re-runs discovery on
            // start rather than keeping a half-updated supervisor.
            if let Some(managed) = services.remove(name) {
                managed.service.shutdown().await;
            }
            if let Some(config) = configs.get(name.as_str()) {
                services.insert(name.clone(), self.construct((*config).clone(), name));
            }
        }

        for name in &plan.add {
            if let Some(config) = configs.get(name.as_str()) {
                services.insert(name.clone(), self.construct((*config).clone(), name));
            }
        }

        summary.plan = plan;
        summary
    }

    fn construct(&self, config: UpstreamConfig, name: &str) -> ManagedUpstream {
        let spec_hash = config.spec_hash();
        let launch_fingerprint = config.launch_fingerprint();
        let service = UpstreamService::spawn(
            name.to_string(),
            config,
            Arc::clone(&self.auth),
            self.bus.clone(),
            self.catalog_watch.clone(),
        );
        ManagedUpstream {
            service,
            spec_hash,
            launch_fingerprint,
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<UpstreamService>> {
        self.services
            .read()
            .await
            .get(name)
            .map(|managed| Arc::clone(&managed.service))
    }

    pub async fn list(&self) -> Vec<UpstreamInfo> {
        let services = self.services.read().await;
        let mut infos: Vec<UpstreamInfo> = services
            .values()
            .map(|managed| {
                let service = &managed.service;
                let status = service.status();
                UpstreamInfo {
                    name: service.name().to_string(),
                    lifecycle: status.lifecycle,
                    display_state: status
                        .lifecycle
                        .display_for(service.config().transport.kind()),
                    status,
                }
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Current per-upstream catalog snapshots, for the aggregator.
    pub async fn catalog_snapshots(&self) -> Vec<UpstreamCatalog> {
        self.services
            .read()
            .await
            .values()
            .filter_map(|managed| managed.service.catalog_snapshot())
            .collect()
    }

    pub async fn start(&self, name: &str) -> bool {
        match self.services.read().await.get(name) {
            Some(managed) => {
                managed.service.start();
                true
            }
            None => false,
        }
    }

    pub async fn restart(&self, name: &str) -> bool {
        match self.services.read().await.get(name) {
            Some(managed) => {
                managed.service.restart();
                true
            }
            None => false,
        }
    }

    pub async fn stop(&self, name: &str) -> bool {
        let service = self.get(name).await;
        match service {
            Some(service) => {
                service.stop().await;
                true
            }
            None => false,
        }
    }

    pub async fn shutdown(&self) {
        let mut services = self.services.write().await;
        for (_, managed) in services.drain() {
            managed.service.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::plan_reconcile;
    use crate::config_types::UpstreamConfig;

    fn stdio_config(command: &str) -> UpstreamConfig {
        serde_json::from_value(serde_json::json!({ "command": command })).unwrap()
    }

    fn http_config(url: &str) -> UpstreamConfig {
        serde_json::from_value(serde_json::json!({ "url": url })).unwrap()
    }

    fn hashes(config: &UpstreamConfig) -> (String, String) {
        (config.spec_hash(), config.launch_fingerprint())
    }

    #[test]
    fn add_remove_and_keep() {
        // Desired {A, B}; actual {B, C}: C goes, A comes, B is untouched.
        let desired = vec![
            ("a".to_string(), stdio_config("mcp-a")),
            ("b".to_string(), http_config("https://b.example.com/mcp")),
        ];
        let actual = HashMap::from([
            (
                "b".to_string(),
                hashes(&http_config("https://b.example.com/mcp")),
            ),
            ("c".to_string(), hashes(&stdio_config("mcp-c"))),
        ]);

        let plan = plan_reconcile(&desired, &actual);
        assert_eq!(plan.add, vec!["a".to_string()]);
        assert_eq!(plan.remove, vec!["c".to_string()]);
        assert!(plan.restart.is_empty());
        assert!(plan.refresh.is_empty());
    }

    #[test]
    fn launch_change_restarts_cosmetic_change_refreshes() {
        let mut relabelled = http_config("https://b.example.com/mcp");
        relabelled.tool_prefix = Some("b_".to_string());

        let desired = vec![
            ("moved".to_string(), http_config("https://new.example.com/mcp")),
            ("relabelled".to_string(), relabelled),
        ];
        let actual = HashMap::from([
            (
                "moved".to_string(),
                hashes(&http_config("https://old.example.com/mcp")),
            ),
            (
                "relabelled".to_string(),
                hashes(&http_config("https://b.example.com/mcp")),
            ),
        ]);

        let plan = plan_reconcile(&desired, &actual);
        assert_eq!(plan.restart, vec!["moved".to_string()]);
        assert_eq!(plan.refresh, vec!["relabelled".to_string()]);
        assert!(plan.add.is_empty());
        assert!(plan.remove.is_empty());
    }

    #[test]
    fn identical_specs_are_a_fixed_point() {
        let desired = vec![("a".to_string(), stdio_config("mcp-a"))];
        let actual = HashMap::from([("a".to_string(), hashes(&stdio_config("mcp-a")))]);

        let plan = plan_reconcile(&desired, &actual);
        assert_eq!(plan, super::ReconcilePlan::default());
    }
}
