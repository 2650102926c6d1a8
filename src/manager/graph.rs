//! Unit graph
//!
//! Arena of every configured unit, addressed by [`UnitId`]. Built once from
//! the configuration; afterwards only process attribution changes.

use std::collections::HashMap;

use super::deps::DepGraph;
use super::state::UnitStatus;
use crate::supervisor::{ManagedProcess, ProcessObserver};
use crate::units::{base_container_name, ServiceUnit, Unit, UnitId, UnitKind, SHARD_SEPARATOR};

#[derive(Debug)]
pub struct UnitGraph {
    /// Units in configuration (display) order
    units: Vec<Unit>,
    by_name: HashMap<String, UnitId>,
    by_container: HashMap<String, UnitId>,
    deps: DepGraph,
}

impl UnitGraph {
    /// Register `units` and resolve group requirements
    ///
    /// Fails on duplicate unit or container names, unknown or self
    /// requirements, and requirement cycles.
    pub fn new(mut units: Vec<Unit>) -> Result<Self, GraphError> {
        let mut by_name = HashMap::new();
        let mut by_container = HashMap::new();

        for (index, unit) in units.iter().enumerate() {
            let id = UnitId(index);
            if by_name.insert(unit.name.clone(), id).is_some() {
                return Err(GraphError::DuplicateUnit(unit.name.clone()));
            }

            if let UnitKind::Service(service) = &unit.kind {
                let container = &service.container_name;
                if container.is_empty() || container.contains(SHARD_SEPARATOR) {
                    return Err(GraphError::InvalidContainerName {
                        unit: unit.name.clone(),
                        container: container.clone(),
                    });
                }
                if let Some(first) = by_container.insert(container.clone(), id) {
                    return Err(GraphError::DuplicateContainer {
                        container: container.clone(),
                        first: units[first.0].name.clone(),
                        second: unit.name.clone(),
                    });
                }
            }
        }

        let mut deps = DepGraph::new(units.len());
        for (index, unit) in units.iter_mut().enumerate() {
            let UnitKind::Group(group) = &mut unit.kind else {
                continue;
            };

            let mut requirements = Vec::with_capacity(group.requires.len());
            for requirement in &group.requires {
                let Some(&target) = by_name.get(requirement) else {
                    return Err(GraphError::UnknownRequirement {
                        unit: unit.name.clone(),
                        requirement: requirement.clone(),
                    });
                };
                if target.0 == index {
                    return Err(GraphError::SelfRequirement(unit.name.clone()));
                }
                deps.add_edge(index, target.0);
                requirements.push(target);
            }
            group.requirements = requirements;
        }

        if let Err(cycle) = deps.toposort() {
            let names = cycle
                .nodes
                .iter()
                .map(|&n| units[n].name.clone())
                .collect();
            return Err(GraphError::Cycle(names));
        }

        Ok(Self {
            units,
            by_name,
            by_container,
            deps,
        })
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Units in configuration order
    pub fn iter(&self) -> impl Iterator<Item = (UnitId, &Unit)> {
        self.units.iter().enumerate().map(|(i, u)| (UnitId(i), u))
    }

    pub fn lookup(&self, name: &str) -> Option<UnitId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: UnitId) -> &Unit {
        &self.units[id.0]
    }

    pub fn by_name(&self, name: &str) -> Option<&Unit> {
        self.lookup(name).map(|id| self.get(id))
    }

    pub fn service(&self, id: UnitId) -> Option<&ServiceUnit> {
        self.units[id.0].as_service()
    }

    pub fn service_mut(&mut self, id: UnitId) -> Option<&mut ServiceUnit> {
        self.units[id.0].as_service_mut()
    }

    /// Service unit a process belongs to, by its container name
    pub fn owner_of(&self, process_name: &str) -> Option<UnitId> {
        self.by_container
            .get(process_name)
            .or_else(|| self.by_container.get(base_container_name(process_name)))
            .copied()
    }

    /// Current status, derived from processes and requirements
    pub fn status(&self, id: UnitId) -> UnitStatus {
        match &self.units[id.0].kind {
            UnitKind::Service(service) => service.status(),
            UnitKind::Group(group) => {
                UnitStatus::aggregate(group.requirements().iter().map(|&r| self.status(r)))
            }
        }
    }

    /// Service units a unit expands to, in start order
    ///
    /// A service expands to itself. A group expands depth first through its
    /// requirements in declaration order, each service listed once.
    pub fn services_of(&self, id: UnitId) -> Vec<UnitId> {
        if self.units[id.0].is_service() {
            return vec![id];
        }
        self.deps
            .expand(id.0)
            .into_iter()
            .map(UnitId)
            .filter(|&u| self.units[u.0].is_service())
            .collect()
    }

    /// Direct requirements of a group; empty for services
    pub fn requirements(&self, id: UnitId) -> &[UnitId] {
        match &self.units[id.0].kind {
            UnitKind::Group(group) => group.requirements(),
            UnitKind::Service(_) => &[],
        }
    }

    /// Number of a group's direct requirements that are running
    pub fn running_requirements(&self, id: UnitId) -> usize {
        self.requirements(id)
            .iter()
            .filter(|&&r| self.status(r).is_running())
            .count()
    }

    /// Number of service units currently running
    pub fn running_services(&self) -> usize {
        self.units
            .iter()
            .filter_map(Unit::as_service)
            .filter(|s| s.status().is_running())
            .count()
    }
}

impl ProcessObserver for UnitGraph {
    fn process_spawned(&mut self, process: &ManagedProcess) {
        let Some(owner) = self.owner_of(&process.name) else {
            log::debug!(
                "Container {} ({}) does not belong to any unit",
                process.name,
                process.id
            );
            return;
        };

        let unit = &mut self.units[owner.0];
        if let UnitKind::Service(service) = &mut unit.kind {
            if service.attach(process.id.clone()) {
                log::info!("Attributed {} ({}) to {}", process.name, process.id, unit.name);
            }
        }
    }

    fn process_pruned(&mut self, process: &ManagedProcess) {
        let owner = self.owner_of(&process.name);
        let detached = owner
            .and_then(|id| self.units[id.0].as_service_mut())
            .is_some_and(|service| service.detach(&process.id));
        if !detached {
            log::warn!(
                "Pruned process {} ({}) had no owning unit",
                process.name,
                process.id
            );
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Duplicate unit name {0}")]
    DuplicateUnit(String),

    #[error("Units {first} and {second} share container name {container:?}")]
    DuplicateContainer {
        container: String,
        first: String,
        second: String,
    },

    #[error("Invalid container name {container:?} for unit {unit}")]
    InvalidContainerName { unit: String, container: String },

    #[error("Unit {unit} requires unknown unit {requirement}")]
    UnknownRequirement { unit: String, requirement: String },

    #[error("Unit {0} requires itself")]
    SelfRequirement(String),

    #[error("Requirement cycle involving: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{LifecycleDriver, SimpleDriver, StartMode, StopMode};
    use crate::supervisor::ContainerId;
    use crate::units::GroupUnit;

    fn service(name: &str) -> Unit {
        service_in(name, name)
    }

    fn service_in(name: &str, container: &str) -> Unit {
        let driver = SimpleDriver::new(
            StartMode::Command(vec!["sleep".into(), "100".into()]),
            StopMode::Input(vec!["stop".into(), "Enter".into()]),
        );
        Unit::service(name, ServiceUnit::new(container, LifecycleDriver::Simple(driver)))
    }

    fn group(name: &str, requires: &[&str]) -> Unit {
        Unit::group(
            name,
            GroupUnit::new(requires.iter().map(|s| s.to_string()).collect()),
        )
    }

    fn process(id: &str, name: &str) -> ManagedProcess {
        ManagedProcess::adopted(ContainerId::new(id), 4242, name)
    }

    #[test]
    fn test_build_resolves_requirements() {
        let graph = UnitGraph::new(vec![
            service("alpha"),
            service("beta"),
            group("bundle", &["alpha", "beta"]),
        ])
        .unwrap();

        let bundle = graph.lookup("bundle").unwrap();
        assert_eq!(
            graph.requirements(bundle),
            &[graph.lookup("alpha").unwrap(), graph.lookup("beta").unwrap()]
        );
        assert_eq!(graph.status(bundle), UnitStatus::Stopped);
    }

    #[test]
    fn test_build_rejects_bad_graphs() {
        assert!(matches!(
            UnitGraph::new(vec![service("alpha"), service("alpha")]),
            Err(GraphError::DuplicateUnit(_))
        ));
        assert!(matches!(
            UnitGraph::new(vec![service_in("a", "mc"), service_in("b", "mc")]),
            Err(GraphError::DuplicateContainer { .. })
        ));
        assert!(matches!(
            UnitGraph::new(vec![service_in("a", "x/y")]),
            Err(GraphError::InvalidContainerName { .. })
        ));
        assert!(matches!(
            UnitGraph::new(vec![group("g", &["missing"])]),
            Err(GraphError::UnknownRequirement { .. })
        ));
        assert!(matches!(
            UnitGraph::new(vec![group("g", &["g"])]),
            Err(GraphError::SelfRequirement(_))
        ));
    }

    #[test]
    fn test_build_rejects_cycles() {
        let err = UnitGraph::new(vec![group("a", &["b"]), group("b", &["a"]), service("c")])
            .unwrap_err();
        match err {
            GraphError::Cycle(names) => assert_eq!(names, vec!["a", "b"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_services_of_nested_groups() {
        let graph = UnitGraph::new(vec![
            service("a"),
            service("b"),
            service("c"),
            group("inner", &["b", "c"]),
            group("outer", &["a", "inner", "b"]),
        ])
        .unwrap();

        let names = |ids: Vec<UnitId>| -> Vec<String> {
            ids.into_iter().map(|id| graph.get(id).name.clone()).collect()
        };
        assert_eq!(names(graph.services_of(graph.lookup("outer").unwrap())), ["a", "b", "c"]);
        assert_eq!(names(graph.services_of(graph.lookup("a").unwrap())), ["a"]);
    }

    #[test]
    fn test_attribution_by_container_and_shard() {
        let mut graph = UnitGraph::new(vec![service("alpha"), service_in("cluster", "dst")]).unwrap();

        graph.process_spawned(&process("%1", "alpha"));
        graph.process_spawned(&process("%2", "dst/Master"));
        graph.process_spawned(&process("%3", "stranger"));

        let alpha = graph.lookup("alpha").unwrap();
        let cluster = graph.lookup("cluster").unwrap();
        assert_eq!(graph.service(alpha).unwrap().processes(), &[ContainerId::new("%1")]);
        assert_eq!(graph.service(cluster).unwrap().processes(), &[ContainerId::new("%2")]);
        assert_eq!(graph.running_services(), 2);
    }

    #[test]
    fn test_prune_detaches() {
        let mut graph = UnitGraph::new(vec![service("alpha")]).unwrap();
        let p = process("%1", "alpha");
        graph.process_spawned(&p);
        graph.process_spawned(&p);

        let alpha = graph.lookup("alpha").unwrap();
        assert_eq!(graph.service(alpha).unwrap().processes().len(), 1);

        graph.process_pruned(&p);
        assert_eq!(graph.status(alpha), UnitStatus::Stopped);
        // pruning again is harmless
        graph.process_pruned(&p);
    }

    #[test]
    fn test_group_status_and_running_requirements() {
        let mut graph = UnitGraph::new(vec![
            service("alpha"),
            service("beta"),
            group("bundle", &["alpha", "beta"]),
        ])
        .unwrap();
        let bundle = graph.lookup("bundle").unwrap();

        graph.process_spawned(&process("%1", "alpha"));
        assert_eq!(graph.status(bundle), UnitStatus::Running);
        assert_eq!(graph.running_requirements(bundle), 1);

        let alpha = graph.lookup("alpha").unwrap();
        graph
            .service_mut(alpha)
            .unwrap()
            .mark_stopping(tokio::time::Instant::now());
        assert_eq!(graph.status(bundle), UnitStatus::Stopping);
        assert_eq!(graph.running_requirements(bundle), 0);
    }
}
