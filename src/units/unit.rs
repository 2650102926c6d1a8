//! Common unit type that wraps Service and Group

use super::{GroupUnit, ServiceUnit};

/// Stable index of a unit inside its [`UnitGraph`](crate::manager::UnitGraph)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(pub(crate) usize);

/// What a unit is: a directly managed service or a group of other units
#[derive(Debug)]
pub enum UnitKind {
    Service(ServiceUnit),
    Group(GroupUnit),
}

/// A named, independently controllable workload
#[derive(Debug)]
pub struct Unit {
    pub name: String,
    pub description: String,
    /// Free-form display styles for the panel
    pub styles: String,
    /// Not shown in listings unless asked for
    pub hidden: bool,
    pub kind: UnitKind,
}

impl Unit {
    pub fn service(name: impl Into<String>, service: ServiceUnit) -> Self {
        Self::new(name, UnitKind::Service(service))
    }

    pub fn group(name: impl Into<String>, group: GroupUnit) -> Self {
        Self::new(name, UnitKind::Group(group))
    }

    fn new(name: impl Into<String>, kind: UnitKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            styles: String::new(),
            hidden: false,
            kind,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_styles(mut self, styles: impl Into<String>) -> Self {
        self.styles = styles.into();
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn is_service(&self) -> bool {
        matches!(self.kind, UnitKind::Service(_))
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, UnitKind::Group(_))
    }

    /// Get the unit type as a string (service, group)
    pub fn unit_type(&self) -> &'static str {
        match self.kind {
            UnitKind::Service(_) => "service",
            UnitKind::Group(_) => "group",
        }
    }

    pub fn as_service(&self) -> Option<&ServiceUnit> {
        match &self.kind {
            UnitKind::Service(s) => Some(s),
            UnitKind::Group(_) => None,
        }
    }

    pub fn as_service_mut(&mut self) -> Option<&mut ServiceUnit> {
        match &mut self.kind {
            UnitKind::Service(s) => Some(s),
            UnitKind::Group(_) => None,
        }
    }
}
