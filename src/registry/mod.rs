//! Method Registry
//!
//! Static metadata per method and the single source of truth for
//! method -> capability group routing. Built once, read-only afterwards.

mod method;

pub use method::{CapabilityGroupId, Method, MethodCategory};

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::error::{OrchestratorError, Result};

/// Numerical libraries every group needs before it can load its extras
pub const CORE_PACKAGES: &[&str] = &["numpy", "scipy", "pandas"];

/// Immutable description of one method
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodDescriptor {
    pub id: Method,
    pub display_category: &'static str,
    pub owner_group: CapabilityGroupId,
    pub required_packages: BTreeSet<&'static str>,
    pub estimated_cost_seconds: f64,
}

impl MethodDescriptor {
    fn for_method(method: Method) -> Self {
        let required_packages = CORE_PACKAGES
            .iter()
            .chain(method.extra_packages().iter())
            .copied()
            .collect();

        Self {
            id: method,
            display_category: method.category().display_name(),
            owner_group: method.group(),
            required_packages,
            estimated_cost_seconds: method.estimated_cost_seconds(),
        }
    }
}

/// Lookup table over every known method
#[derive(Debug, Clone)]
pub struct MethodRegistry {
    descriptors: Vec<MethodDescriptor>,
    index: HashMap<&'static str, usize>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        let descriptors: Vec<MethodDescriptor> =
            Method::ALL.iter().copied().map(MethodDescriptor::for_method).collect();
        let index = descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.id(), i))
            .collect();
        Self { descriptors, index }
    }

    /// Look a method up by its wire id
    pub fn describe(&self, method_id: &str) -> Result<&MethodDescriptor> {
        self.index
            .get(method_id)
            .map(|&i| &self.descriptors[i])
            .ok_or_else(|| OrchestratorError::UnknownMethod(method_id.to_string()))
    }

    pub fn descriptor(&self, method: Method) -> &MethodDescriptor {
        // Every variant is indexed at construction
        &self.descriptors[self.index[method.id()]]
    }

    pub fn group_of(&self, method_id: &str) -> Result<CapabilityGroupId> {
        self.describe(method_id).map(|d| d.owner_group)
    }

    pub fn all_methods(&self) -> &[MethodDescriptor] {
        &self.descriptors
    }

    pub fn methods_in(&self, group: CapabilityGroupId) -> impl Iterator<Item = &MethodDescriptor> {
        self.descriptors.iter().filter(move |d| d.owner_group == group)
    }

    /// Extra packages a group loads after the core, union over its methods
    pub fn group_packages(&self, group: CapabilityGroupId) -> Vec<&'static str> {
        let packages: BTreeSet<&'static str> = self
            .methods_in(group)
            .flat_map(|d| d.id.extra_packages().iter().copied())
            .collect();
        packages.into_iter().collect()
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}
