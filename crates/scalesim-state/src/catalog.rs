//! Resource catalog: what a service instance needs and what a node offers.
//!
//! Capacity is always expressed as a fraction of one node of a given type,
//! per resource dimension. A [`SystemCapacity`] of `1.0` in any dimension
//! means that node is full.

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign, Mul, Sub};

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// Tolerance for capacity comparisons.
pub const CAPACITY_EPSILON: f64 = 1e-9;

/// Per-instance resource requirements of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// vCPUs per instance.
    pub cpu: f64,
    /// Memory per instance in MiB.
    #[serde(default)]
    pub memory_mb: f64,
    /// Node types this service may be placed on. Empty means any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_types: Vec<String>,
}

impl ResourceRequirements {
    pub fn new(cpu: f64, memory_mb: f64) -> Self {
        Self {
            cpu,
            memory_mb,
            node_types: Vec::new(),
        }
    }

    /// Whether this service may run on the named node type.
    pub fn allows(&self, node_type: &str) -> bool {
        self.node_types.is_empty() || self.node_types.iter().any(|n| n == node_type)
    }
}

/// Fractional capacity of a single node, per dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemCapacity {
    pub cpu: f64,
    pub memory: f64,
}

impl SystemCapacity {
    pub fn zero() -> Self {
        Self::default()
    }

    /// The most constrained dimension.
    pub fn collapse(&self) -> f64 {
        self.cpu.max(self.memory)
    }

    pub fn is_exhausted(&self) -> bool {
        self.collapse() > 1.0 + CAPACITY_EPSILON
    }

    /// How many `per_instance` footprints fit into this much free room.
    pub fn instances_fitting(&self, per_instance: SystemCapacity) -> u32 {
        instances_fitting(self.cpu, self.memory, per_instance)
    }
}

impl Add for SystemCapacity {
    type Output = SystemCapacity;

    fn add(self, rhs: SystemCapacity) -> SystemCapacity {
        SystemCapacity {
            cpu: self.cpu + rhs.cpu,
            memory: self.memory + rhs.memory,
        }
    }
}

impl AddAssign for SystemCapacity {
    fn add_assign(&mut self, rhs: SystemCapacity) {
        *self = *self + rhs;
    }
}

impl Sub for SystemCapacity {
    type Output = SystemCapacity;

    fn sub(self, rhs: SystemCapacity) -> SystemCapacity {
        SystemCapacity {
            cpu: self.cpu - rhs.cpu,
            memory: self.memory - rhs.memory,
        }
    }
}

impl Mul<f64> for SystemCapacity {
    type Output = SystemCapacity;

    fn mul(self, rhs: f64) -> SystemCapacity {
        SystemCapacity {
            cpu: self.cpu * rhs,
            memory: self.memory * rhs,
        }
    }
}

/// A container (node) type that can be provisioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeType {
    pub name: String,
    /// Cloud provider offering this node type, e.g. "aws".
    pub provider: String,
    /// vCPUs per node.
    pub cpu: f64,
    /// Memory per node in MiB.
    pub memory_mb: f64,
    /// Price per node per hour.
    pub price_per_hour: f64,
}

impl NodeType {
    /// Fraction of this node taken by one instance with the given requirements.
    pub fn capacity_of(&self, req: &ResourceRequirements) -> SystemCapacity {
        SystemCapacity {
            cpu: fraction(req.cpu, self.cpu),
            memory: fraction(req.memory_mb, self.memory_mb),
        }
    }

    /// Capacity taken by a whole placement of `service -> instances` on one node.
    ///
    /// Returns whether the placement fits and the capacity it takes.
    pub fn takes_capacity(
        &self,
        requirements: &BTreeMap<String, ResourceRequirements>,
        placement: &BTreeMap<String, u32>,
    ) -> StateResult<(bool, SystemCapacity)> {
        let mut taken = SystemCapacity::zero();
        for (service, count) in placement {
            let req = requirements
                .get(service)
                .ok_or_else(|| StateError::UnknownService(service.clone()))?;
            taken += self.capacity_of(req) * f64::from(*count);
        }
        Ok((!taken.is_exhausted(), taken))
    }

    /// How many instances with these requirements fit on one empty node.
    pub fn max_instances(&self, req: &ResourceRequirements) -> u32 {
        instances_fitting(1.0, 1.0, self.capacity_of(req))
    }
}

fn fraction(required: f64, available: f64) -> f64 {
    if required <= 0.0 {
        0.0
    } else if available <= 0.0 {
        f64::INFINITY
    } else {
        required / available
    }
}

/// How many instances of `per_instance` fit into free `(cpu, memory)` room.
pub(crate) fn instances_fitting(free_cpu: f64, free_memory: f64, per_instance: SystemCapacity) -> u32 {
    let per_dim = |free: f64, need: f64| {
        if need <= 0.0 {
            f64::INFINITY
        } else {
            ((free + CAPACITY_EPSILON) / need).floor().max(0.0)
        }
    };
    let n = per_dim(free_cpu, per_instance.cpu).min(per_dim(free_memory, per_instance.memory));
    if n.is_infinite() {
        0
    } else {
        n.min(f64::from(u32::MAX)) as u32
    }
}

/// Node types and per-service requirements known to the simulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceCatalog {
    pub node_types: BTreeMap<String, NodeType>,
    pub requirements: BTreeMap<String, ResourceRequirements>,
}

impl ResourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node_type(mut self, node_type: NodeType) -> Self {
        self.node_types.insert(node_type.name.clone(), node_type);
        self
    }

    pub fn with_service(mut self, service: &str, req: ResourceRequirements) -> Self {
        self.requirements.insert(service.to_string(), req);
        self
    }

    pub fn node_type(&self, name: &str) -> StateResult<&NodeType> {
        self.node_types
            .get(name)
            .ok_or_else(|| StateError::UnknownNodeType(name.to_string()))
    }

    pub fn requirements(&self, service: &str) -> StateResult<&ResourceRequirements> {
        self.requirements
            .get(service)
            .ok_or_else(|| StateError::UnknownService(service.to_string()))
    }

    /// Reject requirements that would make capacity arithmetic degenerate.
    pub fn validate(&self) -> StateResult<()> {
        for (service, req) in &self.requirements {
            if req.cpu <= 0.0 && req.memory_mb <= 0.0 {
                return Err(StateError::InvalidRequirements(service.clone()));
            }
        }
        Ok(())
    }
}
