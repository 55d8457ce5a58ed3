//! Aggregated statistics over instances and escalations

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tenant-wide instance counts and completion timing
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkflowStatistics {
    pub total_instances: u64,
    pub active_instances: u64,
    pub pending_approval_instances: u64,
    pub completed_instances: u64,
    pub rejected_instances: u64,
    pub cancelled_instances: u64,
    /// Mean hours from creation to close over completed instances
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_completion_hours: Option<f64>,
    /// Open-task escalation levels, level -> task count
    pub escalations_by_level: HashMap<u32, u64>,
}

/// Tenant-wide escalation counts and resolution timing
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EscalationStats {
    pub total: u64,
    pub active: u64,
    pub resolved: u64,
    /// Record counts by level
    pub by_level: HashMap<u32, u64>,
    /// Record counts by workflow definition id
    pub by_definition: HashMap<String, u64>,
    /// Mean hours from raise to close over resolved records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_hours_to_resolve: Option<f64>,
}
