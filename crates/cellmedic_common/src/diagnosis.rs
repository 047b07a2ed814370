//! Root-cause diagnosis.
//!
//! A static knowledge base maps each fault type to weighted (root cause,
//! action) rules. Ranking combines the static weight with the policy store's
//! learned success rate; with identical policy state the ranking is identical.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::fault::{ActionType, Fault, FaultType};
use crate::policy::PolicyStore;

/// When a rule is offered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTier {
    /// Ranked on first diagnosis
    Primary,
    /// Admitted only once primary rules have been used up
    Fallback,
}

/// One knowledge-base entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRule {
    pub root_cause: String,
    pub action_type: ActionType,
    /// Signature match weight in [0, 1]
    pub weight: f64,
    pub tier: RuleTier,
}

impl KnowledgeRule {
    pub fn primary(root_cause: &str, action_type: ActionType, weight: f64) -> Self {
        Self {
            root_cause: root_cause.to_string(),
            action_type,
            weight,
            tier: RuleTier::Primary,
        }
    }

    pub fn fallback(root_cause: &str, action_type: ActionType, weight: f64) -> Self {
        Self {
            tier: RuleTier::Fallback,
            ..Self::primary(root_cause, action_type, weight)
        }
    }
}

/// Fault type -> candidate rules
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    rules: BTreeMap<FaultType, Vec<KnowledgeRule>>,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in rule set for cellular radio resources
    pub fn standard() -> Self {
        use ActionType::*;
        use FaultType::*;

        let mut kb = Self::new();
        kb.insert(Hardware, KnowledgeRule::primary("Radio unit failure", Restart, 0.9));
        kb.insert(Hardware, KnowledgeRule::primary("Baseband unit misconfiguration", Reconfigure, 0.6));
        kb.insert(Hardware, KnowledgeRule::fallback("Fiber or transport link failure", RerouteTraffic, 0.4));

        kb.insert(Configuration, KnowledgeRule::primary("Handover parameter misconfiguration", Reconfigure, 0.9));
        kb.insert(Configuration, KnowledgeRule::primary("Stale configuration loaded at runtime", Restart, 0.5));
        kb.insert(Configuration, KnowledgeRule::fallback("Incorrect neighbor list", RerouteTraffic, 0.3));

        kb.insert(PerformanceDegradation, KnowledgeRule::primary("Resource block exhaustion", CapacityReallocate, 0.8));
        kb.insert(PerformanceDegradation, KnowledgeRule::primary("Scheduler misconfiguration", Reconfigure, 0.6));
        kb.insert(PerformanceDegradation, KnowledgeRule::fallback("Software fault", Restart, 0.3));

        kb.insert(Connectivity, KnowledgeRule::primary("Connectivity service hang", Restart, 0.8));
        kb.insert(Connectivity, KnowledgeRule::primary("Transport network congestion", RerouteTraffic, 0.7));
        kb.insert(Connectivity, KnowledgeRule::fallback("Weak coverage area", PowerAdjust, 0.4));

        kb.insert(CapacityOverload, KnowledgeRule::primary("Traffic surge", RerouteTraffic, 0.85));
        kb.insert(CapacityOverload, KnowledgeRule::primary("Insufficient capacity", CapacityReallocate, 0.75));
        kb.insert(CapacityOverload, KnowledgeRule::fallback("Memory leak", Restart, 0.3));

        kb.insert(Interference, KnowledgeRule::primary("Co-channel interference", PowerAdjust, 0.85));
        kb.insert(Interference, KnowledgeRule::primary("External interference source", InterferenceMitigate, 0.8));
        kb.insert(Interference, KnowledgeRule::fallback("PCI collision", Reconfigure, 0.4));
        kb
    }

    pub fn insert(&mut self, fault_type: FaultType, rule: KnowledgeRule) {
        self.rules.entry(fault_type).or_default().push(rule);
    }

    pub fn rules_for(&self, fault_type: FaultType) -> &[KnowledgeRule] {
        self.rules
            .get(&fault_type)
            .map(|r| r.as_slice())
            .unwrap_or(&[])
    }
}

/// One ranked hypothesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub root_cause: String,
    pub action_type: ActionType,
    pub weight: f64,
    /// weight x learned success rate, in [0, 1]
    pub confidence: f64,
}

/// Ranked hypotheses for one fault
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub fault_id: String,
    pub fault_type: FaultType,
    pub candidates: Vec<Candidate>,
    /// 0 for the first diagnosis, incremented on each re-diagnosis
    pub round: u32,
    pub produced_at: DateTime<Utc>,
}

impl Diagnosis {
    pub fn top(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    pub fn ranked_actions(&self) -> Vec<ActionType> {
        self.candidates.iter().map(|c| c.action_type).collect()
    }
}

fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| b.weight.total_cmp(&a.weight))
        .then_with(|| a.action_type.cmp(&b.action_type))
}

/// Knowledge base + learned policy
pub struct DiagnosisEngine {
    knowledge: KnowledgeBase,
    policy: Arc<PolicyStore>,
}

impl DiagnosisEngine {
    pub fn new(knowledge: KnowledgeBase, policy: Arc<PolicyStore>) -> Self {
        Self { knowledge, policy }
    }

    /// First diagnosis: primary rules only
    pub fn diagnose(&self, fault: &Fault) -> Diagnosis {
        self.build(fault, |rule| rule.tier == RuleTier::Primary, 0)
    }

    /// Fresh ranking after the first one ran out: all tiers, minus failed actions
    pub fn rediagnose(&self, fault: &Fault, exclude: &[ActionType], round: u32) -> Diagnosis {
        self.build(fault, |rule| !exclude.contains(&rule.action_type), round)
    }

    fn build<F>(&self, fault: &Fault, admit: F, round: u32) -> Diagnosis
    where
        F: Fn(&KnowledgeRule) -> bool,
    {
        let mut candidates: Vec<Candidate> = self
            .knowledge
            .rules_for(fault.fault_type)
            .iter()
            .filter(|rule| admit(rule))
            .map(|rule| Candidate {
                root_cause: rule.root_cause.clone(),
                action_type: rule.action_type,
                weight: rule.weight,
                confidence: rule.weight * self.policy.success_rate(fault.fault_type, rule.action_type),
            })
            .collect();
        candidates.sort_by(rank);

        info!(
            "Diagnosed {} on {} (round {}): [{}]",
            fault.fault_type,
            fault.resource_id,
            round,
            candidates
                .iter()
                .map(|c| format!("{} {:.2}", c.action_type, c.confidence))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Diagnosis {
            fault_id: fault.id.clone(),
            fault_type: fault.fault_type,
            candidates,
            round,
            produced_at: Utc::now(),
        }
    }
}
