//! Three-facet index and candidate ranking

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::models::{AgentCapability, AgentMetadata};

/// Maps each facet value to the agents declaring it
///
/// Facets are capability, practice area and jurisdiction. Practice areas and
/// jurisdictions are matched exactly as registered.
#[derive(Debug, Default)]
pub struct CapabilityIndex {
    capabilities: HashMap<AgentCapability, HashSet<String>>,
    practice_areas: HashMap<String, HashSet<String>>,
    jurisdictions: HashMap<String, HashSet<String>>,
}

impl CapabilityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the agent under every facet it declares
    pub fn index(&mut self, metadata: &AgentMetadata) {
        let id = &metadata.agent_id;
        for capability in &metadata.capabilities {
            self.capabilities
                .entry(*capability)
                .or_default()
                .insert(id.clone());
        }
        for area in &metadata.practice_areas {
            self.practice_areas
                .entry(area.clone())
                .or_default()
                .insert(id.clone());
        }
        for jurisdiction in &metadata.jurisdictions {
            self.jurisdictions
                .entry(jurisdiction.clone())
                .or_default()
                .insert(id.clone());
        }
    }

    /// Remove the agent from every facet it declares
    pub fn unindex(&mut self, metadata: &AgentMetadata) {
        let id = &metadata.agent_id;
        for capability in &metadata.capabilities {
            remove_from(&mut self.capabilities, capability, id);
        }
        for area in &metadata.practice_areas {
            remove_from(&mut self.practice_areas, area, id);
        }
        for jurisdiction in &metadata.jurisdictions {
            remove_from(&mut self.jurisdictions, jurisdiction, id);
        }
    }

    /// Agent ids under `capability`, narrowed by the optional facets
    pub fn lookup(
        &self,
        capability: AgentCapability,
        practice_area: Option<&str>,
        jurisdiction: Option<&str>,
    ) -> HashSet<String> {
        let mut ids = self
            .capabilities
            .get(&capability)
            .cloned()
            .unwrap_or_default();
        if let Some(area) = practice_area {
            narrow(&mut ids, self.practice_areas.get(area));
        }
        if let Some(jurisdiction) = jurisdiction {
            narrow(&mut ids, self.jurisdictions.get(jurisdiction));
        }
        ids
    }

    /// Capabilities with at least one agent
    pub fn capabilities(&self) -> Vec<AgentCapability> {
        let mut capabilities: Vec<_> = self
            .capabilities
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(capability, _)| *capability)
            .collect();
        capabilities.sort();
        capabilities
    }
}

fn remove_from<K, Q>(map: &mut HashMap<K, HashSet<String>>, key: &Q, id: &str)
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + ?Sized,
{
    if let Some(ids) = map.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            map.remove(key);
        }
    }
}

fn narrow(ids: &mut HashSet<String>, facet: Option<&HashSet<String>>) {
    match facet {
        Some(allowed) => ids.retain(|id| allowed.contains(id)),
        None => ids.clear(),
    }
}

/// Best candidates first
///
/// Success rate descending, then mean processing time ascending, then
/// registration order.
pub fn compare_candidates(a: &AgentMetadata, b: &AgentMetadata) -> Ordering {
    b.success_rate
        .total_cmp(&a.success_rate)
        .then_with(|| a.avg_processing_time.total_cmp(&b.avg_processing_time))
        .then_with(|| a.registration_order.cmp(&b.registration_order))
}

/// Sort candidates with [`compare_candidates`] and keep the first `max_results`
pub fn rank_candidates(mut candidates: Vec<AgentMetadata>, max_results: usize) -> Vec<AgentMetadata> {
    candidates.sort_by(compare_candidates);
    candidates.truncate(max_results);
    candidates
}
