use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lexcore_agents::*;
use lexcore_di::DIContainer;
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

struct Noop;

#[async_trait]
impl Agent for Noop {
    async fn process(
        &self,
        _ctx: &TaskContext,
        _payload: &TaskPayload,
        _cancel: CancellationToken,
    ) -> Result<AgentOutput> {
        Ok(AgentOutput::new())
    }
}

/// Succeeds or fails following a fixed script
struct Scripted {
    script: Vec<bool>,
    calls: AtomicUsize,
}

#[async_trait]
impl Agent for Scripted {
    async fn process(
        &self,
        _ctx: &TaskContext,
        _payload: &TaskPayload,
        _cancel: CancellationToken,
    ) -> Result<AgentOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.script.get(call).copied().unwrap_or(true) {
            Ok(AgentOutput::new())
        } else {
            Err(AgentError::execution_failed("scripted failure"))
        }
    }
}

const CAPABILITIES: [AgentCapability; 3] = [
    AgentCapability::Reasoning,
    AgentCapability::Validation,
    AgentCapability::CitationAnalysis,
];
const AREAS: [&str; 2] = ["tax", "ip"];
const JURISDICTIONS: [&str; 3] = ["us", "uk", "eu"];

#[derive(Debug, Clone)]
struct AgentFacets {
    capabilities: Vec<usize>,
    areas: Vec<usize>,
    jurisdictions: Vec<usize>,
}

fn facets_strategy() -> impl Strategy<Value = AgentFacets> {
    (
        prop::collection::vec(0..CAPABILITIES.len(), 1..3),
        prop::collection::vec(0..AREAS.len(), 0..2),
        prop::collection::vec(0..JURISDICTIONS.len(), 0..3),
    )
        .prop_map(|(capabilities, areas, jurisdictions)| AgentFacets {
            capabilities,
            areas,
            jurisdictions,
        })
}

fn metadata_strategy() -> impl Strategy<Value = AgentMetadata> {
    (0u32..=10, 0u32..=4, any::<u16>()).prop_map(|(rate, avg, order)| {
        let mut metadata = AgentMetadata::new(format!("agent-{}", order), "agent");
        metadata.success_rate = rate as f64 / 10.0;
        metadata.avg_processing_time = avg as f64 * 0.5;
        metadata.registration_order = order as u64;
        metadata
    })
}

proptest! {
    /// Lookup returns exactly the agents matching every requested facet
    #[test]
    fn prop_lookup_matches_facets(
        agents in prop::collection::vec(facets_strategy(), 1..12),
        capability in 0..CAPABILITIES.len(),
        area in prop::option::of(0..AREAS.len()),
        jurisdiction in prop::option::of(0..JURISDICTIONS.len()),
    ) {
        let registry = AgentRegistry::new(Arc::new(DIContainer::new()), RegistryConfig::default());
        let mut expected = Vec::new();
        for (i, facets) in agents.iter().enumerate() {
            let id = registry
                .register_agent(
                    AgentType::shared("Noop", Arc::new(Noop)),
                    AgentRegistration::new()
                        .agent_id(format!("a{}", i))
                        .capabilities(facets.capabilities.iter().map(|&c| CAPABILITIES[c]))
                        .practice_areas(facets.areas.iter().map(|&a| AREAS[a]))
                        .jurisdictions(facets.jurisdictions.iter().map(|&j| JURISDICTIONS[j])),
                )
                .unwrap();
            let matches = facets.capabilities.contains(&capability)
                && area.map_or(true, |a| facets.areas.contains(&a))
                && jurisdiction.map_or(true, |j| facets.jurisdictions.contains(&j));
            if matches {
                expected.push(id);
            }
        }

        let found = registry.find_agents_by_capability(
            CAPABILITIES[capability],
            area.map(|a| AREAS[a]),
            jurisdiction.map(|j| JURISDICTIONS[j]),
            usize::MAX,
        );
        // fresh agents tie on metrics, so registration order decides
        let ids: Vec<_> = found.into_iter().map(|m| m.agent_id).collect();
        prop_assert_eq!(ids, expected);
    }

    /// Ranked output is sorted, truncated and drawn from the input
    #[test]
    fn prop_ranking_is_ordered(
        candidates in prop::collection::vec(metadata_strategy(), 0..20),
        max in 0usize..25,
    ) {
        let input: HashSet<_> = candidates.iter().map(|m| m.agent_id.clone()).collect();
        let ranked = rank_candidates(candidates.clone(), max);

        prop_assert_eq!(ranked.len(), candidates.len().min(max));
        for metadata in &ranked {
            prop_assert!(input.contains(&metadata.agent_id));
        }
        for pair in ranked.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!(a.success_rate >= b.success_rate);
            if a.success_rate == b.success_rate {
                prop_assert!(a.avg_processing_time <= b.avg_processing_time);
                if a.avg_processing_time == b.avg_processing_time {
                    prop_assert!(a.registration_order <= b.registration_order);
                }
            }
        }
    }

    /// Success rate stays within [0, 1] and counts every attempt
    #[test]
    fn prop_metric_update_bounds(outcomes in prop::collection::vec((any::<bool>(), 0u32..100), 1..50)) {
        let mut metadata = AgentMetadata::new("m", "m");
        let mut successes = 0u32;
        for (i, (success, millis)) in outcomes.iter().enumerate() {
            metadata.record_attempt(*success, *millis as f64 / 1000.0);
            if *success {
                successes += 1;
            }
            prop_assert!((0.0..=1.0).contains(&metadata.success_rate));
            prop_assert_eq!(metadata.task_count, i as u64 + 1);
            prop_assert!(metadata.avg_processing_time >= 0.0);
        }
        let expected = successes as f64 / outcomes.len() as f64;
        prop_assert!((metadata.success_rate - expected).abs() < 1e-9);
    }

    /// Dispatch metrics agree with the outcomes the agent produced
    #[test]
    fn prop_dispatch_counts_every_attempt(script in prop::collection::vec(any::<bool>(), 1..20)) {
        let registry = AgentRegistry::new(Arc::new(DIContainer::new()), RegistryConfig::default());
        let id = registry
            .register_agent(
                AgentType::shared(
                    "Scripted",
                    Arc::new(Scripted {
                        script: script.clone(),
                        calls: AtomicUsize::new(0),
                    }),
                ),
                AgentRegistration::new().capability(AgentCapability::Validation),
            )
            .unwrap();

        tokio_test::block_on(async {
            for expected in &script {
                let result = registry
                    .execute_with_best_agent(
                        AgentCapability::Validation,
                        TaskPayload::new(),
                        TaskPriority::Normal,
                        DispatchFilters::new(),
                    )
                    .await;
                assert_eq!(result.is_ok(), *expected);
            }
        });

        let metadata = registry.get_agent_metadata(&id).unwrap();
        let failures = script.iter().filter(|ok| !**ok).count() as u64;
        prop_assert_eq!(metadata.task_count, script.len() as u64);
        prop_assert_eq!(metadata.error_count, failures);
        prop_assert_eq!(registry.instance_count(), 1);
    }
}
