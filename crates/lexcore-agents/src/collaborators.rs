//! Shared collaborators handed to agents at construction
//!
//! Agents declare which collaborators they need through
//! [`AgentRequirements`]. The registry resolves the matching trait objects
//! from the container when it builds an instance; a collaborator that is not
//! registered is left absent and the agent is expected to report itself
//! unhealthy.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use lexcore_di::{DIContainer, DIResult, ServiceKey, ServiceProvider};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{AgentError, Result};
use crate::models::AgentRequirements;

/// Key/value scratch space shared between agents
#[async_trait]
pub trait SharedMemory: Send + Sync {
    /// Store a value, replacing any previous one
    async fn put(&self, key: &str, value: Value);
    /// Fetch a value
    async fn get(&self, key: &str) -> Option<Value>;
    /// Remove and return a value
    async fn remove(&self, key: &str) -> Option<Value>;
}

/// A scored hit from a [`VectorStore`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorMatch {
    /// Id of the stored vector
    pub id: String,
    /// Cosine similarity with the query
    pub score: f32,
    /// Metadata stored alongside the vector
    pub metadata: Value,
}

/// Embedding storage with similarity search
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace a vector
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> Result<()>;
    /// The `top_k` most similar vectors, best first
    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<VectorMatch>>;
}

/// Labelled directed graph
#[async_trait]
pub trait KnowledgeGraph: Send + Sync {
    /// Add an edge `from -relation-> to`
    async fn add_edge(&self, from: &str, relation: &str, to: &str);
    /// Outgoing `(relation, target)` pairs of a node
    async fn neighbors(&self, node: &str) -> Vec<(String, String)>;
}

/// Shared handle to a [`SharedMemory`], as stored in the container
pub type SharedMemoryRef = Arc<dyn SharedMemory>;
/// Shared handle to a [`VectorStore`], as stored in the container
pub type VectorStoreRef = Arc<dyn VectorStore>;
/// Shared handle to a [`KnowledgeGraph`], as stored in the container
pub type KnowledgeGraphRef = Arc<dyn KnowledgeGraph>;

/// Collaborators attached to one agent instance
#[derive(Clone, Default)]
pub struct Collaborators {
    /// Present when required and registered
    pub shared_memory: Option<SharedMemoryRef>,
    /// Present when required and registered
    pub vector_store: Option<VectorStoreRef>,
    /// Present when required and registered
    pub knowledge_graph: Option<KnowledgeGraphRef>,
}

impl Collaborators {
    /// Resolve every collaborator the requirements ask for
    ///
    /// A collaborator whose own key is not registered is logged and left
    /// absent. Any error while resolving a registered one, including a
    /// missing dependency of it, is returned.
    pub async fn resolve(
        container: &DIContainer,
        requirements: &AgentRequirements,
    ) -> DIResult<Self> {
        let mut collaborators = Self::default();
        if requirements.requires_shared_memory {
            collaborators.shared_memory = optional::<SharedMemoryRef>(container).await?;
        }
        if requirements.requires_vector_store {
            collaborators.vector_store = optional::<VectorStoreRef>(container).await?;
        }
        if requirements.requires_knowledge_graph {
            collaborators.knowledge_graph = optional::<KnowledgeGraphRef>(container).await?;
        }
        Ok(collaborators)
    }

    /// Names of required collaborators that are absent
    pub fn missing(&self, requirements: &AgentRequirements) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if requirements.requires_shared_memory && self.shared_memory.is_none() {
            missing.push("shared_memory");
        }
        if requirements.requires_vector_store && self.vector_store.is_none() {
            missing.push("vector_store");
        }
        if requirements.requires_knowledge_graph && self.knowledge_graph.is_none() {
            missing.push("knowledge_graph");
        }
        missing
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("shared_memory", &self.shared_memory.is_some())
            .field("vector_store", &self.vector_store.is_some())
            .field("knowledge_graph", &self.knowledge_graph.is_some())
            .finish()
    }
}

async fn optional<T>(container: &DIContainer) -> DIResult<Option<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let key = ServiceKey::of::<T>();
    if !container.contains_key(key) {
        warn!(service = %key, "Required collaborator is not registered");
        return Ok(None);
    }
    let handle = container.resolve::<T>().await?;
    Ok(Some((*handle).clone()))
}

/// In-process [`SharedMemory`]
#[derive(Default)]
pub struct InMemorySharedMemory {
    entries: RwLock<HashMap<String, Value>>,
}

#[async_trait]
impl SharedMemory for InMemorySharedMemory {
    async fn put(&self, key: &str, value: Value) {
        self.entries.write().insert(key.to_string(), value);
    }

    async fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    async fn remove(&self, key: &str) -> Option<Value> {
        self.entries.write().remove(key)
    }
}

/// In-process [`VectorStore`] using brute-force cosine similarity
#[derive(Default)]
pub struct InMemoryVectorStore {
    vectors: RwLock<HashMap<String, (Vec<f32>, Value)>>,
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> Result<()> {
        if vector.is_empty() {
            return Err(AgentError::invalid_input("vector must not be empty"));
        }
        self.vectors
            .write()
            .insert(id.to_string(), (vector, metadata));
        Ok(())
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        let vectors = self.vectors.read();
        let mut matches: Vec<VectorMatch> = vectors
            .iter()
            .filter(|(_, (vector, _))| vector.len() == query.len())
            .map(|(id, (vector, metadata))| VectorMatch {
                id: id.clone(),
                score: cosine(query, vector),
                metadata: metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(top_k);
        Ok(matches)
    }
}

/// In-process [`KnowledgeGraph`] backed by an adjacency list
#[derive(Default)]
pub struct InMemoryKnowledgeGraph {
    edges: RwLock<HashMap<String, Vec<(String, String)>>>,
}

#[async_trait]
impl KnowledgeGraph for InMemoryKnowledgeGraph {
    async fn add_edge(&self, from: &str, relation: &str, to: &str) {
        let mut edges = self.edges.write();
        let outgoing = edges.entry(from.to_string()).or_default();
        let edge = (relation.to_string(), to.to_string());
        if !outgoing.contains(&edge) {
            outgoing.push(edge);
        }
    }

    async fn neighbors(&self, node: &str) -> Vec<(String, String)> {
        self.edges.read().get(node).cloned().unwrap_or_default()
    }
}

/// Installs the in-memory collaborators
pub struct CollaboratorProvider;

impl ServiceProvider for CollaboratorProvider {
    fn name(&self) -> &'static str {
        "collaborators"
    }

    fn priority(&self) -> u32 {
        10
    }

    fn register(&self, container: &DIContainer) -> DIResult<()> {
        let shared_memory: SharedMemoryRef = Arc::new(InMemorySharedMemory::default());
        let vector_store: VectorStoreRef = Arc::new(InMemoryVectorStore::default());
        let knowledge_graph: KnowledgeGraphRef = Arc::new(InMemoryKnowledgeGraph::default());

        container.register_instance_with_aliases(Arc::new(shared_memory), &["shared_memory"]);
        container.register_instance_with_aliases(Arc::new(vector_store), &["vector_store"]);
        container.register_instance_with_aliases(Arc::new(knowledge_graph), &["knowledge_graph"]);
        debug!("Registered in-memory collaborators");
        Ok(())
    }

    fn required_services(&self) -> Vec<ServiceKey> {
        vec![
            ServiceKey::of::<SharedMemoryRef>(),
            ServiceKey::of::<VectorStoreRef>(),
            ServiceKey::of::<KnowledgeGraphRef>(),
        ]
    }
}
