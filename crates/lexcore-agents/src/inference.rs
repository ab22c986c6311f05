//! Capability inference from type and operation names
//!
//! Used when an agent is registered without explicit capabilities. The type
//! name is split into lower-case words and matched against a fixed lexicon;
//! well-known operation names add further capabilities. An agent that matches
//! nothing is filed under `text_analysis`.

use std::collections::BTreeSet;

use crate::models::AgentCapability;

const LEXICON: &[(&str, AgentCapability)] = &[
    ("document", AgentCapability::DocumentProcessing),
    ("processor", AgentCapability::DocumentProcessing),
    ("text", AgentCapability::TextAnalysis),
    ("analysis", AgentCapability::TextAnalysis),
    ("analyzer", AgentCapability::TextAnalysis),
    ("entity", AgentCapability::EntityExtraction),
    ("extraction", AgentCapability::EntityExtraction),
    ("extractor", AgentCapability::EntityExtraction),
    ("ner", AgentCapability::EntityExtraction),
    ("legal", AgentCapability::LegalAnalysis),
    ("law", AgentCapability::LegalAnalysis),
    ("semantic", AgentCapability::SemanticAnalysis),
    ("meaning", AgentCapability::SemanticAnalysis),
    ("structure", AgentCapability::StructuralAnalysis),
    ("structural", AgentCapability::StructuralAnalysis),
    ("layout", AgentCapability::StructuralAnalysis),
    ("citation", AgentCapability::CitationAnalysis),
    ("cite", AgentCapability::CitationAnalysis),
    ("reference", AgentCapability::CitationAnalysis),
    ("knowledge", AgentCapability::KnowledgeGraph),
    ("graph", AgentCapability::KnowledgeGraph),
    ("vector", AgentCapability::VectorSearch),
    ("embedding", AgentCapability::VectorSearch),
    ("search", AgentCapability::VectorSearch),
    ("memory", AgentCapability::MemoryManagement),
    ("workflow", AgentCapability::WorkflowOrchestration),
    ("orchestrator", AgentCapability::WorkflowOrchestration),
    ("pipeline", AgentCapability::WorkflowOrchestration),
    ("precedent", AgentCapability::PrecedentMatching),
    ("caselaw", AgentCapability::PrecedentMatching),
    ("compliance", AgentCapability::ComplianceChecking),
    ("regulatory", AgentCapability::ComplianceChecking),
    ("generator", AgentCapability::DocumentGeneration),
    ("generation", AgentCapability::DocumentGeneration),
    ("drafting", AgentCapability::DocumentGeneration),
    ("reasoning", AgentCapability::Reasoning),
    ("inference", AgentCapability::Reasoning),
    ("logic", AgentCapability::Reasoning),
    ("validation", AgentCapability::Validation),
    ("validator", AgentCapability::Validation),
    ("verify", AgentCapability::Validation),
];

const OPERATIONS: &[(&str, AgentCapability)] = &[
    ("process_document", AgentCapability::DocumentProcessing),
    ("extract_text", AgentCapability::DocumentProcessing),
    ("analyze", AgentCapability::TextAnalysis),
    ("analyze_text", AgentCapability::TextAnalysis),
];

/// Split an identifier into lower-case words
///
/// Handles CamelCase (including acronyms such as `NERExtractor`), snake_case
/// and kebab-case.
pub fn tokenize(name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for part in name.split(|c: char| !c.is_alphanumeric()) {
        let chars: Vec<char> = part.chars().collect();
        let mut current = String::new();
        for (i, &c) in chars.iter().enumerate() {
            if c.is_uppercase() && !current.is_empty() {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
                if prev.is_lowercase() || prev.is_numeric() || (prev.is_uppercase() && next_is_lower)
                {
                    tokens.push(current.to_lowercase());
                    current.clear();
                }
            }
            current.push(c);
        }
        if !current.is_empty() {
            tokens.push(current.to_lowercase());
        }
    }
    tokens
}

/// Capabilities implied by a type name and its operation names
pub fn infer_capabilities<S: AsRef<str>>(
    type_name: &str,
    operations: &[S],
) -> BTreeSet<AgentCapability> {
    let tokens = tokenize(type_name);
    let mut capabilities: BTreeSet<AgentCapability> = LEXICON
        .iter()
        .filter(|(word, _)| tokens.iter().any(|token| token == word))
        .map(|(_, capability)| *capability)
        .collect();

    capabilities.extend(
        OPERATIONS
            .iter()
            .filter(|(op, _)| operations.iter().any(|name| name.as_ref() == *op))
            .map(|(_, capability)| *capability),
    );

    if capabilities.is_empty() {
        capabilities.insert(AgentCapability::TextAnalysis);
    }
    capabilities
}
