//! Agents built from declarative blueprints
//!
//! A blueprint picks one [`AgentTemplate`] and configures it. The set of
//! templates is closed; adding a behaviour means adding a variant here.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lexcore_config::{duration_from_secs, AgentEntry};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Agent, AgentContext, AgentType};
use crate::collaborators::Collaborators;
use crate::error::{AgentError, RegistrationError, Result};
use crate::models::{
    AgentCapability, AgentOutput, AgentRequirements, HealthReport, TaskContext, TaskPayload,
};
use crate::registry::AgentRegistration;

const DEFAULT_TEXT_FIELD: &str = "text";

/// Behaviours available to blueprints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTemplate {
    /// Returns the payload unchanged
    Echo,
    /// Reports which configured keywords occur in the text field
    KeywordMatcher,
    /// Collects regular expression matches per label from the text field
    PatternExtractor,
}

impl AgentTemplate {
    fn operations(&self) -> &'static [&'static str] {
        match self {
            Self::Echo => &["process"],
            Self::KeywordMatcher => &["analyze_text"],
            Self::PatternExtractor => &["extract_entities"],
        }
    }
}

impl fmt::Display for AgentTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Echo => "echo",
            Self::KeywordMatcher => "keyword_matcher",
            Self::PatternExtractor => "pattern_extractor",
        };
        f.write_str(s)
    }
}

impl FromStr for AgentTemplate {
    type Err = RegistrationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "echo" => Ok(Self::Echo),
            "keyword_matcher" | "keywords" => Ok(Self::KeywordMatcher),
            "pattern_extractor" | "patterns" => Ok(Self::PatternExtractor),
            other => Err(RegistrationError::Invalid(format!(
                "unknown agent template '{}'",
                other
            ))),
        }
    }
}

/// Declarative description of a template agent
///
/// # Examples
///
/// ```ignore
/// use lexcore_agents::{AgentBlueprint, AgentCapability, AgentTemplate};
///
/// let blueprint = AgentBlueprint::new("CitationExtractor", AgentTemplate::PatternExtractor)
///     .capability(AgentCapability::CitationAnalysis)
///     .jurisdiction("us")
///     .pattern("usc", r"\d+ U\.S\.C\. § \d+");
/// let id = registry.register_blueprint(&blueprint)?;
/// ```
#[derive(Debug, Clone)]
pub struct AgentBlueprint {
    name: String,
    template: AgentTemplate,
    agent_id: Option<String>,
    type_name: Option<String>,
    description: Option<String>,
    capabilities: BTreeSet<AgentCapability>,
    practice_areas: BTreeSet<String>,
    jurisdictions: BTreeSet<String>,
    requirements: AgentRequirements,
    timeout: Option<Duration>,
    text_field: String,
    keywords: Vec<String>,
    patterns: Vec<(String, String)>,
}

impl AgentBlueprint {
    pub fn new(name: impl Into<String>, template: AgentTemplate) -> Self {
        Self {
            name: name.into(),
            template,
            agent_id: None,
            type_name: None,
            description: None,
            capabilities: BTreeSet::new(),
            practice_areas: BTreeSet::new(),
            jurisdictions: BTreeSet::new(),
            requirements: AgentRequirements::default(),
            timeout: None,
            text_field: DEFAULT_TEXT_FIELD.to_string(),
            keywords: Vec::new(),
            patterns: Vec::new(),
        }
    }

    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Type name used for capability inference; defaults to the name
    pub fn type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn capability(mut self, capability: AgentCapability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn practice_area(mut self, area: impl Into<String>) -> Self {
        self.practice_areas.insert(area.into());
        self
    }

    pub fn jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdictions.insert(jurisdiction.into());
        self
    }

    pub fn requirements(mut self, requirements: AgentRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Payload field holding the text to inspect
    pub fn text_field(mut self, field: impl Into<String>) -> Self {
        self.text_field = field.into();
        self
    }

    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    /// Add a labelled regular expression
    pub fn pattern(mut self, label: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.patterns.push((label.into(), pattern.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> AgentTemplate {
        self.template
    }

    fn behavior(&self) -> std::result::Result<Behavior, RegistrationError> {
        match self.template {
            AgentTemplate::Echo => Ok(Behavior::Echo),
            AgentTemplate::KeywordMatcher => {
                if self.keywords.is_empty() {
                    return Err(RegistrationError::Invalid(format!(
                        "keyword matcher '{}' has no keywords",
                        self.name
                    )));
                }
                Ok(Behavior::KeywordMatcher {
                    text_field: self.text_field.clone(),
                    keywords: self.keywords.clone(),
                })
            }
            AgentTemplate::PatternExtractor => {
                if self.patterns.is_empty() {
                    return Err(RegistrationError::Invalid(format!(
                        "pattern extractor '{}' has no patterns",
                        self.name
                    )));
                }
                let patterns = self
                    .patterns
                    .iter()
                    .map(|(label, pattern)| {
                        Regex::new(pattern)
                            .map(|regex| (label.clone(), regex))
                            .map_err(|err| {
                                RegistrationError::Invalid(format!(
                                    "pattern '{}' of '{}' does not compile: {}",
                                    label, self.name, err
                                ))
                            })
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(Behavior::PatternExtractor {
                    text_field: self.text_field.clone(),
                    patterns,
                })
            }
        }
    }

    /// The agent type this blueprint instantiates
    ///
    /// Patterns are compiled here, so a bad expression is reported at
    /// registration rather than on first use.
    pub fn agent_type(&self) -> std::result::Result<AgentType, RegistrationError> {
        let behavior = self.behavior()?;
        let requirements = self.requirements;
        let type_name = self.type_name.clone().unwrap_or_else(|| self.name.clone());

        Ok(AgentType::from_fn(
            type_name,
            self.template.operations().iter().copied(),
            move |ctx: AgentContext| {
                let behavior = behavior.clone();
                async move {
                    debug!(agent_id = %ctx.agent_id, "Instantiating template agent");
                    Ok(Arc::new(TemplateAgent {
                        name: ctx.agent_name,
                        behavior,
                        requirements,
                        collaborators: ctx.collaborators,
                    }) as Arc<dyn Agent>)
                }
            },
        ))
    }

    /// Registration options carried by this blueprint
    pub fn registration(&self) -> AgentRegistration {
        let mut registration = AgentRegistration::new()
            .name(self.name.clone())
            .practice_areas(self.practice_areas.iter().cloned())
            .jurisdictions(self.jurisdictions.iter().cloned())
            .requirements(self.requirements);
        if !self.capabilities.is_empty() {
            registration = registration.capabilities(self.capabilities.iter().copied());
        }
        if let Some(agent_id) = &self.agent_id {
            registration = registration.agent_id(agent_id.clone());
        }
        if let Some(description) = &self.description {
            registration = registration.description(description.clone());
        }
        if let Some(timeout) = self.timeout {
            registration = registration.timeout(timeout);
        }
        registration
    }
}

impl TryFrom<&AgentEntry> for AgentBlueprint {
    type Error = RegistrationError;

    fn try_from(entry: &AgentEntry) -> std::result::Result<Self, Self::Error> {
        let template: AgentTemplate = entry.template.parse()?;
        let mut blueprint = AgentBlueprint::new(entry.name.clone(), template).requirements(
            AgentRequirements {
                requires_shared_memory: entry.requires_shared_memory,
                requires_vector_store: entry.requires_vector_store,
                requires_knowledge_graph: entry.requires_knowledge_graph,
            },
        );

        blueprint.agent_id = entry.agent_id.clone();
        blueprint.type_name = entry.type_name.clone();
        blueprint.description = entry.description.clone();
        for tag in &entry.capabilities {
            let capability = tag
                .parse::<AgentCapability>()
                .map_err(|err| RegistrationError::Invalid(err.to_string()))?;
            blueprint.capabilities.insert(capability);
        }
        blueprint.practice_areas = entry.practice_areas.iter().cloned().collect();
        blueprint.jurisdictions = entry.jurisdictions.iter().cloned().collect();
        if let Some(seconds) = entry.timeout_seconds {
            let timeout = duration_from_secs(seconds).ok_or_else(|| {
                RegistrationError::Invalid(format!(
                    "agent '{}' has an unusable timeout of {} seconds",
                    entry.name, seconds
                ))
            })?;
            blueprint.timeout = Some(timeout);
        }
        if let Some(field) = &entry.text_field {
            blueprint.text_field = field.clone();
        }
        blueprint.keywords = entry.keywords.clone();
        blueprint.patterns = entry
            .patterns
            .iter()
            .map(|(label, pattern)| (label.clone(), pattern.clone()))
            .collect();
        Ok(blueprint)
    }
}

#[derive(Debug, Clone)]
enum Behavior {
    Echo,
    KeywordMatcher {
        text_field: String,
        keywords: Vec<String>,
    },
    PatternExtractor {
        text_field: String,
        patterns: Vec<(String, Regex)>,
    },
}

fn text_of<'a>(payload: &'a TaskPayload, field: &str) -> Result<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::invalid_input(format!("payload field '{}' must be a string", field)))
}

/// Instance of a blueprint agent
pub struct TemplateAgent {
    name: String,
    behavior: Behavior,
    requirements: AgentRequirements,
    collaborators: Collaborators,
}

impl TemplateAgent {
    fn run(&self, payload: &TaskPayload) -> Result<AgentOutput> {
        let mut output = AgentOutput::new();
        match &self.behavior {
            Behavior::Echo => {
                output.insert("echo".to_string(), Value::Object(payload.clone()));
            }
            Behavior::KeywordMatcher {
                text_field,
                keywords,
            } => {
                let text = text_of(payload, text_field)?.to_lowercase();
                let matches: Vec<&String> = keywords
                    .iter()
                    .filter(|keyword| text.contains(&keyword.to_lowercase()))
                    .collect();
                output.insert("match_count".to_string(), json!(matches.len()));
                output.insert("matches".to_string(), json!(matches));
            }
            Behavior::PatternExtractor {
                text_field,
                patterns,
            } => {
                let text = text_of(payload, text_field)?;
                let mut extractions = Map::new();
                let mut total = 0;
                for (label, regex) in patterns {
                    let found: Vec<&str> = regex.find_iter(text).map(|m| m.as_str()).collect();
                    total += found.len();
                    extractions.insert(label.clone(), json!(found));
                }
                output.insert("extractions".to_string(), Value::Object(extractions));
                output.insert("total".to_string(), json!(total));
            }
        }
        Ok(output)
    }
}

#[async_trait]
impl Agent for TemplateAgent {
    async fn process(
        &self,
        ctx: &TaskContext,
        payload: &TaskPayload,
        cancel: CancellationToken,
    ) -> Result<AgentOutput> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let output = self.run(payload)?;

        if let Some(memory) = &self.collaborators.shared_memory {
            let key = format!("{}:{}", self.name, ctx.task_id);
            memory.put(&key, Value::Object(output.clone())).await;
        }
        Ok(output)
    }

    async fn health_check(&self) -> Result<HealthReport> {
        let missing = self.collaborators.missing(&self.requirements);
        if missing.is_empty() {
            return Ok(HealthReport::healthy().with_detail("agent", self.name.clone()));
        }
        Ok(
            HealthReport::unhealthy(format!("missing collaborators: {}", missing.join(", ")))
                .with_detail("missing", json!(missing)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskPriority;
    use lexcore_di::DIContainer;

    fn context(name: &str) -> AgentContext {
        AgentContext {
            agent_id: "id".to_string(),
            agent_name: name.to_string(),
            collaborators: Collaborators::default(),
            container: Arc::new(DIContainer::new()),
        }
    }

    fn task() -> TaskContext {
        TaskContext {
            task_id: "task".to_string(),
            correlation_id: "corr".to_string(),
            priority: TaskPriority::Normal,
            agent_name: "test".to_string(),
            agent_type: "test".to_string(),
            metadata: Map::new(),
        }
    }

    fn payload(text: &str) -> TaskPayload {
        let mut payload = TaskPayload::new();
        payload.insert("text".to_string(), json!(text));
        payload
    }

    async fn run(blueprint: &AgentBlueprint, payload: &TaskPayload) -> Result<AgentOutput> {
        let agent = blueprint
            .agent_type()
            .unwrap()
            .construct(context(blueprint.name()))
            .await?;
        agent.process(&task(), payload, CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_echo() {
        let blueprint = AgentBlueprint::new("Echo", AgentTemplate::Echo);
        let output = run(&blueprint, &payload("hello")).await.unwrap();
        assert_eq!(output["echo"]["text"], "hello");
    }

    #[tokio::test]
    async fn test_keyword_matcher_is_case_insensitive() {
        let blueprint = AgentBlueprint::new("Contracts", AgentTemplate::KeywordMatcher)
            .keyword("Indemnify")
            .keyword("arbitration")
            .keyword("warranty");
        let output = run(&blueprint, &payload("The seller shall INDEMNIFY; arbitration applies."))
            .await
            .unwrap();
        assert_eq!(output["match_count"], 2);
        assert_eq!(output["matches"], json!(["Indemnify", "arbitration"]));
    }

    #[tokio::test]
    async fn test_pattern_extractor() {
        let blueprint = AgentBlueprint::new("Citations", AgentTemplate::PatternExtractor)
            .pattern("usc", r"\d+ U\.S\.C\. § \d+")
            .pattern("decided", r"decided \d{4}");
        let output = run(
            &blueprint,
            &payload("See 42 U.S.C. § 1983 and 28 U.S.C. § 1331, decided 1998."),
        )
        .await
        .unwrap();
        assert_eq!(output["total"], 3);
        assert_eq!(
            output["extractions"]["usc"],
            json!(["42 U.S.C. § 1983", "28 U.S.C. § 1331"])
        );
    }

    #[tokio::test]
    async fn test_missing_text_field_is_invalid_input() {
        let blueprint = AgentBlueprint::new("Contracts", AgentTemplate::KeywordMatcher)
            .keyword("x")
            .text_field("body");
        let result = run(&blueprint, &payload("x")).await;
        assert!(matches!(result, Err(AgentError::InvalidInput(_))));
    }

    #[test]
    fn test_invalid_blueprints_are_rejected() {
        assert!(AgentBlueprint::new("Empty", AgentTemplate::KeywordMatcher)
            .agent_type()
            .is_err());
        assert!(AgentBlueprint::new("Bad", AgentTemplate::PatternExtractor)
            .pattern("broken", "(")
            .agent_type()
            .is_err());
        assert!("telepathy".parse::<AgentTemplate>().is_err());
    }

    #[tokio::test]
    async fn test_missing_collaborator_reports_unhealthy() {
        let blueprint = AgentBlueprint::new("Memo", AgentTemplate::Echo).requirements(
            AgentRequirements {
                requires_shared_memory: true,
                ..AgentRequirements::default()
            },
        );
        let agent = blueprint
            .agent_type()
            .unwrap()
            .construct(context("Memo"))
            .await
            .unwrap();
        let report = agent.health_check().await.unwrap();
        assert!(!report.healthy);
        assert_eq!(report.details["missing"], json!(["shared_memory"]));
    }

    #[test]
    fn test_from_config_entry() {
        let entry = AgentEntry {
            agent_id: Some("cite".to_string()),
            name: "CitationExtractor".to_string(),
            template: "pattern-extractor".to_string(),
            capabilities: vec!["citation_analysis".to_string()],
            jurisdictions: vec!["us".to_string()],
            timeout_seconds: Some(2.5),
            patterns: [("usc".to_string(), r"\d+ U\.S\.C\.".to_string())]
                .into_iter()
                .collect(),
            ..AgentEntry::default()
        };
        let blueprint = AgentBlueprint::try_from(&entry).unwrap();
        assert_eq!(blueprint.template(), AgentTemplate::PatternExtractor);
        assert!(blueprint.capabilities.contains(&AgentCapability::CitationAnalysis));
        assert_eq!(blueprint.timeout, Some(Duration::from_millis(2500)));
        assert!(blueprint.agent_type().is_ok());

        let negative = AgentEntry {
            timeout_seconds: Some(-1.0),
            ..entry.clone()
        };
        assert!(matches!(
            AgentBlueprint::try_from(&negative),
            Err(RegistrationError::Invalid(_))
        ));

        let bad = AgentEntry {
            capabilities: vec!["telepathy".to_string()],
            ..entry
        };
        assert!(AgentBlueprint::try_from(&bad).is_err());
    }
}
