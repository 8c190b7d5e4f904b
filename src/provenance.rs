//! # Provenance Graph (W3C PROV)
//!
//! Records plan execution as a PROV-O graph: entities (input, intermediate,
//! and output values), activities (function applications), agents, and the
//! five qualified relations `used`, `wasGeneratedBy`, `wasDerivedFrom`,
//! `wasAssociatedWith`, `wasAttributedTo`.
//!
//! Three exporters serialise the identical graph: self-describing JSON,
//! RDF 1.1 Turtle, and JSON-LD. Re-ingesting any export yields an isomorphic
//! graph modulo id and timestamp equivalence.
//!
//! Wall-clock timestamps and random ids are the default; tests inject a
//! fixed clock and a sequential id generator to keep snapshots stable.

use chrono::Utc;
use serde_json::{json, Map, Value as Json};
use std::collections::HashMap;
use uuid::Uuid;

/// Id generation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// `prefix_<8 hex chars>` from a v4 UUID
    Random,
    /// `prefix_<counter>`, for stable test snapshots
    Sequential,
}

/// Timestamp source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clock {
    /// RFC 3339 wall-clock timestamps
    System,
    /// A fixed timestamp string, for stable test snapshots
    Fixed(String),
}

impl Clock {
    fn now(&self) -> String {
        match self {
            Clock::System => Utc::now().to_rfc3339(),
            Clock::Fixed(ts) => ts.clone(),
        }
    }
}

/// PROV Entity: a data value with its type and stringified content
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: String,
    pub type_name: String,
    pub value: String,
    pub attributes: HashMap<String, String>,
    pub timestamp: String,
}

/// PROV Activity: a function application with start/end timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub id: String,
    pub func_id: String,
    pub func_signature: String,
    pub start_time: String,
    pub end_time: Option<String>,
}

/// PROV Agent: the party responsible for activities
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub agent_type: String,
}

/// `prov:used`: an activity consumed an entity
#[derive(Debug, Clone, PartialEq)]
pub struct Usage {
    pub activity_id: String,
    pub entity_id: String,
    pub role: String,
    pub timestamp: String,
}

/// `prov:wasGeneratedBy`: an entity was produced by an activity
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub entity_id: String,
    pub activity_id: String,
    pub role: String,
    pub timestamp: String,
}

/// `prov:wasDerivedFrom`: an entity descends from another entity
#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
    pub derived_entity_id: String,
    pub source_entity_id: String,
    pub activity_id: Option<String>,
}

/// `prov:wasAssociatedWith`: an activity is attributed to an agent
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    pub activity_id: String,
    pub agent_id: String,
    pub role: String,
}

/// `prov:wasAttributedTo`: an entity is attributed to an agent
#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    pub entity_id: String,
    pub agent_id: String,
}

/// The PROV-O graph. Nodes are stored in insertion order so exports are
/// reproducible.
#[derive(Debug, Clone)]
pub struct ProvenanceGraph {
    pub namespace: String,
    entities: Vec<Entity>,
    activities: Vec<Activity>,
    agents: Vec<Agent>,
    usages: Vec<Usage>,
    generations: Vec<Generation>,
    derivations: Vec<Derivation>,
    associations: Vec<Association>,
    attributions: Vec<Attribution>,
    system_agent: String,
    ids: IdStrategy,
    clock: Clock,
    counter: u64,
}

impl ProvenanceGraph {
    pub fn new() -> Self {
        Self::with_generators(IdStrategy::Random, Clock::System)
    }

    /// Sequential ids and a fixed clock, for stable snapshots in tests
    pub fn deterministic() -> Self {
        Self::with_generators(
            IdStrategy::Sequential,
            Clock::Fixed("2024-01-01T00:00:00+00:00".to_string()),
        )
    }

    pub fn with_generators(ids: IdStrategy, clock: Clock) -> Self {
        let mut graph = ProvenanceGraph {
            namespace: "http://example.org/provenance/".to_string(),
            entities: Vec::new(),
            activities: Vec::new(),
            agents: Vec::new(),
            usages: Vec::new(),
            generations: Vec::new(),
            derivations: Vec::new(),
            associations: Vec::new(),
            attributions: Vec::new(),
            system_agent: String::new(),
            ids,
            clock,
            counter: 0,
        };
        graph.system_agent =
            graph.add_agent(Some("system"), "TypeSynth Engine", "system");
        graph
    }

    fn generate_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        match self.ids {
            IdStrategy::Random => {
                format!("{prefix}_{}", &Uuid::new_v4().simple().to_string()[..8])
            }
            IdStrategy::Sequential => format!("{prefix}_{}", self.counter),
        }
    }

    pub fn system_agent(&self) -> &str {
        &self.system_agent
    }

    pub fn add_entity(&mut self, id: Option<&str>, type_name: &str, value: &str) -> String {
        let id = id
            .map(String::from)
            .unwrap_or_else(|| self.generate_id("entity"));
        self.entities.push(Entity {
            id: id.clone(),
            type_name: type_name.to_string(),
            value: value.to_string(),
            attributes: HashMap::new(),
            timestamp: self.clock.now(),
        });
        id
    }

    pub fn add_activity(&mut self, id: Option<&str>, func_id: &str, func_signature: &str) -> String {
        let id = id
            .map(String::from)
            .unwrap_or_else(|| self.generate_id("activity"));
        self.activities.push(Activity {
            id: id.clone(),
            func_id: func_id.to_string(),
            func_signature: func_signature.to_string(),
            start_time: self.clock.now(),
            end_time: None,
        });
        id
    }

    /// Stamp an activity's end timestamp
    pub fn end_activity(&mut self, activity_id: &str) {
        let end = self.clock.now();
        if let Some(activity) = self
            .activities
            .iter_mut()
            .find(|a| a.id == activity_id)
        {
            activity.end_time = Some(end);
        }
    }

    pub fn add_agent(&mut self, id: Option<&str>, name: &str, agent_type: &str) -> String {
        let id = id
            .map(String::from)
            .unwrap_or_else(|| self.generate_id("agent"));
        self.agents.push(Agent {
            id: id.clone(),
            name: name.to_string(),
            agent_type: agent_type.to_string(),
        });
        id
    }

    pub fn add_usage(&mut self, activity_id: &str, entity_id: &str, role: &str) {
        self.usages.push(Usage {
            activity_id: activity_id.to_string(),
            entity_id: entity_id.to_string(),
            role: role.to_string(),
            timestamp: self.clock.now(),
        });
    }

    pub fn add_generation(&mut self, entity_id: &str, activity_id: &str, role: &str) {
        self.generations.push(Generation {
            entity_id: entity_id.to_string(),
            activity_id: activity_id.to_string(),
            role: role.to_string(),
            timestamp: self.clock.now(),
        });
    }

    pub fn add_derivation(
        &mut self,
        derived_entity_id: &str,
        source_entity_id: &str,
        activity_id: Option<&str>,
    ) {
        self.derivations.push(Derivation {
            derived_entity_id: derived_entity_id.to_string(),
            source_entity_id: source_entity_id.to_string(),
            activity_id: activity_id.map(String::from),
        });
    }

    pub fn add_association(&mut self, activity_id: &str, agent_id: &str, role: &str) {
        self.associations.push(Association {
            activity_id: activity_id.to_string(),
            agent_id: agent_id.to_string(),
            role: role.to_string(),
        });
    }

    pub fn add_attribution(&mut self, entity_id: &str, agent_id: &str) {
        self.attributions.push(Attribution {
            entity_id: entity_id.to_string(),
            agent_id: agent_id.to_string(),
        });
    }

    // -- accessors ----------------------------------------------------------

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn activities(&self) -> &[Activity] {
        &self.activities
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn usages(&self) -> &[Usage] {
        &self.usages
    }

    pub fn generations(&self) -> &[Generation] {
        &self.generations
    }

    pub fn derivations(&self) -> &[Derivation] {
        &self.derivations
    }

    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    pub fn attributions(&self) -> &[Attribution] {
        &self.attributions
    }

    pub fn get_entity(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn get_activity(&self, id: &str) -> Option<&Activity> {
        self.activities.iter().find(|a| a.id == id)
    }

    // -- lineage queries ----------------------------------------------------

    /// Ancestors of an entity, walking derivation edges backwards. The
    /// entity itself comes first; each step follows the first recorded
    /// derivation edge.
    pub fn get_entity_lineage(&self, entity_id: &str) -> Vec<String> {
        let mut lineage = Vec::new();
        let mut visited = std::collections::HashSet::new();
        let mut current = Some(entity_id.to_string());

        while let Some(id) = current {
            if !visited.insert(id.clone()) {
                break;
            }
            lineage.push(id.clone());
            current = self
                .derivations
                .iter()
                .find(|d| d.derived_entity_id == id)
                .map(|d| d.source_entity_id.clone());
        }

        lineage
    }

    /// Generating activities along an entity's lineage, one per generated
    /// entity
    pub fn get_activity_chain(&self, entity_id: &str) -> Vec<String> {
        self.get_entity_lineage(entity_id)
            .iter()
            .filter_map(|ent_id| {
                self.generations
                    .iter()
                    .find(|g| &g.entity_id == ent_id)
                    .map(|g| g.activity_id.clone())
            })
            .collect()
    }

    // -- exporters ----------------------------------------------------------

    /// Self-describing JSON export
    pub fn to_json(&self) -> Json {
        let mut entities = Map::new();
        for entity in &self.entities {
            entities.insert(
                entity.id.clone(),
                json!({
                    "id": entity.id,
                    "type": "Entity",
                    "prov:type": entity.type_name,
                    "value": entity.value,
                    "attributes": entity.attributes,
                    "prov:generatedAtTime": entity.timestamp,
                }),
            );
        }

        let mut activities = Map::new();
        for activity in &self.activities {
            let mut node = json!({
                "id": activity.id,
                "type": "Activity",
                "func_id": activity.func_id,
                "func_signature": activity.func_signature,
                "prov:startedAtTime": activity.start_time,
            });
            if let Some(end) = &activity.end_time {
                node["prov:endedAtTime"] = json!(end);
            }
            activities.insert(activity.id.clone(), node);
        }

        let mut agents = Map::new();
        for agent in &self.agents {
            agents.insert(
                agent.id.clone(),
                json!({
                    "id": agent.id,
                    "type": "Agent",
                    "name": agent.name,
                    "agent_type": agent.agent_type,
                }),
            );
        }

        json!({
            "namespace": self.namespace,
            "entities": entities,
            "activities": activities,
            "agents": agents,
            "usages": self.usages.iter().map(|u| json!({
                "activity": u.activity_id,
                "entity": u.entity_id,
                "role": u.role,
                "time": u.timestamp,
            })).collect::<Vec<_>>(),
            "generations": self.generations.iter().map(|g| json!({
                "entity": g.entity_id,
                "activity": g.activity_id,
                "role": g.role,
                "time": g.timestamp,
            })).collect::<Vec<_>>(),
            "derivations": self.derivations.iter().map(|d| json!({
                "derived": d.derived_entity_id,
                "source": d.source_entity_id,
                "activity": d.activity_id,
            })).collect::<Vec<_>>(),
            "associations": self.associations.iter().map(|a| json!({
                "activity": a.activity_id,
                "agent": a.agent_id,
                "role": a.role,
            })).collect::<Vec<_>>(),
            "attributions": self.attributions.iter().map(|a| json!({
                "entity": a.entity_id,
                "agent": a.agent_id,
            })).collect::<Vec<_>>(),
        })
    }

    pub fn export_json(&self) -> String {
        serde_json::to_string_pretty(&self.to_json()).expect("provenance graph serialises")
    }

    /// W3C RDF 1.1 Turtle export
    pub fn export_turtle(&self) -> String {
        let mut lines = vec![
            "@prefix prov: <http://www.w3.org/ns/prov#> .".to_string(),
            format!("@prefix ex: <{}> .", self.namespace),
            "@prefix xsd: <http://www.w3.org/2001/XMLSchema#> .".to_string(),
            String::new(),
        ];

        for entity in &self.entities {
            lines.push(format!("ex:{} a prov:Entity ;", entity.id));
            lines.push(format!("    prov:type \"{}\" ;", escape(&entity.type_name)));
            lines.push(format!("    prov:value \"{}\" ;", escape(&entity.value)));
            lines.push(format!(
                "    prov:generatedAtTime \"{}\"^^xsd:dateTime .",
                entity.timestamp
            ));
            lines.push(String::new());
        }

        for activity in &self.activities {
            lines.push(format!("ex:{} a prov:Activity ;", activity.id));
            lines.push(format!("    ex:funcId \"{}\" ;", escape(&activity.func_id)));
            lines.push(format!(
                "    ex:funcSignature \"{}\" ;",
                escape(&activity.func_signature)
            ));
            lines.push(format!(
                "    prov:startedAtTime \"{}\"^^xsd:dateTime",
                activity.start_time
            ));
            if let Some(end) = &activity.end_time {
                lines.push(format!("    ; prov:endedAtTime \"{end}\"^^xsd:dateTime"));
            }
            lines.push("    .".to_string());
            lines.push(String::new());
        }

        for agent in &self.agents {
            lines.push(format!("ex:{} a prov:Agent ;", agent.id));
            lines.push(format!("    prov:name \"{}\" ;", escape(&agent.name)));
            lines.push(format!("    ex:agentType \"{}\" .", escape(&agent.agent_type)));
            lines.push(String::new());
        }

        for usage in &self.usages {
            lines.push(format!(
                "ex:{} prov:used ex:{} ;",
                usage.activity_id, usage.entity_id
            ));
            if !usage.role.is_empty() {
                lines.push(format!("    prov:hadRole \"{}\" ;", escape(&usage.role)));
            }
            lines.push(format!(
                "    prov:atTime \"{}\"^^xsd:dateTime .",
                usage.timestamp
            ));
            lines.push(String::new());
        }

        for generation in &self.generations {
            lines.push(format!(
                "ex:{} prov:wasGeneratedBy ex:{} ;",
                generation.entity_id, generation.activity_id
            ));
            if !generation.role.is_empty() {
                lines.push(format!("    prov:hadRole \"{}\" ;", escape(&generation.role)));
            }
            lines.push(format!(
                "    prov:atTime \"{}\"^^xsd:dateTime .",
                generation.timestamp
            ));
            lines.push(String::new());
        }

        for derivation in &self.derivations {
            lines.push(format!(
                "ex:{} prov:wasDerivedFrom ex:{}",
                derivation.derived_entity_id, derivation.source_entity_id
            ));
            if let Some(activity) = &derivation.activity_id {
                lines.push("    ; prov:qualifiedDerivation [".to_string());
                lines.push("        a prov:Derivation ;".to_string());
                lines.push(format!(
                    "        prov:entity ex:{} ;",
                    derivation.source_entity_id
                ));
                lines.push(format!("        prov:hadActivity ex:{activity}"));
                lines.push("    ]".to_string());
            }
            lines.push("    .".to_string());
            lines.push(String::new());
        }

        for association in &self.associations {
            lines.push(format!(
                "ex:{} prov:wasAssociatedWith ex:{}",
                association.activity_id, association.agent_id
            ));
            if !association.role.is_empty() {
                lines.push(format!("    ; prov:hadRole \"{}\"", escape(&association.role)));
            }
            lines.push("    .".to_string());
            lines.push(String::new());
        }

        for attribution in &self.attributions {
            lines.push(format!(
                "ex:{} prov:wasAttributedTo ex:{} .",
                attribution.entity_id, attribution.agent_id
            ));
            lines.push(String::new());
        }

        lines.join("\n")
    }

    /// JSON-LD export: an `@context` plus a `@graph` array; relations are
    /// attached as id-typed properties on the owning node
    pub fn export_jsonld(&self) -> String {
        let context = json!({
            "prov": "http://www.w3.org/ns/prov#",
            "ex": self.namespace,
            "xsd": "http://www.w3.org/2001/XMLSchema#",
            "Entity": "prov:Entity",
            "Activity": "prov:Activity",
            "Agent": "prov:Agent",
            "used": {"@id": "prov:used", "@type": "@id"},
            "wasGeneratedBy": {"@id": "prov:wasGeneratedBy", "@type": "@id"},
            "wasDerivedFrom": {"@id": "prov:wasDerivedFrom", "@type": "@id"},
            "wasAssociatedWith": {"@id": "prov:wasAssociatedWith", "@type": "@id"},
            "wasAttributedTo": {"@id": "prov:wasAttributedTo", "@type": "@id"},
            "startedAtTime": {"@id": "prov:startedAtTime", "@type": "xsd:dateTime"},
            "endedAtTime": {"@id": "prov:endedAtTime", "@type": "xsd:dateTime"},
            "generatedAtTime": {"@id": "prov:generatedAtTime", "@type": "xsd:dateTime"},
        });

        let mut graph: Vec<Json> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for entity in &self.entities {
            index.insert(format!("ex:{}", entity.id), graph.len());
            graph.push(json!({
                "@id": format!("ex:{}", entity.id),
                "@type": "Entity",
                "prov:type": entity.type_name,
                "prov:value": entity.value,
                "generatedAtTime": entity.timestamp,
            }));
        }
        for activity in &self.activities {
            index.insert(format!("ex:{}", activity.id), graph.len());
            let mut node = json!({
                "@id": format!("ex:{}", activity.id),
                "@type": "Activity",
                "ex:funcId": activity.func_id,
                "ex:funcSignature": activity.func_signature,
                "startedAtTime": activity.start_time,
            });
            if let Some(end) = &activity.end_time {
                node["endedAtTime"] = json!(end);
            }
            graph.push(node);
        }
        for agent in &self.agents {
            index.insert(format!("ex:{}", agent.id), graph.len());
            graph.push(json!({
                "@id": format!("ex:{}", agent.id),
                "@type": "Agent",
                "prov:name": agent.name,
                "ex:agentType": agent.agent_type,
            }));
        }

        let push_ref = |index: &HashMap<String, usize>,
                            graph: &mut Vec<Json>,
                            owner: String,
                            key: &str,
                            target: String| {
            if let Some(&i) = index.get(&owner) {
                let node = graph[i].as_object_mut().expect("graph nodes are objects");
                node.entry(key.to_string())
                    .or_insert_with(|| json!([]))
                    .as_array_mut()
                    .expect("relation property is an array")
                    .push(json!(target));
            }
        };

        for usage in &self.usages {
            push_ref(
                &index,
                &mut graph,
                format!("ex:{}", usage.activity_id),
                "used",
                format!("ex:{}", usage.entity_id),
            );
        }
        for generation in &self.generations {
            if let Some(&i) = index.get(&format!("ex:{}", generation.entity_id)) {
                graph[i]["wasGeneratedBy"] = json!(format!("ex:{}", generation.activity_id));
            }
        }
        for derivation in &self.derivations {
            push_ref(
                &index,
                &mut graph,
                format!("ex:{}", derivation.derived_entity_id),
                "wasDerivedFrom",
                format!("ex:{}", derivation.source_entity_id),
            );
        }
        for association in &self.associations {
            push_ref(
                &index,
                &mut graph,
                format!("ex:{}", association.activity_id),
                "wasAssociatedWith",
                format!("ex:{}", association.agent_id),
            );
        }
        for attribution in &self.attributions {
            push_ref(
                &index,
                &mut graph,
                format!("ex:{}", attribution.entity_id),
                "wasAttributedTo",
                format!("ex:{}", attribution.agent_id),
            );
        }

        let document = json!({
            "@context": context,
            "@graph": graph,
        });
        serde_json::to_string_pretty(&document).expect("JSON-LD document serialises")
    }
}

impl Default for ProvenanceGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

/// Instrumentation helper wrapping a graph: one call per function
/// application records the activity, its usages, the output entity, and the
/// generation/derivation edges.
#[derive(Debug, Clone)]
pub struct ProvenanceTracker {
    pub graph: ProvenanceGraph,
}

impl ProvenanceTracker {
    pub fn new(graph: ProvenanceGraph) -> Self {
        ProvenanceTracker { graph }
    }

    /// Materialise a source value as an entity with no generating activity
    pub fn add_source_entity(&mut self, type_name: &str, value: &str) -> String {
        self.graph.add_entity(None, type_name, value)
    }

    /// Record one function application and return the output entity id
    pub fn track_function_execution(
        &mut self,
        func_id: &str,
        func_signature: &str,
        input_entity_ids: &[String],
        output_value: &str,
        output_type: &str,
    ) -> String {
        let activity_id = self.graph.add_activity(None, func_id, func_signature);
        let agent = self.graph.system_agent().to_string();
        self.graph.add_association(&activity_id, &agent, "");

        for (i, input_id) in input_entity_ids.iter().enumerate() {
            self.graph
                .add_usage(&activity_id, input_id, &format!("input_{i}"));
        }

        let output_id = self.graph.add_entity(None, output_type, output_value);
        self.graph.add_generation(&output_id, &activity_id, "output");
        for input_id in input_entity_ids {
            self.graph
                .add_derivation(&output_id, input_id, Some(&activity_id));
        }

        self.graph.end_activity(&activity_id);
        output_id
    }
}
