// src/diagram/mod.rs
//
// Architecture-model diagrams: C4 input, Mermaid source generation,
// rendering and pan/zoom view state.

pub mod client;
pub mod render;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

pub use render::{DiagramRenderer, DiagramView, MermaidRenderer, PanZoom, RenderedDiagram};

/// Characters that are not safe inside a Mermaid node identifier.
const UNSAFE_ID_CHARS: [char; 4] = [':', '\\', '/', '.'];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct C4Model {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

/// Raw ids that were merged into one node id by [`sanitize_node_id`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdCollision {
    pub node_id: String,
    pub raw_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramSource {
    pub text: String,
    pub collisions: Vec<IdCollision>,
    /// Relationships left out because an endpoint was never declared.
    pub dangling: Vec<Relationship>,
}

/// Replaces `:`, `\`, `/` and `.` with `_`. Ids that differ only in those
/// characters map to the same node id.
pub fn sanitize_node_id(id: &str) -> String {
    id.chars()
        .map(|c| if UNSAFE_ID_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Label text safe inside `["..."]` and `|...|`: quotes are dropped, pipes
/// become `/` and line breaks become spaces.
fn label(text: &str) -> String {
    text.chars()
        .filter(|c| *c != '"')
        .map(|c| match c {
            '|' => '/',
            '\n' | '\r' => ' ',
            other => other,
        })
        .collect()
}

/// Emits Mermaid flowchart source for `model`: containers, then components,
/// then relationships, each in input order.
pub fn generate(model: &C4Model) -> DiagramSource {
    let mut text = String::from("graph LR\n");
    let mut declared: HashSet<&str> = HashSet::new();
    let mut by_node: BTreeMap<String, Vec<String>> = BTreeMap::new();

    let nodes = model
        .containers
        .iter()
        .map(|c| (c.id.as_str(), c.name.as_str()))
        .chain(model.components.iter().map(|c| (c.id.as_str(), c.name.as_str())));
    for (raw_id, name) in nodes {
        let node_id = sanitize_node_id(raw_id);
        text.push_str(&format!("    {}[\"{}\"]\n", node_id, label(name)));
        declared.insert(raw_id);
        let raws = by_node.entry(node_id).or_default();
        if !raws.iter().any(|r| r == raw_id) {
            raws.push(raw_id.to_string());
        }
    }

    let mut dangling = Vec::new();
    for rel in &model.relationships {
        if !declared.contains(rel.source.as_str()) || !declared.contains(rel.destination.as_str()) {
            log::warn!(
                "Dropping relationship {} -> {}: endpoint not declared",
                rel.source,
                rel.destination
            );
            dangling.push(rel.clone());
            continue;
        }
        let src = sanitize_node_id(&rel.source);
        let dst = sanitize_node_id(&rel.destination);
        let desc = label(&rel.description);
        if desc.trim().is_empty() {
            text.push_str(&format!("    {} --> {}\n", src, dst));
        } else {
            text.push_str(&format!("    {} -->|{}| {}\n", src, desc, dst));
        }
    }

    let collisions: Vec<IdCollision> = by_node
        .into_iter()
        .filter(|(_, raws)| raws.len() > 1)
        .map(|(node_id, raw_ids)| IdCollision { node_id, raw_ids })
        .collect();
    for c in &collisions {
        log::warn!("Diagram node id '{}' is shared by {:?}", c.node_id, c.raw_ids);
    }

    DiagramSource { text, collisions, dangling }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(id: &str, name: &str) -> Container {
        Container { id: id.to_string(), name: name.to_string(), description: None }
    }

    fn component(id: &str, name: &str) -> Component {
        Component { id: id.to_string(), name: name.to_string(), description: None, container_id: None }
    }

    fn rel(source: &str, destination: &str, description: &str) -> Relationship {
        Relationship {
            source: source.to_string(),
            destination: destination.to_string(),
            description: description.to_string(),
        }
    }

    #[test]
    fn sanitize_replaces_unsafe_chars() {
        assert_eq!(sanitize_node_id("src/app.py:main"), "src_app_py_main");
        assert_eq!(sanitize_node_id("a\\b"), "a_b");
        assert_eq!(sanitize_node_id("plain-id_1"), "plain-id_1");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for raw in ["src/app.py:main", "x.y.z", "no_change", "C:\\dir\\f.rs"] {
            let once = sanitize_node_id(raw);
            assert_eq!(sanitize_node_id(&once), once);
        }
    }

    #[test]
    fn emission_order_is_containers_components_relationships() {
        let model = C4Model {
            containers: vec![container("b.py", "b.py"), container("a.py", "a.py")],
            components: vec![component("a.py:run", "run")],
            relationships: vec![rel("a.py:run", "b.py", "calls"), rel("b.py", "a.py", "")],
        };
        let out = generate(&model);
        assert_eq!(
            out.text,
            "graph LR\n    b_py[\"b.py\"]\n    a_py[\"a.py\"]\n    a_py_run[\"run\"]\n    a_py_run -->|calls| b_py\n    b_py --> a_py\n"
        );
        assert!(out.collisions.is_empty());
        assert!(out.dangling.is_empty());
    }

    #[test]
    fn quotes_are_stripped_from_labels() {
        let model = C4Model {
            containers: vec![container("x", "say \"hi\"")],
            components: vec![],
            relationships: vec![rel("x", "x", "uses \"self\"")],
        };
        let out = generate(&model);
        assert!(out.text.contains("x[\"say hi\"]"));
        assert!(out.text.contains("x -->|uses self| x"));
    }

    #[test]
    fn pipes_and_line_breaks_cannot_break_edge_labels() {
        let model = C4Model {
            containers: vec![container("a", "multi\nline"), container("b", "B")],
            components: vec![],
            relationships: vec![rel("a", "b", "reads|writes"), rel("b", "a", "line1\r\nline2")],
        };
        let out = generate(&model);
        assert!(out.text.contains("a[\"multi line\"]"));
        assert!(out.text.contains("a -->|reads/writes| b"));
        assert!(out.text.contains("b -->|line1  line2| a"));
        // every emitted statement stays on one line
        assert_eq!(out.text.lines().count(), 1 + 2 + 2);
    }

    #[test]
    fn colliding_ids_are_reported() {
        let model = C4Model {
            containers: vec![container("pkg/mod", "one"), container("pkg.mod", "two")],
            components: vec![],
            relationships: vec![],
        };
        let out = generate(&model);
        assert_eq!(
            out.collisions,
            vec![IdCollision {
                node_id: "pkg_mod".to_string(),
                raw_ids: vec!["pkg/mod".to_string(), "pkg.mod".to_string()],
            }]
        );
    }

    #[test]
    fn dangling_relationships_are_dropped() {
        let model = C4Model {
            containers: vec![container("a", "A")],
            components: vec![],
            relationships: vec![rel("a", "ghost", "calls"), rel("a", "a", "self")],
        };
        let out = generate(&model);
        assert!(!out.text.contains("ghost"));
        assert_eq!(out.dangling.len(), 1);
        assert_eq!(out.dangling[0].destination, "ghost");
    }

    #[test]
    fn model_parses_endpoint_json() {
        let json = r#"{
            "containers": [{"id": "app/main.py", "name": "app/main.py", "description": ""}],
            "components": [{"id": "app/main.py:start", "name": "start", "containerId": "app/main.py"}],
            "relationships": [{"source": "app/main.py:start", "destination": "app/main.py", "description": "contains"}]
        }"#;
        let model: C4Model = serde_json::from_str(json).unwrap();
        assert_eq!(model.components[0].container_id.as_deref(), Some("app/main.py"));
        assert_eq!(generate(&model).dangling.len(), 0);
    }
}
