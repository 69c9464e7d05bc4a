//! Structure file: the scene hierarchy as XML
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <scenecache version="1" nodes="3" source="/models/gearbox.step">
//!   <node name="gearbox" kind="assembly" checked="true">
//!     <node name="Housing" kind="part" checked="true" id="Housing"/>
//!     <node name="Shaft" kind="part" checked="false"/>
//!   </node>
//! </scenecache>
//! ```

use std::io::Write;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use super::FORMAT_VERSION;
use crate::error::{CacheError, Result};
use crate::model::{MeshId, NodeId, NodeKind, SceneTree};
use crate::validator::validate_scene;

const ROOT_ELEMENT: &str = "scenecache";
const NODE_ELEMENT: &str = "node";

enum Visit {
    Open(NodeId),
    Close,
}

/// Serialize `tree` as a structure document
pub(crate) fn write_structure<W: Write>(out: W, tree: &SceneTree, source: &str) -> Result<W> {
    let mut writer = Writer::new_with_indent(out, b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| CacheError::xml_write(format!("Failed to write XML declaration: {}", e)))?;

    let mut root = BytesStart::new(ROOT_ELEMENT);
    root.push_attribute(("version", FORMAT_VERSION));
    root.push_attribute(("nodes", tree.len().to_string().as_str()));
    root.push_attribute(("source", source));
    writer
        .write_event(Event::Start(root))
        .map_err(|e| CacheError::xml_write(format!("Failed to write scenecache element: {}", e)))?;

    let mut stack = vec![Visit::Open(tree.root())];
    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Open(id) => {
                let node = &tree[id];
                let mut elem = BytesStart::new(NODE_ELEMENT);
                elem.push_attribute(("name", node.name.as_str()));
                elem.push_attribute(("kind", node.kind.as_str()));
                elem.push_attribute(("checked", if node.visible { "true" } else { "false" }));
                if let Some(ref mesh) = node.mesh_ref {
                    elem.push_attribute(("id", mesh.as_str()));
                }

                if node.children().is_empty() {
                    writer
                        .write_event(Event::Empty(elem))
                        .map_err(|e| CacheError::xml_write(format!("Failed to write node: {}", e)))?;
                } else {
                    writer
                        .write_event(Event::Start(elem))
                        .map_err(|e| CacheError::xml_write(format!("Failed to write node: {}", e)))?;
                    stack.push(Visit::Close);
                    stack.extend(node.children().iter().rev().map(|c| Visit::Open(*c)));
                }
            }
            Visit::Close => {
                writer
                    .write_event(Event::End(BytesEnd::new(NODE_ELEMENT)))
                    .map_err(|e| CacheError::xml_write(format!("Failed to close node element: {}", e)))?;
            }
        }
    }

    writer
        .write_event(Event::End(BytesEnd::new(ROOT_ELEMENT)))
        .map_err(|e| CacheError::xml_write(format!("Failed to close scenecache element: {}", e)))?;

    Ok(writer.into_inner())
}

#[derive(Default)]
struct NodeAttrs {
    name: Option<String>,
    kind: Option<String>,
    checked: Option<String>,
    id: Option<String>,
}

fn attr_value(raw: &[u8]) -> Result<String> {
    let value = std::str::from_utf8(raw).map_err(|e| CacheError::InvalidXml(e.to_string()))?;
    let unescaped =
        quick_xml::escape::unescape(value).map_err(|e| CacheError::InvalidXml(e.to_string()))?;
    Ok(unescaped.into_owned())
}

/// Parse a structure document back into a tree
///
/// Mesh references are restored as recorded; whether their files exist is
/// checked later, per Part.
pub fn parse_structure(xml: &str) -> Result<SceneTree> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut tree: Option<SceneTree> = None;
    let mut open: Vec<NodeId> = Vec::new();
    let mut in_root = false;
    let mut root_closed = false;
    let mut declared_nodes: Option<usize> = None;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        let is_empty = matches!(event, Event::Empty(_));
        match event {
            Event::DocType(_) => {
                return Err(CacheError::InvalidXml(
                    "DTD declarations are not allowed in cache files".to_string(),
                ));
            }
            Event::Start(ref e) | Event::Empty(ref e) => {
                let name = e.name();
                let name_str =
                    std::str::from_utf8(name.as_ref()).map_err(|e| CacheError::InvalidXml(e.to_string()))?;
                match name_str {
                    ROOT_ELEMENT => {
                        if in_root || root_closed {
                            return Err(CacheError::InvalidXml(
                                "Nested or repeated <scenecache> element".to_string(),
                            ));
                        }
                        let mut version = None;
                        for attr in e.attributes() {
                            let attr = attr?;
                            match attr.key.as_ref() {
                                b"version" => version = Some(attr_value(&attr.value)?),
                                b"nodes" => {
                                    let raw = attr_value(&attr.value)?;
                                    let count = raw.parse::<usize>().map_err(|_| {
                                        CacheError::parse_error_with_context("nodes", &raw, "node count")
                                    })?;
                                    declared_nodes = Some(count);
                                }
                                _ => {}
                            }
                        }
                        let version =
                            version.ok_or_else(|| CacheError::missing_attribute(ROOT_ELEMENT, "version"))?;
                        if version != FORMAT_VERSION {
                            return Err(CacheError::VersionMismatch {
                                expected: FORMAT_VERSION.to_string(),
                                found: version,
                            });
                        }
                        in_root = !is_empty;
                        root_closed = is_empty;
                    }
                    NODE_ELEMENT => {
                        if !in_root {
                            return Err(CacheError::InvalidXml(
                                "<node> outside of <scenecache>".to_string(),
                            ));
                        }
                        let mut attrs = NodeAttrs::default();
                        for attr in e.attributes() {
                            let attr = attr?;
                            match attr.key.as_ref() {
                                b"name" => attrs.name = Some(attr_value(&attr.value)?),
                                b"kind" => attrs.kind = Some(attr_value(&attr.value)?),
                                b"checked" => attrs.checked = Some(attr_value(&attr.value)?),
                                b"id" => attrs.id = Some(attr_value(&attr.value)?),
                                _ => {}
                            }
                        }
                        let id = add_node(&mut tree, &open, attrs)?;
                        if !is_empty {
                            open.push(id);
                        }
                    }
                    other => {
                        return Err(CacheError::InvalidXml(format!(
                            "Unexpected element '<{}>' in structure file",
                            other
                        )));
                    }
                }
            }
            Event::End(ref e) => match e.name().as_ref() {
                b"node" => {
                    open.pop();
                }
                b"scenecache" => {
                    in_root = false;
                    root_closed = true;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if in_root || !open.is_empty() {
        return Err(CacheError::InvalidXml(
            "Structure file ends inside an open element".to_string(),
        ));
    }
    let tree = tree.ok_or_else(|| CacheError::Corrupt("structure file has no nodes".to_string()))?;
    let declared =
        declared_nodes.ok_or_else(|| CacheError::missing_attribute(ROOT_ELEMENT, "nodes"))?;
    if declared != tree.len() {
        return Err(CacheError::Corrupt(format!(
            "structure declares {} nodes but contains {}",
            declared,
            tree.len()
        )));
    }
    validate_scene(&tree, None)?;
    Ok(tree)
}

fn add_node(tree: &mut Option<SceneTree>, open: &[NodeId], attrs: NodeAttrs) -> Result<NodeId> {
    let name = attrs
        .name
        .ok_or_else(|| CacheError::missing_attribute(NODE_ELEMENT, "name"))?;
    let kind_raw = attrs
        .kind
        .ok_or_else(|| CacheError::missing_attribute(NODE_ELEMENT, "kind"))?;
    let kind = NodeKind::parse(&kind_raw)
        .ok_or_else(|| CacheError::parse_error_with_context("node kind", &kind_raw, "'assembly' or 'part'"))?;
    let visible = match attrs.checked.as_deref() {
        None | Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        Some(other) => {
            return Err(CacheError::parse_error_with_context("checked", other, "boolean"));
        }
    };

    let id = if let Some(t) = tree.as_mut() {
        let Some(&parent) = open.last() else {
            return Err(CacheError::Corrupt(
                "structure file has more than one root node".to_string(),
            ));
        };
        if t[parent].kind == NodeKind::Part {
            return Err(CacheError::Corrupt(format!(
                "part '{}' has children",
                t[parent].name
            )));
        }
        t.add_child(parent, name, kind)
    } else {
        if kind != NodeKind::Assembly {
            return Err(CacheError::Corrupt(format!(
                "root node '{}' is not an assembly",
                name
            )));
        }
        tree.insert(SceneTree::new(name)).root()
    };

    if let Some(node) = tree.as_mut().and_then(|t| t.get_mut(id)) {
        node.visible = visible;
        node.mesh_ref = attrs.id.map(MeshId::new);
    }
    Ok(id)
}
