//! # SVG Optimizer Module
//!
//! Pulizia in-process dei sorgenti SVG con un set di plugin configurabile.
//!
//! ## Pipeline:
//! 1. Parse con `quick-xml` in un piccolo albero (valori e testo restano
//!    nella forma escaped originale)
//! 2. Visita post-order che applica i plugin abilitati
//! 3. Serializzazione
//!
//! ## Plugin:
//! `removeXMLProcInst`, `removeDoctype`, `removeComments`, `removeMetadata`,
//! `removeTitle`, `removeDesc`, `removeEditorsNSData`, `cleanupAttrs`,
//! `removeEmptyAttrs`, `removeEmptyText`, `removeEmptyContainers`,
//! `collapseWhitespace`. Tutti abilitati di default; nomi sconosciuti
//! vengono ignorati.

use crate::config::PluginToggle;
use crate::error::{Result, RespimgError};
use crate::file_manager::FileManager;
use crate::pipeline::path_resolver::PathResolver;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Result of optimizing one SVG document.
#[derive(Debug, Clone, PartialEq)]
pub struct SvgOptimization {
    pub data: String,
    pub original_bytes: u64,
    pub optimized_bytes: u64,
    pub saved_bytes: u64,
    pub percent_saved: f64,
}

impl SvgOptimization {
    fn new(original: &str, data: String) -> Self {
        let original_bytes = original.len() as u64;
        let optimized_bytes = data.len() as u64;
        Self {
            data,
            original_bytes,
            optimized_bytes,
            saved_bytes: original_bytes.saturating_sub(optimized_bytes),
            percent_saved: FileManager::calculate_reduction(original_bytes, optimized_bytes),
        }
    }
}

/// Optimizes SVG text in-process.
pub trait VectorOptimizer: Send + Sync {
    fn optimize(&self, svg: &str) -> Result<SvgOptimization>;
}

/// Which plugins run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginSet {
    pub remove_xml_proc_inst: bool,
    pub remove_doctype: bool,
    pub remove_comments: bool,
    pub remove_metadata: bool,
    pub remove_title: bool,
    pub remove_desc: bool,
    pub remove_editors_ns_data: bool,
    pub cleanup_attrs: bool,
    pub remove_empty_attrs: bool,
    pub remove_empty_text: bool,
    pub remove_empty_containers: bool,
    pub collapse_whitespace: bool,
}

impl Default for PluginSet {
    fn default() -> Self {
        Self {
            remove_xml_proc_inst: true,
            remove_doctype: true,
            remove_comments: true,
            remove_metadata: true,
            remove_title: true,
            remove_desc: true,
            remove_editors_ns_data: true,
            cleanup_attrs: true,
            remove_empty_attrs: true,
            remove_empty_text: true,
            remove_empty_containers: true,
            collapse_whitespace: true,
        }
    }
}

impl PluginSet {
    /// Apply toggles in order over the default set.
    pub fn from_toggles(toggles: &[PluginToggle]) -> Self {
        let mut set = Self::default();
        for toggle in toggles {
            let slot = match toggle.name.as_str() {
                "removeXMLProcInst" => &mut set.remove_xml_proc_inst,
                "removeDoctype" => &mut set.remove_doctype,
                "removeComments" => &mut set.remove_comments,
                "removeMetadata" => &mut set.remove_metadata,
                "removeTitle" => &mut set.remove_title,
                "removeDesc" => &mut set.remove_desc,
                "removeEditorsNSData" => &mut set.remove_editors_ns_data,
                "cleanupAttrs" => &mut set.cleanup_attrs,
                "removeEmptyAttrs" => &mut set.remove_empty_attrs,
                "removeEmptyText" => &mut set.remove_empty_text,
                "removeEmptyContainers" => &mut set.remove_empty_containers,
                "collapseWhitespace" => &mut set.collapse_whitespace,
                other => {
                    debug!("Ignoring unknown SVG plugin `{}`", other);
                    continue;
                }
            };
            *slot = toggle.enabled;
        }
        set
    }
}

const EDITOR_NAMESPACES: &[&str] = &[
    "http://inkscape.sourceforge.net/DTD/sodipodi-0.dtd",
    "http://sodipodi.sourceforge.net/DTD/sodipodi-0.dtd",
    "http://www.inkscape.org/namespaces/inkscape",
    "http://www.bohemiancoding.com/sketch/ns",
    "http://ns.adobe.com/AdobeIllustrator/10.0/",
    "http://ns.adobe.com/Graphs/1.0/",
    "http://ns.adobe.com/AdobeSVGViewerExtensions/3.0/",
    "http://ns.adobe.com/Variables/1.0/",
    "http://ns.adobe.com/SaveForWeb/1.0/",
    "http://ns.adobe.com/Extensibility/1.0/",
    "http://ns.adobe.com/Flows/1.0/",
    "http://ns.adobe.com/ImageReplacement/1.0/",
    "http://ns.adobe.com/GenericCustomNamespace/1.0/",
    "http://ns.adobe.com/XPath/1.0/",
    "http://schemas.microsoft.com/visio/2003/SVGExtensions/",
    "http://taptrix.com/vectorillustrator/svg_extensions",
    "http://www.figma.com/figma/ns",
    "http://purl.org/dc/elements/1.1/",
    "http://creativecommons.org/ns#",
    "http://www.w3.org/1999/02/22-rdf-syntax-ns#",
    "http://www.serif.com/",
    "http://www.vector.evaxdesign.sk",
];

const CONTAINER_ELEMENTS: &[&str] = &[
    "a",
    "clipPath",
    "defs",
    "g",
    "glyph",
    "marker",
    "mask",
    "missing-glyph",
    "pattern",
    "switch",
    "symbol",
];

/// Elements whose text content is significant, whitespace included.
const TEXT_CONTENT_ELEMENTS: &[&str] = &[
    "text", "tspan", "textPath", "tref", "altGlyph", "style", "script", "title", "desc",
];

/// Conditional processing attributes keep their meaning when empty.
const CONDITIONAL_ATTRS: &[&str] = &["requiredExtensions", "requiredFeatures", "systemLanguage"];

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Element(Element),
    /// Escaped text as it appeared in the source
    Text(String),
    CData(String),
    Comment(String),
    Decl(String),
    ProcessingInstruction(String),
    DocType(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Element {
    name: String,
    /// Name/value pairs, values in their escaped source form
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(prefix, _)| prefix)
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn parse_error(err: impl std::fmt::Display) -> RespimgError {
    RespimgError::SvgParse(err.to_string())
}

fn element_from(start: &quick_xml::events::BytesStart) -> Result<Element> {
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(parse_error)?;
        attrs.push((lossy(attr.key.as_ref()), lossy(&attr.value)));
    }
    Ok(Element {
        name: lossy(start.name().as_ref()),
        attrs,
        children: Vec::new(),
    })
}

/// Parse a document into its top-level nodes; exactly one root `<svg>`.
fn parse_document(svg: &str) -> Result<Vec<Node>> {
    let mut reader = Reader::from_str(svg);
    let mut top_level: Vec<Node> = Vec::new();
    let mut stack: Vec<Element> = Vec::new();

    fn push(node: Node, stack: &mut [Element], top_level: &mut Vec<Node>) {
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => top_level.push(node),
        }
    }

    loop {
        let node = match reader.read_event().map_err(parse_error)? {
            Event::Start(start) => {
                stack.push(element_from(&start)?);
                continue;
            }
            Event::End(end) => {
                let element = stack.pop().ok_or_else(|| {
                    parse_error(format!(
                        "unexpected closing tag </{}>",
                        String::from_utf8_lossy(end.name().as_ref())
                    ))
                })?;
                Node::Element(element)
            }
            Event::Empty(start) => Node::Element(element_from(&start)?),
            Event::Text(text) => Node::Text(lossy(&text)),
            Event::CData(data) => Node::CData(lossy(&data)),
            Event::Comment(comment) => Node::Comment(lossy(&comment)),
            Event::Decl(decl) => Node::Decl(lossy(&decl)),
            Event::PI(pi) => Node::ProcessingInstruction(lossy(&pi)),
            Event::DocType(doctype) => Node::DocType(lossy(&doctype).trim().to_string()),
            Event::Eof => break,
            #[allow(unreachable_patterns)]
            _ => continue,
        };
        push(node, &mut stack, &mut top_level);
    }

    if let Some(open) = stack.last() {
        return Err(parse_error(format!("unclosed element <{}>", open.name)));
    }

    let roots: Vec<&Element> = top_level
        .iter()
        .filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
        .collect();
    match roots.as_slice() {
        [root] if root.local_name() == "svg" => Ok(top_level),
        [root] => Err(parse_error(format!("root element is <{}>, not <svg>", root.name))),
        [] => Err(parse_error("no root element")),
        _ => Err(parse_error("more than one root element")),
    }
}

fn collect_editor_prefixes(nodes: &[Node], prefixes: &mut HashSet<String>) {
    for node in nodes {
        if let Node::Element(element) = node {
            for (key, value) in &element.attrs {
                if let Some(prefix) = key.strip_prefix("xmlns:") {
                    if EDITOR_NAMESPACES.contains(&value.as_str()) {
                        prefixes.insert(prefix.to_string());
                    }
                }
            }
            collect_editor_prefixes(&element.children, prefixes);
        }
    }
}

fn cleanup_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn preserves_space(element: &Element) -> bool {
    element.attr("xml:space") == Some("preserve")
}

/// SVG optimizer configured with a plugin set
pub struct SvgOptimizer {
    plugins: PluginSet,
}

impl SvgOptimizer {
    pub fn new(plugins: PluginSet) -> Self {
        Self { plugins }
    }

    pub fn from_plugins(toggles: &[PluginToggle]) -> Self {
        Self::new(PluginSet::from_toggles(toggles))
    }

    fn keep_top_level(&self, node: &Node) -> bool {
        let p = &self.plugins;
        match node {
            Node::Decl(_) => !p.remove_xml_proc_inst,
            Node::DocType(_) => !p.remove_doctype,
            Node::Comment(text) => !p.remove_comments || text.starts_with('!'),
            Node::Text(text) => !(p.collapse_whitespace && text.trim().is_empty()),
            _ => true,
        }
    }

    /// Clean an element's attributes and children, bottom-up.
    fn optimize_element(&self, element: &mut Element, editor_prefixes: &HashSet<String>, preserve: bool) {
        let p = &self.plugins;

        if p.remove_editors_ns_data && !editor_prefixes.is_empty() {
            element.attrs.retain(|(key, _)| {
                let declared = key
                    .strip_prefix("xmlns:")
                    .map(|prefix| editor_prefixes.contains(prefix))
                    .unwrap_or(false);
                let prefixed = key
                    .split_once(':')
                    .map(|(prefix, _)| editor_prefixes.contains(prefix))
                    .unwrap_or(false);
                !declared && !prefixed
            });
        }
        if p.cleanup_attrs {
            for (_, value) in element.attrs.iter_mut() {
                *value = cleanup_value(value);
            }
        }
        if p.remove_empty_attrs {
            element.attrs.retain(|(key, value)| {
                !value.is_empty() || CONDITIONAL_ATTRS.contains(&key.as_str())
            });
        }

        let preserve = preserve
            || preserves_space(element)
            || TEXT_CONTENT_ELEMENTS.contains(&element.local_name());

        let children = std::mem::take(&mut element.children);
        element.children = children
            .into_iter()
            .filter_map(|node| match node {
                Node::Element(mut child) => {
                    if self.drops_element(&child, editor_prefixes) {
                        return None;
                    }
                    self.optimize_element(&mut child, editor_prefixes, preserve);
                    if self.is_removable_empty(&child) {
                        return None;
                    }
                    Some(Node::Element(child))
                }
                Node::Text(text) if p.collapse_whitespace && !preserve && text.trim().is_empty() => None,
                Node::Comment(text) if p.remove_comments && !text.starts_with('!') => None,
                Node::Decl(_) if p.remove_xml_proc_inst => None,
                Node::DocType(_) if p.remove_doctype => None,
                other => Some(other),
            })
            .collect();
    }

    /// Elements removed outright, whatever their content.
    fn drops_element(&self, element: &Element, editor_prefixes: &HashSet<String>) -> bool {
        let p = &self.plugins;
        match element.local_name() {
            "metadata" if p.remove_metadata => true,
            "title" if p.remove_title => true,
            "desc" if p.remove_desc => true,
            _ => {
                p.remove_editors_ns_data
                    && element
                        .prefix()
                        .map(|prefix| editor_prefixes.contains(prefix))
                        .unwrap_or(false)
            }
        }
    }

    /// Elements removed once their children have been cleaned.
    fn is_removable_empty(&self, element: &Element) -> bool {
        let p = &self.plugins;
        let name = element.local_name();
        let empty = element.children.is_empty();

        if p.remove_empty_text {
            match name {
                "text" | "tspan" if empty => return true,
                "tref" if element.attr("xlink:href").is_none() => return true,
                _ => {}
            }
        }

        if p.remove_empty_containers && empty && CONTAINER_ELEMENTS.contains(&name) {
            let keep = (name == "pattern" && !element.attrs.is_empty())
                || (name == "mask" && element.attr("id").is_some())
                || (name == "g" && element.attr("filter").is_some());
            return !keep;
        }
        false
    }
}

impl VectorOptimizer for SvgOptimizer {
    fn optimize(&self, svg: &str) -> Result<SvgOptimization> {
        let mut nodes = parse_document(svg)?;

        let mut editor_prefixes = HashSet::new();
        if self.plugins.remove_editors_ns_data {
            collect_editor_prefixes(&nodes, &mut editor_prefixes);
        }

        nodes.retain(|node| self.keep_top_level(node));
        for node in nodes.iter_mut() {
            if let Node::Element(root) = node {
                self.optimize_element(root, &editor_prefixes, false);
            }
        }

        let mut data = String::with_capacity(svg.len());
        for node in &nodes {
            serialize(node, &mut data);
        }
        Ok(SvgOptimization::new(svg, data))
    }
}

fn serialize(node: &Node, out: &mut String) {
    match node {
        Node::Element(element) => {
            out.push('<');
            out.push_str(&element.name);
            for (key, value) in &element.attrs {
                let quote = if value.contains('"') { '\'' } else { '"' };
                out.push(' ');
                out.push_str(key);
                out.push('=');
                out.push(quote);
                out.push_str(value);
                out.push(quote);
            }
            if element.children.is_empty() {
                out.push_str("/>");
            } else {
                out.push('>');
                for child in &element.children {
                    serialize(child, out);
                }
                out.push_str("</");
                out.push_str(&element.name);
                out.push('>');
            }
        }
        Node::Text(text) => out.push_str(text),
        Node::CData(data) => {
            out.push_str("<![CDATA[");
            out.push_str(data);
            out.push_str("]]>");
        }
        Node::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        Node::Decl(decl) => {
            out.push_str("<?");
            out.push_str(decl);
            out.push_str("?>");
        }
        Node::ProcessingInstruction(pi) => {
            out.push_str("<?");
            out.push_str(pi);
            out.push_str("?>");
        }
        Node::DocType(doctype) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(doctype);
            out.push('>');
        }
    }
}

/// Optimize `src` and write the result to `dest`.
pub async fn optimize_file(
    optimizer: &dyn VectorOptimizer,
    src: &Path,
    dest: &Path,
) -> Result<SvgOptimization> {
    let svg = tokio::fs::read_to_string(src).await?;
    let optimization = optimizer.optimize(&svg)?;
    PathResolver::ensure_parent_dirs(dest).await?;
    tokio::fs::write(dest, &optimization.data).await?;
    Ok(optimization)
}
