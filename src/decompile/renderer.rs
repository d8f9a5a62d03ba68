//! Text rendering through processors registered per node kind.

use std::collections::HashMap;

use super::ast::{LoopKind, Node, NodeKind, Section};

/// Which part of the tree gets expanded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderMode {
    #[default]
    Full,
    /// Type declarations print their header line only.
    TypeHeaderOnly,
}

/// Configuration for rendering.
#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub indent: String,
    /// Written between sibling nodes of one body.
    pub separator: String,
    pub mode: RenderMode,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            indent: "    ".into(),
            separator: "\n".into(),
            mode: RenderMode::Full,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    /// Inside a node's own hooks.
    InNode,
    /// Rendering the children of a body.
    InBody,
}

/// Output state carried through one render call.
#[derive(Debug)]
pub struct RenderContext {
    buffer: String,
    indent_unit: String,
    depth: usize,
    at_line_start: bool,
    state: RenderState,
    separator: String,
}

impl RenderContext {
    fn new(config: &RenderConfig) -> Self {
        Self {
            buffer: String::new(),
            indent_unit: config.indent.clone(),
            depth: 0,
            at_line_start: true,
            state: RenderState::Idle,
            separator: config.separator.clone(),
        }
    }

    /// Appends text. Every line started here is indented to the current depth.
    pub fn write(&mut self, text: &str) {
        for (i, line) in text.split('\n').enumerate() {
            if i > 0 {
                self.buffer.push('\n');
                self.at_line_start = true;
            }
            if line.is_empty() {
                continue;
            }
            if self.at_line_start {
                for _ in 0..self.depth {
                    self.buffer.push_str(&self.indent_unit);
                }
                self.at_line_start = false;
            }
            self.buffer.push_str(line);
        }
    }

    pub fn indent(&mut self) {
        self.depth += 1;
    }

    pub fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn output(&self) -> &str {
        &self.buffer
    }

    fn into_output(self) -> String {
        self.buffer
    }
}

/// Renders one kind of node. Hooks run as `enter`, `emit`, each section, then `exit`.
pub trait Processor: Send + Sync {
    fn enter(&self, _node: &Node, _ctx: &mut RenderContext) {}

    fn emit(&self, node: &Node, ctx: &mut RenderContext);

    fn exit(&self, _node: &Node, _ctx: &mut RenderContext) {}

    /// Writes the section label and the opening brace.
    fn open_section(&self, section: &Section<'_>, ctx: &mut RenderContext) {
        if let Some(label) = section.label {
            ctx.write("\n");
            ctx.write(label);
        }
        ctx.write("\n{\n");
        ctx.indent();
    }

    fn close_section(&self, section: &Section<'_>, ctx: &mut RenderContext) {
        if !section.children.is_empty() {
            ctx.write("\n");
        }
        ctx.dedent();
        ctx.write("}");
    }
}

/// Prints a node's own text.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultProcessor;

impl Processor for DefaultProcessor {
    fn emit(&self, node: &Node, ctx: &mut RenderContext) {
        ctx.write(&node.to_string());
    }

    fn exit(&self, node: &Node, ctx: &mut RenderContext) {
        if let Node::Loop(l) = node {
            if let LoopKind::PostTest(condition) = &l.kind {
                ctx.write(&format!("\nwhile ({condition});"));
            }
        }
    }
}

/// Processors keyed by node kind. Kinds without a registration use [`DefaultProcessor`].
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<NodeKind, Box<dyn Processor>>,
    fallback: DefaultProcessor,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `processor` for `kind`, returning the one it replaces.
    pub fn register<P: Processor + 'static>(&mut self, kind: NodeKind, processor: P) -> Option<Box<dyn Processor>> {
        self.processors.insert(kind, Box::new(processor))
    }

    pub fn unregister(&mut self, kind: NodeKind) -> Option<Box<dyn Processor>> {
        self.processors.remove(&kind)
    }

    pub fn is_registered(&self, kind: NodeKind) -> bool {
        self.processors.contains_key(&kind)
    }

    pub fn get(&self, kind: NodeKind) -> &dyn Processor {
        match self.processors.get(&kind) {
            Some(processor) => processor.as_ref(),
            None => &self.fallback,
        }
    }
}

/// Walks a tree and dispatches every node to its processor.
#[derive(Default)]
pub struct Renderer {
    registry: ProcessorRegistry,
    config: RenderConfig,
}

impl Renderer {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            registry: ProcessorRegistry::new(),
            config,
        }
    }

    pub fn with_registry(registry: ProcessorRegistry, config: RenderConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry_mut(&mut self) -> &mut ProcessorRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn render(&self, node: &Node) -> String {
        let mut ctx = RenderContext::new(&self.config);
        self.visit(node, &mut ctx);
        ctx.into_output()
    }

    fn visit(&self, node: &Node, ctx: &mut RenderContext) {
        let processor = self.registry.get(node.kind());
        let outer = ctx.state;
        ctx.state = RenderState::InNode;
        processor.enter(node, ctx);
        processor.emit(node, ctx);

        let expand = !(self.config.mode == RenderMode::TypeHeaderOnly && node.kind() == NodeKind::Type);
        if expand {
            for section in node.sections() {
                processor.open_section(&section, ctx);
                ctx.state = RenderState::InBody;
                for (i, child) in section.children.iter().enumerate() {
                    if i > 0 {
                        let separator = ctx.separator.clone();
                        ctx.write(&separator);
                    }
                    self.visit(child, ctx);
                }
                ctx.state = RenderState::InNode;
                processor.close_section(&section, ctx);
            }
        }

        processor.exit(node, ctx);
        ctx.state = outer;
    }
}
