//! Structural analysis of Python source.
//!
//! Parses source text with tree-sitter and reduces it to the structural
//! subset the synthesis pipeline needs: functions, classes, parameters,
//! branches, loops, literals, comparisons, and the call names that mark a
//! body as touching files or directories. Nothing here is a general
//! language analyzer; the model exists purely to drive test fabrication.
//!
//! Analysis never fails: malformed source yields an [`AnalysisResult`]
//! with empty lists and a parse-error note.

use std::cell::RefCell;
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;
use tree_sitter::{Node, Parser};

use crate::heuristics::{self, SemanticType, DIR_CALL_NAMES, FILE_CALL_NAMES};

thread_local! {
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut parser = Parser::new();
        let _ = parser.set_language(&tree_sitter_python::LANGUAGE.into());
        parser
    });
}

/// Longest string literal worth keeping as a sample-value candidate.
const MAX_LITERAL_LEN: usize = 50;

// ============================================================================
// Models
// ============================================================================

/// One comparison expression, kept as operand text so boundary values can
/// be mined from the right-hand side later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comparison {
    pub left: String,
    pub op: String,
    pub right: String,
}

/// Structural model of one function or method.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionModel {
    pub name: String,
    /// Ordered parameter names, receiver excluded.
    pub args: Vec<String>,
    /// 1-based inclusive source span, used to attribute coverage gaps.
    pub start_line: u32,
    pub end_line: u32,
    pub param_types: BTreeMap<String, SemanticType>,
    /// Ordered, de-duplicated string constants from the body.
    pub string_literals: Vec<String>,
    /// Ordered, de-duplicated keys seen via `d['k']` or `d.get('k')`.
    pub dict_keys: Vec<String>,
    pub comparisons: Vec<Comparison>,
    pub branch_count: u32,
    pub has_loop: bool,
    pub has_try: bool,
    pub returns_value: bool,
    pub is_method: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owning_class: Option<String>,
    pub touches_files: bool,
    pub touches_dirs: bool,
}

impl FunctionModel {
    /// Inferred type for a parameter, `any` when the parameter is unknown.
    pub fn param_type(&self, arg: &str) -> SemanticType {
        self.param_types
            .get(arg)
            .cloned()
            .unwrap_or(SemanticType::Any)
    }

    /// True when at least one missing line falls inside this function's span.
    pub fn overlaps_lines(&self, lines: &[u32]) -> bool {
        lines
            .iter()
            .any(|&line| line >= self.start_line && line <= self.end_line)
    }
}

/// Structural model of one class.
#[derive(Debug, Clone, Serialize)]
pub struct ClassModel {
    pub name: String,
    /// Constructor parameters, receiver excluded. The constructor itself is
    /// never test-generated directly.
    pub constructor_args: Vec<String>,
    pub methods: Vec<FunctionModel>,
}

/// Everything discovered in one source text. Rebuilt from scratch per
/// request; nothing is persisted between calls.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisResult {
    /// Flat synthesis order: every class method (class order, then method
    /// order), then free functions. Constructors excluded.
    pub functions: Vec<FunctionModel>,
    pub classes: Vec<ClassModel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

impl AnalysisResult {
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.classes.is_empty()
    }

    fn parse_failed(note: &str) -> AnalysisResult {
        AnalysisResult {
            functions: Vec::new(),
            classes: Vec::new(),
            parse_error: Some(note.to_string()),
        }
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Analyze Python source into functions and classes.
pub fn analyze(source: &str) -> AnalysisResult {
    let tree = match PYTHON_PARSER.with(|p| p.borrow_mut().parse(source, None)) {
        Some(tree) => tree,
        None => {
            debug!("tree-sitter produced no tree");
            return AnalysisResult::parse_failed("parser produced no syntax tree");
        }
    };
    let root = tree.root_node();
    if root.has_error() {
        debug!("source contains syntax errors; returning empty analysis");
        return AnalysisResult::parse_failed("source contains syntax errors");
    }

    // First sweep collects class names so parameter inference can match
    // class-typed parameters regardless of definition order.
    let mut class_names = Vec::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        let node = unwrap_decorated(child);
        if node.kind() == "class_definition" {
            if let Some(name) = field_text(node, "name", source) {
                class_names.push(name);
            }
        }
    }

    let mut classes = Vec::new();
    let mut free_functions = Vec::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        let node = unwrap_decorated(child);
        match node.kind() {
            "class_definition" => {
                if let Some(class) = analyze_class(node, source, &class_names) {
                    classes.push(class);
                }
            }
            "function_definition" => {
                if let Some(func) = analyze_function(node, source, None, &class_names) {
                    free_functions.push(func);
                }
            }
            _ => {}
        }
    }

    let mut functions = Vec::new();
    for class in &classes {
        functions.extend(class.methods.iter().cloned());
    }
    functions.extend(free_functions);

    debug!(
        functions = functions.len(),
        classes = classes.len(),
        "structural analysis complete"
    );
    AnalysisResult {
        functions,
        classes,
        parse_error: None,
    }
}

// ============================================================================
// Class and function analysis
// ============================================================================

fn analyze_class(node: Node<'_>, source: &str, class_names: &[String]) -> Option<ClassModel> {
    let name = field_text(node, "name", source)?;
    let body = node.child_by_field_name("body")?;

    let mut constructor_args = Vec::new();
    let mut methods = Vec::new();
    let mut cursor = body.walk();
    for child in body.named_children(&mut cursor) {
        let member = unwrap_decorated(child);
        if member.kind() != "function_definition" {
            continue;
        }
        let Some(method_name) = field_text(member, "name", source) else {
            continue;
        };
        if method_name == "__init__" {
            // Constructors only contribute their parameter list; they are
            // exercised indirectly through instantiation tests.
            if let Some(params) = member.child_by_field_name("parameters") {
                constructor_args = extract_params(params, source).0;
            }
            continue;
        }
        if let Some(method) = analyze_function(member, source, Some(&name), class_names) {
            methods.push(method);
        }
    }

    Some(ClassModel {
        name,
        constructor_args,
        methods,
    })
}

fn analyze_function(
    node: Node<'_>,
    source: &str,
    owning_class: Option<&str>,
    class_names: &[String],
) -> Option<FunctionModel> {
    let name = field_text(node, "name", source)?;
    let (args, annotations) = node
        .child_by_field_name("parameters")
        .map(|params| extract_params(params, source))
        .unwrap_or_default();

    let mut facts = BodyFacts::default();
    if let Some(body) = node.child_by_field_name("body") {
        collect_body_facts(body, source, &mut facts);
    }

    let mut param_types = BTreeMap::new();
    for arg in &args {
        let ty = heuristics::infer_param_type(
            arg,
            annotations.get(arg).map(String::as_str),
            facts.subscripted.iter().any(|n| n == arg),
            facts.dict_receivers.iter().any(|n| n == arg),
            class_names,
        );
        param_types.insert(arg.clone(), ty);
    }

    Some(FunctionModel {
        name,
        args,
        start_line: (node.start_position().row + 1) as u32,
        end_line: (node.end_position().row + 1) as u32,
        param_types,
        string_literals: facts.string_literals,
        dict_keys: facts.dict_keys,
        comparisons: facts.comparisons,
        branch_count: facts.branch_count,
        has_loop: facts.has_loop,
        has_try: facts.has_try,
        returns_value: facts.returns_value,
        is_method: owning_class.is_some(),
        owning_class: owning_class.map(str::to_string),
        touches_files: facts.touches_files,
        touches_dirs: facts.touches_dirs,
    })
}

// ============================================================================
// Body traversal
// ============================================================================

/// Everything collected in the single walk over a function body.
#[derive(Default)]
struct BodyFacts {
    string_literals: Vec<String>,
    dict_keys: Vec<String>,
    comparisons: Vec<Comparison>,
    branch_count: u32,
    has_loop: bool,
    has_try: bool,
    returns_value: bool,
    touches_files: bool,
    touches_dirs: bool,
    /// Parameter-candidate names used as subscript targets.
    subscripted: Vec<String>,
    /// Parameter-candidate names used as `.get/.keys/.values` receivers.
    dict_receivers: Vec<String>,
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

fn collect_body_facts(node: Node<'_>, source: &str, facts: &mut BodyFacts) {
    match node.kind() {
        "string" => {
            if let Some(text) = plain_string_content(node, source) {
                if text.len() < MAX_LITERAL_LEN {
                    push_unique(&mut facts.string_literals, text);
                }
            }
            // Children already consumed; f-string interpolations are
            // deliberately not walked.
            return;
        }
        "subscript" => {
            if let Some(index) = node.child_by_field_name("subscript") {
                if index.kind() == "string" {
                    if let Some(key) = plain_string_content(index, source) {
                        push_unique(&mut facts.dict_keys, key);
                    }
                }
            }
            if let Some(value) = node.child_by_field_name("value") {
                if value.kind() == "identifier" {
                    push_unique(&mut facts.subscripted, node_text(value, source));
                }
            }
        }
        "call" => collect_call_facts(node, source, facts),
        "if_statement" | "elif_clause" | "conditional_expression" => {
            facts.branch_count += 1;
        }
        "for_statement" | "while_statement" => facts.has_loop = true,
        "try_statement" => facts.has_try = true,
        "return_statement" => {
            if node.named_child_count() > 0 {
                facts.returns_value = true;
            }
        }
        "comparison_operator" => {
            if let Some(comparison) = extract_comparison(node, source) {
                facts.comparisons.push(comparison);
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_body_facts(child, source, facts);
    }
}

fn collect_call_facts(node: Node<'_>, source: &str, facts: &mut BodyFacts) {
    let Some(function) = node.child_by_field_name("function") else {
        return;
    };
    match function.kind() {
        "identifier" => {
            if node_text(function, source) == "open" {
                facts.touches_files = true;
            }
        }
        "attribute" => {
            let Some(attr) = function.child_by_field_name("attribute") else {
                return;
            };
            let attr_name = node_text(attr, source);
            if DIR_CALL_NAMES.contains(&attr_name.as_str()) {
                facts.touches_dirs = true;
            } else if FILE_CALL_NAMES.contains(&attr_name.as_str()) {
                facts.touches_files = true;
            }

            let receiver = function
                .child_by_field_name("object")
                .filter(|obj| obj.kind() == "identifier")
                .map(|obj| node_text(obj, source));
            if let Some(receiver) = receiver {
                if matches!(attr_name.as_str(), "get" | "keys" | "values") {
                    push_unique(&mut facts.dict_receivers, receiver);
                }
            }
            if attr_name == "get" {
                if let Some(key) = first_string_argument(node, source) {
                    push_unique(&mut facts.dict_keys, key);
                }
            }
        }
        _ => {}
    }
}

fn extract_comparison(node: Node<'_>, source: &str) -> Option<Comparison> {
    // Chained comparisons contribute their first operator pair, matching
    // the single-pair shape boundary mining consumes.
    let left = node.named_child(0)?;
    let right = node.named_child(1)?;
    let mut cursor = node.walk();
    let op = node
        .children_by_field_name("operators", &mut cursor)
        .next()
        .map(|op| node_text(op, source))?;
    Some(Comparison {
        left: node_text(left, source),
        op,
        right: node_text(right, source),
    })
}

/// Content of a plain (non-f, non-bytes) string literal, escapes kept raw.
fn plain_string_content(node: Node<'_>, source: &str) -> Option<String> {
    let mut cursor = node.walk();
    let mut content = String::new();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "string_start" => {
                let prefix = node_text(child, source).to_lowercase();
                if prefix.contains('f') || prefix.contains('b') {
                    return None;
                }
            }
            "string_content" | "escape_sequence" => content.push_str(&node_text(child, source)),
            "string_end" => {}
            // Interpolation or concatenation artifacts: not a plain literal.
            _ => return None,
        }
    }
    Some(content)
}

fn first_string_argument(call: Node<'_>, source: &str) -> Option<String> {
    let arguments = call.child_by_field_name("arguments")?;
    let mut cursor = arguments.walk();
    let first = arguments.named_children(&mut cursor).next()?;
    if first.kind() == "string" {
        plain_string_content(first, source)
    } else {
        None
    }
}

// ============================================================================
// Parameters
// ============================================================================

type ParamList = (Vec<String>, BTreeMap<String, String>);

/// Parameter names in order plus plain-identifier annotations. Receivers
/// (`self`/`cls`) and splat parameters are skipped.
fn extract_params(params: Node<'_>, source: &str) -> ParamList {
    let mut args = Vec::new();
    let mut annotations = BTreeMap::new();
    let mut cursor = params.walk();
    for child in params.named_children(&mut cursor) {
        let (name_node, type_node) = match child.kind() {
            "identifier" => (Some(child), None),
            "typed_parameter" => (child.named_child(0), child.child_by_field_name("type")),
            "default_parameter" => (child.child_by_field_name("name"), None),
            "typed_default_parameter" => (
                child.child_by_field_name("name"),
                child.child_by_field_name("type"),
            ),
            // *args / **kwargs and positional/keyword separators
            _ => (None, None),
        };
        let Some(name_node) = name_node.filter(|n| n.kind() == "identifier") else {
            continue;
        };
        let name = node_text(name_node, source);
        if name == "self" || name == "cls" {
            continue;
        }
        if let Some(type_node) = type_node {
            let annotation = node_text(type_node, source);
            if is_plain_identifier(&annotation) {
                annotations.insert(name.clone(), annotation);
            }
        }
        args.push(name);
    }
    (args, annotations)
}

fn is_plain_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

// ============================================================================
// Node helpers
// ============================================================================

fn unwrap_decorated(node: Node<'_>) -> Node<'_> {
    if node.kind() == "decorated_definition" {
        if let Some(definition) = node.child_by_field_name("definition") {
            return definition;
        }
    }
    node
}

fn node_text(node: Node<'_>, source: &str) -> String {
    source[node.start_byte()..node.end_byte()].to_string()
}

fn field_text(node: Node<'_>, field: &str, source: &str) -> Option<String> {
    node.child_by_field_name(field)
        .map(|child| node_text(child, source))
}
