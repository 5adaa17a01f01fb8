//! Concrete argument fabrication.
//!
//! Turns inferred parameter types into Python literal expressions: normal
//! sample values for happy-path calls, neutral baselines, and edge
//! batteries (including boundary values mined from the comparisons the
//! source itself encodes). Dependency-injection construction happens here
//! too: a parameter typed as a discovered class receives a constructor
//! call instead of a literal.

use crate::analyzer::{ClassModel, FunctionModel};
use crate::heuristics::{self, PyValue, SemanticType};
use crate::literals;

/// Upper bound on fabricated edge tuples per function.
pub const MAX_EDGE_TUPLES: usize = 15;

/// Constructor recursion bound for dependency-injection chains.
const MAX_CONSTRUCTION_DEPTH: u8 = 2;

// ============================================================================
// Sample values
// ============================================================================

/// Normal arguments for a happy-path call, one per parameter.
pub fn sample_args(func: &FunctionModel, classes: &[ClassModel]) -> Vec<PyValue> {
    func.args
        .iter()
        .map(|arg| sample_value(arg, func, classes))
        .collect()
}

/// Normal sample value for one parameter.
pub fn sample_value(arg: &str, func: &FunctionModel, classes: &[ClassModel]) -> PyValue {
    typed_sample(arg, &func.param_type(arg), Some(func), classes, 0)
}

/// Constructor arguments for a class, used by instantiation and lifecycle
/// tests.
pub fn constructor_args(class: &ClassModel, classes: &[ClassModel]) -> Vec<PyValue> {
    let class_names: Vec<String> = classes.iter().map(|c| c.name.clone()).collect();
    class
        .constructor_args
        .iter()
        .map(|arg| {
            let ty = heuristics::infer_param_type(arg, None, false, false, &class_names);
            typed_sample(arg, &ty, None, classes, 1)
        })
        .collect()
}

fn typed_sample(
    arg: &str,
    ty: &SemanticType,
    func: Option<&FunctionModel>,
    classes: &[ClassModel],
    depth: u8,
) -> PyValue {
    if let SemanticType::Class(name) = ty {
        if let Some(class) = classes.iter().find(|c| &c.name == name) {
            return construct_instance(class, classes, depth);
        }
        return heuristics::type_default(&SemanticType::Any);
    }

    if let Some(func) = func {
        if !func.dict_keys.is_empty() {
            match ty {
                SemanticType::List => {
                    return PyValue::List(vec![literals::dict_literal(
                        &func.dict_keys,
                        &func.string_literals,
                    )]);
                }
                SemanticType::Dict => {
                    return literals::dict_literal(&func.dict_keys, &func.string_literals);
                }
                _ => {}
            }
        }
    }

    if let Some(kind) = heuristics::path_kind(arg) {
        return heuristics::path_sample(kind);
    }

    if matches!(ty, SemanticType::Str) {
        if let Some(lit) = func.and_then(|f| f.string_literals.first()) {
            return PyValue::str(lit);
        }
    }

    heuristics::type_default(ty)
}

fn construct_instance(class: &ClassModel, classes: &[ClassModel], depth: u8) -> PyValue {
    if depth >= MAX_CONSTRUCTION_DEPTH {
        return PyValue::Raw(format!("{}()", class.name));
    }
    let class_names: Vec<String> = classes.iter().map(|c| c.name.clone()).collect();
    let rendered: Vec<String> = class
        .constructor_args
        .iter()
        .map(|arg| {
            let ty = heuristics::infer_param_type(arg, None, false, false, &class_names);
            typed_sample(arg, &ty, None, classes, depth + 1).to_string()
        })
        .collect();
    PyValue::Raw(format!("{}({})", class.name, rendered.join(", ")))
}

// ============================================================================
// Boundary mining
// ============================================================================

enum ParsedNumber {
    Int(i64),
    Float(f64),
}

fn parse_number(text: &str) -> Option<ParsedNumber> {
    let cleaned = text.replace('_', "");
    let value: f64 = cleaned.parse().ok()?;
    if value.fract() == 0.0 && value.abs() < 9.0e18 {
        Some(ParsedNumber::Int(value as i64))
    } else {
        Some(ParsedNumber::Float(value))
    }
}

/// Boundary candidates for a parameter, mined from comparisons whose left
/// operand mentions it: the compared value itself, one above, one below
/// (±0.01 for floats). De-duplicated, order preserved.
pub fn mined_boundaries(arg: &str, func: &FunctionModel) -> Vec<PyValue> {
    let mut out = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    for comparison in &func.comparisons {
        if !comparison.left.contains(arg) {
            continue;
        }
        let candidates = match parse_number(&comparison.right) {
            Some(ParsedNumber::Int(v)) => vec![
                PyValue::Int(v),
                PyValue::Int(v.saturating_add(1)),
                PyValue::Int(v.saturating_sub(1)),
            ],
            Some(ParsedNumber::Float(v)) => vec![
                PyValue::Float(v),
                PyValue::Float(v + 0.01),
                PyValue::Float(v - 0.01),
            ],
            None => continue,
        };
        for candidate in candidates {
            let rendered = candidate.to_string();
            if !seen.contains(&rendered) {
                seen.push(rendered);
                out.push(candidate);
            }
        }
    }
    out
}

// ============================================================================
// Edge and baseline values
// ============================================================================

/// Edge battery for one parameter. Mined boundaries replace the generic
/// numeric battery when the source encodes guards against this parameter.
pub fn edge_values(arg: &str, func: &FunctionModel) -> Vec<PyValue> {
    if let Some(kind) = heuristics::path_kind(arg) {
        return heuristics::path_edges(kind);
    }
    let ty = func.param_type(arg);
    if ty.is_numeric() {
        let mined = mined_boundaries(arg, func);
        if !mined.is_empty() {
            return mined;
        }
    }
    heuristics::type_edges(&ty)
}

/// Neutral baseline arguments, one per parameter.
pub fn safe_args(func: &FunctionModel) -> Vec<PyValue> {
    func.args
        .iter()
        .map(|arg| heuristics::safe_value(arg, &func.param_type(arg)))
        .collect()
}

/// Render an argument list as it appears inside a call.
pub fn render_args(values: &[PyValue]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Edge tuples via single-argument perturbation: for each position, each
/// of its edge values against baselines elsewhere, then one all-baseline
/// tuple. De-duplicated by rendered form, capped at [`MAX_EDGE_TUPLES`].
pub fn edge_tuples(func: &FunctionModel) -> Vec<Vec<PyValue>> {
    let mut tuples: Vec<Vec<PyValue>> = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    let baseline = safe_args(func);

    'outer: for (position, arg) in func.args.iter().enumerate() {
        for edge in edge_values(arg, func) {
            if tuples.len() >= MAX_EDGE_TUPLES {
                break 'outer;
            }
            let mut tuple = baseline.clone();
            tuple[position] = edge;
            push_unique_tuple(&mut tuples, &mut seen, tuple);
        }
    }
    if tuples.len() < MAX_EDGE_TUPLES {
        push_unique_tuple(&mut tuples, &mut seen, baseline);
    }
    tuples
}

fn push_unique_tuple(
    tuples: &mut Vec<Vec<PyValue>>,
    seen: &mut Vec<String>,
    tuple: Vec<PyValue>,
) {
    let key = render_args(&tuple);
    if !seen.contains(&key) {
        seen.push(key);
        tuples.push(tuple);
    }
}

/// Probe values for type-violation refinement tests.
pub fn violation_values() -> Vec<PyValue> {
    vec![
        PyValue::str("invalid_string"),
        PyValue::None,
        PyValue::List(vec![]),
    ]
}

/// True when at least one parameter is numerically typed.
pub fn has_numeric_param(func: &FunctionModel) -> bool {
    func.args
        .iter()
        .any(|arg| func.param_type(arg).is_numeric())
}
