//! Canonical heuristic tables for semantic typing and value fabrication.
//!
//! Every keyword list, default value, and edge-value battery used by the
//! synthesis pipeline lives here as data. Inference and composition code
//! looks values up instead of branching on hard-coded strings, so the
//! tables can be audited (and swapped for another business domain)
//! without touching logic. The table set is versioned as a unit:
//! two runs against the same source and the same [`TABLE_VERSION`]
//! produce byte-identical suites.

use std::fmt;

use serde::{Serialize, Serializer};

/// Version of the heuristic table set. Bump when any table changes.
pub const TABLE_VERSION: &str = "1";

// ============================================================================
// Semantic types
// ============================================================================

/// Coarse semantic category inferred for a parameter. Not a verified static
/// type; only a hint for picking a plausible sample value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticType {
    Int,
    Float,
    Str,
    Bool,
    List,
    Dict,
    /// Unresolved; callers fall back to a generic placeholder.
    Any,
    /// Matches a class discovered in the same source; triggers
    /// dependency-injection construction at synthesis time.
    Class(String),
}

impl SemanticType {
    pub fn label(&self) -> &str {
        match self {
            SemanticType::Int => "int",
            SemanticType::Float => "float",
            SemanticType::Str => "str",
            SemanticType::Bool => "bool",
            SemanticType::List => "list",
            SemanticType::Dict => "dict",
            SemanticType::Any => "any",
            SemanticType::Class(name) => name,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, SemanticType::Int | SemanticType::Float)
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for SemanticType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

// ============================================================================
// Python literal values
// ============================================================================

/// A fabricated Python value, rendered into generated test source.
///
/// Rendering is the only observable form, so equality and de-duplication
/// go through [`fmt::Display`] as well.
#[derive(Debug, Clone, PartialEq)]
pub enum PyValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
    List(Vec<PyValue>),
    Dict(Vec<(String, PyValue)>),
    /// Pre-rendered expression, e.g. a constructor call.
    Raw(String),
}

impl PyValue {
    pub fn str(value: &str) -> PyValue {
        PyValue::Str(value.to_string())
    }
}

fn escape_py_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

impl fmt::Display for PyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PyValue::Int(v) => write!(f, "{v}"),
            // {:?} renders the shortest round-trip form: 100.0, 0.01, 999.99
            PyValue::Float(v) => write!(f, "{v:?}"),
            PyValue::Str(s) => write!(f, "'{}'", escape_py_str(s)),
            PyValue::Bool(true) => f.write_str("True"),
            PyValue::Bool(false) => f.write_str("False"),
            PyValue::None => f.write_str("None"),
            PyValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            PyValue::Dict(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "'{}': {value}", escape_py_str(key))?;
                }
                f.write_str("}")
            }
            PyValue::Raw(expr) => f.write_str(expr),
        }
    }
}

// ============================================================================
// Name-pattern typing rules
// ============================================================================

/// How a rule keyword matches a parameter name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Substring,
    Exact,
}

/// One ordered entry of the name-pattern tier.
pub struct NameRule {
    pub keywords: &'static [&'static str],
    pub kind: MatchKind,
    pub ty: SemanticType,
}

/// Name-pattern tier, checked in order; first matching rule wins.
pub const NAME_RULES: &[NameRule] = &[
    NameRule {
        keywords: &["price", "cost", "amount", "total", "discount"],
        kind: MatchKind::Substring,
        ty: SemanticType::Float,
    },
    NameRule {
        keywords: &["count", "quantity", "num", "index"],
        kind: MatchKind::Substring,
        ty: SemanticType::Int,
    },
    NameRule {
        keywords: &["name", "type", "code", "status"],
        kind: MatchKind::Substring,
        ty: SemanticType::Str,
    },
    NameRule {
        keywords: &["items", "list", "arr", "numbers"],
        kind: MatchKind::Substring,
        ty: SemanticType::List,
    },
    NameRule {
        keywords: &["is_", "has_", "can_"],
        kind: MatchKind::Substring,
        ty: SemanticType::Bool,
    },
    NameRule {
        keywords: &["data", "config", "options"],
        kind: MatchKind::Exact,
        ty: SemanticType::Dict,
    },
];

/// Look a parameter name up in the name-pattern tier.
pub fn name_pattern_type(param: &str) -> Option<SemanticType> {
    let lower = param.to_lowercase();
    for rule in NAME_RULES {
        let hit = match rule.kind {
            MatchKind::Substring => rule.keywords.iter().any(|kw| lower.contains(kw)),
            MatchKind::Exact => rule.keywords.iter().any(|kw| lower == *kw),
        };
        if hit {
            return Some(rule.ty.clone());
        }
    }
    None
}

// ============================================================================
// Parameter type inference
// ============================================================================

fn normalize_class_key(name: &str) -> String {
    name.to_lowercase().replace('_', "")
}

/// Resolve a plain-identifier annotation to a semantic type. Identifiers
/// that are neither primitives nor discovered classes resolve to nothing
/// so inference can fall through to the heuristic tiers.
pub fn annotation_type(annotation: &str, class_names: &[String]) -> Option<SemanticType> {
    match annotation {
        "int" => Some(SemanticType::Int),
        "float" => Some(SemanticType::Float),
        "str" => Some(SemanticType::Str),
        "bool" => Some(SemanticType::Bool),
        "list" => Some(SemanticType::List),
        "dict" => Some(SemanticType::Dict),
        other => class_names
            .iter()
            .find(|name| name.as_str() == other)
            .map(|name| SemanticType::Class(name.clone())),
    }
}

/// Infer the semantic type of one parameter. Tiers in order, first match
/// wins: explicit annotation, name-pattern table, observed usage
/// (subscripting or dict-style receiver), class-named parameter, `any`.
pub fn infer_param_type(
    param: &str,
    annotation: Option<&str>,
    subscripted: bool,
    dict_receiver: bool,
    class_names: &[String],
) -> SemanticType {
    if let Some(ty) = annotation.and_then(|ann| annotation_type(ann, class_names)) {
        return ty;
    }
    if let Some(ty) = name_pattern_type(param) {
        return ty;
    }
    if subscripted {
        return SemanticType::List;
    }
    if dict_receiver {
        return SemanticType::Dict;
    }
    let key = normalize_class_key(param);
    if let Some(class) = class_names
        .iter()
        .find(|name| normalize_class_key(name) == key)
    {
        return SemanticType::Class(class.clone());
    }
    SemanticType::Any
}

// ============================================================================
// Path-shaped parameter names
// ============================================================================

/// Filesystem-flavored parameter classification, directory beats file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Directory,
    File,
    Pattern,
}

const DIRECTORY_NAME_HINTS: &[&str] = &["directory", "folder", "dir"];
const FILE_NAME_HINTS: &[&str] = &["file", "path"];
const PATTERN_NAME_HINTS: &[&str] = &["pattern"];

pub fn path_kind(param: &str) -> Option<PathKind> {
    let lower = param.to_lowercase();
    if DIRECTORY_NAME_HINTS.iter().any(|h| lower.contains(h)) {
        return Some(PathKind::Directory);
    }
    if FILE_NAME_HINTS.iter().any(|h| lower.contains(h)) {
        return Some(PathKind::File);
    }
    if PATTERN_NAME_HINTS.iter().any(|h| lower.contains(h)) {
        return Some(PathKind::Pattern);
    }
    None
}

/// Safe sentinel sample for a path-shaped parameter.
pub fn path_sample(kind: PathKind) -> PyValue {
    match kind {
        PathKind::Directory => PyValue::str("."),
        PathKind::File => PyValue::str("test_data.json"),
        PathKind::Pattern => PyValue::str(".py"),
    }
}

/// Edge battery for a path-shaped parameter.
pub fn path_edges(kind: PathKind) -> Vec<PyValue> {
    match kind {
        PathKind::Directory => vec![PyValue::str("nonexistent_dir"), PyValue::str("")],
        PathKind::File => vec![
            PyValue::str("nonexistent.txt"),
            PyValue::str(""),
            PyValue::None,
        ],
        PathKind::Pattern => vec![PyValue::str(".txt"), PyValue::str(""), PyValue::str("*")],
    }
}

// ============================================================================
// Body-call indicators
// ============================================================================

/// Attribute/function call names that mark a body as file-touching.
pub const FILE_CALL_NAMES: &[&str] = &["open", "read", "write", "readlines", "unlink", "remove"];

/// Attribute/function call names that mark a body as directory-touching.
pub const DIR_CALL_NAMES: &[&str] = &["walk", "listdir", "scandir", "mkdir", "makedirs", "rmdir"];

// ============================================================================
// Mutator / accessor classification
// ============================================================================

/// Method-name keywords marking a state-changing call, localized synonyms
/// included. Everything else (get/read/calc/report/predicate names and any
/// ambiguous name) counts as an accessor, so every method is exercised at
/// least once in a lifecycle scenario.
pub const MUTATOR_KEYWORDS: &[&str] = &[
    "add", "set", "update", "create", "insert", "append", "ekle", "yukle", "guncelle", "kaydet",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodRole {
    Mutator,
    Accessor,
}

pub fn classify_method(name: &str) -> MethodRole {
    let lower = name.to_lowercase();
    if MUTATOR_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        MethodRole::Mutator
    } else {
        MethodRole::Accessor
    }
}

// ============================================================================
// Dict-literal key semantics
// ============================================================================

/// Key-name substrings presumed to be outputs computed by the function
/// under test, dropped before a dict literal is synthesized.
pub const OUTPUT_KEY_HINTS: &[&str] = &["total", "result", "output", "toplam", "sonuc", "maliyet"];

/// String literals recognized as role values when seen in a function body.
pub const ROLE_LITERALS: &[&str] = &["manager", "admin", "employee", "yönetici", "uzman"];

const PRICE_KEY_HINTS: &[&str] = &["price", "cost", "amount", "fiyat", "tutar"];
const QUANTITY_KEY_HINTS: &[&str] = &["count", "quantity", "qty", "stock", "adet", "miktar", "stok"];
const YEAR_KEY_HINTS: &[&str] = &["year", "yil"];
const NAME_KEY_HINTS: &[&str] = &["name", "isim"];
const ROLE_KEY_HINTS: &[&str] = &["role", "rol", "title", "unvan"];

/// Semantic category of a dict key or scalar parameter name, used to pick
/// a default value. Quantity-like values stay small and price-like values
/// stay larger so one literal never accidentally equates the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueCategory {
    Price,
    Quantity,
    Year,
    NameLike,
    RoleLike,
    Other,
}

pub fn key_category(key: &str) -> ValueCategory {
    let lower = key.to_lowercase();
    if PRICE_KEY_HINTS.iter().any(|h| lower.contains(h)) {
        ValueCategory::Price
    } else if QUANTITY_KEY_HINTS.iter().any(|h| lower.contains(h)) {
        ValueCategory::Quantity
    } else if YEAR_KEY_HINTS.iter().any(|h| lower.contains(h)) {
        ValueCategory::Year
    } else if ROLE_KEY_HINTS.iter().any(|h| lower.contains(h)) {
        ValueCategory::RoleLike
    } else if NAME_KEY_HINTS.iter().any(|h| lower.contains(h)) {
        ValueCategory::NameLike
    } else {
        ValueCategory::Other
    }
}

/// Default value for a semantic category. `role_hint` carries an observed
/// role literal from the function body, if any.
pub fn category_default(category: ValueCategory, role_hint: Option<&str>) -> PyValue {
    match category {
        ValueCategory::Price => PyValue::Int(100),
        ValueCategory::Quantity => PyValue::Int(5),
        ValueCategory::Year => PyValue::Int(2020),
        ValueCategory::NameLike => PyValue::str("Test Item"),
        ValueCategory::RoleLike => PyValue::str(role_hint.unwrap_or("manager")),
        ValueCategory::Other => PyValue::str("value"),
    }
}

// ============================================================================
// Scalar defaults and edge batteries
// ============================================================================

/// Default sample for a plain typed scalar with no stronger name category.
pub fn type_default(ty: &SemanticType) -> PyValue {
    match ty {
        SemanticType::Int => PyValue::Int(10),
        SemanticType::Float => PyValue::Float(100.0),
        SemanticType::Str => PyValue::str("test"),
        SemanticType::Bool => PyValue::Bool(true),
        SemanticType::List => PyValue::List(vec![PyValue::Int(1), PyValue::Int(2), PyValue::Int(3)]),
        SemanticType::Dict => PyValue::Dict(vec![("key".to_string(), PyValue::str("value"))]),
        SemanticType::Any | SemanticType::Class(_) => PyValue::Int(10),
    }
}

/// Edge battery for a typed scalar when no boundary values were mined.
pub fn type_edges(ty: &SemanticType) -> Vec<PyValue> {
    match ty {
        SemanticType::Int => vec![PyValue::Int(0), PyValue::Int(-1), PyValue::Int(999999)],
        SemanticType::Float => vec![
            PyValue::Float(0.0),
            PyValue::Float(-1.0),
            PyValue::Float(999.99),
        ],
        SemanticType::Str => vec![PyValue::str(""), PyValue::str("x")],
        SemanticType::Bool => vec![PyValue::Bool(false)],
        SemanticType::List => vec![PyValue::List(vec![]), PyValue::List(vec![PyValue::Int(1)])],
        SemanticType::Dict => vec![PyValue::Dict(vec![])],
        SemanticType::Any | SemanticType::Class(_) => {
            vec![PyValue::None, PyValue::Int(0), PyValue::str("")]
        }
    }
}

/// Neutral baseline used for the positions not being perturbed in an
/// edge-case tuple.
pub fn safe_value(param: &str, ty: &SemanticType) -> PyValue {
    if let Some(kind) = path_kind(param) {
        return path_sample(kind);
    }
    match ty {
        SemanticType::Int => PyValue::Int(1),
        SemanticType::Float => PyValue::Float(1.0),
        SemanticType::Str => PyValue::str("test"),
        SemanticType::Bool => PyValue::Bool(true),
        SemanticType::List => PyValue::List(vec![PyValue::Int(1)]),
        SemanticType::Dict => PyValue::Dict(vec![("key".to_string(), PyValue::str("value"))]),
        SemanticType::Any | SemanticType::Class(_) => PyValue::Int(1),
    }
}
