//! Symbol records and conversion from backend `documentSymbol` / location responses.

use crate::error::{Result, SupervisorError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }

    fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            line: value.get("line")?.as_u64()? as u32,
            character: value.get("character")?.as_u64()? as u32,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, position: Position) -> bool {
        self.start <= position && position <= self.end
    }

    /// Number of lines spanned; used to pick the innermost enclosing symbol.
    pub fn span(&self) -> (u32, u32) {
        (
            self.end.line.saturating_sub(self.start.line),
            self.end.character.saturating_sub(self.start.character),
        )
    }

    fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            start: Position::from_value(value.get("start")?)?,
            end: Position::from_value(value.get("end")?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

impl Location {
    pub fn new(uri: impl Into<String>, range: Range) -> Self {
        Self {
            uri: uri.into(),
            range,
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        if let Some(uri) = value.get("uri").and_then(|u| u.as_str()) {
            return Some(Self::new(uri, Range::from_value(value.get("range")?)?));
        }
        // LocationLink
        let uri = value.get("targetUri")?.as_str()?;
        let range = value
            .get("targetSelectionRange")
            .or_else(|| value.get("targetRange"))
            .and_then(Range::from_value)?;
        Some(Self::new(uri, range))
    }
}

/// Symbol kinds as numbered by the code-intelligence protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    File,
    Module,
    Namespace,
    Package,
    Class,
    Method,
    Property,
    Field,
    Constructor,
    Enum,
    Interface,
    Function,
    Variable,
    Constant,
    String,
    Number,
    Boolean,
    Array,
    Object,
    Key,
    Null,
    EnumMember,
    Struct,
    Event,
    Operator,
    TypeParameter,
}

impl SymbolKind {
    pub fn from_lsp(kind: u64) -> Option<Self> {
        use SymbolKind::*;
        let kind = match kind {
            1 => File,
            2 => Module,
            3 => Namespace,
            4 => Package,
            5 => Class,
            6 => Method,
            7 => Property,
            8 => Field,
            9 => Constructor,
            10 => Enum,
            11 => Interface,
            12 => Function,
            13 => Variable,
            14 => Constant,
            15 => String,
            16 => Number,
            17 => Boolean,
            18 => Array,
            19 => Object,
            20 => Key,
            21 => Null,
            22 => EnumMember,
            23 => Struct,
            24 => Event,
            25 => Operator,
            26 => TypeParameter,
            _ => return None,
        };
        Some(kind)
    }

    pub fn to_lsp(self) -> u64 {
        self as u64 + 1
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            SymbolKind::Function | SymbolKind::Method | SymbolKind::Constructor
        )
    }

    pub fn is_type_definition(&self) -> bool {
        matches!(
            self,
            SymbolKind::Class
                | SymbolKind::Struct
                | SymbolKind::Interface
                | SymbolKind::Enum
                | SymbolKind::TypeParameter
        )
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolHierarchy {
    pub parent: Option<String>,
    pub children: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub name: String,
    pub kind: SymbolKind,
    pub location: Location,
    /// Range of the identifier itself, when the backend reports it.
    pub selection_range: Option<Range>,
    pub container_name: Option<String>,
    /// Backend-provided signature or type detail.
    pub type_info: Option<String>,
    pub references: Vec<Location>,
    pub implementations: Vec<Location>,
    pub hierarchy: SymbolHierarchy,
}

/// Identity of a symbol: same name at a different place is a different symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolKey {
    pub uri: String,
    pub line: u32,
    pub character: u32,
    pub name: String,
}

impl SymbolRecord {
    pub fn key(&self) -> SymbolKey {
        SymbolKey {
            uri: self.location.uri.clone(),
            line: self.location.range.start.line,
            character: self.location.range.start.character,
            name: self.name.clone(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.location.uri
    }

    /// Where to point position-based requests (references, hover) for this symbol.
    pub fn anchor(&self) -> Position {
        self.selection_range
            .map(|r| r.start)
            .unwrap_or(self.location.range.start)
    }
}

/// Flatten a `textDocument/documentSymbol` result. Accepts both the
/// hierarchical `DocumentSymbol[]` and flat `SymbolInformation[]` shapes.
pub fn parse_document_symbols(uri: &str, response: &Value) -> Result<Vec<SymbolRecord>> {
    let items = match response {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => {
            return Err(SupervisorError::Protocol {
                code: -32603,
                message: format!("unexpected documentSymbol result: {}", type_name(other)),
            })
        }
    };

    let mut symbols = Vec::new();
    for item in items {
        if item.get("location").is_some() {
            if let Some(symbol) = parse_symbol_information(item) {
                symbols.push(symbol);
            }
        } else {
            collect_document_symbol(uri, item, None, &mut symbols);
        }
    }
    Ok(symbols)
}

fn parse_symbol_information(item: &Value) -> Option<SymbolRecord> {
    let container_name = item
        .get("containerName")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    Some(SymbolRecord {
        name: item.get("name")?.as_str()?.to_string(),
        kind: SymbolKind::from_lsp(item.get("kind")?.as_u64()?)?,
        location: Location::from_value(item.get("location")?)?,
        selection_range: None,
        hierarchy: SymbolHierarchy {
            parent: container_name.clone(),
            children: Vec::new(),
        },
        container_name,
        type_info: None,
        references: Vec::new(),
        implementations: Vec::new(),
    })
}

fn collect_document_symbol(
    uri: &str,
    item: &Value,
    parent: Option<&str>,
    out: &mut Vec<SymbolRecord>,
) {
    let (Some(name), Some(kind), Some(range)) = (
        item.get("name").and_then(|n| n.as_str()),
        item.get("kind")
            .and_then(|k| k.as_u64())
            .and_then(SymbolKind::from_lsp),
        item.get("range").and_then(Range::from_value),
    ) else {
        tracing::debug!("Skipping malformed document symbol in {}", uri);
        return;
    };

    let children = item
        .get("children")
        .and_then(|c| c.as_array())
        .cloned()
        .unwrap_or_default();
    let child_names = children
        .iter()
        .filter_map(|c| c.get("name").and_then(|n| n.as_str()))
        .map(str::to_string)
        .collect();

    out.push(SymbolRecord {
        name: name.to_string(),
        kind,
        location: Location::new(uri, range),
        selection_range: item.get("selectionRange").and_then(Range::from_value),
        container_name: parent.map(str::to_string),
        type_info: item
            .get("detail")
            .and_then(|d| d.as_str())
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        references: Vec::new(),
        implementations: Vec::new(),
        hierarchy: SymbolHierarchy {
            parent: parent.map(str::to_string),
            children: child_names,
        },
    });

    for child in &children {
        collect_document_symbol(uri, child, Some(name), out);
    }
}

/// `Location | Location[] | LocationLink[] | null` into a flat list.
pub fn parse_locations(response: &Value) -> Vec<Location> {
    match response {
        Value::Array(items) => items.iter().filter_map(Location::from_value).collect(),
        Value::Object(_) => Location::from_value(response).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Plain text of a hover result (`MarkupContent`, `MarkedString` or arrays of them).
pub fn hover_text(response: &Value) -> Option<String> {
    fn flatten(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map.get("value").and_then(|v| v.as_str()).map(str::to_string),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().filter_map(flatten).collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("\n\n"))
                }
            }
            _ => None,
        }
    }

    flatten(response.get("contents")?).filter(|text| !text.trim().is_empty())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn range(l1: u32, l2: u32) -> Value {
        json!({ "start": { "line": l1, "character": 0 }, "end": { "line": l2, "character": 1 } })
    }

    #[test]
    fn test_parse_hierarchical_symbols() {
        let response = json!([{
            "name": "UserService",
            "kind": 5,
            "range": range(0, 20),
            "selectionRange": range(0, 0),
            "children": [
                { "name": "getUser", "kind": 6, "detail": "fn(id: u32) -> User", "range": range(2, 4), "selectionRange": range(2, 2) },
                { "name": "save", "kind": 6, "range": range(6, 8), "selectionRange": range(6, 6) }
            ]
        }]);

        let symbols = parse_document_symbols("file:///svc.rs", &response).unwrap();
        assert_eq!(symbols.len(), 3);
        assert_eq!(symbols[0].kind, SymbolKind::Class);
        assert_eq!(symbols[0].hierarchy.children, vec!["getUser", "save"]);
        assert_eq!(symbols[1].container_name.as_deref(), Some("UserService"));
        assert_eq!(symbols[1].type_info.as_deref(), Some("fn(id: u32) -> User"));
    }

    #[test]
    fn test_parse_symbol_information() {
        let response = json!([{
            "name": "main",
            "kind": 12,
            "location": { "uri": "file:///main.go", "range": range(3, 9) },
            "containerName": ""
        }]);
        let symbols = parse_document_symbols("file:///main.go", &response).unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].kind, SymbolKind::Function);
        assert!(symbols[0].container_name.is_none());
        assert!(parse_document_symbols("file:///x", &json!("nope")).is_err());
        assert!(parse_document_symbols("file:///x", &Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_parse_locations_and_hover() {
        let links = json!([{ "targetUri": "file:///b.rs", "targetRange": range(1, 2), "targetSelectionRange": range(1, 1) }]);
        assert_eq!(parse_locations(&links)[0].uri, "file:///b.rs");
        let single = json!({ "uri": "file:///c.rs", "range": range(0, 0) });
        assert_eq!(parse_locations(&single).len(), 1);
        assert!(parse_locations(&Value::Null).is_empty());

        let hover = json!({ "contents": { "kind": "markdown", "value": "```rust\nfn x()\n```" } });
        assert!(hover_text(&hover).unwrap().contains("fn x()"));
        assert!(hover_text(&json!({ "contents": [] })).is_none());
    }

    #[test]
    fn test_kind_round_trip_and_containment() {
        assert_eq!(SymbolKind::from_lsp(6).map(|k| k.to_lsp()), Some(6));
        assert_eq!(SymbolKind::from_lsp(99), None);
        let r = Range::new(Position::new(2, 0), Position::new(4, 1));
        assert!(r.contains(Position::new(3, 10)));
        assert!(!r.contains(Position::new(5, 0)));
    }
}
