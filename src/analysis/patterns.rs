//! Naming and shape heuristics for design patterns and anti-patterns.

use super::types::{DetectedPattern, PatternCategory};
use crate::symbols::{SymbolKind, SymbolRecord};

pub const GOD_CLASS: &str = "God Class";

/// Patterns at or above this confidence count as "high confidence".
pub const HIGH_CONFIDENCE: f64 = 0.7;

fn is_container_type(kind: SymbolKind) -> bool {
    matches!(
        kind,
        SymbolKind::Class | SymbolKind::Struct | SymbolKind::Interface
    )
}

/// Callable members declared directly inside `owner`.
pub fn methods_of<'a>(owner: &SymbolRecord, symbols: &'a [SymbolRecord]) -> Vec<&'a SymbolRecord> {
    symbols
        .iter()
        .filter(|s| {
            s.kind.is_callable()
                && s.location.uri == owner.location.uri
                && s.container_name.as_deref() == Some(owner.name.as_str())
        })
        .collect()
}

pub fn detect_patterns(symbols: &[SymbolRecord], god_class_threshold: usize) -> Vec<DetectedPattern> {
    let mut patterns = Vec::new();
    for owner in symbols.iter().filter(|s| is_container_type(s.kind)) {
        let methods = methods_of(owner, symbols);
        let names: Vec<String> = methods.iter().map(|m| m.name.to_lowercase()).collect();

        if let Some(p) = singleton(owner, &names) {
            patterns.push(p);
        }
        if let Some(p) = factory(owner, &names) {
            patterns.push(p);
        }
        if let Some(p) = builder(owner, &names) {
            patterns.push(p);
        }
        if let Some(p) = observer(owner, &names) {
            patterns.push(p);
        }
        if let Some(p) = god_class(owner, methods.len(), god_class_threshold) {
            patterns.push(p);
        }
    }
    patterns
}

fn pattern(
    owner: &SymbolRecord,
    name: &str,
    category: PatternCategory,
    confidence: f64,
    description: String,
) -> DetectedPattern {
    DetectedPattern {
        name: name.to_string(),
        category,
        symbol: owner.name.clone(),
        location: owner.location.clone(),
        confidence,
        description,
    }
}

fn singleton(owner: &SymbolRecord, methods: &[String]) -> Option<DetectedPattern> {
    let accessor = methods
        .iter()
        .any(|m| matches!(m.as_str(), "getinstance" | "get_instance" | "instance" | "shared"));
    let named = owner.name.to_lowercase().contains("singleton");
    let confidence = match (accessor, named) {
        (true, true) => 0.9,
        (true, false) => 0.8,
        (false, true) => 0.6,
        (false, false) => return None,
    };
    Some(pattern(
        owner,
        "Singleton",
        PatternCategory::DesignPattern,
        confidence,
        format!("{} exposes a single shared instance", owner.name),
    ))
}

fn factory(owner: &SymbolRecord, methods: &[String]) -> Option<DetectedPattern> {
    let creators = methods
        .iter()
        .filter(|m| m.starts_with("create") || m.starts_with("make"))
        .count();
    let named = owner.name.ends_with("Factory");
    let confidence = match (named, creators) {
        (true, 0) => 0.6,
        (true, _) => 0.85,
        (false, n) if n >= 2 => 0.5,
        _ => return None,
    };
    Some(pattern(
        owner,
        "Factory",
        PatternCategory::DesignPattern,
        confidence,
        format!("{} creates objects through {} factory method(s)", owner.name, creators),
    ))
}

fn builder(owner: &SymbolRecord, methods: &[String]) -> Option<DetectedPattern> {
    let has_build = methods.iter().any(|m| m == "build");
    let setters = methods
        .iter()
        .filter(|m| m.starts_with("with") || m.starts_with("set"))
        .count();
    let named = owner.name.ends_with("Builder");
    let confidence = match (named, has_build) {
        (true, true) => 0.9,
        (true, false) => 0.6,
        (false, true) if setters >= 2 => 0.7,
        _ => return None,
    };
    Some(pattern(
        owner,
        "Builder",
        PatternCategory::DesignPattern,
        confidence,
        format!("{} assembles a value step by step", owner.name),
    ))
}

fn observer(owner: &SymbolRecord, methods: &[String]) -> Option<DetectedPattern> {
    let any = |prefixes: &[&str]| {
        methods
            .iter()
            .any(|m| prefixes.iter().any(|p| m.starts_with(p)))
    };
    let attach = any(&["subscribe", "addlistener", "add_listener", "addobserver", "attach"]);
    let detach = any(&["unsubscribe", "removelistener", "remove_listener", "removeobserver", "detach"]);
    let notify = any(&["notify", "emit", "publish"]);
    let confidence = match (attach, detach, notify) {
        (true, true, true) => 0.85,
        (true, true, false) | (true, false, true) => 0.6,
        _ => return None,
    };
    Some(pattern(
        owner,
        "Observer",
        PatternCategory::DesignPattern,
        confidence,
        format!("{} manages subscribers", owner.name),
    ))
}

fn god_class(owner: &SymbolRecord, method_count: usize, threshold: usize) -> Option<DetectedPattern> {
    if method_count <= threshold {
        return None;
    }
    let excess = (method_count - threshold) as f64;
    Some(pattern(
        owner,
        GOD_CLASS,
        PatternCategory::AntiPattern,
        (0.8 + 0.01 * excess).min(0.95),
        format!(
            "{} declares {} methods (threshold {})",
            owner.name, method_count, threshold
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::{Location, Position, Range, SymbolHierarchy};

    fn sym(name: &str, kind: SymbolKind, container: Option<&str>, line: u32) -> SymbolRecord {
        SymbolRecord {
            name: name.to_string(),
            kind,
            location: Location::new(
                "file:///src/app.ts",
                Range::new(Position::new(line, 0), Position::new(line, 10)),
            ),
            selection_range: None,
            container_name: container.map(str::to_string),
            type_info: None,
            references: Vec::new(),
            implementations: Vec::new(),
            hierarchy: SymbolHierarchy::default(),
        }
    }

    fn class_with(name: &str, methods: &[&str]) -> Vec<SymbolRecord> {
        let mut symbols = vec![sym(name, SymbolKind::Class, None, 0)];
        for (i, m) in methods.iter().enumerate() {
            symbols.push(sym(m, SymbolKind::Method, Some(name), i as u32 + 1));
        }
        symbols
    }

    #[test]
    fn test_god_class_threshold() {
        let names: Vec<String> = (0..25).map(|i| format!("method{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let symbols = class_with("Everything", &refs);

        let patterns = detect_patterns(&symbols, 20);
        let god = patterns.iter().find(|p| p.name == GOD_CLASS).unwrap();
        assert_eq!(god.category, PatternCategory::AntiPattern);
        assert!(god.confidence >= 0.8 && god.confidence <= 0.95);

        assert!(detect_patterns(&class_with("Small", &refs[..20]), 20)
            .iter()
            .all(|p| p.name != GOD_CLASS));
    }

    #[test]
    fn test_design_patterns_by_shape() {
        let mut symbols = class_with("Config", &["getInstance", "load"]);
        symbols.extend(class_with("RequestBuilder", &["withUrl", "withBody", "build"]));
        symbols.extend(class_with("Bus", &["subscribe", "unsubscribe", "notifyAll"]));
        symbols.extend(class_with("WidgetFactory", &["createButton"]));

        let patterns = detect_patterns(&symbols, 20);
        let find = |name: &str| patterns.iter().find(|p| p.name == name).map(|p| p.symbol.clone());
        assert_eq!(find("Singleton").as_deref(), Some("Config"));
        assert_eq!(find("Builder").as_deref(), Some("RequestBuilder"));
        assert_eq!(find("Observer").as_deref(), Some("Bus"));
        assert_eq!(find("Factory").as_deref(), Some("WidgetFactory"));
    }

    #[test]
    fn test_methods_of_ignores_other_containers() {
        let mut symbols = class_with("A", &["one", "two"]);
        symbols.extend(class_with("B", &["three"]));
        symbols.push(sym("field", SymbolKind::Field, Some("A"), 40));
        assert_eq!(methods_of(&symbols[0], &symbols).len(), 2);
    }
}
