use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;
use tokio::io::AsyncBufReadExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    TypeScript,
    JavaScript,
    Python,
    Go,
    Java,
    C,
    Cpp,
    CSharp,
    Ruby,
    Php,
    Swift,
    Kotlin,
    Unknown,
}

impl Language {
    pub const ALL: [Language; 13] = [
        Language::Rust,
        Language::TypeScript,
        Language::JavaScript,
        Language::Python,
        Language::Go,
        Language::Java,
        Language::C,
        Language::Cpp,
        Language::CSharp,
        Language::Ruby,
        Language::Php,
        Language::Swift,
        Language::Kotlin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Go => "go",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Swift => "swift",
            Language::Kotlin => "kotlin",
            Language::Unknown => "unknown",
        }
    }

    /// The `languageId` sent in `textDocument/didOpen`.
    pub fn language_id(&self) -> &'static str {
        match self {
            Language::Unknown => "plaintext",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let language = match s.to_ascii_lowercase().as_str() {
            "rust" => Language::Rust,
            "typescript" | "ts" => Language::TypeScript,
            "javascript" | "js" => Language::JavaScript,
            "python" | "py" => Language::Python,
            "go" | "golang" => Language::Go,
            "java" => Language::Java,
            "c" => Language::C,
            "cpp" | "c++" => Language::Cpp,
            "csharp" | "c#" => Language::CSharp,
            "ruby" => Language::Ruby,
            "php" => Language::Php,
            "swift" => Language::Swift,
            "kotlin" => Language::Kotlin,
            other => return Err(format!("unknown language '{other}'")),
        };
        Ok(language)
    }
}

static SHEBANG_PATTERNS: Lazy<Vec<(Regex, Language)>> = Lazy::new(|| {
    [
        (r"^#!/.*\bpython", Language::Python),
        (r"^#!/.*\bruby", Language::Ruby),
        (r"^#!/.*\bnode", Language::JavaScript),
        (r"^#!/.*\bphp", Language::Php),
    ]
    .into_iter()
    .filter_map(|(pattern, language)| Regex::new(pattern).ok().map(|re| (re, language)))
    .collect()
});

#[derive(Debug, Clone)]
pub struct LanguageDetector {
    extension_map: HashMap<&'static str, Language>,
}

impl Default for LanguageDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageDetector {
    pub fn new() -> Self {
        let extension_map = HashMap::from([
            ("rs", Language::Rust),
            ("ts", Language::TypeScript),
            ("tsx", Language::TypeScript),
            ("mts", Language::TypeScript),
            ("js", Language::JavaScript),
            ("jsx", Language::JavaScript),
            ("mjs", Language::JavaScript),
            ("cjs", Language::JavaScript),
            ("py", Language::Python),
            ("pyi", Language::Python),
            ("go", Language::Go),
            ("java", Language::Java),
            ("c", Language::C),
            ("h", Language::C),
            ("cpp", Language::Cpp),
            ("cxx", Language::Cpp),
            ("cc", Language::Cpp),
            ("hpp", Language::Cpp),
            ("hxx", Language::Cpp),
            ("cs", Language::CSharp),
            ("rb", Language::Ruby),
            ("php", Language::Php),
            ("swift", Language::Swift),
            ("kt", Language::Kotlin),
            ("kts", Language::Kotlin),
        ]);

        Self { extension_map }
    }

    /// Extension first, then shebang. Files that cannot be read fall through to `Unknown`.
    pub fn detect(&self, file_path: &Path) -> Language {
        if let Some(language) = self.detect_from_path(file_path) {
            return language;
        }

        let mut first_line = String::new();
        match std::fs::File::open(file_path) {
            Ok(file) => {
                if std::io::BufReader::new(file).read_line(&mut first_line).is_err() {
                    return Language::Unknown;
                }
            }
            Err(_) => return Language::Unknown,
        }
        detect_from_shebang(&first_line)
    }

    /// Same as [`detect`](Self::detect), reading the shebang line with `tokio::fs`.
    pub async fn detect_async(&self, file_path: &Path) -> Language {
        if let Some(language) = self.detect_from_path(file_path) {
            return language;
        }

        let Ok(file) = tokio::fs::File::open(file_path).await else {
            return Language::Unknown;
        };
        let mut first_line = String::new();
        if tokio::io::BufReader::new(file)
            .read_line(&mut first_line)
            .await
            .is_err()
        {
            return Language::Unknown;
        }
        detect_from_shebang(&first_line)
    }

    fn detect_from_path(&self, file_path: &Path) -> Option<Language> {
        file_path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|ext| self.detect_from_extension(ext))
    }

    pub fn detect_from_extension(&self, extension: &str) -> Option<Language> {
        self.extension_map.get(extension).copied()
    }

    /// Detect from a `file://` URI without touching the filesystem.
    pub fn detect_from_uri(&self, uri: &str) -> Language {
        let path = uri.rsplit('/').next().unwrap_or(uri);
        path.rsplit_once('.')
            .and_then(|(_, ext)| self.detect_from_extension(ext))
            .unwrap_or(Language::Unknown)
    }
}

fn detect_from_shebang(first_line: &str) -> Language {
    SHEBANG_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(first_line.trim_end()))
        .map(|(_, language)| *language)
        .unwrap_or(Language::Unknown)
}
