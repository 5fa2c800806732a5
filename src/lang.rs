//! Text-extension classification.
//!
//! Trimmed from the donor's `detect_language` (originally consolidated across
//! four duplicate implementations for syntax-highlighting purposes in the
//! donor's editor-facing routes). This crate has no editor surface, so the
//! only question that survives is whether a given extension names a file the
//! Streaming Processor should treat as extractable text (SPEC_FULL §4.6).

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "mdx", "rst", "adoc", "org",
    "rs", "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "pyi", "go", "java",
    "c", "h", "cpp", "hpp", "cc", "cxx", "hxx", "cs", "rb", "php", "swift",
    "kt", "kts", "scala", "lua", "zig", "dart",
    "html", "htm", "css", "scss", "sass", "less",
    "json", "jsonc", "yaml", "yml", "toml", "xml", "ini", "cfg", "conf", "env",
    "sql", "graphql", "gql", "proto", "hcl", "tf",
    "sh", "bash", "zsh", "fish", "ps1", "psm1", "bat", "cmd",
    "csv", "log",
];

/// Whether `ext` (without the leading dot, case-insensitive) names a file the
/// chunker should read as text. Unknown extensions are excluded rather than
/// guessed at, since misreading binary content as text would feed garbage
/// chunks into the embedder.
pub fn is_text_extension(ext: &str) -> bool {
    let lower = ext.to_lowercase();
    TEXT_EXTENSIONS.contains(&lower.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_common_text_and_code_extensions() {
        assert!(is_text_extension("txt"));
        assert!(is_text_extension("RS"));
        assert!(is_text_extension("md"));
    }

    #[test]
    fn rejects_unknown_and_binary_extensions() {
        assert!(!is_text_extension("png"));
        assert!(!is_text_extension("exe"));
        assert!(!is_text_extension(""));
    }
}
