//! Search-query parsing for `/searchthreads`.
//!
//! Queries are either plain topic text or `prefix:content`, where the
//! prefix picks a variant kind to search in. Unknown prefixes silently fall
//! back to topic search.

/// How a search query should be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryMode {
    Topic(String),
    Variant { variant: &'static str, content: String },
}

/// Map a query prefix onto a wire variant tag. Aliases include the German
/// terms the frontend exposes.
fn prefix_variant(prefix: &str) -> Option<&'static str> {
    let variant = match prefix {
        // user variants
        "user" | "u" | "input" | "me" | "question" | "request" | "i" | "benutzer"
        | "eingabe" => "User",
        // assistant variants
        "ai" | "a" | "assistant" | "frevagpt" | "freva-gpt" | "freva_gpt" | "answer" | "ki"
        | "assistent" | "computer" => "Assistant",
        // code input variants
        "code_input" | "ci" | "code" | "codeinput" | "python" | "py" => "Code",
        // code output variants
        "code_output" | "co" | "codeoutput" | "output" | "ausgabe" | "ergebnis" => "CodeOutput",
        _ => return None,
    };
    Some(variant)
}

/// Decide the search mode for a raw query (case-insensitive).
pub fn parse_query_mode(query: &str) -> QueryMode {
    let q = query.trim().to_lowercase();

    let Some((prefix, content)) = q.split_once(':') else {
        return QueryMode::Topic(q);
    };

    match prefix_variant(prefix.trim()) {
        Some(variant) => QueryMode::Variant {
            variant,
            content: content.trim().to_string(),
        },
        // Unknown prefix falls back to topic search, not an error.
        None => QueryMode::Topic(q),
    }
}
