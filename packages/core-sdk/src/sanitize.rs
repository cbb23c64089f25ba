use crate::models::ProviderKind;

/** \brief Longest `name` OpenAI accepts. */
pub const MAX_NAME_LEN: usize = 64;

/** \brief Used when a strict provider receives an empty name. */
pub const FALLBACK_NAME: &str = "anonymous";

/**
 * \brief Turn a display name into something the provider will accept as a message `name`.
 * \details Strict providers get every char outside `[A-Za-z0-9_-]` replaced by `_`,
 *          truncated to 64 chars, never empty. Permissive providers get the name back as is.
 */
pub fn sanitize_name(name: &str, kind: ProviderKind) -> String {
    if !kind.is_strict() {
        return name.to_string();
    }
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();
    if sanitized.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        sanitized
    }
}
