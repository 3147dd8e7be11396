//! Instruction prompts for the filename classifier.
//!
//! Centralising the prompts here serves two purposes:
//!
//! 1. **Single source of truth** — changing the filename pattern or adding a
//!    constraint requires editing exactly one place.
//!
//! 2. **Testability** — unit tests can inspect the prompts directly without
//!    a live model, so a prompt regression shows up in CI.
//!
//! The classifier sends [`FILENAME_PROMPT`] with every request; when a
//! response cannot be sanitised into a filename, exactly one retry is made
//! with [`STRICT_RETRY_PROMPT`] appended.

/// Instruction sent with the extracted document content.
///
/// The `DATE_ENTITY_DOCTYPE_ID` pattern keeps filed documents sortable by
/// date and grep-able by issuer. The "no extension" rule matters: the
/// pipeline appends `.pdf` itself and must not end up with `name.pdf.pdf`.
pub const FILENAME_PROMPT: &str = "\
Analyse the following document and produce a filename in the format \
YYYY-MM-DD_ENTITY_DOCTYPE_ID, e.g. 2024-05-01_AcmeCorp_Invoice_998. \
Use the document date, the issuing company or person, the document type, \
and any reference number you can find. Return only the filename, without \
an extension.";

/// Appended for the single retry after an unusable response.
///
/// Models that disobey the first prompt usually add prose, quotes, or a
/// second line; the retry spells out the mechanical constraints.
pub const STRICT_RETRY_PROMPT: &str = "\
Your previous answer was not a usable filename. Answer with EXACTLY one \
line containing only the filename. No explanation, no quotes, no file \
extension, no spaces - use underscores, and only letters, digits, '_' \
and '-'.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_states_pattern_and_no_extension() {
        assert!(FILENAME_PROMPT.contains("YYYY-MM-DD_ENTITY_DOCTYPE_ID"));
        assert!(FILENAME_PROMPT.contains("without"));
    }

    #[test]
    fn strict_prompt_forbids_extra_output() {
        assert!(STRICT_RETRY_PROMPT.contains("EXACTLY one"));
        assert!(STRICT_RETRY_PROMPT.contains("No explanation"));
    }
}
