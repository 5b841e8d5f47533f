use std::fmt::Write as _;

use crate::request::{DocumentDescriptor, SectionSpec};

use super::SectionGenerationResult;

/// Maximum characters of earlier sections carried into a prompt as context.
pub const CONTEXT_CHAR_BUDGET: usize = 6000;

/// Build the prompt for section `index`.
///
/// Earlier accepted sections are appended in document order. When they exceed
/// [`CONTEXT_CHAR_BUDGET`] only the most recent text is kept.
pub fn build_section_prompt(
    doc: &DocumentDescriptor,
    index: usize,
    section: &SectionSpec,
    previous: &[SectionGenerationResult],
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Topic: {}", doc.topic);
    let _ = writeln!(prompt, "Language: {}", doc.language);
    let _ = writeln!(prompt, "Document length: {} pages", doc.page_target);
    let _ = writeln!(prompt, "Section {}: {}", index + 1, section.title);
    if let Some(notes) = &section.notes {
        let _ = writeln!(prompt, "Notes: {notes}");
    }

    let context = previous_context(previous);
    if !context.is_empty() {
        prompt.push_str("\nPreviously written:\n");
        prompt.push_str(&context);
    }
    prompt
}

fn previous_context(previous: &[SectionGenerationResult]) -> String {
    let mut context = String::new();
    for result in previous {
        let _ = writeln!(context, "## {}\n{}", result.title, result.content);
    }
    let excess = context.chars().count().saturating_sub(CONTEXT_CHAR_BUDGET);
    if excess == 0 {
        return context;
    }
    context.chars().skip(excess).collect()
}
