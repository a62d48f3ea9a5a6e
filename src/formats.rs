//! Response Format Registry
//!
//! Maps each agent category to a structured output contract:
//! - Ordered named sections with per-section word floors
//! - Aggregate minimum word count per response
//! - Formatting flags (code blocks, tables)
//!
//! Also owns prompt augmentation (`build_prompt`) and the best-effort
//! section parser that splits raw model output along declared section
//! titles, falling back to a single "raw" section when no marker is found.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::catalog::{AgentCategory, AgentProfile};

/// Section id used before (or without) recognized section boundaries
pub const RAW_SECTION: &str = "raw";

/// Word floor applied when a category has no registered format
pub const DEFAULT_MIN_WORDS: usize = 50;

/// One named section of a structured response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionSpec {
    /// Stable identifier (snake_case)
    pub id: String,
    /// Human-readable title, used as the section marker in model output
    pub title: String,
    /// Whether the section must appear
    pub required: bool,
    /// Minimum words expected in this section
    pub min_words: usize,
}

impl SectionSpec {
    fn new(id: &str, title: &str, required: bool, min_words: usize) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            required,
            min_words,
        }
    }
}

/// Output contract for one agent category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFormat {
    pub category: AgentCategory,
    /// Ordered section specs
    pub sections: Vec<SectionSpec>,
    /// Aggregate word floor across the whole response
    pub min_total_words: usize,
    pub supports_code_blocks: bool,
    pub supports_tables: bool,
}

/// A parsed slice of agent output, keyed by section id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionContent {
    pub id: String,
    pub text: String,
}

// Markdown section markers: `## Title` headings or standalone `**Title**` lines
static SECTION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s{0,3}(?:#{1,6}\s+(.+?)\s*#*|\*\*([^*\n]+?)\*\*:?)\s*$").unwrap()
});

impl ResponseFormat {
    fn new(category: AgentCategory, min_total_words: usize, sections: Vec<SectionSpec>) -> Self {
        Self {
            category,
            sections,
            min_total_words,
            supports_code_blocks: false,
            supports_tables: false,
        }
    }

    fn with_code_blocks(mut self) -> Self {
        self.supports_code_blocks = true;
        self
    }

    fn with_tables(mut self) -> Self {
        self.supports_tables = true;
        self
    }

    /// Look up a declared section by its marker title (case-insensitive)
    fn section_for_title(&self, title: &str) -> Option<&SectionSpec> {
        let normalized = title.trim().trim_end_matches(':').to_lowercase();
        self.sections
            .iter()
            .find(|s| s.title.to_lowercase() == normalized || s.id == normalized)
    }

    /// Split raw model output into sections along declared titles.
    ///
    /// Best-effort: markers are matched case-insensitively against the
    /// declared section titles; headings that match nothing stay inside the
    /// surrounding section. Text before the first recognized marker, or the
    /// whole output when no marker matches, lands in a single "raw" section.
    pub fn split_sections(&self, raw: &str) -> Vec<SectionContent> {
        // (byte offset of body start, section id) per recognized marker
        let mut anchors: Vec<(usize, usize, String)> = Vec::new();
        for caps in SECTION_MARKER.captures_iter(raw) {
            let title = caps.get(1).or_else(|| caps.get(2));
            let Some(title) = title else { continue };
            if let Some(spec) = self.section_for_title(title.as_str()) {
                let Some(whole) = caps.get(0) else { continue };
                anchors.push((whole.start(), whole.end(), spec.id.clone()));
            }
        }

        if anchors.is_empty() {
            let text = raw.trim();
            if text.is_empty() {
                return Vec::new();
            }
            return vec![SectionContent {
                id: RAW_SECTION.to_string(),
                text: text.to_string(),
            }];
        }

        let mut sections = Vec::with_capacity(anchors.len() + 1);

        // Preamble before the first marker keeps the raw sentinel
        let preamble = raw[..anchors[0].0].trim();
        if !preamble.is_empty() {
            sections.push(SectionContent {
                id: RAW_SECTION.to_string(),
                text: preamble.to_string(),
            });
        }

        for (i, (_, body_start, id)) in anchors.iter().enumerate() {
            let body_end = anchors.get(i + 1).map(|a| a.0).unwrap_or(raw.len());
            sections.push(SectionContent {
                id: id.clone(),
                text: raw[*body_start..body_end].trim().to_string(),
            });
        }

        sections
    }
}

/// Registry of response formats, keyed by agent category
pub struct FormatRegistry {
    formats: HashMap<AgentCategory, ResponseFormat>,
}

impl FormatRegistry {
    /// Build a registry from explicit formats
    pub fn new(formats: Vec<ResponseFormat>) -> Self {
        Self {
            formats: formats.into_iter().map(|f| (f.category, f)).collect(),
        }
    }

    /// Registry covering every builtin category
    pub fn builtin() -> Self {
        Self::new(vec![
            ResponseFormat::new(
                AgentCategory::Analysis,
                100,
                vec![
                    SectionSpec::new("summary", "Summary", true, 20),
                    SectionSpec::new("findings", "Findings", true, 50),
                    SectionSpec::new("recommendations", "Recommendations", false, 20),
                ],
            )
            .with_tables(),
            ResponseFormat::new(
                AgentCategory::Creative,
                50,
                vec![
                    SectionSpec::new("draft", "Draft", true, 40),
                    SectionSpec::new("notes", "Notes", false, 10),
                ],
            ),
            ResponseFormat::new(
                AgentCategory::Technical,
                120,
                vec![
                    SectionSpec::new("overview", "Overview", true, 20),
                    SectionSpec::new("implementation", "Implementation", true, 60),
                    SectionSpec::new("caveats", "Caveats", false, 15),
                ],
            )
            .with_code_blocks()
            .with_tables(),
            ResponseFormat::new(
                AgentCategory::Research,
                110,
                vec![
                    SectionSpec::new("summary", "Summary", true, 25),
                    SectionSpec::new("findings", "Findings", true, 60),
                    SectionSpec::new("open_questions", "Open Questions", false, 10),
                ],
            )
            .with_tables(),
            ResponseFormat::new(
                AgentCategory::Planning,
                80,
                vec![
                    SectionSpec::new("objective", "Objective", true, 15),
                    SectionSpec::new("steps", "Steps", true, 45),
                    SectionSpec::new("risks", "Risks", false, 15),
                ],
            )
            .with_tables(),
        ])
    }

    /// Get the format contract for a category
    pub fn format_for(&self, category: AgentCategory) -> Option<&ResponseFormat> {
        self.formats.get(&category)
    }

    /// Aggregate word floor for an agent, resolved through its category.
    /// Falls back to an explicit default floor when the category is unmapped.
    pub fn min_words_for(&self, profile: &AgentProfile) -> usize {
        self.formats
            .get(&profile.category)
            .map(|f| f.min_total_words)
            .unwrap_or(DEFAULT_MIN_WORDS)
    }

    /// Append formatting instructions to a base system prompt.
    ///
    /// Pure: identical inputs always produce identical output, so the
    /// instructed structure is testable by equality. An unmapped category
    /// returns the base prompt untouched.
    pub fn build_prompt(&self, category: AgentCategory, base_prompt: &str) -> String {
        let Some(format) = self.formats.get(&category) else {
            return base_prompt.to_string();
        };

        let mut prompt = String::with_capacity(base_prompt.len() + 256);
        prompt.push_str(base_prompt);
        prompt.push_str("\n\nStructure your response as markdown using exactly these sections:\n");

        for section in &format.sections {
            let requirement = if section.required { "required" } else { "optional" };
            prompt.push_str(&format!(
                "\n## {}\n({}, at least {} words)\n",
                section.title, requirement, section.min_words
            ));
        }

        prompt.push_str(&format!(
            "\nWrite at least {} words in total.",
            format.min_total_words
        ));
        prompt.push_str(if format.supports_code_blocks {
            " Fenced code blocks are allowed."
        } else {
            " Do not use code blocks."
        });
        prompt.push_str(if format.supports_tables {
            " Markdown tables are allowed."
        } else {
            " Do not use tables."
        });

        prompt
    }
}

/// Whitespace-delimited word count
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis_format() -> ResponseFormat {
        FormatRegistry::builtin()
            .format_for(AgentCategory::Analysis)
            .unwrap()
            .clone()
    }

    #[test]
    fn test_builtin_covers_all_categories() {
        let registry = FormatRegistry::builtin();
        for category in AgentCategory::all() {
            assert!(
                registry.format_for(*category).is_some(),
                "missing format for {}",
                category.as_str()
            );
        }
    }

    #[test]
    fn test_build_prompt_is_pure() {
        let registry = FormatRegistry::builtin();
        let a = registry.build_prompt(AgentCategory::Analysis, "You analyze things.");
        let b = registry.build_prompt(AgentCategory::Analysis, "You analyze things.");
        assert_eq!(a, b);
    }

    #[test]
    fn test_build_prompt_embeds_contract() {
        let registry = FormatRegistry::builtin();
        let prompt = registry.build_prompt(AgentCategory::Analysis, "Base.");

        assert!(prompt.starts_with("Base."));
        assert!(prompt.contains("## Summary"));
        assert!(prompt.contains("## Findings"));
        assert!(prompt.contains("at least 100 words in total"));
    }

    #[test]
    fn test_split_sections_by_headings() {
        let format = analysis_format();
        let raw = "## Summary\nShort overview here.\n\n## Findings\nDetailed findings body.\n\n## Recommendations\nDo the thing.";

        let sections = format.split_sections(raw);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].id, "summary");
        assert_eq!(sections[0].text, "Short overview here.");
        assert_eq!(sections[1].id, "findings");
        assert_eq!(sections[2].id, "recommendations");
    }

    #[test]
    fn test_split_sections_bold_markers() {
        let format = analysis_format();
        let raw = "**Summary**\nOverview.\n\n**Findings:**\nBody.";

        let sections = format.split_sections(raw);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].id, "summary");
        assert_eq!(sections[1].id, "findings");
    }

    #[test]
    fn test_split_sections_fallback_to_raw() {
        let format = analysis_format();
        let sections = format.split_sections("Just a plain paragraph with no markers.");

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].id, RAW_SECTION);
        assert_eq!(sections[0].text, "Just a plain paragraph with no markers.");
    }

    #[test]
    fn test_split_sections_preamble_kept_as_raw() {
        let format = analysis_format();
        let raw = "Intro text before any section.\n\n## Summary\nOverview.";

        let sections = format.split_sections(raw);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].id, RAW_SECTION);
        assert_eq!(sections[0].text, "Intro text before any section.");
        assert_eq!(sections[1].id, "summary");
    }

    #[test]
    fn test_split_sections_ignores_undeclared_headings() {
        let format = analysis_format();
        let raw = "## Summary\nOverview.\n\n## Appendix\nExtra text stays in summary.";

        let sections = format.split_sections(raw);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].id, "summary");
        assert!(sections[0].text.contains("Extra text"));
    }

    #[test]
    fn test_min_words_default_floor() {
        let registry = FormatRegistry::new(vec![]);
        let profile = crate::catalog::builtin_profiles()
            .into_iter()
            .next()
            .unwrap();

        assert_eq!(registry.min_words_for(&profile), DEFAULT_MIN_WORDS);
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("one two  three\nfour"), 4);
    }
}
