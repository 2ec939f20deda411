//! Carry compaction and eviction.
//!
//! A step response is parsed into recognised sections and compacted into a
//! block titled with the step title:
//!
//! ```text
//! ### Implement
//! Summary: Added the retry loop.
//! Artifacts: src/client.rs
//! ```
//!
//! Blocks are appended whole. When the carry would exceed its budget, whole
//! blocks are evicted from the front, so the newest context survives.

use std::collections::VecDeque;

use tracing::debug;

const BLOCK_PREFIX: &str = "### ";
const BLOCK_SEPARATOR: &str = "\n\n";
const TRUNCATION_MARKER: &str = " [truncated]";

/// Smallest per-section cap after scaling.
const MIN_SECTION_CHARS: usize = 60;

/// Sum of the nominal caps of all carried sections.
const NOMINAL_TOTAL: usize = 900 + 1600 + 900 + 900;

/// Recognised response sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Summary,
    Actions,
    Artifacts,
    Risks,
    Next,
}

impl Section {
    pub const ALL: [Section; 5] = [
        Section::Summary,
        Section::Actions,
        Section::Artifacts,
        Section::Risks,
        Section::Next,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Summary => "Summary",
            Self::Actions => "Actions",
            Self::Artifacts => "Artifacts",
            Self::Risks => "Risks",
            Self::Next => "Next",
        }
    }

    /// Nominal cap in chars. `None` for sections parsed but not carried.
    pub fn nominal_cap(self) -> Option<usize> {
        match self {
            Self::Summary => Some(900),
            Self::Actions => None,
            Self::Artifacts => Some(1600),
            Self::Risks => Some(900),
            Self::Next => Some(900),
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.label().eq_ignore_ascii_case(name))
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Cap for one section given the chars available for section text. Caps
/// scale down together when that is below the nominal total, never below the
/// floor.
pub fn section_cap(section: Section, budget: usize) -> Option<usize> {
    let nominal = section.nominal_cap()?;
    let scaled = if budget >= NOMINAL_TOTAL {
        nominal
    } else {
        nominal * budget / NOMINAL_TOTAL
    };
    Some(scaled.max(MIN_SECTION_CHARS))
}

/// Recognise a heading line such as `## Summary`, `risks:` or
/// `Next: ship it`. Returns the section and any inline text.
fn parse_heading(line: &str) -> Option<(Section, &str)> {
    let stripped = line.trim().trim_start_matches('#').trim_start();
    let (name, inline) = match stripped.split_once(':') {
        Some((name, inline)) => (name, inline.trim()),
        None => (stripped, ""),
    };
    Section::from_name(name.trim()).map(|section| (section, inline))
}

/// Split a response into sections, in canonical order, skipping empty ones.
/// Text before any heading belongs to `Summary`.
pub fn parse_sections(response: &str) -> Vec<(Section, String)> {
    let mut buckets: [Vec<&str>; 5] = Default::default();
    let mut current = Section::Summary;

    for line in response.lines() {
        if let Some((section, inline)) = parse_heading(line) {
            current = section;
            if !inline.is_empty() {
                buckets[current.index()].push(inline);
            }
            continue;
        }
        buckets[current.index()].push(line);
    }

    Section::ALL
        .into_iter()
        .filter_map(|section| {
            let text = buckets[section.index()].join("\n").trim().to_string();
            (!text.is_empty()).then_some((section, text))
        })
        .collect()
}

/// Strip leading `#` so content lines never read as block headers.
fn sanitize_line(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        trimmed.trim_start_matches('#').trim_start()
    } else {
        line
    }
}

/// Cut `text` to at most `max` chars, marking the cut.
fn truncate_marked(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    if max <= marker_len {
        return text.chars().take(max).collect();
    }
    let kept: String = text.chars().take(max - marker_len).collect();
    format!("{}{TRUNCATION_MARKER}", kept.trim_end())
}

/// Chars a section line adds besides its text: newline, label, `": "`.
fn label_overhead(section: Section) -> usize {
    1 + section.label().len() + 2
}

/// Compact one step response into a carry block.
///
/// Section caps are scaled against what is left of `budget` after the title
/// line and label prefixes, so a block fits the budget unless the per-section
/// floor forces it over.
pub fn compact_block(title: &str, response: &str, budget: usize) -> String {
    let title = title.lines().next().unwrap_or("").trim();
    let mut block = format!("{BLOCK_PREFIX}{title}");

    let carried: Vec<(Section, String)> = parse_sections(response)
        .into_iter()
        .filter(|(section, _)| section.nominal_cap().is_some())
        .collect();
    if carried.is_empty() {
        block.push_str("\nSummary: (no output)");
        return block;
    }

    let overhead = block.chars().count()
        + carried
            .iter()
            .map(|(section, _)| label_overhead(*section))
            .sum::<usize>();
    let available = budget.saturating_sub(overhead);

    for (section, text) in carried {
        let Some(cap) = section_cap(section, available) else {
            continue;
        };
        let text = text.lines().map(sanitize_line).collect::<Vec<_>>().join("\n");
        block.push('\n');
        block.push_str(section.label());
        block.push_str(": ");
        block.push_str(&truncate_marked(&text, cap));
    }
    block
}

/// Character-budgeted sequence of step blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Carry {
    budget: usize,
    blocks: VecDeque<String>,
}

impl Carry {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            blocks: VecDeque::new(),
        }
    }

    /// Rebuild a carry from its rendered form, evicting as needed to fit
    /// `budget`.
    pub fn parse(existing: &str, budget: usize) -> Self {
        let mut carry = Self::new(budget);
        let mut current: Vec<&str> = Vec::new();

        for line in existing.lines() {
            if line.starts_with(BLOCK_PREFIX) && !current.is_empty() {
                carry.push_block(join_block(&current));
                current.clear();
            }
            current.push(line);
        }
        if !current.is_empty() {
            carry.push_block(join_block(&current));
        }
        carry
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Compact a step response and append it.
    pub fn append(&mut self, title: &str, response: &str) {
        let block = compact_block(title, response, self.budget);
        self.push_block(block);
    }

    /// Append a block, evicting the oldest whole blocks until it fits. A block
    /// larger than the whole budget is hard-truncated.
    pub fn push_block(&mut self, block: String) {
        let block = truncate_marked(&block, self.budget);
        if block.trim().is_empty() {
            return;
        }

        let block_len = block.chars().count();
        let separator_len = BLOCK_SEPARATOR.len();
        while !self.blocks.is_empty() && self.len() + separator_len + block_len > self.budget {
            if let Some(evicted) = self.blocks.pop_front() {
                debug!(
                    evicted = evicted.lines().next().unwrap_or(""),
                    "Carry block evicted"
                );
            }
        }
        self.blocks.push_back(block);
    }

    /// Length of the rendered carry in chars.
    pub fn len(&self) -> usize {
        if self.blocks.is_empty() {
            return 0;
        }
        let text: usize = self.blocks.iter().map(|b| b.chars().count()).sum();
        text + BLOCK_SEPARATOR.len() * (self.blocks.len() - 1)
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(String::as_str)
    }

    pub fn render(&self) -> String {
        self.blocks
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(BLOCK_SEPARATOR)
    }
}

fn join_block(lines: &[&str]) -> String {
    lines.join("\n").trim().to_string()
}

/// Append a step response to a rendered carry and return the new rendering.
pub fn append_carry(existing: &str, title: &str, response: &str, budget: usize) -> String {
    let mut carry = Carry::parse(existing, budget);
    carry.append(title, response);
    carry.render()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_are_case_insensitive_with_optional_hashes() {
        let sections = parse_sections("## summary\nDone\nRISKS:\nnone\n# Next: ship it");
        assert_eq!(
            sections,
            vec![
                (Section::Summary, "Done".to_string()),
                (Section::Risks, "none".to_string()),
                (Section::Next, "ship it".to_string()),
            ]
        );
    }

    #[test]
    fn unsectioned_text_is_summary() {
        let sections = parse_sections("I changed the parser.\n\n## Artifacts\nsrc/parse.rs");
        assert_eq!(sections[0], (Section::Summary, "I changed the parser.".to_string()));
        assert_eq!(sections[1], (Section::Artifacts, "src/parse.rs".to_string()));
    }

    #[test]
    fn prose_lines_are_not_headings() {
        let sections = parse_sections("Next we refactor the cache.");
        assert_eq!(sections, vec![(Section::Summary, "Next we refactor the cache.".to_string())]);
    }

    #[test]
    fn actions_are_not_carried() {
        let block = compact_block("Plan", "## Summary\nOk\n## Actions\nran tests", 4300);
        assert!(block.contains("Summary: Ok"));
        assert!(!block.contains("ran tests"));
    }

    #[test]
    fn caps_scale_with_floor() {
        assert_eq!(section_cap(Section::Summary, 10_000), Some(900));
        assert_eq!(section_cap(Section::Artifacts, 4300), Some(1600));
        assert_eq!(section_cap(Section::Summary, 2150), Some(450));
        assert_eq!(section_cap(Section::Risks, 100), Some(MIN_SECTION_CHARS));
        assert_eq!(section_cap(Section::Actions, 4300), None);
    }

    #[test]
    fn oversized_section_is_marked() {
        let response = format!("## Summary\n{}", "a".repeat(2000));
        let block = compact_block("Step", &response, 10_000);
        let summary = block.lines().nth(1).unwrap();
        let body = summary.strip_prefix("Summary: ").unwrap();
        assert!(body.ends_with(TRUNCATION_MARKER));
        assert_eq!(body.chars().count(), 900);
    }

    #[test]
    fn full_block_fits_budget_before_eviction() {
        let body = "z".repeat(3000);
        let response = format!(
            "## Summary\n{body}\n## Artifacts\n{body}\n## Risks\n{body}\n## Next\n{body}"
        );
        let block = compact_block("Implement", &response, 1000);
        assert!(block.chars().count() <= 1000);

        let overhead = "### Implement".len()
            + [Section::Summary, Section::Artifacts, Section::Risks, Section::Next]
                .into_iter()
                .map(label_overhead)
                .sum::<usize>();
        let next_cap = section_cap(Section::Next, 1000 - overhead).unwrap();
        let next = block
            .lines()
            .find_map(|l| l.strip_prefix("Next: "))
            .unwrap();
        assert_eq!(next.chars().count(), next_cap);

        let mut carry = Carry::new(1000);
        carry.push_block(block.clone());
        assert_eq!(carry.render(), block);
    }

    #[test]
    fn content_hashes_are_stripped() {
        let block = compact_block("Step", "### not a block\ntext", 4300);
        assert_eq!(block.lines().filter(|l| l.starts_with(BLOCK_PREFIX)).count(), 1);
    }

    #[test]
    fn empty_response_gets_placeholder() {
        assert_eq!(compact_block("Step", "  \n", 4300), "### Step\nSummary: (no output)");
    }

    #[test]
    fn summary_heading_reaches_next_step() {
        let carry = append_carry("", "A", "## Summary\nDone", 6000);
        assert!(carry.contains("Summary"));
        assert!(carry.contains("Done"));
    }

    #[test]
    fn eviction_drops_whole_old_block() {
        let existing = format!("### Old\n{}", "x".repeat(300));
        let carry = append_carry(&existing, "New", "ok", 150);

        assert!(!carry.contains("Old"));
        assert!(carry.starts_with("### New"));
        assert!(carry.chars().count() <= 150);
    }

    #[test]
    fn eviction_keeps_newest_blocks() {
        let mut carry = Carry::new(70);
        for title in ["One", "Two", "Three"] {
            carry.append(title, "short result");
        }
        let titles: Vec<&str> = carry.blocks().map(|b| b.lines().next().unwrap()).collect();
        assert_eq!(titles, vec!["### Two", "### Three"]);
        assert!(carry.len() <= 70);
        assert_eq!(carry.len(), carry.render().chars().count());
    }

    #[test]
    fn single_oversized_block_is_truncated() {
        let mut carry = Carry::new(50);
        carry.append("Huge", &"word ".repeat(100));
        assert_eq!(carry.blocks().count(), 1);
        assert!(carry.len() <= 50);
        assert!(carry.render().ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn parse_round_trips_blocks() {
        let mut carry = Carry::new(6000);
        carry.append("A", "first");
        carry.append("B", "## Risks\nflaky test");
        let reparsed = Carry::parse(&carry.render(), 6000);
        assert_eq!(reparsed, carry);
    }
}
