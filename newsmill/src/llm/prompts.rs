//! Prompt builders and the structured answers expected back for each stage.

use serde::Deserialize;

/// Characters of article body shown to the relevance filter.
pub const FILTER_EXCERPT_CHARS: usize = 500;

pub const FILTER_PREAMBLE: &str = "You screen news stories for use as essay material.";
pub const SYNTHESIZE_PREAMBLE: &str =
    "You are a writing tutor turning a news story into essay material.";
pub const DRAFT_PREAMBLE: &str = "Write one example paragraph for an argumentative essay.";
pub const SCORE_PREAMBLE: &str = "Grade an example paragraph written from a piece of essay material.";
pub const REWRITE_PREAMBLE: &str = "Revise an example paragraph using the reviewer's advice.";

const PARAGRAPH_RULES: &str = r#"Output the paragraph only: no title, no notes, no markdown.
Separate lines with a blank line if you need more than one.
The paragraph is 300-400 words, defends one clear claim tied to the themes,
and never refers to "this article" or "the news"; it must read as part of an essay."#;

/// Relevance check. The body is cut to its first `FILTER_EXCERPT_CHARS` characters.
pub fn filter(title: &str, summary: &str, body: &str) -> String {
    let excerpt: String = body.chars().take(FILTER_EXCERPT_CHARS).collect();
    format!(
        r#"{FILTER_PREAMBLE}
Decide whether this story is usable as material for a high-school argumentative essay.
Good material has social meaning, a human story, room for debate or a positive lesson.

Title: {title}
Summary: {summary}
Excerpt: {excerpt}

Answer with a JSON object only:
```json
{{"useful": "yes or no", "reason": "one or two sentences"}}
```"#
    )
}

pub fn synthesize(title: &str, body: &str) -> String {
    format!(
        r#"{SYNTHESIZE_PREAMBLE}
Build one piece of high-school essay material from the story below.

Answer with a JSON object only:
```json
{{"title": "a new title, not the headline", "summary": "200-300 word summary", "themes": "up to five essay themes, comma separated"}}
```

Headline: {title}
Story: {body}"#
    )
}

pub fn draft(title: &str, summary: &str, themes: &str) -> String {
    format!(
        r#"{DRAFT_PREAMBLE}
{PARAGRAPH_RULES}

Material title: {title}
Material summary: {summary}
Material themes: {themes}"#
    )
}

pub fn score(summary: &str, themes: &str, paragraph: &str) -> String {
    format!(
        r#"{SCORE_PREAMBLE}
Decide whether the paragraph is good enough to serve as a model answer.
If the claim drifts from the themes, the reasoning is thin or the language is flat,
say so and give concrete advice.

Answer with a JSON object only:
```json
{{"is_ok": "yes or no", "reason": "short reasons and suggestions"}}
```

Material summary: {summary}
Material themes: {themes}
Paragraph: {paragraph}"#
    )
}

pub fn rewrite(paragraph: &str, advice: &str, summary: &str, themes: &str) -> String {
    format!(
        r#"{REWRITE_PREAMBLE}
You may change the claim if the reviewer found it unsuitable, as long as it stays on the themes.
{PARAGRAPH_RULES}

Paragraph: {paragraph}
Advice: {advice}
Material summary: {summary}
Material themes: {themes}"#
    )
}

/// Reads a yes/no answer. Anything that is not a string starting with "y"
/// (or a JSON `true`) counts as no.
pub fn is_affirmative(answer: Option<&serde_json::Value>) -> bool {
    match answer {
        Some(serde_json::Value::String(s)) => s.trim().to_lowercase().starts_with('y'),
        Some(serde_json::Value::Bool(b)) => *b,
        _ => false,
    }
}

/// Free-form explanation as text: strings as-is, lists of strings joined, other
/// JSON rendered compactly. Missing or null gives an empty string.
pub fn reason_text(reason: Option<&serde_json::Value>) -> String {
    match reason {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        Some(other) => other.to_string(),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterVerdict {
    #[serde(default)]
    pub useful: Option<serde_json::Value>,
    #[serde(default)]
    pub reason: Option<serde_json::Value>,
}

impl FilterVerdict {
    pub fn is_useful(&self) -> bool {
        is_affirmative(self.useful.as_ref())
    }

    pub fn reason_text(&self) -> String {
        reason_text(self.reason.as_ref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScoreVerdict {
    #[serde(default)]
    pub is_ok: Option<serde_json::Value>,
    #[serde(default)]
    pub reason: Option<serde_json::Value>,
}

impl ScoreVerdict {
    pub fn is_ok(&self) -> bool {
        is_affirmative(self.is_ok.as_ref())
    }

    pub fn reason_text(&self) -> String {
        reason_text(self.reason.as_ref())
    }
}

/// Material synthesized from an article. Models sometimes return themes as a list.
#[derive(Debug, Clone, Deserialize)]
pub struct Synthesis {
    pub title: String,
    pub summary: String,
    pub themes: Themes,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Themes {
    Text(String),
    List(Vec<String>),
}

impl Themes {
    pub fn joined(&self) -> String {
        match self {
            Themes::Text(s) => s.trim().to_string(),
            Themes::List(items) => items
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}
