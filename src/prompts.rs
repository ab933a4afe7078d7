//! Advisor context prompts
//!
//! Rendered from a JSON prompt configuration (`AGENT_PROMPTS_FILE`). A
//! built-in configuration is used when the file is missing or invalid.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PromptConfig {
    pub portfolio_advisor: AdvisorPrompt,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AdvisorPrompt {
    #[serde(default)]
    pub base_instructions: String,
    #[serde(default)]
    pub tool_usage_guidance: Option<ToolUsageGuidance>,
    #[serde(default)]
    pub communication_style: Option<CommunicationStyle>,
    #[serde(default)]
    pub formatting_guidelines: Vec<String>,
    #[serde(default)]
    pub table_example: Option<TableExample>,
    #[serde(default)]
    pub key_reminders: Vec<String>,
    #[serde(default)]
    pub personality: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ToolUsageGuidance {
    #[serde(default)]
    pub when_to_use_tools: Vec<String>,
    #[serde(default)]
    pub when_not_to_use_tools: Vec<String>,
    #[serde(default)]
    pub tool_combinations: Vec<String>,
    #[serde(default)]
    pub available_tools: Vec<String>,
    #[serde(default)]
    pub news_and_sentiment_guidance: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommunicationStyle {
    #[serde(default)]
    pub approach: String,
    #[serde(default)]
    pub bad_example: Option<StyleExample>,
    #[serde(default)]
    pub good_example: Option<StyleExample>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StyleExample {
    #[serde(default = "default_example_title")]
    pub title: String,
    pub content: ExampleContent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExampleContent {
    Lines(Vec<String>),
    Text(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableExample {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub format: String,
}

fn default_example_title() -> String {
    "Example".to_string()
}

const VOICE_INSTRUCTIONS: &str = "VOICE MODE:
This answer will also be read aloud. Start with a short spoken summary, then the full answer:

**VOICE_SUMMARY**
Two or three plain sentences that sound natural when spoken. No tables, symbols or markdown.

**DETAILED_RESPONSE**
The complete answer with the usual formatting.";

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl PromptConfig {
    /// Minimal configuration used when no prompt file can be read.
    pub fn fallback() -> Self {
        Self {
            portfolio_advisor: AdvisorPrompt {
                base_instructions: "You are a friendly financial advisor helping the owner of Account ID {accountId}."
                    .to_string(),
                tool_usage_guidance: Some(ToolUsageGuidance {
                    when_to_use_tools: owned(&[
                        "Show me my portfolio",
                        "How am I doing?",
                        "What's happening with my investments?",
                    ]),
                    when_not_to_use_tools: owned(&[
                        "General greetings",
                        "Casual conversation",
                        "Thank you messages",
                    ]),
                    ..ToolUsageGuidance::default()
                }),
                communication_style: Some(CommunicationStyle {
                    approach: "Be conversational and friendly.".to_string(),
                    bad_example: Some(StyleExample {
                        title: "Robotic Response".to_string(),
                        content: ExampleContent::Lines(owned(&[
                            "Dry bullet points",
                            "Technical jargon",
                            "No personality",
                        ])),
                    }),
                    good_example: Some(StyleExample {
                        title: "Natural Conversation".to_string(),
                        content: ExampleContent::Text(
                            "Friendly, conversational approach with clear explanations.".to_string(),
                        ),
                    }),
                }),
                formatting_guidelines: owned(&[
                    "Use clear formatting",
                    "Format currency as £1,234.56 (GBP)",
                    "Use UK date formats (DD/MM/YYYY)",
                ]),
                table_example: Some(TableExample {
                    description: "Use tables when appropriate for data presentation".to_string(),
                    format: "| Column 1 | Column 2 |".to_string(),
                }),
                key_reminders: owned(&[
                    "Be helpful and professional",
                    "Focus on actionable insights",
                    "Use conversational language",
                ]),
                personality: "Be the advisor they'd want to grab coffee with!".to_string(),
            },
        }
    }
}

/// Renders the context message for a run.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    config: PromptConfig,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(PromptConfig::fallback())
    }
}

impl PromptBuilder {
    pub fn new(config: PromptConfig) -> Self {
        Self { config }
    }

    /// Load from `path`, falling back to the built-in configuration.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        let parsed = fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<PromptConfig>(&raw).map_err(|e| e.to_string()));

        match parsed {
            Ok(config) => {
                info!(path = %path.display(), "Loaded agent prompt configuration");
                Self::new(config)
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "Using fallback prompt configuration");
                Self::default()
            }
        }
    }

    pub fn context_for(&self, account_id: i64, voice_mode: bool) -> String {
        if voice_mode {
            self.voice_prompt(account_id)
        } else {
            self.advisor_prompt(account_id)
        }
    }

    pub fn voice_prompt(&self, account_id: i64) -> String {
        format!("{}\n\n{}", self.advisor_prompt(account_id), VOICE_INSTRUCTIONS)
    }

    pub fn advisor_prompt(&self, account_id: i64) -> String {
        let advisor = &self.config.portfolio_advisor;
        let mut parts: Vec<String> = Vec::new();

        parts.push(
            advisor
                .base_instructions
                .replace("{accountId}", &account_id.to_string()),
        );
        parts.push(String::new());

        if let Some(guidance) = &advisor.tool_usage_guidance {
            parts.push("WHEN TO USE YOUR TOOLS:".to_string());
            parts.push(
                "You have some great tools at your disposal, but only use them when someone \
                 actually wants portfolio or market information:"
                    .to_string(),
            );
            parts.push(String::new());

            parts.push("✅ Perfect times to use tools:".to_string());
            parts.extend(guidance.when_to_use_tools.iter().map(|e| format!("- \"{}\"", e)));
            parts.push(String::new());

            parts.push("❌ Just have a normal chat for:".to_string());
            parts.extend(guidance.when_not_to_use_tools.iter().map(|e| format!("- \"{}\"", e)));
            parts.push(String::new());

            push_section(&mut parts, "TOOL COMBINATIONS:", &guidance.tool_combinations, "");
            push_section(&mut parts, "YOUR AVAILABLE TOOLS:", &guidance.available_tools, "- ");
            push_section(
                &mut parts,
                "CRITICAL - NEWS AND SENTIMENT TOOLS:",
                &guidance.news_and_sentiment_guidance,
                "",
            );
        }

        if let Some(style) = &advisor.communication_style {
            parts.push("COMMUNICATION STYLE:".to_string());
            parts.push(style.approach.clone());
            parts.push(String::new());

            if let Some(bad) = &style.bad_example {
                parts.push("❌ Avoid this robotic style:".to_string());
                push_example(&mut parts, bad, "- ");
            }
            if let Some(good) = &style.good_example {
                parts.push("✅ Go for this friendly approach:".to_string());
                push_example(&mut parts, good, "");
            }
        }

        push_section(
            &mut parts,
            "FORMATTING THAT FEELS NATURAL:",
            &advisor.formatting_guidelines,
            "- ",
        );

        if let Some(table) = &advisor.table_example {
            parts.push("TABLES WHEN NEEDED:".to_string());
            parts.push(table.description.clone());
            parts.push(String::new());
            parts.push(table.format.clone());
            parts.push(String::new());
        }

        push_section(&mut parts, "REMEMBER:", &advisor.key_reminders, "- ");

        if !advisor.personality.is_empty() {
            parts.push(advisor.personality.clone());
        }

        parts.join("\n")
    }
}

fn push_section(parts: &mut Vec<String>, heading: &str, items: &[String], bullet: &str) {
    if items.is_empty() {
        return;
    }
    parts.push(heading.to_string());
    parts.extend(items.iter().map(|item| format!("{}{}", bullet, item)));
    parts.push(String::new());
}

fn push_example(parts: &mut Vec<String>, example: &StyleExample, bullet: &str) {
    parts.push(format!("## {}", example.title));
    match &example.content {
        ExampleContent::Lines(lines) => {
            parts.extend(lines.iter().map(|line| format!("{}{}", bullet, line)))
        }
        ExampleContent::Text(text) => parts.push(text.clone()),
    }
    parts.push(String::new());
}
