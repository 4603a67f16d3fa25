//! Prompt templates with `{name}` placeholders.
//!
//! `{{` and `}}` render as literal braces, so templates can show JSON examples.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("failed to read prompt template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("template `{template}` uses unknown placeholder `{name}`")]
    UnknownPlaceholder { template: &'static str, name: String },
    #[error("template `{template}` has an unbalanced brace")]
    Unbalanced { template: &'static str },
}

/// One template per Oracle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    DailyPlan,
    Revision,
    WaitingFiller,
    StepOut,
}

impl PromptKind {
    pub const ALL: [PromptKind; 4] = [
        PromptKind::DailyPlan,
        PromptKind::Revision,
        PromptKind::WaitingFiller,
        PromptKind::StepOut,
    ];

    /// File name stem looked up in a prompt directory.
    #[must_use]
    pub const fn file_stem(self) -> &'static str {
        match self {
            PromptKind::DailyPlan => "generate_new_day_plan",
            PromptKind::Revision => "update_day_plan",
            PromptKind::WaitingFiller => "decide_do_what_waiting",
            PromptKind::StepOut => "decide_step_out",
        }
    }

    /// Placeholders the engine fills for this call.
    #[must_use]
    pub const fn placeholders(self) -> &'static [&'static str] {
        match self {
            PromptKind::DailyPlan => &[
                "user_profile",
                "lifestyle",
                "weekday",
                "schedule_sample",
                "activity_list",
            ],
            PromptKind::Revision | PromptKind::StepOut => &[
                "user_profile",
                "lifestyle",
                "weekday",
                "schedule",
                "past_schedule",
                "activity_list",
            ],
            PromptKind::WaitingFiller => &[
                "user_profile",
                "lifestyle",
                "weekday",
                "schedule",
                "past_schedule",
                "activity",
                "event_name",
                "event_time",
                "activity_list",
            ],
        }
    }

    const fn index(self) -> usize {
        match self {
            PromptKind::DailyPlan => 0,
            PromptKind::Revision => 1,
            PromptKind::WaitingFiller => 2,
            PromptKind::StepOut => 3,
        }
    }

    const fn builtin(self) -> &'static str {
        match self {
            PromptKind::DailyPlan => include_str!("../prompts/generate_new_day_plan.txt"),
            PromptKind::Revision => include_str!("../prompts/update_day_plan.txt"),
            PromptKind::WaitingFiller => include_str!("../prompts/decide_do_what_waiting.txt"),
            PromptKind::StepOut => include_str!("../prompts/decide_step_out.txt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
    templates: [String; 4],
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            templates: PromptKind::ALL.map(|kind| kind.builtin().to_string()),
        }
    }
}

impl PromptTemplates {
    /// Built-in templates overridden by any `<stem>` or `<stem>.txt` file in `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self, PromptError> {
        let mut templates = Self::default();
        for kind in PromptKind::ALL {
            let stem = kind.file_stem();
            let candidates = [dir.join(stem), dir.join(format!("{stem}.txt"))];
            let Some(path) = candidates.into_iter().find(|path| path.is_file()) else {
                continue;
            };
            let text = fs::read_to_string(&path).map_err(|source| PromptError::Io {
                path: path.clone(),
                source,
            })?;
            tracing::debug!(template = stem, path = %path.display(), "prompt template override");
            templates.set(kind, text);
        }
        templates.validate()?;
        Ok(templates)
    }

    pub fn set(&mut self, kind: PromptKind, template: impl Into<String>) {
        self.templates[kind.index()] = template.into();
    }

    #[must_use]
    pub fn get(&self, kind: PromptKind) -> &str {
        &self.templates[kind.index()]
    }

    /// Check every template against the placeholders its call provides.
    pub fn validate(&self) -> Result<(), PromptError> {
        for kind in PromptKind::ALL {
            let blanks: Vec<(&str, &str)> =
                kind.placeholders().iter().map(|name| (*name, "")).collect();
            self.render(kind, &blanks)?;
        }
        Ok(())
    }

    /// Substitute `vars` into the template for `kind`.
    pub fn render(&self, kind: PromptKind, vars: &[(&str, &str)]) -> Result<String, PromptError> {
        let template = self.get(kind);
        let name = kind.file_stem();
        let mut out = String::with_capacity(template.len() + 256);
        let mut chars = template.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut key = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => return Err(PromptError::Unbalanced { template: name }),
                            Some(c) => key.push(c),
                        }
                    }
                    let value = vars
                        .iter()
                        .find(|(var, _)| *var == key.trim())
                        .map(|(_, value)| *value)
                        .ok_or_else(|| PromptError::UnknownPlaceholder {
                            template: name,
                            name: key.clone(),
                        })?;
                    out.push_str(value);
                }
                '}' => return Err(PromptError::Unbalanced { template: name }),
                c => out.push(c),
            }
        }
        Ok(out)
    }
}
