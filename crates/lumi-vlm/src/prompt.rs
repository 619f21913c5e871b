use minijinja::{context, AutoEscape, Environment};
use serde::{Deserialize, Serialize};

/// Errors produced while rendering prompts.
#[derive(thiserror::Error, Debug)]
pub enum PromptError {
    #[error(transparent)]
    Template(#[from] minijinja::Error),

    #[error("invalid input: rendered turn has {markers} image markers but {images} images were given")]
    ImageCountMismatch { markers: usize, images: usize },

    #[error("message history mismatch: {0}")]
    HistoryMismatch(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,      // prompt
    Assistant, // the model's response
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "lowercase")]
pub enum Line {
    Text { text: String },
    Image,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<Line>,
}

impl Message {
    pub fn user(content: Vec<Line>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![Line::Text { text: text.into() }])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![Line::Text { text: text.into() }],
        }
    }

    /// Concatenation of every text line.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|line| match line {
                Line::Text { text } => Some(text.as_str()),
                Line::Image => None,
            })
            .collect()
    }

    pub fn image_count(&self) -> usize {
        self.content
            .iter()
            .filter(|line| matches!(line, Line::Image))
            .count()
    }

    /// The same message with every image line dropped.
    pub fn text_only(&self) -> Self {
        Self {
            role: self.role,
            content: self
                .content
                .iter()
                .filter(|line| !matches!(line, Line::Image))
                .cloned()
                .collect(),
        }
    }
}

/// A piece of a rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSegment {
    Text(String),
    Image,
}

const USER_TURN_START: &str = "<start_of_turn>user\n";
const MODEL_TURN_START: &str = "<start_of_turn>model\n";
const TURN_END: &str = "<end_of_turn>\n";

const GEMMA_CHAT_TEMPLATE: &str = "{% if system_prompt %}{{ system_prompt }}\n{% endif %}\
{% for message in messages %}\
{% if message['role'] == 'system' %}\
{% for line in message['content'] %}{% if line['type'] == 'text' %}{{ line['text'] }}{% endif %}{% endfor %}\n\
{% else %}\
<start_of_turn>{% if message['role'] == 'user' %}user{% else %}model{% endif %}\n\
{% for line in message['content'] %}{% if line['type'] == 'text' %}{{ line['text'] }}{% elif line['type'] == 'image' %}{{ image_marker }}{% endif %}{% endfor %}\
<end_of_turn>\n\
{% endif %}\
{% endfor %}\
{% if add_generation_prompt %}<start_of_turn>model\n{% endif %}";

/// Turns a message history into prompt text.
///
/// Templates see `messages`, `system_prompt`, `image_marker` and `add_generation_prompt`.
#[derive(Debug, Clone)]
pub struct ChatTemplate {
    env: Environment<'static>,
    image_marker: String,
}

impl ChatTemplate {
    pub const DEFAULT_IMAGE_MARKER: &'static str = "<start_of_image>";

    /// Gemma style turns: `<start_of_turn>user\n...<end_of_turn>\n`.
    pub fn gemma() -> Result<Self, PromptError> {
        Self::from_source(GEMMA_CHAT_TEMPLATE, Self::DEFAULT_IMAGE_MARKER)
    }

    /// Compile a custom jinja chat template.
    pub fn from_source(
        source: impl Into<String>,
        image_marker: impl Into<String>,
    ) -> Result<Self, PromptError> {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.add_template_owned("chat", source.into())?;

        Ok(Self {
            env,
            image_marker: image_marker.into(),
        })
    }

    pub fn image_marker(&self) -> &str {
        &self.image_marker
    }

    pub fn render(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        add_generation_prompt: bool,
    ) -> Result<String, PromptError> {
        let template = self.env.get_template("chat")?;
        Ok(template.render(context! {
            messages => messages,
            system_prompt => system_prompt,
            image_marker => &self.image_marker,
            add_generation_prompt => add_generation_prompt,
        })?)
    }

    /// Split rendered text at the image markers. Empty text pieces are skipped.
    pub fn segments(&self, rendered: &str) -> Vec<PromptSegment> {
        let mut segments = Vec::new();
        for (i, piece) in rendered.split(self.image_marker.as_str()).enumerate() {
            if i > 0 {
                segments.push(PromptSegment::Image);
            }
            if !piece.is_empty() {
                segments.push(PromptSegment::Text(piece.to_string()));
            }
        }
        segments
    }

    pub fn render_segments(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        add_generation_prompt: bool,
    ) -> Result<Vec<PromptSegment>, PromptError> {
        let rendered = self.render(messages, system_prompt, add_generation_prompt)?;
        Ok(self.segments(&rendered))
    }
}

/// Personality of the assistant.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    #[default]
    Lumi,
    ExecutiveCoach,
    Enthusiastic,
    Witty,
    Custom(String),
}

impl Persona {
    pub fn text(&self) -> &str {
        match self {
            Persona::Lumi => "You are Lumi, a friendly and concise human like assistant.",
            Persona::ExecutiveCoach => "You are a calm, professional assistant with the tone of an executive coach. You speak with clarity, avoid repetition, and focus on providing insight over small talk. Your responses are direct, thoughtful, and geared toward helping the user think critically.",
            Persona::Enthusiastic => "You are Lumi, an incredibly helpful and enthusiastic assistant! You love using exclamation points and encouraging words, always maintaining a positive and supportive tone.",
            Persona::Witty => "You are Lumi. You're helpful, but with a dry, witty, and slightly sarcastic sense of humor. Don't be afraid to be a little cheeky, but remain ultimately helpful and don't be rude.",
            Persona::Custom(text) if text.trim().is_empty() => Persona::Lumi.text(),
            Persona::Custom(text) => text,
        }
    }
}

/// How much past conversation is replayed into a fresh context.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct HistoryWindow {
    /// A turn is one user message and one assistant message.
    pub max_turns: usize,
    /// Budget over the formatted turns, in characters.
    pub max_chars: usize,
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self {
            max_turns: 10,
            max_chars: 4200,
        }
    }
}

impl HistoryWindow {
    /// Newest messages that fit the window, in chronological order.
    ///
    /// Messages are added newest first until one no longer fits the character budget.
    pub fn select<'a>(&self, messages: &'a [Message]) -> &'a [Message] {
        let recent = &messages[messages.len().saturating_sub(self.max_turns * 2)..];

        let mut used = 0;
        let mut start = recent.len();
        for message in recent.iter().rev() {
            let len = formatted_len(message);
            if used + len > self.max_chars {
                break;
            }
            used += len;
            start -= 1;
        }
        &recent[start..]
    }
}

fn formatted_len(message: &Message) -> usize {
    let overhead = match message.role {
        Role::User => USER_TURN_START.len() + TURN_END.len(),
        Role::Assistant => MODEL_TURN_START.len() + TURN_END.len(),
        Role::System => 1,
    };
    overhead + message.text().chars().count()
}

/// User facing prompt settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PromptConfig {
    pub persona: Persona,
    pub user_name: String,
    pub user_about: String,
    pub history: HistoryWindow,
}

impl PromptConfig {
    const GROUNDING: &'static str = " If you don't know an answer do not make one up. Do not repeat back a query when answering. Pay close attention to the conversation history.";

    /// Compose the system prompt, optionally stamped with a preformatted clock.
    pub fn system_prompt(&self, clock: Option<&str>) -> String {
        let mut prompt = self.persona.text().to_string();
        if !self.user_name.is_empty() {
            prompt.push_str(&format!(" Your primary user is {}.", self.user_name));
        }
        if !self.user_about.is_empty() {
            prompt.push_str(&format!(" Here's a bit about them: {}.", self.user_about));
        }
        prompt.push_str(Self::GROUNDING);
        if let Some(clock) = clock {
            prompt.push_str(&format!(" [System Clock: {clock}]"));
        }
        prompt
    }
}
