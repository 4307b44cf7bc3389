use serde::Serialize;
use snafu::ResultExt;
use tera::{Context as TeraContext, Tera};

use super::flow::{FlowResult, TemplateContextSnafu, TemplateRenderSnafu};

/// Named prompt body rendered with tera against the serialized flow input.
///
/// Input structs serialize with camelCase keys, so templates reference
/// `{{ targetLanguage }}`, not `{{ target_language }}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub preamble: Option<&'static str>,
    pub body: &'static str,
}

impl PromptTemplate {
    pub const fn new(name: &'static str, body: &'static str) -> Self {
        Self {
            name,
            preamble: None,
            body,
        }
    }

    pub const fn with_preamble(mut self, preamble: &'static str) -> Self {
        self.preamble = Some(preamble);
        self
    }

    pub fn render<I>(&self, input: &I) -> FlowResult<String>
    where
        I: Serialize,
    {
        let context = TeraContext::from_serialize(input).context(TemplateContextSnafu {
            stage: "template-build-context",
            template: self.name,
        })?;

        // Prompts are plain text; HTML escaping would mangle user messages.
        Tera::one_off(self.body, &context, false).context(TemplateRenderSnafu {
            stage: "template-render",
            template: self.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Sample {
        target_language: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
        tags: Vec<String>,
    }

    const TEMPLATE: PromptTemplate = PromptTemplate::new(
        "sample",
        "To {{ targetLanguage }}: {{ message }}{% if note %} ({{ note }}){% endif %} [{{ tags | join(sep=\", \") }}]",
    );

    #[test]
    fn renders_camel_case_fields_without_escaping() {
        let rendered = TEMPLATE
            .render(&Sample {
                target_language: "Hindi".to_string(),
                message: "Tom & Jerry <3".to_string(),
                note: None,
                tags: vec!["a".to_string(), "b".to_string()],
            })
            .unwrap();

        assert_eq!(rendered, "To Hindi: Tom & Jerry <3 [a, b]");
    }

    #[test]
    fn optional_sections_render_when_present() {
        let rendered = TEMPLATE
            .render(&Sample {
                target_language: "Urdu".to_string(),
                message: "hi".to_string(),
                note: Some("casual".to_string()),
                tags: Vec::new(),
            })
            .unwrap();

        assert_eq!(rendered, "To Urdu: hi (casual) []");
    }

    #[test]
    fn broken_template_is_a_render_error() {
        let broken = PromptTemplate::new("broken", "{{ unclosed");
        let error = broken
            .render(&Sample {
                target_language: String::new(),
                message: String::new(),
                note: None,
                tags: Vec::new(),
            })
            .unwrap_err();

        assert!(error.to_string().contains("broken"));
    }
}
