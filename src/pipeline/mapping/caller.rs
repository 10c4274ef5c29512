use super::prompt::{render_prompt, PromptContext, PromptTemplate};
use super::MappingError;
use crate::pipeline::llm::{LlmClient, ModelRouting};

/// Renders a template and sends it to the model routed for its task.
pub struct PromptCaller<'a> {
    llm: &'a dyn LlmClient,
    models: &'a ModelRouting,
}

impl<'a> PromptCaller<'a> {
    pub fn new(llm: &'a dyn LlmClient, models: &'a ModelRouting) -> Self {
        Self { llm, models }
    }

    /// Raw completion for `template`. Rendering errors are returned before
    /// any model call.
    pub fn complete(
        &self,
        template: PromptTemplate,
        context: &PromptContext,
    ) -> Result<String, MappingError> {
        let prompt = render_prompt(template, context)?;
        let task = template.task();
        let model = self.models.model_for(task);

        let raw = self.llm.generate(model, &prompt, task.system_prompt())?;
        tracing::debug!(
            template = template.name(),
            model,
            response_len = raw.len(),
            raw = %raw,
            "LLM completion"
        );
        Ok(raw)
    }
}
