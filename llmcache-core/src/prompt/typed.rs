//! Typed wrappers over `PromptCache::get`/`set` for the common categories.
//! They only build the content key and pick the value type.

use super::cache::PromptCache;
use super::types::PromptCategory;
use crate::core::error::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;

fn join(parts: &[&str]) -> String {
    parts.join("|")
}

impl PromptCache {
    pub async fn get_embedding(&self, text: &str) -> Result<Option<Vec<f32>>> {
        self.get(PromptCategory::Embedding, text).await
    }

    pub async fn set_embedding(&self, text: &str, embedding: &[f32]) -> Result<()> {
        self.set(PromptCategory::Embedding, text, embedding).await
    }

    /// Response for `system_prompt|user_message`
    pub async fn get_system_response(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<Option<String>> {
        self.get(PromptCategory::SystemPrompt, &join(&[system_prompt, user_message]))
            .await
    }

    pub async fn set_system_response(
        &self,
        system_prompt: &str,
        user_message: &str,
        response: &str,
    ) -> Result<()> {
        self.set(
            PromptCategory::SystemPrompt,
            &join(&[system_prompt, user_message]),
            response,
        )
        .await
    }

    /// Response for `template_id|rendered_variables`
    pub async fn get_template_response(
        &self,
        template_id: &str,
        rendered_variables: &str,
    ) -> Result<Option<String>> {
        self.get(
            PromptCategory::TemplatePrompt,
            &join(&[template_id, rendered_variables]),
        )
        .await
    }

    pub async fn set_template_response(
        &self,
        template_id: &str,
        rendered_variables: &str,
        response: &str,
    ) -> Result<()> {
        self.set(
            PromptCategory::TemplatePrompt,
            &join(&[template_id, rendered_variables]),
            response,
        )
        .await
    }

    /// Output of `workflow_id|step_id|input`
    pub async fn get_workflow_step<T: DeserializeOwned>(
        &self,
        workflow_id: &str,
        step_id: &str,
        input: &str,
    ) -> Result<Option<T>> {
        self.get(
            PromptCategory::WorkflowStep,
            &join(&[workflow_id, step_id, input]),
        )
        .await
    }

    pub async fn set_workflow_step<T: Serialize + ?Sized>(
        &self,
        workflow_id: &str,
        step_id: &str,
        input: &str,
        output: &T,
    ) -> Result<()> {
        self.set(
            PromptCategory::WorkflowStep,
            &join(&[workflow_id, step_id, input]),
            output,
        )
        .await
    }

    /// Results for `knowledge_base_id|query`
    pub async fn get_rag_results<T: DeserializeOwned>(
        &self,
        knowledge_base_id: &str,
        query: &str,
    ) -> Result<Option<T>> {
        self.get(PromptCategory::RagResult, &join(&[knowledge_base_id, query]))
            .await
    }

    pub async fn set_rag_results<T: Serialize + ?Sized>(
        &self,
        knowledge_base_id: &str,
        query: &str,
        results: &T,
    ) -> Result<()> {
        self.set(
            PromptCategory::RagResult,
            &join(&[knowledge_base_id, query]),
            results,
        )
        .await
    }
}
