use std::sync::Arc;

use crate::pipeline::{OutputParser, Pipeline};
use crate::prompt::ChatPromptTemplate;
use crate::runner::PipelineRunner;
use crate::utils::llm::{Complete, Role};

pub const INPUT_KEY: &str = "user_query";

const SYSTEM_PROMPT: &str = "You are a highly skilled code assistant. Your task is to generate accurate and functional code \
based on the user's input or query. If the user specifies a programming language, use that language; otherwise, default to \
Python. Ensure the code is correct and free from errors. In addition to the code, provide comments that explain the main \
functionality of each part. Offer a step-by-step explanation of the code, including the reasoning behind the chosen approach \
or methods used to solve the problem. Keep explanations concise and informative. Avoid any incorrect or hallucinated \
information. If applicable, also generate boilerplate code to help the user get started with the necessary structure and setup.";

pub fn prompt() -> ChatPromptTemplate {
    ChatPromptTemplate::new()
        .with_literal(Role::System, SYSTEM_PROMPT)
        .with_user(format!("{{{}}}", INPUT_KEY))
}

/// `query` → generated code with explanations.
pub fn runner(model: Arc<dyn Complete>) -> PipelineRunner {
    let pipeline = Pipeline::new()
        .prompt(prompt(), model)
        .parse(OutputParser::Str);
    PipelineRunner::new(pipeline, INPUT_KEY)
}

#[cfg(test)]
mod test_code_generation {
    use std::sync::Arc;
    use super::runner;
    use crate::test_utils::ScriptedModel;
    use crate::utils::llm::Role;

    #[tokio::test]
    async fn test_prompt_shape() {
        let model = Arc::new(ScriptedModel::new(vec!["```rust\nfn main() {}\n```"]));
        let answer = runner(model.clone()).invoke("hello world in Rust").await.unwrap();
        assert!(answer.contains("fn main"));
        let messages = &model.prompts()[0];
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.starts_with("You are a highly skilled code assistant."));
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "hello world in Rust");
    }
}
