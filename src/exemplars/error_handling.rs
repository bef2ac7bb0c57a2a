use std::sync::Arc;

use crate::pipeline::{OutputParser, Pipeline};
use crate::prompt::ChatPromptTemplate;
use crate::runner::PipelineRunner;
use crate::utils::JsonMap;
use crate::utils::llm::{Complete, Role};

pub const CODE_SNIPPET_KEY: &str = "code_snippet";
pub const ERROR_MESSAGE_KEY: &str = "error_message";
pub const MISSING_INPUT_MESSAGE: &str = "Please provide both a code snippet and an error message.";
/// Line between the code snippet and the error message in plain-text input.
pub const INPUT_SEPARATOR: &str = "---";

const DIAGNOSIS_PROMPT: &str = "You are an expert in diagnosing and resolving code errors. Your task is to analyze the \
provided code snippet and error message, identify the error, and suggest a resolution following best practices.";

const REQUEST_TEMPLATE: &str = "A user has provided a code snippet along with an error message. Your task is to analyze \
the provided code, identify the error, and suggest a resolution following best practices.\n\n\
Code Snippet:\n{code_snippet}\n\nError Message:\n{error_message}";

const BEST_PRACTICES_PROMPT: &str = "Consider the following best practices in your analysis and resolution:\
\n\n1. Catch Specific Exceptions: Replace any generic exceptions with more specific ones.\
\n\n2. Provide Meaningful Error Messages: Ensure error messages are clear and descriptive.\
\n\n3. Graceful Degradation: Handle errors gracefully without crashing the application.\
\n\n4. Log Errors: Add logging statements to capture error details and context.\
\n\n5. Validate Input: Implement input validation checks to prevent errors from invalid data.\
\n\n6. Fail Fast: Detect and handle errors as soon as they occur.";

const CLOSING_PROMPT: &str = "Provide your detailed analysis, suggested fixes, and corrected code below:";

/// Diagnosis, request, best practices, closing instruction.
pub fn prompt() -> ChatPromptTemplate {
    ChatPromptTemplate::new()
        .with_literal(Role::System, DIAGNOSIS_PROMPT)
        .with_user(REQUEST_TEMPLATE)
        .with_literal(Role::System, BEST_PRACTICES_PROMPT)
        .with_literal(Role::System, CLOSING_PROMPT)
}

/// `{code_snippet, error_message}` → analysis and corrected code. Both inputs are required.
pub fn runner(model: Arc<dyn Complete>) -> PipelineRunner {
    let pipeline = Pipeline::new()
        .prompt(prompt(), model)
        .parse(OutputParser::Str);
    PipelineRunner::new(pipeline, CODE_SNIPPET_KEY)
        .with_required_inputs(&[CODE_SNIPPET_KEY, ERROR_MESSAGE_KEY])
        .with_empty_input_message(MISSING_INPUT_MESSAGE)
}

/// The record for text holding the code snippet, a line `---`, then the error message. Line endings may be
/// `\n` or `\r\n`. Without a separator line the whole text is the snippet and the error message is empty.
pub fn record_from_text(text: &str) -> JsonMap {
    let lines: Vec<&str> = text.lines().collect();
    let (code_snippet, error_message) = match lines.iter().position(|line| line.trim() == INPUT_SEPARATOR) {
        Some(idx) => (lines[..idx].join("\n"), lines[idx + 1..].join("\n")),
        None => (text.to_string(), String::new()),
    };
    let mut record = JsonMap::new();
    record.insert(CODE_SNIPPET_KEY.to_string(), code_snippet.into());
    record.insert(ERROR_MESSAGE_KEY.to_string(), error_message.into());
    record
}

#[cfg(test)]
mod test_error_handling {
    use std::sync::Arc;
    use serde_json::json;
    use super::{record_from_text, runner, MISSING_INPUT_MESSAGE};
    use crate::pipeline::errors::ErrorKind;
    use crate::test_utils::ScriptedModel;
    use crate::utils::JsonMap;
    use crate::utils::llm::Role;

    fn record(code: &str, error: &str) -> JsonMap {
        let mut record = JsonMap::new();
        record.insert("code_snippet".to_string(), json!(code));
        record.insert("error_message".to_string(), json!(error));
        record
    }

    #[tokio::test]
    async fn test_four_fragments() {
        let model = Arc::new(ScriptedModel::new(vec!["Define `x` before printing it."]));
        let runner = runner(model.clone());
        let answer = runner.invoke_record(record("print(x)", "NameError: name 'x' is not defined")).await.unwrap();
        assert_eq!(answer, "Define `x` before printing it.");
        let messages = &model.prompts()[0];
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::System, Role::System]);
        assert!(messages[1].content.contains("Code Snippet:\nprint(x)\n\nError Message:\nNameError"));
        assert!(messages[2].content.contains("6. Fail Fast"));
    }

    #[tokio::test]
    async fn test_both_inputs_required() {
        let model = Arc::new(ScriptedModel::echo());
        let runner = runner(model.clone());
        for (code, error) in [("print(x)", ""), ("", "NameError"), ("  ", "  ")] {
            let failure = runner.invoke_record(record(code, error)).await.unwrap_err();
            assert_eq!(failure.kind, ErrorKind::MissingInput);
            assert_eq!(failure.message, MISSING_INPUT_MESSAGE);
        }
        assert!(runner.invoke_record(JsonMap::new()).await.is_err());
        assert_eq!(model.call_count(), 0);
    }

    #[test]
    fn test_record_from_text() {
        let expected = record("print(x)\nprint(y)", "NameError: name 'x' is not defined");
        assert_eq!(record_from_text("print(x)\nprint(y)\n---\nNameError: name 'x' is not defined\n"), expected);
        assert_eq!(record_from_text("print(x)\r\nprint(y)\r\n---\r\nNameError: name 'x' is not defined"), expected);
        assert_eq!(record_from_text("print(x)\nprint(y)\n  --- \nNameError: name 'x' is not defined"), expected);
        assert_eq!(record_from_text("print(x)\n---"), record("print(x)", ""));
        assert_eq!(record_from_text("print(x)"), record("print(x)", ""));
    }

    #[tokio::test]
    async fn test_crlf_input_reaches_the_model() {
        let model = Arc::new(ScriptedModel::echo());
        let record = record_from_text("print(x)\r\n---\r\nNameError\r\n");
        assert!(runner(model.clone()).invoke_record(record).await.is_ok());
        assert_eq!(model.call_count(), 1);
    }
}
