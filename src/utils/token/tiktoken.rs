use anyhow::Result;
pub use tiktoken_rs::{cl100k_base, get_bpe_from_model, CoreBPE};

use crate::utils::llm::ChatMessage;
use crate::utils::token::CountToken;

const TOKENS_PER_MESSAGE: usize = 3;

/// Counter using the Tiktoken tokenizer.
///
/// Models without a known tokenizer (Llama, Mixtral, ...) are counted with `cl100k_base`, which is close enough for
/// budgeting prompts.
#[derive(Clone)]
#[readonly::make]
pub struct Tiktoken {
    /// The model name of the tokenizer. read-only.
    #[readonly]
    pub model: String,
    /// The tokenizer. read-only.
    #[readonly]
    pub bpe: CoreBPE,
}

impl Tiktoken {
    /// Create a new Tiktoken counter.
    pub fn new(model: impl Into<String>) -> Result<Self> {
        let model = model.into();
        let bpe = match get_bpe_from_model(model.as_str()) {
            Ok(bpe) => bpe,
            Err(_) => cl100k_base()?,
        };
        Ok(Tiktoken {
            model,
            bpe,
        })
    }

    /// Count the number of tokens in a chat message. Following best practices from the OpenAI example.
    pub fn count_msg_token(&self, msg: &ChatMessage) -> usize {
        self.count_token(msg.content.as_str()) + TOKENS_PER_MESSAGE
    }

    /// Keep the newest messages whose tokens sum up to at most `max_tokens`.
    pub fn truncate_messages(&self, messages: &[ChatMessage], max_tokens: usize) -> Vec<ChatMessage> {
        let start = self.get_truncate_start_idx(messages, max_tokens);
        messages[start..].to_vec()
    }

    pub(crate) fn get_truncate_start_idx(&self,
                                         messages: &[ChatMessage],
                                         max_tokens: usize) -> usize {
        let mut token_count = 0;
        for (idx, msg) in messages.iter().enumerate().rev() {
            let message_token_count = self.count_msg_token(msg);
            if token_count + message_token_count > max_tokens {
                return idx + 1;
            }
            token_count += message_token_count;
        }
        0
    }
}

impl CountToken for Tiktoken {
    fn count_token(&self, string: &str) -> usize {
        self.bpe.encode_with_special_tokens(string).len()
    }
}
