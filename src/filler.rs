//! # Filler
//! Anything that fills one or more placeholders in a [PartialPrompt].

use crate::prompt::PartialPrompt;
use crate::utils::JsonMap;
use anyhow::Result;
use serde_json::Value;

pub trait FillPlaceholders {
    fn placeholders_to_fill(&self) -> &Vec<String>;
}

pub trait Fill: FillPlaceholders {
    fn fill(&self, partial_prompt: &mut PartialPrompt) -> Result<()>;
}

pub trait FillWith<CTX>: FillPlaceholders {
    fn fill_with(&self, partial_prompt: &mut PartialPrompt, context: CTX) -> Result<CTX>;
}

impl<T: FillWith<()>> Fill for T {
    fn fill(&self, partial_prompt: &mut PartialPrompt) -> Result<()> {
        self.fill_with(partial_prompt, ())
    }
}

/// Fills placeholders from the fields of a pipeline record.
///
/// Strings are used as they are, `null` counts as absent, other values are rendered as JSON.
/// Fields without a matching placeholder are ignored.
pub struct RecordFiller<'r> {
    record: &'r JsonMap,
    placeholders_to_fill: Vec<String>,
}

impl<'r> RecordFiller<'r> {
    pub fn new(record: &'r JsonMap) -> Self {
        let placeholders_to_fill = record.iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, _)| k.clone())
            .collect();
        Self {
            record,
            placeholders_to_fill,
        }
    }
}

/// Text used to fill a placeholder with a record value.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl FillPlaceholders for RecordFiller<'_> {
    fn placeholders_to_fill(&self) -> &Vec<String> {
        &self.placeholders_to_fill
    }
}

impl FillWith<()> for RecordFiller<'_> {
    fn fill_with(&self, partial_prompt: &mut PartialPrompt, context: ()) -> Result<()> {
        let wanted: Vec<String> = partial_prompt.template.placeholders.iter()
            .filter(|p| self.placeholders_to_fill.contains(p))
            .cloned()
            .collect();
        for placeholder in wanted {
            if let Some(value) = self.record.get(&placeholder) {
                partial_prompt.try_fill(placeholder.as_str(), render_value(value))?;
            }
        }
        Ok(context)
    }
}

#[cfg(test)]
mod test_filler {
    use serde_json::json;
    use super::{Fill, FillPlaceholders, RecordFiller};
    use crate::prompt::PromptTemplate;

    #[test]
    fn test_record_filler() {
        let record = json!({"task": "sort a list", "skip": null, "extra": [1, 2]});
        let record = record.as_object().unwrap();
        let filler = RecordFiller::new(record);
        assert_eq!(filler.placeholders_to_fill().len(), 2);

        let template = PromptTemplate::new("task: {task}; skip: {skip}");
        let mut prompt = template.construct_prompt();
        filler.fill(&mut prompt).unwrap();
        assert_eq!(prompt.unfilled().collect::<Vec<_>>(), vec!["skip"]);
    }
}
