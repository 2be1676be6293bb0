//! Prompt text sent to the classification backend.
//!
//! Every string the backend sees lives here so prompt changes never touch
//! retry or parsing code, and tests can inspect the prompts directly.

/// Instruction sent with every page image.
///
/// The JSON shape requested here is what [`crate::pipeline::parse`] decodes.
pub const CLASSIFY_INSTRUCTION: &str = r#"You are a document classification assistant. Classify the attached page image into exactly one of these categories:

- ID: identity documents (national ID card, passport, driving licence, residence permit)
- INVOICE: invoices and bills issued by a supplier, showing amounts due
- RECEIPT: point-of-sale receipts, tickets and payment confirmations
- TAX: tax returns, sworn tax declarations, withholding or tax-status certificates
- BANK_STATEMENT: bank or credit-card account statements listing transactions

If the page fits none of them, use UNKNOWN.

Answer with a single JSON object and nothing else:
{"category": "<ID|INVOICE|RECEIPT|TAX|BANK_STATEMENT|UNKNOWN>", "confidence": <number between 0 and 1>, "reasoning": "<one short sentence>"}"#;

/// User-turn text attached to a few-shot example image.
pub fn example_prompt(label: &str) -> String {
    format!("This is an example of a {label}.")
}

/// Assistant acknowledgement following a few-shot example.
pub fn example_ack(label: &str) -> String {
    format!("Understood. I will use this image as a reference for {label} documents.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Category;

    #[test]
    fn instruction_lists_every_target_category() {
        for category in Category::TARGETS {
            assert!(
                CLASSIFY_INSTRUCTION.contains(category.as_str()),
                "missing {category}"
            );
        }
        assert!(CLASSIFY_INSTRUCTION.contains("UNKNOWN"));
    }

    #[test]
    fn instruction_requests_json_shape() {
        for field in ["\"category\"", "\"confidence\"", "\"reasoning\""] {
            assert!(CLASSIFY_INSTRUCTION.contains(field));
        }
    }

    #[test]
    fn example_prompt_names_the_label() {
        assert_eq!(example_prompt("ID"), "This is an example of a ID.");
        assert!(example_ack("TAX").contains("TAX"));
    }
}
