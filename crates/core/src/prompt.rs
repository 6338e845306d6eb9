use crate::models::{ChunkMetadata, RetrievedChunk};

pub const SYSTEM_INSTRUCTION: &str =
    "Answer the following hospital supply chain question using the provided data context.";

/// One context line per retrieved chunk.
fn context_line(metadata: &ChunkMetadata) -> String {
    let record = &metadata.record;
    format!(
        "- {} ({}, {})",
        record.item_desc.as_deref().unwrap_or("N/A"),
        record.facility_type.as_deref().unwrap_or("N/A"),
        record.region.as_deref().unwrap_or("N/A"),
    )
}

/// Renders the instruction, an optional context block, and the literal user
/// question into one prompt string. With no context the block is omitted
/// entirely, header included; the prompt changes shape, not just content.
pub fn assemble_prompt(chunks: &[RetrievedChunk], question: &str) -> String {
    if chunks.is_empty() {
        return format!("{SYSTEM_INSTRUCTION}\n\nQuestion: {question}\nAnswer:");
    }

    let context = chunks
        .iter()
        .map(|chunk| context_line(&chunk.metadata))
        .collect::<Vec<_>>()
        .join("\n");

    format!("{SYSTEM_INSTRUCTION}\n\nContext:\n{context}\n\nQuestion: {question}\nAnswer:")
}

#[cfg(test)]
mod tests {
    use super::{assemble_prompt, SYSTEM_INSTRUCTION};
    use crate::models::{ChunkMetadata, RetrievedChunk, TransactionRecord};
    use chrono::NaiveDate;

    fn chunk(item_desc: &str) -> RetrievedChunk {
        RetrievedChunk {
            text: format!("{item_desc} sentence"),
            metadata: ChunkMetadata {
                id: None,
                batch_id: None,
                record: TransactionRecord {
                    transaction_id: "T-1".to_string(),
                    facility_id: "F-1".to_string(),
                    facility_type: Some("HOSPITAL".to_string()),
                    region: Some("West".to_string()),
                    bed_size: None,
                    month: Some(1),
                    year: Some(2025),
                    load_date: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
                    vendor: Some("Cencora".to_string()),
                    vendor_id: None,
                    manufacturer: None,
                    catalog_number: None,
                    item_desc: Some(item_desc.to_string()),
                    quantity: 100,
                    price_paid: 50.0,
                    total_spend: 5000.0,
                    unit_cost: Some(50.0),
                },
            },
            score: Some(0.9),
        }
    }

    #[test]
    fn empty_context_omits_the_context_section() {
        let prompt = assemble_prompt(&[], "What was the total spend?");

        assert!(!prompt.contains("Context:"));
        assert!(prompt.starts_with(SYSTEM_INSTRUCTION));
        assert!(prompt.ends_with("Question: What was the total spend?\nAnswer:"));
    }

    #[test]
    fn context_block_lists_every_chunk_once() {
        let chunks = vec![chunk("FAMOTIDINE 20MG"), chunk("Aspirin 81mg")];
        let prompt = assemble_prompt(&chunks, "Which items were bought?");

        assert_eq!(prompt.matches("Context:").count(), 1);
        assert_eq!(prompt.matches("FAMOTIDINE 20MG").count(), 1);
        assert_eq!(prompt.matches("Aspirin 81mg").count(), 1);
        assert!(prompt.contains("- FAMOTIDINE 20MG (HOSPITAL, West)"));
        assert!(prompt.ends_with("Question: Which items were bought?\nAnswer:"));
    }
}
