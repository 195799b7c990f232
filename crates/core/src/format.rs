use serde::de::DeserializeOwned;

use crate::store::AnalysisRecord;

/// Cut `text` to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Remove a surrounding ```json ... ``` fence if the model added one.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string ("json", "JSON", ...) on the opening fence line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

pub fn parse_json_response<T: DeserializeOwned>(raw: &str) -> serde_json::Result<T> {
    serde_json::from_str(strip_code_fences(raw))
}

/// Format a completed analysis as human-readable markdown
pub fn format_analysis_readable(record: &AnalysisRecord) -> String {
    let mut output = String::new();

    output.push_str(&format!("# {}\n\n", record.topic));
    output.push_str(&format!(
        "**Video:** {} | **Status:** {} | **Id:** {}\n\n",
        record.original_name, record.processing_status, record.id
    ));

    if let Some(err) = &record.error_message {
        output.push_str(&format!("**Error:** {}\n\n", err));
        return output;
    }

    if !record.learning_objective.is_empty() {
        output.push_str(&format!("_{}_\n\n", record.learning_objective));
    }

    output.push_str("## TL;DR\n\n");
    output.push_str(&record.summary.tldr);
    output.push_str("\n\n## Summary\n\n");
    output.push_str(&record.summary.full);
    output.push_str("\n\n");

    if !record.key_points.is_empty() {
        output.push_str("## Key points\n\n");
        for (i, kp) in record.key_points.iter().enumerate() {
            let at = kp
                .timestamp
                .as_deref()
                .map(|t| format!(" [{}]", t))
                .unwrap_or_default();
            output.push_str(&format!(
                "{}. **{}**{} ({}/5)\n   {}\n",
                i + 1,
                kp.point,
                at,
                kp.importance,
                kp.explanation
            ));
        }
        output.push('\n');
    }

    if !record.important_moments.is_empty() {
        output.push_str("## Important moments\n\n");
        for moment in &record.important_moments {
            output.push_str(&format!(
                "• [{}] {} ({})\n",
                moment.timestamp, moment.description, moment.kind
            ));
        }
        output.push('\n');
    }

    if !record.quiz.is_empty() {
        output.push_str("## Quiz\n\n");
        for (i, q) in record.quiz.iter().enumerate() {
            output.push_str(&format!("{}. {}\n", i + 1, q.question));
            for (j, option) in q.options.iter().enumerate() {
                let marker = if j == q.correct_answer { "*" } else { " " };
                output.push_str(&format!("   {} {}) {}\n", marker, (b'a' + j as u8) as char, option));
            }
        }
        output.push('\n');
    }

    if !record.flash_cards.is_empty() {
        output.push_str("## Flash cards\n\n");
        for card in &record.flash_cards {
            output.push_str(&format!("• {} → {}\n", card.front, card.back));
        }
        output.push('\n');
    }

    if !record.popular_knowledge_cards.is_empty() {
        output.push_str("## Popular across videos\n\n");
        for card in &record.popular_knowledge_cards {
            output.push_str(&format!(
                "• {} (seen {}x, importance {})\n",
                card.concept, card.frequency, card.importance_score
            ));
        }
        output.push('\n');
    }

    for translation in &record.translations {
        output.push_str(&format!("## Translation ({})\n\n", translation.language));
        output.push_str(&translation.summary);
        output.push_str("\n\n");
    }

    output
}
