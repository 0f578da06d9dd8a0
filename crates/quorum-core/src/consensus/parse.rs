use serde_json::Value;
use std::collections::BTreeSet;

/// Parsed rater reply. Parsing is total: every input maps to one variant.
#[derive(Debug, Clone, PartialEq)]
pub enum RaterReply {
    Ok {
        score: f64,
        notes: String,
        evidence_flags: BTreeSet<String>,
    },
    Malformed {
        raw: String,
        reason: String,
    },
}

impl RaterReply {
    fn malformed(raw: &str, reason: impl Into<String>) -> Self {
        RaterReply::Malformed {
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

/// Extract the first JSON object in `raw` (prose and code fences around it
/// are tolerated) and require `score`, `notes` and `evidence_flags`.
pub fn parse_reply(raw: &str) -> RaterReply {
    let text = raw.trim();
    let Some(start) = text.find('{') else {
        return RaterReply::malformed(raw, "no JSON object in reply");
    };

    let val = match serde_json::Deserializer::from_str(&text[start..])
        .into_iter::<Value>()
        .next()
    {
        Some(Ok(v)) => v,
        Some(Err(e)) => return RaterReply::malformed(raw, format!("invalid JSON: {}", e)),
        None => return RaterReply::malformed(raw, "no JSON object in reply"),
    };

    let Some(score) = val.get("score").and_then(Value::as_f64) else {
        return RaterReply::malformed(raw, "missing numeric 'score'");
    };
    if !score.is_finite() {
        return RaterReply::malformed(raw, "score is not finite");
    }

    let Some(notes) = val.get("notes").and_then(Value::as_str) else {
        return RaterReply::malformed(raw, "missing string 'notes'");
    };

    let flags_val = val.get("evidence_flags").or_else(|| val.get("evidenceFlags"));
    let Some(list) = flags_val.and_then(Value::as_array) else {
        return RaterReply::malformed(raw, "missing array 'evidence_flags'");
    };
    let mut evidence_flags = BTreeSet::new();
    for flag in list {
        let Some(s) = flag.as_str() else {
            return RaterReply::malformed(raw, "evidence_flags must be strings");
        };
        let s = s.trim();
        if !s.is_empty() {
            evidence_flags.insert(s.to_string());
        }
    }

    RaterReply::Ok {
        score,
        notes: notes.trim().to_string(),
        evidence_flags,
    }
}
