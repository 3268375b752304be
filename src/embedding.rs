//! Embedding batching with chunk-and-average for oversize inputs.
//!
//! The embedding provider enforces a hard token limit (~8192), so inputs are
//! capped at a conservative character budget. Longer inputs are split into
//! chunks (preferring sentence boundaries in the last 20% of the cap, then
//! spaces, then hard cuts), each chunk is embedded separately, and the final
//! vector is the componentwise arithmetic mean of the chunk vectors.
//!
//! Output order mirrors input order 1:1. Empty or whitespace inputs (and
//! inputs whose batch failed) occupy a `None` slot; callers stay aligned by
//! index and must treat a missing embedding as non-fatal.
//!
//! Also provides the vector codecs for BLOB storage:
//! [`vec_to_blob`] / [`blob_to_vec`] (little-endian f32 bytes) and
//! [`cosine_similarity`].

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::{AgentError, AgentResult, ErrorCode};
use crate::llm::{classify_http_error, retry_delay};

/// Embed a batch of texts, preserving input order. One `Option` slot per
/// input; `None` marks an empty/invalid input or a failed batch.
pub async fn embed_texts(
    config: &EmbeddingConfig,
    texts: &[String],
) -> AgentResult<Vec<Option<Vec<f32>>>> {
    if !config.is_enabled() {
        return Ok(vec![None; texts.len()]);
    }

    // Expand inputs into (input index, chunk text) pairs. Oversize inputs
    // contribute several chunks that are averaged back together below.
    let mut chunk_owner: Vec<usize> = Vec::new();
    let mut chunk_texts: Vec<String> = Vec::new();
    for (idx, text) in texts.iter().enumerate() {
        if text.trim().is_empty() {
            warn!(index = idx, "skipping empty embedding input");
            continue;
        }
        for chunk in split_for_embedding(text, config.max_input_chars) {
            chunk_owner.push(idx);
            chunk_texts.push(chunk);
        }
    }

    // Group chunks into batches bounded by the cumulative character budget.
    let mut chunk_vectors: Vec<Option<Vec<f32>>> = vec![None; chunk_texts.len()];
    let mut batch_start = 0usize;
    while batch_start < chunk_texts.len() {
        let mut batch_end = batch_start;
        let mut budget = 0usize;
        while batch_end < chunk_texts.len() {
            let len = chunk_texts[batch_end].len();
            if batch_end > batch_start && budget + len > config.batch_char_budget {
                break;
            }
            budget += len;
            batch_end += 1;
        }

        if batch_start > 0 {
            tokio::time::sleep(Duration::from_millis(config.pacing_ms)).await;
        }

        let batch = &chunk_texts[batch_start..batch_end];
        debug!(chunks = batch.len(), chars = budget, "embedding batch");
        match embed_api_call(config, batch).await {
            Ok(vectors) => {
                for (offset, vector) in vectors.into_iter().enumerate() {
                    chunk_vectors[batch_start + offset] = Some(vector);
                }
            }
            Err(e) => {
                warn!(err = %e, chunks = batch.len(), "embedding batch failed");
            }
        }

        batch_start = batch_end;
    }

    // Recombine chunk vectors per input.
    let mut grouped: Vec<Vec<Vec<f32>>> = vec![Vec::new(); texts.len()];
    let mut failed: Vec<bool> = vec![false; texts.len()];
    for (chunk_idx, owner) in chunk_owner.iter().enumerate() {
        match chunk_vectors[chunk_idx].take() {
            Some(v) => grouped[*owner].push(v),
            None => failed[*owner] = true,
        }
    }

    Ok(grouped
        .into_iter()
        .zip(failed)
        .map(|(vectors, any_failed)| {
            if any_failed || vectors.is_empty() {
                None
            } else if vectors.len() == 1 {
                vectors.into_iter().next()
            } else {
                Some(mean_vectors(&vectors))
            }
        })
        .collect())
}

/// Split `text` into chunks of at most `max_chars`, preferring sentence
/// boundaries in the last 20% of the cap, then spaces, then hard cuts.
pub fn split_for_embedding(text: &str, max_chars: usize) -> Vec<String> {
    if text.len() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;
    while remaining.len() > max_chars {
        let window_end = floor_char_boundary(remaining, max_chars);
        let window = &remaining[..window_end];
        let zone_start = floor_char_boundary(window, max_chars * 4 / 5);

        let split_at = find_sentence_split(window, zone_start)
            .or_else(|| window.rfind(' ').map(|p| p + 1))
            .unwrap_or(window_end);

        let split_at = if split_at == 0 { window_end } else { split_at };
        chunks.push(remaining[..split_at].trim().to_string());
        remaining = &remaining[split_at..];
    }
    let tail = remaining.trim();
    if !tail.is_empty() {
        chunks.push(tail.to_string());
    }
    chunks
}

/// Last sentence terminator followed by whitespace at or after `zone_start`.
fn find_sentence_split(window: &str, zone_start: usize) -> Option<usize> {
    let mut best = None;
    let mut prev: Option<(usize, char)> = None;
    for (idx, ch) in window.char_indices() {
        if let Some((p_idx, p_ch)) = prev {
            if matches!(p_ch, '.' | '!' | '?') && ch.is_whitespace() && p_idx >= zone_start {
                best = Some(idx + ch.len_utf8());
            }
        }
        prev = Some((idx, ch));
    }
    best
}

/// Largest byte index `<= max` that falls on a char boundary.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Componentwise arithmetic mean of equally sized vectors.
pub fn mean_vectors(vectors: &[Vec<f32>]) -> Vec<f32> {
    let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
    let mut sum = vec![0.0f64; dims];
    let mut count = 0usize;
    for v in vectors {
        if v.len() != dims {
            continue;
        }
        for (i, x) in v.iter().enumerate() {
            sum[i] += *x as f64;
        }
        count += 1;
    }
    if count == 0 {
        return Vec::new();
    }
    sum.into_iter().map(|s| (s / count as f64) as f32).collect()
}

/// Call the embeddings API with retry/backoff. Same classification rules as
/// the completion client.
async fn embed_api_call(config: &EmbeddingConfig, texts: &[String]) -> AgentResult<Vec<Vec<f32>>> {
    let api_key = std::env::var(&config.api_key_env).map_err(|_| {
        AgentError::new(
            ErrorCode::DocLlmFailed,
            format!("Embedding API key env var {} not set", config.api_key_env),
        )
        .with_recoverable(false)
    })?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| AgentError::new(ErrorCode::DocLlmFailed, e.to_string()).with_recoverable(false))?;

    let body = serde_json::json!({
        "model": config.model,
        "input": texts,
    });

    let mut last_err: Option<AgentError> = None;
    for attempt in 0..3u32 {
        if attempt > 0 {
            let retry_after = last_err
                .as_ref()
                .and_then(|e| e.context.get("retry_after_seconds"))
                .and_then(|v| v.as_u64());
            tokio::time::sleep(retry_delay(attempt, retry_after)).await;
        }

        let response = client
            .post(format!("{}/v1/embeddings", config.base_url))
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if (200..300).contains(&status) {
                    let json: serde_json::Value = resp.json().await.map_err(|e| {
                        AgentError::new(
                            ErrorCode::DocLlmParseFailed,
                            format!("Invalid embedding response: {}", e),
                        )
                        .with_recoverable(false)
                    })?;
                    return parse_embedding_response(&json);
                }
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok());
                let text = resp.text().await.unwrap_or_default();
                let err = classify_http_error(status, &text, retry_after);
                if !err.recoverable {
                    return Err(err);
                }
                last_err = Some(err);
            }
            Err(e) => {
                let err = if e.is_timeout() {
                    AgentError::new(ErrorCode::DocLlmTimeout, format!("embedding timed out: {}", e))
                } else {
                    AgentError::new(ErrorCode::DocLlmFailed, format!("embedding transport: {}", e))
                };
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        AgentError::new(ErrorCode::DocLlmFailed, "Embedding failed after retries")
    }))
}

fn parse_embedding_response(json: &serde_json::Value) -> AgentResult<Vec<Vec<f32>>> {
    let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
        AgentError::new(
            ErrorCode::DocLlmParseFailed,
            "Invalid embedding response: missing data array",
        )
        .with_recoverable(false)
    })?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item.get("embedding").and_then(|e| e.as_array()).ok_or_else(|| {
            AgentError::new(
                ErrorCode::DocLlmParseFailed,
                "Invalid embedding response: missing embedding",
            )
            .with_recoverable(false)
        })?;
        embeddings.push(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(embeddings)
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_is_one_chunk() {
        let chunks = split_for_embedding("hello world", 30_000);
        assert_eq!(chunks, vec!["hello world"]);
    }

    #[test]
    fn oversize_input_splits_into_multiple_chunks() {
        let text = "a".repeat(30_001);
        let chunks = split_for_embedding(&text, 30_000);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.len() <= 30_000));
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, 30_001);
    }

    #[test]
    fn split_prefers_sentence_boundary_in_last_fifth() {
        // Sentence end lands inside the [80%, 100%] zone of the cap.
        let sentence = format!("{}. {}", "x".repeat(85), "y".repeat(100));
        let chunks = split_for_embedding(&sentence, 100);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].ends_with('.'), "first chunk was {:?}", &chunks[0]);
    }

    #[test]
    fn split_falls_back_to_space_boundary() {
        let text = format!("{} {}", "a".repeat(50), "b".repeat(100));
        let chunks = split_for_embedding(&text, 100);
        assert_eq!(chunks[0], "a".repeat(50));
    }

    #[test]
    fn split_is_utf8_safe() {
        let text = "é".repeat(20_000); // 2 bytes per char
        let chunks = split_for_embedding(&text, 30_000);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.chars().all(|ch| ch == 'é'));
        }
    }

    #[test]
    fn mean_is_componentwise() {
        let vectors = vec![vec![1.0, 2.0, 3.0], vec![3.0, 4.0, 5.0]];
        assert_eq!(mean_vectors(&vectors), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn mean_of_single_vector_is_identity() {
        let vectors = vec![vec![0.5, -0.5]];
        assert_eq!(mean_vectors(&vectors), vec![0.5, -0.5]);
    }

    #[tokio::test]
    async fn disabled_provider_yields_all_none() {
        let config = EmbeddingConfig::default();
        let out = embed_texts(&config, &["one".into(), "two".into()]).await.unwrap();
        assert_eq!(out, vec![None, None]);
    }

    #[test]
    fn vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn cosine_basics() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
