//! Segment translation.
//! Each segment is translated on its own; a failed segment keeps its source
//! text and bumps the job's warning count instead of failing the job.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ExternalError;
use crate::retry::RetryPolicy;
use crate::transcript::TranscriptSegment;

pub mod openai;

/// Translates one string between two languages.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` from `source` to `target` (ISO 639-1 codes).
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, ExternalError>;
}

/// A transcript segment paired with its subtitle text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatedSegment {
    #[serde(flatten)]
    pub segment: TranscriptSegment,
    pub target_text: String,
    /// True when `target_text` is the untranslated source text.
    pub translation_failed: bool,
}

/// Output of [`translate_segments`].
#[derive(Debug, Clone, Default)]
pub struct Translation {
    pub segments: Vec<TranslatedSegment>,
    /// Number of segments that fell back to their source text.
    pub warnings: usize,
}

/// Source and target language codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    /// Pair of language codes.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Translate every segment, keeping order and count.
/// Up to `concurrency` requests are in flight at once.
pub async fn translate_segments(
    translator: &dyn Translator,
    segments: Vec<TranscriptSegment>,
    languages: &LanguagePair,
    policy: &RetryPolicy,
    concurrency: usize,
) -> Translation {
    let total = segments.len();
    if languages.source.eq_ignore_ascii_case(&languages.target) {
        debug!("source and target language match, skipping translation");
        let segments = segments
            .into_iter()
            .map(|segment| TranslatedSegment {
                target_text: segment.source_text.clone(),
                segment,
                translation_failed: false,
            })
            .collect();
        return Translation {
            segments,
            warnings: 0,
        };
    }

    let translated: Vec<TranslatedSegment> = stream::iter(segments.into_iter().enumerate())
        .map(|(i, segment)| async move {
            let result = policy
                .run("translation", || {
                    translator.translate(&segment.source_text, &languages.source, &languages.target)
                })
                .await;
            match result {
                Ok(text) if !text.trim().is_empty() => TranslatedSegment {
                    target_text: text.trim().to_string(),
                    segment,
                    translation_failed: false,
                },
                Ok(_) => {
                    warn!("segment {} translated to empty text, keeping source", i + 1);
                    fallback(segment)
                }
                Err(exhausted) => {
                    warn!(
                        "segment {} kept in source language after {} attempt(s): {}",
                        i + 1,
                        exhausted.attempts,
                        exhausted.error
                    );
                    fallback(segment)
                }
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let warnings = translated.iter().filter(|s| s.translation_failed).count();
    info!("translated {} segment(s), {} fallback(s)", total, warnings);
    Translation {
        segments: translated,
        warnings,
    }
}

/// Show the source text when translation failed.
fn fallback(segment: TranscriptSegment) -> TranslatedSegment {
    TranslatedSegment {
        target_text: segment.source_text.clone(),
        segment,
        translation_failed: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn segment(start: u64, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            start: Duration::from_secs(start),
            end: Duration::from_secs(start + 1),
            source_text: text.to_string(),
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::immediate(3, Duration::from_millis(1))
    }

    /// Prefixes each line with the target language.
    struct MockTr;

    #[async_trait]
    impl Translator for MockTr {
        async fn translate(&self, text: &str, _source: &str, target: &str) -> Result<String, ExternalError> {
            Ok(format!("{target}:{text}"))
        }
    }

    /// Always fails for one particular input.
    struct FailsOn {
        bad: &'static str,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Translator for FailsOn {
        async fn translate(&self, text: &str, _source: &str, _target: &str) -> Result<String, ExternalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text == self.bad {
                Err(ExternalError::Timeout(Duration::from_millis(1)))
            } else {
                Ok(format!("he:{text}"))
            }
        }
    }

    #[tokio::test]
    async fn keeps_order_and_count() {
        let segments = vec![segment(0, "one"), segment(2, "two"), segment(4, "three")];
        let out = translate_segments(&MockTr, segments, &LanguagePair::new("en", "he"), &policy(), 2).await;
        let texts: Vec<_> = out.segments.iter().map(|s| s.target_text.as_str()).collect();
        assert_eq!(texts, vec!["he:one", "he:two", "he:three"]);
        assert_eq!(out.warnings, 0);
    }

    #[tokio::test]
    async fn failed_segment_falls_back_to_source() {
        let tr = FailsOn {
            bad: "two",
            calls: AtomicU32::new(0),
        };
        let segments = vec![segment(0, "one"), segment(2, "two"), segment(4, "three")];
        let out = translate_segments(&tr, segments, &LanguagePair::new("en", "he"), &policy(), 1).await;
        assert_eq!(out.segments.len(), 3);
        assert_eq!(out.warnings, 1);
        assert!(out.segments[1].translation_failed);
        assert_eq!(out.segments[1].target_text, "two");
        assert_eq!(out.segments[2].target_text, "he:three");
        // two successes plus three attempts for the failing segment
        assert_eq!(tr.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn empty_translation_counts_as_failure() {
        struct Blank;
        #[async_trait]
        impl Translator for Blank {
            async fn translate(&self, _t: &str, _s: &str, _g: &str) -> Result<String, ExternalError> {
                Ok("  ".into())
            }
        }
        let out = translate_segments(&Blank, vec![segment(0, "hi")], &LanguagePair::new("en", "he"), &policy(), 1).await;
        assert_eq!(out.warnings, 1);
        assert_eq!(out.segments[0].target_text, "hi");
    }

    #[tokio::test]
    async fn same_language_skips_calls() {
        struct Recorder(Mutex<Vec<String>>);
        #[async_trait]
        impl Translator for Recorder {
            async fn translate(&self, text: &str, _s: &str, _t: &str) -> Result<String, ExternalError> {
                self.0.lock().unwrap().push(text.to_string());
                Ok(text.to_string())
            }
        }
        let tr = Recorder(Mutex::new(Vec::new()));
        let out = translate_segments(&tr, vec![segment(0, "hi")], &LanguagePair::new("en", "EN"), &policy(), 1).await;
        assert!(tr.0.lock().unwrap().is_empty());
        assert_eq!(out.segments[0].target_text, "hi");
    }
}
