//! Turns the ordered fragments of a run into one artifact.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::job::Fragment;
use crate::recognition::{MergeError, Merger};

/// Artifact for a run that produced no fragment at all.
pub const NOTHING_RECOGNIZED: &str =
    "// snapscribe: no code was recognized in the uploaded images\n";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("assembly failed: {0}")]
    MergeFailed(#[from] MergeError),
}

pub struct FragmentAssembler {
    merger: Option<Arc<dyn Merger>>,
    /// Propagate merge errors instead of falling back to concatenation.
    strict: bool,
}

impl FragmentAssembler {
    pub fn new(merger: Option<Arc<dyn Merger>>, strict: bool) -> Self {
        Self { merger, strict }
    }

    /// Deterministic concatenation only.
    pub fn without_merger() -> Self {
        Self::new(None, false)
    }

    pub fn has_merger(&self) -> bool {
        self.merger.is_some()
    }

    /// `fragments` must already be in reading order.
    ///
    /// Failure placeholders never reach the merger. Each run of consecutive
    /// recognized fragments is merged on its own and the placeholders are
    /// spliced back between the merged runs, so the artifact carries exactly
    /// one marker per failed image.
    pub async fn assemble(&self, fragments: &[Fragment]) -> Result<String, AssemblyError> {
        match fragments {
            [] => return Ok(NOTHING_RECOGNIZED.to_string()),
            [only] => return Ok(only.render()),
            _ => {}
        }

        let Some(merger) = &self.merger else {
            debug!(fragments = fragments.len(), "no merger configured, concatenating");
            return Ok(concatenate(fragments));
        };

        match self.merge_runs(merger.as_ref(), fragments).await {
            Ok(artifact) => Ok(artifact),
            Err(e) if self.strict => Err(e.into()),
            Err(e) => {
                warn!(error = %e, "merge pass failed, falling back to concatenation");
                Ok(concatenate(fragments))
            }
        }
    }

    async fn merge_runs(
        &self,
        merger: &dyn Merger,
        fragments: &[Fragment],
    ) -> Result<String, MergeError> {
        let mut artifact = String::new();

        for segment in segments(fragments) {
            let text = match segment {
                Segment::Marker(fragment) => fragment.render(),
                Segment::Run(run) if run.len() == 1 => run[0].render(),
                Segment::Run(run) => {
                    let texts: Vec<String> = run.iter().map(Fragment::render).collect();
                    let merged = merger.merge(&texts).await?;
                    if merged.trim().is_empty() {
                        return Err(MergeError::EmptyOutput);
                    }
                    merged
                }
            };
            push_line_terminated(&mut artifact, &text);
        }

        Ok(artifact)
    }
}

enum Segment<'a> {
    Run(&'a [Fragment]),
    Marker(&'a Fragment),
}

/// Splits on failure placeholders, keeping order.
fn segments(fragments: &[Fragment]) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut start = 0;

    for (i, fragment) in fragments.iter().enumerate() {
        if fragment.is_failure() {
            if start < i {
                out.push(Segment::Run(&fragments[start..i]));
            }
            out.push(Segment::Marker(fragment));
            start = i + 1;
        }
    }
    if start < fragments.len() {
        out.push(Segment::Run(&fragments[start..]));
    }
    out
}

/// Ordered concatenation with a boundary line before every fragment.
/// The same input always yields the same bytes.
pub fn concatenate(fragments: &[Fragment]) -> String {
    if fragments.is_empty() {
        return NOTHING_RECOGNIZED.to_string();
    }

    let mut artifact = String::new();
    for fragment in fragments {
        artifact.push_str(&boundary(fragment));
        push_line_terminated(&mut artifact, &fragment.render());
    }
    artifact
}

fn boundary(fragment: &Fragment) -> String {
    format!(
        "// ----- [{}] {} -----\n",
        fragment.position() + 1,
        fragment.source().file_name()
    )
}

fn push_line_terminated(artifact: &mut String, text: &str) {
    artifact.push_str(text);
    if !text.ends_with('\n') {
        artifact.push('\n');
    }
}
