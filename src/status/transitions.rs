//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! Pure transition functions for the status document's state machine. Each takes a
//! [`StatusDocument`] by value and returns the document it should become; the
//! orchestrator is responsible for the row-level lock and the read-apply-write cycle
//! around these calls, so these functions never touch the database themselves.

use anyhow::anyhow;
use anyhow::Result;

use crate::status::document::OverallState;
use crate::status::document::StageState;
use crate::status::document::StatusDocument;

/// Rule 3 (partial): the transform handler processing the raw record carrying
/// `last_item=true` for a step. Extraction and transform both advance to `finished`
/// because extraction of a step is defined to complete strictly before its last
/// transform runs.
pub fn step_last_item_transformed(mut document: StatusDocument, step_name: &str) -> Result<StatusDocument> {
    require_running(&document)?;
    let step = step_mut(&mut document, step_name)?;
    step.transform = StageState::Finished;
    step.extraction = StageState::Finished;
    Ok(document)
}

/// Rule 3 (partial): the first vectorization item is enqueued for a step.
pub fn step_embedding_started(mut document: StatusDocument, step_name: &str) -> Result<StatusDocument> {
    require_running(&document)?;
    let step = step_mut(&mut document, step_name)?;
    if matches!(step.embedding, StageState::Idle) {
        step.embedding = StageState::Running;
    }
    Ok(document)
}

/// Rule 4: the vectorization queue for `(tenant, step)` has drained to zero and
/// transform for that step is already finished.
pub fn step_embedding_drained(mut document: StatusDocument, step_name: &str) -> Result<StatusDocument> {
    require_running(&document)?;
    let step = step_mut(&mut document, step_name)?;
    if !matches!(step.transform, StageState::Finished) {
        return Err(anyhow!("step {} cannot finish embedding before transform finishes", step_name));
    }
    step.embedding = StageState::Finished;
    Ok(document)
}

/// Rule 5 and 6 combined: advance the orchestrator once a step reaches all-`finished`.
/// Returns the name of the next step to seed, or `None` if this was the final step (in
/// which case `document.overall` is already `Finished`).
pub fn advance_after_step_finished(mut document: StatusDocument, step_name: &str) -> Result<(StatusDocument, Option<String>)> {
    require_running(&document)?;

    {
        let step = document.steps.get(step_name).ok_or_else(|| anyhow!("unknown step {}", step_name))?;
        if !step.is_all_finished() {
            return Err(anyhow!("step {} is not all-finished yet", step_name));
        }
    }

    match document.next_step_after(step_name) {
        Some(next_name) => {
            let next_name = next_name.to_string();
            let next_step = document.steps.get_mut(&next_name).ok_or_else(|| anyhow!("unknown step {}", next_name))?;
            next_step.extraction = StageState::Running;
            Ok((document, Some(next_name)))
        }
        None => {
            document.overall = OverallState::Finished;
            Ok((document, None))
        }
    }
}

/// Rule 7: any stage transitioning to `failed` fails the whole run. Remaining steps
/// are left untouched (they stay `idle`, per the rule).
pub fn fail_run(mut document: StatusDocument, step_name: &str, stage: Stage) -> Result<StatusDocument> {
    require_running(&document)?;
    let step = step_mut(&mut document, step_name)?;
    match stage {
        Stage::Extraction => step.extraction = StageState::Failed,
        Stage::Transform => step.transform = StageState::Failed,
        Stage::Embedding => step.embedding = StageState::Failed,
    }
    document.overall = OverallState::Failed;
    Ok(document)
}

/// A cancellation request observed at a page boundary: the current step fails (without
/// marking it a provider error) and the run is marked cancelled rather than failed.
pub fn cancel_run(mut document: StatusDocument, step_name: &str) -> Result<StatusDocument> {
    require_running(&document)?;
    let step = step_mut(&mut document, step_name)?;
    if matches!(step.extraction, StageState::Running) {
        step.extraction = StageState::Failed;
    }
    if matches!(step.transform, StageState::Running) {
        step.transform = StageState::Failed;
    }
    if matches!(step.embedding, StageState::Running) {
        step.embedding = StageState::Failed;
    }
    document.overall = OverallState::Cancelled;
    Ok(document)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    Extraction,
    Transform,
    Embedding,
}

fn require_running(document: &StatusDocument) -> Result<()> {
    if matches!(document.overall, OverallState::Running) {
        Ok(())
    } else {
        Err(anyhow!("status transitions require overall=running, found {:?}", document.overall))
    }
}

fn step_mut<'a>(document: &'a mut StatusDocument, step_name: &str) -> Result<&'a mut crate::status::document::StepState> {
    document.steps.get_mut(step_name).ok_or_else(|| anyhow!("unknown step {}", step_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_step_running() -> StatusDocument {
        let order = vec![("statuses".to_string(), "Statuses".to_string()), ("projects".to_string(), "Projects".to_string())];
        StatusDocument::start_run(&order)
    }

    #[test]
    fn last_item_transformed_finishes_extraction_and_transform() {
        let document = two_step_running();
        let document = step_last_item_transformed(document, "statuses").unwrap();
        let step = &document.steps["statuses"];
        assert!(matches!(step.extraction, StageState::Finished));
        assert!(matches!(step.transform, StageState::Finished));
        assert!(matches!(step.embedding, StageState::Idle));
    }

    #[test]
    fn embedding_drain_requires_transform_finished() {
        let document = two_step_running();
        let result = step_embedding_drained(document, "statuses");
        assert!(result.is_err());
    }

    #[test]
    fn advance_after_step_finished_seeds_next_step() {
        let document = two_step_running();
        let document = step_last_item_transformed(document, "statuses").unwrap();
        let document = step_embedding_drained(document, "statuses").unwrap();
        let (document, next) = advance_after_step_finished(document, "statuses").unwrap();
        assert_eq!(next.as_deref(), Some("projects"));
        assert!(matches!(document.steps["projects"].extraction, StageState::Running));
        assert!(matches!(document.overall, OverallState::Running));
    }

    #[test]
    fn advance_after_final_step_finishes_overall() {
        let order = vec![("statuses".to_string(), "Statuses".to_string())];
        let document = StatusDocument::start_run(&order);
        let document = step_last_item_transformed(document, "statuses").unwrap();
        let document = step_embedding_drained(document, "statuses").unwrap();
        let (document, next) = advance_after_step_finished(document, "statuses").unwrap();
        assert_eq!(next, None);
        assert!(matches!(document.overall, OverallState::Finished));
    }

    #[test]
    fn fail_run_marks_overall_failed_and_leaves_other_steps_idle() {
        let document = two_step_running();
        let document = fail_run(document, "statuses", Stage::Extraction).unwrap();
        assert!(matches!(document.overall, OverallState::Failed));
        assert!(matches!(document.steps["projects"].extraction, StageState::Idle));
    }

    #[test]
    fn cancel_run_fails_only_running_stages() {
        let document = two_step_running();
        let document = cancel_run(document, "statuses").unwrap();
        assert!(matches!(document.overall, OverallState::Cancelled));
        assert!(matches!(document.steps["statuses"].extraction, StageState::Failed));
        assert!(matches!(document.steps["statuses"].transform, StageState::Idle));
    }
}
