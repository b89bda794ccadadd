//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// Overall run state of a job, the top-level field of a [`StatusDocument`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OverallState {
    Idle,
    Running,
    Finished,
    Failed,
    Cancelled,
}

/// State of a single stage within a step. Stages never reach `cancelled` directly;
/// a cancellation is expressed at the step/overall level.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Idle,
    Running,
    Finished,
    Failed,
}

/// One step's progress across its three stages.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepState {
    pub order: i32,
    pub display_name: String,
    pub extraction: StageState,
    pub transform: StageState,
    pub embedding: StageState,
}

impl StepState {
    pub fn idle(order: i32, display_name: impl Into<String>) -> StepState {
        StepState {
            order,
            display_name: display_name.into(),
            extraction: StageState::Idle,
            transform: StageState::Idle,
            embedding: StageState::Idle,
        }
    }

    pub fn is_all_finished(&self) -> bool {
        matches!(
            (self.extraction, self.transform, self.embedding),
            (StageState::Finished, StageState::Finished, StageState::Finished)
        )
    }

    pub fn has_failed_stage(&self) -> bool {
        matches!(self.extraction, StageState::Failed) || matches!(self.transform, StageState::Failed) || matches!(self.embedding, StageState::Failed)
    }
}

/// The canonical per-job status document persisted in `job_schedules.status` and
/// broadcast verbatim by the progress publisher's `status` event.
///
/// `steps` is a `BTreeMap` rather than a `HashMap` so `step_in_order` and any
/// serialized snapshot are deterministic, which matters for the publisher's "retain
/// latest progress" replay and for tests asserting on the serialized JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusDocument {
    pub overall: OverallState,
    pub steps: BTreeMap<String, StepState>,
}

impl StatusDocument {
    /// A freshly reset document for the start of a run (transition rule 1): every step
    /// idle, the first step's extraction flipped to running.
    pub fn start_run(step_order: &[(String, String)]) -> StatusDocument {
        let mut steps = BTreeMap::new();
        for (index, (name, display_name)) in step_order.iter().enumerate() {
            steps.insert(name.clone(), StepState::idle(index as i32, display_name.clone()));
        }

        let mut document = StatusDocument { overall: OverallState::Running, steps };

        if let Some(first) = step_order.first() {
            if let Some(step) = document.steps.get_mut(&first.0) {
                step.extraction = StageState::Running;
            }
        }

        document
    }

    pub fn idle(step_order: &[(String, String)]) -> StatusDocument {
        let mut steps = BTreeMap::new();
        for (index, (name, display_name)) in step_order.iter().enumerate() {
            steps.insert(name.clone(), StepState::idle(index as i32, display_name.clone()));
        }
        StatusDocument { overall: OverallState::Idle, steps }
    }

    pub fn step_in_order(&self) -> Vec<(&str, &StepState)> {
        let mut steps: Vec<(&str, &StepState)> = self.steps.iter().map(|(name, step)| (name.as_str(), step)).collect();
        steps.sort_by_key(|(_, step)| step.order);
        steps
    }

    pub fn next_step_after(&self, step_name: &str) -> Option<&str> {
        let ordered = self.step_in_order();
        let position = ordered.iter().position(|(name, _)| *name == step_name)?;
        ordered.get(position + 1).map(|(name, _)| *name)
    }
}
