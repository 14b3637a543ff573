//! Guided multi-pose enrollment state machine.
//!
//! Each tick with a face in view asks the remote classifier for the pose of
//! the current frame. Samples matching the active stage's pose accumulate
//! until the stage is full. The first time the front stage fills, one
//! duplicate lookup runs on its last sample and a match aborts the session.
//! After the last stage every sample goes out in a single registration call.

use crate::config::EnrollmentConfig;
use crate::events::{
    CallKind, CallOutcome, Effect, EnrollmentPhase, EnrollmentReport, RemoteCall, SessionPhase,
    StatusEvent, TickInput,
};
use facecheck_core::{average_ear, is_valid_detection, CapturedImage, EnrollmentPlan, PoseStage};
use facecheck_gateway::{DuplicateCheck, PoseClassification, RegistrationOutcome};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum EnrollmentEvent {
    Tick(TickInput),
    Completed { generation: u64, outcome: CallOutcome },
}

#[derive(Debug)]
pub struct EnrollmentSession {
    employee_id: String,
    plan: EnrollmentPlan,
    config: EnrollmentConfig,
    phase: EnrollmentPhase,
    generation: u64,
    in_flight: Option<CallKind>,
    stage_index: usize,
    stage_count: usize,
    samples: Vec<CapturedImage>,
    duplicate_checked: bool,
    eye_closed: bool,
    pause_remaining: Duration,
}

impl EnrollmentSession {
    pub fn new(
        employee_id: impl Into<String>,
        plan: EnrollmentPlan,
        config: EnrollmentConfig,
        generation: u64,
    ) -> Self {
        let phase = if config.blink_gate {
            EnrollmentPhase::BlinkGate
        } else {
            EnrollmentPhase::Capturing
        };
        Self {
            employee_id: employee_id.into(),
            plan,
            config,
            phase,
            generation,
            in_flight: None,
            stage_index: 0,
            stage_count: 0,
            samples: Vec::new(),
            duplicate_checked: false,
            eye_closed: false,
            pause_remaining: Duration::ZERO,
        }
    }

    pub fn phase(&self) -> EnrollmentPhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn in_flight(&self) -> Option<CallKind> {
        self.in_flight
    }

    pub fn stage_index(&self) -> usize {
        self.stage_index
    }

    pub fn stage_count(&self) -> usize {
        self.stage_count
    }

    pub fn samples(&self) -> &[CapturedImage] {
        &self.samples
    }

    pub fn duplicate_checked(&self) -> bool {
        self.duplicate_checked
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn start(&self) -> Vec<Effect> {
        let mut effects = vec![notify_phase(self.phase)];
        if self.phase == EnrollmentPhase::Capturing {
            self.announce_stage(&mut effects);
        }
        effects
    }

    pub fn apply(&mut self, event: EnrollmentEvent) -> Vec<Effect> {
        match event {
            EnrollmentEvent::Tick(input) => self.on_tick(input),
            EnrollmentEvent::Completed {
                generation,
                outcome,
            } => self.on_completed(generation, outcome),
        }
    }

    fn current_stage(&self) -> Option<PoseStage> {
        self.plan.stage(self.stage_index).copied()
    }

    fn on_tick(&mut self, input: TickInput) -> Vec<Effect> {
        let mut effects = Vec::new();
        // One classification at a time keeps stage advancement in order.
        if self.in_flight.is_some() {
            return effects;
        }

        let (w, h) = (input.frame_width, input.frame_height);
        let face = input
            .observation
            .filter(|o| is_valid_detection(&o.face_box, w, h));

        match self.phase {
            EnrollmentPhase::BlinkGate => {
                // A close and an open must be seen on the same face.
                let Some(face) = face else {
                    self.eye_closed = false;
                    return effects;
                };
                let Some(landmarks) = face.landmarks else {
                    return effects;
                };
                let step = self
                    .config
                    .blink
                    .step(self.eye_closed, average_ear(&landmarks));
                self.eye_closed = step.eye_closed;
                if step.blinked {
                    self.set_phase(EnrollmentPhase::Capturing, &mut effects);
                    self.announce_stage(&mut effects);
                }
            }
            EnrollmentPhase::Capturing => {
                if face.is_some() {
                    self.issue(RemoteCall::ClassifyPose, &mut effects);
                }
            }
            EnrollmentPhase::Pacing => {
                self.pause_remaining = self
                    .pause_remaining
                    .saturating_sub(self.config.poll_interval());
                if self.pause_remaining.is_zero() {
                    self.set_phase(EnrollmentPhase::Capturing, &mut effects);
                    self.announce_stage(&mut effects);
                }
            }
            EnrollmentPhase::CheckingDuplicate
            | EnrollmentPhase::Submitting
            | EnrollmentPhase::Completed
            | EnrollmentPhase::DuplicateFound
            | EnrollmentPhase::Failed => {}
        }
        effects
    }

    fn on_completed(&mut self, generation: u64, outcome: CallOutcome) -> Vec<Effect> {
        let expected_phase = match outcome.kind() {
            CallKind::ClassifyPose => EnrollmentPhase::Capturing,
            CallKind::CheckDuplicate => EnrollmentPhase::CheckingDuplicate,
            CallKind::RegisterFace => EnrollmentPhase::Submitting,
            CallKind::ProcessAttendance => {
                return Vec::new();
            }
        };
        if generation != self.generation
            || self.phase != expected_phase
            || self.in_flight != Some(outcome.kind())
        {
            tracing::debug!(
                generation,
                current = self.generation,
                phase = ?self.phase,
                "discarding stale enrollment result"
            );
            return Vec::new();
        }
        self.in_flight = None;

        let mut effects = Vec::new();
        match outcome {
            CallOutcome::Pose {
                image,
                classification,
            } => self.on_pose(image, classification, &mut effects),
            CallOutcome::Duplicate(check) => self.on_duplicate(check, &mut effects),
            CallOutcome::Registration(result) => self.on_registration(result, &mut effects),
            CallOutcome::Failed {
                kind: CallKind::ClassifyPose,
                message,
            } => {
                // Transient: the next tick classifies a fresh frame.
                effects.push(Effect::Notify(StatusEvent::ClassificationFailed { message }));
            }
            CallOutcome::Failed { message, .. } => self.fail(message, &mut effects),
            CallOutcome::Attendance(_) => {}
        }
        effects
    }

    fn on_pose(
        &mut self,
        image: CapturedImage,
        classification: PoseClassification,
        effects: &mut Vec<Effect>,
    ) {
        let Some(stage) = self.current_stage() else {
            return;
        };
        if !classification.success {
            let message = classification
                .error
                .unwrap_or_else(|| "pose classification failed".to_string());
            effects.push(Effect::Notify(StatusEvent::ClassificationFailed { message }));
            return;
        }
        if classification.pose != Some(stage.label) {
            effects.push(Effect::Notify(StatusEvent::PoseMismatch {
                expected: stage.label,
                detected: classification.pose,
            }));
            return;
        }

        self.samples.push(image);
        self.stage_count += 1;
        effects.push(Effect::Notify(StatusEvent::SampleAccepted {
            pose: stage.label,
            stage_count: self.stage_count,
            required: stage.required_samples,
            total: self.samples.len(),
        }));

        if self.stage_count < stage.required_samples {
            return;
        }

        if self.stage_index == 0 && !self.duplicate_checked {
            if let Some(last) = self.samples.last().cloned() {
                self.duplicate_checked = true;
                self.set_phase(EnrollmentPhase::CheckingDuplicate, effects);
                self.issue(RemoteCall::CheckDuplicate(last), effects);
                return;
            }
        }
        self.advance(effects);
    }

    fn on_duplicate(&mut self, check: DuplicateCheck, effects: &mut Vec<Effect>) {
        if check.is_duplicate {
            tracing::warn!(
                employee_id = ?check.employee_id,
                "face already enrolled, aborting enrollment"
            );
            effects.push(Effect::Notify(StatusEvent::DuplicateFound {
                employee_id: check.employee_id,
                employee_name: check.employee_name,
            }));
            self.set_phase(EnrollmentPhase::DuplicateFound, effects);
        } else if !check.success {
            let message = check
                .error
                .unwrap_or_else(|| "duplicate check failed".to_string());
            self.fail(message, effects);
        } else {
            self.advance(effects);
        }
    }

    fn on_registration(&mut self, result: RegistrationOutcome, effects: &mut Vec<Effect>) {
        if result.success {
            let report = EnrollmentReport {
                employee_id: self.employee_id.clone(),
                samples_count: result.samples_count.unwrap_or(self.samples.len()),
                employee: result.employee,
                message: result.message,
                timestamp: result.timestamp,
            };
            tracing::info!(
                employee_id = %self.employee_id,
                samples = report.samples_count,
                "enrollment registered"
            );
            effects.push(Effect::Notify(StatusEvent::EnrollmentCompleted(report)));
            self.set_phase(EnrollmentPhase::Completed, effects);
        } else {
            let message = result
                .error_message()
                .unwrap_or("registration failed")
                .to_string();
            self.fail(message, effects);
        }
    }

    /// Close the current stage and move on: pause before the next stage, or
    /// submit the batch after the last one.
    fn advance(&mut self, effects: &mut Vec<Effect>) {
        self.stage_index += 1;
        self.stage_count = 0;

        if self.stage_index >= self.plan.len() {
            let call = RemoteCall::RegisterFace {
                employee_id: self.employee_id.clone(),
                images: self.samples.clone(),
            };
            self.set_phase(EnrollmentPhase::Submitting, effects);
            self.issue(call, effects);
            return;
        }

        self.pause_remaining = self.config.stage_pause();
        if self.pause_remaining.is_zero() {
            self.set_phase(EnrollmentPhase::Capturing, effects);
            self.announce_stage(effects);
        } else {
            self.set_phase(EnrollmentPhase::Pacing, effects);
        }
    }

    fn fail(&mut self, message: String, effects: &mut Vec<Effect>) {
        tracing::warn!(employee_id = %self.employee_id, error = %message, "enrollment failed");
        effects.push(Effect::Notify(StatusEvent::EnrollmentFailed { message }));
        self.set_phase(EnrollmentPhase::Failed, effects);
    }

    fn issue(&mut self, call: RemoteCall, effects: &mut Vec<Effect>) {
        self.in_flight = Some(call.kind());
        effects.push(Effect::Call {
            generation: self.generation,
            call,
        });
    }

    fn announce_stage(&self, effects: &mut Vec<Effect>) {
        if let Some(stage) = self.current_stage() {
            effects.push(Effect::Notify(StatusEvent::StageStarted {
                index: self.stage_index,
                pose: stage.label,
                required: stage.required_samples,
            }));
        }
    }

    fn set_phase(&mut self, phase: EnrollmentPhase, effects: &mut Vec<Effect>) {
        if self.phase != phase {
            tracing::debug!(from = ?self.phase, to = ?phase, stage = self.stage_index, "enrollment phase");
            self.phase = phase;
            effects.push(notify_phase(phase));
        }
    }
}

fn notify_phase(phase: EnrollmentPhase) -> Effect {
    Effect::Notify(StatusEvent::PhaseChanged(SessionPhase::Enrollment(phase)))
}
