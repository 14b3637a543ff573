//! Unattended check-in state machine.
//!
//! Idle → FacePresent → Framed → HoldCountdown → LivenessWait →
//! LivenessConfirmed → Submitting → Result → Cooldown → Idle.
//!
//! Losing the face before submission always drops all progress. Time only
//! advances by one poll period per tick, so the hold, settle, display and
//! cooldown windows are exact multiples of the period.

use crate::config::AttendanceConfig;
use crate::events::{
    AttendancePhase, AttendanceReport, CallKind, CallOutcome, Effect, RemoteCall, SessionPhase,
    StatusEvent, TickInput,
};
use facecheck_core::{average_ear, is_valid_detection};
use facecheck_gateway::AttendanceOutcome;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum AttendanceEvent {
    Tick(TickInput),
    Completed { generation: u64, outcome: CallOutcome },
    /// User dismissed the result early.
    Dismiss,
}

#[derive(Debug)]
pub struct AttendanceSession {
    config: AttendanceConfig,
    phase: AttendancePhase,
    /// Changes whenever progress is discarded; completions carrying an
    /// older value are ignored.
    generation: u64,
    in_flight: Option<CallKind>,
    held: Duration,
    eye_closed: bool,
    liveness_elapsed: Duration,
    settle_elapsed: Duration,
    /// Time left in `Result` or `Cooldown`.
    remaining: Duration,
}

impl AttendanceSession {
    pub fn new(config: AttendanceConfig, generation: u64) -> Self {
        Self {
            config,
            phase: AttendancePhase::Idle,
            generation,
            in_flight: None,
            held: Duration::ZERO,
            eye_closed: false,
            liveness_elapsed: Duration::ZERO,
            settle_elapsed: Duration::ZERO,
            remaining: Duration::ZERO,
        }
    }

    pub fn phase(&self) -> AttendancePhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn in_flight(&self) -> Option<CallKind> {
        self.in_flight
    }

    pub fn held(&self) -> Duration {
        self.held
    }

    pub fn eye_closed(&self) -> bool {
        self.eye_closed
    }

    /// Effects announcing the initial state.
    pub fn start(&self) -> Vec<Effect> {
        vec![notify_phase(self.phase)]
    }

    pub fn apply(&mut self, event: AttendanceEvent) -> Vec<Effect> {
        match event {
            AttendanceEvent::Tick(input) => self.on_tick(input),
            AttendanceEvent::Completed {
                generation,
                outcome,
            } => self.on_completed(generation, outcome),
            AttendanceEvent::Dismiss => {
                if self.phase == AttendancePhase::Result {
                    let mut effects = Vec::new();
                    self.enter_cooldown(&mut effects);
                    effects
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn on_tick(&mut self, input: TickInput) -> Vec<Effect> {
        let period = self.config.poll_interval();
        let mut effects = Vec::new();

        match self.phase {
            AttendancePhase::Submitting => {}
            AttendancePhase::Result => {
                self.remaining = self.remaining.saturating_sub(period);
                if self.remaining.is_zero() {
                    self.enter_cooldown(&mut effects);
                }
            }
            AttendancePhase::Cooldown => {
                self.remaining = self.remaining.saturating_sub(period);
                if self.remaining.is_zero() {
                    self.reset_to(AttendancePhase::Idle, &mut effects);
                }
            }
            _ => self.track(input, period, &mut effects),
        }
        effects
    }

    /// Pre-submission phases: framing, hold, liveness, settle.
    fn track(&mut self, input: TickInput, period: Duration, effects: &mut Vec<Effect>) {
        let (w, h) = (input.frame_width, input.frame_height);
        let Some(face) = input
            .observation
            .filter(|o| is_valid_detection(&o.face_box, w, h))
        else {
            self.reset_to(AttendancePhase::Idle, effects);
            return;
        };

        if !self.config.oval.contains(&face.face_box, w, h) {
            self.reset_to(AttendancePhase::FacePresent, effects);
            return;
        }

        match self.phase {
            AttendancePhase::Idle | AttendancePhase::FacePresent => {
                self.held = period;
                self.set_phase(AttendancePhase::Framed, effects);
                self.check_hold(effects);
            }
            AttendancePhase::Framed | AttendancePhase::HoldCountdown => {
                self.held += period;
                self.set_phase(AttendancePhase::HoldCountdown, effects);
                self.check_hold(effects);
            }
            AttendancePhase::LivenessWait => {
                self.liveness_elapsed += period;
                if let Some(landmarks) = face.landmarks.as_ref() {
                    let step = self
                        .config
                        .blink
                        .step(self.eye_closed, average_ear(landmarks));
                    self.eye_closed = step.eye_closed;
                    if step.blinked {
                        self.settle_elapsed = Duration::ZERO;
                        self.set_phase(AttendancePhase::LivenessConfirmed, effects);
                        return;
                    }
                }
                if let Some(timeout) = self.config.liveness_timeout() {
                    if self.liveness_elapsed >= timeout {
                        effects.push(Effect::Notify(StatusEvent::LivenessTimedOut));
                        self.reset_to(AttendancePhase::FacePresent, effects);
                    }
                }
            }
            AttendancePhase::LivenessConfirmed => {
                self.settle_elapsed += period;
                if self.settle_elapsed >= self.config.settle() && self.in_flight.is_none() {
                    self.in_flight = Some(CallKind::ProcessAttendance);
                    self.set_phase(AttendancePhase::Submitting, effects);
                    effects.push(Effect::Call {
                        generation: self.generation,
                        call: RemoteCall::ProcessAttendance,
                    });
                }
            }
            AttendancePhase::Submitting | AttendancePhase::Result | AttendancePhase::Cooldown => {}
        }
    }

    fn check_hold(&mut self, effects: &mut Vec<Effect>) {
        let required = self.config.hold();
        effects.push(Effect::Notify(StatusEvent::HoldProgress {
            held: self.held.min(required),
            required,
        }));
        if self.held >= required {
            self.eye_closed = false;
            self.liveness_elapsed = Duration::ZERO;
            self.set_phase(AttendancePhase::LivenessWait, effects);
        }
    }

    fn on_completed(&mut self, generation: u64, outcome: CallOutcome) -> Vec<Effect> {
        if generation != self.generation
            || self.phase != AttendancePhase::Submitting
            || self.in_flight != Some(outcome.kind())
        {
            tracing::debug!(
                generation,
                current = self.generation,
                phase = ?self.phase,
                "discarding stale attendance result"
            );
            return Vec::new();
        }
        self.in_flight = None;

        let report = match outcome {
            CallOutcome::Attendance(result) => report_from(result),
            CallOutcome::Failed { message, .. } => AttendanceReport::Rejected { message },
            _ => return Vec::new(),
        };

        let mut effects = vec![Effect::Notify(StatusEvent::AttendanceResult(report))];
        self.remaining = self.config.result_display();
        self.set_phase(AttendancePhase::Result, &mut effects);
        effects
    }

    fn enter_cooldown(&mut self, effects: &mut Vec<Effect>) {
        self.remaining = self.config.cooldown();
        if self.remaining.is_zero() {
            self.reset_to(AttendancePhase::Idle, effects);
        } else {
            self.set_phase(AttendancePhase::Cooldown, effects);
        }
    }

    /// Drop hold and liveness progress and move to `phase`.
    fn reset_to(&mut self, phase: AttendancePhase, effects: &mut Vec<Effect>) {
        self.held = Duration::ZERO;
        self.eye_closed = false;
        self.liveness_elapsed = Duration::ZERO;
        self.settle_elapsed = Duration::ZERO;
        if self.phase != phase {
            self.generation = self.generation.wrapping_add(1);
            self.set_phase(phase, effects);
        }
    }

    fn set_phase(&mut self, phase: AttendancePhase, effects: &mut Vec<Effect>) {
        if self.phase != phase {
            tracing::debug!(from = ?self.phase, to = ?phase, "attendance phase");
            self.phase = phase;
            effects.push(notify_phase(phase));
        }
    }
}

fn notify_phase(phase: AttendancePhase) -> Effect {
    Effect::Notify(StatusEvent::PhaseChanged(SessionPhase::Attendance(phase)))
}

fn report_from(result: AttendanceOutcome) -> AttendanceReport {
    match (result.success, result.employee) {
        (true, Some(employee)) => AttendanceReport::Recognized {
            employee,
            message: result.message,
            attendance: result.attendance,
            time: result
                .time
                .unwrap_or_else(|| chrono::Local::now().format("%H:%M").to_string()),
        },
        (success, _) => AttendanceReport::Rejected {
            message: result
                .error
                .or(result.message)
                .unwrap_or_else(|| {
                    if success {
                        "service returned no employee".to_string()
                    } else {
                        "attendance check failed".to_string()
                    }
                }),
        },
    }
}
