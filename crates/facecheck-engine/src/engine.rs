use crate::attendance::{AttendanceEvent, AttendanceSession};
use crate::config::Config;
use crate::enrollment::{EnrollmentEvent, EnrollmentSession};
use crate::error::EngineError;
use crate::events::{
    CallKind, CallOutcome, Effect, RemoteCall, SessionPhase, StatusEvent, StatusSnapshot,
    StatusUpdate, TickInput, Workflow,
};
use facecheck_core::{CapturedImage, EnrollmentPlan, FaceTracker};
use facecheck_gateway::{EmployeeRecord, RecognitionGateway};
use facecheck_hw::{Frame, FrameSource};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};
use uuid::Uuid;

/// Capacity of the status event channel. Once it is full, transient events
/// are dropped and the rest wait in the engine's backlog.
const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Messages sent from handles to the engine task.
enum EngineRequest {
    StartAttendance {
        reply: oneshot::Sender<Result<Uuid, EngineError>>,
    },
    StartEnrollment {
        employee_id: String,
        reply: oneshot::Sender<Result<Uuid, EngineError>>,
    },
    Dismiss {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    snapshot: watch::Receiver<StatusSnapshot>,
}

impl EngineHandle {
    /// Start the unattended check-in loop. Returns the new session id.
    pub async fn start_attendance(&self) -> Result<Uuid, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::StartAttendance { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Start guided enrollment for `employee_id`. Returns the new session id.
    pub async fn start_enrollment(&self, employee_id: impl Into<String>) -> Result<Uuid, EngineError> {
        let employee_id = employee_id.into();
        if employee_id.trim().is_empty() {
            return Err(EngineError::EmptyEmployeeId);
        }
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::StartEnrollment { employee_id, reply })
            .await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Close a displayed attendance result early.
    pub async fn dismiss(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Dismiss { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// End the running session. Any outstanding remote call is abandoned.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Stop { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn status(&self) -> Result<StatusSnapshot, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Status { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Latest workflow, phase and busy flag, updated as the engine runs.
    /// Never lags behind, unlike the event stream.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.snapshot.clone()
    }

    /// Stop any session and end the engine task.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Shutdown { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    async fn send(&self, request: EngineRequest) -> Result<(), EngineError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the orchestrator on the current tokio runtime.
///
/// The task owns the frame source and tracker exclusively, so only one
/// workflow can use the camera at a time. Status events for the
/// presentation layer arrive on the returned receiver.
pub fn spawn_engine<S, T>(
    source: S,
    tracker: T,
    gateway: Arc<dyn RecognitionGateway>,
    config: Config,
) -> (EngineHandle, mpsc::Receiver<StatusUpdate>)
where
    S: FrameSource + 'static,
    T: FaceTracker + 'static,
{
    let (tx, rx) = mpsc::channel(8);
    let (status_tx, status_rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
    let (snapshot_tx, snapshot_rx) = watch::channel(StatusSnapshot::default());

    let engine = Engine {
        source: Box::new(source),
        tracker: Box::new(tracker),
        gateway,
        config,
        status_tx,
        backlog: VecDeque::new(),
        snapshot_tx,
        active: None,
        ticker: None,
        next_generation: 1,
        last_frame: None,
    };
    tokio::spawn(engine.run(rx));

    let handle = EngineHandle {
        tx,
        snapshot: snapshot_rx,
    };
    (handle, status_rx)
}

enum Session {
    Attendance(AttendanceSession),
    Enrollment(EnrollmentSession),
}

impl Session {
    fn workflow(&self) -> Workflow {
        match self {
            Session::Attendance(_) => Workflow::Attendance,
            Session::Enrollment(_) => Workflow::Enrollment,
        }
    }

    fn phase(&self) -> SessionPhase {
        match self {
            Session::Attendance(s) => SessionPhase::Attendance(s.phase()),
            Session::Enrollment(s) => SessionPhase::Enrollment(s.phase()),
        }
    }

    fn generation(&self) -> u64 {
        match self {
            Session::Attendance(s) => s.generation(),
            Session::Enrollment(s) => s.generation(),
        }
    }

    fn busy(&self) -> bool {
        match self {
            Session::Attendance(s) => s.in_flight().is_some(),
            Session::Enrollment(s) => s.in_flight().is_some(),
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            Session::Attendance(_) => false,
            Session::Enrollment(s) => s.is_finished(),
        }
    }

    fn start(&self) -> Vec<Effect> {
        match self {
            Session::Attendance(s) => s.start(),
            Session::Enrollment(s) => s.start(),
        }
    }

    fn tick(&mut self, input: TickInput) -> Vec<Effect> {
        match self {
            Session::Attendance(s) => s.apply(AttendanceEvent::Tick(input)),
            Session::Enrollment(s) => s.apply(EnrollmentEvent::Tick(input)),
        }
    }

    fn complete(&mut self, generation: u64, outcome: CallOutcome) -> Vec<Effect> {
        match self {
            Session::Attendance(s) => s.apply(AttendanceEvent::Completed {
                generation,
                outcome,
            }),
            Session::Enrollment(s) => s.apply(EnrollmentEvent::Completed {
                generation,
                outcome,
            }),
        }
    }
}

struct ActiveSession {
    id: Uuid,
    session: Session,
    /// Remote call currently running for this session.
    task: Option<JoinHandle<()>>,
}

/// Output of a spawned task, routed back into the loop.
enum TaskResult {
    Call {
        generation: u64,
        outcome: CallOutcome,
    },
    /// Employee list fetched after `session_id` completed an enrollment.
    Employees {
        session_id: Uuid,
        employees: Vec<EmployeeRecord>,
    },
}

/// A [`RemoteCall`] with its image resolved, ready to send.
enum PreparedCall {
    ClassifyPose(CapturedImage),
    ProcessAttendance(CapturedImage),
    CheckDuplicate(CapturedImage),
    RegisterFace {
        employee_id: String,
        images: Vec<CapturedImage>,
    },
}

struct Engine {
    source: Box<dyn FrameSource>,
    tracker: Box<dyn FaceTracker>,
    gateway: Arc<dyn RecognitionGateway>,
    config: Config,
    status_tx: mpsc::Sender<StatusUpdate>,
    /// Non-transient events waiting for room in the status channel.
    backlog: VecDeque<StatusUpdate>,
    snapshot_tx: watch::Sender<StatusSnapshot>,
    active: Option<ActiveSession>,
    ticker: Option<Interval>,
    /// Generation handed to the next session; unique across sessions so a
    /// late result from an earlier session can never match.
    next_generation: u64,
    /// Frame sampled on the current tick, used for frame-based calls.
    last_frame: Option<Frame>,
}

impl Engine {
    async fn run(mut self, mut requests: mpsc::Receiver<EngineRequest>) {
        tracing::info!("engine task started");
        let (result_tx, mut results) = mpsc::channel::<TaskResult>(4);

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(EngineRequest::Shutdown { reply }) => {
                        self.end_session("shutdown");
                        let _ = reply.send(());
                        break;
                    }
                    Some(request) => self.on_request(request, &result_tx),
                    None => {
                        self.end_session("all handles dropped");
                        break;
                    }
                },
                Some(result) = results.recv() => self.on_result(result, &result_tx),
                _ = next_tick(&mut self.ticker) => self.on_tick(&result_tx),
                permit = self.status_tx.clone().reserve_owned(), if !self.backlog.is_empty() => {
                    match permit {
                        Ok(permit) => {
                            if let Some(update) = self.backlog.pop_front() {
                                permit.send(update);
                            }
                        }
                        Err(_) => self.backlog.clear(),
                    }
                }
            }

            let current = self.snapshot();
            self.snapshot_tx.send_if_modified(|snapshot| {
                let changed = *snapshot != current;
                *snapshot = current;
                changed
            });
        }
        tracing::info!("engine task exiting");
    }

    fn on_request(&mut self, request: EngineRequest, results: &mpsc::Sender<TaskResult>) {
        match request {
            EngineRequest::StartAttendance { reply } => {
                let outcome = self.begin(|generation, config| {
                    Ok(Session::Attendance(AttendanceSession::new(
                        config.attendance.clone(),
                        generation,
                    )))
                });
                let _ = reply.send(outcome);
            }
            EngineRequest::StartEnrollment { employee_id, reply } => {
                let outcome = self.begin(|generation, config| {
                    let plan = EnrollmentPlan::new(config.enrollment.stage_samples)?;
                    Ok(Session::Enrollment(EnrollmentSession::new(
                        employee_id,
                        plan,
                        config.enrollment.clone(),
                        generation,
                    )))
                });
                let _ = reply.send(outcome);
            }
            EngineRequest::Dismiss { reply } => {
                let outcome = match self.active.as_mut() {
                    Some(ActiveSession {
                        session: Session::Attendance(s),
                        ..
                    }) => Ok(s.apply(AttendanceEvent::Dismiss)),
                    Some(_) => Ok(Vec::new()),
                    None => Err(EngineError::NoSession),
                };
                let _ = reply.send(outcome.map(|effects| self.run_effects(effects, results)));
            }
            EngineRequest::Stop { reply } => {
                let outcome = if self.active.is_some() {
                    self.end_session("stopped");
                    Ok(())
                } else {
                    Err(EngineError::NoSession)
                };
                let _ = reply.send(outcome);
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.snapshot());
            }
            EngineRequest::Shutdown { .. } => {}
        }
    }

    fn begin<F>(&mut self, build: F) -> Result<Uuid, EngineError>
    where
        F: FnOnce(u64, &Config) -> Result<Session, EngineError>,
    {
        if let Some(active) = &self.active {
            return Err(EngineError::SessionActive(active.session.workflow()));
        }
        self.config.validate()?;

        let session = build(self.next_generation, &self.config)?;
        let id = Uuid::new_v4();
        let workflow = session.workflow();
        let period = match workflow {
            Workflow::Attendance => self.config.attendance.poll_interval(),
            Workflow::Enrollment => self.config.enrollment.poll_interval(),
        };

        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);

        tracing::info!(session = %id, %workflow, poll_ms = period.as_millis() as u64, "session started");
        let effects = session.start();
        self.active = Some(ActiveSession {
            id,
            session,
            task: None,
        });
        for effect in effects {
            if let Effect::Notify(event) = effect {
                self.emit(event);
            }
        }
        Ok(id)
    }

    fn on_tick(&mut self, results: &mpsc::Sender<TaskResult>) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        // Nothing to sample while a call is outstanding in a workflow that
        // would ignore the tick anyway.
        if active.session.busy() && matches!(active.session, Session::Enrollment(_)) {
            return;
        }

        let (width, height) = (self.config.camera_width, self.config.camera_height);
        let frame = match self.source.snapshot() {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!(error = %e, "frame capture failed");
                None
            }
        };

        let input = match &frame {
            Some(f) if !f.is_dark => TickInput {
                observation: self.tracker.track(&f.data, f.width, f.height),
                frame_width: f.width,
                frame_height: f.height,
            },
            Some(f) => {
                tracing::debug!(sequence = f.sequence, "dark frame");
                TickInput::empty(f.width, f.height)
            }
            None => TickInput::empty(width, height),
        };
        self.last_frame = frame;

        let effects = match self.active.as_mut() {
            Some(active) => active.session.tick(input),
            None => return,
        };
        self.run_effects(effects, results);
    }

    fn on_result(&mut self, result: TaskResult, results: &mpsc::Sender<TaskResult>) {
        let (generation, outcome) = match result {
            TaskResult::Call {
                generation,
                outcome,
            } => (generation, outcome),
            TaskResult::Employees {
                session_id,
                employees,
            } => {
                self.publish(session_id, StatusEvent::EnrollmentStatusRefreshed { employees });
                return;
            }
        };
        let Some(active) = self.active.as_mut() else {
            tracing::debug!(generation, "result with no session");
            return;
        };
        if active.session.generation() == generation {
            active.task = None;
        }
        let effects = active.session.complete(generation, outcome);
        self.run_effects(effects, results);
    }

    fn run_effects(&mut self, effects: Vec<Effect>, results: &mpsc::Sender<TaskResult>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Notify(event) => {
                    if matches!(event, StatusEvent::EnrollmentCompleted(_)) {
                        self.spawn_refresh(results);
                    }
                    self.emit(event);
                }
                Effect::Call { generation, call } => {
                    let kind = call.kind();
                    match self.prepare(call) {
                        Ok(prepared) => self.spawn_call(generation, prepared, results),
                        Err(message) => {
                            tracing::warn!(?kind, error = %message, "call not sent");
                            let outcome = CallOutcome::Failed { kind, message };
                            if let Some(active) = self.active.as_mut() {
                                queue.extend(active.session.complete(generation, outcome));
                            }
                        }
                    }
                }
            }
        }

        if self.active.as_ref().is_some_and(|a| a.session.is_finished()) {
            self.end_session("finished");
        }
    }

    /// Resolve the still for frame-based calls from the current tick's frame.
    fn prepare(&self, call: RemoteCall) -> Result<PreparedCall, String> {
        let still = || -> Result<CapturedImage, String> {
            let frame = self
                .last_frame
                .as_ref()
                .ok_or_else(|| "no camera frame available".to_string())?;
            if frame.is_dark {
                return Err("camera frame too dark".to_string());
            }
            frame
                .encode_jpeg(self.config.jpeg_quality)
                .map_err(|e| e.to_string())
        };

        Ok(match call {
            RemoteCall::ClassifyPose => PreparedCall::ClassifyPose(still()?),
            RemoteCall::ProcessAttendance => PreparedCall::ProcessAttendance(still()?),
            RemoteCall::CheckDuplicate(image) => PreparedCall::CheckDuplicate(image),
            RemoteCall::RegisterFace {
                employee_id,
                images,
            } => PreparedCall::RegisterFace {
                employee_id,
                images,
            },
        })
    }

    fn spawn_call(&mut self, generation: u64, call: PreparedCall, results: &mpsc::Sender<TaskResult>) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let gateway = Arc::clone(&self.gateway);
        let tx = results.clone();
        let session = active.id;

        let task = tokio::spawn(async move {
            let outcome = execute(gateway.as_ref(), call).await;
            if let CallOutcome::Failed { kind, message } = &outcome {
                tracing::warn!(%session, ?kind, error = %message, "remote call failed");
            }
            let _ = tx.send(TaskResult::Call { generation, outcome }).await;
        });
        active.task = Some(task);
    }

    /// Fetch enrollment status for the caller once a registration lands.
    /// Not tied to the session, which ends right after.
    fn spawn_refresh(&self, results: &mpsc::Sender<TaskResult>) {
        let Some(active) = &self.active else {
            return;
        };
        let session_id = active.id;
        let gateway = Arc::clone(&self.gateway);
        let tx = results.clone();
        tokio::spawn(async move {
            match gateway.list_employees().await {
                Ok(employees) => {
                    let _ = tx
                        .send(TaskResult::Employees {
                            session_id,
                            employees,
                        })
                        .await;
                }
                Err(e) => {
                    tracing::warn!(session = %session_id, error = %e, "enrollment status refresh failed");
                }
            }
        });
    }

    fn end_session(&mut self, reason: &str) {
        self.ticker = None;
        self.last_frame = None;
        let Some(active) = self.active.take() else {
            return;
        };
        if let Some(task) = active.task {
            task.abort();
        }
        self.next_generation = active.session.generation().wrapping_add(1);
        let workflow = active.session.workflow();
        tracing::info!(session = %active.id, %workflow, reason, "session ended");
        self.publish(active.id, StatusEvent::SessionEnded { workflow });
    }

    fn snapshot(&self) -> StatusSnapshot {
        match &self.active {
            Some(active) => StatusSnapshot {
                session_id: Some(active.id),
                workflow: Some(active.session.workflow()),
                phase: Some(active.session.phase()),
                busy: active.session.busy(),
            },
            None => StatusSnapshot::default(),
        }
    }

    fn emit(&mut self, event: StatusEvent) {
        if let Some(id) = self.active.as_ref().map(|a| a.id) {
            self.publish(id, event);
        }
    }

    /// Send an event without blocking the loop. Transient events are dropped
    /// when the consumer is behind; the rest queue in order behind the
    /// backlog.
    fn publish(&mut self, session_id: Uuid, event: StatusEvent) {
        let update = StatusUpdate { session_id, event };
        if !self.backlog.is_empty() {
            self.defer(update);
            return;
        }
        match self.status_tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(update)) => self.defer(update),
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn defer(&mut self, update: StatusUpdate) {
        if update.event.is_transient() {
            tracing::debug!(event = ?update.event, "status event dropped");
        } else {
            self.backlog.push_back(update);
        }
    }
}

/// Wait for the next poll tick, or forever when no session is running.
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn execute(gateway: &dyn RecognitionGateway, call: PreparedCall) -> CallOutcome {
    let failed = |kind: CallKind, e: facecheck_gateway::GatewayError| CallOutcome::Failed {
        kind,
        message: e.to_string(),
    };
    match call {
        PreparedCall::ClassifyPose(image) => match gateway.classify_pose(&image).await {
            Ok(classification) => CallOutcome::Pose {
                image,
                classification,
            },
            Err(e) => failed(CallKind::ClassifyPose, e),
        },
        PreparedCall::ProcessAttendance(image) => match gateway.process_attendance(&image).await {
            Ok(result) => CallOutcome::Attendance(result),
            Err(e) => failed(CallKind::ProcessAttendance, e),
        },
        PreparedCall::CheckDuplicate(image) => match gateway.check_duplicate(&image).await {
            Ok(check) => CallOutcome::Duplicate(check),
            Err(e) => failed(CallKind::CheckDuplicate, e),
        },
        PreparedCall::RegisterFace {
            employee_id,
            images,
        } => match gateway.register_face(&employee_id, &images).await {
            Ok(result) => CallOutcome::Registration(result),
            Err(e) => failed(CallKind::RegisterFace, e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AttendancePhase, AttendanceReport, EnrollmentPhase};
    use async_trait::async_trait;
    use facecheck_core::{FaceBox, FaceObservation, LandmarkSet, PoseLabel};
    use facecheck_gateway::{
        AttendanceOutcome, DuplicateCheck, EmployeeSummary, GatewayError, PoseClassification,
        RegistrationOutcome,
    };
    use facecheck_hw::CameraError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const W: u32 = 320;
    const H: u32 = 240;

    /// Bright synthetic frames; never fails.
    struct FakeCamera {
        sequence: u32,
    }

    impl FrameSource for FakeCamera {
        fn snapshot(&mut self) -> Result<Frame, CameraError> {
            self.sequence += 1;
            let data = (0..W * H).map(|i| 64 + (i % 128) as u8).collect();
            Ok(Frame::from_gray(data, W, H, self.sequence))
        }
    }

    /// Replays a shared script of observations; the last one repeats.
    struct ScriptedTracker {
        script: Arc<Mutex<VecDeque<Option<FaceObservation>>>>,
        last: Option<FaceObservation>,
    }

    impl FaceTracker for ScriptedTracker {
        fn track(&mut self, _gray: &[u8], _w: u32, _h: u32) -> Option<FaceObservation> {
            if let Some(next) = self.script.lock().unwrap().pop_front() {
                self.last = next;
            }
            self.last.clone()
        }
    }

    fn mesh(ear: f32) -> LandmarkSet {
        let mut points = vec![(0.5, 0.5); 478];
        let half = ear * 0.1 / 2.0;
        for (outer, inner, lids, cx) in [
            (33, 133, [(160, 144), (158, 153)], 0.4),
            (362, 263, [(385, 380), (387, 373)], 0.6),
        ] {
            points[outer] = (cx - 0.05, 0.4);
            points[inner] = (cx + 0.05, 0.4);
            for (upper, lower) in lids {
                points[upper] = (cx, 0.4 - half);
                points[lower] = (cx, 0.4 + half);
            }
        }
        LandmarkSet::new(points)
    }

    /// Face centred in the capture oval of the 320×240 fake frame.
    fn framed(ear: f32) -> Option<FaceObservation> {
        Some(FaceObservation {
            face_box: FaceBox::centered(160.0, 108.0, 100.0, 120.0),
            landmarks: Some(mesh(ear)),
        })
    }

    #[derive(Default)]
    struct FakeGateway {
        poses: Mutex<VecDeque<PoseLabel>>,
        duplicate: Option<(String, String)>,
        attendance_delay: Duration,
        classify_calls: AtomicUsize,
        duplicate_calls: AtomicUsize,
        attendance_calls: AtomicUsize,
        registered: Mutex<Option<(String, usize)>>,
    }

    #[async_trait]
    impl RecognitionGateway for FakeGateway {
        async fn classify_pose(
            &self,
            _image: &CapturedImage,
        ) -> Result<PoseClassification, GatewayError> {
            self.classify_calls.fetch_add(1, Ordering::SeqCst);
            let pose = self.poses.lock().unwrap().pop_front();
            Ok(PoseClassification {
                success: pose.is_some(),
                pose,
                ..Default::default()
            })
        }

        async fn check_duplicate(&self, _image: &CapturedImage) -> Result<DuplicateCheck, GatewayError> {
            self.duplicate_calls.fetch_add(1, Ordering::SeqCst);
            Ok(match &self.duplicate {
                Some((id, name)) => DuplicateCheck {
                    success: true,
                    is_duplicate: true,
                    employee_id: Some(id.clone()),
                    employee_name: Some(name.clone()),
                    ..Default::default()
                },
                None => DuplicateCheck {
                    success: true,
                    ..Default::default()
                },
            })
        }

        async fn process_attendance(
            &self,
            image: &CapturedImage,
        ) -> Result<AttendanceOutcome, GatewayError> {
            self.attendance_calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(&image.bytes()[..2], &[0xFF, 0xD8]);
            tokio::time::sleep(self.attendance_delay).await;
            Ok(AttendanceOutcome {
                success: true,
                message: Some("Check-in on time".into()),
                employee: Some(EmployeeSummary {
                    id: "E001".into(),
                    name: "Nguyen Van A".into(),
                    ..Default::default()
                }),
                time: Some("08:00".into()),
                ..Default::default()
            })
        }

        async fn register_face(
            &self,
            employee_id: &str,
            images: &[CapturedImage],
        ) -> Result<RegistrationOutcome, GatewayError> {
            *self.registered.lock().unwrap() = Some((employee_id.to_string(), images.len()));
            Ok(RegistrationOutcome {
                success: true,
                samples_count: Some(images.len()),
                ..Default::default()
            })
        }

        async fn list_employees(&self) -> Result<Vec<EmployeeRecord>, GatewayError> {
            let registered = self.registered.lock().unwrap().clone();
            Ok(registered
                .into_iter()
                .map(|(employee_id, _)| EmployeeRecord {
                    employee_id,
                    full_name: "Nguyen Van A".into(),
                    has_face: true,
                    ..Default::default()
                })
                .collect())
        }
    }

    fn test_config() -> Config {
        let mut config = Config {
            camera_width: W,
            camera_height: H,
            ..Default::default()
        };
        config.attendance.poll_interval_ms = 100;
        config.attendance.hold_ms = 500;
        config.attendance.settle_ms = 200;
        config.attendance.result_display_ms = 1000;
        config.attendance.cooldown_ms = 500;
        config.enrollment.poll_interval_ms = 100;
        config.enrollment.stage_pause_ms = 200;
        config.enrollment.stage_samples = [2, 1, 1, 1, 1];
        config
    }

    fn start(
        script: Vec<Option<FaceObservation>>,
        gateway: Arc<FakeGateway>,
        config: Config,
    ) -> (EngineHandle, mpsc::Receiver<StatusUpdate>) {
        let tracker = ScriptedTracker {
            script: Arc::new(Mutex::new(script.into())),
            last: None,
        };
        spawn_engine(FakeCamera { sequence: 0 }, tracker, gateway, config)
    }

    async fn wait_for<F>(events: &mut mpsc::Receiver<StatusUpdate>, mut pred: F) -> StatusEvent
    where
        F: FnMut(&StatusEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                let update = events.recv().await.expect("engine closed");
                if pred(&update.event) {
                    return update.event;
                }
            }
        })
        .await
        .expect("event not seen")
    }

    #[tokio::test(start_paused = true)]
    async fn test_attendance_round_trip() {
        let gateway = Arc::new(FakeGateway::default());
        let mut script = vec![framed(0.3); 6];
        script.extend([framed(0.1), framed(0.3)]);
        let (handle, mut events) = start(script, gateway.clone(), test_config());

        let id = handle.start_attendance().await.unwrap();
        let event = wait_for(&mut events, |e| matches!(e, StatusEvent::AttendanceResult(_))).await;
        match event {
            StatusEvent::AttendanceResult(AttendanceReport::Recognized { employee, .. }) => {
                assert_eq!(employee.name, "Nguyen Van A");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(gateway.attendance_calls.load(Ordering::SeqCst), 1);

        let status = handle.status().await.unwrap();
        assert_eq!(status.session_id, Some(id));
        assert_eq!(
            status.phase,
            Some(SessionPhase::Attendance(AttendancePhase::Result))
        );

        handle.dismiss().await.unwrap();
        wait_for(&mut events, |e| {
            *e == StatusEvent::PhaseChanged(SessionPhase::Attendance(AttendancePhase::Cooldown))
        })
        .await;
        // Same face still framed after cooldown: the loop starts over, it
        // never re-submits without a fresh blink.
        wait_for(&mut events, |e| {
            *e == StatusEvent::PhaseChanged(SessionPhase::Attendance(AttendancePhase::LivenessWait))
        })
        .await;
        assert_eq!(gateway.attendance_calls.load(Ordering::SeqCst), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_session_rejected() {
        let (handle, _events) = start(vec![None], Arc::new(FakeGateway::default()), test_config());
        handle.start_attendance().await.unwrap();
        assert!(matches!(
            handle.start_enrollment("E001").await,
            Err(EngineError::SessionActive(Workflow::Attendance))
        ));
        handle.stop().await.unwrap();
        handle.start_enrollment("E001").await.unwrap();
        assert!(matches!(
            handle.start_attendance().await,
            Err(EngineError::SessionActive(Workflow::Enrollment))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_without_session() {
        let (handle, _events) = start(vec![None], Arc::new(FakeGateway::default()), test_config());
        assert!(matches!(handle.stop().await, Err(EngineError::NoSession)));
        assert!(matches!(handle.dismiss().await, Err(EngineError::NoSession)));
        assert!(matches!(
            handle.start_enrollment("  ").await,
            Err(EngineError::EmptyEmployeeId)
        ));
        assert_eq!(handle.status().await.unwrap(), StatusSnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_rejects_session_and_engine_survives() {
        let mut config = test_config();
        config.attendance.poll_interval_ms = 0;
        let (handle, _events) = start(vec![None], Arc::new(FakeGateway::default()), config);

        assert!(matches!(
            handle.start_attendance().await,
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            handle.start_enrollment("E001").await,
            Err(EngineError::Config(_))
        ));
        assert_eq!(handle.status().await.unwrap(), StatusSnapshot::default());
        assert!(matches!(handle.stop().await, Err(EngineError::NoSession)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_consumer_still_receives_result() {
        let gateway = Arc::new(FakeGateway::default());
        let mut config = test_config();
        config.attendance.hold_ms = 8000;
        // 80 ticks of holding, then a blink.
        let mut script = vec![framed(0.3); 80];
        script.extend([framed(0.1), framed(0.3)]);
        let (handle, mut events) = start(script, gateway.clone(), config);
        let snapshots = handle.subscribe();

        handle.start_attendance().await.unwrap();
        // Nobody reads events while the whole check-in runs.
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(gateway.attendance_calls.load(Ordering::SeqCst), 1);
        assert!(snapshots.borrow().phase.is_some());

        let event = wait_for(&mut events, |e| matches!(e, StatusEvent::AttendanceResult(_))).await;
        assert!(matches!(
            event,
            StatusEvent::AttendanceResult(AttendanceReport::Recognized { .. })
        ));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_follows_phase() {
        let (handle, _events) = start(vec![framed(0.3)], Arc::new(FakeGateway::default()), test_config());
        let mut snapshots = handle.subscribe();
        let id = handle.start_attendance().await.unwrap();

        tokio::time::timeout(
            Duration::from_secs(10),
            snapshots.wait_for(|s| {
                s.phase == Some(SessionPhase::Attendance(AttendancePhase::LivenessWait))
            }),
        )
        .await
        .expect("snapshot never reached liveness wait")
        .unwrap();
        assert_eq!(snapshots.borrow().session_id, Some(id));

        handle.stop().await.unwrap();
        snapshots.wait_for(|s| s.session_id.is_none()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_in_flight_submission() {
        let gateway = Arc::new(FakeGateway {
            attendance_delay: Duration::from_secs(30),
            ..Default::default()
        });
        let mut script = vec![framed(0.3); 6];
        script.extend([framed(0.1), framed(0.3)]);
        let (handle, mut events) = start(script, gateway.clone(), test_config());

        handle.start_attendance().await.unwrap();
        wait_for(&mut events, |e| {
            *e == StatusEvent::PhaseChanged(SessionPhase::Attendance(AttendancePhase::Submitting))
        })
        .await;
        assert!(handle.status().await.unwrap().busy);

        handle.stop().await.unwrap();
        wait_for(&mut events, |e| matches!(e, StatusEvent::SessionEnded { .. })).await;
        assert_eq!(handle.status().await.unwrap(), StatusSnapshot::default());

        // The abandoned call never produces a result.
        tokio::time::sleep(Duration::from_secs(60)).await;
        while let Ok(update) = events.try_recv() {
            assert!(!matches!(update.event, StatusEvent::AttendanceResult(_)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrollment_full_run() {
        let gateway = Arc::new(FakeGateway {
            poses: Mutex::new(
                [
                    PoseLabel::Front,
                    PoseLabel::Left, // wrong pose for the front stage
                    PoseLabel::Front,
                    PoseLabel::Left,
                    PoseLabel::Right,
                    PoseLabel::Up,
                    PoseLabel::Down,
                ]
                .into(),
            ),
            ..Default::default()
        });
        let (handle, mut events) = start(vec![framed(0.3)], gateway.clone(), test_config());

        handle.start_enrollment("E001").await.unwrap();
        let event = wait_for(&mut events, |e| matches!(e, StatusEvent::EnrollmentCompleted(_))).await;
        match event {
            StatusEvent::EnrollmentCompleted(report) => {
                assert_eq!(report.employee_id, "E001");
                assert_eq!(report.samples_count, 6);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        wait_for(&mut events, |e| {
            *e == StatusEvent::SessionEnded {
                workflow: Workflow::Enrollment,
            }
        })
        .await;
        match wait_for(&mut events, |e| {
            matches!(e, StatusEvent::EnrollmentStatusRefreshed { .. })
        })
        .await
        {
            StatusEvent::EnrollmentStatusRefreshed { employees } => {
                assert_eq!(employees.len(), 1);
                assert_eq!(employees[0].employee_id, "E001");
                assert!(employees[0].has_face);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        assert_eq!(gateway.duplicate_calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.classify_calls.load(Ordering::SeqCst), 7);
        assert_eq!(
            *gateway.registered.lock().unwrap(),
            Some(("E001".to_string(), 6))
        );
        assert_eq!(handle.status().await.unwrap().session_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrollment_duplicate_aborts() {
        let gateway = Arc::new(FakeGateway {
            poses: Mutex::new([PoseLabel::Front, PoseLabel::Front].into()),
            duplicate: Some(("E042".into(), "Tran Van B".into())),
            ..Default::default()
        });
        let (handle, mut events) = start(vec![framed(0.3)], gateway.clone(), test_config());

        handle.start_enrollment("E001").await.unwrap();
        let event = wait_for(&mut events, |e| matches!(e, StatusEvent::DuplicateFound { .. })).await;
        assert_eq!(
            event,
            StatusEvent::DuplicateFound {
                employee_id: Some("E042".into()),
                employee_name: Some("Tran Van B".into()),
            }
        );
        wait_for(&mut events, |e| {
            *e == StatusEvent::PhaseChanged(SessionPhase::Enrollment(EnrollmentPhase::DuplicateFound))
                || matches!(e, StatusEvent::SessionEnded { .. })
        })
        .await;
        assert!(gateway.registered.lock().unwrap().is_none());
        assert_eq!(gateway.classify_calls.load(Ordering::SeqCst), 2);
    }
}
