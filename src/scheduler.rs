//! Daily job registry and the polling loop that fires due jobs.

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::schedule::{Schedule, TimeOfDay};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A recurring daily trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub time: TimeOfDay,
    pub file: PathBuf,
}

/// Receives every job that comes due. Must return quickly: the tick loop
/// waits for it.
pub trait JobHandler: Send + Sync {
    fn fire(&self, job: &Job);
}

impl<F> JobHandler for F
where
    F: Fn(&Job) + Send + Sync,
{
    fn fire(&self, job: &Job) {
        self(job)
    }
}

pub struct JobScheduler {
    jobs: Mutex<Vec<Job>>,
    /// Last minute evaluated, so a minute fires at most once.
    last_evaluated: Mutex<Option<(NaiveDate, TimeOfDay)>>,
    /// Date each time of day last fired, so a repeated wall-clock minute
    /// does not fire twice on one date.
    fired_on: Mutex<HashMap<TimeOfDay, NaiveDate>>,
    handler: Arc<dyn JobHandler>,
    clock: Arc<dyn Clock>,
    tick_period: Duration,
}

impl JobScheduler {
    pub fn new(handler: Arc<dyn JobHandler>, clock: Arc<dyn Clock>, tick_period: Duration) -> Self {
        JobScheduler {
            jobs: Mutex::new(Vec::new()),
            last_evaluated: Mutex::new(None),
            fired_on: Mutex::new(HashMap::new()),
            handler,
            clock,
            tick_period,
        }
    }

    /// Replace the whole job set with one job per schedule entry.
    pub fn register_all(&self, schedule: &Schedule) {
        let jobs: Vec<Job> = schedule
            .iter()
            .map(|(time, file)| Job {
                time,
                file: file.to_path_buf(),
            })
            .collect();
        tracing::debug!(count = jobs.len(), "jobs registered");
        *self.jobs.lock().unwrap_or_else(PoisonError::into_inner) = jobs;
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// One evaluation against the scheduler's clock. Returns the number of
    /// jobs fired.
    pub fn tick(&self) -> usize {
        self.tick_at(self.clock.now())
    }

    /// One evaluation at `now`.
    ///
    /// Jobs whose time equals the current minute fire once, on the first tick
    /// inside that minute. A minute skipped by a clock jump never fires; a
    /// minute repeated by a clock jump on the same date does not fire again.
    pub fn tick_at(&self, now: NaiveDateTime) -> usize {
        let (today, minute) = (now.date(), TimeOfDay::of(&now.time()));
        {
            let mut last = self.last_evaluated.lock().unwrap_or_else(PoisonError::into_inner);
            if *last == Some((today, minute)) {
                return 0;
            }
            *last = Some((today, minute));
        }

        let due: Vec<Job> = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|job| job.time == minute)
            .cloned()
            .collect();
        if due.is_empty() {
            return 0;
        }

        {
            let mut fired = self.fired_on.lock().unwrap_or_else(PoisonError::into_inner);
            if fired.get(&minute) == Some(&today) {
                tracing::debug!(time = %minute, "minute repeated by clock change, not firing again");
                return 0;
            }
            fired.insert(minute, today);
        }

        for job in &due {
            tracing::info!(time = %job.time, file = %job.file.display(), "job due");
            self.handler.fire(job);
        }
        due.len()
    }

    /// Start the tick loop on its own thread.
    pub fn spawn(self: &Arc<Self>) -> Result<SchedulerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let scheduler = Arc::clone(self);

        let thread = thread::Builder::new()
            .name("scheduler-tick".into())
            .spawn(move || scheduler.run(shutdown_rx))
            .map_err(|source| Error::Spawn {
                name: "scheduler",
                source,
            })?;

        Ok(SchedulerHandle {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    fn run(&self, shutdown: mpsc::Receiver<()>) {
        tracing::info!(period_ms = self.tick_period.as_millis() as u64, "scheduler loop started");
        loop {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.tick()));
            if result.is_err() {
                tracing::error!("scheduler tick panicked, continuing");
            }

            match shutdown.recv_timeout(self.tick_period) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::info!("scheduler loop stopped");
    }
}

/// Owns the tick loop thread. Dropping the handle stops the loop.
pub struct SchedulerHandle {
    shutdown: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Wake the loop, ask it to exit and wait for it.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("scheduler thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{ManualClock, wait_until};
    use std::time::Instant;

    #[derive(Default)]
    struct Recorder {
        fired: Mutex<Vec<Job>>,
    }

    impl JobHandler for Recorder {
        fn fire(&self, job: &Job) {
            self.fired.lock().unwrap().push(job.clone());
        }
    }

    impl Recorder {
        fn files(&self) -> Vec<String> {
            self.fired
                .lock()
                .unwrap()
                .iter()
                .map(|j| j.file.display().to_string())
                .collect()
        }
    }

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    fn setup(entries: &[(&str, &str)]) -> (Arc<JobScheduler>, Arc<Recorder>, Arc<ManualClock>) {
        let recorder = Arc::new(Recorder::default());
        let clock = Arc::new(ManualClock::at(6, 59, 0));
        let scheduler = Arc::new(JobScheduler::new(
            recorder.clone(),
            clock.clone(),
            Duration::from_millis(10),
        ));
        let mut schedule = Schedule::new();
        for (time, file) in entries {
            schedule.upsert(t(time), *file).unwrap();
        }
        scheduler.register_all(&schedule);
        (scheduler, recorder, clock)
    }

    #[test]
    fn fires_once_when_minute_arrives() {
        let (sched, rec, clock) = setup(&[("07:00", "a.wav")]);

        assert_eq!(sched.tick(), 0);
        clock.set_time(7, 0, 0);
        assert_eq!(sched.tick(), 1);
        // Further ticks inside the same minute do nothing.
        for s in [0, 1, 30, 59] {
            clock.set_time(7, 0, s);
            assert_eq!(sched.tick(), 0);
        }
        clock.set_time(7, 1, 0);
        assert_eq!(sched.tick(), 0);
        assert_eq!(rec.files(), vec!["a.wav"]);
    }

    #[test]
    fn fires_again_next_day() {
        let (sched, rec, clock) = setup(&[("07:00", "a.wav")]);
        clock.set_time(7, 0, 10);
        sched.tick();
        clock.advance(Duration::from_secs(24 * 3600));
        assert_eq!(sched.tick(), 1);
        assert_eq!(rec.files().len(), 2);
    }

    #[test]
    fn repeated_minute_does_not_fire_twice() {
        let (sched, rec, clock) = setup(&[("01:30", "night.wav")]);
        clock.set_time(1, 30, 0);
        assert_eq!(sched.tick(), 1);
        clock.set_time(1, 59, 0);
        sched.tick();
        // Clocks fall back an hour.
        clock.set_time(1, 0, 0);
        sched.tick();
        clock.set_time(1, 30, 0);
        assert_eq!(sched.tick(), 0);
        assert_eq!(rec.files().len(), 1);
    }

    #[test]
    fn skipped_minute_never_fires() {
        let (sched, rec, clock) = setup(&[("02:30", "a.wav")]);
        clock.set_time(1, 59, 59);
        sched.tick();
        // Clocks spring forward an hour.
        clock.set_time(3, 0, 0);
        sched.tick();
        assert!(rec.files().is_empty());
    }

    #[test]
    fn only_matching_jobs_fire() {
        let (sched, rec, clock) = setup(&[("07:00", "a.wav"), ("07:01", "b.wav"), ("19:00", "c.wav")]);
        clock.set_time(7, 1, 0);
        assert_eq!(sched.tick(), 1);
        assert_eq!(rec.files(), vec!["b.wav"]);
    }

    #[test]
    fn register_all_replaces_job_set() {
        let (sched, _, _) = setup(&[("07:00", "a.wav"), ("08:00", "b.wav")]);
        assert_eq!(sched.job_count(), 2);

        let mut schedule = Schedule::new();
        schedule.upsert(t("09:00"), "c.wav").unwrap();
        sched.register_all(&schedule);
        assert_eq!(
            sched.jobs(),
            vec![Job {
                time: t("09:00"),
                file: "c.wav".into()
            }]
        );

        sched.register_all(&Schedule::new());
        assert_eq!(sched.job_count(), 0);
    }

    #[test]
    fn job_count_tracks_schedule_after_mutations() {
        let (sched, _, _) = setup(&[]);
        let mut schedule = Schedule::new();
        let ops: &[(&str, Option<&str>)] = &[
            ("07:00", Some("a.wav")),
            ("07:00", Some("b.wav")),
            ("12:30", Some("c.wav")),
            ("23:59", Some("d.wav")),
            ("12:30", None),
            ("01:00", None),
            ("05:05", Some("e.wav")),
        ];
        for (time, file) in ops {
            match file {
                Some(f) => {
                    schedule.upsert(t(time), *f).unwrap();
                }
                None => {
                    schedule.remove(t(time));
                }
            }
            sched.register_all(&schedule);
            assert_eq!(sched.job_count(), schedule.len());
        }
        assert_eq!(sched.job_count(), 3);
    }

    #[test]
    fn job_added_later_in_same_minute_waits_for_tomorrow() {
        let (sched, rec, clock) = setup(&[]);
        clock.set_time(7, 0, 5);
        sched.tick();

        let mut schedule = Schedule::new();
        schedule.upsert(t("07:00"), "late.wav").unwrap();
        sched.register_all(&schedule);
        clock.set_time(7, 0, 40);
        assert_eq!(sched.tick(), 0);
        assert!(rec.files().is_empty());
    }

    #[test]
    fn closure_handler() {
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        let clock = Arc::new(ManualClock::at(12, 0, 0));
        let sched = JobScheduler::new(
            Arc::new(move |_: &Job| *counter.lock().unwrap() += 1),
            clock,
            Duration::from_secs(1),
        );
        let mut schedule = Schedule::new();
        schedule.upsert(t("12:00"), "noon.wav").unwrap();
        sched.register_all(&schedule);
        sched.tick();
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn loop_fires_and_stops_promptly() {
        let (sched, rec, clock) = setup(&[("07:00", "a.wav")]);
        clock.set_time(7, 0, 0);

        let mut handle = sched.spawn().unwrap();
        assert!(handle.is_running());
        assert!(wait_until(Duration::from_secs(5), || rec.files().len() == 1));

        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!handle.is_running());
        assert_eq!(rec.files().len(), 1);
    }

    #[test]
    fn dropping_handle_stops_loop() {
        let (sched, _, _) = setup(&[]);
        let handle = sched.spawn().unwrap();
        drop(handle);
        // The loop held the only other reference.
        assert!(wait_until(Duration::from_secs(5), || Arc::strong_count(&sched) == 1));
    }
}
