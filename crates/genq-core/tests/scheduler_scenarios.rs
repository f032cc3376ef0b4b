//! Integration tests: the scheduler state machine against scripted adapters.
//!
//! Each test owns a temp state database. Per-job polling is parked an hour
//! out, so polls are stepped with `poll_job_once`.

mod common;

use std::sync::atomic::Ordering;

use common::{count, eventually, now_ms, processing_job, World};
use genq_core::job::{JobKind, JobStatus, VideoParams};
use genq_core::provider::PollReport;
use genq_core::scheduler::{ActionError, EnqueueOptions, JobEvent, PollStep, TIMED_OUT};

#[tokio::test]
async fn capacity_caps_submissions_and_frees_one_slot_per_completion() {
    let world = World::new().await;
    world.provider.hold_submissions();
    let ctx = world.start(6, 6).await;
    assert!(ctx.is_leader());

    for i in 0..8 {
        ctx.enqueue_image(common::image_params(&format!("p{i}")), EnqueueOptions::default())
            .await
            .unwrap();
    }
    let jobs = ctx.jobs();
    assert_eq!(count(&jobs, JobStatus::Submitting), 6);
    assert_eq!(count(&jobs, JobStatus::Queued), 2);

    world.provider.release_submissions();
    eventually("six jobs processing", || {
        count(&ctx.jobs(), JobStatus::Processing) == 6
    })
    .await;

    let done = ctx
        .jobs()
        .into_iter()
        .find(|j| j.status == JobStatus::Processing)
        .unwrap();
    let task_id = done.task_id.clone().unwrap();
    world.provider.script(
        &task_id,
        vec![Ok(PollReport::success(vec!["https://cdn/a.png".to_string()]))],
    );
    assert_eq!(ctx.poll_job_once(&done.id).await, PollStep::Stop);

    let jobs = ctx.jobs();
    assert!(jobs.iter().all(|j| j.id != done.id));
    let active = jobs.iter().filter(|j| j.status.is_active()).count();
    assert_eq!(active, 6);
    assert_eq!(count(&jobs, JobStatus::Queued), 1);
}

#[tokio::test]
async fn progress_never_regresses() {
    let world = World::new().await;
    let ctx = world.start(6, 6).await;
    let id = ctx
        .enqueue_image(common::image_params("cat"), EnqueueOptions::default())
        .await
        .unwrap();
    eventually("job processing", || {
        ctx.job(&id).is_some_and(|j| j.status == JobStatus::Processing)
    })
    .await;
    let job = ctx.job(&id).unwrap();
    assert_eq!(job.progress, 10);

    let task_id = job.task_id.unwrap();
    world.provider.script(
        &task_id,
        vec![
            Ok(PollReport::pending(Some(45))),
            Ok(PollReport::pending(Some(30))),
        ],
    );
    assert_eq!(ctx.poll_job_once(&id).await, PollStep::Continue);
    assert_eq!(ctx.poll_job_once(&id).await, PollStep::Continue);
    assert_eq!(ctx.job(&id).unwrap().progress, 45);
}

#[tokio::test]
async fn reload_resumes_polling_without_resubmitting() {
    let world = World::new().await;
    let job = processing_job("T1", now_ms() + 600_000);
    world.seed(std::slice::from_ref(&job)).await;

    let ctx = world.start(6, 6).await;
    assert_eq!(ctx.live_task_count(), 1);
    assert!(ctx.has_live_task(&job.id));
    assert_eq!(ctx.resume_active().await, 0);
    assert_eq!(ctx.resume_active().await, 0);
    assert_eq!(ctx.live_task_count(), 1);

    world.provider.script(
        "T1",
        vec![Ok(PollReport::success(vec!["https://cdn/1.png".to_string()]))],
    );
    assert_eq!(ctx.poll_job_once(&job.id).await, PollStep::Stop);
    assert_eq!(world.provider.submit_count(), 0);
    assert_eq!(world.provider.poll_count("T1"), 1);
    assert!(ctx.job(&job.id).is_none());
}

#[tokio::test]
async fn submitting_job_without_task_is_resubmitted_once() {
    let world = World::new().await;
    let mut job = processing_job("unused", now_ms() + 600_000);
    job.status = JobStatus::Submitting;
    job.task_id = None;
    world.seed(std::slice::from_ref(&job)).await;

    let ctx = world.start(6, 6).await;
    ctx.resume_active().await;
    eventually("resubmitted", || {
        ctx.job(&job.id).is_some_and(|j| j.task_id.is_some())
    })
    .await;
    ctx.resume_active().await;
    assert_eq!(world.provider.submit_count(), 1);
    assert_eq!(ctx.job(&job.id).unwrap().status, JobStatus::Processing);
}

#[tokio::test]
async fn expired_job_times_out_and_retry_resumes_polling() {
    let world = World::new().await;
    let job = processing_job("T1", now_ms() - 1);
    world.seed(std::slice::from_ref(&job)).await;

    let ctx = world.start(6, 6).await;
    let mut events = ctx.subscribe_events();
    ctx.tick().await;

    let timed_out = ctx.job(&job.id).unwrap();
    assert_eq!(timed_out.status, JobStatus::Timeout);
    assert_eq!(timed_out.error.as_deref(), Some(TIMED_OUT));
    assert!(!ctx.has_live_task(&job.id));
    match events.try_recv().unwrap() {
        JobEvent::TimedOut(id) => assert_eq!(id, job.id),
        other => panic!("unexpected event: {other:?}"),
    }
    let stored = world.store().load_all().await.unwrap();
    assert_eq!(stored[0].status, JobStatus::Timeout);

    let before = now_ms();
    ctx.retry(&job.id).await.unwrap();
    let retried = ctx.job(&job.id).unwrap();
    assert_eq!(retried.status, JobStatus::Processing);
    assert_eq!(retried.task_id.as_deref(), Some("T1"));
    assert!(retried.error.is_none());
    assert!(retried.timeout_at >= before + ctx.settings().timeout().as_millis() as i64);
    assert!(ctx.has_live_task(&job.id));
    assert_eq!(world.provider.submit_count(), 0);
}

#[tokio::test]
async fn poll_tick_past_deadline_times_out_without_polling() {
    let world = World::new().await;
    let job = processing_job("T1", now_ms() - 1);
    world.seed(std::slice::from_ref(&job)).await;
    let ctx = world.start(6, 6).await;

    assert_eq!(ctx.poll_job_once(&job.id).await, PollStep::Stop);
    let timed_out = ctx.job(&job.id).unwrap();
    assert_eq!(timed_out.status, JobStatus::Timeout);
    assert_eq!(timed_out.error.as_deref(), Some(TIMED_OUT));
    assert_eq!(world.provider.poll_count("T1"), 0);
    let stored = world.store().load_all().await.unwrap();
    assert_eq!(stored[0].error.as_deref(), Some(TIMED_OUT));
}

#[tokio::test]
async fn failed_persist_still_completes_and_keeps_pending_upload() {
    let world = World::new().await;
    world.artifacts.fail.store(true, Ordering::SeqCst);
    let job = processing_job("T1", now_ms() + 600_000);
    world.seed(std::slice::from_ref(&job)).await;
    let ctx = world.start(6, 6).await;
    let mut events = ctx.subscribe_events();

    world.provider.script(
        "T1",
        vec![Ok(PollReport::success(vec!["https://cdn/x.png".to_string()]))],
    );
    assert_eq!(ctx.poll_job_once(&job.id).await, PollStep::Stop);

    match events.try_recv().unwrap() {
        JobEvent::Completed(done) => {
            assert_eq!(done.id, job.id);
            assert_eq!(done.status, JobStatus::Success);
            assert_eq!(done.progress, 100);
            assert_eq!(done.payload.results(), vec!["https://cdn/x.png".to_string()]);
            let error = done.error.unwrap();
            assert!(error.contains("bucket unavailable"), "{error}");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(ctx.job(&job.id).is_none());
    assert!(world.store().load_all().await.unwrap().is_empty());

    let pending = ctx.pending_uploads().list().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].artifact.source_url, "https://cdn/x.png");
    assert_eq!(pending[0].artifact.task_id.as_deref(), Some("T1"));
}

#[tokio::test]
async fn successful_persist_stores_saved_locations() {
    let world = World::new().await;
    let job = processing_job("T1", now_ms() + 600_000);
    world.seed(std::slice::from_ref(&job)).await;
    let ctx = world.start(6, 6).await;
    let mut events = ctx.subscribe_events();

    world.provider.script(
        "T1",
        vec![Ok(PollReport::success(vec![
            "https://cdn/1.png".to_string(),
            "https://cdn/2.png".to_string(),
        ]))],
    );
    ctx.poll_job_once(&job.id).await;

    let JobEvent::Completed(done) = events.try_recv().unwrap() else {
        panic!("expected completion");
    };
    assert_eq!(
        done.payload.results(),
        vec![
            "saved://https://cdn/1.png".to_string(),
            "saved://https://cdn/2.png".to_string()
        ]
    );
    assert!(ctx.pending_uploads().list().await.unwrap().is_empty());
    let persisted: Vec<String> = world
        .artifacts
        .persisted
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.source_url.clone())
        .collect();
    assert!(persisted.contains(&"https://cdn/1.png".to_string()));
    assert!(persisted.contains(&"https://cdn/2.png".to_string()));
}

#[tokio::test]
async fn saving_job_is_polled_again_after_reload() {
    let world = World::new().await;
    let mut job = processing_job("T1", now_ms() + 600_000);
    job.status = JobStatus::Saving;
    world.seed(std::slice::from_ref(&job)).await;

    let ctx = world.start(6, 6).await;
    assert!(ctx.has_live_task(&job.id));
    assert_eq!(ctx.job(&job.id).unwrap().status, JobStatus::Saving);

    world.provider.script(
        "T1",
        vec![Ok(PollReport::success(vec!["https://cdn/1.png".to_string()]))],
    );
    assert_eq!(ctx.poll_job_once(&job.id).await, PollStep::Stop);
    assert!(ctx.job(&job.id).is_none());
    assert_eq!(world.provider.submit_count(), 0);
}

#[tokio::test]
async fn submission_failure_drops_job_and_frees_capacity() {
    let world = World::new().await;
    world.provider.fail_submissions("invalid api key");
    let ctx = world.start(1, 1).await;
    let mut events = ctx.subscribe_events();

    let first = ctx
        .enqueue_image(common::image_params("a"), EnqueueOptions::default())
        .await
        .unwrap();
    let second = ctx
        .enqueue_image(common::image_params("b"), EnqueueOptions::default())
        .await
        .unwrap();

    eventually("both jobs dropped", || ctx.jobs().is_empty()).await;
    assert_eq!(world.provider.submit_count(), 2);

    let mut dropped = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let JobEvent::Dropped { id, kind, reason } = event {
            assert_eq!(kind, JobKind::Image);
            assert!(reason.contains("invalid api key"), "reason: {reason}");
            dropped.push(id);
        }
    }
    assert_eq!(dropped, vec![first, second]);
    assert!(world.store().load_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_credentials_drop_without_submitting() {
    let world = World::new().await;
    let ctx = world.instance_with(common::settings(6, 6), "");
    ctx.start().await;
    let mut events = ctx.subscribe_events();

    let id = ctx
        .enqueue_video(VideoParams::default(), EnqueueOptions::default())
        .await
        .unwrap();
    eventually("job dropped", || ctx.job(&id).is_none()).await;
    assert_eq!(world.provider.submit_count(), 0);
    match events.recv().await.unwrap() {
        JobEvent::Dropped { kind, reason, .. } => {
            assert_eq!(kind, JobKind::Video);
            assert!(reason.contains("credentials"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn terminal_failure_removes_job() {
    let world = World::new().await;
    let job = processing_job("T1", now_ms() + 600_000);
    world.seed(std::slice::from_ref(&job)).await;
    let ctx = world.start(6, 6).await;
    let mut events = ctx.subscribe_events();

    world
        .provider
        .script("T1", vec![Ok(PollReport::failure("moderation"))]);
    assert_eq!(ctx.poll_job_once(&job.id).await, PollStep::Stop);
    assert!(ctx.job(&job.id).is_none());
    match events.try_recv().unwrap() {
        JobEvent::Dropped { id, reason, .. } => {
            assert_eq!(id, job.id);
            assert_eq!(reason, "moderation");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn transient_poll_error_changes_nothing() {
    let world = World::new().await;
    let job = processing_job("T1", now_ms() + 600_000);
    world.seed(std::slice::from_ref(&job)).await;
    let ctx = world.start(6, 6).await;

    world
        .provider
        .script("T1", vec![Err("connection reset".to_string())]);
    assert_eq!(ctx.poll_job_once(&job.id).await, PollStep::Continue);
    let after = ctx.job(&job.id).unwrap();
    assert_eq!(after.status, JobStatus::Processing);
    assert_eq!(after.progress, 10);
}

#[tokio::test]
async fn retry_at_capacity_requeues_until_a_slot_frees() {
    let world = World::new().await;
    let mut stuck = processing_job("T1", now_ms() - 60_000);
    stuck.status = JobStatus::Timeout;
    let busy = processing_job("T2", now_ms() + 600_000);
    world.seed(&[stuck.clone(), busy.clone()]).await;
    let ctx = world.start(1, 1).await;

    ctx.retry(&stuck.id).await.unwrap();
    assert_eq!(ctx.job(&stuck.id).unwrap().status, JobStatus::Queued);
    assert!(!ctx.has_live_task(&stuck.id));

    world.provider.script(
        "T2",
        vec![Ok(PollReport::success(vec!["https://cdn/2.png".to_string()]))],
    );
    ctx.poll_job_once(&busy.id).await;

    let resumed = ctx.job(&stuck.id).unwrap();
    assert_eq!(resumed.status, JobStatus::Processing);
    assert!(ctx.has_live_task(&stuck.id));
    assert_eq!(world.provider.submit_count(), 0);
}

#[tokio::test]
async fn actions_only_apply_to_timed_out_jobs() {
    let world = World::new().await;
    let mut stuck = processing_job("T1", now_ms() - 60_000);
    stuck.status = JobStatus::Timeout;
    let running = processing_job("T2", now_ms() + 600_000);
    world.seed(&[stuck.clone(), running.clone()]).await;
    let ctx = world.start(6, 6).await;

    assert_eq!(
        ctx.cancel(&running.id).await,
        Err(ActionError::NotTimedOut(running.id.clone()))
    );
    assert_eq!(
        ctx.retry(&running.id).await,
        Err(ActionError::NotTimedOut(running.id.clone()))
    );
    let missing = genq_core::job::JobId::from("job_0_nope00");
    assert_eq!(
        ctx.cancel(&missing).await,
        Err(ActionError::NotFound(missing.clone()))
    );

    ctx.cancel(&stuck.id).await.unwrap();
    assert!(ctx.job(&stuck.id).is_none());
    let stored: Vec<_> = world
        .store()
        .load_all()
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(stored, vec![running.id]);
}
