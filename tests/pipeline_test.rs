mod helpers;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use helpers::{axis, option, question, shared_db, text_models, KeywordProvider};
use lensmatch::catalog::types::{Dimension, QuestionType};
use lensmatch::catalog::{questions, update_content_source};
use lensmatch::db::{self, SharedDb};
use lensmatch::embedding::{store, EmbeddingModels, EmbeddingProvider};
use lensmatch::jobs::queue;
use lensmatch::jobs::types::JobStatus;
use lensmatch::pipeline::{process_pending, spawn_processing, ProcessOptions, ProgressEvent, ProgressSink};

fn seed_choices(db: &SharedDb, texts: &[(&str, &str)]) {
    let conn = db::lock(db).unwrap();
    question(&conn, "mood", Dimension::StyleEmotion, QuestionType::SingleChoice);
    for (id, text) in texts {
        questions::add_option(&conn, "mood", Some(id), text).unwrap();
    }
}

fn small_batches() -> ProcessOptions {
    ProcessOptions {
        batch_size: 2,
        request_batch_size: 2,
        max_concurrency: 2,
        ..ProcessOptions::default()
    }
}

#[tokio::test]
async fn run_embeds_pending_units_and_completes_jobs() {
    let db = shared_db();
    seed_choices(&db, &[("a", "warm light"), ("b", "calm pace"), ("c", "a story")]);

    let summary = process_pending(db.clone(), text_models(), small_batches(), ProgressSink::none())
        .await
        .unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.failed, 0);

    let conn = db::lock(&db).unwrap();
    assert_eq!(store::get_embedding(&conn, "a").unwrap(), Some(axis(0)));
    assert_eq!(store::get_embedding(&conn, "c").unwrap(), Some(axis(2)));
    let unit = store::get_unit(&conn, "b").unwrap().unwrap();
    assert_eq!(unit.embedding_model.as_deref(), Some("keyword-test"));
    assert!(unit.embedding_generated_at.is_some());
    assert_eq!(queue::job_counts(&conn).unwrap().completed, 3);
}

#[tokio::test]
async fn one_failure_does_not_abort_the_batch() {
    let db = shared_db();
    seed_choices(&db, &[("a", "warm"), ("bad", "please reject me"), ("c", "calm")]);

    let summary = process_pending(db.clone(), text_models(), small_batches(), ProgressSink::none())
        .await
        .unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);

    let conn = db::lock(&db).unwrap();
    let failed = queue::list_jobs(&conn, Some(JobStatus::Failed), 10).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].target_id, "bad");
    assert!(failed[0].error_message.as_deref().unwrap().contains("rejected"));
    assert!(store::get_embedding(&conn, "bad").unwrap().is_none());
    assert!(store::get_embedding(&conn, "c").unwrap().is_some());
}

#[tokio::test]
async fn reset_failed_makes_jobs_processable_again() {
    let db = shared_db();
    seed_choices(&db, &[("bad", "reject")]);
    process_pending(db.clone(), text_models(), small_batches(), ProgressSink::none())
        .await
        .unwrap();

    {
        let conn = db::lock(&db).unwrap();
        assert_eq!(queue::reset_failed(&conn).unwrap(), 1);
        let job = &queue::list_jobs(&conn, None, 10).unwrap()[0];
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.error_message.is_none());
    }

    update_content_source(&mut db::lock(&db).unwrap(), "bad", "warm now").unwrap();
    let summary = process_pending(db.clone(), text_models(), small_batches(), ProgressSink::none())
        .await
        .unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(store::get_embedding(&db::lock(&db).unwrap(), "bad").unwrap(), Some(axis(0)));
}

#[tokio::test]
async fn image_jobs_fail_without_an_image_model() {
    let db = shared_db();
    {
        let conn = db::lock(&db).unwrap();
        question(&conn, "pick", Dimension::StyleEmotion, QuestionType::ImageChoice);
        option(&conn, "pick", "img-1", None);
    }

    let summary = process_pending(db.clone(), text_models(), small_batches(), ProgressSink::none())
        .await
        .unwrap();
    assert_eq!(summary.failed, 1);

    let conn = db::lock(&db).unwrap();
    let job = &queue::list_jobs(&conn, Some(JobStatus::Failed), 10).unwrap()[0];
    assert!(job.error_message.as_deref().unwrap().contains("image"));
}

#[tokio::test]
async fn image_jobs_use_the_image_model() {
    let db = shared_db();
    {
        let conn = db::lock(&db).unwrap();
        question(&conn, "pick", Dimension::StyleEmotion, QuestionType::ImageChoice);
        option(&conn, "pick", "img-1", None);
    }
    let models = EmbeddingModels::new(Arc::new(KeywordProvider), Some(Arc::new(Constant(vec![0.0, 0.0, 0.0, 2.0]))));

    let summary = process_pending(db.clone(), models, small_batches(), ProgressSink::none())
        .await
        .unwrap();
    assert_eq!(summary.completed, 1);
    let conn = db::lock(&db).unwrap();
    let unit = store::get_unit(&conn, "img-1").unwrap().unwrap();
    assert_eq!(unit.embedding_model.as_deref(), Some("constant"));
}

#[tokio::test]
async fn max_jobs_caps_a_run() {
    let db = shared_db();
    seed_choices(&db, &[("a", "warm"), ("b", "calm"), ("c", "story"), ("d", "other")]);

    let summary = process_pending(db.clone(), text_models(), small_batches().with_max_jobs(Some(3)), ProgressSink::none())
        .await
        .unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.processed, 3);
    assert_eq!(queue::job_counts(&db::lock(&db).unwrap()).unwrap().pending, 1);
}

#[tokio::test]
async fn progress_stream_ends_with_done() {
    let db = shared_db();
    seed_choices(&db, &[("a", "warm"), ("b", "calm"), ("c", "story")]);

    let (handle, mut rx) = spawn_processing(db.clone(), text_models(), small_batches());
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let summary = handle.await.unwrap().unwrap();

    assert_eq!(events.first(), Some(&ProgressEvent::Started { total: 3 }));
    assert_eq!(events.last(), Some(&ProgressEvent::Finished(summary.clone())));
    let mut last_processed = 0;
    for event in &events {
        if let ProgressEvent::Progress { processed, total, .. } = event {
            assert_eq!(*total, 3);
            assert!(*processed >= last_processed);
            last_processed = *processed;
        }
    }
    assert_eq!(last_processed, 3);
}

#[tokio::test]
async fn dropped_consumer_does_not_stop_the_run() {
    let db = shared_db();
    seed_choices(&db, &[("a", "warm"), ("b", "calm"), ("c", "story")]);

    let (handle, rx) = spawn_processing(db.clone(), text_models(), small_batches());
    drop(rx);
    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.completed, 3);
    assert_eq!(queue::job_counts(&db::lock(&db).unwrap()).unwrap().processing, 0);
}

#[tokio::test]
async fn stuck_jobs_are_recovered_at_run_start() {
    let db = shared_db();
    seed_choices(&db, &[("a", "warm")]);
    {
        let mut conn = db::lock(&db).unwrap();
        let claimed = queue::claim_pending(&mut conn, 10).unwrap();
        assert_eq!(claimed.len(), 1);
        conn.execute(
            "UPDATE embedding_jobs SET started_at = '2000-01-01T00:00:00.000000Z'",
            [],
        )
        .unwrap();
    }

    let summary = process_pending(db.clone(), text_models(), small_batches(), ProgressSink::none())
        .await
        .unwrap();
    assert_eq!(summary.recovered, 1);
    assert_eq!(summary.completed, 1);
    assert!(store::get_embedding(&db::lock(&db).unwrap(), "a").unwrap().is_some());
}

/// Edits the unit it is asked to embed, simulating an editor saving while the
/// model call is in flight.
struct EditsDuringCall {
    db: SharedDb,
}

impl EmbeddingProvider for EditsDuringCall {
    fn model_name(&self) -> &str {
        "edits-during-call"
    }

    fn embed(&self, input: &str) -> Result<Vec<f32>> {
        if input == "before edit" {
            let mut conn = db::lock(&self.db)?;
            update_content_source(&mut conn, "a", "after edit")?;
        }
        Ok(axis(0))
    }
}

#[tokio::test]
async fn vector_for_edited_content_is_discarded() {
    let db = shared_db();
    seed_choices(&db, &[("a", "before edit")]);
    let models = EmbeddingModels::new(Arc::new(EditsDuringCall { db: db.clone() }), None);

    let summary = process_pending(db.clone(), models, small_batches().with_max_jobs(Some(1)), ProgressSink::none())
        .await
        .unwrap();
    assert_eq!(summary.superseded, 1);

    let conn = db::lock(&db).unwrap();
    let unit = store::get_unit(&conn, "a").unwrap().unwrap();
    assert_eq!(unit.source, "after edit");
    assert!(unit.embedding.is_none());
    assert_eq!(queue::job_counts(&conn).unwrap().pending, 1);
}

/// Simulates a run that outlives the stuck timeout: mid-call, stuck
/// recovery hands its job back to the queue and an editor saves, so the edit
/// collapses onto that same recovered job.
struct RecoveredThenEdited {
    db: SharedDb,
}

impl EmbeddingProvider for RecoveredThenEdited {
    fn model_name(&self) -> &str {
        "recovered-then-edited"
    }

    fn embed(&self, input: &str) -> Result<Vec<f32>> {
        if input == "before edit" {
            let mut conn = db::lock(&self.db)?;
            conn.execute("UPDATE embedding_jobs SET started_at = '2000-01-01T00:00:00.000000Z'", [])?;
            queue::recover_stuck(&conn, chrono::Duration::minutes(10))?;
            update_content_source(&mut conn, "a", "after edit")?;
        }
        Ok(axis(0))
    }
}

#[tokio::test]
async fn recovered_job_is_not_completed_by_the_late_run() {
    let db = shared_db();
    seed_choices(&db, &[("a", "before edit")]);
    let models = EmbeddingModels::new(Arc::new(RecoveredThenEdited { db: db.clone() }), None);

    let summary = process_pending(db.clone(), models, small_batches().with_max_jobs(Some(1)), ProgressSink::none())
        .await
        .unwrap();
    assert_eq!(summary.released, 1);
    assert_eq!(summary.completed, 0);

    {
        let conn = db::lock(&db).unwrap();
        assert!(store::get_embedding(&conn, "a").unwrap().is_none());
        let counts = queue::job_counts(&conn).unwrap();
        assert_eq!(counts.pending, 1, "the edited unit must keep a live job");
        assert_eq!(counts.completed, 0);
    }

    let summary = process_pending(db.clone(), text_models(), small_batches(), ProgressSink::none())
        .await
        .unwrap();
    assert_eq!(summary.completed, 1);
    let conn = db::lock(&db).unwrap();
    assert_eq!(store::get_embedding(&conn, "a").unwrap(), Some(axis(3)));
    assert_eq!(queue::job_counts(&conn).unwrap().pending, 0);
}

/// Edits `edit-me` the first time it is embedded, while the other run may be
/// holding or recovering claims.
struct EditsOnce {
    db: SharedDb,
    edited: AtomicBool,
}

impl EmbeddingProvider for EditsOnce {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn embed(&self, input: &str) -> Result<Vec<f32>> {
        if input == "edit me" && !self.edited.swap(true, Ordering::SeqCst) {
            let mut conn = db::lock(&self.db)?;
            update_content_source(&mut conn, "edit-me", "warm after edit")?;
        }
        std::thread::sleep(std::time::Duration::from_millis(2));
        KeywordProvider.embed(input)
    }
}

/// Units with no current vector and no pending or processing job.
fn orphaned_units(db: &SharedDb) -> Vec<String> {
    let conn = db::lock(db).unwrap();
    let mut stmt = conn
        .prepare(
            "SELECT u.id FROM content_units u WHERE u.embedding_generated_at IS NULL AND NOT EXISTS ( \
                SELECT 1 FROM embedding_jobs j \
                WHERE j.target_id = u.id AND j.status IN ('pending', 'processing'))",
        )
        .unwrap();
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    ids
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_runs_never_orphan_a_unit() {
    let db = shared_db();
    let mut texts: Vec<(String, String)> = (0..24)
        .map(|i| (format!("u{i:02}"), ["warm", "calm", "story", "plain"][i % 4].to_string()))
        .collect();
    texts.push(("edit-me".into(), "edit me".into()));
    let refs: Vec<(&str, &str)> = texts.iter().map(|(id, t)| (id.as_str(), t.as_str())).collect();
    seed_choices(&db, &refs);

    let provider = Arc::new(EditsOnce {
        db: db.clone(),
        edited: AtomicBool::new(false),
    });
    // A zero stuck timeout makes each run recover the other's in-flight claims.
    let options = ProcessOptions {
        stuck_timeout: std::time::Duration::ZERO,
        ..small_batches()
    };

    let first = process_pending(
        db.clone(),
        EmbeddingModels::new(provider.clone(), None),
        options.clone(),
        ProgressSink::none(),
    );
    let second = process_pending(
        db.clone(),
        EmbeddingModels::new(provider.clone(), None),
        options,
        ProgressSink::none(),
    );
    let (first, second) = tokio::join!(first, second);
    first.unwrap();
    second.unwrap();

    assert!(orphaned_units(&db).is_empty());
    assert_eq!(queue::job_counts(&db::lock(&db).unwrap()).unwrap().processing, 0);

    // Whatever was left queued drains in a quiet run.
    process_pending(db.clone(), text_models(), small_batches(), ProgressSink::none())
        .await
        .unwrap();
    let conn = db::lock(&db).unwrap();
    assert_eq!(store::count_missing(&conn).unwrap(), 0);
    assert_eq!(store::get_embedding(&conn, "edit-me").unwrap(), Some(axis(0)));
    let counts = queue::job_counts(&conn).unwrap();
    assert_eq!(counts.pending + counts.processing, 0);
}

struct Constant(Vec<f32>);

impl EmbeddingProvider for Constant {
    fn model_name(&self) -> &str {
        "constant"
    }

    fn embed(&self, _input: &str) -> Result<Vec<f32>> {
        Ok(self.0.clone())
    }
}
